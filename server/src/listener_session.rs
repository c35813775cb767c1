//! Listener sessions are passive: the only behavior they carry is which
//! speaker they `follows`. All broadcast fan-out logic lives in
//! [`crate::session_manager::ListenerRegistry`] (§3, §4.7).

use std::sync::Arc;

use crate::connection::OutboundSink;

pub struct ListenerHandle {
    pub uid: String,
    pub follows: String,
    pub outbound: Arc<OutboundSink>,
}

impl ListenerHandle {
    pub fn new(uid: String, follows: String, outbound: Arc<OutboundSink>) -> Arc<Self> {
        Arc::new(ListenerHandle {
            uid,
            follows,
            outbound,
        })
    }
}
