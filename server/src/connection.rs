//! Transport plumbing: a stream enum bridging plain TCP and TLS, and a
//! per-connection outbound serializer (§5 "Connection writes from many
//! tasks: add a per-connection outbound serializer").

use std::pin::Pin;
use std::task::{Context, Poll};

use futures_util::stream::SplitSink;
use futures_util::SinkExt;
use serde::Serialize;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

/// Either a bare TCP stream or one wrapped in TLS. Both inner types are
/// `Unpin`, so this enum can delegate `AsyncRead`/`AsyncWrite` by
/// matching on `get_mut()` without any unsafe code.
pub enum RawStream {
    Plain(TcpStream),
    Tls(Box<tokio_rustls::server::TlsStream<TcpStream>>),
}

impl AsyncRead for RawStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            RawStream::Plain(s) => Pin::new(s).poll_read(cx, buf),
            RawStream::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for RawStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        match self.get_mut() {
            RawStream::Plain(s) => Pin::new(s).poll_write(cx, buf),
            RawStream::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            RawStream::Plain(s) => Pin::new(s).poll_flush(cx),
            RawStream::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            RawStream::Plain(s) => Pin::new(s).poll_shutdown(cx),
            RawStream::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}

pub type WsSink = SplitSink<WebSocketStream<RawStream>, Message>;

#[derive(Debug, Error)]
pub enum SendError {
    #[error("failed to serialize outbound message: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("failed to write to connection: {0}")]
    Write(#[from] tokio_tungstenite::tungstenite::Error),
}

/// Serializes all outbound writes to one connection behind a mutex, so
/// concurrent senders (the ASR driver loop, a translation task) never
/// interleave frames on the wire.
pub struct OutboundSink {
    sink: Mutex<WsSink>,
}

impl OutboundSink {
    pub fn new(sink: WsSink) -> Self {
        OutboundSink {
            sink: Mutex::new(sink),
        }
    }

    pub async fn send_json<T: Serialize>(&self, value: &T) -> Result<(), SendError> {
        let text = serde_json::to_string(value)?;
        let mut sink = self.sink.lock().await;
        sink.send(Message::Text(text.into())).await?;
        Ok(())
    }

    pub async fn close(&self) -> Result<(), SendError> {
        let mut sink = self.sink.lock().await;
        sink.close().await?;
        Ok(())
    }
}
