//! Accept loop, handshake dispatch, and the per-speaker inbound frame
//! pump (§4.2, §4.7, §5). Grounded in the teacher's `handle_connection`:
//! one task per accepted connection, upgraded to WebSocket, first frame
//! decides everything that follows.

use std::sync::Arc;

use futures_util::{Stream, StreamExt};
use streamcast_protocol::{Handshake, HandshakeRequest, ServerToSpeaker, SpeakerFrame};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;
use tokio_tungstenite::tungstenite::Message;
use tracing::{info, warn};

use crate::asr::AsrService;
use crate::connection::{OutboundSink, RawStream};
use crate::listener_session::ListenerHandle;
use crate::session_manager::{next_conn_id, reject_if_full, SessionManager};
use crate::speaker_session::SpeakerHandle;
use crate::translator::TranslatorPool;

pub struct Shared {
    pub sessions: Arc<SessionManager>,
    pub asr: Arc<AsrService>,
    pub translator: Arc<TranslatorPool>,
}

pub async fn run(listener: TcpListener, tls: Option<TlsAcceptor>, shared: Arc<Shared>) {
    loop {
        let (stream, peer_addr) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                warn!(error = %e, "failed to accept connection");
                continue;
            }
        };
        info!(%peer_addr, "accepted connection");
        let shared = shared.clone();
        let tls = tls.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, tls, shared).await {
                warn!(%peer_addr, error = %e, "connection ended with an error");
            }
        });
    }
}

async fn handle_connection(
    stream: TcpStream,
    tls: Option<TlsAcceptor>,
    shared: Arc<Shared>,
) -> anyhow::Result<()> {
    let raw = match tls {
        Some(acceptor) => RawStream::Tls(Box::new(acceptor.accept(stream).await?)),
        None => RawStream::Plain(stream),
    };
    let ws = tokio_tungstenite::accept_async(raw).await?;
    let (sink, mut stream) = ws.split();
    let outbound = Arc::new(OutboundSink::new(sink));

    let handshake = match stream.next().await {
        Some(Ok(Message::Text(text))) => serde_json::from_str::<HandshakeRequest>(&text)?,
        Some(Ok(_)) => anyhow::bail!("first frame must be a text handshake"),
        Some(Err(e)) => return Err(e.into()),
        None => anyhow::bail!("connection closed before handshake"),
    };

    match handshake.classify() {
        Handshake::Speaker(speaker) => run_speaker(speaker, outbound, stream, shared).await,
        Handshake::Listener(listener) => run_listener(listener, outbound, stream, shared).await,
    }
}

async fn run_speaker(
    handshake: streamcast_protocol::SpeakerHandshake,
    outbound: Arc<OutboundSink>,
    mut stream: impl Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
    shared: Arc<Shared>,
) -> anyhow::Result<()> {
    let uid = handshake.uid.clone();
    if reject_if_full(&shared.sessions.speakers, &uid, &outbound).await {
        return Ok(());
    }

    if let Some(evicted) = shared.sessions.speakers.take_prior(&uid).await {
        info!(uid = %uid, "evicting prior speaker session with the same uid");
        evicted.shutdown().await;
    }

    let conn_id = next_conn_id();
    let handle = SpeakerHandle::spawn(
        handshake,
        outbound.clone(),
        shared.asr.clone(),
        shared.translator.clone(),
        shared.sessions.listeners.clone(),
    );
    shared.sessions.speakers.add(conn_id, &uid, handle.clone()).await;
    outbound.send_json(&ServerToSpeaker::ready(&uid)).await.ok();

    while let Some(frame) = stream.next().await {
        let frame = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => continue,
        };
        match SpeakerFrame::parse(&frame) {
            Ok(SpeakerFrame::Audio {
                samples,
                speaker_lang,
                all_langs,
                ..
            }) => {
                if let Some(lang) = speaker_lang {
                    *handle.shared.speaker_lang.lock().await = Some(lang);
                }
                if !all_langs.is_empty() {
                    *handle.shared.all_langs.lock().await = all_langs;
                }
                handle.audio.append(&samples);
            }
            Ok(SpeakerFrame::EndOfAudio) => {
                handle.signal_drain();
                break;
            }
            Ok(SpeakerFrame::Ignored) => {}
            Err(e) => {
                warn!(uid = %uid, error = %e, "dropping malformed speaker frame");
            }
        }
    }

    shared.sessions.speakers.remove(conn_id, &uid).await;
    handle.shutdown().await;
    Ok(())
}

async fn run_listener(
    handshake: streamcast_protocol::ListenerHandshake,
    outbound: Arc<OutboundSink>,
    mut stream: impl Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
    shared: Arc<Shared>,
) -> anyhow::Result<()> {
    if shared.sessions.listeners.is_full().await {
        warn!(uid = %handshake.uid, "listener registry full, rejecting connection");
        return Ok(());
    }

    let conn_id = next_conn_id();
    let handle = ListenerHandle::new(handshake.uid.clone(), handshake.follows, outbound.clone());
    shared.sessions.listeners.add(conn_id, handle).await;

    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => {}
        }
    }

    shared.sessions.listeners.remove(conn_id).await;
    Ok(())
}
