mod asr;
mod audio_buffer;
mod config;
mod connection;
mod error;
mod listener_session;
mod retry;
mod sentence_accumulator;
mod server;
mod session_manager;
mod speaker_session;
mod tls;
mod translator;

use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tracing::info;

use crate::asr::{AsrService, WhisperRsEngine};
use crate::config::Args;
use crate::error::ServerError;
use crate::translator::TranslatorPool;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let providers = args.build_providers()?;
    info!(count = providers.len(), "configured translation providers");
    let translator = Arc::new(
        TranslatorPool::new(providers)
            .with_retry_policy(args.translator_max_retries, std::time::Duration::from_millis(args.translator_retry_delay_ms)),
    );

    info!(model = %args.model, "loading whisper model");
    let engine = WhisperRsEngine::load(&args.model).map_err(|e| ServerError::Config(e.to_string()))?;
    let asr = Arc::new(AsrService::new(Arc::new(engine)));

    let tls_acceptor = match args.tls_paths() {
        Some((cert, key)) => {
            info!("TLS enabled");
            let config = tls::load_server_config(cert, key).map_err(|e| ServerError::Config(e.to_string()))?;
            Some(TlsAcceptor::from(config))
        }
        None => None,
    };

    let sessions = session_manager::SessionManager::new(
        args.max_speakers,
        args.max_listeners,
        args.max_connection_time(),
        args.heartbeat_interval(),
    );

    let addr: SocketAddr = format!("{}:{}", args.address, args.port).parse()?;
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "listening");

    let shared = Arc::new(server::Shared {
        sessions,
        asr,
        translator,
    });
    server::run(listener, tls_acceptor, shared).await;
    Ok(())
}
