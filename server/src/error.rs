use thiserror::Error;

/// Top-level error kinds for the server (§7). Recoverable kinds are
/// absorbed and logged at their component boundary; only `Config` is
/// fatal and causes a non-zero exit before the listener binds.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("server at capacity")]
    Capacity,
    #[error("session timed out")]
    Timeout,
    #[error("ASR failure: {0}")]
    Asr(#[from] crate::asr::AsrError),
    #[error("translation failed: {0}")]
    Translator(#[from] crate::translator::TranslateError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("configuration error: {0}")]
    Config(String),
}
