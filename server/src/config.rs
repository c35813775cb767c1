//! CLI surface and startup validation (§6, §7). Modeled on the teacher's
//! `clap::Parser` `Args` struct; fields are regrouped around the new
//! components (ASR model, translation providers, capacity limits, TLS)
//! instead of whisper.cpp's decode-tuning knobs.

use std::time::Duration;

use clap::Parser;

use crate::error::ServerError;
use crate::translator::{MockProvider, OpenAiCompatibleProvider, Provider};

#[derive(Parser, Debug)]
#[command(name = "streamcast-server")]
pub struct Args {
    #[arg(long, default_value = "[::]", help = "address to listen on")]
    pub address: String,

    #[arg(long, default_value = "9090", help = "port to listen on")]
    pub port: u16,

    #[arg(long, help = "path to whisper.cpp GGML model file")]
    pub model: String,

    #[arg(long, help = "TLS certificate in PEM format; enables TLS if set with --tls-key")]
    pub tls_cert: Option<String>,

    #[arg(long, help = "TLS private key in PEM format")]
    pub tls_key: Option<String>,

    #[arg(long, default_value_t = 4, help = "maximum concurrent speaker connections")]
    pub max_speakers: usize,

    #[arg(long, default_value_t = 64, help = "maximum concurrent listener connections")]
    pub max_listeners: usize,

    #[arg(long, default_value_t = 72000, help = "maximum connection lifetime, in seconds")]
    pub max_connection_secs: u64,

    #[arg(long, default_value_t = 15, help = "listener heartbeat interval, in seconds")]
    pub heartbeat_secs: u64,

    #[arg(
        long = "translator",
        help = "translator provider spec \"kind:base_url:model:api_key_env\" (kind is \"openai\" \
                or \"mock\"); repeatable, tried round-robin"
    )]
    pub translators: Vec<String>,

    #[arg(
        long,
        help = "allow starting with zero translator providers configured (submissions are then \
                always dropped per the translator pool's NoProviders error)"
    )]
    pub allow_no_translators: bool,

    #[arg(long, default_value_t = 3, help = "max attempts per translation chunk")]
    pub translator_max_retries: u32,

    #[arg(long, default_value_t = 500, help = "delay between translation retries, in milliseconds")]
    pub translator_retry_delay_ms: u64,
}

impl Args {
    pub fn max_connection_time(&self) -> Duration {
        Duration::from_secs(self.max_connection_secs)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs)
    }

    pub fn tls_paths(&self) -> Option<(&str, &str)> {
        match (&self.tls_cert, &self.tls_key) {
            (Some(cert), Some(key)) => Some((cert, key)),
            _ => None,
        }
    }

    /// Build the configured set of translation providers from repeated
    /// `--translator kind:base_url:model:api_key_env` specs. At least one
    /// is required unless `--allow-no-translators` is set (§7 Config
    /// errors abort startup before the listener binds).
    pub fn build_providers(&self) -> Result<Vec<Provider>, ServerError> {
        if self.translators.is_empty() {
            if self.allow_no_translators {
                return Ok(Vec::new());
            }
            return Err(ServerError::Config(
                "at least one --translator is required (or pass --allow-no-translators)".into(),
            ));
        }
        self.translators
            .iter()
            .enumerate()
            .map(|(i, spec)| parse_translator_spec(i, spec))
            .collect()
    }
}

fn parse_translator_spec(index: usize, spec: &str) -> Result<Provider, ServerError> {
    let mut parts = spec.splitn(4, ':');
    let kind = parts.next().unwrap_or("");
    match kind {
        "mock" => Ok(Provider::Mock(MockProvider::new(format!("mock-{index}")))),
        "openai" => {
            let base_url = parts.next().ok_or_else(|| {
                ServerError::Config(format!("translator spec \"{spec}\" is missing base_url"))
            })?;
            let model = parts.next().ok_or_else(|| {
                ServerError::Config(format!("translator spec \"{spec}\" is missing model"))
            })?;
            let api_key = match parts.next() {
                Some(env_var) if !env_var.is_empty() => std::env::var(env_var).map_err(|_| {
                    ServerError::Config(format!(
                        "environment variable \"{env_var}\" for translator spec \"{spec}\" is not set"
                    ))
                })?,
                _ => String::new(),
            };
            Ok(Provider::OpenAiCompatible(OpenAiCompatibleProvider::new(
                format!("openai-{index}"),
                base_url.to_string(),
                model.to_string(),
                api_key,
            )))
        }
        other => Err(ServerError::Config(format!(
            "unknown translator kind \"{other}\" in spec \"{spec}\" (expected \"openai\" or \"mock\")"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_mock_spec() {
        let provider = parse_translator_spec(0, "mock").unwrap();
        assert!(matches!(provider, Provider::Mock(_)));
    }

    #[test]
    fn parses_openai_spec_with_unset_api_key_env() {
        let provider =
            parse_translator_spec(0, "openai:https://api.example.com/v1:gpt-4o-mini:").unwrap();
        assert!(matches!(provider, Provider::OpenAiCompatible(_)));
    }

    #[test]
    fn parses_openai_spec_reading_the_named_api_key_env_var() {
        std::env::set_var("STREAMCAST_TEST_API_KEY", "secret-value");
        let provider = parse_translator_spec(
            0,
            "openai:https://api.example.com/v1:gpt-4o-mini:STREAMCAST_TEST_API_KEY",
        )
        .unwrap();
        assert!(matches!(provider, Provider::OpenAiCompatible(_)));
        std::env::remove_var("STREAMCAST_TEST_API_KEY");
    }

    #[test]
    fn rejects_openai_spec_with_unset_api_key_env_var() {
        std::env::remove_var("STREAMCAST_TEST_MISSING_KEY");
        let err = parse_translator_spec(
            0,
            "openai:https://api.example.com/v1:gpt-4o-mini:STREAMCAST_TEST_MISSING_KEY",
        )
        .unwrap_err();
        assert!(matches!(err, ServerError::Config(_)));
    }

    #[test]
    fn rejects_openai_spec_missing_model() {
        let err = parse_translator_spec(0, "openai:https://api.example.com/v1").unwrap_err();
        assert!(matches!(err, ServerError::Config(_)));
    }

    #[test]
    fn rejects_unknown_kind() {
        let err = parse_translator_spec(0, "deepl:key").unwrap_err();
        assert!(matches!(err, ServerError::Config(_)));
    }

    #[test]
    fn build_providers_requires_at_least_one_unless_allowed() {
        let mut args = Args::try_parse_from(["streamcast-server", "--model", "m.bin"]).unwrap();
        assert!(args.build_providers().is_err());

        args.allow_no_translators = true;
        assert_eq!(args.build_providers().unwrap().len(), 0);

        args.translators = vec!["mock".to_string()];
        assert_eq!(args.build_providers().unwrap().len(), 1);
    }
}
