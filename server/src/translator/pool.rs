//! Round-robin translator pool with a shared rolling context window (§4.6).
//!
//! Ported from the reference `LlamaTranslator.get_translations`: split the
//! requested target codes into chunks, ask one provider (picked by a
//! round-robin counter, advanced once per translation unit) for each
//! chunk, validate and retry each chunk independently, merge the chunks,
//! then push the source text onto a small rolling context buffer that
//! later prompts draw on for continuity.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;
use tokio::sync::Mutex;

use super::provider::{example_for, ChatProvider, Provider, ProviderError};
use crate::retry::{with_retry, Attempt};

const CHUNK_SIZE: usize = 30;
const ROLLING_CONTEXT_CAPACITY: usize = 3;
const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_RETRY_DELAY_MS: u64 = 500;

const TRANSLATION_CONTEXT_TEMPLATE: &str = "Expert translator: translate from {src_lang} to {tgt_langs}.\n\
Return strict JSON of the shape {{\"translate\": {{<lang code>: <translation>}}}} with ISO 2-letter \
language codes, matching exactly the example response's structure, covering every requested language, \
with no additions beyond the source meaning.\n\
Previous context, for reference only: < {buffer_text} >.\n\
Example response: {example_response}\n\
Text to translate: {text}";

#[derive(Debug, Error)]
pub enum TranslateError {
    #[error("no translator providers are configured")]
    NoProviders,
    #[error("provider {provider} did not return a usable translation after retries: {reason}")]
    Exhausted { provider: String, reason: String },
}

struct PoolState {
    rolling_context: VecDeque<String>,
    counter: usize,
}

pub struct TranslatorPool {
    providers: Vec<Provider>,
    state: Mutex<PoolState>,
    max_retries: u32,
    retry_delay: Duration,
}

impl TranslatorPool {
    pub fn new(providers: Vec<Provider>) -> Self {
        TranslatorPool {
            providers,
            state: Mutex::new(PoolState {
                rolling_context: VecDeque::with_capacity(ROLLING_CONTEXT_CAPACITY),
                counter: 0,
            }),
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
        }
    }

    pub fn with_retry_policy(mut self, max_retries: u32, retry_delay: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_delay = retry_delay;
        self
    }

    /// Translate one finalized unit of text into every target code in
    /// `targets`, passing `source_lang` through untranslated in the
    /// result map (§4.6 step 5).
    pub async fn translate_unit(
        &self,
        text: &str,
        source_lang: &str,
        targets: &[String],
    ) -> Result<HashMap<String, String>, TranslateError> {
        if self.providers.is_empty() {
            return Err(TranslateError::NoProviders);
        }

        let (provider_idx, context_snapshot) = {
            let state = self.state.lock().await;
            (
                state.counter % self.providers.len(),
                state.rolling_context.iter().cloned().collect::<Vec<_>>(),
            )
        };
        let provider = &self.providers[provider_idx];
        let buffer_text = context_snapshot.join(" ");

        let mut merged = HashMap::new();
        for chunk in targets.chunks(CHUNK_SIZE) {
            let chunk_result = self
                .translate_chunk(provider, text, source_lang, chunk, &buffer_text)
                .await?;
            merged.extend(chunk_result);
        }
        merged.insert(source_lang.to_string(), text.to_string());

        let mut state = self.state.lock().await;
        state.rolling_context.push_back(text.to_string());
        while state.rolling_context.len() > ROLLING_CONTEXT_CAPACITY {
            state.rolling_context.pop_front();
        }
        state.counter = state.counter.wrapping_add(1);

        Ok(merged)
    }

    async fn translate_chunk(
        &self,
        provider: &Provider,
        text: &str,
        source_lang: &str,
        chunk: &[String],
        buffer_text: &str,
    ) -> Result<HashMap<String, String>, TranslateError> {
        let example_response = build_example_response(chunk);
        let system_prompt = TRANSLATION_CONTEXT_TEMPLATE
            .replace("{src_lang}", source_lang)
            .replace("{tgt_langs}", &chunk.join(", "))
            .replace("{buffer_text}", buffer_text)
            .replace("{example_response}", &example_response)
            .replace("{text}", text);

        let label = provider.name().to_string();
        with_retry(
            &label,
            self.max_retries,
            self.retry_delay,
            |_attempt| async {
                match provider.chat(&system_prompt, text).await {
                    Ok(raw) => match parse_translate_map(&raw, chunk) {
                        Ok(map) => Attempt::Ok(map),
                        Err(reason) => Attempt::Retryable(reason),
                    },
                    Err(ProviderError::Request(e)) => Attempt::Retryable(e.to_string()),
                    Err(e) => Attempt::Retryable(e.to_string()),
                }
            },
        )
        .await
        .map_err(|reason| TranslateError::Exhausted {
            provider: label.clone(),
            reason,
        })
    }
}

fn build_example_response(chunk: &[String]) -> String {
    let obj: serde_json::Map<String, Value> = chunk
        .iter()
        .map(|code| (code.clone(), Value::String(example_for(code).to_string())))
        .collect();
    let mut root = serde_json::Map::new();
    root.insert("translate".to_string(), Value::Object(obj));
    serde_json::to_string(&Value::Object(root)).unwrap_or_else(|_| "{}".to_string())
}

/// Parse a provider's raw content, unwrapping a double-JSON-encoded
/// string if present, and require every requested code to be present.
fn parse_translate_map(raw: &str, expected: &[String]) -> Result<HashMap<String, String>, String> {
    let value: Value = serde_json::from_str(raw).map_err(|e| format!("invalid JSON: {e}"))?;
    let value = match value {
        Value::String(inner) => {
            serde_json::from_str(&inner).map_err(|e| format!("invalid nested JSON: {e}"))?
        }
        other => other,
    };
    let object = value
        .get("translate")
        .and_then(Value::as_object)
        .ok_or_else(|| "response missing a \"translate\" object".to_string())?;

    let mut result = HashMap::with_capacity(expected.len());
    for code in expected {
        let translated = object
            .get(code)
            .and_then(Value::as_str)
            .ok_or_else(|| format!("response missing translation for \"{code}\""))?;
        result.insert(code.clone(), translated.to_string());
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translator::provider::MockProvider;

    fn targets(codes: &[&str]) -> Vec<String> {
        codes.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn translates_and_passes_through_source_language() {
        let mock = MockProvider::new("mock");
        mock.push_scripted(Ok(r#"{"translate":{"en":"hello"}}"#.into()));
        let pool = TranslatorPool::new(vec![Provider::Mock(mock)]);
        let result = pool
            .translate_unit("مرحبا", "ar", &targets(&["en"]))
            .await
            .unwrap();
        assert_eq!(result.get("en").unwrap(), "hello");
        assert_eq!(result.get("ar").unwrap(), "مرحبا");
    }

    #[tokio::test]
    async fn retries_on_malformed_response_then_succeeds() {
        let mock = MockProvider::new("mock");
        mock.push_scripted(Ok("not json at all".into()));
        mock.push_scripted(Ok(r#"{"translate":{"en":"hello"}}"#.into()));
        let pool = TranslatorPool::new(vec![Provider::Mock(mock)])
            .with_retry_policy(3, Duration::from_millis(1));
        let result = pool
            .translate_unit("مرحبا", "ar", &targets(&["en"]))
            .await
            .unwrap();
        assert_eq!(result.get("en").unwrap(), "hello");
    }

    #[tokio::test]
    async fn exhausts_retries_and_returns_error() {
        let mock = MockProvider::new("mock");
        for _ in 0..5 {
            mock.push_scripted(Ok("garbage".into()));
        }
        let pool = TranslatorPool::new(vec![Provider::Mock(mock)])
            .with_retry_policy(2, Duration::from_millis(1));
        let result = pool.translate_unit("x", "ar", &targets(&["en"])).await;
        assert!(matches!(result, Err(TranslateError::Exhausted { .. })));
    }

    #[tokio::test]
    async fn no_providers_rejects_immediately() {
        let pool = TranslatorPool::new(vec![]);
        let result = pool.translate_unit("x", "ar", &targets(&["en"])).await;
        assert!(matches!(result, Err(TranslateError::NoProviders)));
    }

    #[tokio::test]
    async fn round_robins_across_providers_per_unit() {
        let a = MockProvider::new("a");
        a.push_scripted(Ok(r#"{"translate":{"en":"from-a"}}"#.into()));
        let b = MockProvider::new("b");
        b.push_scripted(Ok(r#"{"translate":{"en":"from-b"}}"#.into()));
        let pool = TranslatorPool::new(vec![Provider::Mock(a), Provider::Mock(b)]);

        let first = pool.translate_unit("one", "ar", &targets(&["en"])).await.unwrap();
        let second = pool.translate_unit("two", "ar", &targets(&["en"])).await.unwrap();
        assert_eq!(first.get("en").unwrap(), "from-a");
        assert_eq!(second.get("en").unwrap(), "from-b");
    }
}
