//! Translator providers: the pluggable backends a [`super::pool::TranslatorPool`]
//! round-robins across. Grounded in the messaging-platform trait-object
//! pattern used for outbound integrations elsewhere in the pack, adapted
//! here to an OpenAI-compatible chat completions endpoint (§4.6).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("request to provider failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("provider returned no choices")]
    EmptyResponse,
}

#[async_trait]
pub trait ChatProvider: Send + Sync {
    async fn chat(&self, system_prompt: &str, user_text: &str) -> Result<String, ProviderError>;
    fn name(&self) -> &str;
}

/// Tagged-variant provider set (REDESIGN FLAGS: capability-set enum in
/// place of a trait-object registry keyed by name).
pub enum Provider {
    OpenAiCompatible(OpenAiCompatibleProvider),
    Mock(MockProvider),
}

#[async_trait]
impl ChatProvider for Provider {
    async fn chat(&self, system_prompt: &str, user_text: &str) -> Result<String, ProviderError> {
        match self {
            Provider::OpenAiCompatible(p) => p.chat(system_prompt, user_text).await,
            Provider::Mock(p) => p.chat(system_prompt, user_text).await,
        }
    }

    fn name(&self) -> &str {
        match self {
            Provider::OpenAiCompatible(p) => p.name(),
            Provider::Mock(p) => p.name(),
        }
    }
}

/// A chat-completions endpoint speaking the OpenAI request/response shape
/// (base URL, model and API key are all configurable so OpenAI-compatible
/// gateways work unmodified).
pub struct OpenAiCompatibleProvider {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: String,
    label: String,
}

impl OpenAiCompatibleProvider {
    pub fn new(
        label: impl Into<String>,
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        OpenAiCompatibleProvider {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            model: model.into(),
            api_key: api_key.into(),
            label: label.into(),
        }
    }
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ResponseFormat<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    response_format: ResponseFormat<'a>,
    temperature: f32,
    top_p: f32,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: String,
}

#[async_trait]
impl ChatProvider for OpenAiCompatibleProvider {
    async fn chat(&self, system_prompt: &str, user_text: &str) -> Result<String, ProviderError> {
        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: user_text,
                },
            ],
            response_format: ResponseFormat { kind: "json_object" },
            temperature: 0.2,
            top_p: 0.1,
        };
        let resp = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json::<ChatResponse>()
            .await?;
        resp.choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or(ProviderError::EmptyResponse)
    }

    fn name(&self) -> &str {
        &self.label
    }
}

/// Deterministic, network-free provider for tests and offline demos:
/// echoes back a valid `{"translate": {...}}` body for whatever target
/// codes it can infer were asked about by scanning the system prompt.
pub struct MockProvider {
    label: String,
    scripted: std::sync::Mutex<std::collections::VecDeque<Result<String, ProviderError>>>,
}

impl MockProvider {
    pub fn new(label: impl Into<String>) -> Self {
        MockProvider {
            label: label.into(),
            scripted: std::sync::Mutex::new(std::collections::VecDeque::new()),
        }
    }

    /// Queue a canned response (or error) to be returned on the next call,
    /// FIFO. Once exhausted, falls back to echoing the input text back for
    /// every requested code.
    pub fn push_scripted(&self, response: Result<String, ProviderError>) {
        self.scripted.lock().unwrap().push_back(response);
    }
}

#[async_trait]
impl ChatProvider for MockProvider {
    async fn chat(&self, _system_prompt: &str, user_text: &str) -> Result<String, ProviderError> {
        if let Some(scripted) = self.scripted.lock().unwrap().pop_front() {
            return scripted;
        }
        Ok(format!(r#"{{"translate": {{"xx": "{}"}}}}"#, user_text))
    }

    fn name(&self) -> &str {
        &self.label
    }
}

/// ISO-639-1 exemplar sentences used to show the model the exact JSON
/// shape expected for each requested target language (§4.6 step 1).
pub const LANGUAGE_EXAMPLES: &[(&str, &str)] = &[
    ("af", "Die gesin is die grondslag."),
    ("am", "ቤተሰቡ የማህበረሰብ መሠረት ነው."),
    ("ar", "الأسرة أساس المجتمع."),
    ("az", "Ailə cəmiyyətin təməlidir."),
    ("be", "Сям'я — гэта аснова грамадства."),
    ("bg", "Семейството е основата на обществото."),
    ("bn", "পরিবার সমাজের ভিত্তি."),
    ("bs", "Porodica je temelj društva."),
    ("ca", "La família és la base."),
    ("cs", "Rodina je základem společnosti."),
    ("cy", "Mae'r teulu'n sylfaen y gymdeithas."),
    ("da", "Familien er grundlaget for samfundet."),
    ("de", "Die Familie ist das Fundament."),
    ("el", "Η οικογένεια είναι το θεμέλιο."),
    ("en", "Family is the foundation of society."),
    ("es", "La familia es la base."),
    ("et", "Perekond on ühiskonna alus."),
    ("fa", "خانواده اساس جامعه است."),
    ("fi", "Perhe on yhteiskunnan perusta."),
    ("fr", "La famille est la base."),
    ("ga", "Is é an teaghlach bunús na sochaí."),
    ("gl", "A familia é a base."),
    ("gu", "પરિવાર સમાજની મૂળભૂત છે."),
    ("he", "המשפחה היא היסוד של החברה."),
    ("hi", "परिवार समाज की नींव है."),
    ("hr", "Porodica je temelj društva."),
    ("hu", "A család a társadalom alapja."),
    ("hy", "Ընտանիքը հասարակության հիմքն է."),
    ("id", "Keluarga adalah dasar masyarakat."),
    ("is", "Fjölskyldan er grunnurinn að samfélaginu."),
    ("it", "La famiglia è la base."),
    ("ja", "家族は社会の基盤です。"),
    ("ka", "ოჯახი საზოგადოების საფუძველია."),
    ("kk", "Отбасы қоғамның негізі."),
    ("km", "គ្រួសារនេះគឺជាគ្រឹះនៃសង្គម។"),
    ("kn", "ಕುಟುಂಬವು ಸಮಾಜದ ಮೂಲಭೂತವಾಗಿದೆ."),
    ("ko", "가족이 사회의 기초입니다."),
    ("lt", "Šeima yra visuomenės pamatas."),
    ("lv", "Ģimene ir sabiedrības pamats."),
    ("mk", "Семејството е основа на општеството."),
    ("ml", "കുടുംബം സമൂഹത്തിന്റെ അടിസ്ഥാനമാണ്."),
    ("mn", "Гэр бүл нь нийгмийн үндэс."),
    ("mr", "कुटुंब हे समाजाचे मूलभूत आहे."),
    ("ms", "Keluarga adalah asas masyarakat."),
    ("ne", "परिवार समाजको आधार हो."),
    ("nl", "De familie is de basis."),
    ("no", "Familien er grunnlaget for samfunnet."),
    ("pa", "ਪਰਿਵਾਰ ਸਮਾਜ ਦਾ ਆਧਾਰ ਹੈ."),
    ("pl", "Rodzina jest fundamentem społeczeństwa."),
    ("ps", "کورنۍ د ټولنې بنسټ دی."),
    ("pt", "A família é a base."),
    ("ro", "Familia este fundamentul societății."),
    ("ru", "Семья — это основа общества."),
    ("sd", "خاندان معاشري جي بنياد آهي."),
    ("si", "පවුල සමාජයේ මූලිකයයි."),
    ("sk", "Rodina je základom spoločnosti."),
    ("sl", "Družina je temelj družbe."),
    ("sq", "Familja është themeli i shoqërisë."),
    ("sr", "Porodica je temelj društva."),
    ("sv", "Familjen är grunden för samhället."),
    ("sw", "Familia ndiyo msingi wa jamii."),
    ("ta", "குடும்பம் சமூகத்தின் அடித்தளம்."),
    ("th", "ครอบครัวเป็นรากฐานของสังคม."),
    ("tl", "Ang pamilya ang pundasyon ng lipunan."),
    ("tr", "Aile toplumun temelidir."),
    ("uk", "Сім'я є основою суспільства."),
    ("ur", "خاندان معاشرے کی بنیاد ہے۔"),
    ("uz", "Oila jamiyatning asosi."),
    ("vi", "Gia đình là nền tảng xã hội."),
    ("zh", "家庭是社会的基础。"),
];

pub fn example_for(lang: &str) -> &'static str {
    LANGUAGE_EXAMPLES
        .iter()
        .find(|(code, _)| *code == lang)
        .map(|(_, text)| *text)
        .unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_provider_echoes_without_scripted_response() {
        let provider = MockProvider::new("mock");
        let out = provider.chat("sys", "hello").await.unwrap();
        assert!(out.contains("hello"));
    }

    #[tokio::test]
    async fn mock_provider_returns_scripted_responses_in_order() {
        let provider = MockProvider::new("mock");
        provider.push_scripted(Ok("not json".into()));
        provider.push_scripted(Ok(r#"{"translate":{"en":"hi"}}"#.into()));
        assert_eq!(provider.chat("", "").await.unwrap(), "not json");
        assert_eq!(
            provider.chat("", "").await.unwrap(),
            r#"{"translate":{"en":"hi"}}"#
        );
    }

    #[test]
    fn example_for_known_and_unknown_codes() {
        assert_eq!(example_for("en"), "Family is the foundation of society.");
        assert_eq!(example_for("zz"), "");
    }
}
