pub mod pool;
pub mod provider;

pub use pool::{TranslateError, TranslatorPool};
pub use provider::{ChatProvider, MockProvider, OpenAiCompatibleProvider, Provider};
