pub mod anthropic;
pub mod openai;
pub mod presets;

pub use anthropic::AnthropicClient;
pub use openai::OpenAiClient;
pub use presets::{preset_for, Dialect, ProviderPreset};
