use grove_core::config::ProviderKind;

/// Wire protocol a provider speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    OpenAi,
    Anthropic,
}

/// Defaults for one provider kind.
#[derive(Debug, Clone, Copy)]
pub struct ProviderPreset {
    pub dialect: Dialect,
    pub default_endpoint: Option<&'static str>,
    /// Environment variable holding the credential when the provider config
    /// does not name one.
    pub credential_env: Option<&'static str>,
}

impl ProviderPreset {
    pub fn needs_credential(&self) -> bool {
        self.credential_env.is_some()
    }
}

/// Look up the preset for a provider kind.
pub fn preset_for(kind: ProviderKind) -> ProviderPreset {
    match kind {
        ProviderKind::OpenAi => ProviderPreset {
            dialect: Dialect::OpenAi,
            default_endpoint: Some("https://api.openai.com/v1/chat/completions"),
            credential_env: Some("OPENAI_API_KEY"),
        },
        ProviderKind::Anthropic => ProviderPreset {
            dialect: Dialect::Anthropic,
            default_endpoint: Some("https://api.anthropic.com/v1/messages"),
            credential_env: Some("ANTHROPIC_API_KEY"),
        },
        ProviderKind::Grok => ProviderPreset {
            dialect: Dialect::OpenAi,
            default_endpoint: Some("https://api.x.ai/v1/chat/completions"),
            credential_env: Some("XAI_API_KEY"),
        },
        ProviderKind::Ollama => ProviderPreset {
            dialect: Dialect::OpenAi,
            default_endpoint: Some("http://localhost:11434/v1/chat/completions"),
            credential_env: None,
        },
        ProviderKind::LmStudio => ProviderPreset {
            dialect: Dialect::OpenAi,
            default_endpoint: Some("http://localhost:1234/v1/chat/completions"),
            credential_env: None,
        },
        // No default endpoint; a credential is only sent if one is referenced.
        ProviderKind::Compatible => ProviderPreset {
            dialect: Dialect::OpenAi,
            default_endpoint: None,
            credential_env: None,
        },
    }
}

/// Provider kinds suited to a skill tag, best first.
pub fn affinity_kinds(tag: &str) -> &'static [ProviderKind] {
    match tag.to_lowercase().as_str() {
        "coding" => &[ProviderKind::OpenAi, ProviderKind::Anthropic],
        "creative" => &[ProviderKind::Anthropic, ProviderKind::Grok],
        "fast" => &[ProviderKind::Grok, ProviderKind::Ollama],
        "local" => &[ProviderKind::Ollama, ProviderKind::LmStudio],
        _ => &[],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_presets_need_no_credential() {
        assert!(!preset_for(ProviderKind::Ollama).needs_credential());
        assert!(!preset_for(ProviderKind::LmStudio).needs_credential());
        assert!(preset_for(ProviderKind::OpenAi).needs_credential());
        assert_eq!(preset_for(ProviderKind::Anthropic).dialect, Dialect::Anthropic);
        assert_eq!(preset_for(ProviderKind::Grok).dialect, Dialect::OpenAi);
    }

    #[test]
    fn test_affinity_table() {
        assert_eq!(affinity_kinds("Coding"), &[ProviderKind::OpenAi, ProviderKind::Anthropic]);
        assert!(affinity_kinds("painting").is_empty());
        for tag in ["coding", "creative", "fast", "local"] {
            assert!(!affinity_kinds(tag).is_empty());
        }
    }
}
