use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// AI provider a key belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Provider {
    Gemini,
    OpenAi,
    Groq,
    Custom,
}

impl Provider {
    /// Prefix every well-formed key of this provider starts with.
    pub fn key_prefix(&self) -> Option<&'static str> {
        match self {
            Provider::Gemini => Some("AIza"),
            Provider::OpenAi => Some("sk-"),
            Provider::Groq => Some("gsk_"),
            Provider::Custom => None,
        }
    }

    pub fn accepts(&self, key: &str) -> bool {
        !key.is_empty() && self.key_prefix().map_or(true, |p| key.starts_with(p))
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Provider::Gemini => write!(f, "GEMINI"),
            Provider::OpenAi => write!(f, "OPENAI"),
            Provider::Groq => write!(f, "GROQ"),
            Provider::Custom => write!(f, "CUSTOM"),
        }
    }
}

/// An API key. The token is only reachable through [`Credential::expose`];
/// `Debug` and `Display` print the masked form.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Credential(String);

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    /// First and last four characters, the rest elided.
    pub fn masked(&self) -> String {
        let chars: Vec<char> = self.0.chars().collect();
        if chars.len() <= 8 {
            return "*".repeat(chars.len());
        }
        let head: String = chars[..4].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{head}...{tail}")
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Credential").field(&self.masked()).finish()
    }
}

impl fmt::Display for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.masked())
    }
}

/// Result of parsing a pasted block of keys.
#[derive(Debug, Default)]
pub struct ParsedKeys {
    pub credentials: Vec<Credential>,
    /// Keys kept despite not matching the provider's prefix.
    pub unrecognized: Vec<Credential>,
}

/// Split `text` on newlines and commas into unique keys, in order of first
/// appearance. Keys with an unexpected prefix are kept but reported.
pub fn parse_keys(provider: Provider, text: &str) -> ParsedKeys {
    let mut seen = HashSet::new();
    let mut parsed = ParsedKeys::default();

    for raw in text.split(['\n', '\r', ',']) {
        let key = raw.trim();
        if key.is_empty() || !seen.insert(key) {
            continue;
        }
        let credential = Credential::new(key);
        if !provider.accepts(key) {
            tracing::warn!(
                provider = %provider,
                key = %credential,
                "Key does not match the provider's expected format"
            );
            parsed.unrecognized.push(credential.clone());
        }
        parsed.credentials.push(credential);
    }

    parsed
}
