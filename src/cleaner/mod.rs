pub mod nth_quote;
pub mod quote_colon;

use std::{fmt, str::FromStr, sync::Arc};

pub use nth_quote::NthQuoteCleaner;
pub use quote_colon::QuoteColonCleaner;

/// Quotation marks the cleaners treat as equivalent: ASCII and curly double quotes.
pub const QUOTE_CHARS: &[char] = &['"', '\u{201C}', '\u{201D}'];

/// Persona sentence the base model tends to echo back verbatim.
pub const PERSONA_INSTRUCTION: &str = "You are a personal inspirational coach.";

/// Quote after which the fine-tuned model's own answer starts.
pub const DEFAULT_QUOTE_INDEX: usize = 5;

/// Post-processing applied to a decoded completion before it is returned to the caller.
///
/// Implementations are pure: no I/O, no state, total over every input string.
pub trait ResponseCleaner: Send + Sync {
    fn clean(&self, text: &str) -> String;

    fn name(&self) -> &'static str;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleaningPolicy {
    /// Strip surrounding quotes, a `Label:` prefix and the persona sentence.
    QuoteColon,
    /// Keep whatever follows the n-th quotation mark.
    NthQuote,
}

impl CleaningPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            CleaningPolicy::QuoteColon => "quote-colon",
            CleaningPolicy::NthQuote => "nth-quote",
        }
    }
}

impl fmt::Display for CleaningPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CleaningPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "quote-colon" | "quote_colon" | "a" => Ok(CleaningPolicy::QuoteColon),
            "nth-quote" | "nth_quote" | "b" => Ok(CleaningPolicy::NthQuote),
            other => Err(anyhow::anyhow!(
                "unknown cleaning policy `{other}` (expected `quote-colon` or `nth-quote`)"
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanerConfig {
    pub policy: CleaningPolicy,
    pub persona_phrase: String,
    pub quote_index: usize,
}

impl Default for CleanerConfig {
    fn default() -> Self {
        Self {
            policy: CleaningPolicy::QuoteColon,
            persona_phrase: PERSONA_INSTRUCTION.to_string(),
            quote_index: DEFAULT_QUOTE_INDEX,
        }
    }
}

pub fn build_cleaner(config: &CleanerConfig) -> Arc<dyn ResponseCleaner> {
    match config.policy {
        CleaningPolicy::QuoteColon => {
            Arc::new(QuoteColonCleaner::new(config.persona_phrase.clone()))
        }
        CleaningPolicy::NthQuote => Arc::new(NthQuoteCleaner::new(config.quote_index)),
    }
}
