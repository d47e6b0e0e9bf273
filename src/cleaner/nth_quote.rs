use super::{ResponseCleaner, DEFAULT_QUOTE_INDEX, QUOTE_CHARS};

/// Cleaner for the fine-tuned model, whose training rows embed the prompt as quoted
/// segments ahead of the answer.
///
/// Returns the text after the `quote_index`-th quotation mark (1-based). With fewer marks it
/// falls back to the text after the last one, and with none the input comes back untouched.
#[derive(Debug, Clone)]
pub struct NthQuoteCleaner {
    quote_index: usize,
}

impl NthQuoteCleaner {
    pub fn new(quote_index: usize) -> Self {
        Self {
            quote_index: quote_index.max(1),
        }
    }
}

impl Default for NthQuoteCleaner {
    fn default() -> Self {
        Self::new(DEFAULT_QUOTE_INDEX)
    }
}

impl ResponseCleaner for NthQuoteCleaner {
    fn clean(&self, text: &str) -> String {
        let quotes: Vec<(usize, char)> = text
            .char_indices()
            .filter(|(_, ch)| QUOTE_CHARS.contains(ch))
            .collect();

        let cut = if quotes.len() >= self.quote_index {
            quotes[self.quote_index - 1]
        } else if let Some(last) = quotes.last() {
            *last
        } else {
            return text.to_string();
        };

        let (idx, ch) = cut;
        text[idx + ch.len_utf8()..].trim().to_string()
    }

    fn name(&self) -> &'static str {
        "nth-quote"
    }
}
