use super::{ResponseCleaner, PERSONA_INSTRUCTION, QUOTE_CHARS};

/// Cleaner for the instruct model prompted with a persona prefix.
///
/// The model typically answers as `"Coach: <persona sentence> <answer>"`, so the cleaner
/// peels the surrounding quotes, drops everything up to the first colon, and removes the
/// persona sentence. A colon inside the answer itself also cuts everything before it.
///
/// Quotes are peeled as whole runs of leading and trailing quote characters, not one pair.
#[derive(Debug, Clone)]
pub struct QuoteColonCleaner {
    persona_phrase: String,
}

impl QuoteColonCleaner {
    pub fn new(persona_phrase: impl Into<String>) -> Self {
        Self {
            persona_phrase: persona_phrase.into(),
        }
    }
}

impl Default for QuoteColonCleaner {
    fn default() -> Self {
        Self::new(PERSONA_INSTRUCTION)
    }
}

impl ResponseCleaner for QuoteColonCleaner {
    fn clean(&self, text: &str) -> String {
        // Leading and trailing quote runs.
        let unquoted = text
            .trim_start_matches(QUOTE_CHARS)
            .trim_end_matches(QUOTE_CHARS);

        // Label prefix such as `Coach:`.
        let unlabeled = match unquoted.find(':') {
            Some(idx) => &unquoted[idx + 1..],
            None => unquoted,
        };

        let without_persona = if self.persona_phrase.is_empty() {
            unlabeled.to_string()
        } else {
            unlabeled.replace(&self.persona_phrase, "")
        };

        let rest = without_persona.trim_start();
        let rest = match rest.chars().next() {
            Some(ch) if QUOTE_CHARS.contains(&ch) => &rest[ch.len_utf8()..],
            _ => rest,
        };

        rest.trim().to_string()
    }

    fn name(&self) -> &'static str {
        "quote-colon"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clean(text: &str) -> String {
        QuoteColonCleaner::default().clean(text)
    }

    #[test]
    fn strips_label_persona_and_quotes() {
        let raw = "\"Coach: You are a personal inspirational coach. Keep going, you've got this!\"";
        assert_eq!(clean(raw), "Keep going, you've got this!");
    }

    #[test]
    fn keeps_text_without_colon() {
        assert_eq!(clean("\"Just breathe.\""), "Just breathe.");
    }

    #[test]
    fn strips_whole_runs_of_surrounding_quotes() {
        assert_eq!(clean("\"\"\u{201C}Just breathe.\u{201D}\"\""), "Just breathe.");
    }

    #[test]
    fn handles_curly_quotes() {
        assert_eq!(clean("\u{201C}Coach: Stay curious.\u{201D}"), "Stay curious.");
    }

    #[test]
    fn strips_quote_opening_the_answer_after_label() {
        assert_eq!(clean("Coach: \"One step at a time"), "One step at a time");
    }

    #[test]
    fn colon_inside_answer_drops_preceding_text() {
        assert_eq!(
            clean("Remember this: progress beats perfection"),
            "progress beats perfection"
        );
    }

    #[test]
    fn removes_persona_sentence_anywhere() {
        assert_eq!(
            clean("Smile. You are a personal inspirational coach. Then act."),
            "Smile.  Then act."
        );
    }

    #[test]
    fn custom_persona_phrase() {
        let cleaner = QuoteColonCleaner::new("You are a calm mentor.");
        assert_eq!(
            cleaner.clean("Mentor: You are a calm mentor. Rest well."),
            "Rest well."
        );
    }

    #[test]
    fn output_does_not_start_with_quote() {
        for raw in [
            "\"\"Coach: \"Go\"\"",
            "Coach: \u{201C}Go",
            "\"Go\"",
            "plain text",
            "",
        ] {
            let out = clean(raw);
            assert!(
                !out.starts_with(QUOTE_CHARS),
                "`{raw}` cleaned to `{out}`"
            );
        }
    }

    #[test]
    fn cleaning_twice_is_stable_for_typical_output() {
        for raw in [
            "\"Coach: You are a personal inspirational coach. Keep going!\"",
            "\"Just breathe.\"",
            "Coach: \"Drink water",
        ] {
            let once = clean(raw);
            assert_eq!(clean(&once), once);
        }
    }

    #[test]
    fn empty_input_stays_empty() {
        assert_eq!(clean(""), "");
        assert_eq!(clean("\"\""), "");
    }
}
