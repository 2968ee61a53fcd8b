//! Bilingual (CJK-aware) heuristic token counter used for budgeting —
//! spec.md §4.D. Precision only needs to be within ±15%; this is never used
//! for billing, only to size `maxTokens`/`thinkingBudget` in `thinking.rs`.

/// Per-message overhead added by the Anthropic wire format (role, block
/// wrappers) that a raw character count doesn't capture.
const PER_MESSAGE_OVERHEAD: f64 = 4.0;

/// Returns `true` if `c` falls in a Hangul range (Jamo or Syllables).
fn is_korean(c: char) -> bool {
    matches!(c,
        '\u{1100}'..='\u{11FF}'   // Hangul Jamo
        | '\u{3130}'..='\u{318F}' // Hangul Compatibility Jamo
        | '\u{AC00}'..='\u{D7A3}' // Hangul Syllables
    )
}

/// `estimate(text) = ceil(1.5 · koreanChars + otherChars / 4)`.
pub fn estimate(text: &str) -> usize {
    if text.is_empty() {
        return 0;
    }
    let mut korean_chars = 0usize;
    let mut other_chars = 0usize;
    for c in text.chars() {
        if is_korean(c) {
            korean_chars += 1;
        } else {
            other_chars += 1;
        }
    }
    let tokens = 1.5 * korean_chars as f64 + other_chars as f64 / 4.0;
    tokens.ceil() as usize
}

/// A single piece of message content to estimate — callers flatten whatever
/// content-block representation they hold into plain strings before calling.
pub trait EstimableMessage {
    fn as_estimable_text(&self) -> String;
}

impl EstimableMessage for str {
    fn as_estimable_text(&self) -> String {
        self.to_string()
    }
}

impl EstimableMessage for String {
    fn as_estimable_text(&self) -> String {
        self.clone()
    }
}

/// `estimateMessages(list) = Σ estimate(contentAsString) + 4 per message`.
pub fn estimate_messages<M: EstimableMessage>(messages: &[M]) -> usize {
    let body: usize = messages.iter().map(|m| estimate(&m.as_estimable_text())).sum();
    let overhead = (messages.len() as f64 * PER_MESSAGE_OVERHEAD).ceil() as usize;
    body + overhead
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_string_is_zero() {
        assert_eq!(estimate(""), 0);
    }

    #[test]
    fn ascii_uses_quarter_char_rate() {
        // 8 ascii chars / 4 = 2
        assert_eq!(estimate("abcdefgh"), 2);
    }

    #[test]
    fn korean_uses_one_point_five_rate() {
        // "안녕" is 2 Hangul syllables -> ceil(1.5 * 2) = 3
        assert_eq!(estimate("안녕"), 3);
    }

    #[test]
    fn mixed_text_combines_both_rates() {
        // "안녕 world" -> 2 korean + 6 other ("" world has 5 + space = 6, "world" is 5 + leading space 1)
        let text = "안녕 world";
        let korean = 2;
        let other = text.chars().count() - korean;
        let expected = (1.5 * korean as f64 + other as f64 / 4.0).ceil() as usize;
        assert_eq!(estimate(text), expected);
    }

    #[test]
    fn estimate_messages_adds_per_message_overhead() {
        let messages = vec!["hi".to_string(), "there".to_string()];
        let expected = estimate("hi") + estimate("there") + 8; // 4 per message * 2
        assert_eq!(estimate_messages(&messages), expected);
    }

    #[test]
    fn estimate_messages_empty_list_is_zero() {
        let messages: Vec<String> = Vec::new();
        assert_eq!(estimate_messages(&messages), 0);
    }
}
