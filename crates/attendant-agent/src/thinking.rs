//! Thinking-budget computation — spec.md §4.F ("Dynamic budgeting").
//!
//! Replaces six fixed-cap levels (`Off..XHigh`, each a flat
//! `budget_tokens()`) with four levels (`off/low/medium/high`), where the
//! actual token budget is computed per request from the model's context
//! window and the estimated input size rather than being a constant.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One resolved budget: how many tokens the response may use in total, and
/// how many of those may go to the thinking block (`None` when thinking is
/// disabled for this request, either because the level is `Off` or because
/// the computed budget fell under the floor).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestBudget {
    pub max_tokens: u32,
    pub thinking_budget: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThinkingLevel {
    Off,
    Low,
    Medium,
    High,
}

/// Fixed `maxTokens` used when the model doesn't support extended
/// thinking, or the level is `Off` — spec.md §4.F ("Otherwise fixed
/// maxTokens = 8192").
const FLAT_MAX_TOKENS: u32 = 8_192;
/// Floor on dynamically computed `maxTokens` — spec.md §4.F
/// ("max(4096, ...)").
const MIN_DYNAMIC_MAX_TOKENS: u32 = 4_096;
/// A thinking budget under this many tokens isn't worth keeping —
/// spec.md §4.F ("if this is < 1024, disable thinking").
const MIN_THINKING_BUDGET: u32 = 1_024;

impl ThinkingLevel {
    /// `(levelRatio, levelCap)` per spec.md §4.F's table. `Off` has no
    /// ratio/cap since thinking is skipped entirely.
    fn ratio_and_cap(&self) -> Option<(f64, u32)> {
        match self {
            ThinkingLevel::Off => None,
            ThinkingLevel::Low => Some((0.3, 5_000)),
            ThinkingLevel::Medium => Some((0.5, 10_000)),
            ThinkingLevel::High => Some((0.7, 20_000)),
        }
    }

    /// Resolve this level into a concrete request budget — spec.md §4.F's
    /// dynamic-budgeting formula. `window` is the model's context window
    /// (W), `estimated_input_tokens` is I from §4.D, and
    /// `supports_extended_thinking` gates whether the dynamic path runs at
    /// all (non-thinking-capable models always get the flat budget).
    pub fn resolve(
        &self,
        window: u32,
        estimated_input_tokens: u32,
        supports_extended_thinking: bool,
    ) -> RequestBudget {
        let Some((ratio, cap)) = (if supports_extended_thinking { self.ratio_and_cap() } else { None }) else {
            return RequestBudget { max_tokens: FLAT_MAX_TOKENS, thinking_budget: None };
        };

        let remaining = window.saturating_sub(estimated_input_tokens) as f64;
        let max_tokens = (MIN_DYNAMIC_MAX_TOKENS as f64).max((remaining * 0.3).floor()) as u32;

        let by_ratio = (max_tokens as f64 * ratio).floor() as u32;
        let headroom = max_tokens.saturating_sub(MIN_THINKING_BUDGET);
        let thinking_budget = by_ratio.min(cap).min(headroom);

        let thinking_budget = if thinking_budget < MIN_THINKING_BUDGET {
            None
        } else {
            Some(thinking_budget)
        };
        RequestBudget { max_tokens, thinking_budget }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "off" => Some(ThinkingLevel::Off),
            "low" => Some(ThinkingLevel::Low),
            "medium" => Some(ThinkingLevel::Medium),
            "high" => Some(ThinkingLevel::High),
            _ => None,
        }
    }
}

/// Whether `model` supports the extended-thinking feature at all — Haiku
/// does not, so it always falls back to the flat `maxTokens` budget
/// regardless of the requested level.
pub fn supports_extended_thinking(model: &str) -> bool {
    !model.contains("haiku")
}

/// Remove thinking blocks from conversation messages before re-sending to the LLM.
/// Anthropic's API rejects requests that include thinking content blocks from previous turns.
/// The assistant's text content is preserved; only thinking/reasoning blocks are removed.
pub fn strip_thinking_blocks(messages: &mut [serde_json::Value]) {
    for msg in messages.iter_mut() {
        if msg.get("role").and_then(|r| r.as_str()) != Some("assistant") {
            continue;
        }
        if let Some(content) = msg.get_mut("content") {
            if let Some(blocks) = content.as_array() {
                let filtered: Vec<serde_json::Value> = blocks
                    .iter()
                    .filter(|block| block.get("type").and_then(|t| t.as_str()) != Some("thinking"))
                    .cloned()
                    .collect();
                *content = serde_json::Value::Array(filtered);
            }
        }
    }
}

/// Default is `Off` — thinking is opt-in per request.
impl Default for ThinkingLevel {
    fn default() -> Self {
        ThinkingLevel::Off
    }
}

impl fmt::Display for ThinkingLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ThinkingLevel::Off => "off",
            ThinkingLevel::Low => "low",
            ThinkingLevel::Medium => "medium",
            ThinkingLevel::High => "high",
        };
        f.write_str(label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn off_level_uses_flat_budget_regardless_of_window() {
        let budget = ThinkingLevel::Off.resolve(200_000, 50_000, true);
        assert_eq!(budget.max_tokens, 8_192);
        assert_eq!(budget.thinking_budget, None);
    }

    #[test]
    fn non_thinking_model_always_gets_flat_budget() {
        let budget = ThinkingLevel::High.resolve(200_000, 1_000, false);
        assert_eq!(budget.max_tokens, 8_192);
        assert_eq!(budget.thinking_budget, None);
    }

    #[test]
    fn low_level_applies_ratio_and_cap() {
        // W=100_000, I=0 -> maxTokens = floor(100_000*0.3) = 30_000
        // thinkingBudget = min(5000, floor(30_000*0.3)=9000, 30_000-1024) = 5000
        let budget = ThinkingLevel::Low.resolve(100_000, 0, true);
        assert_eq!(budget.max_tokens, 30_000);
        assert_eq!(budget.thinking_budget, Some(5_000));
    }

    #[test]
    fn medium_level_applies_ratio_and_cap() {
        let budget = ThinkingLevel::Medium.resolve(100_000, 0, true);
        assert_eq!(budget.max_tokens, 30_000);
        // min(10000, floor(30_000*0.5)=15000, 28_976) = 10_000
        assert_eq!(budget.thinking_budget, Some(10_000));
    }

    #[test]
    fn max_tokens_floors_at_4096_for_a_nearly_full_window() {
        let budget = ThinkingLevel::High.resolve(10_000, 9_900, true);
        assert_eq!(budget.max_tokens, 4_096);
    }

    #[test]
    fn thinking_survives_on_an_exhausted_window_thanks_to_the_max_tokens_floor() {
        // maxTokens never drops below 4096 even when the window is fully
        // consumed by input, so thinkingBudget still clears the 1024 floor.
        let budget = ThinkingLevel::High.resolve(4_096, 4_096, true);
        assert_eq!(budget.max_tokens, 4_096);
        assert_eq!(budget.thinking_budget, Some(2_867));
    }

    #[test]
    fn parse_accepts_four_levels_case_insensitive() {
        for (input, expected) in [
            ("off", ThinkingLevel::Off),
            ("low", ThinkingLevel::Low),
            ("MEDIUM", ThinkingLevel::Medium),
            ("High", ThinkingLevel::High),
        ] {
            assert_eq!(ThinkingLevel::parse(input), Some(expected), "input: {input}");
        }
        assert_eq!(ThinkingLevel::parse("xhigh"), None);
        assert_eq!(ThinkingLevel::parse("minimal"), None);
    }

    #[test]
    fn display_round_trips() {
        for level in [ThinkingLevel::Off, ThinkingLevel::Low, ThinkingLevel::Medium, ThinkingLevel::High] {
            let s = level.to_string();
            assert_eq!(ThinkingLevel::parse(&s), Some(level));
        }
    }

    #[test]
    fn default_is_off() {
        assert_eq!(ThinkingLevel::default(), ThinkingLevel::Off);
    }

    #[test]
    fn strip_removes_thinking_blocks() {
        let mut messages = vec![
            serde_json::json!({
                "role": "assistant",
                "content": [
                    { "type": "thinking", "thinking": "internal reasoning" },
                    { "type": "text", "text": "Hello!" }
                ]
            }),
            serde_json::json!({
                "role": "user",
                "content": "Hi"
            }),
        ];
        super::strip_thinking_blocks(&mut messages);
        let content = messages[0]["content"].as_array().unwrap();
        assert_eq!(content.len(), 1);
        assert_eq!(content[0]["type"], "text");
    }

    #[test]
    fn strip_leaves_user_messages_unchanged() {
        let mut messages = vec![serde_json::json!({
            "role": "user",
            "content": [
                { "type": "text", "text": "Hello" }
            ]
        })];
        super::strip_thinking_blocks(&mut messages);
        let content = messages[0]["content"].as_array().unwrap();
        assert_eq!(content.len(), 1);
        assert_eq!(content[0]["type"], "text");
    }

    #[test]
    fn strip_noop_when_no_thinking_blocks() {
        let mut messages = vec![serde_json::json!({
            "role": "assistant",
            "content": [
                { "type": "text", "text": "Sure, here is the answer." }
            ]
        })];
        super::strip_thinking_blocks(&mut messages);
        let content = messages[0]["content"].as_array().unwrap();
        assert_eq!(content.len(), 1);
        assert_eq!(content[0]["type"], "text");
    }

    #[test]
    fn haiku_models_do_not_support_thinking() {
        assert!(!supports_extended_thinking("claude-haiku-4-5-20251001"));
        assert!(supports_extended_thinking("claude-sonnet-4-6"));
        assert!(supports_extended_thinking("claude-opus-4-6"));
    }

    #[test]
    fn strip_handles_string_content_untouched() {
        let mut messages = vec![serde_json::json!({
            "role": "assistant",
            "content": "plain text response"
        })];
        super::strip_thinking_blocks(&mut messages);
        assert_eq!(messages[0]["content"], "plain text response");
    }
}
