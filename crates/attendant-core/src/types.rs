use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies a conversation. Sessions, reminders, cron jobs, and background
/// agents are all keyed (directly or transitively) by this id.
///
/// Kept as an opaque string rather than a three-part
/// `user:{id}:agent:{id}:{name}` key: spec.md §3 keys `Session` by
/// conversation id alone ("Non-goals: multi-user isolation inside one
/// process beyond per-conversation session state").
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
pub struct ConversationId(pub String);

impl ConversationId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ConversationId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ConversationId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<i64> for ConversationId {
    fn from(n: i64) -> Self {
        Self(n.to_string())
    }
}

/// Abstract model tier, per spec.md §3 ("active model id ∈ {small, medium,
/// large} (names abstract)"). Concrete model strings live in config.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ModelTier {
    Small,
    #[default]
    Medium,
    Large,
}

impl fmt::Display for ModelTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelTier::Small => write!(f, "small"),
            ModelTier::Medium => write!(f, "medium"),
            ModelTier::Large => write!(f, "large"),
        }
    }
}

impl std::str::FromStr for ModelTier {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "small" => Ok(ModelTier::Small),
            "medium" => Ok(ModelTier::Medium),
            "large" => Ok(ModelTier::Large),
            other => Err(format!("unknown model tier: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_tier_round_trips_through_display_and_parse() {
        for tier in [ModelTier::Small, ModelTier::Medium, ModelTier::Large] {
            let parsed: ModelTier = tier.to_string().parse().unwrap();
            assert_eq!(parsed, tier);
        }
    }

    #[test]
    fn conversation_id_display_matches_inner_string() {
        let id = ConversationId::from("abc-123");
        assert_eq!(id.to_string(), "abc-123");
    }
}
