use std::fmt;

use serde::{Deserialize, Serialize};

/// Closed catalog of remote models the chat widget can talk to.
///
/// Adding a model is a new variant plus a catalog row, not a schema change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ChatModel {
    /// Fast, low-latency tier; the default selection.
    #[default]
    Flash,
    /// Higher-quality, slower tier.
    Pro,
}

/// Every selectable model, in display order.
pub const MODEL_CATALOG: [ChatModel; 2] = [ChatModel::Flash, ChatModel::Pro];

impl ChatModel {
    /// Opaque model name understood by the remote service.
    pub const fn remote_name(self) -> &'static str {
        match self {
            Self::Flash => "gemini-3-flash-preview",
            Self::Pro => "gemini-3-pro-preview",
        }
    }

    /// Human-readable label for selection UIs.
    pub const fn label(self) -> &'static str {
        match self {
            Self::Flash => "Gemini 3 Flash",
            Self::Pro => "Gemini 3 Pro",
        }
    }

    /// One-line description for selection UIs.
    pub const fn description(self) -> &'static str {
        match self {
            Self::Flash => "Fast, efficient, low latency.",
            Self::Pro => "Complex reasoning, higher quality.",
        }
    }

    /// Looks up a catalog entry by its remote model name.
    pub fn from_remote_name(remote_name: &str) -> Option<Self> {
        MODEL_CATALOG
            .into_iter()
            .find(|model| model.remote_name() == remote_name)
    }
}

impl fmt::Display for ChatModel {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}", self.remote_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_model_is_the_fast_tier() {
        assert_eq!(ChatModel::default(), ChatModel::Flash);
    }

    #[test]
    fn catalog_remote_names_are_distinct() {
        assert_ne!(
            ChatModel::Flash.remote_name(),
            ChatModel::Pro.remote_name()
        );
    }

    #[test]
    fn remote_name_lookup_roundtrips() {
        for model in MODEL_CATALOG {
            assert_eq!(ChatModel::from_remote_name(model.remote_name()), Some(model));
        }
        assert_eq!(ChatModel::from_remote_name("gemini-unknown"), None);
    }
}
