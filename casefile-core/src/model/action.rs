//! Derivation actions and commit policies.

use super::module::ModuleKind;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A kind of AI-assisted generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Outline,
    Worldcheck,
    Story,
    Role,
    Clue,
    Timeline,
    Dm,
}

impl ActionType {
    pub const ALL: [ActionType; 7] = [
        ActionType::Outline,
        ActionType::Worldcheck,
        ActionType::Story,
        ActionType::Role,
        ActionType::Clue,
        ActionType::Timeline,
        ActionType::Dm,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::Outline => "outline",
            ActionType::Worldcheck => "worldcheck",
            ActionType::Story => "story",
            ActionType::Role => "role",
            ActionType::Clue => "clue",
            ActionType::Timeline => "timeline",
            ActionType::Dm => "dm",
        }
    }

    /// The module this action writes into. Outline, story and worldcheck
    /// produce content about the truth itself.
    pub fn target(&self) -> Option<ModuleKind> {
        match self {
            ActionType::Role => Some(ModuleKind::Role),
            ActionType::Clue => Some(ModuleKind::Clue),
            ActionType::Timeline => Some(ModuleKind::Timeline),
            ActionType::Dm => Some(ModuleKind::Dm),
            ActionType::Outline | ActionType::Worldcheck | ActionType::Story => None,
        }
    }

    /// Whether output can be committed without review.
    pub fn supports_direct_commit(&self) -> bool {
        self.target().is_some() || *self == ActionType::Worldcheck
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when an action name is not one of [`ActionType::ALL`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unsupported action: {0}")]
pub struct UnknownAction(pub String);

impl FromStr for ActionType {
    type Err = UnknownAction;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        ActionType::ALL
            .into_iter()
            .find(|a| a.as_str() == wanted)
            .ok_or_else(|| UnknownAction(s.to_string()))
    }
}

/// What happens to extracted candidates once a derivation succeeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitMode {
    /// Replace the module's entries for the snapshot (or the derivation-check
    /// ledger for worldcheck) straight away.
    Direct,
    /// Keep candidates pending until someone accepts or rejects them.
    #[default]
    Staged,
}

impl CommitMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommitMode::Direct => "direct",
            CommitMode::Staged => "staged",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_action() {
        assert_eq!("Timeline".parse::<ActionType>(), Ok(ActionType::Timeline));
        assert_eq!(
            "poster".parse::<ActionType>(),
            Err(UnknownAction("poster".to_string()))
        );
    }

    #[test]
    fn test_direct_commit_targets() {
        assert!(ActionType::Role.supports_direct_commit());
        assert!(ActionType::Worldcheck.supports_direct_commit());
        assert!(!ActionType::Story.supports_direct_commit());
        assert_eq!(ActionType::Dm.target(), Some(ModuleKind::Dm));
    }
}
