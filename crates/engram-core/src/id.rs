//! Record identification
//!
//! Every record id carries its retention tier as an opaque string
//! prefix, so the owning tier can be recovered from the id alone.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Retention tier of a memory record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Tier {
    /// Short-term, cache-backed, context-scoped
    Working,
    /// Mid-term, indexed by user and conversation
    Episodic,
    /// Long-term, categorized, near-permanent
    Knowledge,
}

impl Tier {
    /// Id prefix for this tier
    pub fn prefix(&self) -> &'static str {
        match self {
            Tier::Working => "wm",
            Tier::Episodic => "em",
            Tier::Knowledge => "kb",
        }
    }

    /// Parse a tier from an id prefix
    pub fn from_prefix(prefix: &str) -> Option<Self> {
        match prefix {
            "wm" => Some(Tier::Working),
            "em" => Some(Tier::Episodic),
            "kb" => Some(Tier::Knowledge),
            _ => None,
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tier::Working => write!(f, "working"),
            Tier::Episodic => write!(f, "episodic"),
            Tier::Knowledge => write!(f, "knowledge"),
        }
    }
}

/// Globally unique, tier-tagged record identifier
///
/// Format: `<tier-prefix>_<uuid-simple>`, e.g. `wm_4f2a...`. The id is
/// opaque to callers; only this type knows the layout.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RecordId(String);

impl RecordId {
    /// Mint a fresh id for the given tier
    pub fn mint(tier: Tier) -> Self {
        Self(format!("{}_{}", tier.prefix(), Uuid::new_v4().simple()))
    }

    /// Parse an id string, validating the tier prefix
    pub fn parse(s: &str) -> Result<Self> {
        let (prefix, rest) = s
            .split_once('_')
            .ok_or_else(|| Error::Validation(format!("Malformed record id: {}", s)))?;

        if Tier::from_prefix(prefix).is_none() {
            return Err(Error::Validation(format!(
                "Unknown tier prefix in record id: {}",
                s
            )));
        }
        if rest.is_empty() {
            return Err(Error::Validation(format!("Empty record id payload: {}", s)));
        }

        Ok(Self(s.to_string()))
    }

    /// Recover the tier this id was minted for
    pub fn tier(&self) -> Tier {
        // Invariant: construction always validates the prefix
        self.0
            .split_once('_')
            .and_then(|(p, _)| Tier::from_prefix(p))
            .unwrap_or(Tier::Knowledge)
    }

    /// Get the id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for RecordId {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        Self::parse(&s)
    }
}

impl From<RecordId> for String {
    fn from(id: RecordId) -> Self {
        id.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for RecordId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mint_carries_tier() {
        assert_eq!(RecordId::mint(Tier::Working).tier(), Tier::Working);
        assert_eq!(RecordId::mint(Tier::Episodic).tier(), Tier::Episodic);
        assert_eq!(RecordId::mint(Tier::Knowledge).tier(), Tier::Knowledge);
    }

    #[test]
    fn test_minted_ids_are_unique() {
        let a = RecordId::mint(Tier::Working);
        let b = RecordId::mint(Tier::Working);
        assert_ne!(a, b);
    }

    #[test]
    fn test_parse_roundtrip() {
        let id = RecordId::mint(Tier::Episodic);
        let parsed = RecordId::parse(id.as_str()).unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn test_parse_rejects_unknown_prefix() {
        assert!(RecordId::parse("zz_abc123").is_err());
        assert!(RecordId::parse("no-separator").is_err());
        assert!(RecordId::parse("wm_").is_err());
    }

    #[test]
    fn test_deserialization_validates_the_prefix() {
        let id = RecordId::mint(Tier::Working);
        let json = serde_json::to_string(&id).unwrap();
        let back: RecordId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);

        assert!(serde_json::from_str::<RecordId>("\"zz_abc123\"").is_err());
        assert!(serde_json::from_str::<RecordId>("\"no-separator\"").is_err());
        assert!(serde_json::from_str::<RecordId>("\"wm_\"").is_err());
    }

    #[test]
    fn test_display_matches_as_str() {
        let id = RecordId::mint(Tier::Knowledge);
        assert_eq!(id.to_string(), id.as_str());
        assert!(id.as_str().starts_with("kb_"));
    }
}
