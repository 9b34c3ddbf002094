//! Identifier types shared across the router.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of one interchangeable backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CandidateId(String);

impl CandidateId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CandidateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CandidateId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for CandidateId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// A class of task with its own trade-off between speed, quality and cost.
///
/// Tiers are configuration data: the set of valid tiers is whatever the
/// router's weight profiles define.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tier(String);

impl Tier {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Tier {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for Tier {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&Tier> for Tier {
    fn from(t: &Tier) -> Self {
        t.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_serialize_as_plain_strings() {
        let id = CandidateId::new("alpha");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"alpha\"");
        let tier: Tier = serde_json::from_str("\"fast\"").unwrap();
        assert_eq!(tier, Tier::from("fast"));
    }

    #[test]
    fn test_ids_order_lexically() {
        let mut ids = vec![CandidateId::from("b"), CandidateId::from("a")];
        ids.sort();
        assert_eq!(ids[0].as_str(), "a");
    }
}
