//! Operation identifiers.
//!
//! Ids end up in file names (`operations/<id>.json`, `logs/operations/<id>.log`),
//! so anything that is not a UUID is rejected before it reaches the filesystem.

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid operation ID '{value}': {reason}")]
pub struct IdParseError {
    pub value: String,
    reason: String,
}

/// Identifier of one operation, always in lowercase hyphenated UUID form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct OperationId(String);

impl OperationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().hyphenated().to_string())
    }

    pub fn parse(value: &str) -> Result<Self, IdParseError> {
        Uuid::parse_str(value.trim())
            .map(|uuid| Self(uuid.hyphenated().to_string()))
            .map_err(|e| IdParseError {
                value: value.to_string(),
                reason: e.to_string(),
            })
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for OperationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for OperationId {
    type Err = IdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl AsRef<str> for OperationId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// Records on disk are re-validated so a hand-edited file cannot smuggle a path in.
impl<'de> Deserialize<'de> for OperationId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_ids_are_unique() {
        assert_ne!(OperationId::new(), OperationId::new());
    }

    #[test]
    fn test_parse_rejects_path_like_input() {
        let err = OperationId::parse("../../etc/passwd").unwrap_err();
        assert!(err.to_string().starts_with("Invalid operation ID '../../etc/passwd'"));
    }

    #[test]
    fn test_parse_normalises_case() {
        let id = OperationId::parse("6F9619FF-8B86-D011-B42D-00C04FC964FF").unwrap();
        assert_eq!(id.as_str(), "6f9619ff-8b86-d011-b42d-00c04fc964ff");
    }

    #[test]
    fn test_deserialize_validates() {
        let id = OperationId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(serde_json::from_str::<OperationId>(&json).unwrap(), id);
        assert!(serde_json::from_str::<OperationId>("\"nope\"").is_err());
    }
}
