//! Domain types shared by the supervisor, the catalog pipeline and API surfaces.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Error returned when a string does not name a known status, source or version.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid {kind}: '{value}'")]
pub struct TypeParseError {
    pub kind: &'static str,
    pub value: String,
}

impl TypeParseError {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

// ============================================================================
// Operation Status
// ============================================================================

/// Lifecycle state of one mirroring operation.
///
/// `Running` is the only non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    Running,
    Success,
    Failed,
    Stopped,
}

impl OperationStatus {
    pub const ALL: [OperationStatus; 4] = [
        OperationStatus::Running,
        OperationStatus::Success,
        OperationStatus::Failed,
        OperationStatus::Stopped,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OperationStatus::Running => "running",
            OperationStatus::Success => "success",
            OperationStatus::Failed => "failed",
            OperationStatus::Stopped => "stopped",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, OperationStatus::Running)
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationStatus {
    type Err = TypeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "running" => Ok(OperationStatus::Running),
            "success" => Ok(OperationStatus::Success),
            "failed" => Ok(OperationStatus::Failed),
            "stopped" => Ok(OperationStatus::Stopped),
            _ => Err(TypeParseError::new("operation status", s)),
        }
    }
}

// ============================================================================
// Catalog Sources
// ============================================================================

/// Remote operator catalog families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CatalogSourceType {
    Redhat,
    Certified,
    Community,
}

impl CatalogSourceType {
    pub const ALL: [CatalogSourceType; 3] = [
        CatalogSourceType::Redhat,
        CatalogSourceType::Certified,
        CatalogSourceType::Community,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CatalogSourceType::Redhat => "redhat",
            CatalogSourceType::Certified => "certified",
            CatalogSourceType::Community => "community",
        }
    }

    /// Image repository name of the index.
    pub fn index_name(&self) -> &'static str {
        match self {
            CatalogSourceType::Redhat => "redhat-operator-index",
            CatalogSourceType::Certified => "certified-operator-index",
            CatalogSourceType::Community => "community-operator-index",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            CatalogSourceType::Redhat => "Red Hat Operators",
            CatalogSourceType::Certified => "Certified Operators",
            CatalogSourceType::Community => "Community Operators",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            CatalogSourceType::Redhat => "Operators packaged and shipped by Red Hat",
            CatalogSourceType::Certified => "Partner operators certified by Red Hat",
            CatalogSourceType::Community => "Community-maintained operators, no official support",
        }
    }

    /// Untagged catalog URL, e.g. `registry.redhat.io/redhat/redhat-operator-index`.
    pub fn catalog_url(&self) -> String {
        format!("registry.redhat.io/redhat/{}", self.index_name())
    }

    /// Fully tagged image reference for one platform version.
    pub fn image_ref(&self, version: &PlatformVersion) -> String {
        format!("{}:v{}", self.catalog_url(), version)
    }
}

impl fmt::Display for CatalogSourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CatalogSourceType {
    type Err = TypeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_ascii_lowercase();
        CatalogSourceType::ALL
            .into_iter()
            .find(|t| lowered == t.as_str() || lowered == t.index_name())
            .ok_or_else(|| TypeParseError::new("catalog source", s))
    }
}

// ============================================================================
// Platform Version
// ============================================================================

/// A `major.minor` platform release, e.g. `4.16`. Serialized as a string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PlatformVersion {
    pub major: u32,
    pub minor: u32,
}

impl PlatformVersion {
    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }
}

impl fmt::Display for PlatformVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl FromStr for PlatformVersion {
    type Err = TypeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim().trim_start_matches('v');
        let (major, minor) = trimmed
            .split_once('.')
            .ok_or_else(|| TypeParseError::new("platform version", s))?;
        let major = major
            .parse()
            .map_err(|_| TypeParseError::new("platform version", s))?;
        let minor = minor
            .parse()
            .map_err(|_| TypeParseError::new("platform version", s))?;
        Ok(Self { major, minor })
    }
}

impl Serialize for PlatformVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PlatformVersion {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// Composite Keys
// ============================================================================

/// Key of one fetched catalog: which source, which platform version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CatalogKey {
    pub source: CatalogSourceType,
    pub version: PlatformVersion,
}

impl CatalogKey {
    pub const fn new(source: CatalogSourceType, version: PlatformVersion) -> Self {
        Self { source, version }
    }
}

impl fmt::Display for CatalogKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.source, self.version)
    }
}

/// Key of one channel lookup.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelKey {
    pub operator: String,
    pub catalog: CatalogKey,
}

impl ChannelKey {
    pub fn new(operator: impl Into<String>, catalog: CatalogKey) -> Self {
        Self {
            operator: operator.into(),
            catalog,
        }
    }
}

// ============================================================================
// Operator Entry
// ============================================================================

/// Canonical operator record, whatever on-disk layout it was parsed from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperatorEntry {
    pub name: String,
    pub default_channel: String,
    pub channels: Vec<String>,
}

impl OperatorEntry {
    pub fn new(
        name: impl Into<String>,
        default_channel: impl Into<String>,
        channels: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            name: name.into(),
            default_channel: default_channel.into(),
            channels: channels.into_iter().map(Into::into).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_parse_is_case_insensitive() {
        assert_eq!("Running".parse::<OperationStatus>().unwrap(), OperationStatus::Running);
        assert_eq!("STOPPED".parse::<OperationStatus>().unwrap(), OperationStatus::Stopped);
        assert!("paused".parse::<OperationStatus>().is_err());
    }

    #[test]
    fn test_only_running_is_non_terminal() {
        for status in OperationStatus::ALL {
            assert_eq!(status.is_terminal(), status != OperationStatus::Running);
        }
    }

    #[test]
    fn test_source_accepts_index_name() {
        assert_eq!(
            "certified-operator-index".parse::<CatalogSourceType>().unwrap(),
            CatalogSourceType::Certified
        );
        assert_eq!(
            "community".parse::<CatalogSourceType>().unwrap(),
            CatalogSourceType::Community
        );
    }

    #[test]
    fn test_image_ref() {
        let version: PlatformVersion = "4.16".parse().unwrap();
        assert_eq!(
            CatalogSourceType::Redhat.image_ref(&version),
            "registry.redhat.io/redhat/redhat-operator-index:v4.16"
        );
    }

    #[test]
    fn test_version_parse_and_order() {
        let a: PlatformVersion = "v4.9".parse().unwrap();
        let b: PlatformVersion = "4.16".parse().unwrap();
        assert!(a < b);
        assert_eq!(b.to_string(), "4.16");
        assert!("4".parse::<PlatformVersion>().is_err());
        assert!("4.x".parse::<PlatformVersion>().is_err());
    }

    #[test]
    fn test_version_serde_as_string() {
        let key = CatalogKey::new(CatalogSourceType::Redhat, PlatformVersion::new(4, 17));
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, r#"{"source":"redhat","version":"4.17"}"#);
        let back: CatalogKey = serde_json::from_str(&json).unwrap();
        assert_eq!(back, key);
    }

    #[test]
    fn test_operator_entry_camel_case() {
        let entry = OperatorEntry::new("web-terminal", "fast", ["fast"]);
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["defaultChannel"], "fast");
    }
}
