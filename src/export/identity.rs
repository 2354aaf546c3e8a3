//! Artifact naming

use chrono::{Local, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{MlError, Result};

/// Timestamp suffix appended to every identity, second resolution
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";
const TIMESTAMP_LEN: usize = 15;

/// Replace everything except alphanumerics, `.`, `_`, `-` and space with `_`.
pub fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '.' | '_' | '-' | ' ') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn is_sanitized(name: &str) -> bool {
    sanitize_name(name) == name
}

/// On-disk identity of an artifact: `<sanitized name>_<YYYYmmdd_HHMMSS>`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ArtifactId(String);

impl ArtifactId {
    /// Identity for `name` stamped with the current local time
    pub fn generate(name: &str) -> Result<Self> {
        Self::with_timestamp(name, Local::now().naive_local())
    }

    /// Identity for `name` stamped with `at`
    pub fn with_timestamp(name: &str, at: NaiveDateTime) -> Result<Self> {
        let sanitized = sanitize_name(name.trim());
        if sanitized.trim().is_empty() {
            return Err(MlError::ValidationError("Model name must not be empty".to_string()));
        }
        Ok(Self(format!("{}_{}", sanitized, at.format(TIMESTAMP_FORMAT))))
    }

    /// Accept an identity handed back by a caller.
    ///
    /// Only the sanitized character set is allowed, which keeps identities
    /// from naming anything outside the store directory.
    pub fn parse(raw: &str) -> Result<Self> {
        if raw.is_empty() || raw == "." || raw == ".." || !is_sanitized(raw) {
            return Err(MlError::ValidationError(format!("Invalid artifact identity '{}'", raw)));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The sanitized model name, without the timestamp suffix. Identities
    /// that carry no recognizable timestamp are returned whole.
    pub fn model_name(&self) -> &str {
        match self.split_timestamp() {
            Some((name, _)) => name,
            None => &self.0,
        }
    }

    /// Creation time encoded in the identity
    pub fn timestamp(&self) -> Option<NaiveDateTime> {
        self.split_timestamp().map(|(_, ts)| ts)
    }

    fn split_timestamp(&self) -> Option<(&str, NaiveDateTime)> {
        let s = self.0.as_str();
        if s.len() < TIMESTAMP_LEN + 2 || !s.is_char_boundary(s.len() - TIMESTAMP_LEN) {
            return None;
        }
        let (head, stamp) = s.split_at(s.len() - TIMESTAMP_LEN);
        let name = head.strip_suffix('_')?;
        let ts = NaiveDateTime::parse_from_str(stamp, TIMESTAMP_FORMAT).ok()?;
        if name.is_empty() {
            return None;
        }
        Some((name, ts))
    }
}

impl fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ArtifactId {
    type Error = MlError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<ArtifactId> for String {
    fn from(id: ArtifactId) -> Self {
        id.0
    }
}

impl AsRef<str> for ArtifactId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 9)
            .unwrap()
            .and_hms_opt(14, 5, 7)
            .unwrap()
    }

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize_name("my model/v2:final"), "my model_v2_final");
        assert_eq!(sanitize_name("iris_rf-1.0"), "iris_rf-1.0");
        assert_eq!(sanitize_name("niño"), "niño");
    }

    #[test]
    fn test_identity_format() {
        let id = ArtifactId::with_timestamp("iris_rf", at()).unwrap();
        assert_eq!(id.as_str(), "iris_rf_20240309_140507");
        assert_eq!(id.model_name(), "iris_rf");
        assert_eq!(id.timestamp(), Some(at()));
    }

    #[test]
    fn test_empty_name_rejected() {
        assert!(ArtifactId::with_timestamp("   ", at()).is_err());
        assert!(ArtifactId::with_timestamp("", at()).is_err());
    }

    #[test]
    fn test_parse_rejects_paths() {
        assert!(ArtifactId::parse("../etc/passwd").is_err());
        assert!(ArtifactId::parse("..").is_err());
        assert!(ArtifactId::parse("a/b").is_err());
        assert!(ArtifactId::parse("iris_rf_20240309_140507").is_ok());
    }

    #[test]
    fn test_model_name_without_timestamp() {
        let id = ArtifactId::parse("legacy").unwrap();
        assert_eq!(id.model_name(), "legacy");
        assert_eq!(id.timestamp(), None);
    }
}
