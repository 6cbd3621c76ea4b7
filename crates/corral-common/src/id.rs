//! Container ID validation.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{CorralError, CorralResult};

/// A validated container ID.
///
/// Container IDs must match `[a-z][a-z0-9_-]+`: at least two characters, a
/// lowercase ASCII letter first, then lowercase letters, digits, hyphens and
/// underscores. The ID doubles as the runtime directory name and the init
/// process argument, so nothing else is accepted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContainerId(String);

impl ContainerId {
    /// Create a new container ID, validating the format.
    ///
    /// # Errors
    ///
    /// Returns an error if the ID format is invalid.
    pub fn new(id: impl Into<String>) -> CorralResult<Self> {
        let id = id.into();
        Self::validate(&id)?;
        Ok(Self(id))
    }

    /// Get the container ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Validate a container ID string.
    fn validate(id: &str) -> CorralResult<()> {
        let mut chars = id.chars();
        let valid_first = chars.next().is_some_and(|c| c.is_ascii_lowercase());
        let rest = chars.as_str();
        let valid_rest = !rest.is_empty()
            && rest
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_');

        if valid_first && valid_rest {
            Ok(())
        } else {
            Err(CorralError::InvalidContainerId { id: id.to_string() })
        }
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ContainerId {
    type Err = CorralError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for ContainerId {
    type Error = CorralError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ContainerId> for String {
    fn from(id: ContainerId) -> Self {
        id.0
    }
}

impl AsRef<str> for ContainerId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn valid_container_ids() {
        assert!(ContainerId::new("abc123").is_ok());
        assert!(ContainerId::new("my-container").is_ok());
        assert!(ContainerId::new("my_container").is_ok());
        assert!(ContainerId::new("a1").is_ok());
    }

    #[test]
    fn invalid_container_ids() {
        assert!(ContainerId::new("").is_err());
        assert!(ContainerId::new("a").is_err());
        assert!(ContainerId::new("1abc").is_err());
        assert!(ContainerId::new("-invalid").is_err());
        assert!(ContainerId::new("Container").is_err());
        assert!(ContainerId::new("with space").is_err());
        assert!(ContainerId::new("../escape").is_err());
    }

    #[test]
    fn serde_rejects_invalid() {
        let id: ContainerId = serde_json::from_str("\"web-1\"").unwrap();
        assert_eq!(id.as_str(), "web-1");
        assert!(serde_json::from_str::<ContainerId>("\"Web\"").is_err());
    }

    proptest! {
        #[test]
        fn accepts_everything_matching_the_pattern(id in "[a-z][a-z0-9_-]{1,40}") {
            prop_assert!(ContainerId::new(id).is_ok());
        }

        #[test]
        fn rejects_leading_non_letter(id in "[0-9_-][a-z0-9_-]{1,20}") {
            prop_assert!(ContainerId::new(id).is_err());
        }
    }
}
