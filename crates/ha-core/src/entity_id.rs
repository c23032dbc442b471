//! `domain.object_id` identifiers

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Reasons an entity id fails to parse
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EntityIdError {
    /// Missing or repeated `.` separator
    #[error("entity_id must contain exactly one '.' separator")]
    InvalidFormat,

    /// Domain is not a lowercase slug
    #[error("invalid domain: {0}")]
    InvalidDomain(String),

    /// Object id is not a lowercase slug
    #[error("invalid object_id: {0}")]
    InvalidObjectId(String),
}

/// Entity identifier such as `input_boolean.mock_3`
///
/// Both halves are lowercase alphanumeric with underscores and may not start
/// or end with an underscore. Domains additionally may not contain `__`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EntityId {
    domain: String,
    object_id: String,
}

fn is_slug(s: &str) -> bool {
    !s.is_empty()
        && !s.starts_with('_')
        && !s.ends_with('_')
        && s.chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

impl EntityId {
    /// Build an entity id from its parts, validating both
    pub fn new(
        domain: impl Into<String>,
        object_id: impl Into<String>,
    ) -> Result<Self, EntityIdError> {
        let domain = domain.into();
        let object_id = object_id.into();

        if !is_slug(&domain) || domain.contains("__") {
            return Err(EntityIdError::InvalidDomain(domain));
        }
        if !is_slug(&object_id) {
            return Err(EntityIdError::InvalidObjectId(object_id));
        }
        Ok(Self { domain, object_id })
    }

    /// Part before the `.`
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Part after the `.`
    pub fn object_id(&self) -> &str {
        &self.object_id
    }
}

impl FromStr for EntityId {
    type Err = EntityIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('.') {
            Some((domain, object_id)) if !object_id.contains('.') => Self::new(domain, object_id),
            _ => Err(EntityIdError::InvalidFormat),
        }
    }
}

impl TryFrom<String> for EntityId {
    type Error = EntityIdError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<EntityId> for String {
    fn from(id: EntityId) -> String {
        id.to_string()
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.domain, self.object_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_entity_id() {
        let id: EntityId = "input_boolean.mock_3".parse().unwrap();
        assert_eq!(id.domain(), "input_boolean");
        assert_eq!(id.object_id(), "mock_3");
        assert_eq!(id.to_string(), "input_boolean.mock_3");
    }

    #[test]
    fn test_invalid_format() {
        assert_eq!(
            "no_separator".parse::<EntityId>().unwrap_err(),
            EntityIdError::InvalidFormat
        );
        assert_eq!(
            "too.many.parts".parse::<EntityId>().unwrap_err(),
            EntityIdError::InvalidFormat
        );
    }

    #[test]
    fn test_invalid_parts() {
        assert!(matches!(
            ".object".parse::<EntityId>(),
            Err(EntityIdError::InvalidDomain(_))
        ));
        assert!(matches!(
            "light.Living".parse::<EntityId>(),
            Err(EntityIdError::InvalidObjectId(_))
        ));
        assert!(matches!(
            "my__light.room".parse::<EntityId>(),
            Err(EntityIdError::InvalidDomain(_))
        ));
        assert!("light.my__room".parse::<EntityId>().is_ok());
    }

    #[test]
    fn test_serializes_as_string() {
        let id = EntityId::new("switch", "kitchen").unwrap();
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"switch.kitchen\"");
    }
}
