//! Broker topics and destination helpers.

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

const PRODUCT_SEGMENT: &str = "product";
const CATEGORY_SEGMENT: &str = "category";

/// Prefix under which the broker's topics live unless configured otherwise.
pub const DEFAULT_BROKER_PREFIX: &str = "/topic";

/// A validated broker destination such as `/topic/product/42`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Topic(String);

impl Topic {
    pub fn new(destination: impl Into<String>) -> Result<Self> {
        let destination = destination.into();
        validate_destination(&destination)?;
        Ok(Self(destination))
    }

    /// `/topic/product/{product_id}`
    pub fn product(product_id: &str) -> Result<Self> {
        validate_entity_id(product_id)?;
        Topic::new(format!(
            "{}/{}/{}",
            DEFAULT_BROKER_PREFIX, PRODUCT_SEGMENT, product_id
        ))
    }

    /// `/topic/category/{category_id}`
    pub fn category(category_id: &str) -> Result<Self> {
        validate_entity_id(category_id)?;
        Topic::new(format!(
            "{}/{}/{}",
            DEFAULT_BROKER_PREFIX, CATEGORY_SEGMENT, category_id
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn kind(&self) -> TopicKind {
        match self.entity_segments() {
            Some((PRODUCT_SEGMENT, _)) => TopicKind::Product,
            Some((CATEGORY_SEGMENT, _)) => TopicKind::Category,
            _ => TopicKind::Other,
        }
    }

    /// The identifier of a product or category topic.
    pub fn entity_id(&self) -> Option<&str> {
        match self.entity_segments() {
            Some((PRODUCT_SEGMENT, id)) | Some((CATEGORY_SEGMENT, id)) => Some(id),
            _ => None,
        }
    }

    pub fn is_under(&self, prefix: &str) -> bool {
        strip_destination_prefix(&self.0, prefix).is_some()
    }

    // Splits `/topic/{kind}/{id}` into (kind, id).
    fn entity_segments(&self) -> Option<(&str, &str)> {
        let rest = strip_destination_prefix(&self.0, DEFAULT_BROKER_PREFIX)?;
        let (kind, id) = rest.split_once('/')?;
        if id.contains('/') {
            return None;
        }
        Some((kind, id))
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Topic {
    type Err = Error;

    fn from_str(destination: &str) -> Result<Self> {
        Topic::new(destination)
    }
}

impl AsRef<str> for Topic {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Classification used by clients to label rendered updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicKind {
    Product,
    Category,
    Other,
}

impl TopicKind {
    pub fn label(&self) -> &'static str {
        match self {
            TopicKind::Product => "Product Update",
            TopicKind::Category => "Category Update",
            TopicKind::Other => "Update",
        }
    }
}

/// Returns the part of `destination` after `prefix/`, or `None` when the
/// destination is not below the prefix.
pub fn strip_destination_prefix<'a>(destination: &'a str, prefix: &str) -> Option<&'a str> {
    let prefix = prefix.trim_end_matches('/');
    destination
        .strip_prefix(prefix)?
        .strip_prefix('/')
        .filter(|rest| !rest.is_empty())
}

/// Entity ids become a single path segment, so they may not be empty, contain
/// `/`, or contain whitespace or control characters.
pub fn validate_entity_id(id: &str) -> Result<()> {
    if id.is_empty()
        || id.contains('/')
        || id.chars().any(|c| c.is_whitespace() || c.is_control())
    {
        return Err(Error::InvalidDestination(format!("invalid identifier '{}'", id)));
    }
    Ok(())
}

fn validate_destination(destination: &str) -> Result<()> {
    let valid = destination.len() > 1
        && destination.starts_with('/')
        && !destination.ends_with('/')
        && !destination.contains("//")
        && !destination
            .chars()
            .any(|c| c.is_whitespace() || c.is_control());

    if valid {
        Ok(())
    } else {
        Err(Error::InvalidDestination(destination.to_string()))
    }
}
