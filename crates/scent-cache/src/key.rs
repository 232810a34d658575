//! Cache keys and tags
//!
//! Personalized entries carry a `user:<id>` tag so user activity can drop them
//! without touching shared entries. Entries derived from catalog items carry
//! `item:<id>` tags for content updates.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Tag prefix for per-user entries
pub const USER_TAG_PREFIX: &str = "user:";
/// Tag prefix for entries built from a catalog item
pub const ITEM_TAG_PREFIX: &str = "item:";

/// Tag marking an entry as personalized for a user
#[must_use]
pub fn user_tag(user_id: &str) -> String {
    format!("{USER_TAG_PREFIX}{user_id}")
}

/// Tag marking an entry as derived from a catalog item
#[must_use]
pub fn item_tag(item_id: &str) -> String {
    format!("{ITEM_TAG_PREFIX}{item_id}")
}

/// A key plus the tags it should be indexed under
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    key: String,
    tags: Vec<String>,
}

impl CacheKey {
    /// Key scoped to one user: `<namespace>:u:<user>:<parts...>`, tagged `user:<id>`
    #[must_use]
    pub fn personalized<I, S>(namespace: &str, user_id: &str, parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut key = format!("{namespace}:u:{user_id}");
        for part in parts {
            key.push(':');
            key.push_str(part.as_ref());
        }
        Self {
            key,
            tags: vec![user_tag(user_id)],
        }
    }

    /// Key shared across users: `<namespace>:s:<parts...>`, untagged
    #[must_use]
    pub fn shared<I, S>(namespace: &str, parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut key = format!("{namespace}:s");
        for part in parts {
            key.push(':');
            key.push_str(part.as_ref());
        }
        Self {
            key,
            tags: Vec::new(),
        }
    }

    /// Add a tag
    #[must_use]
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        let tag = tag.into();
        if !self.tags.contains(&tag) {
            self.tags.push(tag);
        }
        self
    }

    /// Tag with every catalog item the value was built from
    #[must_use]
    pub fn with_items<I, S>(mut self, item_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for id in item_ids {
            self = self.with_tag(item_tag(id.as_ref()));
        }
        self
    }

    /// Key string
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.key
    }

    /// Tags
    #[inline]
    #[must_use]
    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    /// Whether the key belongs to a single user
    #[inline]
    #[must_use]
    pub fn is_personalized(&self) -> bool {
        self.tags.iter().any(|t| t.starts_with(USER_TAG_PREFIX))
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn personalized_key_carries_user_tag() {
        let key = CacheKey::personalized("recs", "u42", ["hybrid", "ab12"]);
        assert_eq!(key.as_str(), "recs:u:u42:hybrid:ab12");
        assert_eq!(key.tags(), ["user:u42".to_string()]);
        assert!(key.is_personalized());
    }

    #[test]
    fn shared_key_is_untagged() {
        let key = CacheKey::shared("explain", ["ab12", "item-7"]).with_items(["item-7", "item-7"]);
        assert_eq!(key.as_str(), "explain:s:ab12:item-7");
        assert_eq!(key.tags(), ["item:item-7".to_string()]);
        assert!(!key.is_personalized());
    }
}
