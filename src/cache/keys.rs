//! Cache key definitions.
//!
//! A `ResourceKey` names one cached collection (`"students"`, `"classes"`).

use std::borrow::Borrow;
use std::fmt;
use std::sync::Arc;

/// Identifies one cached collection.
///
/// Cheap to clone; compared and hashed by its string content.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceKey(Arc<str>);

impl ResourceKey {
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(Arc::from(name.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ResourceKey {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ResourceKey {
    fn from(value: String) -> Self {
        Self(Arc::from(value))
    }
}

impl From<&ResourceKey> for ResourceKey {
    fn from(value: &ResourceKey) -> Self {
        value.clone()
    }
}

impl Borrow<str> for ResourceKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for ResourceKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Collect anything key-like into owned keys, preserving order and dropping duplicates.
pub fn unique_keys<I, K>(keys: I) -> Vec<ResourceKey>
where
    I: IntoIterator<Item = K>,
    K: Into<ResourceKey>,
{
    let mut out: Vec<ResourceKey> = Vec::new();
    for key in keys {
        let key = key.into();
        if !out.contains(&key) {
            out.push(key);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn keys_compare_by_content() {
        let a = ResourceKey::new("students");
        let b = ResourceKey::from("students".to_string());
        assert_eq!(a, b);
        assert_ne!(a, ResourceKey::new("classes"));
    }

    #[test]
    fn map_lookup_by_str() {
        let mut map = HashMap::new();
        map.insert(ResourceKey::new("rooms"), 3);
        assert_eq!(map.get("rooms"), Some(&3));
    }

    #[test]
    fn unique_keys_keeps_first_occurrence_order() {
        let keys = unique_keys(["students", "classes", "students", "rooms"]);
        let names: Vec<&str> = keys.iter().map(ResourceKey::as_str).collect();
        assert_eq!(names, vec!["students", "classes", "rooms"]);
    }
}
