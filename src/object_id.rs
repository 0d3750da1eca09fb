//! Object identifiers
//!
//! Identifiers are opaque strings (usually pointer values such as `0x7b43`)
//! that the traced program may reuse for unrelated objects over time. Every
//! snapshot keeps a handle to its instance, so the id is reference counted
//! to keep those handles cheap to clone.

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;
use std::sync::Arc;

/// Opaque, cheaply clonable object identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectId(Arc<str>);

impl ObjectId {
    pub fn new(id: &str) -> Self {
        ObjectId(Arc::from(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ObjectId {
    fn from(id: &str) -> Self {
        ObjectId::new(id)
    }
}

impl From<String> for ObjectId {
    fn from(id: String) -> Self {
        ObjectId(Arc::from(id))
    }
}

impl Borrow<str> for ObjectId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for ObjectId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fnv::FnvHashMap;

    #[test]
    fn test_lookup_by_str() {
        let mut map = FnvHashMap::default();
        map.insert(ObjectId::from("0x1000"), 7);
        assert_eq!(map.get("0x1000"), Some(&7));
        assert_eq!(map.get("0x2000"), None);
    }

    #[test]
    fn test_clone_shares_storage() {
        let id = ObjectId::from("0x1");
        let other = id.clone();
        assert_eq!(id, other);
        assert_eq!(other.to_string(), "0x1");
    }
}
