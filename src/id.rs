//! Code for handling string IDs for named entities (networks, sites) that come from case data
//! files, as distinct from the purely positional indices in [`crate::index`].
use anyhow::{Context, Result};
use std::borrow::Borrow;
use std::collections::HashMap;
use std::hash::Hash;

/// Indicates that the struct has a string ID field.
pub trait HasID {
    /// Get a string representation of the struct's ID.
    fn get_id(&self) -> &str;
}

/// Implement [`HasID`] for the given type, assuming it has a field called `id`.
macro_rules! define_id_getter {
    ($t:ty) => {
        impl crate::id::HasID for $t {
            fn get_id(&self) -> &str {
                &self.id
            }
        }
    };
}
pub(crate) use define_id_getter;

/// A lookup table keyed by string ID, erroring with the offending ID on a miss rather than
/// panicking.
pub trait IDMap<K, V>
where
    K: Eq + Hash + Borrow<str>,
{
    /// Get the value for `id`, after checking that it exists in this collection.
    fn get_checked(&self, id: &str) -> Result<&V>;
}

impl<K, V> IDMap<K, V> for HashMap<K, V>
where
    K: Eq + Hash + Borrow<str>,
{
    fn get_checked(&self, id: &str) -> Result<&V> {
        self.get(id)
            .with_context(|| format!("Unknown ID '{id}' referenced in case data"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_checked_found_and_missing() {
        let mut map = HashMap::new();
        map.insert("site-a".to_string(), 42);

        assert_eq!(*map.get_checked("site-a").unwrap(), 42);
        assert!(map.get_checked("site-b").is_err());
    }
}
