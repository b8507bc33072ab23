use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

pub type ScopeValue = Arc<dyn Any + Send + Sync>;

/// Shared key/value store. Clones refer to the same entries.
#[derive(Clone, Default)]
pub struct DataStore {
    values: Arc<RwLock<HashMap<String, ScopeValue>>>,
}

impl DataStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_strings<K, V>(entries: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        let store = Self::new();
        for (key, value) in entries {
            store.set(key, value.into());
        }
        store
    }

    pub fn set<T: Any + Send + Sync>(&self, key: impl Into<String>, value: T) {
        self.set_value(key, Arc::new(value));
    }

    pub fn set_value(&self, key: impl Into<String>, value: ScopeValue) {
        self.values
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.into(), value);
    }

    pub fn get_value(&self, key: &str) -> Option<ScopeValue> {
        self.values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    pub fn get<T: Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
        self.get_value(key)?.downcast::<T>().ok()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys = self
            .values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect::<Vec<_>>();
        keys.sort();
        keys
    }
}

#[cfg(test)]
mod tests {
    use super::DataStore;

    #[test]
    fn last_write_wins() {
        let store = DataStore::new();
        store.set("key", "first".to_string());
        store.set("key", "second".to_string());

        assert_eq!(store.get::<String>("key").as_deref().map(String::as_str), Some("second"));
    }

    #[test]
    fn typed_get_rejects_other_types() {
        let store = DataStore::new();
        store.set("count", 11_i64);

        assert!(store.get::<String>("count").is_none());
        assert_eq!(store.get::<i64>("count").map(|value| *value), Some(11));
    }
}
