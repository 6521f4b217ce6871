//! In-process key/value store.

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use kite_kernel::call::KvValue;
use kite_kernel::{HostError, HostErrorKind, KvStore, ScopeId};

type Key = (ScopeId, String, String);

/// [`KvStore`] backed by a concurrent map, partitioned by scope and namespace.
#[derive(Debug, Default)]
pub struct MemoryKvStore {
    entries: DashMap<Key, KvValue>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn key(scope: &ScopeId, namespace: &str, key: &str) -> Key {
        (scope.clone(), namespace.to_string(), key.to_string())
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn get(
        &self,
        scope: &ScopeId,
        namespace: &str,
        key: &str,
    ) -> Result<Option<KvValue>, HostError> {
        Ok(self
            .entries
            .get(&Self::key(scope, namespace, key))
            .map(|v| v.value().clone()))
    }

    async fn set(
        &self,
        scope: &ScopeId,
        namespace: &str,
        key: &str,
        value: KvValue,
    ) -> Result<(), HostError> {
        self.entries.insert(Self::key(scope, namespace, key), value);
        Ok(())
    }

    async fn delete(
        &self,
        scope: &ScopeId,
        namespace: &str,
        key: &str,
    ) -> Result<Option<KvValue>, HostError> {
        Ok(self
            .entries
            .remove(&Self::key(scope, namespace, key))
            .map(|(_, v)| v))
    }

    async fn increase(
        &self,
        scope: &ScopeId,
        namespace: &str,
        key: &str,
        increment: i64,
    ) -> Result<KvValue, HostError> {
        // The entry guard holds the shard lock, so the read-modify-write is atomic.
        match self.entries.entry(Self::key(scope, namespace, key)) {
            Entry::Vacant(slot) => {
                slot.insert(KvValue::Int(increment));
                Ok(KvValue::Int(increment))
            }
            Entry::Occupied(mut slot) => {
                let current = slot.get().as_int().ok_or_else(|| {
                    HostError::new(
                        HostErrorKind::KvValueTypeMismatch,
                        format!("cannot increase a {} value", slot.get().type_name()),
                    )
                })?;
                let next = current.checked_add(increment).ok_or_else(|| {
                    HostError::new(HostErrorKind::KvUnknown, "integer overflow")
                })?;
                slot.insert(KvValue::Int(next));
                Ok(KvValue::Int(next))
            }
        }
    }
}
