use crate::errors::CommandError;
use crate::value_entry::ValueEntry;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// The single logical database. Keys and values are arbitrary octet
/// sequences. All access goes through one lock with short critical
/// sections; no lock is ever held across I/O.
///
/// Expiration is lazy: a read that observes a dead entry removes it
/// and reports absence. KEYS additionally sweeps the whole table
/// before enumerating.
#[derive(Clone, Default)]
pub struct Keyspace {
    inner: Arc<RwLock<HashMap<Bytes, ValueEntry>>>,
}

impl Keyspace {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set(&self, key: Bytes, entry: ValueEntry) {
        self.inner.write().await.insert(key, entry);
    }

    pub async fn get(&self, key: &[u8]) -> Option<Bytes> {
        let mut map = self.inner.write().await;
        match map.get(key) {
            Some(entry) if entry.is_expired() => {
                map.remove(key);
                None
            }
            Some(entry) => Some(entry.value.clone()),
            None => None,
        }
    }

    /// Removes the given keys, returning how many live entries were
    /// actually deleted.
    pub async fn del(&self, keys: &[Bytes]) -> u64 {
        let mut map = self.inner.write().await;
        let mut removed = 0;
        for key in keys {
            if let Some(entry) = map.remove(key) {
                if !entry.is_expired() {
                    removed += 1;
                }
            }
        }
        removed
    }

    /// Increments the decimal integer stored at `key`, counting a
    /// missing or expired key as 0. The deadline of an existing entry
    /// is preserved.
    pub async fn incr(&self, key: &[u8]) -> Result<i64, CommandError> {
        let mut map = self.inner.write().await;
        let (current, expires_at) = match map.get(key) {
            Some(entry) if entry.is_expired() => (0, None),
            Some(entry) => {
                let text =
                    std::str::from_utf8(&entry.value).map_err(|_| CommandError::NotInteger)?;
                let parsed = text.parse::<i64>().map_err(|_| CommandError::NotInteger)?;
                (parsed, entry.expires_at())
            }
            None => (0, None),
        };
        let next = current.checked_add(1).ok_or(CommandError::NotInteger)?;
        map.insert(
            Bytes::copy_from_slice(key),
            ValueEntry::new_absolute(Bytes::from(next.to_string()), expires_at),
        );
        Ok(next)
    }

    /// All live keys. Expired entries are swept out before the
    /// enumeration so they can never appear in the reply.
    pub async fn keys(&self) -> Vec<Bytes> {
        let mut map = self.inner.write().await;
        map.retain(|_, entry| !entry.is_expired());
        map.keys().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }
}
