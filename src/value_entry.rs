use bytes::Bytes;
use std::time::{SystemTime, UNIX_EPOCH};

/// One stored value with an optional absolute deadline in epoch
/// milliseconds. Wall clock is used (not a monotonic instant) so
/// deadlines loaded from a snapshot and deadlines set via PX/EX share
/// one representation.
#[derive(Clone, Debug)]
pub struct ValueEntry {
    pub value: Bytes,
    expires_at: Option<u64>,
}

impl ValueEntry {
    /// Entry expiring `expiration_ms` milliseconds from now, or never.
    pub fn new_relative(value: Bytes, expiration_ms: Option<u64>) -> ValueEntry {
        let expires_at = expiration_ms.map(|ms| now_ms().saturating_add(ms));
        ValueEntry { value, expires_at }
    }

    /// Entry with an absolute epoch-millisecond deadline, or none.
    pub fn new_absolute(value: Bytes, expires_at: Option<u64>) -> ValueEntry {
        ValueEntry { value, expires_at }
    }

    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(deadline) => now_ms() > deadline,
            None => false,
        }
    }

    pub fn expires_at(&self) -> Option<u64> {
        self.expires_at
    }
}

pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
