//! Key/value ledger store contract and persisted record shapes.
//!
//! All persisted values are JSON-encoded strings under `USER_<name>` and
//! `SERVER_<id>` keys. The store itself promises nothing beyond get/set
//! by string key; every invariant is enforced by the reservation engine
//! on top of it.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::RwLock;

use api_types::GpuStatus;
use error_stack::Report;
use serde::Deserialize;
use serde::Serialize;

use crate::error::LedgerError;
use crate::error::LedgerResult;

/// Minimal key/value persistence contract.
pub trait KvStore: Send + Sync {
    /// Fetch the raw value stored under `key`, if any.
    fn get(&self, key: &str) -> LedgerResult<Option<String>>;

    /// Store `value` under `key`, overwriting any previous value.
    fn set(&self, key: &str, value: &str) -> LedgerResult<()>;
}

/// Persisted user record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    pub password: String,
    /// Non-negative booking credit, debited 1 per booked slot
    pub credit: u64,
    /// Server identities this user may operate
    pub server_list: Vec<String>,
}

/// One booking calendar entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookingEntry {
    pub username: String,
}

/// Per-GPU hourly booking calendar: gpu id -> hour timestamp -> entry.
///
/// Every hour key is truncated to an exact hour boundary. `BTreeMap`
/// keys give deterministic gpu-then-hour iteration order.
pub type BookEvent = BTreeMap<u32, BTreeMap<i64, BookingEntry>>;

/// Persisted server record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerRecord {
    pub password: String,
    /// Latest occupancy snapshot, overwritten wholesale on every push
    #[serde(default)]
    pub server_status: Vec<GpuStatus>,
    #[serde(default)]
    pub book_event: BookEvent,
    /// UNIX seconds of the latest snapshot push
    #[serde(default)]
    pub timestamp: i64,
}

pub fn user_key(username: &str) -> String {
    format!("USER_{username}")
}

pub fn server_key(server_id: &str) -> String {
    format!("SERVER_{server_id}")
}

/// Load and decode a user record, or fail with `UserNotFound`.
pub fn load_user(store: &dyn KvStore, username: &str) -> LedgerResult<UserRecord> {
    let raw = store
        .get(&user_key(username))?
        .ok_or_else(|| {
            Report::new(LedgerError::UserNotFound {
                username: username.to_string(),
            })
        })?;
    decode(&raw)
}

pub fn store_user(store: &dyn KvStore, username: &str, record: &UserRecord) -> LedgerResult<()> {
    store.set(&user_key(username), &encode(record)?)
}

/// Load and decode a server record, or fail with `ServerNotFound`.
pub fn load_server(store: &dyn KvStore, server_id: &str) -> LedgerResult<ServerRecord> {
    let raw = store
        .get(&server_key(server_id))?
        .ok_or_else(|| {
            Report::new(LedgerError::ServerNotFound {
                server_id: server_id.to_string(),
            })
        })?;
    decode(&raw)
}

pub fn store_server(
    store: &dyn KvStore,
    server_id: &str,
    record: &ServerRecord,
) -> LedgerResult<()> {
    store.set(&server_key(server_id), &encode(record)?)
}

fn encode<T: Serialize>(value: &T) -> LedgerResult<String> {
    serde_json::to_string(value).map_err(|e| {
        Report::new(LedgerError::MalformedInput {
            reason: format!("failed to encode record: {e}"),
        })
    })
}

fn decode<T: for<'de> Deserialize<'de>>(raw: &str) -> LedgerResult<T> {
    serde_json::from_str(raw).map_err(|e| {
        Report::new(LedgerError::MalformedInput {
            reason: format!("failed to decode stored record: {e}"),
        })
    })
}

/// In-memory store used by the daemon and in tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvStore for MemoryStore {
    fn get(&self, key: &str) -> LedgerResult<Option<String>> {
        let guard = self.inner.read().map_err(|e| {
            Report::new(LedgerError::StoreUnavailable {
                reason: format!("store lock poisoned: {e}"),
            })
        })?;
        Ok(guard.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> LedgerResult<()> {
        let mut guard = self.inner.write().map_err(|e| {
            Report::new(LedgerError::StoreUnavailable {
                reason: format!("store lock poisoned: {e}"),
            })
        })?;
        guard.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;

    fn sample_user() -> UserRecord {
        UserRecord {
            password: "pw".to_string(),
            credit: 3,
            server_list: vec!["S1".to_string()],
        }
    }

    #[test]
    fn user_record_round_trips() {
        let store = MemoryStore::new();
        let user = sample_user();

        store_user(&store, "alice", &user).expect("should store");
        let loaded = load_user(&store, "alice").expect("should load");

        assert_eq!(loaded, user);
    }

    #[test]
    fn missing_user_reports_user_not_found() {
        let store = MemoryStore::new();

        let err = load_user(&store, "ghost").expect_err("should be absent");

        assert!(matches!(
            err.current_context(),
            LedgerError::UserNotFound { username } if username == "ghost"
        ));
    }

    #[test]
    fn missing_server_reports_server_not_found() {
        let store = MemoryStore::new();

        let err = load_server(&store, "S9").expect_err("should be absent");

        assert!(matches!(
            err.current_context(),
            LedgerError::ServerNotFound { server_id } if server_id == "S9"
        ));
    }

    #[test]
    fn corrupted_value_reports_malformed_input() {
        let store = MemoryStore::new();
        store.set(&user_key("alice"), "not json").expect("should set");

        let err = load_user(&store, "alice").expect_err("should fail to decode");

        assert!(matches!(
            err.current_context(),
            LedgerError::MalformedInput { .. }
        ));
    }

    #[test]
    fn book_event_hour_keys_serialize_as_json_strings() {
        // The collaborator contract stores JSON objects, whose keys are
        // strings; integer map keys must survive the round trip.
        let mut record = ServerRecord {
            password: "pw".to_string(),
            server_status: Vec::new(),
            book_event: BookEvent::new(),
            timestamp: 0,
        };
        record.book_event.entry(0).or_default().insert(
            7_200,
            BookingEntry {
                username: "alice".to_string(),
            },
        );

        let json = serde_json::to_string(&record).expect("should serialize");
        assert!(json.contains(r#""7200""#), "hour key should be a string: {json}");

        let back: ServerRecord = serde_json::from_str(&json).expect("should deserialize");
        assert_eq!(back, record);
    }
}
