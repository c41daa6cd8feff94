//! Reservation engine.
//!
//! Owns every mutation of the booking calendar and the credit ledger.
//! The engine keeps no authoritative state of its own; each operation
//! is a read-modify-write cycle against the [`KvStore`], serialized per
//! record through a keyed lock so concurrent bookings of the same slot
//! cannot both succeed and credit is never double-debited.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::Arc;

use api_types::GpuStatus;
use api_types::ServerDetail;
use api_types::SlotView;
use api_types::StatusReport;
use api_types::UserStatus;
use error_stack::Report;
use tracing::info;
use tracing::warn;

use crate::enforcement::compute_kill_list;
use crate::enforcement::KillPolicy;
use crate::error::LedgerError;
use crate::error::LedgerResult;
use crate::hours::display_time;
use crate::hours::is_hour_aligned;
use crate::hours::slot_window;
use crate::hours::DEFAULT_DISPLAY_OFFSET_HOURS;
use crate::keyed_lock::KeyedAsyncLock;
use crate::store::load_server;
use crate::store::load_user;
use crate::store::server_key;
use crate::store::store_server;
use crate::store::store_user;
use crate::store::user_key;
use crate::store::BookingEntry;
use crate::store::KvStore;
use crate::store::ServerRecord;
use crate::store::UserRecord;

/// Reservation ledger over a key/value store.
pub struct ReservationLedger {
    store: Arc<dyn KvStore>,
    locks: KeyedAsyncLock<String>,
    policy: KillPolicy,
    display_offset_hours: i32,
}

impl ReservationLedger {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self {
            store,
            locks: KeyedAsyncLock::new(),
            policy: KillPolicy::default(),
            display_offset_hours: DEFAULT_DISPLAY_OFFSET_HOURS,
        }
    }

    /// Set the enforcement policy.
    pub fn with_policy(mut self, policy: KillPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Set the fixed UTC offset used for calendar display times.
    pub fn with_display_offset(mut self, offset_hours: i32) -> Self {
        self.display_offset_hours = offset_hours;
        self
    }

    /// Book one GPU hour slot for `caller`.
    ///
    /// Succeeds only if the caller is scoped to the server, the slot is
    /// free and the caller holds at least one credit. Debit and calendar
    /// insert are all-or-nothing from the caller's point of view.
    pub async fn book(
        &self,
        server_id: &str,
        gpu_id: u32,
        hour_ts: i64,
        caller: &str,
    ) -> LedgerResult<()> {
        if !is_hour_aligned(hour_ts) {
            return Err(Report::new(LedgerError::MalformedInput {
                reason: format!("timestamp {hour_ts} is not hour-aligned"),
            }));
        }

        // Lock order is server then user, same as unbook.
        let _server_guard = self.locks.lock(&server_key(server_id)).await;
        let _user_guard = self.locks.lock(&user_key(caller)).await;

        let mut user = load_user(self.store.as_ref(), caller)?;
        if !user.server_list.iter().any(|s| s == server_id) {
            return Err(Report::new(LedgerError::Unauthorized {
                reason: format!("{caller} is not authorized for server {server_id}"),
            }));
        }

        let mut server = load_server(self.store.as_ref(), server_id)?;
        // A GPU is known through provisioning or a snapshot; anything
        // else is an unbookable phantom slot.
        let known = server.book_event.contains_key(&gpu_id)
            || server.server_status.iter().any(|gpu| gpu.gpu_id == gpu_id);
        if !known {
            return Err(Report::new(LedgerError::MalformedInput {
                reason: format!("server {server_id} has no gpu {gpu_id}"),
            }));
        }
        if server
            .book_event
            .get(&gpu_id)
            .is_some_and(|slots| slots.contains_key(&hour_ts))
        {
            return Err(Report::new(LedgerError::SlotConflict {
                gpu_id,
                timestamp: hour_ts,
            }));
        }

        if user.credit == 0 {
            return Err(Report::new(LedgerError::InsufficientCredit));
        }

        user.credit -= 1;
        store_user(self.store.as_ref(), caller, &user)?;

        server.book_event.entry(gpu_id).or_default().insert(
            hour_ts,
            BookingEntry {
                username: caller.to_string(),
            },
        );
        if let Err(e) = store_server(self.store.as_ref(), server_id, &server) {
            // Compensating step: hand the debited credit back before
            // surfacing the store failure.
            user.credit += 1;
            if let Err(refund_err) = store_user(self.store.as_ref(), caller, &user) {
                warn!(caller, error = %refund_err, "credit refund failed after calendar write failure");
            }
            return Err(e);
        }

        info!(server_id, gpu_id, timestamp = hour_ts, caller, "slot booked");
        Ok(())
    }

    /// Release a slot previously booked by `caller` and refund 1 credit.
    pub async fn unbook(
        &self,
        server_id: &str,
        gpu_id: u32,
        hour_ts: i64,
        caller: &str,
    ) -> LedgerResult<()> {
        let _server_guard = self.locks.lock(&server_key(server_id)).await;
        let _user_guard = self.locks.lock(&user_key(caller)).await;

        let mut server = load_server(self.store.as_ref(), server_id)?;
        let entry = server
            .book_event
            .get(&gpu_id)
            .and_then(|slots| slots.get(&hour_ts))
            .ok_or(LedgerError::NotBooked {
                gpu_id,
                timestamp: hour_ts,
            })?;
        if entry.username != caller {
            return Err(Report::new(LedgerError::Unauthorized {
                reason: "only the booker can unbook the slot".to_string(),
            }));
        }

        let mut user = load_user(self.store.as_ref(), caller)?;

        let removed = server
            .book_event
            .get_mut(&gpu_id)
            .and_then(|slots| slots.remove(&hour_ts));
        store_server(self.store.as_ref(), server_id, &server)?;

        user.credit += 1;
        if let Err(e) = store_user(self.store.as_ref(), caller, &user) {
            // Compensating step: put the booking back so slot and credit
            // stay consistent with each other.
            if let Some(entry) = removed {
                server
                    .book_event
                    .entry(gpu_id)
                    .or_default()
                    .insert(hour_ts, entry);
                if let Err(restore_err) = store_server(self.store.as_ref(), server_id, &server) {
                    warn!(server_id, error = %restore_err, "calendar restore failed after credit write failure");
                }
            }
            return Err(e);
        }

        info!(server_id, gpu_id, timestamp = hour_ts, caller, "slot unbooked");
        Ok(())
    }

    /// Rolling 48-slot calendar plus the latest snapshot.
    ///
    /// Pure read: covers every GPU the server knows about, whether it
    /// appears in the calendar or only in the latest snapshot.
    pub async fn list_bookings(&self, server_id: &str, now: i64) -> LedgerResult<ServerDetail> {
        let server = load_server(self.store.as_ref(), server_id)?;

        let mut gpu_ids: BTreeSet<u32> = server.book_event.keys().copied().collect();
        gpu_ids.extend(server.server_status.iter().map(|gpu| gpu.gpu_id));

        let mut slots = BTreeMap::new();
        for gpu_id in gpu_ids {
            let calendar = server.book_event.get(&gpu_id);
            let views: Vec<SlotView> = slot_window(now)
                .map(|slot_ts| SlotView {
                    timestamp: slot_ts,
                    display_time: display_time(slot_ts, self.display_offset_hours),
                    booked_by: calendar
                        .and_then(|c| c.get(&slot_ts))
                        .map(|entry| entry.username.clone())
                        .unwrap_or_default(),
                })
                .collect();
            slots.insert(gpu_id, views);
        }

        Ok(ServerDetail {
            server_id: server_id.to_string(),
            server_status: server.server_status,
            slots,
        })
    }

    /// Overwrite the stored occupancy snapshot for `server_id`.
    pub async fn report_status(&self, server_id: &str, report: StatusReport) -> LedgerResult<()> {
        validate_snapshot(&report.server_status)?;

        let _server_guard = self.locks.lock(&server_key(server_id)).await;

        let mut server = load_server(self.store.as_ref(), server_id)?;
        server.server_status = report.server_status;
        server.timestamp = report.timestamp;
        store_server(self.store.as_ref(), server_id, &server)?;

        info!(
            server_id,
            timestamp = server.timestamp,
            gpus = server.server_status.len(),
            "occupancy snapshot stored"
        );
        Ok(())
    }

    /// The stored snapshot and its push timestamp.
    pub async fn snapshot(&self, server_id: &str) -> LedgerResult<(Vec<GpuStatus>, i64)> {
        let server = load_server(self.store.as_ref(), server_id)?;
        Ok((server.server_status, server.timestamp))
    }

    /// Recompute the kill-list for `server_id` at time `now`.
    ///
    /// Nothing about a kill is persisted; every poll re-derives the list
    /// from the stored calendar and snapshot.
    pub async fn kill_list(&self, server_id: &str, now: i64) -> LedgerResult<Vec<u32>> {
        let server = load_server(self.store.as_ref(), server_id)?;
        let pids = compute_kill_list(&server.book_event, &server.server_status, now, self.policy);
        if !pids.is_empty() {
            info!(server_id, ?pids, "kill list computed");
        }
        Ok(pids)
    }

    /// Check a user's password against the stored record.
    pub async fn authenticate_user(&self, username: &str, password: &str) -> LedgerResult<()> {
        let user = load_user(self.store.as_ref(), username)
            .map_err(|_| auth_failure("invalid username or password"))?;
        if user.password != password {
            return Err(auth_failure("invalid username or password"));
        }
        Ok(())
    }

    /// Check an agent's server password against the stored record.
    pub async fn authenticate_server(&self, server_id: &str, password: &str) -> LedgerResult<()> {
        let server = load_server(self.store.as_ref(), server_id)
            .map_err(|_| auth_failure("invalid server id or password"))?;
        if server.password != password {
            return Err(auth_failure("invalid server id or password"));
        }
        Ok(())
    }

    /// Credit balance and scope of one user.
    pub async fn user_status(&self, username: &str) -> LedgerResult<UserStatus> {
        let user = load_user(self.store.as_ref(), username)?;
        Ok(UserStatus {
            username: username.to_string(),
            credit: user.credit,
            server_list: user.server_list,
        })
    }

    /// The server identities `caller` may operate.
    pub async fn authorized_servers(&self, caller: &str) -> LedgerResult<Vec<String>> {
        Ok(load_user(self.store.as_ref(), caller)?.server_list)
    }

    /// Seed a user record. Provisioning is external to the core
    /// invariants; existing records are overwritten.
    pub async fn provision_user(
        &self,
        username: &str,
        password: &str,
        credit: u64,
        server_list: Vec<String>,
    ) -> LedgerResult<()> {
        let _guard = self.locks.lock(&user_key(username)).await;
        store_user(
            self.store.as_ref(),
            username,
            &UserRecord {
                password: password.to_string(),
                credit,
                server_list,
            },
        )
    }

    /// Seed a server record with an empty calendar for `gpu_ids`.
    pub async fn provision_server(
        &self,
        server_id: &str,
        password: &str,
        gpu_ids: Vec<u32>,
    ) -> LedgerResult<()> {
        let _guard = self.locks.lock(&server_key(server_id)).await;
        let mut record = ServerRecord {
            password: password.to_string(),
            server_status: Vec::new(),
            book_event: BTreeMap::new(),
            timestamp: 0,
        };
        for gpu_id in gpu_ids {
            record.book_event.entry(gpu_id).or_default();
        }
        store_server(self.store.as_ref(), server_id, &record)
    }
}

fn auth_failure(reason: &str) -> Report<LedgerError> {
    Report::new(LedgerError::Unauthorized {
        reason: reason.to_string(),
    })
}

/// Validate an incoming snapshot at the system boundary.
fn validate_snapshot(server_status: &[GpuStatus]) -> LedgerResult<()> {
    let mut seen = BTreeSet::new();
    for gpu in server_status {
        if !seen.insert(gpu.gpu_id) {
            return Err(Report::new(LedgerError::MalformedInput {
                reason: format!("duplicate gpu_id {} in snapshot", gpu.gpu_id),
            }));
        }
        if gpu.utilization_percent > 100 {
            return Err(Report::new(LedgerError::MalformedInput {
                reason: format!(
                    "gpu {} utilization {}% out of range",
                    gpu.gpu_id, gpu.utilization_percent
                ),
            }));
        }
        if gpu.memory_used_mb > gpu.memory_total_mb {
            return Err(Report::new(LedgerError::MalformedInput {
                reason: format!("gpu {} memory used exceeds total", gpu.gpu_id),
            }));
        }
    }
    Ok(())
}
