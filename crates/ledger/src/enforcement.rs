//! Enforcement decision engine.
//!
//! Derives the authoritative kill-list for one server from its latest
//! occupancy snapshot and its booking calendar. Pure function of its
//! inputs: nothing is persisted and repeated evaluation over identical
//! inputs yields an identical list, so agents may poll as often as they
//! like before acting.

use api_types::GpuStatus;

use crate::hours::hour_floor;
use crate::store::BookEvent;

/// Enforcement policy knobs.
#[derive(Debug, Clone, Copy, Default)]
pub struct KillPolicy {
    /// When set, processes whose reported owner matches the booking
    /// owner are spared. Off by default: a reservation makes the whole
    /// GPU exclusive regardless of who is running on it.
    pub spare_owner: bool,
}

/// Compute the pids a server's agent must terminate at time `now`.
///
/// A GPU is exclusively reserved for the hour containing `now` iff its
/// calendar holds an entry at that hour boundary. Every process on a
/// reserved GPU is listed, in ascending gpu id then snapshot process
/// order. GPUs without calendar entries are unrestricted.
pub fn compute_kill_list(
    book_event: &BookEvent,
    server_status: &[GpuStatus],
    now: i64,
    policy: KillPolicy,
) -> Vec<u32> {
    let hour = hour_floor(now);

    let mut gpus: Vec<&GpuStatus> = server_status.iter().collect();
    gpus.sort_by_key(|gpu| gpu.gpu_id);

    let mut pids = Vec::new();
    for gpu in gpus {
        let Some(entry) = book_event.get(&gpu.gpu_id).and_then(|slots| slots.get(&hour)) else {
            continue;
        };
        for process in &gpu.processes {
            if policy.spare_owner && process.user == entry.username {
                continue;
            }
            pids.push(process.pid);
        }
    }
    pids
}

#[cfg(test)]
mod tests {
    use api_types::GpuProcessInfo;
    use similar_asserts::assert_eq;

    use super::*;
    use crate::store::BookingEntry;

    const HOUR: i64 = 1_700_000_000 - 1_700_000_000 % 3600;

    fn gpu(gpu_id: u32, pids: &[(u32, &str)]) -> GpuStatus {
        GpuStatus {
            gpu_id,
            name: "test-gpu".to_string(),
            memory_total_mb: 16_384,
            memory_used_mb: 2_048,
            utilization_percent: 50,
            processes: pids
                .iter()
                .map(|(pid, user)| GpuProcessInfo {
                    pid: *pid,
                    user: (*user).to_string(),
                    process_name: "python".to_string(),
                    used_memory_mb: 1_024,
                })
                .collect(),
        }
    }

    fn booked(entries: &[(u32, i64, &str)]) -> BookEvent {
        let mut book_event = BookEvent::new();
        for (gpu_id, ts, user) in entries {
            book_event.entry(*gpu_id).or_default().insert(
                *ts,
                BookingEntry {
                    username: (*user).to_string(),
                },
            );
        }
        book_event
    }

    #[test]
    fn reserved_gpu_lists_every_resident_process() {
        let book_event = booked(&[(0, HOUR, "alice")]);
        let status = vec![gpu(0, &[(4242, "bob"), (4243, "carol")])];

        let pids = compute_kill_list(&book_event, &status, HOUR + 120, KillPolicy::default());

        assert_eq!(pids, vec![4242, 4243]);
    }

    #[test]
    fn unreserved_gpu_yields_no_candidates() {
        let book_event = BookEvent::new();
        let status = vec![gpu(0, &[(4242, "bob")])];

        let pids = compute_kill_list(&book_event, &status, HOUR, KillPolicy::default());

        assert!(pids.is_empty());
    }

    #[test]
    fn reservation_outside_current_hour_does_not_enforce() {
        let book_event = booked(&[(0, HOUR + 3600, "alice")]);
        let status = vec![gpu(0, &[(4242, "bob")])];

        let pids = compute_kill_list(&book_event, &status, HOUR, KillPolicy::default());

        assert!(pids.is_empty());
    }

    #[test]
    fn booked_but_idle_gpu_yields_no_kills() {
        let book_event = booked(&[(0, HOUR, "alice")]);
        let status = vec![gpu(0, &[])];

        let pids = compute_kill_list(&book_event, &status, HOUR, KillPolicy::default());

        assert!(pids.is_empty());
    }

    #[test]
    fn output_is_ordered_by_gpu_then_process() {
        let book_event = booked(&[(0, HOUR, "alice"), (2, HOUR, "alice")]);
        // Snapshot arrives with gpus out of order.
        let status = vec![
            gpu(2, &[(9_001, "bob")]),
            gpu(1, &[(5_000, "bob")]),
            gpu(0, &[(4242, "bob"), (4243, "bob")]),
        ];

        let pids = compute_kill_list(&book_event, &status, HOUR, KillPolicy::default());

        assert_eq!(pids, vec![4242, 4243, 9_001]);
    }

    #[test]
    fn recomputation_over_identical_inputs_is_identical() {
        let book_event = booked(&[(0, HOUR, "alice"), (1, HOUR, "bob")]);
        let status = vec![gpu(0, &[(1, "x"), (2, "y")]), gpu(1, &[(3, "z")])];

        let first = compute_kill_list(&book_event, &status, HOUR + 59, KillPolicy::default());
        let second = compute_kill_list(&book_event, &status, HOUR + 59, KillPolicy::default());

        assert_eq!(first, second);
        assert_eq!(first, vec![1, 2, 3]);
    }

    #[test]
    fn spare_owner_policy_whitelists_the_bookers_processes() {
        let book_event = booked(&[(0, HOUR, "alice")]);
        let status = vec![gpu(0, &[(4242, "alice"), (4243, "bob")])];

        let pids = compute_kill_list(&book_event, &status, HOUR, KillPolicy { spare_owner: true });

        assert_eq!(pids, vec![4243]);
    }
}
