//! Shared API type definitions
//!
//! This crate contains the wire types exchanged between the coordinator
//! daemon and the per-machine agents and interactive clients: occupancy
//! snapshots, booking calendar views, login payloads and the common
//! response envelope.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;

/// A single process resident on a GPU, as reported by an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GpuProcessInfo {
    /// Host PID of the process
    pub pid: u32,
    /// Owning system user, `"unknown"` when the agent cannot resolve it
    pub user: String,
    /// Executable name
    pub process_name: String,
    /// GPU memory used by this process in MiB
    pub used_memory_mb: u64,
}

/// Point-in-time state of one GPU, part of an occupancy snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GpuStatus {
    /// Device index on the reporting machine
    pub gpu_id: u32,
    /// Device name, e.g. "NVIDIA A100-SXM4-40GB"
    pub name: String,
    /// Total device memory in MiB
    pub memory_total_mb: u64,
    /// Used device memory in MiB
    pub memory_used_mb: u64,
    /// Device utilization in percent
    pub utilization_percent: u32,
    /// Processes currently resident on this GPU
    pub processes: Vec<GpuProcessInfo>,
}

/// Occupancy snapshot pushed by an agent.
///
/// The coordinator overwrites the stored snapshot wholesale on every
/// push; there is no merging and no sequence numbering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    /// Per-GPU state, in device index order
    pub server_status: Vec<GpuStatus>,
    /// UNIX seconds at which the agent took the snapshot
    pub timestamp: i64,
}

/// Kill-list returned to a polling agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KillListResponse {
    /// PIDs the agent must terminate, in deterministic order
    pub killing_pid_list: Vec<u32>,
}

/// One hour slot of a GPU booking calendar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotView {
    /// Hour-aligned UNIX timestamp of the slot
    pub timestamp: i64,
    /// Site-local display time, `%m-%d %H:%M`
    pub display_time: String,
    /// Booking owner, empty string when the slot is free
    pub booked_by: String,
}

/// Rolling 48-hour calendar plus the latest snapshot for one server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerDetail {
    pub server_id: String,
    /// Latest occupancy snapshot
    pub server_status: Vec<GpuStatus>,
    /// Per-GPU slot views, 48 entries each starting at the current hour
    pub slots: BTreeMap<u32, Vec<SlotView>>,
}

/// Server identities the calling user may operate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerListResponse {
    pub server_list: Vec<String>,
}

/// Credit balance and scope of one user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserStatus {
    pub username: String,
    pub credit: u64,
    pub server_list: Vec<String>,
}

/// Login request for both users and agents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    /// Username or server identity
    pub id: String,
    pub password: String,
}

/// Session capability returned by a successful login.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginResponse {
    pub token: String,
}

/// Common response envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    /// Whether the request was successful
    pub success: bool,
    /// Payload, present when successful
    pub data: Option<T>,
    /// Human-readable message
    pub message: String,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T, message: impl Into<String>) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: message.into(),
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;

    fn sample_status() -> GpuStatus {
        GpuStatus {
            gpu_id: 0,
            name: "NVIDIA A100-SXM4-40GB".to_string(),
            memory_total_mb: 40_960,
            memory_used_mb: 1_024,
            utilization_percent: 17,
            processes: vec![GpuProcessInfo {
                pid: 4242,
                user: "alice".to_string(),
                process_name: "python".to_string(),
                used_memory_mb: 1_000,
            }],
        }
    }

    #[test]
    fn status_report_round_trips_through_json() {
        let report = StatusReport {
            server_status: vec![sample_status()],
            timestamp: 1_700_000_000,
        };

        let json = serde_json::to_string(&report).expect("should serialize");
        let back: StatusReport = serde_json::from_str(&json).expect("should deserialize");

        assert_eq!(back, report);
    }

    #[test]
    fn status_report_rejects_missing_fields() {
        // A snapshot without a pid is malformed, not partially usable.
        let json = r#"{"server_status":[{"gpu_id":0,"name":"x","memory_total_mb":1,
            "memory_used_mb":0,"utilization_percent":0,
            "processes":[{"user":"a","process_name":"p","used_memory_mb":1}]}],
            "timestamp":0}"#;

        let parsed = serde_json::from_str::<StatusReport>(json);

        assert!(parsed.is_err(), "missing pid should fail deserialization");
    }

    #[test]
    fn response_envelope_constructors() {
        let ok = ApiResponse::ok(7u32, "done");
        assert!(ok.success);
        assert_eq!(ok.data, Some(7));

        let err = ApiResponse::<u32>::err("nope");
        assert!(!err.success);
        assert!(err.data.is_none());
        assert_eq!(err.message, "nope");
    }
}
