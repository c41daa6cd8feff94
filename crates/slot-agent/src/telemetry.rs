//! NVML occupancy sampling.
//!
//! The coordinator only needs who is on which GPU; a failed sample must
//! never take the agent down, so every NVML error degrades to a warning
//! and an empty (or partial) snapshot.

use std::ffi::CStr;
use std::os::unix::fs::MetadataExt;

use api_types::GpuProcessInfo;
use api_types::GpuStatus;
use nvml_wrapper::enums::device::UsedGpuMemory;
use nvml_wrapper::Device;
use nvml_wrapper::Nvml;
use tracing::warn;

const BYTES_PER_MB: u64 = 1024 * 1024;

pub struct GpuSampler {
    nvml: Option<Nvml>,
}

impl GpuSampler {
    /// Initialize NVML; machines without a driver get a sampler that
    /// reports an empty snapshot.
    pub fn init() -> Self {
        match Nvml::init() {
            Ok(nvml) => Self { nvml: Some(nvml) },
            Err(e) => {
                warn!("NVML unavailable, reporting empty snapshots: {e}");
                Self { nvml: None }
            }
        }
    }

    /// Sample every visible GPU. Devices that fail to sample are skipped.
    pub fn sample(&self) -> Vec<GpuStatus> {
        let Some(nvml) = &self.nvml else {
            return Vec::new();
        };

        let count = match nvml.device_count() {
            Ok(count) => count,
            Err(e) => {
                warn!("failed to enumerate GPUs: {e}");
                return Vec::new();
            }
        };

        let mut statuses = Vec::with_capacity(count as usize);
        for index in 0..count {
            match sample_device(nvml, index) {
                Ok(status) => statuses.push(status),
                Err(e) => warn!(gpu_id = index, "failed to sample GPU: {e}"),
            }
        }
        statuses
    }
}

fn sample_device(nvml: &Nvml, index: u32) -> Result<GpuStatus, nvml_wrapper::error::NvmlError> {
    let device = nvml.device_by_index(index)?;
    let memory = device.memory_info()?;
    let utilization = device.utilization_rates()?;

    Ok(GpuStatus {
        gpu_id: index,
        name: device.name()?,
        memory_total_mb: memory.total / BYTES_PER_MB,
        memory_used_mb: memory.used / BYTES_PER_MB,
        utilization_percent: utilization.gpu,
        processes: sample_processes(&device)?,
    })
}

fn sample_processes(device: &Device) -> Result<Vec<GpuProcessInfo>, nvml_wrapper::error::NvmlError> {
    let mut processes = Vec::new();
    for info in device.running_compute_processes()? {
        let used_memory_mb = match info.used_gpu_memory {
            UsedGpuMemory::Used(bytes) => bytes / BYTES_PER_MB,
            UsedGpuMemory::Unavailable => 0,
        };
        processes.push(GpuProcessInfo {
            pid: info.pid,
            user: process_user(info.pid),
            process_name: process_name(info.pid),
            used_memory_mb,
        });
    }
    Ok(processes)
}

/// Owner of `/proc/<pid>`, resolved to a username when the uid is known.
fn process_user(pid: u32) -> String {
    match std::fs::metadata(format!("/proc/{pid}")) {
        Ok(metadata) => username_for_uid(metadata.uid()),
        Err(_) => "unknown".to_string(),
    }
}

fn username_for_uid(uid: u32) -> String {
    let mut buf = vec![0u8; 1024];
    let mut passwd: libc::passwd = unsafe { std::mem::zeroed() };
    let mut result: *mut libc::passwd = std::ptr::null_mut();

    let rc = unsafe {
        libc::getpwuid_r(
            uid,
            &mut passwd,
            buf.as_mut_ptr().cast::<libc::c_char>(),
            buf.len(),
            &mut result,
        )
    };
    if rc == 0 && !result.is_null() {
        let name = unsafe { CStr::from_ptr(passwd.pw_name) };
        return name.to_string_lossy().into_owned();
    }
    uid.to_string()
}

fn process_name(pid: u32) -> String {
    std::fs::read_to_string(format!("/proc/{pid}/comm"))
        .map(|comm| comm.trim_end().to_string())
        .unwrap_or_else(|_| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_uid_resolves_to_root() {
        assert_eq!(username_for_uid(0), "root");
    }

    #[test]
    fn unknown_uid_falls_back_to_the_number() {
        // uid picked well above any plausible passwd entry
        assert_eq!(username_for_uid(3_999_999_999), "3999999999");
    }

    #[test]
    fn own_process_has_a_name_and_user() {
        let pid = std::process::id();

        assert!(!process_name(pid).is_empty());
        assert_ne!(process_user(pid), "unknown");
    }

    #[test]
    fn sampler_without_nvml_reports_empty() {
        let sampler = GpuSampler { nvml: None };

        assert!(sampler.sample().is_empty());
    }
}
