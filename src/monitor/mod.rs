pub mod cpu;
pub mod process;

use crate::error::SourceError;
use crate::model::{CpuSplit, Reading, TrackedProcess};
use cpu::CpuSplitReader;
use std::sync::Mutex;
use sysinfo::{ProcessesToUpdate, System};

/// Produces one raw reading of system CPU split and per-process usage.
///
/// Implementations report tracked processes that are not running with the
/// sentinel pair instead of failing, and may block on I/O for a short while.
pub trait SampleSource: Send + Sync {
    fn read(&self, tracked: &[TrackedProcess]) -> Result<Reading, SourceError>;
}

struct SourceState {
    sys: System,
    cpu: CpuSplitReader,
}

/// Reads the live machine: sysinfo for processes, the platform CPU split reader
/// for system-wide user/sys.
pub struct SystemSampleSource {
    state: Mutex<SourceState>,
}

impl SystemSampleSource {
    pub fn new() -> Self {
        let mut sys = System::new();
        // Prime the process table so the first reading has a cpu baseline
        sys.refresh_processes(ProcessesToUpdate::All, true);
        let mut cpu = CpuSplitReader::for_platform();
        if let Err(e) = cpu.read() {
            tracing::debug!("initial cpu split read failed: {e}");
        }
        Self {
            state: Mutex::new(SourceState { sys, cpu }),
        }
    }
}

impl Default for SystemSampleSource {
    fn default() -> Self {
        Self::new()
    }
}

impl SampleSource for SystemSampleSource {
    fn read(&self, tracked: &[TrackedProcess]) -> Result<Reading, SourceError> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());

        let system = match state.cpu.read() {
            Ok(split) => split,
            Err(e) => {
                tracing::warn!("system cpu split unavailable: {e}");
                CpuSplit::UNAVAILABLE
            }
        };

        state.sys.refresh_processes(ProcessesToUpdate::All, true);
        let rows = process::rows(&state.sys);

        Ok(Reading {
            system,
            per_process: process::collect(tracked, &rows),
        })
    }
}
