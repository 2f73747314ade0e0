use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

/// Marks a field whose process was not running or could not be measured.
pub const NOT_RUNNING: f64 = -1.0;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ProcessUsage {
    pub cpu_pct: f64,
    pub mem_bytes: f64,
}

impl ProcessUsage {
    pub const NOT_RUNNING: Self = Self {
        cpu_pct: NOT_RUNNING,
        mem_bytes: NOT_RUNNING,
    };

    pub fn is_running(&self) -> bool {
        self.cpu_pct >= 0.0 && self.mem_bytes >= 0.0
    }
}

impl Default for ProcessUsage {
    fn default() -> Self {
        Self::NOT_RUNNING
    }
}

/// System-wide CPU split in percent.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CpuSplit {
    pub user_pct: f64,
    pub sys_pct: f64,
}

impl CpuSplit {
    pub const UNAVAILABLE: Self = Self {
        user_pct: NOT_RUNNING,
        sys_pct: NOT_RUNNING,
    };
}

impl Default for CpuSplit {
    fn default() -> Self {
        Self::UNAVAILABLE
    }
}

/// A process the sampler looks for on every tick.
///
/// `key` names the wire fields (`<key>cpu`, `<key>mem`) and `pattern` is
/// matched case-insensitively against process names.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedProcess {
    pub key: String,
    pub pattern: String,
}

impl TrackedProcess {
    pub fn new(key: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            pattern: pattern.into(),
        }
    }

    pub fn defaults() -> Vec<Self> {
        vec![Self::new("ffx", "firefox-bin"), Self::new("saf", "safari")]
    }

    pub fn matches(&self, process_name: &str) -> bool {
        process_name
            .to_lowercase()
            .contains(&self.pattern.to_lowercase())
    }
}

/// Raw measurement from a source, before the controller numbers it.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Reading {
    pub system: CpuSplit,
    pub per_process: BTreeMap<String, ProcessUsage>,
}

impl Reading {
    /// Every field set to the sentinel, for ticks where the source failed outright.
    pub fn unavailable(tracked: &[TrackedProcess]) -> Self {
        Self {
            system: CpuSplit::UNAVAILABLE,
            per_process: tracked
                .iter()
                .map(|t| (t.key.clone(), ProcessUsage::NOT_RUNNING))
                .collect(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Sample {
    /// 1-based within a session; 0 for a one-off sample outside the loop.
    pub sample_number: u64,
    pub stamp: String,
    pub elapsed_secs: f64,
    pub system: CpuSplit,
    pub per_process: BTreeMap<String, ProcessUsage>,
}

impl Sample {
    pub fn new(sample_number: u64, elapsed_secs: f64, reading: Reading) -> Self {
        Self {
            sample_number,
            stamp: stamp_at(SystemTime::now()),
            elapsed_secs: elapsed_secs.max(0.0),
            system: reading.system,
            per_process: reading.per_process,
        }
    }

    /// Usage for a tracked key, or the sentinel pair if it was never reported.
    pub fn process(&self, key: &str) -> ProcessUsage {
        self.per_process.get(key).copied().unwrap_or_default()
    }
}

impl Serialize for Sample {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(5 + self.per_process.len() * 2))?;
        map.serialize_entry("sample", &self.sample_number)?;
        map.serialize_entry("stamp", &self.stamp)?;
        map.serialize_entry("time", &self.elapsed_secs)?;
        for (key, usage) in &self.per_process {
            map.serialize_entry(&format!("{key}cpu"), &usage.cpu_pct)?;
            map.serialize_entry(&format!("{key}mem"), &usage.mem_bytes)?;
        }
        map.serialize_entry("sys", &self.system.sys_pct)?;
        map.serialize_entry("user", &self.system.user_pct)?;
        map.end()
    }
}

/// Epoch seconds to millisecond precision with the decimal point dropped.
pub fn stamp_at(at: SystemTime) -> String {
    let secs = at
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64();
    format!("{secs:10.3}").replacen('.', "", 1)
}
