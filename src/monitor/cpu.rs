use crate::error::SourceError;
use crate::model::CpuSplit;
use std::path::PathBuf;
use std::process::Command;

/// Cumulative jiffies from the aggregate `cpu` line of `/proc/stat`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CpuTimes {
    pub user: u64,
    pub system: u64,
    pub total: u64,
}

/// Where the system-wide user/sys split comes from.
pub enum CpuSplitReader {
    /// Linux: deltas between consecutive reads of `/proc/stat`.
    ProcStat {
        path: PathBuf,
        prev: Option<CpuTimes>,
    },
    /// Everything else: the first line of `iostat -n 0` averages.
    Iostat,
}

impl CpuSplitReader {
    pub fn for_platform() -> Self {
        if cfg!(target_os = "linux") {
            Self::ProcStat {
                path: PathBuf::from("/proc/stat"),
                prev: None,
            }
        } else {
            Self::Iostat
        }
    }

    pub fn read(&mut self) -> Result<CpuSplit, SourceError> {
        match self {
            Self::ProcStat { path, prev } => {
                let text = std::fs::read_to_string(path.as_path())?;
                let now = parse_proc_stat(&text)?;
                // The first read has no baseline and reports the since-boot average.
                let split = split_between(prev.unwrap_or_default(), now);
                *prev = Some(now);
                Ok(split)
            }
            Self::Iostat => {
                let output = Command::new("iostat").args(["-n", "0"]).output()?;
                if !output.status.success() {
                    return Err(SourceError::Unavailable(format!(
                        "iostat exited with {}",
                        output.status
                    )));
                }
                parse_iostat(&String::from_utf8_lossy(&output.stdout))
            }
        }
    }
}

pub fn parse_proc_stat(text: &str) -> Result<CpuTimes, SourceError> {
    let line = text
        .lines()
        .find(|l| l.starts_with("cpu "))
        .ok_or_else(|| SourceError::Parse("missing cpu line in /proc/stat".to_string()))?;

    let fields: Vec<u64> = line
        .split_whitespace()
        .skip(1)
        .map(|f| f.parse::<u64>())
        .collect::<Result<_, _>>()
        .map_err(|e| SourceError::Parse(format!("/proc/stat cpu line: {e}")))?;
    if fields.len() < 4 {
        return Err(SourceError::Parse(format!(
            "/proc/stat cpu line has {} fields",
            fields.len()
        )));
    }

    let field = |i: usize| fields.get(i).copied().unwrap_or(0);
    // guest and guest_nice are already counted in user and nice
    let total: u64 = fields.iter().take(8).sum();
    Ok(CpuTimes {
        user: field(0) + field(1),
        system: field(2) + field(5) + field(6),
        total,
    })
}

pub fn split_between(prev: CpuTimes, now: CpuTimes) -> CpuSplit {
    let total = now.total.saturating_sub(prev.total);
    if total == 0 {
        return CpuSplit {
            user_pct: 0.0,
            sys_pct: 0.0,
        };
    }
    let user = now.user.saturating_sub(prev.user);
    let system = now.system.saturating_sub(prev.system);
    CpuSplit {
        user_pct: user as f64 / total as f64 * 100.0,
        sys_pct: system as f64 / total as f64 * 100.0,
    }
}

/// Reads `us` and `sy` from the last line of `iostat -n 0` output.
pub fn parse_iostat(text: &str) -> Result<CpuSplit, SourceError> {
    let line = text
        .lines()
        .rev()
        .find(|l| !l.trim().is_empty())
        .ok_or_else(|| SourceError::Parse("empty iostat output".to_string()))?;

    let mut numbers = line
        .split(|c: char| !c.is_ascii_digit())
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<f64>());

    match (numbers.next(), numbers.next()) {
        (Some(Ok(user)), Some(Ok(sys))) => Ok(CpuSplit {
            user_pct: user,
            sys_pct: sys,
        }),
        _ => Err(SourceError::Parse(format!("iostat line {line:?}"))),
    }
}
