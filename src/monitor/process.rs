use crate::model::{ProcessUsage, TrackedProcess};
use std::collections::BTreeMap;
use sysinfo::System;

/// One row of the process table, reduced to what the sampler reports.
#[derive(Clone, Debug, PartialEq)]
pub struct ProcessRow {
    pub name: String,
    pub cpu_pct: f32,
    pub mem_bytes: u64,
}

pub fn rows(sys: &System) -> Vec<ProcessRow> {
    sys.processes()
        .values()
        // Linux lists threads as tasks; count each process once
        .filter(|p| p.thread_kind().is_none())
        .map(|p| ProcessRow {
            name: p.name().to_string_lossy().to_string(),
            cpu_pct: p.cpu_usage(),
            mem_bytes: p.memory(),
        })
        .collect()
}

/// Sums every row matching each tracked pattern. Patterns with no match get
/// the not-running sentinel.
pub fn collect(tracked: &[TrackedProcess], rows: &[ProcessRow]) -> BTreeMap<String, ProcessUsage> {
    tracked
        .iter()
        .map(|t| {
            let usage = rows
                .iter()
                .filter(|r| t.matches(&r.name))
                .fold(None, |acc: Option<ProcessUsage>, r| {
                    let prev = acc.unwrap_or(ProcessUsage {
                        cpu_pct: 0.0,
                        mem_bytes: 0.0,
                    });
                    Some(ProcessUsage {
                        cpu_pct: prev.cpu_pct + r.cpu_pct as f64,
                        mem_bytes: prev.mem_bytes + r.mem_bytes as f64,
                    })
                })
                .unwrap_or(ProcessUsage::NOT_RUNNING);
            (t.key.clone(), usage)
        })
        .collect()
}
