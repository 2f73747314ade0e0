pub mod config;
pub mod controller;
pub mod error;
pub mod model;
pub mod monitor;
pub mod service;

pub use config::ProfilerConfig;
pub use controller::{Completion, Delivery, SamplingController, MAX_SAMPLES};
pub use error::{ConfigError, ProfilerError, Result, SourceError};
pub use model::{CpuSplit, ProcessUsage, Reading, Sample, TrackedProcess, NOT_RUNNING};
pub use monitor::{SampleSource, SystemSampleSource};
pub use service::{BrowserProfiler, ServiceError, StartArgs};
