//! The three-verb surface (`start`, `stop`, `sample`) exposed to outside callers,
//! plus the descriptor that documents it.

use crate::config::ProfilerConfig;
use crate::controller::{Completion, Delivery, SampleCallback, SamplingController};
use crate::error::ProfilerError;
use crate::model::Sample;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub const SERVICE_NAME: &str = "BrowserProfiler";
pub const VERSION: (u32, u32, u32) = (0, 0, 6);

pub const ALREADY_STARTED: &str = "alreadyStarted";
pub const UNKNOWN_FUNCTION: &str = "unknownFunction";
pub const INVALID_ARGUMENTS: &str = "invalidArguments";
pub const SAMPLE_FAILED: &str = "sampleFailed";

/// Structured failure reported back through an operation's result.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("{code}: {message}")]
pub struct ServiceError {
    pub code: String,
    pub message: String,
}

impl ServiceError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

impl From<ProfilerError> for ServiceError {
    fn from(e: ProfilerError) -> Self {
        match e {
            ProfilerError::AlreadyRunning => Self::new(
                ALREADY_STARTED,
                "you tried to start another sampling process, but we're already sampling",
            ),
            other => Self::new(SAMPLE_FAILED, other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StartArgs {
    #[serde(default)]
    pub interval: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArgumentDescriptor {
    pub name: &'static str,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub required: bool,
    pub documentation: &'static str,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FunctionDescriptor {
    pub name: &'static str,
    pub documentation: &'static str,
    pub arguments: Vec<ArgumentDescriptor>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceDescriptor {
    pub name: &'static str,
    pub major_version: u32,
    pub minor_version: u32,
    pub micro_version: u32,
    pub documentation: String,
    pub functions: Vec<FunctionDescriptor>,
}

pub fn describe() -> ServiceDescriptor {
    let documentation = [
        "A service that analyzes the memory and cpu usage of a web browser. ",
        "The service can take 1 sample or multiple samples at a specified interval. ",
        "When sampling at intervals, at most 1,000 samples are taken. If you provide ",
        "a callback, it is called after every sample is taken. ",
        "If no callback is provided, all samples are stored and returned after start() ",
        "completes or stop() is called.\n",
        "The sample object is a map with the following keys (most values are floats):\n",
        "[sample] - the sample number (1-1,000), or 0 for a one-off sample()\n",
        "[stamp]  - wall clock time in milliseconds since the epoch, as a string\n",
        "[time]   - the offset time in seconds of when the sample was taken\n",
        "[sys]    - the percentage CPU \"sys\" processes are using\n",
        "[user]   - the percentage CPU \"user\" processes are using\n",
        "[<key>cpu] - the percentage CPU a tracked browser is using, or -1.0 if it is not running\n",
        "[<key>mem] - the resident memory in bytes a tracked browser is using, or -1.0 if it is not running\n",
        "The default keys are ffx (Firefox) and saf (Safari).\n",
    ]
    .concat();

    ServiceDescriptor {
        name: SERVICE_NAME,
        major_version: VERSION.0,
        minor_version: VERSION.1,
        micro_version: VERSION.2,
        documentation,
        functions: vec![
            FunctionDescriptor {
                name: "start",
                documentation: "Takes samples of memory/cpu every 'interval' seconds. \
                                Calls the supplied callback with each sample, or stores them until stop.",
                arguments: vec![
                    ArgumentDescriptor {
                        name: "interval",
                        kind: "double",
                        required: false,
                        documentation: "The sample time in seconds (default 1.0, minimum 0.1).",
                    },
                    ArgumentDescriptor {
                        name: "callback",
                        kind: "callback",
                        required: false,
                        documentation: "Invoked with every sample as it is taken.",
                    },
                ],
            },
            FunctionDescriptor {
                name: "stop",
                documentation: "Stop taking samples. Passes back the array of all samples.",
                arguments: Vec::new(),
            },
            FunctionDescriptor {
                name: "sample",
                documentation: "Returns a single sample.",
                arguments: Vec::new(),
            },
        ],
    }
}

pub struct BrowserProfiler {
    controller: SamplingController,
}

impl BrowserProfiler {
    pub fn new(controller: SamplingController) -> Self {
        Self { controller }
    }

    pub fn from_config(config: &ProfilerConfig) -> Self {
        Self::new(SamplingController::from_config(config))
    }

    pub fn controller(&self) -> &SamplingController {
        &self.controller
    }

    pub fn start(
        &self,
        args: StartArgs,
        callback: Option<SampleCallback>,
    ) -> Result<Completion, ServiceError> {
        let delivery = match callback {
            Some(callback) => Delivery::Streaming(callback),
            None => Delivery::Buffered,
        };
        Ok(self.controller.start(args.interval, delivery)?)
    }

    pub fn stop(&self) -> Vec<Sample> {
        self.controller.stop()
    }

    pub fn sample(&self) -> Result<Sample, ServiceError> {
        Ok(self.controller.sample_once()?)
    }

    /// Dispatches a call by name with JSON arguments.
    ///
    /// `start` through this path always buffers; its result is `null` and the
    /// samples come back from `stop`.
    pub fn invoke(&self, function: &str, args: &Value) -> Result<Value, ServiceError> {
        match function {
            "start" => {
                let args = parse_args::<StartArgs>(args)?;
                self.start(args, None)?;
                Ok(Value::Null)
            }
            "stop" => to_value(&self.stop()),
            "sample" => to_value(&self.sample()?),
            other => Err(ServiceError::new(
                UNKNOWN_FUNCTION,
                format!("{SERVICE_NAME} has no function named {other:?}"),
            )),
        }
    }
}

fn parse_args<T: Default + for<'de> Deserialize<'de>>(args: &Value) -> Result<T, ServiceError> {
    if args.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(args.clone()).map_err(|e| ServiceError::new(INVALID_ARGUMENTS, e.to_string()))
}

fn to_value<T: Serialize>(value: &T) -> Result<Value, ServiceError> {
    serde_json::to_value(value).map_err(|e| ServiceError::new(SAMPLE_FAILED, e.to_string()))
}
