use browser_profiler::controller::{CallbackError, SampleCallback};
use browser_profiler::service::{self, BrowserProfiler, StartArgs};
use browser_profiler::{ProfilerConfig, Sample};
use serde::Serialize;
use std::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const USAGE: &str = "browser-profiler - sample browser cpu and memory

USAGE:
  browser-profiler sample
  browser-profiler watch [--interval <secs>] [--count <n>]
  browser-profiler describe

OPTIONS:
  --interval <secs>  Seconds between samples (default from config, minimum 0.1)
  --count <n>        Stop after n samples (default: run until the 1000 sample limit)

Samples are printed to stdout as JSON, one per line. Logs go to stderr and
honor RUST_LOG. The config file is read from $BROWSER_PROFILER_CONFIG or the
user config directory.
";

#[derive(Debug, PartialEq)]
enum Command {
    Sample,
    Watch {
        interval: Option<f64>,
        count: Option<u64>,
    },
    Describe,
    Help,
}

fn parse_args(args: &[String]) -> Result<Command, String> {
    let Some(verb) = args.first() else {
        return Ok(Command::Help);
    };
    match verb.as_str() {
        "sample" => Ok(Command::Sample),
        "describe" => Ok(Command::Describe),
        "-h" | "--help" | "help" => Ok(Command::Help),
        "watch" => {
            let mut interval = None;
            let mut count = None;
            let mut rest = args[1..].iter();
            while let Some(flag) = rest.next() {
                let value = rest
                    .next()
                    .ok_or_else(|| format!("{flag} expects a value"))?;
                match flag.as_str() {
                    "--interval" => {
                        interval = Some(
                            value
                                .parse::<f64>()
                                .map_err(|_| format!("invalid interval {value:?}"))?,
                        )
                    }
                    "--count" => {
                        count = Some(
                            value
                                .parse::<u64>()
                                .map_err(|_| format!("invalid count {value:?}"))?,
                        )
                    }
                    other => return Err(format!("unknown option {other}")),
                }
            }
            Ok(Command::Watch { interval, count })
        }
        other => Err(format!("unknown command {other}")),
    }
}

fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string(value) {
        Ok(line) => println!("{line}"),
        Err(e) => tracing::error!("could not encode output: {e}"),
    }
}

fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
        ))
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = match parse_args(&args) {
        Ok(command) => command,
        Err(e) => {
            eprintln!("{e}\n\n{USAGE}");
            std::process::exit(2);
        }
    };

    let config = match ProfilerConfig::load_checked() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("{e}");
            std::process::exit(2);
        }
    };

    match command {
        Command::Help => print!("{USAGE}"),
        Command::Describe => print_json(&service::describe()),
        Command::Sample => {
            let profiler = BrowserProfiler::from_config(&config);
            match profiler.sample() {
                Ok(sample) => print_json(&sample),
                Err(e) => {
                    tracing::error!("{e}");
                    std::process::exit(1);
                }
            }
        }
        Command::Watch { interval, count } => {
            let profiler = BrowserProfiler::from_config(&config);
            let (tx, rx) = mpsc::channel();
            let callback: SampleCallback = Box::new(move |sample: &Sample| {
                tx.send(sample.clone())
                    .map_err(|e| Box::new(e) as CallbackError)
            });
            let args = StartArgs {
                interval: interval.or(Some(config.default_interval_secs)),
            };
            if let Err(e) = profiler.start(args, Some(callback)) {
                tracing::error!("{e}");
                std::process::exit(1);
            }

            let mut printed = 0u64;
            for sample in rx.iter() {
                print_json(&sample);
                printed += 1;
                if count.is_some_and(|n| printed >= n) {
                    break;
                }
            }
            profiler.stop();
        }
    }
}
