//! Usagemon CLI Entry Point
//!
//! Samples CPU (and optionally GPU) usage while a command runs.
//!
//! # Usage
//!
//! ```bash
//! # Monitor a command
//! usagemon -- make -j8
//!
//! # Sample every 100 ms with a 2 s buffer around the command
//! usagemon --delay 0.1 --buffer 2 -- ./benchmark
//!
//! # Sample for 10 seconds without running anything
//! usagemon --duration 10 --gpu
//!
//! # Save the usage logs for plotting
//! usagemon --output usage.json -- ./benchmark
//! ```

use std::error::Error;
use std::path::PathBuf;
use std::process::{Command, ExitCode};
use std::thread;
use std::time::Duration;

use log::{info, warn};

use usagemon::config::{load_config, MonitorConfig};
use usagemon::monitoring::{write_records, RunRecord, Sampler};
use usagemon::source::Capabilities;
use usagemon::timing::{BufferSpan, ScopedTimer};
use usagemon::{APP_NAME, VERSION};

/// Command-line arguments. Unset options fall back to the config file.
#[derive(Debug, Default)]
struct Args {
    config_path: Option<String>,
    delay: Option<f64>,
    buffer: Option<f64>,
    duration: Option<f64>,
    gpu: bool,
    device: Option<usize>,
    output: Option<PathBuf>,
    verbose: bool,
    command: Vec<String>,
}

/// Configures the logging system with appropriate formatting.
fn setup_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format(|buf, record| {
            use std::io::Write;

            match record.level() {
                log::Level::Warn | log::Level::Error => {
                    writeln!(buf, "[{}] {}", record.level(), record.args())
                }
                _ => writeln!(buf, "{}", record.args()),
            }
        })
        .init();
}

/// Prints usage information.
fn print_usage() {
    println!("Usage: usagemon [OPTIONS] [--] [COMMAND [ARGS...]]");
    println!();
    println!("Arguments:");
    println!("  [COMMAND]           Command to run while sampling");
    println!();
    println!("Options:");
    println!("  --delay SECS        Seconds between samples (default: {})", usagemon::config::DEFAULT_DELAY);
    println!("  --buffer SECS       Idle padding around the command, trimmed from averages");
    println!("  --duration SECS     Sample for a fixed time instead of running a command");
    println!("  --gpu               Also sample GPU usage if available");
    println!("  --device N          GPU index to sample (default: 0)");
    println!("  --config PATH       Load settings from a YAML file");
    println!("  --output PATH       Write usage logs as JSON");
    println!("  --verbose           Enable debug logging");
    println!("  --help              Show this help message");
    println!("  --version           Show version information");
    println!();
    println!("Examples:");
    println!("  usagemon -- make -j8");
    println!("  usagemon --delay 0.1 --buffer 2 --output usage.json -- ./benchmark");
    println!("  usagemon --duration 10 --gpu");
}

/// Returns the value following option `args[*i]`, advancing `i`.
fn option_value<'a>(args: &'a [String], i: &mut usize, name: &str) -> Result<&'a str, String> {
    *i += 1;
    args.get(*i)
        .map(String::as_str)
        .ok_or_else(|| format!("{} requires a value", name))
}

fn parse_number<T: std::str::FromStr>(value: &str, name: &str) -> Result<T, String> {
    value
        .parse()
        .map_err(|_| format!("Invalid {} value: {}", name, value))
}

/// Parses command-line arguments.
fn parse_arguments(args: &[String]) -> Result<Args, String> {
    let mut parsed = Args::default();
    let mut i = 1; // Skip program name

    while i < args.len() {
        let arg = &args[i];

        match arg.as_str() {
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("{} {}", APP_NAME, VERSION);
                std::process::exit(0);
            }
            "--verbose" | "-v" => parsed.verbose = true,
            "--gpu" => parsed.gpu = true,
            "--delay" => {
                parsed.delay = Some(parse_number(option_value(args, &mut i, arg)?, "delay")?)
            }
            "--buffer" => {
                parsed.buffer = Some(parse_number(option_value(args, &mut i, arg)?, "buffer")?)
            }
            "--duration" => {
                parsed.duration =
                    Some(parse_number(option_value(args, &mut i, arg)?, "duration")?)
            }
            "--device" => {
                parsed.device = Some(parse_number(option_value(args, &mut i, arg)?, "device")?)
            }
            "--config" => {
                parsed.config_path = Some(option_value(args, &mut i, arg)?.to_string())
            }
            "--output" => {
                parsed.output = Some(PathBuf::from(option_value(args, &mut i, arg)?))
            }
            "--" => {
                parsed.command = args[i + 1..].to_vec();
                break;
            }
            other if other.starts_with('-') => {
                return Err(format!("Unknown option: {}", other));
            }
            _ => {
                parsed.command = args[i..].to_vec();
                break;
            }
        }
        i += 1;
    }

    if let Some(duration) = parsed.duration {
        if !(duration.is_finite() && duration >= 0.0) {
            return Err(format!("Invalid duration value: {}", duration));
        }
    }

    Ok(parsed)
}

/// Merges the config file (if any) with command-line overrides.
fn resolve_config(args: &Args) -> Result<MonitorConfig, Box<dyn Error>> {
    let mut config = match &args.config_path {
        Some(path) => load_config(path)?,
        None => MonitorConfig::default(),
    };

    if let Some(delay) = args.delay {
        config.delay = delay;
    }
    if let Some(buffer) = args.buffer {
        config.buffer = buffer;
    }
    if let Some(device) = args.device {
        config.gpu_device = device;
    }
    if args.gpu {
        config.gpu = true;
    }
    if args.output.is_some() {
        config.output = args.output.clone();
    }

    config.validate()?;
    Ok(config)
}

/// Runs the monitored workload: the command, or a fixed-length idle wait.
fn run_workload(args: &Args) -> Result<(), Box<dyn Error>> {
    let Some((program, rest)) = args.command.split_first() else {
        let secs = args.duration.unwrap_or(0.0);
        info!("Sampling for {}s", secs);
        thread::sleep(Duration::from_secs_f64(secs));
        return Ok(());
    };

    info!("Running: {}", args.command.join(" "));
    let status = Command::new(program)
        .args(rest)
        .status()
        .map_err(|e| format!("Failed to run '{}': {}", program, e))?;

    if status.success() {
        Ok(())
    } else {
        Err(format!("'{}' exited with {}", program, status).into())
    }
}

/// Creates the CPU sampler plus a GPU sampler when requested and present.
fn build_samplers(config: &MonitorConfig) -> Result<Vec<Sampler>, Box<dyn Error>> {
    let caps = Capabilities::detect(config.gpu_device);
    let gpu_available = caps.gpu_available();
    let mut samplers = vec![Sampler::with_source(config.delay, config.buffer, caps.cpu)?];

    if config.gpu {
        match caps.gpu.into_source() {
            Ok(gpu) => samplers.push(Sampler::with_source(config.delay, config.buffer, gpu)?),
            Err(e) => warn!("{}", e),
        }
    } else if gpu_available {
        info!("GPU detected; pass --gpu to sample it");
    }

    Ok(samplers)
}

/// Main application entry point.
fn run() -> Result<(), Box<dyn Error>> {
    let argv: Vec<String> = std::env::args().collect();

    let args = parse_arguments(&argv).map_err(|e| {
        eprintln!("Error: {}", e);
        eprintln!();
        print_usage();
        e
    })?;

    setup_logging(args.verbose);

    if args.command.is_empty() && args.duration.is_none() {
        return Err("Nothing to monitor: give a COMMAND or --duration".into());
    }

    let config = resolve_config(&args)?;
    info!("{} v{}", APP_NAME, VERSION);

    let mut samplers = build_samplers(&config)?;
    let buffer = BufferSpan::new(config.buffer)?;
    let mut timer = ScopedTimer::new(config.timer_message.clone());

    let outcome = {
        let _scopes = samplers
            .iter_mut()
            .map(Sampler::enter)
            .collect::<Result<Vec<_>, _>>()?;

        buffer.run(|| timer.measure(|| run_workload(&args)))
    };

    for sampler in &mut samplers {
        if let Err(e) = sampler.join() {
            warn!("{} sampler: {}", sampler.source_name(), e);
        }
    }

    println!();
    for sampler in &samplers {
        match sampler.summary() {
            Ok(report) => println!("[{}] {}", sampler.source_name(), report),
            Err(e) => warn!("No {} summary: {}", sampler.source_name(), e),
        }
    }

    if let Some(path) = &config.output {
        let records: Vec<RunRecord> = samplers
            .iter()
            .filter_map(|sampler| match RunRecord::from_sampler(sampler) {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!("Skipping {} usage log: {}", sampler.source_name(), e);
                    None
                }
            })
            .collect();
        if let Err(e) = write_records(path, &records) {
            // The workload's own error takes precedence as the exit status
            if outcome.is_ok() {
                return Err(e);
            }
            warn!("{}", e);
        }
    }

    outcome
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!();
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
