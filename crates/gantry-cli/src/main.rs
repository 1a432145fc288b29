//! Gantry CLI - list compute devices and run the sample dispatch pipelines.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use gantry_cli::DeviceClassArg;
use gantry_cli::pipelines::{self, MatmulOptions, PipelineConfig, PipelineOutcome};
use gantry_runtime::{CapabilityReport, DeviceSelector, DeviceSummary, Ordering, RuntimeConfig};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "gantry")]
#[command(about = "Select a compute device and run chained kernels on it", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Class of device to run on
    #[arg(long, value_enum, default_value = "default", global = true)]
    device_class: DeviceClassArg,

    /// Comma separated driver backends to enumerate (e.g. "vulkan,metal")
    #[arg(long, value_name = "LIST", global = true)]
    backends: Option<String>,

    /// Upper bound on any single wait for the device, in milliseconds (0 = wait forever)
    #[arg(long, default_value = "60000", global = true)]
    timeout_ms: u64,

    /// Block on each stage before enqueuing the next
    #[arg(long, global = true)]
    stage_barrier: bool,

    /// Seed for generated input data
    #[arg(long, default_value = "42", global = true)]
    seed: u64,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Print every platform and device with its capabilities
    Devices,
    /// Add two vectors: c = a + b
    Vadd {
        /// Number of elements
        #[arg(long, default_value = "1024")]
        length: usize,

        /// Absolute tolerance for the result check
        #[arg(long, default_value = "0.001", value_parser = gantry_cli::parse_tolerance)]
        tolerance: f32,

        /// Use a[i] = i, b[i] = 2i instead of random inputs
        #[arg(long)]
        ramp: bool,
    },
    /// Three dependent additions with one rebound kernel: f = ((a + b) + e) + g
    Chain {
        /// Number of elements
        #[arg(long, default_value = "1024")]
        length: usize,

        /// Absolute tolerance for the result checks
        #[arg(long, default_value = "0.001", value_parser = gantry_cli::parse_tolerance)]
        tolerance: f32,
    },
    /// Add three vectors with one kernel: d = a + b + c
    Triple {
        /// Number of elements
        #[arg(long, default_value = "1024")]
        length: usize,

        /// Relative tolerance for the result check
        #[arg(long, default_value = "0.001", value_parser = gantry_cli::parse_tolerance)]
        tolerance: f32,
    },
    /// Multiply two square matrices: C = A * B
    Matmul {
        /// Matrix order N
        #[arg(long, default_value = "64")]
        order: usize,

        /// WGSL kernel file to use instead of the bundled kernel
        #[arg(long, value_name = "FILE")]
        kernel: Option<PathBuf>,

        /// Entry point in the kernel file
        #[arg(long)]
        entry: Option<String>,

        /// Relative tolerance for the result check
        #[arg(long, default_value = "0.001", value_parser = gantry_cli::parse_tolerance)]
        tolerance: f32,

        /// Print A, B and C
        #[arg(long)]
        print: bool,
    },
}

impl Cli {
    fn runtime_config(&self) -> RuntimeConfig {
        let timeout = (self.timeout_ms > 0).then(|| Duration::from_millis(self.timeout_ms));
        let ordering = if self.stage_barrier {
            Ordering::StageBarrier
        } else {
            Ordering::InOrderQueue
        };

        let mut config = RuntimeConfig::default()
            .with_device_class(self.device_class.into())
            .with_wait_timeout(timeout)
            .with_ordering(ordering);
        if let Some(list) = &self.backends {
            config = config.with_backends(wgpu::Backends::from_comma_list(list));
        }
        config
    }
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("gantry_runtime=debug,gantry_cli=debug,gantry=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error[{}]: {err:#}", gantry_cli::error_kind(&err));
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let runtime = cli.runtime_config();
    let selector = DeviceSelector::new(&runtime);

    if let Commands::Devices = cli.command {
        print!("{}", CapabilityReport::collect(&selector));
        return Ok(());
    }

    let device = selector
        .select(runtime.device_class)
        .context("Failed to select a compute device")?;
    tracing::info!(
        device = %device.info().name,
        backend = ?device.info().backend,
        "selected device"
    );
    println!("{}", DeviceSummary::new(device.info()));

    let mut config = PipelineConfig {
        seed: cli.seed,
        ..PipelineConfig::default()
    };

    let outcome: PipelineOutcome = match cli.command {
        Commands::Devices => return Ok(()),
        Commands::Vadd {
            length,
            tolerance,
            ramp,
        } => {
            config.length = length;
            config.tolerance = tolerance;
            pipelines::vadd(&device, &runtime, &config, ramp)?
        }
        Commands::Chain { length, tolerance } => {
            config.length = length;
            config.tolerance = tolerance;
            pipelines::chain(&device, &runtime, &config)?
        }
        Commands::Triple { length, tolerance } => {
            config.length = length;
            config.tolerance = tolerance;
            pipelines::triple(&device, &runtime, &config)?
        }
        Commands::Matmul {
            order,
            kernel,
            entry,
            tolerance,
            print,
        } => {
            config.order = order;
            config.relative_tolerance = tolerance;
            let options = MatmulOptions {
                kernel: kernel.as_deref(),
                entry: entry.as_deref(),
                print_matrices: print,
            };
            pipelines::matmul(&device, &runtime, &config, &options)?
        }
    };

    print!("{outcome}");
    outcome.ensure_passed()
}
