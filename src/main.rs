//! Dual Camera CLI
//!
//! Lists cameras and runs a preview-plus-stills session on the front and
//! back cameras. Uses simulated hardware unless `--native` is given.

use clap::{Args, Parser, Subcommand};
use dual_camera::{
    device::ConcurrencySupport, CameraHardware, CaptureCoordinator, Collaborators,
    ControllerState, DeviceEnumerator, Facing, FileConfig, FileSink, ReportEvent, ResponseMode,
    SimulatedHardware,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{error, info, warn};

/// How long to wait for a single still to come back.
const STILL_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(name = "dual-camera", version, about = "Front and back camera session driver")]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List cameras and whether they can stream concurrently
    Devices {
        /// Query the platform camera API instead of the simulator
        #[arg(long)]
        native: bool,
    },
    /// Stream both cameras and take stills on the back camera
    Run(RunArgs),
}

#[derive(Args)]
struct RunArgs {
    /// Number of stills to capture
    #[arg(short = 'n', long, default_value_t = 3)]
    captures: u32,

    /// Pause between stills in milliseconds
    #[arg(long, default_value_t = 500)]
    interval_ms: u64,

    /// Directory for captured images (overrides the config file)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Use the platform camera API instead of the simulator
    #[arg(long)]
    native: bool,
}

/// Hardware plus the enumerator that describes it.
type Backend = (Arc<dyn CameraHardware>, Arc<dyn DeviceEnumerator>);

fn backend(config: &FileConfig, native: bool) -> Result<Backend, String> {
    if native {
        return native_backend();
    }
    let mode = match config.simulation.latency_ms {
        0 => ResponseMode::Immediate,
        ms => ResponseMode::Delayed(Duration::from_millis(ms)),
    };
    info!(?mode, "Using simulated cameras");
    let simulated = Arc::new(SimulatedHardware::dual(mode));
    let enumerator: Arc<dyn DeviceEnumerator> = simulated.clone();
    let hardware: Arc<dyn CameraHardware> = simulated;
    Ok((hardware, enumerator))
}

#[cfg(feature = "camera")]
fn native_backend() -> Result<Backend, String> {
    info!("Using native cameras");
    let native = Arc::new(dual_camera::NativeHardware::new());
    let enumerator: Arc<dyn DeviceEnumerator> = native.clone();
    let hardware: Arc<dyn CameraHardware> = native;
    Ok((hardware, enumerator))
}

#[cfg(not(feature = "camera"))]
fn native_backend() -> Result<Backend, String> {
    Err("built without the `camera` feature".to_string())
}

fn main() -> ExitCode {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();
    info!("Dual Camera v{}", dual_camera::VERSION);

    let config = match &cli.config {
        Some(path) => match FileConfig::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                error!(path = %path.display(), "Invalid configuration: {e}");
                return ExitCode::FAILURE;
            }
        },
        None => FileConfig::default(),
    };

    let result = match cli.command {
        Commands::Devices { native } => list_devices(&config, native),
        Commands::Run(args) => run(config, args),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn list_devices(config: &FileConfig, native: bool) -> Result<(), String> {
    let (_, enumerator) = backend(config, native)?;
    let devices = enumerator.devices().map_err(|e| e.to_string())?;

    if devices.is_empty() {
        println!("No cameras found");
    }
    for device in &devices {
        println!(
            "{:<8} {:<6} {:?}",
            device.id.as_str(),
            device.facing().as_str(),
            device.capabilities
        );
    }

    let support = ConcurrencySupport::from_devices(&devices);
    if support.is_supported() {
        println!("Concurrent streaming advertised by {} device(s)", support.capable_devices.len());
    } else {
        println!("Concurrent streaming not advertised");
    }
    Ok(())
}

fn run(mut config: FileConfig, args: RunArgs) -> Result<(), String> {
    if let Some(output) = &args.output {
        config.sink.directory = output.clone();
    }

    let interrupted = Arc::new(AtomicBool::new(false));
    {
        let interrupted = Arc::clone(&interrupted);
        ctrlc::set_handler(move || {
            interrupted.store(true, Ordering::SeqCst);
        })
        .map_err(|e| format!("failed to install signal handler: {e}"))?;
    }

    let (hardware, enumerator) = backend(&config, args.native)?;
    let sink = Arc::new(FileSink::new(&config.sink.directory));
    info!(directory = %sink.directory().display(), "Storing stills");

    let coordinator = CaptureCoordinator::new(
        &config,
        Collaborators {
            hardware,
            enumerator,
            sink,
        },
    )
    .map_err(|e| e.to_string())?;

    let reporter = coordinator.take_reports().map(|reports| {
        thread::spawn(move || {
            for report in reports {
                match report.event {
                    ReportEvent::StateChanged { from, to } => {
                        info!(facing = %report.facing, %from, %to, "State");
                    }
                    ReportEvent::ImageStored(location) => {
                        println!(
                            "{} {} bytes blake3:{}",
                            location.path.display(),
                            location.bytes,
                            location.digest
                        );
                    }
                    ReportEvent::Error(e) => warn!(facing = %report.facing, "{e}"),
                }
            }
        })
    });

    #[cfg(feature = "metrics")]
    let metrics = start_metrics(&config);
    #[cfg(feature = "metrics")]
    let on_progress = move |c: &CaptureCoordinator| {
        if let Some(state) = &metrics {
            state
                .blocking_write()
                .update(&dual_camera::metrics::MetricsSnapshot::from_coordinator(c));
        }
    };
    #[cfg(not(feature = "metrics"))]
    let on_progress = |_: &CaptureCoordinator| {};

    for facing in Facing::ALL {
        if let Err(e) = coordinator.start(facing) {
            warn!(%facing, "Start rejected: {e}");
        }
    }

    let startup = config.coordinator.shutdown_timeout();
    if coordinator.wait_for_state(Facing::Back, ControllerState::Streaming, startup) {
        take_stills(&coordinator, &args, &interrupted, on_progress);
    } else {
        warn!(state = %coordinator.state(Facing::Back), "Back camera never started streaming");
    }

    let shutdown = coordinator.shutdown_all();
    let [back, front] = coordinator.statuses();
    drop(coordinator);
    if let Some(reporter) = reporter {
        if reporter.join().is_err() {
            warn!("Report thread panicked");
        }
    }

    info!(
        stills = back.stats.stills_captured,
        back = %back.state,
        front = %front.state,
        "Done"
    );
    shutdown.map_err(|e| e.to_string())
}

fn take_stills(
    coordinator: &CaptureCoordinator,
    args: &RunArgs,
    interrupted: &AtomicBool,
    mut on_progress: impl FnMut(&CaptureCoordinator),
) {
    let back = coordinator.controller(Facing::Back);
    for n in 1..=u64::from(args.captures) {
        if interrupted.load(Ordering::SeqCst) {
            info!("Interrupted");
            break;
        }

        let done = |s: &dual_camera::ControllerStatus| {
            s.stats.stills_captured + s.stats.still_failures >= n
        };
        match coordinator.capture_still() {
            Ok(()) => {
                if back.wait_for(done, STILL_TIMEOUT).is_none() {
                    warn!(capture = n, "Still did not complete in time");
                }
            }
            Err(e) => warn!(capture = n, "Capture rejected: {e}"),
        }
        on_progress(coordinator);

        if n < u64::from(args.captures) {
            thread::sleep(Duration::from_millis(args.interval_ms));
        }
    }
}

#[cfg(feature = "metrics")]
fn start_metrics(
    config: &FileConfig,
) -> Option<Arc<tokio::sync::RwLock<dual_camera::metrics::MetricsState>>> {
    use dual_camera::metrics::{MetricsRegistry, MetricsServer, MetricsServerConfig};

    if config.metrics.port == 0 {
        return None;
    }
    let registry = match MetricsRegistry::new() {
        Ok(registry) => registry,
        Err(e) => {
            warn!("Metrics disabled: {e}");
            return None;
        }
    };
    let server = MetricsServer::new(MetricsServerConfig::with_port(config.metrics.port), registry);
    let state = server.state();

    thread::spawn(move || {
        let runtime = match tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
        {
            Ok(runtime) => runtime,
            Err(e) => {
                warn!("Metrics runtime failed: {e}");
                return;
            }
        };
        if let Err(e) = runtime.block_on(server.run()) {
            warn!("Metrics server stopped: {e}");
        }
    });
    Some(state)
}
