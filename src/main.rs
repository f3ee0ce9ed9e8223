use anyhow::{Context, Result};
use clap::Parser;
use cribwatch::{MonitorConfig, MonitorOrchestrator};
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;

#[derive(Parser, Debug)]
#[command(name = "cribwatch")]
#[command(about = "Baby-monitor that asks a vision-language model whether the crib looks risky")]
#[command(version)]
#[command(long_about = "Captures frames from a camera, sends them with an editable risk prompt to \
an Ollama-hosted vision model, turns the answer into a RISK/SAFE verdict and serves a live \
annotated stream with operator controls over HTTP.")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "cribwatch.toml", help = "Path to TOML configuration file")]
    config: String,

    /// Enable debug logging (most verbose)
    #[arg(short, long, help = "Enable debug level logging")]
    debug: bool,

    /// Enable verbose logging (info level)
    #[arg(short, long, help = "Enable verbose info level logging")]
    verbose: bool,

    /// Enable quiet mode (errors only)
    #[arg(short, long, help = "Enable quiet mode - only log errors")]
    quiet: bool,

    /// Validate configuration and exit
    #[arg(long, help = "Validate configuration file and exit without starting the monitor")]
    validate_config: bool,

    /// Print default configuration and exit
    #[arg(long, help = "Print default configuration in TOML format and exit")]
    print_config: bool,

    /// Initialize and probe components, then exit
    #[arg(long, help = "Initialize components and run readiness checks without starting")]
    dry_run: bool,

    /// Override log format (json, pretty, compact)
    #[arg(long, value_name = "FORMAT", help = "Log output format: json, pretty, or compact")]
    log_format: Option<String>,

    /// Use the synthetic camera
    #[arg(long, help = "Use the synthetic mock camera instead of the device")]
    mock_camera: bool,

    /// Enable terminal key bindings
    #[arg(long, help = "Enable keyboard controls (SPACE analyze, a auto, k acknowledge, q quit)")]
    keyboard: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.print_config {
        print_default_config()?;
        return Ok(());
    }

    let mut config = MonitorConfig::load_from_file(&args.config)
        .with_context(|| format!("Failed to load configuration from {}", args.config))?;
    if args.mock_camera {
        config.camera.mock = true;
    }

    let log_guard = init_logging(&args, &config)?;

    info!("Starting cribwatch v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration file: {}", args.config);

    if let Err(e) = config.validate() {
        error!("Configuration validation failed: {}", e);
        eprintln!("✗ Configuration validation failed: {}", e);
        std::process::exit(1);
    }
    if args.validate_config {
        println!("✓ Configuration is valid");
        return Ok(());
    }

    let mut orchestrator = MonitorOrchestrator::new(config)
        .await
        .context("Failed to build the monitor")?;
    orchestrator.set_keyboard_enabled(args.keyboard);

    orchestrator
        .initialize()
        .await
        .context("Failed to initialize the monitor")?;

    if args.dry_run {
        info!("Dry run mode - components initialized but not started");
        println!("✓ Dry run completed successfully - all components initialized");
        return Ok(());
    }

    orchestrator
        .start()
        .await
        .context("Failed to start the monitor")?;

    let exit_code = orchestrator
        .run()
        .await
        .context("Monitor stopped with an error")?;

    info!("cribwatch exited with code: {}", exit_code);
    drop(log_guard);
    std::process::exit(exit_code);
}

/// Console output in the chosen format plus a non-blocking `app.log` in the log directory
fn init_logging(args: &Args, config: &MonitorConfig) -> Result<WorkerGuard> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry};

    let log_level = if args.debug {
        "debug"
    } else if args.verbose {
        "info"
    } else if args.quiet {
        "error"
    } else {
        "warn"
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("cribwatch={}", log_level)));

    let console_layer = match args.log_format.as_deref() {
        Some("json") => fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .boxed(),
        Some("compact") => fmt::layer()
            .compact()
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .boxed(),
        Some("pretty") | None => fmt::layer()
            .pretty()
            .with_target(true)
            .with_thread_ids(args.debug)
            .with_file(args.debug)
            .with_line_number(args.debug)
            .boxed(),
        Some(format) => {
            eprintln!("Warning: Unknown log format '{}', using default", format);
            fmt::layer()
                .with_target(true)
                .with_thread_ids(args.debug)
                .boxed()
        }
    };

    let directory = config.log_directory();
    std::fs::create_dir_all(&directory)
        .with_context(|| format!("Failed to create log directory {}", directory.display()))?;
    let (file_writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::never(&directory, "app.log"));
    let file_layer = fmt::layer()
        .with_writer(file_writer)
        .with_ansi(false)
        .with_target(true)
        .boxed();

    let layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = vec![console_layer, file_layer];

    tracing_subscriber::registry()
        .with(layers)
        .with(env_filter)
        .init();

    Ok(guard)
}

/// Print default configuration in TOML format
fn print_default_config() -> Result<()> {
    let text = toml::to_string_pretty(&MonitorConfig::default())
        .context("Failed to serialize default configuration")?;

    println!("# cribwatch configuration file");
    println!("# Every key can be overridden with CRIBWATCH_<SECTION>__<KEY> environment variables");
    println!();
    println!("{}", text);
    Ok(())
}
