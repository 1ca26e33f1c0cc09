//! Conveyor console host - entry point.

use anyhow::Context as _;
use tokio::io::BufReader;
use tracing::{error, info};

use conveyor::config::{ConfigLoader, ConveyorConfig};
use conveyor::core::CancellationSource;
use conveyor::middleware::stages::metrics::describe_metrics;
use conveyor::telemetry::init_logging;
use conveyor_console_host::{build_pipeline, cli, run_lines, Args};

fn load_config(args: &Args) -> anyhow::Result<ConveyorConfig> {
    let loader = match &args.config {
        Some(path) => ConfigLoader::new().with_file(path)?,
        None => ConfigLoader::new().with_optional_file("conveyor.toml")?,
    };

    loader
        .with_dotenv()?
        .with_env_prefix("CONVEYOR")
        .load()
        .context("invalid configuration")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = match Args::parse_from(std::env::args().skip(1)) {
        Ok(args) => args,
        Err(message) => {
            eprintln!("{message}");
            eprintln!("Use --help for usage information");
            std::process::exit(1);
        }
    };

    if args.help {
        cli::print_help();
        return Ok(());
    }
    if args.version {
        println!("conveyor-console {}", conveyor_console_host::VERSION);
        return Ok(());
    }

    let config = load_config(&args)?;
    let dispatch = init_logging(&config.log_config())?;
    describe_metrics();

    info!(
        pipeline = %config.pipeline.name,
        mode = %args.mode,
        timeout_ms = ?config.pipeline.request_timeout_ms,
        "starting conveyor console host v{}",
        conveyor_console_host::VERSION
    );

    let pipeline = build_pipeline(&config, args.mode, dispatch)?;

    let shutdown = CancellationSource::new();
    let signal = shutdown.signal();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("interrupt received, cancelling");
                shutdown.cancel();
            }
            Err(e) => error!(error = %e, "failed to listen for interrupt"),
        }
    });

    let stdin = BufReader::new(tokio::io::stdin());
    let processed = run_lines(&pipeline, stdin, tokio::io::stdout(), signal).await?;

    info!(processed, "console host stopped");
    Ok(())
}
