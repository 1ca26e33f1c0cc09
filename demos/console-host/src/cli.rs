//! Command-line arguments.

use crate::app::Mode;
use std::path::PathBuf;

/// Parsed command-line arguments.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Args {
    /// Path to configuration file.
    pub config: Option<PathBuf>,
    /// Line transformation.
    pub mode: Mode,
    /// Print help and exit.
    pub help: bool,
    /// Print version and exit.
    pub version: bool,
}

impl Args {
    /// Parses arguments, excluding the program name.
    ///
    /// # Errors
    ///
    /// Returns a message for unknown flags, missing values and unknown modes.
    pub fn parse_from<I>(args: I) -> Result<Self, String>
    where
        I: IntoIterator<Item = String>,
    {
        let mut args = args.into_iter();
        let mut parsed = Self::default();

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--config" | "-c" => {
                    let path = args.next().ok_or("--config requires a path")?;
                    parsed.config = Some(PathBuf::from(path));
                }
                "--mode" | "-m" => {
                    let mode = args.next().ok_or("--mode requires a value")?;
                    parsed.mode = mode.parse()?;
                }
                "--help" | "-h" => parsed.help = true,
                "--version" | "-v" => parsed.version = true,
                other => return Err(format!("Unknown argument: {other}")),
            }
        }

        Ok(parsed)
    }
}

/// Prints usage information.
pub fn print_help() {
    println!(
        r"Conveyor console host - runs each stdin line through a pipeline

USAGE:
    conveyor-console [OPTIONS]

OPTIONS:
    -c, --config <PATH>    Path to configuration file (TOML or JSON)
    -m, --mode <MODE>      echo | upper | lower | reverse (default: echo)
    -h, --help             Print help information
    -v, --version          Print version information

INPUT:
    Any line             Transformed according to --mode
    sleep <ms>           Waits, observing the request timeout and Ctrl-C
    (blank line)         Rejected with an error response

ENVIRONMENT VARIABLES:
    CONVEYOR__PIPELINE__NAME                Pipeline name in logs and metrics
    CONVEYOR__PIPELINE__REQUEST_TIMEOUT_MS  Per-line timeout (default: none)
    CONVEYOR__LOGGING__LEVEL                Log filter (default: info)
    CONVEYOR__LOGGING__FORMAT               json | pretty
"
    );
}
