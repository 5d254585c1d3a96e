//! Command-line contract of the host process.
//!
//! The process entry point parses `--root`, `--server`, `--con` and `--help`
//! and hands the result to the runtime. Parsing is deliberately lenient:
//! unknown flags are logged and skipped so an embedder can mix its own
//! options into the same argument vector.

use std::path::PathBuf;

/// Parsed command-line options.
#[derive(Debug, Clone)]
pub struct CommandArgs {
    /// Root directory holding `config.json` and per-module state.
    pub root: PathBuf,
    /// Run headless in server mode (the frame loop is not started).
    pub server: bool,
    /// Keep the console attached on platforms that detach it by default.
    pub console: bool,
    /// Show usage and exit.
    pub help: bool,
}

impl CommandArgs {
    /// Parse an argument vector (without the program name).
    pub fn parse<I>(args: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        let mut parsed = Self {
            root: default_root(),
            server: false,
            console: false,
            help: false,
        };

        let mut iter = args.into_iter();
        while let Some(arg) = iter.next() {
            match arg.as_str() {
                "--root" | "-r" => match iter.next() {
                    Some(value) => parsed.root = PathBuf::from(value),
                    None => tracing::warn!("--root given without a value, keeping default"),
                },
                "--server" | "-s" => parsed.server = true,
                "--con" | "-c" => parsed.console = true,
                "--help" | "-h" => parsed.help = true,
                other => tracing::warn!("Ignoring unknown argument '{}'", other),
            }
        }

        parsed
    }

    /// Print usage to stdout.
    pub fn show_help() {
        println!("Usage: sdrdeck [OPTIONS]");
        println!();
        println!("Options:");
        println!("  -r, --root <DIR>   Root directory for config and module state");
        println!("  -s, --server       Run in headless server mode");
        println!("  -c, --con          Keep the console attached");
        println!("  -h, --help         Show this help");
    }
}

/// Default root: `$HOME/.config/sdrdeck`, falling back to `./sdrdeck`.
fn default_root() -> PathBuf {
    match std::env::var_os("HOME") {
        Some(home) => PathBuf::from(home).join(".config").join("sdrdeck"),
        None => PathBuf::from("sdrdeck"),
    }
}
