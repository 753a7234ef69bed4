//! Command-line argument parsing: `--config=<path>`, `--help`, `--version`.

use std::path::PathBuf;

use clap::{Arg, ArgAction, Command};

const DEFAULT_CONFIG_PATH: &str = "/etc/tweet-stream/engine.toml";

pub struct CliArgs {
    pub config_path: PathBuf,
}

/// Parse `argv`. Exits the process with code 0 after printing help or
/// version text, matching clap's own behaviour for those flags.
pub fn parse_args() -> CliArgs {
    let matches = Command::new("Stream Engine")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Real-time Twitter activity ingest and fan-out engine")
        .disable_version_flag(true)
        .arg(
            Arg::new("config")
                .help("Path to the TOML configuration file")
                .short('c')
                .long("config")
                .value_name("PATH")
                .value_parser(clap::value_parser!(PathBuf))
                .default_value(DEFAULT_CONFIG_PATH),
        )
        .arg(
            Arg::new("version")
                .help("Print version")
                .short('v')
                .long("version")
                .action(ArgAction::Version),
        )
        .get_matches();

    CliArgs {
        config_path: matches
            .get_one::<PathBuf>("config")
            .cloned()
            .expect("config has a default"),
    }
}
