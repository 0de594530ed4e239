use anyhow::Result;
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod settings;
mod simulation;
mod version;

use settings::NodeSettings;
use version::{git_commit_hash, PEERLINK_VERSION};

fn cli() -> Command {
    Command::new("peerlink-node")
        .version(PEERLINK_VERSION)
        .about("Peerlink mesh simulator")
        .disable_version_flag(true)
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path"),
        )
        .arg(
            Arg::new("data-dir")
                .short('d')
                .long("data-dir")
                .value_name("DIR")
                .help("Persist each instance's peer directory under this directory"),
        )
        .arg(
            Arg::new("instances")
                .short('n')
                .long("instances")
                .value_name("COUNT")
                .value_parser(value_parser!(usize))
                .help("Number of instances in the chain"),
        )
        .arg(
            Arg::new("run-secs")
                .short('t')
                .long("run-secs")
                .value_name("SECONDS")
                .value_parser(value_parser!(u64))
                .help("How long to run before reporting"),
        )
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .value_name("LEVEL")
                .help("Log level (trace, debug, info, warn, error)"),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .value_name("FORMAT")
                .value_parser(["pretty", "json"])
                .help("Log output format"),
        )
        .arg(
            Arg::new("version_flag")
                .short('V')
                .long("version")
                .action(ArgAction::SetTrue)
                .help("Print version information and exit"),
        )
}

fn main() -> Result<()> {
    let matches = cli().get_matches();

    if matches.get_flag("version_flag") {
        print_version_info();
        return Ok(());
    }

    let settings = load_settings(&matches)?;
    init_logging(&settings)?;

    info!(
        version = PEERLINK_VERSION,
        commit = git_commit_hash(),
        instances = settings.instances,
        run_secs = settings.run_secs,
        "Starting Peerlink simulation"
    );

    let report = simulation::run(&settings)?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn load_settings(matches: &ArgMatches) -> Result<NodeSettings> {
    let config_path = matches.get_one::<String>("config").map(String::as_str);
    let mut settings = NodeSettings::load(config_path)?;
    settings.apply_overrides(matches);
    settings.validate()?;
    Ok(settings)
}

fn init_logging(settings: &NodeSettings) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.log_level));

    if settings.log_format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().pretty())
            .init();
    }

    Ok(())
}

fn print_version_info() {
    println!("Peerlink {} (commit {})", PEERLINK_VERSION, git_commit_hash());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_overrides_take_precedence() {
        let matches = cli()
            .try_get_matches_from(["peerlink-node", "-n", "6", "--run-secs", "3", "--log-format", "json"])
            .unwrap();
        let settings = load_settings(&matches).unwrap();
        assert_eq!(settings.instances, 6);
        assert_eq!(settings.run_secs, 3);
        assert_eq!(settings.log_format, "json");
    }

    #[test]
    fn unknown_log_format_is_rejected_by_the_parser() {
        assert!(cli()
            .try_get_matches_from(["peerlink-node", "--log-format", "xml"])
            .is_err());
    }
}
