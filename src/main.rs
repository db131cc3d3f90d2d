use clap::{Arg, ArgMatches, Command};
use log::LevelFilter;
use mdefang_filter::{Config, Filter, SmtpdFilter};
use std::path::PathBuf;
use std::process;
use tokio::io::BufReader;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let matches = Command::new("mdefang-filter")
        .version(env!("CARGO_PKG_VERSION"))
        .about("OpenSMTPD filter that hands messages to a MIMEDefang multiplexor")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .default_value("/etc/mdefang-filter.yaml"),
        )
        .arg(
            Arg::new("generate-config")
                .long("generate-config")
                .value_name("FILE")
                .help("Generate a default configuration file")
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("test-config")
                .long("test-config")
                .help("Check the configuration and exit")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Log protocol traffic")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("socket")
                .short('s')
                .long("socket")
                .value_name("PATH")
                .help("Multiplexor socket (overrides the configuration)")
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("spool-dir")
                .long("spool-dir")
                .value_name("DIR")
                .help("Spool root (overrides the configuration)")
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("debug")
                .short('d')
                .long("debug")
                .help("Keep spool directories after each message")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("helo-check")
                .short('H')
                .long("helo-check")
                .help("Check HELO/EHLO identities with the multiplexor")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("x-scanned-by")
                .short('X')
                .long("x-scanned-by")
                .help("Add an X-Scanned-By header to scanned messages")
                .action(clap::ArgAction::SetTrue),
        )
        .get_matches();

    // stdout carries the filter protocol, so logs go to stderr.
    let log_level = if matches.get_flag("verbose") {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .target(env_logger::Target::Stderr)
        .init();

    if let Some(generate_path) = matches.get_one::<String>("generate-config") {
        generate_default_config(generate_path);
        return;
    }

    let config_path = matches
        .get_one::<String>("config")
        .map(String::as_str)
        .unwrap_or("/etc/mdefang-filter.yaml");

    let config = match load_config(config_path) {
        Ok(config) => apply_overrides(config, &matches),
        Err(e) => {
            eprintln!("Error loading configuration: {e:#}");
            process::exit(1);
        }
    };

    let filter = match Filter::new(config) {
        Ok(filter) => filter,
        Err(e) => {
            eprintln!("Invalid configuration: {e:#}");
            process::exit(1);
        }
    };

    if matches.get_flag("test-config") {
        println!("Configuration OK");
        println!("{}", serde_yaml::to_string(filter.config()).unwrap_or_default());
        return;
    }

    log::info!(
        "Starting mdefang-filter (scanner {}, spool {})",
        filter.config().scanner_socket.display(),
        filter.config().spool_dir.display()
    );

    if let Err(e) =
        SmtpdFilter::run(filter, BufReader::new(tokio::io::stdin()), tokio::io::stdout()).await
    {
        log::error!("Filter error: {e:#}");
        process::exit(1);
    }
}

fn load_config(path: &str) -> anyhow::Result<Config> {
    if std::path::Path::new(path).exists() {
        Config::from_file(path)
    } else {
        log::warn!("Configuration file '{path}' not found, using default configuration");
        Ok(Config::default())
    }
}

fn apply_overrides(mut config: Config, matches: &ArgMatches) -> Config {
    if let Some(socket) = matches.get_one::<String>("socket") {
        config.scanner_socket = PathBuf::from(socket);
    }
    if let Some(dir) = matches.get_one::<String>("spool-dir") {
        config.spool_dir = PathBuf::from(dir);
    }
    if matches.get_flag("debug") {
        config.keep_spool = true;
    }
    if matches.get_flag("helo-check") {
        config.helo_check = true;
    }
    if matches.get_flag("x-scanned-by") {
        config.x_scanned_by = true;
    }
    config
}

fn generate_default_config(path: &str) {
    let config = Config::default();
    match config.to_file(path) {
        Ok(()) => {
            println!("Default configuration written to: {path}");
            println!("Please edit the configuration file to suit your needs.");
        }
        Err(e) => {
            eprintln!("Error writing configuration file: {e}");
            process::exit(1);
        }
    }
}
