use std::fs::File;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::{error, info};

use userstore::{Config, UserStorage};

/// Administer per-user file storage.
#[derive(Parser, Debug)]
#[command(name = "userstore", version, about)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show how many bytes a user stores and the remaining quota.
    Usage { username: String },
    /// List a user's files with their sizes.
    List { username: String },
    /// Write a user's directory to a zip archive.
    Export { username: String, output: PathBuf },
}

fn run(cli: Cli, config: Config) -> userstore::Result<()> {
    let limit = config.storage.max_user_bytes;
    let storage = UserStorage::new(config.storage);

    match cli.command {
        Command::Usage { username } => {
            let used = storage.usage(&username)?;
            println!("{username}: {used} of {limit} bytes used");
        }
        Command::List { username } => {
            for file in storage.list(&username)? {
                println!("{:>10}  {}", file.size, file.path);
            }
        }
        Command::Export { username, output } => {
            let sink = File::create(&output)?;
            let summary = storage.export(&username, sink)?;
            info!(
                username = %username,
                output = %output.display(),
                files = summary.files,
                "wrote archive"
            );
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Load configuration
    let config = match Config::load_with_env(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load {}: {e}", cli.config.display());
            eprintln!("Using default configuration.");
            let mut config = Config::default();
            config.apply_env_overrides();
            config
        }
    };
    if let Err(e) = config.validate() {
        eprintln!("{e}");
        return ExitCode::FAILURE;
    }

    // Initialize logging
    if let Err(e) = userstore::logging::init(&config.logging) {
        eprintln!("Failed to initialize logging: {e}");
        userstore::logging::init_console_only(&config.logging.level);
    }

    match run(cli, config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}
