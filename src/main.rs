// Module-specific lints configuration
#![allow(clippy::uninlined_format_args)]

use anyhow::{Context, Result};
use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::{generate, Shell};
use log::{info, warn, Level, LevelFilter, Log, Metadata, Record, SetLoggerError};
use std::io::Write;
use std::path::{Path, PathBuf};

use gcc_relay::app_config::{self, Config};
use gcc_relay::Controller;

/// CLI Wrapper for LogLevel to implement ValueEnum
#[derive(Debug, Clone, ValueEnum)]
enum CliLogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<CliLogLevel> for app_config::LogLevel {
    fn from(cli_level: CliLogLevel) -> Self {
        match cli_level {
            CliLogLevel::Error => app_config::LogLevel::Error,
            CliLogLevel::Warn => app_config::LogLevel::Warn,
            CliLogLevel::Info => app_config::LogLevel::Info,
            CliLogLevel::Debug => app_config::LogLevel::Debug,
            CliLogLevel::Trace => app_config::LogLevel::Trace,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Upload, submit, wait and retrieve completed translations
    Run {
        /// Confirm delivery of every successfully retrieved task
        #[arg(long)]
        confirm: bool,
    },

    /// Upload and submit only, printing the job id
    Submit,

    /// Poll tasks and retrieve completed ones without submitting
    Retrieve {
        /// Only handle tasks of this job
        #[arg(long)]
        job_id: Option<String>,

        /// Confirm delivery of every successfully retrieved task
        #[arg(long)]
        confirm: bool,
    },

    /// Confirm delivery of a task retrieved earlier, after post-processing succeeded
    Confirm {
        /// Task id to confirm
        #[arg(value_name = "TASK_ID")]
        task_id: String,
    },

    /// Write a configuration file with default values
    InitConfig {
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },

    /// Generate shell completions for gcc-relay
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Values that override the configuration file
#[derive(Args, Debug)]
struct Overrides {
    /// Service endpoint URL
    #[arg(long, global = true)]
    endpoint: Option<String>,

    /// Account user name
    #[arg(long, env = "GCC_USERNAME", global = true, hide_env_values = true)]
    username: Option<String>,

    /// Account password
    #[arg(long, env = "GCC_PASSWORD", global = true, hide_env_values = true)]
    password: Option<String>,

    /// OAuth client secret
    #[arg(long, env = "GCC_CLIENT_SECRET", global = true, hide_env_values = true)]
    client_secret: Option<String>,

    /// Seconds to wait between submission and the first poll
    #[arg(long, global = true)]
    wait_secs: Option<u64>,

    /// Number of task listings before giving up on unfinished tasks
    #[arg(long, global = true)]
    max_polls: Option<u32>,

    /// Directory retrieved translations are written to
    #[arg(long, global = true)]
    destination_dir: Option<PathBuf>,
}

/// gcc-relay - submit documents for translation and collect the results
#[derive(Parser, Debug)]
#[command(name = "gcc-relay")]
#[command(version)]
#[command(about = "Translation job submission and retrieval client")]
#[command(long_about = "gcc-relay uploads source documents to a translation-management service, submits them
as a job, waits for the per-locale tasks and downloads completed translations.

EXAMPLES:
    gcc-relay init-config                   # Write conf.json with default values
    gcc-relay run                           # Full workflow using conf.json
    gcc-relay run --max-polls 10            # Re-poll until tasks finish (10 polls max)
    gcc-relay retrieve --job-id 1234        # Only download finished tasks of a job
    gcc-relay confirm 5678                  # Confirm a task after post-processing
    gcc-relay completions bash > gcc-relay.bash

CREDENTIALS:
    Username, password and client secret can be stored in the configuration file or
    provided through GCC_USERNAME, GCC_PASSWORD and GCC_CLIENT_SECRET.")]
struct CommandLineOptions {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long, default_value = "conf.json", global = true)]
    config_path: PathBuf,

    /// Set logging level
    #[arg(short, long, value_enum, global = true)]
    log_level: Option<CliLogLevel>,

    #[command(flatten)]
    overrides: Overrides,
}

// @struct: Custom logger implementation
struct CustomLogger;

impl CustomLogger {
    // @initializes: Global logger; the level can be changed later with log::set_max_level
    fn init(level: LevelFilter) -> Result<(), SetLoggerError> {
        log::set_boxed_logger(Box::new(CustomLogger))?;
        log::set_max_level(level);
        Ok(())
    }

    // @returns: Marker and ANSI colour for log level
    fn style_for_level(level: Level) -> (&'static str, &'static str) {
        match level {
            Level::Error => ("❌", "\x1B[1;31m"),
            Level::Warn => ("🚧", "\x1B[1;33m"),
            Level::Info => ("", "\x1B[1;32m"),
            Level::Debug => ("🔍", "\x1B[1;36m"),
            Level::Trace => ("📋", "\x1B[1;35m"),
        }
    }
}

impl Log for CustomLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            let now = chrono::Local::now().format("%H:%M:%S%.3f");
            let (marker, colour) = Self::style_for_level(record.level());
            let mut stderr = std::io::stderr();
            let _ = writeln!(stderr, "{}{} {} {}\x1B[0m", colour, now, marker, record.args());
        }
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Info until the configuration says otherwise
    CustomLogger::init(LevelFilter::Info)?;

    let cli = CommandLineOptions::parse();

    match &cli.command {
        Commands::Completions { shell } => {
            let mut cmd = CommandLineOptions::command();
            generate(*shell, &mut cmd, "gcc-relay", &mut std::io::stdout());
            return Ok(());
        }
        Commands::InitConfig { force } => {
            return init_config(&cli.config_path, *force);
        }
        _ => {}
    }

    let config = load_config(&cli)?;
    log::set_max_level(config.log_level.to_level_filter());

    let controller = Controller::with_config(config);
    controller.cancel_on_ctrl_c();

    match cli.command {
        Commands::Run { confirm } => {
            let report = controller.run(confirm).await?;
            if let Some(job) = &report.job {
                info!("Job [{}] processed", job.job_id);
            }
        }
        Commands::Submit => {
            let (_, job) = controller.submit().await?;
            println!("{}", job.job_id);
        }
        Commands::Retrieve { job_id, confirm } => {
            controller.retrieve(job_id.as_deref(), confirm).await?;
        }
        Commands::Confirm { task_id } => {
            controller.confirm(&task_id).await?;
        }
        Commands::InitConfig { .. } | Commands::Completions { .. } => {}
    }

    Ok(())
}

fn init_config(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        warn!("Config file already exists at {:?}. Use --force to overwrite.", path);
        return Ok(());
    }
    Config::default().save(path)?;
    info!("Default configuration written to {:?}", path);
    Ok(())
}

fn load_config(cli: &CommandLineOptions) -> Result<Config> {
    let path = &cli.config_path;
    let mut config = if path.exists() {
        Config::from_file(path)?
    } else {
        warn!("Config file not found at {:?}, creating default config.", path);
        let config = Config::default();
        config
            .save(path)
            .with_context(|| format!("Failed to write default config to {:?}", path))?;
        config
    };

    let overrides = &cli.overrides;
    if let Some(endpoint) = &overrides.endpoint {
        config.connection.endpoint = endpoint.clone();
    }
    if let Some(username) = &overrides.username {
        config.connection.username = username.clone();
    }
    if let Some(password) = &overrides.password {
        config.connection.password = password.clone();
    }
    if let Some(client_secret) = &overrides.client_secret {
        config.connection.client_secret = client_secret.clone();
    }
    if let Some(wait_secs) = overrides.wait_secs {
        config.polling.wait_secs = wait_secs;
    }
    if let Some(max_polls) = overrides.max_polls {
        config.polling.max_polls = max_polls;
    }
    if let Some(destination_dir) = &overrides.destination_dir {
        config.directories.destination_dir = destination_dir.clone();
    }
    if let Some(log_level) = &cli.log_level {
        config.log_level = log_level.clone().into();
    }

    Ok(config)
}
