pub mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use hrflow_core::config::{AppConfig, LoadOptions, LogFormat};

#[derive(Debug, Parser)]
#[command(
    name = "hrflow",
    about = "hrflow HR assistant CLI",
    long_about = "Ask the HR assistant a question, inspect effective configuration, and apply \
                  memory-store migrations.",
    after_help = "Examples:\n  hrflow ask what is my leave balance\n  hrflow ask --user EMP002 \
                  --role manager show pending approvals\n  hrflow config\n  hrflow migrate"
)]
pub struct Cli {
    #[arg(long, global = true, help = "Config file to load instead of hrflow.toml")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Send one message through the assistant pipeline and print the reply")]
    Ask(AskArgs),
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Apply pending memory-store migrations and return structured status output")]
    Migrate,
}

#[derive(Debug, Args)]
pub struct AskArgs {
    #[arg(required = true, trailing_var_arg = true, help = "Message to send")]
    pub message: Vec<String>,
    #[arg(long = "user", default_value = "EMP001")]
    pub user_id: String,
    #[arg(long, default_value = "demo")]
    pub username: String,
    #[arg(long, default_value = "employee")]
    pub role: String,
    #[arg(long, default_value = "Engineering")]
    pub department: String,
    #[arg(long, help = "Session id to continue; a new one is generated when omitted")]
    pub session: Option<String>,
    #[arg(long, help = "Keep memory in process instead of the configured database")]
    pub ephemeral: bool,
    #[arg(long, help = "Skip the text-understanding service and rely on pattern rules")]
    pub offline: bool,
}

impl AskArgs {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: vec![message.into()],
            user_id: "EMP001".to_string(),
            username: "demo".to_string(),
            role: "employee".to_string(),
            department: "Engineering".to_string(),
            session: None,
            ephemeral: false,
            offline: false,
        }
    }
}

fn load_options(config: Option<PathBuf>) -> LoadOptions {
    let require_file = config.is_some();
    LoadOptions { config_path: config, require_file, ..LoadOptions::default() }
}

/// Logs go to stderr so stdout stays machine-readable.
fn init_logging(config: &AppConfig) {
    use tracing::Level;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);
    let builder = tracing_subscriber::fmt()
        .with_target(false)
        .with_max_level(log_level)
        .with_writer(std::io::stderr);

    // A subscriber may already be installed when embedded in tests.
    let _ = match config.logging.format {
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();
    let options = load_options(cli.config);

    if let Ok(config) = AppConfig::load(options.clone()) {
        init_logging(&config);
    }

    let result = match cli.command {
        Command::Ask(args) => commands::ask::run(&options, args),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run(&options) }
        }
        Command::Migrate => commands::migrate::run(&options),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
