mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};

use batchflow::job::EXIT_ERROR;
use batchflow::logging::{init_logging, LogConfig};
use batchflow::people::IMPORT_PEOPLE_JOB;

#[derive(Parser, Debug)]
#[command(
    name = "batchflow",
    version,
    about = "Restartable chunk batch jobs over delimited files"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, env = "BATCHFLOW_LOG_LEVEL", global = true)]
    log_level: Option<String>,

    /// Log format (text, json)
    #[arg(long, env = "BATCHFLOW_LOG_FORMAT", global = true)]
    log_format: Option<String>,

    /// Execution state database
    #[arg(long, env = "BATCHFLOW_STATE_DB", global = true)]
    state_db: Option<PathBuf>,
}

/// Identifies a job instance: its name plus its parameters.
#[derive(Args, Debug, Clone)]
struct JobArgs {
    /// Job name
    #[arg(long, default_value = IMPORT_PEOPLE_JOB)]
    job: String,

    /// Job parameter, `key=value` or `key(type)=value` (repeatable)
    #[arg(short = 'p', long = "param", value_name = "KEY=VALUE")]
    params: Vec<String>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Launch or restart a job instance
    Launch {
        #[command(flatten)]
        job: JobArgs,
        #[command(flatten)]
        options: commands::launch::LaunchOptions,
    },
    /// Show every execution of a job instance
    Status {
        #[command(flatten)]
        job: JobArgs,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(err) = init(&cli) {
        eprintln!("Error: {err:#}");
        return exit_code(EXIT_ERROR);
    }

    let code = match cli.command {
        Commands::Launch { job, options } => {
            commands::launch::execute(&job.job, &job.params, cli.state_db, &options).await
        }
        Commands::Status { job } => {
            commands::status::execute(&job.job, &job.params, cli.state_db).await
        }
    };
    match code {
        Ok(code) => exit_code(code),
        Err(err) => {
            eprintln!("Error: {err:#}");
            exit_code(EXIT_ERROR)
        }
    }
}

fn init(cli: &Cli) -> anyhow::Result<()> {
    let mut config = LogConfig::from_env()?;
    if let Some(level) = &cli.log_level {
        config = config.with_level(level.parse()?);
    }
    if let Some(format) = &cli.log_format {
        config = config.with_format(format.parse()?);
    }
    init_logging(&config)?;
    Ok(())
}

fn exit_code(code: i32) -> ExitCode {
    u8::try_from(code).map_or(ExitCode::FAILURE, ExitCode::from)
}
