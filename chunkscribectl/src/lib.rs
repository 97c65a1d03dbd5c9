mod commands;

use std::path::PathBuf;

use chunkscribe_core::{load_config, ChunkscribeConfig, PipelineError, PipelineSettings};
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use serde::Serialize;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

pub use commands::status::StatusArgs;
pub use commands::transcribe::TranscribeArgs;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] chunkscribe_core::ConfigError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("pipeline error: {0}")]
    Pipeline(#[from] PipelineError),
    #[error("{failed} of {total} files were not transcribed")]
    Incomplete { failed: usize, total: usize },
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Chunked, resumable media transcription", long_about = None)]
pub struct Cli {
    /// Path to chunkscribe.toml
    #[arg(long, default_value = "configs/chunkscribe.toml")]
    pub config: PathBuf,
    /// Overrides paths.temp_root
    #[arg(long)]
    pub temp_root: Option<PathBuf>,
    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
    /// Log more (repeatable); RUST_LOG takes precedence
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Transcribes media files into .srt subtitles next to each source
    Transcribe(TranscribeArgs),
    /// Shows the persisted progress of a source file
    Status(StatusArgs),
    /// Removes expired work directories
    Sweep,
    /// Prints shell completions
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

pub fn init_tracing(verbose: u8) {
    let fallback = match verbose {
        0 => "warn,chunkscribe_core=info",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

pub fn run(cli: Cli) -> Result<()> {
    if let Commands::Completions { shell } = &cli.command {
        let mut command = Cli::command();
        clap_complete::generate(*shell, &mut command, "chunkscribectl", &mut std::io::stdout());
        return Ok(());
    }

    let context = AppContext::new(&cli)?;
    match &cli.command {
        Commands::Transcribe(args) => {
            let report = commands::transcribe::execute(&context, args)?;
            render(&report, cli.format)?;
            let failed = report.failed();
            if failed > 0 {
                return Err(AppError::Incomplete {
                    failed,
                    total: report.files.len(),
                });
            }
        }
        Commands::Status(args) => {
            let report = commands::status::execute(&context, args)?;
            render(&report, cli.format)?;
        }
        Commands::Sweep => {
            let report = commands::sweep::execute(&context);
            render(&report, cli.format)?;
        }
        Commands::Completions { .. } => {}
    }
    Ok(())
}

fn render<T>(value: &T, format: OutputFormat) -> Result<()>
where
    T: Serialize + DisplayFallback,
{
    match format {
        OutputFormat::Text => {
            println!("{}", value.display());
            Ok(())
        }
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{}", json);
            Ok(())
        }
    }
}

trait DisplayFallback {
    fn display(&self) -> String;
}

#[derive(Debug)]
struct AppContext {
    config: ChunkscribeConfig,
    settings: PipelineSettings,
}

impl AppContext {
    fn new(cli: &Cli) -> Result<Self> {
        let mut config = load_config(&cli.config)?;
        if let Some(root) = &cli.temp_root {
            config.paths.temp_root = root.to_string_lossy().to_string();
        }
        let settings = PipelineSettings::from(&config);
        Ok(Self { config, settings })
    }
}
