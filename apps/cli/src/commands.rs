//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use kbforge_api::{AppState, secure_filename, staged_name};
use kbforge_core::{DocumentProcessor, Upload, WorkerPool};
use kbforge_shared::{
    AppConfig, MergeMode, TaskStatus, init_config, load_config, resolve_api_key,
};
use kbforge_storage::{MemoryTaskStore, TaskStore, connect_task_store};
use tokio::net::TcpListener;
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// kbforge: turn Office documents into a Markdown knowledge base.
#[derive(Parser)]
#[command(
    name = "kbforge",
    version,
    about = "Extract key phrases from .docx/.pptx files into a Markdown knowledge base.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Start the HTTP upload API.
    Serve {
        /// Address to bind (defaults to `server.bind` from the config).
        #[arg(long)]
        bind: Option<String>,
    },

    /// Process one document into the knowledge base.
    Process {
        /// A .docx or .pptx file.
        file: PathBuf,

        /// Merge mode: new or append.
        #[arg(short, long, default_value = "append")]
        mode: String,

        /// Gemini model (defaults to `gemini.default_model`).
        #[arg(long)]
        model: Option<String>,

        /// Output directory for the knowledge base (defaults to `output.dir`).
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Gemini API key (defaults to the `gemini.api_key_env` variable).
        #[arg(long)]
        api_key: Option<String>,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "kbforge=info",
        1 => "kbforge=debug",
        _ => "kbforge=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt().with_env_filter(env_filter).with_target(false).init();
        }
        LogFormat::Json => {
            fmt().json().with_env_filter(env_filter).init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Serve { bind } => cmd_serve(bind).await,
        Command::Process {
            file,
            mode,
            model,
            out,
            api_key,
        } => cmd_process(&file, &mode, model, out, api_key.as_deref()).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show().await,
        },
    }
}

// ---------------------------------------------------------------------------
// serve
// ---------------------------------------------------------------------------

async fn cmd_serve(bind: Option<String>) -> Result<()> {
    let config = load_config()?;
    let bind = bind.unwrap_or_else(|| config.server.bind.clone());

    let store = connect_task_store(&config.task_store).await;
    let pool = Arc::new(WorkerPool::new(config.executor.pool_size));
    let processor = DocumentProcessor::from_config(&config, store, pool.clone())?;

    let listener = TcpListener::bind(&bind)
        .await
        .map_err(|e| eyre!("cannot bind {bind}: {e}"))?;
    println!("kbforge API listening on http://{bind}");

    kbforge_api::serve(listener, AppState::new(processor, &config), shutdown_signal()).await?;

    info!(in_flight = pool.in_flight(), "server stopped, draining jobs");
    pool.shutdown(true).await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "could not listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

// ---------------------------------------------------------------------------
// process
// ---------------------------------------------------------------------------

async fn cmd_process(
    file: &Path,
    mode: &str,
    model: Option<String>,
    out: Option<PathBuf>,
    api_key: Option<&str>,
) -> Result<()> {
    let mut config = load_config()?;
    if let Some(dir) = out {
        config.output.dir = dir;
    }

    let mode: MergeMode = mode.parse()?;
    let model = model.unwrap_or_else(|| config.gemini.default_model.clone());
    if !config.gemini.is_allowed_model(&model) {
        return Err(eyre!(
            "invalid model '{model}': expected one of {}",
            config.gemini.allowed_models.join(", ")
        ));
    }
    let credential = resolve_api_key(api_key, &config.gemini).ok_or_else(|| {
        eyre!(
            "no Gemini API key: pass --api-key or set {}",
            config.gemini.api_key_env
        )
    })?;

    let original = file
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| eyre!("'{}' is not a file path", file.display()))?;
    let filename = secure_filename(original);
    let staged = stage_copy(file, &config.server.upload_dir, &filename).await?;

    let store = Arc::new(MemoryTaskStore::default());
    let pool = Arc::new(WorkerPool::new(1));
    let processor = DocumentProcessor::from_config(&config, store.clone(), pool.clone())?;

    info!(file = %file.display(), %mode, %model, "processing document");
    let started = Instant::now();

    let upload = Upload {
        file_path: staged.clone(),
        filename,
        mode,
        credential,
        model,
    };
    let (task_id, handle) = match processor.enqueue(upload).await {
        Ok(queued) => queued,
        Err(e) => {
            let _ = tokio::fs::remove_file(&staged).await;
            return Err(e.into());
        }
    };

    let spinner = spinner()?;
    while !handle.is_finished() {
        if let Some(record) = store.get(&task_id).await? {
            spinner.set_message(record.message);
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    let status = handle.wait().await?;
    spinner.finish_and_clear();
    pool.shutdown(true).await;

    let record = store
        .get(&task_id)
        .await?
        .ok_or_else(|| eyre!("task {task_id} disappeared from the store"))?;

    if status != TaskStatus::Completed {
        let error = record.error.unwrap_or(record.message);
        return Err(eyre!("processing failed: {error}"));
    }

    println!();
    println!("  Knowledge base updated!");
    println!("  Source: {}", record.filename);
    println!("  Mode:   {mode}");
    if let Some(path) = &record.output_file {
        println!("  Path:   {}", path.display());
    }
    if let Some(size) = record.content_size {
        println!("  Size:   {size} characters");
    }
    println!("  Time:   {:.1}s", started.elapsed().as_secs_f64());
    println!();

    Ok(())
}

/// Copy `file` into the staging dir so the job's cleanup never touches the original.
async fn stage_copy(file: &Path, dir: &Path, filename: &str) -> Result<PathBuf> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| eyre!("cannot create {}: {e}", dir.display()))?;

    let staged = dir.join(staged_name(filename));
    tokio::fs::copy(file, &staged)
        .await
        .map_err(|e| eyre!("cannot read {}: {e}", file.display()))?;
    Ok(staged)
}

fn spinner() -> Result<ProgressBar> {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg}")?
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
    );
    spinner.set_message("Task queued");
    spinner.enable_steady_tick(Duration::from_millis(80));
    Ok(spinner)
}

// ---------------------------------------------------------------------------
// config
// ---------------------------------------------------------------------------

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show() -> Result<()> {
    let config: AppConfig = load_config()?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}
