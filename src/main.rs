//! batchd CLI
//!
//! Entry point for the `batchd` command-line tool.

use batchd::config::{default_host_config_path, EffectiveConfig, PROJECT_CONFIG_FILE};
use batchd::{
    logging, CachingWorker, CommandTask, EventPrinter, LocalDispatcher, ProgressEvent,
    WorkDispatcher, WorkRequest,
};
use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tracing::debug;

#[derive(Parser)]
#[command(name = "batchd")]
#[command(about = "Result-caching batch runner", version)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    log_json: bool,

    /// Path to project config file (default: .batchd.toml)
    #[arg(long, short = 'c', global = true)]
    config: Option<PathBuf>,

    /// Override the cache folder
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Verify the cache folder and print the effective configuration
    Check,

    /// Delete every entry in the cache
    Wipe,

    /// Show cache statistics
    Stats {
        /// Also list committed entries
        #[arg(long)]
        list: bool,
    },

    /// Run a command, serving its outputs from the cache when possible
    Run {
        /// Input file read by the command (repeatable)
        #[arg(long = "input", short = 'i')]
        inputs: Vec<PathBuf>,

        /// Output file name written by the command (repeatable)
        #[arg(long = "output", short = 'o', required = true)]
        outputs: Vec<String>,

        /// Copy the outputs into this folder when done
        #[arg(long)]
        publish_to: Option<PathBuf>,

        /// Names for the published copies, paired with --output
        #[arg(long = "publish-as", requires = "publish_to")]
        publish_as: Vec<String>,

        /// Ignore any cached result
        #[arg(long)]
        from_scratch: bool,

        /// Dispatch priority (default from config)
        #[arg(long)]
        priority: Option<i32>,

        /// The command to run (after --)
        #[arg(last = true, required = true)]
        cmd: Vec<String>,
    },
}

fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbose, cli.log_json);

    let config = match load_config(cli.config, cli.cache_dir) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            process::exit(2);
        }
    };

    let worker_config = config.worker_config();
    let dispatcher: Arc<dyn WorkDispatcher<CommandTask>> =
        Arc::new(LocalDispatcher::new(worker_config.host_name.clone()));
    let worker = CachingWorker::new(worker_config, dispatcher);

    match cli.command {
        Commands::Check => run_check(&config, &worker),
        Commands::Wipe => run_wipe(&worker),
        Commands::Stats { list } => run_stats(&worker, list),
        Commands::Run {
            inputs,
            outputs,
            publish_to,
            publish_as,
            from_scratch,
            priority,
            cmd,
        } => {
            let task = match build_task(inputs, outputs, publish_to, publish_as, from_scratch, cmd)
            {
                Ok(t) => t,
                Err(e) => {
                    eprintln!("Invalid task: {}", e);
                    process::exit(2);
                }
            };
            run_task(&worker, task, priority.unwrap_or_else(|| config.priority()));
        }
    }
}

fn load_config(
    project_path: Option<PathBuf>,
    cache_dir: Option<PathBuf>,
) -> Result<EffectiveConfig, batchd::ConfigError> {
    let host_path = default_host_config_path();
    let project_path = project_path.unwrap_or_else(|| PathBuf::from(PROJECT_CONFIG_FILE));
    let cli_overrides = cache_dir.map(|dir| {
        serde_json::json!({
            "cache": { "folder": dir.to_string_lossy() }
        })
    });

    let config = EffectiveConfig::build(host_path.as_deref(), Some(&project_path), cli_overrides)?;
    debug!("Effective config from {} sources", config.sources.len());
    Ok(config)
}

fn run_check(config: &EffectiveConfig, worker: &CachingWorker<CommandTask>) {
    match config.to_json() {
        Ok(json) => println!("{}", json),
        Err(e) => {
            eprintln!("Error serializing output: {}", e);
            process::exit(1);
        }
    }

    if let Err(e) = worker.check() {
        eprintln!("Cache check failed: {}", e);
        process::exit(1);
    }
    eprintln!("Cache folder OK: {}", worker.store().root().display());
}

fn run_wipe(worker: &CachingWorker<CommandTask>) {
    let printer = Arc::new(EventPrinter::new());
    worker.handle(WorkRequest::WipeCache, printer.clone());
    exit_with(printer.wait());
}

fn run_stats(worker: &CachingWorker<CommandTask>, list: bool) {
    let stats = match worker.store().stats() {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error reading cache: {}", e);
            process::exit(1);
        }
    };

    let mut output = serde_json::json!({ "stats": stats });
    if list {
        match worker.store().list_entries() {
            Ok(entries) => output["entries"] = serde_json::json!(entries),
            Err(e) => {
                eprintln!("Error reading cache: {}", e);
                process::exit(1);
            }
        }
    }

    match serde_json::to_string_pretty(&output) {
        Ok(json) => println!("{}", json),
        Err(e) => {
            eprintln!("Error serializing output: {}", e);
            process::exit(1);
        }
    }
}

fn build_task(
    inputs: Vec<PathBuf>,
    outputs: Vec<String>,
    publish_to: Option<PathBuf>,
    publish_as: Vec<String>,
    from_scratch: bool,
    cmd: Vec<String>,
) -> Result<CommandTask, batchd::TaskError> {
    let mut cmd = cmd.into_iter();
    let program = cmd.next().unwrap_or_default();
    let mut task = CommandTask::new(program, cmd.collect(), inputs, outputs)?
        .with_from_scratch(from_scratch);

    if let Some(target) = publish_to {
        task = task.with_publish_to(target);
        if !publish_as.is_empty() {
            task = task.with_published_names(publish_as)?;
        }
    }
    Ok(task)
}

fn run_task(worker: &CachingWorker<CommandTask>, task: CommandTask, priority: i32) {
    if let Err(e) = worker.store().install() {
        eprintln!("Cannot create cache folder: {}", e);
        process::exit(1);
    }

    let printer = Arc::new(EventPrinter::new());
    worker.handle(WorkRequest::Task { task, priority }, printer.clone());
    exit_with(printer.wait());
}

fn exit_with(terminal: ProgressEvent) -> ! {
    match terminal {
        ProgressEvent::Succeeded => process::exit(0),
        _ => process::exit(1),
    }
}
