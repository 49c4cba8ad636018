//! CLI entry point for rust-procedure
//!
//! ```bash
//! rust-procedure eval "gauss(x,1,0,2)*k" --x 0.5 --param k=3
//! rust-procedure logic "(a>1|b<2)&!c==0" --atom "a>1=true"
//! rust-procedure check config/procedure.toml
//! rust-procedure run config/procedure.toml --json
//! ```

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use rust_procedure::channel::EventMessage;
use rust_procedure::config::AppConfig;
use rust_procedure::formula::{Formula, LogicalExpression};
use rust_procedure::logging::{self, LoggingConfig, OutputFormat};
use rust_procedure::registry::Workspace;
use rust_procedure::schedule::{Scheduler, SequenceEvent};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "rust-procedure")]
#[command(about = "Expression evaluation and trigger-driven step sequencing", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile and evaluate an arithmetic expression
    Eval {
        /// Expression, e.g. "2*x+offset"
        expression: String,

        /// Abscissa value
        #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
        x: f64,

        /// Parameter binding NAME=VALUE (repeatable)
        #[arg(long = "param", value_name = "NAME=VALUE")]
        params: Vec<String>,
    },

    /// Compile and evaluate a logical expression over comparison atoms
    Logic {
        /// Expression, e.g. "(Level>=5|Temp<20)&!Door==0"
        expression: String,

        /// Atom value ATOM=BOOL (repeatable); unbound atoms are false
        #[arg(long = "atom", value_name = "ATOM=BOOL")]
        atoms: Vec<String>,
    },

    /// Validate a configuration file and print the effective settings
    Check {
        /// Configuration file
        config: PathBuf,
    },

    /// Run the active sequence of a configuration file
    Run {
        /// Configuration file
        config: PathBuf,

        /// Activate the sequence even if AutoStart is false
        #[arg(long)]
        start: bool,

        /// Print lifecycle events as JSON lines
        #[arg(long)]
        json: bool,

        /// Log output format
        #[arg(long, value_enum, default_value_t = LogFormat::Compact)]
        log_format: LogFormat,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Pretty,
    Compact,
    Json,
}

impl From<LogFormat> for OutputFormat {
    fn from(format: LogFormat) -> Self {
        match format {
            LogFormat::Pretty => OutputFormat::Pretty,
            LogFormat::Compact => OutputFormat::Compact,
            LogFormat::Json => OutputFormat::Json,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Eval {
            expression,
            x,
            params,
        } => eval(&expression, x, &params),
        Commands::Logic { expression, atoms } => logic(&expression, &atoms),
        Commands::Check { config } => check(config),
        Commands::Run {
            config,
            start,
            json,
            log_format,
        } => run(config, start, json, log_format).await,
    }
}

fn eval(expression: &str, x: f64, params: &[String]) -> Result<()> {
    let formula =
        Formula::compile(expression).with_context(|| format!("compiling '{expression}'"))?;

    let mut bindings = Vec::with_capacity(params.len());
    for param in params {
        let (name, value) = param
            .split_once('=')
            .ok_or_else(|| anyhow!("parameter '{param}' is not NAME=VALUE"))?;
        let value: f64 = value
            .trim()
            .parse()
            .with_context(|| format!("parameter '{name}' is not a number"))?;
        bindings.push((name.trim().to_string(), value));
    }
    let pairs: Vec<(&str, f64)> = bindings.iter().map(|(n, v)| (n.as_str(), *v)).collect();

    let value = formula.evaluate_at(x, &pairs)?;
    println!("postfix:   {}", formula.postfix());
    println!("infix:     {}", formula.to_infix());
    println!("variables: {}", formula.variables().join(", "));
    println!("value:     {value}");
    Ok(())
}

fn logic(expression: &str, atoms: &[String]) -> Result<()> {
    let mut logical = LogicalExpression::compile(expression)
        .with_context(|| format!("compiling '{expression}'"))?;

    let mut bound = Vec::with_capacity(atoms.len());
    for atom in atoms {
        let (text, value) = atom
            .rsplit_once('=')
            .ok_or_else(|| anyhow!("atom '{atom}' is not ATOM=BOOL"))?;
        let value: bool = value
            .trim()
            .to_lowercase()
            .parse()
            .with_context(|| format!("atom '{text}' needs true or false"))?;
        bound.push((text.trim().to_string(), value));
    }

    let value = logical.evaluate_with(|atom| {
        bound
            .iter()
            .find(|(text, _)| text == atom)
            .map(|(_, value)| *value)
    })?;
    println!("postfix: {}", logical.postfix());
    println!("infix:   {}", logical.to_infix());
    println!("atoms:   {}", logical.atoms().join(", "));
    println!("value:   {value}");
    Ok(())
}

fn load(path: &Path) -> Result<AppConfig> {
    let config = AppConfig::load_from(path)
        .with_context(|| format!("loading configuration from {}", path.display()))?;
    config
        .validate()
        .map_err(|e| anyhow!("invalid configuration {}: {e}", path.display()))?;
    Ok(config)
}

fn check(path: PathBuf) -> Result<()> {
    let config = load(&path)?;
    print!("{}", config.to_toml()?);
    Ok(())
}

async fn run(path: PathBuf, force_start: bool, json: bool, log_format: LogFormat) -> Result<()> {
    let config = load(&path)?;
    let logging_config = LoggingConfig::from_app_config(&config)
        .map_err(|e| anyhow!(e))?
        .with_format(log_format.into());
    logging::init(logging_config).map_err(|e| anyhow!(e))?;
    info!(application = %config.application.name, config = %path.display(), "Starting");

    let procedure = config
        .procedure
        .as_ref()
        .ok_or_else(|| anyhow!("{} has no [procedure] section", path.display()))?;

    let workspace = Workspace::from_config(&config)?;
    workspace.start_devices()?;

    let scheduler = Scheduler::build(
        procedure,
        &workspace.channels,
        &workspace.variables,
        config.scheduler.poll_interval(),
    )?;
    let sequence = Arc::clone(scheduler.sequence());
    let mut events = sequence.events();
    if !json {
        sequence.subscribe(Arc::new(|message: &EventMessage| println!("{message}")));
    }

    let started = if force_start {
        sequence.activate()?;
        true
    } else {
        scheduler.start()?
    };
    if !started {
        warn!(sequence = %sequence.name(), "AutoStart is off; pass --start to run the sequence");
    }
    let exit_when_done = scheduler.auto_exit() && started;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => {
                    if json {
                        println!("{}", serde_json::to_string(&event)?);
                    }
                    let finished = matches!(event, SequenceEvent::Completed | SequenceEvent::Cancelled);
                    if finished && exit_when_done {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Event stream lagged"),
                Err(RecvError::Closed) => break,
            },
            result = &mut ctrl_c => {
                if let Err(e) = result {
                    bail!("listening for Ctrl-C: {e}");
                }
                info!("Interrupted");
                sequence.deactivate();
                break;
            }
        }
    }

    sequence.dispose();
    workspace.shutdown();
    info!(state = %sequence.state(), "Finished");
    Ok(())
}
