//! Command-line front end for widget generation.
//!
//! `ask` streams update events as newline-delimited JSON on stdout; logs go
//! to stderr.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use widgetgen::core::events::UpdateEvent;
use widgetgen::core::json_extract::extract_json_with_repair;
use widgetgen::core::schema::{Validation, validate_data, validate_plan, validate_widget};
use widgetgen::core::types::DataSource;
use widgetgen::exit_codes;
use widgetgen::io::agent::CliAgent;
use widgetgen::io::config::{DEFAULT_CONFIG_FILE, GenConfig, load_config, write_config};
use widgetgen::logging;
use widgetgen::orchestrator::Orchestrator;

#[derive(Parser)]
#[command(
    name = "widgetgen",
    version,
    about = "Turn a question into a data-backed UI widget"
)]
struct Cli {
    /// Config file (TOML). Missing file means defaults.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate a widget, printing each update event as one JSON line.
    Ask {
        message: String,
        /// Model override for every phase.
        #[arg(long)]
        model: Option<String>,
        /// Force the data source instead of the planner's choice.
        #[arg(long)]
        data_mode: Option<DataSource>,
    },
    /// Validate a plan, data result or widget payload file.
    Check {
        #[arg(value_enum)]
        kind: PayloadKind,
        file: PathBuf,
    },
    /// Write a default config file.
    InitConfig {
        /// Overwrite an existing file.
        #[arg(short, long)]
        force: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum PayloadKind {
    Plan,
    Data,
    Widget,
}

fn main() {
    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{err:#}");
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run(cli: Cli) -> Result<i32> {
    match cli.command {
        Command::Ask {
            message,
            model,
            data_mode,
        } => cmd_ask(&cli.config, &message, model.as_deref(), data_mode),
        Command::Check { kind, file } => cmd_check(kind, &file),
        Command::InitConfig { force } => cmd_init_config(&cli.config, force),
    }
}

fn cmd_ask(
    config_path: &Path,
    message: &str,
    model: Option<&str>,
    data_mode: Option<DataSource>,
) -> Result<i32> {
    let cfg = load_config(config_path)?;
    logging::init("warn", cfg.debug);
    let agent = CliAgent::from_config(&cfg.agent, cfg.debug);
    let orchestrator = Orchestrator::from_config(agent, &cfg)?;

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let mut write_error = None;
    let outcome = orchestrator.run(message, model, data_mode, &mut |event: UpdateEvent| {
        if write_error.is_some() {
            return;
        }
        let line = match serde_json::to_string(&event) {
            Ok(line) => line,
            Err(e) => {
                write_error = Some(anyhow::Error::new(e).context("serialize update event"));
                return;
            }
        };
        if let Err(e) = writeln!(out, "{line}").and_then(|()| out.flush()) {
            write_error = Some(anyhow::Error::new(e).context("write update event"));
        }
    });
    if let Some(e) = write_error {
        return Err(e);
    }

    Ok(if outcome.is_degraded() {
        exit_codes::DEGRADED
    } else {
        exit_codes::OK
    })
}

fn cmd_check(kind: PayloadKind, file: &Path) -> Result<i32> {
    let raw = fs::read_to_string(file).with_context(|| format!("read {}", file.display()))?;
    let value = extract_json_with_repair(&raw).with_context(|| format!("parse {}", file.display()))?;
    let (errors, warnings) = match kind {
        PayloadKind::Plan => issues(validate_plan(&value)),
        PayloadKind::Data => issues(validate_data(&value)),
        PayloadKind::Widget => issues(validate_widget(&value)),
    };
    for warning in &warnings {
        eprintln!("warning: {warning}");
    }
    if !errors.is_empty() {
        bail!("validation failed:\n- {}", errors.join("\n- "));
    }
    println!("ok");
    Ok(exit_codes::OK)
}

fn issues<T>(validation: Validation<T>) -> (Vec<String>, Vec<String>) {
    (validation.errors, validation.warnings)
}

fn cmd_init_config(path: &Path, force: bool) -> Result<i32> {
    if !force && path.exists() {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    write_config(path, &GenConfig::default())?;
    println!("wrote {}", path.display());
    Ok(exit_codes::OK)
}
