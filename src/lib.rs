pub mod cli;
pub mod config;
pub mod dom;
pub mod edo;
pub mod error;
pub mod fns;
pub mod input;
pub mod io_utils;
pub mod rar;
pub mod stat;
pub mod xsd;

use std::{
    env,
    path::{Path, PathBuf},
    sync::OnceLock,
    time::Instant,
};

use anyhow::{Context, Result, anyhow};
use chrono::{SecondsFormat, Utc};
use clap::Parser;
use itertools::Itertools;
use log::{LevelFilter, error, info};

use crate::cli::{CheckArgs, Cli, Commands, Family, InspectArgs};
use crate::input::CheckedFile;

static LOGGER: OnceLock<()> = OnceLock::new();

fn init_logging() {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("report_checker", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

pub fn run() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    match cli.command {
        Commands::Check(args) => run_operation("check", || handle_check(&args)),
        Commands::Inspect(args) => run_operation("inspect", || handle_inspect(&args)),
    }
}

fn run_operation<F>(name: &str, op: F) -> Result<()>
where
    F: FnOnce() -> Result<()>,
{
    let start_clock = Utc::now();
    let start_instant = Instant::now();
    let result = op();
    let end_clock = Utc::now();
    let duration_secs = start_instant.elapsed().as_secs_f64();
    let start_str = start_clock.to_rfc3339_opts(SecondsFormat::Millis, true);
    let end_str = end_clock.to_rfc3339_opts(SecondsFormat::Millis, true);

    match &result {
        Ok(_) => info!(
            "Operation '{name}' completed (status=ok)\nstart: {start_str}\nend: {end_str}\nduration_secs: {duration_secs:.3}"
        ),
        Err(err) => error!(
            "Operation '{name}' failed (status=error)\nstart: {start_str}\nend: {end_str}\nduration_secs: {duration_secs:.3}\nerror: {err:?}"
        ),
    }

    result
}

fn resolve_root(
    family: Family,
    root: &Option<PathBuf>,
    config_path: &Option<PathBuf>,
) -> Result<PathBuf> {
    if let Some(root) = root {
        return Ok(root.clone());
    }
    let config_path = config_path
        .as_deref()
        .ok_or_else(|| anyhow!("Either --root or --config must name the compendium root"))?;
    let config = config::Config::load(config_path)?;
    Ok(config.root_for(family.as_str()).to_path_buf())
}

enum LoadedCompendium {
    Fns(fns::FnsCompendium, bool),
    Stat(stat::StatCompendium),
    Edo(edo::EdoCompendium),
    Rar(rar::RarCompendium),
}

impl LoadedCompendium {
    fn load(family: Family, root: &Path, strict: bool) -> Result<LoadedCompendium> {
        let loaded = match family {
            Family::Fns => LoadedCompendium::Fns(
                fns::FnsCompendium::load(root)
                    .with_context(|| format!("Loading FNS compendium from {root:?}"))?,
                strict,
            ),
            Family::Stat => LoadedCompendium::Stat(
                stat::StatCompendium::load(root)
                    .with_context(|| format!("Loading STAT compendium from {root:?}"))?,
            ),
            Family::Edo => LoadedCompendium::Edo(
                edo::EdoCompendium::load(root)
                    .with_context(|| format!("Loading EDO compendium from {root:?}"))?,
            ),
            Family::Rar => LoadedCompendium::Rar(
                rar::RarCompendium::load(root)
                    .with_context(|| format!("Loading RAR compendium from {root:?}"))?,
            ),
        };
        Ok(loaded)
    }

    fn check(&self, file: &mut CheckedFile) {
        match self {
            LoadedCompendium::Fns(compendium, strict) => fns::FnsChecker::new(compendium)
                .strict(*strict)
                .check_file(file),
            LoadedCompendium::Stat(compendium) => {
                stat::StatChecker::new(compendium).check_file(file)
            }
            LoadedCompendium::Edo(compendium) => {
                edo::EdoChecker::new(compendium).check_file(file)
            }
            LoadedCompendium::Rar(compendium) => {
                rar::RarChecker::new(compendium).check_file(file)
            }
        }
    }
}

fn handle_check(args: &CheckArgs) -> Result<()> {
    let root = resolve_root(args.family, &args.root, &args.config)?;
    info!(
        "Checking {} file(s) against the {} compendium at {}",
        args.inputs.len(),
        args.family.as_str(),
        root.display()
    );
    let compendium = LoadedCompendium::load(args.family, &root, args.strict)?;

    let mut all_passed = true;
    for input in &args.inputs {
        all_passed &= check_one(input, args.json, &compendium)?;
    }
    if !all_passed {
        return Err(anyhow!("One or more files failed verification"));
    }
    Ok(())
}

fn check_one(input: &Path, json: bool, compendium: &LoadedCompendium) -> Result<bool> {
    let mut file = CheckedFile::load(input)?;
    compendium.check(&mut file);
    let result = file
        .verify_result
        .as_ref()
        .expect("checker always writes a result");

    if json {
        println!("{}", serde_json::to_string(result)?);
    } else if result.result.is_passed() {
        info!("✓ {} {}", file.filename, result.result);
    } else {
        error!(
            "✗ {} {}: {}",
            file.filename,
            result.result,
            result.description.as_deref().unwrap_or("")
        );
        for entry in &result.asserts {
            error!("  [{}] {}", entry.error_code, entry.description);
        }
    }
    Ok(result.result.is_passed())
}

fn handle_inspect(args: &InspectArgs) -> Result<()> {
    let root = resolve_root(args.family, &args.root, &args.config)?;
    match args.family {
        Family::Fns => {
            let compendium = fns::FnsCompendium::load(&root)?;
            for (knd, entry) in compendium.formats().sorted_by_key(|(knd, _)| knd.clone()) {
                for (version, descriptor) in
                    entry.versions.iter().sorted_by_key(|(version, _)| *version)
                {
                    println!(
                        "КНД {knd} версия {version}: {} ({} проверок)",
                        descriptor.xsd_name,
                        descriptor.rules.len()
                    );
                }
            }
        }
        Family::Stat => {
            let compendium = stat::StatCompendium::load(&root)?;
            for (key, scheme) in compendium.forms().sorted_by_key(|(key, _)| key.clone()) {
                println!(
                    "Форма {key}: {} раздел(ов), {} контролей",
                    scheme.sections.len(),
                    scheme.controls.len()
                );
            }
        }
        Family::Edo | Family::Rar => {
            return Err(anyhow!(
                "inspect is available for the fns and stat directions"
            ));
        }
    }
    Ok(())
}
