//! DLC EC2 Tests - PyTorch training container integration tests
//!
//! A CLI that collects the PyTorch training scenarios for an image, decides
//! per instance type whether each one applies, and runs the applicable ones
//! inside the container on an EC2 host reached over SSH.
//!
//! ## Usage
//!
//! ```bash
//! # List scenarios
//! dlc-ec2-tests list --detailed
//!
//! # Show what would run for an image
//! dlc-ec2-tests plan --image pytorch-training:1.8.1-gpu-py36-cu111-ubuntu18.04
//!
//! # Run everything against one host, four cases at a time
//! dlc-ec2-tests run --image <uri> --host 10.0.0.10 --parallel --concurrent 4
//!
//! # Run one integration category and store the results
//! dlc-ec2-tests run --image <uri> --integration telemetry --save
//! ```

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

mod catalog;
mod cli;
mod config;
mod executor;
mod models;
mod output;
mod remote;
mod results;
mod scenarios;
mod utils;

use catalog::InstancePool;
use cli::Args;
use config::{AppConfig, EnvConfig};
use executor::{ParallelExecutor, RunContext, ScenarioRunner, Verdict};
use models::ImageReference;
use output::{OutputFormat, ResultFormatter};
use remote::TrainingDispatcher;
use results::{ExportFormat, ResultsStorage, StoredRun};
use scenarios::ScenarioFilter;
use utils::{init_logger, LogLevel};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.verbose {
        LogLevel::Debug
    } else {
        args.log_level
            .as_deref()
            .and_then(LogLevel::from_str)
            .unwrap_or(LogLevel::Info)
    };
    init_logger(level);

    let env = EnvConfig::load();
    if env.has_any() {
        debug!("Environment overrides present");
    }

    let config_path = args.config.as_deref();

    match args.command {
        cli::Command::List(list_args) => {
            list_scenarios(list_args, &load_config(config_path, &env)?);
        }
        cli::Command::Instances => {
            show_instances(&load_config(config_path, &env)?);
        }
        cli::Command::Plan(plan_args) => {
            plan_cases(plan_args, &load_config(config_path, &env)?, &env)?;
        }
        cli::Command::Run(run_args) => {
            run_cases(run_args, load_config(config_path, &env)?, &env).await?;
        }
        cli::Command::Results(results_args) => {
            show_results(results_args)?;
        }
        cli::Command::Config(config_args) => {
            manage_config(config_args, config_path, &env)?;
        }
    }

    Ok(())
}

/// Config from `--config`, `DLC_EC2_CONFIG` or the standard locations,
/// with environment overrides applied
fn load_config(path: Option<&str>, env: &EnvConfig) -> Result<AppConfig> {
    let path = path
        .map(PathBuf::from)
        .or_else(|| env.config_file.as_ref().map(PathBuf::from));
    let mut config = AppConfig::load_or_default(path.as_deref())?;
    config.apply_env(env);
    Ok(config)
}

fn resolve_image(image: Option<&str>, env: &EnvConfig) -> Result<ImageReference> {
    let uri = image
        .map(String::from)
        .or_else(|| env.image.clone())
        .context("No image given. Use --image or set DLC_EC2_IMAGE")?;
    ImageReference::parse(&uri).with_context(|| format!("Invalid image: {uri}"))
}

fn scenario_filter(selection: &cli::SelectionArgs) -> Result<ScenarioFilter> {
    let filter = ScenarioFilter {
        names: selection.scenarios.clone(),
        integration: selection.integration.clone(),
        model: selection.model.clone(),
    };
    if let Some(unknown) = filter.unknown_name() {
        anyhow::bail!("Unknown scenario: {unknown}. See `dlc-ec2-tests list`");
    }
    Ok(filter)
}

fn run_context(image: ImageReference, config: &AppConfig) -> RunContext {
    RunContext::new(
        image,
        Arc::new(config.connection_provider()),
        Arc::new(TrainingDispatcher::new(config.dispatch_options())),
    )
    .with_prefix(&config.container_tests_prefix)
    .with_catalog(config.instance_catalog())
    .with_gates(config.external_gates.clone())
    .with_compat(Arc::new(config.compatibility()))
}

fn list_scenarios(args: cli::ListArgs, config: &AppConfig) {
    let all = scenarios::all();
    println!("\nPyTorch Training Scenarios ({} total)\n", all.len());
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    for scenario in all {
        if args.detailed {
            let gates: Vec<String> = scenario.gates.iter().map(ToString::to_string).collect();
            println!("  {}", scenario.name);
            println!(
                "    Markers: integration={}, model={}",
                scenario.markers.integration.unwrap_or("-"),
                scenario.markers.model
            );
            println!("    Pool:    {}", scenario.pool);
            if !gates.is_empty() {
                println!("    Gates:   {}", gates.join(", "));
            }
            if scenario.check_compatibility {
                println!("    Checks image/instance compatibility");
            }
            println!(
                "    Command: {}",
                scenario.command_path(&config.container_tests_prefix)
            );
            println!();
        } else {
            println!("  {:45} [{}]", scenario.name, scenario.pool);
        }
    }

    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━\n");
}

fn show_instances(config: &AppConfig) {
    let selector = config.selector();

    println!("\nInstance Pools:\n");
    for pool in InstancePool::all() {
        match selector.select_pool(pool) {
            Ok(instance_types) => {
                let described: Vec<String> = instance_types
                    .iter()
                    .map(|it| match selector.catalog().gpu_count(it) {
                        Ok(gpus) => format!("{it} ({gpus} GPU)"),
                        Err(_) => it.clone(),
                    })
                    .collect();
                println!("  {:12} {}", pool.to_string(), described.join(", "));
            }
            Err(e) => println!("  {:12} ✗ {}", pool.to_string(), e),
        }
    }

    println!("\nIncompatibility Rules:\n");
    for rule in config.compatibility().rules() {
        println!("  - {} [{}]", rule.description, rule.instance_types.join(", "));
    }
    println!();
}

fn plan_cases(args: cli::PlanArgs, config: &AppConfig, env: &EnvConfig) -> Result<()> {
    let image = resolve_image(args.selection.image.as_deref(), env)?;
    let collection = scenarios::collect(
        scenarios::all(),
        &config.selector(),
        &scenario_filter(&args.selection)?,
    );

    let context = run_context(image, config);

    println!("\nPlan for {}", context.image);
    match context.image.framework_and_version() {
        Ok((framework, version)) => {
            let cuda = context
                .image
                .cuda_version()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "-".to_string());
            println!("  {framework} {version}, CUDA {cuda}\n");
        }
        Err(e) => println!("  {e}\n"),
    }
    for error in &collection.errors {
        println!("  {:52} ! ERROR  {}", error.scenario, error.message.as_deref().unwrap_or(""));
    }

    let mut runnable = 0;
    for case in &collection.cases {
        match context.plan(case) {
            Ok(Verdict::Run) => {
                runnable += 1;
                println!("  {:52} RUN", case.id());
            }
            Ok(Verdict::Skip(reason)) => println!("  {:52} SKIP   {}", case.id(), reason),
            Err(e) => println!("  {:52} ERROR  {}", case.id(), e),
        }
    }

    println!(
        "\n{} of {} cases would run\n",
        runnable,
        collection.cases.len()
    );
    Ok(())
}

async fn run_cases(args: cli::RunArgs, mut config: AppConfig, env: &EnvConfig) -> Result<()> {
    let image = resolve_image(args.selection.image.as_deref(), env)?;

    if let Some(host) = &args.host {
        config.hosts.clear();
        config.default_host = Some(host.clone());
    }
    if let Some(timeout) = args.timeout {
        config.timeout_secs = timeout;
    }
    let parallel = args.parallel || config.parallel;
    let concurrent = args.concurrent.unwrap_or(config.max_concurrent);

    let format_name = args.format.clone().unwrap_or_else(|| env.format_or("table"));
    let format = OutputFormat::from_str(&format_name).unwrap_or_else(|| {
        warn!("Unknown output format '{}', using table", format_name);
        OutputFormat::Table
    });

    let collection = scenarios::collect(
        scenarios::all(),
        &config.selector(),
        &scenario_filter(&args.selection)?,
    );
    info!(
        "Collected {} cases ({} collection errors) for {}",
        collection.cases.len(),
        collection.errors.len(),
        image
    );

    let context = Arc::new(run_context(image, &config));
    let started_at = Utc::now();

    let summary = if parallel {
        let executor = ParallelExecutor::new(concurrent);
        info!("Running up to {} cases at a time", executor.max_concurrent());
        executor.run_all(context, collection).await
    } else {
        ScenarioRunner::new(context).run_all(collection).await
    };

    let formatter = ResultFormatter::new(format);
    println!("{}", formatter.format_summary(&summary));

    if let Some(path) = &args.output {
        output::write_summary_to_file(path, &summary, format)?;
        info!("Wrote summary to {}", path);
    }

    let success = summary.is_success();

    if args.save {
        let run = StoredRun::new(summary, started_at).with_concurrency(parallel, concurrent);
        let storage = ResultsStorage::default_dir();
        let path = storage.save(&run)?;
        println!("✓ Results saved: {} ({})", run.id, path.display());
    }

    if !success {
        std::process::exit(1);
    }

    Ok(())
}

fn show_results(args: cli::ResultsArgs) -> Result<()> {
    let storage = ResultsStorage::default_dir();
    debug!("Reading results from {}", storage.base_dir().display());

    if let Some(id) = &args.delete {
        storage.delete(id)?;
        println!("✓ Deleted run: {id}");
        return Ok(());
    }

    let selected = match &args.run {
        Some(id) => Some(storage.load(id)?),
        None if args.export.is_some() => storage.latest(args.image.as_deref())?,
        None => None,
    };

    if let Some(run) = &selected {
        match args.format.as_str() {
            "json" => println!("{}", serde_json::to_string_pretty(run)?),
            other => {
                let format = OutputFormat::from_str(other).unwrap_or(OutputFormat::Table);
                println!("Run ID: {} ({})", run.id, run.started_at.format("%Y-%m-%d %H:%M:%S"));
                println!("{}", ResultFormatter::new(format).format_summary(&run.summary));
            }
        }

        if let Some(export_path) = &args.export {
            let path = Path::new(export_path);
            let format = ExportFormat::from_extension(path).unwrap_or(ExportFormat::Json);
            storage.export(run, path, format)?;
            println!("\n✓ Results exported to: {}", path.display());
        }
        return Ok(());
    }

    let runs = storage.list_runs(args.image.as_deref())?;
    if runs.is_empty() {
        println!("\n📭 No stored results found.");
        println!("   Run tests with: dlc-ec2-tests run --image <uri> --save");
        return Ok(());
    }

    println!("\n┌───────────────────────────────────────────────────────────────────────────────────────────────┐");
    println!("│ Stored Runs                                                                                   │");
    println!("├──────────────────────┬──────────────────┬─────────────────────────────┬───────────┬────────┤");
    for run in &runs {
        let len = run.image.chars().count();
        let image = if len > 27 {
            let tail: String = run.image.chars().skip(len - 24).collect();
            format!("...{tail}")
        } else {
            run.image.clone()
        };
        println!(
            "│ {:20} │ {:16} │ {:27} │ {:>3}/{:<3} ok │ {:>5.1}% │",
            run.id,
            run.started_at.format("%Y-%m-%d %H:%M").to_string(),
            image,
            run.passed,
            run.total,
            run.pass_rate
        );
        if run.failed > 0 {
            debug!("{}: {} failed or errored", run.id, run.failed);
        }
    }
    println!("└──────────────────────┴──────────────────┴─────────────────────────────┴───────────┴────────┘");
    println!("\nUse --run <id> to view a run, --export <file> to export it.\n");

    Ok(())
}

fn manage_config(args: cli::ConfigArgs, path: Option<&str>, env: &EnvConfig) -> Result<()> {
    match args.action {
        cli::ConfigAction::Init { output, force } => {
            let path = Path::new(&output);
            if path.exists() && !force {
                anyhow::bail!(
                    "Configuration file already exists: {output}. Use --force to overwrite."
                );
            }

            AppConfig::example().save(path)?;
            println!("✓ Configuration file created: {output}");
            println!("\nEdit the file to set hosts, SSH key and instance types.");
            for note in AppConfig::example().gate_notes() {
                println!("Note: {note}");
            }
        }

        cli::ConfigAction::Show { format } => {
            let config = load_config(path, env)?;
            let output = if format == "json" {
                serde_json::to_string_pretty(&config)?
            } else {
                serde_yaml::to_string(&config)?
            };
            println!("{output}");
        }

        cli::ConfigAction::Validate { file } => {
            let path = file
                .map(PathBuf::from)
                .or_else(|| path.map(PathBuf::from))
                .or_else(AppConfig::find)
                .context("No configuration file found")?;

            match AppConfig::load(&path) {
                Ok(_) => {
                    println!("✓ Configuration file is valid: {}", path.display());
                }
                Err(e) => {
                    println!("✗ Configuration file is invalid: {}", path.display());
                    println!("  Error: {e:#}");
                    return Err(e);
                }
            }
        }

        cli::ConfigAction::Env { help_vars } => {
            if help_vars {
                config::print_env_help();
            } else {
                env.print_summary();
            }
        }
    }

    Ok(())
}
