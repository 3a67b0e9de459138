#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(unused_variables)]

use clap::{Args, CommandFactory, Parser, Subcommand};
use oncoscope::Task;
use oncoscope::config::ServiceConfig;
use oncoscope::data::PredictionRows;
use oncoscope::genetic::{GeneticResult, predict_genetic};
use oncoscope::guidelines::GuidelineTable;
use oncoscope::inference::TaskResult;
use oncoscope::report::BatchResult;
use oncoscope::service::ModelService;
use oncoscope::task::UnknownTaskName;
use oncoscope::therapy::TherapyRecommendation;
use serde::Serialize;
use std::error::Error;
use std::fs;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process;
use std::str::FromStr;

#[derive(Parser)]
#[command(
    name = "oncoscope",
    version,
    about = "Multi-task tumour classifier registry and inference pipeline",
    long_about = "Trains, persists and serves five per-task classifiers over the 30-value \
                 cell-nucleus feature schema, and composes their outputs into one report."
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Train every task from the labelled dataset and save the artifacts
    #[command(
        visible_alias = "retrain",
        about = "Train all task models (outputs: <model_dir>/<task>_model.json)"
    )]
    Train(TrainArgs),

    /// Comprehensive prediction for every row of a CSV file
    #[command(about = "Run the comprehensive report over a CSV of feature rows")]
    Predict(PredictArgs),

    /// Single-task prediction for every row of a CSV file
    #[command(about = "Run one task over a CSV of feature rows")]
    PredictTask(PredictTaskArgs),

    /// Show what the active models are and how they were trained
    #[command(about = "Print model metadata and service health as JSON")]
    Info(SharedArgs),

    /// Install a therapy guideline table
    #[command(about = "Validate and install a guideline JSON table")]
    Guidelines(GuidelinesArgs),
}

#[derive(Args)]
struct SharedArgs {
    /// TOML service configuration; defaults apply when omitted
    #[arg(long, value_name = "TOML")]
    config: Option<PathBuf>,

    /// Overrides the configured model directory
    #[arg(long, value_name = "DIR")]
    model_dir: Option<PathBuf>,
}

#[derive(Args)]
struct TrainArgs {
    #[command(flatten)]
    shared: SharedArgs,

    /// Overrides the configured training dataset
    #[arg(long, value_name = "CSV")]
    dataset: Option<PathBuf>,
}

#[derive(Args)]
struct PredictArgs {
    #[command(flatten)]
    shared: SharedArgs,

    /// CSV with the 30 feature columns, one case per row
    #[arg(value_name = "CSV")]
    input: PathBuf,

    /// Write the JSON here instead of stdout
    #[arg(long, value_name = "PATH")]
    output: Option<PathBuf>,
}

#[derive(Args)]
struct PredictTaskArgs {
    #[command(flatten)]
    shared: SharedArgs,

    /// diagnosis, cancer_type, metastasis, tissue_change, prognosis,
    /// therapy or genetic
    #[arg(long)]
    task: String,

    #[arg(value_name = "CSV")]
    input: PathBuf,
}

#[derive(Args)]
struct GuidelinesArgs {
    #[command(flatten)]
    shared: SharedArgs,

    /// JSON object mapping a diagnosis label to its therapy plan
    #[arg(value_name = "JSON")]
    table: PathBuf,
}

#[derive(Serialize)]
struct PredictOutput {
    ids: Vec<String>,
    #[serde(flatten)]
    batch: BatchResult,
}

/// What `predict-task` runs: one trained task, or one of the two results
/// derived without a model of their own.
#[derive(Clone, Copy)]
enum Target {
    Trained(Task),
    Therapy,
    Genetic,
}

impl FromStr for Target {
    type Err = UnknownTaskName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "therapy" => Ok(Target::Therapy),
            "genetic" => Ok(Target::Genetic),
            _ => s.parse().map(Target::Trained),
        }
    }
}

#[derive(Serialize)]
#[serde(tag = "task", rename_all = "snake_case")]
enum DerivedResult {
    Therapy(TherapyRecommendation),
    Genetic(GeneticResult),
}

#[derive(Serialize)]
#[serde(untagged)]
enum RowResult {
    Trained(TaskResult),
    Derived(DerivedResult),
}

#[derive(Serialize)]
struct TaskRow {
    id: String,
    #[serde(flatten)]
    result: RowResult,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let Cli { command } = Cli::parse();
    let result = match command {
        Some(Commands::Train(args)) => train(args),
        Some(Commands::Predict(args)) => predict(args),
        Some(Commands::PredictTask(args)) => predict_task(args),
        Some(Commands::Info(args)) => info(args),
        Some(Commands::Guidelines(args)) => install_guidelines(args),
        None => Cli::command().print_help().map_err(Into::into),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn resolve_config(args: &SharedArgs) -> Result<ServiceConfig, Box<dyn Error>> {
    let mut config = match &args.config {
        Some(path) => {
            log::info!("Loading configuration from {}", path.display());
            ServiceConfig::load(path)?
        }
        None => ServiceConfig::default(),
    };
    if let Some(dir) = &args.model_dir {
        config.model_dir = dir.clone();
    }
    Ok(config)
}

fn write_json<T: Serialize>(value: &T, output: Option<&Path>) -> Result<(), Box<dyn Error>> {
    match output {
        Some(path) => {
            let mut writer = BufWriter::new(fs::File::create(path)?);
            serde_json::to_writer_pretty(&mut writer, value)?;
            writer.flush()?;
            log::info!("Results written to {}", path.display());
        }
        None => {
            let stdout = io::stdout();
            let mut writer = stdout.lock();
            serde_json::to_writer_pretty(&mut writer, value)?;
            writeln!(writer)?;
        }
    }
    Ok(())
}

fn train(args: TrainArgs) -> Result<(), Box<dyn Error>> {
    let mut config = resolve_config(&args.shared)?;
    if let Some(dataset) = args.dataset {
        config.dataset_path = dataset;
    }

    log::info!("Training from {}", config.dataset_path.display());
    let service = ModelService::new(config)?;
    let report = service.retrain()?;
    write_json(&report, None)
}

fn predict(args: PredictArgs) -> Result<(), Box<dyn Error>> {
    let service = ModelService::start(resolve_config(&args.shared)?)?;
    let rows = PredictionRows::from_path(&args.input)?;
    log::info!("Loaded {} rows from {}", rows.vectors.len(), args.input.display());
    let batch = service.predict_batch(&rows.vectors)?;
    write_json(&PredictOutput { ids: rows.ids, batch }, args.output.as_deref())
}

fn predict_task(args: PredictTaskArgs) -> Result<(), Box<dyn Error>> {
    let target: Target = args.task.parse()?;
    let rows = PredictionRows::from_path(&args.input)?;
    // The genetic rule reads raw measurements only, so it needs no models.
    let service = match target {
        Target::Genetic => None,
        Target::Trained(_) | Target::Therapy => {
            Some(ModelService::start(resolve_config(&args.shared)?)?)
        }
    };

    let mut results = Vec::with_capacity(rows.vectors.len());
    for (id, vector) in rows.ids.into_iter().zip(&rows.vectors) {
        let result = match (target, &service) {
            (Target::Genetic, _) => {
                RowResult::Derived(DerivedResult::Genetic(predict_genetic(vector)))
            }
            (Target::Trained(task), Some(service)) => {
                RowResult::Trained(service.predict_task(task, vector)?)
            }
            (Target::Therapy, Some(service)) => {
                RowResult::Derived(DerivedResult::Therapy(service.predict_therapy(vector)?))
            }
            (_, None) => return Err("no models are loaded for this task".into()),
        };
        results.push(TaskRow { id, result });
    }
    write_json(&results, None)
}

fn info(args: SharedArgs) -> Result<(), Box<dyn Error>> {
    let service = ModelService::start(resolve_config(&args)?)?;
    let value = serde_json::json!({
        "health": service.health(),
        "models": service.model_info(),
    });
    write_json(&value, None)
}

fn install_guidelines(args: GuidelinesArgs) -> Result<(), Box<dyn Error>> {
    let config = resolve_config(&args.shared)?;
    let table = GuidelineTable::load(&args.table)?;
    table.save(&config.guidelines_path)?;
    log::info!(
        "Installed {} guideline entries at {}",
        table.len(),
        config.guidelines_path.display()
    );
    Ok(())
}
