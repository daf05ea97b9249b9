use std::collections::BTreeMap;
use std::fs::{create_dir_all, File};
use std::path::{Path, PathBuf};

use clap::{Args, Command, FromArgMatches as _};
use log::{info, LevelFilter};
use serde::Serialize;

use crate::context::Context;
use crate::error::SimError;
use crate::log::set_log_level;
use crate::parameters::ContextParametersExt;
use crate::report::{CasesReport, ContextReportExt};
use crate::simulation::ContextSimulationExt;
use crate::tensor::Tape;
use crate::venue::VenueType;
use crate::world::World;

pub const CASES_REPORT_FILE: &str = "cases.csv";
pub const SUMMARY_FILE: &str = "summary.json";

/// Command line arguments of the `epigrad` runner
#[derive(Args, Debug, Clone)]
pub struct BaseArgs {
    /// Path to the JSON parameters file
    #[arg(short, long)]
    pub config: PathBuf,

    /// Path to the JSON world file
    #[arg(short, long)]
    pub world: PathBuf,

    /// Random seed, overriding the one in the parameters file
    #[arg(short, long)]
    pub random_seed: Option<u64>,

    /// Optional directory for the cases report and run summary
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,

    /// Log level: off, error, warn, info, debug or trace
    #[arg(short, long, default_value = "off")]
    pub log_level: LevelFilter,
}

/// Final counts of a run and the gradient of the final case count.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub steps: usize,
    pub final_cases: f64,
    pub daily_cases: Vec<f64>,
    pub log_beta_gradients: BTreeMap<VenueType, f64>,
    /// Present when the run was seeded from a fraction of the population.
    pub seed_fraction_gradient: Option<f64>,
}

fn create_epigrad_cli() -> Command {
    let cli = Command::new("epigrad");
    BaseArgs::augment_args(cli)
}

/// Parses the process arguments and runs the simulation they describe.
///
/// # Errors
/// Returns an error if argument parsing or the run fails
pub fn run_with_args() -> Result<RunSummary, Box<dyn std::error::Error>> {
    let matches = create_epigrad_cli().get_matches();
    let args = BaseArgs::from_arg_matches(&matches)?;
    Ok(run_with_base_args(&args)?)
}

/// Loads parameters and world, runs to the end of the timer and differentiates the final case
/// count against every `log_beta`.
pub fn run_with_base_args(args: &BaseArgs) -> Result<RunSummary, SimError> {
    set_log_level(args.log_level);

    let mut context = Context::new();
    context.load_parameters_from_file(&args.config)?;
    if let Some(seed) = args.random_seed {
        let mut parameters = context.get_parameters()?.clone();
        parameters.seed = seed;
        context.set_parameters(parameters)?;
    }

    let world = World::from_file(&args.world)?;
    let tape = Tape::new();
    context.build_simulation(&tape, world)?;

    if let Some(output_dir) = &args.output_dir {
        context.add_report::<CasesReport>(&output_dir.join(CASES_REPORT_FILE))?;
    }

    let seed_fraction = context.seed_infections()?;
    let outcome = context.run_simulation()?;
    let final_cases = outcome.final_cases()?;
    let gradients = final_cases.backward()?;

    let simulation = context
        .get_simulation()
        .ok_or_else(|| SimError::SimError("the simulation was not returned".to_string()))?;
    let log_beta_gradients: BTreeMap<VenueType, f64> = simulation
        .passing()
        .log_betas()
        .map(|(venue_type, log_beta)| (venue_type, gradients.scalar_wrt(log_beta)))
        .collect();
    for (venue_type, gradient) in &log_beta_gradients {
        info!("d(final cases)/d(log_beta[{venue_type}]) = {gradient}");
    }

    let summary = RunSummary {
        steps: outcome.steps(),
        final_cases: final_cases.item()?,
        daily_cases: outcome.daily_cases,
        log_beta_gradients,
        seed_fraction_gradient: seed_fraction.map(|fraction| gradients.scalar_wrt(&fraction)),
    };
    info!(
        "{} infected after {} steps",
        summary.final_cases, summary.steps
    );

    if let Some(output_dir) = &args.output_dir {
        write_summary(&summary, output_dir)?;
    }
    Ok(summary)
}

fn write_summary(summary: &RunSummary, output_dir: &Path) -> Result<(), SimError> {
    create_dir_all(output_dir)?;
    let file = File::create(output_dir.join(SUMMARY_FILE))?;
    serde_json::to_writer_pretty(file, summary)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn args(config: &str) -> BaseArgs {
        BaseArgs {
            config: PathBuf::from(config),
            world: PathBuf::from("tests/data/world.json"),
            random_seed: None,
            output_dir: None,
            log_level: LevelFilter::Off,
        }
    }

    #[test]
    fn cli_parses_base_args() {
        let matches = create_epigrad_cli()
            .try_get_matches_from([
                "epigrad",
                "--config",
                "params.json",
                "-w",
                "world.json",
                "--random-seed",
                "42",
                "--log-level",
                "debug",
            ])
            .unwrap();
        let args = BaseArgs::from_arg_matches(&matches).unwrap();
        assert_eq!(args.config, PathBuf::from("params.json"));
        assert_eq!(args.world, PathBuf::from("world.json"));
        assert_eq!(args.random_seed, Some(42));
        assert_eq!(args.output_dir, None);
        assert_eq!(args.log_level, LevelFilter::Debug);
    }

    #[test]
    fn cli_requires_config_and_world() {
        assert!(create_epigrad_cli()
            .try_get_matches_from(["epigrad", "--config", "params.json"])
            .is_err());
    }

    #[test]
    fn run_writes_report_and_summary() {
        let temp_dir = tempdir().unwrap();
        let mut args = args("tests/data/parameters.json");
        args.output_dir = Some(temp_dir.path().join("out"));
        let summary = run_with_base_args(&args).unwrap();

        assert_eq!(summary.steps, 14);
        assert!(summary.final_cases >= 2.0);
        assert_eq!(
            summary.log_beta_gradients.keys().copied().collect::<Vec<_>>(),
            vec![
                VenueType::Household,
                VenueType::School,
                VenueType::Company,
                VenueType::Leisure
            ]
        );
        assert!(summary.seed_fraction_gradient.is_none());

        let mut reader =
            csv::Reader::from_path(temp_dir.path().join("out").join(CASES_REPORT_FILE)).unwrap();
        assert_eq!(reader.deserialize::<CasesReport>().count(), 14);

        let written: serde_json::Value = serde_json::from_reader(
            File::open(temp_dir.path().join("out").join(SUMMARY_FILE)).unwrap(),
        )
        .unwrap();
        assert_eq!(written["steps"], 14);
        assert!(written["log_beta_gradients"]["school"].is_number());
    }

    #[test]
    fn random_seed_overrides_parameters() {
        let run = |seed| {
            let mut args = args("tests/data/parameters_fraction.json");
            args.random_seed = Some(seed);
            run_with_base_args(&args).unwrap()
        };
        let first = run(1);
        assert_eq!(first, run(1));
        assert!(first.seed_fraction_gradient.is_some());
    }

    #[test]
    fn missing_config_is_io_error() {
        let result = run_with_base_args(&args("tests/data/does_not_exist.json"));
        assert!(matches!(result, Err(SimError::IoError(_))));
    }
}
