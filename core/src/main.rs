use clap::{Args, Parser};
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::Serialize;
use std::error::Error;
use std::path::PathBuf;

use hazardpf::FilterConfig;
use hazardpf::filter::run_filter;
use hazardpf::sim::{
    ObservationRecord, ScenarioConfig, evenly_spaced_pool, generate_scenario, read_pool_csv,
    split_series, write_samples_csv,
};

const LONG_ABOUT: &str = "HAZARDPF: A particle-filter estimator of hazard rate and noise variance for sign-switching observation streams.

This program jointly infers a latent hazard rate (the per-step probability that the hidden generative sign flips) and the observation noise variance from a sequence of noisy scalar observations. It runs several independent repetitions of the filter over the same sequence and writes, for every repetition and step, a posterior sample of the hazard, the pair of sign posteriors, and the running variance estimate.

Input data format:
* Input CSV: one row per step with columns `observation` (float) and `sign_label` (-1, 0, or 1; 0 means no feedback for that step)
* Pool CSVs (optional): a single `value` column; the hazard pool holds the prior support in [0, 1], the innovation pool holds additive observation perturbations

When no input file is given, the program synthesizes a scenario from the generative model using the scenario flags, which is the quickest way to exercise the estimator end to end.";

/// Command line arguments
#[derive(Parser)]
#[command(author, version, about, long_about = LONG_ABOUT)]
struct Cli {
    /// Input observation series CSV; omit to synthesize a scenario instead
    #[arg(short, long, value_parser)]
    input: Option<PathBuf>,
    /// Output CSV file path for the posterior samples
    #[arg(short, long, value_parser)]
    output: PathBuf,
    /// Filter parameters
    #[command(flatten)]
    filter: FilterArgs,
    /// Pool sources
    #[command(flatten)]
    pools: PoolArgs,
    /// Scenario synthesis settings (used when no input file is given)
    #[command(flatten)]
    scenario: ScenarioArgs,
    /// Path to a filter config file (json|yaml|yml|toml); overrides the filter flags
    #[arg(long)]
    config: Option<PathBuf>,
    /// Write a JSON run summary to this path
    #[arg(long)]
    summary_output: Option<PathBuf>,
}

#[derive(Args, Clone, Debug)]
struct FilterArgs {
    /// Number of hazard particles per repetition
    #[arg(long, default_value_t = 500)]
    particles: usize,
    /// Number of independent repetitions over the sequence
    #[arg(long, default_value_t = 10)]
    repetitions: usize,
    /// Per-particle probability of restarting from the prior pool each step
    #[arg(long, default_value_t = 0.01)]
    reset_rate: f64,
    /// Separation between the signed generative means
    #[arg(long, default_value_t = 1.0)]
    mean_shift: f64,
    /// Initial guess for the observation noise standard deviation
    #[arg(long, default_value_t = 1.0)]
    initial_noise_std: f64,
    /// Prior pseudo-count for the variance estimate
    #[arg(long, default_value_t = 1.0)]
    pseudo_count: f64,
    /// RNG seed (applies to any stochastic options)
    #[arg(long, default_value_t = 42)]
    seed: u64,
}

#[derive(Args, Clone, Debug)]
struct PoolArgs {
    /// Hazard prior pool CSV (single `value` column)
    #[arg(long)]
    hazard_pool: Option<PathBuf>,
    /// Grid size of the evenly spaced hazard pool used when no pool file is given
    #[arg(long, default_value_t = 20)]
    hazard_grid: usize,
    /// Innovation pool CSV (single `value` column); defaults to no perturbation
    #[arg(long)]
    innovation_pool: Option<PathBuf>,
}

#[derive(Args, Clone, Debug)]
struct ScenarioArgs {
    /// Steps to synthesize when no input file is given
    #[arg(long, default_value_t = 200)]
    scenario_steps: usize,
    /// True hazard of the synthesized sign process
    #[arg(long, default_value_t = 0.1)]
    scenario_hazard: f64,
    /// True noise standard deviation of the synthesized observations
    #[arg(long, default_value_t = 1.0)]
    scenario_noise_std: f64,
    /// Feedback cadence of the synthesized series (0 disables feedback)
    #[arg(long, default_value_t = 5)]
    scenario_feedback_interval: usize,
    /// Write the synthesized series to this CSV
    #[arg(long)]
    scenario_output: Option<PathBuf>,
}

fn build_config(args: &FilterArgs) -> FilterConfig {
    FilterConfig {
        num_particles: args.particles,
        num_repetitions: args.repetitions,
        reset_rate: args.reset_rate,
        mean_shift: args.mean_shift,
        initial_noise_std: args.initial_noise_std,
        pseudo_count: args.pseudo_count,
        seed: args.seed,
    }
}

/// Run metadata written alongside the samples when requested.
#[derive(Serialize)]
struct RunSummary {
    started_at: String,
    config: FilterConfig,
    num_observations: usize,
    hazard_pool_len: usize,
    innovation_pool_len: usize,
    final_mean_hazard: Option<f64>,
    final_mean_variance: Option<f64>,
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    // Build filter configuration
    let config = if let Some(ref cfg_path) = cli.config {
        match FilterConfig::from_file(cfg_path) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("Failed to read config {}: {}", cfg_path.display(), e);
                return Err(Box::new(e));
            }
        }
    } else {
        build_config(&cli.filter)
    };
    config.validate()?;

    // Load or synthesize the observation series
    let records = match &cli.input {
        Some(input) => {
            if !input.exists() {
                return Err(format!("Input file '{}' does not exist.", input.display()).into());
            }
            if !input.is_file() {
                return Err(format!("Input path '{}' is not a file.", input.display()).into());
            }
            let records = ObservationRecord::from_csv(input)?;
            println!("Read {} records from {}", records.len(), input.display());
            records
        }
        None => {
            let scenario = ScenarioConfig {
                num_steps: cli.scenario.scenario_steps,
                true_hazard: cli.scenario.scenario_hazard,
                mean_shift: config.mean_shift,
                noise_std: cli.scenario.scenario_noise_std,
                feedback_interval: cli.scenario.scenario_feedback_interval,
            };
            let mut rng = StdRng::seed_from_u64(config.seed);
            let records = generate_scenario(&scenario, &mut rng)?;
            println!(
                "Synthesized {} steps (true hazard {}, noise std {})",
                records.len(),
                scenario.true_hazard,
                scenario.noise_std
            );
            if let Some(ref path) = cli.scenario.scenario_output {
                ObservationRecord::to_csv(&records, path)?;
                println!("Synthesized series written to {}", path.display());
            }
            records
        }
    };
    let (observations, sign_labels) = split_series(&records)?;

    // Assemble the pools
    let hazard_pool = match &cli.pools.hazard_pool {
        Some(path) => {
            let pool = read_pool_csv(path)?;
            println!(
                "Read {} hazard pool values from {}",
                pool.len(),
                path.display()
            );
            pool
        }
        None => evenly_spaced_pool(cli.pools.hazard_grid),
    };
    let innovation_pool = match &cli.pools.innovation_pool {
        Some(path) => {
            let pool = read_pool_csv(path)?;
            println!(
                "Read {} innovation pool values from {}",
                pool.len(),
                path.display()
            );
            pool
        }
        None => vec![0.0],
    };

    // Ensure output directory exists
    if let Some(parent) = cli.output.parent() {
        if !parent.exists() && !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let started_at = chrono::Utc::now().to_rfc3339();
    println!(
        "Running {} repetitions of {} particles over {} steps...",
        config.num_repetitions,
        config.num_particles,
        observations.len()
    );
    let samples = run_filter(
        &config,
        &observations,
        &sign_labels,
        &hazard_pool,
        &innovation_pool,
    )?;

    write_samples_csv(&samples, &cli.output)?;
    println!("Results written to {}", cli.output.display());

    let last_step = samples.num_steps().checked_sub(1);
    let final_mean_hazard = last_step.map(|n| samples.mean_hazard_at(n));
    let final_mean_variance = last_step.map(|n| samples.mean_variance_at(n));
    if let (Some(hazard), Some(variance)) = (final_mean_hazard, final_mean_variance) {
        println!("Final-step posterior mean hazard: {:.4}", hazard);
        println!("Final-step mean noise variance: {:.4}", variance);
    }

    if let Some(ref path) = cli.summary_output {
        let summary = RunSummary {
            started_at,
            config: config.clone(),
            num_observations: observations.len(),
            hazard_pool_len: hazard_pool.len(),
            innovation_pool_len: innovation_pool.len(),
            final_mean_hazard,
            final_mean_variance,
        };
        let file = std::fs::File::create(path)?;
        serde_json::to_writer_pretty(file, &summary)?;
        println!("Run summary written to {}", path.display());
    }

    Ok(())
}
