//! Data records, pool files, and synthetic scenario generation.
//!
//! This module provides:
//! - A struct (`ObservationRecord`) for reading and writing observation
//!   series to/from CSV files
//! - Pool file helpers for the hazard prior and innovation pools
//! - `SampleRecord` and the long-format CSV export of posterior samples
//! - `ScenarioConfig` and a generator for synthetic sign-switching data
//! - Unit tests for validating functionality

use rand::Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use std::io;
use std::path::Path;

use crate::filter::PosteriorSamples;
use crate::{FilterError, SignLabel};

/// Struct representing a single row of an observation series CSV.
///
/// The `sign_label` column carries the integer feedback code `-1` / `0` /
/// `+1`; [`split_series`] converts a record batch into the typed series the
/// filter consumes.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ObservationRecord {
    /// Raw observation value, before any innovation perturbation.
    pub observation: f64,
    /// Feedback code for the step: -1, 0, or 1.
    pub sign_label: i8,
}

impl ObservationRecord {
    /// Reads a CSV file and returns a vector of `ObservationRecord` structs.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use hazardpf::sim::ObservationRecord;
    ///
    /// let records = ObservationRecord::from_csv("./data/series.csv")
    ///     .expect("Failed to read observation series");
    /// println!("Loaded {} records", records.len());
    /// ```
    pub fn from_csv<P: AsRef<Path>>(path: P) -> Result<Vec<Self>, Box<dyn std::error::Error>> {
        let mut rdr = csv::Reader::from_path(path)?;
        let mut records = Vec::new();
        for result in rdr.deserialize() {
            let record: Self = result?;
            records.push(record);
        }
        Ok(records)
    }

    /// Writes a vector of `ObservationRecord` structs to a CSV file.
    pub fn to_csv<P: AsRef<Path>>(records: &[Self], path: P) -> io::Result<()> {
        let mut writer = csv::Writer::from_path(path)?;
        for record in records {
            writer.serialize(record)?;
        }
        writer.flush()?;
        Ok(())
    }
}

/// Split records into the observation and label series the filter consumes.
///
/// Fails on the first record whose feedback code is not `-1`, `0`, or `1`.
pub fn split_series(
    records: &[ObservationRecord],
) -> Result<(Vec<f64>, Vec<SignLabel>), FilterError> {
    let mut observations = Vec::with_capacity(records.len());
    let mut labels = Vec::with_capacity(records.len());
    for record in records {
        observations.push(record.observation);
        labels.push(SignLabel::try_from(record.sign_label)?);
    }
    Ok((observations, labels))
}

#[derive(Debug, Deserialize, Serialize)]
struct PoolRecord {
    value: f64,
}

/// Reads a single-column `value` CSV into a pool vector.
///
/// Used for both the hazard prior pool and the innovation pool; range
/// checking happens in the filter, not here.
pub fn read_pool_csv<P: AsRef<Path>>(path: P) -> Result<Vec<f64>, Box<dyn std::error::Error>> {
    let mut rdr = csv::Reader::from_path(path)?;
    let mut values = Vec::new();
    for result in rdr.deserialize() {
        let record: PoolRecord = result?;
        values.push(record.value);
    }
    Ok(values)
}

/// Writes a pool vector as a single-column `value` CSV.
pub fn write_pool_csv<P: AsRef<Path>>(values: &[f64], path: P) -> io::Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    for &value in values {
        writer.serialize(PoolRecord { value })?;
    }
    writer.flush()?;
    Ok(())
}

/// One row of the long-format posterior sample export.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct SampleRecord {
    pub repetition: usize,
    pub step: usize,
    pub pos_belief: f64,
    pub neg_belief: f64,
    pub hazard: f64,
    pub noise_variance: f64,
}

/// Writes posterior samples to CSV, one row per repetition and step.
///
/// Rows are ordered by repetition, then step, so the file streams in the
/// same order the estimator produced the samples.
pub fn write_samples_csv<P: AsRef<Path>>(samples: &PosteriorSamples, path: P) -> io::Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    for repetition in 0..samples.num_repetitions() {
        for step in 0..samples.num_steps() {
            writer.serialize(SampleRecord {
                repetition,
                step,
                pos_belief: samples.pos_belief[(repetition, step)],
                neg_belief: samples.neg_belief[(repetition, step)],
                hazard: samples.hazard[(repetition, step)],
                noise_variance: samples.noise_variance[(repetition, step)],
            })?;
        }
    }
    writer.flush()?;
    Ok(())
}

/// Reads a posterior sample CSV back into records.
pub fn read_samples_csv<P: AsRef<Path>>(
    path: P,
) -> Result<Vec<SampleRecord>, Box<dyn std::error::Error>> {
    let mut rdr = csv::Reader::from_path(path)?;
    let mut records = Vec::new();
    for result in rdr.deserialize() {
        let record: SampleRecord = result?;
        records.push(record);
    }
    Ok(records)
}

/// Evenly spaced hazard grid on the open interval (0, 1).
///
/// Returns `count` values at `i / (count + 1)`, excluding both endpoints so
/// a grid prior never pins a particle to a transition weight of exactly
/// zero or one.
pub fn evenly_spaced_pool(count: usize) -> Vec<f64> {
    (1..=count)
        .map(|i| i as f64 / (count + 1) as f64)
        .collect()
}

/// Parameters for synthetic sign-switching scenario generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioConfig {
    /// Number of steps to generate.
    pub num_steps: usize,
    /// True hazard driving the hidden sign process, in [0, 1].
    pub true_hazard: f64,
    /// Separation between the signed generative means; must be nonzero.
    pub mean_shift: f64,
    /// True observation noise standard deviation; must be positive.
    pub noise_std: f64,
    /// Every k-th step carries the true sign as feedback; 0 disables
    /// feedback entirely.
    pub feedback_interval: usize,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        ScenarioConfig {
            num_steps: 200,
            true_hazard: 0.1,
            mean_shift: 1.0,
            noise_std: 1.0,
            feedback_interval: 5,
        }
    }
}

/// Generate a synthetic observation series from the generative model.
///
/// The hidden sign starts with a fair coin flip and flips between steps
/// with probability `true_hazard`. Each observation is the signed mean
/// `±mean_shift / 2` plus Gaussian noise. When `feedback_interval` is `k > 0`,
/// steps `k-1, 2k-1, ...` carry the true sign as their feedback label and
/// every other step is labeled `0`.
pub fn generate_scenario<R: Rng>(
    config: &ScenarioConfig,
    rng: &mut R,
) -> Result<Vec<ObservationRecord>, FilterError> {
    if !(0.0..=1.0).contains(&config.true_hazard) {
        return Err(FilterError::HazardOutOfRange(config.true_hazard));
    }
    if config.mean_shift == 0.0 {
        return Err(FilterError::ZeroMeanShift);
    }
    if !config.noise_std.is_finite() || config.noise_std <= 0.0 {
        return Err(FilterError::NonPositiveNoiseStd(config.noise_std));
    }
    let noise = Normal::new(0.0, config.noise_std).unwrap();
    let mut sign: f64 = if rng.random::<f64>() < 0.5 { 1.0 } else { -1.0 };
    let mut records = Vec::with_capacity(config.num_steps);
    for n in 0..config.num_steps {
        if n > 0 && rng.random::<f64>() < config.true_hazard {
            sign = -sign;
        }
        let observation = sign * config.mean_shift / 2.0 + noise.sample(rng);
        let sign_label =
            if config.feedback_interval > 0 && (n + 1) % config.feedback_interval == 0 {
                if sign > 0.0 { 1 } else { -1 }
            } else {
                0
            };
        records.push(ObservationRecord {
            observation,
            sign_label,
        });
    }
    Ok(records)
}
