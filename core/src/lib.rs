//! Particle-filter estimation of hazard rate and noise variance for
//! sign-switching observation streams.
//!
//! This crate implements a sequential Monte Carlo estimator that jointly
//! infers a latent hazard rate $H$ and an unknown observation variance
//! $\sigma^2$ from a stream of noisy scalar observations. The observations
//! are generated by a hidden two-state process: at each step the generative
//! mean sits at $+\mu/2$ or $-\mu/2$, and between steps the sign flips with
//! probability $H$ (the hazard). The filter runs several independent
//! repetitions over the same observation sequence and records, per repetition
//! and step, a posterior sample of the hazard, the pair of auxiliary sign
//! posteriors, and the running variance estimate.
//!
//! The model follows the normative changepoint framework of Glaze, Kable &
//! Gold (2015, *eLife*), extended with particle-based learning of the hazard
//! rate in the style of Glaze et al. (2018, *Nature Human Behaviour*) and an
//! online conjugate-style update of the observation variance. Variables are
//! named for the quantity they represent rather than the symbol used in the
//! papers: the hazard is `hazard` rather than `H`, the mean separation is
//! `mean_shift` rather than `mu`, and so on. This rule is sometimes relaxed
//! inside tight numerical loops where the paper notation is clearer.
//!
//! This crate is primarily built off of three additional dependencies:
//! - [`nalgebra`](https://crates.io/crates/nalgebra): Provides the matrix
//!   storage for the per-repetition, per-step posterior sample grids.
//! - [`rand`](https://crates.io/crates/rand) and
//!   [`rand_distr`](https://crates.io/crates/rand_distr): Provides random
//!   number generation for the particle draws and for synthetic scenario
//!   generation.
//! - [`serde`](https://crates.io/crates/serde) together with
//!   [`csv`](https://crates.io/crates/csv): Provides the configuration and
//!   record I/O surface.
//!
//! ## Crate overview
//!
//! This crate is organized into several modules:
//! - [filter]: The per-step recursion (likelihood weighting, selection,
//!   variance tracking, changepoint reweighting) and the multi-repetition
//!   driver [`filter::run_filter`].
//! - [particle]: The hazard particle population and its mutate-or-inherit
//!   diversification step.
//! - [resample]: The weighted-selection primitive shared by every sampling
//!   site in the crate.
//! - [sim]: CSV record types, pool files, and synthetic scenario generation
//!   for testing and calibration.
//!
//! ## Generative model and recursion
//!
//! Let $s_n \in \\{-1, +1\\}$ be the hidden sign at step $n$ and $x_n$ the
//! observation after an innovation draw has been added. The two signed
//! generators are Gaussians at $\pm\mu/2$ with common variance $\sigma^2$,
//! so the log-likelihood ratio of the signed states given $x_n$ is
//!
//! $$
//! \mathrm{LLR}(x_n) = \frac{x_n \mu}{\sigma^2} = \frac{x_n}{F},
//! \qquad F = \frac{\sigma^2}{\mu},
//! $$
//!
//! and the state likelihoods follow the logistic link
//! $l_+ = 1/(1 + e^{-x_n/F})$, $l_- = 1 - l_+$.
//!
//! Each particle $m$ carries a candidate hazard $H_m$. Given the previous
//! auxiliary posterior $(q_+, q_-)$ the particle's one-step sign prediction
//! depends on the feedback label for the step: with no feedback the usual
//! hidden-Markov propagation applies,
//!
//! $$
//! \tilde q_+ = (1 - H_m)\\, q_+ + H_m\\, q_-,
//! \qquad
//! \tilde q_- = H_m\\, q_+ + (1 - H_m)\\, q_-,
//! $$
//!
//! while a signed feedback label pins the previous state and the prediction
//! reduces to $(1 - H_m, H_m)$ or $(H_m, 1 - H_m)$. The particle weight is
//! the evidence $w_m = l_+ \tilde q_+ + l_- \tilde q_-$. One particle is
//! selected per step in proportion to $w_m$; its hazard is the step's hazard
//! sample and its normalized posterior pair becomes the new $(q_+, q_-)$.
//!
//! The variance estimate is a running ratio $\sigma^2 = SS / (N_0 + n + 1)$
//! where $SS$ accumulates squared residuals against the signed means,
//! mixture-weighted by $(q_+, q_-)$ when the upcoming step carries no
//! feedback. After each step the particle population is diversified: each
//! particle either restarts from the hazard prior pool (probability
//! `reset_rate`) or inherits a value from the population in proportion to the
//! step's final weights.
//!
//! All stochastic behavior is reproducible: every entry point takes either an
//! explicit random number generator or a seed, and the multi-repetition
//! driver gives each repetition its own deterministic generator.

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;
use thiserror::Error;

pub mod filter;
pub mod particle;
pub mod resample;
pub mod sim;

/// Errors reported by the filter and its input validation.
///
/// Validation failures are raised before any random draw happens, so a run
/// either starts clean or not at all. [`FilterError::DegenerateWeights`] is
/// the one mid-run failure: every particle weight collapsed to zero at a
/// selection or inheritance point, which leaves the categorical draw
/// undefined. There is no recovery path; the caller sees the failing step.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FilterError {
    #[error("hazard pool is empty")]
    EmptyHazardPool,
    #[error("innovation pool is empty")]
    EmptyInnovationPool,
    #[error("hazard pool value {0} is outside [0, 1]")]
    HazardOutOfRange(f64),
    #[error("initial noise standard deviation must be positive, got {0}")]
    NonPositiveNoiseStd(f64),
    #[error("variance pseudo-count must be positive, got {0}")]
    NonPositivePseudoCount(f64),
    #[error("mean shift must be nonzero")]
    ZeroMeanShift,
    #[error("reset rate {0} is outside [0, 1]")]
    ResetRateOutOfRange(f64),
    #[error("particle count must be at least one")]
    NoParticles,
    #[error("repetition count must be at least one")]
    NoRepetitions,
    #[error("observation and sign-label sequences differ in length: {observations} vs {labels}")]
    LengthMismatch { observations: usize, labels: usize },
    #[error("invalid sign label code {0}, expected -1, 0, or 1")]
    InvalidSignLabel(i8),
    #[error("particle weights vanished at step {step}")]
    DegenerateWeights { step: usize },
}

/// Feedback label attached to each observation step.
///
/// A signed label tells the filter which generative mean produced the step
/// (e.g. trial feedback in an experiment); `Mixed` means no feedback was
/// given and the filter must carry its own sign posterior through the
/// hidden-Markov propagation.
///
/// The on-disk encoding is the integer code `-1` / `0` / `+1`.
///
/// ```
/// use hazardpf::SignLabel;
///
/// let label = SignLabel::try_from(-1i8).unwrap();
/// assert_eq!(label, SignLabel::Negative);
/// assert_eq!(label.as_code(), -1);
/// assert!(SignLabel::try_from(3i8).is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignLabel {
    Negative,
    Mixed,
    Positive,
}

impl SignLabel {
    /// Integer code used in CSV files and external tooling.
    pub fn as_code(&self) -> i8 {
        match self {
            SignLabel::Negative => -1,
            SignLabel::Mixed => 0,
            SignLabel::Positive => 1,
        }
    }

    /// True for `Negative` and `Positive`, false for `Mixed`.
    pub fn is_signed(&self) -> bool {
        !matches!(self, SignLabel::Mixed)
    }
}

impl TryFrom<i8> for SignLabel {
    type Error = FilterError;

    fn try_from(code: i8) -> Result<Self, Self::Error> {
        match code {
            -1 => Ok(SignLabel::Negative),
            0 => Ok(SignLabel::Mixed),
            1 => Ok(SignLabel::Positive),
            other => Err(FilterError::InvalidSignLabel(other)),
        }
    }
}

/// Outcome of comparing two consecutive signed feedback labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeEvent {
    /// Both steps carried the same sign.
    Persisted,
    /// The sign flipped between the two steps.
    Changed,
}

/// Classify the transition from the current step's label to the next one.
///
/// Returns `None` unless both labels are signed; a `Mixed` label on either
/// side, or the absence of a next step, leaves the transition unobserved and
/// the particle weights untouched.
///
/// ```
/// use hazardpf::{ChangeEvent, SignLabel, classify_change};
///
/// let change = classify_change(SignLabel::Positive, Some(SignLabel::Negative));
/// assert_eq!(change, Some(ChangeEvent::Changed));
/// assert_eq!(classify_change(SignLabel::Positive, Some(SignLabel::Mixed)), None);
/// assert_eq!(classify_change(SignLabel::Positive, None), None);
/// ```
pub fn classify_change(current: SignLabel, next: Option<SignLabel>) -> Option<ChangeEvent> {
    match next {
        Some(next) if current.is_signed() && next.is_signed() => {
            if current == next {
                Some(ChangeEvent::Persisted)
            } else {
                Some(ChangeEvent::Changed)
            }
        }
        _ => None,
    }
}

/// Default seed value for reproducible runs
fn default_seed() -> u64 {
    42
}

fn default_num_particles() -> usize {
    500
}

fn default_num_repetitions() -> usize {
    10
}

fn default_reset_rate() -> f64 {
    0.01
}

fn default_mean_shift() -> f64 {
    1.0
}

fn default_initial_noise_std() -> f64 {
    1.0
}

fn default_pseudo_count() -> f64 {
    1.0
}

/// Filter configuration parameters.
///
/// Groups everything the recursion needs apart from the data itself: the
/// particle budget, the repetition count, the mutation reset rate, and the
/// parameters of the observation model. Serializable so that runs can be
/// pinned to a config file; unknown-free defaults make a bare `{}` JSON file
/// a valid configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Number of hazard particles per repetition.
    #[serde(default = "default_num_particles")]
    pub num_particles: usize,
    /// Number of independent repetitions over the same observation sequence.
    #[serde(default = "default_num_repetitions")]
    pub num_repetitions: usize,
    /// Per-particle probability of restarting from the hazard prior pool
    /// during the mutation step, in [0, 1].
    #[serde(default = "default_reset_rate")]
    pub reset_rate: f64,
    /// Separation between the two signed generative means; the generators sit
    /// at plus and minus half this value. Must be nonzero.
    #[serde(default = "default_mean_shift")]
    pub mean_shift: f64,
    /// Initial guess for the observation noise standard deviation.
    #[serde(default = "default_initial_noise_std")]
    pub initial_noise_std: f64,
    /// Prior pseudo-count for the variance estimate; the initial guess enters
    /// the running ratio with this much weight.
    #[serde(default = "default_pseudo_count")]
    pub pseudo_count: f64,
    /// Base random seed. Repetition `r` runs on its own generator seeded with
    /// `seed + r`, so repetitions are independent and individually
    /// reproducible.
    #[serde(default = "default_seed")]
    pub seed: u64,
}

impl Default for FilterConfig {
    fn default() -> Self {
        FilterConfig {
            num_particles: default_num_particles(),
            num_repetitions: default_num_repetitions(),
            reset_rate: default_reset_rate(),
            mean_shift: default_mean_shift(),
            initial_noise_std: default_initial_noise_std(),
            pseudo_count: default_pseudo_count(),
            seed: default_seed(),
        }
    }
}

impl FilterConfig {
    /// Check the parameter ranges the recursion depends on.
    ///
    /// Pool and sequence arguments are validated separately by
    /// [`filter::run_filter`] since they are not part of the configuration.
    pub fn validate(&self) -> Result<(), FilterError> {
        if self.num_particles == 0 {
            return Err(FilterError::NoParticles);
        }
        if self.num_repetitions == 0 {
            return Err(FilterError::NoRepetitions);
        }
        if !(self.reset_rate >= 0.0 && self.reset_rate <= 1.0) {
            return Err(FilterError::ResetRateOutOfRange(self.reset_rate));
        }
        if self.mean_shift == 0.0 {
            return Err(FilterError::ZeroMeanShift);
        }
        if !(self.initial_noise_std > 0.0) {
            return Err(FilterError::NonPositiveNoiseStd(self.initial_noise_std));
        }
        if !(self.pseudo_count > 0.0) {
            return Err(FilterError::NonPositivePseudoCount(self.pseudo_count));
        }
        Ok(())
    }

    /// Write the configuration to a JSON file (pretty-printed).
    pub fn to_json<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let file = File::create(path)?;
        serde_json::to_writer_pretty(file, self).map_err(io::Error::other)
    }

    /// Read the configuration from a JSON file.
    pub fn from_json<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = File::open(path)?;
        serde_json::from_reader(file).map_err(io::Error::other)
    }

    /// Write the configuration as YAML.
    pub fn to_yaml<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let mut file = File::create(path)?;
        let s = serde_yaml::to_string(self).map_err(io::Error::other)?;
        file.write_all(s.as_bytes())
    }

    /// Read the configuration from YAML.
    pub fn from_yaml<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = File::open(path)?;
        serde_yaml::from_reader(file).map_err(io::Error::other)
    }

    /// Write the configuration as TOML.
    pub fn to_toml<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let mut file = File::create(path)?;
        let s = toml::to_string(self).map_err(io::Error::other)?;
        file.write_all(s.as_bytes())
    }

    /// Read the configuration from TOML.
    pub fn from_toml<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let mut s = String::new();
        let mut file = File::open(path)?;
        file.read_to_string(&mut s)?;
        toml::from_str(&s).map_err(io::Error::other)
    }

    /// Generic write: choose format by file extension (.json/.yaml/.yml/.toml)
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let p = path.as_ref();
        let ext = p
            .extension()
            .and_then(|s| s.to_str())
            .map(|s| s.to_lowercase());
        match ext.as_deref() {
            Some("json") => self.to_json(p),
            Some("yaml") | Some("yml") => self.to_yaml(p),
            Some("toml") => self.to_toml(p),
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "unsupported file extension",
            )),
        }
    }

    /// Generic read: choose format by file extension (.json/.yaml/.yml/.toml)
    pub fn from_file<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let p = path.as_ref();
        let ext = p
            .extension()
            .and_then(|s| s.to_str())
            .map(|s| s.to_lowercase());
        match ext.as_deref() {
            Some("json") => Self::from_json(p),
            Some("yaml") | Some("yml") => Self::from_yaml(p),
            Some("toml") => Self::from_toml(p),
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "unsupported file extension",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn sign_label_codes_roundtrip() {
        for code in [-1i8, 0, 1] {
            let label = SignLabel::try_from(code).unwrap();
            assert_eq!(label.as_code(), code);
        }
        assert_eq!(
            SignLabel::try_from(2i8),
            Err(FilterError::InvalidSignLabel(2))
        );
        assert_eq!(
            SignLabel::try_from(-3i8),
            Err(FilterError::InvalidSignLabel(-3))
        );
    }

    #[test]
    fn signedness() {
        assert!(SignLabel::Negative.is_signed());
        assert!(SignLabel::Positive.is_signed());
        assert!(!SignLabel::Mixed.is_signed());
    }

    #[test]
    fn change_classification_table() {
        use SignLabel::*;
        assert_eq!(
            classify_change(Positive, Some(Positive)),
            Some(ChangeEvent::Persisted)
        );
        assert_eq!(
            classify_change(Negative, Some(Negative)),
            Some(ChangeEvent::Persisted)
        );
        assert_eq!(
            classify_change(Positive, Some(Negative)),
            Some(ChangeEvent::Changed)
        );
        assert_eq!(
            classify_change(Negative, Some(Positive)),
            Some(ChangeEvent::Changed)
        );
        // Any Mixed endpoint leaves the transition unobserved.
        assert_eq!(classify_change(Mixed, Some(Positive)), None);
        assert_eq!(classify_change(Positive, Some(Mixed)), None);
        assert_eq!(classify_change(Mixed, Some(Mixed)), None);
        // So does running off the end of the sequence.
        assert_eq!(classify_change(Positive, None), None);
        assert_eq!(classify_change(Mixed, None), None);
    }

    #[test]
    fn default_config_is_valid() {
        let config = FilterConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.seed, 42);
        assert_eq!(config.num_particles, 500);
    }

    #[test]
    fn validate_rejects_bad_parameters() {
        let mut config = FilterConfig::default();
        config.num_particles = 0;
        assert_eq!(config.validate(), Err(FilterError::NoParticles));

        let mut config = FilterConfig::default();
        config.num_repetitions = 0;
        assert_eq!(config.validate(), Err(FilterError::NoRepetitions));

        let mut config = FilterConfig::default();
        config.reset_rate = 1.5;
        assert_eq!(
            config.validate(),
            Err(FilterError::ResetRateOutOfRange(1.5))
        );

        let mut config = FilterConfig::default();
        config.reset_rate = f64::NAN;
        assert!(matches!(
            config.validate(),
            Err(FilterError::ResetRateOutOfRange(_))
        ));

        let mut config = FilterConfig::default();
        config.mean_shift = 0.0;
        assert_eq!(config.validate(), Err(FilterError::ZeroMeanShift));

        let mut config = FilterConfig::default();
        config.initial_noise_std = 0.0;
        assert_eq!(
            config.validate(),
            Err(FilterError::NonPositiveNoiseStd(0.0))
        );

        let mut config = FilterConfig::default();
        config.pseudo_count = -1.0;
        assert_eq!(
            config.validate(),
            Err(FilterError::NonPositivePseudoCount(-1.0))
        );
    }

    #[test]
    fn boundary_reset_rates_are_valid() {
        let mut config = FilterConfig::default();
        config.reset_rate = 0.0;
        assert!(config.validate().is_ok());
        config.reset_rate = 1.0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn json_roundtrip() {
        let config = FilterConfig {
            num_particles: 64,
            reset_rate: 0.05,
            ..Default::default()
        };
        let f = NamedTempFile::new().unwrap();
        let path = f.path().with_extension("json");
        config.to_json(&path).unwrap();
        let loaded = FilterConfig::from_json(&path).unwrap();
        assert_eq!(config, loaded);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn yaml_roundtrip() {
        let config = FilterConfig::default();
        let f = NamedTempFile::new().unwrap();
        let path = f.path().with_extension("yaml");
        config.to_yaml(&path).unwrap();
        let loaded = FilterConfig::from_yaml(&path).unwrap();
        assert_eq!(config, loaded);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn toml_roundtrip() {
        let config = FilterConfig {
            seed: 7,
            num_repetitions: 3,
            ..Default::default()
        };
        let f = NamedTempFile::new().unwrap();
        let path = f.path().with_extension("toml");
        config.to_toml(&path).unwrap();
        let loaded = FilterConfig::from_toml(&path).unwrap();
        assert_eq!(config, loaded);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn file_dispatch_by_extension() {
        let config = FilterConfig::default();
        let f = NamedTempFile::new().unwrap();

        let path = f.path().with_extension("yml");
        config.to_file(&path).unwrap();
        assert_eq!(FilterConfig::from_file(&path).unwrap(), config);
        std::fs::remove_file(&path).ok();

        let bad = f.path().with_extension("csv");
        assert!(config.to_file(&bad).is_err());
    }

    #[test]
    fn empty_json_uses_defaults() {
        let parsed: FilterConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(parsed, FilterConfig::default());
    }
}
