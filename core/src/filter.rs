//! Per-step recursion and multi-repetition driver.
//!
//! One [`HazardFilter`] carries the state of a single repetition: the hazard
//! particle population, the auxiliary sign posterior, the running variance
//! estimate, and the scratch weight buffers. [`run_filter`] stacks several
//! independent repetitions over the same observation sequence into the
//! per-repetition, per-step sample grids of [`PosteriorSamples`].
//!
//! Each step proceeds through five stages: likelihood weighting of every
//! particle, selection of one particle as the step's posterior sample,
//! the variance update, changepoint reweighting when feedback reveals a
//! sign transition, and particle mutation. The variance update and the
//! reweighting both look one step ahead at the upcoming feedback label,
//! so [`HazardFilter::step`] takes the next label alongside the current one.

use crate::particle::ParticleSet;
use crate::resample::{pool_index, select_index};
use crate::{ChangeEvent, FilterConfig, FilterError, SignLabel, classify_change};

use nalgebra::DMatrix;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Posterior over the two signed generative states.
///
/// The pair is kept explicitly rather than as a single probability because
/// the recursion multiplies the components by different likelihoods before
/// renormalizing; after [`SignBelief::from_components`] the pair sums to one.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SignBelief {
    pub pos: f64,
    pub neg: f64,
}

impl SignBelief {
    /// Uninformative starting belief.
    pub fn even() -> SignBelief {
        SignBelief { pos: 0.5, neg: 0.5 }
    }

    /// One-step sign prediction for a particle with the given hazard.
    ///
    /// Without feedback the belief propagates through the two-state
    /// transition kernel; a signed feedback label pins the previous state
    /// and the prediction collapses to the hazard itself.
    pub fn predict(&self, label: SignLabel, hazard: f64) -> (f64, f64) {
        match label {
            SignLabel::Mixed => (
                (1.0 - hazard) * self.pos + hazard * self.neg,
                hazard * self.pos + (1.0 - hazard) * self.neg,
            ),
            SignLabel::Positive => (1.0 - hazard, hazard),
            SignLabel::Negative => (hazard, 1.0 - hazard),
        }
    }

    /// Normalize a pair of posterior components into a belief.
    ///
    /// The component sum must be strictly positive.
    pub fn from_components(pos: f64, neg: f64) -> SignBelief {
        let total = pos + neg;
        SignBelief {
            pos: pos / total,
            neg: neg / total,
        }
    }
}

/// Likelihoods of the two signed states under the logistic link.
///
/// `llr` is the log-likelihood ratio of the signed generators given the
/// observation, `x * mean_shift / variance`.
pub fn sign_likelihoods(llr: f64) -> (f64, f64) {
    let l_pos = 1.0 / (1.0 + (-llr).exp());
    (l_pos, 1.0 - l_pos)
}

/// Running estimate of the observation noise variance.
///
/// Accumulates squared residuals against the signed means into a sum that
/// starts at `pseudo_count * initial_noise_std^2`, so the initial guess
/// enters the ratio with `pseudo_count` observations' worth of weight and
/// the estimate after `n` steps is `sum / (pseudo_count + n)`.
#[derive(Debug, Clone, PartialEq)]
pub struct VarianceTracker {
    sum_squares: f64,
    pseudo_count: f64,
    steps: usize,
}

impl VarianceTracker {
    pub fn new(initial_noise_std: f64, pseudo_count: f64) -> VarianceTracker {
        VarianceTracker {
            sum_squares: pseudo_count * initial_noise_std * initial_noise_std,
            pseudo_count,
            steps: 0,
        }
    }

    /// Current variance estimate.
    pub fn variance(&self) -> f64 {
        self.sum_squares / (self.pseudo_count + self.steps as f64)
    }

    /// Fold in the residual for observation `x` and return the updated
    /// variance.
    ///
    /// The residual is keyed by the label of the upcoming step: a signed
    /// upcoming label fixes which generative mean produced `x`, while a
    /// `Mixed` upcoming label, or the end of the sequence, mixes the two
    /// squared residuals under the current sign posterior.
    pub fn update(
        &mut self,
        x: f64,
        mean_shift: f64,
        next_label: Option<SignLabel>,
        belief: SignBelief,
    ) -> f64 {
        let half = mean_shift / 2.0;
        let above = (x - half) * (x - half);
        let below = (x + half) * (x + half);
        self.sum_squares += match next_label {
            Some(SignLabel::Positive) => above,
            Some(SignLabel::Negative) => below,
            Some(SignLabel::Mixed) | None => belief.pos * above + belief.neg * below,
        };
        self.steps += 1;
        self.variance()
    }
}

/// Posterior sample emitted for one step of one repetition.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepSample {
    /// Normalized sign posterior of the selected particle.
    pub belief: SignBelief,
    /// Hazard carried by the selected particle.
    pub hazard: f64,
    /// Variance estimate after this step's residual.
    pub noise_variance: f64,
}

fn validate_pools(hazard_pool: &[f64], innovation_pool: &[f64]) -> Result<(), FilterError> {
    if hazard_pool.is_empty() {
        return Err(FilterError::EmptyHazardPool);
    }
    for &hazard in hazard_pool {
        if !(0.0..=1.0).contains(&hazard) {
            return Err(FilterError::HazardOutOfRange(hazard));
        }
    }
    if innovation_pool.is_empty() {
        return Err(FilterError::EmptyInnovationPool);
    }
    Ok(())
}

/// Single-repetition filter state.
///
/// Owns the particle population, the sign posterior, the variance tracker,
/// and the per-particle scratch buffers reused across steps; borrows the
/// two pools so repetitions can share them. The generator is owned so a
/// repetition is fully determined by the generator it was constructed with.
pub struct HazardFilter<'a, R: Rng> {
    mean_shift: f64,
    reset_rate: f64,
    hazard_pool: &'a [f64],
    innovation_pool: &'a [f64],
    particles: ParticleSet,
    belief: SignBelief,
    tracker: VarianceTracker,
    q_pos: Vec<f64>,
    q_neg: Vec<f64>,
    weights: Vec<f64>,
    step: usize,
    rng: R,
}

impl<'a, R: Rng> HazardFilter<'a, R> {
    /// Initialize a repetition: validate the inputs, draw the particle
    /// population from the hazard pool, and reset the posterior and the
    /// variance state.
    pub fn new(
        config: &FilterConfig,
        hazard_pool: &'a [f64],
        innovation_pool: &'a [f64],
        mut rng: R,
    ) -> Result<HazardFilter<'a, R>, FilterError> {
        config.validate()?;
        validate_pools(hazard_pool, innovation_pool)?;
        let particles = ParticleSet::from_prior(hazard_pool, config.num_particles, &mut rng);
        let count = particles.len();
        Ok(HazardFilter {
            mean_shift: config.mean_shift,
            reset_rate: config.reset_rate,
            hazard_pool,
            innovation_pool,
            particles,
            belief: SignBelief::even(),
            tracker: VarianceTracker::new(config.initial_noise_std, config.pseudo_count),
            q_pos: vec![0.0; count],
            q_neg: vec![0.0; count],
            weights: vec![0.0; count],
            step: 0,
            rng,
        })
    }

    /// Current sign posterior.
    pub fn belief(&self) -> SignBelief {
        self.belief
    }

    /// Current variance estimate.
    pub fn noise_variance(&self) -> f64 {
        self.tracker.variance()
    }

    /// Current particle population.
    pub fn particles(&self) -> &ParticleSet {
        &self.particles
    }

    /// Number of steps processed so far.
    pub fn steps(&self) -> usize {
        self.step
    }

    /// Advance the filter by one observation.
    ///
    /// `next_label` is the feedback label of the following step, or `None`
    /// at the end of the sequence. The observation is perturbed by one draw
    /// from the innovation pool before it enters the likelihood, so the
    /// value passed here is the raw sequence value.
    pub fn step(
        &mut self,
        observation: f64,
        label: SignLabel,
        next_label: Option<SignLabel>,
    ) -> Result<StepSample, FilterError> {
        let u = self.rng.random::<f64>();
        let x = observation + self.innovation_pool[pool_index(u, self.innovation_pool.len())];

        let llr = x * self.mean_shift / self.tracker.variance();
        let (l_pos, l_neg) = sign_likelihoods(llr);

        let mut total = 0.0;
        for (m, &hazard) in self.particles.hazards().iter().enumerate() {
            let (prior_pos, prior_neg) = self.belief.predict(label, hazard);
            let q_pos = l_pos * prior_pos;
            let q_neg = l_neg * prior_neg;
            self.q_pos[m] = q_pos;
            self.q_neg[m] = q_neg;
            self.weights[m] = q_pos + q_neg;
            total += q_pos + q_neg;
        }
        if !(total > 0.0) {
            return Err(FilterError::DegenerateWeights { step: self.step });
        }

        let u = self.rng.random::<f64>();
        let selected = select_index(&self.weights, total, u);
        let hazard = self.particles.get(selected);
        self.belief = SignBelief::from_components(self.q_pos[selected], self.q_neg[selected]);

        let noise_variance = self
            .tracker
            .update(x, self.mean_shift, next_label, self.belief);

        // A revealed sign transition replaces the likelihood weights with
        // each particle's own probability of that transition; without
        // feedback on both sides the likelihood weights stay in place.
        match classify_change(label, next_label) {
            Some(ChangeEvent::Persisted) => {
                total = 0.0;
                for (weight, &hazard) in self.weights.iter_mut().zip(self.particles.hazards()) {
                    *weight = 1.0 - hazard;
                    total += *weight;
                }
            }
            Some(ChangeEvent::Changed) => {
                total = 0.0;
                for (weight, &hazard) in self.weights.iter_mut().zip(self.particles.hazards()) {
                    *weight = hazard;
                    total += *weight;
                }
            }
            None => {}
        }
        if self.reset_rate < 1.0 && !(total > 0.0) {
            return Err(FilterError::DegenerateWeights { step: self.step });
        }
        self.particles.mutate(
            self.hazard_pool,
            &self.weights,
            total,
            self.reset_rate,
            &mut self.rng,
        );

        self.step += 1;
        Ok(StepSample {
            belief: self.belief,
            hazard,
            noise_variance,
        })
    }
}

/// Posterior samples for every repetition and step.
///
/// Each matrix has one row per repetition and one column per step; cell
/// `(r, n)` holds repetition `r`'s sample at step `n` and is written exactly
/// once.
#[derive(Debug, Clone, PartialEq)]
pub struct PosteriorSamples {
    /// Positive-sign posterior component of the selected particle.
    pub pos_belief: DMatrix<f64>,
    /// Negative-sign posterior component of the selected particle.
    pub neg_belief: DMatrix<f64>,
    /// Hazard of the selected particle.
    pub hazard: DMatrix<f64>,
    /// Variance estimate after the step's residual.
    pub noise_variance: DMatrix<f64>,
}

impl PosteriorSamples {
    fn zeros(repetitions: usize, steps: usize) -> PosteriorSamples {
        PosteriorSamples {
            pos_belief: DMatrix::zeros(repetitions, steps),
            neg_belief: DMatrix::zeros(repetitions, steps),
            hazard: DMatrix::zeros(repetitions, steps),
            noise_variance: DMatrix::zeros(repetitions, steps),
        }
    }

    pub fn num_repetitions(&self) -> usize {
        self.hazard.nrows()
    }

    pub fn num_steps(&self) -> usize {
        self.hazard.ncols()
    }

    /// Mean hazard sample across repetitions at one step.
    pub fn mean_hazard_at(&self, step: usize) -> f64 {
        self.hazard.column(step).mean()
    }

    /// Mean variance estimate across repetitions at one step.
    pub fn mean_variance_at(&self, step: usize) -> f64 {
        self.noise_variance.column(step).mean()
    }
}

/// Run the full estimator: `config.num_repetitions` independent repetitions
/// over the same observation sequence.
///
/// Repetition `r` runs on its own generator seeded with `config.seed + r`,
/// so the output is reproducible as a whole and each repetition is
/// reproducible on its own. Inputs are validated before any repetition
/// starts; an empty observation sequence is valid and produces matrices
/// with zero columns.
pub fn run_filter(
    config: &FilterConfig,
    observations: &[f64],
    sign_labels: &[SignLabel],
    hazard_pool: &[f64],
    innovation_pool: &[f64],
) -> Result<PosteriorSamples, FilterError> {
    config.validate()?;
    validate_pools(hazard_pool, innovation_pool)?;
    if observations.len() != sign_labels.len() {
        return Err(FilterError::LengthMismatch {
            observations: observations.len(),
            labels: sign_labels.len(),
        });
    }

    let steps = observations.len();
    let mut samples = PosteriorSamples::zeros(config.num_repetitions, steps);
    for rep in 0..config.num_repetitions {
        let rng = StdRng::seed_from_u64(config.seed.wrapping_add(rep as u64));
        let mut filter = HazardFilter::new(config, hazard_pool, innovation_pool, rng)?;
        for n in 0..steps {
            let next_label = sign_labels.get(n + 1).copied();
            let sample = filter.step(observations[n], sign_labels[n], next_label)?;
            samples.pos_belief[(rep, n)] = sample.belief.pos;
            samples.neg_belief[(rep, n)] = sample.belief.neg;
            samples.hazard[(rep, n)] = sample.hazard;
            samples.noise_variance[(rep, n)] = sample.noise_variance;
        }
    }
    Ok(samples)
}
