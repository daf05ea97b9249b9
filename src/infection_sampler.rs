//! Turns not-infected probabilities into hard 0/1 infection decisions that still carry a
//! gradient (straight-through estimator).
//!
//! Two reparametrizations are available:
//!
//! * `Categorical`: a Gumbel-softmax over `M + 1` outcomes per agent. Row 0 is "stays
//!   healthy" with logit `Σ_v ln p_v`; row `1 + v` is "infected by variant v" with logit
//!   `ln(1 - Π_w p_w) + ln(1 - p_v) - ln Σ_w (1 - p_w)`, so the outcome probabilities sum to
//!   one and the infection probability is `1 - Π_v p_v`. For a single variant this is the
//!   `[p; 1 - p]` stack. The forward value is the one-hot argmax, the gradient is that of the
//!   temperature-scaled softmax.
//! * `Bernoulli`: a relaxed Bernoulli on the aggregated infection probability
//!   `1 - Π_v p_v`, rounded to 0/1 in the forward pass. With several variants the variant is
//!   drawn afterwards in proportion to `1 - p_v`.

use log::trace;
use rand::distr::weighted::WeightedIndex;
use rand::distr::Distribution;
use rand::Rng;
use rand_distr::Gumbel;
use serde::Deserialize;

use crate::error::SimError;
use crate::tensor::Tensor;

pub const DEFAULT_TEMPERATURE: f64 = 0.1;

/// Slack allowed on probabilities that drift just outside `[0, 1]` through rounding.
const PROBABILITY_TOLERANCE: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SamplerKind {
    #[default]
    Categorical,
    Bernoulli,
}

/// Hard outcome of one sampling pass.
#[derive(Debug, Clone)]
pub struct SampledInfection {
    /// `[1, n_agents]`, 1.0 for agents infected in this step.
    pub infected: Tensor,
    /// `[n_variants, n_agents]`, one-hot column for newly infected agents, zero otherwise.
    pub variant: Tensor,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InfectionSampler {
    kind: SamplerKind,
    temperature: f64,
}

impl Default for InfectionSampler {
    fn default() -> Self {
        InfectionSampler {
            kind: SamplerKind::default(),
            temperature: DEFAULT_TEMPERATURE,
        }
    }
}

fn check_temperature(temperature: f64) -> Result<(), SimError> {
    if temperature > 0.0 && temperature.is_finite() {
        Ok(())
    } else {
        Err(SimError::ConfigurationError(format!(
            "temperature must be positive and finite, got {temperature}"
        )))
    }
}

fn check_probabilities(probs: &Tensor) -> Result<(), SimError> {
    probs.check_finite("sampler input")?;
    if let Some(p) = probs
        .values()
        .iter()
        .find(|&&p| !(-PROBABILITY_TOLERANCE..=1.0 + PROBABILITY_TOLERANCE).contains(&p))
    {
        return Err(SimError::InvalidProbability(format!(
            "probability {p} outside [0, 1]"
        )));
    }
    Ok(())
}

/// Logistic noise `ln u - ln(1 - u)` with `u` uniform on the open interval (0, 1).
fn logistic_noise<R: Rng>(rng: &mut R) -> f64 {
    let u: f64 = rng.random_range(f64::EPSILON..1.0 - f64::EPSILON);
    u.ln() - (-u).ln_1p()
}

/// Relaxed-Bernoulli straight-through sample with success probability `probs`
/// (entries in `[0, 1]`). The forward value is `round(sigmoid((logit p + L) / τ))`.
pub fn relaxed_bernoulli_straight_through<R: Rng>(
    probs: &Tensor,
    temperature: f64,
    rng: &mut R,
) -> Result<Tensor, SimError> {
    check_temperature(temperature)?;
    check_probabilities(probs)?;
    let tape = probs.tape();
    let logits = probs.ln().sub(&probs.one_minus().ln())?;
    let noise = (0..probs.len()).map(|_| logistic_noise(rng)).collect();
    let noise = tape.constant(probs.rows(), probs.cols(), noise)?;
    let soft = logits.add(&noise)?.scale(1.0 / temperature).sigmoid();
    let hard = soft
        .values()
        .iter()
        .map(|&s| if s >= 0.5 { 1.0 } else { 0.0 })
        .collect();
    soft.straight_through(hard)
}

impl InfectionSampler {
    pub fn new(kind: SamplerKind, temperature: f64) -> Result<InfectionSampler, SimError> {
        check_temperature(temperature)?;
        Ok(InfectionSampler { kind, temperature })
    }

    #[must_use]
    pub fn kind(&self) -> SamplerKind {
        self.kind
    }

    #[must_use]
    pub fn temperature(&self) -> f64 {
        self.temperature
    }

    /// Samples infections from `[n_variants, n_agents]` not-infected probabilities.
    pub fn sample<R: Rng>(
        &self,
        not_infected_probs: &Tensor,
        rng: &mut R,
    ) -> Result<SampledInfection, SimError> {
        check_probabilities(not_infected_probs)?;
        let sampled = match self.kind {
            SamplerKind::Categorical => self.sample_categorical(not_infected_probs, rng)?,
            SamplerKind::Bernoulli => self.sample_bernoulli(not_infected_probs, rng)?,
        };
        trace!(
            "{:?} sampler: {} new infections",
            self.kind,
            sampled.infected.values().iter().sum::<f64>()
        );
        Ok(sampled)
    }

    fn sample_categorical<R: Rng>(
        &self,
        not_infected_probs: &Tensor,
        rng: &mut R,
    ) -> Result<SampledInfection, SimError> {
        let (n_variants, n_agents) = not_infected_probs.shape();
        let tape = not_infected_probs.tape();

        let healthy = not_infected_probs.ln().sum_rows();
        let by_variant = if n_variants == 1 {
            not_infected_probs.one_minus().ln()
        } else {
            // P(infected by v) = (1 - Π p) (1 - p_v) / Σ_w (1 - p_w)
            let by_variant = not_infected_probs.one_minus();
            let any_variant = healthy.exp().one_minus().ln();
            by_variant
                .ln()
                .add(&any_variant)?
                .sub(&by_variant.sum_rows().ln())?
        };
        let logits = Tensor::vstack(&[healthy, by_variant])?;

        let gumbel = Gumbel::new(0.0, 1.0)
            .map_err(|e| SimError::SimError(format!("gumbel distribution: {e}")))?;
        let noise = (0..logits.len()).map(|_| gumbel.sample(rng)).collect();
        let noise = tape.constant(n_variants + 1, n_agents, noise)?;
        let soft = logits
            .add(&noise)?
            .scale(1.0 / self.temperature)
            .softmax_rows();

        let mut hard = vec![0.0; soft.len()];
        for agent in 0..n_agents {
            let mut best = 0;
            for outcome in 1..=n_variants {
                if soft.get(outcome, agent) > soft.get(best, agent) {
                    best = outcome;
                }
            }
            hard[best * n_agents + agent] = 1.0;
        }
        let outcome = soft.straight_through(hard)?;

        Ok(SampledInfection {
            infected: outcome.row(0)?.one_minus(),
            variant: outcome.slice_rows(1, n_variants + 1)?,
        })
    }

    fn sample_bernoulli<R: Rng>(
        &self,
        not_infected_probs: &Tensor,
        rng: &mut R,
    ) -> Result<SampledInfection, SimError> {
        let (n_variants, n_agents) = not_infected_probs.shape();
        let infection_probs = if n_variants == 1 {
            not_infected_probs.one_minus()
        } else {
            not_infected_probs.ln().sum_rows().exp().one_minus()
        };
        let infected =
            relaxed_bernoulli_straight_through(&infection_probs, self.temperature, rng)?;
        if n_variants == 1 {
            return Ok(SampledInfection {
                variant: infected.clone(),
                infected,
            });
        }

        let mut assignment = vec![0.0; n_variants * n_agents];
        for agent in 0..n_agents {
            if infected.get(0, agent) < 0.5 {
                continue;
            }
            let weights: Vec<f64> = (0..n_variants)
                .map(|v| (1.0 - not_infected_probs.get(v, agent)).max(0.0))
                .collect();
            let chosen = match WeightedIndex::new(&weights) {
                Ok(index) => index.sample(rng),
                // all weights vanished to rounding
                Err(_) => 0,
            };
            assignment[chosen * n_agents + agent] = 1.0;
        }
        let assignment = not_infected_probs
            .tape()
            .constant(n_variants, n_agents, assignment)?;
        Ok(SampledInfection {
            variant: assignment.mul(&infected)?,
            infected,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assert_almost_eq;
    use crate::tensor::Tape;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    fn rng() -> SmallRng {
        SmallRng::seed_from_u64(11)
    }

    fn assert_hard(tensor: &Tensor) {
        assert!(tensor.values().iter().all(|&x| x == 0.0 || x == 1.0));
    }

    #[test]
    fn rejects_bad_temperature_and_probabilities() {
        assert!(matches!(
            InfectionSampler::new(SamplerKind::Categorical, 0.0),
            Err(SimError::ConfigurationError(_))
        ));
        let tape = Tape::new();
        let bad = tape.constant(1, 2, vec![0.5, 1.5]).unwrap();
        let nan = tape.constant(1, 1, vec![f64::NAN]).unwrap();
        let sampler = InfectionSampler::default();
        assert!(matches!(
            sampler.sample(&bad, &mut rng()),
            Err(SimError::InvalidProbability(_))
        ));
        assert!(matches!(
            sampler.sample(&nan, &mut rng()),
            Err(SimError::NumericalInstability(_))
        ));
    }

    #[test]
    fn certain_outcomes_are_respected() {
        for kind in [SamplerKind::Categorical, SamplerKind::Bernoulli] {
            let tape = Tape::new();
            let probs = tape.constant(1, 4, vec![1.0, 0.0, 1.0, 0.0]).unwrap();
            let sampler = InfectionSampler::new(kind, DEFAULT_TEMPERATURE).unwrap();
            let mut rng = rng();
            for _ in 0..20 {
                let sampled = sampler.sample(&probs, &mut rng).unwrap();
                assert_eq!(sampled.infected.values(), &[0.0, 1.0, 0.0, 1.0]);
            }
        }
    }

    #[test]
    fn infection_frequency_matches_probability() {
        for kind in [SamplerKind::Categorical, SamplerKind::Bernoulli] {
            let tape = Tape::new();
            let n = 20_000;
            let probs = tape.full(1, n, 0.7);
            let sampler = InfectionSampler::new(kind, DEFAULT_TEMPERATURE).unwrap();
            let sampled = sampler.sample(&probs, &mut rng()).unwrap();
            assert_hard(&sampled.infected);
            let rate = sampled.infected.values().iter().sum::<f64>() / n as f64;
            assert!((rate - 0.3).abs() < 0.02, "{kind:?} rate {rate}");
        }
    }

    #[test]
    fn infection_frequency_with_two_variants() {
        for kind in [SamplerKind::Categorical, SamplerKind::Bernoulli] {
            let tape = Tape::new();
            let n = 40_000;
            // 1 - 0.5 * 0.8 = 0.6 infected, split 5:2 between the variants
            let mut probs = vec![0.5; n];
            probs.extend(vec![0.8; n]);
            let probs = tape.constant(2, n, probs).unwrap();
            let sampler = InfectionSampler::new(kind, DEFAULT_TEMPERATURE).unwrap();
            let sampled = sampler.sample(&probs, &mut SmallRng::seed_from_u64(1)).unwrap();
            assert_hard(&sampled.infected);
            let rate = sampled.infected.values().iter().sum::<f64>() / n as f64;
            assert!((rate - 0.6).abs() < 0.01, "{kind:?} rate {rate}");
            let first = sampled.variant.row(0).unwrap().values().iter().sum::<f64>() / n as f64;
            assert!((first - 0.6 * 5.0 / 7.0).abs() < 0.015, "{kind:?} variant 0 {first}");
        }
    }

    #[test]
    fn variant_column_is_one_hot_for_infected() {
        for kind in [SamplerKind::Categorical, SamplerKind::Bernoulli] {
            let tape = Tape::new();
            let probs = tape
                .constant(2, 3, vec![0.2, 1.0, 0.5, 0.9, 1.0, 0.5])
                .unwrap();
            let sampler = InfectionSampler::new(kind, DEFAULT_TEMPERATURE).unwrap();
            let sampled = sampler.sample(&probs, &mut rng()).unwrap();
            assert_hard(&sampled.variant);
            assert_eq!(sampled.variant.shape(), (2, 3));
            for agent in 0..3 {
                let column = sampled.variant.get(0, agent) + sampled.variant.get(1, agent);
                assert_eq!(column, sampled.infected.get(0, agent));
            }
            // agent 1 cannot be infected by either variant
            assert_eq!(sampled.infected.get(0, 1), 0.0);
        }
    }

    #[test]
    fn gradient_flows_through_hard_sample() {
        for kind in [SamplerKind::Categorical, SamplerKind::Bernoulli] {
            let tape = Tape::new();
            let probs = tape.variable(1, 50, vec![0.5; 50]).unwrap();
            let sampler = InfectionSampler::new(kind, 1.0).unwrap();
            let sampled = sampler.sample(&probs, &mut rng()).unwrap();
            let grads = sampled.infected.sum().backward().unwrap();
            let g = grads.wrt(&probs).unwrap();
            // lower escape probability means more infections
            assert!(g.iter().all(|&x| x <= 0.0), "{kind:?}");
            assert!(g.iter().any(|&x| x < 0.0), "{kind:?}");
        }
    }

    #[test]
    fn relaxed_bernoulli_fraction() {
        let tape = Tape::new();
        let probs = tape.full(1, 10_000, 0.2);
        let sample = relaxed_bernoulli_straight_through(&probs, 0.1, &mut rng()).unwrap();
        assert_hard(&sample);
        let mean = sample.values().iter().sum::<f64>() / 10_000.0;
        assert_almost_eq!(mean, 0.2, 0.02);
    }
}
