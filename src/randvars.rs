use rand::distributions::{Distribution, Uniform};
use rand::Rng;
use statrs::distribution::Exp;

use crate::utils::prelude::*;

/// A random variable, usually the service demand of a job
#[derive(Debug, Copy, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(tag = "type")]
pub enum RandomVariable {
    Constant { value: f64 },
    Uniform { low: f64, high: f64 },
    /// `Exp(rate) * scale`
    Exp { rate: f64, scale: f64 },
}

impl RandomVariable {
    pub fn mean(&self) -> f64 {
        match *self {
            RandomVariable::Constant { value } => value,
            RandomVariable::Uniform { low, high } => (low + high) / 2.0,
            RandomVariable::Exp { rate, scale } => scale / rate,
        }
    }

    /// Validate the parameters and build something that can be sampled.
    ///
    /// Every sample must be a positive, finite demand.
    pub fn sampler(&self) -> Result<Sampler> {
        Ok(match *self {
            RandomVariable::Constant { value } => {
                if !(value.is_finite() && value > 0.0) {
                    return Err(Error::invalid("constant", format!("need a positive value, got {}", value)));
                }
                Sampler::Constant(value)
            }
            RandomVariable::Uniform { low, high } => {
                if !(low > 0.0 && low < high && high.is_finite()) {
                    return Err(Error::invalid("uniform", format!("need 0 < low < high, got [{}, {})", low, high)));
                }
                Sampler::Uniform(Uniform::new(low, high))
            }
            RandomVariable::Exp { rate, scale } => {
                if !(scale.is_finite() && scale > 0.0) {
                    return Err(Error::invalid("exp", format!("need a positive scale, got {}", scale)));
                }
                Sampler::Exp(exponential(rate)?, scale)
            }
        })
    }
}

/// A validated [`RandomVariable`]
#[derive(Debug, Clone, Copy)]
pub enum Sampler {
    Constant(f64),
    Uniform(Uniform<f64>),
    Exp(Exp, f64),
}

impl Distribution<f64> for Sampler {
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        match self {
            Sampler::Constant(v) => *v,
            Sampler::Uniform(u) => u.sample(rng),
            Sampler::Exp(exp, scale) => exp.sample(rng) * scale,
        }
    }
}

/// `Exp(rate)`, the memoryless distribution of a Poisson process' gaps
pub fn exponential(rate: f64) -> Result<Exp> {
    if !rate.is_finite() {
        return Err(Error::invalid("rate", format!("must be finite, got {}", rate)));
    }
    Ok(Exp::new(rate)?)
}
