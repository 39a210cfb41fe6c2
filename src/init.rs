//! Weight initializers.
//!
//! Every scheme derives a scale `b` from the layer's fans:
//! - Glorot: `b = sqrt(6 / (fan_in + fan_out))`
//! - He: `b = sqrt(2 / fan_in)`
//!
//! Uniform variants sample from `(-b, b)`, normal variants from `N(0, b)`.

use rand::Rng;
use rand_distr::{Distribution, Normal};

use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Init {
    #[default]
    GlorotUniform,
    GlorotNormal,
    HeUniform,
    HeNormal,
}

/// Fan-in / fan-out of a parameter tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fans {
    pub fan_in: usize,
    pub fan_out: usize,
}

impl Fans {
    pub fn new(fan_in: usize, fan_out: usize) -> Self {
        Self { fan_in, fan_out }
    }
}

impl Init {
    /// Scale `b` for the given fans.
    pub fn bound(self, fans: Fans) -> f32 {
        match self {
            Init::GlorotUniform | Init::GlorotNormal => {
                (6.0 / (fans.fan_in + fans.fan_out) as f32).sqrt()
            }
            Init::HeUniform | Init::HeNormal => (2.0 / fans.fan_in as f32).sqrt(),
        }
    }

    /// Build a sampler for a parameter with the given fans.
    pub fn sampler(self, fans: Fans) -> Result<Sampler> {
        if fans.fan_in == 0 || fans.fan_out == 0 {
            return Err(Error::InvalidConfig(format!(
                "initializer fans must be > 0, got {fans:?}"
            )));
        }
        let bound = self.bound(fans);
        Ok(match self {
            Init::GlorotUniform | Init::HeUniform => Sampler::Uniform(bound),
            Init::GlorotNormal | Init::HeNormal => Sampler::Normal(
                Normal::new(0.0, bound)
                    .map_err(|e| Error::InvalidConfig(format!("normal initializer: {e}")))?,
            ),
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub enum Sampler {
    Uniform(f32),
    Normal(Normal<f32>),
}

impl Sampler {
    #[inline]
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> f32 {
        match self {
            Sampler::Uniform(b) => rng.gen_range(-*b..*b),
            Sampler::Normal(n) => n.sample(rng),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn bounds_follow_fans() {
        let fans = Fans::new(4, 2);
        assert!((Init::GlorotUniform.bound(fans) - 1.0).abs() < 1e-6);
        assert!((Init::HeNormal.bound(fans) - 0.5_f32.sqrt()).abs() < 1e-6);
    }

    #[test]
    fn uniform_samples_stay_in_bounds() {
        let mut rng = StdRng::seed_from_u64(0);
        let fans = Fans::new(10, 10);
        let b = Init::HeUniform.bound(fans);
        let s = Init::HeUniform.sampler(fans).unwrap();
        for _ in 0..1000 {
            let v = s.sample(&mut rng);
            assert!(v > -b && v < b);
        }
    }

    #[test]
    fn normal_samples_have_roughly_the_right_spread() {
        let mut rng = StdRng::seed_from_u64(1);
        let fans = Fans::new(50, 50);
        let s = Init::GlorotNormal.sampler(fans).unwrap();
        let n = 20_000;
        let samples: Vec<f32> = (0..n).map(|_| s.sample(&mut rng)).collect();
        let mean = samples.iter().sum::<f32>() / n as f32;
        let var = samples.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / n as f32;
        let b = Init::GlorotNormal.bound(fans);
        assert!(mean.abs() < 0.02);
        assert!((var.sqrt() - b).abs() < 0.02);
    }

    #[test]
    fn zero_fans_are_rejected() {
        assert!(Init::GlorotUniform.sampler(Fans::new(0, 3)).is_err());
    }
}
