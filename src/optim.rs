//! Parameter update rules.
//!
//! `Optimizer` is the validated configuration; `OptimizerState` owns the
//! per-parameter buffers (velocities, moments, caches) and is created once
//! per training run, so steps never allocate.
//!
//! Gradients arrive already averaged over the batch (see [`crate::Loss`]).
//! Weight decay is folded into the gradient before the update:
//! `g ← g + l2·w + l1·s` with `s = 1` for positive weights and `−1` otherwise.

use crate::{Error, Result, Storage, Variable};

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Optimizer {
    #[default]
    Sgd,
    /// `v ← μ·v + g`, `w ← w − lr·v`.
    SgdMomentum { momentum: f32 },
    /// Nesterov accelerated gradient.
    Nesterov { momentum: f32 },
    /// Running average of squared gradients.
    RmsProp { rho: f32, eps: f32 },
    /// Accumulated squared gradients.
    Adagrad { eps: f32 },
    /// Adam with bias correction.
    Adam { beta1: f32, beta2: f32, eps: f32 },
    /// Adam with an infinity-norm second moment.
    AdaMax { beta1: f32, beta2: f32, eps: f32 },
    /// Adam with Nesterov momentum and a warming momentum schedule.
    Nadam { beta1: f32, beta2: f32, eps: f32 },
    /// Learning-rate free: the step is scaled by the running RMS of past
    /// updates, so `lr` is ignored.
    Adadelta { rho: f32, eps: f32 },
}

/// Decay applied to the Nadam momentum schedule per step.
const NADAM_SCHEDULE_DECAY: f32 = 0.004;

fn nadam_momentum(beta1: f32, t: f32) -> f32 {
    beta1 * (1.0 - 0.5 * 0.96_f32.powf(t * NADAM_SCHEDULE_DECAY))
}

fn unit_interval(name: &str, v: f32) -> Result<()> {
    if !(v.is_finite() && (0.0..1.0).contains(&v)) {
        return Err(Error::InvalidConfig(format!(
            "{name} must be finite and in [0,1), got {v}"
        )));
    }
    Ok(())
}

fn positive(name: &str, v: f32) -> Result<()> {
    if !(v.is_finite() && v > 0.0) {
        return Err(Error::InvalidConfig(format!(
            "{name} must be finite and > 0, got {v}"
        )));
    }
    Ok(())
}

impl Optimizer {
    pub fn adam() -> Self {
        Optimizer::Adam {
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-8,
        }
    }

    pub fn adamax() -> Self {
        Optimizer::AdaMax {
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-8,
        }
    }

    pub fn nadam() -> Self {
        Optimizer::Nadam {
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-8,
        }
    }

    pub fn adadelta() -> Self {
        Optimizer::Adadelta {
            rho: 0.95,
            eps: 1e-8,
        }
    }

    pub fn validate(self) -> Result<()> {
        match self {
            Optimizer::Sgd => Ok(()),
            Optimizer::SgdMomentum { momentum } | Optimizer::Nesterov { momentum } => {
                unit_interval("momentum", momentum)
            }
            Optimizer::RmsProp { rho, eps } => {
                unit_interval("rmsprop rho", rho)?;
                positive("rmsprop eps", eps)
            }
            Optimizer::Adagrad { eps } => positive("adagrad eps", eps),
            Optimizer::Adam { beta1, beta2, eps }
            | Optimizer::AdaMax { beta1, beta2, eps }
            | Optimizer::Nadam { beta1, beta2, eps } => {
                unit_interval("beta1", beta1)?;
                unit_interval("beta2", beta2)?;
                positive("eps", eps)
            }
            Optimizer::Adadelta { rho, eps } => {
                unit_interval("adadelta rho", rho)?;
                positive("adadelta eps", eps)
            }
        }
    }

    /// Allocate state for the given trainable variables.
    pub fn state(self, params: &[Variable]) -> Result<OptimizerState> {
        self.validate()?;
        let zeros = || -> Vec<Vec<f32>> {
            params
                .iter()
                .map(|p| vec![0.0; p.element_count()])
                .collect()
        };
        let kind = match self {
            Optimizer::Sgd => Kind::Sgd,
            Optimizer::SgdMomentum { momentum } => Kind::SgdMomentum {
                momentum,
                velocity: zeros(),
            },
            Optimizer::Nesterov { momentum } => Kind::Nesterov {
                momentum,
                velocity: zeros(),
            },
            Optimizer::RmsProp { rho, eps } => Kind::RmsProp {
                rho,
                eps,
                cache: zeros(),
            },
            Optimizer::Adagrad { eps } => Kind::Adagrad {
                eps,
                cache: zeros(),
            },
            Optimizer::Adam { beta1, beta2, eps } => Kind::Adam {
                beta1,
                beta2,
                eps,
                beta1_pow: 1.0,
                beta2_pow: 1.0,
                m: zeros(),
                v: zeros(),
            },
            Optimizer::AdaMax { beta1, beta2, eps } => Kind::AdaMax {
                beta1,
                beta2,
                eps,
                beta1_pow: 1.0,
                m: zeros(),
                u: zeros(),
            },
            Optimizer::Nadam { beta1, beta2, eps } => Kind::Nadam {
                beta1,
                beta2,
                eps,
                step: 0,
                beta2_pow: 1.0,
                schedule: 1.0,
                schedule_next: 1.0,
                mu: 0.0,
                mu_next: 0.0,
                m: zeros(),
                v: zeros(),
            },
            Optimizer::Adadelta { rho, eps } => Kind::Adadelta {
                rho,
                eps,
                grad_sq: zeros(),
                delta_sq: zeros(),
            },
        };
        Ok(OptimizerState {
            params: params.to_vec(),
            kind,
        })
    }
}

/// L1/L2 penalties added to every trainable gradient.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct WeightDecay {
    pub l1: f32,
    pub l2: f32,
}

impl WeightDecay {
    pub fn validate(self) -> Result<()> {
        for (name, v) in [("l1 decay", self.l1), ("l2 decay", self.l2)] {
            if !(v.is_finite() && v >= 0.0) {
                return Err(Error::InvalidConfig(format!(
                    "{name} must be finite and >= 0, got {v}"
                )));
            }
        }
        Ok(())
    }

    /// A zero weight takes the negative L1 direction.
    #[inline]
    fn apply(self, g: f32, w: f32) -> f32 {
        let sign = if w > 0.0 { 1.0 } else { -1.0 };
        g + self.l2 * w + self.l1 * sign
    }
}

#[derive(Debug, Clone)]
enum Kind {
    Sgd,
    SgdMomentum {
        momentum: f32,
        velocity: Vec<Vec<f32>>,
    },
    Nesterov {
        momentum: f32,
        velocity: Vec<Vec<f32>>,
    },
    RmsProp {
        rho: f32,
        eps: f32,
        cache: Vec<Vec<f32>>,
    },
    Adagrad {
        eps: f32,
        cache: Vec<Vec<f32>>,
    },
    Adam {
        beta1: f32,
        beta2: f32,
        eps: f32,
        beta1_pow: f32,
        beta2_pow: f32,
        m: Vec<Vec<f32>>,
        v: Vec<Vec<f32>>,
    },
    AdaMax {
        beta1: f32,
        beta2: f32,
        eps: f32,
        beta1_pow: f32,
        m: Vec<Vec<f32>>,
        u: Vec<Vec<f32>>,
    },
    Nadam {
        beta1: f32,
        beta2: f32,
        eps: f32,
        step: u32,
        beta2_pow: f32,
        /// Product of the momentum factors up to the current step.
        schedule: f32,
        /// `schedule · mu_next`.
        schedule_next: f32,
        mu: f32,
        mu_next: f32,
        m: Vec<Vec<f32>>,
        v: Vec<Vec<f32>>,
    },
    Adadelta {
        rho: f32,
        eps: f32,
        grad_sq: Vec<Vec<f32>>,
        delta_sq: Vec<Vec<f32>>,
    },
}

/// Owned optimizer state bound to a fixed parameter list.
#[derive(Debug, Clone)]
pub struct OptimizerState {
    params: Vec<Variable>,
    kind: Kind,
}

impl OptimizerState {
    pub fn params(&self) -> &[Variable] {
        &self.params
    }

    /// Update every parameter in place from its stored gradient.
    pub fn step(&mut self, storage: &mut Storage, lr: f32, decay: WeightDecay) -> Result<()> {
        positive("learning rate", lr)?;

        match &mut self.kind {
            Kind::Adam {
                beta1,
                beta2,
                beta1_pow,
                beta2_pow,
                ..
            } => {
                *beta1_pow *= *beta1;
                *beta2_pow *= *beta2;
            }
            Kind::AdaMax {
                beta1, beta1_pow, ..
            } => *beta1_pow *= *beta1,
            Kind::Nadam {
                beta1,
                beta2,
                step,
                beta2_pow,
                schedule,
                schedule_next,
                mu,
                mu_next,
                ..
            } => {
                *step += 1;
                let t = *step as f32;
                *mu = nadam_momentum(*beta1, t);
                *mu_next = nadam_momentum(*beta1, t + 1.0);
                *schedule *= *mu;
                *schedule_next = *schedule * *mu_next;
                *beta2_pow *= *beta2;
            }
            _ => {}
        }

        for (idx, param) in self.params.iter().enumerate() {
            let (w, g) = storage.parameter_mut(param)?;
            match &mut self.kind {
                Kind::Sgd => {
                    for (w, &g) in w.iter_mut().zip(g) {
                        *w -= lr * decay.apply(g, *w);
                    }
                }
                Kind::SgdMomentum { momentum, velocity } => {
                    let mu = *momentum;
                    for ((w, &g), v) in w.iter_mut().zip(g).zip(&mut velocity[idx]) {
                        *v = mu * *v + decay.apply(g, *w);
                        *w -= lr * *v;
                    }
                }
                Kind::Nesterov { momentum, velocity } => {
                    let mu = *momentum;
                    for ((w, &g), v) in w.iter_mut().zip(g).zip(&mut velocity[idx]) {
                        let prev = *v;
                        *v = mu * prev - lr * decay.apply(g, *w);
                        *w += -mu * prev + (1.0 + mu) * *v;
                    }
                }
                Kind::RmsProp { rho, eps, cache } => {
                    let (rho, eps) = (*rho, *eps);
                    for ((w, &g), c) in w.iter_mut().zip(g).zip(&mut cache[idx]) {
                        let g = decay.apply(g, *w);
                        *c = rho * *c + (1.0 - rho) * g * g;
                        *w -= lr * g / (c.sqrt() + eps);
                    }
                }
                Kind::Adagrad { eps, cache } => {
                    let eps = *eps;
                    for ((w, &g), c) in w.iter_mut().zip(g).zip(&mut cache[idx]) {
                        let g = decay.apply(g, *w);
                        *c += g * g;
                        *w -= lr * g / (c.sqrt() + eps);
                    }
                }
                Kind::Adam {
                    beta1,
                    beta2,
                    eps,
                    beta1_pow,
                    beta2_pow,
                    m,
                    v,
                } => {
                    let (b1, b2, eps) = (*beta1, *beta2, *eps);
                    let corr1 = 1.0 - *beta1_pow;
                    let corr2 = 1.0 - *beta2_pow;
                    for (((w, &g), m), v) in w
                        .iter_mut()
                        .zip(g)
                        .zip(&mut m[idx])
                        .zip(&mut v[idx])
                    {
                        let g = decay.apply(g, *w);
                        *m = b1 * *m + (1.0 - b1) * g;
                        *v = b2 * *v + (1.0 - b2) * g * g;
                        *w -= lr * (*m / corr1) / ((*v / corr2).sqrt() + eps);
                    }
                }
                Kind::AdaMax {
                    beta1,
                    beta2,
                    eps,
                    beta1_pow,
                    m,
                    u,
                } => {
                    let (b1, b2, eps) = (*beta1, *beta2, *eps);
                    let lr_t = lr / (1.0 - *beta1_pow);
                    for (((w, &g), m), u) in w
                        .iter_mut()
                        .zip(g)
                        .zip(&mut m[idx])
                        .zip(&mut u[idx])
                    {
                        let g = decay.apply(g, *w);
                        *m = b1 * *m + (1.0 - b1) * g;
                        *u = (b2 * *u).max(g.abs());
                        *w -= lr_t * *m / (*u + eps);
                    }
                }
                Kind::Nadam {
                    beta1,
                    beta2,
                    eps,
                    beta2_pow,
                    schedule,
                    schedule_next,
                    mu,
                    mu_next,
                    m,
                    v,
                    ..
                } => {
                    let (b1, b2, eps, mu, mu_next) = (*beta1, *beta2, *eps, *mu, *mu_next);
                    let g_corr = 1.0 - *schedule;
                    let m_corr = 1.0 - *schedule_next;
                    let v_corr = 1.0 - *beta2_pow;
                    for (((w, &g), m), v) in w
                        .iter_mut()
                        .zip(g)
                        .zip(&mut m[idx])
                        .zip(&mut v[idx])
                    {
                        let g = decay.apply(g, *w);
                        *m = b1 * *m + (1.0 - b1) * g;
                        *v = b2 * *v + (1.0 - b2) * g * g;
                        let m_bar = (1.0 - mu) * g / g_corr + mu_next * *m / m_corr;
                        *w -= lr * m_bar / ((*v / v_corr).sqrt() + eps);
                    }
                }
                Kind::Adadelta {
                    rho,
                    eps,
                    grad_sq,
                    delta_sq,
                } => {
                    let (rho, eps) = (*rho, *eps);
                    for (((w, &g), eg), ed) in w
                        .iter_mut()
                        .zip(g)
                        .zip(&mut grad_sq[idx])
                        .zip(&mut delta_sq[idx])
                    {
                        let g = decay.apply(g, *w);
                        *eg = rho * *eg + (1.0 - rho) * g * g;
                        let dx = -g * (*ed + eps).sqrt() / (*eg + eps).sqrt();
                        *ed = rho * *ed + (1.0 - rho) * dx * dx;
                        *w += dx;
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Shape;

    fn single_param(w: f32, g: f32) -> (Storage, Variable) {
        let var = Variable::trainable(Shape::new(&[1]).unwrap());
        let mut storage = Storage::new();
        storage.assign_value(&var, &[w]).unwrap();
        storage.gradient_mut(&var).fill(g);
        (storage, var)
    }

    fn weight(storage: &Storage, var: &Variable) -> f32 {
        storage.value(var).unwrap().data()[0]
    }

    #[test]
    fn validation_rejects_bad_hyperparams() {
        assert!(Optimizer::SgdMomentum { momentum: 1.0 }.validate().is_err());
        assert!(Optimizer::Nesterov { momentum: -0.1 }.validate().is_err());
        assert!(Optimizer::RmsProp { rho: 0.9, eps: 0.0 }.validate().is_err());
        assert!(Optimizer::Adagrad { eps: f32::NAN }.validate().is_err());
        assert!(
            Optimizer::Adam {
                beta1: 0.9,
                beta2: 1.0,
                eps: 1e-8
            }
            .validate()
            .is_err()
        );
        assert!(Optimizer::adam().validate().is_ok());
        assert!(
            Optimizer::AdaMax {
                beta1: 1.5,
                beta2: 0.999,
                eps: 1e-8
            }
            .validate()
            .is_err()
        );
        assert!(
            Optimizer::Nadam {
                beta1: 0.9,
                beta2: 0.999,
                eps: 0.0
            }
            .validate()
            .is_err()
        );
        assert!(Optimizer::Adadelta { rho: 1.0, eps: 1e-6 }.validate().is_err());
        for opt in [Optimizer::adamax(), Optimizer::nadam(), Optimizer::adadelta()] {
            assert!(opt.validate().is_ok(), "{opt:?}");
        }
        assert!(WeightDecay { l1: -1.0, l2: 0.0 }.validate().is_err());
    }

    #[test]
    fn momentum_matches_sgd_on_first_step() {
        let (mut storage, var) = single_param(1.0, 3.0);
        let mut opt = Optimizer::SgdMomentum { momentum: 0.9 }
            .state(std::slice::from_ref(&var))
            .unwrap();
        opt.step(&mut storage, 0.1, WeightDecay::default()).unwrap();
        assert!((weight(&storage, &var) - 0.7).abs() < 1e-6);

        // Second step with the same gradient: v = 0.9·3 + 3 = 5.7.
        opt.step(&mut storage, 0.1, WeightDecay::default()).unwrap();
        assert!((weight(&storage, &var) - (0.7 - 0.57)).abs() < 1e-6);
    }

    #[test]
    fn nesterov_first_step_looks_ahead() {
        let (mut storage, var) = single_param(1.0, 1.0);
        let mut opt = Optimizer::Nesterov { momentum: 0.5 }
            .state(std::slice::from_ref(&var))
            .unwrap();
        opt.step(&mut storage, 0.1, WeightDecay::default()).unwrap();
        // v = −0.1, w += (1 + 0.5)·v
        assert!((weight(&storage, &var) - 0.85).abs() < 1e-6);
    }

    #[test]
    fn adam_first_step_is_unit_scaled() {
        let (mut storage, var) = single_param(1.0, 1.0);
        let mut opt = Optimizer::Adam {
            beta1: 0.9,
            beta2: 0.999,
            eps: 1.0,
        }
        .state(std::slice::from_ref(&var))
        .unwrap();
        opt.step(&mut storage, 0.1, WeightDecay::default()).unwrap();
        // m̂ = 1, v̂ = 1 → update 1 / (1 + eps) = 0.5
        assert!((weight(&storage, &var) - 0.95).abs() < 1e-6);
    }

    #[test]
    fn adaptive_methods_normalize_gradient_scale() {
        for opt in [
            Optimizer::Adagrad { eps: 1e-8 },
            Optimizer::RmsProp { rho: 0.0, eps: 1e-8 },
        ] {
            let (mut storage, var) = single_param(0.0, 100.0);
            let mut state = opt.state(std::slice::from_ref(&var)).unwrap();
            state.step(&mut storage, 0.01, WeightDecay::default()).unwrap();
            assert!((weight(&storage, &var) + 0.01).abs() < 1e-5, "{opt:?}");
        }
    }

    #[test]
    fn decay_is_added_to_the_gradient() {
        let (mut storage, var) = single_param(2.0, 0.0);
        let mut opt = Optimizer::Sgd.state(std::slice::from_ref(&var)).unwrap();
        let decay = WeightDecay { l1: 0.5, l2: 0.25 };
        opt.step(&mut storage, 1.0, decay).unwrap();
        // g = 0 + 0.25·2 + 0.5·1 = 1
        assert!((weight(&storage, &var) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn step_requires_a_gradient() {
        let var = Variable::trainable(Shape::new(&[2]).unwrap());
        let mut storage = Storage::new();
        storage.value_mut(&var);
        let mut opt = Optimizer::Sgd.state(std::slice::from_ref(&var)).unwrap();
        assert!(opt.step(&mut storage, 0.1, WeightDecay::default()).is_err());
        assert!(opt.step(&mut storage, 0.0, WeightDecay::default()).is_err());
    }

    #[test]
    fn adamax_steps_by_lr_under_a_constant_gradient() {
        let (mut storage, var) = single_param(1.0, 1.0);
        let mut opt = Optimizer::adamax()
            .state(std::slice::from_ref(&var))
            .unwrap();
        // m = 0.1, u = 1, lr_t = lr / (1 − 0.9) → step of exactly lr.
        opt.step(&mut storage, 0.1, WeightDecay::default()).unwrap();
        assert!((weight(&storage, &var) - 0.9).abs() < 1e-6);
        // m = 0.19, u = max(0.999, 1), lr_t = lr / 0.19.
        opt.step(&mut storage, 0.1, WeightDecay::default()).unwrap();
        assert!((weight(&storage, &var) - 0.8).abs() < 1e-5);
    }

    #[test]
    fn nadam_first_step_matches_hand_computation() {
        let (mut storage, var) = single_param(1.0, 1.0);
        let mut opt = Optimizer::nadam()
            .state(std::slice::from_ref(&var))
            .unwrap();
        opt.step(&mut storage, 0.1, WeightDecay::default()).unwrap();
        // mu_1 = 0.450073, mu_2 = 0.450147, v̂ = 1,
        // m̄ = 1 + mu_2 · 0.1 / (1 − mu_1 · mu_2).
        assert!((weight(&storage, &var) - 0.894_354_8).abs() < 1e-5);
    }

    #[test]
    fn adadelta_ignores_the_learning_rate() {
        for lr in [0.1, 10.0] {
            let (mut storage, var) = single_param(1.0, 1.0);
            let mut opt = Optimizer::Adadelta { rho: 0.95, eps: 1e-6 }
                .state(std::slice::from_ref(&var))
                .unwrap();
            opt.step(&mut storage, lr, WeightDecay::default()).unwrap();
            // dx = −1 · sqrt(eps) / sqrt(0.05 + eps)
            assert!((weight(&storage, &var) - 0.995_527_9).abs() < 1e-5);
        }
    }

    #[test]
    fn l1_decay_pushes_a_zero_weight_negative() {
        let (mut storage, var) = single_param(0.0, 0.0);
        let mut opt = Optimizer::Sgd.state(std::slice::from_ref(&var)).unwrap();
        let decay = WeightDecay { l1: 0.5, l2: 0.0 };
        opt.step(&mut storage, 1.0, decay).unwrap();
        assert!((weight(&storage, &var) - 0.5).abs() < 1e-6);
    }
}
