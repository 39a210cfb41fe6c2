//! Element-wise activation functions.
//!
//! The activation layer caches its *output* `y`. Every supported function has
//! a derivative expressible through `y`, so backward never needs the input.

use std::fmt;

use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Activation {
    ReLU,
    Sigmoid,
    Tanh,
    LeakyReLU { alpha: f32 },
    Identity,
}

impl Activation {
    pub fn validate(self) -> Result<()> {
        if let Activation::LeakyReLU { alpha } = self {
            if !(alpha.is_finite() && alpha >= 0.0) {
                return Err(Error::InvalidConfig(format!(
                    "leaky ReLU alpha must be finite and >= 0, got {alpha}"
                )));
            }
        }
        Ok(())
    }

    #[inline]
    pub fn apply(self, x: f32) -> f32 {
        match self {
            Activation::ReLU => x.max(0.0),
            Activation::Sigmoid => sigmoid(x),
            Activation::Tanh => x.tanh(),
            Activation::LeakyReLU { alpha } => {
                if x > 0.0 {
                    x
                } else {
                    alpha * x
                }
            }
            Activation::Identity => x,
        }
    }

    /// `dy/dx` written in terms of the output `y`.
    #[inline]
    pub fn derivative_from_output(self, y: f32) -> f32 {
        match self {
            Activation::ReLU => {
                if y > 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
            Activation::Sigmoid => y * (1.0 - y),
            Activation::Tanh => 1.0 - y * y,
            Activation::LeakyReLU { alpha } => {
                if y > 0.0 {
                    1.0
                } else {
                    alpha
                }
            }
            Activation::Identity => 1.0,
        }
    }

    /// `output[i] = f(input[i])`.
    pub(crate) fn forward_slice(self, input: &[f32], output: &mut [f32]) {
        debug_assert_eq!(input.len(), output.len());
        for (y, &x) in output.iter_mut().zip(input) {
            *y = self.apply(x);
        }
    }

    /// `d_input[i] = f'(output[i]) * d_output[i]`.
    pub(crate) fn backward_slice(self, output: &[f32], d_output: &[f32], d_input: &mut [f32]) {
        debug_assert_eq!(output.len(), d_output.len());
        debug_assert_eq!(output.len(), d_input.len());
        for ((dx, &y), &dy) in d_input.iter_mut().zip(output).zip(d_output) {
            *dx = self.derivative_from_output(y) * dy;
        }
    }
}

impl fmt::Display for Activation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Activation::ReLU => write!(f, "relu"),
            Activation::Sigmoid => write!(f, "sigmoid"),
            Activation::Tanh => write!(f, "tanh"),
            Activation::LeakyReLU { alpha } => write!(f, "leaky_relu({alpha})"),
            Activation::Identity => write!(f, "identity"),
        }
    }
}

#[inline]
fn sigmoid(x: f32) -> f32 {
    // Split on sign so exp never overflows.
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let z = x.exp();
        z / (1.0 + z)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leaky_alpha_is_validated() {
        assert!(Activation::LeakyReLU { alpha: f32::NAN }.validate().is_err());
        assert!(Activation::LeakyReLU { alpha: -0.5 }.validate().is_err());
        assert!(Activation::LeakyReLU { alpha: 0.01 }.validate().is_ok());
        assert!(Activation::ReLU.validate().is_ok());
    }

    #[test]
    fn sigmoid_saturates_without_overflow() {
        assert!((Activation::Sigmoid.apply(0.0) - 0.5).abs() < 1e-7);
        assert_eq!(Activation::Sigmoid.apply(-1000.0), 0.0);
        assert_eq!(Activation::Sigmoid.apply(1000.0), 1.0);
    }

    #[test]
    fn relu_backward_masks_non_positive_outputs() {
        let x = [-1.0, 0.0, 2.0];
        let mut y = [0.0; 3];
        Activation::ReLU.forward_slice(&x, &mut y);
        assert_eq!(y, [0.0, 0.0, 2.0]);

        let mut dx = [9.0; 3];
        Activation::ReLU.backward_slice(&y, &[1.0, 1.0, 1.0], &mut dx);
        assert_eq!(dx, [0.0, 0.0, 1.0]);
    }

    #[test]
    fn derivatives_match_finite_differences() {
        let eps = 1e-3_f32;
        for act in [
            Activation::Sigmoid,
            Activation::Tanh,
            Activation::LeakyReLU { alpha: 0.1 },
            Activation::Identity,
        ] {
            for &x in &[-1.3_f32, -0.2, 0.4, 1.7] {
                let numeric = (act.apply(x + eps) - act.apply(x - eps)) / (2.0 * eps);
                let analytic = act.derivative_from_output(act.apply(x));
                assert!(
                    (numeric - analytic).abs() < 1e-2,
                    "{act} at {x}: {numeric} vs {analytic}"
                );
            }
        }
    }
}
