//! Inverted dropout.
//!
//! Training keeps each element with probability `1 − ratio` and scales the
//! survivors by `1 / (1 − ratio)`, so inference is a plain copy.

use rand::Rng;

use super::{expect_shape, write_gradient, write_value};
use crate::{Result, Storage, Variable};

/// Sample a fresh mask and apply it.
pub fn forward_training<R: Rng + ?Sized>(
    storage: &mut Storage,
    input: &Variable,
    mask: &Variable,
    output: &Variable,
    ratio: f32,
    rng: &mut R,
) -> Result<()> {
    expect_shape(mask, input.shape())?;
    expect_shape(output, input.shape())?;
    let keep = 1.0 / (1.0 - ratio);
    for m in storage.value_mut(mask).data_mut() {
        *m = if rng.gen_range(0.0..1.0) < ratio { 0.0 } else { keep };
    }
    write_value(storage, output, |s, y| {
        let x = s.value(input)?.data();
        let m = s.value(mask)?.data();
        for ((o, &v), &k) in y.data_mut().iter_mut().zip(x).zip(m) {
            *o = v * k;
        }
        Ok(())
    })
}

pub fn forward_inference(storage: &mut Storage, input: &Variable, output: &Variable) -> Result<()> {
    expect_shape(output, input.shape())?;
    write_value(storage, output, |s, y| {
        y.data_mut().copy_from_slice(s.value(input)?.data());
        Ok(())
    })
}

/// `dx = dy · mask` with the mask of the last training forward.
pub fn backward(
    storage: &mut Storage,
    input: &Variable,
    mask: &Variable,
    output: &Variable,
) -> Result<()> {
    expect_shape(mask, input.shape())?;
    expect_shape(output, input.shape())?;
    write_gradient(storage, input, |s, dx| {
        let dy = s.gradient(output)?.data();
        let m = s.value(mask)?.data();
        for ((d, &g), &k) in dx.data_mut().iter_mut().zip(dy).zip(m) {
            *d = g * k;
        }
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use super::*;
    use crate::{Error, Shape};

    fn vars(dims: &[usize]) -> (Variable, Variable, Variable) {
        let shape = Shape::new(dims).unwrap();
        (
            Variable::new(shape.clone()),
            Variable::new(shape.clone()),
            Variable::new(shape),
        )
    }

    #[test]
    fn inference_is_identity() {
        let (x, _, y) = vars(&[2, 3]);
        let mut storage = Storage::new();
        storage
            .assign_value(&x, &[1.0, -2.0, 3.0, -4.0, 5.0, -6.0])
            .unwrap();
        forward_inference(&mut storage, &x, &y).unwrap();
        assert_eq!(storage.value(&y).unwrap(), storage.value(&x).unwrap());
    }

    #[test]
    fn training_mask_is_zero_or_rescaled() {
        let (x, mask, y) = vars(&[100, 50]);
        let mut storage = Storage::new();
        storage.value_mut(&x).fill(1.0);
        let mut rng = StdRng::seed_from_u64(0);
        forward_training(&mut storage, &x, &mask, &y, 0.2, &mut rng).unwrap();

        let y = storage.value(&y).unwrap().data();
        assert!(y.iter().all(|&v| v == 0.0 || (v - 1.25).abs() < 1e-6));
        let kept = y.iter().filter(|&&v| v != 0.0).count() as f32 / y.len() as f32;
        assert!((kept - 0.8).abs() < 0.03, "kept fraction {kept}");
        // Expected value is preserved.
        let mean = y.iter().sum::<f32>() / y.len() as f32;
        assert!((mean - 1.0).abs() < 0.05);
    }

    #[test]
    fn backward_reuses_the_forward_mask() {
        let (x, mask, y) = vars(&[4, 4]);
        let mut storage = Storage::new();
        storage.value_mut(&x).fill(2.0);
        let mut rng = StdRng::seed_from_u64(1);
        forward_training(&mut storage, &x, &mask, &y, 0.5, &mut rng).unwrap();

        storage.gradient_mut(&y).fill(1.0);
        backward(&mut storage, &x, &mask, &y).unwrap();
        assert_eq!(
            storage.gradient(&x).unwrap().data(),
            storage.value(&mask).unwrap().data()
        );
    }

    #[test]
    fn zero_ratio_keeps_everything() {
        let (x, mask, y) = vars(&[3, 3]);
        let mut storage = Storage::new();
        storage.value_mut(&x).fill(0.7);
        let mut rng = StdRng::seed_from_u64(2);
        forward_training(&mut storage, &x, &mask, &y, 0.0, &mut rng).unwrap();
        assert_eq!(storage.value(&y).unwrap(), storage.value(&x).unwrap());
    }

    #[test]
    fn mismatched_mask_or_output_is_an_error() {
        let (x, mask, y) = vars(&[3, 4]);
        let (_, short, _) = vars(&[4, 3]);
        let mut storage = Storage::new();
        storage.value_mut(&x).fill(1.0);
        let mut rng = StdRng::seed_from_u64(3);
        assert!(matches!(
            forward_training(&mut storage, &x, &short, &y, 0.5, &mut rng),
            Err(Error::ShapeMismatch { .. })
        ));
        assert!(matches!(
            forward_inference(&mut storage, &x, &short),
            Err(Error::ShapeMismatch { .. })
        ));
        assert!(matches!(
            backward(&mut storage, &x, &mask, &short),
            Err(Error::ShapeMismatch { .. })
        ));
    }
}
