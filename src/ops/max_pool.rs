//! 2-D max pooling.
//!
//! Forward records, for each output element, the flat `y·W + x` position of
//! the winning input within its channel plane. Backward routes the output
//! gradient back to those positions only.

use rayon::prelude::*;

use super::{Window2d, expect_shape, write_gradient, write_value};
use crate::{Error, Result, Shape, Storage, Variable};

/// Input, output and switch buffer must all agree with `geom`.
fn check(
    geom: &Window2d,
    input: &Variable,
    output: &Variable,
    switches: &[usize],
) -> Result<()> {
    let x = input.dims();
    if x.len() != 4 || x[1..] != [geom.channels, geom.in_h, geom.in_w] {
        return Err(Error::InvalidShape(format!(
            "pooling input {} does not match geometry [N, {}, {}, {}]",
            input.shape(),
            geom.channels,
            geom.in_h,
            geom.in_w
        )));
    }
    let batch = x[0];
    expect_shape(
        output,
        &Shape::new(&[batch, geom.channels, geom.out_h, geom.out_w])?,
    )?;
    let expected = batch * geom.channels * geom.positions();
    if switches.len() != expected {
        return Err(Error::InvalidShape(format!(
            "pooling switch buffer has {} entries, expected {expected}",
            switches.len()
        )));
    }
    Ok(())
}

fn pool_sample(geom: &Window2d, x: &[f32], y: &mut [f32], switches: &mut [usize]) {
    let plane = geom.in_plane();
    let positions = geom.positions();
    for c in 0..geom.channels {
        let xc = &x[c * plane..][..plane];
        for oy in 0..geom.out_h {
            let (y0, y1) = geom.rows(oy);
            for ox in 0..geom.out_w {
                let (x0, x1) = geom.cols(ox);
                let mut best = f32::NEG_INFINITY;
                let mut arg = y0 * geom.in_w + x0;
                for iy in y0..y1 {
                    for ix in x0..x1 {
                        let idx = iy * geom.in_w + ix;
                        if xc[idx] > best {
                            best = xc[idx];
                            arg = idx;
                        }
                    }
                }
                let o = c * positions + oy * geom.out_w + ox;
                y[o] = best;
                switches[o] = arg;
            }
        }
    }
}

/// Writes the pooled output and fills `switches` (one entry per output
/// element, `[N, C, oh, ow]` order).
pub fn forward(
    storage: &mut Storage,
    geom: &Window2d,
    input: &Variable,
    output: &Variable,
    switches: &mut [usize],
) -> Result<()> {
    check(geom, input, output, switches)?;
    let per_sample = geom.channels * geom.positions();
    write_value(storage, output, |s, out| {
        let x = s.value(input)?.data();
        out.data_mut()
            .par_chunks_mut(per_sample)
            .zip(switches.par_chunks_mut(per_sample))
            .zip(x.par_chunks(geom.in_sample()))
            .for_each(|((y, sw), x)| pool_sample(geom, x, y, sw));
        Ok(())
    })
}

pub fn backward(
    storage: &mut Storage,
    geom: &Window2d,
    input: &Variable,
    output: &Variable,
    switches: &[usize],
) -> Result<()> {
    check(geom, input, output, switches)?;
    let per_sample = geom.channels * geom.positions();
    let positions = geom.positions();
    let plane = geom.in_plane();
    write_gradient(storage, input, |s, dx| {
        let dy = s.gradient(output)?.data();
        dx.data_mut()
            .par_chunks_mut(geom.in_sample())
            .zip(dy.par_chunks(per_sample))
            .zip(switches.par_chunks(per_sample))
            .for_each(|((dx, dy), sw)| {
                dx.fill(0.0);
                for (o, (&g, &idx)) in dy.iter().zip(sw).enumerate() {
                    dx[(o / positions) * plane + idx] += g;
                }
            });
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Shape;
    use crate::ops::gradcheck;

    fn setup(input: &[usize], pool: usize, stride: usize, pad: usize) -> (Window2d, Variable, Variable) {
        let geom = Window2d::new(input, pool, pool, stride, stride, pad, pad).unwrap();
        let x = Variable::new(Shape::new(input).unwrap());
        let y = Variable::new(
            Shape::new(&[input[0], input[1], geom.out_h, geom.out_w]).unwrap(),
        );
        (geom, x, y)
    }

    #[test]
    fn forward_picks_window_maxima_and_records_switches() {
        let (geom, x, y) = setup(&[1, 1, 4, 4], 2, 2, 0);
        let mut storage = Storage::new();
        #[rustfmt::skip]
        storage.assign_value(&x, &[
            1.0, 2.0,  5.0, 0.0,
            4.0, 3.0,  1.0, 1.0,
            0.0, 0.0, -1.0, -2.0,
            9.0, 0.0, -3.0, -4.0,
        ]).unwrap();
        let mut switches = vec![0; 4];
        forward(&mut storage, &geom, &x, &y, &mut switches).unwrap();
        assert_eq!(storage.value(&y).unwrap().data(), &[4.0, 5.0, 9.0, -1.0]);
        assert_eq!(switches, vec![4, 2, 12, 10]);

        storage.gradient_mut(&y).fill(1.0);
        backward(&mut storage, &geom, &x, &y, &switches).unwrap();
        let dx = storage.gradient(&x).unwrap().data();
        assert_eq!(dx.iter().sum::<f32>(), 4.0);
        assert_eq!(dx[4], 1.0);
        assert_eq!(dx[12], 1.0);
    }

    #[test]
    fn overlapping_windows_accumulate_into_the_shared_max() {
        let (geom, x, y) = setup(&[1, 1, 3, 3], 2, 1, 0);
        let mut storage = Storage::new();
        storage
            .assign_value(&x, &[0.0, 0.0, 0.0, 0.0, 7.0, 0.0, 0.0, 0.0, 0.0])
            .unwrap();
        let mut switches = vec![0; 4];
        forward(&mut storage, &geom, &x, &y, &mut switches).unwrap();
        storage.gradient_mut(&y).fill(1.0);
        backward(&mut storage, &geom, &x, &y, &switches).unwrap();
        assert_eq!(storage.gradient(&x).unwrap().data()[4], 4.0);
    }

    #[test]
    fn padding_never_wins() {
        let (geom, x, y) = setup(&[1, 1, 2, 2], 2, 2, 1);
        let mut storage = Storage::new();
        storage.assign_value(&x, &[-1.0, -2.0, -3.0, -4.0]).unwrap();
        let mut switches = vec![0; geom.positions()];
        forward(&mut storage, &geom, &x, &y, &mut switches).unwrap();
        assert_eq!(storage.value(&y).unwrap().data(), &[-1.0, -2.0, -3.0, -4.0]);
    }

    #[test]
    fn gradients_match_finite_differences() {
        let (geom, x, y) = setup(&[2, 2, 5, 5], 3, 2, 1);
        let mut storage = Storage::new();
        // Distinct, well separated values keep the argmax stable under eps.
        let n = x.element_count();
        let values: Vec<f32> = (0..n).map(|i| ((i * 37) % n) as f32 * 0.1).collect();
        storage.assign_value(&x, &values).unwrap();

        let mut switches = vec![0; 2 * geom.channels * geom.positions()];
        forward(&mut storage, &geom, &x, &y, &mut switches).unwrap();
        gradcheck::seed_output_gradient(&mut storage, &y, 8);
        backward(&mut storage, &geom, &x, &y, &switches).unwrap();

        let mut scratch = switches.clone();
        gradcheck::check(&mut storage, &x, &y, 1e-2, 1e-2, |s| {
            forward(s, &geom, &x, &y, &mut scratch).unwrap()
        });
    }

    #[test]
    fn wrong_switch_buffer_is_rejected() {
        let (geom, x, y) = setup(&[1, 1, 4, 4], 2, 2, 0);
        let mut storage = Storage::new();
        storage.value_mut(&x);
        let mut switches = vec![0; 3];
        assert!(forward(&mut storage, &geom, &x, &y, &mut switches).is_err());
    }

    #[test]
    fn mis_shaped_input_or_output_is_rejected() {
        let (geom, x, _) = setup(&[1, 1, 4, 4], 2, 2, 0);
        let mut storage = Storage::new();
        storage.value_mut(&x);
        let mut switches = vec![0; 4];

        let wide = Variable::new(Shape::new(&[1, 1, 2, 3]).unwrap());
        assert!(matches!(
            forward(&mut storage, &geom, &x, &wide, &mut switches),
            Err(Error::ShapeMismatch { .. })
        ));
        assert!(matches!(
            backward(&mut storage, &geom, &x, &wide, &switches),
            Err(Error::ShapeMismatch { .. })
        ));

        let (_, _, y) = setup(&[1, 1, 4, 4], 2, 2, 0);
        let big = Variable::new(Shape::new(&[1, 1, 6, 6]).unwrap());
        storage.value_mut(&big);
        assert!(matches!(
            forward(&mut storage, &geom, &big, &y, &mut switches),
            Err(Error::InvalidShape(_))
        ));
    }
}
