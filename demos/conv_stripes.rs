//! Classify 8×8 images by stripe orientation with a small convnet.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use rust_convnet::layers::{BorderMode, Conv2DConfig, Pool2DConfig};
use rust_convnet::{
    Activation, Dataset, FitConfig, Loss, NetworkBuilder, Optimizer, Shuffle, one_of_n,
};

const SIDE: usize = 8;

fn stripes(n: usize, rng: &mut StdRng) -> rust_convnet::Result<Dataset> {
    let mut xs = Vec::with_capacity(n * SIDE * SIDE);
    let mut labels = Vec::with_capacity(n);
    for _ in 0..n {
        let vertical = rng.gen_range(0..2) == 1;
        let pos = rng.gen_range(0..SIDE);
        for y in 0..SIDE {
            for x in 0..SIDE {
                let on = if vertical { x == pos } else { y == pos };
                let noise = rng.gen_range(-0.1..0.1);
                xs.push(if on { 1.0 } else { 0.0 } + noise);
            }
        }
        labels.push(if vertical { 1.0 } else { 0.0 });
    }
    let (targets, classes) = one_of_n(&labels)?;
    Dataset::from_flat(xs, targets.into_vec(), &[1, SIDE, SIDE], classes.len())
}

fn main() -> rust_convnet::Result<()> {
    let mut rng = StdRng::seed_from_u64(42);
    let train = stripes(256, &mut rng)?;
    let test = stripes(64, &mut rng)?;

    let mut net = NetworkBuilder::new(&[1, SIDE, SIDE])?
        .conv2d(Conv2DConfig::new(8, 3, 3).with_border(BorderMode::Same))?
        .batch_norm()?
        .activation(Activation::ReLU)?
        .max_pool2d(Pool2DConfig::new(2, 2))?
        .dropout(0.2)?
        .dense(train.target_dim())?
        .build_with_seed(0)?;

    let report = net.fit(
        &train,
        None,
        FitConfig {
            epochs: 15,
            lr: 1e-3,
            batch_size: 32,
            shuffle: Shuffle::Seeded(1),
            optimizer: Optimizer::adam(),
            l1_decay: 0.0,
            l2_decay: 0.0,
            loss: Loss::SoftmaxCrossEntropy,
        },
    )?;
    for e in &report.epochs {
        println!("epoch {:>2}: loss {:.4}", e.epoch + 1, e.loss);
    }

    let mut trained = report.network;
    println!("{}", trained.summary());
    let logits = trained.predict(test.observations())?;
    let correct = (0..test.len())
        .filter(|&i| {
            let row = logits.row(i);
            let predicted = usize::from(row[1] > row[0]);
            test.targets().row(i)[predicted] == 1.0
        })
        .count();
    println!("test accuracy: {correct}/{}", test.len());
    Ok(())
}
