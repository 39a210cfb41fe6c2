use rust_convnet::{Activation, Dataset, FitConfig, Loss, NetworkBuilder, Optimizer, Shuffle};

fn main() -> rust_convnet::Result<()> {
    let xs = vec![
        vec![0.0, 0.0],
        vec![0.0, 1.0],
        vec![1.0, 0.0],
        vec![1.0, 1.0],
    ];
    let ys = vec![vec![0.0], vec![0.0], vec![0.0], vec![1.0]];
    let train = Dataset::from_rows(&xs, &ys)?;

    let mut net = NetworkBuilder::new(&[2])?
        .dense(8)?
        .activation(Activation::ReLU)?
        .dense(1)?
        .build_with_seed(0)?;

    let report = net.fit(
        &train,
        None,
        FitConfig {
            epochs: 300,
            lr: 0.05,
            batch_size: 4,
            shuffle: Shuffle::Seeded(0),
            optimizer: Optimizer::adam(),
            l1_decay: 0.0,
            l2_decay: 1e-4,
            loss: Loss::BinaryCrossEntropyWithLogits,
        },
    )?;
    for e in report.epochs.iter().step_by(50) {
        println!("epoch {:>3}: loss {:.5}", e.epoch + 1, e.loss);
    }

    let mut trained = report.network;
    let logits = trained.predict(train.observations())?;
    for (x, z) in xs.iter().zip(logits.data()) {
        let p = Activation::Sigmoid.apply(*z);
        println!("{x:?} -> {p:.3}");
    }
    Ok(())
}
