use std::time::Instant;

use rust_convnet::layers::{Conv2DConfig, Pool2DConfig};
use rust_convnet::{Activation, NetworkBuilder};

fn parse_usize(args: &[String], key: &str, default: usize) -> usize {
    let mut i = 0;
    while i + 1 < args.len() {
        if args[i] == key {
            return args[i + 1]
                .parse::<usize>()
                .unwrap_or_else(|_| panic!("failed to parse {key} as usize"));
        }
        i += 1;
    }
    default
}

fn main() -> rust_convnet::Result<()> {
    let args: Vec<String> = std::env::args().collect();

    let batch_size = parse_usize(&args, "--batch-size", 64);
    let iters = parse_usize(&args, "--iters", 200);
    let warmup = parse_usize(&args, "--warmup", 20);
    let side = parse_usize(&args, "--side", 28);
    let filters = parse_usize(&args, "--filters", 16);
    let kernel = parse_usize(&args, "--kernel", 5);
    let seed = parse_usize(&args, "--seed", 0) as u64;

    if batch_size == 0 || iters == 0 {
        panic!("batch_size and iters must be > 0");
    }

    let mut net = NetworkBuilder::new(&[1, side, side])?
        .conv2d(Conv2DConfig::new(filters, kernel, kernel))?
        .activation(Activation::ReLU)?
        .max_pool2d(Pool2DConfig::new(2, 2))?
        .dense(10)?
        .build_with_seed(seed)?;
    net.initialize(batch_size)?;

    let backend = if cfg!(feature = "matrixmultiply") {
        "matrixmultiply"
    } else {
        "naive"
    };

    // Deterministic, non-constant inputs.
    for (i, v) in net.input_tensor_mut()?.data_mut().iter_mut().enumerate() {
        *v = ((i % 997) as f32) * 1e-3;
    }

    for _ in 0..warmup {
        net.forward(false)?;
        std::hint::black_box(net.output_tensor()?.data()[0]);
    }

    let start = Instant::now();
    let mut checksum = 0.0_f32;
    for _ in 0..iters {
        net.forward(false)?;
        checksum += net.output_tensor()?.data()[0];
    }
    let elapsed = start.elapsed();
    std::hint::black_box(checksum);

    let elapsed_s = elapsed.as_secs_f64();
    let samples_per_s = (iters as f64) * (batch_size as f64) / elapsed_s;
    let iters_per_s = (iters as f64) / elapsed_s;

    println!(
        "rust-convnet perf_forward_batch backend={backend} batch_size={batch_size} iters={iters} warmup={warmup} side={side} filters={filters} kernel={kernel} elapsed_s={elapsed_s:.6} iters_per_s={iters_per_s:.2} samples_per_s={samples_per_s:.2} checksum={checksum}",
    );

    Ok(())
}
