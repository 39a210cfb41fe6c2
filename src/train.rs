//! The mini-batch training loop.

use std::time::Instant;

use crate::{
    Batcher, Dataset, Error, Loss, Network, Optimizer, Result, Shape, Shuffle, Tensor, WeightDecay,
};

#[derive(Debug, Clone, Copy)]
pub struct FitConfig {
    pub epochs: usize,
    pub lr: f32,
    pub batch_size: usize,
    pub shuffle: Shuffle,
    pub optimizer: Optimizer,
    pub l1_decay: f32,
    pub l2_decay: f32,
    pub loss: Loss,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            epochs: 10,
            lr: 1e-2,
            batch_size: 32,
            shuffle: Shuffle::Seeded(0),
            optimizer: Optimizer::Sgd,
            l1_decay: 0.0,
            l2_decay: 0.0,
            loss: Loss::Mse,
        }
    }
}

impl FitConfig {
    pub fn validate(&self) -> Result<()> {
        if self.epochs == 0 {
            return Err(Error::InvalidConfig("epochs must be > 0".to_owned()));
        }
        if !(self.lr.is_finite() && self.lr > 0.0) {
            return Err(Error::InvalidConfig("lr must be finite and > 0".to_owned()));
        }
        if self.batch_size == 0 {
            return Err(Error::InvalidConfig("batch_size must be > 0".to_owned()));
        }
        self.optimizer.validate()?;
        self.decay().validate()
    }

    #[inline]
    fn decay(&self) -> WeightDecay {
        WeightDecay {
            l1: self.l1_decay,
            l2: self.l2_decay,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EpochReport {
    pub epoch: usize,
    /// Mean of the batch losses of this epoch.
    pub loss: f32,
    /// Full batches trained on; a trailing partial batch is skipped.
    pub batches: usize,
    /// Loss of this epoch's snapshot on the validation set, when one is given.
    pub validation_loss: Option<f32>,
}

#[derive(Debug)]
pub struct FitReport {
    /// Independent inference snapshot of the trained network.
    ///
    /// With a validation set this is the snapshot of the epoch with the
    /// lowest validation loss; otherwise it is the last epoch's.
    pub network: Network,
    pub best_epoch: usize,
    pub epochs: Vec<EpochReport>,
}

impl FitReport {
    pub fn final_loss(&self) -> Option<f32> {
        self.epochs.last().map(|e| e.loss)
    }
}

/// Runs [`FitConfig`] against a network.
#[derive(Debug, Clone)]
pub struct Learner {
    config: FitConfig,
}

impl Learner {
    pub fn new(config: FitConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    #[inline]
    pub fn config(&self) -> &FitConfig {
        &self.config
    }

    /// Train `network` on `train` and return a snapshot of the result.
    ///
    /// An uninitialized network is initialized for the configured batch
    /// size; an initialized one keeps its weights and only switches batch
    /// size. Each epoch reshuffles and walks the full batches only.
    ///
    /// The per-step path reuses every buffer: after the first batch,
    /// training a dense network performs no allocations.
    ///
    /// With `validation`, every epoch snapshots the network, scores it on the
    /// validation set and keeps the best snapshot. Training stops early when
    /// the training loss becomes NaN.
    pub fn learn(
        &self,
        network: &mut Network,
        train: &Dataset,
        validation: Option<&Dataset>,
    ) -> Result<FitReport> {
        let cfg = &self.config;
        check_samples("train", train, network)?;
        if let Some(validation) = validation {
            check_samples("validation", validation, network)?;
        }
        if train.len() < cfg.batch_size {
            return Err(Error::InvalidData(format!(
                "train has {} samples, fewer than batch_size {}",
                train.len(),
                cfg.batch_size
            )));
        }

        if !network.is_initialized() {
            network.initialize(cfg.batch_size)?;
        } else if network.batch_size()? != cfg.batch_size {
            network.update_dimensions(cfg.batch_size)?;
        }
        let output_len = network.output()?.shape().sample_len();
        check_targets("train", train, output_len)?;
        if let Some(validation) = validation {
            check_targets("validation", validation, output_len)?;
        }

        let mut state = cfg.optimizer.state(&network.parameters())?;
        let decay = cfg.decay();
        let mut batch_targets = Tensor::zeros(Shape::new(&[cfg.batch_size, output_len])?);
        let mut batcher = Batcher::new(train.len(), cfg.shuffle);
        let mut epochs = Vec::with_capacity(cfg.epochs);
        let mut best: Option<(f32, usize, Network)> = None;

        for epoch in 0..cfg.epochs {
            let started = Instant::now();
            batcher.shuffle();
            let mut total = 0.0_f32;
            let mut batches = 0_usize;

            loop {
                let batch_observations = network.input_tensor_mut()?;
                if !batcher.next(
                    cfg.batch_size,
                    train.observations(),
                    train.targets(),
                    batch_observations,
                    &mut batch_targets,
                )? {
                    break;
                }
                network.forward(true)?;
                total += network.apply_loss(cfg.loss, &batch_targets)?;
                network.backward()?;
                network.step(&mut state, cfg.lr, decay)?;
                batches += 1;
            }

            let loss = total / batches as f32;
            if loss.is_nan() {
                log::warn!("epoch {}: loss is NaN, stopping", epoch + 1);
                epochs.push(EpochReport {
                    epoch,
                    loss,
                    batches,
                    validation_loss: None,
                });
                break;
            }

            let validation_loss = match validation {
                Some(validation) => {
                    let mut candidate = network.copy()?;
                    let pred = candidate.predict(validation.observations())?;
                    let vloss = cfg.loss.value(&pred, validation.targets())?;
                    if best.as_ref().is_none_or(|(b, _, _)| vloss < *b) {
                        best = Some((vloss, epoch, candidate));
                    }
                    log::info!(
                        "epoch {}/{}: loss {loss:.6} validation {vloss:.6} ({batches} batches, {:.2?})",
                        epoch + 1,
                        cfg.epochs,
                        started.elapsed()
                    );
                    Some(vloss)
                }
                None => {
                    log::info!(
                        "epoch {}/{}: loss {loss:.6} ({batches} batches, {:.2?})",
                        epoch + 1,
                        cfg.epochs,
                        started.elapsed()
                    );
                    None
                }
            };
            epochs.push(EpochReport {
                epoch,
                loss,
                batches,
                validation_loss,
            });
        }

        let (network, best_epoch) = match best {
            Some((vloss, epoch, candidate)) => {
                log::info!("best validation loss {vloss:.6} at epoch {}", epoch + 1);
                (candidate, epoch)
            }
            None => (network.copy()?, epochs.len().saturating_sub(1)),
        };
        Ok(FitReport {
            network,
            best_epoch,
            epochs,
        })
    }
}

fn check_samples(name: &str, data: &Dataset, network: &Network) -> Result<()> {
    if data.sample_dims() != network.sample_dims() {
        return Err(Error::InvalidData(format!(
            "{name} samples are {:?} but the network expects {:?}",
            data.sample_dims(),
            network.sample_dims()
        )));
    }
    Ok(())
}

fn check_targets(name: &str, data: &Dataset, output_len: usize) -> Result<()> {
    if data.target_dim() != output_len {
        return Err(Error::InvalidData(format!(
            "{name} target_dim {} does not match network output length {output_len}",
            data.target_dim()
        )));
    }
    Ok(())
}
