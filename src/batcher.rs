//! Mini-batch slicing over a (possibly shuffled) index permutation.

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

use crate::{Error, Result, Tensor};

/// Sample order between epochs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shuffle {
    /// Keep the original sample order.
    None,
    /// Re-permute every epoch from a deterministic seed.
    Seeded(u64),
}

impl Default for Shuffle {
    fn default() -> Self {
        Shuffle::Seeded(0)
    }
}

/// Walks an index permutation in fixed-size steps.
///
/// The trailing `len % batch_size` samples of each pass are skipped; a
/// reshuffle brings them into earlier batches on later epochs.
#[derive(Debug, Clone)]
pub struct Batcher {
    indices: Vec<usize>,
    cursor: usize,
    rng: Option<StdRng>,
}

impl Batcher {
    /// Batcher over samples `0..len`, in order until the first [`Batcher::shuffle`].
    pub fn new(len: usize, shuffle: Shuffle) -> Self {
        Self::with_indices((0..len).collect(), shuffle)
    }

    /// Batcher over an explicit subset of sample indices.
    pub fn with_indices(indices: Vec<usize>, shuffle: Shuffle) -> Self {
        let rng = match shuffle {
            Shuffle::None => None,
            Shuffle::Seeded(seed) => Some(StdRng::seed_from_u64(seed)),
        };
        Self {
            indices,
            cursor: 0,
            rng,
        }
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Current permutation.
    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    /// Rewind and, when seeded, re-permute.
    pub fn shuffle(&mut self) {
        self.cursor = 0;
        if let Some(rng) = self.rng.as_mut() {
            self.indices.shuffle(rng);
        }
    }

    /// Gather the next `batch_size` samples into the batch buffers.
    ///
    /// Returns `Ok(false)` without touching the buffers once fewer than
    /// `batch_size` indices remain.
    pub fn next(
        &mut self,
        batch_size: usize,
        observations: &Tensor,
        targets: &Tensor,
        batch_observations: &mut Tensor,
        batch_targets: &mut Tensor,
    ) -> Result<bool> {
        if batch_size == 0 {
            return Err(Error::InvalidConfig("batch_size must be > 0".to_owned()));
        }
        let remaining = self.indices.len() - self.cursor;
        if remaining < batch_size {
            if remaining > 0 {
                log::trace!("skipping {remaining} trailing samples in partial batch");
            }
            return Ok(false);
        }
        let batch = &self.indices[self.cursor..self.cursor + batch_size];
        observations.gather_rows_into(batch, batch_observations)?;
        targets.gather_rows_into(batch, batch_targets)?;
        self.cursor += batch_size;
        Ok(true)
    }
}
