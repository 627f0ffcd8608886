//! Evidence sampling for the refiner

use crate::literature::Document;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Mutex;

/// Chooses which documents the refiner gets to see
pub trait DocumentSampler: Send + Sync {
    /// Return at most `max` documents from `documents`
    fn sample(&self, documents: &[Document], max: usize) -> Vec<Document>;
}

/// Random subset of random size in `1..=max`, kept in relevance order
pub struct RandomSampler {
    rng: Mutex<StdRng>,
}

impl RandomSampler {
    /// Reproducible sampling
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    pub fn from_entropy() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }
}

impl DocumentSampler for RandomSampler {
    fn sample(&self, documents: &[Document], max: usize) -> Vec<Document> {
        if documents.is_empty() || max == 0 {
            return Vec::new();
        }

        // A poisoned lock only means another sampler call panicked; the RNG is still usable
        let mut rng = self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let amount = rng.gen_range(1..=max).min(documents.len());

        let mut picked = rand::seq::index::sample(&mut *rng, documents.len(), amount).into_vec();
        picked.sort_unstable();

        picked.into_iter().map(|i| documents[i].clone()).collect()
    }
}

/// The first `max` documents, for deterministic runs
#[derive(Debug, Default, Clone, Copy)]
pub struct LeadingSampler;

impl DocumentSampler for LeadingSampler {
    fn sample(&self, documents: &[Document], max: usize) -> Vec<Document> {
        documents.iter().take(max).cloned().collect()
    }
}
