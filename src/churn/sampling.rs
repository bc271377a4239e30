//! Bounded training samples for the churn classifier

use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::seq::{index, SliceRandom};
use rand::SeedableRng;
use tracing::{debug, info, warn};

/// How the training rows were chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleStrategy {
    /// Every row, the dataset fits under the cap
    Full,
    /// Class proportions preserved
    Stratified,
    /// Uniform without replacement; stratification was infeasible
    Uniform,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrainingSample {
    /// Row indices into the full table, ascending
    pub indices: Vec<usize>,
    pub strategy: SampleStrategy,
}

/// Choose at most `cap` rows for training, stratified by label when possible
pub fn training_sample(labels: &[usize], cap: usize, seed: u64) -> TrainingSample {
    let n_rows = labels.len();
    if n_rows <= cap {
        return TrainingSample { indices: (0..n_rows).collect(), strategy: SampleStrategy::Full };
    }

    info!(rows = n_rows, sample = cap, "large dataset, sampling rows for training");
    let mut rng = StdRng::seed_from_u64(seed);
    match stratified_indices(labels, cap, &mut rng) {
        Some(indices) => TrainingSample { indices, strategy: SampleStrategy::Stratified },
        None => {
            warn!("stratified sampling infeasible, falling back to uniform sample");
            let mut indices = index::sample(&mut rng, n_rows, cap).into_vec();
            cover_every_class(labels, &mut indices, &mut rng);
            indices.sort_unstable();
            TrainingSample { indices, strategy: SampleStrategy::Uniform }
        }
    }
}

/// Swap a seeded member of each class absent from `indices` into the sample
///
/// The replaced slot always belongs to a class with another row in the sample, so no
/// class present before the swap disappears.
fn cover_every_class(labels: &[usize], indices: &mut [usize], rng: &mut StdRng) {
    let mut classes: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for (row, &label) in labels.iter().enumerate() {
        classes.entry(label).or_default().push(row);
    }

    for (&label, members) in &classes {
        if indices.iter().any(|&row| labels[row] == label) {
            continue;
        }
        let mut counts: BTreeMap<usize, usize> = BTreeMap::new();
        for &row in indices.iter() {
            *counts.entry(labels[row]).or_default() += 1;
        }
        let replaceable: Vec<usize> = (0..indices.len())
            .filter(|&slot| counts.get(&labels[indices[slot]]).copied().unwrap_or(0) > 1)
            .collect();
        let (Some(&slot), Some(&row)) = (replaceable.choose(rng), members.choose(rng)) else {
            continue;
        };
        debug!(label, row, "class missing from uniform sample, swapping one in");
        indices[slot] = row;
    }
}

/// Sample `size` rows keeping each label's share; `None` when a class is too small
pub fn stratified_indices(labels: &[usize], size: usize, rng: &mut StdRng) -> Option<Vec<usize>> {
    let n_rows = labels.len();
    if size == 0 || size > n_rows {
        return None;
    }

    let mut classes: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for (row, &label) in labels.iter().enumerate() {
        classes.entry(label).or_default().push(row);
    }
    if classes.values().any(|members| members.len() < 2) {
        return None;
    }

    // floor allocation, remainder to the largest fractional parts
    let mut allocation: Vec<(usize, usize, f64)> = classes
        .iter()
        .map(|(&label, members)| {
            let exact = size as f64 * members.len() as f64 / n_rows as f64;
            (label, exact.floor() as usize, exact - exact.floor())
        })
        .collect();
    let assigned: usize = allocation.iter().map(|(_, take, _)| take).sum();
    let mut by_fraction: Vec<usize> = (0..allocation.len()).collect();
    by_fraction.sort_by(|&a, &b| allocation[b].2.total_cmp(&allocation[a].2));
    for &slot in by_fraction.iter().take(size - assigned) {
        allocation[slot].1 += 1;
    }
    if allocation.iter().any(|&(_, take, _)| take == 0) {
        return None;
    }

    let mut indices = Vec::with_capacity(size);
    for (label, take, _) in allocation {
        let mut members = classes.remove(&label)?;
        members.shuffle(rng);
        indices.extend_from_slice(&members[..take.min(members.len())]);
    }
    indices.sort_unstable();
    Some(indices)
}
