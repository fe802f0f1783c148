//! Deterministic train/tune/test partitioning
//!
//! Entities are sampled by position: with training percentage `t` the
//! training frequency is `f = 1/t`, and entity `i` is a training entity when
//! `i mod f < 1`. Inside the training set a second frequency `f / s` selects
//! seeds (graph walk) or tuning entities (PMI). Every entity lands in exactly
//! one subset and its [`EntityRole`] is updated to match.

use eta_core::{Entity, EntityRole};

/// Whether position `index` is picked at sampling frequency `frequency`
fn is_sampled(index: usize, frequency: f64) -> bool {
    (index as f64) % frequency < 1.0
}

/// Entities split for PMI classifier training
#[derive(Debug, Clone, Default)]
pub struct PmiSplit {
    /// Positive entities used to find the PMI threshold
    pub positive_training: Vec<Entity>,
    /// Negative entities used to find the PMI threshold
    pub negative_training: Vec<Entity>,
    /// Positive entities used to learn the conditional probabilities
    pub positive_tuning: Vec<Entity>,
    /// Negative entities used to learn the conditional probabilities
    pub negative_tuning: Vec<Entity>,
    /// Held-out entities
    pub testing: Vec<Entity>,
}

impl PmiSplit {
    /// Number of training and tuning entities
    pub fn training_len(&self) -> usize {
        self.positive_training.len()
            + self.negative_training.len()
            + self.positive_tuning.len()
            + self.negative_tuning.len()
    }
}

/// Partition entities for PMI training
///
/// Positives are entities whose ground-truth label is 1.
pub fn split_for_pmi(entities: &mut [Entity], training_percentage: f64, tuning_percentage: f64) -> PmiSplit {
    let training_frequency = 1.0 / training_percentage;
    let tuning_frequency = training_frequency / tuning_percentage;

    let mut split = PmiSplit::default();
    for (index, entity) in entities.iter_mut().enumerate() {
        if !is_sampled(index, training_frequency) {
            entity.role = EntityRole::Testing;
            split.testing.push(entity.clone());
            continue;
        }

        entity.role = EntityRole::Training;
        let tuning = is_sampled(index, tuning_frequency);
        let target = match (entity.is_positive(), tuning) {
            (true, false) => &mut split.positive_training,
            (true, true) => &mut split.positive_tuning,
            (false, false) => &mut split.negative_training,
            (false, true) => &mut split.negative_tuning,
        };
        target.push(entity.clone());
    }

    tracing::debug!(
        positive = split.positive_training.len(),
        negative = split.negative_training.len(),
        positive_tuning = split.positive_tuning.len(),
        negative_tuning = split.negative_tuning.len(),
        testing = split.testing.len(),
        "PMI split"
    );
    split
}

/// Entity positions split for the random graph walk
///
/// Each entry is `(index, positive)`, where `index` is the entity position and
/// therefore its node index in the transition matrix.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WalkSplit {
    /// Entities whose start probability is pinned to their label
    pub seeds: Vec<(usize, bool)>,
    /// Withheld training entities used to calibrate the threshold
    pub control: Vec<(usize, bool)>,
    /// Held-out entities
    pub testing: Vec<(usize, bool)>,
}

/// Partition entities for the graph walk
pub fn split_for_walk(entities: &mut [Entity], training_percentage: f64, seed_percentage: f64) -> WalkSplit {
    let training_frequency = 1.0 / training_percentage;
    let seed_frequency = training_frequency / seed_percentage;

    let mut split = WalkSplit::default();
    for (index, entity) in entities.iter_mut().enumerate() {
        let positive = entity.is_positive();
        if !is_sampled(index, training_frequency) {
            entity.role = EntityRole::Testing;
            split.testing.push((index, positive));
        } else if is_sampled(index, seed_frequency) {
            entity.role = EntityRole::Seed;
            split.seeds.push((index, positive));
        } else {
            entity.role = EntityRole::Training;
            split.control.push((index, positive));
        }
    }

    tracing::debug!(
        seeds = split.seeds.len(),
        control = split.control.len(),
        testing = split.testing.len(),
        training_percentage,
        seed_percentage,
        "Graph walk split"
    );
    split
}

#[cfg(test)]
mod tests {
    use super::*;
    use eta_core::{ConceptId, EntityId};
    use proptest::prelude::*;
    use std::collections::HashSet;

    fn entities(n: usize) -> Vec<Entity> {
        (0..n)
            .map(|i| {
                Entity::new(EntityId(i as i64), format!("e{i}"), ConceptId(1))
                    .with_label(if i % 3 == 0 { 0.0 } else { 1.0 })
            })
            .collect()
    }

    #[test]
    fn test_walk_split_positions() {
        let mut list = entities(20);
        let split = split_for_walk(&mut list, 0.2, 0.2);

        // every 5th entity trains, every 25th of those seeds
        let seeds: Vec<usize> = split.seeds.iter().map(|(i, _)| *i).collect();
        let control: Vec<usize> = split.control.iter().map(|(i, _)| *i).collect();
        assert_eq!(seeds, vec![0]);
        assert_eq!(control, vec![5, 10, 15]);
        assert_eq!(split.testing.len(), 16);

        assert_eq!(list[0].role, EntityRole::Seed);
        assert_eq!(list[5].role, EntityRole::Training);
        assert_eq!(list[1].role, EntityRole::Testing);
    }

    #[test]
    fn test_pmi_split_labels() {
        let mut list = entities(40);
        let split = split_for_pmi(&mut list, 0.2, 0.5);

        // training positions 0,5,...,35; tuning positions 0,10,20,30
        assert_eq!(split.training_len(), 8);
        assert_eq!(split.positive_tuning.len() + split.negative_tuning.len(), 4);
        assert!(split.positive_training.iter().all(Entity::is_positive));
        assert!(split.negative_tuning.iter().all(|e| !e.is_positive()));
        assert_eq!(split.testing.len(), 32);
    }

    #[test]
    fn test_full_training() {
        let mut list = entities(10);
        let split = split_for_walk(&mut list, 1.0, 1.0);
        assert_eq!(split.seeds.len(), 10);
        assert!(split.testing.is_empty());
    }

    proptest! {
        #[test]
        fn walk_partition_is_disjoint_and_complete(
            n in 0usize..200,
            training in 0.01f64..=1.0,
            seed in 0.01f64..=1.0,
        ) {
            let mut list = entities(n);
            let split = split_for_walk(&mut list, training, seed);

            let mut seen = HashSet::new();
            for (index, _) in split.seeds.iter().chain(&split.control).chain(&split.testing) {
                prop_assert!(seen.insert(*index));
            }
            prop_assert_eq!(seen.len(), n);
        }

        #[test]
        fn pmi_partition_is_complete(
            n in 0usize..200,
            training in 0.01f64..=1.0,
            tuning in 0.01f64..=1.0,
        ) {
            let mut list = entities(n);
            let split = split_for_pmi(&mut list, training, tuning);
            prop_assert_eq!(split.training_len() + split.testing.len(), n);
            prop_assert!(list.iter().all(|e| e.role != EntityRole::Unclassified));
        }
    }
}
