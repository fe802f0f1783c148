//! PMI assessment with a naive Bayes combiner
//!
//! An entity is scored against ten lexical discriminators ("Cities such as
//! London", "London is a City", ...). For each discriminator the PMI is the
//! ratio `hits("pattern with entity") / hits("entity")`.
//!
//! Training per concept:
//! 1. threshold = midpoint of the mean PMI of positive and negative training
//!    entities over all discriminators (one threshold shared by every
//!    discriminator of the concept)
//! 2. tuning entities give, per discriminator, the four probabilities
//!    P(PMI > θ | +), P(PMI > θ | -), P(PMI ≤ θ | +), P(PMI ≤ θ | -)
//! 3. a [`NaiveBayesClassifier`] multiplies the outcome probabilities of all
//!    discriminators with the class priors
//!
//! The products are returned unnormalised. With ten factors they can become
//! very small; they are compared, not rescaled.

use eta_core::{
    words, BenchmarkPmis, Concept, ConceptId, Entity, EtaError, HitCountService, PmiConfig, Result,
};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use crate::sampling::PmiSplit;

// ============================================================================
// Discriminators
// ============================================================================

/// A lexical pattern relating an entity (`Y`) to its concept in plural
/// (`XP`) or singular (`XS`) form
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Discriminator {
    /// Stable id used to store benchmark values
    pub id: u32,
    pub template: &'static str,
}

/// The discriminators in evaluation order
pub const DISCRIMINATORS: [Discriminator; 10] = [
    Discriminator { id: 810, template: "XP such as Y" },
    Discriminator { id: 811, template: "such XP as Y" },
    Discriminator { id: 812, template: "XP like Y" },
    Discriminator { id: 813, template: "XP especially Y" },
    Discriminator { id: 814, template: "XP including Y" },
    Discriminator { id: 815, template: "Y and other XP" },
    Discriminator { id: 816, template: "Y or other XP" },
    Discriminator { id: 817, template: "Y is a XS" },
    Discriminator { id: 818, template: "Y is the XS" },
    Discriminator { id: 819, template: "Y" },
];

impl Discriminator {
    /// Look up a discriminator by id
    pub fn by_id(id: u32) -> Option<&'static Discriminator> {
        DISCRIMINATORS.iter().find(|d| d.id == id)
    }

    /// The entity-only pattern scores popularity (raw entity hit count)
    pub fn is_popularity(&self) -> bool {
        self.template == "Y"
    }

    /// Fill the template for an entity of a concept
    ///
    /// Placeholders are whole tokens, so entity names containing "Y" or
    /// "XP" are inserted verbatim.
    pub fn phrase(&self, entity_name: &str, concept: &Concept) -> String {
        let plural = concept.plural();
        self.template
            .split(' ')
            .map(|token| match token {
                "Y" => entity_name,
                "XP" => plural.as_str(),
                "XS" => concept.singular(),
                other => other,
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Quote a phrase for an exact-match search
fn quoted(phrase: &str) -> String {
    format!("\"{phrase}\"")
}

// ============================================================================
// PMI Calculation
// ============================================================================

/// Where PMI values come from
pub enum PmiSource<'a> {
    /// Live hit counts from a search engine
    Live(&'a dyn HitCountService),
    /// Precomputed values keyed by (entity, discriminator id)
    Benchmark(BenchmarkPmis),
}

/// Computes PMI scores for entities
pub struct PmiCalculator<'a> {
    source: PmiSource<'a>,
}

impl<'a> PmiCalculator<'a> {
    pub fn new(source: PmiSource<'a>) -> Self {
        Self { source }
    }

    /// Query hit counts from a live service
    pub fn live(hits: &'a dyn HitCountService) -> Self {
        Self::new(PmiSource::Live(hits))
    }

    /// Read precomputed values
    pub fn benchmark(pmis: BenchmarkPmis) -> Self {
        Self::new(PmiSource::Benchmark(pmis))
    }

    /// PMI of an entity for one discriminator
    ///
    /// A zero entity hit count yields 0.0. Failed hit-count queries count as
    /// zero hits.
    pub async fn pmi(&self, entity: &Entity, concept: &Concept, discriminator: &Discriminator) -> f64 {
        match &self.source {
            PmiSource::Benchmark(pmis) => match pmis.get(&(entity.id, discriminator.id)) {
                Some(pmi) => *pmi,
                None => {
                    tracing::debug!(entity = %entity.id, discriminator = discriminator.id, "No benchmark PMI");
                    0.0
                }
            },
            PmiSource::Live(hits) => {
                let entity_query = quoted(&entity.name);
                let pattern_query = quoted(&discriminator.phrase(&entity.name, concept));

                let (entity_hits, pattern_hits) = futures::join!(
                    count_or_zero(*hits, &entity_query),
                    count_or_zero(*hits, &pattern_query)
                );

                if entity_hits == 0 {
                    return 0.0;
                }
                if discriminator.is_popularity() {
                    return entity_hits as f64;
                }
                pattern_hits as f64 / entity_hits as f64
            }
        }
    }

    /// PMI of an entity for every discriminator, in [`DISCRIMINATORS`] order
    pub async fn scores(&self, entity: &Entity, concept: &Concept) -> Vec<f64> {
        join_all(DISCRIMINATORS.iter().map(|d| self.pmi(entity, concept, d))).await
    }

    /// Scores of several entities
    pub async fn scores_for(&self, entities: &[Entity], concept: &Concept) -> Vec<Vec<f64>> {
        let mut all = Vec::with_capacity(entities.len());
        for entity in entities {
            all.push(self.scores(entity, concept).await);
        }
        all
    }
}

async fn count_or_zero(hits: &dyn HitCountService, query: &str) -> u64 {
    match hits.hit_count(query).await {
        Ok(count) => count,
        Err(e) => {
            tracing::warn!(query, service = hits.name(), error = %e, "Hit count failed, counting zero");
            0
        }
    }
}

// ============================================================================
// Training
// ============================================================================

fn grand_mean(scores: &[Vec<f64>]) -> Option<f64> {
    let count: usize = scores.iter().map(Vec::len).sum();
    if count == 0 {
        return None;
    }
    let sum: f64 = scores.iter().flatten().sum();
    Some(sum / count as f64)
}

/// Midpoint between the mean PMI of positive and negative entities
///
/// An empty side contributes a mean of 0.0.
pub fn find_threshold(positive: &[Vec<f64>], negative: &[Vec<f64>]) -> f64 {
    let positive_mean = grand_mean(positive).unwrap_or_else(|| {
        tracing::warn!("No positive training scores, using mean 0.0");
        0.0
    });
    let negative_mean = grand_mean(negative).unwrap_or_else(|| {
        tracing::warn!("No negative training scores, using mean 0.0");
        0.0
    });
    (positive_mean + negative_mean) / 2.0
}

/// Learned outcome probabilities of one discriminator
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    pub discriminator: u32,
    /// P(PMI > θ | +)
    pub pp: f64,
    /// P(PMI > θ | -)
    pub pn: f64,
    /// P(PMI ≤ θ | +)
    pub np: f64,
    /// P(PMI ≤ θ | -)
    pub nn: f64,
}

/// Fraction of score vectors whose value at `index` exceeds `threshold`;
/// `None` for an empty set
fn above_fraction(scores: &[Vec<f64>], index: usize, threshold: f64) -> Option<f64> {
    if scores.is_empty() {
        return None;
    }
    let above = scores
        .iter()
        .filter(|s| s.get(index).copied().unwrap_or(0.0) > threshold)
        .count();
    Some(above as f64 / scores.len() as f64)
}

impl Feature {
    /// Learn the probabilities of the discriminator at `index` from tuning
    /// scores
    ///
    /// An empty tuning set leaves its class uninformative (0.5/0.5).
    pub fn learn(index: usize, threshold: f64, positive: &[Vec<f64>], negative: &[Vec<f64>]) -> Self {
        let discriminator = DISCRIMINATORS[index].id;
        let pp = above_fraction(positive, index, threshold).unwrap_or(0.5);
        let pn = above_fraction(negative, index, threshold).unwrap_or(0.5);

        Self {
            discriminator,
            pp,
            pn,
            np: 1.0 - pp,
            nn: 1.0 - pn,
        }
    }
}

// ============================================================================
// Naive Bayes Classifier
// ============================================================================

/// Naive Bayes classifier of one concept
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NaiveBayesClassifier {
    pub positive_prior: f64,
    pub negative_prior: f64,
    /// PMI threshold shared by all discriminators
    pub threshold: f64,
    /// Features keyed by discriminator id
    pub features: BTreeMap<u32, Feature>,
}

impl NaiveBayesClassifier {
    pub fn new(positive_prior: f64, negative_prior: f64, threshold: f64, features: Vec<Feature>) -> Self {
        Self {
            positive_prior,
            negative_prior,
            threshold,
            features: features.into_iter().map(|f| (f.discriminator, f)).collect(),
        }
    }

    /// Turn PMI scores (in [`DISCRIMINATORS`] order) into outcomes: whether each
    /// PMI exceeds the threshold
    pub fn outcomes(&self, scores: &[f64]) -> BTreeMap<u32, bool> {
        DISCRIMINATORS
            .iter()
            .zip(scores)
            .map(|(d, pmi)| (d.id, *pmi > self.threshold))
            .collect()
    }

    /// Unnormalised (P(+ | outcomes), P(- | outcomes))
    ///
    /// Outcomes of discriminators without a learned feature are ignored.
    pub fn classify_soft(&self, outcomes: &BTreeMap<u32, bool>) -> (f64, f64) {
        let mut positive = self.positive_prior;
        let mut negative = self.negative_prior;

        for (discriminator, above) in outcomes {
            let Some(feature) = self.features.get(discriminator) else {
                continue;
            };
            if *above {
                positive *= feature.pp;
                negative *= feature.pn;
            } else {
                positive *= feature.np;
                negative *= feature.nn;
            }
        }
        (positive, negative)
    }

    /// Whether the positive class is more probable
    pub fn classify(&self, outcomes: &BTreeMap<u32, bool>) -> bool {
        let (positive, negative) = self.classify_soft(outcomes);
        positive > negative
    }

    /// Path of the persisted classifier of a concept
    pub fn model_path(model_dir: &Path, concept_name: &str) -> PathBuf {
        model_dir.join(format!("nbc_{}.json", words::safe_name(concept_name)))
    }

    /// Persist as JSON
    pub fn save(&self, model_dir: &Path, concept_name: &str) -> Result<PathBuf> {
        std::fs::create_dir_all(model_dir)?;
        let path = Self::model_path(model_dir, concept_name);
        std::fs::write(&path, serde_json::to_string_pretty(self)?)?;
        tracing::debug!(path = %path.display(), "Saved classifier");
        Ok(path)
    }

    /// Load a persisted classifier
    pub fn load(model_dir: &Path, concept_name: &str) -> Result<Self> {
        let path = Self::model_path(model_dir, concept_name);
        let content = std::fs::read_to_string(&path)
            .map_err(|e| EtaError::NotFound(format!("classifier {}: {e}", path.display())))?;
        Ok(serde_json::from_str(&content)?)
    }
}

// ============================================================================
// PMI Assessor
// ============================================================================

/// Trains one classifier per concept and classifies entities with it
pub struct PmiAssessor<'a> {
    calculator: PmiCalculator<'a>,
    config: PmiConfig,
    classifiers: HashMap<ConceptId, NaiveBayesClassifier>,
}

impl<'a> PmiAssessor<'a> {
    pub fn new(calculator: PmiCalculator<'a>, config: PmiConfig) -> Self {
        Self {
            calculator,
            config,
            classifiers: HashMap::new(),
        }
    }

    /// Trained classifier of a concept, if any
    pub fn classifier(&self, concept: ConceptId) -> Option<&NaiveBayesClassifier> {
        self.classifiers.get(&concept)
    }

    /// Forget all trained classifiers
    pub fn clear(&mut self) {
        self.classifiers.clear();
    }

    /// Train the classifier of a concept from a PMI split
    pub async fn train(&mut self, concept: &Concept, split: &PmiSplit) -> Result<&NaiveBayesClassifier> {
        let calc = &self.calculator;
        let positive = calc.scores_for(&split.positive_training, concept).await;
        let negative = calc.scores_for(&split.negative_training, concept).await;
        let positive_tuning = calc.scores_for(&split.positive_tuning, concept).await;
        let negative_tuning = calc.scores_for(&split.negative_tuning, concept).await;

        let threshold = find_threshold(&positive, &negative);
        let features = (0..DISCRIMINATORS.len())
            .map(|i| Feature::learn(i, threshold, &positive_tuning, &negative_tuning))
            .collect();

        let classifier = NaiveBayesClassifier::new(
            self.config.positive_prior,
            self.config.negative_prior,
            threshold,
            features,
        );

        tracing::info!(
            concept = %concept.name,
            threshold,
            positive = positive.len(),
            negative = negative.len(),
            positive_tuning = positive_tuning.len(),
            negative_tuning = negative_tuning.len(),
            "Trained PMI classifier"
        );

        if self.config.persist_classifiers {
            if let Err(e) = classifier.save(&self.config.model_dir, &concept.name) {
                tracing::warn!(concept = %concept.name, error = %e, "Failed to persist classifier");
            }
        }

        let slot = match self.classifiers.entry(concept.id) {
            Entry::Occupied(mut occupied) => {
                occupied.insert(classifier);
                occupied.into_mut()
            }
            Entry::Vacant(vacant) => vacant.insert(classifier),
        };
        Ok(slot)
    }

    /// Classifier for a concept, falling back to the persisted model
    fn resolve(&self, concept: &Concept) -> Result<Cow<'_, NaiveBayesClassifier>> {
        match self.classifiers.get(&concept.id) {
            Some(classifier) => Ok(Cow::Borrowed(classifier)),
            None => {
                tracing::debug!(concept = %concept.name, "No trained classifier, loading persisted model");
                NaiveBayesClassifier::load(&self.config.model_dir, &concept.name).map(Cow::Owned)
            }
        }
    }

    /// Unnormalised (P(+), P(-)) of an entity
    pub async fn classify_soft(&self, entity: &Entity, concept: &Concept) -> Result<(f64, f64)> {
        let classifier = self.resolve(concept)?;
        let scores = self.calculator.scores(entity, concept).await;
        Ok(classifier.classify_soft(&classifier.outcomes(&scores)))
    }

    /// Whether an entity is classified as a correct member of its concept
    pub async fn classify(&self, entity: &Entity, concept: &Concept) -> Result<bool> {
        let (positive, negative) = self.classify_soft(entity, concept).await?;
        Ok(positive > negative)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eta_core::EntityId;
    use eta_search::FixedHitCounter;

    fn city() -> Concept {
        Concept::new(ConceptId(1), "City")
    }

    fn entity(id: i64, name: &str, label: f64) -> Entity {
        Entity::new(EntityId(id), name, ConceptId(1)).with_label(label)
    }

    #[test]
    fn test_phrases() {
        let concept = city();
        let such_as = Discriminator::by_id(810).unwrap();
        assert_eq!(such_as.phrase("London", &concept), "Cities such as London");
        let is_a = Discriminator::by_id(817).unwrap();
        assert_eq!(is_a.phrase("London", &concept), "London is a City");
        assert!(Discriminator::by_id(819).unwrap().is_popularity());
        assert!(Discriminator::by_id(900).is_none());
    }

    #[test]
    fn test_find_threshold() {
        let positive = vec![vec![0.8, 0.8], vec![0.8, 0.8]];
        let negative = vec![vec![0.2, 0.2]];
        assert!((find_threshold(&positive, &negative) - 0.5).abs() < 1e-12);
        assert!((find_threshold(&positive, &[]) - 0.4).abs() < 1e-12);
    }

    #[test]
    fn test_feature_learning() {
        let positive = vec![vec![0.9], vec![0.7], vec![0.1], vec![0.8]];
        let negative = vec![vec![0.1], vec![0.6]];
        let feature = Feature::learn(0, 0.5, &positive, &negative);

        assert_eq!(feature.discriminator, 810);
        assert!((feature.pp - 0.75).abs() < 1e-12);
        assert!((feature.np - 0.25).abs() < 1e-12);
        assert!((feature.pn - 0.5).abs() < 1e-12);

        let uninformative = Feature::learn(0, 0.5, &[], &negative);
        assert_eq!(uninformative.pp, 0.5);
    }

    #[test]
    fn test_classifier_prefers_positive() {
        let feature = Feature {
            discriminator: 810,
            pp: 0.9,
            pn: 0.1,
            np: 0.1,
            nn: 0.9,
        };
        let classifier = NaiveBayesClassifier::new(0.5, 0.5, 0.5, vec![feature]);

        let above = BTreeMap::from([(810, true)]);
        let (p, n) = classifier.classify_soft(&above);
        assert!((p - 0.45).abs() < 1e-12);
        assert!((n - 0.05).abs() < 1e-12);
        assert!(classifier.classify(&above));
        assert!(!classifier.classify(&BTreeMap::from([(810, false)])));

        // no learned feature for 811: ignored
        let unknown = BTreeMap::from([(811, true)]);
        assert_eq!(classifier.classify_soft(&unknown), (0.5, 0.5));
    }

    #[test]
    fn test_classifier_with_every_discriminator() {
        let features = (0..DISCRIMINATORS.len())
            .map(|i| Feature {
                discriminator: DISCRIMINATORS[i].id,
                pp: 0.9,
                pn: 0.1,
                np: 0.1,
                nn: 0.9,
            })
            .collect();
        let classifier = NaiveBayesClassifier::new(0.5, 0.5, 0.5, features);

        let above = classifier.outcomes(&[0.9; 10]);
        assert_eq!(above.len(), DISCRIMINATORS.len());
        let (p, n) = classifier.classify_soft(&above);
        assert!((p - 0.5 * 0.9f64.powi(10)).abs() < 1e-12);
        assert!((n - 0.5 * 0.1f64.powi(10)).abs() < 1e-18);
        assert!(p > n);
        assert!(classifier.classify(&above));

        let below = classifier.outcomes(&[0.1; 10]);
        let (p, n) = classifier.classify_soft(&below);
        assert!(n > p);
        assert!((n - 0.5 * 0.9f64.powi(10)).abs() < 1e-12);
        assert!(!classifier.classify(&below));
    }

    #[test]
    fn test_classifier_persistence() {
        let dir = tempfile::tempdir().unwrap();
        let classifier = NaiveBayesClassifier::new(
            0.6,
            0.4,
            0.3,
            vec![Feature::learn(2, 0.3, &[vec![0.0, 0.0, 0.9]], &[vec![0.0, 0.0, 0.1]])],
        );

        let path = classifier.save(dir.path(), "Movie Star").unwrap();
        assert!(path.ends_with("nbc_movie_star.json"));
        let loaded = NaiveBayesClassifier::load(dir.path(), "Movie Star").unwrap();
        assert_eq!(loaded, classifier);

        assert!(NaiveBayesClassifier::load(dir.path(), "Planet").is_err());
    }

    #[tokio::test]
    async fn test_live_pmi() {
        let hits = FixedHitCounter::new()
            .with_count("\"London\"", 1000)
            .with_count("\"Cities such as London\"", 250);
        let calculator = PmiCalculator::live(&hits);
        let concept = city();
        let london = entity(1, "London", 1.0);

        let such_as = Discriminator::by_id(810).unwrap();
        assert!((calculator.pmi(&london, &concept, such_as).await - 0.25).abs() < 1e-12);

        let popularity = Discriminator::by_id(819).unwrap();
        assert_eq!(calculator.pmi(&london, &concept, popularity).await, 1000.0);

        // unknown entity: zero hits, zero PMI
        let nowhere = entity(2, "Nowhere", 0.0);
        let scores = calculator.scores(&nowhere, &concept).await;
        assert_eq!(scores, vec![0.0; DISCRIMINATORS.len()]);
    }

    #[tokio::test]
    async fn test_benchmark_pmi() {
        let pmis = BenchmarkPmis::from([((EntityId(1), 810), 0.4)]);
        let calculator = PmiCalculator::benchmark(pmis);
        let concept = city();
        let london = entity(1, "London", 1.0);

        let scores = calculator.scores(&london, &concept).await;
        assert_eq!(scores[0], 0.4);
        assert_eq!(scores[1], 0.0);
    }

    #[tokio::test]
    async fn test_assessor_train_and_classify() {
        let mut pmis = BenchmarkPmis::new();
        for id in 1..=4 {
            for d in DISCRIMINATORS.iter() {
                let positive = id % 2 == 1;
                pmis.insert((EntityId(id), d.id), if positive { 0.9 } else { 0.1 });
            }
        }

        let split = PmiSplit {
            positive_training: vec![entity(1, "a", 1.0)],
            negative_training: vec![entity(2, "b", 0.0)],
            positive_tuning: vec![entity(3, "c", 1.0)],
            negative_tuning: vec![entity(4, "d", 0.0)],
            testing: vec![],
        };

        let dir = tempfile::tempdir().unwrap();
        let config = PmiConfig {
            model_dir: dir.path().to_path_buf(),
            persist_classifiers: true,
            ..PmiConfig::default()
        };
        let mut assessor = PmiAssessor::new(PmiCalculator::benchmark(pmis), config);
        let concept = city();

        let classifier = assessor.train(&concept, &split).await.unwrap();
        assert!((classifier.threshold - 0.5).abs() < 1e-12);
        assert_eq!(classifier.features.len(), DISCRIMINATORS.len());

        assert!(assessor.classify(&entity(1, "a", 1.0), &concept).await.unwrap());
        assert!(!assessor.classify(&entity(2, "b", 0.0), &concept).await.unwrap());

        // falls back to the persisted model
        assessor.clear();
        assert!(assessor.classifier(concept.id).is_none());
        assert!(assessor.classify(&entity(3, "c", 1.0), &concept).await.unwrap());
    }
}
