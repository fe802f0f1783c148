//! Assessment Integration Tests
//!
//! End-to-end runs of voting, PMI and graph walk evaluation over an
//! in-memory extraction store.
//!
//! Author: hephaex@gmail.com

use eta_assess::{
    report::ReportWriter, Assessor, EntityTrustVoting, GraphWalkEvaluation, PmiEvaluation,
    VotingMode,
};
use async_trait::async_trait;
use eta_core::{
    AppConfig, BenchmarkPmis, Concept, ConceptId, Dataset, Entity, EntityId, EtaError,
    ExtractionStore, ExtractionType, MemoryStore, Result, SourceId, VotingConfig,
};
use eta_search::{CachedHitCounter, FixedHitCounter};
use std::collections::BTreeSet;

// =============================================================================
// Voting Tests
// =============================================================================

#[tokio::test]
async fn test_boolean_voting_city_scenario() {
    let store = MemoryStore::from_dataset(
        Dataset::new()
            .with_concept(1, "City")
            .with_entity(1, "London", 1, 1.0)
            .with_entity(2, "Paris", 1, 1.0)
            .with_entity(3, "Die Hard", 1, 0.0)
            .with_source(10, "http://cities.example/capitals")
            .with_source(20, "http://movies.example/action")
            .with_extraction(1, 10, 1)
            .with_extraction(2, 10, 1)
            .with_extraction(3, 20, 1),
    )
    .unwrap();
    store.set_entity_trust(EntityId(1), 1.0).await.unwrap();
    store.set_entity_trust(EntityId(2), 1.0).await.unwrap();

    let voting = EntityTrustVoting::new(&store, VotingConfig::default());
    let concept = Concept::new(ConceptId(1), "City");
    let outcome = voting.run_concept(&concept, VotingMode::Boolean).await.unwrap();

    assert_eq!(store.source_trust(SourceId(10)).await.unwrap(), 1.0);
    assert_eq!(store.source_trust(SourceId(20)).await.unwrap(), 0.0);
    assert_eq!(store.entity_trust(EntityId(3)).await.unwrap(), 0.0);
    assert_eq!(outcome.trusted_entities, 2);

    // fixed point is stable
    let again = voting.run_concept(&concept, VotingMode::Boolean).await.unwrap();
    assert_eq!(again.rows_affected, 0);
    assert_eq!(again.passes, 1);
}

// =============================================================================
// PMI Evaluation Tests
// =============================================================================

fn pmi_dataset() -> (Dataset, FixedHitCounter) {
    let mut dataset = Dataset::new().with_concept(1, "City");
    let mut hits = FixedHitCounter::new();

    for id in 1..=10 {
        let name = format!("place{id}");
        let positive = (id - 1) % 3 != 0;
        dataset = dataset.with_entity(id, &name, 1, if positive { 1.0 } else { 0.0 });

        if positive {
            hits = hits
                .with_count(format!("\"{name}\""), 1000)
                .with_count(format!("\"Cities such as {name}\""), 500)
                .with_count(format!("\"{name} is a City\""), 500);
        } else {
            hits = hits.with_count(format!("\"{name}\""), 10);
        }
    }
    (dataset, hits)
}

#[tokio::test]
async fn test_pmi_evaluation_with_cached_hit_counts() {
    let (dataset, hits) = pmi_dataset();
    let store = MemoryStore::from_dataset(dataset).unwrap();
    let hits = CachedHitCounter::new(hits, 1_000);

    let dir = tempfile::tempdir().unwrap();
    let mut config = AppConfig::default();
    config.evaluation.training_percentage = 0.5;
    config.pmi.model_dir = dir.path().to_path_buf();

    let mut evaluation = PmiEvaluation::new(&store, config).with_hit_counter(&hits);
    assert_eq!(evaluation.name(), "pmi");
    let report = evaluation.evaluate().await.unwrap();

    assert_eq!(report.points.len(), 12);
    assert!(report.skipped.is_empty());

    // popularity separates the classes: P(+) is 0.5 for positives, 0 otherwise
    let first = report.summary(&report.points[0]);
    assert_eq!(first.precision, 1.0);
    assert_eq!(first.recall, 1.0);

    let last = report.summary(&report.points[11]);
    assert_eq!(last.recall, 0.0);

    // the entity-alone query repeats for every discriminator
    assert!(hits.stats().hits > 0);
}

// =============================================================================
// Graph Walk Evaluation Tests
// =============================================================================

#[tokio::test]
async fn test_graph_walk_evaluation_and_report() {
    let mut dataset = Dataset::new()
        .with_concept(1, "City")
        .with_source(1, "http://good.example")
        .with_source(2, "http://bad.example");
    for id in 1..=20 {
        let positive = (id - 1) % 3 != 0;
        dataset = dataset
            .with_entity(id, &format!("e{id}"), 1, if positive { 1.0 } else { 0.0 })
            .with_extraction(id, if positive { 1 } else { 2 }, 7);
    }
    let store = MemoryStore::from_dataset(dataset).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let mut config = AppConfig::default();
    config.evaluation.training_percentage = 0.5;
    config.graph_walk.seed_percentage = 0.5;
    config.graph_walk.time_steps = 100;
    config.report.output_dir = dir.path().to_path_buf();

    let mut evaluation = GraphWalkEvaluation::new(&store, config.clone());
    let report = evaluation.evaluate().await.unwrap();

    assert_eq!(report.parameter, "bias");
    assert_eq!(report.points.len(), 11);
    let middle = report.summary(&report.points[5]);
    assert_eq!(middle.precision, 1.0);
    assert_eq!(middle.recall, 1.0);

    let files = ReportWriter::new(&config.report)
        .write(&report)
        .unwrap()
        .unwrap();
    assert!(files.csv.exists());
    assert!(files.chart.exists());
}

// =============================================================================
// Sample Dataset Tests
// =============================================================================

fn sample_store() -> MemoryStore {
    MemoryStore::from_file(concat!(
        env!("CARGO_MANIFEST_DIR"),
        "/../../data/sample_dataset.json"
    ))
    .unwrap()
}

#[tokio::test]
async fn test_sample_dataset_voting() {
    let store = sample_store();
    let voting = EntityTrustVoting::new(&store, VotingConfig::default());
    let outcomes = voting.run_voting(VotingMode::Boolean).await.unwrap();
    assert_eq!(outcomes.len(), 2);

    let city = outcomes.iter().find(|o| o.concept == "City").unwrap();
    assert_eq!(city.seed, Some(EntityId(1)));
    assert_eq!(city.trusted_entities, 7);

    let movie = outcomes.iter().find(|o| o.concept == "Movie").unwrap();
    assert_eq!(movie.seed, Some(EntityId(11)));
    assert_eq!(movie.trusted_entities, 5);

    // the forum source only hosts wrong extractions
    assert_eq!(store.source_trust(SourceId(4)).await.unwrap(), 0.0);
}

#[tokio::test]
async fn test_sample_dataset_benchmark_pmi() {
    let store = sample_store();
    let dir = tempfile::tempdir().unwrap();
    let mut config = AppConfig::default();
    config.pmi.benchmark = true;
    config.pmi.model_dir = dir.path().to_path_buf();
    config.evaluation.training_percentage = 0.5;
    config.evaluation.concepts = vec!["City".to_string()];

    let report = PmiEvaluation::new(&store, config).evaluate().await.unwrap();
    assert_eq!(report.points.len(), 12);
    assert_eq!(report.points[0].metrics.concepts.len(), 1);
}

// =============================================================================
// Unavailable Store Tests
// =============================================================================

/// Store whose backend is down: every call fails
struct UnavailableStore;

fn unavailable<T>() -> Result<T> {
    Err(EtaError::DataAccess("connection refused".to_string()))
}

#[async_trait]
impl ExtractionStore for UnavailableStore {
    async fn load_concepts(&self) -> Result<Vec<Concept>> {
        unavailable()
    }

    async fn load_entities(&self, _concept: ConceptId) -> Result<Vec<Entity>> {
        unavailable()
    }

    async fn sources_for_entity(&self, _entity: EntityId) -> Result<BTreeSet<SourceId>> {
        unavailable()
    }

    async fn extraction_types_for_entity(&self, _entity: EntityId) -> Result<BTreeSet<ExtractionType>> {
        unavailable()
    }

    async fn entities_for_source(&self, _source: SourceId) -> Result<BTreeSet<EntityId>> {
        unavailable()
    }

    async fn extraction_types_for_source(
        &self,
        _source: SourceId,
        _concept: ConceptId,
    ) -> Result<BTreeSet<ExtractionType>> {
        unavailable()
    }

    async fn sources_for_extraction_type(
        &self,
        _extraction_type: ExtractionType,
        _concept: ConceptId,
    ) -> Result<BTreeSet<SourceId>> {
        unavailable()
    }

    async fn entities_for_extraction_type(
        &self,
        _extraction_type: ExtractionType,
        _concept: ConceptId,
    ) -> Result<BTreeSet<EntityId>> {
        unavailable()
    }

    async fn entity_trust(&self, _entity: EntityId) -> Result<f64> {
        unavailable()
    }

    async fn source_trust(&self, _source: SourceId) -> Result<f64> {
        unavailable()
    }

    async fn set_entity_trust(&self, _entity: EntityId, _trust: f64) -> Result<()> {
        unavailable()
    }

    async fn set_source_trust(&self, _source: SourceId, _trust: f64) -> Result<()> {
        unavailable()
    }

    async fn benchmark_pmis(&self) -> Result<BenchmarkPmis> {
        unavailable()
    }

    fn name(&self) -> &str {
        "unavailable"
    }
}

#[tokio::test]
async fn test_voting_without_concepts_is_empty() {
    let store = UnavailableStore;
    let voting = EntityTrustVoting::new(&store, VotingConfig::default());

    let outcomes = voting.run_voting(VotingMode::Boolean).await.unwrap();
    assert!(outcomes.is_empty());
}

#[tokio::test]
async fn test_evaluation_without_concepts_reports_nothing() {
    let store = UnavailableStore;

    let mut config = AppConfig::default();
    config.pmi.benchmark = true;
    let report = PmiEvaluation::new(&store, config).evaluate().await.unwrap();
    assert_eq!(report.points.len(), 12);
    assert!(report.points.iter().all(|p| p.metrics.is_empty()));
    assert!(report.skipped.is_empty());

    let report = GraphWalkEvaluation::new(&store, AppConfig::default())
        .evaluate()
        .await
        .unwrap();
    assert_eq!(report.points.len(), 11);
    assert!(report.points.iter().all(|p| p.metrics.is_empty()));
}
