//! Evaluation drivers
//!
//! Each driver partitions the entities of every selected concept, trains its
//! assessor, sweeps one parameter and scores the held-out entities at every
//! sweep value. Failures on single concepts are logged and the concept is
//! skipped; the sweep itself always completes.
//!
//! Author: hephaex@gmail.com

use async_trait::async_trait;
use eta_core::{
    AppConfig, BenchmarkPmis, Concept, EtaError, ExtractionStore, HitCountService, Result,
    SweepParameter,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::graph_walk::GraphWalkAssessor;
use crate::metrics::{AggregateMetrics, ClassificationCounts, MetricSummary};
use crate::pmi::{PmiAssessor, PmiCalculator};
use crate::sampling;

// ============================================================================
// Reports
// ============================================================================

/// Metrics of all concepts at one value of the swept parameter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepPoint {
    pub value: f64,
    pub metrics: AggregateMetrics,
}

/// Outcome of one evaluation sweep
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationReport {
    /// Name of the assessor that produced the report
    pub assessor: String,
    /// Name of the swept parameter
    pub parameter: String,
    /// Whether averages are weighted by test set share
    pub weighted: bool,
    pub points: Vec<SweepPoint>,
    /// Concepts skipped at one or more sweep values
    pub skipped: BTreeSet<String>,
}

impl EvaluationReport {
    pub fn new(assessor: impl Into<String>, parameter: impl Into<String>, weighted: bool) -> Self {
        Self {
            assessor: assessor.into(),
            parameter: parameter.into(),
            weighted,
            points: Vec::new(),
            skipped: BTreeSet::new(),
        }
    }

    /// Average over concepts at one point
    pub fn summary(&self, point: &SweepPoint) -> MetricSummary {
        if self.weighted {
            point.metrics.weighted_average()
        } else {
            point.metrics.average()
        }
    }

    /// (swept value, averaged metrics) per point
    pub fn series(&self) -> Vec<(f64, MetricSummary)> {
        self.points.iter().map(|p| (p.value, self.summary(p))).collect()
    }

    /// Sweep value with the highest averaged F1
    pub fn best(&self) -> Option<(f64, MetricSummary)> {
        self.series()
            .into_iter()
            .max_by(|a, b| a.1.f1.total_cmp(&b.1.f1))
    }

    /// Human-readable summary table
    pub fn render(&self) -> String {
        let mut out = format!(
            "=== {} evaluation ({} sweep, {} average) ===\n",
            self.assessor,
            self.parameter,
            if self.weighted { "weighted" } else { "unweighted" }
        );
        out.push_str(&format!(
            "{:>10} {:>9} {:>9} {:>9} {:>9}\n",
            self.parameter, "precision", "recall", "f1", "accuracy"
        ));
        for (value, summary) in self.series() {
            out.push_str(&format!(
                "{:>10.4} {:>8.1}% {:>8.1}% {:>8.1}% {:>8.1}%\n",
                value,
                summary.precision * 100.0,
                summary.recall * 100.0,
                summary.f1 * 100.0,
                summary.accuracy * 100.0,
            ));
        }
        if let Some((value, summary)) = self.best() {
            out.push_str(&format!(
                "best {} = {:.4} (F1 {:.1}%)\n",
                self.parameter,
                value,
                summary.f1 * 100.0
            ));
        }
        if !self.skipped.is_empty() {
            let skipped: Vec<&str> = self.skipped.iter().map(String::as_str).collect();
            out.push_str(&format!("skipped: {}\n", skipped.join(", ")));
        }
        out
    }
}

// ============================================================================
// Assessor Trait
// ============================================================================

/// An assessment method that can be evaluated end to end
#[async_trait]
pub trait Assessor: Send {
    /// Assessor name used in logs and report file names
    fn name(&self) -> &str;

    /// Run the full parameter sweep
    async fn evaluate(&mut self) -> Result<EvaluationReport>;
}

/// Concepts of the store, restricted to `names` unless empty
///
/// Names match case-insensitively; unknown names are logged. A store that
/// cannot list its concepts yields none.
pub async fn select_concepts<S: ExtractionStore + ?Sized>(store: &S, names: &[String]) -> Vec<Concept> {
    let concepts = match store.load_concepts().await {
        Ok(concepts) => concepts,
        Err(e) => {
            tracing::error!(store = store.name(), error = %e, "Failed to load concepts");
            return Vec::new();
        }
    };
    if names.is_empty() {
        return concepts;
    }

    for name in names {
        if !concepts.iter().any(|c| c.name.eq_ignore_ascii_case(name)) {
            tracing::warn!(concept = %name, "Unknown concept");
        }
    }
    concepts
        .into_iter()
        .filter(|c| names.iter().any(|n| c.name.eq_ignore_ascii_case(n)))
        .collect()
}

// ============================================================================
// PMI Evaluation
// ============================================================================

/// Sweeps the trust threshold applied to the positive naive Bayes product
pub struct PmiEvaluation<'a, S: ExtractionStore + ?Sized> {
    store: &'a S,
    hits: Option<&'a dyn HitCountService>,
    config: AppConfig,
}

impl<'a, S: ExtractionStore + ?Sized> PmiEvaluation<'a, S> {
    pub fn new(store: &'a S, config: AppConfig) -> Self {
        Self {
            store,
            hits: None,
            config,
        }
    }

    /// Query live hit counts (required unless benchmark mode is on)
    pub fn with_hit_counter(mut self, hits: &'a dyn HitCountService) -> Self {
        self.hits = Some(hits);
        self
    }

    async fn calculator(&self) -> Result<PmiCalculator<'a>> {
        if self.config.pmi.benchmark {
            let pmis = match self.store.benchmark_pmis().await {
                Ok(pmis) => pmis,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to load benchmark PMIs, every PMI is 0");
                    BenchmarkPmis::new()
                }
            };
            tracing::info!(values = pmis.len(), "Using benchmark PMIs");
            return Ok(PmiCalculator::benchmark(pmis));
        }

        match self.hits {
            Some(hits) => {
                tracing::info!(service = hits.name(), "Using live hit counts");
                Ok(PmiCalculator::live(hits))
            }
            None => Err(EtaError::Configuration(
                "PMI evaluation needs a hit counter unless pmi.benchmark is set".to_string(),
            )),
        }
    }
}

#[async_trait]
impl<'a, S: ExtractionStore + ?Sized> Assessor for PmiEvaluation<'a, S> {
    fn name(&self) -> &str {
        "pmi"
    }

    async fn evaluate(&mut self) -> Result<EvaluationReport> {
        self.config.validate()?;

        let mut report = EvaluationReport::new(
            self.name(),
            "trust_threshold",
            self.config.evaluation.weighted_average,
        );
        let concepts = select_concepts(self.store, &self.config.evaluation.concepts).await;
        let mut assessor = PmiAssessor::new(self.calculator().await?, self.config.pmi.clone());

        // (positive product, ground truth) of every test entity, per concept
        let mut scored: Vec<(Concept, Vec<(f64, bool)>)> = Vec::with_capacity(concepts.len());
        for concept in concepts {
            let mut entities = match self.store.load_entities(concept.id).await {
                Ok(entities) if !entities.is_empty() => entities,
                Ok(_) => {
                    tracing::warn!(concept = %concept.name, "Concept has no entities, skipping");
                    report.skipped.insert(concept.name.clone());
                    continue;
                }
                Err(e) => {
                    tracing::warn!(concept = %concept.name, error = %e, "Failed to load entities, skipping");
                    report.skipped.insert(concept.name.clone());
                    continue;
                }
            };

            let split = sampling::split_for_pmi(
                &mut entities,
                self.config.evaluation.training_percentage,
                self.config.pmi.tuning_percentage,
            );
            if let Err(e) = assessor.train(&concept, &split).await {
                tracing::warn!(concept = %concept.name, error = %e, "Training failed, skipping");
                report.skipped.insert(concept.name.clone());
                continue;
            }

            let mut tested = Vec::with_capacity(split.testing.len());
            for entity in &split.testing {
                match assessor.classify_soft(entity, &concept).await {
                    Ok((positive, _)) => tested.push((positive, entity.is_positive())),
                    Err(e) => {
                        tracing::warn!(entity = %entity.name, error = %e, "Classification failed, skipping entity");
                    }
                }
            }
            tracing::info!(concept = %concept.name, tested = tested.len(), "Scored test entities");
            scored.push((concept, tested));
        }

        for threshold in self.config.pmi.thresholds() {
            let mut metrics = AggregateMetrics::new();
            for (concept, tested) in &scored {
                let mut counts = ClassificationCounts::default();
                for (positive, truth) in tested {
                    counts.record(*positive > threshold, *truth);
                }
                metrics.add(concept.name.clone(), counts);
            }

            let point = SweepPoint {
                value: threshold,
                metrics,
            };
            let summary = report.summary(&point);
            tracing::info!(
                threshold,
                precision = summary.precision,
                recall = summary.recall,
                f1 = summary.f1,
                "PMI sweep point"
            );
            report.points.push(point);
        }

        Ok(report)
    }
}

// ============================================================================
// Graph Walk Evaluation
// ============================================================================

/// Sweeps the threshold bias or the training percentage of the graph walk
pub struct GraphWalkEvaluation<'a, S: ExtractionStore + ?Sized> {
    store: &'a S,
    config: AppConfig,
}

impl<'a, S: ExtractionStore + ?Sized> GraphWalkEvaluation<'a, S> {
    pub fn new(store: &'a S, config: AppConfig) -> Self {
        Self { store, config }
    }
}

#[async_trait]
impl<'a, S: ExtractionStore + ?Sized> Assessor for GraphWalkEvaluation<'a, S> {
    fn name(&self) -> &str {
        "graph_walk"
    }

    async fn evaluate(&mut self) -> Result<EvaluationReport> {
        self.config.validate()?;

        let walk_config = self.config.graph_walk.clone();
        let mut report = EvaluationReport::new(
            self.name(),
            walk_config.sweep.to_string(),
            self.config.evaluation.weighted_average,
        );
        let concepts = select_concepts(self.store, &self.config.evaluation.concepts).await;
        let mut walker = GraphWalkAssessor::new(self.store, walk_config.clone());

        for value in walk_config.sweep_values() {
            let (training_percentage, bias) = match walk_config.sweep {
                SweepParameter::Bias => (self.config.evaluation.training_percentage, value),
                SweepParameter::TrainingPercentage => (value, walk_config.bias),
            };

            let mut metrics = AggregateMetrics::new();
            for concept in &concepts {
                match walker.assess(concept, training_percentage, bias).await {
                    Ok(Some(outcome)) => metrics.add(concept.name.clone(), outcome.counts),
                    Ok(None) => {
                        report.skipped.insert(concept.name.clone());
                    }
                    Err(e) => {
                        tracing::warn!(concept = %concept.name, error = %e, "Graph walk failed, skipping");
                        report.skipped.insert(concept.name.clone());
                    }
                }
            }

            let point = SweepPoint { value, metrics };
            let summary = report.summary(&point);
            tracing::info!(
                parameter = %walk_config.sweep,
                value,
                precision = summary.precision,
                recall = summary.recall,
                f1 = summary.f1,
                "Graph walk sweep point"
            );
            report.points.push(point);
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eta_core::{Dataset, MemoryStore};

    fn store() -> MemoryStore {
        MemoryStore::from_dataset(
            Dataset::new()
                .with_concept(1, "City")
                .with_concept(2, "Movie"),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_select_concepts() {
        let store = store();
        assert_eq!(select_concepts(&store, &[]).await.len(), 2);

        let selected = select_concepts(&store, &["city".to_string(), "Planet".to_string()]).await;
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].name, "City");
    }

    #[test]
    fn test_report_best_and_render() {
        let mut report = EvaluationReport::new("pmi", "trust_threshold", false);
        for (value, correct) in [(0.1, 2), (0.2, 4), (0.3, 3)] {
            let mut metrics = AggregateMetrics::new();
            metrics.add("City", ClassificationCounts::new(4, 4, correct, 8));
            report.points.push(SweepPoint { value, metrics });
        }
        report.skipped.insert("Movie".to_string());

        let (value, summary) = report.best().unwrap();
        assert_eq!(value, 0.2);
        assert_eq!(summary.f1, 1.0);

        let text = report.render();
        assert!(text.contains("pmi evaluation"));
        assert!(text.contains("skipped: Movie"));
    }

    #[tokio::test]
    async fn test_pmi_needs_hit_counter() {
        let store = store();
        let mut evaluation = PmiEvaluation::new(&store, AppConfig::default());
        let err = evaluation.evaluate().await.unwrap_err();
        assert!(matches!(err, EtaError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_invalid_config_fails_fast() {
        let store = store();
        let mut config = AppConfig::default();
        config.evaluation.training_percentage = 0.0;

        let mut evaluation = GraphWalkEvaluation::new(&store, config);
        assert!(matches!(
            evaluation.evaluate().await,
            Err(EtaError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn test_empty_concepts_are_skipped() {
        let store = store();
        let mut config = AppConfig::default();
        config.pmi.benchmark = true;

        let mut evaluation = PmiEvaluation::new(&store, config);
        let report = evaluation.evaluate().await.unwrap();
        assert_eq!(report.points.len(), 12);
        assert!(report.points.iter().all(|p| p.metrics.is_empty()));
        assert_eq!(report.skipped.len(), 2);
    }
}
