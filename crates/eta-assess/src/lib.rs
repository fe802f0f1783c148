//! ETA Assess - entity trust assessment
//!
//! Competing methods that score how likely an extracted entity really
//! belongs to its concept:
//! - [`voting`]: Boolean and gradual trust voting over entities and sources
//! - [`probability`]: Noisy-Or and URNS redundancy models
//! - [`pmi`]: search engine PMI combined by a naive Bayes classifier
//! - [`graph_walk`]: random walk over entities, sources and extraction types
//!
//! [`evaluation`] sweeps the PMI and graph walk methods over held-out
//! entities, scores them with [`metrics`] and [`report`] writes the results.
//!
//! Author: hephaex@gmail.com

pub mod evaluation;
pub mod graph_walk;
pub mod metrics;
pub mod pmi;
pub mod probability;
pub mod report;
pub mod sampling;
pub mod voting;

pub use evaluation::{
    select_concepts, Assessor, EvaluationReport, GraphWalkEvaluation, PmiEvaluation, SweepPoint,
};
pub use graph_walk::{GraphWalkAssessor, TransitionMatrix, WalkGraph, WalkOutcome};
pub use metrics::{AggregateMetrics, ClassificationCounts, EvaluationMetrics, MetricSummary};
pub use pmi::{
    Discriminator, Feature, NaiveBayesClassifier, PmiAssessor, PmiCalculator, PmiSource,
    DISCRIMINATORS,
};
pub use probability::{noisy_or, urns, NoisyOr, ProbabilityModel, Urns};
pub use report::{LineChart, ReportFiles, ReportWriter};
pub use voting::{
    find_entity_connection, most_reliable_entity, EntityTrustVoting, PathNode, VotingMode,
    VotingOutcome,
};
