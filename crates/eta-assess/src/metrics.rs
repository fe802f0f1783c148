//! Evaluation Metrics module
//!
//! Scores a binary classification of held-out entities. Every assessor
//! reports the same four counts per concept (entities that are really
//! correct, entities assigned as correct, entities assigned correctly, test
//! set size); everything else is derived from them.

use serde::{Deserialize, Serialize};

// ============================================================================
// Classification Counts
// ============================================================================

/// Raw outcome of classifying the test entities of one concept
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassificationCounts {
    /// Test entities whose ground truth is positive
    pub real_correct: usize,
    /// Test entities classified as positive
    pub assigned: usize,
    /// Test entities classified as positive that are positive
    pub correct: usize,
    /// Number of test entities
    pub test_set_size: usize,
}

impl ClassificationCounts {
    /// Create counts from the four totals
    pub fn new(real_correct: usize, assigned: usize, correct: usize, test_set_size: usize) -> Self {
        Self {
            real_correct,
            assigned,
            correct,
            test_set_size,
        }
    }

    /// Record one classified test entity
    pub fn record(&mut self, assigned: bool, positive: bool) {
        self.test_set_size += 1;
        if assigned {
            self.assigned += 1;
            if positive {
                self.correct += 1;
            }
        }
        if positive {
            self.real_correct += 1;
        }
    }

    pub fn true_positives(&self) -> usize {
        self.correct
    }

    pub fn false_positives(&self) -> usize {
        self.assigned.saturating_sub(self.correct)
    }

    pub fn false_negatives(&self) -> usize {
        self.real_correct.saturating_sub(self.correct)
    }

    pub fn true_negatives(&self) -> usize {
        self.test_set_size
            .saturating_sub(self.assigned)
            .saturating_sub(self.false_negatives())
    }

    /// Calculate precision (correct / assigned)
    pub fn precision(&self) -> f64 {
        ratio(self.correct, self.assigned)
    }

    /// Calculate recall (correct / real correct)
    pub fn recall(&self) -> f64 {
        ratio(self.correct, self.real_correct)
    }

    /// Calculate F1 score (2 * P * R / (P + R))
    pub fn f1_score(&self) -> f64 {
        let p = self.precision();
        let r = self.recall();
        if p + r == 0.0 {
            0.0
        } else {
            2.0 * p * r / (p + r)
        }
    }

    /// Calculate accuracy ((TP + TN) / N)
    pub fn accuracy(&self) -> f64 {
        ratio(
            self.true_positives() + self.true_negatives(),
            self.test_set_size,
        )
    }

    /// Sensitivity equals recall
    pub fn sensitivity(&self) -> f64 {
        self.recall()
    }

    /// Calculate specificity (TN / (TN + FP))
    pub fn specificity(&self) -> f64 {
        let tn = self.true_negatives();
        ratio(tn, tn + self.false_positives())
    }

    /// Derive the full metric record
    pub fn metrics(&self) -> EvaluationMetrics {
        EvaluationMetrics {
            precision: self.precision(),
            recall: self.recall(),
            f1: self.f1_score(),
            accuracy: self.accuracy(),
            sensitivity: self.sensitivity(),
            specificity: self.specificity(),
            true_positives: self.true_positives(),
            true_negatives: self.true_negatives(),
            false_positives: self.false_positives(),
            false_negatives: self.false_negatives(),
            counts: *self,
        }
    }
}

/// Zero denominators yield 0.0
fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

// ============================================================================
// Evaluation Metrics
// ============================================================================

/// Metrics of one concept at one parameter setting
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct EvaluationMetrics {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub accuracy: f64,
    pub sensitivity: f64,
    pub specificity: f64,
    pub true_positives: usize,
    pub true_negatives: usize,
    pub false_positives: usize,
    pub false_negatives: usize,
    pub counts: ClassificationCounts,
}

impl From<ClassificationCounts> for EvaluationMetrics {
    fn from(counts: ClassificationCounts) -> Self {
        counts.metrics()
    }
}

/// Metrics labelled with their concept
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConceptMetrics {
    pub concept: String,
    pub metrics: EvaluationMetrics,
}

/// Averaged metric values
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricSummary {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub accuracy: f64,
    pub sensitivity: f64,
    pub specificity: f64,
}

impl MetricSummary {
    fn add_scaled(&mut self, metrics: &EvaluationMetrics, weight: f64) {
        self.precision += metrics.precision * weight;
        self.recall += metrics.recall * weight;
        self.f1 += metrics.f1 * weight;
        self.accuracy += metrics.accuracy * weight;
        self.sensitivity += metrics.sensitivity * weight;
        self.specificity += metrics.specificity * weight;
    }
}

// ============================================================================
// Aggregate Metrics
// ============================================================================

/// Metrics of every concept evaluated at one parameter setting
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AggregateMetrics {
    pub concepts: Vec<ConceptMetrics>,
}

impl AggregateMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add the outcome of one concept
    pub fn add(&mut self, concept: impl Into<String>, counts: ClassificationCounts) {
        self.concepts.push(ConceptMetrics {
            concept: concept.into(),
            metrics: counts.metrics(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.concepts.is_empty()
    }

    /// Unweighted mean over concepts
    pub fn average(&self) -> MetricSummary {
        let mut summary = MetricSummary::default();
        if self.concepts.is_empty() {
            return summary;
        }

        let weight = 1.0 / self.concepts.len() as f64;
        for concept in &self.concepts {
            summary.add_scaled(&concept.metrics, weight);
        }
        summary
    }

    /// Mean over concepts weighted by their share of all test entities
    pub fn weighted_average(&self) -> MetricSummary {
        let mut summary = MetricSummary::default();
        let total: usize = self
            .concepts
            .iter()
            .map(|c| c.metrics.counts.test_set_size)
            .sum();
        if total == 0 {
            return summary;
        }

        for concept in &self.concepts {
            let weight = concept.metrics.counts.test_set_size as f64 / total as f64;
            summary.add_scaled(&concept.metrics, weight);
        }
        summary
    }

    /// Print a summary report
    pub fn report(&self) -> String {
        let mut out = String::from("=== Entity Assessment Report ===\n\n");
        for concept in &self.concepts {
            let m = &concept.metrics;
            out.push_str(&format!(
                "{:<16} P: {:>5.1}% R: {:>5.1}% F1: {:>5.1}% Acc: {:>5.1}% | \
                 real correct: {} assigned: {} correct: {} test: {}\n",
                concept.concept,
                m.precision * 100.0,
                m.recall * 100.0,
                m.f1 * 100.0,
                m.accuracy * 100.0,
                m.counts.real_correct,
                m.counts.assigned,
                m.counts.correct,
                m.counts.test_set_size,
            ));
        }

        let avg = self.average();
        let weighted = self.weighted_average();
        out.push_str(&format!(
            "\nAverage ({} concepts):\n  \
               Precision: {:.1}%\n  \
               Recall:    {:.1}%\n  \
               F1 Score:  {:.1}%\n  \
               Accuracy:  {:.1}%\n\
             Weighted average:\n  \
               Precision: {:.1}%\n  \
               Recall:    {:.1}%\n  \
               F1 Score:  {:.1}%\n  \
               Accuracy:  {:.1}%\n",
            self.concepts.len(),
            avg.precision * 100.0,
            avg.recall * 100.0,
            avg.f1 * 100.0,
            avg.accuracy * 100.0,
            weighted.precision * 100.0,
            weighted.recall * 100.0,
            weighted.f1 * 100.0,
            weighted.accuracy * 100.0,
        ));
        out
    }
}

// ============================================================================
// Tests
// ============================================================================
