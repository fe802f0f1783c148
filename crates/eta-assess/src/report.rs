//! Report output
//!
//! An [`EvaluationReport`] is written as two files named after the assessor,
//! the swept parameter and a timestamp:
//! - `<name>.csv`: one row per (sweep value, concept)
//! - `<name>_chart.json`: averaged precision, recall and F1 as line series
//!   over the swept value

use chrono::Local;
use eta_core::{EtaError, ReportConfig, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::evaluation::EvaluationReport;
use crate::metrics::MetricSummary;

/// One CSV row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportRow {
    pub value: f64,
    pub concept: String,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub accuracy: f64,
    pub sensitivity: f64,
    pub specificity: f64,
    pub real_correct: usize,
    pub assigned: usize,
    pub correct: usize,
    pub test_set_size: usize,
}

/// A named sequence of (x, y) points
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineSeries {
    pub name: String,
    pub points: Vec<(f64, f64)>,
}

/// Line chart document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineChart {
    pub title: String,
    pub x_label: String,
    pub y_label: String,
    pub series: Vec<LineSeries>,
}

impl LineChart {
    /// Averaged metrics of a report against its swept value
    pub fn from_report(report: &EvaluationReport) -> Self {
        let series = report.series();
        let line = |name: &str, pick: fn(&MetricSummary) -> f64| LineSeries {
            name: name.to_string(),
            points: series.iter().map(|(x, s)| (*x, pick(s))).collect(),
        };

        Self {
            title: format!("{} evaluation", report.assessor),
            x_label: report.parameter.clone(),
            y_label: "score".to_string(),
            series: vec![
                line("precision", |s| s.precision),
                line("recall", |s| s.recall),
                line("f1", |s| s.f1),
            ],
        }
    }
}

/// Paths of the written files
#[derive(Debug, Clone)]
pub struct ReportFiles {
    pub csv: PathBuf,
    pub chart: PathBuf,
}

/// Flatten a report into CSV rows
pub fn report_rows(report: &EvaluationReport) -> Vec<ReportRow> {
    report
        .points
        .iter()
        .flat_map(|point| {
            point.metrics.concepts.iter().map(move |c| {
                let m = &c.metrics;
                ReportRow {
                    value: point.value,
                    concept: c.concept.clone(),
                    precision: m.precision,
                    recall: m.recall,
                    f1: m.f1,
                    accuracy: m.accuracy,
                    sensitivity: m.sensitivity,
                    specificity: m.specificity,
                    real_correct: m.counts.real_correct,
                    assigned: m.counts.assigned,
                    correct: m.counts.correct,
                    test_set_size: m.counts.test_set_size,
                }
            })
        })
        .collect()
}

/// Writes evaluation reports to the configured directory
pub struct ReportWriter {
    output_dir: PathBuf,
    enabled: bool,
}

impl ReportWriter {
    pub fn new(config: &ReportConfig) -> Self {
        Self {
            output_dir: config.output_dir.clone(),
            enabled: config.enabled,
        }
    }

    /// Write CSV and chart files; `None` when reports are disabled
    pub fn write(&self, report: &EvaluationReport) -> Result<Option<ReportFiles>> {
        if !self.enabled {
            return Ok(None);
        }

        std::fs::create_dir_all(&self.output_dir)?;
        let stem = format!(
            "{}_{}_{}",
            report.assessor,
            report.parameter,
            Local::now().format("%Y%m%d_%H%M%S")
        );

        let files = ReportFiles {
            csv: self.output_dir.join(format!("{stem}.csv")),
            chart: self.output_dir.join(format!("{stem}_chart.json")),
        };
        write_csv(&files.csv, &report_rows(report))?;
        std::fs::write(
            &files.chart,
            serde_json::to_string_pretty(&LineChart::from_report(report))?,
        )?;

        tracing::info!(
            csv = %files.csv.display(),
            chart = %files.chart.display(),
            "Wrote evaluation report"
        );
        Ok(Some(files))
    }
}

fn write_csv(path: &Path, rows: &[ReportRow]) -> Result<()> {
    let csv_error = |e: csv::Error| EtaError::Serialization(format!("CSV report {}: {e}", path.display()));

    let mut writer = csv::Writer::from_path(path).map_err(csv_error)?;
    for row in rows {
        writer.serialize(row).map_err(csv_error)?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluation::SweepPoint;
    use crate::metrics::{AggregateMetrics, ClassificationCounts};

    fn report() -> EvaluationReport {
        let mut report = EvaluationReport::new("graph_walk", "bias", false);
        for value in [0.0, 0.5] {
            let mut metrics = AggregateMetrics::new();
            metrics.add("City", ClassificationCounts::new(10, 8, 6, 20));
            metrics.add("Movie", ClassificationCounts::new(5, 5, 5, 10));
            report.points.push(SweepPoint { value, metrics });
        }
        report
    }

    #[test]
    fn test_rows_and_chart() {
        let report = report();
        let rows = report_rows(&report);
        assert_eq!(rows.len(), 4);
        assert_eq!(rows[1].concept, "Movie");
        assert_eq!(rows[0].assigned, 8);

        let chart = LineChart::from_report(&report);
        assert_eq!(chart.series.len(), 3);
        assert_eq!(chart.series[0].points.len(), 2);
        // mean precision of 0.75 and 1.0
        assert!((chart.series[0].points[0].1 - 0.875).abs() < 1e-12);
    }

    #[test]
    fn test_write_files() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ReportWriter::new(&ReportConfig {
            output_dir: dir.path().join("reports"),
            enabled: true,
        });

        let files = writer.write(&report()).unwrap().unwrap();
        let csv = std::fs::read_to_string(&files.csv).unwrap();
        assert!(csv.starts_with("value,concept,precision"));
        assert_eq!(csv.lines().count(), 5);

        let chart: LineChart =
            serde_json::from_str(&std::fs::read_to_string(&files.chart).unwrap()).unwrap();
        assert_eq!(chart.x_label, "bias");
    }

    #[test]
    fn test_disabled_writer() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ReportWriter::new(&ReportConfig {
            output_dir: dir.path().to_path_buf(),
            enabled: false,
        });
        assert!(writer.write(&report()).unwrap().is_none());
    }
}
