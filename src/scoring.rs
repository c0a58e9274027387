//! Single-record churn scoring and customer summaries

use std::fmt;
use std::fs;
use std::path::Path;

use tracing::{debug, info};

use crate::config::{Config, SchemaConfig};
use crate::data::{Record, Table};
use crate::error::PipelineError;
use crate::model::{self, GradientBoostedClassifier};
use crate::preprocess::{self, ExclusionReport, PipelineArtifacts};
use crate::risk::{self, BandOutcome, Thresholds};

/// Score one raw record
///
/// # Arguments
/// * `record` - Raw customer record, fields addressed by column name
/// * `model` - Trained classifier
/// * `artifacts` - Encoders, scaler and feature order from the fit pass
///
/// # Returns
/// * Positive-class (churn) probability in `[0, 1]`
pub fn score(
    record: &Record,
    model: &GradientBoostedClassifier,
    artifacts: &PipelineArtifacts,
) -> Result<f64, PipelineError> {
    let features = preprocess::encode_record(record, artifacts)?;
    model.predict_proba_row(features.view())
}

/// Fitted transform state and model, built once per session and shared
/// read-only by every scoring call.
#[derive(Debug, Clone)]
pub struct TrainedPipeline {
    artifacts: PipelineArtifacts,
    model: GradientBoostedClassifier,
    exclusions: ExclusionReport,
    training_rows: usize,
}

impl TrainedPipeline {
    /// Preprocess `table` and train the churn model on it
    pub fn fit(table: &Table, schema: &SchemaConfig) -> Result<Self, PipelineError> {
        let prepared = preprocess::fit(table, schema)?;
        let model = model::train(prepared.records().view(), prepared.labels().view())?;

        let names = prepared.feature_names();
        let mut ranked: Vec<(&String, f64)> =
            names.iter().zip(model.feature_importances()).collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        for (name, importance) in ranked.iter().take(5) {
            debug!(feature = %name, importance, "Feature importance");
        }
        info!(
            rows = prepared.records().nrows(),
            excluded = prepared.exclusions.count(),
            "Churn pipeline ready"
        );

        Ok(Self {
            training_rows: prepared.records().nrows(),
            artifacts: prepared.artifacts,
            model,
            exclusions: prepared.exclusions,
        })
    }

    pub fn artifacts(&self) -> &PipelineArtifacts {
        &self.artifacts
    }

    pub fn model(&self) -> &GradientBoostedClassifier {
        &self.model
    }

    /// Rows left out of training and why
    pub fn exclusions(&self) -> &ExclusionReport {
        &self.exclusions
    }

    pub fn training_rows(&self) -> usize {
        self.training_rows
    }

    pub fn feature_names(&self) -> Vec<String> {
        self.artifacts.feature_names()
    }

    /// Churn probability for one record
    pub fn score(&self, record: &Record) -> Result<f64, PipelineError> {
        score(record, &self.model, &self.artifacts)
    }

    /// Score `record` and collect the fields shown to a user
    pub fn summarize(&self, record: &Record, config: &Config) -> Result<CustomerSummary, PipelineError> {
        let probability = self.score(record)?;
        let churn = risk::churn_band(probability, Thresholds::churn(&config.risk));
        let engagement = risk::classify_text(record.get(&config.nudge.usage_column), |v| {
            risk::engagement_band(v, Thresholds::engagement(&config.risk))
        });
        let attributes = config
            .display
            .summary_columns
            .iter()
            .map(|column| {
                (
                    column.clone(),
                    record.get(column).unwrap_or("-").to_string(),
                )
            })
            .collect();

        Ok(CustomerSummary {
            id: record
                .get(&config.schema.id_column)
                .unwrap_or("-")
                .to_string(),
            attributes,
            probability,
            churn,
            engagement,
        })
    }
}

/// Human-readable result for one customer
#[derive(Debug, Clone, PartialEq)]
pub struct CustomerSummary {
    pub id: String,
    pub attributes: Vec<(String, String)>,
    pub probability: f64,
    pub churn: BandOutcome,
    pub engagement: BandOutcome,
}

impl CustomerSummary {
    /// Whether the model predicts churn at the 0.5 cut
    pub fn predicted_churn(&self) -> bool {
        self.probability >= 0.5
    }

    pub fn churn_color(&self) -> &'static str {
        risk::churn_color(&self.churn)
    }

    pub fn engagement_color(&self) -> &'static str {
        risk::engagement_color(&self.engagement)
    }
}

impl fmt::Display for CustomerSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Customer: {}", self.id)?;
        for (name, value) in &self.attributes {
            writeln!(f, "  {name}: {value}")?;
        }
        writeln!(
            f,
            "Prediction: {}",
            if self.predicted_churn() { "Churn" } else { "Retained" }
        )?;
        writeln!(f, "Churn probability: {:.2}%", self.probability * 100.0)?;
        writeln!(f, "Churn risk: {} ({})", self.churn.label(), self.churn_color())?;
        write!(
            f,
            "Engagement: {} ({})",
            self.engagement.label(),
            self.engagement_color()
        )
    }
}

/// Write a customer summary as plain text
pub fn export_summary(path: &Path, summary: &CustomerSummary) -> Result<(), PipelineError> {
    fs::write(path, format!("{summary}\n")).map_err(|e| PipelineError::DataWrite {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    info!(path = %path.display(), customer = %summary.id, "Exported customer summary");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::risk::Band;

    fn config() -> Config {
        let mut config = Config::default();
        config.schema.id_column = "id".to_string();
        config.schema.label_column = "churn".to_string();
        config.schema.categorical_columns = vec!["contract".to_string()];
        config.schema.monetary_columns = vec!["spend".to_string()];
        config.nudge.usage_column = "usage".to_string();
        config.display.summary_columns = vec!["contract".to_string(), "usage".to_string()];
        config
    }

    fn table() -> Table {
        let headers = ["id", "contract", "usage", "spend", "churn"]
            .iter()
            .map(|h| h.to_string())
            .collect();
        let rows = [
            ["1", "Monthly", "3", "40", "1"],
            ["2", "Annual", "30", "900", "0"],
            ["3", "Monthly", "5", "60", "1"],
            ["4", "Annual", "25", "800", "0"],
            ["5", "Quarterly", "12", "300", "0"],
            ["6", "Monthly", "4", "55", "1"],
        ]
        .iter()
        .map(|row| row.iter().map(|c| Some(c.to_string())).collect())
        .collect();
        Table::new(headers, rows).unwrap()
    }

    #[test]
    fn test_score_matches_batch_prediction() {
        let config = config();
        let table = table();
        let pipeline = TrainedPipeline::fit(&table, &config.schema).unwrap();

        let transformed = preprocess::transform(&table, pipeline.artifacts(), &config.schema).unwrap();
        let batch = pipeline.model().predict_proba(transformed.records.view()).unwrap();
        for row in 0..table.len() {
            let p = pipeline.score(&table.record(row).unwrap()).unwrap();
            assert_eq!(p, batch[row]);
        }
    }

    #[test]
    fn test_unknown_category_fails_scoring() {
        let config = config();
        let pipeline = TrainedPipeline::fit(&table(), &config.schema).unwrap();
        let record = Record::from_pairs([
            ("id", "9"),
            ("contract", "Biennial"),
            ("usage", "4"),
            ("spend", "50"),
        ]);
        assert!(pipeline.score(&record).unwrap_err().is_schema());
    }

    #[test]
    fn test_summary_renders_bands() {
        let config = config();
        let pipeline = TrainedPipeline::fit(&table(), &config.schema).unwrap();
        let summary = pipeline
            .summarize(&table().record(1).unwrap(), &config)
            .unwrap();

        assert_eq!(summary.id, "2");
        assert_eq!(summary.engagement, BandOutcome::Ok(Band::Medium));
        assert!(summary.churn.band().is_some());
        let text = summary.to_string();
        assert!(text.contains("Customer: 2"));
        assert!(text.contains("contract: Annual"));
        assert!(text.contains("Churn probability:"));
    }

    #[test]
    fn test_export_summary_writes_text() {
        let config = config();
        let pipeline = TrainedPipeline::fit(&table(), &config.schema).unwrap();
        let summary = pipeline
            .summarize(&table().record(0).unwrap(), &config)
            .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("summary.txt");
        export_summary(&path, &summary).unwrap();
        let written = fs::read_to_string(&path).unwrap();
        assert!(written.starts_with("Customer: 1"));
    }
}
