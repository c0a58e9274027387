//! Dataset layout, thresholds and collaborator settings
//!
//! Every field has a default matching the stock churn dataset
//! (`customer_churn_dataset-testing-master.csv`). A TOML file can override
//! any subset of sections; other dataset revisions are supported by naming
//! their columns here rather than in code.

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;

use crate::error::PipelineError;

/// Top-level configuration; every section falls back to its defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub schema: SchemaConfig,
    pub experiment: ExperimentConfig,
    pub risk: RiskConfig,
    pub nudge: NudgeConfig,
    pub usage_log: UsageLogConfig,
    pub display: DisplayConfig,
}

/// Column roles in the source table
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchemaConfig {
    /// Unique customer identifier; never a feature.
    pub id_column: String,
    /// Binary churn label; separated from the features.
    pub label_column: String,
    /// UI-only columns excluded from the feature set.
    pub drop_columns: Vec<String>,
    /// Columns encoded as categories. When empty, any column holding a
    /// non-numeric value is treated as categorical.
    pub categorical_columns: Vec<String>,
    /// Heavy-tailed monetary columns transformed with `ln(1 + x)`.
    pub monetary_columns: Vec<String>,
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            id_column: "CustomerID".to_string(),
            label_column: "Churn".to_string(),
            drop_columns: vec!["variant".to_string()],
            categorical_columns: vec![
                "Gender".to_string(),
                "Subscription Type".to_string(),
                "Contract Length".to_string(),
            ],
            monetary_columns: vec!["Total Spend".to_string()],
        }
    }
}

impl SchemaConfig {
    /// Whether `column` is excluded from the feature set.
    pub fn is_excluded(&self, column: &str) -> bool {
        column == self.id_column
            || column == self.label_column
            || self.drop_columns.iter().any(|c| c == column)
    }

    /// Whether `column` is log-transformed before scaling.
    pub fn is_monetary(&self, column: &str) -> bool {
        self.monetary_columns.iter().any(|c| c == column)
    }

    /// Columns that must exist in any loaded table.
    pub fn required_feature_columns(&self) -> impl Iterator<Item = &String> {
        self.categorical_columns
            .iter()
            .chain(self.monetary_columns.iter())
    }
}

/// A/B experiment group assignment
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExperimentConfig {
    pub column: String,
    pub groups: [String; 2],
    /// Write newly assigned groups back to the source file.
    pub persist: bool,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            column: "variant".to_string(),
            groups: ["A".to_string(), "B".to_string()],
            persist: true,
        }
    }
}

/// Band thresholds. Dataset revisions disagree on the churn cut-offs
/// (0.5/0.75 vs 0.4/0.7) so both pairs stay configurable.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    pub churn_medium: f64,
    pub churn_high: f64,
    pub engagement_medium: f64,
    pub engagement_high: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            churn_medium: 0.5,
            churn_high: 0.75,
            engagement_medium: 25.0,
            engagement_high: 50.0,
        }
    }
}

/// Where nudge inputs live in a record, and how to reach the hosted
/// text generator.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NudgeConfig {
    pub usage_column: String,
    pub support_calls_column: String,
    pub payment_delay_column: String,
    pub contract_column: String,
    /// Optional extra columns passed to the hosted generator when the
    /// dataset carries them.
    pub tech_support_column: Option<String>,
    pub monthly_charges_column: Option<String>,
    pub paperless_billing_column: Option<String>,
    pub persona: String,
    /// Use the hosted generator instead of the rule-based templates.
    pub hosted: bool,
    pub endpoint: String,
    pub model: String,
    /// Environment variable holding the bearer token.
    pub token_env: String,
    pub timeout_secs: u64,
    pub max_new_tokens: u32,
    pub temperature: f32,
}

impl Default for NudgeConfig {
    fn default() -> Self {
        Self {
            usage_column: "Usage Frequency".to_string(),
            support_calls_column: "Support Calls".to_string(),
            payment_delay_column: "Payment Delay".to_string(),
            contract_column: "Contract Length".to_string(),
            tech_support_column: None,
            monthly_charges_column: None,
            paperless_billing_column: None,
            persona: "Default".to_string(),
            hosted: false,
            endpoint: "https://api-inference.huggingface.co/models".to_string(),
            model: "gpt2-medium".to_string(),
            token_env: "HF_TOKEN".to_string(),
            timeout_secs: 20,
            max_new_tokens: 100,
            temperature: 0.7,
        }
    }
}

/// Where customer views are recorded
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UsageLogConfig {
    pub path: PathBuf,
}

impl Default for UsageLogConfig {
    fn default() -> Self {
        Self {
            path: std::env::temp_dir().join("usage.log"),
        }
    }
}

/// Record attributes echoed in the customer summary
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub summary_columns: Vec<String>,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            summary_columns: vec![
                "Contract Length".to_string(),
                "Usage Frequency".to_string(),
                "Support Calls".to_string(),
                "Payment Delay".to_string(),
                "Total Spend".to_string(),
                "Last Interaction".to_string(),
            ],
        }
    }
}

impl Config {
    /// Load configuration from a TOML file, or defaults when no path is
    /// given.
    pub fn load(path: Option<&Path>) -> crate::Result<Self> {
        let config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config {}", path.display()))?;
                Self::from_toml(&text)
                    .with_context(|| format!("Failed to parse config {}", path.display()))?
            }
            None => Self::default(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML document. Missing sections keep their defaults.
    pub fn from_toml(text: &str) -> crate::Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Reject thresholds outside `[0, 1]` or out of order, identical
    /// experiment groups and an id column that doubles as the label.
    pub fn validate(&self) -> Result<(), PipelineError> {
        let risk = &self.risk;
        if !(0.0..=1.0).contains(&risk.churn_medium) || !(0.0..=1.0).contains(&risk.churn_high) {
            return Err(PipelineError::Config(format!(
                "churn thresholds must lie in [0, 1], got {} and {}",
                risk.churn_medium, risk.churn_high
            )));
        }
        if risk.churn_medium > risk.churn_high {
            return Err(PipelineError::Config(format!(
                "churn_medium ({}) exceeds churn_high ({})",
                risk.churn_medium, risk.churn_high
            )));
        }
        if risk.engagement_medium > risk.engagement_high {
            return Err(PipelineError::Config(format!(
                "engagement_medium ({}) exceeds engagement_high ({})",
                risk.engagement_medium, risk.engagement_high
            )));
        }
        if self.experiment.groups[0] == self.experiment.groups[1] {
            return Err(PipelineError::Config(
                "experiment groups must be two distinct labels".to_string(),
            ));
        }
        if self.schema.id_column == self.schema.label_column {
            return Err(PipelineError::Config(
                "id_column and label_column must differ".to_string(),
            ));
        }
        Ok(())
    }
}
