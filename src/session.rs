//! A scoring session: one trained pipeline serving many customer views

use std::collections::BTreeMap;

use tracing::{info, warn};

use crate::config::Config;
use crate::data::{DataLoader, Table};
use crate::error::PipelineError;
use crate::nudge::{self, HostedNudgeClient, NudgeProfile, NudgeSource, RuleBasedNudges};
use crate::risk::Band;
use crate::scoring::{CustomerSummary, TrainedPipeline};
use crate::usage_log::UsageLog;

/// Everything produced for one customer view. Scoring failures are kept
/// per record so the session carries on.
#[derive(Debug)]
pub struct CustomerView {
    pub id: String,
    pub summary: Result<CustomerSummary, PipelineError>,
    pub nudge: String,
    pub warnings: Vec<String>,
}

/// Band tallies over a whole table
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ScoreReport {
    pub scored: usize,
    pub bands: BTreeMap<Band, usize>,
    pub unknown: usize,
    pub failures: Vec<(String, String)>,
}

/// One trained pipeline serving views of the customers it was trained on.
///
/// The pipeline is trained once in [`Session::start`] and owned here; it is
/// never shared through global state.
pub struct Session {
    config: Config,
    table: Table,
    pipeline: TrainedPipeline,
    nudges: Box<dyn NudgeSource>,
    usage_log: UsageLog,
}

impl Session {
    /// Load the customer table and train the pipeline. Any failure here is
    /// fatal: without a model there is nothing to serve.
    pub fn start(loader: &DataLoader, config: Config) -> Result<Self, PipelineError> {
        let table = loader.raw()?;
        let pipeline = TrainedPipeline::fit(&table, &config.schema)?;
        let nudges = nudge_source(&config);
        let usage_log = UsageLog::new(config.usage_log.path.clone());
        Ok(Self::with_parts(config, table, pipeline, nudges, usage_log))
    }

    /// Assemble a session from prepared parts, e.g. with a custom nudge source.
    pub fn with_parts(
        config: Config,
        table: Table,
        pipeline: TrainedPipeline,
        nudges: Box<dyn NudgeSource>,
        usage_log: UsageLog,
    ) -> Self {
        Self {
            config,
            table,
            pipeline,
            nudges,
            usage_log,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn table(&self) -> &Table {
        &self.table
    }

    pub fn pipeline(&self) -> &TrainedPipeline {
        &self.pipeline
    }

    /// Customer identifiers in table order
    pub fn customer_ids(&self) -> Result<Vec<String>, PipelineError> {
        self.table.identifiers(&self.config.schema.id_column)
    }

    /// Log the view, score the customer and produce a nudge.
    pub fn view(&self, customer_id: &str) -> Result<CustomerView, PipelineError> {
        let schema = &self.config.schema;
        let record = self
            .table
            .find(&schema.id_column, customer_id)?
            .ok_or_else(|| PipelineError::UnknownCustomer(customer_id.to_string()))?;

        let mut warnings = Vec::new();
        warnings.extend(self.usage_log.record_view_best_effort(customer_id));

        let summary = self.pipeline.summarize(&record, &self.config);
        if let Err(e) = &summary {
            warn!(customer = customer_id, error = %e, "Could not score customer");
        }

        let profile = NudgeProfile::from_record(
            &record,
            &schema.id_column,
            &self.config.experiment.column,
            &self.config.nudge,
        );
        let nudge = nudge::nudge_or_fallback(self.nudges.as_ref(), &profile);

        Ok(CustomerView {
            id: customer_id.to_string(),
            summary,
            nudge,
            warnings,
        })
    }

    /// Score every record in the table
    pub fn score_all(&self) -> ScoreReport {
        let mut report = ScoreReport::default();
        for row in 0..self.table.len() {
            let Some(record) = self.table.record(row) else {
                continue;
            };
            let id = record
                .get(&self.config.schema.id_column)
                .unwrap_or_default()
                .to_string();
            match self.pipeline.summarize(&record, &self.config) {
                Ok(summary) => {
                    report.scored += 1;
                    match summary.churn.band() {
                        Some(band) => *report.bands.entry(band).or_insert(0) += 1,
                        None => report.unknown += 1,
                    }
                }
                Err(e) => report.failures.push((id, e.to_string())),
            }
        }
        info!(
            scored = report.scored,
            failed = report.failures.len(),
            "Scored all customers"
        );
        report
    }
}

fn nudge_source(config: &Config) -> Box<dyn NudgeSource> {
    if config.nudge.hosted {
        match HostedNudgeClient::from_config(&config.nudge) {
            Ok(client) => {
                info!(url = client.url(), "Using hosted nudge generator");
                return Box::new(client);
            }
            Err(e) => warn!(error = %e, "Hosted nudges unavailable; using templates"),
        }
    }
    Box::new(RuleBasedNudges::new(&config.nudge.persona))
}
