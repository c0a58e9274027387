//! Integration tests for EngageTrack

use std::io::Write;

use engagetrack::config::{ExperimentConfig, SchemaConfig};
use engagetrack::nudge::{NudgeError, NudgeProfile, NudgeSource, RuleBasedNudges, FALLBACK_NUDGE};
use engagetrack::usage_log::UsageLog;
use engagetrack::{
    churn_band, engagement_band, fit, score, transform, Band, BandOutcome, Config, DataLoader,
    ErrorKind, PipelineError, Record, Session, Thresholds, TrainedPipeline,
};
use tempfile::NamedTempFile;

const HEADER: &str =
    "CustomerID,Usage Frequency,Support Calls,Payment Delay,Contract Length,Total Spend,Churn";

/// Rows of a small churn dataset; short contracts with low usage churn.
fn rows() -> Vec<String> {
    let contracts = ["Month-to-month", "One year", "Two year"];
    (0..30)
        .map(|i| {
            let contract = contracts[i % 3];
            let usage = 3 + (i * 7) % 28;
            let support = i % 6;
            let delay = (i * 5) % 30;
            let spend = 50.0 + (i as f64) * 37.5;
            let churn = u8::from(contract == "Month-to-month" || usage < 8);
            format!("{},{usage},{support},{delay},{contract},{spend},{churn}", 1000 + i)
        })
        .collect()
}

fn create_test_csv(rows: &[String]) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "{HEADER}").unwrap();
    for row in rows {
        writeln!(file, "{row}").unwrap();
    }
    file
}

fn config() -> Config {
    let mut config = Config::default();
    config.schema = SchemaConfig {
        categorical_columns: vec!["Contract Length".to_string()],
        ..SchemaConfig::default()
    };
    config.display.summary_columns = vec!["Contract Length".to_string()];
    config
}

fn loader(file: &NamedTempFile, config: &Config) -> DataLoader {
    DataLoader::new(file.path(), config.schema.clone(), config.experiment.clone())
}

fn probe_record() -> Record {
    Record::from_pairs([
        ("CustomerID", "probe"),
        ("Usage Frequency", "5"),
        ("Support Calls", "0"),
        ("Payment Delay", "2"),
        ("Contract Length", "Month-to-month"),
        ("Total Spend", "45.0"),
    ])
}

#[test]
fn test_end_to_end_pipeline() {
    let file = create_test_csv(&rows());
    let config = config();

    let prepared = loader(&file, &config).prepared().unwrap();
    assert_eq!(prepared.records().shape(), &[30, 5]);
    assert_eq!(
        prepared.feature_names(),
        vec![
            "Usage Frequency",
            "Support Calls",
            "Payment Delay",
            "Contract Length",
            "Total Spend"
        ]
    );
    assert!(prepared.exclusions.is_empty());
}

#[test]
fn test_scoring_scenario() {
    let file = create_test_csv(&rows());
    let config = config();
    let table = loader(&file, &config).raw().unwrap();
    let pipeline = TrainedPipeline::fit(&table, &config.schema).unwrap();
    let artifacts = pipeline.artifacts();

    let record = probe_record();
    let features = engagetrack::preprocess::encode_record(&record, artifacts).unwrap();
    let scaler = artifacts.scaler();

    // Contract Length keeps its fit-time code
    let code = artifacts
        .encoder("Contract Length")
        .unwrap()
        .encode("Month-to-month")
        .unwrap();
    assert_eq!(code, 0);
    assert_eq!(features[3], (code as f64 - scaler.mean()[3]) / scaler.scale()[3]);

    // Total Spend is log1p-transformed before scaling
    let expected_spend = (45.0f64.ln_1p() - scaler.mean()[4]) / scaler.scale()[4];
    assert_eq!(features[4], expected_spend);

    let probability = score(&record, pipeline.model(), artifacts).unwrap();
    assert!((0.0..=1.0).contains(&probability));
    let band = churn_band(probability, Thresholds::churn(&config.risk));
    assert!(matches!(
        band,
        BandOutcome::Ok(Band::Low | Band::Medium | Band::High)
    ));
}

#[test]
fn test_fit_then_transform_matches() {
    let file = create_test_csv(&rows());
    let config = config();
    let table = loader(&file, &config).raw().unwrap();

    let prepared = fit(&table, &config.schema).unwrap();
    let transformed = transform(&table, &prepared.artifacts, &config.schema).unwrap();

    let fitted_bits: Vec<u64> = prepared.records().iter().map(|v| v.to_bits()).collect();
    let replayed_bits: Vec<u64> = transformed.records.iter().map(|v| v.to_bits()).collect();
    assert_eq!(fitted_bits, replayed_bits);
    assert_eq!(transformed.ids, prepared.ids);
}

#[test]
fn test_unseen_category_is_schema_error() {
    let file = create_test_csv(&rows());
    let config = config();
    let table = loader(&file, &config).raw().unwrap();
    let pipeline = TrainedPipeline::fit(&table, &config.schema).unwrap();

    let mut record = probe_record();
    record.set("Contract Length", "Biennial");
    let err = pipeline.score(&record).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Schema);
    assert!(matches!(err, PipelineError::UnknownCategory { .. }));
}

#[test]
fn test_blank_row_excluded_like_removed_row() {
    let mut with_blank = rows();
    with_blank.push("2000,  ,1,4,Month-to-month,120.0,1".to_string());
    let config = config();

    let blank_file = create_test_csv(&with_blank);
    let clean_file = create_test_csv(&rows());
    let blank_table = loader(&blank_file, &config).raw().unwrap();
    let clean_table = loader(&clean_file, &config).raw().unwrap();

    let prepared = fit(&blank_table, &config.schema).unwrap();
    assert_eq!(prepared.exclusions.count(), 1);
    assert_eq!(prepared.exclusions.rows()[0].id.as_deref(), Some("2000"));
    assert_eq!(prepared.records().nrows(), 30);

    let with_blank = TrainedPipeline::fit(&blank_table, &config.schema).unwrap();
    let without = TrainedPipeline::fit(&clean_table, &config.schema).unwrap();
    assert_eq!(with_blank.artifacts(), without.artifacts());
    assert_eq!(with_blank.model(), without.model());
}

#[test]
fn test_engagement_thresholds() {
    let thresholds = Thresholds::new(10.0, 20.0);
    assert_eq!(engagement_band(5.0, thresholds).label(), "low");
    assert_eq!(engagement_band(15.0, thresholds).label(), "medium");
    assert_eq!(engagement_band(25.0, thresholds).label(), "high");
}

#[test]
fn test_variant_assignment_is_stable() {
    let file = create_test_csv(&rows());
    let config = config();

    let first = loader(&file, &config).raw().unwrap();
    let second = loader(&file, &config).raw().unwrap();
    assert_eq!(
        first.column_values("variant").unwrap(),
        second.column_values("variant").unwrap()
    );

    // the variant column never becomes a feature
    let prepared = fit(&second, &config.schema).unwrap();
    assert!(!prepared.feature_names().iter().any(|f| f == "variant"));
}

#[test]
fn test_variant_not_persisted_when_disabled() {
    let file = create_test_csv(&rows());
    let schema = config().schema;
    let experiment = ExperimentConfig {
        persist: false,
        ..ExperimentConfig::default()
    };

    let table = DataLoader::new(file.path(), schema, experiment).raw().unwrap();
    assert!(table.has_column("variant"));
    let on_disk = std::fs::read_to_string(file.path()).unwrap();
    assert!(!on_disk.lines().next().unwrap().contains("variant"));
}

#[test]
fn test_missing_file_and_missing_label() {
    let config = config();
    let err = DataLoader::new(
        "/nonexistent/churn.csv",
        config.schema.clone(),
        config.experiment.clone(),
    )
    .prepared()
    .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DataAccess);

    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "CustomerID,Usage Frequency,Contract Length,Total Spend").unwrap();
    writeln!(file, "1,4,Month-to-month,10").unwrap();
    let err = loader(&file, &config).prepared().unwrap_err();
    assert!(matches!(err, PipelineError::MissingColumn(column) if column == "Churn"));
}

#[test]
fn test_non_binary_label_fails_training() {
    let mut data = rows();
    data.push("3000,4,1,4,One year,80.0,2".to_string());
    let file = create_test_csv(&data);
    let config = config();
    let table = loader(&file, &config).raw().unwrap();

    let err = TrainedPipeline::fit(&table, &config.schema).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Training);
}

struct Unreachable;

impl NudgeSource for Unreachable {
    fn nudge(&self, _profile: &NudgeProfile) -> Result<String, NudgeError> {
        Err(NudgeError::Http("connection refused".to_string()))
    }
}

#[test]
fn test_session_view_survives_nudge_failure() {
    let file = create_test_csv(&rows());
    let mut config = config();
    let dir = tempfile::tempdir().unwrap();
    config.usage_log.path = dir.path().join("usage.log");

    let table = loader(&file, &config).raw().unwrap();
    let pipeline = TrainedPipeline::fit(&table, &config.schema).unwrap();
    let usage_log = UsageLog::new(config.usage_log.path.clone());
    let session = Session::with_parts(config, table, pipeline, Box::new(Unreachable), usage_log);

    let view = session.view("1000").unwrap();
    assert!(view.summary.is_ok());
    assert_eq!(view.nudge, FALLBACK_NUDGE);
    assert!(view.warnings.is_empty());

    let logged = std::fs::read_to_string(dir.path().join("usage.log")).unwrap();
    assert!(logged.contains("Viewed: 1000"));

    let err = session.view("no-such-customer").unwrap_err();
    assert!(err.is_schema());
}

#[test]
fn test_session_scores_every_customer() {
    let file = create_test_csv(&rows());
    let mut config = config();
    let dir = tempfile::tempdir().unwrap();
    config.usage_log.path = dir.path().join("usage.log");

    let session = Session::start(&loader(&file, &config), config).unwrap();
    let report = session.score_all();
    assert_eq!(report.scored, 30);
    assert!(report.failures.is_empty());
    assert_eq!(report.bands.values().sum::<usize>() + report.unknown, 30);

    let view = session.view("1000").unwrap();
    assert!(view.nudge.contains("[contract]"));
}

#[test]
fn test_rule_based_nudge_for_probe() {
    let config = Config::default();
    let profile = NudgeProfile::from_record(&probe_record(), "CustomerID", "variant", &config.nudge);
    let text = RuleBasedNudges::new("Default").nudge(&profile).unwrap();
    assert!(text.contains("[engagement]"));
    assert!(text.contains("[contract]"));
    assert!(!text.contains("[payment]"));
}
