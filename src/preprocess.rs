//! Feature preparation: row cleaning, category encoding and standard scaling
//!
//! [`fit`] learns the transform state from a training table; [`transform`]
//! replays it on new tables and [`encode_record`] on single records. All
//! three share one per-row encoder so a record is always turned into the
//! same feature vector no matter which path produced it.

use std::collections::{BTreeMap, BTreeSet};

use linfa::Dataset;
use ndarray::{Array1, Array2, ArrayView1, Axis, Ix1};
use tracing::{debug, info, warn};

use crate::config::SchemaConfig;
use crate::data::{Record, Table};
use crate::error::PipelineError;

/// How a feature column is turned into a number
#[derive(Debug, Clone, PartialEq)]
pub enum FeatureKind {
    Numeric { log1p: bool },
    Categorical,
}

/// One entry of the feature manifest
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureSpec {
    pub name: String,
    pub kind: FeatureKind,
}

/// Maps the categories of one column to stable integer codes.
///
/// Codes follow the sorted order of the categories seen during fit.
#[derive(Debug, Clone, PartialEq)]
pub struct CategoryEncoder {
    column: String,
    classes: Vec<String>,
}

impl CategoryEncoder {
    /// Learn the sorted set of distinct values in `column`.
    pub fn fit<'a>(column: &str, values: impl IntoIterator<Item = &'a str>) -> Self {
        let classes: BTreeSet<&str> = values.into_iter().collect();
        Self {
            column: column.to_string(),
            classes: classes.into_iter().map(str::to_string).collect(),
        }
    }

    pub fn column(&self) -> &str {
        &self.column
    }

    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    /// Code of `value`; values not seen during fitting are a schema error.
    pub fn encode(&self, value: &str) -> Result<usize, PipelineError> {
        self.classes
            .binary_search_by(|class| class.as_str().cmp(value))
            .map_err(|_| PipelineError::UnknownCategory {
                column: self.column.clone(),
                value: value.to_string(),
            })
    }
}

/// Zero-mean / unit-variance scaler with per-column statistics.
#[derive(Debug, Clone, PartialEq)]
pub struct StandardScaler {
    mean: Array1<f64>,
    scale: Array1<f64>,
}

impl StandardScaler {
    /// Learn per-column mean and population standard deviation.
    /// Constant columns keep a scale of 1.
    pub fn fit(records: &Array2<f64>) -> Result<Self, PipelineError> {
        let mean = records
            .mean_axis(Axis(0))
            .ok_or(PipelineError::EmptyTrainingSet)?;
        let scale = records
            .std_axis(Axis(0), 0.0)
            .mapv(|s| if s > f64::EPSILON { s } else { 1.0 });
        Ok(Self { mean, scale })
    }

    pub fn mean(&self) -> &Array1<f64> {
        &self.mean
    }

    pub fn scale(&self) -> &Array1<f64> {
        &self.scale
    }

    pub fn n_features(&self) -> usize {
        self.mean.len()
    }

    /// Standardise every row; the width must match the fitted width.
    pub fn transform(&self, records: &Array2<f64>) -> Result<Array2<f64>, PipelineError> {
        self.check_width(records.ncols())?;
        let mut scaled = records.clone();
        for mut row in scaled.rows_mut() {
            row -= &self.mean;
            row /= &self.scale;
        }
        Ok(scaled)
    }

    /// Standardise a single row
    pub fn transform_row(&self, row: ArrayView1<f64>) -> Result<Array1<f64>, PipelineError> {
        self.check_width(row.len())?;
        let mut scaled = row.to_owned();
        scaled -= &self.mean;
        scaled /= &self.scale;
        Ok(scaled)
    }

    fn check_width(&self, got: usize) -> Result<(), PipelineError> {
        if got != self.n_features() {
            return Err(PipelineError::FeatureMismatch {
                expected: self.n_features(),
                got,
            });
        }
        Ok(())
    }
}

/// Transform state learned by [`fit`]; immutable afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineArtifacts {
    features: Vec<FeatureSpec>,
    encoders: BTreeMap<String, CategoryEncoder>,
    scaler: StandardScaler,
}

impl PipelineArtifacts {
    pub fn features(&self) -> &[FeatureSpec] {
        &self.features
    }

    /// Feature names in matrix column order
    pub fn feature_names(&self) -> Vec<String> {
        self.features.iter().map(|f| f.name.clone()).collect()
    }

    /// Encoder for a categorical column
    pub fn encoder(&self, column: &str) -> Option<&CategoryEncoder> {
        self.encoders.get(column)
    }

    pub fn scaler(&self) -> &StandardScaler {
        &self.scaler
    }
}

/// Why a row was left out of a matrix
#[derive(Debug, Clone, PartialEq)]
pub enum ExclusionReason {
    MissingValue,
    NotNumeric(String),
    InvalidMonetary(String),
    MissingLabel,
}

/// One excluded row with the column that caused it
#[derive(Debug, Clone, PartialEq)]
pub struct RowExclusion {
    pub row: usize,
    pub id: Option<String>,
    pub column: String,
    pub reason: ExclusionReason,
}

/// Rows dropped for data-quality reasons
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExclusionReport {
    rows: Vec<RowExclusion>,
}

impl ExclusionReport {
    pub fn count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> &[RowExclusion] {
        &self.rows
    }

    /// Exclusion counts per offending column
    pub fn by_column(&self) -> BTreeMap<&str, usize> {
        let mut counts = BTreeMap::new();
        for row in &self.rows {
            *counts.entry(row.column.as_str()).or_insert(0) += 1;
        }
        counts
    }

    fn push(&mut self, row: usize, id: Option<&str>, issue: CellIssue) {
        self.rows.push(RowExclusion {
            row,
            id: id.map(str::to_string),
            column: issue.column,
            reason: issue.reason,
        });
    }

    fn log(&self, stage: &str) {
        if self.is_empty() {
            return;
        }
        warn!(stage, excluded = self.count(), "Excluded rows with unusable values");
        for (column, count) in self.by_column() {
            debug!(stage, column, count, "Exclusions by column");
        }
    }
}

/// Output of [`fit`]: model-ready data plus the state to reproduce it.
#[derive(Debug)]
pub struct Prepared {
    pub dataset: Dataset<f64, f64, Ix1>,
    pub ids: Vec<String>,
    pub artifacts: PipelineArtifacts,
    pub exclusions: ExclusionReport,
}

impl Prepared {
    pub fn records(&self) -> &Array2<f64> {
        self.dataset.records()
    }

    /// Churn labels aligned with [`Prepared::records`]
    pub fn labels(&self) -> &Array1<f64> {
        self.dataset.targets()
    }

    pub fn feature_names(&self) -> Vec<String> {
        self.artifacts.feature_names()
    }
}

/// Output of [`transform`]
#[derive(Debug, Clone)]
pub struct Transformed {
    pub records: Array2<f64>,
    /// Present when the table has a label for every kept row.
    pub labels: Option<Array1<f64>>,
    pub ids: Vec<String>,
    pub exclusions: ExclusionReport,
}

#[derive(Debug, Clone, PartialEq)]
struct CellIssue {
    column: String,
    reason: ExclusionReason,
}

/// A row that cannot be encoded: either a data-quality problem (row is
/// skipped in batch mode) or a schema violation (always an error).
enum RowError {
    Quality(CellIssue),
    Schema(PipelineError),
}

impl From<CellIssue> for RowError {
    fn from(issue: CellIssue) -> Self {
        RowError::Quality(issue)
    }
}

impl CellIssue {
    /// Strict mode: a single record has no row to drop, so quality problems
    /// become errors.
    fn into_error(self) -> PipelineError {
        match self.reason {
            ExclusionReason::NotNumeric(value) | ExclusionReason::InvalidMonetary(value) => {
                PipelineError::InvalidNumber {
                    column: self.column,
                    value,
                }
            }
            ExclusionReason::MissingValue | ExclusionReason::MissingLabel => {
                PipelineError::MissingField {
                    column: self.column,
                }
            }
        }
    }
}

fn parse_numeric(column: &str, raw: Option<&str>, log1p: bool) -> Result<f64, CellIssue> {
    let issue = |reason: ExclusionReason| CellIssue {
        column: column.to_string(),
        reason,
    };
    let raw = raw.ok_or_else(|| issue(ExclusionReason::MissingValue))?;
    let value: f64 = raw
        .parse()
        .ok()
        .filter(|v: &f64| v.is_finite())
        .ok_or_else(|| issue(ExclusionReason::NotNumeric(raw.to_string())))?;
    if !log1p {
        return Ok(value);
    }
    let logged = value.ln_1p();
    if logged.is_finite() {
        Ok(logged)
    } else {
        Err(issue(ExclusionReason::InvalidMonetary(raw.to_string())))
    }
}

fn check_cell(spec: &FeatureSpec, raw: Option<&str>) -> Result<(), CellIssue> {
    match spec.kind {
        FeatureKind::Numeric { log1p } => parse_numeric(&spec.name, raw, log1p).map(|_| ()),
        FeatureKind::Categorical => raw.map(|_| ()).ok_or_else(|| CellIssue {
            column: spec.name.clone(),
            reason: ExclusionReason::MissingValue,
        }),
    }
}

/// Encode one row in manifest order. `get` looks up the raw text of a column.
fn encode_fields<'a, F>(
    features: &[FeatureSpec],
    encoders: &BTreeMap<String, CategoryEncoder>,
    get: F,
) -> Result<Vec<f64>, RowError>
where
    F: Fn(&str) -> Option<&'a str>,
{
    let mut encoded = Vec::with_capacity(features.len());
    for spec in features {
        let raw = get(&spec.name);
        let value = match spec.kind {
            FeatureKind::Numeric { log1p } => parse_numeric(&spec.name, raw, log1p)?,
            FeatureKind::Categorical => {
                check_cell(spec, raw)?;
                let encoder = encoders
                    .get(&spec.name)
                    .ok_or_else(|| RowError::Schema(PipelineError::MissingColumn(spec.name.clone())))?;
                encoder
                    .encode(raw.unwrap_or_default())
                    .map_err(RowError::Schema)? as f64
            }
        };
        encoded.push(value);
    }
    Ok(encoded)
}

/// Parse a churn label: `1`/`0`, `yes`/`no`, `true`/`false` or any number.
pub fn parse_label(raw: &str) -> Result<f64, PipelineError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "yes" | "true" => Ok(1.0),
        "no" | "false" => Ok(0.0),
        other => other
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .ok_or_else(|| PipelineError::InvalidLabel(raw.to_string())),
    }
}

/// Rows that can vote on column kinds: labelled, no blank feature cell
/// and every monetary cell usable. Rows failing these checks are excluded
/// later whatever the kinds turn out to be.
fn inference_rows(table: &Table, schema: &SchemaConfig, label_idx: usize) -> Vec<usize> {
    let columns: Vec<(usize, &String)> = table
        .headers()
        .iter()
        .enumerate()
        .filter(|(_, name)| !schema.is_excluded(name))
        .collect();
    (0..table.len())
        .filter(|&row| table.value(row, label_idx).is_some())
        .filter(|&row| {
            columns.iter().all(|&(idx, name)| {
                let raw = table.value(row, idx);
                if schema.is_monetary(name) {
                    parse_numeric(name, raw, true).is_ok()
                } else {
                    raw.is_some()
                }
            })
        })
        .collect()
}

fn infer_features(
    table: &Table,
    schema: &SchemaConfig,
    rows: &[usize],
) -> Result<Vec<FeatureSpec>, PipelineError> {
    let mut features = Vec::new();
    for name in table.headers() {
        if schema.is_excluded(name) {
            continue;
        }
        let kind = if schema.is_monetary(name) {
            FeatureKind::Numeric { log1p: true }
        } else if schema.categorical_columns.iter().any(|c| c == name) {
            FeatureKind::Categorical
        } else if schema.categorical_columns.is_empty() && has_text(table, name, rows)? {
            FeatureKind::Categorical
        } else {
            FeatureKind::Numeric { log1p: false }
        };
        features.push(FeatureSpec {
            name: name.clone(),
            kind,
        });
    }
    Ok(features)
}

fn has_text(table: &Table, column: &str, rows: &[usize]) -> Result<bool, PipelineError> {
    let idx = table.require_column(column)?;
    Ok(rows
        .iter()
        .filter_map(|&row| table.value(row, idx))
        .any(|v| v.parse::<f64>().is_err()))
}

fn to_matrix(rows: Vec<Vec<f64>>, width: usize) -> Result<Array2<f64>, PipelineError> {
    let height = rows.len();
    let flat: Vec<f64> = rows.into_iter().flatten().collect();
    Array2::from_shape_vec((height, width), flat).map_err(|_| PipelineError::FeatureMismatch {
        expected: width,
        got: height,
    })
}

/// Learn the transform state from a labelled table and return the scaled
/// training data.
///
/// Rows with a blank or non-numeric feature value, or a blank label, are
/// excluded before anything is learned from them.
pub fn fit(table: &Table, schema: &SchemaConfig) -> Result<Prepared, PipelineError> {
    let label_idx = table.require_column(&schema.label_column)?;
    let id_idx = table.column_index(&schema.id_column);
    for column in schema.required_feature_columns() {
        table.require_column(column)?;
    }

    let features = infer_features(table, schema, &inference_rows(table, schema, label_idx))?;
    let indices: Vec<usize> = features
        .iter()
        .map(|f| table.require_column(&f.name))
        .collect::<Result<_, _>>()?;
    debug!(features = features.len(), "Inferred feature manifest");

    let mut exclusions = ExclusionReport::default();
    let mut kept = Vec::with_capacity(table.len());
    let mut labels = Vec::with_capacity(table.len());
    'rows: for row in 0..table.len() {
        let id = id_idx.and_then(|idx| table.value(row, idx));
        let Some(label) = table.value(row, label_idx) else {
            exclusions.push(
                row,
                id,
                CellIssue {
                    column: schema.label_column.clone(),
                    reason: ExclusionReason::MissingLabel,
                },
            );
            continue;
        };
        for (spec, &idx) in features.iter().zip(&indices) {
            if let Err(issue) = check_cell(spec, table.value(row, idx)) {
                exclusions.push(row, id, issue);
                continue 'rows;
            }
        }
        labels.push(parse_label(label)?);
        kept.push(row);
    }
    exclusions.log("fit");

    if kept.is_empty() {
        return Err(PipelineError::EmptyTrainingSet);
    }

    let mut encoders = BTreeMap::new();
    for (spec, &idx) in features.iter().zip(&indices) {
        if spec.kind == FeatureKind::Categorical {
            let encoder = CategoryEncoder::fit(
                &spec.name,
                kept.iter().filter_map(|&row| table.value(row, idx)),
            );
            debug!(column = %spec.name, classes = encoder.classes().len(), "Fitted category encoder");
            encoders.insert(spec.name.clone(), encoder);
        }
    }

    let mut encoded = Vec::with_capacity(kept.len());
    for &row in &kept {
        let values = encode_fields(&features, &encoders, |name| {
            table.column_index(name).and_then(|idx| table.value(row, idx))
        })
        .map_err(|e| match e {
            RowError::Schema(err) => err,
            RowError::Quality(issue) => issue.into_error(),
        })?;
        encoded.push(values);
    }

    let raw = to_matrix(encoded, features.len())?;
    let scaler = StandardScaler::fit(&raw)?;
    let scaled = scaler.transform(&raw)?;

    let ids = match id_idx {
        Some(idx) => kept
            .iter()
            .map(|&row| table.value(row, idx).unwrap_or_default().to_string())
            .collect(),
        None => kept.iter().map(|row| (row + 1).to_string()).collect(),
    };
    let artifacts = PipelineArtifacts {
        features,
        encoders,
        scaler,
    };
    let dataset = Dataset::new(scaled, Array1::from(labels))
        .with_feature_names(artifacts.feature_names());

    info!(
        rows = kept.len(),
        excluded = exclusions.count(),
        features = artifacts.features.len(),
        "Fitted preprocessing pipeline"
    );

    Ok(Prepared {
        dataset,
        ids,
        artifacts,
        exclusions,
    })
}

/// Apply previously fitted state to a table. The scaler is never refit;
/// unseen categories are errors.
pub fn transform(
    table: &Table,
    artifacts: &PipelineArtifacts,
    schema: &SchemaConfig,
) -> Result<Transformed, PipelineError> {
    for spec in &artifacts.features {
        table.require_column(&spec.name)?;
    }
    let id_idx = table.column_index(&schema.id_column);
    let label_idx = table.column_index(&schema.label_column);

    let mut exclusions = ExclusionReport::default();
    let mut encoded = Vec::with_capacity(table.len());
    let mut ids = Vec::with_capacity(table.len());
    let mut labels = Vec::with_capacity(table.len());
    for row in 0..table.len() {
        let id = id_idx.and_then(|idx| table.value(row, idx));
        let values = encode_fields(&artifacts.features, &artifacts.encoders, |name| {
            table.column_index(name).and_then(|idx| table.value(row, idx))
        });
        match values {
            Ok(values) => encoded.push(values),
            Err(RowError::Quality(issue)) => {
                exclusions.push(row, id, issue);
                continue;
            }
            Err(RowError::Schema(err)) => return Err(err),
        }
        ids.push(id.map(str::to_string).unwrap_or_else(|| (row + 1).to_string()));
        labels.push(
            label_idx
                .and_then(|idx| table.value(row, idx))
                .map(parse_label)
                .transpose()?,
        );
    }
    exclusions.log("transform");

    let raw = to_matrix(encoded, artifacts.features.len())?;
    let records = artifacts.scaler.transform(&raw)?;
    let labels = labels
        .into_iter()
        .collect::<Option<Vec<f64>>>()
        .map(Array1::from);

    Ok(Transformed {
        records,
        labels,
        ids,
        exclusions,
    })
}

/// Encode and scale a single record. Missing or malformed fields are errors.
pub fn encode_record(record: &Record, artifacts: &PipelineArtifacts) -> Result<Array1<f64>, PipelineError> {
    for spec in &artifacts.features {
        if !record.has_column(&spec.name) {
            return Err(PipelineError::MissingColumn(spec.name.clone()));
        }
    }
    let values = encode_fields(&artifacts.features, &artifacts.encoders, |name| record.get(name))
        .map_err(|e| match e {
            RowError::Schema(err) => err,
            RowError::Quality(issue) => issue.into_error(),
        })?;
    artifacts.scaler.transform_row(Array1::from(values).view())
}
