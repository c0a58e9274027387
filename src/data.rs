//! Customer table loading, identifier checks and A/B group assignment using Polars

use std::collections::HashSet;
use std::fs::File;
use std::path::{Path, PathBuf};

use polars::prelude::*;
use rand::seq::SliceRandom;
use rand::Rng;
use tracing::{debug, info};

use crate::config::{ExperimentConfig, SchemaConfig};
use crate::error::PipelineError;
use crate::preprocess::{self, Prepared};

/// Raw customer table: header names plus row-major text cells.
///
/// Cells keep the exact text of the source file; `None` marks a null cell.
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    headers: Vec<String>,
    rows: Vec<Vec<Option<String>>>,
}

impl Table {
    /// Build a table, rejecting rows whose width differs from the header.
    pub fn new(headers: Vec<String>, rows: Vec<Vec<Option<String>>>) -> Result<Self, PipelineError> {
        if let Some(row) = rows.iter().find(|row| row.len() != headers.len()) {
            return Err(PipelineError::FeatureMismatch {
                expected: headers.len(),
                got: row.len(),
            });
        }
        Ok(Self { headers, rows })
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    /// Index of `name`, or a schema error naming the missing column.
    pub fn require_column(&self, name: &str) -> Result<usize, PipelineError> {
        self.column_index(name)
            .ok_or_else(|| PipelineError::MissingColumn(name.to_string()))
    }

    /// Cell text, with blank and whitespace-only cells reported as missing.
    pub fn value(&self, row: usize, column: usize) -> Option<&str> {
        self.rows
            .get(row)
            .and_then(|r| r.get(column))
            .and_then(|cell| non_blank(cell.as_deref()))
    }

    /// Values of one column, blanks reported as `None`.
    pub fn column_values<'a>(&'a self, name: &str) -> Result<Vec<Option<&'a str>>, PipelineError> {
        let idx = self.require_column(name)?;
        Ok((0..self.rows.len()).map(|row| self.value(row, idx)).collect())
    }

    /// Row `row` as a [`Record`], if it exists.
    pub fn record(&self, row: usize) -> Option<Record> {
        self.rows.get(row).map(|cells| Record {
            fields: self
                .headers
                .iter()
                .cloned()
                .zip(cells.iter().cloned())
                .collect(),
        })
    }

    /// Find the record whose `id_column` equals `id`.
    pub fn find(&self, id_column: &str, id: &str) -> Result<Option<Record>, PipelineError> {
        let idx = self.require_column(id_column)?;
        Ok((0..self.rows.len())
            .find(|&row| self.value(row, idx) == Some(id.trim()))
            .and_then(|row| self.record(row)))
    }

    /// Identifiers in row order.
    pub fn identifiers(&self, id_column: &str) -> Result<Vec<String>, PipelineError> {
        let idx = self.require_column(id_column)?;
        Ok((0..self.rows.len())
            .map(|row| self.value(row, idx).unwrap_or_default().to_string())
            .collect())
    }

    /// Append a column; `values` must have one entry per row.
    pub fn push_column(&mut self, name: &str, values: Vec<String>) -> Result<(), PipelineError> {
        if values.len() != self.rows.len() {
            return Err(PipelineError::FeatureMismatch {
                expected: self.rows.len(),
                got: values.len(),
            });
        }
        self.headers.push(name.to_string());
        for (row, value) in self.rows.iter_mut().zip(values) {
            row.push(Some(value));
        }
        Ok(())
    }

    fn to_dataframe(&self) -> PolarsResult<DataFrame> {
        let columns = self
            .headers
            .iter()
            .enumerate()
            .map(|(idx, name)| {
                let values: Vec<Option<String>> =
                    self.rows.iter().map(|row| row[idx].clone()).collect();
                Series::new(name.as_str(), values)
            })
            .collect::<Vec<_>>();
        DataFrame::new(columns)
    }

    fn from_dataframe(df: &DataFrame) -> PolarsResult<Table> {
        let headers: Vec<String> = df
            .get_column_names()
            .iter()
            .map(|name| name.to_string())
            .collect();
        let mut rows = vec![Vec::with_capacity(headers.len()); df.height()];
        for series in df.get_columns() {
            let text = series.cast(&DataType::String)?;
            for (row, value) in rows.iter_mut().zip(text.str()?.into_iter()) {
                row.push(value.map(str::to_string));
            }
        }
        Ok(Table { headers, rows })
    }
}

/// One customer row, addressable by column name.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    fields: Vec<(String, Option<String>)>,
}

impl Record {
    /// Record from name/value pairs; every value counts as present.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            fields: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), Some(v.into())))
                .collect(),
        }
    }

    /// Field text; `None` when the column is absent or the value is blank.
    pub fn get(&self, column: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(name, _)| name == column)
            .and_then(|(_, value)| non_blank(value.as_deref()))
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.fields.iter().any(|(name, _)| name == column)
    }

    /// Replace a field, appending it when the column is new.
    pub fn set(&mut self, column: &str, value: impl Into<String>) {
        let value = Some(value.into());
        match self.fields.iter_mut().find(|(name, _)| name == column) {
            Some(field) => field.1 = value,
            None => self.fields.push((column.to_string(), value)),
        }
    }
}

fn non_blank(cell: Option<&str>) -> Option<&str> {
    cell.map(str::trim).filter(|v| !v.is_empty())
}

/// Give every row a group label when `column` is absent. Returns `true`
/// when the table changed; a table that already has the column is left
/// untouched.
pub fn assign_variants<R: Rng + ?Sized>(
    table: &mut Table,
    column: &str,
    groups: &[String; 2],
    rng: &mut R,
) -> Result<bool, PipelineError> {
    if table.has_column(column) {
        debug!(column, "Experiment column already present; keeping assignments");
        return Ok(false);
    }
    let values = (0..table.len())
        .map(|_| groups.choose(rng).cloned().unwrap_or_default())
        .collect();
    table.push_column(column, values)?;
    info!(column, rows = table.len(), "Assigned experiment groups");
    Ok(true)
}

/// Reads the customer file and produces raw or model-ready views of it.
#[derive(Debug, Clone)]
pub struct DataLoader {
    path: PathBuf,
    schema: SchemaConfig,
    experiment: ExperimentConfig,
}

impl DataLoader {
    /// Loader for the CSV at `path` with the given column roles.
    pub fn new(path: impl Into<PathBuf>, schema: SchemaConfig, experiment: ExperimentConfig) -> Self {
        Self {
            path: path.into(),
            schema,
            experiment,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Source table with an identifier column and a stable experiment column.
    ///
    /// Newly assigned experiment groups are written back to the source file
    /// so repeated loads see the same assignment. A missing identifier
    /// column is filled with 1-based row numbers in memory only.
    pub fn raw(&self) -> Result<Table, PipelineError> {
        let mut table = read_csv(&self.path)?;
        info!(path = %self.path.display(), rows = table.len(), "Loaded customer table");

        for column in self.schema.required_feature_columns() {
            table.require_column(column)?;
        }

        if table.has_column(&self.schema.id_column) {
            check_unique_ids(&table, &self.schema.id_column)?;
        }

        let assigned = assign_variants(
            &mut table,
            &self.experiment.column,
            &self.experiment.groups,
            &mut rand::thread_rng(),
        )?;
        if assigned && self.experiment.persist {
            write_csv(&table, &self.path)?;
            info!(path = %self.path.display(), "Persisted experiment groups");
        }

        // Row-number ids live in memory only; the source file is not given one.
        if !table.has_column(&self.schema.id_column) {
            let ids = (1..=table.len()).map(|n| n.to_string()).collect();
            table.push_column(&self.schema.id_column, ids)?;
            info!(column = %self.schema.id_column, "Synthesized row-number identifiers");
        }

        Ok(table)
    }

    /// Fully preprocessed feature matrix and labels, plus the fitted
    /// transform state needed to score single records later.
    pub fn prepared(&self) -> Result<Prepared, PipelineError> {
        let table = self.raw()?;
        table.require_column(&self.schema.label_column)?;
        preprocess::fit(&table, &self.schema)
    }
}

fn check_unique_ids(table: &Table, id_column: &str) -> Result<(), PipelineError> {
    let mut seen = HashSet::new();
    for id in table.identifiers(id_column)? {
        if !seen.insert(id.clone()) {
            return Err(PipelineError::DuplicateIdentifier(id));
        }
    }
    Ok(())
}

/// Read a CSV file with every column kept as text.
pub fn read_csv(path: &Path) -> Result<Table, PipelineError> {
    let access_error = |reason: String| PipelineError::DataAccess {
        path: path.to_path_buf(),
        reason,
    };
    if !path.is_file() {
        return Err(access_error("file not found".to_string()));
    }

    let df = CsvReadOptions::default()
        .with_has_header(true)
        .with_infer_schema_length(Some(0))
        .try_into_reader_with_file_path(Some(path.to_path_buf()))
        .and_then(|reader| reader.finish())
        .map_err(|e| access_error(e.to_string()))?;

    Table::from_dataframe(&df).map_err(|e| access_error(e.to_string()))
}

/// Overwrite `path` with the table contents.
pub fn write_csv(table: &Table, path: &Path) -> Result<(), PipelineError> {
    let write_error = |reason: String| PipelineError::DataWrite {
        path: path.to_path_buf(),
        reason,
    };
    let mut df = table.to_dataframe().map_err(|e| write_error(e.to_string()))?;
    let mut file = File::create(path).map_err(|e| write_error(e.to_string()))?;
    CsvWriter::new(&mut file)
        .include_header(true)
        .finish(&mut df)
        .map_err(|e| write_error(e.to_string()))
}
