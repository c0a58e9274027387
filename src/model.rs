//! Gradient-boosted tree classifier for binary churn labels
//!
//! Trees are grown with second-order (gradient / hessian) statistics of the
//! logistic loss and stored in a flat node arena.

use ndarray::{Array1, ArrayView1, ArrayView2};
use rand::rngs::StdRng;
use rand::seq::index;
use rand::SeedableRng;
use tracing::{debug, info};

use crate::error::PipelineError;

/// Boosting hyperparameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoostingParams {
    pub n_estimators: usize,
    pub max_depth: usize,
    pub learning_rate: f64,
    /// Fraction of rows sampled for each tree
    pub subsample: f64,
    /// Fraction of columns sampled for each tree
    pub colsample_bytree: f64,
    /// L1 penalty on leaf weights
    pub reg_alpha: f64,
    /// L2 penalty on leaf weights
    pub reg_lambda: f64,
    pub min_child_weight: f64,
    /// Minimum gain required to keep a split
    pub gamma: f64,
    pub seed: u64,
}

/// Fixed hyperparameters used for churn models
pub const CHURN_BOOSTING: BoostingParams = BoostingParams {
    n_estimators: 100,
    max_depth: 4,
    learning_rate: 0.1,
    subsample: 0.8,
    colsample_bytree: 0.8,
    reg_alpha: 0.0,
    reg_lambda: 1.0,
    min_child_weight: 1.0,
    gamma: 0.0,
    seed: 42,
};

impl Default for BoostingParams {
    fn default() -> Self {
        CHURN_BOOSTING
    }
}

/// Tree node stored in a flat arena; children are arena indices.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf {
        value: f64,
    },
}

/// Regression tree over margins; node 0 is the root.
#[derive(Debug, Clone, PartialEq)]
pub struct RegressionTree {
    nodes: Vec<Node>,
}

impl RegressionTree {
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Number of leaf nodes
    pub fn n_leaves(&self) -> usize {
        self.nodes
            .iter()
            .filter(|n| matches!(n, Node::Leaf { .. }))
            .count()
    }

    /// Margin contribution for one row
    pub fn predict(&self, row: ArrayView1<f64>) -> f64 {
        let mut idx = 0;
        loop {
            match self.nodes[idx] {
                Node::Leaf { value } => return value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => idx = if row[feature] < threshold { left } else { right },
            }
        }
    }
}

/// Fitted gradient-boosted classifier
#[derive(Debug, Clone, PartialEq)]
pub struct GradientBoostedClassifier {
    params: BoostingParams,
    base_margin: f64,
    trees: Vec<RegressionTree>,
    n_features: usize,
    importances: Vec<f64>,
}

impl GradientBoostedClassifier {
    pub fn params(&self) -> &BoostingParams {
        &self.params
    }

    /// Boosted trees in training order
    pub fn trees(&self) -> &[RegressionTree] {
        &self.trees
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    /// Positive-class probability for one scaled feature row
    pub fn predict_proba_row(&self, row: ArrayView1<f64>) -> Result<f64, PipelineError> {
        if row.len() != self.n_features {
            return Err(PipelineError::FeatureMismatch {
                expected: self.n_features,
                got: row.len(),
            });
        }
        Ok(sigmoid(self.margin(row)))
    }

    /// Positive-class probabilities for every row
    pub fn predict_proba(&self, records: ArrayView2<f64>) -> Result<Array1<f64>, PipelineError> {
        records
            .rows()
            .into_iter()
            .map(|row| self.predict_proba_row(row))
            .collect::<Result<Vec<_>, _>>()
            .map(Array1::from)
    }

    /// Hard labels at the 0.5 cut-off
    pub fn predict(&self, records: ArrayView2<f64>) -> Result<Array1<u8>, PipelineError> {
        Ok(self.predict_proba(records)?.mapv(|p| u8::from(p >= 0.5)))
    }

    /// Total split gain per feature, normalised to sum to 1
    pub fn feature_importances(&self) -> Vec<f64> {
        let total: f64 = self.importances.iter().sum();
        if total <= 0.0 {
            return vec![0.0; self.n_features];
        }
        self.importances.iter().map(|g| g / total).collect()
    }

    fn margin(&self, row: ArrayView1<f64>) -> f64 {
        self.base_margin + self.trees.iter().map(|t| t.predict(row)).sum::<f64>()
    }
}

/// Train a churn classifier with the fixed [`CHURN_BOOSTING`] parameters
///
/// # Arguments
/// * `records` - Scaled feature matrix, one row per customer
/// * `labels` - Binary labels (0 or 1), one per row
///
/// # Returns
/// * Fitted `GradientBoostedClassifier`
pub fn train(
    records: ArrayView2<f64>,
    labels: ArrayView1<f64>,
) -> Result<GradientBoostedClassifier, PipelineError> {
    train_with(&CHURN_BOOSTING, records, labels)
}

/// Train with explicit parameters. Deterministic for identical inputs.
pub fn train_with(
    params: &BoostingParams,
    records: ArrayView2<f64>,
    labels: ArrayView1<f64>,
) -> Result<GradientBoostedClassifier, PipelineError> {
    let (n_rows, n_features) = records.dim();
    if n_rows != labels.len() {
        return Err(PipelineError::ShapeMismatch {
            rows: n_rows,
            labels: labels.len(),
        });
    }
    if n_rows == 0 || n_features == 0 {
        return Err(PipelineError::EmptyTrainingSet);
    }
    if let Some(&bad) = labels.iter().find(|&&y| y != 0.0 && y != 1.0) {
        return Err(PipelineError::NonBinaryLabel(bad));
    }
    if let Some(((row, column), _)) = records.indexed_iter().find(|(_, v)| !v.is_finite()) {
        return Err(PipelineError::NonFiniteFeature { row, column });
    }

    let positive_rate = labels.mean().unwrap_or(0.5).clamp(1e-6, 1.0 - 1e-6);
    let base_margin = (positive_rate / (1.0 - positive_rate)).ln();
    let mut margins = vec![base_margin; n_rows];
    let mut rng = StdRng::seed_from_u64(params.seed);
    let mut importances = vec![0.0; n_features];
    let mut trees = Vec::with_capacity(params.n_estimators);

    let n_sampled_rows = sample_size(n_rows, params.subsample);
    let n_sampled_cols = sample_size(n_features, params.colsample_bytree);

    for round in 0..params.n_estimators {
        let (grad, hess): (Vec<f64>, Vec<f64>) = margins
            .iter()
            .zip(labels.iter())
            .map(|(&m, &y)| {
                let p = sigmoid(m);
                (p - y, (p * (1.0 - p)).max(1e-16))
            })
            .unzip();

        let rows = sorted_sample(&mut rng, n_rows, n_sampled_rows);
        let columns = sorted_sample(&mut rng, n_features, n_sampled_cols);

        let mut builder = TreeBuilder {
            params,
            records,
            grad: &grad,
            hess: &hess,
            columns: &columns,
            nodes: Vec::new(),
            importances: &mut importances,
        };
        builder.grow(rows, 0);
        let tree = RegressionTree {
            nodes: builder.nodes,
        };

        for (margin, row) in margins.iter_mut().zip(records.rows()) {
            *margin += tree.predict(row);
        }
        debug!(round, leaves = tree.n_leaves(), "Boosting round complete");
        trees.push(tree);
    }

    let model = GradientBoostedClassifier {
        params: *params,
        base_margin,
        trees,
        n_features,
        importances,
    };
    let probabilities: Vec<f64> = margins.iter().map(|&m| sigmoid(m)).collect();
    info!(
        rows = n_rows,
        features = n_features,
        trees = model.trees.len(),
        accuracy = accuracy(&probabilities, labels),
        log_loss = log_loss(&probabilities, labels),
        "Trained churn model"
    );
    Ok(model)
}

/// Fraction of correct hard predictions at 0.5
pub fn accuracy(probabilities: &[f64], labels: ArrayView1<f64>) -> f64 {
    if probabilities.is_empty() {
        return 0.0;
    }
    let correct = probabilities
        .iter()
        .zip(labels.iter())
        .filter(|(&p, &y)| (p >= 0.5) == (y >= 0.5))
        .count();
    correct as f64 / probabilities.len() as f64
}

/// Mean binary cross-entropy
pub fn log_loss(probabilities: &[f64], labels: ArrayView1<f64>) -> f64 {
    if probabilities.is_empty() {
        return 0.0;
    }
    let total: f64 = probabilities
        .iter()
        .zip(labels.iter())
        .map(|(&p, &y)| {
            let p = p.clamp(1e-15, 1.0 - 1e-15);
            -(y * p.ln() + (1.0 - y) * (1.0 - p).ln())
        })
        .sum();
    total / probabilities.len() as f64
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

fn sample_size(n: usize, fraction: f64) -> usize {
    ((n as f64 * fraction).round() as usize).clamp(1, n)
}

fn sorted_sample(rng: &mut StdRng, n: usize, amount: usize) -> Vec<usize> {
    if amount >= n {
        return (0..n).collect();
    }
    let mut picked = index::sample(rng, n, amount).into_vec();
    picked.sort_unstable();
    picked
}

/// L1 soft-thresholding of a gradient sum
fn soft_threshold(g: f64, alpha: f64) -> f64 {
    if g > alpha {
        g - alpha
    } else if g < -alpha {
        g + alpha
    } else {
        0.0
    }
}

struct SplitCandidate {
    feature: usize,
    threshold: f64,
    gain: f64,
}

struct TreeBuilder<'a, 'r> {
    params: &'a BoostingParams,
    records: ArrayView2<'r, f64>,
    grad: &'a [f64],
    hess: &'a [f64],
    columns: &'a [usize],
    nodes: Vec<Node>,
    importances: &'a mut Vec<f64>,
}

impl TreeBuilder<'_, '_> {
    fn score(&self, g: f64, h: f64) -> f64 {
        let t = soft_threshold(g, self.params.reg_alpha);
        t * t / (h + self.params.reg_lambda)
    }

    fn leaf_value(&self, g: f64, h: f64) -> f64 {
        -soft_threshold(g, self.params.reg_alpha) / (h + self.params.reg_lambda)
            * self.params.learning_rate
    }

    /// Grow the subtree for `rows` and return its node index
    fn grow(&mut self, rows: Vec<usize>, depth: usize) -> usize {
        let g: f64 = rows.iter().map(|&r| self.grad[r]).sum();
        let h: f64 = rows.iter().map(|&r| self.hess[r]).sum();
        let idx = self.nodes.len();
        self.nodes.push(Node::Leaf {
            value: self.leaf_value(g, h),
        });

        if depth >= self.params.max_depth || rows.len() < 2 {
            return idx;
        }
        let Some(split) = self.best_split(&rows, g, h) else {
            return idx;
        };
        self.importances[split.feature] += split.gain;

        let (left_rows, right_rows): (Vec<usize>, Vec<usize>) = rows
            .into_iter()
            .partition(|&r| self.records[[r, split.feature]] < split.threshold);
        let left = self.grow(left_rows, depth + 1);
        let right = self.grow(right_rows, depth + 1);
        self.nodes[idx] = Node::Split {
            feature: split.feature,
            threshold: split.threshold,
            left,
            right,
        };
        idx
    }

    /// Exact greedy search over the sampled columns
    fn best_split(&self, rows: &[usize], g: f64, h: f64) -> Option<SplitCandidate> {
        let parent = self.score(g, h);
        let min_child = self.params.min_child_weight;
        let mut best: Option<SplitCandidate> = None;
        let mut order = rows.to_vec();

        for &feature in self.columns {
            let value = |r: usize| self.records[[r, feature]];
            order.sort_by(|&a, &b| value(a).total_cmp(&value(b)));

            let (mut gl, mut hl) = (0.0, 0.0);
            for pair in order.windows(2) {
                let (current, next) = (pair[0], pair[1]);
                gl += self.grad[current];
                hl += self.hess[current];
                if value(current) == value(next) {
                    continue;
                }
                let (gr, hr) = (g - gl, h - hl);
                if hl < min_child || hr < min_child {
                    continue;
                }
                let gain = 0.5 * (self.score(gl, hl) + self.score(gr, hr) - parent)
                    - self.params.gamma;
                if gain > 1e-12 && best.as_ref().map_or(true, |b| gain > b.gain) {
                    best = Some(SplitCandidate {
                        feature,
                        threshold: 0.5 * (value(current) + value(next)),
                        gain,
                    });
                }
            }
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array2};

    fn separable() -> (Array2<f64>, Array1<f64>) {
        let records = Array2::from_shape_vec(
            (8, 2),
            vec![
                -1.5, 0.3, //
                -1.2, -0.4, //
                -0.9, 0.8, //
                -0.6, -0.1, //
                0.6, 0.2, //
                0.9, -0.7, //
                1.2, 0.5, //
                1.5, -0.2,
            ],
        )
        .unwrap();
        let labels = array![0.0, 0.0, 0.0, 0.0, 1.0, 1.0, 1.0, 1.0];
        (records, labels)
    }

    fn small_params() -> BoostingParams {
        BoostingParams {
            n_estimators: 30,
            learning_rate: 0.3,
            subsample: 1.0,
            colsample_bytree: 1.0,
            min_child_weight: 0.0,
            ..CHURN_BOOSTING
        }
    }

    #[test]
    fn test_train_separates_classes() {
        let (records, labels) = separable();
        let model = train_with(&small_params(), records.view(), labels.view()).unwrap();

        let probabilities = model.predict_proba(records.view()).unwrap();
        for (p, y) in probabilities.iter().zip(labels.iter()) {
            assert!((0.0..=1.0).contains(p));
            assert_eq!(*p >= 0.5, *y == 1.0);
        }
        assert_eq!(model.predict(records.view()).unwrap(), array![0u8, 0, 0, 0, 1, 1, 1, 1]);
    }

    #[test]
    fn test_training_is_deterministic() {
        let (records, labels) = separable();
        let first = train(records.view(), labels.view()).unwrap();
        let second = train(records.view(), labels.view()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_importance_favours_informative_feature() {
        let (records, labels) = separable();
        let model = train_with(&small_params(), records.view(), labels.view()).unwrap();
        let importances = model.feature_importances();
        assert!(importances[0] > importances[1]);
        assert!((importances.iter().sum::<f64>() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_mismatched_rows_rejected() {
        let (records, _) = separable();
        let labels = array![0.0, 1.0];
        assert!(matches!(
            train(records.view(), labels.view()),
            Err(PipelineError::ShapeMismatch { rows: 8, labels: 2 })
        ));
    }

    #[test]
    fn test_non_binary_labels_rejected() {
        let (records, mut labels) = separable();
        labels[3] = 2.0;
        assert!(matches!(
            train(records.view(), labels.view()),
            Err(PipelineError::NonBinaryLabel(v)) if v == 2.0
        ));
    }

    #[test]
    fn test_wrong_width_rejected_at_prediction() {
        let (records, labels) = separable();
        let model = train_with(&small_params(), records.view(), labels.view()).unwrap();
        let row = array![0.1, 0.2, 0.3];
        assert!(model.predict_proba_row(row.view()).is_err());
    }

    #[test]
    fn test_single_class_still_trains() {
        let (records, _) = separable();
        let labels = Array1::zeros(8);
        let model = train_with(&small_params(), records.view(), labels.view()).unwrap();
        let p = model.predict_proba_row(records.row(0)).unwrap();
        assert!(p < 0.5);
    }
}
