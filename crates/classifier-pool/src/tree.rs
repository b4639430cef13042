//! CART trees
//!
//! One arena-backed tree structure with two leaf payloads: class
//! distributions (gini splits) for the decision tree and forest, and scalar
//! values (squared-error splits) for gradient boosting.

use ensemble_core::{ClassifierConfig, ClassifierFamily, EnsembleResult, ProbabilityKind};
use nalgebra::DMatrix;
use rand::rngs::StdRng;

use crate::adapter::{Estimator, FittedModel};
use crate::params::Params;

#[derive(Debug, Clone)]
enum Node<L> {
    Leaf(L),
    Split { feature: usize, threshold: f64, left: usize, right: usize },
}

#[derive(Debug, Clone)]
pub struct Tree<L> {
    nodes: Vec<Node<L>>,
}

impl<L> Tree<L> {
    /// Leaf payload reached by `row` of `x`.
    pub fn leaf(&self, x: &DMatrix<f64>, row: usize) -> &L {
        let mut idx = 0;
        loop {
            match &self.nodes[idx] {
                Node::Leaf(value) => return value,
                Node::Split { feature, threshold, left, right } => {
                    idx = if x[(row, *feature)] <= *threshold { *left } else { *right };
                }
            }
        }
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn depth(&self) -> usize {
        fn walk<L>(nodes: &[Node<L>], idx: usize) -> usize {
            match &nodes[idx] {
                Node::Leaf(_) => 0,
                Node::Split { left, right, .. } => 1 + walk(nodes, *left).max(walk(nodes, *right)),
            }
        }
        if self.nodes.is_empty() { 0 } else { walk(&self.nodes, 0) }
    }
}

/// Growth limits shared by every tree kind.
#[derive(Debug, Clone, Copy)]
pub struct GrowthLimits {
    pub max_depth: usize,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    /// Features examined per split; `None` examines all of them
    pub max_features: Option<usize>,
}

impl Default for GrowthLimits {
    fn default() -> Self {
        Self { max_depth: 8, min_samples_split: 2, min_samples_leaf: 1, max_features: None }
    }
}

/// Running sufficient statistics for one side of a candidate split.
trait SplitStats: Clone {
    fn add(&mut self, sample: usize);
    fn remove(&mut self, sample: usize);
    /// Node size times impurity; lower is purer.
    fn cost(&self) -> f64;
}

#[derive(Clone)]
struct GiniStats<'a> {
    labels: &'a [usize],
    counts: Vec<f64>,
    total: f64,
}

impl<'a> GiniStats<'a> {
    fn new(labels: &'a [usize], n_classes: usize) -> Self {
        Self { labels, counts: vec![0.0; n_classes], total: 0.0 }
    }

    fn distribution(&self) -> Vec<f64> {
        let total = self.total.max(1.0);
        self.counts.iter().map(|c| c / total).collect()
    }
}

impl SplitStats for GiniStats<'_> {
    fn add(&mut self, sample: usize) {
        self.counts[self.labels[sample]] += 1.0;
        self.total += 1.0;
    }

    fn remove(&mut self, sample: usize) {
        self.counts[self.labels[sample]] -= 1.0;
        self.total -= 1.0;
    }

    fn cost(&self) -> f64 {
        if self.total <= 0.0 {
            return 0.0;
        }
        self.total - self.counts.iter().map(|c| c * c).sum::<f64>() / self.total
    }
}

#[derive(Clone)]
struct SquaredErrorStats<'a> {
    targets: &'a [f64],
    sum: f64,
    sum_sq: f64,
    total: f64,
}

impl<'a> SquaredErrorStats<'a> {
    fn new(targets: &'a [f64]) -> Self {
        Self { targets, sum: 0.0, sum_sq: 0.0, total: 0.0 }
    }
}

impl SplitStats for SquaredErrorStats<'_> {
    fn add(&mut self, sample: usize) {
        let t = self.targets[sample];
        self.sum += t;
        self.sum_sq += t * t;
        self.total += 1.0;
    }

    fn remove(&mut self, sample: usize) {
        let t = self.targets[sample];
        self.sum -= t;
        self.sum_sq -= t * t;
        self.total -= 1.0;
    }

    fn cost(&self) -> f64 {
        if self.total <= 0.0 {
            return 0.0;
        }
        (self.sum_sq - self.sum * self.sum / self.total).max(0.0)
    }
}

struct Split {
    feature: usize,
    threshold: f64,
    gain: f64,
}

fn candidate_features(n_features: usize, limits: &GrowthLimits, rng: Option<&mut StdRng>) -> Vec<usize> {
    match (limits.max_features, rng) {
        (Some(m), Some(rng)) if m < n_features => rand::seq::index::sample(rng, n_features, m).into_vec(),
        _ => (0..n_features).collect(),
    }
}

fn best_split<S: SplitStats>(
    x: &DMatrix<f64>,
    samples: &[usize],
    features: &[usize],
    empty: &S,
    parent: &S,
    min_leaf: usize,
) -> Option<Split> {
    let parent_cost = parent.cost();
    let mut best: Option<Split> = None;
    let mut order = samples.to_vec();

    for &feature in features {
        order.sort_by(|&a, &b| x[(a, feature)].total_cmp(&x[(b, feature)]));
        let mut left = empty.clone();
        let mut right = parent.clone();

        for pos in 0..order.len() - 1 {
            left.add(order[pos]);
            right.remove(order[pos]);
            let n_left = pos + 1;
            if n_left < min_leaf || order.len() - n_left < min_leaf {
                continue;
            }
            let here = x[(order[pos], feature)];
            let next = x[(order[pos + 1], feature)];
            if next <= here {
                continue;
            }
            let gain = parent_cost - left.cost() - right.cost();
            if gain > 1e-12 && best.as_ref().map_or(true, |b| gain > b.gain) {
                best = Some(Split { feature, threshold: 0.5 * (here + next), gain });
            }
        }
    }
    best
}

/// Recursive CART growth. `make_leaf` turns the statistics of a terminal
/// sample set into its payload.
struct Grower<'a, S, L, F> {
    x: &'a DMatrix<f64>,
    limits: GrowthLimits,
    empty: S,
    make_leaf: F,
    nodes: Vec<Node<L>>,
    rng: Option<&'a mut StdRng>,
}

impl<'a, S, L, F> Grower<'a, S, L, F>
where
    S: SplitStats,
    F: Fn(&[usize], &S) -> L,
{
    fn new(x: &'a DMatrix<f64>, limits: GrowthLimits, empty: S, make_leaf: F, rng: Option<&'a mut StdRng>) -> Self {
        Self { x, limits, empty, make_leaf, nodes: Vec::new(), rng }
    }

    fn finish(mut self, samples: &[usize]) -> Tree<L> {
        self.grow(samples, 0);
        Tree { nodes: self.nodes }
    }

    fn grow(&mut self, samples: &[usize], depth: usize) -> usize {
        let mut stats = self.empty.clone();
        samples.iter().for_each(|&s| stats.add(s));

        let idx = self.nodes.len();
        let splittable = depth < self.limits.max_depth
            && samples.len() >= self.limits.min_samples_split.max(2)
            && stats.cost() > 1e-12;

        let split = if splittable {
            let features = candidate_features(self.x.ncols(), &self.limits, self.rng.as_deref_mut());
            best_split(self.x, samples, &features, &self.empty, &stats, self.limits.min_samples_leaf.max(1))
        } else {
            None
        };

        let Some(split) = split else {
            self.nodes.push(Node::Leaf((self.make_leaf)(samples, &stats)));
            return idx;
        };

        let (left_samples, right_samples): (Vec<usize>, Vec<usize>) = samples
            .iter()
            .partition(|&&s| self.x[(s, split.feature)] <= split.threshold);

        // Reserve the slot, then patch the children in
        self.nodes.push(Node::Split { feature: split.feature, threshold: split.threshold, left: 0, right: 0 });
        let left = self.grow(&left_samples, depth + 1);
        let right = self.grow(&right_samples, depth + 1);
        self.nodes[idx] = Node::Split { feature: split.feature, threshold: split.threshold, left, right };
        idx
    }
}

/// Grow a gini classification tree over `samples` (indices may repeat, as
/// in a bootstrap draw). Leaves hold class distributions.
pub fn grow_classification_tree(
    x: &DMatrix<f64>,
    labels: &[usize],
    n_classes: usize,
    samples: &[usize],
    limits: GrowthLimits,
    rng: Option<&mut StdRng>,
) -> Tree<Vec<f64>> {
    Grower::new(x, limits, GiniStats::new(labels, n_classes), |_, stats| stats.distribution(), rng)
        .finish(samples)
}

/// Grow a squared-error regression tree on `targets`; each leaf value is
/// computed by `leaf_value` from the samples that reach it.
pub fn grow_regression_tree<F>(
    x: &DMatrix<f64>,
    targets: &[f64],
    samples: &[usize],
    limits: GrowthLimits,
    leaf_value: F,
) -> Tree<f64>
where
    F: Fn(&[usize]) -> f64,
{
    Grower::new(x, limits, SquaredErrorStats::new(targets), |leaf, _| leaf_value(leaf), None)
        .finish(samples)
}

pub const PARAMS: &[&str] = &["max_depth", "min_samples_split", "min_samples_leaf"];

/// Single CART decision tree.
#[derive(Debug, Clone, Default)]
pub struct DecisionTree {
    pub limits: GrowthLimits,
}

impl DecisionTree {
    pub fn from_config(config: &ClassifierConfig) -> EnsembleResult<Self> {
        let p = Params::new(config, PARAMS)?;
        let d = GrowthLimits::default();
        Ok(Self {
            limits: GrowthLimits {
                max_depth: p.count("max_depth", d.max_depth, 1)?,
                min_samples_split: p.count("min_samples_split", d.min_samples_split, 2)?,
                min_samples_leaf: p.count("min_samples_leaf", d.min_samples_leaf, 1)?,
                max_features: None,
            },
        })
    }
}

#[derive(Debug, Clone)]
pub struct TreeModel {
    tree: Tree<Vec<f64>>,
    n_features: usize,
    n_classes: usize,
}

impl TreeModel {
    pub(crate) fn new(tree: Tree<Vec<f64>>, n_features: usize, n_classes: usize) -> Self {
        Self { tree, n_features, n_classes }
    }

    pub(crate) fn tree(&self) -> &Tree<Vec<f64>> {
        &self.tree
    }
}

impl Estimator for DecisionTree {
    type Model = TreeModel;

    fn family(&self) -> ClassifierFamily {
        ClassifierFamily::DecisionTree
    }

    fn probability_kind(&self) -> ProbabilityKind {
        ProbabilityKind::Native
    }

    fn fit(&self, features: &DMatrix<f64>, labels: &[usize], n_classes: usize) -> EnsembleResult<TreeModel> {
        let samples: Vec<usize> = (0..features.nrows()).collect();
        let tree = grow_classification_tree(features, labels, n_classes, &samples, self.limits, None);
        Ok(TreeModel::new(tree, features.ncols(), n_classes))
    }
}

impl FittedModel for TreeModel {
    fn n_features(&self) -> usize {
        self.n_features
    }

    fn predict_proba(&self, features: &DMatrix<f64>) -> DMatrix<f64> {
        let mut out = DMatrix::zeros(features.nrows(), self.n_classes);
        for r in 0..features.nrows() {
            for (c, p) in self.tree.leaf(features, r).iter().enumerate() {
                out[(r, c)] = *p;
            }
        }
        out
    }

    fn parameter_count(&self) -> usize {
        self.tree.node_count() * self.n_classes.max(3)
    }
}
