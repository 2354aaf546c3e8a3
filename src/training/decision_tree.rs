//! CART decision tree used as the random forest base learner

use ndarray::{Array1, Array2};
use rand::seq::index::sample;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{MlError, Result};

/// Tree node stored in a flat arena
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TreeNode {
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    /// Class distribution (classification) or a single mean (regression)
    Leaf { value: Vec<f64> },
}

/// Impurity measure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Criterion {
    Gini,
    Mse,
}

/// Growth limits for a tree
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeParams {
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    /// Features examined per split; `None` examines all
    pub max_features: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionTree {
    params: TreeParams,
    criterion: Criterion,
    n_classes: usize,
    nodes: Vec<TreeNode>,
    /// Total weighted impurity decrease per feature, not normalized
    impurity_decrease: Vec<f64>,
}

struct SplitCandidate {
    feature: usize,
    threshold: f64,
    decrease: f64,
}

impl DecisionTree {
    pub fn classifier(params: TreeParams, n_classes: usize) -> Self {
        Self {
            params,
            criterion: Criterion::Gini,
            n_classes: n_classes.max(1),
            nodes: Vec::new(),
            impurity_decrease: Vec::new(),
        }
    }

    pub fn regressor(params: TreeParams) -> Self {
        Self {
            params,
            criterion: Criterion::Mse,
            n_classes: 0,
            nodes: Vec::new(),
            impurity_decrease: Vec::new(),
        }
    }

    /// Grow the tree on the rows listed in `indices` (repeats allowed)
    pub fn fit_indices<R: Rng>(
        &mut self,
        x: &Array2<f64>,
        y: &Array1<f64>,
        indices: Vec<usize>,
        rng: &mut R,
    ) -> Result<()> {
        if indices.is_empty() {
            return Err(MlError::ValidationError("Cannot grow a tree on zero samples".to_string()));
        }
        self.nodes.clear();
        self.impurity_decrease = vec![0.0; x.ncols()];
        self.grow(x, y, indices, 0, rng);
        Ok(())
    }

    pub fn fit<R: Rng>(&mut self, x: &Array2<f64>, y: &Array1<f64>, rng: &mut R) -> Result<()> {
        self.fit_indices(x, y, (0..x.nrows()).collect(), rng)
    }

    fn grow<R: Rng>(
        &mut self,
        x: &Array2<f64>,
        y: &Array1<f64>,
        indices: Vec<usize>,
        depth: usize,
        rng: &mut R,
    ) -> usize {
        let node_id = self.nodes.len();
        self.nodes.push(TreeNode::Leaf {
            value: self.leaf_value(y, &indices),
        });

        let depth_ok = self.params.max_depth.map_or(true, |d| depth < d);
        if !depth_ok || indices.len() < self.params.min_samples_split || self.impurity(y, &indices) <= 0.0 {
            return node_id;
        }

        let split = match self.best_split(x, y, &indices, rng) {
            Some(split) => split,
            None => return node_id,
        };

        let (left_idx, right_idx): (Vec<usize>, Vec<usize>) = indices
            .into_iter()
            .partition(|&i| x[[i, split.feature]] <= split.threshold);

        self.impurity_decrease[split.feature] += split.decrease;
        let left = self.grow(x, y, left_idx, depth + 1, rng);
        let right = self.grow(x, y, right_idx, depth + 1, rng);
        self.nodes[node_id] = TreeNode::Split {
            feature: split.feature,
            threshold: split.threshold,
            left,
            right,
        };
        node_id
    }

    fn best_split<R: Rng>(
        &self,
        x: &Array2<f64>,
        y: &Array1<f64>,
        indices: &[usize],
        rng: &mut R,
    ) -> Option<SplitCandidate> {
        let n_features = x.ncols();
        let features: Vec<usize> = match self.params.max_features {
            Some(m) if m < n_features => sample(rng, n_features, m.max(1)).into_vec(),
            _ => (0..n_features).collect(),
        };

        let n = indices.len() as f64;
        let parent = self.impurity(y, indices);
        let min_leaf = self.params.min_samples_leaf.max(1);
        let mut best: Option<SplitCandidate> = None;

        for feature in features {
            let mut order: Vec<usize> = indices.to_vec();
            order.sort_by(|&a, &b| x[[a, feature]].total_cmp(&x[[b, feature]]));

            let mut left = Accumulator::new(self.criterion, self.n_classes);
            let mut right = Accumulator::new(self.criterion, self.n_classes);
            for &i in &order {
                right.add(y[i]);
            }

            for pos in 0..order.len() - 1 {
                let i = order[pos];
                left.add(y[i]);
                right.remove(y[i]);

                let (n_left, n_right) = (pos + 1, order.len() - pos - 1);
                if n_left < min_leaf || n_right < min_leaf {
                    continue;
                }
                let here = x[[i, feature]];
                let next = x[[order[pos + 1], feature]];
                if here >= next {
                    continue;
                }

                let child = (n_left as f64 * left.impurity() + n_right as f64 * right.impurity()) / n;
                let decrease = n * (parent - child);
                if decrease > 1e-12 && best.as_ref().map_or(true, |b| decrease > b.decrease) {
                    best = Some(SplitCandidate {
                        feature,
                        threshold: (here + next) / 2.0,
                        decrease,
                    });
                }
            }
        }
        best
    }

    fn impurity(&self, y: &Array1<f64>, indices: &[usize]) -> f64 {
        let mut acc = Accumulator::new(self.criterion, self.n_classes);
        for &i in indices {
            acc.add(y[i]);
        }
        acc.impurity()
    }

    fn leaf_value(&self, y: &Array1<f64>, indices: &[usize]) -> Vec<f64> {
        let n = indices.len().max(1) as f64;
        match self.criterion {
            Criterion::Gini => {
                let mut dist = vec![0.0; self.n_classes];
                for &i in indices {
                    dist[class_of(y[i], self.n_classes)] += 1.0;
                }
                dist.iter_mut().for_each(|v| *v /= n);
                dist
            }
            Criterion::Mse => vec![indices.iter().map(|&i| y[i]).sum::<f64>() / n],
        }
    }

    /// Leaf value reached by one sample
    pub fn leaf_for(&self, sample: &[f64]) -> Result<&[f64]> {
        let mut node = self.nodes.first().ok_or(MlError::ModelNotFitted)?;
        loop {
            match node {
                TreeNode::Leaf { value } => return Ok(value),
                TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    let next = if sample[*feature] <= *threshold { *left } else { *right };
                    node = &self.nodes[next];
                }
            }
        }
    }

    pub fn impurity_decrease(&self) -> &[f64] {
        &self.impurity_decrease
    }

    pub fn n_leaves(&self) -> usize {
        self.nodes.iter().filter(|n| matches!(n, TreeNode::Leaf { .. })).count()
    }
}

fn class_of(v: f64, n_classes: usize) -> usize {
    (v.round().max(0.0) as usize).min(n_classes.saturating_sub(1))
}

/// Running statistics for incremental impurity
struct Accumulator {
    criterion: Criterion,
    count: f64,
    sum: f64,
    sq_sum: f64,
    class_counts: Vec<f64>,
}

impl Accumulator {
    fn new(criterion: Criterion, n_classes: usize) -> Self {
        Self {
            criterion,
            count: 0.0,
            sum: 0.0,
            sq_sum: 0.0,
            class_counts: vec![0.0; n_classes],
        }
    }

    fn add(&mut self, v: f64) {
        self.count += 1.0;
        match self.criterion {
            Criterion::Gini => {
                let k = class_of(v, self.class_counts.len());
                self.class_counts[k] += 1.0;
            }
            Criterion::Mse => {
                self.sum += v;
                self.sq_sum += v * v;
            }
        }
    }

    fn remove(&mut self, v: f64) {
        self.count -= 1.0;
        match self.criterion {
            Criterion::Gini => {
                let k = class_of(v, self.class_counts.len());
                self.class_counts[k] -= 1.0;
            }
            Criterion::Mse => {
                self.sum -= v;
                self.sq_sum -= v * v;
            }
        }
    }

    fn impurity(&self) -> f64 {
        if self.count <= 0.0 {
            return 0.0;
        }
        match self.criterion {
            Criterion::Gini => {
                1.0 - self
                    .class_counts
                    .iter()
                    .map(|c| (c / self.count).powi(2))
                    .sum::<f64>()
            }
            Criterion::Mse => {
                let mean = self.sum / self.count;
                (self.sq_sum / self.count - mean * mean).max(0.0)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn params() -> TreeParams {
        TreeParams {
            max_depth: None,
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_features: None,
        }
    }

    #[test]
    fn test_classifier_separates() {
        let x = array![[1.0, 5.0], [2.0, 5.0], [3.0, 5.0], [7.0, 5.0], [8.0, 5.0], [9.0, 5.0]];
        let y = array![0.0, 0.0, 0.0, 1.0, 1.0, 1.0];
        let mut tree = DecisionTree::classifier(params(), 2);
        tree.fit(&x, &y, &mut ChaCha8Rng::seed_from_u64(0)).unwrap();

        assert_eq!(tree.leaf_for(&[2.5, 5.0]).unwrap(), &[1.0, 0.0]);
        assert_eq!(tree.leaf_for(&[8.5, 5.0]).unwrap(), &[0.0, 1.0]);
        assert_eq!(tree.n_leaves(), 2);
        assert!(tree.impurity_decrease()[0] > 0.0);
        assert_eq!(tree.impurity_decrease()[1], 0.0);
    }

    #[test]
    fn test_regressor_depth_limit() {
        let x = array![[1.0], [2.0], [3.0], [4.0]];
        let y = array![1.0, 2.0, 3.0, 4.0];
        let mut tree = DecisionTree::regressor(TreeParams {
            max_depth: Some(1),
            ..params()
        });
        tree.fit(&x, &y, &mut ChaCha8Rng::seed_from_u64(0)).unwrap();
        assert_eq!(tree.n_leaves(), 2);
        assert_eq!(tree.leaf_for(&[1.0]).unwrap(), &[1.5]);
    }

    #[test]
    fn test_min_samples_leaf_respected() {
        let x = array![[1.0], [2.0], [3.0], [4.0]];
        let y = array![0.0, 1.0, 1.0, 1.0];
        let mut tree = DecisionTree::classifier(
            TreeParams {
                min_samples_leaf: 2,
                ..params()
            },
            2,
        );
        tree.fit(&x, &y, &mut ChaCha8Rng::seed_from_u64(0)).unwrap();
        assert_eq!(tree.leaf_for(&[1.0]).unwrap(), &[0.5, 0.5]);
    }

    #[test]
    fn test_gini_accumulator_add_remove() {
        let mut acc = Accumulator::new(Criterion::Gini, 2);
        acc.add(0.0);
        acc.add(1.0);
        assert!((acc.impurity() - 0.5).abs() < 1e-12);
        acc.remove(1.0);
        assert_eq!(acc.impurity(), 0.0);
        assert_eq!(acc.class_counts, vec![1.0, 0.0]);
    }

    #[test]
    fn test_unfitted_tree() {
        let tree = DecisionTree::regressor(params());
        assert!(tree.leaf_for(&[0.0]).is_err());
    }
}
