use anyhow::{Result, anyhow, bail};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ForestParams {
    pub n_trees: usize,
    #[serde(default)]
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    /// Features tried per split; `None` means all of them.
    #[serde(default)]
    pub max_features: Option<usize>,
    pub bootstrap: bool,
    pub seed: u64,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_trees: 10,
            max_depth: None,
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_features: None,
            bootstrap: true,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TreeNode {
    Leaf {
        value: f64,
        samples: usize,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
        value: f64,
        samples: usize,
    },
}

/// CART regression tree stored as a flat, pre-order node list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionTree {
    nodes: Vec<TreeNode>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomForestRegressor {
    params: ForestParams,
    n_features: usize,
    trees: Vec<RegressionTree>,
}

struct TreeBuilder<'a, R> {
    x: &'a [R],
    y: &'a [f64],
    params: &'a ForestParams,
    n_features: usize,
    rng: StdRng,
    nodes: Vec<TreeNode>,
}

#[derive(Debug, Clone, Copy)]
struct BestSplit {
    feature: usize,
    threshold: f64,
    score: f64,
    left_len: usize,
}

impl RandomForestRegressor {
    pub fn fit<R>(params: ForestParams, x: &[R], y: &[f64]) -> Result<Self>
    where
        R: AsRef<[f64]> + Sync,
    {
        if x.is_empty() {
            bail!("cannot fit a forest on zero samples");
        }
        if x.len() != y.len() {
            bail!("sample count {} != target count {}", x.len(), y.len());
        }
        if params.n_trees == 0 {
            bail!("forest needs at least one tree");
        }
        let n_features = x[0].as_ref().len();
        if n_features == 0 {
            bail!("samples have no features");
        }
        for (idx, row) in x.iter().enumerate() {
            let row = row.as_ref();
            if row.len() != n_features {
                bail!("row {idx} has {} features, expected {n_features}", row.len());
            }
            if row.iter().any(|v| !v.is_finite()) {
                bail!("row {idx} contains a non-finite feature");
            }
        }
        if y.iter().any(|v| !v.is_finite()) {
            bail!("targets contain a non-finite value");
        }

        // Per-tree seeds are drawn up front so parallel fitting stays deterministic.
        let mut master = StdRng::seed_from_u64(params.seed);
        let seeds = (0..params.n_trees)
            .map(|_| master.r#gen::<u64>())
            .collect::<Vec<_>>();

        let trees = seeds
            .into_par_iter()
            .map(|seed| RegressionTree::fit(&params, x, y, n_features, seed))
            .collect::<Vec<_>>();

        Ok(Self {
            params,
            n_features,
            trees,
        })
    }

    pub fn params(&self) -> &ForestParams {
        &self.params
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn trees(&self) -> &[RegressionTree] {
        &self.trees
    }

    pub fn predict(&self, row: &[f64]) -> Result<f64> {
        if row.len() != self.n_features {
            bail!(
                "feature length mismatch: got {}, expected {}",
                row.len(),
                self.n_features
            );
        }
        if self.trees.is_empty() {
            bail!("forest has no trees");
        }
        let sum = self.trees.iter().map(|t| t.predict(row)).sum::<f64>();
        Ok(sum / self.trees.len() as f64)
    }

    /// Structural checks for a forest that came from outside this process.
    pub fn validate(&self) -> Result<()> {
        if self.trees.is_empty() {
            bail!("forest has no trees");
        }
        for (idx, tree) in self.trees.iter().enumerate() {
            tree.validate(self.n_features)
                .map_err(|err| anyhow!("tree {idx}: {err}"))?;
        }
        Ok(())
    }
}

impl RegressionTree {
    fn fit<R: AsRef<[f64]>>(
        params: &ForestParams,
        x: &[R],
        y: &[f64],
        n_features: usize,
        seed: u64,
    ) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let n = x.len();
        let mut indices = if params.bootstrap {
            (0..n).map(|_| rng.gen_range(0..n)).collect::<Vec<_>>()
        } else {
            (0..n).collect::<Vec<_>>()
        };

        let mut builder = TreeBuilder {
            x,
            y,
            params,
            n_features,
            rng,
            nodes: Vec::new(),
        };
        builder.grow(&mut indices, 0);
        Self {
            nodes: builder.nodes,
        }
    }

    pub fn predict(&self, row: &[f64]) -> f64 {
        let mut idx = 0usize;
        loop {
            match self.nodes.get(idx) {
                Some(TreeNode::Leaf { value, .. }) => return *value,
                Some(TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                    ..
                }) => {
                    idx = if row[*feature] <= *threshold {
                        *left
                    } else {
                        *right
                    };
                }
                None => return f64::NAN,
            }
        }
    }

    pub fn nodes(&self) -> &[TreeNode] {
        &self.nodes
    }

    pub fn depth(&self) -> usize {
        fn walk(nodes: &[TreeNode], idx: usize) -> usize {
            match &nodes[idx] {
                TreeNode::Leaf { .. } => 0,
                TreeNode::Split { left, right, .. } => {
                    1 + walk(nodes, *left).max(walk(nodes, *right))
                }
            }
        }
        if self.nodes.is_empty() {
            0
        } else {
            walk(&self.nodes, 0)
        }
    }

    fn validate(&self, n_features: usize) -> Result<()> {
        if self.nodes.is_empty() {
            bail!("empty tree");
        }
        for (idx, node) in self.nodes.iter().enumerate() {
            match node {
                TreeNode::Leaf { value, .. } => {
                    if !value.is_finite() {
                        bail!("node {idx} has a non-finite value");
                    }
                }
                TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                    ..
                } => {
                    if *feature >= n_features {
                        bail!("node {idx} splits on feature {feature} of {n_features}");
                    }
                    if !threshold.is_finite() {
                        bail!("node {idx} has a non-finite threshold");
                    }
                    // Children always come after their parent, which rules out cycles.
                    if *left <= idx || *right <= idx {
                        bail!("node {idx} points backwards");
                    }
                    if *left >= self.nodes.len() || *right >= self.nodes.len() {
                        bail!("node {idx} points past the end of the tree");
                    }
                }
            }
        }
        Ok(())
    }

    /// Indented text rendering down to `max_depth`, using `names` for features.
    pub fn render(&self, names: &[&str], max_depth: usize) -> String {
        let mut out = String::new();
        if !self.nodes.is_empty() {
            self.render_node(0, 0, names, max_depth, &mut out);
        }
        out
    }

    fn render_node(
        &self,
        idx: usize,
        depth: usize,
        names: &[&str],
        max_depth: usize,
        out: &mut String,
    ) {
        let indent = "|   ".repeat(depth);
        match &self.nodes[idx] {
            TreeNode::Leaf { value, samples } => {
                out.push_str(&format!(
                    "{indent}|--- value: {value:.2} (samples: {samples})\n"
                ));
            }
            TreeNode::Split {
                feature,
                threshold,
                left,
                right,
                value,
                samples,
            } => {
                if depth >= max_depth {
                    out.push_str(&format!(
                        "{indent}|--- ... value: {value:.2} (samples: {samples})\n"
                    ));
                    return;
                }
                let name = names
                    .get(*feature)
                    .map(|n| n.to_string())
                    .unwrap_or_else(|| format!("feature_{feature}"));
                out.push_str(&format!("{indent}|--- {name} <= {threshold:.2}\n"));
                self.render_node(*left, depth + 1, names, max_depth, out);
                out.push_str(&format!("{indent}|--- {name} >  {threshold:.2}\n"));
                self.render_node(*right, depth + 1, names, max_depth, out);
            }
        }
    }
}

impl<R: AsRef<[f64]>> TreeBuilder<'_, R> {
    fn grow(&mut self, indices: &mut [usize], depth: usize) -> usize {
        let samples = indices.len();
        let sum = indices.iter().map(|&i| self.y[i]).sum::<f64>();
        let mean = sum / samples as f64;
        let sse = indices
            .iter()
            .map(|&i| (self.y[i] - mean).powi(2))
            .sum::<f64>();

        let node_idx = self.nodes.len();
        self.nodes.push(TreeNode::Leaf {
            value: mean,
            samples,
        });

        let depth_exhausted = self.params.max_depth.is_some_and(|d| depth >= d);
        if depth_exhausted
            || samples < self.params.min_samples_split.max(2)
            || samples < 2 * self.params.min_samples_leaf.max(1)
            || sse <= 1e-12
        {
            return node_idx;
        }

        let Some(best) = self.best_split(indices, sum) else {
            return node_idx;
        };

        indices.sort_by(|&a, &b| {
            let va = self.x[a].as_ref()[best.feature];
            let vb = self.x[b].as_ref()[best.feature];
            va.total_cmp(&vb)
        });
        let (left_idx, right_idx) = indices.split_at_mut(best.left_len);
        let left = self.grow(left_idx, depth + 1);
        let right = self.grow(right_idx, depth + 1);

        self.nodes[node_idx] = TreeNode::Split {
            feature: best.feature,
            threshold: best.threshold,
            left,
            right,
            value: mean,
            samples,
        };
        node_idx
    }

    fn candidate_features(&mut self) -> Vec<usize> {
        let mut features = (0..self.n_features).collect::<Vec<_>>();
        if let Some(k) = self.params.max_features
            && k > 0
            && k < self.n_features
        {
            features.shuffle(&mut self.rng);
            features.truncate(k);
        }
        features
    }

    fn best_split(&mut self, indices: &[usize], total_sum: f64) -> Option<BestSplit> {
        let n = indices.len();
        let min_leaf = self.params.min_samples_leaf.max(1);
        let mut best: Option<BestSplit> = None;
        let mut column = Vec::with_capacity(n);

        for feature in self.candidate_features() {
            column.clear();
            column.extend(
                indices
                    .iter()
                    .map(|&i| (self.x[i].as_ref()[feature], self.y[i])),
            );
            column.sort_by(|a, b| a.0.total_cmp(&b.0));

            let mut left_sum = 0.0;
            for pos in 0..n - 1 {
                left_sum += column[pos].1;
                let left_len = pos + 1;
                let right_len = n - left_len;
                if column[pos].0 == column[pos + 1].0 {
                    continue;
                }
                if left_len < min_leaf || right_len < min_leaf {
                    continue;
                }
                let right_sum = total_sum - left_sum;
                // Maximizing this proxy is equivalent to minimizing child SSE.
                let score = left_sum * left_sum / left_len as f64
                    + right_sum * right_sum / right_len as f64;
                if best.is_none_or(|b| score > b.score) {
                    let threshold = (column[pos].0 + column[pos + 1].0) / 2.0;
                    best = Some(BestSplit {
                        feature,
                        threshold,
                        score,
                        left_len,
                    });
                }
            }
        }

        best
    }
}
