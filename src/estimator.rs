use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow, bail};
use serde::{Deserialize, Serialize};

use crate::forest::{ForestParams, RandomForestRegressor};
use crate::metrics::RegressionMetrics;
use crate::schema::{FEATURE_COUNT, FEATURE_NAMES, FeatureVector};

pub const ARTIFACT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatingEstimatorArtifact {
    pub version: u32,
    pub generated_at: String,
    #[serde(default)]
    pub source: Option<String>,
    pub feature_names: Vec<String>,
    pub train_samples: usize,
    #[serde(default)]
    pub holdout: Option<RegressionMetrics>,
    pub forest: RandomForestRegressor,
}

/// Trained rating model. Immutable once built; share it behind an `Arc`.
#[derive(Debug, Clone, PartialEq)]
pub struct RatingEstimator {
    artifact: RatingEstimatorArtifact,
}

impl RatingEstimator {
    pub fn fit(vectors: &[FeatureVector], targets: &[f64], params: ForestParams) -> Result<Self> {
        if vectors.is_empty() {
            bail!("cannot fit an estimator on zero samples");
        }
        if vectors.len() != targets.len() {
            bail!(
                "{} feature vectors but {} targets",
                vectors.len(),
                targets.len()
            );
        }
        let rows = vectors.iter().map(|v| v.values()).collect::<Vec<_>>();
        let forest = RandomForestRegressor::fit(params, &rows, targets).context("fit forest")?;

        Ok(Self {
            artifact: RatingEstimatorArtifact {
                version: ARTIFACT_VERSION,
                generated_at: chrono::Utc::now().to_rfc3339(),
                source: None,
                feature_names: FEATURE_NAMES.iter().map(|s| s.to_string()).collect(),
                train_samples: vectors.len(),
                holdout: None,
                forest,
            },
        })
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.artifact.source = Some(source.into());
        self
    }

    pub fn with_holdout(mut self, metrics: RegressionMetrics) -> Self {
        if metrics.samples > 0 {
            self.artifact.holdout = Some(metrics);
        }
        self
    }

    pub fn artifact(&self) -> &RatingEstimatorArtifact {
        &self.artifact
    }

    pub fn predict(&self, vector: &FeatureVector) -> Result<f64> {
        self.artifact.forest.predict(vector.values())
    }

    /// Prediction from an untyped row; the row must follow `FEATURE_NAMES`.
    pub fn predict_values(&self, values: &[f64]) -> Result<f64> {
        if values.len() != FEATURE_COUNT {
            bail!(
                "feature length mismatch: got {}, expected {FEATURE_COUNT}",
                values.len()
            );
        }
        let vector = FeatureVector::from_slice(values)
            .ok_or_else(|| anyhow!("feature values must be finite"))?;
        self.predict(&vector)
    }

    pub fn save(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(&self.artifact).context("serialize estimator")
    }

    pub fn load(bytes: &[u8]) -> Result<Self> {
        let artifact: RatingEstimatorArtifact =
            serde_json::from_slice(bytes).context("parse estimator artifact")?;
        Self::from_artifact(artifact)
    }

    pub fn from_artifact(artifact: RatingEstimatorArtifact) -> Result<Self> {
        if artifact.version != ARTIFACT_VERSION {
            bail!(
                "unsupported estimator artifact version {} (expected {ARTIFACT_VERSION})",
                artifact.version
            );
        }
        check_schema(&artifact.feature_names)?;
        if artifact.forest.n_features() != FEATURE_COUNT {
            bail!(
                "forest expects {} features, schema has {FEATURE_COUNT}",
                artifact.forest.n_features()
            );
        }
        artifact.forest.validate().context("invalid forest")?;
        Ok(Self { artifact })
    }

    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .with_context(|| format!("create {}", parent.display()))?;
        }
        let bytes = self.save()?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, bytes).with_context(|| format!("write {}", tmp.display()))?;
        fs::rename(&tmp, path).with_context(|| format!("move artifact to {}", path.display()))?;
        Ok(())
    }

    pub fn load_from_path(path: &Path) -> Result<Self> {
        let bytes = fs::read(path).with_context(|| format!("read {}", path.display()))?;
        Self::load(&bytes).with_context(|| format!("load estimator from {}", path.display()))
    }

    pub fn render_first_tree(&self, max_depth: usize) -> Option<String> {
        self.artifact
            .forest
            .trees()
            .first()
            .map(|tree| tree.render(&FEATURE_NAMES, max_depth))
    }
}

fn check_schema(names: &[String]) -> Result<()> {
    if names.len() != FEATURE_COUNT {
        bail!(
            "artifact was trained on {} features, schema has {FEATURE_COUNT}",
            names.len()
        );
    }
    for (idx, (got, want)) in names.iter().zip(FEATURE_NAMES.iter()).enumerate() {
        if got != want {
            bail!("feature {idx} is `{got}` in the artifact but `{want}` in the schema");
        }
    }
    Ok(())
}
