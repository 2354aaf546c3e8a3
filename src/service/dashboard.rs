//! Model counts and headline scores across both stores

use chrono::{DateTime, Duration, Local};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

use crate::error::Result;
use crate::export::{ArtifactId, ArtifactMetadata, ArtifactStore, ArtifactSummary, PayloadKind};
use crate::security::{AccessPolicy, Caller, Operation};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BestModel {
    pub name: String,
    /// `CNN` or `Tabular`
    #[serde(rename = "type")]
    pub family: String,
    pub id: ArtifactId,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardStats {
    pub total_models: usize,
    pub total_cnn: usize,
    pub total_tabular: usize,
    pub best_accuracy: f64,
    pub best_model: Option<BestModel>,
    pub models_last_30_days: usize,
    pub models_last_7_days: usize,
    /// `CNN - {architecture}` and `Tabular - {algorithm}` counts
    pub model_types: BTreeMap<String, usize>,
}

/// Aggregate both stores as seen at `now`
pub fn stats(cnn: &ArtifactStore, tabular: &ArtifactStore, now: DateTime<Local>) -> Result<DashboardStats> {
    let cnn_models = cnn.list(Some(PayloadKind::Deep))?;
    let tabular_models = tabular.list(Some(PayloadKind::Classical))?;
    Ok(aggregate(&cnn_models, &tabular_models, now))
}

/// [`stats`] behind the access gate
pub fn view(
    policy: &AccessPolicy,
    caller: &Caller,
    cnn: &ArtifactStore,
    tabular: &ArtifactStore,
    now: DateTime<Local>,
) -> Result<DashboardStats> {
    policy.authorize(caller, Operation::ViewDashboard)?;
    stats(cnn, tabular, now)
}

fn aggregate(cnn: &[ArtifactSummary], tabular: &[ArtifactSummary], now: DateTime<Local>) -> DashboardStats {
    let mut stats = DashboardStats {
        total_models: cnn.len() + tabular.len(),
        total_cnn: cnn.len(),
        total_tabular: tabular.len(),
        best_accuracy: 0.0,
        best_model: None,
        models_last_30_days: 0,
        models_last_7_days: 0,
        model_types: BTreeMap::new(),
    };

    let month_ago = now - Duration::days(30);
    let week_ago = now - Duration::days(7);

    let families = [("CNN", cnn, "custom"), ("Tabular", tabular, "unknown")];
    for (family, summaries, fallback) in families {
        for summary in summaries {
            let meta = &summary.metadata;
            if let Some(accuracy) = accuracy(meta) {
                if accuracy > stats.best_accuracy {
                    stats.best_accuracy = accuracy;
                    stats.best_model = Some(BestModel {
                        name: meta
                            .model_name
                            .clone()
                            .unwrap_or_else(|| summary.identity.model_name().to_string()),
                        family: family.to_string(),
                        id: summary.identity.clone(),
                    });
                }
            }

            if summary.created_at >= month_ago {
                stats.models_last_30_days += 1;
                if summary.created_at >= week_ago {
                    stats.models_last_7_days += 1;
                }
            }

            let label = model_label(meta).unwrap_or_else(|| fallback.to_string());
            *stats.model_types.entry(format!("{} - {}", family, label)).or_insert(0) += 1;
        }
    }
    stats
}

/// Evaluation accuracy, or a top-level `accuracy` left by older records
fn accuracy(meta: &ArtifactMetadata) -> Option<f64> {
    meta.accuracy()
        .or_else(|| meta.extra.get("accuracy").and_then(Value::as_f64))
        .filter(|a| a.is_finite())
}

fn model_label(meta: &ArtifactMetadata) -> Option<String> {
    meta.model_label()
        .map(str::to_string)
        .or_else(|| {
            meta.hyperparameters
                .get("architecture")
                .and_then(Value::as_str)
                .map(str::to_string)
        })
}
