// Standard library imports
use std::fs;
use std::path::Path;

// Third party imports
use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{info, warn};

// Internal imports
use common::error::SentinelError;
use common::models::score::FeatureVector;

/// File model: hệ số tuyến tính với một hàng trọng số (sigmoid) hoặc một
/// hàng cho mỗi lớp (softmax, xác suất lớp dương được lấy).
#[derive(Debug, Deserialize)]
struct ModelFile {
    #[serde(default)]
    kind: Option<String>,
    #[serde(default)]
    feature_names: Option<Vec<String>>,
    weights: WeightsRepr,
    intercept: InterceptRepr,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WeightsRepr {
    Single(Vec<f64>),
    PerClass(Vec<Vec<f64>>),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum InterceptRepr {
    Single(f64),
    PerClass(Vec<f64>),
}

/// File scaler chuẩn: z = (x − mean) / scale
#[derive(Debug, Clone, Deserialize)]
struct ScalerFile {
    mean: Vec<f64>,
    scale: Vec<f64>,
}

/// Model chấm điểm uy tín đã nạp từ artifact. Đầu vào được sắp theo
/// thứ tự đặc trưng mà model khai báo; tên thiếu mặc định 0.
pub struct ReputationModel {
    feature_order: Vec<String>,
    weights: Vec<Vec<f64>>,
    intercepts: Vec<f64>,
    scaler: Option<ScalerFile>,
}

impl ReputationModel {
    /// Nạp model từ các file artifact. `features_path` (nếu có) ghi đè
    /// thứ tự đặc trưng khai báo trong file model.
    pub fn load(
        model_path: &Path,
        scaler_path: Option<&Path>,
        features_path: Option<&Path>,
    ) -> Result<Self> {
        let raw = fs::read_to_string(model_path)
            .with_context(|| format!("cannot read model file {}", model_path.display()))?;
        let model: ModelFile = serde_json::from_str(&raw)
            .with_context(|| format!("cannot parse model file {}", model_path.display()))?;

        let feature_order = match features_path {
            Some(path) => {
                let raw = fs::read_to_string(path)
                    .with_context(|| format!("cannot read features file {}", path.display()))?;
                serde_json::from_str::<Vec<String>>(&raw)
                    .with_context(|| format!("cannot parse features file {}", path.display()))?
            }
            None => model
                .feature_names
                .clone()
                .context("model file declares no feature_names and FEATURES_PATH is unset")?,
        };

        let weights = match model.weights {
            WeightsRepr::Single(row) => vec![row],
            WeightsRepr::PerClass(rows) => rows,
        };
        let intercepts = match model.intercept {
            InterceptRepr::Single(value) => vec![value],
            InterceptRepr::PerClass(values) => values,
        };

        for (i, row) in weights.iter().enumerate() {
            if row.len() != feature_order.len() {
                anyhow::bail!(
                    "model weight row {} has {} entries but {} features are declared",
                    i,
                    row.len(),
                    feature_order.len()
                );
            }
        }
        if intercepts.len() != weights.len() {
            anyhow::bail!(
                "model has {} intercepts but {} weight rows",
                intercepts.len(),
                weights.len()
            );
        }

        let scaler = match scaler_path {
            Some(path) => {
                let raw = fs::read_to_string(path)
                    .with_context(|| format!("cannot read scaler file {}", path.display()))?;
                let scaler: ScalerFile = serde_json::from_str(&raw)
                    .with_context(|| format!("cannot parse scaler file {}", path.display()))?;
                if scaler.mean.len() != feature_order.len()
                    || scaler.scale.len() != feature_order.len()
                {
                    anyhow::bail!(
                        "scaler dimensions ({}, {}) do not match {} features",
                        scaler.mean.len(),
                        scaler.scale.len(),
                        feature_order.len()
                    );
                }
                Some(scaler)
            }
            None => None,
        };

        info!(
            features = feature_order.len(),
            classes = weights.len(),
            kind = model.kind.as_deref().unwrap_or("logistic"),
            scaled = scaler.is_some(),
            "reputation model loaded"
        );

        Ok(Self {
            feature_order,
            weights,
            intercepts,
            scaler,
        })
    }

    /// Sắp FeatureVector theo thứ tự model khai báo; tên không biết → 0.
    fn ordered_input(&self, features: &FeatureVector) -> Vec<f64> {
        self.feature_order
            .iter()
            .map(|name| {
                features.get(name).unwrap_or_else(|| {
                    warn!(feature = %name, "model declares unknown feature, defaulting to 0");
                    0.0
                })
            })
            .collect()
    }

    /// Dự đoán xác suất lớp dương p ∈ [0,1]. NaN hoặc output không hữu hạn
    /// là lỗi ScoringFailed để engine rơi về fallback.
    pub fn predict(&self, features: &FeatureVector) -> Result<f64, SentinelError> {
        let mut input = self.ordered_input(features);

        if let Some(scaler) = &self.scaler {
            for (i, value) in input.iter_mut().enumerate() {
                let scale = scaler.scale[i];
                if scale.abs() > f64::EPSILON {
                    *value = (*value - scaler.mean[i]) / scale;
                } else {
                    *value -= scaler.mean[i];
                }
            }
        }

        let logits: Vec<f64> = self
            .weights
            .iter()
            .zip(&self.intercepts)
            .map(|(row, intercept)| {
                row.iter().zip(&input).map(|(w, x)| w * x).sum::<f64>() + intercept
            })
            .collect();

        let p = match logits.len() {
            // Một logit: sigmoid
            1 => sigmoid(logits[0]),
            // Hai lớp: softmax, lấy xác suất lớp dương (chỉ số 1)
            2 => {
                let max = logits[0].max(logits[1]);
                let exp0 = (logits[0] - max).exp();
                let exp1 = (logits[1] - max).exp();
                exp1 / (exp0 + exp1)
            }
            // Nhiều lớp: lấy xác suất của argmax
            _ => {
                let max = logits.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
                let exps: Vec<f64> = logits.iter().map(|l| (l - max).exp()).collect();
                let sum: f64 = exps.iter().sum();
                exps.iter().cloned().fold(0.0f64, f64::max) / sum
            }
        };

        if !p.is_finite() {
            return Err(SentinelError::ScoringFailed(
                "model produced a non-finite probability".to_string(),
            ));
        }
        Ok(p.clamp(0.0, 1.0))
    }
}

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

/// Module tests
#[cfg(test)]
mod tests {
    use super::*;

    fn model_with(weights: Vec<Vec<f64>>, intercepts: Vec<f64>) -> ReputationModel {
        ReputationModel {
            feature_order: vec![
                "transaction_count".to_string(),
                "failed_transactions".to_string(),
            ],
            weights,
            intercepts,
            scaler: None,
        }
    }

    /// Test một logit qua sigmoid
    #[test]
    fn test_single_logit_sigmoid() {
        let model = model_with(vec![vec![0.0, 0.0]], vec![0.0]);
        let p = model.predict(&FeatureVector::default()).unwrap();
        assert!((p - 0.5).abs() < 1e-9);

        let mut fv = FeatureVector::default();
        fv.transaction_count = 10.0;
        let positive = model_with(vec![vec![1.0, 0.0]], vec![0.0]);
        assert!(positive.predict(&fv).unwrap() > 0.99);
    }

    /// Test hai lớp qua softmax lấy lớp dương
    #[test]
    fn test_two_class_softmax() {
        // Lớp 1 (dương) thắng rõ rệt
        let model = model_with(vec![vec![0.0, 0.0], vec![0.0, 0.0]], vec![-2.0, 2.0]);
        let p = model.predict(&FeatureVector::default()).unwrap();
        assert!(p > 0.9);
    }

    /// Test scaler chuẩn hóa đầu vào
    #[test]
    fn test_scaler_applied() {
        let mut model = model_with(vec![vec![1.0, 0.0]], vec![0.0]);
        model.scaler = Some(ScalerFile {
            mean: vec![10.0, 0.0],
            scale: vec![2.0, 1.0],
        });
        let mut fv = FeatureVector::default();
        fv.transaction_count = 10.0;
        // (10-10)/2 = 0 → sigmoid(0) = 0.5
        let p = model.predict(&fv).unwrap();
        assert!((p - 0.5).abs() < 1e-9);
    }

    /// Test trọng số NaN sinh lỗi ScoringFailed thay vì lan ra ngoài
    #[test]
    fn test_nan_output_is_error() {
        let model = model_with(vec![vec![f64::NAN, 0.0]], vec![0.0]);
        let mut fv = FeatureVector::default();
        fv.transaction_count = 1.0;
        assert!(matches!(
            model.predict(&fv),
            Err(SentinelError::ScoringFailed(_))
        ));
    }

    /// Test nạp artifact từ file tạm, kể cả kích thước lệch
    #[test]
    fn test_load_from_files() {
        let dir = std::env::temp_dir().join(format!("sentinel-model-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let model_path = dir.join("model.json");
        let features_path = dir.join("features.json");

        std::fs::write(
            &model_path,
            r#"{"kind":"logistic","weights":[0.5,-0.25],"intercept":0.1}"#,
        )
        .unwrap();
        std::fs::write(
            &features_path,
            r#"["transaction_count","failed_transactions"]"#,
        )
        .unwrap();

        let model =
            ReputationModel::load(&model_path, None, Some(features_path.as_path())).unwrap();
        assert!(model.predict(&FeatureVector::default()).is_ok());

        // Số chiều lệch bị từ chối lúc nạp
        std::fs::write(&model_path, r#"{"weights":[0.5],"intercept":0.1}"#).unwrap();
        assert!(ReputationModel::load(&model_path, None, Some(features_path.as_path())).is_err());

        std::fs::remove_dir_all(&dir).ok();
    }
}
