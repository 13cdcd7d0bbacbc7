use crate::canonical::{structural_overlap, CanonicalModel};
use crate::vector::{aligned_vectors, cosine_similarity};
use facts::FactModel;
use metrics::MetricRegistry;
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SimilarityError {
    #[error("similarity not computable: {0}")]
    NotComputable(String),

    #[error("invalid weights: structural={structural}, metric={metric}")]
    InvalidWeights { structural: f64, metric: f64 },
}

pub type Result<T> = std::result::Result<T, SimilarityError>;

/// 结构项与度量项的权重
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SimilarityConfig {
    pub structural_weight: f64,
    pub metric_weight: f64,
}

impl Default for SimilarityConfig {
    fn default() -> Self {
        Self {
            structural_weight: 0.5,
            metric_weight: 0.5,
        }
    }
}

impl SimilarityConfig {
    pub fn new(structural_weight: f64, metric_weight: f64) -> Self {
        Self {
            structural_weight,
            metric_weight,
        }
    }

    /// 权重必须是非负有限数，且不能全为 0
    pub fn validate(&self) -> Result<()> {
        let valid = |w: f64| w.is_finite() && w >= 0.0;
        if !valid(self.structural_weight)
            || !valid(self.metric_weight)
            || self.structural_weight + self.metric_weight <= 0.0
        {
            return Err(SimilarityError::InvalidWeights {
                structural: self.structural_weight,
                metric: self.metric_weight,
            });
        }
        Ok(())
    }
}

/// 一次比较的结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimilarityScore {
    /// 综合分数 [0, 1]
    pub score: f64,
    /// 结构重叠 (缺失表示两侧都没有关系)
    pub structural: Option<f64>,
    /// 度量向量相似度 (缺失表示没有可对齐的度量)
    pub metric: Option<f64>,
    pub aligned_metrics: usize,
}

/// 相似度引擎
///
/// 借用会话持有的度量注册表；不缓存任何结果。
#[derive(Debug)]
pub struct SimilarityEngine<'r> {
    registry: &'r MetricRegistry,
    config: SimilarityConfig,
}

impl<'r> SimilarityEngine<'r> {
    pub fn new(registry: &'r MetricRegistry, config: SimilarityConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { registry, config })
    }

    pub fn config(&self) -> &SimilarityConfig {
        &self.config
    }

    /// 比较两个事实模型
    pub fn compare(&self, a: &FactModel, b: &FactModel) -> Result<SimilarityScore> {
        let structural = self.structural(a, b);
        let (metric, aligned_metrics) = self.metric(a, b);

        let score = match (structural, metric) {
            (Some(s), Some(m)) => {
                let ws = self.config.structural_weight;
                let wm = self.config.metric_weight;
                (ws * s + wm * m) / (ws + wm)
            }
            (Some(s), None) => s,
            (None, Some(m)) => m,
            (None, None) => {
                return Err(SimilarityError::NotComputable(
                    "models have neither relations nor comparable metrics".to_string(),
                ))
            }
        };

        let result = SimilarityScore {
            score: score.clamp(0.0, 1.0),
            structural,
            metric,
            aligned_metrics,
        };
        tracing::debug!(
            "similarity {:.4} (structural {:?}, metric {:?} over {} metrics)",
            result.score,
            result.structural,
            result.metric,
            result.aligned_metrics
        );
        Ok(result)
    }

    /// 结构项: 空模型特殊处理，否则为三元组多重集 Jaccard
    fn structural(&self, a: &FactModel, b: &FactModel) -> Option<f64> {
        match (a.is_empty(), b.is_empty()) {
            (true, true) => return Some(1.0),
            (true, false) | (false, true) => return Some(0.0),
            (false, false) => {}
        }
        structural_overlap(&CanonicalModel::new(a), &CanonicalModel::new(b))
    }

    /// 度量项: 任一侧为空模型时省略
    fn metric(&self, a: &FactModel, b: &FactModel) -> (Option<f64>, usize) {
        if a.is_empty() || b.is_empty() {
            return (None, 0);
        }
        let report_a = self.registry.compute_all(a);
        let report_b = self.registry.compute_all(b);
        let (va, vb) = aligned_vectors(&report_a, &report_b);
        if va.is_empty() {
            return (None, 0);
        }
        (Some(cosine_similarity(&va, &vb).clamp(0.0, 1.0)), va.len())
    }
}
