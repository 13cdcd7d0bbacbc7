use serde::Serialize;
use std::fmt;

/// 度量结果
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricValue {
    Value(f64),
    /// 无法计算 (附原因)
    NotComputable(String),
}

impl MetricValue {
    /// 非有限数值转为 NotComputable
    pub fn from_f64(value: f64) -> Self {
        if value.is_finite() {
            Self::Value(value)
        } else {
            Self::NotComputable(format!("non-finite result: {value}"))
        }
    }

    pub fn not_computable(reason: impl Into<String>) -> Self {
        Self::NotComputable(reason.into())
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Value(v) => Some(*v),
            Self::NotComputable(_) => None,
        }
    }

    pub fn is_computable(&self) -> bool {
        matches!(self, Self::Value(_))
    }
}

impl From<usize> for MetricValue {
    fn from(count: usize) -> Self {
        Self::Value(count as f64)
    }
}

impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(v) => write!(f, "{v}"),
            Self::NotComputable(reason) => write!(f, "not computable ({reason})"),
        }
    }
}
