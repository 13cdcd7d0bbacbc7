//! 度量向量对齐与余弦相似度

use metrics::MetricReport;
use ndarray::Array1;
use std::collections::BTreeMap;

/// 余弦相似度
///
/// 用 `dot / sqrt(|a|² · |b|²)` 计算，相同向量得到精确的 1.0。
/// 两个零向量视为相同 (1.0)，只有一侧为零向量时为 0.0。
pub fn cosine_similarity(a: &Array1<f64>, b: &Array1<f64>) -> f64 {
    let dot = a.dot(b);
    let norm_a = a.dot(a);
    let norm_b = b.dot(b);
    match (norm_a == 0.0, norm_b == 0.0) {
        (true, true) => 1.0,
        (true, false) | (false, true) => 0.0,
        (false, false) => dot / (norm_a * norm_b).sqrt(),
    }
}

/// 按两者中较大的绝对值归一化一对数值；两者都为 0 时视为相同 (1, 1)
pub fn normalize_pair(x: f64, y: f64) -> (f64, f64) {
    let scale = x.abs().max(y.abs());
    if scale == 0.0 {
        (1.0, 1.0)
    } else {
        (x / scale, y / scale)
    }
}

/// 按名字对齐两份度量报告，丢弃任一侧不可计算的度量
///
/// 按名字排序，结果与参数顺序无关。
pub fn aligned_vectors(a: &MetricReport, b: &MetricReport) -> (Array1<f64>, Array1<f64>) {
    let mut pairs: BTreeMap<&str, (f64, f64)> = BTreeMap::new();
    for result in a.iter() {
        let left = result.value.as_f64();
        let right = b.get(&result.name).and_then(|v| v.as_f64());
        if let (Some(x), Some(y)) = (left, right) {
            pairs.insert(result.name.as_str(), normalize_pair(x, y));
        }
    }

    let (left, right): (Vec<f64>, Vec<f64>) = pairs.into_values().unzip();
    (Array1::from(left), Array1::from(right))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_cosine_similarity_identical_vectors() {
        let a = array![0.3, 1.0, 0.7];
        assert_eq!(cosine_similarity(&a, &a.clone()), 1.0);
    }

    #[test]
    fn test_cosine_similarity_orthogonal_vectors() {
        let a = array![1.0, 0.0, 0.0];
        let b = array![0.0, 1.0, 0.0];
        let sim = cosine_similarity(&a, &b);
        assert!(sim.abs() < 1e-12);
    }

    #[test]
    fn test_cosine_similarity_zero_vector() {
        let a = array![0.0, 0.0, 0.0];
        let b = array![1.0, 2.0, 3.0];
        assert_eq!(cosine_similarity(&a, &b), 0.0);
        assert_eq!(cosine_similarity(&a, &a), 1.0);
    }

    #[test]
    fn test_cosine_similarity_symmetric() {
        let a = array![1.0, 0.25, 0.9];
        let b = array![0.5, 1.0, 1.0];
        assert_eq!(cosine_similarity(&a, &b), cosine_similarity(&b, &a));
        assert!(cosine_similarity(&a, &b) > 0.7);
    }

    #[test]
    fn test_normalize_pair() {
        assert_eq!(normalize_pair(0.0, 0.0), (1.0, 1.0));
        assert_eq!(normalize_pair(4.0, 2.0), (1.0, 0.5));
        assert_eq!(normalize_pair(-2.0, 1.0), (-1.0, 0.5));
    }
}
