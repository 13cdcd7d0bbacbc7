use crate::value::MetricValue;
use facts::FactModel;
use rayon::prelude::*;
use serde::Serialize;
use std::any::Any;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use thiserror::Error;

/// 参与发现的标签
pub const METRIC_TAG: &str = "metric";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MetricError {
    #[error("unknown metric: {name}")]
    UnknownMetric { name: String },

    #[error("metric already registered: {name}")]
    DuplicateMetric { name: String },
}

pub type Result<T> = std::result::Result<T, MetricError>;

/// 命名空间中的度量定义
#[derive(Debug, Clone, Copy)]
pub struct MetricDef {
    pub name: &'static str,
    pub description: &'static str,
    /// 只有带 `metric` 标签的定义会被注册
    pub tags: &'static [&'static str],
    pub compute: fn(&FactModel) -> MetricValue,
}

impl MetricDef {
    pub fn is_metric(&self) -> bool {
        self.tags.contains(&METRIC_TAG)
    }
}

/// 已注册度量的描述
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricDescriptor {
    pub name: String,
    pub description: String,
    pub tag: &'static str,
}

type ComputeFn = Arc<dyn Fn(&FactModel) -> MetricValue + Send + Sync>;

struct Entry {
    descriptor: MetricDescriptor,
    compute: ComputeFn,
}

/// 度量注册表
///
/// 按注册顺序保存度量；发现顺序在注册表生命周期内保持稳定。
#[derive(Default)]
pub struct MetricRegistry {
    entries: Vec<Entry>,
    index: HashMap<String, usize>,
}

impl MetricRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 从命名空间构建，只保留带 `metric` 标签的定义
    pub fn from_namespace(namespace: &[MetricDef]) -> Result<Self> {
        let mut registry = Self::new();
        for def in namespace.iter().filter(|d| d.is_metric()) {
            registry.register(*def)?;
        }
        Ok(registry)
    }

    /// 内置度量
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        for def in crate::builtin::BUILTIN_METRICS.iter().filter(|d| d.is_metric()) {
            if let Err(e) = registry.register(*def) {
                tracing::warn!("skipping builtin metric: {}", e);
            }
        }
        registry
    }

    pub fn register(&mut self, def: MetricDef) -> Result<()> {
        let compute = def.compute;
        self.insert(def.name, def.description, Arc::new(compute))
    }

    /// 注册闭包形式的度量
    pub fn register_fn<F>(&mut self, name: &str, description: &str, compute: F) -> Result<()>
    where
        F: Fn(&FactModel) -> MetricValue + Send + Sync + 'static,
    {
        self.insert(name, description, Arc::new(compute))
    }

    fn insert(&mut self, name: &str, description: &str, compute: ComputeFn) -> Result<()> {
        if self.index.contains_key(name) {
            return Err(MetricError::DuplicateMetric {
                name: name.to_string(),
            });
        }
        self.index.insert(name.to_string(), self.entries.len());
        self.entries.push(Entry {
            descriptor: MetricDescriptor {
                name: name.to_string(),
                description: description.to_string(),
                tag: METRIC_TAG,
            },
            compute,
        });
        Ok(())
    }

    /// 发现所有度量 (注册顺序)
    pub fn discover(&self) -> Vec<MetricDescriptor> {
        self.entries.iter().map(|e| e.descriptor.clone()).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// 计算单个度量
    pub fn compute(&self, name: &str, model: &FactModel) -> Result<MetricValue> {
        let entry = self
            .index
            .get(name)
            .map(|&i| &self.entries[i])
            .ok_or_else(|| MetricError::UnknownMetric {
                name: name.to_string(),
            })?;
        Ok(run_isolated(entry, model))
    }

    /// 并行计算所有度量，结果保持发现顺序
    ///
    /// 单个度量失败 (NotComputable / 非有限值 / panic) 不影响其余度量。
    pub fn compute_all(&self, model: &FactModel) -> MetricReport {
        let results = self
            .entries
            .par_iter()
            .map(|entry| MetricResult {
                name: entry.descriptor.name.clone(),
                value: run_isolated(entry, model),
            })
            .collect();
        MetricReport { results }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for MetricRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricRegistry")
            .field("metrics", &self.index.len())
            .finish()
    }
}

fn run_isolated(entry: &Entry, model: &FactModel) -> MetricValue {
    let name = &entry.descriptor.name;
    let value = match catch_unwind(AssertUnwindSafe(|| (entry.compute)(model))) {
        Ok(MetricValue::Value(v)) => MetricValue::from_f64(v),
        Ok(value) => value,
        Err(payload) => MetricValue::NotComputable(format!("metric panicked: {}", panic_message(&*payload))),
    };

    if let MetricValue::NotComputable(reason) = &value {
        tracing::warn!("metric {} not computable: {}", name, reason);
    }
    value
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// 单个度量的结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricResult {
    pub name: String,
    #[serde(flatten)]
    pub value: MetricValue,
}

/// 一次 compute_all 的有序结果
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(transparent)]
pub struct MetricReport {
    results: Vec<MetricResult>,
}

impl MetricReport {
    pub fn get(&self, name: &str) -> Option<&MetricValue> {
        self.results.iter().find(|r| r.name == name).map(|r| &r.value)
    }

    pub fn iter(&self) -> impl Iterator<Item = &MetricResult> {
        self.results.iter()
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn into_results(self) -> Vec<MetricResult> {
        self.results
    }
}

impl IntoIterator for MetricReport {
    type Item = MetricResult;
    type IntoIter = std::vec::IntoIter<MetricResult>;

    fn into_iter(self) -> Self::IntoIter {
        self.results.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use facts::EntityKind;

    fn entity_count(model: &FactModel) -> MetricValue {
        model.entity_count().into()
    }

    fn relation_count(model: &FactModel) -> MetricValue {
        model.relation_count().into()
    }

    fn always_panics(_: &FactModel) -> MetricValue {
        panic!("boom")
    }

    const NAMESPACE: &[MetricDef] = &[
        MetricDef {
            name: "entity_count",
            description: "Number of entities",
            tags: &[METRIC_TAG],
            compute: entity_count,
        },
        MetricDef {
            name: "debug_dump",
            description: "Helper without the metric tag",
            tags: &["helper"],
            compute: entity_count,
        },
        MetricDef {
            name: "relation_count",
            description: "Number of relations",
            tags: &["structure", METRIC_TAG],
            compute: relation_count,
        },
    ];

    fn sample_model() -> FactModel {
        let mut b = FactModel::builder();
        let file = b.add_entity(EntityKind::File, "a.ino");
        let func = b.add_entity(EntityKind::Function, "setup");
        b.add_relation(file, func, facts::RelationKind::Declares);
        b.build().unwrap()
    }

    #[test]
    fn test_from_namespace_filters_by_tag() {
        let registry = MetricRegistry::from_namespace(NAMESPACE).unwrap();
        let names: Vec<_> = registry.discover().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["entity_count", "relation_count"]);
        assert!(!registry.contains("debug_dump"));
    }

    #[test]
    fn test_discover_is_stable() {
        let registry = MetricRegistry::from_namespace(NAMESPACE).unwrap();
        assert_eq!(registry.discover(), registry.discover());
        assert!(registry.discover().iter().all(|d| d.tag == METRIC_TAG));
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut registry = MetricRegistry::from_namespace(NAMESPACE).unwrap();
        let err = registry
            .register_fn("entity_count", "again", |_| MetricValue::Value(0.0))
            .unwrap_err();
        assert_eq!(
            err,
            MetricError::DuplicateMetric {
                name: "entity_count".to_string()
            }
        );
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_compute_unknown_metric() {
        let registry = MetricRegistry::from_namespace(NAMESPACE).unwrap();
        let err = registry.compute("nope", &sample_model()).unwrap_err();
        assert!(matches!(err, MetricError::UnknownMetric { name } if name == "nope"));
    }

    #[test]
    fn test_compute_single() {
        let registry = MetricRegistry::from_namespace(NAMESPACE).unwrap();
        let value = registry.compute("relation_count", &sample_model()).unwrap();
        assert_eq!(value, MetricValue::Value(1.0));
    }

    #[test]
    fn test_compute_all_isolates_faults() {
        let mut registry = MetricRegistry::new();
        registry.register_fn("first", "", |_| MetricValue::Value(1.0)).unwrap();
        registry
            .register(MetricDef {
                name: "panics",
                description: "",
                tags: &[METRIC_TAG],
                compute: always_panics,
            })
            .unwrap();
        registry.register_fn("nan", "", |_| MetricValue::Value(f64::NAN)).unwrap();
        registry
            .register_fn("refuses", "", |_| MetricValue::not_computable("no functions"))
            .unwrap();
        registry.register_fn("last", "", |m| m.entity_count().into()).unwrap();

        let report = registry.compute_all(&sample_model());
        let names: Vec<_> = report.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["first", "panics", "nan", "refuses", "last"]);

        assert_eq!(report.get("first"), Some(&MetricValue::Value(1.0)));
        assert!(matches!(report.get("panics"), Some(MetricValue::NotComputable(r)) if r.contains("boom")));
        assert!(!report.get("nan").unwrap().is_computable());
        assert_eq!(report.get("refuses"), Some(&MetricValue::not_computable("no functions")));
        assert_eq!(report.get("last"), Some(&MetricValue::Value(2.0)));
    }

    #[test]
    fn test_closure_metric_captures_state() {
        let weight = 3.0;
        let mut registry = MetricRegistry::new();
        registry
            .register_fn("weighted", "", move |m| MetricValue::Value(weight * m.entity_count() as f64))
            .unwrap();
        assert_eq!(registry.compute("weighted", &sample_model()).unwrap(), MetricValue::Value(6.0));
    }

    #[test]
    fn test_report_serializes_in_order() {
        let registry = MetricRegistry::from_namespace(NAMESPACE).unwrap();
        let json = serde_json::to_value(registry.compute_all(&sample_model())).unwrap();
        assert_eq!(
            json,
            serde_json::json!([
                { "name": "entity_count", "value": 2.0 },
                { "name": "relation_count", "value": 1.0 },
            ])
        );
    }

    #[test]
    fn test_builtin_registry_is_populated() {
        let registry = MetricRegistry::builtin();
        assert!(!registry.is_empty());
        assert!(registry.contains("function_count"));
    }
}
