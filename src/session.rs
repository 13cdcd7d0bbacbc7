//! 分析会话 - 持有注册表、缓存和配置

use crate::config::SessionConfig;
use facts::{
    BuildConfig, CppExtractor, ExtractionError, FactExtractor, FactModel, FactModelCache,
    SourceIdentity,
};
use metrics::{MetricError, MetricRegistry, MetricResult, MetricValue};
use similarity::{SimilarityEngine, SimilarityError, SimilarityScore};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    #[error(transparent)]
    Metric(#[from] MetricError),

    #[error(transparent)]
    Similarity(#[from] SimilarityError),
}

pub type Result<T> = std::result::Result<T, SessionError>;

/// 分析会话
pub struct Session {
    registry: MetricRegistry,
    cache: Arc<FactModelCache>,
    config: SessionConfig,
}

impl Session {
    /// 使用内置度量和 C++ 提取器
    pub fn new(config: SessionConfig) -> Self {
        Self::with_extractor(config, Arc::new(CppExtractor::new()))
    }

    pub fn with_extractor(config: SessionConfig, extractor: Arc<dyn FactExtractor>) -> Self {
        Self {
            registry: MetricRegistry::builtin(),
            cache: Arc::new(FactModelCache::new(extractor, config.cache_capacity)),
            config,
        }
    }

    #[cfg(test)]
    pub fn with_registry(mut self, registry: MetricRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn registry(&self) -> &MetricRegistry {
        &self.registry
    }

    pub fn cache(&self) -> &Arc<FactModelCache> {
        &self.cache
    }

    /// 计算源码单元的所有度量 (发现顺序)
    pub async fn run_metrics(&self, path: &Path) -> Result<Vec<MetricResult>> {
        let model = self.load(path).await?;
        Ok(self.registry.compute_all(&model).into_results())
    }

    /// 计算单个度量；未知名字在提取之前报错
    pub async fn run_metric(&self, path: &Path, name: &str) -> Result<MetricValue> {
        if !self.registry.contains(name) {
            return Err(MetricError::UnknownMetric {
                name: name.to_string(),
            }
            .into());
        }
        let model = self.load(path).await?;
        Ok(self.registry.compute(name, &model)?)
    }

    /// 比较原项目与分支，两个模型并发提取
    pub async fn run_similarity(&self, original: &Path, fork: &Path) -> Result<SimilarityScore> {
        let engine = SimilarityEngine::new(&self.registry, self.config.similarity)?;
        let (a, b) = tokio::try_join!(self.load(original), self.load(fork))?;
        Ok(engine.compare(&a, &b)?)
    }

    /// 解析标识并从缓存获取事实模型，整体受超时限制
    pub async fn load(&self, path: &Path) -> Result<Arc<FactModel>> {
        let build = self.config.build_config();
        let timeout = self.config.timeout;

        match tokio::time::timeout(timeout, self.load_inner(path, build)).await {
            Ok(result) => Ok(result?),
            Err(_) => {
                tracing::warn!("extraction of {} timed out after {:?}", path.display(), timeout);
                Err(ExtractionError::new(path, format!("timed out after {}s", timeout.as_secs_f64())).into())
            }
        }
    }

    async fn load_inner(
        &self,
        path: &Path,
        build: BuildConfig,
    ) -> std::result::Result<Arc<FactModel>, ExtractionError> {
        let owned: PathBuf = path.to_path_buf();
        let resolve_config = build.clone();
        let identity = tokio::task::spawn_blocking(move || SourceIdentity::resolve(&owned, &resolve_config))
            .await
            .map_err(|e| ExtractionError::new(path, format!("identity task failed: {e}")))??;

        tracing::debug!("loading {}", identity);
        self.cache.get(&identity, &build).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use facts::{EntityKind, ModelBuilder};
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::{tempdir, TempDir};

    /// 计数提取器，返回固定的小模型
    #[derive(Default)]
    struct CountingExtractor {
        calls: AtomicUsize,
        delay: Duration,
    }

    impl FactExtractor for CountingExtractor {
        fn extract(
            &self,
            _path: &Path,
            _config: &BuildConfig,
        ) -> std::result::Result<FactModel, ExtractionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(self.delay);
            let mut b = ModelBuilder::default();
            let file = b.add_entity(EntityKind::File, "a.ino");
            let setup = b.add_entity(EntityKind::Function, "setup");
            b.add_relation(file, setup, facts::RelationKind::Declares);
            Ok(b.build().unwrap())
        }
    }

    fn write_sketch(dir: &TempDir, name: &str, body: &str) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, body).unwrap();
        path
    }

    const BLINK: &str = "#define LED 13\nvoid blink() { digitalWrite(LED, HIGH); }\nvoid setup() { pinMode(LED, OUTPUT); }\nvoid loop() { blink(); }\n";

    #[tokio::test]
    async fn test_run_metrics_in_discovery_order() {
        let dir = tempdir().unwrap();
        let path = write_sketch(&dir, "blink.ino", BLINK);
        let session = Session::new(SessionConfig::default());

        let results = session.run_metrics(&path).await.unwrap();
        let names: Vec<_> = results.iter().map(|r| r.name.clone()).collect();
        let discovered: Vec<_> = session.registry().discover().into_iter().map(|d| d.name).collect();
        assert_eq!(names, discovered);

        let functions = results.iter().find(|r| r.name == "function_count").unwrap();
        assert_eq!(functions.value, MetricValue::Value(3.0));
    }

    #[tokio::test]
    async fn test_run_metric_unknown_checked_before_extraction() {
        let extractor = Arc::new(CountingExtractor::default());
        let session = Session::with_extractor(SessionConfig::default(), extractor.clone());

        let err = session
            .run_metric(Path::new("/does/not/exist.ino"), "no_such_metric")
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Metric(MetricError::UnknownMetric { .. })));
        assert_eq!(extractor.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_run_metric_single() {
        let dir = tempdir().unwrap();
        let path = write_sketch(&dir, "blink.ino", BLINK);
        let session = Session::new(SessionConfig::default());

        let value = session.run_metric(&path, "macro_count").await.unwrap();
        assert_eq!(value, MetricValue::Value(1.0));
    }

    #[tokio::test]
    async fn test_missing_path_is_extraction_error() {
        let session = Session::new(SessionConfig::default());
        let err = session
            .run_metrics(Path::new("/does/not/exist.ino"))
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Extraction(_)));
    }

    #[tokio::test]
    async fn test_run_similarity_self_is_one() {
        let dir = tempdir().unwrap();
        let path = write_sketch(&dir, "blink.ino", BLINK);
        let session = Session::new(SessionConfig::default());

        let score = session.run_similarity(&path, &path).await.unwrap();
        assert_eq!(score.score, 1.0);
        // 同一标识只提取一次
        assert_eq!(session.cache().stats().extractions, 1);
    }

    #[tokio::test]
    async fn test_run_similarity_rejects_invalid_weights() {
        let extractor = Arc::new(CountingExtractor::default());
        let mut config = SessionConfig::default();
        config.similarity.structural_weight = -1.0;
        let session = Session::with_extractor(config, extractor.clone());

        let err = session
            .run_similarity(Path::new("a.ino"), Path::new("b.ino"))
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Similarity(SimilarityError::InvalidWeights { .. })));
        assert_eq!(extractor.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_extraction_timeout() {
        let dir = tempdir().unwrap();
        let path = write_sketch(&dir, "slow.ino", "void setup() {}\n");
        let extractor = Arc::new(CountingExtractor {
            calls: AtomicUsize::new(0),
            delay: Duration::from_millis(300),
        });
        let config = SessionConfig {
            timeout: Duration::from_millis(20),
            ..SessionConfig::default()
        };
        let session = Session::with_extractor(config, extractor);

        let err = session.run_metrics(&path).await.unwrap_err();
        match err {
            SessionError::Extraction(e) => assert!(e.reason.contains("timed out")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_custom_registry() {
        let dir = tempdir().unwrap();
        let path = write_sketch(&dir, "a.ino", "void setup() {}\n");
        let mut registry = MetricRegistry::new();
        registry
            .register_fn("entities", "Entity count", |m| m.entity_count().into())
            .unwrap();
        let session = Session::with_extractor(SessionConfig::default(), Arc::new(CountingExtractor::default()))
            .with_registry(registry);

        let results = session.run_metrics(&path).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].value, MetricValue::Value(2.0));
    }
}
