//! 会话配置

use facts::BuildConfig;
use similarity::SimilarityConfig;
use std::path::PathBuf;
use std::time::Duration;

/// 会话配置
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// 头文件搜索路径
    pub include_paths: Vec<PathBuf>,
    /// 语法错误只记录警告
    pub lenient: bool,
    /// 缓存的事实模型数量上限
    pub cache_capacity: usize,
    /// 单次提取超时
    pub timeout: Duration,
    pub similarity: SimilarityConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            include_paths: Vec::new(),
            lenient: false,
            cache_capacity: 16,
            timeout: Duration::from_secs(60),
            similarity: SimilarityConfig::default(),
        }
    }
}

impl SessionConfig {
    /// 从环境变量加载配置
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(v) = lookup("SKETCHFORK_INCLUDE") {
            config.include_paths = std::env::split_paths(&v)
                .filter(|p| !p.as_os_str().is_empty())
                .collect();
        }

        if let Some(v) = lookup("SKETCHFORK_CACHE_CAPACITY") {
            if let Ok(c) = v.parse() {
                config.cache_capacity = c;
            }
        }

        if let Some(v) = lookup("SKETCHFORK_TIMEOUT_SECS") {
            if let Ok(secs) = v.parse() {
                config.timeout = Duration::from_secs(secs);
            }
        }

        if let Some(v) = lookup("SKETCHFORK_LENIENT") {
            config.lenient = matches!(v.as_str(), "1" | "true" | "yes");
        }

        if let Some(v) = lookup("SKETCHFORK_STRUCTURAL_WEIGHT") {
            if let Ok(w) = v.parse() {
                config.similarity.structural_weight = w;
            }
        }

        if let Some(v) = lookup("SKETCHFORK_METRIC_WEIGHT") {
            if let Ok(w) = v.parse() {
                config.similarity.metric_weight = w;
            }
        }

        config
    }

    pub fn build_config(&self) -> BuildConfig {
        BuildConfig::default()
            .with_include_paths(self.include_paths.iter().cloned())
            .with_lenient(self.lenient)
    }
}
