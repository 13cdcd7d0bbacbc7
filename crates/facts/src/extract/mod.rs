mod cpp;

pub use cpp::CppExtractor;

use crate::model::FactModel;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// 提取失败: 源码不可读或无法解析
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("failed to extract facts from {}: {reason}", path.display())]
pub struct ExtractionError {
    pub path: PathBuf,
    pub reason: String,
}

impl ExtractionError {
    pub fn new(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn io(path: &Path, err: std::io::Error) -> Self {
        Self::new(path, format!("IO error: {err}"))
    }
}

pub type Result<T> = std::result::Result<T, ExtractionError>;

/// 构建配置
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct BuildConfig {
    /// include 搜索路径
    pub include_paths: Vec<PathBuf>,
    /// 容忍语法错误 (只记录警告)
    pub lenient: bool,
}

impl BuildConfig {
    pub fn with_include_paths(mut self, paths: impl IntoIterator<Item = PathBuf>) -> Self {
        self.include_paths.extend(paths);
        self
    }

    pub fn with_lenient(mut self, lenient: bool) -> Self {
        self.lenient = lenient;
        self
    }
}

/// 事实模型提取器 trait
///
/// 提取是阻塞操作 (文件 IO + 解析)，调用方负责放到阻塞线程池中执行。
pub trait FactExtractor: Send + Sync {
    fn extract(&self, path: &Path, config: &BuildConfig) -> Result<FactModel>;
}
