//! 源码单元标识 - 规范路径 + 内容哈希 (含传递 include)

use crate::extract::{BuildConfig, ExtractionError, Result};
use crate::sources::{collect_sources, resolve_include, scan_includes};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// 源码单元标识
///
/// 任一文件 (包括传递 include 的头文件) 内容变化都会得到新的 digest。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceIdentity {
    path: PathBuf,
    digest: String,
}

impl SourceIdentity {
    /// 读取源码单元及其可解析的 include，计算标识
    pub fn resolve(path: &Path, config: &BuildConfig) -> Result<Self> {
        let canonical = path.canonicalize().map_err(|e| ExtractionError::io(path, e))?;
        let roots = collect_sources(&canonical)?;

        let mut hasher = Sha256::new();
        let mut visited = HashSet::new();
        let mut stack: Vec<PathBuf> = roots.into_iter().rev().collect();

        // 深度优先，按文件中 include 出现顺序遍历
        while let Some(file) = stack.pop() {
            if !visited.insert(file.clone()) {
                continue;
            }
            let content = fs::read(&file).map_err(|e| ExtractionError::io(&file, e))?;

            hasher.update(file.to_string_lossy().as_bytes());
            hasher.update([0u8]);
            hasher.update((content.len() as u64).to_le_bytes());
            hasher.update(&content);

            let text = String::from_utf8_lossy(&content);
            let mut children: Vec<PathBuf> = scan_includes(&text)
                .iter()
                .filter_map(|inc| resolve_include(inc, &file, &config.include_paths))
                .collect();
            children.reverse();
            stack.extend(children);
        }

        let result = hasher.finalize();
        let digest = result.iter().take(16).map(|b| format!("{b:02x}")).collect();

        tracing::debug!("identity {} -> {} ({} files)", canonical.display(), digest, visited.len());

        Ok(Self {
            path: canonical,
            digest,
        })
    }

    /// 直接构造 (测试和自定义提取器使用)
    pub fn new(path: impl Into<PathBuf>, digest: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            digest: digest.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn digest(&self) -> &str {
        &self.digest
    }
}

impl fmt::Display for SourceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let short: String = self.digest.chars().take(12).collect();
        write!(f, "{}@{}", self.path.display(), short)
    }
}
