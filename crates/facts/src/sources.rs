//! 草图源文件收集与 include 解析

use crate::extract::{ExtractionError, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// 支持的源文件扩展名
const SOURCE_EXTENSIONS: &[&str] = &["ino", "pde", "cpp", "cc", "cxx", "c", "h", "hpp", "hh"];

/// Arduino 框架入口函数，名字本身具有结构含义
pub const ENTRY_POINTS: &[&str] = &["setup", "loop", "main"];

/// Arduino 预处理器为 .ino/.pde 隐式添加的头文件
pub const IMPLICIT_SKETCH_HEADER: &str = "Arduino.h";

pub fn is_entry_point(name: &str) -> bool {
    ENTRY_POINTS.contains(&name)
}

pub fn is_source_file(path: &Path) -> bool {
    extension(path)
        .map(|ext| SOURCE_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}

/// .ino / .pde 草图文件
pub fn is_sketch_file(path: &Path) -> bool {
    matches!(extension(path).as_deref(), Some("ino") | Some("pde"))
}

pub fn is_header_file(path: &Path) -> bool {
    matches!(extension(path).as_deref(), Some("h") | Some("hpp") | Some("hh"))
}

fn extension(path: &Path) -> Option<String> {
    path.extension().map(|e| e.to_string_lossy().to_lowercase())
}

/// 收集源码单元的文件: 单个文件或草图目录 (递归, 排序)
pub fn collect_sources(root: &Path) -> Result<Vec<PathBuf>> {
    let metadata = fs::metadata(root).map_err(|e| ExtractionError::io(root, e))?;
    if metadata.is_file() {
        return Ok(vec![root.to_path_buf()]);
    }

    let mut files = Vec::new();
    collect_dir(root, &mut files)?;
    files.sort();

    if files.is_empty() {
        return Err(ExtractionError::new(root, "no C/C++ sources found"));
    }
    Ok(files)
}

fn collect_dir(dir: &Path, files: &mut Vec<PathBuf>) -> Result<()> {
    for entry in fs::read_dir(dir).map_err(|e| ExtractionError::io(dir, e))? {
        let entry = entry.map_err(|e| ExtractionError::io(dir, e))?;
        let path = entry.path();

        if path.is_dir() {
            // 跳过隐藏目录和构建输出 (根目录本身不受限制)
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with('.') || name == "build" {
                continue;
            }
            collect_dir(&path, files)?;
        } else if is_source_file(&path) {
            files.push(path);
        }
    }
    Ok(())
}

/// #include 指令
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncludeDirective {
    pub target: String,
    /// <...> 形式
    pub system: bool,
}

/// 逐行扫描 #include 指令 (不展开宏)
pub fn scan_includes(content: &str) -> Vec<IncludeDirective> {
    let mut includes = Vec::new();

    for line in content.lines() {
        let line = line.trim_start();
        let Some(rest) = line.strip_prefix('#') else {
            continue;
        };
        let Some(rest) = rest.trim_start().strip_prefix("include") else {
            continue;
        };
        let rest = rest.trim_start();

        let (close, system) = match rest.chars().next() {
            Some('"') => ('"', false),
            Some('<') => ('>', true),
            _ => continue,
        };
        if let Some(end) = rest[1..].find(close) {
            let target = rest[1..1 + end].trim();
            if !target.is_empty() {
                includes.push(IncludeDirective {
                    target: target.to_string(),
                    system,
                });
            }
        }
    }

    includes
}

/// 解析 include 目标: 引号形式先查包含文件所在目录，再查搜索路径
pub fn resolve_include(
    directive: &IncludeDirective,
    from_file: &Path,
    include_paths: &[PathBuf],
) -> Option<PathBuf> {
    let local = if directive.system {
        None
    } else {
        from_file.parent().map(|dir| dir.join(&directive.target))
    };

    local
        .into_iter()
        .chain(include_paths.iter().map(|dir| dir.join(&directive.target)))
        .find(|candidate| candidate.is_file())
        .and_then(|found| found.canonicalize().ok())
}

/// 有效代码行数 (去掉空行和单行注释)
pub fn count_code_lines(content: &str) -> usize {
    let mut in_block = false;
    let mut count = 0;

    for line in content.lines() {
        let mut line = line.trim();
        if in_block {
            match line.find("*/") {
                Some(end) => {
                    in_block = false;
                    line = line[end + 2..].trim();
                }
                None => continue,
            }
        }
        if line.starts_with("/*") && !line.contains("*/") {
            in_block = true;
            continue;
        }
        if line.is_empty() || line.starts_with("//") {
            continue;
        }
        count += 1;
    }

    count
}
