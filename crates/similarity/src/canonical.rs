//! 规范化 - 只由结构决定的实体标记
//!
//! 标记中不出现项目内的自由标识符，因此重命名和声明顺序都不影响结果。
//! 外部库实体 (如 `digitalWrite`) 和框架入口 (setup/loop/main) 的名字保留，
//! 它们的名字本身就是结构的一部分。

use facts::sources::is_entry_point;
use facts::{attr, Entity, EntityKind, FactModel, RelationKind};
use sha2::{Digest, Sha256};
use std::collections::HashMap;

/// 关系三元组: (源标记, 目标标记, 关系种类)
pub type Triple = (String, String, RelationKind);

/// 规范化后的模型
#[derive(Debug, Clone)]
pub struct CanonicalModel {
    /// entity index -> 标记
    tokens: Vec<String>,
    /// 三元组多重集
    triples: HashMap<Triple, usize>,
}

impl CanonicalModel {
    pub fn new(model: &FactModel) -> Self {
        let tokens: Vec<String> = model.entities().iter().map(|e| entity_token(model, e)).collect();

        let mut triples: HashMap<Triple, usize> = HashMap::new();
        for rel in model.relations() {
            let key = (
                tokens[rel.source.index()].clone(),
                tokens[rel.target.index()].clone(),
                rel.kind,
            );
            *triples.entry(key).or_insert(0) += 1;
        }

        Self { tokens, triples }
    }

    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    pub fn triples(&self) -> &HashMap<Triple, usize> {
        &self.triples
    }

    /// 三元组总数 (含重复)
    pub fn triple_count(&self) -> usize {
        self.triples.values().sum()
    }
}

/// 基础标记: kind[:role][@name]
pub fn base_token(entity: &Entity) -> String {
    let mut token = entity.kind.as_str().to_string();
    if let Some(role) = entity.attr(attr::ROLE) {
        token.push(':');
        token.push_str(role);
    }
    let keeps_name = entity.is_external()
        || (entity.kind == EntityKind::Function && is_entry_point(entity.name()));
    if keeps_name {
        token.push('@');
        token.push_str(entity.name());
    }
    token
}

/// 实体标记
///
/// Unit/File 只用基础标记；其余实体附加出边形状 (关系种类 + 目标基础标记，排序后)
/// 和圈复杂度的哈希。
pub fn entity_token(model: &FactModel, entity: &Entity) -> String {
    let base = base_token(entity);
    if matches!(entity.kind, EntityKind::Unit | EntityKind::File) {
        return base;
    }

    let mut shape: Vec<String> = model
        .outgoing(entity.id)
        .filter_map(|r| model.entity(r.target).map(|t| format!("{}>{}", r.kind, base_token(t))))
        .collect();
    shape.sort();

    let mut hasher = Sha256::new();
    hasher.update(base.as_bytes());
    for edge in &shape {
        hasher.update([0u8]);
        hasher.update(edge.as_bytes());
    }
    if let Some(complexity) = entity.attr(attr::COMPLEXITY) {
        hasher.update(b"\0complexity=");
        hasher.update(complexity.as_bytes());
    }
    let digest = hasher.finalize();
    let hex: String = digest.iter().take(8).map(|b| format!("{b:02x}")).collect();

    format!("{base}#{hex}")
}

/// 多重集 Jaccard: Σmin / Σmax
///
/// 两侧都没有关系时返回 None。
pub fn structural_overlap(a: &CanonicalModel, b: &CanonicalModel) -> Option<f64> {
    let mut min_sum = 0usize;
    let mut max_sum = 0usize;

    for (key, &count_a) in &a.triples {
        let count_b = b.triples.get(key).copied().unwrap_or(0);
        min_sum += count_a.min(count_b);
        max_sum += count_a.max(count_b);
    }
    for (key, &count_b) in &b.triples {
        if !a.triples.contains_key(key) {
            max_sum += count_b;
        }
    }

    if max_sum == 0 {
        return None;
    }
    Some(min_sum as f64 / max_sum as f64)
}
