use std::collections::{BTreeMap, HashSet};
use std::fmt;
use thiserror::Error;

/// 常用属性名
pub mod attr {
    /// 限定名
    pub const NAME: &str = "name";
    /// 源码范围: "path:start-end"
    pub const EXTENT: &str = "extent";
    /// 外部库实体 (未在项目中定义)
    pub const EXTERNAL: &str = "external";
    /// 行数
    pub const LINES: &str = "lines";
    /// 圈复杂度
    pub const COMPLEXITY: &str = "complexity";
    /// 结构角色: source/header/sketch, parameter/local/global/member/enumerator
    pub const ROLE: &str = "role";
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    #[error("relation {kind} {source_id} -> {target_id} references an entity outside the model")]
    DanglingRelation {
        source_id: EntityId,
        target_id: EntityId,
        kind: RelationKind,
    },
    #[error("duplicate entity id {0}")]
    DuplicateEntity(EntityId),
}

/// 实体 ID (模型内唯一)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityId(pub u32);

impl EntityId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityKind {
    Unit,
    File,
    Function,
    Type,
    Variable,
    Macro,
}

impl EntityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Unit => "unit",
            EntityKind::File => "file",
            EntityKind::Function => "function",
            EntityKind::Type => "type",
            EntityKind::Variable => "variable",
            EntityKind::Macro => "macro",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RelationKind {
    Contains,
    Declares,
    Calls,
    References,
    Inherits,
    Includes,
}

impl RelationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RelationKind::Contains => "contains",
            RelationKind::Declares => "declares",
            RelationKind::Calls => "calls",
            RelationKind::References => "references",
            RelationKind::Inherits => "inherits",
            RelationKind::Includes => "includes",
        }
    }
}

impl fmt::Display for RelationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 实体 - 声明的程序元素
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    pub id: EntityId,
    pub kind: EntityKind,
    pub attributes: BTreeMap<String, String>,
}

impl Entity {
    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    /// 限定名 (缺失时为空串)
    pub fn name(&self) -> &str {
        self.attr(attr::NAME).unwrap_or("")
    }

    /// 短名字: "Foo::bar" -> "bar"
    pub fn short_name(&self) -> &str {
        let name = self.name();
        name.rsplit("::").next().unwrap_or(name)
    }

    pub fn is_external(&self) -> bool {
        self.attr(attr::EXTERNAL) == Some("true")
    }

    /// 数值属性 (lines, complexity)
    pub fn numeric_attr(&self, key: &str) -> Option<f64> {
        self.attr(key).and_then(|v| v.parse().ok())
    }
}

/// 关系 - 有向带类型的边
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Relation {
    pub source: EntityId,
    pub target: EntityId,
    pub kind: RelationKind,
}

/// 事实模型 - 一个源码单元的不可变结构快照
///
/// 只能通过 [`ModelBuilder`] 构建，构建后不提供任何修改接口。
#[derive(Debug, Clone)]
pub struct FactModel {
    entities: Vec<Entity>,
    relations: Vec<Relation>,
    /// entity index -> 出边在 relations 中的下标
    outgoing: Vec<Vec<usize>>,
    /// entity index -> 入边在 relations 中的下标
    incoming: Vec<Vec<usize>>,
}

impl FactModel {
    pub fn builder() -> ModelBuilder {
        ModelBuilder::default()
    }

    /// 从已有实体和关系构建，校验 ID 唯一性和闭包性
    pub fn from_parts(entities: Vec<Entity>, relations: Vec<Relation>) -> Result<Self, ModelError> {
        let mut entities = entities;
        entities.sort_by_key(|e| e.id);

        let mut seen = HashSet::with_capacity(entities.len());
        for entity in &entities {
            if !seen.insert(entity.id) {
                return Err(ModelError::DuplicateEntity(entity.id));
            }
        }

        // ID 必须是 0..n 的连续区间，便于按下标访问
        let mut remap = std::collections::HashMap::with_capacity(entities.len());
        for (index, entity) in entities.iter_mut().enumerate() {
            let dense = EntityId(index as u32);
            remap.insert(entity.id, dense);
            entity.id = dense;
        }

        let mut dense_relations = Vec::with_capacity(relations.len());
        for rel in relations {
            match (remap.get(&rel.source), remap.get(&rel.target)) {
                (Some(&source), Some(&target)) => dense_relations.push(Relation {
                    source,
                    target,
                    kind: rel.kind,
                }),
                _ => {
                    return Err(ModelError::DanglingRelation {
                        source_id: rel.source,
                        target_id: rel.target,
                        kind: rel.kind,
                    })
                }
            }
        }

        Ok(Self::index(entities, dense_relations))
    }

    fn index(entities: Vec<Entity>, relations: Vec<Relation>) -> Self {
        let mut outgoing = vec![Vec::new(); entities.len()];
        let mut incoming = vec![Vec::new(); entities.len()];
        for (i, rel) in relations.iter().enumerate() {
            outgoing[rel.source.index()].push(i);
            incoming[rel.target.index()].push(i);
        }
        Self {
            entities,
            relations,
            outgoing,
            incoming,
        }
    }

    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    pub fn relations(&self) -> &[Relation] {
        &self.relations
    }

    pub fn entity(&self, id: EntityId) -> Option<&Entity> {
        self.entities.get(id.index())
    }

    pub fn entities_of(&self, kind: EntityKind) -> impl Iterator<Item = &Entity> {
        self.entities.iter().filter(move |e| e.kind == kind)
    }

    /// 项目内定义的实体 (排除外部库实体)
    pub fn internal_of(&self, kind: EntityKind) -> impl Iterator<Item = &Entity> {
        self.entities_of(kind).filter(|e| !e.is_external())
    }

    pub fn outgoing(&self, id: EntityId) -> impl Iterator<Item = &Relation> {
        self.outgoing
            .get(id.index())
            .into_iter()
            .flatten()
            .map(move |&i| &self.relations[i])
    }

    pub fn incoming(&self, id: EntityId) -> impl Iterator<Item = &Relation> {
        self.incoming
            .get(id.index())
            .into_iter()
            .flatten()
            .map(move |&i| &self.relations[i])
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    pub fn relation_count(&self) -> usize {
        self.relations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

/// 事实模型构建器
#[derive(Debug, Default)]
pub struct ModelBuilder {
    entities: Vec<Entity>,
    relations: Vec<Relation>,
}

impl ModelBuilder {
    /// 添加实体，返回新分配的 ID
    pub fn add_entity(&mut self, kind: EntityKind, name: &str) -> EntityId {
        let id = EntityId(self.entities.len() as u32);
        let mut attributes = BTreeMap::new();
        attributes.insert(attr::NAME.to_string(), name.to_string());
        self.entities.push(Entity { id, kind, attributes });
        id
    }

    /// 设置属性；ID 不存在时忽略 (build 时的闭包检查只针对关系)
    pub fn set_attr(&mut self, id: EntityId, key: &str, value: impl Into<String>) {
        if let Some(entity) = self.entities.get_mut(id.index()) {
            entity.attributes.insert(key.to_string(), value.into());
        }
    }

    pub fn add_relation(&mut self, source: EntityId, target: EntityId, kind: RelationKind) {
        self.relations.push(Relation { source, target, kind });
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    pub fn build(self) -> Result<FactModel, ModelError> {
        let n = self.entities.len();
        if let Some(rel) = self
            .relations
            .iter()
            .find(|r| r.source.index() >= n || r.target.index() >= n)
        {
            return Err(ModelError::DanglingRelation {
                source_id: rel.source,
                target_id: rel.target,
                kind: rel.kind,
            });
        }
        Ok(FactModel::index(self.entities, self.relations))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_model() -> FactModel {
        let mut b = FactModel::builder();
        let unit = b.add_entity(EntityKind::Unit, "blink");
        let file = b.add_entity(EntityKind::File, "blink.ino");
        let setup = b.add_entity(EntityKind::Function, "setup");
        let pin_mode = b.add_entity(EntityKind::Function, "pinMode");
        b.set_attr(pin_mode, attr::EXTERNAL, "true");
        b.add_relation(unit, file, RelationKind::Contains);
        b.add_relation(file, setup, RelationKind::Declares);
        b.add_relation(setup, pin_mode, RelationKind::Calls);
        b.build().unwrap()
    }

    #[test]
    fn test_build_assigns_sequential_ids() {
        let model = small_model();
        let ids: Vec<u32> = model.entities().iter().map(|e| e.id.0).collect();
        assert_eq!(ids, vec![0, 1, 2, 3]);
        assert_eq!(model.relation_count(), 3);
    }

    #[test]
    fn test_build_rejects_dangling_relation() {
        let mut b = FactModel::builder();
        let unit = b.add_entity(EntityKind::Unit, "u");
        b.add_relation(unit, EntityId(7), RelationKind::Contains);
        let err = b.build().unwrap_err();
        assert!(matches!(err, ModelError::DanglingRelation { .. }));
    }

    #[test]
    fn test_outgoing_and_incoming() {
        let model = small_model();
        let setup = EntityId(2);
        let out: Vec<_> = model.outgoing(setup).map(|r| r.kind).collect();
        assert_eq!(out, vec![RelationKind::Calls]);
        let inc: Vec<_> = model.incoming(setup).map(|r| r.kind).collect();
        assert_eq!(inc, vec![RelationKind::Declares]);
    }

    #[test]
    fn test_internal_of_excludes_external() {
        let model = small_model();
        let names: Vec<_> = model.internal_of(EntityKind::Function).map(|e| e.name()).collect();
        assert_eq!(names, vec!["setup"]);
    }

    #[test]
    fn test_short_name() {
        let mut b = FactModel::builder();
        let id = b.add_entity(EntityKind::Function, "Motor::stop");
        let model = b.build().unwrap();
        assert_eq!(model.entity(id).unwrap().short_name(), "stop");
    }

    #[test]
    fn test_from_parts_remaps_sparse_ids() {
        let entity = |id: u32, kind| Entity {
            id: EntityId(id),
            kind,
            attributes: BTreeMap::new(),
        };
        let model = FactModel::from_parts(
            vec![entity(10, EntityKind::Unit), entity(20, EntityKind::File)],
            vec![Relation {
                source: EntityId(10),
                target: EntityId(20),
                kind: RelationKind::Contains,
            }],
        )
        .unwrap();
        assert_eq!(model.relations()[0].source, EntityId(0));
        assert_eq!(model.relations()[0].target, EntityId(1));
    }

    #[test]
    fn test_from_parts_rejects_duplicates() {
        let entity = Entity {
            id: EntityId(1),
            kind: EntityKind::Unit,
            attributes: BTreeMap::new(),
        };
        let err = FactModel::from_parts(vec![entity.clone(), entity], vec![]).unwrap_err();
        assert_eq!(err, ModelError::DuplicateEntity(EntityId(1)));
    }

    #[test]
    fn test_empty_model() {
        let model = FactModel::builder().build().unwrap();
        assert!(model.is_empty());
        assert_eq!(model.relation_count(), 0);
    }
}
