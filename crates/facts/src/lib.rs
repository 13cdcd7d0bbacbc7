//! facts - 草图事实模型
//!
//! 实体/关系多重图、C++ 提取器、源码标识与模型缓存

mod cache;
mod extract;
mod identity;
mod model;
pub mod sources;

pub use cache::{CacheStats, FactModelCache};
pub use extract::{BuildConfig, CppExtractor, ExtractionError, FactExtractor};
pub use identity::SourceIdentity;
pub use model::{
    attr, Entity, EntityId, EntityKind, FactModel, ModelBuilder, ModelError, Relation, RelationKind,
};
