//! similarity - 原项目与分支之间的结构相似度
//!
//! 规范化标记上的多重集 Jaccard 与度量向量余弦相似度的加权组合。

mod canonical;
mod engine;
mod vector;

pub use canonical::{base_token, entity_token, structural_overlap, CanonicalModel, Triple};
pub use engine::{Result, SimilarityConfig, SimilarityEngine, SimilarityError, SimilarityScore};
pub use vector::{aligned_vectors, cosine_similarity, normalize_pair};
