//! metrics - 度量注册表与内置度量
//!
//! 度量是作用于 [`facts::FactModel`] 的纯函数，通过带标签的命名空间表显式注册。

mod builtin;
mod callgraph;
mod registry;
mod value;

pub use builtin::BUILTIN_METRICS;
pub use callgraph::{CallGraph, FunctionNode};
pub use registry::{
    MetricDef, MetricDescriptor, MetricError, MetricRegistry, MetricReport, MetricResult, Result,
    METRIC_TAG,
};
pub use value::MetricValue;
