//! 内置度量
//!
//! 每个度量都是 `fn(&FactModel) -> MetricValue` 纯函数，只读取自己关心的实体种类。

use crate::callgraph::CallGraph;
use crate::registry::{MetricDef, METRIC_TAG};
use crate::value::MetricValue;
use facts::{attr, Entity, EntityId, EntityKind, FactModel, RelationKind};
use std::collections::HashSet;

macro_rules! metric_def {
    ($name:expr, $description:expr, $compute:expr) => {
        MetricDef {
            name: $name,
            description: $description,
            tags: &[METRIC_TAG],
            compute: $compute,
        }
    };
}

pub const BUILTIN_METRICS: &[MetricDef] = &[
    metric_def!("lines_of_code", "Non-blank, non-comment lines across project files", lines_of_code),
    metric_def!("function_count", "Functions defined or declared in the project", function_count),
    metric_def!("type_count", "Classes, structs, unions and enums", type_count),
    metric_def!("global_variable_count", "Variables declared at file scope", global_variable_count),
    metric_def!("macro_count", "Preprocessor macro definitions", macro_count),
    metric_def!("library_include_count", "Included headers outside the project", library_include_count),
    metric_def!("library_call_count", "Call sites into library functions", library_call_count),
    metric_def!("average_function_length", "Mean body length of defined functions", average_function_length),
    metric_def!(
        "average_cyclomatic_complexity",
        "Mean cyclomatic complexity of defined functions",
        average_cyclomatic_complexity
    ),
    metric_def!(
        "max_cyclomatic_complexity",
        "Highest cyclomatic complexity of any function",
        max_cyclomatic_complexity
    ),
    metric_def!("max_call_depth", "Longest chain of calls between project functions", max_call_depth),
    metric_def!(
        "unreferenced_function_count",
        "Defined functions that are never called or referenced",
        unreferenced_function_count
    ),
    metric_def!("average_fan_out", "Mean number of distinct project functions called", average_fan_out),
    metric_def!("max_inheritance_depth", "Deepest chain of base classes", max_inheritance_depth),
];

fn lines_of_code(model: &FactModel) -> MetricValue {
    let mut files = model.internal_of(EntityKind::File).peekable();
    if files.peek().is_none() {
        return MetricValue::not_computable("no source files");
    }
    MetricValue::Value(files.filter_map(|f| f.numeric_attr(attr::LINES)).sum())
}

fn function_count(model: &FactModel) -> MetricValue {
    model.internal_of(EntityKind::Function).count().into()
}

fn type_count(model: &FactModel) -> MetricValue {
    model.internal_of(EntityKind::Type).count().into()
}

fn global_variable_count(model: &FactModel) -> MetricValue {
    model
        .internal_of(EntityKind::Variable)
        .filter(|v| v.attr(attr::ROLE) == Some("global"))
        .count()
        .into()
}

fn macro_count(model: &FactModel) -> MetricValue {
    model.internal_of(EntityKind::Macro).count().into()
}

fn library_include_count(model: &FactModel) -> MetricValue {
    model
        .entities_of(EntityKind::File)
        .filter(|f| f.is_external())
        .count()
        .into()
}

fn library_call_count(model: &FactModel) -> MetricValue {
    model
        .relations()
        .iter()
        .filter(|r| r.kind == RelationKind::Calls)
        .filter(|r| model.entity(r.target).is_some_and(Entity::is_external))
        .count()
        .into()
}

fn defined_functions(model: &FactModel) -> impl Iterator<Item = &Entity> {
    model
        .internal_of(EntityKind::Function)
        .filter(|f| f.attr(attr::LINES).is_some())
}

fn mean(values: impl Iterator<Item = f64>, empty_reason: &str) -> MetricValue {
    let (sum, count) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if count == 0 {
        return MetricValue::not_computable(empty_reason);
    }
    MetricValue::from_f64(sum / count as f64)
}

fn average_function_length(model: &FactModel) -> MetricValue {
    mean(
        defined_functions(model).filter_map(|f| f.numeric_attr(attr::LINES)),
        "no function definitions",
    )
}

fn average_cyclomatic_complexity(model: &FactModel) -> MetricValue {
    mean(
        defined_functions(model).filter_map(|f| f.numeric_attr(attr::COMPLEXITY)),
        "no function definitions",
    )
}

fn max_cyclomatic_complexity(model: &FactModel) -> MetricValue {
    defined_functions(model)
        .filter_map(|f| f.numeric_attr(attr::COMPLEXITY))
        .reduce(f64::max)
        .map(MetricValue::from_f64)
        .unwrap_or_else(|| MetricValue::not_computable("no function definitions"))
}

fn max_call_depth(model: &FactModel) -> MetricValue {
    let graph = CallGraph::from_model(model);
    if graph.is_empty() {
        return MetricValue::not_computable("no project functions");
    }
    graph.max_call_depth().into()
}

fn unreferenced_function_count(model: &FactModel) -> MetricValue {
    CallGraph::from_model(model).find_dead_code().len().into()
}

fn average_fan_out(model: &FactModel) -> MetricValue {
    let graph = CallGraph::from_model(model);
    mean(
        graph.fan_outs().into_iter().map(|n| n as f64),
        "no function definitions",
    )
}

fn max_inheritance_depth(model: &FactModel) -> MetricValue {
    let types: Vec<&Entity> = model.internal_of(EntityKind::Type).collect();
    if types.is_empty() {
        return MetricValue::not_computable("no project types");
    }
    types
        .iter()
        .map(|t| inheritance_depth(model, t.id, &mut HashSet::new()))
        .max()
        .unwrap_or(0)
        .into()
}

/// 基类链长度，外部基类计一层，循环继承在重复节点处截断
fn inheritance_depth(model: &FactModel, id: EntityId, visited: &mut HashSet<EntityId>) -> usize {
    if !visited.insert(id) {
        return 0;
    }
    let depth = model
        .outgoing(id)
        .filter(|r| r.kind == RelationKind::Inherits)
        .map(|r| 1 + inheritance_depth(model, r.target, visited))
        .max()
        .unwrap_or(0);
    visited.remove(&id);
    depth
}
