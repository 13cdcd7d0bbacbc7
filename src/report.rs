//! 控制台 / JSON 报告

use metrics::{MetricResult, MetricValue};
use serde::Serialize;
use similarity::SimilarityScore;
use std::io::Write;
use std::path::Path;

#[derive(Serialize)]
struct MetricsDocument<'a> {
    path: String,
    metrics: &'a [MetricResult],
}

#[derive(Serialize)]
struct SimilarityDocument<'a> {
    original: String,
    fork: String,
    #[serde(flatten)]
    score: &'a SimilarityScore,
}

/// 单个度量的控制台输出
pub fn write_metric(out: &mut impl Write, path: &Path, name: &str, value: &MetricValue) -> std::io::Result<()> {
    writeln!(out, "Computing {} on {}...", name, path.display())?;
    writeln!(out, "\tresult = {}", value)?;
    writeln!(out)
}

pub fn write_metrics(out: &mut impl Write, path: &Path, results: &[MetricResult], json: bool) -> anyhow::Result<()> {
    if json {
        let doc = MetricsDocument {
            path: path.display().to_string(),
            metrics: results,
        };
        writeln!(out, "{}", serde_json::to_string_pretty(&doc)?)?;
    } else {
        for result in results {
            write_metric(out, path, &result.name, &result.value)?;
        }
    }
    Ok(())
}

pub fn write_similarity(
    out: &mut impl Write,
    original: &Path,
    fork: &Path,
    score: &SimilarityScore,
    json: bool,
) -> anyhow::Result<()> {
    if json {
        let doc = SimilarityDocument {
            original: original.display().to_string(),
            fork: fork.display().to_string(),
            score,
        };
        writeln!(out, "{}", serde_json::to_string_pretty(&doc)?)?;
    } else {
        writeln!(out, "Fork analysis between {} and {}...", original.display(), fork.display())?;
        writeln!(out, "Score: {}", score.score)?;
    }
    Ok(())
}
