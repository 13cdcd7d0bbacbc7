//! sketchfork - Arduino sketch metrics and fork similarity

mod config;
mod report;
mod session;

use clap::Parser;
use config::SessionConfig;
use session::Session;
use similarity::SimilarityConfig;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sketchfork")]
#[command(about = "Metrics and fork similarity for Arduino sketches", version)]
struct Cli {
    /// Sketch file or directory; pass two to compare an original with its fork
    #[arg(required = true, num_args = 1..=2)]
    paths: Vec<PathBuf>,
    /// Additional include search path (repeatable)
    #[arg(short = 'I', long = "include")]
    include: Vec<PathBuf>,
    /// Compute a single metric
    #[arg(short, long)]
    metric: Option<String>,
    /// JSON output
    #[arg(long)]
    json: bool,
    /// Tolerate syntax errors
    #[arg(long)]
    lenient: bool,
    /// Weight of the structural overlap term
    #[arg(long)]
    structural_weight: Option<f64>,
    /// Weight of the metric vector term
    #[arg(long)]
    metric_weight: Option<f64>,
    /// Extraction timeout in seconds
    #[arg(long)]
    timeout: Option<u64>,
    /// Number of fact models kept in the cache
    #[arg(long)]
    cache_capacity: Option<usize>,
}

impl Cli {
    /// 命令行参数覆盖环境变量配置
    fn session_config(&self) -> SessionConfig {
        let mut config = SessionConfig::from_env();
        config.include_paths.extend(self.include.iter().cloned());
        config.lenient |= self.lenient;
        if let Some(secs) = self.timeout {
            config.timeout = Duration::from_secs(secs);
        }
        if let Some(capacity) = self.cache_capacity {
            config.cache_capacity = capacity;
        }
        config.similarity = SimilarityConfig::new(
            self.structural_weight.unwrap_or(config.similarity.structural_weight),
            self.metric_weight.unwrap_or(config.similarity.metric_weight),
        );
        config
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let session = Session::new(cli.session_config());
    tracing::debug!("{} metrics registered", session.registry().len());
    let mut out = std::io::stdout();

    match cli.paths.as_slice() {
        [path] => match &cli.metric {
            Some(name) => {
                let value = session.run_metric(path, name).await?;
                if cli.json {
                    let result = metrics::MetricResult {
                        name: name.clone(),
                        value,
                    };
                    report::write_metrics(&mut out, path, std::slice::from_ref(&result), true)?;
                } else {
                    report::write_metric(&mut out, path, name, &value)?;
                }
            }
            None => {
                let results = session.run_metrics(path).await?;
                report::write_metrics(&mut out, path, &results, cli.json)?;
            }
        },
        [original, fork] => {
            let score = session.run_similarity(original, fork).await?;
            report::write_similarity(&mut out, original, fork, &score, cli.json)?;
        }
        _ => anyhow::bail!("expected one or two paths, got {}", cli.paths.len()),
    }

    tracing::debug!("cache: {:?}", session.cache().stats());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_cli_rejects_wrong_path_count() {
        assert!(Cli::try_parse_from(["sketchfork"]).is_err());
        assert!(Cli::try_parse_from(["sketchfork", "a", "b", "c"]).is_err());
    }

    #[test]
    fn test_cli_flags_override() {
        let cli = Cli::try_parse_from([
            "sketchfork",
            "orig",
            "fork",
            "-I",
            "lib",
            "--structural-weight",
            "0.9",
            "--timeout",
            "3",
        ])
        .unwrap();
        assert_eq!(cli.paths.len(), 2);

        let config = cli.session_config();
        assert!(config.include_paths.contains(&PathBuf::from("lib")));
        assert_eq!(config.similarity.structural_weight, 0.9);
        assert_eq!(config.timeout, Duration::from_secs(3));
    }
}
