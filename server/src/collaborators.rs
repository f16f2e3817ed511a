use crate::{config::CollaboratorConfig, error::AppError};
use anyhow::{Context, Result};
use collab_api::DefectReport;
use serde_json::Value;
use std::{path::Path, process::Stdio};
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Run a collaborator once and return its stdout. A non-zero exit is an
/// error carrying the tail of stderr. No timeout is applied.
async fn run_once(argv: &[String], extra: &str) -> Result<String> {
    let (program, args) = argv
        .split_first()
        .context("collaborator command is empty")?;
    let mut cmd = Command::new(program);
    cmd.args(args)
        .arg(extra)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    let output = cmd
        .output()
        .await
        .with_context(|| format!("spawning {program}"))?;
    let stderr = String::from_utf8_lossy(&output.stderr);
    if !stderr.trim().is_empty() {
        debug!(%program, "collaborator stderr: {}", stderr.trim());
    }
    if !output.status.success() {
        let tail = stderr.lines().last().unwrap_or("").trim().to_string();
        anyhow::bail!("{program} exited with {}: {tail}", output.status);
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Classify a stored image with the defect model.
pub async fn analyze_defect(
    cfg: &CollaboratorConfig,
    image: &Path,
) -> Result<DefectReport, AppError> {
    info!(image = %image.display(), "running defect analysis");
    let outcome = async {
        let stdout = run_once(&cfg.defect_command, &image.to_string_lossy()).await?;
        collab_api::parse_defect_output(&stdout)
    }
    .await;
    outcome.map_err(|e| AppError::ExternalProcess(format!("Defect analysis failed: {e}")))
}

/// Search external forums for discussions about a place. Any failure yields
/// an empty list so callers still render without external results.
pub async fn scrape_discussions(cfg: &CollaboratorConfig, query: &str) -> Vec<Value> {
    let outcome = async {
        let stdout = run_once(&cfg.scraper_command, query).await?;
        collab_api::parse_scrape_output(&stdout)
    }
    .await;
    match outcome {
        Ok(items) => {
            info!(query, results = items.len(), "scraped external discussions");
            items
        }
        Err(e) => {
            warn!(query, "discussion scraper failed: {e:#}");
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> Vec<String> {
        vec!["sh".into(), "-c".into(), script.into(), "collab".into()]
    }

    fn cfg(defect: &str, scraper: &str) -> CollaboratorConfig {
        CollaboratorConfig {
            defect_command: sh(defect),
            scraper_command: sh(scraper),
        }
    }

    #[tokio::test]
    async fn defect_report_parsed_from_stdout() {
        let c = cfg(
            r#"echo "warming up"; echo "{\"defect_detected\": true, \"defect_type\": \"$1\", \"confidence\": 0.9}""#,
            "true",
        );
        let report = analyze_defect(&c, Path::new("crack")).await.unwrap();
        assert!(report.defect_detected);
        assert_eq!(report.defect_type, "crack");
    }

    #[tokio::test]
    async fn defect_failures_are_external_errors() {
        let c = cfg("echo '{\"error\": \"Model weights not found\"}'", "true");
        let err = analyze_defect(&c, Path::new("x")).await.unwrap_err();
        assert!(matches!(err, AppError::ExternalProcess(_)));
        assert!(err.to_string().contains("Model weights not found"));

        let c = cfg("echo boom >&2; exit 3", "true");
        assert!(matches!(
            analyze_defect(&c, Path::new("x")).await,
            Err(AppError::ExternalProcess(_))
        ));

        let c = CollaboratorConfig {
            defect_command: vec!["/definitely/not/here".into()],
            scraper_command: sh("true"),
        };
        assert!(matches!(
            analyze_defect(&c, Path::new("x")).await,
            Err(AppError::ExternalProcess(_))
        ));
    }

    #[tokio::test]
    async fn scraper_passes_query_and_degrades() {
        let c = cfg("true", r#"echo "[{\"title\": \"$1\"}]""#);
        let items = scrape_discussions(&c, "Sector 62").await;
        assert_eq!(items.len(), 1);
        assert_eq!(items[0]["title"], "Sector 62");

        let c = cfg("true", "exit 1");
        assert!(scrape_discussions(&c, "q").await.is_empty());
        let c = cfg("true", "echo not json");
        assert!(scrape_discussions(&c, "q").await.is_empty());
    }
}
