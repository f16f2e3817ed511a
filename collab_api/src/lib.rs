use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Verdict printed by the image-defect classifier.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DefectReport {
    #[serde(alias = "defect_detected")]
    pub defect_detected: bool,
    #[serde(alias = "defect_type")]
    pub defect_type: String,
    pub confidence: f64,
    #[serde(default)]
    pub severity: Option<String>,
}

/// Error object a collaborator prints instead of a result.
#[derive(Debug, Deserialize)]
struct ErrorObject {
    error: String,
}

/// Return the last non-empty line of a collaborator's stdout. Collaborators
/// may print diagnostics before the final JSON document.
pub fn last_json_line(stdout: &str) -> Option<&str> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .last()
}

/// Parse the classifier output into a report.
pub fn parse_defect_output(stdout: &str) -> Result<DefectReport> {
    let line = last_json_line(stdout).ok_or_else(|| anyhow!("empty model output"))?;
    let value: Value =
        serde_json::from_str(line).map_err(|_| anyhow!("Failed to parse model output"))?;
    if let Ok(ErrorObject { error }) = serde_json::from_value::<ErrorObject>(value.clone()) {
        return Err(anyhow!(error));
    }
    serde_json::from_value(value).map_err(|_| anyhow!("Failed to parse model output"))
}

/// Parse the scraper output, which must be a JSON array of discussion objects.
/// Entries are passed through untouched.
pub fn parse_scrape_output(stdout: &str) -> Result<Vec<Value>> {
    match serde_json::from_str::<Value>(stdout.trim())? {
        Value::Array(items) => Ok(items),
        other => Err(anyhow!("expected array, got {}", kind_of(&other))),
    }
}

fn kind_of(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
