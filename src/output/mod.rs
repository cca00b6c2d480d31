use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;

use crate::stages::Finding;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "text" | "txt" => Some(Self::Text),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

pub fn infer_format_from_path(path: &str) -> Option<OutputFormat> {
    let lower = path.trim().to_lowercase();
    if lower.ends_with(".json") {
        return Some(OutputFormat::Json);
    }
    if lower.ends_with(".txt") {
        return Some(OutputFormat::Text);
    }
    None
}

pub fn render_text(findings: &[Finding]) -> Vec<u8> {
    let mut out = String::new();
    for f in findings {
        out.push_str(&f.to_string());
        out.push('\n');
    }
    out.into_bytes()
}

pub fn render_json(findings: &[Finding]) -> Vec<u8> {
    serde_json::to_vec_pretty(findings).unwrap_or_else(|_| b"[]\n".to_vec())
}

pub fn render(format: OutputFormat, findings: &[Finding]) -> Vec<u8> {
    match format {
        OutputFormat::Text => render_text(findings),
        OutputFormat::Json => render_json(findings),
    }
}

pub async fn write_report(
    path: &str,
    format: OutputFormat,
    findings: &[Finding],
) -> Result<(), String> {
    let rendered = render(format, findings);
    let mut outfile = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)
        .await
        .map_err(|e| format!("failed to open output file '{path}': {e}"))?;
    outfile
        .write_all(&rendered)
        .await
        .map_err(|e| format!("failed to write output file '{path}': {e}"))?;
    Ok(())
}
