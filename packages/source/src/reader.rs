//! Loading raw incident records from disk.
//!
//! Accepts either a single JSON array of objects or JSON Lines (one object
//! per line, blank lines ignored).

use std::path::Path;

use crate::SourceError;

/// Reads raw records from `path`.
///
/// # Errors
///
/// Returns [`SourceError::Io`] if the file cannot be read and
/// [`SourceError::Json`] if it is neither a JSON array nor JSON Lines.
pub async fn load_records(path: &Path) -> Result<Vec<serde_json::Value>, SourceError> {
    let contents = tokio::fs::read_to_string(path).await?;
    let records = parse_records(&contents)?;
    log::info!("Read {} raw records from {}", records.len(), path.display());
    Ok(records)
}

/// Parses a JSON array or JSON Lines document into records.
///
/// # Errors
///
/// Returns [`SourceError::Json`] on the first malformed value.
pub fn parse_records(contents: &str) -> Result<Vec<serde_json::Value>, SourceError> {
    let trimmed = contents.trim_start();
    if trimmed.starts_with('[') {
        return Ok(serde_json::from_str(trimmed)?);
    }
    trimmed
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).map_err(SourceError::from))
        .collect()
}
