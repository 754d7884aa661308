//! Pre-apply checks for staged JSON content.
//!
//! Each file goes through size, syntax, structure and safety checks in that
//! order and stops at the first failing stage. One failing file makes the
//! whole batch invalid.

use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::config::{ValidationConfig, RUN_ARTIFACTS};
use crate::download::{DownloadReport, SIDECAR_EXTENSION};
use crate::error::{SyncError, SyncResult};

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("File size ({size} bytes) exceeds maximum ({max} bytes): {path}")]
    TooLarge { path: String, size: u64, max: u64 },

    #[error("Invalid JSON syntax in {path}: {message}")]
    Syntax { path: String, message: String },

    #[error("Structure validation failed for {path}:\n{}", .missing.join("\n"))]
    Structure { path: String, missing: Vec<String> },

    #[error("Safety validation failed for {path}:\n{}", .patterns.iter().map(|p| format!("Dangerous pattern detected: {p}")).collect::<Vec<_>>().join("\n"))]
    Unsafe { path: String, patterns: Vec<String> },

    #[error("Could not read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileValidation {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationReport {
    pub valid: bool,
    /// Keyed by path relative to the validated directory.
    pub files: BTreeMap<String, FileValidation>,
    pub errors: Vec<String>,
}

impl ValidationReport {
    fn empty() -> Self {
        Self {
            valid: true,
            files: BTreeMap::new(),
            errors: Vec::new(),
        }
    }

    fn record(&mut self, relative: String, outcome: Result<(), ValidationError>) {
        match outcome {
            Ok(()) => {
                debug!(file = %relative, "Validation passed");
                self.files.insert(
                    relative,
                    FileValidation {
                        valid: true,
                        error: None,
                    },
                );
            }
            Err(e) => {
                let message = e.to_string();
                error!(file = %relative, error = %message, "Validation failed");
                self.valid = false;
                self.errors.push(format!("{relative}: {message}"));
                self.files.insert(
                    relative,
                    FileValidation {
                        valid: false,
                        error: Some(message),
                    },
                );
            }
        }
    }

    fn log_complete(&self) {
        info!(
            valid = self.valid,
            files_checked = self.files.len(),
            errors = self.errors.len(),
            "Validation complete"
        );
    }
}

pub struct Validator {
    config: ValidationConfig,
    patterns: Vec<Regex>,
}

impl Validator {
    pub fn new(config: &ValidationConfig) -> SyncResult<Self> {
        let patterns = config
            .disallowed_patterns
            .iter()
            .map(|p| {
                Regex::new(p)
                    .map_err(|e| SyncError::Config(format!("invalid disallowed pattern {p:?}: {e}")))
            })
            .collect::<SyncResult<Vec<_>>>()?;
        Ok(Self {
            config: config.clone(),
            patterns,
        })
    }

    /// Validate one document. `relative_path` decides which schema applies.
    pub fn validate_content(&self, relative_path: &str, content: &str) -> Result<(), ValidationError> {
        let size = content.len() as u64;
        if size > self.config.max_file_size {
            return Err(ValidationError::TooLarge {
                path: relative_path.to_string(),
                size,
                max: self.config.max_file_size,
            });
        }

        let mut data: Value =
            serde_json::from_str(content).map_err(|e| ValidationError::Syntax {
                path: relative_path.to_string(),
                message: e.to_string(),
            })?;

        if let Value::Object(map) = &mut data {
            map.remove(&self.config.instructions_field);
        }

        let missing = self.missing_fields(relative_path, &data);
        if !missing.is_empty() {
            return Err(ValidationError::Structure {
                path: relative_path.to_string(),
                missing,
            });
        }

        let serialized = data.to_string();
        let matched: Vec<String> = self
            .patterns
            .iter()
            .filter(|re| re.is_match(&serialized))
            .map(|re| re.as_str().to_string())
            .collect();
        if !matched.is_empty() {
            return Err(ValidationError::Unsafe {
                path: relative_path.to_string(),
                patterns: matched,
            });
        }
        Ok(())
    }

    pub fn validate_file(&self, relative_path: &str, file: &Path) -> Result<(), ValidationError> {
        let content = std::fs::read_to_string(file).map_err(|source| ValidationError::Io {
            path: relative_path.to_string(),
            source,
        })?;
        self.validate_content(relative_path, &content)
    }

    /// Validate every `*.json` file under `dir`, recursing into subdirectories.
    /// A missing directory is an empty, valid batch.
    pub fn validate_dir(&self, dir: &Path) -> SyncResult<ValidationReport> {
        info!(dir = %dir.display(), "Starting validation");
        let mut report = ValidationReport::empty();
        if !dir.exists() {
            warn!(dir = %dir.display(), "Directory does not exist");
            return Ok(report);
        }

        for (relative, file) in json_files(dir)? {
            let outcome = self.validate_file(&relative, &file);
            report.record(relative, outcome);
        }
        report.log_complete();
        Ok(report)
    }

    /// Validate exactly the files a download staged.
    pub fn validate_staged(&self, download: &DownloadReport) -> ValidationReport {
        info!(files = download.downloaded.len(), "Validating downloaded files");
        let mut report = ValidationReport::empty();
        for staged in &download.downloaded {
            let outcome = self.validate_file(&staged.path, &staged.local_path);
            report.record(staged.path.clone(), outcome);
        }
        report.log_complete();
        report
    }

    fn missing_fields(&self, relative_path: &str, data: &Value) -> Vec<String> {
        let mut missing = Vec::new();
        if self.is_simple_content(relative_path) {
            if !is_present(data.get("slug")) {
                missing.push("Missing required field: slug".to_string());
            }
            if !is_present(data.get("title")) && !is_present(data.get("name")) {
                missing.push("Missing required field: title or name".to_string());
            }
            return missing;
        }

        let required = &self.config.required_fields;
        check_fields(data, "", &required.page, &mut missing);
        if let Some(meta) = data.get("meta").filter(|v| is_present(Some(v))) {
            check_fields(meta, "meta", &required.meta, &mut missing);
            if let Some(seo) = meta.get("seo").filter(|v| is_present(Some(v))) {
                check_fields(seo, "meta.seo", &required.seo, &mut missing);
            }
        }
        missing
    }

    fn is_simple_content(&self, relative_path: &str) -> bool {
        let segments: Vec<&str> = relative_path.split('/').collect();
        segments[..segments.len().saturating_sub(1)]
            .iter()
            .any(|s| self.config.simple_content_dirs.iter().any(|d| d == s))
    }
}

fn check_fields(value: &Value, prefix: &str, fields: &[String], missing: &mut Vec<String>) {
    for field in fields {
        if !is_present(value.get(field)) {
            let path = if prefix.is_empty() {
                field.clone()
            } else {
                format!("{prefix}.{field}")
            };
            missing.push(format!("Missing required field: {path}"));
        }
    }
}

/// Absent, `null`, `false`, `0` and `""` all count as missing.
fn is_present(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) | Some(Value::Bool(false)) => false,
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
        Some(_) => true,
    }
}

/// All `*.json` files under `root` as (relative `/` path, absolute path), sorted.
/// Run artifacts at the top level are not content and are left out.
fn json_files(root: &Path) -> SyncResult<Vec<(String, PathBuf)>> {
    let mut out = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let entries = std::fs::read_dir(&dir).map_err(|e| SyncError::io(&dir, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| SyncError::io(&dir, e))?;
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.ends_with(".json") || name.ends_with(SIDECAR_EXTENSION) {
                continue;
            }
            if dir == root && RUN_ARTIFACTS.contains(&name.as_str()) {
                continue;
            }
            let relative = path
                .strip_prefix(root)
                .unwrap_or(&path)
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("/");
            out.push((relative, path));
        }
    }
    out.sort();
    Ok(out)
}
