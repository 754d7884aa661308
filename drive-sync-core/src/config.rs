use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Static settings for one deployment of the sync pipeline.
///
/// Every section has defaults, so a YAML file only needs to name what differs.
/// Secrets (tokens, client secrets) never live here; the CLI injects them from
/// the environment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub drive: DriveSettings,
    pub github: GitHubSettings,
    pub paths: PathSettings,
    pub sync: SyncSettings,
    pub validation: ValidationConfig,
}

impl Config {
    pub fn trace_loaded(&self) {
        info!(
            drive_folder_id = %self.drive.folder_id,
            repository = %format!("{}/{}", self.github.owner, self.github.repo),
            branch = %self.github.branch,
            content_dir = %self.paths.content_dir.display(),
            detection = ?self.sync.detection,
            auto_merge = self.sync.auto_merge,
            "Loaded Config"
        );
        debug!(?self, "Config loaded (full debug)");
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DriveSettings {
    /// Root folder id, as found in `https://drive.google.com/drive/folders/{id}`.
    pub folder_id: String,
    /// Subfolder of the root holding the sync-state document.
    pub metadata_folder: String,
    pub metadata_file: String,
}

impl DriveSettings {
    pub fn folder_url(&self) -> String {
        format!("https://drive.google.com/drive/folders/{}", self.folder_id)
    }
}

impl Default for DriveSettings {
    fn default() -> Self {
        Self {
            folder_id: String::new(),
            metadata_folder: ".metadata".to_string(),
            metadata_file: "sync-state.json".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GitHubSettings {
    pub owner: String,
    pub repo: String,
    /// Base branch the content pull requests target.
    pub branch: String,
    /// Integration branch force-pushed by every Drive → GitHub run.
    pub content_branch: String,
    pub remote: String,
}

impl Default for GitHubSettings {
    fn default() -> Self {
        Self {
            owner: String::new(),
            repo: String::new(),
            branch: "master".to_string(),
            content_branch: "content-updates".to_string(),
            remote: "origin".to_string(),
        }
    }
}

/// Reports a run writes at the top of the staging directory.
pub const RUN_ARTIFACTS: [&str; 3] = ["changes.json", "download.json", "validation.json"];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathSettings {
    /// Root of the local git working tree.
    pub repo_root: PathBuf,
    /// Content directory, relative to `repo_root`. Tracked paths are relative to it.
    pub content_dir: PathBuf,
    /// Scratch area for one run (downloads, sidecars, intermediate reports).
    pub staging_dir: PathBuf,
}

impl PathSettings {
    /// Local working-tree location of a tracked path.
    pub fn content_path(&self, relative: &str) -> PathBuf {
        let mut path = self.repo_root.join(&self.content_dir);
        for segment in relative.split('/') {
            path.push(segment);
        }
        path
    }

    /// Repository path of a tracked path, as the repo host API expects it.
    pub fn repo_path(&self, relative: &str) -> String {
        let dir = self
            .content_dir
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/");
        if dir.is_empty() {
            relative.to_string()
        } else {
            format!("{dir}/{relative}")
        }
    }

    pub fn content_root(&self) -> PathBuf {
        self.repo_root.join(&self.content_dir)
    }

    pub fn staging_artifact(&self, name: &str) -> PathBuf {
        Path::new(&self.staging_dir).join(name)
    }
}

impl Default for PathSettings {
    fn default() -> Self {
        Self {
            repo_root: PathBuf::from("."),
            content_dir: PathBuf::from("src/data/pages"),
            staging_dir: PathBuf::from(".drive-sync-temp"),
        }
    }
}

/// Which change-detection/apply policy a run follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DetectionMode {
    /// Drive timestamps against last sync; repo is passive; every change is merged.
    #[default]
    RemoteOnly,
    /// Both sides' timestamps; conflicts outside the grace period are held for review.
    TwoWay,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    pub detection: DetectionMode,
    /// Two edits closer together than this are resolved by most-recent-wins.
    pub conflict_grace_period_secs: u64,
    pub auto_merge: bool,
    /// Globs (relative to the content dir) whose changes always need a human.
    pub require_review: Vec<String>,
    pub retry: RetryPolicy,
    /// Mentioned on validation-failure issues when set.
    pub notification_email: Option<String>,
}

impl SyncSettings {
    pub fn grace_period(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.conflict_grace_period_secs as i64)
    }
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            detection: DetectionMode::RemoteOnly,
            conflict_grace_period_secs: 5 * 60,
            auto_merge: false,
            require_review: Vec::new(),
            retry: RetryPolicy::default(),
            notification_email: None,
        }
    }
}

/// Bounded exponential backoff for rate-limited downloads.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay_ms: u64,
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (0-based): base, 2·base, 4·base, ...
    pub fn delay(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.base_delay_ms.saturating_mul(1u64 << attempt.min(16)))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    pub max_file_size: u64,
    /// Regular expressions matched against the serialized document.
    pub disallowed_patterns: Vec<String>,
    pub required_fields: RequiredFields,
    /// Subdirectories whose files use the slug + title/name schema.
    pub simple_content_dirs: Vec<String>,
    /// Editorial field removed before structure and safety checks.
    pub instructions_field: String,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            max_file_size: 1024 * 1024,
            disallowed_patterns: vec![
                r"(?i)<script".to_string(),
                r"(?i)javascript:".to_string(),
                r"(?i)on\w+=".to_string(),
            ],
            required_fields: RequiredFields::default(),
            simple_content_dirs: vec!["programs".to_string(), "blog".to_string()],
            instructions_field: "_instructions".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RequiredFields {
    pub page: Vec<String>,
    pub meta: Vec<String>,
    pub seo: Vec<String>,
}

impl Default for RequiredFields {
    fn default() -> Self {
        Self {
            page: vec!["meta".to_string(), "content".to_string()],
            meta: vec![
                "slug".to_string(),
                "permalink".to_string(),
                "seo".to_string(),
            ],
            seo: vec!["title".to_string(), "description".to_string()],
        }
    }
}
