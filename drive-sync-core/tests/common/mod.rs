#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::Path;
use std::sync::Mutex;

use drive_sync_core::config::{Config, RetryPolicy};
use drive_sync_core::contract::{RemoteEntry, RemoteStore, FOLDER_MIME_TYPE};
use drive_sync_core::error::{SyncError, SyncResult};
use drive_sync_core::metadata::SyncMetadataDocument;

pub const ROOT: &str = "root";

struct Node {
    entry: RemoteEntry,
    parent: String,
    content: String,
}

/// In-memory Drive tree. Listing is ordered by name like the real API.
pub struct MemoryDrive {
    nodes: Mutex<Vec<Node>>,
    next_id: Mutex<u64>,
}

impl MemoryDrive {
    pub fn new() -> Self {
        Self {
            nodes: Mutex::new(Vec::new()),
            next_id: Mutex::new(1),
        }
    }

    fn id(&self) -> String {
        let mut next = self.next_id.lock().unwrap();
        let id = format!("id-{next}");
        *next += 1;
        id
    }

    pub fn add_folder(&self, parent: &str, name: &str) -> String {
        let id = self.id();
        self.nodes.lock().unwrap().push(Node {
            entry: RemoteEntry {
                id: id.clone(),
                name: name.to_string(),
                mime_type: FOLDER_MIME_TYPE.to_string(),
                modified_time: Some(Utc::now()),
                size: None,
            },
            parent: parent.to_string(),
            content: String::new(),
        });
        id
    }

    pub fn add_file(&self, parent: &str, name: &str, content: &str, modified: DateTime<Utc>) -> String {
        let id = self.id();
        self.nodes.lock().unwrap().push(Node {
            entry: RemoteEntry {
                id: id.clone(),
                name: name.to_string(),
                mime_type: "application/json".to_string(),
                modified_time: Some(modified),
                size: Some(content.len() as u64),
            },
            parent: parent.to_string(),
            content: content.to_string(),
        });
        id
    }

    pub fn set_content(&self, id: &str, content: &str, modified: DateTime<Utc>) {
        let mut nodes = self.nodes.lock().unwrap();
        let node = nodes.iter_mut().find(|n| n.entry.id == id).unwrap();
        node.content = content.to_string();
        node.entry.modified_time = Some(modified);
    }

    pub fn content(&self, id: &str) -> Option<String> {
        let nodes = self.nodes.lock().unwrap();
        nodes.iter().find(|n| n.entry.id == id).map(|n| n.content.clone())
    }

    /// Resolve a `/` path below `ROOT`.
    pub fn find_path(&self, path: &str) -> Option<RemoteEntry> {
        let nodes = self.nodes.lock().unwrap();
        let mut parent = ROOT.to_string();
        let mut found = None;
        for segment in path.split('/') {
            let node = nodes
                .iter()
                .find(|n| n.parent == parent && n.entry.name == segment)?;
            parent = node.entry.id.clone();
            found = Some(node.entry.clone());
        }
        found
    }

    pub fn file_count(&self) -> usize {
        let nodes = self.nodes.lock().unwrap();
        nodes.iter().filter(|n| !n.entry.is_folder()).count()
    }

    /// The stored sync-state document, if any run saved one.
    pub fn stored_metadata(&self) -> Option<SyncMetadataDocument> {
        let entry = self.find_path(".metadata/sync-state.json")?;
        let raw = self.content(&entry.id)?;
        Some(serde_json::from_str(&raw).unwrap())
    }

    pub fn put_metadata(&self, doc: &SyncMetadataDocument) {
        let folder = match self.find_path(".metadata") {
            Some(f) => f.id,
            None => self.add_folder(ROOT, ".metadata"),
        };
        let raw = serde_json::to_string_pretty(doc).unwrap();
        match self.find_path(".metadata/sync-state.json") {
            Some(existing) => self.set_content(&existing.id, &raw, Utc::now()),
            None => {
                self.add_file(&folder, "sync-state.json", &raw, Utc::now());
            }
        }
    }
}

#[async_trait]
impl RemoteStore for MemoryDrive {
    async fn list_files(
        &self,
        folder_id: &str,
        mime_type: Option<String>,
    ) -> SyncResult<Vec<RemoteEntry>> {
        let nodes = self.nodes.lock().unwrap();
        let mut entries: Vec<RemoteEntry> = nodes
            .iter()
            .filter(|n| n.parent == folder_id)
            .filter(|n| mime_type.as_ref().map_or(true, |m| &n.entry.mime_type == m))
            .map(|n| n.entry.clone())
            .collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn get_metadata(&self, file_id: &str) -> SyncResult<Option<RemoteEntry>> {
        let nodes = self.nodes.lock().unwrap();
        Ok(nodes.iter().find(|n| n.entry.id == file_id).map(|n| n.entry.clone()))
    }

    async fn download_text(&self, file_id: &str) -> SyncResult<String> {
        self.content(file_id)
            .ok_or_else(|| SyncError::NotFound(file_id.to_string()))
    }

    async fn create_file(&self, folder_id: &str, name: &str, content: &str) -> SyncResult<RemoteEntry> {
        let id = self.add_file(folder_id, name, content, Utc::now());
        Ok(self.get_metadata(&id).await?.unwrap())
    }

    async fn update_file(&self, file_id: &str, content: &str) -> SyncResult<RemoteEntry> {
        let mut nodes = self.nodes.lock().unwrap();
        let node = nodes
            .iter_mut()
            .find(|n| n.entry.id == file_id)
            .ok_or_else(|| SyncError::NotFound(file_id.to_string()))?;
        node.content = content.to_string();
        node.entry.modified_time = Some(Utc::now());
        Ok(node.entry.clone())
    }

    async fn create_folder(&self, parent_id: &str, name: &str) -> SyncResult<RemoteEntry> {
        let id = self.add_folder(parent_id, name);
        Ok(self.get_metadata(&id).await?.unwrap())
    }

    async fn find_folder(&self, parent_id: &str, name: &str) -> SyncResult<Option<RemoteEntry>> {
        let nodes = self.nodes.lock().unwrap();
        Ok(nodes
            .iter()
            .find(|n| n.parent == parent_id && n.entry.name == name && n.entry.is_folder())
            .map(|n| n.entry.clone()))
    }

    async fn delete_file(&self, file_id: &str) -> SyncResult<()> {
        self.nodes.lock().unwrap().retain(|n| n.entry.id != file_id);
        Ok(())
    }
}

/// Config pointing at a temporary repo and staging dir, with fast retries.
pub fn test_config(repo_root: &Path, staging_dir: &Path) -> Config {
    let mut config = Config::default();
    config.drive.folder_id = ROOT.to_string();
    config.github.owner = "acme".to_string();
    config.github.repo = "site".to_string();
    config.paths.repo_root = repo_root.to_path_buf();
    config.paths.staging_dir = staging_dir.to_path_buf();
    config.sync.retry = RetryPolicy {
        max_retries: 3,
        base_delay_ms: 1,
    };
    config
}

pub fn write_repo_file(config: &Config, relative: &str, content: &str) {
    let path = config.paths.content_path(relative);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
}

pub fn valid_page(slug: &str, title: &str) -> String {
    serde_json::json!({
        "meta": {
            "slug": slug,
            "permalink": format!("/{slug}"),
            "seo": {"title": title, "description": "A page"}
        },
        "content": {"title": title}
    })
    .to_string()
}
