//! Google Drive v3 implementation of [`RemoteStore`].
//!
//! Requests carry an OAuth bearer token. When the token carries an expiry and
//! a refresh token, it is refreshed shortly before it lapses and the new token
//! is written back to the token file when one is configured.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use drive_sync_core::contract::{RemoteEntry, RemoteStore, FOLDER_MIME_TYPE};
use drive_sync_core::error::{SyncError, SyncResult};
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fs;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::http::{build_client, checked, network};
use crate::load_config::Secrets;

pub const TOKEN_FILE: &str = ".drive-token.json";
pub const DRIVE_SCOPE: &str = "https://www.googleapis.com/auth/drive.file";

const FILE_FIELDS: &str = "id,name,mimeType,modifiedTime,size";
const LIST_FIELDS: &str = "nextPageToken,files(id,name,mimeType,modifiedTime,size)";
const MULTIPART_BOUNDARY: &str = "drive-sync-multipart-boundary";
/// Refresh this long before the recorded expiry.
const EXPIRY_SKEW_MS: i64 = 60_000;

/// OAuth token as stored in `.drive-token.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OAuthToken {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Milliseconds since the epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry_date: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

impl OAuthToken {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiry_date
            .is_some_and(|expiry| expiry - EXPIRY_SKEW_MS <= now.timestamp_millis())
    }
}

/// Response of the Google token endpoint.
#[derive(Debug, Deserialize)]
pub(crate) struct TokenResponse {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in: Option<i64>,
    pub token_type: Option<String>,
    pub scope: Option<String>,
}

impl TokenResponse {
    pub(crate) fn into_token(self, previous_refresh: Option<String>) -> OAuthToken {
        OAuthToken {
            access_token: self.access_token,
            refresh_token: self.refresh_token.or(previous_refresh),
            expiry_date: self
                .expires_in
                .map(|secs| Utc::now().timestamp_millis() + secs * 1000),
            token_type: self.token_type,
            scope: self.scope,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClientCredentials {
    pub client_id: String,
    pub client_secret: String,
}

#[derive(Debug, Clone)]
pub struct GoogleEndpoints {
    pub api_base_url: String,
    pub token_url: String,
}

impl Default for GoogleEndpoints {
    fn default() -> Self {
        Self {
            api_base_url: "https://www.googleapis.com".to_string(),
            token_url: "https://oauth2.googleapis.com/token".to_string(),
        }
    }
}

/// Token from `GOOGLE_DRIVE_CREDENTIALS`, else from `token_file`.
pub fn load_token(secrets: &Secrets, token_file: &Path) -> SyncResult<OAuthToken> {
    if let Some(raw) = &secrets.drive_credentials {
        debug!("Using Drive credentials from environment");
        return serde_json::from_str(raw)
            .map_err(|e| SyncError::Config(format!("GOOGLE_DRIVE_CREDENTIALS is not a token: {e}")));
    }
    match fs::read_to_string(token_file) {
        Ok(raw) => {
            debug!(path = %token_file.display(), "Using Drive token file");
            Ok(serde_json::from_str(&raw)?)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(SyncError::Auth(
            "Google Drive credentials not found. Run `drive-sync authorize` first.".to_string(),
        )),
        Err(e) => Err(SyncError::io(token_file, e)),
    }
}

pub fn save_token(token: &OAuthToken, token_file: &Path) -> SyncResult<()> {
    let raw = serde_json::to_string_pretty(token)?;
    fs::write(token_file, raw).map_err(|e| SyncError::io(token_file, e))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DriveFile {
    id: String,
    name: String,
    mime_type: String,
    modified_time: Option<DateTime<Utc>>,
    /// Drive reports sizes as decimal strings.
    size: Option<String>,
}

impl From<DriveFile> for RemoteEntry {
    fn from(file: DriveFile) -> Self {
        RemoteEntry {
            id: file.id,
            name: file.name,
            mime_type: file.mime_type,
            modified_time: file.modified_time,
            size: file.size.and_then(|s| s.parse().ok()),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileList {
    #[serde(default)]
    files: Vec<DriveFile>,
    next_page_token: Option<String>,
}

fn escape_query(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

pub struct GoogleDriveClient {
    http: Client,
    endpoints: GoogleEndpoints,
    token: RwLock<OAuthToken>,
    credentials: Option<ClientCredentials>,
    token_file: Option<PathBuf>,
}

impl GoogleDriveClient {
    pub fn new(
        endpoints: GoogleEndpoints,
        token: OAuthToken,
        credentials: Option<ClientCredentials>,
        token_file: Option<PathBuf>,
    ) -> SyncResult<Self> {
        Ok(Self {
            http: build_client()?,
            endpoints,
            token: RwLock::new(token),
            credentials,
            token_file,
        })
    }

    /// Client for the public Google endpoints using the CLI's secrets.
    pub fn from_secrets(secrets: &Secrets) -> SyncResult<Self> {
        let token_file = PathBuf::from(TOKEN_FILE);
        let token = load_token(secrets, &token_file)?;
        let credentials = match (&secrets.google_client_id, &secrets.google_client_secret) {
            (Some(id), Some(secret)) => Some(ClientCredentials {
                client_id: id.clone(),
                client_secret: secret.clone(),
            }),
            _ => None,
        };
        // Tokens from the environment are not written back to disk.
        let persist = secrets.drive_credentials.is_none().then_some(token_file);
        info!(
            refreshable = credentials.is_some() && token.refresh_token.is_some(),
            "Initialized Google Drive client"
        );
        Self::new(GoogleEndpoints::default(), token, credentials, persist)
    }

    fn files_url(&self) -> String {
        format!("{}/drive/v3/files", self.endpoints.api_base_url)
    }

    fn upload_url(&self) -> String {
        format!("{}/upload/drive/v3/files", self.endpoints.api_base_url)
    }

    async fn access_token(&self) -> SyncResult<String> {
        {
            let token = self.token.read().await;
            if !token.is_expired(Utc::now()) {
                return Ok(token.access_token.clone());
            }
        }

        let mut token = self.token.write().await;
        if !token.is_expired(Utc::now()) {
            return Ok(token.access_token.clone());
        }
        let (Some(credentials), Some(refresh)) = (&self.credentials, token.refresh_token.clone()) else {
            return Err(SyncError::Auth(
                "access token expired and cannot be refreshed".to_string(),
            ));
        };

        info!("Refreshing Google access token");
        let response = self
            .http
            .post(&self.endpoints.token_url)
            .form(&[
                ("client_id", credentials.client_id.as_str()),
                ("client_secret", credentials.client_secret.as_str()),
                ("refresh_token", refresh.as_str()),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await
            .map_err(network)?;
        let refreshed: TokenResponse = checked(response).await?.json().await.map_err(network)?;
        *token = refreshed.into_token(Some(refresh));

        if let Some(path) = &self.token_file {
            if let Err(e) = save_token(&token, path) {
                warn!(error = %e, path = %path.display(), "Could not persist refreshed token");
            }
        }
        Ok(token.access_token.clone())
    }

    async fn list_query(&self, query: &str) -> SyncResult<Vec<RemoteEntry>> {
        let mut entries = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut params = vec![
                ("q", query.to_string()),
                ("orderBy", "name".to_string()),
                ("pageSize", "1000".to_string()),
                ("fields", LIST_FIELDS.to_string()),
            ];
            if let Some(token) = page_token.take() {
                params.push(("pageToken", token));
            }
            let response = self
                .http
                .get(self.files_url())
                .bearer_auth(self.access_token().await?)
                .query(&params)
                .send()
                .await
                .map_err(network)?;
            let page: FileList = checked(response).await?.json().await.map_err(network)?;
            entries.extend(page.files.into_iter().map(RemoteEntry::from));
            match page.next_page_token {
                Some(next) => page_token = Some(next),
                None => break,
            }
        }
        Ok(entries)
    }
}

#[async_trait]
impl RemoteStore for GoogleDriveClient {
    async fn list_files(
        &self,
        folder_id: &str,
        mime_type: Option<String>,
    ) -> SyncResult<Vec<RemoteEntry>> {
        let mut query = format!("'{}' in parents and trashed = false", escape_query(folder_id));
        if let Some(mime) = mime_type {
            query.push_str(&format!(" and mimeType='{}'", escape_query(&mime)));
        }
        let entries = self.list_query(&query).await?;
        debug!(folder_id, count = entries.len(), "Listed Drive folder");
        Ok(entries)
    }

    async fn get_metadata(&self, file_id: &str) -> SyncResult<Option<RemoteEntry>> {
        let response = self
            .http
            .get(format!("{}/{}", self.files_url(), file_id))
            .bearer_auth(self.access_token().await?)
            .query(&[("fields", FILE_FIELDS)])
            .send()
            .await
            .map_err(network)?;
        match checked(response).await {
            Ok(response) => Ok(Some(
                response.json::<DriveFile>().await.map_err(network)?.into(),
            )),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn download_text(&self, file_id: &str) -> SyncResult<String> {
        let response = self
            .http
            .get(format!("{}/{}", self.files_url(), file_id))
            .bearer_auth(self.access_token().await?)
            .query(&[("alt", "media")])
            .send()
            .await
            .map_err(network)?;
        checked(response).await?.text().await.map_err(network)
    }

    async fn create_file(&self, folder_id: &str, name: &str, content: &str) -> SyncResult<RemoteEntry> {
        let metadata = json!({
            "name": name,
            "parents": [folder_id],
            "mimeType": "application/json",
        });
        let body = format!(
            "--{b}\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n{metadata}\r\n\
             --{b}\r\nContent-Type: application/json\r\n\r\n{content}\r\n--{b}--",
            b = MULTIPART_BOUNDARY,
        );
        let response = self
            .http
            .post(self.upload_url())
            .bearer_auth(self.access_token().await?)
            .query(&[("uploadType", "multipart"), ("fields", FILE_FIELDS)])
            .header(
                CONTENT_TYPE,
                format!("multipart/related; boundary={MULTIPART_BOUNDARY}"),
            )
            .body(body)
            .send()
            .await
            .map_err(network)?;
        let file: DriveFile = checked(response).await?.json().await.map_err(network)?;
        info!(file_id = %file.id, name, folder_id, "Created Drive file");
        Ok(file.into())
    }

    async fn update_file(&self, file_id: &str, content: &str) -> SyncResult<RemoteEntry> {
        let response = self
            .http
            .patch(format!("{}/{}", self.upload_url(), file_id))
            .bearer_auth(self.access_token().await?)
            .query(&[("uploadType", "media"), ("fields", FILE_FIELDS)])
            .header(CONTENT_TYPE, "application/json")
            .body(content.to_string())
            .send()
            .await
            .map_err(network)?;
        let file: DriveFile = checked(response).await?.json().await.map_err(network)?;
        debug!(file_id, "Updated Drive file");
        Ok(file.into())
    }

    async fn create_folder(&self, parent_id: &str, name: &str) -> SyncResult<RemoteEntry> {
        let response = self
            .http
            .post(self.files_url())
            .bearer_auth(self.access_token().await?)
            .query(&[("fields", FILE_FIELDS)])
            .json(&json!({
                "name": name,
                "mimeType": FOLDER_MIME_TYPE,
                "parents": [parent_id],
            }))
            .send()
            .await
            .map_err(network)?;
        let folder: DriveFile = checked(response).await?.json().await.map_err(network)?;
        info!(folder_id = %folder.id, name, parent_id, "Created Drive folder");
        Ok(folder.into())
    }

    async fn find_folder(&self, parent_id: &str, name: &str) -> SyncResult<Option<RemoteEntry>> {
        let query = format!(
            "'{}' in parents and name = '{}' and mimeType = '{}' and trashed = false",
            escape_query(parent_id),
            escape_query(name),
            FOLDER_MIME_TYPE
        );
        Ok(self.list_query(&query).await?.into_iter().next())
    }

    async fn delete_file(&self, file_id: &str) -> SyncResult<()> {
        let response = self
            .http
            .delete(format!("{}/{}", self.files_url(), file_id))
            .bearer_auth(self.access_token().await?)
            .send()
            .await
            .map_err(network)?;
        checked(response).await?;
        info!(file_id, "Deleted Drive file");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expiry_is_checked_with_skew() {
        let now = Utc::now();
        let mut token = OAuthToken {
            access_token: "a".into(),
            refresh_token: None,
            expiry_date: None,
            token_type: None,
            scope: None,
        };
        assert!(!token.is_expired(now));
        token.expiry_date = Some(now.timestamp_millis() + 30_000);
        assert!(token.is_expired(now));
        token.expiry_date = Some(now.timestamp_millis() + 10 * 60_000);
        assert!(!token.is_expired(now));
    }

    #[test]
    fn query_values_are_escaped() {
        assert_eq!(escape_query("it's"), "it\\'s");
    }

    #[test]
    fn string_sizes_are_parsed() {
        let file: DriveFile = serde_json::from_str(
            r#"{"id":"1","name":"a.json","mimeType":"application/json","size":"42"}"#,
        )
        .unwrap();
        assert_eq!(RemoteEntry::from(file).size, Some(42));
    }
}
