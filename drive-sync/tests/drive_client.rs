use chrono::Utc;
use drive_sync::drive::{ClientCredentials, GoogleDriveClient, GoogleEndpoints, OAuthToken};
use drive_sync_core::contract::RemoteStore;
use drive_sync_core::error::SyncError;
use serde_json::json;
use tempfile::tempdir;
use wiremock::matchers::{
    body_string, body_string_contains, header, method, path, query_param,
};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn token(access: &str) -> OAuthToken {
    OAuthToken {
        access_token: access.to_string(),
        refresh_token: None,
        expiry_date: None,
        token_type: Some("Bearer".into()),
        scope: None,
    }
}

fn endpoints(server: &MockServer) -> GoogleEndpoints {
    GoogleEndpoints {
        api_base_url: server.uri(),
        token_url: format!("{}/token", server.uri()),
    }
}

fn client(server: &MockServer) -> GoogleDriveClient {
    GoogleDriveClient::new(endpoints(server), token("tok"), None, None).unwrap()
}

fn file_json(id: &str, name: &str, mime: &str) -> serde_json::Value {
    json!({
        "id": id,
        "name": name,
        "mimeType": mime,
        "modifiedTime": "2024-05-01T12:00:00.000Z",
        "size": "2"
    })
}

#[tokio::test]
async fn list_follows_page_tokens() {
    let server = MockServer::start().await;
    // Registration order breaks ties, so the page-two mock goes first.
    Mock::given(method("GET"))
        .and(path("/drive/v3/files"))
        .and(query_param("pageToken", "p2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "files": [file_json("2", "blog", "application/vnd.google-apps.folder")]
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/drive/v3/files"))
        .and(header("authorization", "Bearer tok"))
        .and(query_param("q", "'root' in parents and trashed = false"))
        .and(query_param("orderBy", "name"))
        .and(query_param("pageSize", "1000"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "files": [file_json("1", "a.json", "application/json")],
            "nextPageToken": "p2"
        })))
        .expect(1)
        .mount(&server)
        .await;
    let entries = client(&server).list_files("root", None).await.unwrap();

    let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, vec!["a.json", "blog"]);
    assert_eq!(entries[0].size, Some(2));
    assert!(entries[1].is_folder());
}

#[tokio::test]
async fn missing_metadata_is_none() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/drive/v3/files/gone"))
        .respond_with(ResponseTemplate::new(404).set_body_string("File not found"))
        .mount(&server)
        .await;

    assert_eq!(client(&server).get_metadata("gone").await.unwrap(), None);
    let err = client(&server).download_text("gone").await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn quota_responses_are_rate_limits() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/drive/v3/files/busy"))
        .respond_with(ResponseTemplate::new(429))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/drive/v3/files/quota"))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({
            "error": {"errors": [{"reason": "rateLimitExceeded"}], "code": 403}
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/drive/v3/files/denied"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let drive = client(&server);
    assert!(drive.download_text("busy").await.unwrap_err().is_rate_limited());
    assert!(drive.download_text("quota").await.unwrap_err().is_rate_limited());
    assert!(matches!(
        drive.download_text("denied").await.unwrap_err(),
        SyncError::Auth(_)
    ));
}

#[tokio::test]
async fn expired_token_is_refreshed_and_persisted() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .and(body_string_contains("refresh_token=refresh-me"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "fresh",
            "expires_in": 3600,
            "token_type": "Bearer"
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/drive/v3/files/doc"))
        .and(query_param("alt", "media"))
        .and(header("authorization", "Bearer fresh"))
        .respond_with(ResponseTemplate::new(200).set_body_string("{\"a\":1}"))
        .expect(2)
        .mount(&server)
        .await;

    let dir = tempdir().unwrap();
    let token_file = dir.path().join(".drive-token.json");
    let expired = OAuthToken {
        refresh_token: Some("refresh-me".into()),
        expiry_date: Some(Utc::now().timestamp_millis() - 1_000),
        ..token("stale")
    };
    let drive = GoogleDriveClient::new(
        endpoints(&server),
        expired,
        Some(ClientCredentials {
            client_id: "id".into(),
            client_secret: "secret".into(),
        }),
        Some(token_file.clone()),
    )
    .unwrap();

    assert_eq!(drive.download_text("doc").await.unwrap(), "{\"a\":1}");
    assert_eq!(drive.download_text("doc").await.unwrap(), "{\"a\":1}");

    let saved: OAuthToken =
        serde_json::from_str(&std::fs::read_to_string(&token_file).unwrap()).unwrap();
    assert_eq!(saved.access_token, "fresh");
    assert_eq!(saved.refresh_token.as_deref(), Some("refresh-me"));
    assert!(saved.expiry_date.unwrap() > Utc::now().timestamp_millis());
}

#[tokio::test]
async fn expired_token_without_refresh_is_an_auth_error() {
    let server = MockServer::start().await;
    let expired = OAuthToken {
        expiry_date: Some(0),
        ..token("stale")
    };
    let drive = GoogleDriveClient::new(endpoints(&server), expired, None, None).unwrap();
    assert!(matches!(
        drive.download_text("doc").await.unwrap_err(),
        SyncError::Auth(_)
    ));
}

#[tokio::test]
async fn create_uses_multipart_upload() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/upload/drive/v3/files"))
        .and(query_param("uploadType", "multipart"))
        .and(header(
            "content-type",
            "multipart/related; boundary=drive-sync-multipart-boundary",
        ))
        .and(body_string_contains("\"name\":\"home.json\""))
        .and(body_string_contains("\"parents\":[\"folder\"]"))
        .and(body_string_contains("{\"hero\":{}}"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(file_json("new", "home.json", "application/json")),
        )
        .expect(1)
        .mount(&server)
        .await;

    let entry = client(&server)
        .create_file("folder", "home.json", "{\"hero\":{}}")
        .await
        .unwrap();
    assert_eq!(entry.id, "new");
}

#[tokio::test]
async fn update_patches_media() {
    let server = MockServer::start().await;
    Mock::given(method("PATCH"))
        .and(path("/upload/drive/v3/files/abc"))
        .and(query_param("uploadType", "media"))
        .and(body_string("{\"b\":2}"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(file_json("abc", "a.json", "application/json")),
        )
        .expect(1)
        .mount(&server)
        .await;

    let entry = client(&server).update_file("abc", "{\"b\":2}").await.unwrap();
    assert_eq!(entry.name, "a.json");
}

#[tokio::test]
async fn folders_are_found_by_name_and_created_with_folder_mime() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/drive/v3/files"))
        .and(query_param(
            "q",
            "'root' in parents and name = '.metadata' and mimeType = 'application/vnd.google-apps.folder' and trashed = false",
        ))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"files": []})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/drive/v3/files"))
        .and(body_string_contains("application/vnd.google-apps.folder"))
        .respond_with(ResponseTemplate::new(200).set_body_json(file_json(
            "meta",
            ".metadata",
            "application/vnd.google-apps.folder",
        )))
        .expect(1)
        .mount(&server)
        .await;

    let drive = client(&server);
    assert_eq!(drive.find_folder("root", ".metadata").await.unwrap(), None);
    let folder = drive.create_folder("root", ".metadata").await.unwrap();
    assert_eq!(folder.id, "meta");
}
