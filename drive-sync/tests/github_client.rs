use drive_sync::github::GitHubClient;
use drive_sync_core::contract::{MergeMethod, MergeRequest, PullRequestDraft, RepoHost};
use serde_json::json;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client(server: &MockServer) -> GitHubClient {
    GitHubClient::new(server.uri(), "acme", "site", "ghp_test").unwrap()
}

fn draft() -> PullRequestDraft {
    PullRequestDraft {
        head: "content-updates".into(),
        base: "master".into(),
        title: "Content update from Google Drive".into(),
        body: "body".into(),
        labels: vec!["content-sync".into(), "automated".into()],
    }
}

fn pr_json(number: u64) -> serde_json::Value {
    json!({
        "number": number,
        "title": "Content update from Google Drive",
        "body": null,
        "html_url": format!("https://github.com/acme/site/pull/{number}")
    })
}

#[tokio::test]
async fn file_content_is_base64_decoded() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repos/acme/site/contents/src/data/pages/home.json"))
        .and(query_param("ref", "master"))
        .and(header("authorization", "Bearer ghp_test"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "path": "src/data/pages/home.json",
            "sha": "abc123",
            "content": "eyJh\nIjox\nfQ==\n",
            "encoding": "base64"
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/repos/acme/site/contents/missing.json"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let github = client(&server);
    let file = github
        .get_file_content("src/data/pages/home.json", "master")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(file.content, "{\"a\":1}");
    assert_eq!(file.sha, "abc123");
    assert_eq!(github.get_file_content("missing.json", "master").await.unwrap(), None);
}

#[tokio::test]
async fn latest_commit_asks_for_one_commit() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repos/acme/site/commits"))
        .and(query_param("path", "src/data/pages/home.json"))
        .and(query_param("sha", "master"))
        .and(query_param("per_page", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
            "sha": "c0ffee",
            "commit": {
                "author": {"name": "Dev", "date": "2024-05-01T12:00:00Z"},
                "message": "Edit home"
            }
        }])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/repos/acme/site/commits"))
        .and(query_param("path", "new.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let github = client(&server);
    let commit = github
        .latest_commit("src/data/pages/home.json", "master")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(commit.sha, "c0ffee");
    assert_eq!(commit.author, "Dev");
    assert_eq!(commit.date.to_rfc3339(), "2024-05-01T12:00:00+00:00");
    assert_eq!(github.latest_commit("new.json", "master").await.unwrap(), None);
}

#[tokio::test]
async fn new_pull_request_is_created_and_labelled() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repos/acme/site/pulls"))
        .and(query_param("head", "acme:content-updates"))
        .and(query_param("state", "open"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/repos/acme/site/pulls"))
        .and(body_json(json!({
            "title": "Content update from Google Drive",
            "head": "content-updates",
            "base": "master",
            "body": "body"
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(pr_json(5)))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/repos/acme/site/issues/5/labels"))
        .and(body_json(json!({"labels": ["content-sync", "automated"]})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&server)
        .await;

    let pr = client(&server)
        .create_or_update_pull_request(draft())
        .await
        .unwrap();
    assert_eq!(pr.number, 5);
    assert_eq!(pr.body, "");
}

#[tokio::test]
async fn open_pull_request_is_updated_in_place() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repos/acme/site/pulls"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([pr_json(9)])))
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .and(path("/repos/acme/site/pulls/9"))
        .and(body_json(json!({"title": "Content update from Google Drive", "body": "body"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(pr_json(9)))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;

    let pr = client(&server)
        .create_or_update_pull_request(draft())
        .await
        .unwrap();
    assert_eq!(pr.number, 9);
}

#[tokio::test]
async fn issue_creation_returns_number_and_url() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/repos/acme/site/issues"))
        .and(body_json(json!({
            "title": "Content validation failed",
            "body": "Validation errors",
            "labels": ["validation-error", "content"]
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "number": 12,
            "html_url": "https://github.com/acme/site/issues/12"
        })))
        .mount(&server)
        .await;

    let issue = client(&server)
        .create_issue(
            "Content validation failed",
            "Validation errors",
            vec!["validation-error".into(), "content".into()],
        )
        .await
        .unwrap();
    assert_eq!(issue.number, 12);
}

#[tokio::test]
async fn missing_branch_is_false() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repos/acme/site/branches/content-updates"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"name": "content-updates"})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/repos/acme/site/branches/nope"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let github = client(&server);
    assert!(github.branch_exists("content-updates").await.unwrap());
    assert!(!github.branch_exists("nope").await.unwrap());
}

#[tokio::test]
async fn merge_is_a_squash_put() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/repos/acme/site/pulls/5/merge"))
        .and(body_json(json!({
            "merge_method": "squash",
            "commit_title": "Content update from Google Drive (#5)",
            "commit_message": "body"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "sha": "m3rged",
            "merged": true,
            "message": "Pull Request successfully merged"
        })))
        .mount(&server)
        .await;

    let commit = client(&server)
        .merge_pull_request(
            5,
            MergeRequest {
                method: MergeMethod::Squash,
                commit_title: "Content update from Google Drive (#5)".into(),
                commit_message: "body".into(),
            },
        )
        .await
        .unwrap();
    assert!(commit.merged);
    assert_eq!(commit.sha, "m3rged");
}

#[tokio::test]
async fn secondary_rate_limit_is_recognised() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repos/acme/site/branches/master"))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({
            "message": "API rate limit exceeded for installation ID 1."
        })))
        .mount(&server)
        .await;

    let err = client(&server).branch_exists("master").await.unwrap_err();
    assert!(err.is_rate_limited());
}
