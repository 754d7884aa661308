//! One-time OAuth bootstrap: consent URL, local callback listener and code
//! exchange, ending in a `.drive-token.json` the other commands reuse.

use anyhow::{anyhow, Context, Result};
use axum::extract::{Query, State};
use axum::response::Html;
use axum::routing::get;
use axum::Router;
use drive_sync_core::error::SyncResult;
use reqwest::Client;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{oneshot, Mutex};
use tracing::{info, warn};

use crate::drive::{save_token, OAuthToken, TokenResponse, DRIVE_SCOPE};
use crate::http::{build_client, checked, network};

pub const CALLBACK_PORT: u16 = 3000;
pub const CALLBACK_PATH: &str = "/oauth2callback";
pub const AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
pub const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ClientSecret {
    pub client_id: String,
    pub client_secret: String,
    #[serde(default)]
    pub redirect_uris: Vec<String>,
}

/// `client_secret.json` as downloaded from the Google Cloud console.
#[derive(Debug, Deserialize)]
struct ClientSecretFile {
    installed: Option<ClientSecret>,
    web: Option<ClientSecret>,
}

pub fn read_client_secret(path: &Path) -> Result<ClientSecret> {
    let raw = fs::read_to_string(path).with_context(|| {
        format!(
            "Failed to read {}. Download OAuth client credentials from the Google Cloud console.",
            path.display()
        )
    })?;
    let file: ClientSecretFile =
        serde_json::from_str(&raw).with_context(|| format!("Failed to parse {}", path.display()))?;
    file.installed
        .or(file.web)
        .ok_or_else(|| anyhow!("{} has neither an `installed` nor a `web` section", path.display()))
}

pub fn redirect_uri(port: u16) -> String {
    format!("http://localhost:{port}{CALLBACK_PATH}")
}

pub fn consent_url(client_id: &str, redirect_uri: &str) -> String {
    format!(
        "{AUTH_URL}?client_id={}&redirect_uri={}&response_type=code&scope={}&access_type=offline&prompt=consent",
        urlencoding::encode(client_id),
        urlencoding::encode(redirect_uri),
        urlencoding::encode(DRIVE_SCOPE),
    )
}

pub async fn exchange_code(
    http: &Client,
    token_url: &str,
    secret: &ClientSecret,
    code: &str,
    redirect_uri: &str,
) -> SyncResult<OAuthToken> {
    let response = http
        .post(token_url)
        .form(&[
            ("code", code),
            ("client_id", secret.client_id.as_str()),
            ("client_secret", secret.client_secret.as_str()),
            ("redirect_uri", redirect_uri),
            ("grant_type", "authorization_code"),
        ])
        .send()
        .await
        .map_err(network)?;
    let token: TokenResponse = checked(response).await?.json().await.map_err(network)?;
    Ok(token.into_token(None))
}

#[derive(Debug, Deserialize)]
struct CallbackParams {
    code: Option<String>,
    error: Option<String>,
}

type CodeSender = Arc<Mutex<Option<oneshot::Sender<Result<String, String>>>>>;

async fn callback(
    State(sender): State<CodeSender>,
    Query(params): Query<CallbackParams>,
) -> Html<&'static str> {
    let outcome = match (params.code, params.error) {
        (Some(code), _) => Ok(code),
        (None, Some(error)) => Err(error),
        (None, None) => Err("callback carried no code".to_string()),
    };
    let accepted = outcome.is_ok();
    if let Some(tx) = sender.lock().await.take() {
        let _ = tx.send(outcome);
    }
    if accepted {
        Html("<h1>Authorization successful!</h1><p>You can close this window and return to the terminal.</p>")
    } else {
        Html("<h1>Authorization failed</h1><p>Check the terminal for details.</p>")
    }
}

/// Serve the callback route on `listener` until the first callback arrives,
/// then shut the server down and return the authorization code.
pub async fn wait_for_code(listener: TcpListener) -> Result<String> {
    let (code_tx, code_rx) = oneshot::channel::<Result<String, String>>();
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let app = Router::new()
        .route(CALLBACK_PATH, get(callback))
        .with_state(Arc::new(Mutex::new(Some(code_tx))) as CodeSender);

    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
    });

    let outcome = code_rx.await;
    let _ = shutdown_tx.send(());
    server
        .await
        .context("callback server task failed")?
        .context("callback server error")?;

    outcome
        .context("callback server stopped before a code arrived")?
        .map_err(|e| anyhow!("authorization was not granted: {e}"))
}

/// Full interactive flow for the `authorize` command.
pub async fn authorize(client_secret_path: &Path, token_path: &Path) -> Result<()> {
    let secret = read_client_secret(client_secret_path)?;
    let redirect = redirect_uri(CALLBACK_PORT);
    if !secret.redirect_uris.is_empty() && !secret.redirect_uris.contains(&redirect) {
        warn!(expected = %redirect, "Redirect URI is not registered for this OAuth client");
    }

    let listener = TcpListener::bind(("127.0.0.1", CALLBACK_PORT))
        .await
        .with_context(|| format!("Failed to listen on port {CALLBACK_PORT}"))?;
    println!("Authorize this app by visiting this URL:\n\n{}\n", consent_url(&secret.client_id, &redirect));
    info!(port = CALLBACK_PORT, "Waiting for OAuth callback");

    let code = wait_for_code(listener).await?;
    let http = build_client()?;
    let token = exchange_code(&http, TOKEN_URL, &secret, &code, &redirect).await?;
    if token.refresh_token.is_none() {
        warn!("No refresh token returned; revoke access and authorize again to obtain one");
    }
    save_token(&token, token_path)?;
    info!(path = %token_path.display(), "Token saved");
    println!("Authorization complete. Token stored in {}", token_path.display());
    Ok(())
}
