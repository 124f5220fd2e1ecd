#![doc = "HTTP session client: bridges the core SessionClient contract to the remote REST API."]
//
//! # Session client (CLI <-> remote API)
//!
//! [`HttpSessionClient`] implements [`flowsync_core::contract::SessionClient`]
//! on top of `reqwest`.
//!
//! - Requests go to `{base}api/v1/{path}` with a bearer token.
//! - Tokens come from `{base}authn/tokenExchange`, authenticated with the
//!   access key and secret key as HTTP basic credentials.
//! - A 401 or 403 triggers one token exchange and one retry.
//! - A 404 is reported as [`ClientError::NotFound`]; anything else that
//!   fails is [`ClientError::Transport`].
//!
//! Construct it from a [`ClientConfig`] (see [`crate::load_config`]).

use std::sync::Mutex;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Method, StatusCode};
use serde_json::Value;

use flowsync_core::contract::SessionClient;
use flowsync_core::ClientError;

use crate::load_config::ClientConfig;

const SERVICE_HEADER: &str = "X-Service-Name";

pub struct HttpSessionClient {
    http: reqwest::Client,
    base: String,
    access_key: String,
    secret_key: String,
    token: Mutex<Option<String>>,
}

fn transport(e: impl std::fmt::Display) -> ClientError {
    ClientError::Transport(e.to_string())
}

impl HttpSessionClient {
    /// A host without scheme is reached over HTTPS.
    pub fn new(config: &ClientConfig) -> anyhow::Result<Self> {
        let host = config.host.trim_end_matches('/');
        let base = if host.starts_with("http://") || host.starts_with("https://") {
            format!("{host}/")
        } else {
            format!("https://{host}/")
        };
        let http = reqwest::Client::builder().build()?;
        tracing::info!(base = %base, "Initialized session client");
        Ok(HttpSessionClient {
            http,
            base,
            access_key: config.access_key.clone(),
            secret_key: config.secret_key.clone(),
            token: Mutex::new(None),
        })
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}api/v1/{}", self.base, path.trim_start_matches('/'))
    }

    fn cached_token(&self) -> Option<String> {
        self.token.lock().ok().and_then(|t| t.clone())
    }

    async fn exchange_tokens(&self) -> Result<String, ClientError> {
        tracing::info!("Exchanging tokens");
        let resp = self
            .http
            .post(format!("{}authn/tokenExchange", self.base))
            .basic_auth(&self.access_key, Some(&self.secret_key))
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = ?e, "Token exchange request failed");
                transport(e)
            })?;
        let status = resp.status();
        if !status.is_success() {
            tracing::error!(%status, "Token exchange rejected");
            return Err(ClientError::Transport(format!(
                "token exchange failed with {status}"
            )));
        }
        let body: Value = resp.json().await.map_err(transport)?;
        let token = body
            .pointer("/data/access_token")
            .and_then(Value::as_str)
            .ok_or_else(|| ClientError::Transport("token exchange without access_token".into()))?
            .to_string();
        if let Ok(mut slot) = self.token.lock() {
            *slot = Some(token.clone());
        }
        Ok(token)
    }

    async fn bearer(&self) -> Result<String, ClientError> {
        match self.cached_token() {
            Some(token) => Ok(token),
            None => self.exchange_tokens().await,
        }
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        query: &[(String, String)],
    ) -> Result<reqwest::Response, ClientError> {
        let url = self.api_url(path);
        let mut refreshed = false;
        loop {
            let token = self.bearer().await?;
            let mut request = self
                .http
                .request(method.clone(), &url)
                .bearer_auth(&token)
                .header(SERVICE_HEADER, "flowsync")
                .query(query);
            if let Some(body) = body {
                request = request.json(body);
            }
            let resp = request.send().await.map_err(|e| {
                tracing::error!(error = ?e, %method, path, "Request failed");
                transport(e)
            })?;
            let status = resp.status();
            if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) && !refreshed {
                tracing::info!(%status, %method, path, "Refreshing tokens and retrying");
                refreshed = true;
                self.exchange_tokens().await?;
                continue;
            }
            if status == StatusCode::NOT_FOUND {
                tracing::debug!(%method, path, "Not found");
                return Err(ClientError::NotFound(path.to_string()));
            }
            if !status.is_success() {
                let text = resp.text().await.unwrap_or_default();
                tracing::error!(%status, %method, path, body = %text, "API error");
                return Err(ClientError::Transport(format!(
                    "{method} {path} failed with {status}: {text}"
                )));
            }
            tracing::debug!(%status, %method, path, "Request succeeded");
            return Ok(resp);
        }
    }
}

fn push_row(line: &[u8], rows: &mut Vec<Value>) -> Result<(), ClientError> {
    let line = line.trim_ascii();
    if line.is_empty() {
        return Ok(());
    }
    rows.push(serde_json::from_slice(line).map_err(transport)?);
    Ok(())
}

#[async_trait]
impl SessionClient for HttpSessionClient {
    async fn get(&self, path: &str) -> Result<Value, ClientError> {
        let resp = self.send(Method::GET, path, None, &[]).await?;
        resp.json().await.map_err(transport)
    }

    async fn post(&self, path: &str, document: Value) -> Result<u16, ClientError> {
        let resp = self.send(Method::POST, path, Some(&document), &[]).await?;
        Ok(resp.status().as_u16())
    }

    async fn patch(&self, path: &str, document: Value) -> Result<u16, ClientError> {
        let resp = self.send(Method::PATCH, path, Some(&document), &[]).await?;
        Ok(resp.status().as_u16())
    }

    async fn delete(&self, path: &str) -> Result<u16, ClientError> {
        let resp = self.send(Method::DELETE, path, None, &[]).await?;
        Ok(resp.status().as_u16())
    }

    async fn stream(
        &self,
        path: &str,
        query: Vec<(String, String)>,
    ) -> Result<Vec<Value>, ClientError> {
        let resp = self.send(Method::GET, path, None, &query).await?;
        let mut body = resp.bytes_stream();
        let mut buffer: Vec<u8> = Vec::new();
        let mut rows = Vec::new();
        while let Some(chunk) = body.next().await {
            buffer.extend_from_slice(&chunk.map_err(transport)?);
            while let Some(end) = buffer.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = buffer.drain(..=end).collect();
                push_row(&line, &mut rows)?;
            }
        }
        push_row(&buffer, &mut rows)?;
        tracing::debug!(path, rows = rows.len(), "Streamed records");
        Ok(rows)
    }
}
