//! Cliente HTTP del Process API de Sentinel Hub.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use bytes::Bytes;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Client, Response, StatusCode};
use tracing::{info, warn};

use crate::error::{DiagnosisError, DiagnosisResult};
use crate::request::ProcessRequest;
use crate::token::TokenProvider;

/// Formato multi-fichero que se pide al Process API.
pub const ARCHIVE_MEDIA_TYPE: &str = "application/tar";

/// Crea el cliente HTTP compartido con un timeout explícito.
pub fn build_http_client(timeout: Duration) -> anyhow::Result<Client> {
    Client::builder()
        .timeout(timeout)
        .build()
        .context("No se pudo crear el cliente HTTP")
}

pub struct ImageryClient {
    client: Client,
    process_url: String,
    tokens: Arc<dyn TokenProvider>,
}

impl ImageryClient {
    pub fn new(client: Client, process_url: impl Into<String>, tokens: Arc<dyn TokenProvider>) -> Self {
        Self {
            client,
            process_url: process_url.into(),
            tokens,
        }
    }

    /// Ejecuta la petición y devuelve el tar con todas las salidas.
    ///
    /// Ante un 401 invalida el token, obtiene uno nuevo y reintenta una sola
    /// vez. Cualquier otro estado no exitoso (incluido un segundo 401) se
    /// devuelve como `FetchError` sin más reintentos.
    pub async fn fetch(&self, payload: &ProcessRequest) -> DiagnosisResult<Bytes> {
        let token = self.tokens.acquire().await?;
        let mut response = self.post(payload, &token).await?;

        if response.status() == StatusCode::UNAUTHORIZED {
            warn!("Token de Sentinel Hub caducado (401), renovando y reintentando");
            self.tokens.invalidate(&token).await;
            let refreshed = self.tokens.acquire().await?;
            response = self.post(payload, &refreshed).await?;
        }

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DiagnosisError::FetchError {
                status: status.as_u16(),
                body,
            });
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        if !is_archive(&content_type) {
            return Err(DiagnosisError::UnexpectedResponseFormat { content_type });
        }

        let bytes = response.bytes().await.map_err(transport_error)?;
        info!(bytes = bytes.len(), "Imágenes recibidas de Sentinel Hub");
        Ok(bytes)
    }

    async fn post(&self, payload: &ProcessRequest, token: &str) -> DiagnosisResult<Response> {
        self.client
            .post(&self.process_url)
            .bearer_auth(token)
            .header(ACCEPT, ARCHIVE_MEDIA_TYPE)
            .json(payload)
            .send()
            .await
            .map_err(transport_error)
    }
}

/// Acepta `application/tar` y `application/x-tar`, con o sin parámetros.
fn is_archive(content_type: &str) -> bool {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    matches!(essence.as_str(), "application/tar" | "application/x-tar")
}

fn transport_error(e: reqwest::Error) -> DiagnosisError {
    let body = if e.is_timeout() {
        format!("timeout: {e}")
    } else {
        e.to_string()
    };
    DiagnosisError::FetchError {
        status: e.status().map(|s| s.as_u16()).unwrap_or(0),
        body,
    }
}
