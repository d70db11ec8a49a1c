//! Gestión del token OAuth2 (client credentials) de Sentinel Hub.
//!
//! No hay reloj local de caducidad: el cliente de descargas detecta el 401,
//! invalida el token y vuelve a pedir uno.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::SentinelConfig;
use crate::error::{DiagnosisError, DiagnosisResult};

/// Fuente de tokens bearer para el Process API.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Devuelve el token vigente, autenticándose si no hay ninguno.
    async fn acquire(&self) -> DiagnosisResult<String>;

    /// Descarta `stale` para que el próximo `acquire` se reautentique.
    /// Si el token ya fue renovado por otra petición no hace nada.
    async fn invalidate(&self, stale: &str);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenState {
    Unauthenticated,
    Authenticated(String),
    Expired,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// Implementación contra el endpoint OAuth de Sentinel Hub.
pub struct SentinelTokenManager {
    client: Client,
    token_url: String,
    client_id: String,
    client_secret: String,
    state: Mutex<TokenState>,
}

impl SentinelTokenManager {
    pub fn new(client: Client, cfg: &SentinelConfig) -> Self {
        Self {
            client,
            token_url: cfg.token_url.clone(),
            client_id: cfg.client_id.clone(),
            client_secret: cfg.client_secret.clone(),
            state: Mutex::new(TokenState::Unauthenticated),
        }
    }

    pub async fn state(&self) -> TokenState {
        self.state.lock().await.clone()
    }

    async fn exchange_credentials(&self) -> DiagnosisResult<String> {
        info!(url = %self.token_url, "Solicitando token de acceso a Sentinel Hub");

        let form = [
            ("grant_type", "client_credentials"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
        ];
        let response = self
            .client
            .post(&self.token_url)
            .form(&form)
            .send()
            .await
            .map_err(|e| DiagnosisError::FetchError {
                status: e.status().map(|s| s.as_u16()).unwrap_or(0),
                body: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), "Sentinel Hub rechazó las credenciales");
            return Err(DiagnosisError::AuthenticationError {
                status: status.as_u16(),
                body,
            });
        }

        let body = response.text().await.unwrap_or_default();
        let parsed: TokenResponse =
            serde_json::from_str(&body).map_err(|e| DiagnosisError::AuthenticationError {
                status: status.as_u16(),
                body: format!("respuesta de token inválida: {e}"),
            })?;

        info!("Token de Sentinel Hub obtenido");
        Ok(parsed.access_token)
    }
}

#[async_trait]
impl TokenProvider for SentinelTokenManager {
    async fn acquire(&self) -> DiagnosisResult<String> {
        // El lock se mantiene durante el intercambio: peticiones concurrentes
        // esperan a esta renovación en vez de lanzar la suya.
        let mut state = self.state.lock().await;
        if let TokenState::Authenticated(token) = &*state {
            return Ok(token.clone());
        }

        let token = self.exchange_credentials().await?;
        *state = TokenState::Authenticated(token.clone());
        Ok(token)
    }

    async fn invalidate(&self, stale: &str) {
        let mut state = self.state.lock().await;
        if matches!(&*state, TokenState::Authenticated(current) if current == stale) {
            info!("Token de Sentinel Hub invalidado");
            *state = TokenState::Expired;
        }
    }
}
