//! Carga y gestión de configuración de la aplicación (Sentinel Hub, Neo4j,
//! almacenamiento y LLM).

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use url::Url;

#[derive(Clone, Debug)]
pub enum LlmProvider {
    OpenAI,
}

impl LlmProvider {
    pub fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAI),
            other => Err(anyhow!("Proveedor LLM no soportado: {other}")),
        }
    }
}

/// Credenciales y endpoints de Sentinel Hub.
#[derive(Clone, Debug)]
pub struct SentinelConfig {
    pub client_id: String,
    pub client_secret: String,
    pub token_url: String,
    pub process_url: String,
    pub timeout: Duration,
}

/// Configuración completa de la aplicación.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub neo4j_uri: String,
    pub neo4j_user: String,
    pub neo4j_password: String,
    pub server_addr: String,

    pub sentinel: SentinelConfig,

    /// Raíz de los ficheros descargados.
    pub storage_root: PathBuf,
    /// URL pública desde la que se sirven los ficheros de `storage_root`.
    pub cdn_base_url: Url,

    pub llm_provider: LlmProvider,
    pub llm_vision_model: String,
}

impl AppConfig {
    /// Carga la configuración desde variables de entorno (usando .env si existe).
    pub fn from_env() -> Result<Self> {
        let neo4j_uri = env::var("NEO4J_URI")
            .map_err(|_| anyhow!("Falta NEO4J_URI en el entorno"))?;
        let neo4j_user = env::var("NEO4J_USER")
            .map_err(|_| anyhow!("Falta NEO4J_USER en el entorno"))?;
        let neo4j_password = env::var("NEO4J_PASSWORD")
            .map_err(|_| anyhow!("Falta NEO4J_PASSWORD en el entorno"))?;

        let server_addr =
            env::var("SERVER_ADDR").unwrap_or_else(|_| "0.0.0.0:8000".to_string());

        let sentinel = SentinelConfig::from_env()?;

        let storage_root = PathBuf::from(
            env::var("STORAGE_CONTAINER_PATH").unwrap_or_else(|_| "images".to_string()),
        );
        let cdn_base_url = parse_base_url(
            &env::var("CDN_BASE_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:8000/imagenes/".to_string()),
        )?;

        let llm_provider_str =
            env::var("LLM_PROVIDER").unwrap_or_else(|_| "openai".to_string());
        let llm_provider = LlmProvider::from_str(&llm_provider_str)?;
        let llm_vision_model =
            env::var("LLM_VISION_MODEL").unwrap_or_else(|_| "gpt-4o".to_string());

        Ok(Self {
            neo4j_uri,
            neo4j_user,
            neo4j_password,
            server_addr,
            sentinel,
            storage_root,
            cdn_base_url,
            llm_provider,
            llm_vision_model,
        })
    }
}

impl SentinelConfig {
    pub fn from_env() -> Result<Self> {
        let client_id = env::var("SENTINEL_CLIENT_ID")
            .map_err(|_| anyhow!("Falta SENTINEL_CLIENT_ID en el entorno"))?;
        let client_secret = env::var("SENTINEL_CLIENT_SECRET")
            .map_err(|_| anyhow!("Falta SENTINEL_CLIENT_SECRET en el entorno"))?;

        let token_url = env::var("SENTINEL_TOKEN_URL")
            .unwrap_or_else(|_| "https://services.sentinel-hub.com/oauth/token".to_string());
        let process_url = env::var("SENTINEL_PROCESS_URL")
            .unwrap_or_else(|_| "https://services.sentinel-hub.com/api/v1/process".to_string());

        let timeout_secs = match env::var("SENTINEL_TIMEOUT_SECS") {
            Ok(raw) => raw
                .parse::<u64>()
                .with_context(|| format!("SENTINEL_TIMEOUT_SECS inválido: {raw}"))?,
            Err(_) => 120,
        };

        Ok(Self {
            client_id,
            client_secret,
            token_url,
            process_url,
            timeout: Duration::from_secs(timeout_secs),
        })
    }
}

/// Normaliza la URL base para que `Url::join` conserve el último segmento.
pub fn parse_base_url(raw: &str) -> Result<Url> {
    let with_slash = if raw.ends_with('/') {
        raw.to_string()
    } else {
        format!("{raw}/")
    };
    Url::parse(&with_slash).with_context(|| format!("CDN_BASE_URL inválida: {raw}"))
}
