//! Abstracción sobre Rig para evaluar las imágenes de un diagnóstico con un
//! modelo de visión. De momento se implementa OpenAI.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use rig::completion::message::{ImageDetail, Message, UserContent};
use rig::completion::Prompt;
use rig::OneOrMany;
use tracing::info;

use crate::catalog::TipoDiagnostico;
use crate::config::{AppConfig, LlmProvider};

/// Longitud máxima de la evaluación que se pide al modelo.
pub const MAX_EVALUATION_CHARS: usize = 2800;

/// Modelo que describe un conjunto de imágenes para un tipo de diagnóstico.
#[async_trait]
pub trait ImageEvaluator: Send + Sync {
    /// Devuelve la evaluación en Markdown.
    async fn evaluate(&self, tipo: TipoDiagnostico, image_urls: &[String]) -> Result<String>;
}

/// Gestor de LLMs.
#[derive(Debug, Clone)]
pub struct LlmManager {
    pub provider: LlmProvider,
    pub vision_model: String,
}

impl LlmManager {
    /// Construye el manager a partir de la configuración.
    pub fn from_config(cfg: &AppConfig) -> Result<Self> {
        Ok(Self {
            provider: cfg.llm_provider.clone(),
            vision_model: cfg.llm_vision_model.clone(),
        })
    }

    async fn evaluate_with_openai(
        &self,
        tipo: TipoDiagnostico,
        image_urls: &[String],
    ) -> Result<String> {
        use rig::providers::openai;
        // Trait para client.agent(...)
        use rig::client::CompletionClient as _;

        let client = openai::Client::from_env();

        let model_name = if self.vision_model.is_empty() {
            "gpt-4o"
        } else {
            self.vision_model.as_str()
        };

        let agent = client.agent(model_name).max_tokens(1000).build();

        let message = build_message(tipo, image_urls)?;
        let answer = agent.prompt(message).await?;
        Ok(answer.trim().to_string())
    }
}

#[async_trait]
impl ImageEvaluator for LlmManager {
    async fn evaluate(&self, tipo: TipoDiagnostico, image_urls: &[String]) -> Result<String> {
        info!(tipo = %tipo, imagenes = image_urls.len(), "Solicitando evaluación al modelo");
        match self.provider {
            LlmProvider::OpenAI => self.evaluate_with_openai(tipo, image_urls).await,
        }
    }
}

/// Instrucciones para el modelo, en función del tipo de diagnóstico.
pub fn instructions(tipo: TipoDiagnostico) -> String {
    format!(
        "Analiza estas imágenes satelitales para: {etiqueta}. Indica si hay alguna \
         enfermedad o plaga, de qué tipo es y si es necesario aplicar algún tratamiento. \
         Determina si hace falta un análisis más profundo y qué tipo de análisis sería. \
         La respuesta debe estar en formato Markdown y contener como máximo \
         {MAX_EVALUATION_CHARS} caracteres con espacios.",
        etiqueta = tipo.entry().etiqueta,
    )
}

/// Mensaje de usuario: las instrucciones seguidas de una imagen por URL.
fn build_message(tipo: TipoDiagnostico, image_urls: &[String]) -> Result<Message> {
    if image_urls.is_empty() {
        return Err(anyhow!("No hay imágenes que evaluar"));
    }

    let mut content = vec![UserContent::text(instructions(tipo))];
    content.extend(
        image_urls
            .iter()
            .map(|url| UserContent::image_url(url.clone(), None, Some(ImageDetail::Auto))),
    );

    Ok(Message::User {
        content: OneOrMany::many(content)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instructions_name_the_diagnosis_and_the_limit() {
        let text = instructions(TipoDiagnostico::EstresHidrico);
        assert!(text.contains("Estrés Hídrico"));
        assert!(text.contains("2800"));
    }

    #[test]
    fn message_requires_images() {
        assert!(build_message(TipoDiagnostico::Plagas, &[]).is_err());
        assert!(build_message(
            TipoDiagnostico::Plagas,
            &["https://cdn.farmai.test/u1/p1/r/nir.png".to_string()]
        )
        .is_ok());
    }
}
