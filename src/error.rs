//! Errores tipados del flujo de diagnóstico.

use std::path::PathBuf;

use thiserror::Error;

/// Fallos posibles del flujo parcela → Sentinel Hub → almacenamiento → modelo.
#[derive(Debug, Error)]
pub enum DiagnosisError {
    /// La parcela no tiene puntos con los que cerrar un polígono.
    #[error("geometría inválida: la parcela no tiene puntos")]
    InvalidGeometry,

    #[error("tipo de diagnóstico no soportado: {0}")]
    UnsupportedDiagnosisType(String),

    /// El intercambio de credenciales OAuth fue rechazado.
    #[error("error de autenticación con Sentinel Hub ({status}): {body}")]
    AuthenticationError { status: u16, body: String },

    /// Respuesta no exitosa del Process API tras, como mucho, un reintento.
    /// `status == 0` indica un fallo de transporte o timeout sin respuesta HTTP.
    #[error("error al obtener imágenes ({status}): {body}")]
    FetchError { status: u16, body: String },

    #[error("formato de respuesta inesperado: {content_type}")]
    UnexpectedResponseFormat { content_type: String },

    #[error("archivo tar corrupto: {0}")]
    CorruptArchive(#[source] std::io::Error),

    #[error("no se pudo escribir {path}: {source}")]
    StorageWriteError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("usuario no encontrado: {0}")]
    UserNotFound(String),

    #[error("parcela no encontrada: {0}")]
    PlotNotFound(String),

    #[error("análisis no encontrado: {0}")]
    AnalysisNotFound(String),

    /// Fallo del almacén de documentos (Neo4j).
    #[error("error del almacén de documentos: {0}")]
    Store(#[source] anyhow::Error),

    /// Fallo del modelo de descripción de imágenes.
    #[error("error del modelo de evaluación: {0}")]
    Evaluation(#[source] anyhow::Error),
}

impl DiagnosisError {
    /// `true` cuando el error se debe a datos del cliente y no al sistema.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidGeometry | Self::UnsupportedDiagnosisType(_)
        )
    }

    /// `true` para recursos inexistentes en el almacén.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::UserNotFound(_) | Self::PlotNotFound(_) | Self::AnalysisNotFound(_)
        )
    }

    /// `true` para fallos de proveedores externos (Sentinel Hub o el modelo).
    pub fn is_upstream_error(&self) -> bool {
        matches!(
            self,
            Self::AuthenticationError { .. }
                | Self::FetchError { .. }
                | Self::UnexpectedResponseFormat { .. }
                | Self::CorruptArchive(_)
                | Self::Evaluation(_)
        )
    }
}

pub type DiagnosisResult<T> = Result<T, DiagnosisError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_errors_by_origin() {
        assert!(DiagnosisError::InvalidGeometry.is_client_error());
        assert!(DiagnosisError::UnsupportedDiagnosisType("foo".into()).is_client_error());
        assert!(DiagnosisError::PlotNotFound("p1".into()).is_not_found());
        assert!(DiagnosisError::FetchError {
            status: 500,
            body: String::new()
        }
        .is_upstream_error());
        assert!(!DiagnosisError::UserNotFound("u1".into()).is_upstream_error());
    }
}
