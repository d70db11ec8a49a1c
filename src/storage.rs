//! Almacenamiento de las imágenes descargadas en disco.
//!
//! Cada ejecución escribe en `{root}/{usuario}/{parcela}/{analisis}/` y las
//! referencias que se guardan son siempre relativas a `root`, para que sigan
//! siendo válidas si el almacenamiento cambia de sitio.

use std::io;
use std::path::{Component, Path, PathBuf};

use tokio::fs;
use tracing::info;
use url::Url;

use crate::error::{DiagnosisError, DiagnosisResult};

/// Carpeta de una ejecución ya reservada.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunContext {
    id: String,
    folder: PathBuf,
    relative: String,
}

impl RunContext {
    /// Id del análisis al que pertenece la carpeta.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    /// `{usuario}/{parcela}/{analisis}`
    pub fn relative(&self) -> &str {
        &self.relative
    }
}

#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
    public_base: Url,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>, public_base: Url) -> Self {
        Self {
            root: root.into(),
            public_base,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Reserva la carpeta de la ejecución.
    ///
    /// La carpeta final se crea con `create_dir`, que es atómico: si ya existe
    /// devuelve `None` y la ejecución debe probar otro id.
    pub async fn begin_run(
        &self,
        usuario_id: &str,
        parcela_id: &str,
        analisis_id: &str,
    ) -> DiagnosisResult<Option<RunContext>> {
        let mut parent = self.root.clone();
        for segment in [usuario_id, parcela_id] {
            check_segment(segment, &parent)?;
            parent.push(segment);
        }
        check_segment(analisis_id, &parent)?;
        let folder = parent.join(analisis_id);

        fs::create_dir_all(&parent)
            .await
            .map_err(|source| DiagnosisError::StorageWriteError {
                path: parent.clone(),
                source,
            })?;
        match fs::create_dir(&folder).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => return Ok(None),
            Err(source) => return Err(DiagnosisError::StorageWriteError { path: folder, source }),
        }

        Ok(Some(RunContext {
            id: analisis_id.to_string(),
            relative: format!("{usuario_id}/{parcela_id}/{analisis_id}"),
            folder,
        }))
    }

    /// Escribe `bytes` en la carpeta de la ejecución y devuelve la ruta
    /// relativa. Sobrescribe sin avisar si el fichero ya existe.
    pub async fn store(
        &self,
        run: &RunContext,
        filename: &str,
        bytes: &[u8],
    ) -> DiagnosisResult<String> {
        check_segment(filename, &run.folder)?;
        let path = run.folder.join(filename);

        let write = async {
            fs::create_dir_all(&run.folder).await?;
            fs::write(&path, bytes).await
        };
        write
            .await
            .map_err(|source| DiagnosisError::StorageWriteError {
                path: path.clone(),
                source,
            })?;

        let relative = format!("{}/{}", run.relative, filename);
        info!(ruta = %relative, bytes = bytes.len(), "Imagen almacenada");
        Ok(relative)
    }

    /// Ruta absoluta en disco de una referencia relativa.
    pub fn absolute_path(&self, relative: &str) -> PathBuf {
        relative
            .split('/')
            .fold(self.root.clone(), |acc, segment| acc.join(segment))
    }

    /// URL pública (CDN) de una referencia relativa.
    pub fn public_url(&self, relative: &str) -> DiagnosisResult<Url> {
        self.public_base.join(relative).map_err(|e| DiagnosisError::StorageWriteError {
            path: PathBuf::from(relative),
            source: io::Error::new(io::ErrorKind::InvalidInput, e),
        })
    }
}

/// Un segmento de ruta debe ser un único componente normal.
fn check_segment(segment: &str, base: &Path) -> DiagnosisResult<()> {
    let mut components = Path::new(segment).components();
    let valid = matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    ) && !segment.contains(['/', '\\']);

    if valid {
        Ok(())
    } else {
        Err(DiagnosisError::StorageWriteError {
            path: base.join(segment),
            source: io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("segmento de ruta no válido: {segment:?}"),
            ),
        })
    }
}
