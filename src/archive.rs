//! Decodificación del tar multi-fichero devuelto por el Process API.

use std::io::{self, Read};
use std::path::Path;

use tar::Archive;
use tracing::debug;

use crate::error::{DiagnosisError, DiagnosisResult};

/// Un fichero regular extraído del archivo.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveMember {
    /// Último componente de la ruta dentro del tar (`nir.png`).
    pub filename: String,
    /// Etiqueta de banda: el nombre sin extensión (`nir`).
    pub tipo: String,
    pub data: Vec<u8>,
}

/// Extrae los ficheros regulares en el orden en que aparecen en el tar.
///
/// Directorios, enlaces y demás entradas especiales se ignoran.
pub fn decode(bytes: &[u8]) -> DiagnosisResult<Vec<ArchiveMember>> {
    if bytes.is_empty() {
        return Err(DiagnosisError::CorruptArchive(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "respuesta vacía",
        )));
    }

    let mut archive = Archive::new(bytes);
    let entries = archive.entries().map_err(DiagnosisError::CorruptArchive)?;

    let mut members = Vec::new();
    for entry in entries {
        let mut entry = entry.map_err(DiagnosisError::CorruptArchive)?;
        if !entry.header().entry_type().is_file() {
            continue;
        }

        let filename = match entry
            .path()
            .map_err(DiagnosisError::CorruptArchive)?
            .file_name()
            .and_then(|n| n.to_str())
        {
            Some(name) => name.to_string(),
            None => continue,
        };

        // El tamaño de la cabecera no es fiable: nunca reservar más que el tar.
        let declared = entry.size();
        let mut data = Vec::with_capacity(declared.min(bytes.len() as u64) as usize);
        entry
            .read_to_end(&mut data)
            .map_err(DiagnosisError::CorruptArchive)?;
        if data.len() as u64 != declared {
            return Err(DiagnosisError::CorruptArchive(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "{filename}: la cabecera declara {declared} bytes y sólo hay {}",
                    data.len()
                ),
            )));
        }

        debug!(filename = %filename, bytes = data.len(), "Miembro extraído del tar");
        members.push(ArchiveMember {
            tipo: band_label(&filename),
            filename,
            data,
        });
    }

    Ok(members)
}

/// `nir.png` → `nir`.
pub fn band_label(filename: &str) -> String {
    Path::new(filename)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(filename)
        .to_string()
}
