//! Normalización de la geometría de una parcela a un anillo GeoJSON.

use crate::error::{DiagnosisError, DiagnosisResult};
use crate::models::Punto;

/// Par `[longitud, latitud]`, el orden que espera GeoJSON.
pub type Coordenada = [f64; 2];

/// Convierte los puntos de la parcela en un anillo cerrado `[[lon, lat], ...]`.
///
/// Siempre repite el primer punto al final, aunque la entrada ya venga
/// cerrada: el anillo tiene exactamente `puntos.len() + 1` pares.
pub fn normalize_ring(puntos: &[Punto]) -> DiagnosisResult<Vec<Coordenada>> {
    let first = puntos.first().ok_or(DiagnosisError::InvalidGeometry)?;

    let mut ring: Vec<Coordenada> = puntos
        .iter()
        .map(|p| [p.longitude, p.latitude])
        .collect();
    ring.push([first.longitude, first.latitude]);
    Ok(ring)
}
