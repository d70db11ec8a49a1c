//! Modelos de dominio: parcelas, imágenes satelitales y análisis.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::catalog::TipoDiagnostico;

/// Formato del sello temporal usado en los identificadores de análisis.
pub const RUN_TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

/// Vértice de una parcela. No se valida el rango de las coordenadas.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Punto {
    pub latitude: f64,
    pub longitude: f64,
}

impl Punto {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }
}

/// Usuario propietario de parcelas (nodo :Usuario).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usuario {
    pub id: String,
}

/// Parcela agrícola definida como un polígono de puntos.
///
/// El `id` se deriva del nombre al crearla y no cambia después. Los puntos
/// se guardan en el orden del usuario; el anillo se cierra al construir la
/// petición, nunca aquí.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parcela {
    pub id: String,
    pub nombre: String,
    pub usuario_id: String,
    pub ubicacion: Vec<Punto>,
    #[serde(default)]
    pub tipos_monitoreo: Vec<TipoDiagnostico>,
    #[serde(default)]
    pub proximo_monitoreo: Option<DateTime<Utc>>,
}

/// Datos de entrada para crear una parcela.
#[derive(Debug, Clone, Deserialize)]
pub struct NuevaParcela {
    pub nombre: String,
    pub usuario_id: String,
    pub ubicacion: Vec<Punto>,
    #[serde(default)]
    pub tipos_monitoreo: Vec<TipoDiagnostico>,
}

impl NuevaParcela {
    /// Construye la parcela fijando su `id` a partir del nombre.
    pub fn into_parcela(self) -> Parcela {
        Parcela {
            id: slugify(&self.nombre),
            nombre: self.nombre,
            usuario_id: self.usuario_id,
            ubicacion: self.ubicacion,
            tipos_monitoreo: self.tipos_monitoreo,
            proximo_monitoreo: None,
        }
    }
}

/// Una banda (o composición) decodificada de una descarga de Sentinel Hub.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImagenSatelital {
    /// Etiqueta de la banda: nombre del fichero sin extensión (`nir`, `combined`...).
    pub tipo: String,
    /// Ruta relativa a la raíz del almacenamiento.
    pub ruta: String,
}

/// Una ejecución de diagnóstico sobre una parcela.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Analisis {
    pub id: String,
    pub tipo: TipoDiagnostico,
    pub fecha: DateTime<Utc>,
    pub imagenes: Vec<ImagenSatelital>,
    pub evaluacion: Option<String>,
}

impl Analisis {
    /// Crea un análisis sin evaluación con el id `{fecha}_{tipo}`.
    pub fn new(tipo: TipoDiagnostico, fecha: DateTime<Utc>, imagenes: Vec<ImagenSatelital>) -> Self {
        Self {
            id: run_id(fecha, tipo),
            tipo,
            fecha,
            imagenes,
            evaluacion: None,
        }
    }

    pub fn with_id(mut self, id: String) -> Self {
        self.id = id;
        self
    }

    /// Adjunta el texto devuelto por el modelo de evaluación.
    pub fn set_evaluacion(&mut self, texto: impl Into<String>) {
        self.evaluacion = Some(texto.into());
    }
}

/// Identificador de ejecución: `{YYYYMMDDHHMMSS}_{tipo}`.
pub fn run_id(fecha: DateTime<Utc>, tipo: TipoDiagnostico) -> String {
    format!("{}_{}", fecha.format(RUN_TIMESTAMP_FORMAT), tipo.as_str())
}

/// Posición de un id dentro de las ejecuciones de un mismo segundo:
/// `…_plagas` es 1, `…_plagas-2` es 2, `…_plagas-10` es 10.
pub fn run_sequence(id: &str) -> u32 {
    id.rsplit_once('-')
        .and_then(|(_, suffix)| suffix.parse().ok())
        .unwrap_or(1)
}

/// Convierte un nombre libre en un identificador estable para rutas y claves.
///
/// Se conservan sólo alfanuméricos ASCII en minúscula; cualquier otra
/// secuencia se colapsa a un único guion.
pub fn slugify(nombre: &str) -> String {
    let mut slug = String::with_capacity(nombre.len());
    let mut pending_dash = false;

    for c in nombre.chars() {
        let c = fold_accent(c);
        if c.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }
    slug
}

fn fold_accent(c: char) -> char {
    match c {
        'á' | 'à' | 'ä' | 'â' | 'Á' | 'À' | 'Ä' | 'Â' => 'a',
        'é' | 'è' | 'ë' | 'ê' | 'É' | 'È' | 'Ë' | 'Ê' => 'e',
        'í' | 'ì' | 'ï' | 'î' | 'Í' | 'Ì' | 'Ï' | 'Î' => 'i',
        'ó' | 'ò' | 'ö' | 'ô' | 'Ó' | 'Ò' | 'Ö' | 'Ô' => 'o',
        'ú' | 'ù' | 'ü' | 'û' | 'Ú' | 'Ù' | 'Ü' | 'Û' => 'u',
        'ñ' | 'Ñ' => 'n',
        'ç' | 'Ç' => 'c',
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn slug_collapses_separators_and_accents() {
        assert_eq!(slugify("Parcela Norte"), "parcela-norte");
        assert_eq!(slugify("  Viñedo  del  Sur!! "), "vinedo-del-sur");
        assert_eq!(slugify("Lote #3 (maíz)"), "lote-3-maiz");
    }

    #[test]
    fn run_id_uses_second_resolution_and_type_key() {
        let fecha = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(run_id(fecha, TipoDiagnostico::Plagas), "20240101000000_plagas");
    }

    #[test]
    fn run_sequence_reads_the_numeric_suffix() {
        assert_eq!(run_sequence("20240101000000_plagas"), 1);
        assert_eq!(run_sequence("20240101000000_estres_hidrico-2"), 2);
        assert_eq!(run_sequence("20240101000000_plagas-10"), 10);
    }

    #[test]
    fn new_analisis_has_no_evaluation_until_set() {
        let fecha = Utc.with_ymd_and_hms(2024, 6, 25, 13, 5, 9).unwrap();
        let mut analisis = Analisis::new(TipoDiagnostico::EstresHidrico, fecha, Vec::new());
        assert_eq!(analisis.id, "20240625130509_estres_hidrico");
        assert!(analisis.evaluacion.is_none());

        analisis.set_evaluacion("Sin estrés hídrico");
        assert_eq!(analisis.evaluacion.as_deref(), Some("Sin estrés hídrico"));
    }

    #[test]
    fn nueva_parcela_derives_id_from_name() {
        let parcela = NuevaParcela {
            nombre: "Campo Grande".into(),
            usuario_id: "u1".into(),
            ubicacion: vec![Punto::new(0.0, 0.0)],
            tipos_monitoreo: vec![],
        }
        .into_parcela();
        assert_eq!(parcela.id, "campo-grande");
        assert!(parcela.proximo_monitoreo.is_none());
    }
}
