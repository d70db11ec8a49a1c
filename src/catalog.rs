//! Catálogo de diagnósticos: qué bandas pide cada tipo a Sentinel Hub,
//! con qué evalscript se combinan y con qué frecuencia conviene repetirlo.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{DiagnosisError, DiagnosisResult};

/// Ventana temporal por defecto hacia atrás desde el momento de la petición.
pub const DEFAULT_TIME_WINDOW_DAYS: i64 = 30;
/// Cobertura de nubes máxima aceptada (%).
pub const DEFAULT_MAX_CLOUD_COVERAGE: u8 = 20;
/// Identificador del producto de Sentinel Hub.
pub const DATA_SOURCE: &str = "sentinel-2-l2a";
/// Resolución fija de cada salida.
pub const OUTPUT_SIZE: u32 = 2048;
/// Identificador de la composición de bandas que acompaña a toda petición.
pub const COMBINED_OUTPUT: &str = "combined";

/// Tipos de diagnóstico soportados.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TipoDiagnostico {
    Plagas,
    EstresHidrico,
    Malezas,
    Nutricion,
    EstadoVegetacion,
    Enfermedades,
}

impl TipoDiagnostico {
    pub const ALL: [TipoDiagnostico; 6] = [
        Self::Plagas,
        Self::EstresHidrico,
        Self::Malezas,
        Self::Nutricion,
        Self::EstadoVegetacion,
        Self::Enfermedades,
    ];

    /// Clave estable usada en ids de análisis, rutas y la API.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Plagas => "plagas",
            Self::EstresHidrico => "estres_hidrico",
            Self::Malezas => "malezas",
            Self::Nutricion => "nutricion",
            Self::EstadoVegetacion => "estado_vegetacion",
            Self::Enfermedades => "enfermedades",
        }
    }

    pub fn entry(&self) -> &'static CatalogEntry {
        // CATALOG sigue el orden de declaración de las variantes.
        &CATALOG[*self as usize]
    }
}

impl fmt::Display for TipoDiagnostico {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TipoDiagnostico {
    type Err = DiagnosisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim().to_lowercase();
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == key)
            .ok_or_else(|| DiagnosisError::UnsupportedDiagnosisType(s.to_string()))
    }
}

/// Frecuencia recomendada de monitoreo para cada tipo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Frecuencia {
    #[serde(rename = "Diaria/Semanal")]
    DiariaSemanal,
    Semanal,
    Quincenal,
    Mensual,
}

impl Frecuencia {
    /// Intervalo hasta el siguiente monitoreo programado.
    pub fn intervalo(&self) -> Duration {
        match self {
            Self::DiariaSemanal => Duration::days(1),
            Self::Semanal => Duration::days(7),
            Self::Quincenal => Duration::days(15),
            Self::Mensual => Duration::days(30),
        }
    }
}

/// Entrada inmutable del catálogo.
#[derive(Debug, Serialize)]
pub struct CatalogEntry {
    pub tipo: TipoDiagnostico,
    /// Nombre legible, usado en el prompt del modelo de evaluación.
    pub etiqueta: &'static str,
    pub bandas: &'static [&'static str],
    /// Identificadores de salida: uno por banda más `combined`, en orden.
    pub salidas: &'static [&'static str],
    #[serde(skip)]
    pub evalscript: &'static str,
    pub frecuencia: Frecuencia,
}

static CATALOG: [CatalogEntry; 6] = [
    CatalogEntry {
        tipo: TipoDiagnostico::Plagas,
        etiqueta: "Plagas",
        bandas: &["B08", "B11", "B12"],
        salidas: &["nir", "swir1", "swir2", COMBINED_OUTPUT],
        evalscript: include_str!("../assets/evalscripts/plagas.js"),
        frecuencia: Frecuencia::DiariaSemanal,
    },
    CatalogEntry {
        tipo: TipoDiagnostico::EstresHidrico,
        etiqueta: "Estrés Hídrico",
        bandas: &["B11", "B12"],
        salidas: &["swir1", "swir2", COMBINED_OUTPUT],
        evalscript: include_str!("../assets/evalscripts/estres_hidrico.js"),
        frecuencia: Frecuencia::Semanal,
    },
    CatalogEntry {
        tipo: TipoDiagnostico::Malezas,
        etiqueta: "Malezas",
        bandas: &["B04", "B08"],
        salidas: &["nir", "red", COMBINED_OUTPUT],
        evalscript: include_str!("../assets/evalscripts/malezas.js"),
        frecuencia: Frecuencia::Semanal,
    },
    CatalogEntry {
        tipo: TipoDiagnostico::Nutricion,
        etiqueta: "Nutrientes en el Suelo",
        bandas: &["B04", "B05", "B08"],
        salidas: &["red", "red_edge", "nir", COMBINED_OUTPUT],
        evalscript: include_str!("../assets/evalscripts/nutricion.js"),
        frecuencia: Frecuencia::Mensual,
    },
    CatalogEntry {
        tipo: TipoDiagnostico::EstadoVegetacion,
        etiqueta: "Estado de la Vegetación",
        bandas: &["B04", "B08"],
        salidas: &["nir", "red", COMBINED_OUTPUT],
        evalscript: include_str!("../assets/evalscripts/estado_vegetacion.js"),
        frecuencia: Frecuencia::Quincenal,
    },
    CatalogEntry {
        tipo: TipoDiagnostico::Enfermedades,
        etiqueta: "Enfermedades de las Plantas",
        bandas: &["B02", "B03", "B04", "B08"],
        salidas: &["blue", "green", "red", "nir", COMBINED_OUTPUT],
        evalscript: include_str!("../assets/evalscripts/enfermedades.js"),
        frecuencia: Frecuencia::DiariaSemanal,
    },
];

/// Todas las entradas, en el orden de `TipoDiagnostico::ALL`.
pub fn entries() -> &'static [CatalogEntry] {
    &CATALOG
}

/// Plantilla de petición para un tipo, con la ventana anclada en `now`.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestTemplate {
    pub tipo: TipoDiagnostico,
    pub bandas: &'static [&'static str],
    pub salidas: &'static [&'static str],
    pub evalscript: &'static str,
    pub data_type: &'static str,
    pub time_from: DateTime<Utc>,
    pub time_to: DateTime<Utc>,
    pub max_cloud_coverage: u8,
    pub harmonize_values: bool,
    pub width: u32,
    pub height: u32,
}

impl RequestTemplate {
    pub fn new(entry: &'static CatalogEntry, now: DateTime<Utc>) -> Self {
        Self {
            tipo: entry.tipo,
            bandas: entry.bandas,
            salidas: entry.salidas,
            evalscript: entry.evalscript,
            data_type: DATA_SOURCE,
            time_from: now - Duration::days(DEFAULT_TIME_WINDOW_DAYS),
            time_to: now,
            max_cloud_coverage: DEFAULT_MAX_CLOUD_COVERAGE,
            harmonize_values: true,
            width: OUTPUT_SIZE,
            height: OUTPUT_SIZE,
        }
    }
}

/// Resuelve una clave de diagnóstico a su plantilla.
pub fn resolve(tipo: &str, now: DateTime<Utc>) -> DiagnosisResult<RequestTemplate> {
    let tipo: TipoDiagnostico = tipo.parse()?;
    Ok(RequestTemplate::new(tipo.entry(), now))
}
