//! Cuerpo JSON del Process API de Sentinel Hub.
//!
//! La estructura sigue el esquema de `POST /api/v1/process`: `input` con la
//! geometría y el filtro de datos, `output` con una respuesta por
//! identificador del evalscript, y el propio `evalscript`.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

use crate::catalog::{self, RequestTemplate};
use crate::error::DiagnosisResult;
use crate::geometry::Coordenada;

/// Formato de todas las salidas pedidas.
pub const OUTPUT_FORMAT: &str = "image/png";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessRequest {
    pub input: Input,
    pub output: Output,
    pub evalscript: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Input {
    pub bounds: Bounds,
    pub data: Vec<DataSource>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Bounds {
    pub geometry: Geometry,
}

/// Polígono GeoJSON de un solo anillo.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Geometry {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub coordinates: Vec<Vec<Coordenada>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataSource {
    #[serde(rename = "type")]
    pub kind: &'static str,
    #[serde(rename = "dataFilter")]
    pub data_filter: DataFilter,
    pub processing: Processing,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataFilter {
    #[serde(rename = "timeRange")]
    pub time_range: TimeRange,
    #[serde(rename = "maxCloudCoverage")]
    pub max_cloud_coverage: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimeRange {
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Processing {
    #[serde(rename = "harmonizeValues")]
    pub harmonize_values: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Output {
    pub width: u32,
    pub height: u32,
    pub responses: Vec<OutputResponse>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutputResponse {
    pub identifier: String,
    pub format: OutputFormat,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutputFormat {
    #[serde(rename = "type")]
    pub kind: &'static str,
}

impl ProcessRequest {
    /// Monta la petición a partir de una plantilla del catálogo y un anillo
    /// ya cerrado por `geometry::normalize_ring`.
    pub fn from_template(template: &RequestTemplate, ring: Vec<Coordenada>) -> Self {
        let responses = template
            .salidas
            .iter()
            .map(|id| OutputResponse {
                identifier: (*id).to_string(),
                format: OutputFormat { kind: OUTPUT_FORMAT },
            })
            .collect();

        Self {
            input: Input {
                bounds: Bounds {
                    geometry: Geometry {
                        kind: "Polygon",
                        coordinates: vec![ring],
                    },
                },
                data: vec![DataSource {
                    kind: template.data_type,
                    data_filter: DataFilter {
                        time_range: TimeRange {
                            from: format_instant(template.time_from),
                            to: format_instant(template.time_to),
                        },
                        max_cloud_coverage: template.max_cloud_coverage,
                    },
                    processing: Processing {
                        harmonize_values: template.harmonize_values,
                    },
                }],
            },
            output: Output {
                width: template.width,
                height: template.height,
                responses,
            },
            evalscript: template.evalscript.to_string(),
        }
    }

    /// Identificadores de salida en el orden en que se pidieron.
    pub fn identifiers(&self) -> impl Iterator<Item = &str> {
        self.output.responses.iter().map(|r| r.identifier.as_str())
    }
}

/// Resuelve el tipo en el catálogo y construye la petición anclada en `now`.
pub fn build(tipo: &str, ring: Vec<Coordenada>, now: DateTime<Utc>) -> DiagnosisResult<ProcessRequest> {
    let template = catalog::resolve(tipo, now)?;
    Ok(ProcessRequest::from_template(&template, ring))
}

fn format_instant(instant: DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Secs, true)
}
