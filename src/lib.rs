//! Diagnóstico satelital de parcelas agrícolas.
//!
//! Una parcela (polígono de puntos) y un tipo de diagnóstico se convierten en
//! una petición al Process API de Sentinel Hub; el tar devuelto se decodifica
//! en bandas que se guardan en disco, se registran como un `Analisis` y se
//! envían a un modelo de visión para obtener una evaluación en texto.

pub mod api;
pub mod app_state;
pub mod archive;
pub mod catalog;
pub mod config;
pub mod diagnosis;
pub mod documents;
pub mod error;
pub mod fetch;
pub mod geometry;
pub mod llm;
pub mod models;
pub mod neo4j_client;
pub mod request;
pub mod storage;
pub mod token;

pub use error::{DiagnosisError, DiagnosisResult};
