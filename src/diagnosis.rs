//! Flujo completo de un diagnóstico:
//!
//!   1. Resolver el tipo en el catálogo (antes de cualquier llamada de red).
//!   2. Leer la parcela y cerrar su polígono.
//!   3. Derivar el id de ejecución `{fecha}_{tipo}`.
//!   4. Construir la petición y descargar el tar de Sentinel Hub.
//!   5. Decodificar, reservar `{usuario}/{parcela}/{id}/` (con sufijo si ya
//!      existe) y guardar ahí cada banda.
//!   6. Persistir el análisis sin evaluación y reprogramar el monitoreo.
//!   7. Pedir la evaluación al modelo y volver a persistir el mismo análisis.
//!
//! Cualquier error corta el flujo. Las imágenes ya escritas se quedan en disco.

use std::sync::Arc;

use chrono::{DateTime, SubsecRound, Utc};
use tracing::{info, warn};

use crate::archive;
use crate::catalog::{RequestTemplate, TipoDiagnostico};
use crate::documents::DocumentStore;
use crate::error::{DiagnosisError, DiagnosisResult};
use crate::fetch::ImageryClient;
use crate::geometry::normalize_ring;
use crate::llm::ImageEvaluator;
use crate::models::{self, Analisis, ImagenSatelital};
use crate::request::ProcessRequest;
use crate::storage::{ArtifactStore, RunContext};

pub struct DiagnosisService {
    store: Arc<dyn DocumentStore>,
    imagery: ImageryClient,
    artifacts: ArtifactStore,
    evaluator: Arc<dyn ImageEvaluator>,
}

impl DiagnosisService {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        imagery: ImageryClient,
        artifacts: ArtifactStore,
        evaluator: Arc<dyn ImageEvaluator>,
    ) -> Self {
        Self {
            store,
            imagery,
            artifacts,
            evaluator,
        }
    }

    pub fn artifacts(&self) -> &ArtifactStore {
        &self.artifacts
    }

    /// Ejecuta el diagnóstico completo, evaluación incluida.
    pub async fn run(&self, usuario_id: &str, parcela_id: &str, tipo: &str) -> DiagnosisResult<Analisis> {
        let analisis = self
            .acquire(usuario_id, parcela_id, tipo, Utc::now())
            .await?;
        self.evaluate(usuario_id, parcela_id, analisis).await
    }

    /// Pasos 1–6: descarga, almacena y persiste el análisis con
    /// `evaluacion == None`.
    pub async fn acquire(
        &self,
        usuario_id: &str,
        parcela_id: &str,
        tipo: &str,
        now: DateTime<Utc>,
    ) -> DiagnosisResult<Analisis> {
        let tipo: TipoDiagnostico = tipo.parse()?;
        let now = now.trunc_subsecs(0);
        let template = RequestTemplate::new(tipo.entry(), now);

        let mut parcela = self.store.get_parcela(usuario_id, parcela_id).await?;
        let ring = normalize_ring(&parcela.ubicacion)?;

        let base_id = models::run_id(now, tipo);
        info!(
            usuario = usuario_id,
            parcela = parcela_id,
            analisis = %base_id,
            "Iniciando diagnóstico"
        );

        let payload = ProcessRequest::from_template(&template, ring);
        let tar = self.imagery.fetch(&payload).await?;
        let members = archive::decode(&tar)?;

        let run = self.reserve_run(usuario_id, parcela_id, &base_id).await?;
        let mut imagenes = Vec::with_capacity(members.len());
        for member in members {
            let ruta = self
                .artifacts
                .store(&run, &member.filename, &member.data)
                .await?;
            imagenes.push(ImagenSatelital {
                tipo: member.tipo,
                ruta,
            });
        }

        let analisis = Analisis::new(tipo, now, imagenes).with_id(run.id().to_string());
        self.store
            .save_analisis(usuario_id, parcela_id, &analisis)
            .await?;

        parcela.proximo_monitoreo = Some(now + tipo.entry().frecuencia.intervalo());
        self.store.save_parcela(&parcela).await?;

        info!(
            analisis = %analisis.id,
            imagenes = analisis.imagenes.len(),
            "Análisis guardado"
        );
        Ok(analisis)
    }

    /// Paso 7: adjunta la evaluación del modelo y re-persiste el análisis.
    pub async fn evaluate(
        &self,
        usuario_id: &str,
        parcela_id: &str,
        mut analisis: Analisis,
    ) -> DiagnosisResult<Analisis> {
        if analisis.imagenes.is_empty() {
            warn!(analisis = %analisis.id, "Sin imágenes, se omite la evaluación");
            return Ok(analisis);
        }

        let urls = analisis
            .imagenes
            .iter()
            .map(|imagen| self.artifacts.public_url(&imagen.ruta).map(|u| u.to_string()))
            .collect::<DiagnosisResult<Vec<_>>>()?;

        let texto = self
            .evaluator
            .evaluate(analisis.tipo, &urls)
            .await
            .map_err(DiagnosisError::Evaluation)?;

        analisis.set_evaluacion(texto);
        self.store
            .save_analisis(usuario_id, parcela_id, &analisis)
            .await?;
        info!(analisis = %analisis.id, "Evaluación guardada");
        Ok(analisis)
    }

    /// Reserva la carpeta de la ejecución, añadiendo `-2`, `-3`... si el id
    /// ya está guardado o si otra ejecución concurrente ya creó su carpeta.
    async fn reserve_run(
        &self,
        usuario_id: &str,
        parcela_id: &str,
        base: &str,
    ) -> DiagnosisResult<RunContext> {
        let mut secuencia = 1;
        loop {
            let candidate = if secuencia == 1 {
                base.to_string()
            } else {
                format!("{base}-{secuencia}")
            };
            secuencia += 1;

            let stored = self
                .store
                .get_analisis(usuario_id, parcela_id, &candidate)
                .await?
                .is_some();
            if !stored {
                if let Some(run) = self
                    .artifacts
                    .begin_run(usuario_id, parcela_id, &candidate)
                    .await?
                {
                    return Ok(run);
                }
            }
            warn!(analisis = %candidate, "Id de análisis ocupado, añadiendo sufijo");
        }
    }
}
