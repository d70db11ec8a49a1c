//! Almacén de documentos: usuarios → parcelas → análisis.
//!
//! El flujo de diagnóstico sólo depende del trait; la implementación de
//! producción vive en `neo4j_client` y aquí hay una en memoria.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::catalog::TipoDiagnostico;
use crate::error::{DiagnosisError, DiagnosisResult};
use crate::models::{run_sequence, Analisis, Parcela, Usuario};

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Crea el usuario si no existe.
    async fn create_user(&self, usuario_id: &str) -> DiagnosisResult<Usuario>;

    async fn get_user(&self, usuario_id: &str) -> DiagnosisResult<Usuario>;

    /// Crea o reemplaza una parcela. Falla con `UserNotFound` si el dueño no existe.
    async fn save_parcela(&self, parcela: &Parcela) -> DiagnosisResult<()>;

    async fn get_parcela(&self, usuario_id: &str, parcela_id: &str) -> DiagnosisResult<Parcela>;

    async fn list_parcelas(&self, usuario_id: &str) -> DiagnosisResult<Vec<Parcela>>;

    /// Borra la parcela y sus análisis.
    async fn delete_parcela(&self, usuario_id: &str, parcela_id: &str) -> DiagnosisResult<()>;

    /// Crea o reemplaza un análisis bajo su parcela, identificado por `analisis.id`.
    async fn save_analisis(
        &self,
        usuario_id: &str,
        parcela_id: &str,
        analisis: &Analisis,
    ) -> DiagnosisResult<()>;

    async fn get_analisis(
        &self,
        usuario_id: &str,
        parcela_id: &str,
        analisis_id: &str,
    ) -> DiagnosisResult<Option<Analisis>>;

    /// Análisis de la parcela, del más reciente al más antiguo.
    async fn list_analisis(&self, usuario_id: &str, parcela_id: &str) -> DiagnosisResult<Vec<Analisis>>;

    async fn delete_analisis(
        &self,
        usuario_id: &str,
        parcela_id: &str,
        analisis_id: &str,
    ) -> DiagnosisResult<()>;

    /// Último análisis de un tipo, por fecha descendente.
    async fn last_analisis_by_tipo(
        &self,
        usuario_id: &str,
        parcela_id: &str,
        tipo: TipoDiagnostico,
    ) -> DiagnosisResult<Option<Analisis>>;
}

#[derive(Debug, Default)]
struct UserDoc {
    parcelas: BTreeMap<String, ParcelaDoc>,
}

#[derive(Debug)]
struct ParcelaDoc {
    parcela: Parcela,
    analisis: BTreeMap<String, Analisis>,
}

/// Implementación en memoria, útil para pruebas y desarrollo local.
#[derive(Debug, Default)]
pub struct InMemoryDocumentStore {
    users: RwLock<BTreeMap<String, UserDoc>>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn sorted_desc(mut analisis: Vec<Analisis>) -> Vec<Analisis> {
    analisis.sort_by(|a, b| {
        b.fecha
            .cmp(&a.fecha)
            .then_with(|| run_sequence(&b.id).cmp(&run_sequence(&a.id)))
            .then_with(|| b.id.cmp(&a.id))
    });
    analisis
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn create_user(&self, usuario_id: &str) -> DiagnosisResult<Usuario> {
        self.users
            .write()
            .await
            .entry(usuario_id.to_string())
            .or_default();
        Ok(Usuario {
            id: usuario_id.to_string(),
        })
    }

    async fn get_user(&self, usuario_id: &str) -> DiagnosisResult<Usuario> {
        if self.users.read().await.contains_key(usuario_id) {
            Ok(Usuario {
                id: usuario_id.to_string(),
            })
        } else {
            Err(DiagnosisError::UserNotFound(usuario_id.to_string()))
        }
    }

    async fn save_parcela(&self, parcela: &Parcela) -> DiagnosisResult<()> {
        let mut users = self.users.write().await;
        let user = users
            .get_mut(&parcela.usuario_id)
            .ok_or_else(|| DiagnosisError::UserNotFound(parcela.usuario_id.clone()))?;

        match user.parcelas.get_mut(&parcela.id) {
            Some(doc) => doc.parcela = parcela.clone(),
            None => {
                user.parcelas.insert(
                    parcela.id.clone(),
                    ParcelaDoc {
                        parcela: parcela.clone(),
                        analisis: BTreeMap::new(),
                    },
                );
            }
        }
        Ok(())
    }

    async fn get_parcela(&self, usuario_id: &str, parcela_id: &str) -> DiagnosisResult<Parcela> {
        let users = self.users.read().await;
        let user = users
            .get(usuario_id)
            .ok_or_else(|| DiagnosisError::UserNotFound(usuario_id.to_string()))?;
        user.parcelas
            .get(parcela_id)
            .map(|doc| doc.parcela.clone())
            .ok_or_else(|| DiagnosisError::PlotNotFound(parcela_id.to_string()))
    }

    async fn list_parcelas(&self, usuario_id: &str) -> DiagnosisResult<Vec<Parcela>> {
        let users = self.users.read().await;
        let user = users
            .get(usuario_id)
            .ok_or_else(|| DiagnosisError::UserNotFound(usuario_id.to_string()))?;
        Ok(user.parcelas.values().map(|doc| doc.parcela.clone()).collect())
    }

    async fn delete_parcela(&self, usuario_id: &str, parcela_id: &str) -> DiagnosisResult<()> {
        let mut users = self.users.write().await;
        let user = users
            .get_mut(usuario_id)
            .ok_or_else(|| DiagnosisError::UserNotFound(usuario_id.to_string()))?;
        user.parcelas
            .remove(parcela_id)
            .map(|_| ())
            .ok_or_else(|| DiagnosisError::PlotNotFound(parcela_id.to_string()))
    }

    async fn save_analisis(
        &self,
        usuario_id: &str,
        parcela_id: &str,
        analisis: &Analisis,
    ) -> DiagnosisResult<()> {
        let mut users = self.users.write().await;
        let doc = users
            .get_mut(usuario_id)
            .ok_or_else(|| DiagnosisError::UserNotFound(usuario_id.to_string()))?
            .parcelas
            .get_mut(parcela_id)
            .ok_or_else(|| DiagnosisError::PlotNotFound(parcela_id.to_string()))?;
        doc.analisis.insert(analisis.id.clone(), analisis.clone());
        Ok(())
    }

    async fn get_analisis(
        &self,
        usuario_id: &str,
        parcela_id: &str,
        analisis_id: &str,
    ) -> DiagnosisResult<Option<Analisis>> {
        let users = self.users.read().await;
        let doc = users
            .get(usuario_id)
            .ok_or_else(|| DiagnosisError::UserNotFound(usuario_id.to_string()))?
            .parcelas
            .get(parcela_id)
            .ok_or_else(|| DiagnosisError::PlotNotFound(parcela_id.to_string()))?;
        Ok(doc.analisis.get(analisis_id).cloned())
    }

    async fn list_analisis(&self, usuario_id: &str, parcela_id: &str) -> DiagnosisResult<Vec<Analisis>> {
        let users = self.users.read().await;
        let doc = users
            .get(usuario_id)
            .ok_or_else(|| DiagnosisError::UserNotFound(usuario_id.to_string()))?
            .parcelas
            .get(parcela_id)
            .ok_or_else(|| DiagnosisError::PlotNotFound(parcela_id.to_string()))?;
        Ok(sorted_desc(doc.analisis.values().cloned().collect()))
    }

    async fn delete_analisis(
        &self,
        usuario_id: &str,
        parcela_id: &str,
        analisis_id: &str,
    ) -> DiagnosisResult<()> {
        let mut users = self.users.write().await;
        let doc = users
            .get_mut(usuario_id)
            .ok_or_else(|| DiagnosisError::UserNotFound(usuario_id.to_string()))?
            .parcelas
            .get_mut(parcela_id)
            .ok_or_else(|| DiagnosisError::PlotNotFound(parcela_id.to_string()))?;
        doc.analisis
            .remove(analisis_id)
            .map(|_| ())
            .ok_or_else(|| DiagnosisError::AnalysisNotFound(analisis_id.to_string()))
    }

    async fn last_analisis_by_tipo(
        &self,
        usuario_id: &str,
        parcela_id: &str,
        tipo: TipoDiagnostico,
    ) -> DiagnosisResult<Option<Analisis>> {
        let all = self.list_analisis(usuario_id, parcela_id).await?;
        Ok(all.into_iter().find(|a| a.tipo == tipo))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Punto;
    use chrono::{TimeZone, Utc};

    fn parcela(usuario: &str, id: &str) -> Parcela {
        Parcela {
            id: id.into(),
            nombre: id.into(),
            usuario_id: usuario.into(),
            ubicacion: vec![Punto::new(0.0, 0.0)],
            tipos_monitoreo: vec![],
            proximo_monitoreo: None,
        }
    }

    #[tokio::test]
    async fn parcela_requires_existing_user() {
        let store = InMemoryDocumentStore::new();
        let err = store.save_parcela(&parcela("nadie", "p1")).await.unwrap_err();
        assert!(matches!(err, DiagnosisError::UserNotFound(_)));

        store.create_user("u1").await.unwrap();
        store.save_parcela(&parcela("u1", "p1")).await.unwrap();
        assert_eq!(store.get_parcela("u1", "p1").await.unwrap().id, "p1");
        assert!(matches!(
            store.get_parcela("u1", "p2").await,
            Err(DiagnosisError::PlotNotFound(_))
        ));
    }

    #[tokio::test]
    async fn latest_by_type_orders_by_date_descending() {
        let store = InMemoryDocumentStore::new();
        store.create_user("u1").await.unwrap();
        store.save_parcela(&parcela("u1", "p1")).await.unwrap();

        let older = Analisis::new(
            TipoDiagnostico::Plagas,
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            vec![],
        );
        let newer = Analisis::new(
            TipoDiagnostico::Plagas,
            Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap(),
            vec![],
        );
        let other = Analisis::new(
            TipoDiagnostico::Malezas,
            Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap(),
            vec![],
        );
        for a in [&newer, &older, &other] {
            store.save_analisis("u1", "p1", a).await.unwrap();
        }

        let last = store
            .last_analisis_by_tipo("u1", "p1", TipoDiagnostico::Plagas)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(last.id, newer.id);
        assert!(store
            .last_analisis_by_tipo("u1", "p1", TipoDiagnostico::Nutricion)
            .await
            .unwrap()
            .is_none());

        let ids: Vec<String> = store
            .list_analisis("u1", "p1")
            .await
            .unwrap()
            .into_iter()
            .map(|a| a.id)
            .collect();
        assert_eq!(ids, [other.id, newer.id, older.id]);
    }

    #[tokio::test]
    async fn same_second_runs_order_by_numeric_suffix() {
        let store = InMemoryDocumentStore::new();
        store.create_user("u1").await.unwrap();
        store.save_parcela(&parcela("u1", "p1")).await.unwrap();

        let fecha = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        for id in ["20240101000000_plagas-9", "20240101000000_plagas-10", "20240101000000_plagas"] {
            let analisis = Analisis::new(TipoDiagnostico::Plagas, fecha, vec![]).with_id(id.into());
            store.save_analisis("u1", "p1", &analisis).await.unwrap();
        }

        let last = store
            .last_analisis_by_tipo("u1", "p1", TipoDiagnostico::Plagas)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(last.id, "20240101000000_plagas-10");

        let ids: Vec<String> = store
            .list_analisis("u1", "p1")
            .await
            .unwrap()
            .into_iter()
            .map(|a| a.id)
            .collect();
        assert_eq!(
            ids,
            ["20240101000000_plagas-10", "20240101000000_plagas-9", "20240101000000_plagas"]
        );
    }

    #[tokio::test]
    async fn saving_same_id_replaces_the_run() {
        let store = InMemoryDocumentStore::new();
        store.create_user("u1").await.unwrap();
        store.save_parcela(&parcela("u1", "p1")).await.unwrap();

        let mut analisis = Analisis::new(TipoDiagnostico::Plagas, Utc::now(), vec![]);
        store.save_analisis("u1", "p1", &analisis).await.unwrap();
        analisis.set_evaluacion("ok");
        store.save_analisis("u1", "p1", &analisis).await.unwrap();

        let all = store.list_analisis("u1", "p1").await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].evaluacion.as_deref(), Some("ok"));
    }
}
