//! Almacén de documentos sobre Neo4j:
//! `(:Usuario)-[:TIENE_PARCELA]->(:Parcela)-[:TIENE_ANALISIS]->(:Analisis)`.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use neo4rs::{query, Graph, Node, Query};
use tracing::info;
use url::Url;

use crate::catalog::TipoDiagnostico;
use crate::config::AppConfig;
use crate::documents::DocumentStore;
use crate::error::{DiagnosisError, DiagnosisResult};
use crate::models::{run_sequence, Analisis, ImagenSatelital, Parcela, Punto, Usuario};

pub async fn connect_from_config(cfg: &AppConfig) -> Result<Graph> {
    let url = Url::parse(&cfg.neo4j_uri)?;
    let host = url.host_str().unwrap_or("localhost");
    let port = url.port().unwrap_or(7687);
    let addr = format!("{host}:{port}");

    info!("Conectando a Neo4j en {addr}...");
    let graph = Graph::new(&addr, &cfg.neo4j_user, &cfg.neo4j_password).await?;
    info!("Conexión a Neo4j OK");
    Ok(graph)
}

/// Crea los constraints de las etiquetas usadas por la aplicación.
pub async fn ensure_schema(graph: &Graph) -> Result<()> {
    let statements = [
        "CREATE CONSTRAINT usuario_id IF NOT EXISTS
         FOR (u:Usuario)
         REQUIRE u.id IS UNIQUE",
        // El id de parcela sólo es único dentro de su usuario.
        "CREATE CONSTRAINT parcela_id IF NOT EXISTS
         FOR (p:Parcela)
         REQUIRE (p.usuario_id, p.id) IS UNIQUE",
        "CREATE INDEX analisis_tipo_fecha IF NOT EXISTS
         FOR (a:Analisis)
         ON (a.tipo, a.fecha)",
    ];

    for stmt in statements {
        graph.run(query(stmt)).await?;
    }

    info!("Esquema de Neo4j asegurado.");
    Ok(())
}

/// `DocumentStore` respaldado por Neo4j.
#[derive(Clone)]
pub struct Neo4jStore {
    graph: Arc<Graph>,
}

impl Neo4jStore {
    pub fn new(graph: Arc<Graph>) -> Self {
        Self { graph }
    }

    async fn first_node(&self, q: Query, key: &str) -> DiagnosisResult<Option<Node>> {
        let mut cursor = self.graph.execute(q).await.map_err(store_err)?;
        match cursor.next().await.map_err(store_err)? {
            Some(row) => Ok(row.get::<Node>(key)),
            None => Ok(None),
        }
    }

    async fn all_nodes(&self, q: Query, key: &str) -> DiagnosisResult<Vec<Node>> {
        let mut cursor = self.graph.execute(q).await.map_err(store_err)?;
        let mut nodes = Vec::new();
        while let Some(row) = cursor.next().await.map_err(store_err)? {
            if let Some(node) = row.get::<Node>(key) {
                nodes.push(node);
            }
        }
        Ok(nodes)
    }

    async fn ensure_parcela(&self, usuario_id: &str, parcela_id: &str) -> DiagnosisResult<()> {
        self.get_parcela(usuario_id, parcela_id).await.map(|_| ())
    }
}

fn store_err(e: impl Into<anyhow::Error>) -> DiagnosisError {
    DiagnosisError::Store(e.into())
}

fn format_fecha(fecha: DateTime<Utc>) -> String {
    fecha.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn parse_fecha(raw: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)?.with_timezone(&Utc))
}

fn parcela_from_node(node: &Node) -> Result<Parcela> {
    let id: String = node.get("id").ok_or_else(|| anyhow!("Parcela sin 'id'"))?;
    let latitudes: Vec<f64> = node.get("latitudes").unwrap_or_default();
    let longitudes: Vec<f64> = node.get("longitudes").unwrap_or_default();
    if latitudes.len() != longitudes.len() {
        return Err(anyhow!("Parcela {id}: coordenadas desparejadas"));
    }

    let tipos: Vec<String> = node.get("tipos_monitoreo").unwrap_or_default();
    let tipos_monitoreo = tipos
        .iter()
        .map(|t| t.parse::<TipoDiagnostico>())
        .collect::<Result<Vec<_>, _>>()?;

    let proximo: String = node.get("proximo_monitoreo").unwrap_or_default();
    let proximo_monitoreo = if proximo.is_empty() {
        None
    } else {
        Some(parse_fecha(&proximo)?)
    };

    Ok(Parcela {
        nombre: node.get("nombre").unwrap_or_default(),
        usuario_id: node.get("usuario_id").unwrap_or_default(),
        ubicacion: latitudes
            .into_iter()
            .zip(longitudes)
            .map(|(lat, lon)| Punto::new(lat, lon))
            .collect(),
        tipos_monitoreo,
        proximo_monitoreo,
        id,
    })
}

fn analisis_from_node(node: &Node) -> Result<Analisis> {
    let id: String = node.get("id").ok_or_else(|| anyhow!("Análisis sin 'id'"))?;
    let tipo: String = node.get("tipo").ok_or_else(|| anyhow!("Análisis {id} sin 'tipo'"))?;
    let fecha: String = node.get("fecha").ok_or_else(|| anyhow!("Análisis {id} sin 'fecha'"))?;

    let tipos: Vec<String> = node.get("imagenes_tipos").unwrap_or_default();
    let rutas: Vec<String> = node.get("imagenes_rutas").unwrap_or_default();
    let evaluacion: String = node.get("evaluacion").unwrap_or_default();

    Ok(Analisis {
        tipo: tipo.parse()?,
        fecha: parse_fecha(&fecha)?,
        imagenes: tipos
            .into_iter()
            .zip(rutas)
            .map(|(tipo, ruta)| ImagenSatelital { tipo, ruta })
            .collect(),
        evaluacion: (!evaluacion.is_empty()).then_some(evaluacion),
        id,
    })
}

#[async_trait]
impl DocumentStore for Neo4jStore {
    async fn create_user(&self, usuario_id: &str) -> DiagnosisResult<Usuario> {
        self.graph
            .run(query("MERGE (u:Usuario {id: $id})").param("id", usuario_id))
            .await
            .map_err(store_err)?;
        Ok(Usuario {
            id: usuario_id.to_string(),
        })
    }

    async fn get_user(&self, usuario_id: &str) -> DiagnosisResult<Usuario> {
        let node = self
            .first_node(
                query("MATCH (u:Usuario {id: $id}) RETURN u").param("id", usuario_id),
                "u",
            )
            .await?;
        match node {
            Some(_) => Ok(Usuario {
                id: usuario_id.to_string(),
            }),
            None => Err(DiagnosisError::UserNotFound(usuario_id.to_string())),
        }
    }

    async fn save_parcela(&self, parcela: &Parcela) -> DiagnosisResult<()> {
        self.get_user(&parcela.usuario_id).await?;

        let latitudes: Vec<f64> = parcela.ubicacion.iter().map(|p| p.latitude).collect();
        let longitudes: Vec<f64> = parcela.ubicacion.iter().map(|p| p.longitude).collect();
        let tipos: Vec<String> = parcela
            .tipos_monitoreo
            .iter()
            .map(|t| t.as_str().to_string())
            .collect();
        let proximo = parcela
            .proximo_monitoreo
            .map(format_fecha)
            .unwrap_or_default();

        self.graph
            .run(
                query(
                    "MATCH (u:Usuario {id: $usuario_id})
                     MERGE (u)-[:TIENE_PARCELA]->(p:Parcela {id: $id, usuario_id: $usuario_id})
                     SET p.nombre = $nombre, p.latitudes = $latitudes, p.longitudes = $longitudes,
                         p.tipos_monitoreo = $tipos, p.proximo_monitoreo = $proximo",
                )
                .param("usuario_id", parcela.usuario_id.clone())
                .param("id", parcela.id.clone())
                .param("nombre", parcela.nombre.clone())
                .param("latitudes", latitudes)
                .param("longitudes", longitudes)
                .param("tipos", tipos)
                .param("proximo", proximo),
            )
            .await
            .map_err(store_err)
    }

    async fn get_parcela(&self, usuario_id: &str, parcela_id: &str) -> DiagnosisResult<Parcela> {
        self.get_user(usuario_id).await?;
        let node = self
            .first_node(
                query(
                    "MATCH (:Usuario {id: $usuario_id})-[:TIENE_PARCELA]->(p:Parcela {id: $id})
                     RETURN p",
                )
                .param("usuario_id", usuario_id)
                .param("id", parcela_id),
                "p",
            )
            .await?
            .ok_or_else(|| DiagnosisError::PlotNotFound(parcela_id.to_string()))?;
        parcela_from_node(&node).map_err(store_err)
    }

    async fn list_parcelas(&self, usuario_id: &str) -> DiagnosisResult<Vec<Parcela>> {
        self.get_user(usuario_id).await?;
        let nodes = self
            .all_nodes(
                query(
                    "MATCH (:Usuario {id: $usuario_id})-[:TIENE_PARCELA]->(p:Parcela)
                     RETURN p ORDER BY p.id",
                )
                .param("usuario_id", usuario_id),
                "p",
            )
            .await?;
        nodes
            .iter()
            .map(|n| parcela_from_node(n).map_err(store_err))
            .collect()
    }

    async fn delete_parcela(&self, usuario_id: &str, parcela_id: &str) -> DiagnosisResult<()> {
        self.ensure_parcela(usuario_id, parcela_id).await?;
        self.graph
            .run(
                query(
                    "MATCH (:Usuario {id: $usuario_id})-[:TIENE_PARCELA]->(p:Parcela {id: $id})
                     OPTIONAL MATCH (p)-[:TIENE_ANALISIS]->(a:Analisis)
                     DETACH DELETE a, p",
                )
                .param("usuario_id", usuario_id)
                .param("id", parcela_id),
            )
            .await
            .map_err(store_err)
    }

    async fn save_analisis(
        &self,
        usuario_id: &str,
        parcela_id: &str,
        analisis: &Analisis,
    ) -> DiagnosisResult<()> {
        self.ensure_parcela(usuario_id, parcela_id).await?;

        let tipos: Vec<String> = analisis.imagenes.iter().map(|i| i.tipo.clone()).collect();
        let rutas: Vec<String> = analisis.imagenes.iter().map(|i| i.ruta.clone()).collect();

        self.graph
            .run(
                query(
                    "MATCH (:Usuario {id: $usuario_id})-[:TIENE_PARCELA]->(p:Parcela {id: $parcela_id})
                     MERGE (p)-[:TIENE_ANALISIS]->(a:Analisis {id: $id, parcela_id: $parcela_id, usuario_id: $usuario_id})
                     SET a.tipo = $tipo, a.fecha = $fecha, a.secuencia = $secuencia,
                         a.imagenes_tipos = $tipos,
                         a.imagenes_rutas = $rutas, a.evaluacion = $evaluacion",
                )
                .param("usuario_id", usuario_id)
                .param("parcela_id", parcela_id)
                .param("id", analisis.id.clone())
                .param("tipo", analisis.tipo.as_str())
                .param("fecha", format_fecha(analisis.fecha))
                .param("secuencia", i64::from(run_sequence(&analisis.id)))
                .param("tipos", tipos)
                .param("rutas", rutas)
                .param("evaluacion", analisis.evaluacion.clone().unwrap_or_default()),
            )
            .await
            .map_err(store_err)
    }

    async fn get_analisis(
        &self,
        usuario_id: &str,
        parcela_id: &str,
        analisis_id: &str,
    ) -> DiagnosisResult<Option<Analisis>> {
        self.ensure_parcela(usuario_id, parcela_id).await?;
        let node = self
            .first_node(
                query(
                    "MATCH (:Usuario {id: $usuario_id})-[:TIENE_PARCELA]->(:Parcela {id: $parcela_id})
                           -[:TIENE_ANALISIS]->(a:Analisis {id: $id})
                     RETURN a",
                )
                .param("usuario_id", usuario_id)
                .param("parcela_id", parcela_id)
                .param("id", analisis_id),
                "a",
            )
            .await?;
        node.map(|n| analisis_from_node(&n).map_err(store_err))
            .transpose()
    }

    async fn list_analisis(&self, usuario_id: &str, parcela_id: &str) -> DiagnosisResult<Vec<Analisis>> {
        self.ensure_parcela(usuario_id, parcela_id).await?;
        let nodes = self
            .all_nodes(
                query(
                    "MATCH (:Usuario {id: $usuario_id})-[:TIENE_PARCELA]->(:Parcela {id: $parcela_id})
                           -[:TIENE_ANALISIS]->(a:Analisis)
                     RETURN a ORDER BY a.fecha DESC, coalesce(a.secuencia, 1) DESC, a.id DESC",
                )
                .param("usuario_id", usuario_id)
                .param("parcela_id", parcela_id),
                "a",
            )
            .await?;
        nodes
            .iter()
            .map(|n| analisis_from_node(n).map_err(store_err))
            .collect()
    }

    async fn delete_analisis(
        &self,
        usuario_id: &str,
        parcela_id: &str,
        analisis_id: &str,
    ) -> DiagnosisResult<()> {
        if self.get_analisis(usuario_id, parcela_id, analisis_id).await?.is_none() {
            return Err(DiagnosisError::AnalysisNotFound(analisis_id.to_string()));
        }
        self.graph
            .run(
                query(
                    "MATCH (:Usuario {id: $usuario_id})-[:TIENE_PARCELA]->(:Parcela {id: $parcela_id})
                           -[:TIENE_ANALISIS]->(a:Analisis {id: $id})
                     DETACH DELETE a",
                )
                .param("usuario_id", usuario_id)
                .param("parcela_id", parcela_id)
                .param("id", analisis_id),
            )
            .await
            .map_err(store_err)
    }

    async fn last_analisis_by_tipo(
        &self,
        usuario_id: &str,
        parcela_id: &str,
        tipo: TipoDiagnostico,
    ) -> DiagnosisResult<Option<Analisis>> {
        self.ensure_parcela(usuario_id, parcela_id).await?;
        let node = self
            .first_node(
                query(
                    "MATCH (:Usuario {id: $usuario_id})-[:TIENE_PARCELA]->(:Parcela {id: $parcela_id})
                           -[:TIENE_ANALISIS]->(a:Analisis {tipo: $tipo})
                     RETURN a ORDER BY a.fecha DESC, coalesce(a.secuencia, 1) DESC, a.id DESC LIMIT 1",
                )
                .param("usuario_id", usuario_id)
                .param("parcela_id", parcela_id)
                .param("tipo", tipo.as_str()),
                "a",
            )
            .await?;
        node.map(|n| analisis_from_node(&n).map_err(store_err))
            .transpose()
    }
}
