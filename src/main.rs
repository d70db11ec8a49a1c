use std::sync::Arc;

use axum::Router;
use farmai_diagnostico::{
    api,
    app_state::AppState,
    config,
    diagnosis::DiagnosisService,
    fetch::{self, ImageryClient},
    llm, neo4j_client,
    storage::ArtifactStore,
    token::SentinelTokenManager,
};
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Cargar .env e inicializar logging
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // 2. Cargar configuración
    let cfg = config::AppConfig::from_env()?;

    // 3. Conectar a Neo4j y asegurar esquemas
    let graph = neo4j_client::connect_from_config(&cfg).await?;
    neo4j_client::ensure_schema(&graph).await?;
    let store = Arc::new(neo4j_client::Neo4jStore::new(Arc::new(graph)));

    // 4. Clientes de Sentinel Hub (token compartido entre peticiones)
    let http = fetch::build_http_client(cfg.sentinel.timeout)?;
    let tokens = Arc::new(SentinelTokenManager::new(http.clone(), &cfg.sentinel));
    let imagery = ImageryClient::new(http, cfg.sentinel.process_url.clone(), tokens);

    // 5. Almacenamiento de imágenes y modelo de evaluación
    let artifacts = ArtifactStore::new(cfg.storage_root.clone(), cfg.cdn_base_url.clone());
    let llm_manager = Arc::new(llm::LlmManager::from_config(&cfg)?);

    let diagnosis = Arc::new(DiagnosisService::new(
        store.clone(),
        imagery,
        artifacts,
        llm_manager,
    ));

    // 6. Estado compartido y router
    let (app_state, shutdown_rx) = AppState::new(store, diagnosis);

    let app = Router::new()
        .merge(api::create_router(app_state))
        .nest_service("/imagenes", ServeDir::new(&cfg.storage_root))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    // 7. Iniciar el servidor
    let listener = tokio::net::TcpListener::bind(&cfg.server_addr).await?;
    info!("🚀 Servidor escuchando en http://{}", cfg.server_addr);
    info!("Imágenes servidas desde {}", cfg.storage_root.display());

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            shutdown_rx.await.ok();
            info!("Señal de apagado recibida, iniciando cierre del servidor.");
        })
        .await?;

    info!("✅ Servidor cerrado correctamente.");
    Ok(())
}
