use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info, warn};

use crate::{
    app_state::AppState,
    catalog::{self, CatalogEntry, TipoDiagnostico},
    error::DiagnosisError,
    models::{Analisis, NuevaParcela, Parcela, Usuario},
};

type ApiError = (StatusCode, Json<serde_json::Value>);
type ApiResult<T> = Result<T, ApiError>;

// --- Payloads ---

#[derive(Deserialize)]
pub struct NuevoUsuarioPayload {
    username: String,
}

#[derive(Serialize)]
pub struct MessageResponse {
    message: String,
}

// --- Router ---

pub fn create_router(app_state: AppState) -> Router {
    Router::new()
        .route("/api/usuarios", post(create_user_handler))
        .route("/api/parcelas", post(create_parcela_handler))
        .route("/api/parcelas/:usuario_id", get(list_parcelas_handler))
        .route(
            "/api/parcelas/:usuario_id/:parcela_id",
            get(get_parcela_handler).delete(delete_parcela_handler),
        )
        .route(
            "/api/analisis/ejecutar/:usuario_id/:parcela_id/:tipo",
            post(run_diagnosis_handler),
        )
        .route(
            "/api/analisis/evaluar/:usuario_id/:parcela_id/:analisis_id",
            post(evaluate_analisis_handler),
        )
        .route(
            "/api/analisis/ultimo/:usuario_id/:parcela_id/:tipo",
            get(last_analisis_handler),
        )
        .route("/api/analisis/:usuario_id/:parcela_id", get(list_analisis_handler))
        .route(
            "/api/analisis/:usuario_id/:parcela_id/:analisis_id",
            get(get_analisis_handler).delete(delete_analisis_handler),
        )
        .route("/api/diagnosticos", get(catalog_handler))
        .route("/api/shutdown", post(shutdown_handler))
        .with_state(app_state)
}

/// Traduce el error del dominio al código HTTP y al cuerpo `{"error": ...}`.
pub fn api_error(err: DiagnosisError) -> ApiError {
    let status = if err.is_client_error() {
        StatusCode::BAD_REQUEST
    } else if err.is_not_found() {
        StatusCode::NOT_FOUND
    } else if err.is_upstream_error() {
        StatusCode::BAD_GATEWAY
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };

    if status.is_server_error() {
        error!("{err}");
    } else {
        warn!("{err}");
    }
    (status, Json(json!({ "error": err.to_string() })))
}

// --- Handlers: usuarios y parcelas ---

#[axum::debug_handler]
async fn create_user_handler(
    State(state): State<AppState>,
    Json(payload): Json<NuevoUsuarioPayload>,
) -> ApiResult<(StatusCode, Json<Usuario>)> {
    let username = payload.username.trim();
    if username.is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "El nombre de usuario no puede estar vacío."})),
        ));
    }
    let user = state.store.create_user(username).await.map_err(api_error)?;
    Ok((StatusCode::CREATED, Json(user)))
}

#[axum::debug_handler]
async fn create_parcela_handler(
    State(state): State<AppState>,
    Json(payload): Json<NuevaParcela>,
) -> ApiResult<(StatusCode, Json<Parcela>)> {
    if payload.ubicacion.is_empty() {
        return Err(api_error(DiagnosisError::InvalidGeometry));
    }
    let parcela = payload.into_parcela();
    if parcela.id.is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "El nombre de la parcela no genera un identificador válido."})),
        ));
    }

    state.store.save_parcela(&parcela).await.map_err(api_error)?;
    info!(usuario = %parcela.usuario_id, parcela = %parcela.id, "Parcela creada");
    Ok((StatusCode::CREATED, Json(parcela)))
}

#[axum::debug_handler]
async fn list_parcelas_handler(
    State(state): State<AppState>,
    Path(usuario_id): Path<String>,
) -> ApiResult<Json<Vec<Parcela>>> {
    state
        .store
        .list_parcelas(&usuario_id)
        .await
        .map(Json)
        .map_err(api_error)
}

#[axum::debug_handler]
async fn get_parcela_handler(
    State(state): State<AppState>,
    Path((usuario_id, parcela_id)): Path<(String, String)>,
) -> ApiResult<Json<Parcela>> {
    state
        .store
        .get_parcela(&usuario_id, &parcela_id)
        .await
        .map(Json)
        .map_err(api_error)
}

#[axum::debug_handler]
async fn delete_parcela_handler(
    State(state): State<AppState>,
    Path((usuario_id, parcela_id)): Path<(String, String)>,
) -> ApiResult<Json<MessageResponse>> {
    state
        .store
        .delete_parcela(&usuario_id, &parcela_id)
        .await
        .map_err(api_error)?;
    Ok(Json(MessageResponse {
        message: "Parcela eliminada correctamente".to_string(),
    }))
}

// --- Handlers: análisis ---

#[axum::debug_handler]
async fn run_diagnosis_handler(
    State(state): State<AppState>,
    Path((usuario_id, parcela_id, tipo)): Path<(String, String, String)>,
) -> ApiResult<(StatusCode, Json<Analisis>)> {
    let analisis = state
        .diagnosis
        .run(&usuario_id, &parcela_id, &tipo)
        .await
        .map_err(api_error)?;
    Ok((StatusCode::CREATED, Json(analisis)))
}

/// Repite la evaluación del modelo sobre un análisis ya guardado.
#[axum::debug_handler]
async fn evaluate_analisis_handler(
    State(state): State<AppState>,
    Path((usuario_id, parcela_id, analisis_id)): Path<(String, String, String)>,
) -> ApiResult<Json<Analisis>> {
    let analisis = state
        .store
        .get_analisis(&usuario_id, &parcela_id, &analisis_id)
        .await
        .map_err(api_error)?
        .ok_or_else(|| api_error(DiagnosisError::AnalysisNotFound(analisis_id)))?;
    state
        .diagnosis
        .evaluate(&usuario_id, &parcela_id, analisis)
        .await
        .map(Json)
        .map_err(api_error)
}

#[axum::debug_handler]
async fn list_analisis_handler(
    State(state): State<AppState>,
    Path((usuario_id, parcela_id)): Path<(String, String)>,
) -> ApiResult<Json<Vec<Analisis>>> {
    state
        .store
        .list_analisis(&usuario_id, &parcela_id)
        .await
        .map(Json)
        .map_err(api_error)
}

#[axum::debug_handler]
async fn get_analisis_handler(
    State(state): State<AppState>,
    Path((usuario_id, parcela_id, analisis_id)): Path<(String, String, String)>,
) -> ApiResult<Json<Analisis>> {
    state
        .store
        .get_analisis(&usuario_id, &parcela_id, &analisis_id)
        .await
        .map_err(api_error)?
        .map(Json)
        .ok_or_else(|| api_error(DiagnosisError::AnalysisNotFound(analisis_id)))
}

#[axum::debug_handler]
async fn delete_analisis_handler(
    State(state): State<AppState>,
    Path((usuario_id, parcela_id, analisis_id)): Path<(String, String, String)>,
) -> ApiResult<Json<MessageResponse>> {
    state
        .store
        .delete_analisis(&usuario_id, &parcela_id, &analisis_id)
        .await
        .map_err(api_error)?;
    Ok(Json(MessageResponse {
        message: "Análisis eliminado correctamente".to_string(),
    }))
}

#[axum::debug_handler]
async fn last_analisis_handler(
    State(state): State<AppState>,
    Path((usuario_id, parcela_id, tipo)): Path<(String, String, String)>,
) -> ApiResult<Json<Analisis>> {
    let tipo: TipoDiagnostico = tipo.parse().map_err(api_error)?;
    state
        .store
        .last_analisis_by_tipo(&usuario_id, &parcela_id, tipo)
        .await
        .map_err(api_error)?
        .map(Json)
        .ok_or_else(|| {
            api_error(DiagnosisError::AnalysisNotFound(format!(
                "{parcela_id}/{tipo}"
            )))
        })
}

#[axum::debug_handler]
async fn catalog_handler() -> Json<&'static [CatalogEntry]> {
    Json(catalog::entries())
}

// --- Handler de Apagado ---

#[axum::debug_handler]
async fn shutdown_handler(State(state): State<AppState>) -> impl IntoResponse {
    info!("Petición de apagado recibida.");
    if let Ok(mut guard) = state.shutdown_sender.lock() {
        if let Some(sender) = guard.take() {
            let _ = sender.send(());
        }
    }
    StatusCode::OK
}
