//! Utilidades para los tests de integración: un Sentinel Hub simulado con
//! axum, tars de prueba y dobles del token y del modelo de evaluación.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use farmai_diagnostico::{
    catalog::TipoDiagnostico,
    config::SentinelConfig,
    diagnosis::DiagnosisService,
    documents::{DocumentStore, InMemoryDocumentStore},
    fetch::{build_http_client, ImageryClient},
    llm::ImageEvaluator,
    models::{Parcela, Punto},
    storage::ArtifactStore,
    token::{SentinelTokenManager, TokenProvider},
    DiagnosisResult,
};
use serde_json::{json, Value};
use tar::{Builder, EntryType, Header};
use tempfile::TempDir;
use url::Url;

pub const TAR: &str = "application/x-tar";

/// Respuesta programada del Process API simulado.
#[derive(Clone, Debug)]
pub struct MockResponse {
    pub status: u16,
    pub content_type: &'static str,
    pub body: Vec<u8>,
    pub delay: Option<Duration>,
}

impl MockResponse {
    pub fn tar(files: &[(&str, &[u8])]) -> Self {
        Self {
            status: 200,
            content_type: TAR,
            body: build_tar(files),
            delay: None,
        }
    }

    pub fn status(status: u16, body: &str) -> Self {
        Self {
            status,
            content_type: "application/json",
            body: body.as_bytes().to_vec(),
            delay: None,
        }
    }

    pub fn with_content_type(mut self, content_type: &'static str) -> Self {
        self.content_type = content_type;
        self
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[derive(Default)]
struct MockInner {
    token_calls: AtomicUsize,
    process_calls: AtomicUsize,
    reject_credentials: AtomicBool,
    responses: Mutex<VecDeque<MockResponse>>,
    seen_tokens: Mutex<Vec<String>>,
    seen_accept: Mutex<Vec<String>>,
    payloads: Mutex<Vec<Value>>,
}

/// Sentinel Hub simulado: `/oauth/token` y `/api/v1/process`.
#[derive(Clone, Default)]
pub struct SentinelMock {
    inner: Arc<MockInner>,
    pub base_url: String,
}

impl SentinelMock {
    pub async fn start() -> Self {
        let mut mock = Self::default();
        let router = Router::new()
            .route("/oauth/token", post(token_handler))
            .route("/api/v1/process", post(process_handler))
            .with_state(mock.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        mock.base_url = format!("http://{addr}");
        mock
    }

    pub fn token_url(&self) -> String {
        format!("{}/oauth/token", self.base_url)
    }

    pub fn process_url(&self) -> String {
        format!("{}/api/v1/process", self.base_url)
    }

    pub fn sentinel_config(&self, timeout: Duration) -> SentinelConfig {
        SentinelConfig {
            client_id: "client-id".into(),
            client_secret: "client-secret".into(),
            token_url: self.token_url(),
            process_url: self.process_url(),
            timeout,
        }
    }

    pub fn push(&self, response: MockResponse) {
        self.inner.responses.lock().unwrap().push_back(response);
    }

    pub fn reject_credentials(&self) {
        self.inner.reject_credentials.store(true, Ordering::SeqCst);
    }

    pub fn token_calls(&self) -> usize {
        self.inner.token_calls.load(Ordering::SeqCst)
    }

    pub fn process_calls(&self) -> usize {
        self.inner.process_calls.load(Ordering::SeqCst)
    }

    pub fn seen_tokens(&self) -> Vec<String> {
        self.inner.seen_tokens.lock().unwrap().clone()
    }

    pub fn seen_accept(&self) -> Vec<String> {
        self.inner.seen_accept.lock().unwrap().clone()
    }

    pub fn payloads(&self) -> Vec<Value> {
        self.inner.payloads.lock().unwrap().clone()
    }
}

async fn token_handler(State(mock): State<SentinelMock>, body: String) -> Response {
    let n = mock.inner.token_calls.fetch_add(1, Ordering::SeqCst) + 1;
    // Da tiempo a que peticiones concurrentes se acumulen en el lock.
    tokio::time::sleep(Duration::from_millis(20)).await;

    if mock.inner.reject_credentials.load(Ordering::SeqCst)
        || !body.contains("grant_type=client_credentials")
        || !body.contains("client_id=client-id")
    {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": "invalid_client"})),
        )
            .into_response();
    }
    Json(json!({"access_token": format!("token-{n}"), "expires_in": 3600})).into_response()
}

async fn process_handler(
    State(mock): State<SentinelMock>,
    headers: HeaderMap,
    Json(payload): Json<Value>,
) -> Response {
    mock.inner.process_calls.fetch_add(1, Ordering::SeqCst);
    let auth = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .trim_start_matches("Bearer ")
        .to_string();
    let accept = headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    mock.inner.seen_tokens.lock().unwrap().push(auth);
    mock.inner.seen_accept.lock().unwrap().push(accept);
    mock.inner.payloads.lock().unwrap().push(payload);

    let next = mock.inner.responses.lock().unwrap().pop_front();
    let response = next.unwrap_or_else(|| MockResponse::status(500, "sin respuesta programada"));
    if let Some(delay) = response.delay {
        tokio::time::sleep(delay).await;
    }
    (
        StatusCode::from_u16(response.status).unwrap(),
        [(header::CONTENT_TYPE, response.content_type)],
        response.body,
    )
        .into_response()
}

pub fn build_tar(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut builder = Builder::new(Vec::new());
    for (name, data) in files {
        let mut header = Header::new_gnu();
        header.set_entry_type(EntryType::Regular);
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        builder.append_data(&mut header, name, *data).unwrap();
    }
    builder.into_inner().unwrap()
}

/// Token provider falso: cuenta llamadas y emite `fake-1`, `fake-2`...
#[derive(Default)]
pub struct CountingTokens {
    pub acquires: AtomicUsize,
    pub invalidations: AtomicUsize,
    issued: AtomicUsize,
    current: Mutex<Option<String>>,
}

impl CountingTokens {
    pub fn acquires(&self) -> usize {
        self.acquires.load(Ordering::SeqCst)
    }

    pub fn invalidations(&self) -> usize {
        self.invalidations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenProvider for CountingTokens {
    async fn acquire(&self) -> DiagnosisResult<String> {
        self.acquires.fetch_add(1, Ordering::SeqCst);
        let mut current = self.current.lock().unwrap();
        if let Some(token) = current.as_ref() {
            return Ok(token.clone());
        }
        let n = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        let token = format!("fake-{n}");
        *current = Some(token.clone());
        Ok(token)
    }

    async fn invalidate(&self, stale: &str) {
        self.invalidations.fetch_add(1, Ordering::SeqCst);
        let mut current = self.current.lock().unwrap();
        if current.as_deref() == Some(stale) {
            *current = None;
        }
    }
}

/// Evaluador falso que registra las URLs recibidas.
#[derive(Default)]
pub struct FakeEvaluator {
    pub calls: Mutex<Vec<(TipoDiagnostico, Vec<String>)>>,
    pub fail: AtomicBool,
}

impl FakeEvaluator {
    pub fn failing() -> Self {
        let evaluator = Self::default();
        evaluator.fail.store(true, Ordering::SeqCst);
        evaluator
    }

    pub fn calls(&self) -> Vec<(TipoDiagnostico, Vec<String>)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ImageEvaluator for FakeEvaluator {
    async fn evaluate(&self, tipo: TipoDiagnostico, image_urls: &[String]) -> anyhow::Result<String> {
        self.calls
            .lock()
            .unwrap()
            .push((tipo, image_urls.to_vec()));
        if self.fail.load(Ordering::SeqCst) {
            return Err(anyhow!("modelo no disponible"));
        }
        Ok(format!("## {tipo}\nSin plagas detectadas en {} imágenes.", image_urls.len()))
    }
}

pub fn parcela(usuario_id: &str, id: &str, ubicacion: Vec<Punto>) -> Parcela {
    Parcela {
        id: id.into(),
        nombre: id.into(),
        usuario_id: usuario_id.into(),
        ubicacion,
        tipos_monitoreo: vec![TipoDiagnostico::Plagas],
        proximo_monitoreo: None,
    }
}

pub fn triangle() -> Vec<Punto> {
    vec![Punto::new(0.0, 0.0), Punto::new(0.0, 1.0), Punto::new(1.0, 1.0)]
}

/// Servicio completo contra el mock, con almacén en memoria y disco temporal.
pub struct Harness {
    pub mock: SentinelMock,
    pub store: Arc<InMemoryDocumentStore>,
    pub evaluator: Arc<FakeEvaluator>,
    pub service: Arc<DiagnosisService>,
    pub dir: TempDir,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_evaluator(FakeEvaluator::default()).await
    }

    pub async fn with_evaluator(evaluator: FakeEvaluator) -> Self {
        let mock = SentinelMock::start().await;
        let cfg = mock.sentinel_config(Duration::from_secs(5));
        let http = build_http_client(cfg.timeout).unwrap();
        let tokens = Arc::new(SentinelTokenManager::new(http.clone(), &cfg));
        let imagery = ImageryClient::new(http, cfg.process_url.clone(), tokens);

        let dir = TempDir::new().unwrap();
        let artifacts = ArtifactStore::new(
            dir.path(),
            Url::parse("https://cdn.farmai.test/imagenes/").unwrap(),
        );

        let store = Arc::new(InMemoryDocumentStore::new());
        store.create_user("u1").await.unwrap();
        store
            .save_parcela(&parcela("u1", "p1", triangle()))
            .await
            .unwrap();

        let evaluator = Arc::new(evaluator);
        let service = Arc::new(DiagnosisService::new(
            store.clone(),
            imagery,
            artifacts,
            evaluator.clone(),
        ));

        Self {
            mock,
            store,
            evaluator,
            service,
            dir,
        }
    }
}
