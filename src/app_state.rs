use std::sync::{Arc, Mutex};

use tokio::sync::oneshot;

use crate::{diagnosis::DiagnosisService, documents::DocumentStore};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn DocumentStore>,
    pub diagnosis: Arc<DiagnosisService>,
    pub shutdown_sender: Arc<Mutex<Option<oneshot::Sender<()>>>>,
}

impl AppState {
    pub fn new(store: Arc<dyn DocumentStore>, diagnosis: Arc<DiagnosisService>) -> (Self, oneshot::Receiver<()>) {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let state = Self {
            store,
            diagnosis,
            shutdown_sender: Arc::new(Mutex::new(Some(shutdown_tx))),
        };
        (state, shutdown_rx)
    }
}
