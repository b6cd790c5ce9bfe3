use std::path::PathBuf;
use std::sync::Arc;

use crate::auth::Auth;
use crate::gateway::{ThrottleConfig, UpstreamGateway};
use crate::gemini::ImageModel;
use crate::generation::GenerationService;
use crate::recorder::ConversationRecorder;
use crate::store::SqliteStore;

// app's shared state, built once and handed to every handler
pub struct AppState {
    pub generation: GenerationService,
    pub recorder: ConversationRecorder,
    pub auth: Auth,
    pub store: SqliteStore,
    pub public_dir: PathBuf, // where index.html lives
    pub max_upload_bytes: usize,
}

impl AppState {
    pub fn new(
        model: Arc<dyn ImageModel>,
        throttle: ThrottleConfig,
        default_model: String,
        store: SqliteStore,
        public_dir: PathBuf,
        max_upload_bytes: usize,
    ) -> Self {
        let gateway = Arc::new(UpstreamGateway::new(model, throttle));
        Self {
            generation: GenerationService::new(gateway, default_model),
            recorder: ConversationRecorder::new(store.clone()),
            auth: Auth::new(store.clone()),
            store,
            public_dir,
            max_upload_bytes,
        }
    }
}
