//! Application state shared by every handler.

use socialstream_core::Config;
use socialstream_services::MediaLifecycleCoordinator;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<MediaLifecycleCoordinator>,
    pub config: Config,
}
