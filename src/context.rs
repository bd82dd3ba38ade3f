use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::ingress::BridgeApi;
use crate::registry::ExclusionRegistry;
use crate::transcribe::Transcriber;

/// Everything the dispatcher and its jobs need, built once at startup and
/// dropped at shutdown. Collaborators sit behind trait objects so tests
/// can substitute them.
pub struct EngineContext {
    pub config: Config,
    pub transport: Arc<dyn BridgeApi>,
    pub transcriber: Arc<dyn Transcriber>,
    pub registry: ExclusionRegistry,
}

impl EngineContext {
    pub fn media_dir(&self) -> PathBuf {
        PathBuf::from(&self.config.engine.media_dir)
    }

    pub fn job_deadline(&self) -> Duration {
        Duration::from_secs(self.config.engine.job_timeout_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.config.engine.shutdown_grace_secs)
    }
}
