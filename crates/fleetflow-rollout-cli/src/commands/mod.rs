pub mod deploy;
pub mod history;
pub mod ps;
pub mod register;

use fleetflow_rollout::{FileImageStore, LocalServiceManager, RolloutConfig, StateLock};

pub fn image_store(config: &RolloutConfig) -> FileImageStore {
    FileImageStore::new(&config.state_dir).with_history_size(config.image_history_size)
}

pub fn service_manager(config: &RolloutConfig) -> LocalServiceManager {
    LocalServiceManager::new(&config.state_dir).with_namespace(config.label_namespace.clone())
}

/// Release the state lock, logging a failure instead of returning it
pub async fn release_lock(lock: StateLock) {
    if let Err(e) = lock.release().await {
        tracing::warn!("Failed to release state lock: {}", e);
    }
}
