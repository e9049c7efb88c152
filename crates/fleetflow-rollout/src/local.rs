//! Local service backend
//!
//! Records services in `<state_dir>/services.json` instead of talking to a
//! cluster. Useful for dry runs and local environments.

use crate::error::{Result, RolloutError};
use crate::labels::{DEFAULT_NAMESPACE, ServiceLabels};
use crate::manager::{App, ServiceManager};
use crate::store::{read_json, write_json};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

const SERVICES_FILE: &str = "services.json";
const SERVICES_BACKUP: &str = "services.json.backup";

/// All recorded services, keyed by `app/process`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceRegistry {
    #[serde(default)]
    pub services: BTreeMap<String, ServiceRecord>,
}

/// One recorded process service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceRecord {
    pub app: String,
    pub process: String,
    pub image: String,
    /// Replicas actually running
    pub replicas: u32,
    pub labels: BTreeMap<String, String>,
    pub updated_at: DateTime<Utc>,
}

fn service_key(app: &App, process: &str) -> String {
    format!("{}/{}", app.name(), process)
}

/// [`ServiceManager`] persisting services under a state directory
pub struct LocalServiceManager {
    state_dir: PathBuf,
    namespace: String,
    write: Mutex<()>,
}

impl LocalServiceManager {
    pub fn new(state_dir: impl AsRef<Path>) -> Self {
        Self {
            state_dir: state_dir.as_ref().to_path_buf(),
            namespace: DEFAULT_NAMESPACE.to_string(),
            write: Mutex::new(()),
        }
    }

    /// Use `namespace` as label prefix
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    fn services_path(&self) -> PathBuf {
        self.state_dir.join(SERVICES_FILE)
    }

    fn backup_path(&self) -> PathBuf {
        self.state_dir.join(SERVICES_BACKUP)
    }

    async fn load(&self) -> Result<ServiceRegistry> {
        Ok(read_json(&self.services_path(), &self.backup_path())
            .await?
            .unwrap_or_default())
    }

    async fn save(&self, registry: &ServiceRegistry) -> Result<()> {
        write_json(
            &self.services_path(),
            &self.backup_path(),
            registry,
        )
        .await?;
        tracing::debug!("Saved {} local services", registry.services.len());
        Ok(())
    }

    /// Services recorded for `app`, ordered by process name
    pub async fn list_services(&self, app: &App) -> Result<Vec<ServiceRecord>> {
        Ok(self
            .load()
            .await?
            .services
            .into_values()
            .filter(|s| s.app == app.name())
            .collect())
    }
}

#[async_trait]
impl ServiceManager for LocalServiceManager {
    async fn remove_service(&self, app: &App, process: &str) -> Result<()> {
        let _guard = self.write.lock().await;
        let mut registry = self.load().await?;
        if registry.services.remove(&service_key(app, process)).is_none() {
            return Err(RolloutError::ServiceNotFound {
                app: app.name().to_string(),
                process: process.to_string(),
            });
        }
        self.save(&registry).await
    }

    async fn current_labels(&self, app: &App, process: &str) -> Result<Option<ServiceLabels>> {
        let registry = self.load().await?;
        registry
            .services
            .get(&service_key(app, process))
            .map(|s| ServiceLabels::from_map(&self.namespace, &s.labels))
            .transpose()
    }

    async fn deploy_service(
        &self,
        app: &App,
        process: &str,
        labels: &ServiceLabels,
        replicas: u32,
        image: &str,
    ) -> Result<()> {
        let _guard = self.write.lock().await;
        let mut registry = self.load().await?;
        registry.services.insert(
            service_key(app, process),
            ServiceRecord {
                app: app.name().to_string(),
                process: process.to_string(),
                image: image.to_string(),
                replicas,
                labels: labels.to_map(&self.namespace),
                updated_at: Utc::now(),
            },
        );
        self.save(&registry).await
    }
}
