//! Backend capability traits
//!
//! The pipeline never talks to a cluster or database directly. Everything it
//! needs goes through [`ServiceManager`] (process services) and
//! [`ImageStore`] (image metadata and history).

use crate::error::Result;
use crate::labels::ServiceLabels;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Application identity
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct App {
    pub name: String,
}

impl App {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Display for App {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Service backend abstraction
///
/// One service backs each process of an application. Implementations may
/// block on cluster I/O; timeouts are their concern.
#[async_trait]
pub trait ServiceManager: Send + Sync {
    /// Remove the service backing `process`
    async fn remove_service(&self, app: &App, process: &str) -> Result<()>;

    /// Labels of the running service, or `None` when it does not exist yet
    async fn current_labels(&self, app: &App, process: &str) -> Result<Option<ServiceLabels>>;

    /// Create or update the service backing `process`
    async fn deploy_service(
        &self,
        app: &App,
        process: &str,
        labels: &ServiceLabels,
        replicas: u32,
        image: &str,
    ) -> Result<()>;

    /// Build base labels in this backend's label namespace
    fn service_labels(&self, app: &App, process: &str, replicas: u32) -> Result<ServiceLabels> {
        ServiceLabels::new(app.name(), process, replicas)
    }
}

/// Image metadata and deploy history
#[async_trait]
pub trait ImageStore: Send + Sync {
    /// Image the application currently runs, `None` before its first deploy
    async fn current_image(&self, app: &App) -> Result<Option<String>>;

    /// Process names declared by `image`
    async fn image_processes(&self, image: &str) -> Result<Vec<String>>;

    /// Record `image` as the application's newest deployed image
    async fn append_image(&self, app: &App, image: &str) -> Result<()>;
}
