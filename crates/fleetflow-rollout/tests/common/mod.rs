use async_trait::async_trait;
use fleetflow_rollout::{App, ImageStore, Result, RolloutError, ServiceLabels, ServiceManager};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

/// Backend call as seen by [`RecordingManager`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Labels(String),
    Deploy { process: String, image: String },
    Remove(String),
}

impl Call {
    pub fn deploy(process: &str, image: &str) -> Self {
        Call::Deploy {
            process: process.to_string(),
            image: image.to_string(),
        }
    }

    pub fn remove(process: &str) -> Self {
        Call::Remove(process.to_string())
    }
}

/// Deployed service: labels, running replicas, image
pub type Service = (ServiceLabels, u32, String);

/// In-memory service backend that records every call
#[derive(Default)]
pub struct RecordingManager {
    services: Mutex<BTreeMap<String, Service>>,
    calls: Mutex<Vec<Call>>,
    failing_deploys: Mutex<BTreeSet<(String, String)>>,
    failing_removals: Mutex<BTreeSet<String>>,
    failing_labels: Mutex<BTreeSet<String>>,
}

impl RecordingManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_service(self, labels: ServiceLabels, replicas: u32, image: &str) -> Self {
        self.services.lock().unwrap().insert(
            labels.process().to_string(),
            (labels, replicas, image.to_string()),
        );
        self
    }

    /// Make deploying `image` for `process` fail
    pub fn fail_deploy(&self, process: &str, image: &str) {
        self.failing_deploys
            .lock()
            .unwrap()
            .insert((process.to_string(), image.to_string()));
    }

    pub fn fail_remove(&self, process: &str) {
        self.failing_removals
            .lock()
            .unwrap()
            .insert(process.to_string());
    }

    /// Make reading the labels of `process` fail
    pub fn fail_labels(&self, process: &str) {
        self.failing_labels
            .lock()
            .unwrap()
            .insert(process.to_string());
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    /// Deploy and remove calls, without label reads
    pub fn mutations(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| !matches!(c, Call::Labels(_)))
            .collect()
    }

    pub fn service(&self, process: &str) -> Option<Service> {
        self.services.lock().unwrap().get(process).cloned()
    }

    pub fn service_names(&self) -> Vec<String> {
        self.services.lock().unwrap().keys().cloned().collect()
    }
}

#[async_trait]
impl ServiceManager for RecordingManager {
    async fn remove_service(&self, app: &App, process: &str) -> Result<()> {
        self.calls.lock().unwrap().push(Call::remove(process));
        if self.failing_removals.lock().unwrap().contains(process) {
            return Err(RolloutError::Backend(format!(
                "cannot remove {}[{}]",
                app, process
            )));
        }
        self.services.lock().unwrap().remove(process);
        Ok(())
    }

    async fn current_labels(&self, app: &App, process: &str) -> Result<Option<ServiceLabels>> {
        self.calls
            .lock()
            .unwrap()
            .push(Call::Labels(process.to_string()));
        if self.failing_labels.lock().unwrap().contains(process) {
            return Err(RolloutError::Backend(format!(
                "cannot read labels of {}[{}]",
                app, process
            )));
        }
        Ok(self
            .services
            .lock()
            .unwrap()
            .get(process)
            .map(|(labels, _, _)| labels.clone()))
    }

    async fn deploy_service(
        &self,
        app: &App,
        process: &str,
        labels: &ServiceLabels,
        replicas: u32,
        image: &str,
    ) -> Result<()> {
        self.calls.lock().unwrap().push(Call::deploy(process, image));
        if self
            .failing_deploys
            .lock()
            .unwrap()
            .contains(&(process.to_string(), image.to_string()))
        {
            return Err(RolloutError::Backend(format!(
                "cannot deploy {} to {}[{}]",
                image, app, process
            )));
        }
        self.services.lock().unwrap().insert(
            process.to_string(),
            (labels.clone(), replicas, image.to_string()),
        );
        Ok(())
    }
}

/// In-memory image metadata and history
#[derive(Default)]
pub struct MemoryImageStore {
    images: BTreeMap<String, Vec<String>>,
    history: Mutex<BTreeMap<String, Vec<String>>>,
    fail_append: AtomicBool,
}

impl MemoryImageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_image(mut self, image: &str, processes: &[&str]) -> Self {
        self.images.insert(
            image.to_string(),
            processes.iter().map(|p| p.to_string()).collect(),
        );
        self
    }

    pub fn with_current(self, app: &str, image: &str) -> Self {
        self.history
            .lock()
            .unwrap()
            .entry(app.to_string())
            .or_default()
            .push(image.to_string());
        self
    }

    pub fn fail_append(&self) {
        self.fail_append.store(true, Ordering::SeqCst);
    }

    pub fn history(&self, app: &str) -> Vec<String> {
        self.history
            .lock()
            .unwrap()
            .get(app)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl ImageStore for MemoryImageStore {
    async fn current_image(&self, app: &App) -> Result<Option<String>> {
        Ok(self
            .history
            .lock()
            .unwrap()
            .get(app.name())
            .and_then(|h| h.last().cloned()))
    }

    async fn image_processes(&self, image: &str) -> Result<Vec<String>> {
        self.images
            .get(image)
            .cloned()
            .ok_or_else(|| RolloutError::ImageNotFound(image.to_string()))
    }

    async fn append_image(&self, app: &App, image: &str) -> Result<()> {
        if self.fail_append.load(Ordering::SeqCst) {
            return Err(RolloutError::StateError("image history unavailable".to_string()));
        }
        self.history
            .lock()
            .unwrap()
            .entry(app.name().to_string())
            .or_default()
            .push(image.to_string());
        Ok(())
    }
}

pub fn labels(process: &str, replicas: u32) -> ServiceLabels {
    ServiceLabels::new("myapp", process, replicas).unwrap()
}
