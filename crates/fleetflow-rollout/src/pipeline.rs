//! Service reconciliation pipeline
//!
//! Redeploys an application with a new image in three stages:
//!
//! 1. `update-services` deploys every process of the new image in
//!    lexicographic order. Compensation restores pre-existing services to the
//!    current image and removes services that did not exist before the run.
//! 2. `update-image-in-db` records the new image. No compensation.
//! 3. `remove-old-services` removes processes the new image no longer
//!    declares. Removal failures are logged and ignored.
//!
//! The caller must not run two pipelines for the same application at once;
//! current state is read once when the plan is built.

use crate::deploy::{deploy_service, restore_service};
use crate::error::{Result, RolloutError};
use crate::labels::ServiceLabels;
use crate::manager::{App, ImageStore, ServiceManager};
use crate::process::{ProcessSpec, difference};
use crate::saga::{Saga, Stage};
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Arc;

/// What a pipeline run is going to do
#[derive(Debug, Clone)]
pub struct DeployPlan {
    pub app: App,
    /// Image currently recorded for the app, `None` on first deploy
    pub current_image: Option<String>,
    pub current_spec: ProcessSpec,
    pub new_image: String,
    pub new_spec: ProcessSpec,
}

impl DeployPlan {
    /// Processes that will be removed once the new image is live
    pub fn obsolete_processes(&self) -> BTreeSet<String> {
        difference(&self.current_spec, &self.new_spec)
    }

    /// Processes the new image introduces
    pub fn added_processes(&self) -> BTreeSet<String> {
        difference(&self.new_spec, &self.current_spec)
    }

    pub fn summary(&self) -> DeployPlanSummary {
        DeployPlanSummary {
            deploy: self.new_spec.len(),
            add: self.added_processes().len(),
            remove: self.obsolete_processes().len(),
        }
    }
}

/// Counts of planned process operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeployPlanSummary {
    pub deploy: usize,
    pub add: usize,
    pub remove: usize,
}

impl std::fmt::Display for DeployPlanSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} to deploy ({} new), {} to remove",
            self.deploy, self.add, self.remove
        )
    }
}

/// Per-run context shared by all stages
struct DeployContext {
    manager: Arc<dyn ServiceManager>,
    images: Arc<dyn ImageStore>,
    plan: DeployPlan,
}

/// A process deployed by `update-services`
#[derive(Debug, Clone)]
struct DeployedProcess {
    name: String,
    /// Labels observed right before the deploy, `None` if the service did
    /// not exist
    previous: Option<ServiceLabels>,
}

impl DeployContext {
    /// Undo deploys in the order they were made. Errors are logged so the
    /// remaining processes still get rolled back.
    async fn rollback(&self, deployed: &[DeployedProcess]) {
        let plan = &self.plan;
        for process in deployed {
            let result = match (
                plan.current_spec.get(&process.name),
                plan.current_image.as_deref(),
                process.previous.as_ref(),
            ) {
                (Some(state), Some(image), Some(previous)) => {
                    tracing::info!(
                        "Rolling back {}[{}] to {}",
                        plan.app,
                        process.name,
                        image
                    );
                    restore_service(
                        self.manager.as_ref(),
                        &plan.app,
                        &process.name,
                        image,
                        *state,
                        Some(previous),
                    )
                    .await
                }
                _ => {
                    tracing::info!("Rolling back {}[{}] by removal", plan.app, process.name);
                    self.manager.remove_service(&plan.app, &process.name).await
                }
            };
            if let Err(e) = result {
                tracing::error!(
                    "error rolling back updated service for {}[{}]: {}",
                    plan.app,
                    process.name,
                    e
                );
            }
        }
    }
}

struct UpdateServices;

#[async_trait]
impl Stage<DeployContext> for UpdateServices {
    type Output = Vec<DeployedProcess>;

    fn name(&self) -> &'static str {
        "update-services"
    }

    async fn forward(&self, ctx: &DeployContext) -> Result<Vec<DeployedProcess>> {
        let plan = &ctx.plan;
        let mut deployed = Vec::with_capacity(plan.new_spec.len());

        for (name, state) in plan.new_spec.iter() {
            match deploy_service(
                ctx.manager.as_ref(),
                &plan.app,
                name,
                &plan.new_image,
                *state,
            )
            .await
            {
                Ok(previous) => deployed.push(DeployedProcess {
                    name: name.to_string(),
                    previous,
                }),
                Err(e) => {
                    tracing::warn!(
                        "Deploying {}[{}] failed: {}; rolling back {} process(es)",
                        plan.app,
                        name,
                        e,
                        deployed.len()
                    );
                    ctx.rollback(&deployed).await;
                    return Err(e);
                }
            }
        }

        Ok(deployed)
    }

    async fn backward(&self, ctx: &DeployContext, deployed: &Vec<DeployedProcess>) {
        ctx.rollback(deployed).await;
    }
}

struct UpdateImageInDb;

#[async_trait]
impl Stage<DeployContext> for UpdateImageInDb {
    type Output = ();

    fn name(&self) -> &'static str {
        "update-image-in-db"
    }

    async fn forward(&self, ctx: &DeployContext) -> Result<()> {
        ctx.images
            .append_image(&ctx.plan.app, &ctx.plan.new_image)
            .await
    }
}

struct RemoveOldServices;

#[async_trait]
impl Stage<DeployContext> for RemoveOldServices {
    type Output = BTreeSet<String>;

    fn name(&self) -> &'static str {
        "remove-old-services"
    }

    async fn forward(&self, ctx: &DeployContext) -> Result<BTreeSet<String>> {
        let plan = &ctx.plan;
        let mut removed = BTreeSet::new();
        for process in plan.obsolete_processes() {
            match ctx.manager.remove_service(&plan.app, &process).await {
                Ok(()) => {
                    tracing::info!("Removed {}[{}]", plan.app, process);
                    removed.insert(process);
                }
                Err(e) => {
                    tracing::error!(
                        "ignored error removing unwanted service for {}[{}]: {}",
                        plan.app,
                        process,
                        e
                    );
                }
            }
        }
        Ok(removed)
    }
}

/// Entry point for redeploying an application
pub struct ServicePipeline {
    manager: Arc<dyn ServiceManager>,
    images: Arc<dyn ImageStore>,
}

impl ServicePipeline {
    pub fn new(manager: Arc<dyn ServiceManager>, images: Arc<dyn ImageStore>) -> Self {
        Self { manager, images }
    }

    /// Read current and new process sets and build the plan for a run
    ///
    /// Fails with [`RolloutError::NoProcesses`] before touching any service
    /// when the new image declares no process.
    pub async fn plan(
        &self,
        app: &App,
        new_image: &str,
        overrides: Option<&ProcessSpec>,
    ) -> Result<DeployPlan> {
        let current_image = self.images.current_image(app).await?;
        let current_spec = match &current_image {
            Some(image) => ProcessSpec::running(self.images.image_processes(image).await?),
            None => ProcessSpec::new(),
        };

        let new_processes = self.images.image_processes(new_image).await?;
        if new_processes.is_empty() {
            return Err(RolloutError::NoProcesses {
                image: new_image.to_string(),
            });
        }
        let new_spec = ProcessSpec::desired(new_processes, &current_spec, overrides);

        Ok(DeployPlan {
            app: app.clone(),
            current_image,
            current_spec,
            new_image: new_image.to_string(),
            new_spec,
        })
    }

    /// Reconcile `app` with `new_image`
    ///
    /// On failure every process already deployed is rolled back and the
    /// error that caused the failure is returned.
    pub async fn run(
        &self,
        app: &App,
        new_image: &str,
        overrides: Option<&ProcessSpec>,
    ) -> Result<()> {
        let plan = self.plan(app, new_image, overrides).await?;
        self.execute(plan).await
    }

    /// Execute a plan built by [`ServicePipeline::plan`]
    pub async fn execute(&self, plan: DeployPlan) -> Result<()> {
        tracing::info!(
            "Deploying {} to {} ({})",
            plan.new_image,
            plan.app,
            plan.summary()
        );
        let ctx = DeployContext {
            manager: Arc::clone(&self.manager),
            images: Arc::clone(&self.images),
            plan,
        };
        let saga: Saga<DeployContext> = Saga::new()
            .then(UpdateServices)
            .then(UpdateImageInDb)
            .then(RemoveOldServices);
        saga.execute(&ctx).await?;
        tracing::info!("Deployed {} to {}", ctx.plan.new_image, ctx.plan.app);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan(current: &[&str], new: &[&str]) -> DeployPlan {
        let current_spec = ProcessSpec::running(current.iter().copied());
        let new_spec = ProcessSpec::desired(new.iter().copied(), &current_spec, None);
        DeployPlan {
            app: App::new("myapp"),
            current_image: Some("myapp:v1".to_string()),
            current_spec,
            new_image: "myapp:v2".to_string(),
            new_spec,
        }
    }

    #[test]
    fn test_plan_diff() {
        let plan = plan(&["web", "worker", "clock"], &["web", "api"]);
        assert_eq!(
            plan.obsolete_processes().into_iter().collect::<Vec<_>>(),
            vec!["clock".to_string(), "worker".to_string()]
        );
        assert_eq!(
            plan.added_processes().into_iter().collect::<Vec<_>>(),
            vec!["api".to_string()]
        );
        assert_eq!(
            plan.summary().to_string(),
            "2 to deploy (1 new), 2 to remove"
        );
    }
}
