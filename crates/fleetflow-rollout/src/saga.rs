//! Compensating stage pipeline
//!
//! A [`Saga`] runs an ordered list of [`Stage`]s against one shared context.
//! When a stage fails, every stage that already completed is compensated in
//! reverse order, each receiving the typed output of its own forward run.
//! The failing stage itself is not compensated; it is expected to leave
//! nothing behind.

use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// One step of a saga
#[async_trait]
pub trait Stage<C>: Send + Sync + 'static
where
    C: Send + Sync + 'static,
{
    /// Result of the forward run, handed back to [`Stage::backward`]
    type Output: Send + Sync + 'static;

    /// Stage name used in logs
    fn name(&self) -> &'static str;

    async fn forward(&self, ctx: &C) -> Result<Self::Output>;

    /// Undo a completed forward run. Stages without compensation keep the
    /// default no-op.
    async fn backward(&self, _ctx: &C, _output: &Self::Output) {}
}

#[async_trait]
trait Step<C>: Send + Sync
where
    C: Send + Sync + 'static,
{
    fn name(&self) -> &'static str;

    async fn apply(&self, ctx: &C) -> Result<Box<dyn Applied<C>>>;
}

#[async_trait]
trait Applied<C>: Send + Sync
where
    C: Send + Sync + 'static,
{
    fn name(&self) -> &'static str;

    async fn compensate(&self, ctx: &C);
}

struct Pending<S>(Arc<S>);

struct Completed<S, O> {
    stage: Arc<S>,
    output: O,
}

#[async_trait]
impl<C, S> Step<C> for Pending<S>
where
    C: Send + Sync + 'static,
    S: Stage<C>,
{
    fn name(&self) -> &'static str {
        self.0.name()
    }

    async fn apply(&self, ctx: &C) -> Result<Box<dyn Applied<C>>> {
        let output = self.0.forward(ctx).await?;
        Ok(Box::new(Completed {
            stage: Arc::clone(&self.0),
            output,
        }))
    }
}

#[async_trait]
impl<C, S, O> Applied<C> for Completed<S, O>
where
    C: Send + Sync + 'static,
    S: Stage<C, Output = O>,
    O: Send + Sync + 'static,
{
    fn name(&self) -> &'static str {
        self.stage.name()
    }

    async fn compensate(&self, ctx: &C) {
        self.stage.backward(ctx, &self.output).await;
    }
}

/// Ordered stages over a context of type `C`
pub struct Saga<C> {
    stages: Vec<Box<dyn Step<C>>>,
}

impl<C> Saga<C>
where
    C: Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self { stages: Vec::new() }
    }

    /// Append a stage
    pub fn then<S: Stage<C>>(mut self, stage: S) -> Self {
        self.stages.push(Box::new(Pending(Arc::new(stage))));
        self
    }

    /// Stage names in execution order
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Run all stages, unwinding completed ones if any stage fails
    ///
    /// The error returned is always the one raised by the failing stage.
    pub async fn execute(&self, ctx: &C) -> Result<()> {
        let mut completed: Vec<Box<dyn Applied<C>>> = Vec::with_capacity(self.stages.len());

        for step in &self.stages {
            tracing::debug!("Running stage {}", step.name());
            match step.apply(ctx).await {
                Ok(applied) => completed.push(applied),
                Err(e) => {
                    tracing::warn!(
                        "Stage {} failed: {}; unwinding {} completed stage(s)",
                        step.name(),
                        e,
                        completed.len()
                    );
                    for applied in completed.iter().rev() {
                        tracing::debug!("Compensating stage {}", applied.name());
                        applied.compensate(ctx).await;
                    }
                    return Err(e);
                }
            }
        }

        Ok(())
    }
}

impl<C> Default for Saga<C>
where
    C: Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
