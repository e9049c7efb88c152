//! Service deploy step
//!
//! Computes the effective runtime state of one process from its previously
//! observed labels and a requested [`ProcessState`], then issues a single
//! deploy call. Running it again with the previous image and the previously
//! observed state restores what was there before, which is how the pipeline
//! rolls a process back.

use crate::error::{Result, RolloutError};
use crate::labels::ServiceLabels;
use crate::manager::{App, ServiceManager};
use crate::process::ProcessState;

/// Deploy `image` for `process`, applying `state` on top of current labels
///
/// Returns the labels observed before the deploy so the caller can restore
/// them later with [`restore_service`].
pub async fn deploy_service(
    manager: &dyn ServiceManager,
    app: &App,
    process: &str,
    image: &str,
    state: ProcessState,
) -> Result<Option<ServiceLabels>> {
    let previous = manager.current_labels(app, process).await?;
    apply(manager, app, process, image, state, previous.as_ref()).await?;
    Ok(previous)
}

/// Deploy `image` for `process` using labels observed earlier instead of
/// reading them from the backend
pub async fn restore_service(
    manager: &dyn ServiceManager,
    app: &App,
    process: &str,
    image: &str,
    state: ProcessState,
    previous: Option<&ServiceLabels>,
) -> Result<()> {
    apply(manager, app, process, image, state, previous).await
}

async fn apply(
    manager: &dyn ServiceManager,
    app: &App,
    process: &str,
    image: &str,
    state: ProcessState,
    previous: Option<&ServiceLabels>,
) -> Result<()> {
    let (labels, real_replicas) = effective_labels(manager, app, process, previous, state)?;

    tracing::info!(
        "Deploying {}[{}] image={} replicas={} (desired {}, {})",
        app,
        process,
        image,
        real_replicas,
        labels.replicas(),
        state
    );
    manager
        .deploy_service(app, process, &labels, real_replicas, image)
        .await
}

/// Labels to record and replica count to run for `process`
fn effective_labels(
    manager: &dyn ServiceManager,
    app: &App,
    process: &str,
    previous: Option<&ServiceLabels>,
    state: ProcessState,
) -> Result<(ServiceLabels, u32)> {
    let (mut replicas, mut restarts, mut stopped, mut asleep) = match previous {
        Some(labels) => (
            labels.replicas(),
            labels.restarts(),
            labels.is_stopped(),
            labels.is_asleep(),
        ),
        None => (0, 0, false, false),
    };

    if state.increment != 0 {
        let scaled = i64::from(replicas) + i64::from(state.increment);
        if scaled < 0 {
            return Err(RolloutError::InvalidScale {
                process: process.to_string(),
                replicas: scaled,
            });
        }
        replicas = u32::try_from(scaled).map_err(|_| RolloutError::ScaleOverflow {
            process: process.to_string(),
            replicas: scaled,
        })?;
    }

    if state.start || state.restart {
        if replicas == 0 {
            replicas = 1;
        }
        stopped = false;
        asleep = false;
    }

    let mut labels = manager.service_labels(app, process, replicas)?;

    let mut real_replicas = replicas;
    if stopped || state.stop {
        real_replicas = 0;
        labels = labels.with_stopped();
    }

    if asleep || state.sleep {
        labels = labels.with_asleep();
    }

    if state.restart {
        restarts += 1;
    }
    if restarts > 0 {
        labels = labels.with_restarts(restarts);
    }

    Ok((labels, real_replicas))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct SingleService {
        labels: Option<ServiceLabels>,
        deployed: Mutex<Vec<(ServiceLabels, u32, String)>>,
    }

    #[async_trait]
    impl ServiceManager for SingleService {
        async fn remove_service(&self, _app: &App, _process: &str) -> Result<()> {
            Ok(())
        }

        async fn current_labels(&self, _app: &App, _process: &str) -> Result<Option<ServiceLabels>> {
            Ok(self.labels.clone())
        }

        async fn deploy_service(
            &self,
            _app: &App,
            _process: &str,
            labels: &ServiceLabels,
            replicas: u32,
            image: &str,
        ) -> Result<()> {
            self.deployed
                .lock()
                .unwrap()
                .push((labels.clone(), replicas, image.to_string()));
            Ok(())
        }
    }

    fn existing(replicas: u32) -> ServiceLabels {
        ServiceLabels::new("myapp", "web", replicas).unwrap()
    }

    async fn run(manager: &SingleService, state: ProcessState) -> Result<(ServiceLabels, u32)> {
        deploy_service(manager, &App::new("myapp"), "web", "myapp:v2", state).await?;
        let deployed = manager.deployed.lock().unwrap();
        let (labels, replicas, image) = deployed.last().cloned().unwrap();
        assert_eq!(image, "myapp:v2");
        Ok((labels, replicas))
    }

    #[tokio::test]
    async fn test_new_process_start_gets_one_replica() {
        let manager = SingleService::default();
        let (labels, replicas) = run(&manager, ProcessState::start()).await.unwrap();
        assert_eq!(replicas, 1);
        assert_eq!(labels.replicas(), 1);
        assert!(!labels.is_stopped());
    }

    #[tokio::test]
    async fn test_new_process_without_start_has_no_replicas() {
        let manager = SingleService::default();
        let (labels, replicas) = run(&manager, ProcessState::default()).await.unwrap();
        assert_eq!(replicas, 0);
        assert_eq!(labels.replicas(), 0);
    }

    #[tokio::test]
    async fn test_start_keeps_existing_replicas() {
        let manager = SingleService {
            labels: Some(existing(3)),
            ..Default::default()
        };
        let (_, replicas) = run(&manager, ProcessState::start()).await.unwrap();
        assert_eq!(replicas, 3);
    }

    #[tokio::test]
    async fn test_start_after_scale_to_zero_yields_one() {
        let manager = SingleService {
            labels: Some(existing(2)),
            ..Default::default()
        };
        let state = ProcessState {
            start: true,
            increment: -2,
            ..Default::default()
        };
        let (labels, replicas) = run(&manager, state).await.unwrap();
        assert_eq!(replicas, 1);
        assert_eq!(labels.replicas(), 1);
    }

    #[tokio::test]
    async fn test_negative_scale_fails_without_deploy() {
        let manager = SingleService {
            labels: Some(existing(1)),
            ..Default::default()
        };
        let err = run(&manager, ProcessState::scale(-2)).await.unwrap_err();
        assert!(matches!(
            err,
            RolloutError::InvalidScale { ref process, replicas: -1 } if process == "web"
        ));
        assert!(manager.deployed.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_scale_past_max_is_overflow() {
        let manager = SingleService {
            labels: Some(existing(u32::MAX - 1)),
            ..Default::default()
        };

        let err = run(&manager, ProcessState::scale(2)).await.unwrap_err();
        let expected = i64::from(u32::MAX) + 1;
        assert!(matches!(
            err,
            RolloutError::ScaleOverflow { ref process, replicas } if process == "web" && replicas == expected
        ));
        assert!(err.to_string().starts_with("too many units"));
        assert!(manager.deployed.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stopped_process_stays_stopped() {
        let manager = SingleService {
            labels: Some(existing(4).with_stopped()),
            ..Default::default()
        };
        let (labels, replicas) = run(&manager, ProcessState::default()).await.unwrap();
        assert_eq!(replicas, 0);
        assert_eq!(labels.replicas(), 4);
        assert!(labels.is_stopped());
    }

    #[tokio::test]
    async fn test_stop_request_preserves_desired_count() {
        let manager = SingleService {
            labels: Some(existing(2)),
            ..Default::default()
        };
        let (labels, replicas) = run(&manager, ProcessState::stop()).await.unwrap();
        assert_eq!(replicas, 0);
        assert_eq!(labels.replicas(), 2);
        assert!(labels.is_stopped());
    }

    #[tokio::test]
    async fn test_restart_wakes_and_counts() {
        let manager = SingleService {
            labels: Some(existing(0).with_stopped().with_asleep().with_restarts(2)),
            ..Default::default()
        };
        let (labels, replicas) = run(&manager, ProcessState::restart()).await.unwrap();
        assert_eq!(replicas, 1);
        assert!(!labels.is_stopped());
        assert!(!labels.is_asleep());
        assert_eq!(labels.restarts(), 3);
    }

    #[tokio::test]
    async fn test_sleep_and_stop_coexist() {
        let manager = SingleService {
            labels: Some(existing(2)),
            ..Default::default()
        };
        let state = ProcessState {
            stop: true,
            sleep: true,
            ..Default::default()
        };
        let (labels, replicas) = run(&manager, state).await.unwrap();
        assert_eq!(replicas, 0);
        assert!(labels.is_stopped());
        assert!(labels.is_asleep());
    }

    #[tokio::test]
    async fn test_restart_count_carried_without_restart() {
        let manager = SingleService {
            labels: Some(existing(1).with_restarts(5)),
            ..Default::default()
        };
        let (labels, _) = run(&manager, ProcessState::default()).await.unwrap();
        assert_eq!(labels.restarts(), 5);
    }

    #[tokio::test]
    async fn test_deploy_returns_previous_labels() {
        let before = existing(2).with_asleep();
        let manager = SingleService {
            labels: Some(before.clone()),
            ..Default::default()
        };
        let previous = deploy_service(
            &manager,
            &App::new("myapp"),
            "web",
            "myapp:v2",
            ProcessState::start(),
        )
        .await
        .unwrap();
        assert_eq!(previous, Some(before));
    }

    #[tokio::test]
    async fn test_restore_reproduces_previous_labels() {
        let before = existing(3).with_stopped().with_asleep().with_restarts(2);
        let manager = SingleService {
            labels: Some(existing(3).with_restarts(3)),
            ..Default::default()
        };
        restore_service(
            &manager,
            &App::new("myapp"),
            "web",
            "myapp:v1",
            ProcessState::default(),
            Some(&before),
        )
        .await
        .unwrap();

        let deployed = manager.deployed.lock().unwrap();
        let (labels, replicas, image) = deployed.last().cloned().unwrap();
        assert_eq!(labels, before);
        assert_eq!(replicas, 0);
        assert_eq!(image, "myapp:v1");
    }

    #[tokio::test]
    async fn test_invalid_process_name_propagates() {
        let manager = SingleService::default();
        let err = deploy_service(
            &manager,
            &App::new("myapp"),
            "bad name",
            "myapp:v2",
            ProcessState::start(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, RolloutError::InvalidLabel(_)));
        assert!(manager.deployed.lock().unwrap().is_empty());
    }
}
