//! FleetFlow Rollout
//!
//! Reconciles the processes of an application with the processes declared by
//! a new image, as a compensating pipeline over a service backend.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │                 fleet-rollout CLI                │
//! └─────────────────┬───────────────────────────────┘
//!                   │ ServicePipeline::run
//! ┌─────────────────▼───────────────────────────────┐
//! │                fleetflow-rollout                 │
//! │  ┌──────────────────────────────────────────┐   │
//! │  │  Saga: update-services                   │   │
//! │  │        → update-image-in-db              │   │
//! │  │        → remove-old-services             │   │
//! │  └──────────────────────────────────────────┘   │
//! │  ┌──────────────┐  ┌──────────────┐            │
//! │  │ Deploy step  │  │ Process spec │            │
//! │  └──────────────┘  └──────────────┘            │
//! └───────┬─────────────────┬───────────────────────┘
//!         │                 │
//! ┌───────▼───────┐ ┌───────▼───────┐
//! │ServiceManager │ │  ImageStore   │
//! └───────────────┘ └───────────────┘
//! ```

pub mod config;
pub mod deploy;
pub mod error;
pub mod labels;
pub mod local;
pub mod manager;
pub mod pipeline;
pub mod process;
pub mod saga;
pub mod store;

// Re-exports
pub use config::RolloutConfig;
pub use deploy::{deploy_service, restore_service};
pub use error::{Result, RolloutError};
pub use labels::{DEFAULT_NAMESPACE, ServiceLabels};
pub use local::{LocalServiceManager, ServiceRecord};
pub use manager::{App, ImageStore, ServiceManager};
pub use pipeline::{DeployPlan, DeployPlanSummary, ServicePipeline};
pub use process::{ProcessSpec, ProcessState, difference, merge};
pub use saga::{Saga, Stage};
pub use store::{FileImageStore, ImageRecord, ImageRegistry, StateLock};
