//! Service labels
//!
//! Labels carry the observed runtime state of a process service: desired
//! replica count, restart counter and the stopped/asleep markers. Backends
//! persist them as a flat string map under a namespace prefix.

use crate::error::{Result, RolloutError};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::LazyLock;

/// Default label namespace
pub const DEFAULT_NAMESPACE: &str = "fleetflow";

const MAX_NAME_LEN: usize = 63;

static NAME_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]*$").expect("name pattern must compile")
});

/// Labels of one process service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceLabels {
    app: String,
    process: String,
    replicas: u32,
    #[serde(default)]
    restarts: u32,
    #[serde(default)]
    stopped: bool,
    #[serde(default)]
    asleep: bool,
}

impl ServiceLabels {
    /// Build base labels for a process, validating identifiers
    pub fn new(app: &str, process: &str, replicas: u32) -> Result<Self> {
        validate_name("app", app)?;
        validate_name("process", process)?;
        Ok(Self {
            app: app.to_string(),
            process: process.to_string(),
            replicas,
            restarts: 0,
            stopped: false,
            asleep: false,
        })
    }

    pub fn app(&self) -> &str {
        &self.app
    }

    pub fn process(&self) -> &str {
        &self.process
    }

    /// Desired replica count, preserved while stopped
    pub fn replicas(&self) -> u32 {
        self.replicas
    }

    pub fn restarts(&self) -> u32 {
        self.restarts
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    pub fn is_asleep(&self) -> bool {
        self.asleep
    }

    pub fn with_stopped(mut self) -> Self {
        self.stopped = true;
        self
    }

    pub fn with_asleep(mut self) -> Self {
        self.asleep = true;
        self
    }

    pub fn with_restarts(mut self, restarts: u32) -> Self {
        self.restarts = restarts;
        self
    }

    /// Flatten into backend labels under `namespace`
    pub fn to_map(&self, namespace: &str) -> BTreeMap<String, String> {
        let key = |suffix: &str| format!("{}.{}", namespace, suffix);
        let mut map = BTreeMap::new();
        map.insert(key("is-service"), "true".to_string());
        map.insert(key("app-name"), self.app.clone());
        map.insert(key("app-process"), self.process.clone());
        map.insert(key("app-process-replicas"), self.replicas.to_string());
        if self.restarts > 0 {
            map.insert(key("app-process-restarts"), self.restarts.to_string());
        }
        if self.stopped {
            map.insert(key("app-process-stopped"), "true".to_string());
        }
        if self.asleep {
            map.insert(key("app-process-asleep"), "true".to_string());
        }
        map
    }

    /// Read labels written by [`ServiceLabels::to_map`]
    pub fn from_map(namespace: &str, map: &BTreeMap<String, String>) -> Result<Self> {
        let get = |suffix: &str| map.get(&format!("{}.{}", namespace, suffix));
        let required = |suffix: &str| {
            get(suffix).ok_or_else(|| {
                RolloutError::InvalidLabel(format!("missing label {}.{}", namespace, suffix))
            })
        };
        let number = |suffix: &str| -> Result<u32> {
            match get(suffix) {
                Some(v) => v.parse().map_err(|_| {
                    RolloutError::InvalidLabel(format!(
                        "label {}.{} is not a number: '{}'",
                        namespace, suffix, v
                    ))
                }),
                None => Ok(0),
            }
        };
        let flag = |suffix: &str| get(suffix).is_some_and(|v| v == "true");

        let app = required("app-name")?;
        let process = required("app-process")?;
        Ok(Self {
            app: app.clone(),
            process: process.clone(),
            replicas: number("app-process-replicas")?,
            restarts: number("app-process-restarts")?,
            stopped: flag("app-process-stopped"),
            asleep: flag("app-process-asleep"),
        })
    }
}

fn validate_name(kind: &str, name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(RolloutError::InvalidLabel(format!("{} name is empty", kind)));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(RolloutError::InvalidLabel(format!(
            "{} name '{}' is longer than {} characters",
            kind, name, MAX_NAME_LEN
        )));
    }
    if !NAME_PATTERN.is_match(name) {
        return Err(RolloutError::InvalidLabel(format!(
            "{} name '{}' contains invalid characters",
            kind, name
        )));
    }
    Ok(())
}
