//! Process state model
//!
//! A [`ProcessState`] is a requested change for one process, not an absolute
//! state. A [`ProcessSpec`] maps process names to requested changes and is
//! built fresh for every pipeline run from the processes an image declares.

use crate::error::{Result, RolloutError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Requested change for a single process
///
/// Fields are independent. The deploy step defines precedence between them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessState {
    /// Scale the process to zero while keeping its desired replica count
    #[serde(default)]
    pub stop: bool,

    /// Ensure at least one replica is running and clear stopped/asleep
    #[serde(default)]
    pub start: bool,

    /// Like `start`, and bump the restart counter
    #[serde(default)]
    pub restart: bool,

    /// Mark the process asleep
    #[serde(default)]
    pub sleep: bool,

    /// Replica delta applied on top of the previously observed count
    #[serde(default)]
    pub increment: i32,
}

impl ProcessState {
    pub fn start() -> Self {
        Self {
            start: true,
            ..Self::default()
        }
    }

    pub fn stop() -> Self {
        Self {
            stop: true,
            ..Self::default()
        }
    }

    pub fn restart() -> Self {
        Self {
            restart: true,
            ..Self::default()
        }
    }

    pub fn sleep() -> Self {
        Self {
            sleep: true,
            ..Self::default()
        }
    }

    pub fn scale(increment: i32) -> Self {
        Self {
            increment,
            ..Self::default()
        }
    }

    /// Whether this state requests no change at all
    pub fn is_noop(&self) -> bool {
        *self == Self::default()
    }

    /// Parse the textual form used on the command line
    ///
    /// Accepts a comma separated list of `start`, `stop`, `restart`, `sleep`
    /// and signed increments such as `+2` or `-1`.
    pub fn parse(s: &str) -> Result<Self> {
        let mut state = Self::default();
        for token in s.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            match token {
                "start" => state.start = true,
                "stop" => state.stop = true,
                "restart" => state.restart = true,
                "sleep" => state.sleep = true,
                _ if token.starts_with('+') || token.starts_with('-') => {
                    let delta: i32 = token.parse().map_err(|_| {
                        RolloutError::InvalidOverride(format!("invalid increment '{}'", token))
                    })?;
                    state.increment = state.increment.checked_add(delta).ok_or_else(|| {
                        RolloutError::InvalidOverride(format!("increment overflow at '{}'", token))
                    })?;
                }
                _ => {
                    return Err(RolloutError::InvalidOverride(format!(
                        "unknown state '{}' (expected start, stop, restart, sleep or +N/-N)",
                        token
                    )));
                }
            }
        }
        Ok(state)
    }
}

impl std::fmt::Display for ProcessState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut parts = Vec::new();
        if self.start {
            parts.push("start".to_string());
        }
        if self.stop {
            parts.push("stop".to_string());
        }
        if self.restart {
            parts.push("restart".to_string());
        }
        if self.sleep {
            parts.push("sleep".to_string());
        }
        if self.increment != 0 {
            parts.push(format!("{:+}", self.increment));
        }
        if parts.is_empty() {
            write!(f, "no-op")
        } else {
            write!(f, "{}", parts.join(","))
        }
    }
}

/// Combine a default state with an optional caller override
///
/// The override replaces the default entirely. Fields are never mixed.
pub fn merge(base: ProcessState, override_state: Option<&ProcessState>) -> ProcessState {
    match override_state {
        Some(state) => *state,
        None => base,
    }
}

/// Process name to requested change, iterated in lexicographic order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProcessSpec {
    processes: BTreeMap<String, ProcessState>,
}

impl ProcessSpec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spec for the image currently running: every process is already up,
    /// so each maps to a no-op state
    pub fn running<I, S>(processes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        processes
            .into_iter()
            .map(|p| (p, ProcessState::default()))
            .collect()
    }

    /// Spec for the image being deployed
    ///
    /// Without overrides every process starts. With overrides, a listed
    /// process gets exactly its override; an unlisted one starts if the new
    /// image introduces it and is left as is if it is already running.
    pub fn desired<I, S>(
        processes: I,
        current: &ProcessSpec,
        overrides: Option<&ProcessSpec>,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        processes
            .into_iter()
            .map(|p| {
                let name: String = p.into();
                let default = match overrides {
                    Some(_) if current.contains(&name) => ProcessState::default(),
                    _ => ProcessState::start(),
                };
                let state = merge(default, overrides.and_then(|o| o.get(&name)));
                (name, state)
            })
            .collect()
    }

    /// Parse `process=state` pairs as given on the command line
    pub fn parse_overrides<I, S>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut spec = Self::new();
        for pair in pairs {
            let pair = pair.as_ref();
            let (name, state) = pair.split_once('=').ok_or_else(|| {
                RolloutError::InvalidOverride(format!("expected <process>=<state>, got '{}'", pair))
            })?;
            let name = name.trim();
            if name.is_empty() {
                return Err(RolloutError::InvalidOverride(format!(
                    "missing process name in '{}'",
                    pair
                )));
            }
            spec.insert(name, ProcessState::parse(state)?);
        }
        Ok(spec)
    }

    pub fn insert(&mut self, process: impl Into<String>, state: ProcessState) {
        self.processes.insert(process.into(), state);
    }

    pub fn get(&self, process: &str) -> Option<&ProcessState> {
        self.processes.get(process)
    }

    pub fn contains(&self, process: &str) -> bool {
        self.processes.contains_key(process)
    }

    pub fn len(&self) -> usize {
        self.processes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processes.is_empty()
    }

    /// Process names in lexicographic order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.processes.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ProcessState)> {
        self.processes.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl<S: Into<String>> FromIterator<(S, ProcessState)> for ProcessSpec {
    fn from_iter<T: IntoIterator<Item = (S, ProcessState)>>(iter: T) -> Self {
        Self {
            processes: iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}

/// Processes declared in `current` but no longer in `new`
pub fn difference(current: &ProcessSpec, new: &ProcessSpec) -> BTreeSet<String> {
    current
        .names()
        .filter(|name| !new.contains(name))
        .map(str::to_string)
        .collect()
}
