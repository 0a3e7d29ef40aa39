//! Aggregated outcome of a bulk lifecycle operation.
//!
//! Every input of a batch ends up in exactly one of two places: the ordered
//! list of succeeded IDs, or the failure map keyed by entity ID (or by the
//! original input token when it could not be resolved). Recording a failure
//! for a key that already succeeded moves it to the failure side.

use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Outcome of a bulk operation.
#[derive(Debug, Default)]
pub struct BatchResult {
    succeeded: Vec<String>,
    failed: BTreeMap<String, Vec<Error>>,
}

impl BatchResult {
    /// Creates an empty result.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a success. Ignored if the key already failed or succeeded.
    pub fn record_success(&mut self, id: impl Into<String>) {
        let id = id.into();
        if self.failed.contains_key(&id) || self.succeeded.contains(&id) {
            return;
        }
        self.succeeded.push(id);
    }

    /// Records a failure, appending to any errors already held for the key.
    pub fn record_failure(&mut self, key: impl Into<String>, error: Error) {
        let key = key.into();
        self.succeeded.retain(|s| *s != key);
        self.failed.entry(key).or_default().push(error);
    }

    /// Records all errors of one input, or a success if there are none.
    pub fn record_errors(&mut self, key: impl Into<String>, errors: Vec<Error>) {
        let key = key.into();
        if errors.is_empty() {
            self.record_success(key);
            return;
        }
        for error in errors {
            self.record_failure(key.clone(), error);
        }
    }

    /// Folds another result into this one.
    pub fn merge(&mut self, other: BatchResult) {
        for (key, errors) in other.failed {
            for error in errors {
                self.record_failure(key.clone(), error);
            }
        }
        for id in other.succeeded {
            self.record_success(id);
        }
    }

    /// IDs that succeeded, in completion order.
    #[must_use]
    pub fn succeeded(&self) -> &[String] {
        &self.succeeded
    }

    /// Failures keyed by entity ID or unresolved input token.
    #[must_use]
    pub fn failed(&self) -> &BTreeMap<String, Vec<Error>> {
        &self.failed
    }

    /// Errors recorded for one key.
    #[must_use]
    pub fn failure(&self, key: &str) -> Option<&[Error]> {
        self.failed.get(key).map(Vec::as_slice)
    }

    /// Returns true if the key is on the success side.
    #[must_use]
    pub fn is_succeeded(&self, id: &str) -> bool {
        self.succeeded.iter().any(|s| s == id)
    }

    /// Number of inputs accounted for.
    #[must_use]
    pub fn len(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }

    /// Returns true if the batch had no inputs.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns true only if nothing failed.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    /// Returns true if at least one entity succeeded.
    #[must_use]
    pub fn has_successes(&self) -> bool {
        !self.succeeded.is_empty()
    }

    /// Splits into the success list and the failure map.
    #[must_use]
    pub fn into_parts(self) -> (Vec<String>, BTreeMap<String, Vec<Error>>) {
        (self.succeeded, self.failed)
    }

    /// Serialisable projection for CLI and HTTP consumers.
    #[must_use]
    pub fn report(&self) -> BatchReport {
        BatchReport {
            succeeded: self.succeeded.clone(),
            failed: self
                .failed
                .iter()
                .map(|(k, errs)| {
                    let msg = errs
                        .iter()
                        .map(ToString::to_string)
                        .collect::<Vec<_>>()
                        .join("; ");
                    (k.clone(), msg)
                })
                .collect(),
        }
    }
}

/// Wire and display shape of a [`BatchResult`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    /// Succeeded IDs in completion order.
    #[serde(default)]
    pub succeeded: Vec<String>,
    /// Failed ID or token → error message.
    #[serde(default)]
    pub failed: BTreeMap<String, String>,
}

impl BatchReport {
    /// Process exit code a CLI should use: 0 only if nothing failed.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        if self.failed.is_empty() { 0 } else { 125 }
    }
}
