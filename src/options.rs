//! Analysis options and the result registry.
//!
//! Analyses are configured through a small keyed option bag and exchange
//! results through an owned [`AnalysisRegistry`] threaded by the caller.
//! There is deliberately no process-global state: an embedding application
//! creates one registry per program under analysis, stores each analysis
//! result under its ID, and hands the registry to downstream analyses that
//! consume earlier results (e.g. inter-procedural constant propagation
//! looking up a pointer-analysis result by the `pta` option).

use std::any::Any;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A single option value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OptionValue {
    /// String-valued option (IDs, file paths).
    Str(String),
    /// Integer-valued option (e.g. context depth).
    Int(i64),
    /// Boolean flag.
    Bool(bool),
}

/// Keyed configuration for a single analysis run.
///
/// Unrecognized keys are ignored; analyses only read the keys they document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalysisOptions {
    values: FxHashMap<String, OptionValue>,
}

impl AnalysisOptions {
    /// Create an empty option bag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a string option, returning self for chaining.
    #[must_use]
    pub fn with_str(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), OptionValue::Str(value.into()));
        self
    }

    /// Set an integer option, returning self for chaining.
    #[must_use]
    pub fn with_int(mut self, key: impl Into<String>, value: i64) -> Self {
        self.values.insert(key.into(), OptionValue::Int(value));
        self
    }

    /// Set a boolean option, returning self for chaining.
    #[must_use]
    pub fn with_bool(mut self, key: impl Into<String>, value: bool) -> Self {
        self.values.insert(key.into(), OptionValue::Bool(value));
        self
    }

    /// Look up a string option.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        match self.values.get(key) {
            Some(OptionValue::Str(s)) => Some(s),
            _ => None,
        }
    }

    /// Look up a string option, failing with a configuration error if absent.
    pub fn require_str(&self, key: &str) -> Result<&str> {
        self.get_str(key)
            .ok_or_else(|| Error::Config(format!("missing required option `{key}`")))
    }

    /// Look up an integer option.
    pub fn get_int(&self, key: &str) -> Option<i64> {
        match self.values.get(key) {
            Some(OptionValue::Int(i)) => Some(*i),
            _ => None,
        }
    }

    /// Look up a boolean option.
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.values.get(key) {
            Some(OptionValue::Bool(b)) => Some(*b),
            _ => None,
        }
    }
}

/// Owned store of analysis results keyed by analysis ID.
///
/// IDs follow the convention of the producing analysis (`"pta"`,
/// `"inter-constprop"`, ...). Values are type-erased; consumers downcast to
/// the concrete result type they expect.
#[derive(Default)]
pub struct AnalysisRegistry {
    results: FxHashMap<String, Box<dyn Any>>,
}

impl AnalysisRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a result under the given ID, replacing any previous value.
    pub fn store<T: Any>(&mut self, id: impl Into<String>, result: T) {
        self.results.insert(id.into(), Box::new(result));
    }

    /// Fetch a result by ID, downcast to the expected type.
    pub fn get<T: Any>(&self, id: &str) -> Option<&T> {
        self.results.get(id).and_then(|r| r.downcast_ref::<T>())
    }

    /// Fetch a result by ID, failing with a configuration error if it is
    /// absent or has an unexpected type.
    pub fn require<T: Any>(&self, id: &str) -> Result<&T> {
        self.get::<T>(id)
            .ok_or_else(|| Error::Config(format!("no analysis result stored under `{id}`")))
    }
}
