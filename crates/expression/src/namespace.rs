//! The variable namespace placeholders resolve against.
//!
//! A [`Namespace`] exposes three roots:
//! - `$context`: the data that fired the trigger, never mutated.
//! - `$jobsMapByNodeKey`: `{ <node key>: <job result> }` for nodes the
//!   current node may observe.
//! - `$system`: deployment constants and zero-argument functions, the latter
//!   evaluated at lookup time.
//!
//! Anything implementing [`Scope`] can stand in for a namespace; a bare
//! `serde_json::Value` is the sub-scope used by dynamic calculations.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};

use crate::value::walk;

pub const CONTEXT_ROOT: &str = "$context";
pub const JOBS_ROOT: &str = "$jobsMapByNodeKey";
pub const SYSTEM_ROOT: &str = "$system";

/// Read-only lookup surface for dotted paths.
pub trait Scope: Send + Sync {
    /// Resolve already-split path segments. `None` means absent.
    fn lookup(&self, segments: &[&str]) -> Option<Value>;

    /// Resolve a dotted path such as `$context.data.read`.
    fn lookup_path(&self, path: &str) -> Option<Value> {
        let segments: Vec<&str> = path.split('.').map(str::trim).collect();
        if segments.iter().any(|s| s.is_empty()) {
            return None;
        }
        self.lookup(&segments)
    }
}

impl Scope for Value {
    fn lookup(&self, segments: &[&str]) -> Option<Value> {
        walk(self, segments).cloned()
    }
}

// ---------------------------------------------------------------------------
// $system
// ---------------------------------------------------------------------------

type Thunk = Arc<dyn Fn() -> Value + Send + Sync>;

/// A `$system` leaf: an immediate value or a function evaluated on lookup.
#[derive(Clone)]
pub enum SystemEntry {
    Value(Value),
    Thunk(Thunk),
}

impl SystemEntry {
    fn get(&self) -> Value {
        match self {
            Self::Value(v) => v.clone(),
            Self::Thunk(f) => f(),
        }
    }
}

impl fmt::Debug for SystemEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(v) => f.debug_tuple("Value").field(v).finish(),
            Self::Thunk(_) => f.write_str("Thunk(..)"),
        }
    }
}

/// Process-wide `$system` values.
#[derive(Debug, Clone, Default)]
pub struct SystemVars {
    entries: BTreeMap<String, SystemEntry>,
}

impl SystemVars {
    /// Empty set, without even `now`.
    pub fn empty() -> Self {
        Self::default()
    }

    /// The built-in functions (`now`) plus nothing else.
    pub fn with_defaults() -> Self {
        Self::empty().function("now", now_iso8601)
    }

    /// Add a constant.
    pub fn constant(mut self, name: impl Into<String>, value: Value) -> Self {
        self.entries.insert(name.into(), SystemEntry::Value(value));
        self
    }

    /// Add a zero-argument function, invoked on every lookup.
    pub fn function<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn() -> Value + Send + Sync + 'static,
    {
        self.entries.insert(name.into(), SystemEntry::Thunk(Arc::new(f)));
        self
    }

    /// Add every entry of a constants table.
    pub fn constants<I, K>(self, constants: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        constants
            .into_iter()
            .fold(self, |vars, (name, value)| vars.constant(name, value))
    }

    /// Current value of `name`, invoking it if it is a function.
    pub fn get(&self, name: &str) -> Option<Value> {
        self.entries.get(name).map(SystemEntry::get)
    }

    fn snapshot(&self) -> Value {
        Value::Object(
            self.entries
                .iter()
                .map(|(k, e)| (k.clone(), e.get()))
                .collect(),
        )
    }
}

/// Current UTC time as ISO-8601 with millisecond precision and a `Z` suffix.
pub fn now_iso8601() -> Value {
    Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true))
}

// ---------------------------------------------------------------------------
// Namespace
// ---------------------------------------------------------------------------

/// The namespace handed to an instruction. Cheap to clone; each node gets
/// its own snapshot.
#[derive(Debug, Clone)]
pub struct Namespace {
    context: Arc<Value>,
    jobs: Map<String, Value>,
    system: Arc<SystemVars>,
}

impl Namespace {
    pub fn new(context: Arc<Value>, system: Arc<SystemVars>) -> Self {
        Self {
            context,
            jobs: Map::new(),
            system,
        }
    }

    /// Expose a visited node's job result under `$jobsMapByNodeKey.<key>`.
    pub fn with_job(mut self, node_key: impl Into<String>, result: Value) -> Self {
        self.insert_job(node_key, result);
        self
    }

    pub fn insert_job(&mut self, node_key: impl Into<String>, result: Value) {
        self.jobs.insert(node_key.into(), result);
    }

    pub fn context(&self) -> &Value {
        &self.context
    }

    pub fn job(&self, node_key: &str) -> Option<&Value> {
        self.jobs.get(node_key)
    }

    pub fn job_keys(&self) -> impl Iterator<Item = &str> {
        self.jobs.keys().map(String::as_str)
    }

    pub fn system(&self) -> &SystemVars {
        &self.system
    }
}

impl Scope for Namespace {
    fn lookup(&self, segments: &[&str]) -> Option<Value> {
        let (root, rest) = segments.split_first()?;
        match *root {
            CONTEXT_ROOT => walk(&self.context, rest).cloned(),
            JOBS_ROOT => match rest.split_first() {
                None => Some(Value::Object(self.jobs.clone())),
                Some((key, rest)) => self.jobs.get(*key).and_then(|job| walk(job, rest).cloned()),
            },
            SYSTEM_ROOT => match rest.split_first() {
                None => Some(self.system.snapshot()),
                Some((name, rest)) => {
                    let value = self.system.get(name)?;
                    walk(&value, rest).cloned()
                }
            },
            _ => None,
        }
    }
}
