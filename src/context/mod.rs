//! Immutable context snapshots propagated down the tree.
//!
//! A [`Context`] maps keys to [`Value`]s and never changes once built;
//! updating a context produces a new snapshot that shares nothing mutable
//! with the old one. When a node is built from a [`Factory`], every key its
//! construction logic reads through the [`Binding`] is recorded together
//! with the value it observed. Later, [`Dependencies::supported_by`] answers
//! whether the node would have been built the same way under a different
//! context, which is what the [reconciler](reconcile) uses to decide between
//! keeping a node and replacing it.
//!
//! ## Lookup
//!
//! Keys are dotted paths (`"menu.title"`) walked through nested
//! [`Value::Map`]s. A lookup that cannot be evaluated (for example walking
//! into a string) logs and yields the caller's default instead of failing.

pub mod reconcile;

use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use crate::tree::{NodeId, Tree};
use crate::value::Value;

/// An immutable key -> value snapshot.
#[derive(Clone, Default, PartialEq)]
pub struct Context {
    values: Arc<BTreeMap<String, Value>>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return a new snapshot with `key` set to `value`.
    ///
    /// # Example
    ///
    /// ```
    /// use stagehand::{Context, Value};
    ///
    /// let base = Context::new().with("k", 1);
    /// let next = base.with("k", 2);
    /// assert_eq!(base.snapshot("k"), Some(Value::Int(1)));
    /// assert_eq!(next.snapshot("k"), Some(Value::Int(2)));
    /// ```
    pub fn with(&self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let mut values = (*self.values).clone();
        values.insert(key.into(), value.into());
        Self {
            values: Arc::new(values),
        }
    }

    /// Typed lookup of a dotted path.
    ///
    /// Returns `Ok(None)` if the path is absent and `Err` with a description
    /// if the path cannot be evaluated against this snapshot.
    pub fn lookup(&self, path: &str) -> Result<Option<&Value>, String> {
        let mut parts = path.split('.');
        let Some(first) = parts.next() else {
            return Ok(None);
        };
        let mut current = match self.values.get(first) {
            Some(value) => value,
            None => return Ok(None),
        };
        for part in parts {
            current = match current {
                Value::Map(map) => match map.get(part) {
                    Some(value) => value,
                    None => return Ok(None),
                },
                Value::Null => return Ok(None),
                other => return Err(format!("cannot read `{part}` of {other}")),
            };
        }
        Ok(Some(current))
    }

    /// The value observed for `key`, as recorded in dependency sets.
    ///
    /// Evaluation failures are logged and observed as `None`.
    pub fn snapshot(&self, key: &str) -> Option<Value> {
        match self.lookup(key) {
            Ok(value) => value.cloned(),
            Err(err) => {
                log::error!("unable to evaluate context key `{key}`: {err}");
                None
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.values.iter()).finish()
    }
}

/// The `(key, snapshot)` pairs a node observed while it was built.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dependencies {
    observed: BTreeMap<String, Option<Value>>,
}

impl Dependencies {
    pub fn record(&mut self, key: &str, snapshot: Option<Value>) {
        self.observed.entry(key.to_string()).or_insert(snapshot);
    }

    /// True iff every recorded key has the same snapshot under `context`.
    pub fn supported_by(&self, context: &Context) -> bool {
        self.observed
            .iter()
            .all(|(key, seen)| context.snapshot(key) == *seen)
    }

    pub fn is_empty(&self) -> bool {
        self.observed.is_empty()
    }

    pub fn len(&self) -> usize {
        self.observed.len()
    }
}

/// Read access to a context that records what was read.
pub struct Binding<'a> {
    context: &'a Context,
    dependencies: Dependencies,
}

impl<'a> Binding<'a> {
    pub fn new(context: &'a Context) -> Self {
        Self {
            context,
            dependencies: Dependencies::default(),
        }
    }

    /// Read `key` and record it as a dependency.
    pub fn get(&mut self, key: &str) -> Option<Value> {
        let snapshot = self.context.snapshot(key);
        self.dependencies.record(key, snapshot.clone());
        snapshot
    }

    /// Read `key`, falling back to `default` when it is absent or cannot be
    /// evaluated.
    pub fn get_or(&mut self, key: &str, default: impl Into<Value>) -> Value {
        self.get(key).unwrap_or_else(|| default.into())
    }

    /// Read `key` without recording a dependency.
    pub fn peek(&self, key: &str) -> Option<Value> {
        self.context.snapshot(key)
    }

    /// The context this binding reads from, for building children.
    pub fn context(&self) -> &'a Context {
        self.context
    }

    pub fn into_dependencies(self) -> Dependencies {
        self.dependencies
    }
}

/// Builds a node bound to a context.
///
/// Factories are the hand-off point for template loaders: whatever parses
/// markup produces factories, and the tree keeps a reference to the factory
/// a node came from so it can rebuild it for a new context.
pub trait Factory {
    fn instantiate(&self, tree: &mut Tree, binding: &mut Binding<'_>) -> NodeId;
}

impl<F> Factory for F
where
    F: Fn(&mut Tree, &mut Binding<'_>) -> NodeId,
{
    fn instantiate(&self, tree: &mut Tree, binding: &mut Binding<'_>) -> NodeId {
        self(tree, binding)
    }
}

/// Shared handle to a factory.
pub type FactoryRef = Rc<dyn Factory>;
