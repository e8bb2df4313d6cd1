//! # Hierarchical keyed map shared between tasks.
//!
//! [`TaskContext`] maps string keys to opaque values with an optional parent
//! chain:
//!
//! - Reads fall through to the parent when the key is absent locally.
//! - Writes are **local only**; a child never mutates its parent.
//! - [`TaskContext::get_all`] flattens the chain with child overrides.
//!
//! ## Rules
//! - Writes are serialized; reads observe the latest completed write.
//! - No snapshot isolation across calls — callers needing a multi-op atomic
//!   view must coordinate externally.
//! - Locks are taken one node at a time while walking the parent chain.

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::error::ContextError;

/// Opaque value stored in a context.
///
/// Values are shared by reference; typed accessors downcast on read.
pub type CtxValue = Arc<dyn Any + Send + Sync>;

/// Per-key validation function for [`TaskContext::validate`].
pub type Validator = Arc<dyn Fn(&str, &CtxValue) -> Result<(), ContextError> + Send + Sync>;

/// Cheaply cloneable handle to a shared context node.
///
/// Cloning the handle shares the underlying map; use
/// [`transform`](Self::transform) to derive an independent copy.
#[derive(Clone, Default)]
pub struct TaskContext {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    values: RwLock<HashMap<String, CtxValue>>,
    parent: RwLock<Option<TaskContext>>,
}

impl TaskContext {
    /// Creates an empty context with no parent.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the parent and returns the handle for chaining.
    pub fn with_parent(self, parent: TaskContext) -> Self {
        self.set_parent(parent);
        self
    }

    /// Replaces the parent pointer.
    pub fn set_parent(&self, parent: TaskContext) {
        *self.inner.parent.write().unwrap() = Some(parent);
    }

    fn parent(&self) -> Option<TaskContext> {
        self.inner.parent.read().unwrap().clone()
    }

    /// Stores `value` under `key`, locally.
    pub fn set(&self, key: impl Into<String>, value: impl Any + Send + Sync) {
        self.set_value(key, Arc::new(value));
    }

    /// Stores a pre-wrapped [`CtxValue`] under `key`, locally.
    pub fn set_value(&self, key: impl Into<String>, value: CtxValue) {
        self.inner
            .values
            .write()
            .unwrap()
            .insert(key.into(), value);
    }

    /// Looks up `key` locally, then along the parent chain.
    pub fn get(&self, key: &str) -> Option<CtxValue> {
        if let Some(v) = self.inner.values.read().unwrap().get(key).cloned() {
            return Some(v);
        }
        // Own lock released before the parent is consulted.
        self.parent().and_then(|p| p.get(key))
    }

    /// Returns whether `key` resolves anywhere in the chain.
    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Typed projection: `String` or `&'static str` values.
    pub fn get_string(&self, key: &str) -> Option<String> {
        let v = self.get(key)?;
        if let Some(s) = v.downcast_ref::<String>() {
            return Some(s.clone());
        }
        v.downcast_ref::<&'static str>().map(|s| (*s).to_string())
    }

    /// Typed projection: `i64` or `i32` values, widened to `i64`.
    pub fn get_i64(&self, key: &str) -> Option<i64> {
        let v = self.get(key)?;
        if let Some(n) = v.downcast_ref::<i64>() {
            return Some(*n);
        }
        v.downcast_ref::<i32>().map(|n| i64::from(*n))
    }

    /// Typed projection: `bool` values.
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key)?.downcast_ref::<bool>().copied()
    }

    /// Typed projection: `f64` or `f32` values, widened to `f64`.
    pub fn get_f64(&self, key: &str) -> Option<f64> {
        let v = self.get(key)?;
        if let Some(f) = v.downcast_ref::<f64>() {
            return Some(*f);
        }
        v.downcast_ref::<f32>().map(|f| f64::from(*f))
    }

    /// Flattened snapshot of the whole chain; local entries override the
    /// parent's.
    pub fn get_all(&self) -> HashMap<String, CtxValue> {
        let mut result = match self.parent() {
            Some(p) => p.get_all(),
            None => HashMap::new(),
        };
        for (k, v) in self.inner.values.read().unwrap().iter() {
            result.insert(k.clone(), Arc::clone(v));
        }
        result
    }

    /// Snapshot of entries whose key starts with `prefix`.
    pub fn filter(&self, prefix: &str) -> HashMap<String, CtxValue> {
        self.get_all()
            .into_iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .collect()
    }

    /// Returns a **new** context with every `(k, v)` mapped through `f`.
    ///
    /// The source is not mutated; the result has no parent.
    pub fn transform(&self, f: impl Fn(&str, &CtxValue) -> (String, CtxValue)) -> TaskContext {
        let out = TaskContext::new();
        for (k, v) in self.get_all() {
            let (nk, nv) = f(&k, &v);
            out.set_value(nk, nv);
        }
        out
    }

    /// Merges this context's flattened view into `target`.
    ///
    /// With `overwrite = false`, keys that already resolve in `target`
    /// (including through its parent chain) are left untouched.
    pub fn copy_to(&self, target: &TaskContext, overwrite: bool) {
        for (k, v) in self.get_all() {
            if !overwrite && target.contains_key(&k) {
                continue;
            }
            target.set_value(k, v);
        }
    }

    /// Runs a validator for every key that is present and has one configured.
    pub fn validate(&self, validators: &HashMap<String, Validator>) -> Result<(), ContextError> {
        let all = self.get_all();
        for (key, value) in &all {
            if let Some(validator) = validators.get(key) {
                validator(key, value)?;
            }
        }
        Ok(())
    }

    /// Fails with [`ContextError::MissingKey`] if any of `keys` is absent.
    pub fn required_keys<I, S>(&self, keys: I) -> Result<(), ContextError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let all = self.get_all();
        for key in keys {
            let key = key.as_ref();
            if !all.contains_key(key) {
                return Err(ContextError::MissingKey {
                    key: key.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Removes every local entry. The parent is unaffected.
    pub fn clear(&self) {
        self.inner.values.write().unwrap().clear();
    }
}

impl std::fmt::Debug for TaskContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let keys: Vec<String> = self.inner.values.read().unwrap().keys().cloned().collect();
        f.debug_struct("TaskContext")
            .field("keys", &keys)
            .field("has_parent", &self.parent().is_some())
            .finish()
    }
}
