//! Type-erased, shareable values.
//!
//! Everything that lives in the composition tree (host-mounted custom values and
//! the products of builders) is carried as a [`Value`]: a cheap-to-clone handle
//! around an `Arc<dyn Any + Send + Sync>` that remembers the concrete type name
//! for diagnostics and type probing.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// A shared, type-erased value.
///
/// Identity matters: two `Value`s are [`Value::ptr_eq`] only if they point at the
/// same allocation, which is how the orchestrator decides whether a builder
/// produced one product or two.
#[derive(Clone)]
pub struct Value {
  inner: Arc<dyn Any + Send + Sync>,
  type_name: &'static str,
}

impl Value {
  /// Wrap a concrete value.
  pub fn new<T: Any + Send + Sync>(value: T) -> Self {
    Self {
      inner: Arc::new(value),
      type_name: std::any::type_name::<T>(),
    }
  }

  /// Wrap an already shared value without re-allocating.
  pub fn from_arc<T: Any + Send + Sync>(value: Arc<T>) -> Self {
    Self {
      inner: value,
      type_name: std::any::type_name::<T>(),
    }
  }

  /// The Rust type name of the wrapped value.
  pub fn type_name(&self) -> &'static str {
    self.type_name
  }

  pub fn is<T: Any>(&self) -> bool {
    self.inner.is::<T>()
  }

  pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
    self.inner.downcast_ref::<T>()
  }

  /// Get a shared handle to the concrete value.
  pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
    self.inner.clone().downcast::<T>().ok()
  }

  /// Returns true if both handles point at the same allocation.
  pub fn ptr_eq(&self, other: &Value) -> bool {
    Arc::ptr_eq(&self.inner, &other.inner)
  }
}

impl fmt::Debug for Value {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if let Some(json) = self.downcast_ref::<serde_json::Value>() {
      return write!(f, "Value({})", json);
    }
    if let Some(text) = self.downcast_ref::<String>() {
      return write!(f, "Value({:?})", text);
    }
    write!(f, "Value(<{}>)", self.type_name)
  }
}
