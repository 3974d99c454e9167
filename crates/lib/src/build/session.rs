//! Per-call cycle detection.

use std::sync::Arc;

use crate::record::Record;
use crate::value::Value;

struct Frame {
  record: Arc<Record>,
  partial: Option<Value>,
}

/// Stack of records under construction for one top-level build call.
///
/// A session is created per top-level call and threaded down the recursion, so
/// unrelated builds never see each other's frames.
#[derive(Default)]
pub struct BuildSession {
  stack: Vec<Frame>,
}

impl BuildSession {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn depth(&self) -> usize {
    self.stack.len()
  }

  pub fn contains(&self, record: &Arc<Record>) -> bool {
    self.stack.iter().any(|f| Arc::ptr_eq(&f.record, record))
  }

  /// If `record` is being built higher up, its current partial result.
  ///
  /// The outer `Option` says whether the record is in progress; the inner one
  /// is the partial result, which may not exist yet.
  pub fn partial(&self, record: &Arc<Record>) -> Option<Option<Value>> {
    self
      .stack
      .iter()
      .rev()
      .find(|f| Arc::ptr_eq(&f.record, record))
      .map(|f| f.partial.clone())
  }

  pub(crate) fn push(&mut self, record: Arc<Record>) {
    self.stack.push(Frame {
      record,
      partial: None,
    });
  }

  pub(crate) fn pop(&mut self) {
    self.stack.pop();
  }

  /// Record the in-progress result of the innermost frame for `record`.
  pub(crate) fn set_partial(&mut self, record: &Arc<Record>, value: Option<Value>) {
    if let Some(frame) = self
      .stack
      .iter_mut()
      .rev()
      .find(|f| Arc::ptr_eq(&f.record, record))
    {
      frame.partial = value;
    }
  }
}
