//! Construction orchestrator.
//!
//! Turns deferred [`Record`]s into live values. For one record a build:
//!
//! 1. returns the memoized value if the record is already built;
//! 2. returns the partial result if the record is already being built higher up
//!    the same [`BuildSession`];
//! 3. pushes a session frame and invokes the builder strategy, reconciling a
//!    result published on the context with the returned one;
//! 4. caches the product, cascades into child nodes unless cancelled, pops the
//!    frame;
//! 5. runs the completion hook, appends the product to its owner and notifies
//!    listeners.
//!
//! Append failures are logged and reported in the [`BuildEvent`]; they do not
//! fail the build.
//!
//! # Submodules
//!
//! - [`context`] - State handed to builder strategies

pub mod context;
mod registry;
mod session;
mod types;

use std::sync::Arc;

use tracing::{debug, trace, warn};

pub use context::{BuildContext, Owner};
pub use registry::*;
pub use session::BuildSession;
pub use types::*;

use crate::builders::Container;
use crate::engine::Engine;
use crate::record::Record;
use crate::tree::{NodeContent, NodeId};
use crate::value::Value;

/// Find the strategy for a record: unit-scoped aliases first, then the
/// record's builder key directly.
pub(crate) fn resolve_builder(engine: &Engine, record: &Record) -> Result<Arc<dyn Builder>, BuildError> {
  let key = record.builder();
  let alias = engine.forest().builder_alias(record.unit(), key);
  let target = alias.as_deref().unwrap_or(key);

  engine
    .registry()
    .get(target)
    .ok_or_else(|| BuildError::BuilderNotFound {
      key: target.to_string(),
      path: record_path(engine, record),
    })
}

fn record_path(engine: &Engine, record: &Record) -> String {
  match record.node() {
    Some(node) => engine.tree().full_path(node),
    None => record.name().to_string(),
  }
}

/// The owner of `node` as it currently stands. Never builds.
pub(crate) fn owner_of(engine: &Engine, node: NodeId) -> Option<Owner> {
  let tree = engine.tree();
  let owner = tree.owner_of(node)?;
  let path = tree.full_path(owner);
  let content = tree.node(owner)?.content().clone();
  drop(tree);

  let (value, record) = match content {
    NodeContent::Custom(value) => (Some(value), None),
    NodeContent::Record(record) => (record.cached(), Some(record)),
    NodeContent::Empty => (None, None),
  };
  Some(Owner {
    node: owner,
    path,
    value,
    record,
  })
}

/// Read a node's value inside an existing session.
pub(crate) fn obtain_in(
  engine: &Engine,
  session: &mut BuildSession,
  node: NodeId,
  mode: ObtainMode,
) -> Result<Option<Value>, BuildError> {
  let content = engine
    .tree()
    .node(node)
    .map(|n| n.content().clone())
    .ok_or_else(|| BuildError::NodeNotFound {
      path: format!("<node {}>", node.0),
    })?;

  match content {
    NodeContent::Empty => Ok(None),
    NodeContent::Custom(value) => Ok(Some(value)),
    NodeContent::Record(record) => match mode {
      ObtainMode::Never => Ok(record.cached()),
      ObtainMode::Auto => build_record(engine, session, &record, &BuildSettings::default(), None),
      ObtainMode::Always => build_record(engine, session, &record, &BuildSettings::fresh(), None),
    },
  }
}

/// Build one record within `session`.
///
/// `owner` is passed down by the children cascade; top-level builds resolve it
/// from the tree.
pub(crate) fn build_record(
  engine: &Engine,
  session: &mut BuildSession,
  record: &Arc<Record>,
  settings: &BuildSettings,
  owner: Option<Owner>,
) -> Result<Option<Value>, BuildError> {
  if !settings.fresh && record.is_built() {
    trace!(record = %record.name(), "already built");
    return Ok(record.cached());
  }
  if let Some(partial) = session.partial(record) {
    trace!(
      record = %record.name(),
      depth = session.depth(),
      "record is under construction, returning partial result"
    );
    return Ok(partial);
  }

  let node = record.node().ok_or_else(|| BuildError::NotMounted {
    record: record.name().to_string(),
  })?;
  let builder = resolve_builder(engine, record)?;
  let owner = owner.or_else(|| owner_of(engine, node));

  session.push(record.clone());
  let (product, path, cancelled) =
    match invoke(engine, session, record, node, owner.clone(), settings, builder.as_ref()) {
      Ok(outcome) => outcome,
      Err(err) => {
        session.pop();
        return Err(err);
      }
    };

  if !settings.fresh {
    record.store(product.clone());
  }
  session.set_partial(record, product.clone());

  if !cancelled && !settings.ignore_children {
    let children = engine.tree().children(node).to_vec();
    let child_owner = Owner {
      node,
      path: path.clone(),
      value: product.clone(),
      record: Some(record.clone()),
    };
    if let Err(err) = build_children(engine, session, &children, &child_owner, &settings.for_children()) {
      session.pop();
      return Err(err);
    }
  }
  session.pop();

  builder.build_complete(record, product.as_ref())?;

  let (appended, append_error) = match (&product, &owner) {
    (Some(child), Some(owner)) if !settings.ignore_appending => append(engine, record, owner, child),
    _ => (None, None),
  };

  let event = BuildEvent {
    path,
    record: record.name().to_string(),
    produced: product.is_some(),
    appended,
    append_error,
  };
  if let Some(callback) = &settings.on_built {
    callback(&event, product.as_ref());
  }
  engine.notify_built(&event);
  debug!(path = %event.path, produced = event.produced, "built record");

  Ok(product)
}

fn invoke(
  engine: &Engine,
  session: &mut BuildSession,
  record: &Arc<Record>,
  node: NodeId,
  owner: Option<Owner>,
  settings: &BuildSettings,
  builder: &dyn Builder,
) -> Result<(Option<Value>, String, bool), BuildError> {
  let mut ctx = BuildContext::new(engine, session, record.clone(), node, owner, settings);
  if record.behavior("break").and_then(|b| b.flag("value")) == Some(true) {
    ctx.cancel();
  }

  let returned = builder.build(&mut ctx)?;
  let explicit = ctx.result.take();
  let path = ctx.path().to_string();

  let product = match (returned, explicit) {
    (Some(returned), Some(explicit)) if !returned.ptr_eq(&explicit) => {
      return Err(BuildError::AmbiguousResult { path });
    }
    (Some(returned), _) => Some(returned),
    (None, explicit) => explicit,
  };
  Ok((product, path, ctx.cancel))
}

/// Build every record below `children`. Empty nodes are transparent; custom
/// nodes become the owner of their own subtree.
pub(crate) fn build_children(
  engine: &Engine,
  session: &mut BuildSession,
  children: &[NodeId],
  owner: &Owner,
  settings: &BuildSettings,
) -> Result<(), BuildError> {
  for &child in children {
    let (content, grandchildren, path) = {
      let tree = engine.tree();
      let Some(node) = tree.node(child) else {
        continue;
      };
      (node.content().clone(), node.children().to_vec(), tree.full_path(child))
    };

    match content {
      NodeContent::Record(record) => {
        build_record(engine, session, &record, settings, Some(owner.clone()))?;
      }
      NodeContent::Empty => build_children(engine, session, &grandchildren, owner, settings)?,
      NodeContent::Custom(value) => {
        let custom = Owner {
          node: child,
          path,
          value: Some(value),
          record: None,
        };
        build_children(engine, session, &grandchildren, &custom, settings)?;
      }
    }
  }
  Ok(())
}

/// Splice `child` into its owner. Returns whether an append happened and the
/// error, if one occurred.
fn append(engine: &Engine, record: &Record, owner: &Owner, child: &Value) -> (Option<bool>, Option<String>) {
  let Some(owner_value) = &owner.value else {
    trace!(owner = %owner.path, "owner has no value, skipping append");
    return (None, None);
  };
  let ctx = AppendContext {
    owner: owner_value,
    owner_path: &owner.path,
    child,
    key: record.name(),
    record,
  };

  let result = match &owner.record {
    Some(owner_record) => match resolve_builder(engine, owner_record) {
      Ok(builder) => match builder.appender() {
        Some(appender) => appender.append(&ctx),
        None => return (None, None),
      },
      Err(err) => Err(err),
    },
    None => match owner_value.downcast_ref::<Container>() {
      Some(container) => Ok(container.append(record.name(), child.clone())),
      None => return (None, None),
    },
  };

  match result {
    Ok(appended) => {
      trace!(owner = %owner.path, record = %record.name(), appended, "append");
      (Some(appended), None)
    }
    Err(err) => {
      warn!(owner = %owner.path, record = %record.name(), error = %err, "append failed");
      (Some(false), Some(err.to_string()))
    }
  }
}

/// Release a record's cached product through its builder.
pub(crate) fn destroy_record(engine: &Engine, record: &Record) -> Result<bool, BuildError> {
  if !record.is_built() {
    return Ok(false);
  }
  let builder = resolve_builder(engine, record)?;
  let Some(value) = record.take() else {
    return Ok(false);
  };
  builder.destroy(record, value)?;
  debug!(record = %record.name(), "destroyed record value");
  Ok(true)
}

/// Type of a record's product without building: the declared type, then the
/// builder's inference, then the cached value's type.
pub(crate) fn value_type(engine: &Engine, record: &Record) -> Option<String> {
  if let Some(declared) = record.declared_type() {
    return Some(declared.to_string());
  }
  if let Ok(builder) = resolve_builder(engine, record)
    && let Some(inferred) = builder.value_type(record)
  {
    return Some(inferred);
  }
  record.cached().map(|v| v.type_name().to_string())
}
