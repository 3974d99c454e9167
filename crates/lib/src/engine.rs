//! The engine: one explicit context object owning the unit forest, the
//! composition tree, the builder registry and the collaborators they use.
//!
//! Everything a host does goes through an [`Engine`]: loading and unloading
//! units, addressing tree paths, and building values. There is no global
//! state; hosts create one engine and drop it on shutdown.
//!
//! # Locking
//!
//! The tree and the forest each sit behind a `RwLock`, and top-level builds are
//! serialized by a separate build lock. No lock is held while a builder
//! strategy runs, so builders may freely read the tree through their
//! [`BuildContext`](crate::build::BuildContext). Builders must not call the
//! engine's top-level build methods; nested reads go through the context so
//! they share the caller's session.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::build::{
  self, BuildError, BuildListener, BuildSession, BuildSettings, Builder, BuilderRegistry, BuildEvent, ObtainMode,
  Owner,
};
use crate::builders::{self, Container};
use crate::config::LoaderConfig;
use crate::loader::{Flow, LoadError, LoadReport, Loader, LoaderEvent, LoaderListener};
use crate::manifest::{ManifestParser, TomlManifestParser};
use crate::record::Record;
use crate::resolve::{ExpressionResolver, LiteralResolver};
use crate::tree::{IndexKey, Member, MountListener, NodeContent, NodeId, PathExpr, Tree, TreeError};
use crate::unit::{Forest, UnitId};
use crate::value::Value;

pub struct Engine {
  config: LoaderConfig,
  tree: RwLock<Tree>,
  forest: RwLock<Forest>,
  registry: BuilderRegistry,
  resolver: Arc<dyn ExpressionResolver>,
  parser: Arc<dyn ManifestParser>,
  build_lock: Mutex<()>,
  build_listeners: RwLock<Vec<Arc<dyn BuildListener>>>,
  loader_listeners: RwLock<Vec<Arc<dyn LoaderListener>>>,
}

impl Default for Engine {
  fn default() -> Self {
    Self::new(LoaderConfig::default())
  }
}

impl Engine {
  /// Create an engine with the bundled parser, resolver and builders.
  pub fn new(config: LoaderConfig) -> Self {
    let registry = BuilderRegistry::new();
    builders::register_defaults(&registry);
    let parser = TomlManifestParser::with_extension(config.manifest_extension.clone());

    Self {
      config,
      tree: RwLock::new(Tree::new()),
      forest: RwLock::new(Forest::new()),
      registry,
      resolver: Arc::new(LiteralResolver),
      parser: Arc::new(parser),
      build_lock: Mutex::new(()),
      build_listeners: RwLock::new(Vec::new()),
      loader_listeners: RwLock::new(Vec::new()),
    }
  }

  pub fn with_parser(mut self, parser: Arc<dyn ManifestParser>) -> Self {
    self.parser = parser;
    self
  }

  pub fn with_resolver(mut self, resolver: Arc<dyn ExpressionResolver>) -> Self {
    self.resolver = resolver;
    self
  }

  pub fn config(&self) -> &LoaderConfig {
    &self.config
  }

  pub fn registry(&self) -> &BuilderRegistry {
    &self.registry
  }

  pub fn register_builder(&self, key: &str, builder: Arc<dyn Builder>) {
    self.registry.register(key, builder);
  }

  pub fn resolver(&self) -> &dyn ExpressionResolver {
    self.resolver.as_ref()
  }

  pub fn parser(&self) -> &dyn ManifestParser {
    self.parser.as_ref()
  }

  /// Read access to the composition tree.
  ///
  /// Drop the guard before calling back into the engine.
  pub fn tree(&self) -> RwLockReadGuard<'_, Tree> {
    self.tree.read().unwrap_or_else(PoisonError::into_inner)
  }

  pub(crate) fn tree_mut(&self) -> RwLockWriteGuard<'_, Tree> {
    self.tree.write().unwrap_or_else(PoisonError::into_inner)
  }

  /// Read access to the unit forest.
  pub fn forest(&self) -> RwLockReadGuard<'_, Forest> {
    self.forest.read().unwrap_or_else(PoisonError::into_inner)
  }

  pub(crate) fn forest_mut(&self) -> RwLockWriteGuard<'_, Forest> {
    self.forest.write().unwrap_or_else(PoisonError::into_inner)
  }

  pub(crate) fn lock_builds(&self) -> MutexGuard<'_, ()> {
    self.build_lock.lock().unwrap_or_else(PoisonError::into_inner)
  }

  pub fn add_build_listener(&self, listener: Arc<dyn BuildListener>) {
    self
      .build_listeners
      .write()
      .unwrap_or_else(PoisonError::into_inner)
      .push(listener);
  }

  pub fn add_loader_listener(&self, listener: Arc<dyn LoaderListener>) {
    self
      .loader_listeners
      .write()
      .unwrap_or_else(PoisonError::into_inner)
      .push(listener);
  }

  pub fn add_mount_listener(&self, listener: Arc<dyn MountListener>) {
    self.tree_mut().add_listener(listener);
  }

  pub(crate) fn notify_built(&self, event: &BuildEvent) {
    let listeners = self
      .build_listeners
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .clone();
    for listener in listeners {
      listener.on_built(event);
    }
  }

  /// Send a loader event. Any listener may veto; callers decide whether a
  /// veto is honored.
  pub(crate) fn emit(&self, event: &LoaderEvent) -> Flow {
    let listeners = self
      .loader_listeners
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .clone();
    let mut flow = Flow::Continue;
    for listener in listeners {
      if listener.on_event(event) == Flow::Veto {
        flow = Flow::Veto;
      }
    }
    flow
  }

  // Loading

  /// Load the configured plugin directory.
  pub fn load(&self) -> Result<LoadReport, LoadError> {
    self.load_from(&self.config.plugins_dir)
  }

  /// Load the plugin forest rooted at `root`.
  pub fn load_from(&self, root: &Path) -> Result<LoadReport, LoadError> {
    Loader::new(self).load(root)
  }

  /// Unload a live unit by name. Returns false if no live unit has that name
  /// or a listener vetoed the unload.
  pub fn unload(&self, name: &str) -> bool {
    match self.unit(name) {
      Some(id) => Loader::new(self).unload(id),
      None => false,
    }
  }

  /// First live unit named `name`.
  pub fn unit(&self, name: &str) -> Option<UnitId> {
    self.forest().find(name)
  }

  // Paths

  pub fn find(&self, path: &str) -> Option<NodeId> {
    self.tree().find(path)
  }

  pub fn ensure_path(&self, path: &str, position: Option<&str>) -> Result<NodeId, TreeError> {
    self.tree_mut().ensure_path(path, position)
  }

  pub fn mount(&self, path: &str, value: Value) -> Result<NodeId, TreeError> {
    self.tree_mut().mount(path, value)
  }

  pub fn unmount(&self, path: &str) -> Result<Option<Value>, TreeError> {
    self.tree_mut().unmount_path(path)
  }

  pub fn owner_of(&self, node: NodeId) -> Option<NodeId> {
    self.tree().owner_of(node)
  }

  pub fn full_path(&self, node: NodeId) -> String {
    self.tree().full_path(node)
  }

  /// The record mounted at `node`, if any.
  pub fn record_at(&self, node: NodeId) -> Option<Arc<Record>> {
    self.tree().node(node)?.content().record().cloned()
  }

  // Building

  /// Build whatever `node` holds.
  ///
  /// A record is built (and its children cascaded). For a custom or empty node
  /// the records below it are built, and the node's own value is returned.
  pub fn build(&self, node: NodeId, settings: &BuildSettings) -> Result<Option<Value>, BuildError> {
    let _guard = self.lock_builds();
    let mut session = BuildSession::new();

    let (content, children, path) = {
      let tree = self.tree();
      let current = tree.node(node).ok_or_else(|| BuildError::NodeNotFound {
        path: format!("<node {}>", node.0),
      })?;
      (current.content().clone(), current.children().to_vec(), tree.full_path(node))
    };

    match content {
      NodeContent::Record(record) => build::build_record(self, &mut session, &record, settings, None),
      NodeContent::Custom(value) => {
        if !settings.ignore_children {
          let owner = Owner {
            node,
            path,
            value: Some(value.clone()),
            record: None,
          };
          build::build_children(self, &mut session, &children, &owner, &settings.for_children())?;
        }
        Ok(Some(value))
      }
      NodeContent::Empty => {
        if !settings.ignore_children {
          let owner = build::owner_of(self, node).unwrap_or(Owner {
            node,
            path,
            value: None,
            record: None,
          });
          build::build_children(self, &mut session, &children, &owner, &settings.for_children())?;
        }
        Ok(None)
      }
    }
  }

  pub fn build_path(&self, path: &str, settings: &BuildSettings) -> Result<Option<Value>, BuildError> {
    let node = self.find(path).ok_or_else(|| BuildError::NodeNotFound {
      path: path.to_string(),
    })?;
    self.build(node, settings)
  }

  /// Build a mounted record directly.
  pub fn build_record(&self, record: &Arc<Record>, settings: &BuildSettings) -> Result<Option<Value>, BuildError> {
    let _guard = self.lock_builds();
    let mut session = BuildSession::new();
    build::build_record(self, &mut session, record, settings, None)
  }

  /// Read a node's value according to `mode`.
  pub fn obtain(&self, node: NodeId, mode: ObtainMode) -> Result<Option<Value>, BuildError> {
    if mode != ObtainMode::Always
      && let Some(record) = self.record_at(node)
      && record.is_built()
    {
      return Ok(record.cached());
    }
    if mode == ObtainMode::Never {
      let content = self.tree().node(node).map(|n| n.content().clone());
      return Ok(match content {
        Some(NodeContent::Custom(value)) => Some(value),
        Some(NodeContent::Record(record)) => record.cached(),
        _ => None,
      });
    }

    let _guard = self.lock_builds();
    let mut session = BuildSession::new();
    build::obtain_in(self, &mut session, node, mode)
  }

  pub fn obtain_path(&self, path: &str, mode: ObtainMode) -> Result<Option<Value>, BuildError> {
    let node = self.find(path).ok_or_else(|| BuildError::NodeNotFound {
      path: path.to_string(),
    })?;
    self.obtain(node, mode)
  }

  /// Release a record's cached product through its builder.
  pub fn destroy(&self, record: &Record) -> Result<bool, BuildError> {
    let _guard = self.lock_builds();
    build::destroy_record(self, record)
  }

  /// The type of a node's value, without building.
  pub fn value_type(&self, node: NodeId) -> Option<String> {
    let content = self.tree().node(node)?.content().clone();
    match content {
      NodeContent::Empty => None,
      NodeContent::Custom(value) => Some(value.type_name().to_string()),
      NodeContent::Record(record) => build::value_type(self, &record),
    }
  }

  /// Evaluate a path expression: find the node, obtain its value, then walk
  /// its members.
  pub fn evaluate(&self, expr: &str) -> Result<Option<Value>, BuildError> {
    let parsed = PathExpr::parse(expr)?;
    let path = if parsed.path.is_empty() { "/" } else { parsed.path.as_str() };
    let node = self.find(path).ok_or_else(|| BuildError::NodeNotFound {
      path: path.to_string(),
    })?;

    let mut current = self.obtain(node, ObtainMode::Auto)?;
    for member in &parsed.members {
      let Some(value) = current else {
        return Ok(None);
      };
      current = navigate(expr, &value, member)?;
    }
    Ok(current)
  }
}

fn navigate(expr: &str, value: &Value, member: &Member) -> Result<Option<Value>, BuildError> {
  if let Some(json) = value.downcast_ref::<serde_json::Value>() {
    let next = match member {
      Member::Field(key) | Member::Index(IndexKey::Key(key)) => json.get(key.as_str()),
      Member::Index(IndexKey::Position(index)) => json.get(*index),
    };
    return Ok(next.cloned().map(Value::new));
  }
  if let Some(container) = value.downcast_ref::<Container>() {
    return Ok(container.member(member));
  }
  Err(BuildError::Navigation {
    expr: expr.to_string(),
    member: member.to_string(),
    message: format!("{} has no members", value.type_name()),
  })
}
