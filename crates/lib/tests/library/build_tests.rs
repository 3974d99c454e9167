//! Building records loaded from plugin files.

use std::sync::{Arc, Mutex};

use arbor_lib::build::{BuildContext, BuildError, BuildEvent, BuildListener, BuildSettings, Builder, ObtainMode};
use arbor_lib::builders::{self, Container};
use arbor_lib::{Engine, Value};
use serde_json::json;
use tempfile::TempDir;

use super::common::{fixture, track};

/// A single unit mounting its records under `/app`.
fn app(records: &str) -> (TempDir, Engine) {
  let unit = format!("name = \"app\"\n\n[[extension]]\npath = \"/app\"\n\n{records}");
  fixture(&[("app.plugin", unit.as_str())])
}

fn load(engine: &Engine) {
  let report = engine.load().unwrap();
  assert!(report.is_clean(), "unexpected failures: {:?}", report.failed);
}

const MENU: &str = concat!(
  "[[extension.records]]\nname = \"menu\"\nbuilder = \"list\"\n\n",
  "[[extension.records.children]]\nname = \"first\"\nbuilder = \"value\"\nproperties = { value = 1 }\n\n",
  "[[extension.records.children]]\nname = \"second\"\nbuilder = \"value\"\nproperties = { value = 2 }\n",
);

#[derive(Default)]
struct Events(Mutex<Vec<BuildEvent>>);

impl BuildListener for Events {
  fn on_built(&self, event: &BuildEvent) {
    self.0.lock().unwrap().push(event.clone());
  }
}

mod memo {
  use super::*;

  #[test]
  fn records_build_once() {
    let (_dir, engine) = app("[[extension.records]]\nname = \"shell\"\nbuilder = \"tracked\"\n");
    let tracked = track(&engine, "tracked");
    load(&engine);

    let first = engine
      .build_path("/app/shell", &BuildSettings::default())
      .unwrap()
      .unwrap();
    let second = engine
      .build_path("/app/shell", &BuildSettings::default())
      .unwrap()
      .unwrap();
    let read = engine.obtain_path("/app/shell", ObtainMode::Auto).unwrap().unwrap();

    assert_eq!(tracked.builds(), 1);
    assert!(first.ptr_eq(&second));
    assert!(first.ptr_eq(&read));
  }

  #[test]
  fn always_builds_a_fresh_uncached_instance() {
    let (_dir, engine) = app("[[extension.records]]\nname = \"shell\"\nbuilder = \"tracked\"\n");
    let tracked = track(&engine, "tracked");
    load(&engine);

    let cached = engine.obtain_path("/app/shell", ObtainMode::Auto).unwrap().unwrap();
    let fresh = engine.obtain_path("/app/shell", ObtainMode::Always).unwrap().unwrap();
    let again = engine.obtain_path("/app/shell", ObtainMode::Auto).unwrap().unwrap();

    assert_eq!(tracked.builds(), 2);
    assert!(!fresh.ptr_eq(&cached));
    assert!(again.ptr_eq(&cached));
  }

  #[test]
  fn never_does_not_build() {
    let (_dir, engine) = app("[[extension.records]]\nname = \"shell\"\nbuilder = \"tracked\"\n");
    let tracked = track(&engine, "tracked");
    load(&engine);

    let value = engine.obtain_path("/app/shell", ObtainMode::Never).unwrap();

    assert!(value.is_none());
    assert_eq!(tracked.builds(), 0);
  }

  #[test]
  fn fresh_parent_collects_fresh_children() {
    let (_dir, engine) = app(MENU);
    load(&engine);

    let cached = engine.obtain_path("/app/menu", ObtainMode::Auto).unwrap().unwrap();
    let fresh = engine.obtain_path("/app/menu", ObtainMode::Always).unwrap().unwrap();

    assert_eq!(builders::to_json(&cached), json!([1, 2]));
    assert_eq!(builders::to_json(&fresh), json!([1, 2]));
    assert!(!fresh.ptr_eq(&cached));
  }
}

mod reentrancy {
  use super::*;

  /// Publishes its product, then reads its own node back.
  #[derive(Default)]
  struct SelfReader {
    seen: Mutex<Option<Value>>,
  }

  impl Builder for SelfReader {
    fn build(&self, ctx: &mut BuildContext<'_>) -> Result<Option<Value>, BuildError> {
      ctx.set_result(Value::new(ctx.record().name().to_string()));
      let seen = ctx.obtain(".")?;
      *self.seen.lock().unwrap() = seen;
      Ok(None)
    }
  }

  struct Ambiguous;

  impl Builder for Ambiguous {
    fn build(&self, ctx: &mut BuildContext<'_>) -> Result<Option<Value>, BuildError> {
      ctx.set_result(Value::new(1i64));
      Ok(Some(Value::new(2i64)))
    }
  }

  /// Returns the value at the relative path in its `source` property.
  struct Reader;

  impl Builder for Reader {
    fn build(&self, ctx: &mut BuildContext<'_>) -> Result<Option<Value>, BuildError> {
      let source = ctx
        .property("source")
        .ok_or_else(|| BuildError::builder(ctx.path(), "missing source"))?
        .to_string();
      ctx.obtain(&source)
    }
  }

  #[test]
  fn nested_lookup_sees_the_partial_result() {
    let (_dir, engine) = app("[[extension.records]]\nname = \"loop\"\nbuilder = \"self\"\n");
    let reader = Arc::new(SelfReader::default());
    engine.register_builder("self", reader.clone());
    load(&engine);

    let built = engine
      .build_path("/app/loop", &BuildSettings::default())
      .unwrap()
      .unwrap();

    let seen = reader.seen.lock().unwrap().clone().unwrap();
    assert!(seen.ptr_eq(&built));
    assert_eq!(built.downcast_ref::<String>().unwrap(), "loop");
  }

  #[test]
  fn conflicting_results_are_rejected() {
    let (_dir, engine) = app("[[extension.records]]\nname = \"twice\"\nbuilder = \"ambiguous\"\n");
    engine.register_builder("ambiguous", Arc::new(Ambiguous));
    load(&engine);

    let err = engine
      .build_path("/app/twice", &BuildSettings::default())
      .unwrap_err();

    assert!(matches!(err, BuildError::AmbiguousResult { .. }));
    let record = engine.record_at(engine.find("/app/twice").unwrap()).unwrap();
    assert!(!record.is_built());
  }

  #[test]
  fn relative_lookup_builds_the_sibling() {
    let (_dir, engine) = app(concat!(
      "[[extension.records]]\nname = \"reader\"\nbuilder = \"reader\"\nproperties = { source = \"../source\" }\n\n",
      "[[extension.records]]\nname = \"source\"\nbuilder = \"value\"\nproperties = { value = 42 }\n",
    ));
    engine.register_builder("reader", Arc::new(Reader));
    load(&engine);

    let value = engine
      .build_path("/app/reader", &BuildSettings::default())
      .unwrap()
      .unwrap();

    assert_eq!(builders::to_json(&value), json!(42));
    let source = engine.record_at(engine.find("/app/source").unwrap()).unwrap();
    assert!(source.is_built());
  }
}

mod concurrency {
  use std::thread;

  use super::*;

  /// Publishes its name, then fails unless reading its own node returns
  /// exactly that value.
  struct Echo;

  impl Builder for Echo {
    fn build(&self, ctx: &mut BuildContext<'_>) -> Result<Option<Value>, BuildError> {
      let own = Value::new(ctx.record().name().to_string());
      ctx.set_result(own.clone());
      let seen = ctx.obtain(".")?;
      if !seen.is_some_and(|v| v.ptr_eq(&own)) {
        return Err(BuildError::builder(ctx.path(), "read a foreign partial result"));
      }
      Ok(None)
    }
  }

  #[test]
  fn concurrent_auto_reads_build_once() {
    let (_dir, engine) = app("[[extension.records]]\nname = \"shell\"\nbuilder = \"tracked\"\n");
    let tracked = track(&engine, "tracked");
    load(&engine);
    let node = engine.find("/app/shell").unwrap();
    let engine = &engine;

    let values: Vec<Value> = thread::scope(|s| {
      let handles: Vec<_> = (0..8)
        .map(|_| s.spawn(move || engine.obtain(node, ObtainMode::Auto).unwrap().unwrap()))
        .collect();
      handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(tracked.builds(), 1);
    assert!(values.iter().all(|v| v.ptr_eq(&values[0])));
  }

  #[test]
  fn concurrent_builds_keep_their_own_sessions() {
    let records: String = (0..4)
      .map(|i| format!("[[extension.records]]\nname = \"echo{i}\"\nbuilder = \"echo\"\n\n"))
      .collect();
    let (_dir, engine) = app(&records);
    engine.register_builder("echo", Arc::new(Echo));
    load(&engine);
    let engine = &engine;

    thread::scope(|s| {
      for i in 0..4 {
        s.spawn(move || {
          let name = format!("echo{i}");
          let value = engine
            .build_path(&format!("/app/{name}"), &BuildSettings::default())
            .unwrap()
            .unwrap();
          assert_eq!(value.downcast_ref::<String>().unwrap(), &name);
        });
      }
    });
  }
}

mod composition {
  use super::*;

  #[test]
  fn children_append_into_a_list() {
    let (_dir, engine) = app(MENU);
    load(&engine);

    let menu = engine
      .build_path("/app/menu", &BuildSettings::default())
      .unwrap()
      .unwrap();

    assert_eq!(menu.downcast_ref::<Container>().unwrap().len(), 2);
    let second = engine.evaluate("/app/menu[1]").unwrap().unwrap();
    assert_eq!(builders::to_json(&second), json!(2));
  }

  #[test]
  fn map_members_are_addressable() {
    let (_dir, engine) = app(concat!(
      "[[extension.records]]\nname = \"labels\"\nbuilder = \"map\"\n\n",
      "[[extension.records.children]]\nname = \"open\"\nbuilder = \"value\"\nproperties = { value = \"Open\" }\n",
    ));
    load(&engine);

    let open = engine.evaluate("/app/labels.open").unwrap().unwrap();
    let keyed = engine.evaluate("/app/labels[\"open\"]").unwrap().unwrap();

    assert_eq!(builders::to_json(&open), json!("Open"));
    assert!(open.ptr_eq(&keyed));
  }

  #[test]
  fn slot_refuses_a_second_child() {
    let (_dir, engine) = app(concat!(
      "[[extension.records]]\nname = \"title\"\nbuilder = \"slot\"\n\n",
      "[[extension.records.children]]\nname = \"first\"\nbuilder = \"value\"\nproperties = { value = \"A\" }\n\n",
      "[[extension.records.children]]\nname = \"second\"\nbuilder = \"value\"\nproperties = { value = \"B\" }\n",
    ));
    let events = Arc::new(Events::default());
    engine.add_build_listener(events.clone());
    load(&engine);

    let title = engine.evaluate("/app/title.value").unwrap().unwrap();

    assert_eq!(builders::to_json(&title), json!("A"));
    let events = events.0.lock().unwrap();
    let appended: Vec<(&str, Option<bool>)> = events.iter().map(|e| (e.record.as_str(), e.appended)).collect();
    assert_eq!(
      appended,
      vec![("first", Some(true)), ("second", Some(false)), ("title", None)]
    );
  }

  #[test]
  fn break_behavior_skips_children() {
    let (_dir, engine) = app(concat!(
      "[[extension.records]]\nname = \"shell\"\nbuilder = \"tracked\"\nbehaviors = { break = { value = true } }\n\n",
      "[[extension.records.children]]\nname = \"panel\"\nbuilder = \"tracked\"\n",
    ));
    let tracked = track(&engine, "tracked");
    load(&engine);

    engine.build_path("/app/shell", &BuildSettings::default()).unwrap();

    assert_eq!(tracked.builds(), 1);
    let panel = engine.record_at(engine.find("/app/shell/panel").unwrap()).unwrap();
    assert!(!panel.is_built());
  }

  #[test]
  fn ignore_children_builds_only_the_record() {
    let (_dir, engine) = app(MENU);
    load(&engine);

    let menu = engine
      .build_path("/app/menu", &BuildSettings::new().ignore_children())
      .unwrap()
      .unwrap();

    assert!(menu.downcast_ref::<Container>().unwrap().is_empty());
  }

  #[test]
  fn custom_values_collect_records_below_them() {
    let (_dir, engine) = fixture(&[(
      "host.plugin",
      concat!(
        "name = \"host\"\n\n[[extension]]\npath = \"/host/items\"\n\n",
        "[[extension.records]]\nname = \"a\"\nbuilder = \"value\"\nproperties = { value = \"x\" }\n\n",
        "[[extension.records]]\nname = \"b\"\nbuilder = \"value\"\nproperties = { value = \"y\" }\n",
      ),
    )]);
    engine.mount("/host/items", Value::new(Container::list())).unwrap();
    load(&engine);

    let items = engine
      .build_path("/host/items", &BuildSettings::default())
      .unwrap()
      .unwrap();

    assert_eq!(builders::to_json(&items), json!(["x", "y"]));
  }

  #[test]
  fn on_built_reports_each_record() {
    let (_dir, engine) = app(MENU);
    load(&engine);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();

    engine
      .build_path(
        "/app/menu",
        &BuildSettings::new().on_built(move |event, _| sink.lock().unwrap().push(event.path.clone())),
      )
      .unwrap();

    assert_eq!(*seen.lock().unwrap(), vec!["/app/menu"]);
  }
}

mod tree_access {
  use super::*;

  #[test]
  fn owner_lookup_never_builds() {
    let (_dir, engine) = app(concat!(
      "[[extension.records]]\nname = \"shell\"\nbuilder = \"tracked\"\n\n",
      "[[extension.records.children]]\nname = \"panel\"\nbuilder = \"tracked\"\n",
    ));
    let tracked = track(&engine, "tracked");
    load(&engine);

    let shell = engine.find("/app/shell").unwrap();
    let panel = engine.find("/app/shell/panel").unwrap();

    assert_eq!(engine.owner_of(panel), Some(shell));
    assert_eq!(engine.owner_of(shell), None);
    assert_eq!(tracked.builds(), 0);
  }

  #[test]
  fn unmount_returns_the_cached_value() {
    let (_dir, engine) = app("[[extension.records]]\nname = \"shell\"\nbuilder = \"tracked\"\n");
    let tracked = track(&engine, "tracked");
    load(&engine);

    let built = engine
      .build_path("/app/shell", &BuildSettings::default())
      .unwrap()
      .unwrap();
    let removed = engine.unmount("/app/shell").unwrap().unwrap();

    assert!(removed.ptr_eq(&built));
    assert!(engine.find("/app/shell").is_none());
    assert_eq!(tracked.builds(), 1);
  }

  #[test]
  fn unmounting_an_unbuilt_record_does_not_build_it() {
    let (_dir, engine) = app("[[extension.records]]\nname = \"shell\"\nbuilder = \"tracked\"\n");
    let tracked = track(&engine, "tracked");
    load(&engine);

    let removed = engine.unmount("/app/shell").unwrap();

    assert!(removed.is_none());
    assert_eq!(tracked.builds(), 0);
  }

  #[test]
  fn value_types_are_known_without_building() {
    let (_dir, engine) = app(concat!(
      "[[extension.records]]\nname = \"menu\"\nbuilder = \"list\"\n\n",
      "[[extension.records]]\nname = \"count\"\nbuilder = \"value\"\n\n",
      "[[extension.records]]\nname = \"typed\"\nbuilder = \"value\"\ntype = \"Label\"\n",
    ));
    load(&engine);

    let type_of = |path: &str| engine.value_type(engine.find(path).unwrap());
    assert_eq!(type_of("/app/menu").as_deref(), Some("list"));
    assert_eq!(type_of("/app/count").as_deref(), Some("json"));
    assert_eq!(type_of("/app/typed").as_deref(), Some("Label"));
    assert_eq!(type_of("/app"), None);
  }

  #[test]
  fn evaluate_reports_unknown_paths() {
    let (_dir, engine) = app(MENU);
    load(&engine);

    let err = engine.evaluate("/app/nothing[0]").unwrap_err();
    assert!(matches!(err, BuildError::NodeNotFound { .. }));
  }
}
