//! Loading and unloading plugin forests from disk.

use std::sync::Arc;

use arbor_lib::build::{BuildError, BuildSettings};
use arbor_lib::builders::Container;
use arbor_lib::loader::{LoadError, LoaderEvent, UnitError};
use arbor_lib::manifest::ManifestError;
use arbor_lib::unit::{DependencyError, UnitStatus};
use arbor_lib::{Engine, LoaderConfig};
use tempfile::TempDir;

use super::common::{Recorder, fixture, track, write_unit};

fn loaded(event: &LoaderEvent) -> bool {
  matches!(event, LoaderEvent::UnitLoaded { .. })
}

fn failed(event: &LoaderEvent) -> bool {
  matches!(event, LoaderEvent::UnitFailed { .. })
}

fn unloading(event: &LoaderEvent) -> bool {
  matches!(event, LoaderEvent::UnitUnloading { .. })
}

fn unloaded(event: &LoaderEvent) -> bool {
  matches!(event, LoaderEvent::UnitUnloaded { .. })
}

mod ordering {
  use super::*;

  #[test]
  fn dependency_loads_before_dependent() {
    // a.plugin sorts first but depends on the unit in b.plugin.
    let (_dir, engine) = fixture(&[
      ("a.plugin", "name = \"p2\"\ndependencies = [\"p1\"]\n"),
      ("b.plugin", "name = \"p1\"\n"),
    ]);
    let recorder = Arc::new(Recorder::default());
    engine.add_loader_listener(recorder.clone());

    let report = engine.load().unwrap();

    assert!(report.is_clean(), "unexpected failures: {:?}", report.failed);
    assert_eq!(report.loaded, vec!["p1", "p2"]);
    assert_eq!(recorder.units(loaded), vec!["p1", "p2"]);
  }

  #[test]
  fn chains_load_in_dependency_order() {
    let (_dir, engine) = fixture(&[
      ("a.plugin", "name = \"top\"\ndependencies = [\"middle\", \"bottom\"]\n"),
      ("b.plugin", "name = \"middle\"\ndependencies = [\"bottom\"]\n"),
      ("c.plugin", "name = \"bottom\"\n"),
    ]);

    let report = engine.load().unwrap();

    assert_eq!(report.loaded, vec!["bottom", "middle", "top"]);
  }

  #[test]
  fn started_and_finished_bracket_the_load() {
    let (_dir, engine) = fixture(&[("core.plugin", "name = \"core\"\n")]);
    let recorder = Arc::new(Recorder::default());
    engine.add_loader_listener(recorder.clone());

    engine.load().unwrap();

    let events = recorder.events();
    assert!(matches!(events.first(), Some(LoaderEvent::LoadingStarted { .. })));
    assert!(matches!(
      events.last(),
      Some(LoaderEvent::LoadingFinished { loaded: 1, failed: 0, .. })
    ));
  }

  #[test]
  fn missing_root_is_an_error() {
    let dir = TempDir::new().unwrap();
    let engine = Engine::new(LoaderConfig::with_plugins_dir(dir.path().join("nowhere")));

    let err = engine.load().unwrap_err();
    assert!(matches!(err, LoadError::RootNotFound { .. }));
  }
}

mod failures {
  use super::*;

  #[test]
  fn cycle_fails_every_member() {
    let (_dir, engine) = fixture(&[
      ("q.plugin", "name = \"q\"\ndependencies = [\"r\"]\n"),
      ("r.plugin", "name = \"r\"\ndependencies = [\"q\"]\n"),
      ("s.plugin", "name = \"s\"\ndependencies = [\"q\"]\n"),
      ("t.plugin", "name = \"t\"\n"),
    ]);
    let recorder = Arc::new(Recorder::default());
    engine.add_loader_listener(recorder.clone());

    let report = engine.load().unwrap();

    assert_eq!(report.loaded, vec!["t"]);
    for name in ["q", "r"] {
      let failure = report.failure(name).unwrap();
      match &failure.error {
        UnitError::Dependency(DependencyError::Cycle { units }) => {
          assert_eq!(units, &vec!["q".to_string(), "r".to_string()]);
        }
        other => panic!("expected a cycle for {name}, got {other:?}"),
      }
      assert!(engine.unit(name).is_none());
    }
    assert!(matches!(
      report.failure("s").unwrap().error,
      UnitError::Dependency(DependencyError::Failed { .. })
    ));
    assert!(matches!(
      recorder.events().last(),
      Some(LoaderEvent::LoadingFinished { loaded: 1, failed: 3, .. })
    ));
  }

  #[test]
  fn self_dependency_is_a_cycle() {
    let (_dir, engine) = fixture(&[("me.plugin", "name = \"me\"\ndependencies = [\"me\"]\n")]);

    let report = engine.load().unwrap();

    assert!(matches!(
      report.failure("me").unwrap().error,
      UnitError::Dependency(DependencyError::Cycle { .. })
    ));
  }

  #[test]
  fn missing_dependency_fails_only_that_unit() {
    let (_dir, engine) = fixture(&[
      ("p.plugin", "name = \"p\"\ndependencies = [\"ghost\"]\n"),
      ("q.plugin", "name = \"q\"\n"),
    ]);

    let report = engine.load().unwrap();

    assert_eq!(report.loaded, vec!["q"]);
    let failure = report.failure("p").unwrap();
    assert!(matches!(
      &failure.error,
      UnitError::Dependency(DependencyError::NotFound { dependency, .. }) if dependency == "ghost"
    ));
    let forest = engine.forest();
    let failed = forest.all().find(|u| u.name == "p").unwrap();
    assert_eq!(failed.status, UnitStatus::Failed);
    assert!(failed.status_description.is_some());
  }

  #[test]
  fn duplicate_names_are_case_insensitive() {
    let (_dir, engine) = fixture(&[("a.plugin", "name = \"dup\"\n"), ("b.plugin", "name = \"DUP\"\n")]);

    let report = engine.load().unwrap();

    assert_eq!(report.loaded, vec!["dup"]);
    assert!(matches!(
      report.failure("DUP").unwrap().error,
      UnitError::Manifest(ManifestError::DuplicateName { .. })
    ));
  }

  #[test]
  fn malformed_header_is_reported_by_file_stem() {
    let (_dir, engine) = fixture(&[("broken.plugin", "name = [\n")]);

    let report = engine.load().unwrap();

    assert!(report.loaded.is_empty());
    assert!(matches!(
      report.failure("broken").unwrap().error,
      UnitError::Manifest(ManifestError::Malformed { .. })
    ));
  }

  #[test]
  fn children_of_a_failed_unit_are_skipped() {
    let (_dir, engine) = fixture(&[
      (
        "base.plugin",
        "name = \"base\"\n\n[[extension]]\npath = \"/app\"\n\n[[extension.records]]\nname = \"nameless\"\n",
      ),
      ("base/child.plugin", "name = \"child\"\n"),
      ("base/deeper/grandchild.plugin", "name = \"grandchild\"\n"),
    ]);

    let report = engine.load().unwrap();

    assert!(report.loaded.is_empty());
    assert!(matches!(report.failure("base").unwrap().error, UnitError::Manifest(_)));
    for name in ["child", "grandchild"] {
      assert!(matches!(
        &report.failure(name).unwrap().error,
        UnitError::ParentFailed { parent } if parent == "base"
      ));
    }
  }

  #[test]
  fn subdirectories_of_an_unparsable_unit_are_reported() {
    let (_dir, engine) = fixture(&[
      ("base.plugin", "name = [\n"),
      ("base/child.plugin", "name = \"child\"\n"),
      ("base/deeper/grandchild.plugin", "name = \"grandchild\"\n"),
    ]);
    let recorder = Arc::new(Recorder::default());
    engine.add_loader_listener(recorder.clone());

    let report = engine.load().unwrap();

    assert!(report.loaded.is_empty());
    assert!(matches!(
      report.failure("base").unwrap().error,
      UnitError::Manifest(ManifestError::Malformed { .. })
    ));
    for name in ["child", "grandchild"] {
      assert!(matches!(
        &report.failure(name).unwrap().error,
        UnitError::ParentFailed { parent } if parent == "base"
      ));
    }
    assert_eq!(recorder.units(failed), vec!["base", "child", "grandchild"]);
  }

  #[test]
  fn mount_conflict_rolls_back_the_unit() {
    let (_dir, engine) = fixture(&[
      (
        "a.plugin",
        "name = \"a\"\n\n[[extension]]\npath = \"/x\"\n\n[[extension.records]]\nname = \"r\"\nbuilder = \"value\"\n",
      ),
      (
        "b.plugin",
        concat!(
          "name = \"b\"\n\n[[extension]]\npath = \"/x\"\n\n",
          "[[extension.records]]\nname = \"ok\"\nbuilder = \"value\"\n\n",
          "[[extension.records]]\nname = \"r\"\nbuilder = \"value\"\n",
        ),
      ),
    ]);

    let report = engine.load().unwrap();

    assert_eq!(report.loaded, vec!["a"]);
    assert!(matches!(report.failure("b").unwrap().error, UnitError::Mount(_)));
    assert!(engine.find("/x/r").is_some());
    assert!(engine.find("/x/ok").is_none());
  }
}

mod structure {
  use super::*;

  #[test]
  fn subdirectories_belong_to_the_first_master() {
    let (_dir, engine) = fixture(&[
      ("core.plugin", "name = \"core\"\n"),
      ("extra.plugin", "name = \"extra\"\ndependencies = [\"core\"]\n"),
      ("core/ext.plugin", "name = \"ext\"\ndependencies = [\"extra\"]\n"),
    ]);

    let report = engine.load().unwrap();

    assert!(report.is_clean(), "unexpected failures: {:?}", report.failed);
    let core = engine.unit("core").unwrap();
    let extra = engine.unit("extra").unwrap();
    let ext = engine.unit("ext").unwrap();
    let forest = engine.forest();
    assert_eq!(forest.get(ext).unwrap().parent, Some(core));
    assert_eq!(forest.get(ext).unwrap().manifest.dependencies[0].unit, Some(extra));
    assert_eq!(forest.depth(ext), 1);
  }

  #[test]
  fn units_in_sibling_directories_see_each_other() {
    // x sorts first but depends on y from a later directory.
    for with_master in [false, true] {
      let mut units = vec![
        ("a/x.plugin", "name = \"x\"\ndependencies = [\"y\"]\n"),
        ("b/y.plugin", "name = \"y\"\n"),
      ];
      if with_master {
        units.push(("m.plugin", "name = \"m\"\n"));
      }
      let (_dir, engine) = fixture(&units);

      let report = engine.load().unwrap();

      assert!(report.is_clean(), "unexpected failures: {:?}", report.failed);
      let x = engine.unit("x").unwrap();
      let y = engine.unit("y").unwrap();
      let forest = engine.forest();
      assert_eq!(forest.get(x).unwrap().manifest.dependencies[0].unit, Some(y));
      assert_eq!(forest.get(x).unwrap().parent, forest.get(y).unwrap().parent);
      let position = |name: &str| report.loaded.iter().position(|n| n == name).unwrap();
      assert!(position("y") < position("x"));
    }
  }

  #[test]
  fn hidden_directories_are_skipped() {
    let (_dir, engine) = fixture(&[
      ("core.plugin", "name = \"core\"\n"),
      (".cache/stale.plugin", "name = \"stale\"\n"),
    ]);

    let report = engine.load().unwrap();

    assert_eq!(report.loaded, vec!["core"]);
  }

  #[test]
  fn other_extensions_are_ignored() {
    let (_dir, engine) = fixture(&[("core.plugin", "name = \"core\"\n"), ("notes.toml", "name = \"notes\"\n")]);

    let report = engine.load().unwrap();

    assert_eq!(report.loaded, vec!["core"]);
  }

  #[test]
  fn eager_paths_are_built_after_loading() {
    let dir = TempDir::new().unwrap();
    write_unit(
      dir.path(),
      "core.plugin",
      concat!(
        "name = \"core\"\n\n[[extension]]\npath = \"/app\"\n\n",
        "[[extension.records]]\nname = \"shell\"\nbuilder = \"tracked\"\n\n",
        "[[extension]]\npath = \"/broken\"\n\n",
        "[[extension.records]]\nname = \"thing\"\nbuilder = \"nonexistent\"\n",
      ),
    );
    let config = LoaderConfig {
      eager_paths: vec!["/app".to_string(), "/broken".to_string(), "/absent".to_string()],
      ..LoaderConfig::with_plugins_dir(dir.path())
    };
    let engine = Engine::new(config);
    let tracked = track(&engine, "tracked");

    let report = engine.load().unwrap();

    assert_eq!(tracked.builds(), 1);
    let shell = engine.record_at(engine.find("/app/shell").unwrap()).unwrap();
    assert!(shell.is_built());
    assert_eq!(report.eager_failures.len(), 1);
    assert_eq!(report.eager_failures[0].path, "/broken");
    assert!(matches!(
      report.eager_failures[0].error,
      BuildError::BuilderNotFound { .. }
    ));
  }

  #[test]
  fn aliases_resolve_through_dependencies_only() {
    let (_dir, engine) = fixture(&[
      (
        "a.plugin",
        "name = \"menus\"\n\n[[builders]]\nname = \"menu\"\ntype = \"list\"\n",
      ),
      (
        "b.plugin",
        concat!(
          "name = \"file\"\ndependencies = [\"menus\"]\n\n",
          "[[extension]]\npath = \"/app\"\n\n",
          "[[extension.records]]\nname = \"file\"\nbuilder = \"menu\"\n",
        ),
      ),
      (
        "c.plugin",
        concat!(
          "name = \"stray\"\n\n[[extension]]\npath = \"/app\"\n\n",
          "[[extension.records]]\nname = \"stray\"\nbuilder = \"menu\"\n",
        ),
      ),
    ]);
    engine.load().unwrap();

    let file = engine
      .build_path("/app/file", &BuildSettings::default())
      .unwrap()
      .unwrap();
    assert!(file.is::<Container>());

    let err = engine
      .build_path("/app/stray", &BuildSettings::default())
      .unwrap_err();
    assert!(matches!(err, BuildError::BuilderNotFound { ref key, .. } if key == "menu"));
  }
}

mod unloading {
  use super::*;

  fn forest() -> (TempDir, Engine) {
    fixture(&[
      (
        "core.plugin",
        concat!(
          "name = \"core\"\n\n[[extension]]\npath = \"/app\"\n\n",
          "[[extension.records]]\nname = \"shell\"\nbuilder = \"tracked\"\n\n",
          "[[extension.records.children]]\nname = \"panel\"\nbuilder = \"tracked\"\n",
        ),
      ),
      (
        "ext.plugin",
        concat!(
          "name = \"ext\"\ndependencies = [\"core\"]\n\n",
          "[[extension]]\npath = \"/app/shell\"\n\n",
          "[[extension.records]]\nname = \"tool\"\nbuilder = \"tracked\"\n",
        ),
      ),
      (
        "core/child.plugin",
        concat!(
          "name = \"child\"\n\n[[extension]]\npath = \"/app/shell/panel\"\n\n",
          "[[extension.records]]\nname = \"widget\"\nbuilder = \"tracked\"\n",
        ),
      ),
    ])
  }

  #[test]
  fn unload_mirrors_load() {
    let (_dir, engine) = forest();
    let tracked = track(&engine, "tracked");
    let recorder = Arc::new(Recorder::default());
    engine.add_loader_listener(recorder.clone());

    let report = engine.load().unwrap();
    assert!(report.is_clean(), "unexpected failures: {:?}", report.failed);
    engine.build_path("/app", &BuildSettings::default()).unwrap();
    assert_eq!(tracked.builds(), 4);

    assert!(engine.unload("core"));

    assert_eq!(recorder.units(unloading), vec!["core", "child", "ext"]);
    assert_eq!(recorder.units(unloaded), vec!["child", "ext", "core"]);
    assert_eq!(tracked.destroyed(), vec!["widget", "tool", "panel", "shell"]);
    assert!(engine.find("/app").is_none());
    assert_eq!(engine.tree().len(), 1);
    for name in ["core", "ext", "child"] {
      assert!(engine.unit(name).is_none());
    }
  }

  #[test]
  fn unbuilt_records_are_not_destroyed() {
    let (_dir, engine) = forest();
    let tracked = track(&engine, "tracked");
    engine.load().unwrap();

    assert!(engine.unload("child"));

    assert!(tracked.destroyed().is_empty());
    assert!(engine.find("/app/shell/panel/widget").is_none());
    assert!(engine.find("/app/shell/panel").is_some());
    assert!(engine.unit("core").is_some());
  }

  #[test]
  fn veto_keeps_the_unit_loaded() {
    let (_dir, engine) = forest();
    track(&engine, "tracked");
    engine.add_loader_listener(Arc::new(Recorder::vetoing("core")));
    engine.load().unwrap();

    assert!(!engine.unload("core"));

    assert!(engine.unit("core").is_some());
    assert!(engine.find("/app/shell").is_some());
  }

  #[test]
  fn unknown_unit_is_not_unloaded() {
    let (_dir, engine) = forest();
    engine.load().unwrap();

    assert!(!engine.unload("nobody"));
  }
}
