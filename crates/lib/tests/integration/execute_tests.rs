//! Engine integration tests.

use std::sync::Arc;
use std::time::Duration;

use simba_lib::execute::{Engine, EngineConfig, ExecuteError, FailureKind, TargetState};
use simba_lib::registry::{ConfigError, Registry};
use simba_lib::target::{BuildableDef, ExternalDef, GeneratorDef, TargetKind};
use simba_lib::{Graph, load_complete};
use tracing_test::traced_test;

use super::common::{RecordingBuilder, TableFinder, executable, library, recording};

fn graph(registry: Registry) -> Arc<Graph> {
  Arc::new(load_complete(registry).unwrap())
}

#[tokio::test]
async fn linear_chain_builds_in_order() {
  let mut registry = Registry::new();
  let builder = recording(&mut registry, RecordingBuilder::new());
  let c = library(&mut registry, "c", &[]);
  let b = library(&mut registry, "b", &[c]);
  let a = executable(&mut registry, "a", &[b]);
  let engine = Engine::new(graph(registry), EngineConfig::default());

  let report = engine.run(&[a]).await.unwrap();

  assert!(report.is_success());
  assert_eq!(builder.batches(), vec![
    vec!["c".to_string()],
    vec!["b".to_string()],
    vec!["a".to_string()],
  ]);
  for (dep, dependent) in [(c, b), (b, a)] {
    let finished = report.get(dep).unwrap().finished_at.unwrap();
    let started = report.get(dependent).unwrap().started_at.unwrap();
    assert!(finished <= started, "{dep} finished after {dependent} started");
  }
}

#[tokio::test]
async fn closure_excludes_unrequested_targets() {
  let mut registry = Registry::new();
  let builder = recording(&mut registry, RecordingBuilder::new());
  let util = library(&mut registry, "util", &[]);
  let app = executable(&mut registry, "app", &[util]);
  let other = executable(&mut registry, "other", &[]);
  let engine = Engine::new(graph(registry), EngineConfig::default());

  let report = engine.run(&[app]).await.unwrap();

  assert_eq!(report.targets.len(), 2);
  assert_eq!(builder.count("other"), 0);
  assert_eq!(engine.state(other), Some(TargetState::Pending));
}

#[tokio::test]
async fn cycle_is_rejected_before_any_build() {
  let mut registry = Registry::new();
  let builder = recording(&mut registry, RecordingBuilder::new());
  let b = registry.reference(TargetKind::Executable, "b").unwrap();
  let c = registry.reference(TargetKind::Executable, "c").unwrap();
  let a = executable(&mut registry, "a", &[b]);
  executable(&mut registry, "b", &[c]);
  executable(&mut registry, "c", &[a]);

  let err = load_complete(registry).unwrap_err();

  let ConfigError::DependencyCycle { path } = err else {
    panic!("expected a dependency cycle, got {err}");
  };
  for name in ["executable::a", "executable::b", "executable::c"] {
    assert!(path.iter().any(|p| p == name), "{name} missing from {path:?}");
  }
  assert_eq!(path.first(), path.last());
  assert!(builder.built().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn shared_dependency_builds_once_across_concurrent_runs() {
  let mut registry = Registry::new();
  let builder = recording(
    &mut registry,
    RecordingBuilder::new().with_delay(Duration::from_millis(50)),
  );
  let c = library(&mut registry, "c", &[]);
  let a = executable(&mut registry, "a", &[c]);
  let b = executable(&mut registry, "b", &[c]);
  let engine = Engine::new(graph(registry), EngineConfig::default().with_parallelism(4));

  let (first, second) = tokio::join!(
    {
      let engine = engine.clone();
      async move { engine.run(&[a]).await }
    },
    {
      let engine = engine.clone();
      async move { engine.run(&[b]).await }
    }
  );
  let (first, second) = (first.unwrap(), second.unwrap());

  assert_eq!(builder.count("c"), 1);
  assert_eq!(builder.count("a"), 1);
  assert_eq!(builder.count("b"), 1);
  assert_eq!(first.state(c), Some(TargetState::Built));
  assert_eq!(second.state(c), Some(TargetState::Built));
  assert!(first.is_success() && second.is_success());
}

#[tokio::test]
async fn rerun_does_not_rebuild() {
  let mut registry = Registry::new();
  let builder = recording(&mut registry, RecordingBuilder::new());
  let app = executable(&mut registry, "app", &[]);
  let engine = Engine::new(graph(registry), EngineConfig::default());

  engine.run(&[app]).await.unwrap();
  let report = engine.run(&[app]).await.unwrap();

  assert!(report.is_success());
  assert_eq!(builder.count("app"), 1);
}

#[tokio::test]
async fn failure_is_isolated_to_dependents() {
  // broken <- app1, ok <- app2
  let mut registry = Registry::new();
  let builder = recording(&mut registry, RecordingBuilder::new().failing("broken"));
  let broken = library(&mut registry, "broken", &[]);
  let ok = library(&mut registry, "ok", &[]);
  let app1 = executable(&mut registry, "app1", &[broken]);
  let app2 = executable(&mut registry, "app2", &[ok]);
  let engine = Engine::new(graph(registry), EngineConfig::default());

  let report = engine.run(&[]).await.unwrap();

  assert!(!report.is_success());
  assert_eq!(report.state(broken), Some(TargetState::Failed));
  assert_eq!(report.state(ok), Some(TargetState::Built));
  assert_eq!(report.state(app2), Some(TargetState::Built));
  assert_eq!(report.state(app1), Some(TargetState::Failed));
  assert_eq!(builder.count("app1"), 0);

  let app1_failure = report.get(app1).unwrap().failure.clone().unwrap();
  assert_eq!(app1_failure.kind, FailureKind::DependencyFailed {
    dependency: "static_library::broken".to_string(),
  });

  let errors = report.errors();
  assert!(errors.contains(&ExecuteError::BuilderFailure {
    target: "static_library::broken".to_string(),
    cause: "broken exploded".to_string(),
  }));

  let summary = report.summary();
  assert_eq!((summary.built, summary.failed, summary.total), (2, 2, 4));
}

#[tokio::test]
async fn sibling_in_same_batch_survives_failure() {
  let mut registry = Registry::new();
  recording(&mut registry, RecordingBuilder::new().failing("bad"));
  let bad = library(&mut registry, "bad", &[]);
  let good = library(&mut registry, "good", &[]);
  let engine = Engine::new(graph(registry), EngineConfig::default());

  let report = engine.run(&[bad, good]).await.unwrap();

  assert_eq!(report.state(bad), Some(TargetState::Failed));
  assert_eq!(report.state(good), Some(TargetState::Built));
}

#[tokio::test]
async fn partial_batch_failure_only_blocks_its_dependents() {
  // one, two, three share a batch; four needs two, five needs three
  let mut registry = Registry::new();
  let builder = recording(&mut registry, RecordingBuilder::new().failing("two"));
  let one = library(&mut registry, "one", &[]);
  let two = library(&mut registry, "two", &[]);
  let three = library(&mut registry, "three", &[]);
  let four = executable(&mut registry, "four", &[two]);
  let five = executable(&mut registry, "five", &[three]);
  let engine = Engine::new(graph(registry), EngineConfig::default());

  let report = engine.run(&[four, five, one]).await.unwrap();

  assert_eq!(builder.batches()[0], vec![
    "one".to_string(),
    "two".to_string(),
    "three".to_string(),
  ]);
  assert_eq!(report.state(one), Some(TargetState::Built));
  assert_eq!(report.state(two), Some(TargetState::Failed));
  assert_eq!(report.state(three), Some(TargetState::Built));
  assert_eq!(report.state(four), Some(TargetState::Failed));
  assert_eq!(report.state(five), Some(TargetState::Built));
  assert_eq!(builder.count("four"), 0);
  assert_eq!(report.get(four).unwrap().failure.as_ref().unwrap().kind, FailureKind::DependencyFailed {
    dependency: "static_library::two".to_string(),
  });
}

#[tokio::test]
async fn aliases_build_their_referent() {
  let mut registry = Registry::new();
  let builder = recording(&mut registry, RecordingBuilder::new());
  let util = library(&mut registry, "util", &[]);
  let alias = registry.alias("everything", util).unwrap();
  let engine = Engine::new(graph(registry), EngineConfig::default());

  let report = engine.run(&[alias]).await.unwrap();

  assert_eq!(report.state(util), Some(TargetState::Built));
  assert_eq!(builder.count("util"), 1);
}

#[tokio::test]
async fn request_for_non_buildable_target_is_rejected() {
  let mut registry = Registry::new();
  recording(&mut registry, RecordingBuilder::new());
  let env = registry
    .environment("dev", simba_lib::target::EnvironmentDef::new())
    .unwrap();
  let engine = Engine::new(graph(registry), EngineConfig::default());

  let err = engine.run(&[env]).await.unwrap_err();
  assert_eq!(err, ExecuteError::NotBuildable {
    target: "environment::dev".to_string(),
  });
}

/// Registry where `app` compiles with a generator run by the external `tool`.
fn tool_project(finders: Vec<(&str, TableFinder)>) -> (Registry, Arc<RecordingBuilder>, simba_lib::TargetId) {
  let mut registry = Registry::new();
  let builder = recording(&mut registry, RecordingBuilder::new());
  for (name, finder) in finders {
    registry.register_finder(name, Arc::new(finder)).unwrap();
  }
  let tool = registry.external("tool", ExternalDef::executable("tool")).unwrap();
  let generator = registry
    .generator("gen", GeneratorDef::new("{exe} {in} -o {out}", tool))
    .unwrap();
  let app = registry
    .executable(
      "app",
      BuildableDef::new()
        .with_sources(["main.x"])
        .with_generator(generator),
    )
    .unwrap();
  (registry, builder, app)
}

#[tokio::test]
async fn finder_locates_executor_before_build() {
  let (registry, builder, app) = tool_project(vec![
    ("empty", TableFinder::new()),
    ("table", TableFinder::new().with("tool", "/opt/bin/tool")),
  ]);
  let graph = graph(registry);
  let tool = graph.registry().lookup(TargetKind::External, "tool").unwrap();
  assert_eq!(graph.dependencies(app), vec![tool]);

  let report = Engine::new(graph.clone(), EngineConfig::default())
    .run(&[app])
    .await
    .unwrap();

  assert!(report.is_success());
  assert_eq!(builder.count("app"), 1);
  let location = graph.registry().target(tool).as_external().unwrap().location();
  assert_eq!(location, Some(std::path::Path::new("/opt/bin/tool")));
}

#[tokio::test]
async fn unlocated_external_fails_its_dependents() {
  let (registry, builder, app) = tool_project(vec![("table", TableFinder::new())]);
  let graph = graph(registry);
  let tool = graph.registry().lookup(TargetKind::External, "tool").unwrap();

  let report = Engine::new(graph, EngineConfig::default())
    .run(&[app])
    .await
    .unwrap();

  assert_eq!(report.get(tool).unwrap().failure.as_ref().unwrap().kind, FailureKind::FinderNotFound);
  assert_eq!(report.state(app), Some(TargetState::Failed));
  assert_eq!(report.get(app).unwrap().failure.as_ref().unwrap().kind, FailureKind::UnresolvedExecutor {
    external: "external::tool".to_string(),
  });
  assert!(report.errors().contains(&ExecuteError::UnresolvedExecutor {
    target: "executable::app".to_string(),
    external: "external::tool".to_string(),
  }));
  assert_eq!(builder.count("app"), 0);
}

#[tokio::test]
async fn finder_error_stops_the_search() {
  let (registry, _, app) = tool_project(vec![
    ("broken", TableFinder::new().broken("tool")),
    ("table", TableFinder::new().with("tool", "/opt/bin/tool")),
  ]);
  let graph = graph(registry);
  let tool = graph.registry().lookup(TargetKind::External, "tool").unwrap();

  let report = Engine::new(graph, EngineConfig::default())
    .run(&[app])
    .await
    .unwrap();

  let failure = report.get(tool).unwrap().failure.clone().unwrap();
  assert_eq!(failure.kind, FailureKind::FinderError);
  assert!(failure.message.contains("lookup of tool crashed"));
  assert_eq!(report.state(app), Some(TargetState::Failed));
}

#[tokio::test]
async fn dry_run_skips_builders() {
  let mut registry = Registry::new();
  let builder = recording(&mut registry, RecordingBuilder::new());
  let app = executable(&mut registry, "app", &[]);
  let engine = Engine::new(graph(registry), EngineConfig::default().with_dry_run(true));

  let report = engine.run(&[app]).await.unwrap();

  assert_eq!(report.state(app), Some(TargetState::Built));
  assert_eq!(builder.count("app"), 0);
}

#[tokio::test]
#[traced_test]
async fn propagated_failures_are_logged() {
  let mut registry = Registry::new();
  recording(&mut registry, RecordingBuilder::new().failing("base"));
  let base = library(&mut registry, "base", &[]);
  let app = executable(&mut registry, "app", &[base]);
  let engine = Engine::new(graph(registry), EngineConfig::default());

  engine.run(&[app]).await.unwrap();

  assert!(logs_contain("skipping target due to failed dependency"));
  assert!(logs_contain("build finished"));
}

#[tokio::test]
async fn report_serializes_to_json() {
  let mut registry = Registry::new();
  recording(&mut registry, RecordingBuilder::new().failing("app"));
  let app = executable(&mut registry, "app", &[]);
  let engine = Engine::new(graph(registry), EngineConfig::default());

  let report = engine.run(&[app]).await.unwrap();
  let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();

  assert_eq!(json["targets"][0]["label"], "executable::app");
  assert_eq!(json["targets"][0]["state"], "failed");
  assert_eq!(json["targets"][0]["failure"]["kind"]["type"], "builder_failure");
}
