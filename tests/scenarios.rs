//! End-to-end scenarios driven through the public `Supervisor` API and a
//! real YAML file on disk, exercising the full stack: loader, spawn
//! adapter, lifecycle manager, probe monitor, and event forwarding.

use std::io::{Seek, SeekFrom, Write};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use procwarden::config::loader::YamlConfigLoader;
use procwarden::config::ConfigLoader;
use procwarden::event::{Event, EventKind};
use procwarden::probe::factory::DefaultProberFactory;
use procwarden::process::spawn::StdSpawnAdapter;
use procwarden::stats::StatsSnapshot;
use procwarden::supervisor::{Supervisor, SupervisorState};

fn config_file(yaml: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, "{yaml}").unwrap();
    file
}

fn overwrite(file: &mut tempfile::NamedTempFile, yaml: &str) {
    file.as_file_mut().set_len(0).unwrap();
    file.as_file_mut().seek(SeekFrom::Start(0)).unwrap();
    write!(file, "{yaml}").unwrap();
    file.as_file().sync_all().unwrap();
}

fn poll_until(mut predicate: impl FnMut() -> bool, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if predicate() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    predicate()
}

#[test]
fn happy_start_and_stop_reports_one_start_and_one_stop() {
    let file = config_file(
        r#"
version: "1"
services:
  - name: echo
    command: /bin/echo
    args: ["hello"]
    oneshot: true
    restart:
      policy: never
"#,
    );

    let loader = YamlConfigLoader::new();
    let config = loader.load(file.path()).unwrap();
    let supervisor = Supervisor::new(
        config,
        file.path().to_path_buf(),
        Arc::new(loader),
        Arc::new(StdSpawnAdapter::new()),
        None,
    );

    let events: Arc<Mutex<Vec<Event>>> = Arc::new(Mutex::new(Vec::new()));
    let recorded = events.clone();
    supervisor.set_event_handler(move |_name, event, _stats| {
        recorded.lock().unwrap().push(event.clone());
    });

    supervisor.start().unwrap();
    assert!(poll_until(
        || supervisor.stats("echo").map(|s| s.stop_count == 1).unwrap_or(false),
        Duration::from_secs(2)
    ));

    let seen = events.lock().unwrap();
    let kinds: Vec<_> = seen.iter().map(|e| e.kind.clone()).collect();
    assert_eq!(kinds, vec![EventKind::Started, EventKind::Stopped]);
    assert_eq!(seen[1].exit_code, Some(0));

    let snapshot: StatsSnapshot = supervisor.stats("echo").unwrap();
    assert_eq!(snapshot, StatsSnapshot { start_count: 1, stop_count: 1, fail_count: 0, restart_count: 0 });

    supervisor.stop().unwrap();
    assert_eq!(supervisor.state(), SupervisorState::Stopped);
}

#[test]
fn reload_adds_removes_and_updates_services_through_a_config_file() {
    let mut file = config_file(
        r#"
version: "1"
services:
  - name: a
    command: /bin/sh
    args: ["-c", "trap 'exit 0' TERM; while true; do sleep 1; done"]
    stop_timeout: 2s
  - name: b
    command: /bin/sh
    args: ["-c", "trap 'exit 0' TERM; while true; do sleep 1; done"]
    stop_timeout: 2s
"#,
    );

    let loader = YamlConfigLoader::new();
    let config = loader.load(file.path()).unwrap();
    let supervisor = Supervisor::new(
        config,
        file.path().to_path_buf(),
        Arc::new(loader),
        Arc::new(StdSpawnAdapter::new()),
        None,
    );

    supervisor.start().unwrap();
    assert_eq!(supervisor.services().len(), 2);

    overwrite(
        &mut file,
        r#"
version: "1"
services:
  - name: a
    command: /bin/echo
    args: ["updated"]
    stop_timeout: 2s
  - name: c
    command: /bin/sh
    args: ["-c", "trap 'exit 0' TERM; while true; do sleep 1; done"]
    stop_timeout: 2s
"#,
    );

    supervisor.reload().unwrap();

    let services = supervisor.services();
    assert_eq!(services.len(), 2);
    assert!(services.contains_key("a"));
    assert!(services.contains_key("c"));
    assert!(!services.contains_key("b"));

    assert_eq!(supervisor.stats("a").unwrap().start_count, 2);

    supervisor.stop().unwrap();
}

#[test]
fn shutdown_under_active_probing_returns_promptly() {
    let file = config_file(
        r#"
version: "1"
services:
  - name: web
    command: /bin/sh
    args: ["-c", "trap 'exit 0' TERM; while true; do sleep 1; done"]
    stop_timeout: 1s
    listeners:
      - name: http
        protocol: tcp
        port: 18765
        probe:
          type: tcp
          timeout: 50ms
          interval: 20ms
          success_threshold: 1
          failure_threshold: 3
"#,
    );

    let loader = YamlConfigLoader::new();
    let config = loader.load(file.path()).unwrap();
    let supervisor = Supervisor::new(
        config,
        file.path().to_path_buf(),
        Arc::new(loader),
        Arc::new(StdSpawnAdapter::new()),
        None,
    );
    supervisor.set_prober_factory(Arc::new(DefaultProberFactory));

    supervisor.start().unwrap();
    // Let the probe monitor run a few ticks against the never-opened port.
    std::thread::sleep(Duration::from_millis(100));

    let started = Instant::now();
    supervisor.stop().unwrap();
    assert!(started.elapsed() < Duration::from_millis(900), "stop() should return promptly even under active probing");
    assert_eq!(supervisor.state(), SupervisorState::Stopped);
}
