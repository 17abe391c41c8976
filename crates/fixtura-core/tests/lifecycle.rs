//! Container and pod lifecycle against a scripted runtime

#![cfg(unix)]

mod common;

use async_trait::async_trait;
use common::FakeRuntime;
use fixtura_core::{
    ContainerSpec, ContainerState, ExecOutcome, PortPublish, ReadyCheck, Supervisor,
    SupervisorError, SupervisorScope, TcpSocketRead, VolumeMount,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;

fn alpine() -> ContainerSpec {
    ContainerSpec::new("docker.io", "library/alpine", "3.19")
}

fn command(args: &[&str]) -> Vec<String> {
    args.iter().map(|a| a.to_string()).collect()
}

struct NeverReady(Arc<AtomicUsize>);

#[async_trait]
impl ReadyCheck for NeverReady {
    async fn is_ready(&self) -> anyhow::Result<bool> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Ok(false)
    }
}

#[tokio::test]
async fn test_pod_end_to_end() {
    let runtime = FakeRuntime::new();
    let supervisor = Supervisor::open(runtime.config("e2e"), SupervisorScope::PerTest).unwrap();

    let pod = supervisor
        .create_pod(vec![PortPublish::tcp(18080, 80)])
        .await
        .unwrap();
    assert!(pod.name().starts_with("FIXTURA-POD-e2e-"));

    let web = pod
        .start(alpine().with_port(PortPublish::tcp(19090, 90)))
        .await
        .unwrap();
    let cache = pod.start(alpine()).await.unwrap();

    for container in [&web, &cache] {
        assert!(container.name().starts_with("FIXTURA-e2e-"));
        assert_eq!(container.pod_name(), Some(pod.name()));
        assert_eq!(container.state(), ContainerState::Running);
        assert!(runtime.is_running(container.name()));
    }
    assert_ne!(web.name(), cache.name());
    assert_eq!(pod.members().len(), 2);

    // Ports belong to the pod; members join it instead of publishing
    let creates = runtime.invocations_of("pod");
    assert!(creates.contains(&format!(
        "pod create --publish 18080:80/tcp --name {}",
        pod.name()
    )));
    for run in runtime.invocations_of("run") {
        assert!(run.contains(&format!("--pod {}", pod.name())));
        assert!(!run.contains("--publish"));
    }

    let records = supervisor.container_records().unwrap();
    assert_eq!(records.len(), 2);
    assert!(records
        .iter()
        .all(|r| r.pod_name.as_deref() == Some(pod.name())));

    pod.close().await.unwrap();

    assert!(supervisor.container_records().unwrap().is_empty());
    assert!(supervisor.pod_records().unwrap().is_empty());
    assert_eq!(web.state(), ContainerState::Removed);
    assert_eq!(cache.state(), ContainerState::Removed);
    assert!(!runtime.is_running(web.name()));
    assert!(supervisor.containers().is_empty());
    assert!(supervisor.pods().is_empty());

    // One forced removal of the whole pod, nothing per container
    assert_eq!(
        runtime
            .invocations()
            .iter()
            .filter(|line| line.starts_with("pod rm") || line.starts_with("rm "))
            .count(),
        1
    );
    assert!(matches!(
        pod.start(alpine()).await,
        Err(SupervisorError::PodNotFound(_))
    ));

    supervisor.close().await.unwrap();
}

#[tokio::test]
async fn test_standalone_container_operations() {
    let runtime = FakeRuntime::new();
    let supervisor = Supervisor::open(runtime.config("ops"), SupervisorScope::PerTest).unwrap();

    let host_dir = runtime.temp_path("data");
    std::fs::create_dir_all(&host_dir).unwrap();
    let container = supervisor
        .start(
            alpine()
                .with_env("MODE", "test")
                .with_volume(VolumeMount::new(&host_dir, "/data"))
                .with_port(PortPublish::tcp(15432, 5432))
                .with_argument("--verbose"),
        )
        .await
        .unwrap();

    let run = &runtime.invocations_of("run")[0];
    assert_eq!(
        run,
        &format!(
            "run --interactive --tty --env MODE=test --volume {}:/data --publish 15432:5432/tcp --name {} docker.io/library/alpine:3.19 --verbose",
            host_dir.display(),
            container.name()
        )
    );
    assert!(container.pid().await.is_some());

    // exec returns the exit code of the command
    let outcome = container
        .exec(&command(&["sh", "-c", "exit 7"]), Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(outcome, ExecOutcome::Exited(7));
    assert_eq!(container.state(), ContainerState::Running);

    // a timeout is an unknown outcome, not an error
    let started = Instant::now();
    let outcome = container
        .exec(&command(&["sleep", "5"]), Duration::from_millis(200))
        .await
        .unwrap();
    assert_eq!(outcome, ExecOutcome::TimedOut);
    assert!(started.elapsed() < Duration::from_secs(2));

    let outcome = container
        .exec_indefinitely(&command(&["true"]))
        .await
        .unwrap();
    assert!(outcome.is_success());

    // copy in and back out again
    let source = runtime.temp_path("init.sql");
    std::fs::write(&source, "select 1;").unwrap();
    container.copy_into(&source, "/init/init.sql").await.unwrap();
    assert_eq!(
        std::fs::read_to_string(runtime.container_path("/init/init.sql")).unwrap(),
        "select 1;"
    );
    let copied = runtime.temp_path("copied.sql");
    container.copy_from("/init/init.sql", &copied).await.unwrap();
    assert_eq!(std::fs::read_to_string(&copied).unwrap(), "select 1;");

    // a failing copy names the command and exit code
    runtime.mark("fail-cp");
    match container.copy_into(&source, "/x").await {
        Err(SupervisorError::NonZeroExit { command, code }) => {
            assert_eq!(code, Some(125));
            assert!(command.contains(&format!("cp {} {}:/x", source.display(), container.name())));
        }
        other => panic!("expected NonZeroExit, got {:?}", other),
    }
    assert_eq!(container.state(), ContainerState::Running);

    supervisor.close().await.unwrap();
    assert_eq!(container.state(), ContainerState::Removed);
    assert!(!runtime.is_running(container.name()));
}

#[tokio::test]
async fn test_stop_and_restart() {
    let runtime = FakeRuntime::new();
    let supervisor =
        Supervisor::open(runtime.config("restart"), SupervisorScope::PerTest).unwrap();

    let container = supervisor.start(alpine()).await.unwrap();
    let first_pid = container.pid().await;

    container.stop().await.unwrap();
    assert_eq!(container.state(), ContainerState::Stopped);
    assert!(supervisor.container_records().unwrap().is_empty());
    assert!(runtime
        .invocations()
        .contains(&format!("stop --ignore --time 1 {}", container.name())));

    // exec is refused while stopped
    assert!(matches!(
        container.exec(&command(&["true"]), Duration::from_secs(1)).await,
        Err(SupervisorError::InvalidState { .. })
    ));

    container.start().await.unwrap();
    assert_eq!(container.state(), ContainerState::Running);
    assert_ne!(container.pid().await, first_pid);
    assert_eq!(supervisor.container_records().unwrap().len(), 1);
    assert!(runtime
        .invocations()
        .contains(&format!("start --interactive --attach {}", container.name())));

    supervisor.close().await.unwrap();
    assert!(!runtime.is_running(container.name()));
}

#[tokio::test]
async fn test_readiness_timeout_is_enforced() {
    let runtime = FakeRuntime::new();
    let deadline = Duration::from_millis(1000);
    let config = runtime.config("timeout").with_startup_wait(deadline);
    let supervisor = Supervisor::open(config, SupervisorScope::PerTest).unwrap();

    let checks = Arc::new(AtomicUsize::new(0));
    let started = Instant::now();
    let err = supervisor
        .start(alpine().with_ready_check(NeverReady(checks.clone())))
        .await
        .unwrap_err();
    let elapsed = started.elapsed();

    assert!(elapsed >= deadline, "failed early: {:?}", elapsed);
    assert!(elapsed < deadline + Duration::from_millis(1500), "failed late: {:?}", elapsed);
    assert!(err.is_timeout());
    match &err {
        SupervisorError::ReadinessTimeout { command, .. } => {
            assert!(command.contains(" run --interactive --tty "));
        }
        other => panic!("expected ReadinessTimeout, got {:?}", other),
    }
    assert!(checks.load(Ordering::SeqCst) > 0);

    // Left in place for inspection
    let containers = supervisor.containers();
    assert_eq!(containers.len(), 1);
    assert_eq!(containers[0].state(), ContainerState::Error);
    assert!(runtime.is_running(containers[0].name()));
    assert_eq!(supervisor.container_records().unwrap().len(), 1);

    // Polling stopped with the deadline
    let after = checks.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(checks.load(Ordering::SeqCst), after);

    supervisor.close().await.unwrap();
    assert!(!runtime.is_running(containers[0].name()));
}

#[tokio::test]
async fn test_liveness_timeout_when_never_up() {
    let runtime = FakeRuntime::new();
    runtime.mark("never-up");
    let config = runtime
        .config("neverup")
        .with_startup_wait(Duration::from_millis(600));
    let supervisor = Supervisor::open(config, SupervisorScope::PerTest).unwrap();

    let err = supervisor.start(alpine()).await.unwrap_err();
    assert!(err.is_timeout());
    assert!(runtime.invocations_of("ps").len() > 1);

    supervisor.close().await.unwrap();
}

#[tokio::test]
async fn test_process_exit_before_ready() {
    let runtime = FakeRuntime::new();
    runtime.mark("exit-on-run");
    let supervisor = Supervisor::open(runtime.config("exits"), SupervisorScope::PerTest).unwrap();

    let started = Instant::now();
    let err = supervisor.start(alpine()).await.unwrap_err();
    assert!(started.elapsed() < Duration::from_secs(5));
    match err {
        SupervisorError::ContainerExited { status, .. } => assert!(status.contains('3')),
        other => panic!("expected ContainerExited, got {:?}", other),
    }

    supervisor.close().await.unwrap();
    assert!(supervisor.is_closed());
}

#[tokio::test]
async fn test_tcp_ready_check_gates_start() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let accepted = Arc::new(AtomicUsize::new(0));
    let counter = accepted.clone();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            // Silent for the first two connections, then greet
            if counter.fetch_add(1, Ordering::SeqCst) >= 2 {
                let _ = socket.write_all(b"220 ready\r\n").await;
            }
        }
    });

    let runtime = FakeRuntime::new();
    let supervisor = Supervisor::open(runtime.config("tcp"), SupervisorScope::PerTest).unwrap();
    let check = TcpSocketRead::new("127.0.0.1", port).with_attempt_timeout(Duration::from_millis(100));

    let container = supervisor
        .start(alpine().with_ready_check(check))
        .await
        .unwrap();
    assert_eq!(container.state(), ContainerState::Running);
    assert!(accepted.load(Ordering::SeqCst) >= 3);

    supervisor.close().await.unwrap();
}

#[tokio::test]
async fn test_concurrent_starts_share_one_supervisor() {
    let runtime = FakeRuntime::new();
    let supervisor = Supervisor::open(runtime.config("many"), SupervisorScope::PerSuite).unwrap();

    let starts = (0..4).map(|_| supervisor.start(alpine()));
    let containers: Vec<_> = futures::future::join_all(starts)
        .await
        .into_iter()
        .collect::<Result<_, _>>()
        .unwrap();

    let mut names: Vec<_> = containers.iter().map(|c| c.name().to_string()).collect();
    names.sort();
    names.dedup();
    assert_eq!(names.len(), 4);
    assert_eq!(supervisor.containers().len(), 4);
    assert_eq!(supervisor.container_records().unwrap().len(), 4);

    supervisor.close().await.unwrap();
    for container in &containers {
        assert_eq!(container.state(), ContainerState::Removed);
        assert!(!runtime.is_running(container.name()));
    }
}
