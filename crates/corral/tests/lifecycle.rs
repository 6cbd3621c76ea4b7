//! Lifecycle tests against a scripted stand-in for the monitor.
//!
//! The stand-in fakes what the engine and the init shim do: it starts a
//! process whose command line is the shim's, reports it in
//! `monitor.state`, writes the container ID into the sync FIFO, and then
//! replaces the shim with a "user" process that ignores SIGUSR1.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use corral::exec::Signal;
use corral::runtime::{CONFIG_FILE_ANNOTATION, ContainerConfig, Runtime, RuntimeConfig};
use corral_common::{ContainerId, CorralError};
use corral_oci::runtime::{Process, Root};
use corral_oci::{ContainerStatus, Spec};
use tempfile::TempDir;

const FAKE_MONITOR: &str = r#"#!/bin/bash
set -u
export PATH=${PATH:-/usr/bin:/bin}
id=$1
rundir=$PWD
scratch=$(mktemp -d)
trap 'rm -rf "$scratch"' EXIT

report() {
    { echo "$*" > "$rundir/.state.tmp" && mv "$rundir/.state.tmp" "$rundir/monitor.state"; } 2>/dev/null
}

mkfifo "$scratch/$id"
(cd "$scratch" && exec -a /.corral/init cat "$id" > /dev/null) &
init=$!
# Like the engine, report the init process only once it runs the shim.
until [ "$(tr '\0' ' ' < "/proc/$init/cmdline")" = "/.corral/init $id " ]; do
    sleep 0.01
done
report RUNNING "$init"

printf %s "$id" > "$rundir/syncfifo" &
handshake=$!
wait -n
if kill -0 "$handshake" 2>/dev/null; then
    kill "$handshake" 2>/dev/null
    report STOPPED
    exit 0
fi

bash -c 'trap "" USR1; while :; do sleep 0.1; done' &
user=$!
report RUNNING "$user"
kill "$init" 2>/dev/null
wait "$user"
report STOPPED
"#;

const CRASHING_MONITOR: &str = "#!/bin/bash\nexit 3\n";

const HANGING_MONITOR: &str = "#!/bin/bash\nsleep 2\n";

/// Reports that setup began, then never gets anywhere.
const STARTING_MONITOR: &str = "#!/bin/bash\necho STARTING > \"$PWD/monitor.state\"\nexec sleep 30\n";

struct Env {
    dir: TempDir,
    runtime: Runtime,
}

impl Env {
    /// Returns `None` if the host has no bash to run the stand-in.
    fn new(monitor: &str) -> Option<Self> {
        if !Path::new("/bin/bash").exists() {
            eprintln!("skipping: /bin/bash not found");
            return None;
        }
        let dir = tempfile::tempdir().unwrap();
        let libexec = dir.path().join("libexec");
        std::fs::create_dir(&libexec).unwrap();
        for (name, content) in [
            ("corral-monitor", monitor),
            ("corral-init", "#!/bin/sh\n"),
            ("corral-hook", "#!/bin/sh\n"),
        ] {
            let path = libexec.join(name);
            std::fs::write(&path, content).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        }
        std::fs::create_dir_all(dir.path().join("bundle/rootfs")).unwrap();

        let config = RuntimeConfig::default()
            .with_root(dir.path().join("run"))
            .with_libexec(libexec)
            .with_cgroup_root(dir.path().join("cgroup"));
        let runtime = Runtime::new(config);
        Some(Self { dir, runtime })
    }

    fn bundle(&self) -> PathBuf {
        self.dir.path().join("bundle")
    }

    fn config(&self, id: &str) -> ContainerConfig {
        let mut spec = Spec {
            root: Some(Root {
                path: PathBuf::from("rootfs"),
                readonly: false,
            }),
            process: Some(Process {
                args: vec!["/bin/sleep".to_string(), "1000".to_string()],
                env: vec!["PATH=/usr/bin:/bin".to_string()],
                ..Process::default()
            }),
            hostname: Some(id.to_string()),
            ..Spec::default()
        };
        spec.annotations.insert("io.example.owner".to_string(), "tests".to_string());
        ContainerConfig::new(ContainerId::new(id).unwrap(), spec, self.bundle())
            .with_pid_file(Some(self.dir.path().join(format!("{id}.pid"))))
    }
}

async fn wait_for_status(runtime: &Runtime, id: &ContainerId, status: ContainerStatus) {
    for _ in 0..200 {
        if runtime.state(id).unwrap().status == status {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("container {id} never became {status}");
}

#[test_log::test(tokio::test)]
async fn full_lifecycle() {
    let Some(env) = Env::new(FAKE_MONITOR) else {
        return;
    };
    let rt = &env.runtime;
    let id = ContainerId::new("web").unwrap();

    let container = rt.create(env.config("web"), Duration::from_secs(10)).await.unwrap();
    assert_eq!(container.status().unwrap(), ContainerStatus::Created);

    let pid_file = std::fs::read_to_string(env.dir.path().join("web.pid")).unwrap();
    assert_eq!(pid_file, container.descriptor().monitor_pid.to_string());

    let state = rt.state(&id).unwrap();
    assert_eq!(state.status, ContainerStatus::Created);
    assert_eq!(state.bundle, env.bundle());
    assert!(state.pid.is_some());
    assert_eq!(state.annotations["io.example.owner"], "tests");
    assert!(state.annotations[CONFIG_FILE_ANNOTATION].ends_with("run/web/config"));
    assert_eq!(rt.list().unwrap(), [id.clone()]);

    // A second create with the same ID must not disturb the first.
    let err = rt.create(env.config("web"), Duration::from_secs(10)).await.unwrap_err();
    assert!(matches!(err, CorralError::AlreadyExists { .. }));

    let container = rt.load(&id).unwrap();
    rt.start(&container, Duration::from_secs(10)).await.unwrap();
    assert_eq!(container.status().unwrap(), ContainerStatus::Running);
    assert!(!rt.paths().sync_fifo("web").exists());

    let err = rt.start(&container, Duration::from_secs(1)).await.unwrap_err();
    assert!(matches!(err, CorralError::InvalidState { .. }));

    rt.kill(&container, "SIGUSR1".parse().unwrap(), Duration::from_secs(5))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(container.status().unwrap(), ContainerStatus::Running);

    let err = rt.delete(&id, false, Duration::from_secs(5)).await.unwrap_err();
    assert!(matches!(err, CorralError::InvalidState { .. }));

    rt.delete(&id, true, Duration::from_secs(10)).await.unwrap();
    assert!(matches!(rt.load(&id).unwrap_err(), CorralError::NotExist { .. }));
    assert!(rt.list().unwrap().is_empty());
}

#[test_log::test(tokio::test)]
async fn kill_stopped_container_is_invalid() {
    let Some(env) = Env::new(FAKE_MONITOR) else {
        return;
    };
    let rt = &env.runtime;
    let id = ContainerId::new("batch").unwrap();

    let container = rt.create(env.config("batch"), Duration::from_secs(10)).await.unwrap();
    rt.start(&container, Duration::from_secs(10)).await.unwrap();

    rt.kill(&container, Signal::KILL, Duration::from_secs(5)).await.unwrap();
    wait_for_status(rt, &id, ContainerStatus::Stopped).await;

    let err = rt.kill(&container, Signal::TERM, Duration::from_secs(5)).await.unwrap_err();
    assert!(matches!(err, CorralError::InvalidState { .. }));

    rt.delete(&id, false, Duration::from_secs(5)).await.unwrap();
    assert!(!rt.paths().container("batch").exists());
}

#[test_log::test(tokio::test)]
async fn created_container_can_be_force_deleted() {
    let Some(env) = Env::new(FAKE_MONITOR) else {
        return;
    };
    let rt = &env.runtime;
    let id = ContainerId::new("idle").unwrap();

    rt.create(env.config("idle"), Duration::from_secs(10)).await.unwrap();
    rt.delete(&id, true, Duration::from_secs(10)).await.unwrap();
    assert!(!rt.paths().container("idle").exists());

    // Deleting twice is fine.
    rt.delete(&id, true, Duration::from_secs(10)).await.unwrap();
}

#[test_log::test(tokio::test)]
async fn monitor_crash_fails_create_promptly() {
    let Some(env) = Env::new(CRASHING_MONITOR) else {
        return;
    };
    let started = std::time::Instant::now();
    let err = env
        .runtime
        .create(env.config("crash"), Duration::from_secs(30))
        .await
        .unwrap_err();
    assert!(matches!(err, CorralError::Configuration { .. }), "{err}");
    assert!(started.elapsed() < Duration::from_secs(10));

    let id = ContainerId::new("crash").unwrap();
    env.runtime.delete(&id, true, Duration::from_secs(5)).await.unwrap();
    assert!(!env.runtime.paths().container("crash").exists());
}

#[test_log::test(tokio::test)]
async fn create_times_out_and_leaves_deletable_state() {
    let Some(env) = Env::new(HANGING_MONITOR) else {
        return;
    };
    let err = env
        .runtime
        .create(env.config("slow"), Duration::from_millis(500))
        .await
        .unwrap_err();
    assert!(matches!(err, CorralError::Timeout { .. }), "{err}");
    assert!(env.runtime.paths().descriptor("slow").exists());

    let id = ContainerId::new("slow").unwrap();
    env.runtime.delete(&id, true, Duration::from_secs(5)).await.unwrap();
    assert!(!env.runtime.paths().container("slow").exists());
}

#[test_log::test(tokio::test)]
async fn unfinished_create_can_be_force_deleted() {
    let Some(env) = Env::new(STARTING_MONITOR) else {
        return;
    };
    let rt = &env.runtime;
    let id = ContainerId::new("stuck").unwrap();

    let err = rt
        .create(env.config("stuck"), Duration::from_millis(700))
        .await
        .unwrap_err();
    assert!(matches!(err, CorralError::Timeout { .. }), "{err}");
    assert_eq!(rt.state(&id).unwrap().status, ContainerStatus::Creating);

    let err = rt.delete(&id, false, Duration::from_secs(3)).await.unwrap_err();
    assert!(matches!(err, CorralError::InvalidState { .. }));

    let started = std::time::Instant::now();
    rt.delete(&id, true, Duration::from_secs(3)).await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(3));
    assert!(!rt.paths().container("stuck").exists());
    assert!(matches!(rt.load(&id).unwrap_err(), CorralError::NotExist { .. }));
}
