//! Scripted stand-in for the container runtime.
//!
//! The script keeps its state in files: `<name>.pid` for a running
//! container, `<name>.pod` for pod membership, `<pod>.podfile` for a pod.
//! Marker files change its behaviour:
//!
//! - `fail-<pod>`: `pod rm` of that pod exits 1
//! - `fail-cp`: `cp` exits 125
//! - `never-up`: `ps` reports every container as `Created`
//! - `exit-on-run`: `run` exits 3 without starting anything
//! - `unsupported`: `version` exits 125
//!
//! Every invocation is appended to `invocations`.

#![allow(dead_code)]

use fixtura_core::SupervisorConfig;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;

const SCRIPT: &str = r#"#!/bin/sh
STATE="__STATE__"
echo "$*" >> "$STATE/invocations"
cmd="$1"
shift
last=""
for arg in "$@"; do last="$arg"; done

kill_container() {
  if [ -e "$STATE/$1.pid" ]; then
    kill "$(cat "$STATE/$1.pid")" 2>/dev/null
    rm -f "$STATE/$1.pid"
  fi
}

case "$cmd" in
  version)
    if [ -e "$STATE/unsupported" ]; then
      echo "runtime unavailable" >&2
      exit 125
    fi
    echo '{'
    echo '  "Client": { "APIVersion": "4.9.0", "Version": "4.9.0" }'
    echo '}'
    ;;
  run)
    name=""
    pod=""
    while [ $# -gt 0 ]; do
      case "$1" in
        --name) name="$2"; shift 2 ;;
        --pod) pod="$2"; shift 2 ;;
        --env|--volume|--publish) shift 2 ;;
        --interactive|--tty) shift ;;
        *) break ;;
      esac
    done
    if [ -e "$STATE/exit-on-run" ]; then
      echo "Error: image not known" >&2
      exit 3
    fi
    if [ -n "$pod" ]; then echo "$pod" > "$STATE/$name.pod"; fi
    echo $$ > "$STATE/$name.pid"
    exec sleep 30
    ;;
  start)
    echo $$ > "$STATE/$last.pid"
    exec sleep 30
    ;;
  ps)
    name="${2#name=}"
    if [ -e "$STATE/never-up" ]; then
      echo "Created"
    elif [ -e "$STATE/$name.pid" ]; then
      echo "Up 1 second"
    fi
    ;;
  stop)
    kill_container "$last"
    ;;
  rm)
    kill_container "$last"
    rm -f "$STATE/$last.pod"
    ;;
  pod)
    sub="$1"
    case "$sub" in
      create)
        touch "$STATE/$last.podfile"
        ;;
      rm)
        if [ -e "$STATE/fail-$last" ]; then
          echo "Error: cannot remove pod $last" >&2
          exit 1
        fi
        for f in "$STATE"/*.pod; do
          [ -e "$f" ] || continue
          if [ "$(cat "$f")" = "$last" ]; then
            kill_container "$(basename "$f" .pod)"
            rm -f "$f"
          fi
        done
        rm -f "$STATE/$last.podfile"
        ;;
    esac
    ;;
  exec)
    shift
    exec "$@"
    ;;
  cp)
    if [ -e "$STATE/fail-cp" ]; then
      echo "Error: no such container" >&2
      exit 125
    fi
    src="$1"
    dst="$2"
    case "$dst" in
      FIXTURA-*:*)
        path="$STATE/fs${dst#*:}"
        mkdir -p "$(dirname "$path")"
        cp "$src" "$path"
        ;;
      *)
        cp "$STATE/fs${src#*:}" "$dst"
        ;;
    esac
    ;;
esac
exit 0
"#;

/// A fake runtime executable plus a state directory for the store
pub struct FakeRuntime {
    dir: TempDir,
    executable: PathBuf,
    state: PathBuf,
}

impl FakeRuntime {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let state = dir.path().join("runtime");
        std::fs::create_dir_all(&state).unwrap();

        let executable = dir.path().join("fake-podman");
        let script = SCRIPT.replace("__STATE__", &state.display().to_string());
        std::fs::write(&executable, script).unwrap();
        std::fs::set_permissions(&executable, std::fs::Permissions::from_mode(0o755)).unwrap();

        let runtime = Self {
            dir,
            executable,
            state,
        };
        runtime.warm_up();
        runtime
    }

    // A concurrently forked test process may briefly hold the script open
    // for writing, which makes exec fail with ETXTBSY
    fn warm_up(&self) {
        for _ in 0..50 {
            match std::process::Command::new(&self.executable).arg("noop").status() {
                Ok(_) => break,
                Err(e) if e.raw_os_error() == Some(26) => {
                    std::thread::sleep(Duration::from_millis(20))
                }
                Err(e) => panic!("fake runtime unusable: {}", e),
            }
        }
        let _ = std::fs::remove_file(self.state.join("invocations"));
    }

    pub fn executable(&self) -> &Path {
        &self.executable
    }

    /// Configuration pointing at this runtime, with the store in the temp dir
    pub fn config(&self, project: &str) -> SupervisorConfig {
        SupervisorConfig::new(project)
            .with_executable(&self.executable)
            .with_state_directory(self.dir.path().join("stores"))
            .with_startup_wait(Duration::from_secs(5))
    }

    /// Create a marker file
    pub fn mark(&self, marker: &str) {
        std::fs::write(self.state.join(marker), b"").unwrap();
    }

    pub fn unmark(&self, marker: &str) {
        let _ = std::fs::remove_file(self.state.join(marker));
    }

    /// Every runtime invocation so far, one argument string per line
    pub fn invocations(&self) -> Vec<String> {
        std::fs::read_to_string(self.state.join("invocations"))
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    /// Invocations whose first word is `command`
    pub fn invocations_of(&self, command: &str) -> Vec<String> {
        self.invocations()
            .into_iter()
            .filter(|line| line.split(' ').next() == Some(command))
            .collect()
    }

    /// True while the fake considers `name` running
    pub fn is_running(&self, name: &str) -> bool {
        self.state.join(format!("{}.pid", name)).exists()
    }

    /// Path of a file "inside" a container
    pub fn container_path(&self, path: &str) -> PathBuf {
        self.state.join(format!("fs{}", path))
    }

    pub fn temp_path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }
}
