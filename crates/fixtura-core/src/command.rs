//! Runtime CLI argument vectors
//!
//! The exact flags emitted here are the compatibility surface with the
//! container runtime. Vectors exclude the executable itself; the launcher
//! prepends it.

use std::path::Path;

use crate::spec::{ContainerSpec, PortPublish};
use crate::UP_STATUS_PREFIX;

/// `run --interactive --tty [--env K=V]* [--volume H:C]* (--pod P | [--publish S]*) --name N IMAGE ARGS...`
///
/// Environment variables come out in key order. Containers joined to a pod
/// never publish ports of their own; ports belong to the pod.
pub fn run_arguments(name: &str, spec: &ContainerSpec, pod: Option<&str>) -> Vec<String> {
    let mut args = vec![
        "run".to_string(),
        "--interactive".to_string(),
        "--tty".to_string(),
    ];

    for (key, value) in &spec.environment {
        args.push("--env".to_string());
        args.push(format!("{}={}", key, value));
    }

    for mount in &spec.volume_mounts {
        args.push("--volume".to_string());
        args.push(mount.to_argument());
    }

    match pod {
        Some(pod) => {
            args.push("--pod".to_string());
            args.push(pod.to_string());
        }
        None => {
            for port in &spec.ports {
                args.push("--publish".to_string());
                args.push(port.to_argument());
            }
        }
    }

    args.push("--name".to_string());
    args.push(name.to_string());
    args.push(spec.full_image_name());
    args.extend(spec.arguments.iter().cloned());
    args
}

/// `start --interactive --attach NAME`
pub fn start_arguments(name: &str) -> Vec<String> {
    vec![
        "start".to_string(),
        "--interactive".to_string(),
        "--attach".to_string(),
        name.to_string(),
    ]
}

/// `stop --ignore --time 1 NAME`
pub fn stop_arguments(name: &str) -> Vec<String> {
    vec![
        "stop".to_string(),
        "--ignore".to_string(),
        "--time".to_string(),
        "1".to_string(),
        name.to_string(),
    ]
}

/// `rm -f --volumes --ignore NAME`
pub fn remove_arguments(name: &str) -> Vec<String> {
    vec![
        "rm".to_string(),
        "-f".to_string(),
        "--volumes".to_string(),
        "--ignore".to_string(),
        name.to_string(),
    ]
}

/// `ps --filter name=NAME --format {{.Status}}`
pub fn status_arguments(name: &str) -> Vec<String> {
    vec![
        "ps".to_string(),
        "--filter".to_string(),
        format!("name={}", name),
        "--format".to_string(),
        "{{.Status}}".to_string(),
    ]
}

/// True if a status line reports a running container (`Up 3 seconds`, ...)
pub fn is_up_status(status: &str) -> bool {
    status.to_uppercase().starts_with(UP_STATUS_PREFIX)
}

/// `pod create [--publish SPEC]* --name NAME`
pub fn pod_create_arguments(name: &str, ports: &[PortPublish]) -> Vec<String> {
    let mut args = vec!["pod".to_string(), "create".to_string()];
    for port in ports {
        args.push("--publish".to_string());
        args.push(port.to_argument());
    }
    args.push("--name".to_string());
    args.push(name.to_string());
    args
}

/// `pod rm -f NAME`
pub fn pod_remove_arguments(name: &str) -> Vec<String> {
    vec![
        "pod".to_string(),
        "rm".to_string(),
        "-f".to_string(),
        name.to_string(),
    ]
}

/// `exec NAME CMD ARGS...`
pub fn exec_arguments(name: &str, command: &[String]) -> Vec<String> {
    let mut args = vec!["exec".to_string(), name.to_string()];
    args.extend(command.iter().cloned());
    args
}

/// `cp HOST_PATH NAME:PATH`
pub fn copy_into_arguments(name: &str, source: &Path, destination: &str) -> Vec<String> {
    vec![
        "cp".to_string(),
        absolute(source),
        format!("{}:{}", name, destination),
    ]
}

/// `cp NAME:PATH HOST_PATH`
pub fn copy_from_arguments(name: &str, source: &str, destination: &Path) -> Vec<String> {
    vec![
        "cp".to_string(),
        format!("{}:{}", name, source),
        absolute(destination),
    ]
}

/// `version --format json`
pub fn version_arguments() -> Vec<String> {
    vec![
        "version".to_string(),
        "--format".to_string(),
        "json".to_string(),
    ]
}

fn absolute(path: &Path) -> String {
    if path.is_absolute() {
        path.display().to_string()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
            .display()
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::VolumeMount;
    use proptest::prelude::*;

    fn sample_spec() -> ContainerSpec {
        ContainerSpec::new("quay.io", "example/db", "16")
            .with_env("B_VAR", "2")
            .with_env("A_VAR", "1")
            .with_volume(VolumeMount::new("/srv/data", "/data"))
            .with_port(PortPublish::tcp(15432, 5432))
            .with_argument("--verbose")
    }

    #[test]
    fn test_run_standalone() {
        let args = run_arguments("FIXTURA-p-X", &sample_spec(), None);
        assert_eq!(
            args,
            vec![
                "run",
                "--interactive",
                "--tty",
                "--env",
                "A_VAR=1",
                "--env",
                "B_VAR=2",
                "--volume",
                "/srv/data:/data",
                "--publish",
                "15432:5432/tcp",
                "--name",
                "FIXTURA-p-X",
                "quay.io/example/db:16",
                "--verbose",
            ]
        );
    }

    #[test]
    fn test_run_in_pod_drops_ports() {
        let args = run_arguments("FIXTURA-p-X", &sample_spec(), Some("FIXTURA-POD-p-Y"));
        assert!(!args.iter().any(|a| a == "--publish"));
        let pod_at = args.iter().position(|a| a == "--pod").unwrap();
        assert_eq!(args[pod_at + 1], "FIXTURA-POD-p-Y");
        let name_at = args.iter().position(|a| a == "--name").unwrap();
        assert!(pod_at < name_at);
    }

    #[test]
    fn test_lifecycle_arguments() {
        assert_eq!(stop_arguments("c"), vec!["stop", "--ignore", "--time", "1", "c"]);
        assert_eq!(
            remove_arguments("c"),
            vec!["rm", "-f", "--volumes", "--ignore", "c"]
        );
        assert_eq!(
            status_arguments("c"),
            vec!["ps", "--filter", "name=c", "--format", "{{.Status}}"]
        );
        assert_eq!(
            start_arguments("c"),
            vec!["start", "--interactive", "--attach", "c"]
        );
    }

    #[test]
    fn test_pod_arguments() {
        assert_eq!(
            pod_create_arguments(
                "p",
                &[
                    PortPublish::tcp(8080, 80),
                    PortPublish::udp(53, 53).on_host_ip("127.0.0.1")
                ]
            ),
            vec![
                "pod",
                "create",
                "--publish",
                "8080:80/tcp",
                "--publish",
                "127.0.0.1:53:53/udp",
                "--name",
                "p"
            ]
        );
        assert_eq!(pod_remove_arguments("p"), vec!["pod", "rm", "-f", "p"]);
    }

    #[test]
    fn test_exec_and_copy_arguments() {
        let command = vec!["psql".to_string(), "-c".to_string(), "select 1".to_string()];
        assert_eq!(
            exec_arguments("c", &command),
            vec!["exec", "c", "psql", "-c", "select 1"]
        );
        assert_eq!(
            copy_into_arguments("c", Path::new("/tmp/a.sql"), "/init/a.sql"),
            vec!["cp", "/tmp/a.sql", "c:/init/a.sql"]
        );
        assert_eq!(
            copy_from_arguments("c", "/var/log/x", Path::new("/tmp/x")),
            vec!["cp", "c:/var/log/x", "/tmp/x"]
        );
    }

    #[test]
    fn test_up_status() {
        assert!(is_up_status("Up 3 seconds"));
        assert!(is_up_status("UP About a minute"));
        assert!(is_up_status("up 1 second (healthy)"));
        assert!(!is_up_status("Created"));
        assert!(!is_up_status("Exited (0) 2 seconds ago"));
        assert!(!is_up_status("Up"));
        assert!(!is_up_status(""));
    }

    proptest! {
        #[test]
        fn prop_env_emitted_in_key_order(
            env in proptest::collection::btree_map("[A-Z_]{1,8}", "[a-z0-9]{0,6}", 0..10)
        ) {
            let mut spec = ContainerSpec::new("", "alpine", "3");
            for (k, v) in env.iter().rev() {
                spec = spec.with_env(k.clone(), v.clone());
            }
            let args = run_arguments("n", &spec, None);
            let emitted: Vec<String> = args
                .windows(2)
                .filter(|w| w[0] == "--env")
                .map(|w| w[1].split_once('=').unwrap().0.to_string())
                .collect();
            let expected: Vec<String> = env.keys().cloned().collect();
            prop_assert_eq!(emitted, expected);
        }

        #[test]
        fn prop_pod_and_publish_are_exclusive(ports in proptest::collection::vec((1u16.., 1u16..), 0..5), in_pod in any::<bool>()) {
            let mut spec = ContainerSpec::new("", "alpine", "3");
            for (h, c) in &ports {
                spec = spec.with_port(PortPublish::tcp(*h, *c));
            }
            let args = run_arguments("n", &spec, if in_pod { Some("pod") } else { None });
            let has_pod = args.iter().any(|a| a == "--pod");
            let publishes = args.iter().filter(|a| *a == "--publish").count();
            prop_assert_eq!(has_pod, in_pod);
            if in_pod {
                prop_assert_eq!(publishes, 0);
            } else {
                prop_assert_eq!(publishes, ports.len());
            }
        }
    }
}
