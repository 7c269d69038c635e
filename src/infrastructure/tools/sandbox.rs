//! # Platform Sandbox
//!
//! Builds the argv prefix that isolates a command under `full-auto`: Seatbelt on macOS, a
//! throwaway container on Linux. Any other platform has no sandbox and execution is refused.

use std::path::{Path, PathBuf};

use crate::domain::config::SandboxConfig;
use crate::domain::errors::ExecError;

const SANDBOX_EXEC: &str = "/usr/bin/sandbox-exec";

/// Reads are allowed everywhere; writes only under the `WRITABLE_ROOT_n` params; no network.
const SEATBELT_BASE_POLICY: &str = r#"(version 1)
(deny default)
(allow file-read*)
(allow process-exec)
(allow process-fork)
(allow signal (target self))
(allow sysctl-read)
(allow file-write-data
  (require-all
    (path "/dev/null")
    (vnode-type CHARACTER-DEVICE)))
"#;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SandboxKind {
    MacosSeatbelt,
    LinuxContainer { script: PathBuf, image: String },
    Unavailable,
}

impl SandboxKind {
    /// Picks the sandbox for the host this binary runs on.
    pub fn detect(config: &SandboxConfig) -> Self {
        if cfg!(target_os = "macos") && Path::new(SANDBOX_EXEC).exists() {
            SandboxKind::MacosSeatbelt
        } else if cfg!(target_os = "linux") {
            SandboxKind::LinuxContainer {
                script: config.container_script.clone(),
                image: config.container_image.clone(),
            }
        } else {
            SandboxKind::Unavailable
        }
    }

    /// Returns the full argv that runs `command` inside the sandbox. Writes are granted to
    /// `root` and `writable_roots`; `workdir` must lie under one of them.
    pub fn wrap(
        &self,
        command: &[String],
        root: &Path,
        workdir: &Path,
        writable_roots: &[PathBuf],
    ) -> Result<Vec<String>, ExecError> {
        if command.is_empty() {
            return Err(ExecError::EmptyCommand);
        }
        let inside =
            workdir.starts_with(root) || writable_roots.iter().any(|r| workdir.starts_with(r));
        if !inside {
            return Err(ExecError::OutsideSandbox(workdir.to_path_buf()));
        }

        match self {
            SandboxKind::MacosSeatbelt => {
                let mut roots = vec![root.to_path_buf()];
                roots.extend(writable_roots.iter().cloned());
                roots.push(std::env::temp_dir());

                let mut argv = vec![
                    SANDBOX_EXEC.to_string(),
                    "-p".to_string(),
                    seatbelt_policy(roots.len()),
                ];
                for (index, root) in roots.iter().enumerate() {
                    argv.push(format!("-DWRITABLE_ROOT_{index}={}", root.display()));
                }
                argv.push("--".to_string());
                argv.extend(command.iter().cloned());
                Ok(argv)
            }
            SandboxKind::LinuxContainer { script, image } => {
                if !script.exists() {
                    tracing::warn!(script = %script.display(), "container wrapper script is missing");
                    return Err(ExecError::SandboxUnavailable);
                }
                let mut argv = vec![
                    script.display().to_string(),
                    "--image".to_string(),
                    image.clone(),
                    "--root".to_string(),
                    root.display().to_string(),
                    "--workdir".to_string(),
                    workdir.display().to_string(),
                ];
                for root in writable_roots {
                    argv.push("--mount".to_string());
                    argv.push(root.display().to_string());
                }
                argv.push("--".to_string());
                argv.extend(command.iter().cloned());
                Ok(argv)
            }
            SandboxKind::Unavailable => Err(ExecError::SandboxUnavailable),
        }
    }
}

fn seatbelt_policy(root_count: usize) -> String {
    let subpaths: Vec<String> = (0..root_count)
        .map(|index| format!("(subpath (param \"WRITABLE_ROOT_{index}\"))"))
        .collect();
    format!(
        "{SEATBELT_BASE_POLICY}(allow file-write*\n  {})\n",
        subpaths.join("\n  ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cmd(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_seatbelt_prefixes_policy_and_roots() {
        let argv = SandboxKind::MacosSeatbelt
            .wrap(
                &cmd(&["ls", "-la"]),
                Path::new("/work"),
                Path::new("/work/sub"),
                &[PathBuf::from("/cache")],
            )
            .unwrap();

        assert_eq!(argv[0], SANDBOX_EXEC);
        assert_eq!(argv[1], "-p");
        assert!(argv[2].contains("(deny default)"));
        assert!(argv[2].contains("WRITABLE_ROOT_2"));
        assert_eq!(argv[3], "-DWRITABLE_ROOT_0=/work");
        assert_eq!(argv[4], "-DWRITABLE_ROOT_1=/cache");
        let sep = argv.iter().position(|a| a == "--").unwrap();
        assert_eq!(&argv[sep + 1..], &cmd(&["ls", "-la"])[..]);
    }

    #[test]
    fn test_container_wraps_with_script() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("run_in_container.sh");
        std::fs::write(&script, "#!/bin/sh\n").unwrap();

        let kind = SandboxKind::LinuxContainer {
            script: script.clone(),
            image: "debian:bookworm-slim".into(),
        };
        let argv = kind
            .wrap(
                &cmd(&["cargo", "test"]),
                Path::new("/work"),
                Path::new("/work/crate"),
                &[],
            )
            .unwrap();
        assert_eq!(argv[0], script.display().to_string());
        assert_eq!(
            &argv[1..],
            &cmd(&[
                "--image",
                "debian:bookworm-slim",
                "--root",
                "/work",
                "--workdir",
                "/work/crate",
                "--",
                "cargo",
                "test"
            ])[..]
        );
    }

    #[test]
    fn test_missing_script_and_unavailable_fail_closed() {
        let kind = SandboxKind::LinuxContainer {
            script: PathBuf::from("/definitely/not/here.sh"),
            image: "x".into(),
        };
        assert!(matches!(
            kind.wrap(&cmd(&["ls"]), Path::new("/"), Path::new("/"), &[]),
            Err(ExecError::SandboxUnavailable)
        ));
        assert!(matches!(
            SandboxKind::Unavailable.wrap(&cmd(&["ls"]), Path::new("/"), Path::new("/"), &[]),
            Err(ExecError::SandboxUnavailable)
        ));
        assert!(matches!(
            SandboxKind::MacosSeatbelt.wrap(&[], Path::new("/"), Path::new("/"), &[]),
            Err(ExecError::EmptyCommand)
        ));
    }

    #[test]
    fn test_writable_roots_never_come_from_workdir() {
        let seatbelt = SandboxKind::MacosSeatbelt
            .wrap(&cmd(&["touch", "x"]), Path::new("/work"), Path::new("/work"), &[])
            .unwrap();
        assert!(seatbelt.iter().all(|a| a != "-DWRITABLE_ROOT_0=/"));

        for kind in [
            SandboxKind::MacosSeatbelt,
            SandboxKind::LinuxContainer {
                script: PathBuf::from("/bin/sh"),
                image: "x".into(),
            },
        ] {
            let err = kind
                .wrap(&cmd(&["touch", "/etc/x"]), Path::new("/work"), Path::new("/"), &[])
                .unwrap_err();
            assert!(matches!(err, ExecError::OutsideSandbox(dir) if dir == Path::new("/")));
        }
        assert!(
            SandboxKind::MacosSeatbelt
                .wrap(
                    &cmd(&["ls"]),
                    Path::new("/work"),
                    Path::new("/cache/x"),
                    &[PathBuf::from("/cache")],
                )
                .is_ok()
        );
    }
}
