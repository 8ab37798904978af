//! `ClusterApi` over the kubectl binary.

use std::ffi::{OsStr, OsString};
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use keel_core::{ClusterConfig, ReadinessPredicate, ResourceKind};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::api::{ApplyMode, ClusterApi};
use crate::error::{ClusterError, ClusterResult};

/// Shells out to kubectl for every operation.
#[derive(Debug, Clone)]
pub struct Kubectl {
    program: String,
    context: Option<String>,
    kubeconfig: Option<PathBuf>,
}

impl Kubectl {
    pub fn new(program: &str) -> Self {
        Self {
            program: program.to_string(),
            context: None,
            kubeconfig: None,
        }
    }

    pub fn from_config(config: &ClusterConfig) -> Self {
        Self {
            program: config.kubectl.clone(),
            context: config.context.clone(),
            kubeconfig: config.kubeconfig.clone(),
        }
    }

    /// Global flags prepended to every invocation.
    fn global_args(&self) -> Vec<OsString> {
        let mut args = Vec::new();
        if let Some(context) = &self.context {
            args.push(OsString::from("--context"));
            args.push(OsString::from(context));
        }
        if let Some(kubeconfig) = &self.kubeconfig {
            args.push(OsString::from("--kubeconfig"));
            args.push(kubeconfig.as_os_str().to_os_string());
        }
        args
    }

    async fn run<I, S>(&self, args: I, stdin: Option<&[u8]>) -> ClusterResult<Vec<u8>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut argv = self.global_args();
        argv.extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        let rendered = render_command(&self.program, &argv);
        debug!(command = %rendered, "kubectl");

        let mut child = Command::new(&self.program)
            .args(&argv)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ClusterError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        // Feed stdin while draining stdout and stderr; a child that fills its
        // output pipe stops reading input.
        let pipe = child.stdin.take();
        let feed = async move {
            if let (Some(input), Some(mut pipe)) = (stdin, pipe) {
                pipe.write_all(input).await?;
                pipe.shutdown().await?;
            }
            Ok::<(), io::Error>(())
        };
        let (fed, output) = tokio::join!(feed, child.wait_with_output());

        let output = output.map_err(|source| ClusterError::Spawn {
            program: self.program.clone(),
            source,
        })?;
        match fed {
            Ok(()) => {}
            // The command exited without reading everything; its status says why.
            Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {
                debug!(command = %rendered, "stdin closed early by child");
            }
            Err(source) => {
                return Err(ClusterError::Spawn {
                    program: self.program.clone(),
                    source,
                });
            }
        }

        if output.status.success() {
            return Ok(output.stdout);
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if stderr.contains("NotFound") || stderr.contains("not found") {
            return Err(ClusterError::NotFound(stderr));
        }
        Err(ClusterError::Command {
            command: rendered,
            status: output.status.code(),
            stderr,
        })
    }

    async fn run_text<I, S>(&self, args: I) -> ClusterResult<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let out = self.run(args, None).await?;
        Ok(String::from_utf8_lossy(&out).into_owned())
    }
}

impl ClusterApi for Kubectl {
    async fn ping(&self) -> ClusterResult<()> {
        match self.run(["cluster-info"], None).await {
            Ok(_) => Ok(()),
            Err(ClusterError::Command { stderr, .. }) => Err(ClusterError::Unreachable(stderr)),
            Err(e) => Err(e),
        }
    }

    async fn namespace_exists(&self, namespace: &str) -> ClusterResult<bool> {
        match self.run(["get", "namespace", namespace], None).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn apply(&self, manifest: &Path, mode: ApplyMode) -> ClusterResult<()> {
        let mut args: Vec<OsString> = vec!["apply".into(), "-f".into(), manifest.into()];
        match mode {
            ApplyMode::Merge => {}
            ApplyMode::ForceReplace => args.push("--force".into()),
            ApplyMode::ServerDryRun => args.push("--dry-run=server".into()),
        }
        self.run(args, None).await.map(|_| ())
    }

    async fn get(&self, namespace: &str, kind: ResourceKind) -> ClusterResult<String> {
        self.run_text(["get", kind.as_str(), "-n", namespace, "-o", "yaml"])
            .await
    }

    async fn condition_met(
        &self,
        namespace: &str,
        predicate: &ReadinessPredicate,
    ) -> ClusterResult<bool> {
        let jsonpath = condition_jsonpath(&predicate.condition);
        let out = self
            .run_text([
                "get",
                predicate.kind.as_str(),
                "-n",
                namespace,
                "-l",
                predicate.selector.as_str(),
                jsonpath.as_str(),
            ])
            .await?;
        Ok(all_conditions_true(&out))
    }

    async fn exec(
        &self,
        namespace: &str,
        workload: &str,
        command: &[String],
        stdin: Option<&[u8]>,
    ) -> ClusterResult<Vec<u8>> {
        let mut args: Vec<OsString> = vec!["exec".into(), "-n".into(), namespace.into()];
        if stdin.is_some() {
            args.push("-i".into());
        }
        args.push(workload.into());
        args.push("--".into());
        args.extend(command.iter().map(OsString::from));
        self.run(args, stdin).await
    }

    async fn patch(
        &self,
        namespace: &str,
        resource: &str,
        partial: &serde_json::Value,
    ) -> ClusterResult<()> {
        let body = partial.to_string();
        self.run(
            [
                "patch",
                resource,
                "-n",
                namespace,
                "--type",
                "merge",
                "-p",
                body.as_str(),
            ],
            None,
        )
        .await
        .map(|_| ())
    }

    async fn status(&self, namespace: &str, kind: &str) -> ClusterResult<String> {
        self.run_text(["get", kind, "-n", namespace, "-o", "wide"]).await
    }
}

/// jsonpath printing one line per object with the status of `condition`.
fn condition_jsonpath(condition: &str) -> String {
    format!(
        "-o=jsonpath={{range .items[*]}}{{.status.conditions[?(@.type==\"{condition}\")].status}}{{\"\\n\"}}{{end}}"
    )
}

/// True only if there is at least one object and every one reports `True`.
fn all_conditions_true(output: &str) -> bool {
    let mut lines = output.lines().peekable();
    if lines.peek().is_none() {
        return false;
    }
    lines.all(|line| line.trim() == "True")
}

fn render_command(program: &str, args: &[OsString]) -> String {
    let mut rendered = program.to_string();
    for arg in args {
        rendered.push(' ');
        rendered.push_str(&arg.to_string_lossy());
    }
    rendered
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conditions_require_every_object_true() {
        assert!(all_conditions_true("True\nTrue\n"));
        assert!(!all_conditions_true("True\nFalse\n"));
        assert!(!all_conditions_true("True\n\n"));
        assert!(!all_conditions_true(""));
    }

    #[test]
    fn jsonpath_targets_condition_type() {
        let path = condition_jsonpath("Available");
        assert!(path.starts_with("-o=jsonpath={range .items[*]}"));
        assert!(path.contains("@.type==\"Available\""));
        assert!(path.ends_with("{end}"));
    }

    #[test]
    fn global_args_carry_context_and_kubeconfig() {
        let kubectl = Kubectl::from_config(&ClusterConfig {
            kubectl: "kubectl".into(),
            context: Some("prod".into()),
            kubeconfig: Some(PathBuf::from("/etc/kube/config")),
        });
        let rendered = render_command("kubectl", &kubectl.global_args());
        assert_eq!(rendered, "kubectl --context prod --kubeconfig /etc/kube/config");
    }

    #[cfg(unix)]
    fn fake_kubectl(dir: &Path, script: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join("kubectl");
        std::fs::write(&path, format!("#!/bin/sh\n{script}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn exec_streams_large_stdin_through_chatty_command() {
        let dir = tempfile::tempdir().unwrap();
        let program = fake_kubectl(dir.path(), "exec cat");
        let kubectl = Kubectl::new(program.to_str().unwrap());
        let input: Vec<u8> = (0..1024 * 1024).map(|i| (i % 251) as u8).collect();

        let out = tokio::time::timeout(
            std::time::Duration::from_secs(10),
            kubectl.exec("prod", "deployment/postgres", &["psql".into()], Some(&input)),
        )
        .await
        .expect("exec stalled")
        .unwrap();

        assert_eq!(out.len(), input.len());
        assert!(out == input);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn exec_reports_status_when_child_ignores_stdin() {
        let dir = tempfile::tempdir().unwrap();
        let program = fake_kubectl(dir.path(), "echo 'psql: connection refused' >&2; exit 2");
        let kubectl = Kubectl::new(program.to_str().unwrap());
        let input = vec![b'x'; 1024 * 1024];

        let err = kubectl
            .exec("prod", "deployment/postgres", &["psql".into()], Some(&input))
            .await
            .unwrap_err();

        match err {
            ClusterError::Command { status, stderr, .. } => {
                assert_eq!(status, Some(2));
                assert_eq!(stderr, "psql: connection refused");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn missing_binary_is_spawn_error() {
        let kubectl = Kubectl::new("/nonexistent/kubectl-binary");
        let err = kubectl.ping().await.unwrap_err();
        assert!(matches!(err, ClusterError::Spawn { .. }));
    }
}
