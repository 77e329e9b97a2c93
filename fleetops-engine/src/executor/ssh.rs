use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use fleetops_core::round_hundredths;
use tokio::process::Command;
use tracing::{debug, instrument};

use super::{CommandOutcome, RemoteExecutor, RemoteTarget};

/// Exit status the OpenSSH client uses for its own failures.
const SSH_CLIENT_ERROR: i32 = 255;

/// Executor backed by the system OpenSSH client.
///
/// Every call spawns a fresh `ssh` process with `kill_on_drop`, so the
/// session is gone once `run` returns, including on timeout.
#[derive(Debug, Clone)]
pub struct SshExecutor {
    program: String,
    password_helper: String,
    timeout: Duration,
}

impl SshExecutor {
    pub fn new(program: impl Into<String>, password_helper: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            password_helper: password_helper.into(),
            timeout,
        }
    }

    fn command(&self, target: &RemoteTarget, remote_command: &str) -> Command {
        let connect_timeout = self.timeout.as_secs().max(1);

        // Passwords go through the helper's environment, never argv.
        let mut cmd = match &target.password {
            Some(password) => {
                let mut cmd = Command::new(&self.password_helper);
                cmd.arg("-e").arg(&self.program).env("SSHPASS", password);
                cmd
            }
            None => {
                let mut cmd = Command::new(&self.program);
                cmd.args(["-o", "BatchMode=yes"]);
                cmd
            }
        };

        cmd.arg("-o")
            .arg(format!("ConnectTimeout={connect_timeout}"))
            .args(["-o", "StrictHostKeyChecking=accept-new"])
            .arg("-p")
            .arg(target.port.to_string());

        if let Some(identity) = &target.identity_file {
            cmd.arg("-i").arg(identity);
        }

        cmd.arg("--")
            .arg(format!("{}@{}", target.username, target.address))
            .arg(remote_command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        cmd
    }
}

#[async_trait]
impl RemoteExecutor for SshExecutor {
    #[instrument(name = "ssh", skip_all, fields(address = %target.address))]
    async fn run(&self, target: &RemoteTarget, command: &str) -> CommandOutcome {
        let started = Instant::now();

        let child = match self.command(target, command).spawn() {
            Ok(child) => child,
            Err(e) => {
                return CommandOutcome::failed(format!("failed to start ssh client: {e}"), None);
            }
        };

        // Dropping the wait future on timeout drops the child, which kills it.
        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return CommandOutcome::failed(format!("ssh session failed: {e}"), None),
            Err(_) => {
                return CommandOutcome::failed(
                    format!(
                        "timed out after {}s connecting to {}",
                        self.timeout.as_secs_f64(),
                        target.address
                    ),
                    None,
                );
            }
        };

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));

        let code = output.status.code();
        if output.status.success() {
            let latency_ms = round_hundredths(started.elapsed().as_secs_f64() * 1000.0);
            debug!(latency_ms, "Remote command succeeded");
            return CommandOutcome::succeeded(text, latency_ms);
        }

        let reason = match (code, text.trim().is_empty()) {
            (Some(SSH_CLIENT_ERROR), true) => format!("ssh connection to {} failed", target.address),
            (Some(code), true) => format!("remote command exited with status {code}"),
            (None, true) => "ssh client terminated by signal".to_string(),
            (_, false) => text,
        };
        debug!(exit_code = ?code, "Remote command failed");
        CommandOutcome::failed(reason, code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(address: &str) -> RemoteTarget {
        RemoteTarget {
            address: address.to_string(),
            port: 22,
            username: "root".to_string(),
            password: None,
            identity_file: None,
        }
    }

    #[tokio::test]
    async fn unreachable_host_fails_without_latency() {
        // TEST-NET-1, never routed.
        let executor = SshExecutor::new("ssh", "sshpass", Duration::from_secs(1));
        let outcome = executor.run(&target("192.0.2.1"), "hostname").await;

        assert!(!outcome.success);
        assert_eq!(outcome.latency_ms, 0.0);
        assert!(!outcome.output.is_empty());
    }

    #[tokio::test]
    async fn missing_client_binary_is_a_failure() {
        let executor = SshExecutor::new(
            "fleetops-no-such-ssh-binary",
            "sshpass",
            Duration::from_secs(1),
        );
        let outcome = executor.run(&target("127.0.0.1"), "hostname").await;

        assert!(!outcome.success);
        assert_eq!(outcome.latency_ms, 0.0);
        assert!(outcome.output.contains("failed to start ssh client"));
    }

    #[tokio::test]
    async fn successful_run_reports_output_and_latency() {
        // `echo` accepts any arguments and exits 0, standing in for ssh.
        let executor = SshExecutor::new("echo", "sshpass", Duration::from_secs(5));
        let outcome = executor.run(&target("10.1.1.1"), "uptime").await;

        assert!(outcome.success);
        assert!(outcome.output.contains("root@10.1.1.1"));
        assert!(outcome.output.contains("uptime"));
        assert!(outcome.latency_ms >= 0.0);
        assert_eq!(outcome.exit_code, Some(0));
    }

    #[tokio::test]
    async fn nonzero_exit_is_a_failure() {
        let executor = SshExecutor::new("false", "sshpass", Duration::from_secs(5));
        let outcome = executor.run(&target("10.1.1.1"), "uptime").await;

        assert!(!outcome.success);
        assert_eq!(outcome.latency_ms, 0.0);
        assert_eq!(outcome.exit_code, Some(1));
        assert!(outcome.output.contains("status 1"));
    }

    #[cfg(target_os = "linux")]
    fn is_running(pid: &str) -> bool {
        // A killed child that has not been reaped yet shows up as a zombie.
        let Ok(stat) = std::fs::read_to_string(format!("/proc/{pid}/stat")) else {
            return false;
        };
        let state = stat.rsplit(')').next().unwrap_or_default().trim_start();
        !state.starts_with('Z')
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn hung_session_is_killed_at_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("pid");
        let script = dir.path().join("hang.sh");
        std::fs::write(
            &script,
            format!("echo $$ > '{}'\nexec sleep 30\n", pid_file.display()),
        )
        .unwrap();

        // With a password the helper runs as `<helper> -e <program> ...`,
        // so `sh -e hang.sh ...` stands in for `sshpass -e ssh ...`.
        let executor = SshExecutor::new(
            script.to_string_lossy(),
            "sh",
            Duration::from_millis(500),
        );
        let mut target = target("10.9.9.9");
        target.password = Some("root".to_string());

        let started = Instant::now();
        let outcome = executor.run(&target, "uptime").await;

        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(!outcome.success);
        assert_eq!(outcome.latency_ms, 0.0);
        assert_eq!(outcome.exit_code, None);
        assert!(outcome.output.contains("timed out"));
        assert!(outcome.output.contains("10.9.9.9"));

        let pid = std::fs::read_to_string(&pid_file).unwrap();
        let pid = pid.trim();
        assert!(!pid.is_empty());
        tokio::time::timeout(Duration::from_secs(2), async {
            while is_running(pid) {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("ssh client still running after timeout");
    }

    #[test]
    fn password_goes_through_helper_environment() {
        let executor = SshExecutor::new("ssh", "sshpass", Duration::from_secs(5));
        let mut target = target("10.1.1.1");
        target.password = Some("hunter2".to_string());

        let cmd = executor.command(&target, "uptime");
        let std = cmd.as_std();
        assert_eq!(std.get_program(), "sshpass");

        let args: Vec<_> = std.get_args().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(args[0], "-e");
        assert_eq!(args[1], "ssh");
        assert!(!args.iter().any(|a| a.contains("hunter2")));
        assert!(std.get_envs().any(|(k, v)| k == "SSHPASS" && v.is_some()));
    }
}
