//! OpenSSH transport
//!
//! Shells out to the system `ssh` client, the same way the cloud layer
//! shells out to `aliyun`. Files are written by piping them into
//! `cat` on the remote side.

use async_trait::async_trait;
use cloudcode_deploy::{FileTransfer, RemoteConnector, RemoteError, RemoteSession, RemoteTarget};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// ssh exits with 255 when it could not connect or authenticate
const SSH_CONNECT_FAILURE: i32 = 255;
const CONNECT_TIMEOUT_SECS: u32 = 10;
const PROBE_TIMEOUT: Duration = Duration::from_secs(20);
const TRANSFER_TIMEOUT: Duration = Duration::from_secs(60);

pub struct OpenSshConnector;

#[async_trait]
impl RemoteConnector for OpenSshConnector {
    async fn open_session(
        &self,
        target: &RemoteTarget,
    ) -> Result<Box<dyn RemoteSession>, RemoteError> {
        let session = OpenSshSession {
            target: target.clone(),
        };
        // Fails fast while sshd is not up yet
        session.run("true", PROBE_TIMEOUT).await?;
        Ok(Box::new(session))
    }

    async fn open_transfer(
        &self,
        target: &RemoteTarget,
    ) -> Result<Box<dyn FileTransfer>, RemoteError> {
        Ok(Box::new(OpenSshSession {
            target: target.clone(),
        }))
    }
}

struct OpenSshSession {
    target: RemoteTarget,
}

impl OpenSshSession {
    fn command(&self, remote_command: &str) -> Command {
        let mut cmd = Command::new("ssh");
        cmd.arg("-i")
            .arg(&self.target.identity_file)
            .arg("-p")
            .arg(self.target.port.to_string())
            .args(["-o", "BatchMode=yes"])
            .args(["-o", "StrictHostKeyChecking=no"])
            .args(["-o", "UserKnownHostsFile=/dev/null"])
            .args(["-o", "LogLevel=ERROR"])
            .arg("-o")
            .arg(format!("ConnectTimeout={}", CONNECT_TIMEOUT_SECS))
            .arg(format!("{}@{}", self.target.user, self.target.host))
            .arg(remote_command)
            .kill_on_drop(true);
        cmd
    }

    fn check_status(
        &self,
        command: &str,
        output: &std::process::Output,
    ) -> Result<(), RemoteError> {
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        match output.status.code() {
            Some(SSH_CONNECT_FAILURE) => Err(RemoteError::Connect {
                host: self.target.host.clone(),
                message: stderr,
            }),
            code => Err(RemoteError::Command {
                command: command.to_string(),
                status: code.unwrap_or(-1),
                stderr,
            }),
        }
    }
}

#[async_trait]
impl RemoteSession for OpenSshSession {
    async fn run(&self, command: &str, timeout: Duration) -> Result<String, RemoteError> {
        tracing::debug!("Executing on {}: {}", self.target.host, command);

        let output = tokio::time::timeout(timeout, self.command(command).output())
            .await
            .map_err(|_| RemoteError::Timeout {
                command: command.to_string(),
                timeout,
            })??;

        self.check_status(command, &output)?;
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn close(&self) -> Result<(), RemoteError> {
        // Every command runs on its own connection
        Ok(())
    }
}

#[async_trait]
impl FileTransfer for OpenSshSession {
    async fn write_file(&self, path: &str, contents: &[u8]) -> Result<(), RemoteError> {
        let remote_command = match path.rsplit_once('/') {
            Some((dir, _)) if !dir.is_empty() => format!(
                "mkdir -p {} && cat > {}",
                shell_quote(dir),
                shell_quote(path)
            ),
            _ => format!("cat > {}", shell_quote(path)),
        };

        let mut child = self
            .command(&remote_command)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()?;

        let transfer = async {
            if let Some(mut stdin) = child.stdin.take() {
                stdin.write_all(contents).await?;
                stdin.shutdown().await?;
            }
            child.wait_with_output().await
        };

        let output = tokio::time::timeout(TRANSFER_TIMEOUT, transfer)
            .await
            .map_err(|_| RemoteError::Transfer {
                path: path.to_string(),
                message: format!("timed out after {:?}", TRANSFER_TIMEOUT),
            })??;

        self.check_status(&remote_command, &output)
            .map_err(|e| RemoteError::Transfer {
                path: path.to_string(),
                message: e.to_string(),
            })
    }

    async fn close(&self) -> Result<(), RemoteError> {
        Ok(())
    }
}

/// Single-quote a word for a POSIX shell
fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("/root/cloudcode/.env"), "'/root/cloudcode/.env'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }

    #[test]
    fn test_command_arguments() {
        let session = OpenSshSession {
            target: RemoteTarget {
                host: "47.0.0.1".into(),
                port: 22,
                user: "root".into(),
                identity_file: "/tmp/ssh_key".into(),
            },
        };
        let cmd = session.command("uptime");
        let args: Vec<_> = cmd
            .as_std()
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();

        assert_eq!(args[0], "-i");
        assert_eq!(args[1], "/tmp/ssh_key");
        assert!(args.contains(&"BatchMode=yes".to_string()));
        assert_eq!(args[args.len() - 2], "root@47.0.0.1");
        assert_eq!(args[args.len() - 1], "uptime");
    }
}
