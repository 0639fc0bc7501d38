//! Provisioning Bridge: account creation and deletion side effects.
//!
//! The shipped implementation shells out to `useradd`/`userdel`. Calls are
//! slow and fallible; callers bound them with [`with_timeout`].

use async_trait::async_trait;
use std::ffi::OsStr;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info};

use crate::constants::{USERADD_EXIT_NAME_IN_USE, USERDEL_EXIT_NO_SUCH_USER};

/// Provisioning failures.
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("provisioning {0} timed out")]
    Timeout(String),

    #[error("account {0} already exists")]
    AlreadyExists(String),

    #[error("account {0} does not exist")]
    NotFound(String),

    #[error("refusing to provision invalid account name {0:?}")]
    InvalidName(String),

    #[error("{program} exited with {status}: {stderr}")]
    Failed {
        program: String,
        status: i32,
        stderr: String,
    },

    #[error("{program} was killed by a signal")]
    Killed { program: String },

    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// Performs account creation and deletion.
#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Create `username` with a home directory, login shell and comment.
    async fn create_account(
        &self,
        username: &str,
        shell: &Path,
        comment: &str,
    ) -> Result<(), ProvisionError>;

    /// Delete `username` together with its home storage.
    async fn delete_account(&self, username: &str) -> Result<(), ProvisionError>;
}

/// Bound a provisioning call by `limit`.
///
/// The inner future is dropped on expiry, which kills a spawned child
/// process (see [`CommandProvisioner`]).
pub async fn with_timeout<F>(limit: Duration, username: &str, fut: F) -> Result<(), ProvisionError>
where
    F: Future<Output = Result<(), ProvisionError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(ProvisionError::Timeout(username.to_string())),
    }
}

/// Provisioner invoking the shadow-utils command line tools.
#[derive(Debug, Clone)]
pub struct CommandProvisioner {
    useradd: PathBuf,
    userdel: PathBuf,
}

impl Default for CommandProvisioner {
    fn default() -> Self {
        Self::new("useradd", "userdel")
    }
}

impl CommandProvisioner {
    pub fn new(useradd: impl Into<PathBuf>, userdel: impl Into<PathBuf>) -> Self {
        Self {
            useradd: useradd.into(),
            userdel: userdel.into(),
        }
    }

    /// Run `program args...`, returning the exit code on failure.
    async fn run(&self, program: &Path, args: &[&OsStr]) -> Result<(), ProvisionError> {
        let name = program.display().to_string();
        debug!(program = %name, ?args, "spawning provisioning tool");

        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| ProvisionError::Spawn {
                program: name.clone(),
                source,
            })?;

        if output.status.success() {
            return Ok(());
        }
        match output.status.code() {
            Some(status) => Err(ProvisionError::Failed {
                program: name,
                status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            }),
            None => Err(ProvisionError::Killed { program: name }),
        }
    }
}

#[async_trait]
impl Provisioner for CommandProvisioner {
    async fn create_account(
        &self,
        username: &str,
        shell: &Path,
        comment: &str,
    ) -> Result<(), ProvisionError> {
        if !crate::accounts::is_valid_username(username) {
            return Err(ProvisionError::InvalidName(username.to_string()));
        }

        let args: [&OsStr; 7] = [
            "-m".as_ref(),
            "-s".as_ref(),
            shell.as_os_str(),
            "-c".as_ref(),
            comment.as_ref(),
            "--".as_ref(),
            username.as_ref(),
        ];
        match self.run(&self.useradd, &args).await {
            Err(ProvisionError::Failed { status, .. }) if status == USERADD_EXIT_NAME_IN_USE => {
                Err(ProvisionError::AlreadyExists(username.to_string()))
            }
            Err(e) => Err(e),
            Ok(()) => {
                info!(user = %username, shell = %shell.display(), "account created");
                Ok(())
            }
        }
    }

    async fn delete_account(&self, username: &str) -> Result<(), ProvisionError> {
        if !crate::accounts::is_valid_username(username) {
            return Err(ProvisionError::InvalidName(username.to_string()));
        }

        let args: [&OsStr; 3] = ["-r".as_ref(), "--".as_ref(), username.as_ref()];
        match self.run(&self.userdel, &args).await {
            Err(ProvisionError::Failed { status, .. }) if status == USERDEL_EXIT_NO_SUCH_USER => {
                Err(ProvisionError::NotFound(username.to_string()))
            }
            Err(e) => Err(e),
            Ok(()) => {
                info!(user = %username, "account deleted");
                Ok(())
            }
        }
    }
}
