//! Chart installation
//!
//! Charts are handed to the `helm` binary as `helm upgrade --install`, which
//! makes a repeated install of the same release converge instead of failing.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use deckhand_common::Error;
use thiserror::Error as ThisError;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};

#[cfg(test)]
use mockall::automock;

/// Installs or upgrades a chart release
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ChartInstaller: Send + Sync {
    /// Install `chart` as `release` in `namespace`
    ///
    /// `values_yaml` is passed as a values file; an empty string means none.
    async fn install(
        &self,
        release: &str,
        chart: &str,
        namespace: &str,
        values_yaml: &str,
    ) -> Result<(), Error>;
}

/// Failures running the helm binary
#[derive(Debug, ThisError)]
pub enum HelmError {
    /// The binary could not be started or its pipes failed
    #[error("failed to run helm: {0}")]
    Spawn(#[from] std::io::Error),

    /// helm exited non-zero
    #[error("helm exited with {code}: {stderr}")]
    Failed {
        /// Exit code, or -1 when killed by a signal
        code: i32,
        /// Captured stderr
        stderr: String,
    },
}

/// [`ChartInstaller`] that shells out to `helm`
#[derive(Clone, Debug)]
pub struct HelmInstaller {
    binary: String,
    timeout: Duration,
}

impl HelmInstaller {
    /// Use `helm` from `PATH`
    pub fn new(timeout: Duration) -> Self {
        Self::with_binary("helm", timeout)
    }

    /// Use a specific helm binary
    pub fn with_binary(binary: impl Into<String>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }

    async fn run(&self, args: &[String], values_yaml: &str) -> Result<(), HelmError> {
        let mut child = Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(values_yaml.as_bytes()).await?;
        }

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            return Err(HelmError::Failed {
                code: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        debug!(stdout = %String::from_utf8_lossy(&output.stdout).trim(), "helm finished");
        Ok(())
    }
}

/// Build the `helm upgrade --install` argument list
pub fn install_args(release: &str, chart: &str, namespace: &str, with_values: bool) -> Vec<String> {
    let mut args: Vec<String> = [
        "upgrade",
        "--install",
        release,
        chart,
        "--namespace",
        namespace,
        "--create-namespace",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    if with_values {
        args.push("--values".to_string());
        args.push("-".to_string());
    }
    args
}

#[async_trait]
impl ChartInstaller for HelmInstaller {
    async fn install(
        &self,
        release: &str,
        chart: &str,
        namespace: &str,
        values_yaml: &str,
    ) -> Result<(), Error> {
        let operation = format!("helm install {}", release);
        let args = install_args(release, chart, namespace, !values_yaml.trim().is_empty());
        info!(release = %release, chart = %chart, namespace = %namespace, "installing chart");

        match tokio::time::timeout(self.timeout, self.run(&args, values_yaml)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(Error::upstream(operation, e.to_string())),
            Err(_) => Err(Error::upstream_timeout(operation, self.timeout.as_secs())),
        }
    }
}
