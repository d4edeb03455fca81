//! rac invocation
//!
//! Handles:
//! - Building rac argument lists for each administrative query
//! - Spawning the executable with a hard timeout
//! - Mapping spawn failures to [`InvocationError`]
//! - Masking credentials before anything reaches the logs

use crate::cache::RecordKind;
use crate::error::InvocationError;
use std::future::Future;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command as AsyncCommand;
use tracing::debug;

/// Captured result of one rac run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RacOutput {
    pub exit_code: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub elapsed: Duration,
}

impl RacOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Something that can run rac. The process-backed implementation is
/// [`ProcessRunner`]; tests script responses instead.
pub trait RacRunner: Send + Sync + 'static {
    fn run(
        &self,
        args: Vec<String>,
    ) -> impl Future<Output = Result<RacOutput, InvocationError>> + Send;
}

/// Runs the real rac executable
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    executable: PathBuf,
    timeout: Duration,
}

impl ProcessRunner {
    pub fn new(executable: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            executable: executable.into(),
            timeout,
        }
    }

    pub fn executable(&self) -> &PathBuf {
        &self.executable
    }
}

impl RacRunner for ProcessRunner {
    async fn run(&self, args: Vec<String>) -> Result<RacOutput, InvocationError> {
        let start_time = Instant::now();
        debug!(
            "Executing {} {} (timeout: {:?})",
            self.executable.display(),
            masked(&args),
            self.timeout
        );

        let child = AsyncCommand::new(&self.executable)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| self.spawn_error(e))?;

        // Dropping the wait future on timeout drops the child, which kills it
        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| InvocationError::Timeout(self.timeout))?
            .map_err(|e| InvocationError::Spawn(e.to_string()))?;

        let elapsed = start_time.elapsed();
        let exit_code = output.status.code().unwrap_or(-1);
        debug!("rac exited with {} after {}ms", exit_code, elapsed.as_millis());

        Ok(RacOutput {
            exit_code,
            stdout: output.stdout,
            stderr: output.stderr,
            elapsed,
        })
    }
}

impl ProcessRunner {
    fn spawn_error(&self, e: std::io::Error) -> InvocationError {
        let exe = self.executable.display().to_string();
        match e.kind() {
            ErrorKind::NotFound => InvocationError::NotFound(exe),
            ErrorKind::PermissionDenied => InvocationError::PermissionDenied(exe),
            _ => InvocationError::Spawn(format!("{exe}: {e}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub user: String,
    pub password: Option<String>,
}

/// The RAS service rac talks to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RacEndpoint {
    pub host: String,
    pub port: u16,
    pub credentials: Option<Credentials>,
}

impl RacEndpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            credentials: None,
        }
    }

    pub fn with_credentials(mut self, user: impl Into<String>, password: Option<String>) -> Self {
        self.credentials = Some(Credentials {
            user: user.into(),
            password,
        });
        self
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Administrative queries issued by the repository
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RacQuery {
    ClusterList,
    InfobaseSummaryList { cluster: String },
    SessionList { cluster: String },
    JobList { cluster: String },
    ConnectionList { cluster: String },
}

impl RacQuery {
    pub fn kind(&self) -> RecordKind {
        match self {
            RacQuery::ClusterList => RecordKind::Clusters,
            RacQuery::InfobaseSummaryList { .. } => RecordKind::Infobases,
            RacQuery::SessionList { .. } => RecordKind::Sessions,
            RacQuery::JobList { .. } | RacQuery::ConnectionList { .. } => RecordKind::Jobs,
        }
    }

    pub fn cluster(&self) -> Option<&str> {
        match self {
            RacQuery::ClusterList => None,
            RacQuery::InfobaseSummaryList { cluster }
            | RacQuery::SessionList { cluster }
            | RacQuery::JobList { cluster }
            | RacQuery::ConnectionList { cluster } => Some(cluster.as_str()),
        }
    }

    fn command(&self) -> &'static [&'static str] {
        match self {
            RacQuery::ClusterList => &["cluster", "list"],
            RacQuery::InfobaseSummaryList { .. } => &["infobase", "summary", "list"],
            RacQuery::SessionList { .. } => &["session", "list"],
            RacQuery::JobList { .. } => &["job", "list"],
            RacQuery::ConnectionList { .. } => &["connection", "list"],
        }
    }

    /// Full rac argv, endpoint address last.
    pub fn build_args(&self, endpoint: &RacEndpoint) -> Vec<String> {
        let mut args: Vec<String> = self.command().iter().map(|s| s.to_string()).collect();

        if let Some(cluster) = self.cluster() {
            args.push(format!("--cluster={cluster}"));
            if let Some(creds) = &endpoint.credentials {
                args.push(format!("--cluster-user={}", creds.user));
                if let Some(password) = &creds.password {
                    args.push(format!("--cluster-pwd={password}"));
                }
            }
        }

        args.push(endpoint.address());
        args
    }
}

const PASSWORD_FLAG: &str = "--cluster-pwd=";

/// Render argv for logging with passwords replaced by `***`.
pub fn masked(args: &[String]) -> String {
    args.iter()
        .map(|arg| {
            if arg.starts_with(PASSWORD_FLAG) {
                format!("{PASSWORD_FLAG}***")
            } else {
                arg.clone()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
