/*!
Stub rac runner for tests without a 1C server

Scripts rac responses per subcommand (optionally per cluster), records every
invocation and can delay answers to exercise concurrent callers.
*/

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use zbx1c_agent::{InvocationError, RacOutput, RacRunner};

#[derive(Debug, Clone)]
pub enum StubResponse {
    Output {
        exit_code: i32,
        stdout: Vec<u8>,
        stderr: Vec<u8>,
    },
    Error(InvocationError),
}

#[derive(Default)]
struct StubState {
    responses: HashMap<(String, Option<String>), StubResponse>,
    delay: Option<Duration>,
    invocations: Vec<Vec<String>>,
}

/// Cloneable handle; clones share script and invocation log
#[derive(Clone, Default)]
pub struct StubRunner {
    state: Arc<Mutex<StubState>>,
}

impl StubRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `command` (e.g. `"session list"`) with `text` for every cluster.
    pub fn with_output(self, command: &str, text: impl Into<String>) -> Self {
        self.with_bytes(command, text.into().into_bytes())
    }

    pub fn with_bytes(self, command: &str, stdout: Vec<u8>) -> Self {
        self.script(command, None, StubResponse::Output {
            exit_code: 0,
            stdout,
            stderr: Vec::new(),
        })
    }

    /// Answer `command` with `text` only for `--cluster=<cluster>`.
    pub fn with_cluster_output(
        self,
        command: &str,
        cluster: &str,
        text: impl Into<String>,
    ) -> Self {
        self.script(command, Some(cluster), StubResponse::Output {
            exit_code: 0,
            stdout: text.into().into_bytes(),
            stderr: Vec::new(),
        })
    }

    /// rac runs but exits non-zero
    pub fn with_failure(self, command: &str, exit_code: i32, stderr: &str) -> Self {
        self.script(command, None, StubResponse::Output {
            exit_code,
            stdout: Vec::new(),
            stderr: stderr.as_bytes().to_vec(),
        })
    }

    /// rac cannot be run at all
    pub fn with_error(self, command: &str, error: InvocationError) -> Self {
        self.script(command, None, StubResponse::Error(error))
    }

    pub fn with_delay(self, delay: Duration) -> Self {
        self.state.lock().delay = Some(delay);
        self
    }

    fn script(self, command: &str, cluster: Option<&str>, response: StubResponse) -> Self {
        self.state
            .lock()
            .responses
            .insert((command.to_string(), cluster.map(str::to_string)), response);
        self
    }

    /// Every argv received, in call order
    pub fn invocations(&self) -> Vec<Vec<String>> {
        self.state.lock().invocations.clone()
    }

    pub fn total_invocations(&self) -> usize {
        self.state.lock().invocations.len()
    }

    /// Invocations of `command` (e.g. `"cluster list"`)
    pub fn invocation_count(&self, command: &str) -> usize {
        self.state
            .lock()
            .invocations
            .iter()
            .filter(|args| subcommand(args) == command)
            .count()
    }
}

/// Positional words before the first flag, without the trailing address.
pub fn subcommand(args: &[String]) -> String {
    let words = match args.split_last() {
        Some((_, rest)) => rest,
        None => args,
    };
    words
        .iter()
        .take_while(|a| !a.starts_with("--"))
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(" ")
}

fn cluster_arg(args: &[String]) -> Option<String> {
    args.iter()
        .find_map(|a| a.strip_prefix("--cluster="))
        .map(str::to_string)
}

impl RacRunner for StubRunner {
    async fn run(&self, args: Vec<String>) -> Result<RacOutput, InvocationError> {
        let command = subcommand(&args);
        let cluster = cluster_arg(&args);

        let (response, delay) = {
            let mut state = self.state.lock();
            state.invocations.push(args);
            let response = state
                .responses
                .get(&(command.clone(), cluster))
                .or_else(|| state.responses.get(&(command.clone(), None)))
                .cloned();
            (response, state.delay)
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        match response {
            Some(StubResponse::Output {
                exit_code,
                stdout,
                stderr,
            }) => Ok(RacOutput {
                exit_code,
                stdout,
                stderr,
                elapsed: delay.unwrap_or_default(),
            }),
            Some(StubResponse::Error(e)) => Err(e),
            None => Ok(RacOutput {
                exit_code: 1,
                stdout: Vec::new(),
                stderr: format!("stub: no response scripted for '{command}'").into_bytes(),
                elapsed: Duration::ZERO,
            }),
        }
    }
}
