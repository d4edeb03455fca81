/*!
Test harness for the RAC pipeline

Wires a [`StubRunner`] into a real [`ClusterRepository`] and offers
assertions on the rac invocations that happened.
*/

use crate::rac_stub::StubRunner;
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use zbx1c_agent::{ClusterRepository, RacEndpoint, RepositoryOptions};

/// Endpoint used by harness repositories; nothing listens there in tests
pub const TEST_HOST: &str = "127.0.0.1";
pub const TEST_PORT: u16 = 1545;

pub struct TestHarness {
    pub runner: StubRunner,
    pub repository: Arc<ClusterRepository<StubRunner>>,
}

impl TestHarness {
    pub fn new(runner: StubRunner) -> Self {
        Self::with_options(runner, Self::default_options())
    }

    pub fn with_options(runner: StubRunner, options: RepositoryOptions) -> Self {
        init_tracing();
        let repository = Arc::new(ClusterRepository::new(runner.clone(), options));
        Self { runner, repository }
    }

    pub fn default_options() -> RepositoryOptions {
        let mut options = RepositoryOptions::new(RacEndpoint::new(TEST_HOST, TEST_PORT));
        options.probe_timeout = Duration::from_millis(200);
        options
    }

    /// Fails unless `command` ran exactly `expected` times.
    pub fn assert_invocations(&self, command: &str, expected: usize) -> Result<()> {
        let actual = self.runner.invocation_count(command);
        if actual != expected {
            anyhow::bail!(
                "expected {} '{}' invocations, got {} ({:?})",
                expected,
                command,
                actual,
                self.runner.invocations()
            );
        }
        tracing::debug!("'{}' ran {} times as expected", command, actual);
        Ok(())
    }

    /// Fails if any recorded argv contains `needle`.
    pub fn assert_never_passed(&self, needle: &str) -> Result<()> {
        for args in self.runner.invocations() {
            if args.iter().any(|a| a.contains(needle)) {
                anyhow::bail!("argument containing '{}' was passed: {:?}", needle, args);
            }
        }
        Ok(())
    }
}

/// Test logging to the captured test writer, once per process
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("zbx1c_agent=debug")),
        )
        .with_test_writer()
        .try_init();
}
