//! Execution driver.
//!
//! Resolves the language, materializes a workspace, builds the container
//! invocation, runs it under the deadline and classifies what happened.
//! The workspace is released on every path out of [`Driver::run`].

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, instrument, warn};

use crate::backend::{IsolationBackend, RunStatus};
use crate::config::{Config, Limits, RuntimeConfig};
use crate::invocation::Invocation;
use crate::language::Registry;
use crate::workspace::Workspace;

/// Classified result of one execution request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// The program exited with status 0.
    Success { stdout: String },
    /// The program (or its compile step) exited non-zero.
    RuntimeFailure { stderr: String, exit_code: i32 },
    /// The deadline passed and the container was terminated.
    Timeout,
    /// No profile exists for the requested language.
    UnsupportedLanguage { language: String },
    /// The host could not prepare or launch the run.
    SetupFailure { reason: String },
}

impl ExecutionOutcome {
    /// Short label for logs.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Success { .. } => "success",
            Self::RuntimeFailure { .. } => "runtime_failure",
            Self::Timeout => "timeout",
            Self::UnsupportedLanguage { .. } => "unsupported_language",
            Self::SetupFailure { .. } => "setup_failure",
        }
    }
}

/// Runs snippets through an isolation backend.
pub struct Driver<B> {
    registry: Arc<Registry>,
    backend: B,
    limits: Limits,
    runtime: RuntimeConfig,
    scratch_dir: PathBuf,
}

impl<B: IsolationBackend> Driver<B> {
    /// Create a driver from configuration and an already built registry.
    pub fn new(config: &Config, registry: Arc<Registry>, backend: B) -> Self {
        Self {
            registry,
            backend,
            limits: config.limits.clone(),
            runtime: config.runtime.clone(),
            scratch_dir: config.scratch_dir.clone(),
        }
    }

    /// The registry this driver resolves languages against.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// The isolation backend runs are dispatched to.
    pub const fn backend(&self) -> &B {
        &self.backend
    }

    /// The wall-clock deadline applied to each run.
    pub const fn deadline(&self) -> Duration {
        self.limits.timeout()
    }

    /// Run `source` as `language`. Never retries.
    #[instrument(skip(self, source), fields(code_len = source.len()))]
    pub async fn run(&self, language: &str, source: &[u8]) -> ExecutionOutcome {
        let Some(profile) = self.registry.lookup(language) else {
            debug!("Unsupported language");
            return ExecutionOutcome::UnsupportedLanguage {
                language: language.to_string(),
            };
        };

        let workspace = match Workspace::materialize(&self.scratch_dir, profile, source) {
            Ok(ws) => ws,
            Err(e) => {
                let reason = format!("{e:#}");
                error!(error = %reason, "Failed to materialize workspace");
                return ExecutionOutcome::SetupFailure { reason };
            }
        };
        debug!(
            run_id = %workspace.run_id(),
            root = %workspace.root().display(),
            "Workspace ready"
        );

        let invocation = Invocation::build(profile, &workspace, &self.limits, &self.runtime);
        // `workspace` is still owned here, so an unwinding backend drops and
        // releases it.
        let status = self.backend.execute(&invocation, self.deadline()).await;
        workspace.release();

        let outcome = match status {
            Ok(RunStatus::Exited(result)) if result.exit_code == 0 => ExecutionOutcome::Success {
                stdout: result.stdout,
            },
            Ok(RunStatus::Exited(result)) => ExecutionOutcome::RuntimeFailure {
                stderr: result.stderr,
                exit_code: result.exit_code,
            },
            Ok(RunStatus::TimedOut) => {
                warn!(container = %invocation.container_name, "Execution timed out");
                ExecutionOutcome::Timeout
            }
            Err(e) => {
                let reason = format!("{e:#}");
                error!(error = %reason, "Isolation backend failed");
                ExecutionOutcome::SetupFailure { reason }
            }
        };

        info!(outcome = outcome.kind(), "Execution finished");
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{DockerBackend, ExecutionResult};
    use anyhow::Result;
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::Mutex;

    /// What the mock backend does when called.
    #[derive(Clone)]
    enum Behavior {
        /// Exit with the given code, echoing the source file to stdout/stderr.
        Echo(i32),
        /// Report a timeout.
        Timeout,
        /// Fail as a backend error.
        Fail,
        /// Panic mid-run.
        Panic,
    }

    /// Mock backend that records the mounted workspace it was handed.
    struct MockBackend {
        behavior: Behavior,
        seen: Arc<Mutex<Vec<PathBuf>>>,
        delay: Duration,
    }

    impl MockBackend {
        fn new(behavior: Behavior) -> Self {
            Self {
                behavior,
                seen: Arc::new(Mutex::new(Vec::new())),
                delay: Duration::ZERO,
            }
        }
    }

    #[async_trait]
    impl IsolationBackend for MockBackend {
        async fn execute(&self, invocation: &Invocation, _deadline: Duration) -> Result<RunStatus> {
            let root = PathBuf::from(&invocation.mount);
            self.seen.lock().unwrap().push(root.clone());
            tokio::time::sleep(self.delay).await;

            match self.behavior {
                Behavior::Echo(exit_code) => {
                    let entry = std::fs::read_dir(&root)?.next().unwrap()?;
                    let content = std::fs::read_to_string(entry.path())?;
                    Ok(RunStatus::Exited(ExecutionResult {
                        exit_code,
                        stdout: content.clone(),
                        stderr: content,
                        truncated: false,
                    }))
                }
                Behavior::Timeout => Ok(RunStatus::TimedOut),
                Behavior::Fail => anyhow::bail!("runtime not reachable"),
                Behavior::Panic => panic!("backend crashed"),
            }
        }
    }

    fn driver(behavior: Behavior, scratch: &Path) -> Driver<MockBackend> {
        let config = Config {
            scratch_dir: scratch.to_path_buf(),
            ..Config::default()
        };
        Driver::new(&config, Arc::new(Registry::builtin()), MockBackend::new(behavior))
    }

    fn seen_roots(driver: &Driver<MockBackend>) -> Vec<PathBuf> {
        driver.backend.seen.lock().unwrap().clone()
    }

    fn scratch_is_empty(scratch: &Path) -> bool {
        std::fs::read_dir(scratch).unwrap().next().is_none()
    }

    #[tokio::test]
    async fn success_returns_stdout() {
        let scratch = tempfile::tempdir().unwrap();
        let driver = driver(Behavior::Echo(0), scratch.path());

        let outcome = driver.run("python", b"print('hi')").await;

        assert_eq!(
            outcome,
            ExecutionOutcome::Success {
                stdout: "print('hi')".to_string()
            }
        );
        let roots = seen_roots(&driver);
        assert_eq!(roots.len(), 1);
        assert!(!roots[0].exists());
        assert!(scratch_is_empty(scratch.path()));
    }

    #[tokio::test]
    async fn non_zero_exit_returns_stderr() {
        let scratch = tempfile::tempdir().unwrap();
        let driver = driver(Behavior::Echo(1), scratch.path());

        let outcome = driver.run("cpp", b"int main(){ return 1; }").await;

        assert_eq!(
            outcome,
            ExecutionOutcome::RuntimeFailure {
                stderr: "int main(){ return 1; }".to_string(),
                exit_code: 1,
            }
        );
        assert!(scratch_is_empty(scratch.path()));
    }

    #[tokio::test]
    async fn timeout_releases_workspace() {
        let scratch = tempfile::tempdir().unwrap();
        let driver = driver(Behavior::Timeout, scratch.path());

        let outcome = driver.run("python", b"import time; time.sleep(10)").await;

        assert_eq!(outcome, ExecutionOutcome::Timeout);
        assert!(!seen_roots(&driver)[0].exists());
        assert!(scratch_is_empty(scratch.path()));
    }

    #[tokio::test]
    async fn backend_error_is_setup_failure() {
        let scratch = tempfile::tempdir().unwrap();
        let driver = driver(Behavior::Fail, scratch.path());

        let outcome = driver.run("javascript", b"console.log(1)").await;

        let ExecutionOutcome::SetupFailure { reason } = outcome else {
            panic!("expected setup failure, got {outcome:?}");
        };
        assert!(reason.contains("runtime not reachable"));
        assert!(scratch_is_empty(scratch.path()));
    }

    #[tokio::test]
    async fn panic_still_releases_workspace() {
        let scratch = tempfile::tempdir().unwrap();
        let driver = Arc::new(driver(Behavior::Panic, scratch.path()));

        let task = {
            let driver = Arc::clone(&driver);
            tokio::spawn(async move { driver.run("java", b"class Main {}").await })
        };

        assert!(task.await.unwrap_err().is_panic());
        assert!(!seen_roots(&driver)[0].exists());
        assert!(scratch_is_empty(scratch.path()));
    }

    #[tokio::test]
    async fn cancellation_releases_workspace() {
        let scratch = tempfile::tempdir().unwrap();
        let mut backend = MockBackend::new(Behavior::Echo(0));
        backend.delay = Duration::from_secs(30);
        let config = Config {
            scratch_dir: scratch.path().to_path_buf(),
            ..Config::default()
        };
        let driver = Arc::new(Driver::new(&config, Arc::new(Registry::builtin()), backend));

        let task = {
            let driver = Arc::clone(&driver);
            tokio::spawn(async move { driver.run("python", b"pass").await })
        };
        // Wait until the run is in flight, then abort it.
        while seen_roots(&driver).is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        task.abort();
        assert!(task.await.unwrap_err().is_cancelled());

        assert!(!seen_roots(&driver)[0].exists());
        assert!(scratch_is_empty(scratch.path()));
    }

    #[tokio::test]
    async fn unsupported_language_touches_nothing() {
        let scratch = tempfile::tempdir().unwrap();
        let missing = scratch.path().join("never-created");
        let config = Config {
            scratch_dir: missing.clone(),
            ..Config::default()
        };
        let driver = Driver::new(
            &config,
            Arc::new(Registry::builtin()),
            MockBackend::new(Behavior::Echo(0)),
        );

        let outcome = driver.run("ruby", b"puts 1").await;

        assert_eq!(
            outcome,
            ExecutionOutcome::UnsupportedLanguage {
                language: "ruby".to_string()
            }
        );
        assert!(!missing.exists());
        assert!(seen_roots(&driver).is_empty());
    }

    #[tokio::test]
    async fn unwritable_scratch_is_setup_failure() {
        let scratch = tempfile::tempdir().unwrap();
        // A regular file where the scratch directory should be
        let blocker = scratch.path().join("blocker");
        std::fs::write(&blocker, b"").unwrap();
        let driver = driver(Behavior::Echo(0), &blocker);

        let outcome = driver.run("python", b"pass").await;

        assert!(matches!(outcome, ExecutionOutcome::SetupFailure { .. }));
        assert!(seen_roots(&driver).is_empty());
    }

    #[tokio::test]
    async fn concurrent_runs_do_not_collide() {
        let scratch = tempfile::tempdir().unwrap();
        let driver = Arc::new(driver(Behavior::Echo(0), scratch.path()));

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let driver = Arc::clone(&driver);
                tokio::spawn(async move {
                    let code = format!("print('request-{i}')");
                    (code.clone(), driver.run("java", code.as_bytes()).await)
                })
            })
            .collect();

        for handle in handles {
            let (code, outcome) = handle.await.unwrap();
            assert_eq!(outcome, ExecutionOutcome::Success { stdout: code });
        }
        let roots = seen_roots(&driver);
        let mut unique = roots.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), 16);
        assert!(scratch_is_empty(scratch.path()));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn unreachable_runtime_is_setup_failure() {
        let scratch = tempfile::tempdir().unwrap();
        let bin = tempfile::tempdir().unwrap();
        let program = crate::backend::fake_cli(
            bin.path(),
            "echo 'docker: Cannot connect to the Docker daemon at unix:///var/run/docker.sock.' >&2\nexit 125\n",
        );
        let mut config = Config {
            scratch_dir: scratch.path().to_path_buf(),
            ..Config::default()
        };
        config.runtime.program = program;
        let driver = Driver::new(
            &config,
            Arc::new(Registry::builtin()),
            DockerBackend::from_config(&config),
        );

        let outcome = driver.run("python", b"print('hi')").await;

        let ExecutionOutcome::SetupFailure { reason } = &outcome else {
            panic!("expected setup failure, got {outcome:?}");
        };
        assert!(reason.contains("exit 125"));
        assert!(reason.contains("Cannot connect to the Docker daemon"));
        assert!(crate::report::report(outcome).is_err());
        assert!(scratch_is_empty(scratch.path()));
    }

    #[test]
    fn outcome_kinds() {
        assert_eq!(ExecutionOutcome::Timeout.kind(), "timeout");
        assert_eq!(
            ExecutionOutcome::SetupFailure {
                reason: String::new()
            }
            .kind(),
            "setup_failure"
        );
    }

    // Scenarios against a real container runtime. Set SANDBOX_RUNNER_DOCKER_TEST
    // to run them; images must be pullable.
    fn docker_driver(scratch: &Path) -> Option<Driver<DockerBackend>> {
        std::env::var("SANDBOX_RUNNER_DOCKER_TEST").ok()?;
        let config = Config {
            scratch_dir: scratch.to_path_buf(),
            ..Config::default()
        };
        Some(Driver::new(
            &config,
            Arc::new(Registry::builtin()),
            DockerBackend::from_config(&config),
        ))
    }

    #[tokio::test]
    async fn docker_python_hello() {
        let scratch = tempfile::tempdir().unwrap();
        let Some(driver) = docker_driver(scratch.path()) else {
            return;
        };

        let outcome = driver.run("python", b"print('hi')").await;

        assert_eq!(
            outcome,
            ExecutionOutcome::Success {
                stdout: "hi\n".to_string()
            }
        );
        assert!(scratch_is_empty(scratch.path()));
    }

    #[tokio::test]
    async fn docker_python_timeout_leaves_no_container() {
        let scratch = tempfile::tempdir().unwrap();
        let Some(driver) = docker_driver(scratch.path()) else {
            return;
        };

        let outcome = driver.run("python", b"import time; time.sleep(10)").await;
        assert_eq!(outcome, ExecutionOutcome::Timeout);
        assert!(scratch_is_empty(scratch.path()));

        tokio::time::sleep(Duration::from_secs(1)).await;
        let ps = tokio::process::Command::new("docker")
            .args([
                "ps",
                "--quiet",
                "--filter",
                &format!("name={}", crate::invocation::CONTAINER_PREFIX),
            ])
            .output()
            .await
            .unwrap();
        assert!(String::from_utf8_lossy(&ps.stdout).trim().is_empty());
    }

    #[tokio::test]
    async fn docker_cpp_non_zero_exit() {
        let scratch = tempfile::tempdir().unwrap();
        let Some(driver) = docker_driver(scratch.path()) else {
            return;
        };

        let outcome = driver.run("cpp", b"int main(){ return 1; }").await;

        assert!(matches!(
            outcome,
            ExecutionOutcome::RuntimeFailure { exit_code: 1, .. }
        ));
        assert!(scratch_is_empty(scratch.path()));
    }

    #[tokio::test]
    async fn docker_ruby_unsupported() {
        let scratch = tempfile::tempdir().unwrap();
        let Some(driver) = docker_driver(scratch.path()) else {
            return;
        };

        let outcome = driver.run("ruby", b"puts 1").await;

        assert!(matches!(outcome, ExecutionOutcome::UnsupportedLanguage { .. }));
        assert!(scratch_is_empty(scratch.path()));
    }
}
