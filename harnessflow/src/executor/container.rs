//! Container-backed stages.

use super::output::{CapturedOutput, OutputCollector};
use super::{process, Completion, StageContext};
use crate::config::Environment;
use crate::container::{ContainerHandle, ContainerLifecycleManager};
use crate::core::FailureKind;
use crate::errors::ContainerError;
use crate::stages::{ContainerStage, TeardownScope};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

async fn deadline(timeout: Option<Duration>) {
    match timeout {
        Some(limit) => tokio::time::sleep(limit).await,
        None => std::future::pending().await,
    }
}

/// Runs a container stage: remove-if-present, start, optionally wait for
/// readiness, then run the embedded command or wait for the container to exit.
///
/// Whatever happens, a container this stage started is stopped before the
/// function returns, unless the stage succeeded with run-scoped teardown, in
/// which case the stop is registered with the run's cleanup registry.
pub(super) async fn run(
    containers: &Arc<ContainerLifecycleManager>,
    stage_id: &str,
    stage: &ContainerStage,
    env: &Environment,
    ctx: &StageContext,
    timeout: Option<Duration>,
    output: OutputCollector,
) -> Completion {
    let prepared = stage
        .service
        .resolve(stage_id, env, !ctx.mode.ci)
        .and_then(|spec| Ok((spec, stage.service.probe.resolved(stage_id, env)?)))
        .and_then(|(spec, probe)| {
            let command = stage
                .command
                .as_ref()
                .map(|c| c.render(stage_id, env))
                .transpose()?;
            Ok((spec, probe, command))
        });
    let (spec, probe, command) = match prepared {
        Ok(prepared) => prepared,
        Err(e) => return Completion::failed(FailureKind::ContainerStart, e.to_string()),
    };

    let slot: Mutex<Option<ContainerHandle>> = Mutex::new(None);
    let body = async {
        let handle = match containers.start(&spec).await {
            Ok(handle) => handle,
            Err(e) => return Completion::failed(FailureKind::ContainerStart, e.to_string()),
        };
        *slot.lock() = Some(handle.clone());

        if let Some(limit) = stage.wait_healthy {
            if let Err(e) = containers.wait_healthy(&handle, &probe, limit).await {
                let kind = match e {
                    ContainerError::Timeout { .. } => FailureKind::Timeout,
                    _ => FailureKind::ContainerStart,
                };
                return Completion::failed(kind, e.to_string());
            }
        }

        match (&command, stage.teardown) {
            (Some(command), _) => process::run_command(command, env, None, &ctx.cancel, output).await,
            (None, TeardownScope::Stage) => match containers.wait_exit(&handle).await {
                Ok(code) => Completion::exited(i32::try_from(code).unwrap_or(1), CapturedOutput::default()),
                Err(e) => Completion::failed(FailureKind::ProcessExit, e.to_string()),
            },
            (None, TeardownScope::Run) => Completion::ok(format!("container '{}' ready", handle.name())),
        }
    };

    let completion = tokio::select! {
        completion = body => completion,
        () = deadline(timeout) => Completion::failed(
            FailureKind::Timeout,
            format!("timed out after {}s", timeout.unwrap_or_default().as_secs_f64()),
        ),
        () = ctx.cancel.cancelled() => Completion::failed(FailureKind::Cancelled, "cancelled while running"),
    };

    let started = slot.lock().take();
    match started {
        Some(handle) if stage.teardown == TeardownScope::Run && completion.failure.is_none() => {
            let containers = Arc::clone(containers);
            let name = handle.name().to_string();
            debug!(stage = %stage_id, container = %name, "container kept until end of run");
            ctx.cleanup.register(format!("container:{name}"), move || async move {
                containers.stop(&name).await;
            });
        }
        Some(handle) => {
            containers.stop(handle.name()).await;
        }
        None if matches!(completion.failure, Some(FailureKind::Timeout | FailureKind::Cancelled)) => {
            // Interrupted while starting: the container may exist without a handle.
            if let Err(e) = containers.ensure_removed(&spec.name).await {
                warn!(stage = %stage_id, container = %spec.name, error = %e, "failed to remove interrupted container");
            }
        }
        None => {}
    }

    completion
}

#[cfg(test)]
mod tests {
    use crate::config::{Environment, RunMode};
    use crate::container::{ContainerLifecycleManager, ReadinessProbe, ServiceSpec};
    use crate::core::{FailureKind, StageOutcome};
    use crate::executor::{StageContext, StageExecutor};
    use crate::stages::{CommandSpec, ContainerStage, StageSpec, TeardownScope};
    use crate::testing::MockContainerRuntime;
    use std::sync::Arc;
    use std::time::Duration;

    const NAME: &str = "mock_uss_scdsc";

    fn service() -> ServiceSpec {
        ServiceSpec::new("mock_uss_${MOCK_USS_SERVICES}", "interuss/monitoring").with_port("${PORT}", 5000)
    }

    fn setup(runtime: MockContainerRuntime) -> (Arc<MockContainerRuntime>, StageExecutor, StageContext) {
        let runtime = Arc::new(runtime);
        let manager = ContainerLifecycleManager::new(runtime.clone()).with_poll_interval(Duration::from_millis(10));
        let ctx = StageContext::new(
            Environment::from_pairs([("MOCK_USS_SERVICES", "scdsc"), ("PORT", "8074")]),
            RunMode { ci: true, test: false },
        );
        (runtime, StageExecutor::new(Arc::new(manager)), ctx)
    }

    #[tokio::test]
    async fn test_embedded_command_decides_and_container_is_stopped() {
        let (runtime, executor, ctx) = setup(MockContainerRuntime::new());
        let stage = StageSpec::container(
            "mock-uss-tests",
            ContainerStage::new("mock_uss", service()).with_command(CommandSpec::shell("exit 4")),
        );

        let result = executor.execute(&stage, &ctx).await;

        assert_eq!(result.failure(), Some(FailureKind::ProcessExit));
        assert_eq!(result.exit_code(), Some(4));
        assert!(!runtime.is_present(NAME));
    }

    #[tokio::test]
    async fn test_wait_healthy_timeout_stops_container() {
        let (runtime, executor, ctx) = setup(MockContainerRuntime::new());
        let service = service().with_probe(ReadinessProbe::Command {
            argv: vec!["false".to_string()],
        });
        let stage = StageSpec::container(
            "deploy",
            ContainerStage::new("mock_uss", service)
                .wait_healthy(Duration::from_millis(100))
                .with_command(CommandSpec::shell("true")),
        );

        let result = executor.execute(&stage, &ctx).await;

        assert_eq!(result.outcome(), StageOutcome::Failed);
        assert_eq!(result.failure(), Some(FailureKind::Timeout));
        assert!(runtime.operations().contains(&format!("stop:{NAME}")));
        assert!(!runtime.is_present(NAME));
    }

    #[tokio::test]
    async fn test_run_scope_defers_teardown() {
        let (runtime, executor, ctx) = setup(MockContainerRuntime::new());
        let stage = StageSpec::container(
            "deploy",
            ContainerStage::new("mock_uss", service()).with_teardown(TeardownScope::Run),
        );

        let result = executor.execute(&stage, &ctx).await;

        assert!(result.is_success());
        assert!(runtime.is_running_now(NAME));
        assert_eq!(ctx.cleanup.pending_count(), 1);

        ctx.cleanup.run_all(Duration::from_secs(1)).await;
        assert!(!runtime.is_present(NAME));
    }

    #[tokio::test]
    async fn test_container_exit_code_without_command() {
        let (_runtime, executor, ctx) = setup(MockContainerRuntime::new().with_exit_code(NAME, 2));
        let stage = StageSpec::container("qualifier", ContainerStage::new("mock_uss", service()));

        let result = executor.execute(&stage, &ctx).await;

        assert_eq!(result.failure(), Some(FailureKind::ProcessExit));
        assert_eq!(result.exit_code(), Some(2));
    }

    #[tokio::test]
    async fn test_missing_image_is_container_start_failure() {
        let (_runtime, executor, ctx) = setup(MockContainerRuntime::new().with_missing_image("interuss/monitoring"));
        let stage = StageSpec::container("deploy", ContainerStage::new("mock_uss", service()));

        let result = executor.execute(&stage, &ctx).await;

        assert_eq!(result.failure(), Some(FailureKind::ContainerStart));
        assert!(result.diagnostic().contains("No such image"));
    }

    #[tokio::test]
    async fn test_stage_timeout_tears_down_long_running_container() {
        let (runtime, executor, ctx) = setup(MockContainerRuntime::new());
        let stage = StageSpec::container("qualifier", ContainerStage::new("mock_uss", service()))
            .with_timeout(Duration::from_millis(100));

        let result = executor.execute(&stage, &ctx).await;

        assert_eq!(result.failure(), Some(FailureKind::Timeout));
        assert!(!runtime.is_present(NAME));
    }
}
