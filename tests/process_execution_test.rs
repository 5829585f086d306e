//! 流程执行集成测试

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use hive::core::{ContractError, ProcessStructureError, ResolutionError, RunError, StepError};
    use hive::invocation::{handler_fn, HandlerError, HandlerSet, InvocationBoundary};
    use hive::registry::{HandlerDescriptor, HandlerRegistry};
    use hive::resolver::{Resolver, TaskRequest};
    use hive::schema::Schema;
    use hive::workflow::*;
    use serde_json::{json, Value};
    use tokio::sync::{mpsc, Barrier};

    fn counter(id: &str) -> HandlerDescriptor {
        HandlerDescriptor::skill(id)
            .with_tags(["math.increment"])
            .with_input(Schema::object().required("value", Schema::integer()))
            .with_output(Schema::object().required("value", Schema::integer()))
    }

    fn increment(id: &str, calls: Arc<AtomicUsize>) -> impl hive::invocation::Handler {
        handler_fn(id.to_string(), move |payload: Value| {
            let calls = Arc::clone(&calls);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                let n = payload["value"]
                    .as_i64()
                    .ok_or_else(|| HandlerError::fatal("value missing"))?;
                Ok::<_, HandlerError>(json!({ "value": n + 1 }))
            }
        })
    }

    fn executor(descriptors: Vec<HandlerDescriptor>, handlers: HandlerSet) -> ProcessExecutor {
        let registry = Arc::new(HandlerRegistry::new());
        for descriptor in descriptors {
            registry.register(descriptor).unwrap();
        }
        ProcessExecutor::new(
            Resolver::new(registry),
            InvocationBoundary::new(Arc::new(handlers)),
        )
        .with_options(ExecutorOptions {
            retry_base_delay: Duration::from_millis(1),
            retry_max_delay: Duration::from_millis(5),
            ..ExecutorOptions::default()
        })
    }

    fn linear_process() -> ProcessDefinition {
        ProcessBuilder::new("linear")
            .step("A", TaskRequest::handler("inc"), json!({"value": "${input.value}"}))
            .step("B", TaskRequest::handler("inc"), json!({"value": "${A.value}"}))
            .step("C", TaskRequest::handler("inc"), json!({"value": "${B.value}"}))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_linear_chain_threads_outputs() {
        let calls = Arc::new(AtomicUsize::new(0));
        let exec = executor(
            vec![counter("inc")],
            HandlerSet::new().with(increment("inc", calls.clone())),
        );

        let result = exec.run(linear_process(), json!({"value": 0})).await.unwrap();

        assert_eq!(result.status, RunStatus::Succeeded);
        assert_eq!(result.output("A"), Some(&json!({"value": 1})));
        assert_eq!(result.output("B"), Some(&json!({"value": 2})));
        assert_eq!(result.output("C"), Some(&json!({"value": 3})));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(result.finished_at >= result.started_at);
        let ids: Vec<&str> = result.steps.iter().map(|s| s.step_id.as_str()).collect();
        assert_eq!(ids, vec!["A", "B", "C"]);
    }

    #[tokio::test]
    async fn test_cycle_fails_before_any_invocation() {
        let calls = Arc::new(AtomicUsize::new(0));
        let exec = executor(
            vec![counter("inc")],
            HandlerSet::new().with(increment("inc", calls.clone())),
        );

        let mut a = StepSpec::new("A", TaskRequest::handler("inc"));
        a.context = json!({"value": "${B.value}"});
        a.depends_on = vec!["B".into()];
        let mut b = StepSpec::new("B", TaskRequest::handler("inc"));
        b.context = json!({"value": "${A.value}"});
        let def = ProcessDefinition {
            id: "loop".into(),
            name: "loop".into(),
            description: None,
            steps: vec![a, b],
            timeout_secs: None,
        };

        let err = exec.start_run(def.clone(), json!({"value": 0})).err().unwrap();
        assert!(matches!(err, ProcessStructureError::CyclicDependency { .. }));

        let err = exec.run(def, json!({"value": 0})).await.unwrap_err();
        assert!(matches!(
            err,
            RunError::Structure(ProcessStructureError::CyclicDependency { .. })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_output_contract_violation_aborts_downstream() {
        let calls = Arc::new(AtomicUsize::new(0));
        let handlers = HandlerSet::new()
            .with(handler_fn("broken", |_: Value| async move {
                Ok(json!({"value": "not a number"}))
            }))
            .with(increment("inc", calls.clone()));
        let exec = executor(vec![counter("broken"), counter("inc")], handlers);

        let def = ProcessBuilder::new("abort")
            .step("A", TaskRequest::handler("broken"), json!({"value": "${input.value}"}))
            .step("B", TaskRequest::handler("inc"), json!({"value": "${A.value}"}))
            .step("C", TaskRequest::handler("inc"), json!({"value": "${B.value}"}))
            .build()
            .unwrap();

        let result = exec.run(def, json!({"value": 0})).await.unwrap();

        assert_eq!(result.status, RunStatus::Failed);
        let a = result.step("A").unwrap();
        assert_eq!(a.status, StepStatus::Failed);
        assert_eq!(a.attempts, 1);
        match &a.error {
            Some(StepError::Contract(ContractError::OutputContractViolation { handler, violations })) => {
                assert_eq!(handler, "broken");
                assert_eq!(violations[0].path, "$.value");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        for id in ["B", "C"] {
            let step = result.step(id).unwrap();
            assert_eq!(step.status, StepStatus::Skipped);
            assert_eq!(
                step.skip_reason,
                Some(SkipReason::UpstreamFailed { step: "A".into() })
            );
        }
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_input_violation_never_reaches_handler() {
        let calls = Arc::new(AtomicUsize::new(0));
        let exec = executor(
            vec![counter("inc")],
            HandlerSet::new().with(increment("inc", calls.clone())),
        );

        let result = exec
            .run(linear_process(), json!({"value": "zero"}))
            .await
            .unwrap();

        let a = result.step("A").unwrap();
        assert_eq!(a.status, StepStatus::Failed);
        assert_eq!(a.error.as_ref().map(StepError::kind), Some("input_validation"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_skip_policy_keeps_independent_branches() {
        let descriptors = vec![
            HandlerDescriptor::skill("fail").with_tags(["fail"]),
            HandlerDescriptor::skill("echo").with_tags(["echo"]),
        ];
        let echo_calls = Arc::new(AtomicUsize::new(0));
        let seen = echo_calls.clone();
        let handlers = HandlerSet::new()
            .with(handler_fn("fail", |_: Value| async move {
                Err(HandlerError::fatal("rejected"))
            }))
            .with(handler_fn("echo", move |payload: Value| {
                let seen = seen.clone();
                async move {
                    seen.fetch_add(1, Ordering::SeqCst);
                    Ok(payload)
                }
            }));
        let exec = executor(descriptors, handlers);

        let def = ProcessBuilder::new("branches")
            .step("left", TaskRequest::handler("fail"), json!({}))
            .step("right", TaskRequest::handler("echo"), json!({"side": "right"}))
            .step("needs_left", TaskRequest::handler("echo"), json!({"from": "${left.data}"}))
            .step("after_left", TaskRequest::handler("echo"), json!({"after": true}))
            .on_failure("left", FailurePolicy::Skip)
            .depends_on("after_left", ["left"])
            .build()
            .unwrap();

        let result = exec.run(def, json!({})).await.unwrap();

        assert_eq!(result.status, RunStatus::Succeeded);
        let left = result.step("left").unwrap();
        assert_eq!(left.status, StepStatus::Skipped);
        assert!(matches!(
            left.skip_reason,
            Some(SkipReason::OwnFailure {
                error: StepError::Execution(_)
            })
        ));
        assert_eq!(result.output("right"), Some(&json!({"side": "right"})));
        let needs_left = result.step("needs_left").unwrap();
        assert_eq!(needs_left.status, StepStatus::Skipped);
        assert_eq!(
            needs_left.skip_reason,
            Some(SkipReason::UpstreamUnavailable { step: "left".into() })
        );
        assert!(needs_left.output.is_none());
        assert_eq!(result.step("after_left").unwrap().status, StepStatus::Succeeded);
        assert_eq!(echo_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_ambiguous_capability_fails_the_step() {
        let descriptors = vec![
            HandlerDescriptor::agent("reviewer-a").with_tags(["code.review"]),
            HandlerDescriptor::agent("reviewer-b").with_tags(["code.review"]),
        ];
        let handlers = HandlerSet::new()
            .with(handler_fn("reviewer-a", |v: Value| async move { Ok(v) }))
            .with(handler_fn("reviewer-b", |v: Value| async move { Ok(v) }));
        let exec = executor(descriptors, handlers);

        let def = ProcessBuilder::new("review")
            .step("review", TaskRequest::capabilities(["code.review"]), json!({}))
            .build()
            .unwrap();
        let result = exec.run(def, json!({})).await.unwrap();

        assert_eq!(result.status, RunStatus::Failed);
        let step = result.step("review").unwrap();
        assert_eq!(step.attempts, 0);
        assert_eq!(
            step.error,
            Some(StepError::Resolution(ResolutionError::AmbiguousCapability {
                tags: vec!["code.review".into()],
                candidates: vec!["reviewer-a".into(), "reviewer-b".into()],
            }))
        );
    }

    #[tokio::test]
    async fn test_cancel_after_first_step() {
        let (started_tx, mut started_rx) = mpsc::unbounded_channel::<()>();
        let c_calls = Arc::new(AtomicUsize::new(0));
        let handlers = HandlerSet::new()
            .with(increment("inc", Arc::new(AtomicUsize::new(0))))
            .with(handler_fn("slow", move |payload: Value| {
                let started_tx = started_tx.clone();
                async move {
                    let _ = started_tx.send(());
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    Ok(payload)
                }
            }))
            .with(increment("last", c_calls.clone()));
        let exec = executor(
            vec![counter("inc"), counter("slow"), counter("last")],
            handlers,
        );

        let def = ProcessBuilder::new("cancellable")
            .step("A", TaskRequest::handler("inc"), json!({"value": "${input.value}"}))
            .step("B", TaskRequest::handler("slow"), json!({"value": "${A.value}"}))
            .step("C", TaskRequest::handler("last"), json!({"value": "${B.value}"}))
            .build()
            .unwrap();

        let handle = exec.start_run(def, json!({"value": 0})).unwrap();
        started_rx.recv().await.unwrap();
        assert_eq!(handle.status(), RunStatus::Running);
        handle.cancel();

        let result = tokio::time::timeout(Duration::from_secs(5), handle.await_result())
            .await
            .expect("run should settle promptly after cancel")
            .unwrap();

        assert_eq!(result.status, RunStatus::Cancelled);
        assert_eq!(result.step("A").unwrap().status, StepStatus::Succeeded);
        assert_eq!(result.step("B").unwrap().status, StepStatus::Cancelled);
        let c = result.step("C").unwrap();
        assert_eq!(c.status, StepStatus::Skipped);
        assert_eq!(c.skip_reason, Some(SkipReason::RunCancelled));
        assert_eq!(c_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_independent_steps_run_concurrently() {
        let barrier = Arc::new(Barrier::new(2));
        let gate = barrier.clone();
        let handlers = HandlerSet::new().with(handler_fn("meet", move |payload: Value| {
            let gate = gate.clone();
            async move {
                gate.wait().await;
                Ok(payload)
            }
        }));
        let exec = executor(
            vec![HandlerDescriptor::skill("meet").with_tags(["meet"])],
            handlers,
        );

        let def = ProcessBuilder::new("parallel")
            .step("x", TaskRequest::handler("meet"), json!({"n": 1}))
            .step("y", TaskRequest::handler("meet"), json!({"n": 2}))
            .timeout_secs(5)
            .build()
            .unwrap();

        let result = exec.run(def, json!({})).await.unwrap();
        assert_eq!(result.status, RunStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_concurrent_runs_do_not_share_context() {
        let exec = executor(
            vec![counter("inc")],
            HandlerSet::new().with(increment("inc", Arc::new(AtomicUsize::new(0)))),
        );

        let (first, second) = tokio::join!(
            exec.run(linear_process(), json!({"value": 0})),
            exec.run(linear_process(), json!({"value": 10})),
        );
        let first = first.unwrap();
        let second = second.unwrap();

        assert_ne!(first.run_id, second.run_id);
        assert_eq!(first.output("C"), Some(&json!({"value": 3})));
        assert_eq!(second.output("C"), Some(&json!({"value": 13})));
    }
}
