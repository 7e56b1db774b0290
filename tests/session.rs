mod common;

use std::time::Duration;

use common::{host_pair, minimal_graph, refined_graph};
use flowsmith::error::ErrorKind;
use flowsmith::graph::{Node, NodeConfig, SandboxMode, WorkflowGraph};
use flowsmith::progress::{ProgressUpdate, ToolDescriptor};
use flowsmith::protocol::{
    FailurePayload, RefineClarification, RefineSuccess, ReplyPayload, RequestPayload,
    ScopeDescriptor,
};
use flowsmith::session::{
    CancelSignal, RefinementOutcome, Sender, SessionContinuity, SessionError, SessionManager,
    SessionNotice, SubFlowScope, WorkflowScope,
};
use flowsmith::validation::{Violation, ViolationKind};

fn narrative(chunk: &str) -> ReplyPayload {
    ReplyPayload::RefineProgress(ProgressUpdate::NarrativeText {
        chunk: chunk.into(),
    })
}

fn tool(name: &str) -> ReplyPayload {
    ReplyPayload::RefineProgress(ProgressUpdate::ToolInvocation {
        tool: ToolDescriptor::new(name),
    })
}

fn success(graph: WorkflowGraph, session_id: &str, resumed: bool) -> ReplyPayload {
    ReplyPayload::RefineSuccess(Box::new(RefineSuccess {
        graph,
        assistant_message: String::new(),
        session_id: Some(session_id.into()),
        session_resumed: resumed,
    }))
}

#[tokio::test]
async fn refinement_success_streams_and_commits() {
    let (client, host) = host_pair();
    let session = SessionManager::new(WorkflowScope::new(minimal_graph()), client);
    let cancel = CancelSignal::new();

    let observer_session = session.clone();
    let responder = tokio::spawn({
        let host = host.clone();
        async move {
            let envelope = host.recv().await;
            let id = envelope.correlation_id;
            host.reply(id.clone(), narrative("Analyzing the workflow.\n"));
            host.reply(id.clone(), tool("search_nodes"));
            tokio::time::sleep(Duration::from_millis(50)).await;
            host.reply(id.clone(), narrative("Adding the report step."));
            host.reply(id, success(refined_graph(), "host-1", false));
        }
    });
    // Peek mid-stream: the placeholder is loading and shows tool activity.
    let observer = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(25)).await;
        let history = observer_session.history();
        let placeholder = history
            .messages
            .iter()
            .rev()
            .find(|m| m.sender == Sender::Assistant)
            .cloned()
            .expect("placeholder present");
        let transient = observer_session.transient(&placeholder.id);
        (placeholder, transient)
    });

    let outcome = session
        .send("add a report step", Default::default(), &cancel)
        .await
        .unwrap();
    responder.await.unwrap();

    let (mid_placeholder, mid_transient) = observer.await.unwrap();
    assert!(mid_placeholder.content.contains("[tool: search_nodes]"));
    let mid_transient = mid_transient.expect("transient state while loading");
    assert!(mid_transient.loading);
    assert_eq!(mid_transient.tool_activity.unwrap().name, "search_nodes");

    let RefinementOutcome::Success {
        assistant,
        continuity,
    } = outcome
    else {
        panic!("expected success");
    };
    assert_eq!(continuity, SessionContinuity::Fresh);
    // Final content is the narrative with tool markers stripped.
    assert_eq!(
        assistant.content,
        "Analyzing the workflow.\nAdding the report step."
    );
    // The indicator is clear once the terminal message resolved.
    assert!(session.transient(&assistant.id).is_none());

    assert_eq!(session.graph(), refined_graph());
    let history = session.history();
    assert_eq!(history.len(), 2);
    assert_eq!(history.iterations, 1);
    assert_eq!(history.session_id.as_deref(), Some("host-1"));
}

#[tokio::test]
async fn clarification_updates_history_but_not_the_graph() {
    let (client, host) = host_pair();
    let session = SessionManager::new(WorkflowScope::new(minimal_graph()), client);
    let cancel = CancelSignal::new();

    let responder = tokio::spawn({
        let host = host.clone();
        async move {
            let envelope = host.recv().await;
            host.reply(
                envelope.correlation_id,
                ReplyPayload::RefineClarification(RefineClarification {
                    assistant_message: "Weekly or monthly totals?".into(),
                    session_id: Some("host-1".into()),
                    session_resumed: false,
                }),
            );
        }
    });

    let outcome = session
        .send("aggregate the numbers", Default::default(), &cancel)
        .await
        .unwrap();
    responder.await.unwrap();

    let RefinementOutcome::Clarification { assistant, .. } = outcome else {
        panic!("expected clarification");
    };
    assert_eq!(assistant.content, "Weekly or monthly totals?");
    assert_eq!(session.graph(), minimal_graph());
    let history = session.history();
    assert_eq!(history.iterations, 0);
    assert_eq!(history.len(), 2);
}

#[tokio::test]
async fn second_send_is_rejected_without_contacting_the_channel() {
    let (client, host) = host_pair();
    let session = SessionManager::new(WorkflowScope::new(minimal_graph()), client);
    let cancel = CancelSignal::new();

    let responder = tokio::spawn({
        let host = host.clone();
        async move {
            let envelope = host.recv().await;
            tokio::time::sleep(Duration::from_millis(100)).await;
            host.reply(envelope.correlation_id, success(refined_graph(), "s", false));
        }
    });

    let (first, second) = tokio::join!(
        session.send("first instruction", Default::default(), &cancel),
        async {
            tokio::time::sleep(Duration::from_millis(30)).await;
            session
                .send("second instruction", Default::default(), &cancel)
                .await
        }
    );
    responder.await.unwrap();

    assert!(matches!(first, Ok(RefinementOutcome::Success { .. })));
    assert!(matches!(second, Err(SessionError::RequestInFlight)));
    // Exactly one refine request reached the channel.
    assert!(host.try_recv().is_none());
    // The rejected send left no trace in the transcript.
    let history = session.history();
    assert_eq!(history.len(), 2);
}

#[tokio::test]
async fn cancel_discards_placeholder_and_a_late_success_has_no_effect() {
    let (client, host) = host_pair();
    let session = SessionManager::new(WorkflowScope::new(minimal_graph()), client);
    let cancel = CancelSignal::new();

    let responder = tokio::spawn({
        let host = host.clone();
        let cancel = cancel.clone();
        async move {
            let envelope = host.recv().await;
            let id = envelope.correlation_id;
            cancel.cancel();

            let notice = host.recv().await;
            assert!(matches!(notice.payload, RequestPayload::CancelRefine));
            assert_eq!(notice.correlation_id, id);

            host.reply(id.clone(), ReplyPayload::RefineCancelled);
            // Simulate the race: the still-running host finishes anyway.
            host.reply(id, success(refined_graph(), "late", false));
        }
    });

    let outcome = session
        .send("rewrite everything", Default::default(), &cancel)
        .await
        .unwrap();
    responder.await.unwrap();
    assert!(matches!(outcome, RefinementOutcome::Cancelled));

    // Give the dispatch task time to (not) deliver the late success.
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(session.graph(), minimal_graph());
    let history = session.history();
    assert_eq!(history.len(), 1);
    assert_eq!(history.messages[0].sender, Sender::User);
    assert_eq!(history.session_id, None);
}

#[tokio::test]
async fn validation_failure_feeds_exactly_one_retry() {
    let (client, host) = host_pair();
    let session = SessionManager::new(WorkflowScope::new(minimal_graph()), client);
    let cancel = CancelSignal::new();

    let responder = tokio::spawn({
        let host = host.clone();
        async move {
            // First attempt fails validation.
            let envelope = host.recv().await;
            host.reply(
                envelope.correlation_id,
                ReplyPayload::RefineFailed(
                    FailurePayload::new(ErrorKind::Validation, "the result was invalid")
                        .with_violations(vec![Violation::new(
                            ViolationKind::MissingField,
                            "agent-call node requires a prompt",
                        )]),
                ),
            );

            // First retry carries the stored context.
            let envelope = host.recv().await;
            let RequestPayload::RefineGraph(payload) = envelope.payload else {
                panic!("expected refine request");
            };
            assert!(payload.prior_violations.is_some());
            host.reply(
                envelope.correlation_id,
                ReplyPayload::RefineFailed(FailurePayload::new(
                    ErrorKind::ExecutorUnavailable,
                    "executor offline",
                )),
            );

            // Second retry: the context was consumed, nothing to replay.
            let envelope = host.recv().await;
            let RequestPayload::RefineGraph(payload) = envelope.payload else {
                panic!("expected refine request");
            };
            assert!(payload.prior_violations.is_none());
            host.reply(envelope.correlation_id, success(refined_graph(), "s", false));
        }
    });

    let outcome = session
        .send("make it quarterly", Default::default(), &cancel)
        .await
        .unwrap();
    let RefinementOutcome::Failure {
        kind: ErrorKind::Validation,
        violations: Some(_),
        failed_message: first_failure,
        ..
    } = outcome
    else {
        panic!("expected validation failure");
    };

    let outcome = session
        .retry(&first_failure, Default::default(), &cancel)
        .await
        .unwrap();
    let RefinementOutcome::Failure {
        kind: ErrorKind::ExecutorUnavailable,
        failed_message: second_failure,
        ..
    } = outcome
    else {
        panic!("expected executor failure");
    };

    let outcome = session
        .retry(&second_failure, Default::default(), &cancel)
        .await
        .unwrap();
    assert!(matches!(outcome, RefinementOutcome::Success { .. }));
    responder.await.unwrap();
}

#[tokio::test]
async fn refined_graph_that_fails_validation_is_not_applied() {
    let (client, host) = host_pair();
    let session = SessionManager::new(WorkflowScope::new(minimal_graph()), client);
    let cancel = CancelSignal::new();

    let broken = WorkflowGraph::new("wf-1", "Broken Name", "1.0.0");
    let responder = tokio::spawn({
        let host = host.clone();
        async move {
            let envelope = host.recv().await;
            host.reply(envelope.correlation_id, success(broken, "s", false));
        }
    });

    let outcome = session
        .send("do something odd", Default::default(), &cancel)
        .await
        .unwrap();
    responder.await.unwrap();

    let RefinementOutcome::Failure {
        kind: ErrorKind::Validation,
        violations: Some(violations),
        ..
    } = outcome
    else {
        panic!("expected validation failure");
    };
    assert!(!violations.is_empty());
    assert_eq!(session.graph(), minimal_graph());
}

#[tokio::test]
async fn prohibited_extended_agent_nodes_cannot_be_retried() {
    let (client, host) = host_pair();
    let session = SessionManager::new(WorkflowScope::new(minimal_graph()), client);
    let cancel = CancelSignal::new();

    let extended = minimal_graph().with_node(Node::new(
        "deep-agent",
        NodeConfig::CustomAgent {
            description: "research agent".into(),
            prompt: "dig into the data".into(),
            model: Some("opus".into()),
            sandbox: SandboxMode::ReadOnly,
        },
    ));
    let responder = tokio::spawn({
        let host = host.clone();
        async move {
            let envelope = host.recv().await;
            host.reply(envelope.correlation_id, success(extended, "s", false));
        }
    });

    // Extended agent nodes are disabled by default in the options.
    let outcome = session
        .send("use a research agent", Default::default(), &cancel)
        .await
        .unwrap();
    responder.await.unwrap();

    let RefinementOutcome::Failure {
        kind: ErrorKind::ProhibitedOperation,
        failed_message,
        ..
    } = outcome
    else {
        panic!("expected prohibited-operation failure");
    };
    assert_eq!(session.graph(), minimal_graph());

    let retry = session.retry(&failed_message, Default::default(), &cancel).await;
    assert!(matches!(retry, Err(SessionError::NotRetryable { .. })));
}

#[tokio::test]
async fn reconnected_session_raises_a_one_time_notice() {
    let (client, host) = host_pair();
    let session = SessionManager::new(WorkflowScope::new(minimal_graph()), client);
    let cancel = CancelSignal::new();

    let responder = tokio::spawn({
        let host = host.clone();
        async move {
            let envelope = host.recv().await;
            host.reply(envelope.correlation_id, success(refined_graph(), "s1", false));
            let envelope = host.recv().await;
            host.reply(envelope.correlation_id, success(refined_graph(), "s2", true));
        }
    });

    let first = session
        .send("step one", Default::default(), &cancel)
        .await
        .unwrap();
    let RefinementOutcome::Success { continuity, .. } = first else {
        panic!("expected success");
    };
    assert_eq!(continuity, SessionContinuity::Fresh);
    assert_eq!(session.take_notice(), None);

    let second = session
        .send("step two", Default::default(), &cancel)
        .await
        .unwrap();
    responder.await.unwrap();
    let RefinementOutcome::Success { continuity, .. } = second else {
        panic!("expected success");
    };
    assert_eq!(continuity, SessionContinuity::Reconnected);

    // The transcript is kept; only a one-time notice is raised.
    assert_eq!(session.history().len(), 4);
    assert_eq!(session.take_notice(), Some(SessionNotice::Reconnected));
    assert_eq!(session.take_notice(), None);
    assert_eq!(session.history().session_id.as_deref(), Some("s2"));
}

#[tokio::test]
async fn clear_history_round_trips_for_the_top_level_scope_only() {
    let (client, host) = host_pair();
    let session = SessionManager::new(WorkflowScope::new(minimal_graph()), client.clone());
    let cancel = CancelSignal::new();

    // Seed one exchange.
    let responder = tokio::spawn({
        let host = host.clone();
        async move {
            let envelope = host.recv().await;
            host.reply(envelope.correlation_id, success(refined_graph(), "s1", false));
            // Then the clear round trip.
            let envelope = host.recv().await;
            assert!(matches!(
                envelope.payload,
                RequestPayload::ClearConversation {
                    scope: ScopeDescriptor::TopLevel
                }
            ));
            host.reply(envelope.correlation_id, ReplyPayload::ClearConversationSuccess);
        }
    });
    session
        .send("seed", Default::default(), &cancel)
        .await
        .unwrap();

    session.clear_history().await.unwrap();
    responder.await.unwrap();
    let history = session.history();
    assert!(history.is_empty());
    assert_eq!(history.iterations, 0);
    assert_eq!(history.session_id, None);

    // Nested scopes reset locally; no host round trip.
    let nested = SessionManager::new(SubFlowScope::new("sub-1", minimal_graph()), client);
    nested.clear_history().await.unwrap();
    assert!(host.try_recv().is_none());
}

#[tokio::test]
async fn invalid_graph_is_rejected_before_contacting_the_channel() {
    let (client, host) = host_pair();
    let mut graph = minimal_graph();
    graph.name = "Bad Name".into();
    let session = SessionManager::new(WorkflowScope::new(graph), client);
    let cancel = CancelSignal::new();

    let result = session.send("fix it", Default::default(), &cancel).await;
    assert!(matches!(result, Err(SessionError::GraphInvalid { .. })));
    assert!(host.try_recv().is_none());
    assert!(session.history().is_empty());
}

#[tokio::test]
async fn message_length_bounds_are_enforced() {
    let (client, host) = host_pair();
    let session = SessionManager::new(WorkflowScope::new(minimal_graph()), client);
    let cancel = CancelSignal::new();

    let empty = session.send("", Default::default(), &cancel).await;
    assert!(matches!(empty, Err(SessionError::MessageLength { len: 0 })));

    let oversized = "x".repeat(5_001);
    let too_long = session.send(&oversized, Default::default(), &cancel).await;
    assert!(matches!(
        too_long,
        Err(SessionError::MessageLength { len: 5_001 })
    ));
    assert!(host.try_recv().is_none());
}

#[tokio::test]
async fn manual_edit_invalidates_stored_retry_context() {
    let (client, host) = host_pair();
    let session = SessionManager::new(WorkflowScope::new(minimal_graph()), client);
    let cancel = CancelSignal::new();

    let responder = tokio::spawn({
        let host = host.clone();
        async move {
            let envelope = host.recv().await;
            host.reply(
                envelope.correlation_id,
                ReplyPayload::RefineFailed(
                    FailurePayload::new(ErrorKind::Validation, "invalid result")
                        .with_violations(vec![Violation::new(
                            ViolationKind::MissingField,
                            "missing prompt",
                        )]),
                ),
            );

            let envelope = host.recv().await;
            let RequestPayload::RefineGraph(payload) = envelope.payload else {
                panic!("expected refine request");
            };
            // The manual edit between failure and retry dropped the context.
            assert!(payload.prior_violations.is_none());
            host.reply(envelope.correlation_id, success(refined_graph(), "s", false));
        }
    });

    let outcome = session
        .send("add a step", Default::default(), &cancel)
        .await
        .unwrap();
    let RefinementOutcome::Failure { failed_message, .. } = outcome else {
        panic!("expected failure");
    };

    session.edit_graph(|graph| graph.description = "tweaked by hand".into());

    let outcome = session
        .retry(&failed_message, Default::default(), &cancel)
        .await
        .unwrap();
    assert!(matches!(outcome, RefinementOutcome::Success { .. }));
    responder.await.unwrap();
}

#[tokio::test]
async fn iteration_advisory_trips_at_the_threshold() {
    let (client, host) = host_pair();
    let session = SessionManager::new(WorkflowScope::new(minimal_graph()), client);
    let cancel = CancelSignal::new();

    let responder = tokio::spawn({
        let host = host.clone();
        async move {
            for _ in 0..20 {
                let envelope = host.recv().await;
                host.reply(envelope.correlation_id, success(refined_graph(), "s", false));
            }
        }
    });

    for i in 0..19 {
        session
            .send(&format!("tweak {i}"), Default::default(), &cancel)
            .await
            .unwrap();
    }
    assert!(!session.nearing_iteration_limit());

    session
        .send("tweak 19", Default::default(), &cancel)
        .await
        .unwrap();
    responder.await.unwrap();
    assert!(session.nearing_iteration_limit());

    // Advisory only: sending still works.
    assert!(session.can_send());
}
