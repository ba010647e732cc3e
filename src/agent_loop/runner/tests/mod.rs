use super::*;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use pretty_assertions::assert_eq;
use serde_json::json;

use crate::agent_loop::types::LoopStatus;
use crate::config::EngineConfig;
use crate::error::ErrorCategory;
use crate::provider::{static_resolver, Backend, BackendResponse};
use crate::tools::ToolParameters;
use crate::types::message::{ContentBlock, Message, Role};
use crate::types::Usage;


use support::{
    calls, executed_tools, kinds, register_echo, sequence_resolver, text, user_state,
    ScriptedBackend,
};

fn single_backend_loop(registry: ToolRegistry, backend: ScriptedBackend) -> TurnLoop {
    TurnLoop::new(Arc::new(registry), static_resolver(Arc::new(backend)))
}

#[tokio::test]
async fn text_response_completes_with_cumulative_usage() {
    let backend = ScriptedBackend::new("p1", "model-x", vec![Ok(text("hello"))]);
    let requests = backend.requests();
    let turn_loop = single_backend_loop(ToolRegistry::new(), backend);
    let mut state = user_state("hi").with_system_prompt("be brief");

    let result = turn_loop.run(&mut state, &CancellationToken::new()).await;

    assert_eq!(result.status, LoopStatus::Done);
    assert_eq!(result.done_reason(), Some(DoneReason::Completed));
    assert_eq!(kinds(&result), vec!["turn_start", "turn_end", "done"]);
    assert_eq!(result.final_text, "hello");
    assert_eq!(result.usage, Usage::new(10, 5));
    let seqs: Vec<u64> = result.events.iter().map(|e| e.seq).collect();
    assert_eq!(seqs, vec![1, 2, 3]);
    assert!(result.events.iter().all(|e| e.run_id == result.run_id));

    let requests = requests.lock().expect("request lock");
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].system_prompt.as_deref(), Some("be brief"));
    assert!(requests[0].tools.is_none());
    assert_eq!(state.current_turn(), 1);
    let origin = state.last_assistant().and_then(|m| m.origin.clone());
    assert_eq!(origin, Some(Origin::new("model-x", "p1")));
}

#[tokio::test]
async fn follow_up_starts_another_turn_and_usage_accumulates() {
    let backend = ScriptedBackend::new("p1", "m", vec![Ok(text("first")), Ok(text("second"))]);
    let requests = backend.requests();
    let turn_loop = single_backend_loop(ToolRegistry::new(), backend);
    let mut state = user_state("hi");
    state.enqueue_follow_up(AgentMessage::user("and then?"));

    let result = turn_loop.run(&mut state, &CancellationToken::new()).await;

    assert_eq!(
        kinds(&result),
        vec!["turn_start", "turn_end", "turn_start", "turn_end", "done"]
    );
    assert_eq!(result.final_text, "second");
    assert_eq!(result.usage, Usage::new(20, 10));
    let requests = requests.lock().expect("request lock");
    let last = requests[1].messages.last().map(Message::text);
    assert_eq!(last.as_deref(), Some("and then?"));
}

#[tokio::test]
async fn remote_tool_halts_after_preceding_local_and_resumes() {
    let mut registry = ToolRegistry::new();
    register_echo(&mut registry, "local_a");
    register_echo(&mut registry, "local_c");
    registry.register_remote("remote_b", "runs on the client", ToolParameters::empty());
    let backend = ScriptedBackend::new(
        "p1",
        "m",
        vec![
            Ok(calls(&[("a", "local_a"), ("b", "remote_b"), ("c", "local_c")])),
            Ok(text("all done")),
        ],
    );
    let turn_loop = single_backend_loop(registry, backend);
    let mut state = user_state("go");

    let halted = turn_loop.run(&mut state, &CancellationToken::new()).await;

    assert_eq!(halted.status, LoopStatus::AwaitingRemoteTool);
    assert_eq!(
        kinds(&halted),
        vec!["turn_start", "turn_end", "tool_executed", "remote_tool_requested"]
    );
    assert_eq!(executed_tools(&halted), vec!["local_a".to_string()]);
    let pending: Vec<&str> = halted.pending_remote_calls.iter().map(|c| c.id.as_str()).collect();
    assert_eq!(pending, vec!["b"]);
    let pending_ids: Vec<String> = state.pending_tool_calls().into_iter().map(|c| c.id).collect();
    assert_eq!(pending_ids, vec!["b".to_string(), "c".to_string()]);

    state
        .submit_tool_result("b", json!({"clicked": true}), false)
        .expect("submit remote result");
    let resumed = turn_loop.run(&mut state, &CancellationToken::new()).await;

    assert_eq!(resumed.status, LoopStatus::Done);
    assert_eq!(
        kinds(&resumed),
        vec!["tool_executed", "turn_start", "turn_end", "done"]
    );
    assert_eq!(executed_tools(&resumed), vec!["local_c".to_string()]);
    assert_eq!(resumed.final_text, "all done");
    assert!(state.pending_tool_calls().is_empty());
}

#[tokio::test]
async fn provider_switch_is_emitted_once_between_turn_ends() {
    let mut registry = ToolRegistry::new();
    register_echo(&mut registry, "lookup");
    let first: Arc<dyn Backend> = Arc::new(ScriptedBackend::new(
        "P1",
        "modelX",
        vec![Ok(calls(&[("a", "lookup")]))],
    ));
    let second: Arc<dyn Backend> = Arc::new(ScriptedBackend::new("P2", "modelY", vec![Ok(text("ok"))]));
    let turn_loop = TurnLoop::new(Arc::new(registry), sequence_resolver(vec![first, second]));
    let mut state = user_state("go");

    let result = turn_loop.run(&mut state, &CancellationToken::new()).await;

    assert_eq!(
        kinds(&result),
        vec![
            "turn_start",
            "turn_end",
            "tool_executed",
            "turn_start",
            "provider_switch",
            "turn_end",
            "done"
        ]
    );
    let switch = result.payloads().find_map(|p| match p {
        LoopEventPayload::ProviderSwitch {
            turn,
            from_model,
            to_model,
            ..
        } => Some((*turn, from_model.clone(), to_model.clone())),
        _ => None,
    });
    assert_eq!(switch, Some((2, "modelX".to_string(), "modelY".to_string())));

    let origins: Vec<Option<Origin>> = state
        .messages()
        .iter()
        .filter_map(AgentMessage::as_llm)
        .filter(|m| m.role == Role::Assistant)
        .map(|m| m.origin.clone())
        .collect();
    assert_eq!(
        origins,
        vec![Some(Origin::new("modelX", "P1")), Some(Origin::new("modelY", "P2"))]
    );
}

#[tokio::test]
async fn turn_end_hook_veto_stops_before_tools() {
    let mut registry = ToolRegistry::new();
    register_echo(&mut registry, "lookup");
    let backend = ScriptedBackend::new("p", "m", vec![Ok(calls(&[("a", "lookup")]))]);
    let requests = backend.requests();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_in_hook = Arc::clone(&seen);
    let hooks = TurnHooks::new().on_turn_end(move |info| {
        seen_in_hook.lock().expect("seen lock").push(info);
        async { Ok(false) }
    });
    let turn_loop = single_backend_loop(registry, backend).with_hooks(hooks);
    let mut state = user_state("go");

    let result = turn_loop.run(&mut state, &CancellationToken::new()).await;

    assert_eq!(kinds(&result), vec!["turn_start", "turn_end", "done"]);
    assert_eq!(result.done_reason(), Some(DoneReason::StoppedByHook));
    assert_eq!(requests.lock().expect("request lock").len(), 1);
    assert!(result.payloads().all(|p| !matches!(
        p,
        LoopEventPayload::TurnStart { turn: 2 } | LoopEventPayload::ToolExecuted { .. }
    )));
    let seen = seen.lock().expect("seen lock");
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].turn, 1);
    assert_eq!(seen[0].model, "m");
    assert_eq!(seen[0].usage, Usage::new(20, 3));
}

#[tokio::test]
async fn turn_end_hook_error_fails_the_run() {
    let backend = ScriptedBackend::new("p", "m", vec![Ok(text("hi"))]);
    let hooks = TurnHooks::new()
        .on_turn_end(|_| async { Err(EngineError::InvalidState("quota lookup failed".into())) });
    let turn_loop = single_backend_loop(ToolRegistry::new(), backend).with_hooks(hooks);
    let mut state = user_state("go");

    let result = turn_loop.run(&mut state, &CancellationToken::new()).await;

    assert_eq!(result.status, LoopStatus::Failed);
    assert!(matches!(
        result.events.last().map(|e| &e.payload),
        Some(LoopEventPayload::Error {
            category: ErrorCategory::Hook,
            is_retryable: false,
            ..
        })
    ));
    assert_eq!(state.messages().len(), 2);
}

#[tokio::test]
async fn steering_between_local_tools_skips_the_rest() {
    let state_seed = user_state("do three things");
    let steering = state_seed.steering_handle();
    let mut registry = ToolRegistry::new();
    registry.register_local("first", "", ToolParameters::empty(), move |_, _| {
        let steering = steering.clone();
        async move {
            steering.push(AgentMessage::user("stop, do something else"));
            Ok(json!("first done"))
        }
    });
    register_echo(&mut registry, "second");
    register_echo(&mut registry, "third");
    let backend = ScriptedBackend::new(
        "p",
        "m",
        vec![
            Ok(calls(&[("1", "first"), ("2", "second"), ("3", "third")])),
            Ok(text("switched")),
        ],
    );
    let requests = backend.requests();
    let turn_loop = single_backend_loop(registry, backend);
    let mut state = state_seed;

    let result = turn_loop.run(&mut state, &CancellationToken::new()).await;

    assert_eq!(
        kinds(&result),
        vec![
            "turn_start",
            "turn_end",
            "tool_executed",
            "steering_interrupt",
            "turn_start",
            "turn_end",
            "done"
        ]
    );
    assert_eq!(executed_tools(&result), vec!["first".to_string()]);
    let interrupt = result.payloads().find_map(|p| match p {
        LoopEventPayload::SteeringInterrupt {
            skipped_tools,
            skipped_call_ids,
            injected,
            ..
        } => Some((skipped_tools.clone(), skipped_call_ids.clone(), *injected)),
        _ => None,
    });
    assert_eq!(
        interrupt,
        Some((
            vec!["second".to_string(), "third".to_string()],
            vec!["2".to_string(), "3".to_string()],
            1
        ))
    );

    let requests = requests.lock().expect("request lock");
    let second_turn = &requests[1].messages;
    assert_eq!(
        second_turn.last().map(Message::text).as_deref(),
        Some("stop, do something else")
    );
    let skipped: Vec<(String, bool)> = second_turn
        .iter()
        .flat_map(|m| m.tool_results())
        .filter(|r| r.tool_call_id != "1")
        .map(|r| (r.tool_call_id.clone(), r.is_error))
        .collect();
    assert_eq!(
        skipped,
        vec![("2".to_string(), true), ("3".to_string(), true)]
    );
    assert!(check_tool_pairing(second_turn).is_ok());
}

#[tokio::test]
async fn steering_during_last_tool_joins_next_turn_without_interrupt() {
    let state_seed = user_state("go");
    let steering = state_seed.steering_handle();
    let mut registry = ToolRegistry::new();
    registry.register_local("only", "", ToolParameters::empty(), move |_, _| {
        let steering = steering.clone();
        async move {
            steering.push(AgentMessage::user("also check the tests"));
            Ok(json!("ok"))
        }
    });
    let backend = ScriptedBackend::new("p", "m", vec![Ok(calls(&[("1", "only")])), Ok(text("done"))]);
    let requests = backend.requests();
    let turn_loop = single_backend_loop(registry, backend);
    let mut state = state_seed;

    let result = turn_loop.run(&mut state, &CancellationToken::new()).await;

    assert!(!kinds(&result).contains(&"steering_interrupt"));
    let requests = requests.lock().expect("request lock");
    assert_eq!(
        requests[1].messages.last().map(Message::text).as_deref(),
        Some("also check the tests")
    );
}

#[tokio::test]
async fn backend_failure_reports_retryability_and_calls_on_error() {
    let backend = ScriptedBackend::new(
        "p",
        "m",
        vec![Err(EngineError::backend_status("p", 503, "overloaded"))],
    );
    let reported = Arc::new(Mutex::new(Vec::new()));
    let reported_in_hook = Arc::clone(&reported);
    let hooks = TurnHooks::new().on_error(move |message, retryable| {
        reported_in_hook
            .lock()
            .expect("reported lock")
            .push((message.to_string(), retryable));
        Ok(())
    });
    let turn_loop = single_backend_loop(ToolRegistry::new(), backend).with_hooks(hooks);
    let mut state = user_state("go");

    let result = turn_loop.run(&mut state, &CancellationToken::new()).await;

    assert_eq!(result.status, LoopStatus::Failed);
    assert_eq!(kinds(&result), vec!["turn_start", "error"]);
    assert!(matches!(
        result.events.last().map(|e| &e.payload),
        Some(LoopEventPayload::Error { is_retryable: true, .. })
    ));
    let reported = reported.lock().expect("reported lock");
    assert_eq!(reported.len(), 1);
    assert!(reported[0].1);
    assert_eq!(state.messages().len(), 1);
    assert_eq!(state.current_turn(), 0);
}

#[tokio::test]
async fn cancelled_token_stops_before_backend_call() {
    let backend = ScriptedBackend::new("p", "m", Vec::new());
    let requests = backend.requests();
    let turn_loop = single_backend_loop(ToolRegistry::new(), backend);
    let mut state = user_state("go");
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = turn_loop.run(&mut state, &cancel).await;

    assert_eq!(result.status, LoopStatus::Canceled);
    assert!(matches!(
        result.events.last().map(|e| &e.payload),
        Some(LoopEventPayload::Error {
            category: ErrorCategory::Cancelled,
            ..
        })
    ));
    assert!(requests.lock().expect("request lock").is_empty());
    assert_eq!(state.messages().len(), 1);
}

/// Backend whose requests never complete.
struct StalledBackend;

#[async_trait::async_trait]
impl Backend for StalledBackend {
    fn provider_name(&self) -> &str {
        "p"
    }

    fn model_id(&self) -> &str {
        "m"
    }

    async fn complete(&self, _request: &BackendRequest) -> Result<BackendResponse> {
        futures::future::pending().await
    }
}

#[tokio::test(start_paused = true)]
async fn cancellation_interrupts_in_flight_backend_call() {
    let turn_loop = TurnLoop::new(
        Arc::new(ToolRegistry::new()),
        static_resolver(Arc::new(StalledBackend)),
    );
    let mut state = user_state("go");
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let result = turn_loop.run(&mut state, &cancel).await;

    assert_eq!(result.status, LoopStatus::Canceled);
    assert_eq!(kinds(&result), vec!["turn_start", "error"]);
    assert_eq!(state.messages().len(), 1);
    assert_eq!(state.current_turn(), 0);
}

#[tokio::test]
async fn max_turns_ends_cleanly() {
    let mut registry = ToolRegistry::new();
    register_echo(&mut registry, "again");
    let backend = ScriptedBackend::new(
        "p",
        "m",
        vec![
            Ok(calls(&[("1", "again")])),
            Ok(calls(&[("2", "again")])),
            Ok(calls(&[("3", "again")])),
        ],
    );
    let requests = backend.requests();
    let turn_loop = single_backend_loop(registry, backend);
    let config = EngineConfig::builder().max_turns(2).build();
    let mut state = ConversationState::new(&config);
    state.append(AgentMessage::user("loop forever")).expect("append");

    let result = turn_loop.run(&mut state, &CancellationToken::new()).await;

    assert_eq!(result.status, LoopStatus::Done);
    assert_eq!(result.done_reason(), Some(DoneReason::MaxTurns));
    assert_eq!(requests.lock().expect("request lock").len(), 2);
    assert_eq!(state.current_turn(), 2);
    assert_eq!(executed_tools(&result).len(), 2);
}

#[tokio::test]
async fn unknown_tool_and_handler_failure_become_error_results() {
    let mut registry = ToolRegistry::new();
    registry.register_local("flaky", "", ToolParameters::empty(), |_, _| async {
        Err(EngineError::ToolExecution {
            tool_name: "flaky".into(),
            message: "disk full".into(),
        })
    });
    let backend = ScriptedBackend::new(
        "p",
        "m",
        vec![Ok(calls(&[("1", "missing"), ("2", "flaky")])), Ok(text("sorry"))],
    );
    let turn_loop = single_backend_loop(registry, backend);
    let mut state = user_state("go");

    let result = turn_loop.run(&mut state, &CancellationToken::new()).await;

    assert_eq!(result.status, LoopStatus::Done);
    let results: Vec<(String, bool, String)> = state
        .llm_messages()
        .iter()
        .flat_map(|m| m.tool_results().into_iter().cloned().collect::<Vec<_>>())
        .map(|r| (r.tool_call_id, r.is_error, r.result["error"].as_str().unwrap_or("").to_string()))
        .collect();
    assert_eq!(results.len(), 2);
    assert!(results[0].1 && results[0].2.contains("Unknown tool: missing"));
    assert!(results[1].1 && results[1].2.contains("disk full"));
}

#[tokio::test]
async fn bad_arguments_are_reported_to_the_backend() {
    let mut registry = ToolRegistry::new();
    let runs = Arc::new(AtomicUsize::new(0));
    let runs_in_tool = Arc::clone(&runs);
    registry.register_local(
        "read",
        "read a file",
        ToolParameters::object().string("path", "file path", true).build(),
        move |_, _| {
            runs_in_tool.fetch_add(1, Ordering::SeqCst);
            async { Ok(json!("contents")) }
        },
    );
    let backend = ScriptedBackend::new("p", "m", vec![Ok(calls(&[("1", "read")])), Ok(text("ok"))]);
    let turn_loop = single_backend_loop(registry, backend);
    let mut state = user_state("go");

    turn_loop.run(&mut state, &CancellationToken::new()).await;

    assert_eq!(runs.load(Ordering::SeqCst), 0);
    let result = state
        .llm_messages()
        .iter()
        .flat_map(|m| m.tool_results().into_iter().cloned().collect::<Vec<_>>())
        .next()
        .expect("tool result");
    assert!(result.is_error);
    assert!(result.result["error"]
        .as_str()
        .unwrap_or_default()
        .contains("bad tool arguments"));
}

#[tokio::test]
async fn transform_output_is_sent_and_pairing_is_enforced() {
    let backend = ScriptedBackend::new("p", "m", vec![Ok(text("ok"))]);
    let requests = backend.requests();
    let keep_last: TransformContextFn = Arc::new(|mut messages: Vec<Message>| {
        Box::pin(async move {
            let last = messages.pop();
            Ok(last.into_iter().collect())
        })
    });
    let turn_loop = single_backend_loop(ToolRegistry::new(), backend).with_transform_fn(keep_last);
    let mut state = user_state("old");
    state.append(AgentMessage::context_note("not for the model")).expect("append");
    state.append(AgentMessage::user("new")).expect("append");

    turn_loop.run(&mut state, &CancellationToken::new()).await;

    let requests = requests.lock().expect("request lock");
    let sent: Vec<String> = requests[0].messages.iter().map(Message::text).collect();
    assert_eq!(sent, vec!["new".to_string()]);
    assert_eq!(state.messages().len(), 4);
}

#[tokio::test]
async fn transform_that_splits_a_pair_fails_the_turn() {
    let mut registry = ToolRegistry::new();
    register_echo(&mut registry, "lookup");
    let backend = ScriptedBackend::new("p", "m", vec![Ok(calls(&[("1", "lookup")]))]);
    let drop_results: TransformContextFn = Arc::new(|messages: Vec<Message>| {
        Box::pin(async move {
            Ok(messages
                .into_iter()
                .filter(|m| m.tool_results().is_empty())
                .collect())
        })
    });
    let turn_loop = single_backend_loop(registry, backend).with_transform_fn(drop_results);
    let mut state = user_state("go");

    let result = turn_loop.run(&mut state, &CancellationToken::new()).await;

    assert_eq!(result.status, LoopStatus::Failed);
    assert!(matches!(
        result.events.last().map(|e| &e.payload),
        Some(LoopEventPayload::Error {
            category: ErrorCategory::ContextTransform,
            ..
        })
    ));
    // Turn 1 and its tool result were stored before the second turn failed.
    assert_eq!(state.current_turn(), 1);
    assert_eq!(state.messages().len(), 3);
}

#[tokio::test]
async fn message_hook_sees_appends_and_its_errors_are_swallowed() {
    let mut registry = ToolRegistry::new();
    register_echo(&mut registry, "lookup");
    let backend = ScriptedBackend::new("p", "m", vec![Ok(calls(&[("1", "lookup")])), Ok(text("fin"))]);
    let count = Arc::new(AtomicUsize::new(0));
    let count_in_hook = Arc::clone(&count);
    let hooks = TurnHooks::new().on_message(move |_| {
        count_in_hook.fetch_add(1, Ordering::SeqCst);
        Err(EngineError::hook("on_message", "store unavailable"))
    });
    let turn_loop = single_backend_loop(registry, backend).with_hooks(hooks);
    let mut state = user_state("go");

    let result = turn_loop.run(&mut state, &CancellationToken::new()).await;

    assert_eq!(result.status, LoopStatus::Done);
    // assistant, tool result, assistant
    assert_eq!(count.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn event_sink_sees_every_event_in_order() {
    let backend = ScriptedBackend::new("p", "m", vec![Ok(text("hi"))]);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_in_sink = Arc::clone(&seen);
    let sink: EventSink = Arc::new(move |event: LoopEvent| {
        seen_in_sink.lock().expect("sink lock").push(event);
    });
    let turn_loop = single_backend_loop(ToolRegistry::new(), backend).with_event_sink(sink);
    let mut state = user_state("go");

    let result = turn_loop.run(&mut state, &CancellationToken::new()).await;

    assert_eq!(*seen.lock().expect("sink lock"), result.events);
}

#[tokio::test]
async fn registered_tools_are_offered_to_the_backend() {
    let mut registry = ToolRegistry::new();
    register_echo(&mut registry, "lookup");
    registry.register_remote("browser", "", ToolParameters::empty());
    let backend = ScriptedBackend::new("p", "m", vec![Ok(text("ok"))]);
    let requests = backend.requests();
    let turn_loop = single_backend_loop(registry, backend);
    let mut state = user_state("go");

    turn_loop.run(&mut state, &CancellationToken::new()).await;

    let requests = requests.lock().expect("request lock");
    let names: Vec<String> = requests[0]
        .tools
        .as_ref()
        .map(|tools| tools.iter().map(|t| t.name.clone()).collect())
        .unwrap_or_default();
    assert_eq!(names, vec!["lookup".to_string(), "browser".to_string()]);
}

#[tokio::test]
async fn steering_queued_before_run_reaches_the_first_request() {
    let backend = ScriptedBackend::new("p", "m", vec![Ok(text("doing Y"))]);
    let requests = backend.requests();
    let turn_loop = single_backend_loop(ToolRegistry::new(), backend);
    let mut state = user_state("go");
    state.enqueue_steering(AgentMessage::user("actually, do Y"));

    let result = turn_loop.run(&mut state, &CancellationToken::new()).await;

    assert_eq!(result.status, LoopStatus::Done);
    assert_eq!(kinds(&result), vec!["turn_start", "turn_end", "done"]);
    let requests = requests.lock().expect("request lock");
    let sent: Vec<String> = requests[0].messages.iter().map(Message::text).collect();
    assert_eq!(sent, vec!["go".to_string(), "actually, do Y".to_string()]);
    assert!(state.steering_handle().is_empty());
}

#[tokio::test]
async fn steering_after_text_response_runs_before_follow_ups() {
    let state_seed = user_state("go");
    let steering = state_seed.steering_handle();
    let follow_up = state_seed.follow_up_handle();
    let hooks = TurnHooks::new().on_turn_end(move |info| {
        if info.turn == 1 {
            steering.push(AgentMessage::user("steer"));
            follow_up.push(AgentMessage::user("follow"));
        }
        async { Ok(true) }
    });
    let backend = ScriptedBackend::new("p", "m", vec![Ok(text("a")), Ok(text("b")), Ok(text("c"))]);
    let requests = backend.requests();
    let turn_loop = single_backend_loop(ToolRegistry::new(), backend).with_hooks(hooks);
    let mut state = state_seed;

    let result = turn_loop.run(&mut state, &CancellationToken::new()).await;

    assert_eq!(result.status, LoopStatus::Done);
    assert_eq!(result.final_text, "c");
    let requests = requests.lock().expect("request lock");
    let last_sent: Vec<String> = requests
        .iter()
        .map(|r| r.messages.last().map(Message::text).unwrap_or_default())
        .collect();
    assert_eq!(last_sent, vec!["go", "steer", "follow"]);
    assert!(state.steering_handle().is_empty());
    assert!(state.follow_up_handle().is_empty());
}

#[tokio::test]
async fn resolver_failure_calls_on_error_and_fails() {
    let resolver: ProviderResolver = Arc::new(|| {
        Box::pin(async { Err::<Arc<dyn Backend>, _>(EngineError::Network("dns failure".into())) })
    });
    let reported = Arc::new(Mutex::new(Vec::new()));
    let reported_in_hook = Arc::clone(&reported);
    let hooks = TurnHooks::new().on_error(move |message, retryable| {
        reported_in_hook
            .lock()
            .expect("reported lock")
            .push((message.to_string(), retryable));
        Ok(())
    });
    let turn_loop = TurnLoop::new(Arc::new(ToolRegistry::new()), resolver).with_hooks(hooks);
    let mut state = user_state("go");

    let result = turn_loop.run(&mut state, &CancellationToken::new()).await;

    assert_eq!(result.status, LoopStatus::Failed);
    assert_eq!(kinds(&result), vec!["turn_start", "error"]);
    assert!(matches!(
        result.events.last().map(|e| &e.payload),
        Some(LoopEventPayload::Error {
            category: ErrorCategory::Network,
            is_retryable: true,
            ..
        })
    ));
    let reported = reported.lock().expect("reported lock");
    assert_eq!(*reported, vec![("Network error: dns failure".to_string(), true)]);
    assert_eq!(state.messages().len(), 1);
}

#[tokio::test]
async fn failing_error_hook_does_not_mask_the_backend_error() {
    let backend = ScriptedBackend::new(
        "p",
        "m",
        vec![Err(EngineError::backend("p", "invalid request body", false))],
    );
    let hooks = TurnHooks::new().on_error(|_, _| Err(EngineError::hook("on_error", "alerting down")));
    let turn_loop = single_backend_loop(ToolRegistry::new(), backend).with_hooks(hooks);
    let mut state = user_state("go");

    let result = turn_loop.run(&mut state, &CancellationToken::new()).await;

    assert_eq!(result.status, LoopStatus::Failed);
    let error = result.events.last().map(|e| e.payload.clone());
    match error {
        Some(LoopEventPayload::Error {
            message,
            is_retryable,
            category,
        }) => {
            assert!(message.contains("invalid request body"), "{message}");
            assert!(!is_retryable);
            assert_eq!(category, ErrorCategory::Backend);
        }
        other => panic!("expected error event, got {other:?}"),
    }
}

#[tokio::test]
async fn steering_before_a_remote_call_skips_it_instead_of_halting() {
    let state_seed = user_state("go");
    let steering = state_seed.steering_handle();
    let mut registry = ToolRegistry::new();
    registry.register_local("local_a", "", ToolParameters::empty(), move |_, _| {
        let steering = steering.clone();
        async move {
            steering.push(AgentMessage::user("never mind the browser"));
            Ok(json!("a done"))
        }
    });
    registry.register_remote("remote_b", "runs on the client", ToolParameters::empty());
    let backend = ScriptedBackend::new(
        "p",
        "m",
        vec![Ok(calls(&[("a", "local_a"), ("b", "remote_b")])), Ok(text("ok"))],
    );
    let turn_loop = single_backend_loop(registry, backend);
    let mut state = state_seed;

    let result = turn_loop.run(&mut state, &CancellationToken::new()).await;

    assert_eq!(result.status, LoopStatus::Done);
    assert!(result.pending_remote_calls.is_empty());
    assert!(!kinds(&result).contains(&"remote_tool_requested"));
    let skipped = result.payloads().find_map(|p| match p {
        LoopEventPayload::SteeringInterrupt { skipped_tools, .. } => Some(skipped_tools.clone()),
        _ => None,
    });
    assert_eq!(skipped, Some(vec!["remote_b".to_string()]));
    let b_result = state
        .llm_messages()
        .iter()
        .flat_map(|m| m.tool_results().into_iter().cloned().collect::<Vec<_>>())
        .find(|r| r.tool_call_id == "b");
    assert!(b_result.is_some_and(|r| r.is_error));
}

#[tokio::test]
async fn transform_error_is_reported_as_context_transform() {
    let backend = ScriptedBackend::new("p", "m", Vec::new());
    let requests = backend.requests();
    let failing: TransformContextFn = Arc::new(|_messages: Vec<Message>| {
        Box::pin(async { Err::<Vec<Message>, _>(EngineError::InvalidState("summary store offline".into())) })
    });
    let turn_loop = single_backend_loop(ToolRegistry::new(), backend).with_transform_fn(failing);
    let mut state = user_state("go");

    let result = turn_loop.run(&mut state, &CancellationToken::new()).await;

    assert_eq!(result.status, LoopStatus::Failed);
    match result.events.last().map(|e| &e.payload) {
        Some(LoopEventPayload::Error { message, category, .. }) => {
            assert_eq!(*category, ErrorCategory::ContextTransform);
            assert!(message.contains("summary store offline"), "{message}");
        }
        other => panic!("expected error event, got {other:?}"),
    }
    assert!(requests.lock().expect("request lock").is_empty());
}

#[tokio::test]
async fn cancelled_token_does_not_resume_pending_tools() {
    let runs = Arc::new(AtomicUsize::new(0));
    let runs_in_tool = Arc::clone(&runs);
    let mut registry = ToolRegistry::new();
    registry.register_local("count", "", ToolParameters::empty(), move |_, _| {
        let runs = Arc::clone(&runs_in_tool);
        async move {
            runs.fetch_add(1, Ordering::SeqCst);
            Ok(json!("counted"))
        }
    });
    let backend = ScriptedBackend::new("p", "m", Vec::new());
    let requests = backend.requests();
    let turn_loop = single_backend_loop(registry, backend);
    let mut state = user_state("go");
    state
        .append(AgentMessage::Llm(Message::assistant(
            vec![ContentBlock::ToolCall(ToolCall::new("1", "count", json!({})))],
            Origin::new("m", "p"),
        )))
        .expect("append assistant");
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = turn_loop.run(&mut state, &cancel).await;

    assert_eq!(result.status, LoopStatus::Canceled);
    assert_eq!(kinds(&result), vec!["error"]);
    assert_eq!(runs.load(Ordering::SeqCst), 0);
    assert_eq!(state.pending_tool_calls().len(), 1);
    assert!(requests.lock().expect("request lock").is_empty());
}
