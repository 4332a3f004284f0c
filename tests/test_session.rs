//! Tests for `CopilotSession`: send/wait, event delivery and close

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use common::{Harness, WAIT, test_options};
use futures::StreamExt;
use kodegen_copilot_agent::{CopilotError, EventErrorPolicy, SessionConfig, SessionEventKind};
use serde_json::json;
use tokio::sync::mpsc;

#[tokio::test]
async fn test_create_session_sends_declarations() {
    let mut harness = Harness::new(test_options().build().unwrap());
    let mut peer = harness.start().await;

    let config = SessionConfig::builder()
        .model("gpt-5")
        .tool(kodegen_copilot_agent::ToolDefinition::new(
            "echo",
            "Echo back",
            json!({ "type": "object" }),
            |_| async { Ok("unused") },
        ))
        .build();
    let client = harness.client.clone();
    let task = tokio::spawn(async move { client.create_session(config).await });

    let (id, params) = peer.expect_request("session.create").await;
    assert_eq!(params["model"], "gpt-5");
    assert_eq!(params["tools"][0]["name"], "echo");
    assert!(params["tools"][0].get("handler").is_none());
    peer.reply(&id, json!({ "sessionId": "s1", "workspacePath": "/tmp/ws" }))
        .await;

    let session = task.await.unwrap().unwrap();
    assert_eq!(session.session_id().as_str(), "s1");
    assert_eq!(
        session.workspace_path(),
        Some(std::path::Path::new("/tmp/ws"))
    );
}

#[tokio::test]
async fn test_send_and_wait_returns_last_assistant_message() {
    let mut harness = Harness::new(test_options().build().unwrap());
    let mut peer = harness.start().await;
    let session = harness
        .create_session(&mut peer, "s1", SessionConfig::default())
        .await;

    let waiting = {
        let session = session.clone();
        tokio::spawn(async move { session.send_and_wait("What is 2+2?", None).await })
    };
    let (id, params) = peer.expect_request("session.send").await;
    assert_eq!(params["sessionId"], "s1");
    assert_eq!(params["prompt"], "What is 2+2?");
    peer.reply(&id, json!({ "messageId": "m1" })).await;

    peer.event("s1", "assistant.turn_start", json!({})).await;
    peer.event("s1", "assistant.message", json!({ "messageId": "a1", "content": "draft" }))
        .await;
    peer.event("s1", "assistant.message", json!({ "messageId": "a2", "content": "4" }))
        .await;
    peer.event("s1", "session.idle", json!({})).await;

    let reply = waiting.await.unwrap().unwrap().expect("assistant message");
    assert_eq!(reply.content.as_deref(), Some("4"));
}

#[tokio::test]
async fn test_send_and_wait_without_message_resolves_none() {
    let mut harness = Harness::new(test_options().build().unwrap());
    let mut peer = harness.start().await;
    let session = harness
        .create_session(&mut peer, "s1", SessionConfig::default())
        .await;

    let waiting = {
        let session = session.clone();
        tokio::spawn(async move { session.send_and_wait("noop", None).await })
    };
    let (id, _) = peer.expect_request("session.send").await;
    // Idle arrives before the send response.
    peer.event("s1", "session.idle", json!({})).await;
    peer.reply(&id, json!({ "messageId": "m1" })).await;

    assert!(waiting.await.unwrap().unwrap().is_none());
}

#[tokio::test]
async fn test_send_and_wait_rejects_on_session_error() {
    let mut harness = Harness::new(test_options().build().unwrap());
    let mut peer = harness.start().await;
    let session = harness
        .create_session(&mut peer, "s1", SessionConfig::default())
        .await;

    let waiting = {
        let session = session.clone();
        tokio::spawn(async move { session.send_and_wait("boom", None).await })
    };
    let (id, _) = peer.expect_request("session.send").await;
    peer.reply(&id, json!({})).await;
    peer.event(
        "s1",
        "session.error",
        json!({ "errorType": "model", "message": "rate limited" }),
    )
    .await;

    let err = waiting.await.unwrap().unwrap_err();
    assert!(matches!(err, CopilotError::Session(ref m) if m == "rate limited"));
}

#[tokio::test]
async fn test_send_and_wait_times_out() {
    let mut harness = Harness::new(test_options().build().unwrap());
    let mut peer = harness.start().await;
    let session = harness
        .create_session(&mut peer, "s1", SessionConfig::default())
        .await;

    let waiting = {
        let session = session.clone();
        tokio::spawn(async move {
            session
                .send_and_wait("slow", Some(Duration::from_millis(100)))
                .await
        })
    };
    let (id, _) = peer.expect_request("session.send").await;
    peer.reply(&id, json!({})).await;

    let err = waiting.await.unwrap().unwrap_err();
    assert!(err.is_timeout());

    // The late end of the timed-out turn reaches subscribers but no waiter.
    let (idle_tx, mut idle_rx) = mpsc::unbounded_channel();
    let _idle = session
        .on_type("session.idle", move |_| {
            let _ = idle_tx.send(());
            Ok(())
        })
        .unwrap();
    peer.event("s1", "assistant.message", json!({ "content": "late" }))
        .await;
    peer.event("s1", "session.idle", json!({})).await;
    tokio::time::timeout(WAIT, idle_rx.recv()).await.unwrap().unwrap();

    let waiting = {
        let session = session.clone();
        tokio::spawn(async move { session.send_and_wait("again", None).await })
    };
    let (id, _) = peer.expect_request("session.send").await;
    peer.reply(&id, json!({})).await;
    peer.event("s1", "assistant.message", json!({ "content": "fresh" }))
        .await;
    peer.event("s1", "session.idle", json!({})).await;

    let reply = waiting.await.unwrap().unwrap().unwrap();
    assert_eq!(reply.content.as_deref(), Some("fresh"));
}

#[tokio::test]
async fn test_typed_subscription_sees_only_its_type() {
    let mut harness = Harness::new(test_options().build().unwrap());
    let mut peer = harness.start().await;
    let session = harness
        .create_session(&mut peer, "s1", SessionConfig::default())
        .await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let _messages = session
        .on_type("assistant.message", move |event| {
            let content = event
                .as_assistant_message()
                .and_then(|m| m.content.clone())
                .unwrap_or_default();
            let _ = tx.send(content);
            Ok(())
        })
        .unwrap();

    peer.event("s1", "assistant.turn_start", json!({})).await;
    peer.event("s1", "assistant.message", json!({ "content": "one" }))
        .await;
    peer.event("s1", "tool.execution_start", json!({})).await;
    peer.event("s1", "assistant.message", json!({ "content": "two" }))
        .await;

    assert_eq!(tokio::time::timeout(WAIT, rx.recv()).await.unwrap().unwrap(), "one");
    assert_eq!(tokio::time::timeout(WAIT, rx.recv()).await.unwrap().unwrap(), "two");
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_idle_of_other_session_does_not_resolve_waiter() {
    let mut harness = Harness::new(test_options().build().unwrap());
    let mut peer = harness.start().await;
    let first = harness
        .create_session(&mut peer, "s1", SessionConfig::default())
        .await;
    let _second = harness
        .create_session(&mut peer, "s2", SessionConfig::default())
        .await;

    let waiting = {
        let session = first.clone();
        tokio::spawn(async move { session.send_and_wait("hi", None).await })
    };
    let (id, _) = peer.expect_request("session.send").await;
    peer.reply(&id, json!({})).await;

    peer.event("s2", "assistant.message", json!({ "content": "wrong" }))
        .await;
    peer.event("s2", "session.idle", json!({})).await;
    peer.event("s1", "assistant.message", json!({ "content": "right" }))
        .await;
    peer.event("s1", "session.idle", json!({})).await;

    let reply = waiting.await.unwrap().unwrap().unwrap();
    assert_eq!(reply.content.as_deref(), Some("right"));
}

#[tokio::test]
async fn test_events_are_delivered_in_order() {
    let mut harness = Harness::new(test_options().build().unwrap());
    let mut peer = harness.start().await;
    let session = harness
        .create_session(&mut peer, "s1", SessionConfig::default())
        .await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let _subscription = session
        .on(move |event| {
            let _ = tx.send(event.event_type.clone());
            Ok(())
        })
        .unwrap();

    let kinds = [
        "assistant.turn_start",
        "assistant.message_delta",
        "tool.execution_start",
        "tool.execution_complete",
        "assistant.turn_end",
        "session.idle",
    ];
    for kind in kinds {
        peer.event("s1", kind, json!({})).await;
    }
    for kind in kinds {
        let seen = tokio::time::timeout(WAIT, rx.recv()).await.unwrap().unwrap();
        assert_eq!(seen, kind);
    }
}

#[tokio::test]
async fn test_unknown_event_type_is_still_delivered() {
    let mut harness = Harness::new(test_options().build().unwrap());
    let mut peer = harness.start().await;
    let session = harness
        .create_session(&mut peer, "s1", SessionConfig::default())
        .await;

    let mut events = Box::pin(session.events().unwrap());
    peer.event("s1", "future.kind", json!({ "x": 1 })).await;

    let event = tokio::time::timeout(WAIT, events.next()).await.unwrap().unwrap();
    match event.kind {
        SessionEventKind::Unknown { event_type, data } => {
            assert_eq!(event_type, "future.kind");
            assert_eq!(data["x"], 1);
        }
        other => panic!("unexpected kind: {other:?}"),
    }
}

#[tokio::test]
async fn test_propagate_policy_skips_remaining_subscribers() {
    let mut harness = Harness::new(test_options().build().unwrap());
    let mut peer = harness.start().await;
    let session = harness
        .create_session(&mut peer, "s1", SessionConfig::default())
        .await;
    assert_eq!(
        session.event_error_policy(),
        EventErrorPolicy::PropagateAndLogErrors
    );

    let _failing = session
        .on(|_| Err(CopilotError::handler("subscriber failed")))
        .unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let _recording = session
        .on(move |event| {
            let _ = tx.send(event.event_type.clone());
            Ok(())
        })
        .unwrap();

    peer.event("s1", "assistant.turn_start", json!({})).await;
    peer.event("s1", "session.idle", json!({})).await;

    // Still nothing after both events: let a suppress-mode event through as a marker.
    tokio::time::sleep(Duration::from_millis(50)).await;
    session.set_event_error_policy(EventErrorPolicy::SuppressAndLogErrors);
    peer.event("s1", "assistant.turn_end", json!({})).await;

    let seen = tokio::time::timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(seen, "assistant.turn_end");
}

#[tokio::test]
async fn test_panicking_subscriber_is_isolated() {
    let mut harness = Harness::new(test_options().build().unwrap());
    let mut peer = harness.start().await;
    let session = harness
        .create_session(&mut peer, "s1", SessionConfig::default())
        .await;
    session.set_event_error_policy(EventErrorPolicy::SuppressAndLogErrors);

    let _panicking = session.on(|_| panic!("subscriber bug")).unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let _recording = session
        .on(move |event| {
            let _ = tx.send(event.event_type.clone());
            Ok(())
        })
        .unwrap();

    peer.event("s1", "assistant.turn_start", json!({})).await;
    peer.event("s1", "assistant.turn_end", json!({})).await;
    assert_eq!(rx.recv().await.unwrap(), "assistant.turn_start");
    assert_eq!(rx.recv().await.unwrap(), "assistant.turn_end");
}

#[tokio::test]
async fn test_error_handler_sees_every_failure() {
    let mut harness = Harness::new(test_options().build().unwrap());
    let mut peer = harness.start().await;
    let session = harness
        .create_session(&mut peer, "s1", SessionConfig::default())
        .await;
    session.set_event_error_policy(EventErrorPolicy::SuppressAndLogErrors);

    let (tx, mut rx) = mpsc::unbounded_channel();
    session.set_event_error_handler(move |event, error| {
        let _ = tx.send(format!("{}: {error}", event.event_type));
        Ok(())
    });
    let _failing = session.on(|_| Err(CopilotError::handler("nope"))).unwrap();

    peer.event("s1", "assistant.turn_start", json!({})).await;
    let seen = tokio::time::timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert!(seen.starts_with("assistant.turn_start"));
    assert!(seen.contains("nope"));
}

#[tokio::test]
async fn test_failing_error_handler_halts_delivery_of_that_event() {
    let mut harness = Harness::new(test_options().build().unwrap());
    let mut peer = harness.start().await;
    let session = harness
        .create_session(&mut peer, "s1", SessionConfig::default())
        .await;
    session.set_event_error_policy(EventErrorPolicy::SuppressAndLogErrors);

    let failures = Arc::new(AtomicUsize::new(0));
    let counter = failures.clone();
    session.set_event_error_handler(move |_, _| {
        counter.fetch_add(1, Ordering::SeqCst);
        Err(CopilotError::handler("handler broke too"))
    });
    let _failing = session
        .on(|event| {
            if event.event_type == "assistant.turn_start" {
                Err(CopilotError::handler("first"))
            } else {
                Ok(())
            }
        })
        .unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let _recording = session
        .on(move |event| {
            let _ = tx.send(event.event_type.clone());
            Ok(())
        })
        .unwrap();

    peer.event("s1", "assistant.turn_start", json!({})).await;
    peer.event("s1", "assistant.turn_end", json!({})).await;

    // The second subscriber never saw the first event.
    assert_eq!(rx.recv().await.unwrap(), "assistant.turn_end");
    assert_eq!(failures.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_unsubscribe_stops_delivery() {
    let mut harness = Harness::new(test_options().build().unwrap());
    let mut peer = harness.start().await;
    let session = harness
        .create_session(&mut peer, "s1", SessionConfig::default())
        .await;

    let count = Arc::new(AtomicUsize::new(0));
    let counter = count.clone();
    let subscription = session
        .on(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let _marker = session
        .on(move |event| {
            let _ = tx.send(event.event_type.clone());
            Ok(())
        })
        .unwrap();

    peer.event("s1", "assistant.turn_start", json!({})).await;
    rx.recv().await.unwrap();
    assert!(subscription.unsubscribe());
    assert!(!subscription.unsubscribe());

    peer.event("s1", "assistant.turn_end", json!({})).await;
    rx.recv().await.unwrap();
    assert_eq!(count.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_close_fails_waiters_and_rejects_operations() {
    let mut harness = Harness::new(test_options().build().unwrap());
    let mut peer = harness.start().await;
    let session = harness
        .create_session(&mut peer, "s1", SessionConfig::default())
        .await;

    let waiting = {
        let session = session.clone();
        tokio::spawn(async move { session.send_and_wait("hi", None).await })
    };
    let (id, _) = peer.expect_request("session.send").await;
    peer.reply(&id, json!({})).await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    session.close();
    session.close();
    assert!(session.is_closed());

    let err = waiting.await.unwrap().unwrap_err();
    assert!(matches!(err, CopilotError::SessionClosed(_)), "unexpected error: {err}");
    assert!(matches!(
        session.send("again").await,
        Err(CopilotError::SessionClosed(_))
    ));
    assert!(session.on(|_| Ok(())).is_err());
}

#[tokio::test]
async fn test_connection_loss_fails_waiters() {
    let mut harness = Harness::new(test_options().auto_restart(false).build().unwrap());
    let mut peer = harness.start().await;
    let session = harness
        .create_session(&mut peer, "s1", SessionConfig::default())
        .await;

    let waiting = {
        let session = session.clone();
        tokio::spawn(async move { session.send_and_wait("hi", None).await })
    };
    let (id, _) = peer.expect_request("session.send").await;
    peer.reply(&id, json!({})).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    drop(peer);

    let err = waiting.await.unwrap().unwrap_err();
    assert!(err.is_connection_lost(), "unexpected error: {err}");
}

#[tokio::test]
async fn test_stop_closes_sessions() {
    let mut harness = Harness::new(test_options().build().unwrap());
    let mut peer = harness.start().await;
    let session = harness
        .create_session(&mut peer, "s1", SessionConfig::default())
        .await;

    harness.client.stop().await.unwrap();
    assert!(session.is_closed());
}

#[tokio::test]
async fn test_abort_and_get_messages() {
    let mut harness = Harness::new(test_options().build().unwrap());
    let mut peer = harness.start().await;
    let session = harness
        .create_session(&mut peer, "s1", SessionConfig::default())
        .await;

    let task = {
        let session = session.clone();
        tokio::spawn(async move { session.abort().await })
    };
    let (id, params) = peer.expect_request("session.abort").await;
    assert_eq!(params["sessionId"], "s1");
    peer.reply(&id, json!({})).await;
    task.await.unwrap().unwrap();

    let task = {
        let session = session.clone();
        tokio::spawn(async move { session.get_messages().await })
    };
    let (id, _) = peer.expect_request("session.getMessages").await;
    peer.reply(
        &id,
        json!({ "events": [
            { "type": "user.message", "data": { "content": "hi" } },
            { "type": "assistant.message", "data": { "content": "hello" } }
        ] }),
    )
    .await;
    let events = task.await.unwrap().unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(
        events[1].as_assistant_message().and_then(|m| m.content.as_deref()),
        Some("hello")
    );
}

#[tokio::test]
async fn test_resume_session_preregisters_handlers() {
    let mut harness = Harness::new(test_options().build().unwrap());
    let mut peer = harness.start().await;

    let config = SessionConfig::builder()
        .tool(kodegen_copilot_agent::ToolDefinition::new(
            "now",
            "Current time",
            json!({ "type": "object" }),
            |_| async { Ok("noon") },
        ))
        .build();
    let client = harness.client.clone();
    let task = tokio::spawn(async move { client.resume_session("s7", config).await });
    let (id, params) = peer.expect_request("session.resume").await;
    assert_eq!(params["sessionId"], "s7");

    // A reverse call racing the resume response already finds the tool.
    let answer = peer
        .call(
            500,
            "tool.call",
            json!({ "sessionId": "s7", "toolCallId": "c1", "toolName": "now", "arguments": {} }),
        )
        .await;
    assert_eq!(answer["result"]["result"]["textResultForLlm"], "noon");

    peer.reply(&id, json!({ "sessionId": "s7" })).await;
    let session = task.await.unwrap().unwrap();
    assert_eq!(session.session_id().as_str(), "s7");
}
