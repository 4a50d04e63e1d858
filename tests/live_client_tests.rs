// Integration tests for the live session client
//
// These tests drive the client against an in-memory transport and play the
// server's part by hand: acknowledging setup, pushing frames and closing.

mod common;

use common::*;
use loqa_live::live::{
    ClientMessage, ClientSettings, ConnectionState, Content, FunctionResponse, LiveConfig,
    LiveError, LiveEvent, MediaChunk, ResumptionToken, TurnRole,
};
use chrono::{Duration as ChronoDuration, Utc};
use serde_json::json;
use std::time::Duration;

#[tokio::test]
async fn test_connect_reaches_ready() {
    let (client, transport, mut servers) = client_with(test_settings());
    let mut events = client.subscribe();

    let (_server, setup) = connect_ready(&client, &mut servers, None).await;

    assert_eq!(client.state(), ConnectionState::Ready);
    assert_eq!(transport.opens(), 1);
    assert_eq!(setup.model, "models/gemini-live-2.5-flash-preview");
    // Resumption is negotiated even without a token
    assert_eq!(setup.session_resumption.handle, None);

    wait_for(&mut events, |e| matches!(e, LiveEvent::Open)).await;
    wait_for(&mut events, |e| matches!(e, LiveEvent::SetupAcknowledged)).await;
}

#[tokio::test]
async fn test_connect_carries_resumption_token() {
    let (client, _transport, mut servers) = client_with(test_settings());

    let (_server, setup) = connect_ready(&client, &mut servers, Some("handle-1")).await;

    assert_eq!(setup.session_resumption.handle.as_deref(), Some("handle-1"));
    assert_eq!(client.resumption_token().as_deref(), Some("handle-1"));
}

#[tokio::test(start_paused = true)]
async fn test_setup_timeout_returns_to_disconnected() {
    let (client, _transport, mut servers) = client_with(test_settings());

    let connecting = {
        let client = client.clone();
        tokio::spawn(async move {
            client
                .connect("gemini-live-2.5-flash-preview", &LiveConfig::default(), None)
                .await
        })
    };

    // Keep the server side alive but never acknowledge
    let mut server = next_server(&mut servers).await;
    server.expect_setup().await;
    assert_eq!(client.state(), ConnectionState::Connected);

    let result = connecting.await.unwrap();
    assert!(matches!(result, Err(LiveError::SetupTimeout(_))));
    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert_eq!(client.session_time_remaining(), None);
}

#[tokio::test]
async fn test_duplicate_connect_is_ignored() {
    let (client, transport, mut servers) = client_with(test_settings());

    let connecting = {
        let client = client.clone();
        tokio::spawn(async move {
            client
                .connect("gemini-live-2.5-flash-preview", &LiveConfig::default(), None)
                .await
        })
    };
    let mut server = next_server(&mut servers).await;

    // Second attempt while the first is still waiting for setup
    let second = client
        .connect("gemini-live-2.5-flash-preview", &LiveConfig::default(), None)
        .await
        .unwrap();
    assert!(!second);
    assert_eq!(transport.opens(), 1);

    server.expect_setup().await;
    server.ack().await;
    assert!(connecting.await.unwrap().unwrap());

    // Also a no-op once ready
    let third = client
        .connect("gemini-live-2.5-flash-preview", &LiveConfig::default(), None)
        .await
        .unwrap();
    assert!(!third);
    assert_eq!(transport.opens(), 1);
}

#[tokio::test]
async fn test_disconnect_cancels_pending_setup() {
    let (client, _transport, mut servers) = client_with(test_settings());

    let connecting = {
        let client = client.clone();
        tokio::spawn(async move {
            client
                .connect("gemini-live-2.5-flash-preview", &LiveConfig::default(), None)
                .await
        })
    };
    let mut server = next_server(&mut servers).await;
    server.expect_setup().await;

    assert!(client.disconnect());
    let result = connecting.await.unwrap();
    assert!(matches!(result, Err(LiveError::Cancelled)));
    assert_eq!(client.state(), ConnectionState::Disconnected);

    // Nothing left to close
    assert!(!client.disconnect());
}

#[tokio::test]
async fn test_realtime_input_dropped_until_ready() {
    let (client, _transport, mut servers) = client_with(test_settings());

    // Disconnected: nothing to send to
    assert!(!client.send_realtime_input(vec![MediaChunk::pcm(vec![0; 320], 16_000)]));

    let connecting = {
        let client = client.clone();
        tokio::spawn(async move {
            client
                .connect("gemini-live-2.5-flash-preview", &LiveConfig::default(), None)
                .await
        })
    };
    let mut server = next_server(&mut servers).await;
    server.expect_setup().await;

    // Connected but not acknowledged: dropped, not queued
    assert!(!client.send_realtime_input(vec![MediaChunk::pcm(vec![0; 320], 16_000)]));
    assert!(!client.send(Content::user_text("too early"), true).await.unwrap());

    server.ack().await;
    assert!(connecting.await.unwrap().unwrap());

    assert!(client.send(Content::user_text("hello"), true).await.unwrap());
    match server.next_message().await {
        ClientMessage::ClientContent(content) => {
            assert!(content.turn_complete);
            assert_eq!(content.turns[0].parts[0].text.as_deref(), Some("hello"));
        }
        other => panic!("expected client content, got {:?}", other),
    }

    assert!(client.send_realtime_input(vec![MediaChunk::pcm(vec![0; 320], 16_000)]));
    match server.next_message().await {
        ClientMessage::RealtimeInput(input) => {
            assert_eq!(input.media_chunks.len(), 1);
            assert!(input.media_chunks[0].mime_type.starts_with("audio/pcm"));
        }
        other => panic!("expected realtime input, got {:?}", other),
    }
}

#[tokio::test]
async fn test_frame_demultiplexed_in_order() {
    let (client, _transport, mut servers) = client_with(test_settings());
    let (server, _) = connect_ready(&client, &mut servers, None).await;
    let mut events = client.subscribe();

    server
        .send_json(json!({
            "serverContent": {
                "outputTranscription": { "text": "Hi" },
                "modelTurn": {
                    "role": "model",
                    "parts": [
                        { "inlineData": { "mimeType": "audio/pcm;rate=24000", "data": "AQID" } },
                        { "text": "Hi" }
                    ]
                },
                "turnComplete": true
            }
        }))
        .await;

    let mut received = Vec::new();
    for _ in 0..4 {
        received.push(wait_for(&mut events, |_| true).await);
    }

    assert!(matches!(&received[0], LiveEvent::OutputTranscriptFragment(f) if f.text == "Hi" && !f.is_final));
    assert!(matches!(&received[1], LiveEvent::Audio { data, .. } if data == &vec![1u8, 2, 3]));
    assert!(matches!(&received[2], LiveEvent::Content(part) if part.text.as_deref() == Some("Hi")));
    assert!(matches!(&received[3], LiveEvent::TurnComplete));

    // Audio and text both count against the model turn
    let budget = client.context_budget();
    assert!(budget.used() > 0);
    assert_eq!(budget.turns().last().map(|t| t.role), Some(TurnRole::Model));
}

#[tokio::test]
async fn test_unrecognized_frames_are_ignored() {
    let (client, _transport, mut servers) = client_with(test_settings());
    let (server, _) = connect_ready(&client, &mut servers, None).await;
    let mut events = client.subscribe();

    server
        .inbound
        .send(loqa_live::live::InboundFrame::Text("not json".to_string()))
        .await
        .unwrap();
    server.send_json(json!({ "somethingNew": { "x": 1 } })).await;
    server.turn_complete().await;

    // The first event to come through is the valid frame
    let event = wait_for(&mut events, |_| true).await;
    assert!(matches!(event, LiveEvent::TurnComplete));
    assert_eq!(client.state(), ConnectionState::Ready);
}

#[tokio::test]
async fn test_tool_call_round_trip() {
    let (client, _transport, mut servers) = client_with(test_settings());
    let (mut server, _) = connect_ready(&client, &mut servers, None).await;
    let mut events = client.subscribe();

    server
        .send_json(json!({
            "toolCall": { "functionCalls": [{ "id": "call-1", "name": "lookup", "args": { "q": "x" } }] }
        }))
        .await;

    let LiveEvent::ToolCall(calls) = wait_for(&mut events, |e| matches!(e, LiveEvent::ToolCall(_))).await else {
        unreachable!()
    };
    assert_eq!(calls[0].name, "lookup");

    let sent = client
        .send_tool_response(vec![FunctionResponse {
            id: calls[0].id.clone(),
            name: calls[0].name.clone(),
            response: json!({ "result": 42 }),
        }])
        .await
        .unwrap();
    assert!(sent);

    match server.next_message().await {
        ClientMessage::ToolResponse(response) => {
            assert_eq!(response.function_responses[0].id.as_deref(), Some("call-1"));
        }
        other => panic!("expected tool response, got {:?}", other),
    }
}

#[tokio::test]
async fn test_compression_keeps_budget_bounded() {
    let mut settings = test_settings();
    settings.policy.default_context_tokens = 100;
    let (client, _transport, mut servers) = client_with(settings);

    let config = LiveConfig {
        // 40 chars = 10 tokens, reserved as the first turn
        system_instruction: Some("x".repeat(40)),
        ..LiveConfig::default()
    };
    let connecting = {
        let client = client.clone();
        let config = config.clone();
        tokio::spawn(async move {
            client
                .connect("gemini-live-2.5-flash-preview", &config, None)
                .await
        })
    };
    let mut server = next_server(&mut servers).await;
    server.expect_setup().await;
    server.ack().await;
    assert!(connecting.await.unwrap().unwrap());

    let budget = client.context_budget();
    assert_eq!(budget.max(), 100);
    assert_eq!(budget.used(), 10);

    for _ in 0..10 {
        // 80 chars = 20 tokens per turn
        assert!(client.send(Content::user_text("y".repeat(80)), true).await.unwrap());
        let budget = client.context_budget();
        assert!(budget.used() <= 80, "used {} exceeds threshold", budget.used());
        assert_eq!(budget.turns()[0].role, TurnRole::System);
        assert_eq!(budget.turns()[0].tokens, 10);
    }
}

#[tokio::test]
async fn test_native_audio_model_gets_larger_window() {
    let (client, _transport, mut servers) = client_with(test_settings());

    let connecting = {
        let client = client.clone();
        tokio::spawn(async move {
            client
                .connect(
                    "gemini-2.5-flash-native-audio-preview",
                    &LiveConfig::default(),
                    None,
                )
                .await
        })
    };
    let mut server = next_server(&mut servers).await;
    server.expect_setup().await;
    server.ack().await;
    assert!(connecting.await.unwrap().unwrap());

    assert_eq!(client.context_budget().max(), 128_000);
}

#[tokio::test(start_paused = true)]
async fn test_go_away_restarts_countdown() {
    let (client, _transport, mut servers) = client_with(test_settings());
    let (server, _) = connect_ready(&client, &mut servers, None).await;
    let mut events = client.subscribe();

    // Full audio session countdown after setup
    let remaining = client.session_time_remaining().unwrap();
    assert!(remaining > Duration::from_secs(14 * 60));

    server.go_away("5s").await;
    let event = wait_for(&mut events, |e| matches!(e, LiveEvent::ForcedTermination { .. })).await;
    assert!(matches!(
        event,
        LiveEvent::ForcedTermination { time_left: Some(t), .. } if t == Duration::from_secs(5)
    ));

    let remaining = client.session_time_remaining().unwrap();
    assert!(remaining <= Duration::from_secs(5));
    assert!(remaining > Duration::from_secs(4));
}

#[tokio::test(start_paused = true)]
async fn test_expiry_without_reconnect_warns() {
    let mut settings = test_settings();
    settings.policy.audio_session_secs = 60;
    settings.policy.timeout_warning_secs = 20;
    let (client, _transport, mut servers) = client_with(settings);
    let (_server, _) = connect_ready(&client, &mut servers, None).await;
    let mut events = client.subscribe();

    let warning = wait_for(&mut events, |e| matches!(e, LiveEvent::SessionTimeoutWarning { .. })).await;
    assert!(matches!(
        warning,
        LiveEvent::SessionTimeoutWarning { time_left } if time_left == Duration::from_secs(20)
    ));

    let expired = wait_for(&mut events, |e| matches!(e, LiveEvent::SessionTimeoutWarning { .. })).await;
    assert!(matches!(
        expired,
        LiveEvent::SessionTimeoutWarning { time_left } if time_left == Duration::ZERO
    ));
    assert_eq!(client.state(), ConnectionState::Ready);
}

#[tokio::test]
async fn test_close_without_reconnect_disconnects() {
    let (client, _transport, mut servers) = client_with(test_settings());
    let (server, _) = connect_ready(&client, &mut servers, None).await;
    let mut events = client.subscribe();

    server.close("server restart").await;

    let event = wait_for(&mut events, |e| matches!(e, LiveEvent::Close { .. })).await;
    assert!(matches!(event, LiveEvent::Close { reason } if reason == "server restart"));
    eventually(|| client.state() == ConnectionState::Disconnected).await;
}

fn reconnecting_settings(max_attempts: u32) -> ClientSettings {
    ClientSettings {
        auto_reconnect: true,
        max_reconnect_attempts: max_attempts,
        ..ClientSettings::default()
    }
}

#[tokio::test(start_paused = true)]
async fn test_reconnects_with_latest_handle() {
    let (client, transport, mut servers) = client_with(reconnecting_settings(5));
    let (server, _) = connect_ready(&client, &mut servers, None).await;
    let mut events = client.subscribe();

    server.resumption_update(Some("h1"), true).await;
    wait_for(&mut events, |e| matches!(e, LiveEvent::SessionResumptionUpdate(_))).await;

    server.close("connection reset").await;

    let event = wait_for(&mut events, |e| matches!(e, LiveEvent::Reconnecting { .. })).await;
    assert!(matches!(
        event,
        LiveEvent::Reconnecting { attempt: 1, delay, resuming: true } if delay == Duration::from_secs(1)
    ));

    let mut second = next_server(&mut servers).await;
    let setup = second.expect_setup().await;
    assert_eq!(setup.session_resumption.handle.as_deref(), Some("h1"));
    second.ack().await;

    wait_for(&mut events, |e| matches!(e, LiveEvent::Reconnected)).await;
    assert_eq!(client.state(), ConnectionState::Ready);
    assert_eq!(transport.opens(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_backoff_then_exhaustion() {
    let (client, transport, mut servers) = client_with(reconnecting_settings(3));
    let (server, _) = connect_ready(&client, &mut servers, None).await;
    let mut events = client.subscribe();

    transport.fail_next(10);
    server.close("connection reset").await;

    let mut delays = Vec::new();
    let terminal = loop {
        match wait_for(&mut events, |e| {
            matches!(e, LiveEvent::Reconnecting { .. } | LiveEvent::Error { terminal: true, .. })
        })
        .await
        {
            LiveEvent::Reconnecting { delay, .. } => delays.push(delay),
            other => break other,
        }
    };

    assert_eq!(
        delays,
        vec![
            Duration::from_secs(1),
            Duration::from_secs(2),
            Duration::from_secs(4)
        ]
    );
    assert!(matches!(terminal, LiveEvent::Error { terminal: true, .. }));
    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert_eq!(transport.opens(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_forced_termination_triggers_reconnect() {
    let (client, _transport, mut servers) = client_with(reconnecting_settings(5));
    let (server, _) = connect_ready(&client, &mut servers, None).await;
    let mut events = client.subscribe();

    server.go_away("2s").await;
    wait_for(&mut events, |e| matches!(e, LiveEvent::Reconnecting { .. })).await;

    let mut second = next_server(&mut servers).await;
    second.expect_setup().await;
    second.ack().await;
    wait_for(&mut events, |e| matches!(e, LiveEvent::Reconnected)).await;

    // Countdown restarts for the new session
    let remaining = client.session_time_remaining().unwrap();
    assert!(remaining > Duration::from_secs(14 * 60));
}

#[tokio::test(start_paused = true)]
async fn test_backoff_resets_after_ready() {
    let (client, transport, mut servers) = client_with(reconnecting_settings(5));
    let (server, _) = connect_ready(&client, &mut servers, None).await;
    let mut events = client.subscribe();

    // Two failed opens, then the third attempt gets through
    transport.fail_next(2);
    server.close("connection reset").await;

    let mut delays = Vec::new();
    while delays.len() < 3 {
        if let LiveEvent::Reconnecting { delay, .. } =
            wait_for(&mut events, |e| matches!(e, LiveEvent::Reconnecting { .. })).await
        {
            delays.push(delay);
        }
    }
    assert_eq!(
        delays,
        vec![
            Duration::from_secs(1),
            Duration::from_secs(2),
            Duration::from_secs(4)
        ]
    );

    let mut second = next_server(&mut servers).await;
    second.expect_setup().await;
    second.ack().await;
    wait_for(&mut events, |e| matches!(e, LiveEvent::Reconnected)).await;

    // The next outage starts over at the base delay
    second.close("connection reset").await;
    let event = wait_for(&mut events, |e| matches!(e, LiveEvent::Reconnecting { .. })).await;
    assert!(matches!(
        event,
        LiveEvent::Reconnecting { attempt: 1, delay, .. } if delay == Duration::from_secs(1)
    ));
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_respects_handle_issue_time() {
    let (client, _transport, mut servers) = client_with(reconnecting_settings(5));
    let mut events = client.subscribe();

    // Audio handles last two hours; this one was issued three hours ago
    let issued_at = Utc::now() - ChronoDuration::hours(3);
    let (server, setup) =
        connect_ready_with(&client, &mut servers, Some(ResumptionToken::new("old", issued_at)))
            .await;
    assert_eq!(setup.session_resumption.handle.as_deref(), Some("old"));
    assert_eq!(client.resumption_token(), None);

    server.close("connection reset").await;
    let event = wait_for(&mut events, |e| matches!(e, LiveEvent::Reconnecting { .. })).await;
    assert!(matches!(event, LiveEvent::Reconnecting { resuming: false, .. }));

    let mut second = next_server(&mut servers).await;
    let setup = second.expect_setup().await;
    assert_eq!(setup.session_resumption.handle, None);
}

#[tokio::test(start_paused = true)]
async fn test_rejected_handle_on_reconnect_is_dropped() {
    let (client, _transport, mut servers) = client_with(reconnecting_settings(5));
    let (server, _) = connect_ready(&client, &mut servers, None).await;
    let mut events = client.subscribe();

    server.resumption_update(Some("h1"), true).await;
    wait_for(&mut events, |e| matches!(e, LiveEvent::SessionResumptionUpdate(_))).await;
    server.close("connection reset").await;

    let mut second = next_server(&mut servers).await;
    let setup = second.expect_setup().await;
    assert_eq!(setup.session_resumption.handle.as_deref(), Some("h1"));
    second.close("invalid session handle").await;

    let event = wait_for(&mut events, |e| matches!(e, LiveEvent::ResumptionRejected { .. })).await;
    assert!(matches!(event, LiveEvent::ResumptionRejected { reason } if reason.contains("handle")));
    assert_eq!(client.resumption_token(), None);

    // The retry starts a fresh session
    let mut third = next_server(&mut servers).await;
    let setup = third.expect_setup().await;
    assert_eq!(setup.session_resumption.handle, None);
    third.ack().await;
    wait_for(&mut events, |e| matches!(e, LiveEvent::Reconnected)).await;
}
