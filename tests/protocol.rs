//! Wire protocol integration tests
//!
//! Drives the protocol types through full command/event cycles the way the
//! realtime service exchanges them, asserting on parsed JSON rather than
//! string fragments.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use parlance::SessionConfig;
use parlance::realtime::protocol::{
    ClientCommand, ConversationItem, ResponseSpec, ServerEvent, SessionProperties,
};

mod common;

/// Serialize a command and parse it back as a JSON value
fn to_value(cmd: &ClientCommand) -> serde_json::Value {
    let json = serde_json::to_string(cmd).unwrap();
    serde_json::from_str(&json).unwrap()
}

#[test]
fn test_session_update_matches_service_contract() {
    let config = SessionConfig::new("sk-test")
        .with_voice("verse")
        .with_instructions("You are concise.");

    let value = to_value(&ClientCommand::SessionUpdate {
        session: SessionProperties::from(&config),
    });

    assert_eq!(value["type"], "session.update");

    let session = &value["session"];
    assert_eq!(session["modalities"], serde_json::json!(["text", "audio"]));
    assert_eq!(session["voice"], "verse");
    assert_eq!(session["instructions"], "You are concise.");
    assert_eq!(session["input_audio_format"], "pcm16");
    assert_eq!(session["output_audio_format"], "pcm16");
    assert_eq!(session["input_audio_transcription"]["model"], "whisper-1");
    assert_eq!(session["turn_detection"]["type"], "server_vad");
    assert_eq!(session["turn_detection"]["silence_duration_ms"], 1000);
    assert_eq!(session["tools"], serde_json::json!([]));
    assert_eq!(session["temperature"], 0.8);
    assert_eq!(session["max_response_output_tokens"], 4096);
}

#[test]
fn test_append_audio_round_trips_pcm() {
    // 100ms of tone goes out base64-encoded and decodes to the same bytes
    let pcm = common::tone_ms(440.0, 0.3, 100);
    let value = to_value(&ClientCommand::AppendAudio {
        audio: BASE64.encode(&pcm),
    });

    assert_eq!(value["type"], "input_audio_buffer.append");
    let decoded = BASE64
        .decode(value["audio"].as_str().unwrap())
        .unwrap();
    assert_eq!(decoded, pcm);
}

#[test]
fn test_text_message_command_pair() {
    // sending a typed message is an item create followed by a response create
    let item = to_value(&ClientCommand::CreateItem {
        item: ConversationItem::user_text("what's on my calendar?"),
    });
    assert_eq!(item["type"], "conversation.item.create");
    assert_eq!(item["item"]["type"], "message");
    assert_eq!(item["item"]["role"], "user");
    assert_eq!(item["item"]["content"][0]["type"], "input_text");
    assert_eq!(item["item"]["content"][0]["text"], "what's on my calendar?");

    let response = to_value(&ClientCommand::CreateResponse {
        response: ResponseSpec::text_and_audio("Speak clearly."),
    });
    assert_eq!(response["type"], "response.create");
    assert_eq!(
        response["response"]["modalities"],
        serde_json::json!(["text", "audio"])
    );
    assert_eq!(response["response"]["instructions"], "Speak clearly.");
}

#[test]
fn test_assistant_context_item_shape() {
    let item = to_value(&ClientCommand::CreateItem {
        item: ConversationItem::assistant_text("The meeting moved to 3pm."),
    });
    assert_eq!(item["item"]["role"], "assistant");
    assert_eq!(item["item"]["content"][0]["type"], "text");
}

#[test]
fn test_full_voice_turn_event_sequence() {
    // the frames a single voice turn produces, in service order
    let frames = [
        r#"{"type":"input_audio_buffer.speech_started","event_id":"e1","audio_start_ms":120}"#,
        r#"{"type":"input_audio_buffer.speech_stopped","event_id":"e2","audio_end_ms":2280}"#,
        r#"{"type":"input_audio_buffer.committed","event_id":"e3","item_id":"item_1"}"#,
        r#"{"type":"conversation.item.created","event_id":"e4","item":{"id":"item_1","role":"user"}}"#,
        r#"{"type":"response.created","event_id":"e5","response":{"id":"resp_1"}}"#,
        r#"{"type":"response.output_item.added","event_id":"e6","output_index":0}"#,
        r#"{"type":"response.audio.delta","event_id":"e7","delta":"AAAA"}"#,
        r#"{"type":"response.audio_transcript.delta","event_id":"e8","delta":"Sure, "}"#,
        r#"{"type":"response.audio_transcript.delta","event_id":"e9","delta":"one moment."}"#,
        r#"{"type":"response.audio.done","event_id":"e10"}"#,
        r#"{"type":"response.audio_transcript.done","event_id":"e11","transcript":"Sure, one moment."}"#,
        r#"{"type":"response.done","event_id":"e12","response":{"id":"resp_1","status":"completed"}}"#,
    ];

    let events: Vec<ServerEvent> = frames
        .iter()
        .map(|frame| serde_json::from_str(frame).unwrap())
        .collect();

    assert!(matches!(events[0], ServerEvent::SpeechStarted));
    assert!(matches!(events[1], ServerEvent::SpeechStopped));
    assert!(matches!(events[2], ServerEvent::InputAudioCommitted));
    assert!(matches!(events[3], ServerEvent::ItemCreated));
    assert!(matches!(events[4], ServerEvent::ResponseCreated));
    assert!(matches!(events[5], ServerEvent::OutputItemAdded));
    assert!(matches!(events[6], ServerEvent::AudioDelta { .. }));
    assert!(matches!(events[9], ServerEvent::AudioDone));
    assert!(matches!(events[11], ServerEvent::ResponseDone));

    // the streamed transcript deltas concatenate to the final transcript
    let mut streamed = String::new();
    for event in &events {
        if let ServerEvent::AudioTranscriptDelta { delta } = event {
            streamed.push_str(delta);
        }
    }
    match &events[10] {
        ServerEvent::AudioTranscriptDone { transcript } => assert_eq!(&streamed, transcript),
        other => panic!("expected AudioTranscriptDone, got {other:?}"),
    }
}

#[test]
fn test_audio_delta_payload_decodes_to_pcm() {
    let pcm = common::silence_ms(20);
    let frame = format!(
        r#"{{"type":"response.audio.delta","event_id":"e1","delta":"{}"}}"#,
        BASE64.encode(&pcm)
    );

    let event: ServerEvent = serde_json::from_str(&frame).unwrap();
    match event {
        ServerEvent::AudioDelta { delta } => {
            let decoded = BASE64.decode(delta.as_bytes()).unwrap();
            assert_eq!(decoded.len(), pcm.len());
            assert!((parlance::audio::duration_ms(decoded.len()) - 20.0).abs() < f64::EPSILON);
        }
        other => panic!("expected AudioDelta, got {other:?}"),
    }
}

#[test]
fn test_transcription_failure_carries_error_body() {
    let frame = r#"{"type":"conversation.item.input_audio_transcription.failed","item_id":"item_9","error":{"code":"rate_limit_exceeded","message":"Too Many Requests"}}"#;
    let event: ServerEvent = serde_json::from_str(frame).unwrap();
    match event {
        ServerEvent::InputTranscriptionFailed { item_id, error } => {
            assert_eq!(item_id, "item_9");
            let body = error.unwrap();
            assert_eq!(body.code.as_deref(), Some("rate_limit_exceeded"));
            assert_eq!(body.message.as_deref(), Some("Too Many Requests"));
        }
        other => panic!("expected InputTranscriptionFailed, got {other:?}"),
    }
}

#[test]
fn test_error_event_with_empty_body() {
    // the service occasionally sends an error with no body at all
    let event: ServerEvent = serde_json::from_str(r#"{"type":"error"}"#).unwrap();
    match event {
        ServerEvent::Error { error } => assert!(error.is_none()),
        other => panic!("expected Error, got {other:?}"),
    }
}

#[test]
fn test_unmodeled_event_types_fail_typed_parse() {
    // these fall through to opaque passthrough in the connection layer
    for frame in [
        r#"{"type":"rate_limits.updated","rate_limits":[]}"#,
        r#"{"type":"response.function_call_arguments.delta","delta":"{}"}"#,
        r#"{"type":"response.output_item.done","output_index":0}"#,
    ] {
        assert!(
            serde_json::from_str::<ServerEvent>(frame).is_err(),
            "expected typed parse to fail for {frame}"
        );
    }
}
