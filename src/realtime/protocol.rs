//! Wire types for the realtime voice service
//!
//! Outbound commands and inbound events are JSON objects discriminated by a
//! dotted `type` tag. Inbound payloads carry more fields than we read; serde
//! ignores the rest, and event types without a variant here are handled as
//! opaque passthrough by the connection layer.

use serde::{Deserialize, Serialize};

use crate::config::SessionConfig;

/// Outgoing command to the realtime service
#[derive(Debug, Serialize)]
#[serde(tag = "type")]
pub enum ClientCommand {
    /// Configure the session after connect
    #[serde(rename = "session.update")]
    SessionUpdate { session: SessionProperties },
    /// Append base64 PCM to the server-side input buffer
    #[serde(rename = "input_audio_buffer.append")]
    AppendAudio { audio: String },
    /// Finalize the input buffer for transcription and response
    #[serde(rename = "input_audio_buffer.commit")]
    CommitAudio,
    /// Insert a conversation item without requesting a response
    #[serde(rename = "conversation.item.create")]
    CreateItem { item: ConversationItem },
    /// Ask the model to generate a response
    #[serde(rename = "response.create")]
    CreateResponse { response: ResponseSpec },
}

/// Session configuration payload for `session.update`
#[derive(Debug, Serialize)]
pub struct SessionProperties {
    pub modalities: Vec<&'static str>,
    pub instructions: String,
    pub voice: String,
    pub input_audio_format: &'static str,
    pub output_audio_format: &'static str,
    pub input_audio_transcription: TranscriptionProperties,
    pub turn_detection: TurnDetection,
    /// Always empty; tool use is handled by a separate text agent
    pub tools: Vec<serde_json::Value>,
    pub temperature: f64,
    pub max_response_output_tokens: u32,
}

/// Input transcription settings
#[derive(Debug, Serialize)]
pub struct TranscriptionProperties {
    pub model: String,
}

/// Server-side voice activity detection settings
#[derive(Debug, Serialize)]
pub struct TurnDetection {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub silence_duration_ms: u32,
}

impl From<&SessionConfig> for SessionProperties {
    fn from(config: &SessionConfig) -> Self {
        Self {
            modalities: vec!["text", "audio"],
            instructions: config.instructions.clone(),
            voice: config.voice.clone(),
            input_audio_format: "pcm16",
            output_audio_format: "pcm16",
            input_audio_transcription: TranscriptionProperties {
                model: config.transcription_model.clone(),
            },
            turn_detection: TurnDetection {
                kind: "server_vad",
                silence_duration_ms: config.vad_silence_ms,
            },
            tools: Vec::new(),
            temperature: config.temperature,
            max_response_output_tokens: config.max_response_tokens,
        }
    }
}

/// One message item for `conversation.item.create`
#[derive(Debug, Serialize)]
pub struct ConversationItem {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub role: &'static str,
    pub content: Vec<ContentPiece>,
}

/// One content element inside a conversation item
#[derive(Debug, Serialize)]
pub struct ContentPiece {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub text: String,
}

impl ConversationItem {
    /// A user message; user content uses the `input_text` content type
    #[must_use]
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            kind: "message",
            role: "user",
            content: vec![ContentPiece {
                kind: "input_text",
                text: text.into(),
            }],
        }
    }

    /// An assistant message; assistant content uses the `text` content type
    #[must_use]
    pub fn assistant_text(text: impl Into<String>) -> Self {
        Self {
            kind: "message",
            role: "assistant",
            content: vec![ContentPiece {
                kind: "text",
                text: text.into(),
            }],
        }
    }
}

/// Response request payload for `response.create`
#[derive(Debug, Serialize)]
pub struct ResponseSpec {
    pub modalities: Vec<&'static str>,
    pub instructions: String,
}

impl ResponseSpec {
    /// Request a combined text + audio response with the given delivery
    /// instructions
    #[must_use]
    pub fn text_and_audio(instructions: impl Into<String>) -> Self {
        Self {
            modalities: vec!["text", "audio"],
            instructions: instructions.into(),
        }
    }
}

/// Incoming event from the realtime service
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    /// Session established server-side
    #[serde(rename = "session.created")]
    SessionCreated,
    /// Session configuration acknowledged
    #[serde(rename = "session.updated")]
    SessionUpdated,
    /// Server VAD detected the start of user speech
    #[serde(rename = "input_audio_buffer.speech_started")]
    SpeechStarted,
    /// Server VAD detected the end of user speech
    #[serde(rename = "input_audio_buffer.speech_stopped")]
    SpeechStopped,
    /// The input buffer was committed for processing
    #[serde(rename = "input_audio_buffer.committed")]
    InputAudioCommitted,
    /// A conversation item was created
    #[serde(rename = "conversation.item.created")]
    ItemCreated,
    /// Response generation started
    #[serde(rename = "response.created")]
    ResponseCreated,
    /// An output item was added to the response
    #[serde(rename = "response.output_item.added")]
    OutputItemAdded,
    /// A content part was added; text parts carry the full text
    #[serde(rename = "response.content_part.added")]
    ContentPartAdded {
        #[serde(default)]
        part: Option<ContentPart>,
    },
    /// A content part finished
    #[serde(rename = "response.content_part.done")]
    ContentPartDone,
    /// Incremental response text
    #[serde(rename = "response.text.delta")]
    TextDelta { delta: String },
    /// Incremental response audio, base64 PCM
    #[serde(rename = "response.audio.delta")]
    AudioDelta { delta: String },
    /// Response audio finished streaming
    #[serde(rename = "response.audio.done")]
    AudioDone,
    /// Incremental transcript of the response audio
    #[serde(rename = "response.audio_transcript.delta")]
    AudioTranscriptDelta { delta: String },
    /// Complete transcript of the response audio
    #[serde(rename = "response.audio_transcript.done")]
    AudioTranscriptDone { transcript: String },
    /// Response generation completed
    #[serde(rename = "response.done")]
    ResponseDone,
    /// Incremental transcript of the user's input audio
    #[serde(rename = "conversation.item.input_audio_transcription.delta")]
    InputTranscriptionDelta {
        #[serde(default)]
        delta: String,
    },
    /// Complete transcript of the user's input audio
    #[serde(rename = "conversation.item.input_audio_transcription.completed")]
    InputTranscriptionCompleted { transcript: String },
    /// Input transcription failed
    #[serde(rename = "conversation.item.input_audio_transcription.failed")]
    InputTranscriptionFailed {
        #[serde(default)]
        item_id: String,
        #[serde(default)]
        error: Option<ErrorPayload>,
    },
    /// Service-reported error
    #[serde(rename = "error")]
    Error {
        #[serde(default)]
        error: Option<ErrorPayload>,
    },
}

/// One content part of a response item
#[derive(Debug, Deserialize)]
pub struct ContentPart {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub text: Option<String>,
}

/// Error body carried by `error` and transcription-failure events
#[derive(Debug, Default, Deserialize)]
pub struct ErrorPayload {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}
