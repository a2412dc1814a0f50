//! JSON bodies for the client control events.
//!
//! The frame layer treats payloads as opaque bytes; these types only exist
//! for the binary and callers who want typed requests.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::{DialogConfig, OutputAudioConfig};

/// Body sent with start/finish connection and finish session.
pub const EMPTY_OBJECT: &[u8] = b"{}";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartSessionPayload {
    pub tts: TtsPayload,
    pub dialog: DialogPayload,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TtsPayload {
    pub audio_config: TtsAudioConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TtsAudioConfig {
    pub channel: u16,
    pub format: String,
    pub sample_rate: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DialogPayload {
    pub bot_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dialog_id: Option<String>,
    #[serde(default)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SayHelloPayload {
    pub content: String,
}

/// Text for the bot to speak, streamed in pieces between `start` and `end`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTtsTextPayload {
    pub start: bool,
    pub end: bool,
    pub content: String,
}

impl StartSessionPayload {
    pub fn new(dialog: &DialogConfig, output: &OutputAudioConfig) -> Self {
        let mut extra = Map::new();
        extra.insert("strict_audit".to_string(), Value::Bool(dialog.strict_audit));
        Self {
            tts: TtsPayload {
                audio_config: TtsAudioConfig {
                    // Server audio is always mono; the device may still be stereo.
                    channel: 1,
                    format: output.format.wire_name().to_string(),
                    sample_rate: output.sample_rate,
                },
            },
            dialog: DialogPayload {
                bot_name: dialog.bot_name.clone(),
                dialog_id: None,
                extra,
            },
        }
    }
}

/// Serialize any request body to JSON bytes.
pub fn to_bytes<T: Serialize>(payload: &T) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(payload)
}
