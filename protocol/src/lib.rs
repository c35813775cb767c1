//! Wire types for the streaming transcription/translation protocol.
//!
//! The transport is a framed, text-or-binary bidirectional connection
//! (WebSocket in the reference server). All control messages are JSON text
//! frames except for two literal sentinel strings sent by speakers
//! (`END_OF_AUDIO`, `LISTENER`).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Whisper-family models expect mono float32 PCM at this rate.
pub const SAMPLE_RATE: u32 = 16_000;

/// ASR task requested by a speaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Task {
    Transcribe,
    Translate,
}

impl Default for Task {
    fn default() -> Self {
        Task::Transcribe
    }
}

/// The single handshake frame every new connection must send first.
///
/// Whether the peer is a speaker or a listener is discriminated by the
/// presence of `listener_uid` (§4.2). Both shapes are folded into one
/// struct because they're a single JSON object on the wire; `classify`
/// performs the actual dispatch.
#[derive(Debug, Clone, Deserialize)]
pub struct HandshakeRequest {
    pub uid: String,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub task: Option<Task>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub use_vad: Option<bool>,
    #[serde(default)]
    pub initial_prompt: Option<String>,
    #[serde(default)]
    pub vad_parameters: Option<serde_json::Value>,
    #[serde(default)]
    pub listener_uid: Option<String>,
}

/// The two concrete roles a handshake can resolve to.
#[derive(Debug, Clone)]
pub enum Handshake {
    Speaker(SpeakerHandshake),
    Listener(ListenerHandshake),
}

#[derive(Debug, Clone)]
pub struct SpeakerHandshake {
    pub uid: String,
    pub language: Option<String>,
    pub task: Task,
    pub model: Option<String>,
    pub use_vad: bool,
    pub initial_prompt: Option<String>,
    pub vad_parameters: Option<serde_json::Value>,
}

#[derive(Debug, Clone)]
pub struct ListenerHandshake {
    pub uid: String,
    pub follows: String,
}

impl HandshakeRequest {
    /// Fold the raw handshake object into a concrete speaker/listener
    /// variant. `listener_uid` presence discriminates (§4.2).
    pub fn classify(self) -> Handshake {
        match self.listener_uid {
            Some(follows) => Handshake::Listener(ListenerHandshake {
                uid: self.uid,
                follows,
            }),
            None => Handshake::Speaker(SpeakerHandshake {
                uid: self.uid,
                language: self.language,
                task: self.task.unwrap_or_default(),
                model: self.model,
                use_vad: self.use_vad.unwrap_or(false),
                initial_prompt: self.initial_prompt,
                vad_parameters: self.vad_parameters,
            }),
        }
    }
}

/// Literal sentinel strings sent by a speaker outside of JSON frames.
pub const END_OF_AUDIO: &str = "END_OF_AUDIO";
pub const LISTENER_SENTINEL: &str = "LISTENER";

/// An inbound frame from a speaker, after the handshake.
#[derive(Debug, Clone)]
pub enum SpeakerFrame {
    /// Decoded float32 PCM plus the per-frame language hints.
    Audio {
        samples: Vec<f32>,
        speaker_lang: Option<String>,
        all_langs: Vec<String>,
        is_start_stream: bool,
    },
    EndOfAudio,
    /// The `LISTENER` sentinel, reserved and ignored on the speaker channel.
    Ignored,
}

/// Raw JSON shape of a non-sentinel speaker frame (§6).
#[derive(Debug, Clone, Deserialize)]
struct RawAudioFrame {
    audio: String,
    #[serde(default, rename = "speakerLang")]
    speaker_lang: Option<String>,
    #[serde(default, rename = "allLangs")]
    all_langs: Vec<String>,
    #[serde(default, rename = "isStartStream")]
    is_start_stream: Option<bool>,
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("malformed JSON frame: {0}")]
    Json(#[from] serde_json::Error),
    #[error("base64 audio payload is invalid: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("decoded audio length {0} is not a multiple of 4 bytes")]
    NotSampleAligned(usize),
}

impl SpeakerFrame {
    /// Parse a text frame from a speaker: either a sentinel or a JSON
    /// audio frame whose `audio` field is base64 LE float32 PCM (§4.2, §6).
    pub fn parse(text: &str) -> Result<SpeakerFrame, FrameError> {
        if text == END_OF_AUDIO {
            return Ok(SpeakerFrame::EndOfAudio);
        }
        if text == LISTENER_SENTINEL {
            return Ok(SpeakerFrame::Ignored);
        }
        let raw: RawAudioFrame = serde_json::from_str(text)?;
        use base64::Engine;
        let bytes = base64::engine::general_purpose::STANDARD.decode(&raw.audio)?;
        if bytes.len() % 4 != 0 {
            return Err(FrameError::NotSampleAligned(bytes.len()));
        }
        let samples = bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        Ok(SpeakerFrame::Audio {
            samples,
            speaker_lang: raw.speaker_lang,
            all_langs: raw.all_langs,
            is_start_stream: raw.is_start_stream.unwrap_or(false),
        })
    }
}

/// A committed transcript entry in the speaker's absolute stream timeline.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptSegment {
    pub start: f64,
    pub end: f64,
    pub text: String,
}

/// Wire shape of a segment: times formatted "%.3f" per §6.
#[derive(Debug, Clone, Serialize)]
pub struct WireSegment {
    pub start: String,
    pub end: String,
    pub text: String,
}

impl From<&TranscriptSegment> for WireSegment {
    fn from(s: &TranscriptSegment) -> Self {
        WireSegment {
            start: format!("{:.3}", s.start),
            end: format!("{:.3}", s.end),
            text: s.text.clone(),
        }
    }
}

/// `{id, start, end, translate}` sent to listeners and, optionally, echoed
/// back to the originating speaker.
#[derive(Debug, Clone, Serialize)]
pub struct TranslationMessage {
    pub id: u64,
    pub start: String,
    pub end: String,
    pub translate: HashMap<String, String>,
}

/// All JSON messages the server can send to a speaker connection.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ServerToSpeaker {
    Ready {
        uid: String,
        message: &'static str,
        backend: &'static str,
    },
    Wait {
        uid: String,
        status: &'static str,
        message: f64,
    },
    Error {
        uid: String,
        status: &'static str,
        message: String,
    },
    Language {
        uid: String,
        language: String,
        language_prob: f32,
    },
    Segments {
        uid: String,
        segments: Vec<WireSegment>,
    },
    Disconnect {
        uid: String,
        message: &'static str,
    },
}

impl ServerToSpeaker {
    pub fn ready(uid: impl Into<String>) -> Self {
        ServerToSpeaker::Ready {
            uid: uid.into(),
            message: "SERVER_READY",
            backend: "faster_whisper",
        }
    }

    pub fn wait(uid: impl Into<String>, minutes: f64) -> Self {
        ServerToSpeaker::Wait {
            uid: uid.into(),
            status: "WAIT",
            message: minutes,
        }
    }

    pub fn error(uid: impl Into<String>, message: impl Into<String>) -> Self {
        ServerToSpeaker::Error {
            uid: uid.into(),
            status: "ERROR",
            message: message.into(),
        }
    }

    pub fn disconnect(uid: impl Into<String>) -> Self {
        ServerToSpeaker::Disconnect {
            uid: uid.into(),
            message: "DISCONNECT",
        }
    }
}

/// Heartbeat frame pushed to every listener on the configured interval.
#[derive(Debug, Clone, Serialize)]
pub struct Heartbeat {
    pub ping: &'static str,
}

impl Default for Heartbeat {
    fn default() -> Self {
        Heartbeat { ping: "ping" }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_speaker_vs_listener() {
        let speaker: HandshakeRequest =
            serde_json::from_str(r#"{"uid":"s1","language":"en","use_vad":true}"#).unwrap();
        match speaker.classify() {
            Handshake::Speaker(s) => {
                assert_eq!(s.uid, "s1");
                assert_eq!(s.language.as_deref(), Some("en"));
                assert!(s.use_vad);
            }
            Handshake::Listener(_) => panic!("expected speaker"),
        }

        let listener: HandshakeRequest =
            serde_json::from_str(r#"{"uid":"l1","listener_uid":"s1"}"#).unwrap();
        match listener.classify() {
            Handshake::Listener(l) => {
                assert_eq!(l.uid, "l1");
                assert_eq!(l.follows, "s1");
            }
            Handshake::Speaker(_) => panic!("expected listener"),
        }
    }

    #[test]
    fn parses_sentinels() {
        assert!(matches!(
            SpeakerFrame::parse(END_OF_AUDIO).unwrap(),
            SpeakerFrame::EndOfAudio
        ));
        assert!(matches!(
            SpeakerFrame::parse(LISTENER_SENTINEL).unwrap(),
            SpeakerFrame::Ignored
        ));
    }

    #[test]
    fn parses_audio_frame_and_rejects_misaligned_base64() {
        use base64::Engine;
        let samples: Vec<f32> = vec![0.1, -0.2, 0.3];
        let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        let audio_b64 = base64::engine::general_purpose::STANDARD.encode(&bytes);
        let text = format!(
            r#"{{"audio":"{}","speakerLang":"en","allLangs":["fr","ru"]}}"#,
            audio_b64
        );
        match SpeakerFrame::parse(&text).unwrap() {
            SpeakerFrame::Audio {
                samples: got,
                speaker_lang,
                all_langs,
                ..
            } => {
                assert_eq!(got.len(), 3);
                assert!((got[0] - 0.1).abs() < 1e-6);
                assert_eq!(speaker_lang.as_deref(), Some("en"));
                assert_eq!(all_langs, vec!["fr".to_string(), "ru".to_string()]);
            }
            _ => panic!("expected audio frame"),
        }

        // 3 garbage bytes decode from base64 to a length not divisible by 4.
        let bad = base64::engine::general_purpose::STANDARD.encode([1u8, 2, 3]);
        let bad_text = format!(r#"{{"audio":"{}"}}"#, bad);
        assert!(matches!(
            SpeakerFrame::parse(&bad_text),
            Err(FrameError::NotSampleAligned(3))
        ));
    }

    #[test]
    fn wire_segment_formats_three_decimals() {
        let seg = TranscriptSegment {
            start: 1.0,
            end: 2.5,
            text: "hi".into(),
        };
        let wire = WireSegment::from(&seg);
        assert_eq!(wire.start, "1.000");
        assert_eq!(wire.end, "2.500");
    }
}
