//! The Speaker Session: owns one Audio Buffer, runs the ASR driver loop
//! and the finalization policy, emits transcripts back to its own
//! connection, and submits finalized units to the Translator Pool before
//! broadcasting results to listeners (§2, §4.4, §4.5, §4.8).
//!
//! Ported from `ServeClientFasterWhisper.update_segments`/`format_segment`/
//! `get_previous_output`. Every mutable field below has exactly one
//! writer task (REDESIGN FLAGS): the inbound pump writes `speaker_lang`/
//! `all_langs`; the driver loop owns everything else, including the
//! transcript log and sentence accumulator, as plain locals.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use streamcast_protocol::{
    ServerToSpeaker, SpeakerHandshake, TranscriptSegment, TranslationMessage, WireSegment,
};
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::warn;

use crate::asr::{AsrRequest, AsrService};
use crate::audio_buffer::AudioBuffer;
use crate::connection::OutboundSink;
use crate::sentence_accumulator::{is_rtl, SentenceAccumulator};
use crate::session_manager::ListenerRegistry;
use crate::translator::TranslatorPool;

const NO_SPEECH_THRESH: f32 = 0.45;
const SAME_OUTPUT_COMMIT_THRESHOLD: u32 = 5;
const MIN_CHUNK_SECS: f64 = 1.0;
const SHOW_PREV_OUT_THRESH_SECS: f64 = 4.0;
const ADD_PAUSE_THRESH_SECS: f64 = 3.0;
const SEND_LAST_N_SEGMENTS: usize = 10;
const POLL_INTERVAL: Duration = Duration::from_millis(100);
const DRAIN_GRACE_PERIOD: Duration = Duration::from_secs(3);

/// Fields the inbound pump writes and the driver loop reads. `draining`
/// and `exit` are the cancellation signal shared with both tasks.
pub struct SharedState {
    pub outbound: Arc<OutboundSink>,
    pub speaker_lang: Mutex<Option<String>>,
    pub all_langs: Mutex<Vec<String>>,
    pub exit: Notify,
    pub draining: AtomicBool,
}

/// Registry-visible handle to a running speaker session.
pub struct SpeakerHandle {
    pub uid: String,
    pub audio: Arc<AudioBuffer>,
    pub shared: Arc<SharedState>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl SpeakerHandle {
    #[allow(clippy::too_many_arguments)]
    pub fn spawn(
        handshake: SpeakerHandshake,
        outbound: Arc<OutboundSink>,
        asr: Arc<AsrService>,
        translator: Arc<TranslatorPool>,
        listeners: Arc<ListenerRegistry>,
    ) -> Arc<Self> {
        let audio = Arc::new(AudioBuffer::new());
        let shared = Arc::new(SharedState {
            outbound,
            speaker_lang: Mutex::new(None),
            all_langs: Mutex::new(Vec::new()),
            exit: Notify::new(),
            draining: AtomicBool::new(false),
        });
        let handle = Arc::new(SpeakerHandle {
            uid: handshake.uid.clone(),
            audio: audio.clone(),
            shared: shared.clone(),
            driver: Mutex::new(None),
        });

        let loop_handle = handle.clone();
        let task = tokio::spawn(async move {
            driver_loop(loop_handle, handshake, audio, asr, translator, listeners).await;
        });
        handle
            .driver
            .try_lock()
            .expect("no contention on a freshly constructed handle")
            .replace(task);
        handle
    }

    /// Notify the driver loop to stop accepting new work (§4.8 DRAINING).
    pub fn signal_drain(&self) {
        self.shared.draining.store(true, Ordering::SeqCst);
        self.shared.exit.notify_waiters();
    }

    /// Drain, wait up to the grace period for the driver to exit, then
    /// close the connection regardless (§4.8, §5 cancellation target).
    pub async fn shutdown(&self) {
        self.signal_drain();
        if let Some(task) = self.driver.lock().await.take() {
            if tokio::time::timeout(DRAIN_GRACE_PERIOD, task).await.is_err() {
                warn!(uid = %self.uid, "speaker driver loop did not exit within grace period");
            }
        }
        let _ = self.shared.outbound.close().await;
    }
}

async fn submit_and_broadcast(
    text: &str,
    start: f64,
    end: f64,
    source_lang: &str,
    targets: &[String],
    translator: &TranslatorPool,
    listeners: &ListenerRegistry,
    uid: &str,
    translation_id: &mut u64,
) {
    match translator.translate_unit(text, source_lang, targets).await {
        Ok(translate) => {
            let message = TranslationMessage {
                id: *translation_id,
                start: format!("{:.3}", start),
                end: format!("{:.3}", end),
                translate,
            };
            listeners.broadcast(uid, &message).await;
            *translation_id += 1;
        }
        Err(e) => {
            warn!(uid = %uid, error = %e, "translation unit dropped after exhausting retries");
        }
    }
}

fn bounded_wire_segments(
    transcript: &[TranscriptSegment],
    provisional: Option<&TranscriptSegment>,
) -> Vec<WireSegment> {
    let start = transcript.len().saturating_sub(SEND_LAST_N_SEGMENTS);
    let mut out: Vec<WireSegment> = transcript[start..].iter().map(WireSegment::from).collect();
    if let Some(p) = provisional {
        out.push(WireSegment::from(p));
    }
    out
}

async fn driver_loop(
    handle: Arc<SpeakerHandle>,
    handshake: SpeakerHandshake,
    audio: Arc<AudioBuffer>,
    asr: Arc<AsrService>,
    translator: Arc<TranslatorPool>,
    listeners: Arc<ListenerRegistry>,
) {
    let uid = handshake.uid.clone();
    let mut session_language = handshake.language.clone();
    let mut language_adopted = session_language.is_some();
    let mut accumulator =
        SentenceAccumulator::new(session_language.as_deref().map(is_rtl).unwrap_or(false));

    let mut transcript: Vec<TranscriptSegment> = Vec::new();
    let mut text_history: Vec<String> = Vec::new();
    let mut prev_out = String::new();
    let mut same_output_threshold: u32 = 0;
    let mut translation_id: u64 = 1;
    let mut pause_started_at: Option<Instant> = None;

    loop {
        if handle.shared.draining.load(Ordering::SeqCst) {
            break;
        }

        if audio.is_caught_up() {
            tokio::select! {
                _ = handle.shared.exit.notified() => break,
                _ = audio.wait_for_data(POLL_INTERVAL) => {}
            }
            if handle.shared.draining.load(Ordering::SeqCst) {
                break;
            }
        }

        audio.clip_if_stale();
        let (samples, duration) = audio.next_chunk();
        if duration < MIN_CHUNK_SECS {
            tokio::time::sleep(POLL_INTERVAL).await;
            continue;
        }

        let speaker_lang = handle.shared.speaker_lang.lock().await.clone();
        let resolved_lang = speaker_lang.or_else(|| session_language.clone());
        let targets = handle.shared.all_langs.lock().await.clone();
        let src_lang = resolved_lang.clone().unwrap_or_else(|| "en".to_string());

        let request = AsrRequest {
            samples,
            initial_prompt: handshake.initial_prompt.clone(),
            language: resolved_lang.clone(),
            task: handshake.task,
            vad_filter: handshake.use_vad,
            vad_parameters: handshake.vad_parameters.clone(),
        };

        let response = match asr.transcribe(request).await {
            Ok(r) => r,
            Err(e) => {
                warn!(uid = %uid, error = %e, "ASR call failed, skipping this iteration");
                tokio::time::sleep(POLL_INTERVAL).await;
                continue;
            }
        };

        if response.segments.is_empty() {
            let started = *pause_started_at.get_or_insert_with(Instant::now);
            let elapsed = started.elapsed().as_secs_f64();
            if elapsed < SHOW_PREV_OUT_THRESH_SECS {
                let segments = bounded_wire_segments(&transcript, None);
                let _ = handle
                    .shared
                    .outbound
                    .send_json(&ServerToSpeaker::Segments { uid: uid.clone(), segments })
                    .await;
            }
            if elapsed > ADD_PAUSE_THRESH_SECS
                && text_history.last().map(|t| !t.is_empty()).unwrap_or(false)
            {
                text_history.push(String::new());
            }
            if let Some(unit) = accumulator.idle_finalize() {
                submit_and_broadcast(
                    &unit.text,
                    unit.start,
                    unit.end,
                    &src_lang,
                    &targets,
                    &translator,
                    &listeners,
                    &uid,
                    &mut translation_id,
                )
                .await;
            }
            audio.advance_timestamp(duration);
            tokio::time::sleep(POLL_INTERVAL).await;
            continue;
        }
        pause_started_at = None;

        if !language_adopted {
            if response.info.language_probability > 0.5 {
                if let Some(detected) = response.info.language.clone() {
                    session_language = Some(detected.clone());
                    language_adopted = true;
                    accumulator = SentenceAccumulator::new(is_rtl(&detected));
                    let _ = handle
                        .shared
                        .outbound
                        .send_json(&ServerToSpeaker::Language {
                            uid: uid.clone(),
                            language: detected,
                            language_prob: response.info.language_probability,
                        })
                        .await;
                }
            }
        }

        let base = audio.timestamp_offset();
        let n = response.segments.len();
        let mut offset: Option<f64> = None;

        if n > 1 {
            for sub in &response.segments[..n - 1] {
                text_history.push(sub.text.clone());
                let start = base + sub.start;
                let end = base + duration.min(sub.end);
                if start >= end || sub.no_speech_prob > NO_SPEECH_THRESH {
                    continue;
                }
                transcript.push(TranscriptSegment {
                    start,
                    end,
                    text: sub.text.clone(),
                });
                if let Some(unit) = accumulator.on_event(&sub.text, true, start, end) {
                    submit_and_broadcast(
                        &unit.text,
                        unit.start,
                        unit.end,
                        &src_lang,
                        &targets,
                        &translator,
                        &listeners,
                        &uid,
                        &mut translation_id,
                    )
                    .await;
                }
                offset = Some(duration.min(sub.end));
            }
        }

        let last = &response.segments[n - 1];
        let mut provisional: Option<TranscriptSegment> = None;
        if last.no_speech_prob <= NO_SPEECH_THRESH {
            let current_out = last.text.clone();
            let start = base + last.start;
            let end = base + duration.min(last.end);
            provisional = Some(TranscriptSegment {
                start,
                end,
                text: current_out.clone(),
            });

            if !current_out.trim().is_empty()
                && current_out.trim().eq_ignore_ascii_case(prev_out.trim())
            {
                same_output_threshold += 1;
            } else {
                same_output_threshold = 0;
            }

            if same_output_threshold > SAME_OUTPUT_COMMIT_THRESHOLD {
                let already_seen = text_history
                    .last()
                    .map(|t| t.trim().eq_ignore_ascii_case(current_out.trim()))
                    .unwrap_or(false);
                if !already_seen {
                    text_history.push(current_out.clone());
                    let commit_start = base;
                    let commit_end = base + duration;
                    transcript.push(TranscriptSegment {
                        start: commit_start,
                        end: commit_end,
                        text: current_out.clone(),
                    });
                    if let Some(unit) = accumulator.on_event(&current_out, true, commit_start, commit_end) {
                        submit_and_broadcast(
                            &unit.text,
                            unit.start,
                            unit.end,
                            &src_lang,
                            &targets,
                            &translator,
                            &listeners,
                            &uid,
                            &mut translation_id,
                        )
                        .await;
                    }
                }
                provisional = None;
                offset = Some(duration);
                same_output_threshold = 0;
            } else {
                prev_out = current_out;
            }

            if let Some(ref p) = provisional {
                if let Some(unit) = accumulator.on_event("", false, p.start, p.end) {
                    submit_and_broadcast(
                        &unit.text,
                        unit.start,
                        unit.end,
                        &src_lang,
                        &targets,
                        &translator,
                        &listeners,
                        &uid,
                        &mut translation_id,
                    )
                    .await;
                }
            }
        }

        if let Some(offset) = offset {
            audio.advance_timestamp(offset);
        }

        let segments = bounded_wire_segments(&transcript, provisional.as_ref());
        if let Err(e) = handle
            .shared
            .outbound
            .send_json(&ServerToSpeaker::Segments { uid: uid.clone(), segments })
            .await
        {
            warn!(uid = %uid, error = %e, "failed to send segments to speaker, terminating session");
            handle.shared.draining.store(true, Ordering::SeqCst);
            break;
        }
    }

    // DRAINING: finalize whatever is pending, then disconnect (§4.8).
    if let Some(unit) = accumulator.idle_finalize() {
        let speaker_lang = handle.shared.speaker_lang.lock().await.clone();
        let src_lang = speaker_lang
            .or(session_language.clone())
            .unwrap_or_else(|| "en".to_string());
        let targets = handle.shared.all_langs.lock().await.clone();
        submit_and_broadcast(
            &unit.text,
            unit.start,
            unit.end,
            &src_lang,
            &targets,
            &translator,
            &listeners,
            &uid,
            &mut translation_id,
        )
        .await;
    }
    let _ = handle
        .shared
        .outbound
        .send_json(&ServerToSpeaker::disconnect(uid))
        .await;
}
