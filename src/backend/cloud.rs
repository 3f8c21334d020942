//! Deepgram cloud backend.
//!
//! The live path holds a bidirectional websocket: binary audio frames go
//! up, JSON events come down, and a `KeepAlive` text message keeps idle
//! connections open. The pre-recorded path posts a whole WAV payload and
//! prefers per-utterance results, falling back to grouping word timings by
//! speaker change.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use super::event::{BackendCommand, RawSegment, TranscriptEvent, WordInfo};
use super::{BackendKind, BackendStream, FileTranscript, StreamParams, TranscriptionBackend};
use crate::config::DeepgramConfig;
use crate::error::PipelineError;

const DEFAULT_HTTP_ENDPOINT: &str = "https://api.deepgram.com/v1/listen";
const DEFAULT_WS_ENDPOINT: &str = "wss://api.deepgram.com/v1/listen";

pub struct DeepgramBackend {
    api_key: Option<String>,
    http_endpoint: String,
    ws_endpoint: String,
    model: String,
    client: reqwest::Client,
}

impl DeepgramBackend {
    pub fn new(config: &DeepgramConfig) -> Result<Self, PipelineError> {
        let (http_endpoint, ws_endpoint) = match &config.api_endpoint {
            Some(endpoint) => {
                let ws = endpoint
                    .replacen("https://", "wss://", 1)
                    .replacen("http://", "ws://", 1);
                (endpoint.clone(), ws)
            }
            None => (
                DEFAULT_HTTP_ENDPOINT.to_string(),
                DEFAULT_WS_ENDPOINT.to_string(),
            ),
        };

        Ok(Self {
            api_key: config.api_key.clone(),
            http_endpoint,
            ws_endpoint,
            model: config.model.clone(),
            client: reqwest::Client::new(),
        })
    }

    fn api_key(&self) -> Result<&str, PipelineError> {
        match self.api_key.as_deref() {
            Some(key) if !key.is_empty() => Ok(key),
            _ => Err(PipelineError::Configuration(
                "API key required for the Deepgram backend".to_string(),
            )),
        }
    }

    fn live_url(&self, params: &StreamParams) -> String {
        let mut url = format!(
            "{}?model={}&encoding=linear16&sample_rate={}&channels=1\
             &punctuate=true&smart_format=true\
             &interim_results={}&diarize={}&utterance_end_ms={}&endpointing={}&vad_events=true",
            self.ws_endpoint,
            self.model,
            params.sample_rate,
            params.interim_results,
            params.diarize,
            params.utterance_end_ms,
            params.endpointing_ms,
        );

        if params.language == "auto" {
            url.push_str("&detect_language=true");
        } else {
            url.push_str(&format!("&language={}", params.language));
        }

        for keyword in &params.keywords {
            url.push_str(&format!("&keywords={}", keyword));
        }

        url
    }
}

#[async_trait]
impl TranscriptionBackend for DeepgramBackend {
    fn name(&self) -> &'static str {
        "Deepgram"
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Cloud
    }

    fn validate(&self) -> Result<(), PipelineError> {
        self.api_key().map(|_| ())
    }

    async fn open_stream(&self, params: &StreamParams) -> Result<BackendStream, PipelineError> {
        let key = self.api_key()?;
        let url = self.live_url(params);

        let mut request = url
            .into_client_request()
            .map_err(|e| PipelineError::BackendConnection(e.to_string()))?;
        request.headers_mut().insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Token {}", key))
                .map_err(|e| PipelineError::Configuration(e.to_string()))?,
        );

        let (ws, _response) = connect_async(request)
            .await
            .map_err(|e| PipelineError::BackendConnection(e.to_string()))?;
        info!("Deepgram live connection opened (model {})", self.model);

        let (mut sink, mut source) = ws.split();
        let (cmd_tx, mut cmd_rx) = mpsc::channel::<BackendCommand>(64);
        let (event_tx, event_rx) = mpsc::channel::<TranscriptEvent>(64);

        // Writer: forward commands to the socket.
        tokio::spawn(async move {
            while let Some(cmd) = cmd_rx.recv().await {
                let message = match cmd {
                    BackendCommand::Audio(samples) => Message::Binary(pcm_bytes(&samples)),
                    BackendCommand::KeepAlive => {
                        Message::Text(r#"{"type":"KeepAlive"}"#.to_string())
                    }
                    BackendCommand::Flush => Message::Text(r#"{"type":"Finalize"}"#.to_string()),
                    BackendCommand::Close => {
                        let _ = sink
                            .send(Message::Text(r#"{"type":"CloseStream"}"#.to_string()))
                            .await;
                        break;
                    }
                };
                if sink.send(message).await.is_err() {
                    break;
                }
            }
            let _ = sink.close().await;
        });

        // Reader: decode inbound JSON events.
        tokio::spawn(async move {
            while let Some(message) = source.next().await {
                match message {
                    Ok(Message::Text(text)) => match parse_live_event(&text) {
                        Ok(Some(event)) => {
                            if event_tx.send(event).await.is_err() {
                                break;
                            }
                        }
                        Ok(None) => {}
                        // Malformed messages are skipped, not fatal.
                        Err(e) => warn!("Unparseable Deepgram message: {} ({})", e, text),
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        let _ = event_tx
                            .send(TranscriptEvent::Error {
                                message: e.to_string(),
                                terminal: false,
                            })
                            .await;
                        break;
                    }
                }
            }
            let _ = event_tx.send(TranscriptEvent::Closed).await;
        });

        Ok(BackendStream {
            commands: cmd_tx,
            events: event_rx,
        })
    }

    async fn transcribe_file(
        &self,
        path: &Path,
        language: Option<&str>,
    ) -> Result<FileTranscript, PipelineError> {
        let key = self.api_key()?;
        let audio = tokio::fs::read(path)
            .await
            .map_err(|e| PipelineError::BackendConnection(format!("read {:?}: {}", path, e)))?;

        let mut url = format!(
            "{}?model={}&punctuate=true&smart_format=true&diarize=true&utterances=true",
            self.http_endpoint, self.model
        );
        match language {
            Some("auto") | None => url.push_str("&detect_language=true"),
            Some(lang) => url.push_str(&format!("&language={}", lang)),
        }

        debug!("Submitting pre-recorded request: {:?}", path);
        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Token {}", key))
            .header("Content-Type", "audio/wav")
            .body(audio)
            .send()
            .await
            .map_err(|e| PipelineError::BackendConnection(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| PipelineError::BackendConnection(e.to_string()))?;

        if !status.is_success() {
            return Err(PipelineError::BackendConnection(format!(
                "pre-recorded request failed with status {}: {}",
                status, body
            )));
        }

        let parsed: PrerecordedResponse = serde_json::from_str(&body)
            .map_err(|e| PipelineError::BackendProtocol(e.to_string()))?;

        Ok(parsed.into_transcript())
    }
}

fn pcm_bytes(samples: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        let s = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
        bytes.extend_from_slice(&s.to_le_bytes());
    }
    bytes
}

// ----------------------------------------------------------------------
// Live wire format
// ----------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum WireMessage {
    Results(WireResults),
    UtteranceEnd(WireUtteranceEnd),
    SpeechStarted(WireSpeechStarted),
    Metadata(WireMetadata),
    Warning(WireNotice),
    Error(WireNotice),
}

#[derive(Debug, Deserialize)]
struct WireResults {
    channel: WireChannel,
    #[serde(default)]
    is_final: bool,
    #[serde(default)]
    speech_final: bool,
}

#[derive(Debug, Deserialize)]
struct WireChannel {
    alternatives: Vec<WireAlternative>,
    #[serde(default)]
    detected_language: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireAlternative {
    transcript: String,
    #[serde(default)]
    confidence: f32,
    #[serde(default)]
    words: Vec<WireWord>,
}

#[derive(Debug, Deserialize)]
struct WireWord {
    word: String,
    #[serde(default)]
    punctuated_word: Option<String>,
    start: f64,
    end: f64,
    #[serde(default)]
    confidence: f32,
    #[serde(default)]
    speaker: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct WireUtteranceEnd {
    #[serde(default)]
    last_word_end: f64,
}

#[derive(Debug, Deserialize)]
struct WireSpeechStarted {
    #[serde(default)]
    timestamp: f64,
}

#[derive(Debug, Deserialize)]
struct WireMetadata {
    #[serde(default)]
    request_id: String,
}

#[derive(Debug, Deserialize)]
struct WireNotice {
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl WireNotice {
    fn text(&self) -> String {
        self.description
            .clone()
            .or_else(|| self.message.clone())
            .unwrap_or_else(|| "unknown".to_string())
    }
}

impl From<&WireWord> for WordInfo {
    fn from(w: &WireWord) -> Self {
        WordInfo {
            text: w.punctuated_word.clone().unwrap_or_else(|| w.word.clone()),
            start: w.start,
            end: w.end,
            confidence: w.confidence,
            speaker: w.speaker,
        }
    }
}

fn parse_live_event(text: &str) -> Result<Option<TranscriptEvent>, serde_json::Error> {
    let message: WireMessage = serde_json::from_str(text)?;
    Ok(match message {
        WireMessage::Results(results) => {
            let Some(alternative) = results.channel.alternatives.first() else {
                return Ok(None);
            };
            let words: Vec<WordInfo> = alternative.words.iter().map(WordInfo::from).collect();
            Some(TranscriptEvent::Results {
                text: alternative.transcript.clone(),
                is_final: results.is_final,
                speech_final: results.speech_final,
                confidence: alternative.confidence,
                speaker: dominant_speaker(&words),
                words,
                detected_language: results.channel.detected_language,
            })
        }
        WireMessage::UtteranceEnd(u) => Some(TranscriptEvent::UtteranceEnd {
            last_word_end: u.last_word_end,
        }),
        WireMessage::SpeechStarted(s) => Some(TranscriptEvent::SpeechStarted {
            timestamp: s.timestamp,
        }),
        WireMessage::Metadata(m) => Some(TranscriptEvent::Metadata {
            request_id: m.request_id,
        }),
        WireMessage::Warning(n) => Some(TranscriptEvent::Warning { message: n.text() }),
        WireMessage::Error(n) => Some(TranscriptEvent::Error {
            message: n.text(),
            terminal: true,
        }),
    })
}

/// Most frequent word-level speaker index, if any words carry one.
fn dominant_speaker(words: &[WordInfo]) -> Option<u32> {
    let mut counts: HashMap<u32, usize> = HashMap::new();
    for word in words {
        if let Some(speaker) = word.speaker {
            *counts.entry(speaker).or_default() += 1;
        }
    }
    counts.into_iter().max_by_key(|(_, n)| *n).map(|(s, _)| s)
}

// ----------------------------------------------------------------------
// Pre-recorded wire format
// ----------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct PrerecordedResponse {
    results: PrerecordedResults,
}

#[derive(Debug, Deserialize)]
struct PrerecordedResults {
    #[serde(default)]
    utterances: Option<Vec<WireUtterance>>,
    #[serde(default)]
    channels: Vec<WireChannel>,
}

#[derive(Debug, Deserialize)]
struct WireUtterance {
    start: f64,
    end: f64,
    transcript: String,
    #[serde(default)]
    confidence: f32,
    #[serde(default)]
    speaker: Option<u32>,
    #[serde(default)]
    words: Vec<WireWord>,
}

impl PrerecordedResponse {
    fn into_transcript(self) -> FileTranscript {
        let detected_language = self
            .results
            .channels
            .first()
            .and_then(|c| c.detected_language.clone());

        if let Some(utterances) = self.results.utterances {
            let segments = utterances
                .into_iter()
                .filter(|u| !u.transcript.trim().is_empty())
                .map(|u| RawSegment {
                    start: u.start,
                    end: u.end,
                    text: u.transcript,
                    confidence: u.confidence,
                    speaker: u.speaker,
                    words: u.words.iter().map(WordInfo::from).collect(),
                })
                .collect();
            return FileTranscript {
                segments,
                detected_language,
            };
        }

        // Fallback: one alternative with word timings, grouped into
        // segments at speaker-change boundaries.
        let words: Vec<WordInfo> = self
            .results
            .channels
            .first()
            .and_then(|c| c.alternatives.first())
            .map(|a| a.words.iter().map(WordInfo::from).collect())
            .unwrap_or_default();

        FileTranscript {
            segments: group_words_by_speaker(&words),
            detected_language,
        }
    }
}

/// Group a flat word list into segments, breaking on speaker change.
pub fn group_words_by_speaker(words: &[WordInfo]) -> Vec<RawSegment> {
    let mut segments: Vec<RawSegment> = Vec::new();

    for word in words {
        let split = match segments.last() {
            Some(last) => last.speaker != word.speaker,
            None => true,
        };

        if split {
            segments.push(RawSegment {
                start: word.start,
                end: word.end,
                text: word.text.clone(),
                confidence: word.confidence,
                speaker: word.speaker,
                words: vec![word.clone()],
            });
        } else {
            let last = segments.last_mut().expect("checked above");
            last.end = word.end;
            last.text.push(' ');
            last.text.push_str(&word.text);
            // Running average keeps the segment confidence meaningful.
            let n = last.words.len() as f32;
            last.confidence = (last.confidence * n + word.confidence) / (n + 1.0);
            last.words.push(word.clone());
        }
    }

    segments
}

#[cfg(test)]
mod tests {
    use super::*;

    fn word(text: &str, start: f64, speaker: Option<u32>) -> WordInfo {
        WordInfo {
            text: text.to_string(),
            start,
            end: start + 0.3,
            confidence: 0.9,
            speaker,
        }
    }

    #[test]
    fn parse_interim_results_event() {
        let json = r#"{
            "type": "Results",
            "is_final": false,
            "speech_final": false,
            "channel": {
                "alternatives": [
                    {"transcript": "hello wor", "confidence": 0.82, "words": []}
                ]
            }
        }"#;

        let event = parse_live_event(json).unwrap().unwrap();
        match event {
            TranscriptEvent::Results { text, is_final, .. } => {
                assert_eq!(text, "hello wor");
                assert!(!is_final);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn parse_final_results_with_words_and_speaker() {
        let json = r#"{
            "type": "Results",
            "is_final": true,
            "speech_final": true,
            "channel": {
                "alternatives": [{
                    "transcript": "hello world",
                    "confidence": 0.97,
                    "words": [
                        {"word": "hello", "punctuated_word": "Hello", "start": 1.0, "end": 1.4, "confidence": 0.99, "speaker": 1},
                        {"word": "world", "start": 1.5, "end": 1.9, "confidence": 0.95, "speaker": 1}
                    ]
                }]
            }
        }"#;

        let event = parse_live_event(json).unwrap().unwrap();
        match event {
            TranscriptEvent::Results {
                is_final,
                words,
                speaker,
                ..
            } => {
                assert!(is_final);
                assert_eq!(words.len(), 2);
                assert_eq!(words[0].text, "Hello");
                assert_eq!(speaker, Some(1));
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn parse_utterance_end_and_metadata() {
        let end = parse_live_event(r#"{"type":"UtteranceEnd","last_word_end":4.2}"#)
            .unwrap()
            .unwrap();
        assert!(matches!(
            end,
            TranscriptEvent::UtteranceEnd { last_word_end } if (last_word_end - 4.2).abs() < 1e-9
        ));

        let meta = parse_live_event(r#"{"type":"Metadata","request_id":"abc"}"#)
            .unwrap()
            .unwrap();
        assert!(matches!(meta, TranscriptEvent::Metadata { request_id } if request_id == "abc"));
    }

    #[test]
    fn parse_error_event_is_terminal() {
        let event = parse_live_event(r#"{"type":"Error","description":"bad auth"}"#)
            .unwrap()
            .unwrap();
        assert!(matches!(
            event,
            TranscriptEvent::Error { terminal: true, message } if message == "bad auth"
        ));
    }

    #[test]
    fn unknown_message_type_is_a_parse_error() {
        assert!(parse_live_event(r#"{"type":"SomethingNew"}"#).is_err());
    }

    #[test]
    fn group_words_breaks_on_speaker_change() {
        let words = vec![
            word("good", 0.0, Some(0)),
            word("morning", 0.4, Some(0)),
            word("hi", 1.0, Some(1)),
            word("there", 1.4, Some(1)),
            word("so", 2.0, Some(0)),
        ];

        let segments = group_words_by_speaker(&words);
        assert_eq!(segments.len(), 3);
        assert_eq!(segments[0].text, "good morning");
        assert_eq!(segments[0].speaker, Some(0));
        assert_eq!(segments[1].text, "hi there");
        assert_eq!(segments[1].speaker, Some(1));
        assert_eq!(segments[2].text, "so");
    }

    #[test]
    fn group_words_without_speakers_yields_one_segment() {
        let words = vec![word("one", 0.0, None), word("two", 0.5, None)];
        let segments = group_words_by_speaker(&words);
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].text, "one two");
    }

    #[test]
    fn prerecorded_prefers_utterances() {
        let json = r#"{
            "results": {
                "utterances": [
                    {"start": 0.5, "end": 2.0, "transcript": "first utterance", "confidence": 0.9, "speaker": 0, "words": []}
                ],
                "channels": [{"alternatives": [{"transcript": "ignored", "confidence": 0.5, "words": []}]}]
            }
        }"#;

        let parsed: PrerecordedResponse = serde_json::from_str(json).unwrap();
        let transcript = parsed.into_transcript();
        assert_eq!(transcript.segments.len(), 1);
        assert_eq!(transcript.segments[0].text, "first utterance");
    }

    #[test]
    fn live_url_contains_stream_parameters() {
        let backend = DeepgramBackend::new(&DeepgramConfig {
            api_key: Some("key".to_string()),
            ..Default::default()
        })
        .unwrap();

        let params = StreamParams {
            sample_rate: 16_000,
            language: "auto".to_string(),
            diarize: true,
            interim_results: true,
            utterance_end_ms: 1000,
            endpointing_ms: 300,
            keywords: vec!["scribed".to_string()],
        };

        let url = backend.live_url(&params);
        assert!(url.contains("sample_rate=16000"));
        assert!(url.contains("detect_language=true"));
        assert!(url.contains("diarize=true"));
        assert!(url.contains("keywords=scribed"));
    }

    #[test]
    fn missing_api_key_fails_validation() {
        let backend = DeepgramBackend::new(&DeepgramConfig::default()).unwrap();
        assert!(matches!(
            backend.validate(),
            Err(PipelineError::Configuration(_))
        ));
    }
}
