//! Remote service clients against an in-process upstream

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, Uri, header};
use axum::response::{IntoResponse, Response};
use mediguide::config::VoiceConfig;
use mediguide::image::EncodedImage;
use mediguide::voice::{SpeechToText, TextToSpeech};
use mediguide::{ChatClient, Error, TtsError};
use secrecy::SecretString;
use tokio::net::TcpListener;

mod common;
use common::{TINY_PNG, wav_bytes};

/// One request as the upstream saw it
#[derive(Debug, Clone)]
struct Received {
    path: String,
    query: Option<String>,
    headers: HeaderMap,
    body: Bytes,
}

impl Received {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).unwrap()
    }
}

/// Fake upstream replaying canned responses; the last one repeats
struct Upstream {
    replies: Mutex<VecDeque<(StatusCode, &'static str, Vec<u8>)>>,
    received: Mutex<Vec<Received>>,
}

impl Upstream {
    fn replying(replies: Vec<(StatusCode, &'static str, Vec<u8>)>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            received: Mutex::new(Vec::new()),
        })
    }

    fn json(status: StatusCode, body: &str) -> Arc<Self> {
        Self::replying(vec![(status, "application/json", body.as_bytes().to_vec())])
    }

    fn last(&self) -> Received {
        self.received
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("upstream was not called")
    }

    fn request_count(&self) -> usize {
        self.received.lock().unwrap().len()
    }
}

async fn reply(
    State(upstream): State<Arc<Upstream>>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    upstream.received.lock().unwrap().push(Received {
        path: uri.path().to_string(),
        query: uri.query().map(ToString::to_string),
        headers,
        body,
    });

    let (status, content_type, body) = {
        let mut replies = upstream.replies.lock().unwrap();
        if replies.len() > 1 {
            replies.pop_front().unwrap()
        } else {
            replies.front().cloned().unwrap()
        }
    };
    (status, [(header::CONTENT_TYPE, content_type)], body).into_response()
}

/// Serve `upstream` on an ephemeral port and return its base URL
async fn serve(upstream: Arc<Upstream>) -> String {
    let app = Router::new().fallback(reply).with_state(upstream);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

/// Client that talks to the local upstream directly, ignoring proxy settings
fn local_http() -> reqwest::Client {
    reqwest::Client::builder().no_proxy().build().unwrap()
}

fn key(value: &str) -> Option<SecretString> {
    Some(SecretString::from(value.to_string()))
}

fn wav_voice() -> VoiceConfig {
    VoiceConfig {
        tts_voice: "test-voice".to_string(),
        tts_model: "eleven_turbo_v2".to_string(),
        tts_format: "wav_16000".parse().unwrap(),
        ..VoiceConfig::default()
    }
}

fn wav_reply(secs: f32) -> (StatusCode, &'static str, Vec<u8>) {
    (StatusCode::OK, "audio/wav", wav_bytes(secs))
}

#[tokio::test]
async fn test_chat_sends_bearer_and_returns_first_choice() {
    let upstream = Upstream::json(
        StatusCode::OK,
        r#"{"choices":[{"message":{"role":"assistant","content":"Rest."}},{"message":{"content":"Ignored."}}]}"#,
    );
    let base = format!("{}/", serve(upstream.clone()).await);
    let client = ChatClient::new(key("groq-test-key"), base).with_http_client(local_http());

    let answer = client
        .analyze("I have a fever", None, "llama-3.3-70b-versatile")
        .await
        .unwrap();
    assert_eq!(answer, "Rest.");

    let request = upstream.last();
    assert_eq!(request.path, "/chat/completions");
    assert_eq!(request.header("authorization"), Some("Bearer groq-test-key"));
    let json = request.json();
    assert_eq!(json["model"], "llama-3.3-70b-versatile");
    assert_eq!(json["messages"][0]["content"][0]["text"], "I have a fever");
}

#[tokio::test]
async fn test_chat_sends_image_as_data_uri() {
    let upstream = Upstream::json(
        StatusCode::OK,
        r#"{"choices":[{"message":{"content":"Looks like a mild rash."}}]}"#,
    );
    let base = serve(upstream.clone()).await;
    let client = ChatClient::new(key("groq-test-key"), base).with_http_client(local_http());
    let image = EncodedImage::from_bytes(TINY_PNG, None);

    let answer = client
        .analyze("what is this?", Some(&image), "llama-3.2-90b-vision-preview")
        .await
        .unwrap();
    assert_eq!(answer, "Looks like a mild rash.");

    let json = upstream.last().json();
    let url = json["messages"][0]["content"][1]["image_url"]["url"]
        .as_str()
        .unwrap()
        .to_string();
    assert!(url.starts_with("data:image/png;base64,"));
}

#[tokio::test]
async fn test_chat_errors_surface_status() {
    let upstream = Upstream::json(StatusCode::SERVICE_UNAVAILABLE, r#"{"error":"overloaded"}"#);
    let base = serve(upstream).await;
    let client = ChatClient::new(key("groq-test-key"), base).with_http_client(local_http());

    let result = client.analyze("hi", None, "llama-3.3-70b-versatile").await;
    assert!(matches!(result, Err(Error::Vision(ref m)) if m.contains("503")));
}

#[tokio::test]
async fn test_chat_without_choices_is_error() {
    let upstream = Upstream::json(StatusCode::OK, r#"{"choices":[]}"#);
    let base = serve(upstream).await;
    let client = ChatClient::new(key("groq-test-key"), base).with_http_client(local_http());

    let result = client.analyze("hi", None, "llama-3.3-70b-versatile").await;
    assert!(matches!(result, Err(Error::Vision(ref m)) if m.contains("no choices")));
}

#[tokio::test]
async fn test_transcription_sends_multipart_fields() {
    let upstream = Upstream::json(StatusCode::OK, r#"{"text":"my head hurts"}"#);
    let stt = SpeechToText::new(
        key("groq-test-key"),
        serve(upstream.clone()).await,
        "whisper-large-v3".to_string(),
        "en".to_string(),
    )
    .with_http_client(local_http());

    let text = stt
        .transcribe(b"fake audio".to_vec(), "recording.mp4")
        .await
        .unwrap();
    assert_eq!(text, "my head hurts");

    let request = upstream.last();
    assert_eq!(request.path, "/audio/transcriptions");
    assert_eq!(request.header("authorization"), Some("Bearer groq-test-key"));
    assert!(
        request
            .header("content-type")
            .is_some_and(|ct| ct.starts_with("multipart/form-data"))
    );

    let body = request.body_text();
    assert!(body.contains(r#"name="file"; filename="recording.mp4""#));
    assert!(body.contains("Content-Type: audio/mp4"));
    assert!(body.contains("fake audio"));
    assert!(body.contains(r#"name="model""#));
    assert!(body.contains("whisper-large-v3"));
    assert!(body.contains(r#"name="language""#));
    assert!(body.contains("\r\n\r\nen\r\n"));
}

#[tokio::test]
async fn test_transcription_error_is_stt_error() {
    let upstream = Upstream::json(StatusCode::BAD_REQUEST, r#"{"error":"bad audio"}"#);
    let stt = SpeechToText::new(
        key("groq-test-key"),
        serve(upstream).await,
        "whisper-large-v3".to_string(),
        "en".to_string(),
    )
    .with_http_client(local_http());

    let result = stt.transcribe(b"noise".to_vec(), "recording.webm").await;
    assert!(matches!(result, Err(Error::Stt(ref m)) if m.contains("bad audio")));
}

#[tokio::test]
async fn test_synthesis_sends_key_and_output_format() {
    let upstream = Upstream::replying(vec![wav_reply(1.0)]);
    let base = serve(upstream.clone()).await;
    let tts =
        TextToSpeech::new(key("xi-test-key"), base, &wav_voice()).with_http_client(local_http());

    let audio = tts.synthesize("Drink plenty of water.").await.unwrap();
    assert!(audio.starts_with(b"RIFF"));

    let request = upstream.last();
    assert_eq!(request.path, "/v1/text-to-speech/test-voice");
    assert_eq!(request.query.as_deref(), Some("output_format=wav_16000"));
    assert_eq!(request.header("xi-api-key"), Some("xi-test-key"));
    assert_eq!(request.header("authorization"), None);
    let json = request.json();
    assert_eq!(json["text"], "Drink plenty of water.");
    assert_eq!(json["model_id"], "eleven_turbo_v2");
}

#[tokio::test]
async fn test_synthesis_rejects_short_clip() {
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("final.wav");
    let upstream = Upstream::replying(vec![wav_reply(0.2)]);
    let base = serve(upstream).await;
    let tts =
        TextToSpeech::new(key("xi-test-key"), base, &wav_voice()).with_http_client(local_http());

    let result = tts.synthesize_to_file("Hi.", &dest).await;
    assert!(matches!(
        result,
        Err(Error::Tts(TtsError::TooShort {
            duration_ms: 200,
            min_ms: 500
        }))
    ));
    assert!(!dest.exists());
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_rejected_clip_keeps_previous_answer() {
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("final.wav");
    let upstream = Upstream::replying(vec![wav_reply(1.0), wav_reply(0.1)]);
    let base = serve(upstream.clone()).await;
    let tts =
        TextToSpeech::new(key("xi-test-key"), base, &wav_voice()).with_http_client(local_http());

    let saved = tts.synthesize_to_file("First answer.", &dest).await.unwrap();
    assert_eq!(saved, dest);
    let first = std::fs::read(&dest).unwrap();

    let result = tts.synthesize_to_file("Second answer.", &dest).await;
    assert!(matches!(result, Err(Error::Tts(TtsError::TooShort { .. }))));
    assert_eq!(upstream.request_count(), 2);

    assert_eq!(std::fs::read(&dest).unwrap(), first);
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
}

#[tokio::test]
async fn test_synthesis_voice_limit_is_classified() {
    let upstream = Upstream::json(
        StatusCode::BAD_REQUEST,
        r#"{"detail":{"status":"voice_limit_reached","message":"You have reached your maximum amount of custom voices"}}"#,
    );
    let base = serve(upstream).await;
    let tts =
        TextToSpeech::new(key("xi-test-key"), base, &wav_voice()).with_http_client(local_http());

    let dir = tempfile::tempdir().unwrap();
    let result = tts
        .synthesize_to_file("Hello.", &dir.path().join("final.wav"))
        .await;
    assert!(matches!(result, Err(Error::Tts(TtsError::VoiceLimitReached))));
}
