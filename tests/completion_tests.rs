//! Completion client tests against a loopback HTTP stub

use serde_json::Value;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpListener;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use voice_assist::llm::{CompletionClient, CompletionConfig, CompletionError};
use voice_assist::Message;

/// What the stub server saw
#[derive(Debug)]
struct RecordedRequest {
    request_line: String,
    headers: Vec<(String, String)>,
    body: String,
}

impl RecordedRequest {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    fn json(&self) -> Value {
        serde_json::from_str(&self.body).unwrap()
    }
}

/// Serve one request with `status` and `body` after `delay`.
/// Returns the base URL and a handle yielding the recorded request.
fn serve_once(
    status: u16,
    body: &'static str,
    delay: Duration,
) -> (String, thread::JoinHandle<RecordedRequest>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let base_url = format!("http://{}/v1/", listener.local_addr().unwrap());

    let handle = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let mut reader = BufReader::new(stream.try_clone().unwrap());

        let mut request_line = String::new();
        reader.read_line(&mut request_line).unwrap();

        let mut headers = Vec::new();
        loop {
            let mut line = String::new();
            reader.read_line(&mut line).unwrap();
            let line = line.trim_end();
            if line.is_empty() {
                break;
            }
            if let Some((key, value)) = line.split_once(':') {
                headers.push((key.trim().to_string(), value.trim().to_string()));
            }
        }

        let length = headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case("content-length"))
            .and_then(|(_, value)| value.parse::<usize>().ok())
            .unwrap_or(0);
        let mut request_body = vec![0u8; length];
        reader.read_exact(&mut request_body).unwrap();

        thread::sleep(delay);

        let reply = format!(
            "HTTP/1.1 {} Stub\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            status,
            body.len(),
            body,
        );
        // The client may have given up already
        let _ = stream.write_all(reply.as_bytes());
        let _ = stream.flush();

        RecordedRequest {
            request_line: request_line.trim_end().to_string(),
            headers,
            body: String::from_utf8(request_body).unwrap(),
        }
    });

    (base_url, handle)
}

fn conversation() -> Vec<Message> {
    vec![
        Message::system("You are terse."),
        Message::user("What is the capital of France?"),
    ]
}

fn openai_client(base_url: &str) -> CompletionClient {
    let config = CompletionConfig::new("test-model")
        .with_base_url(base_url)
        .with_api_key("sk-test")
        .with_max_tokens(64)
        .with_timeout_secs(5);
    CompletionClient::new(config).unwrap()
}

const OPENAI_REPLY: &str =
    r#"{"id":"cmpl-1","choices":[{"index":0,"message":{"role":"assistant","content":"Paris."}}]}"#;

#[test]
fn test_openai_success() {
    let (base_url, server) = serve_once(200, OPENAI_REPLY, Duration::ZERO);
    let client = openai_client(&base_url);

    let reply = client.send_blocking(conversation());
    assert_eq!(reply, Ok("Paris.".to_string()));

    let request = server.join().unwrap();
    assert_eq!(request.request_line, "POST /v1/chat/completions HTTP/1.1");
    assert_eq!(request.header("authorization"), Some("Bearer sk-test"));
    assert!(request
        .header("content-type")
        .unwrap_or_default()
        .starts_with("application/json"));

    let body = request.json();
    assert_eq!(body["model"], "test-model");
    assert_eq!(body["max_tokens"], 64);
    assert_eq!(body["messages"].as_array().unwrap().len(), 2);
    assert_eq!(body["messages"][0]["role"], "system");
    assert_eq!(body["messages"][1]["role"], "user");
    assert_eq!(body["messages"][1]["content"], "What is the capital of France?");
}

#[test]
fn test_error_status_is_reported() {
    let (base_url, server) = serve_once(
        401,
        r#"{"error":{"message":"Invalid API key"}}"#,
        Duration::ZERO,
    );
    let client = openai_client(&base_url);

    match client.send_blocking(conversation()) {
        Err(CompletionError::Status { status, body }) => {
            assert_eq!(status, 401);
            assert!(body.contains("Invalid API key"));
        }
        other => panic!("Expected status error, got {:?}", other),
    }
    server.join().unwrap();
}

#[test]
fn test_malformed_body_is_reported() {
    let (base_url, server) = serve_once(200, r#"{"choices":[]}"#, Duration::ZERO);
    let client = openai_client(&base_url);

    assert!(matches!(
        client.send_blocking(conversation()),
        Err(CompletionError::MalformedResponse(_))
    ));
    server.join().unwrap();

    let (base_url, server) = serve_once(200, "not json at all", Duration::ZERO);
    let client = openai_client(&base_url);
    assert!(matches!(
        client.send_blocking(conversation()),
        Err(CompletionError::MalformedResponse(_))
    ));
    server.join().unwrap();
}

#[test]
fn test_timeout_is_transport_error() {
    let (base_url, server) = serve_once(200, OPENAI_REPLY, Duration::from_secs(3));
    let config = CompletionConfig::new("test-model")
        .with_base_url(&base_url)
        .with_timeout_secs(1);
    let client = CompletionClient::new(config).unwrap();

    assert!(matches!(
        client.send_blocking(conversation()),
        Err(CompletionError::Transport(_))
    ));

    // No API key means no Authorization header
    let request = server.join().unwrap();
    assert_eq!(request.header("authorization"), None);
}

#[test]
fn test_unreachable_endpoint_is_transport_error() {
    // Bind then drop to get a port nobody listens on
    let port = TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port();
    let client = openai_client(&format!("http://127.0.0.1:{}/v1/", port));

    assert!(matches!(
        client.send_blocking(conversation()),
        Err(CompletionError::Transport(_))
    ));
}

#[test]
fn test_cancel_in_flight_request() {
    let (base_url, _server) = serve_once(200, OPENAI_REPLY, Duration::from_secs(2));
    let client = openai_client(&base_url);

    let calls = Arc::new(AtomicUsize::new(0));
    let (tx, rx) = crossbeam_channel::unbounded();
    let counter = calls.clone();
    let id = client.send(
        conversation(),
        Box::new(move |result| {
            counter.fetch_add(1, Ordering::SeqCst);
            let _ = tx.send(result);
        }),
    );
    assert_eq!(client.pending_request(), Some(id));

    thread::sleep(Duration::from_millis(100));
    assert!(client.cancel());

    assert_eq!(
        rx.recv_timeout(Duration::from_secs(1)).unwrap(),
        Err(CompletionError::Cancelled)
    );

    // Resolved exactly once, even after the server eventually answers
    thread::sleep(Duration::from_millis(300));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(client.pending_request(), None);
    assert!(!client.cancel());
}

#[test]
fn test_gemini_request_shape() {
    let (base_url, server) = serve_once(
        200,
        r#"{"candidates":[{"content":{"role":"model","parts":[{"text":"Paris."}]}}]}"#,
        Duration::ZERO,
    );
    let config = CompletionConfig::gemini("gemini-test")
        .with_base_url(base_url.trim_end_matches("v1/"))
        .with_api_key("g-key");
    let client = CompletionClient::new(config).unwrap();

    assert_eq!(client.send_blocking(conversation()), Ok("Paris.".to_string()));

    let request = server.join().unwrap();
    assert_eq!(
        request.request_line,
        "POST /v1beta/models/gemini-test:generateContent?key=g-key HTTP/1.1"
    );
    assert_eq!(request.header("authorization"), None);

    let body = request.json();
    assert_eq!(body["systemInstruction"]["parts"][0]["text"], "You are terse.");
    assert_eq!(body["contents"].as_array().unwrap().len(), 1);
    assert_eq!(body["contents"][0]["role"], "user");
}

#[test]
fn test_gemini_blocked_reply() {
    let (base_url, server) = serve_once(
        200,
        r#"{"promptFeedback":{"blockReason":"SAFETY"}}"#,
        Duration::ZERO,
    );
    let config = CompletionConfig::gemini("gemini-test")
        .with_base_url(base_url.trim_end_matches("v1/"))
        .with_api_key("g-key");
    let client = CompletionClient::new(config).unwrap();

    assert_eq!(
        client.send_blocking(conversation()),
        Err(CompletionError::Blocked("SAFETY".to_string()))
    );
    server.join().unwrap();
}
