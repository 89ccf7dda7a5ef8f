use std::sync::Mutex;

use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use super::*;

fn interpreter(url: impl Into<String>) -> CodeInterpreter {
    let _ = rustls::crypto::ring::default_provider().install_default();
    CodeInterpreter::new(reqwest::Client::new(), url.into())
}

fn ndjson(lines: &[serde_json::Value]) -> String {
    lines
        .iter()
        .map(|l| format!("{l}\n"))
        .collect::<Vec<_>>()
        .concat()
}

#[derive(Default)]
struct Recorder {
    stdout: Mutex<Vec<OutputMessage>>,
    stderr: Mutex<Vec<OutputMessage>>,
    results: Mutex<usize>,
    errors: Mutex<Vec<String>>,
}

impl ExecutionListener for Recorder {
    fn on_stdout(&self, output: &OutputMessage) {
        self.stdout.lock().unwrap().push(output.clone());
    }

    fn on_stderr(&self, output: &OutputMessage) {
        self.stderr.lock().unwrap().push(output.clone());
    }

    fn on_result(&self, _result: &ExecResult) {
        *self.results.lock().unwrap() += 1;
    }

    fn on_error(&self, error: &ExecutionError) {
        self.errors.lock().unwrap().push(error.name.clone());
    }
}

#[tokio::test]
async fn run_collects_ndjson_events() {
    let server = MockServer::start().await;
    let body = ndjson(&[
        serde_json::json!({"type": "stdout", "text": "hello\n"}),
        serde_json::json!({"type": "stderr", "text": "careful\n"}),
        serde_json::json!({"type": "heartbeat"}),
        serde_json::json!({"type": "result", "is_main_result": true, "text": "2", "png": "iVBORw0KGgo="}),
        serde_json::json!({"type": "number_of_executions", "execution_count": 3}),
    ]);
    Mock::given(method("POST"))
        .and(path("/execute"))
        .and(body_partial_json(serde_json::json!({"code": "print('hello'); 1 + 1"})))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "application/x-ndjson"))
        .expect(1)
        .mount(&server)
        .await;

    let recorder = Recorder::default();
    let execution = interpreter(server.uri())
        .run_with("print('hello'); 1 + 1", RunCodeOptions::default(), &recorder)
        .await
        .unwrap();

    assert_eq!(execution.logs.stdout, vec!["hello\n"]);
    assert_eq!(execution.logs.stderr, vec!["careful\n"]);
    assert_eq!(execution.text(), Some("2"));
    assert_eq!(execution.results[0].formats(), vec!["png"]);
    assert_eq!(execution.execution_count, Some(3));
    assert!(execution.error.is_none());

    let stdout = recorder.stdout.lock().unwrap();
    assert_eq!(stdout[0].line, "hello\n");
    assert!(!stdout[0].error);
    assert!(stdout[0].timestamp > 0);
    assert!(recorder.stderr.lock().unwrap()[0].error);
    assert_eq!(*recorder.results.lock().unwrap(), 1);
}

#[tokio::test]
async fn raised_exception_is_reported_on_execution() {
    let server = MockServer::start().await;
    let body = ndjson(&[serde_json::json!({
        "type": "error",
        "name": "ZeroDivisionError",
        "value": "division by zero",
        "traceback": "Traceback (most recent call last): ..."
    })]);
    Mock::given(method("POST"))
        .and(path("/execute"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "application/x-ndjson"))
        .mount(&server)
        .await;

    let recorder = Recorder::default();
    let execution = interpreter(server.uri())
        .run_with("1 / 0", RunCodeOptions::default(), &recorder)
        .await
        .unwrap();

    assert_eq!(
        *recorder.errors.lock().unwrap(),
        vec!["ZeroDivisionError".to_string()]
    );
    let err: Error = execution.into_result().unwrap_err().into();
    assert_eq!(
        err.to_string(),
        "Execution failed: ZeroDivisionError: division by zero"
    );
}

#[tokio::test]
async fn language_and_env_are_sent() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/execute"))
        .and(body_partial_json(serde_json::json!({
            "language": "r",
            "env_vars": {"SEED": "42"}
        })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let execution = interpreter(server.uri())
        .run("x <- 1", RunCodeOptions::default().language("r").env("SEED", "42"))
        .await
        .unwrap();
    assert!(execution.results.is_empty());
}

#[tokio::test]
async fn context_id_is_sent() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/execute"))
        .and(body_partial_json(serde_json::json!({"context_id": "ctx-1"})))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let context = ExecutionContext {
        id: "ctx-1".into(),
        language: "python".into(),
        cwd: "/home/user".into(),
    };
    interpreter(server.uri())
        .run("x", RunCodeOptions::default().context(context))
        .await
        .unwrap();
}

#[tokio::test]
async fn context_with_language_is_rejected_before_sending() {
    let context = ExecutionContext {
        id: "ctx-1".into(),
        language: "python".into(),
        cwd: "/".into(),
    };
    let err = interpreter("http://127.0.0.1:9")
        .run(
            "x",
            RunCodeOptions::default().context(context).language("python"),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Config(_)));
}

#[tokio::test]
async fn non_success_status_is_api_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/execute"))
        .respond_with(
            ResponseTemplate::new(503).set_body_raw(r#"{"message":"kernel restarting"}"#, "application/json"),
        )
        .mount(&server)
        .await;

    let err = interpreter(server.uri())
        .run("1", RunCodeOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Api { status: 503, ref message, .. } if message == "kernel restarting"
    ));
}

/// Answer one request with a 500 whose body is cut short.
async fn truncated_error_server() -> String {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut request = Vec::new();
        let mut buf = [0u8; 1024];
        // Drain the whole request so closing the socket sends FIN, not RST.
        loop {
            let n = socket.read(&mut buf).await.unwrap();
            request.extend_from_slice(&buf[..n]);
            let text = String::from_utf8_lossy(&request);
            if let Some(head_end) = text.find("\r\n\r\n") {
                let length = text[..head_end]
                    .lines()
                    .find_map(|l| {
                        let (name, value) = l.split_once(':')?;
                        name.eq_ignore_ascii_case("content-length")
                            .then(|| value.trim().parse::<usize>().ok())
                            .flatten()
                    })
                    .unwrap_or(0);
                if request.len() >= head_end + 4 + length {
                    break;
                }
            }
            if n == 0 {
                break;
            }
        }
        socket
            .write_all(b"HTTP/1.1 500 Internal Server Error\r\ncontent-length: 64\r\n\r\n{\"message\":")
            .await
            .unwrap();
        socket.shutdown().await.unwrap();
    });
    format!("http://{addr}")
}

#[tokio::test]
async fn unreadable_error_body_is_kept_on_api_error() {
    let url = truncated_error_server().await;
    let err = interpreter(url)
        .run("1", RunCodeOptions::default())
        .await
        .unwrap_err();
    match err {
        Error::Api {
            status,
            message,
            body,
        } => {
            assert_eq!(status, 500);
            assert_eq!(message, "Request failed with status 500");
            assert!(body.starts_with("<unreadable body:"), "{body}");
        }
        other => panic!("expected Api error, got {other:?}"),
    }
}

#[tokio::test]
async fn slow_response_head_hits_request_timeout() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/execute"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
        .mount(&server)
        .await;

    let err = interpreter(server.uri())
        .run(
            "1",
            RunCodeOptions::default().request_timeout(Duration::from_millis(100)),
        )
        .await
        .unwrap_err();
    assert!(err.is_timeout());
    assert_eq!(err.to_string(), "Request timed out after 100ms");
}

#[tokio::test(start_paused = true)]
async fn stalled_body_hits_execution_deadline() {
    let mut execution = Execution::default();
    let stalled = tokio_stream::pending::<std::result::Result<Vec<u8>, reqwest::Error>>();
    let outcome = with_deadline(
        Duration::from_millis(50),
        read_events(stalled, &mut execution, &()),
    )
    .await;
    assert!(outcome.is_none());
}

#[tokio::test]
async fn lines_split_across_chunks_are_reassembled() {
    let chunks: Vec<std::result::Result<Vec<u8>, reqwest::Error>> = vec![
        Ok(br#"{"type":"stdout","te"#.to_vec()),
        Ok(b"xt\":\"a\"}\n{\"type\":\"number_of_".to_vec()),
        // The last line has no trailing newline.
        Ok(br#"executions","execution_count":1}"#.to_vec()),
    ];
    let mut execution = Execution::default();
    read_events(tokio_stream::iter(chunks), &mut execution, &())
        .await
        .unwrap();
    assert_eq!(execution.logs.stdout, vec!["a"]);
    assert_eq!(execution.execution_count, Some(1));
}

#[tokio::test]
async fn malformed_line_fails_the_run() {
    let chunks: Vec<std::result::Result<Vec<u8>, reqwest::Error>> = vec![Ok(b"not json\n".to_vec())];
    let mut execution = Execution::default();
    let err = read_events(tokio_stream::iter(chunks), &mut execution, &())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Core(_)));
}

#[tokio::test]
async fn create_context_posts_options() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/contexts"))
        .and(body_partial_json(serde_json::json!({"language": "python", "cwd": "/home/user"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": "ctx-9",
            "language": "python",
            "cwd": "/home/user"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let context = interpreter(server.uri())
        .create_context(CreateContextOptions {
            language: Some("python".into()),
            cwd: Some("/home/user".into()),
            request_timeout: None,
        })
        .await
        .unwrap();
    assert_eq!(context.id, "ctx-9");
}

#[test]
fn jupyter_url_uses_public_host() {
    let _ = rustls::crypto::ring::default_provider().install_default();
    let ci = CodeInterpreter::for_computer(
        reqwest::Client::new(),
        "metallic_code_interpreter",
        "vm1",
        "metallic.computer",
    );
    assert_eq!(
        ci.url(),
        "https://metallic-code-interpreter-vm1-49999.metallic.computer"
    );
}
