/// LambdaInvoker against a local stand-in for the invoke endpoint.
use std::{net::SocketAddr, time::Duration};

use meshbench::invoke::{
    BearerToken, InvocationRequest, InvokeError, Invoker, LambdaInvoker, Unsigned,
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpListener,
    task::JoinHandle,
};

/// What the stand-in saw of the one request it served.
#[derive(Debug)]
struct Seen {
    head: String,
    body: String,
}

impl Seen {
    fn header(&self, name: &str) -> Option<&str> {
        self.head.lines().find_map(|line| {
            let (key, value) = line.split_once(':')?;
            key.eq_ignore_ascii_case(name).then(|| value.trim())
        })
    }
}

/// Serves exactly one request with `status`, `extra_headers` and `body`.
async fn endpoint(
    status: &'static str,
    extra_headers: &'static str,
    body: &'static str,
) -> (SocketAddr, JoinHandle<Seen>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut raw = Vec::new();
        let mut chunk = [0u8; 4096];
        let head_end = loop {
            let n = stream.read(&mut chunk).await.unwrap();
            assert!(n > 0, "client closed early");
            raw.extend_from_slice(&chunk[..n]);
            if let Some(pos) = raw.windows(4).position(|w| w == b"\r\n\r\n") {
                break pos + 4;
            }
        };
        let head = String::from_utf8_lossy(&raw[..head_end]).into_owned();
        let length: usize = head
            .lines()
            .find_map(|line| {
                let (key, value) = line.split_once(':')?;
                key.eq_ignore_ascii_case("content-length")
                    .then(|| value.trim().parse().unwrap())
            })
            .unwrap_or(0);
        while raw.len() < head_end + length {
            let n = stream.read(&mut chunk).await.unwrap();
            raw.extend_from_slice(&chunk[..n]);
        }
        let request_body = String::from_utf8_lossy(&raw[head_end..head_end + length]).into_owned();

        let response = format!(
            "HTTP/1.1 {status}\r\nContent-Type: application/json\r\n{extra_headers}Content-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        );
        stream.write_all(response.as_bytes()).await.unwrap();
        stream.shutdown().await.unwrap();
        Seen {
            head,
            body: request_body,
        }
    });
    (addr, handle)
}

fn request() -> InvocationRequest {
    InvocationRequest {
        args: ["10.0.0.1", "9000", "2", "1", "5", "1", "x0", "x1", "0", "1"]
            .map(String::from)
            .to_vec(),
    }
}

fn invoker(addr: SocketAddr) -> LambdaInvoker {
    LambdaInvoker::new(
        &format!("http://{addr}"),
        "tempf",
        Duration::from_secs(5),
        Box::new(Unsigned),
    )
    .unwrap()
}

#[tokio::test]
async fn request_response_round_trip() {
    let (addr, seen) = endpoint(
        "200 OK",
        "",
        r#"{"retcode":0,"stdout":"1,1,10,20\n","stderr":"time=5000 total_bytes_sent=10 total_bytes_recv=20\n"}"#,
    )
    .await;
    let result = invoker(addr).invoke(request()).await.unwrap();
    assert_eq!(result.return_code, 0);
    assert_eq!(result.stdout, "1,1,10,20\n");

    let seen = seen.await.unwrap();
    assert!(
        seen.head
            .starts_with("POST /2015-03-31/functions/tempf/invocations HTTP/1.1"),
        "{}",
        seen.head
    );
    assert_eq!(seen.header("x-amz-invocation-type"), Some("RequestResponse"));
    assert_eq!(seen.header("x-amz-log-type"), Some("None"));
    assert_eq!(seen.header("authorization"), None);
    let body: serde_json::Value = serde_json::from_str(&seen.body).unwrap();
    assert_eq!(body["args"][0], "10.0.0.1");
    assert_eq!(body["args"].as_array().unwrap().len(), 10);
}

#[tokio::test]
async fn nonzero_return_code_is_a_result_not_an_error() {
    let (addr, _seen) = endpoint("200 OK", "", r#"{"retcode":1,"stdout":"","stderr":"x"}"#).await;
    let result = invoker(addr).invoke(request()).await.unwrap();
    assert!(!result.succeeded());
}

#[tokio::test]
async fn function_errors_are_reported() {
    let (addr, _seen) = endpoint(
        "200 OK",
        "X-Amz-Function-Error: Unhandled\r\n",
        r#"{"errorMessage":"Task timed out"}"#,
    )
    .await;
    match invoker(addr).invoke(request()).await {
        Err(InvokeError::Function { kind, body }) => {
            assert_eq!(kind, "Unhandled");
            assert!(body.contains("Task timed out"));
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn http_errors_carry_status_and_body() {
    let (addr, _seen) = endpoint("429 Too Many Requests", "", r#"{"Reason":"throttled"}"#).await;
    match invoker(addr).invoke(request()).await {
        Err(InvokeError::Status { code, body }) => {
            assert_eq!(code, 429);
            assert!(body.contains("throttled"));
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn undecodable_body_is_a_decode_error() {
    let (addr, _seen) = endpoint("200 OK", "", r#"{"stdout":"no retcode"}"#).await;
    let err = invoker(addr).invoke(request()).await.unwrap_err();
    assert!(matches!(err, InvokeError::Decode(_)));
}

#[tokio::test]
async fn bearer_token_is_passed_through() {
    let (addr, seen) = endpoint("200 OK", "", r#"{"retcode":0,"stdout":"","stderr":""}"#).await;
    let invoker = LambdaInvoker::new(
        &format!("http://{addr}/"),
        "tempf",
        Duration::from_secs(5),
        Box::new(BearerToken::new("opaque-credential").unwrap()),
    )
    .unwrap();
    invoker.invoke(request()).await.unwrap();
    let seen = seen.await.unwrap();
    assert_eq!(seen.header("authorization"), Some("Bearer opaque-credential"));
}

#[tokio::test]
async fn unreachable_endpoint_is_a_transport_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    let err = invoker(addr).invoke(request()).await.unwrap_err();
    assert!(matches!(err, InvokeError::Transport(_)));
}
