//! Wire-level tests: a real server on an ephemeral port and a raw client.

use std::path::PathBuf;
use std::time::Duration;

use serde_json::json;
use tabula_plugin::{PluginConfig, PluginServer};
use tabula_protocol::{
    read_message, write_message, CancellationToken, DiscoverRequest, DiscoverResponse, ErrorKind,
    ErrorPayload, Message, OpCode, PublishRecord, PublishRequest, PublishSummary, Schema,
};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;

fn pattern(name: &str) -> String {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("../../data")
        .canonicalize()
        .unwrap()
        .join(name)
        .display()
        .to_string()
}

async fn start() -> (u16, CancellationToken, JoinHandle<()>) {
    let cancel = CancellationToken::new();
    let server = PluginServer::bind(&PluginConfig::default(), cancel.clone())
        .await
        .unwrap();
    let port = server.local_port().unwrap();
    let handle = tokio::spawn(async move { server.run().await.unwrap() });
    (port, cancel, handle)
}

async fn connect(port: u16) -> TcpStream {
    TcpStream::connect(("127.0.0.1", port)).await.unwrap()
}

async fn call(stream: &mut TcpStream, msg: Message) -> Message {
    write_message(stream, &msg).await.unwrap();
    read_message(stream).await.unwrap().expect("reply frame")
}

async fn discover(stream: &mut TcpStream, call_id: u64, pattern: String) -> Vec<Schema> {
    let request = DiscoverRequest { pattern };
    let reply = call(stream, Message::json(OpCode::Discover, call_id, &request).unwrap()).await;
    assert_eq!(reply.opcode(), OpCode::Schemas, "{:?}", reply.decode::<serde_json::Value>());
    assert_eq!(reply.call_id(), call_id);
    reply.decode::<DiscoverResponse>().unwrap().schemas
}

/// Records plus the terminal frame of one publish call.
async fn publish(
    stream: &mut TcpStream,
    call_id: u64,
    request: &PublishRequest,
) -> (Vec<PublishRecord>, Message) {
    write_message(stream, &Message::json(OpCode::Publish, call_id, request).unwrap())
        .await
        .unwrap();
    let mut records = Vec::new();
    loop {
        let frame = read_message(stream).await.unwrap().expect("stream frame");
        assert_eq!(frame.call_id(), call_id);
        match frame.opcode() {
            OpCode::Record => records.push(frame.decode().unwrap()),
            _ => return (records, frame),
        }
    }
}

#[tokio::test]
async fn test_discover_then_publish_logs() {
    let (port, cancel, handle) = start().await;
    let mut stream = connect(port).await;

    let schemas = discover(&mut stream, 1, pattern("[al]*s.csv")).await;
    let names: Vec<_> = schemas.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["animals", "logs"]);

    let logs = schemas.into_iter().find(|s| s.name == "logs").unwrap();
    let request = PublishRequest {
        pattern: pattern("[al]*s.csv"),
        schema: logs,
        deadline_ms: Some(5_000),
    };

    let (first, end) = publish(&mut stream, 2, &request).await;
    assert_eq!(end.opcode(), OpCode::EndOfStream);
    assert_eq!(
        end.decode::<PublishSummary>().unwrap(),
        PublishSummary { records: 200, skipped_rows: 0 }
    );
    assert_eq!(first.len(), 200);
    assert_eq!(first[0].data[0], json!("2019-01-01T00:00:00.000Z"));
    assert_eq!(first[0].data[1], json!("spike"));
    assert!(first
        .iter()
        .any(|r| r.data[1] == json!("normal") && r.data[2] == json!(27.78092)));

    // Same files, same order
    let (second, _) = publish(&mut stream, 3, &request).await;
    assert_eq!(first, second);

    cancel.cancel();
    handle.await.unwrap();
}

#[tokio::test]
async fn test_publish_marks_invalid_rows() {
    let (port, cancel, handle) = start().await;
    let mut stream = connect(port).await;

    let animals = discover(&mut stream, 1, pattern("animals.csv")).await.remove(0);
    let request = PublishRequest {
        pattern: pattern("animals.csv"),
        schema: animals,
        deadline_ms: None,
    };
    let (records, end) = publish(&mut stream, 2, &request).await;
    assert_eq!(end.opcode(), OpCode::EndOfStream);
    assert_eq!(records.len(), 100);

    let blue = records
        .iter()
        .find(|r| r.data[1] == json!("Macropus fuliginosus"))
        .unwrap();
    assert!(blue.invalid);
    assert!(blue.data[2].is_null());
    assert!(blue.error.as_deref().unwrap().contains("column 2"));

    let spotted = records.iter().find(|r| r.data[0] == json!(83)).unwrap();
    assert_eq!(spotted.data[3], json!("1796-07-23T00:00:00.000Z"));

    cancel.cancel();
    handle.await.unwrap();
}

#[tokio::test]
async fn test_publish_without_settings_uses_pattern() {
    let (port, cancel, handle) = start().await;
    let mut stream = connect(port).await;

    let mut logs = discover(&mut stream, 1, pattern("logs*.csv")).await.remove(0);
    logs.settings.clear();
    let request = PublishRequest {
        pattern: pattern("*.csv"),
        schema: logs,
        deadline_ms: None,
    };
    let (records, end) = publish(&mut stream, 2, &request).await;
    assert_eq!(end.opcode(), OpCode::EndOfStream);
    assert_eq!(records.len(), 300);

    cancel.cancel();
    handle.await.unwrap();
}

#[tokio::test]
async fn test_expired_deadline_ends_with_error() {
    let (port, cancel, handle) = start().await;
    let mut stream = connect(port).await;

    let people = discover(&mut stream, 1, pattern("people.*.csv")).await.remove(0);
    let request = PublishRequest {
        pattern: pattern("people.*.csv"),
        schema: people,
        deadline_ms: Some(0),
    };
    let (records, end) = publish(&mut stream, 2, &request).await;
    assert!(records.is_empty());
    assert_eq!(end.opcode(), OpCode::Err);
    assert_eq!(
        end.decode::<ErrorPayload>().unwrap().kind,
        ErrorKind::DeadlineExceeded
    );

    // The connection stays usable after a failed call
    let again = discover(&mut stream, 3, pattern("garbage.csv")).await;
    assert_eq!(again[0].name, "garbage");

    cancel.cancel();
    handle.await.unwrap();
}

#[tokio::test]
async fn test_bad_requests_get_error_frames() {
    let (port, cancel, handle) = start().await;
    let mut stream = connect(port).await;

    let reply = call(
        &mut stream,
        Message::new(OpCode::Discover, 7, b"not json".to_vec()).unwrap(),
    )
    .await;
    assert_eq!(reply.opcode(), OpCode::Err);
    assert_eq!(reply.call_id(), 7);
    assert_eq!(reply.decode::<ErrorPayload>().unwrap().kind, ErrorKind::BadRequest);

    let reply = call(
        &mut stream,
        Message::json(OpCode::Record, 8, &json!({})).unwrap(),
    )
    .await;
    assert_eq!(reply.opcode(), OpCode::Err);

    let reply = call(
        &mut stream,
        Message::json(OpCode::Discover, 9, &DiscoverRequest { pattern: "[".into() }).unwrap(),
    )
    .await;
    assert_eq!(reply.decode::<ErrorPayload>().unwrap().kind, ErrorKind::BadRequest);

    cancel.cancel();
    handle.await.unwrap();
}

#[tokio::test]
async fn test_cancel_stops_server() {
    let (port, cancel, handle) = start().await;
    let mut stream = connect(port).await;
    discover(&mut stream, 1, pattern("garbage.csv")).await;

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("server stops after cancel")
        .unwrap();

    // Connection was closed by the server
    let next = tokio::time::timeout(Duration::from_secs(1), read_message(&mut stream))
        .await
        .expect("read completes");
    assert!(matches!(next, Ok(None) | Err(_)));
}

#[tokio::test]
async fn test_cancel_mid_publish_ends_with_cancelled_error() {
    // Large enough that the stream is still running when cancel lands
    let tmp = tempfile::tempdir().unwrap();
    let mut csv = String::from("id,label\n");
    for i in 0..200_000 {
        csv.push_str(&format!("{},row{}\n", i, i));
    }
    std::fs::write(tmp.path().join("big.csv"), csv).unwrap();
    let big = tmp.path().join("big.csv").display().to_string();

    let (port, cancel, handle) = start().await;
    let mut stream = connect(port).await;
    let schema = discover(&mut stream, 1, big.clone()).await.remove(0);
    let request = PublishRequest {
        pattern: big,
        schema,
        deadline_ms: None,
    };
    write_message(&mut stream, &Message::json(OpCode::Publish, 2, &request).unwrap())
        .await
        .unwrap();

    let first = read_message(&mut stream).await.unwrap().expect("first frame");
    assert_eq!(first.opcode(), OpCode::Record);
    cancel.cancel();

    let mut records = 1;
    let end = loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), read_message(&mut stream))
            .await
            .expect("stream terminates after cancel")
            .unwrap()
            .expect("a terminator before close");
        assert_eq!(frame.call_id(), 2);
        match frame.opcode() {
            OpCode::Record => records += 1,
            _ => break frame,
        }
    };
    assert_eq!(end.opcode(), OpCode::Err);
    assert_eq!(end.decode::<ErrorPayload>().unwrap().kind, ErrorKind::Cancelled);
    assert!(records < 200_000);

    handle.await.unwrap();
}
