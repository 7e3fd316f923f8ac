use std::io::Write;
use std::time::Duration;

use assert_matches::assert_matches;
use futures::StreamExt;
use inspect_client::api::{ApiError, InspectApi};
use inspect_client::messages::LogLine;
use inspect_client::streamer::{
    subscribe_logs, subscribe_progress, LatestProgress, LogBuffer, StreamError,
};

fn sse(frames: &[&str]) -> String {
    frames
        .iter()
        .map(|frame| format!("data: {frame}\n\n"))
        .collect()
}

async fn serve(server: &mut mockito::ServerGuard, path: &str, body: String) -> mockito::Mock {
    server
        .mock("GET", path)
        .match_header("accept", "text/event-stream")
        .with_status(200)
        .with_header("content-type", "text/event-stream")
        .with_body(body)
        .create_async()
        .await
}

#[tokio::test]
async fn log_lines_skip_malformed_frames_and_stop_at_done() {
    let mut server = mockito::Server::new_async().await;
    let mock = serve(
        &mut server,
        "/api/jobs/j1/logs",
        sse(&[r#"{"text":"x"}"#, "not json", r#"{"text":"y"}"#, "DONE", r#"{"text":"z"}"#]),
    )
    .await;

    let api = InspectApi::new(server.url());
    let outcome = subscribe_logs(&api, "j1", 8).drain().await;

    assert!(outcome.error.is_none());
    assert_eq!(
        outcome.items,
        vec![LogLine("x".into()), LogLine("y".into())]
    );
    mock.assert_async().await;
}

#[tokio::test]
async fn completed_marker_ends_stream() {
    let mut server = mockito::Server::new_async().await;
    serve(
        &mut server,
        "/api/jobs/j1/logs",
        sse(&[
            r#"{"text":"epoch 1"}"#,
            r#"{"text":"Training COMPLETED"}"#,
            r#"{"text":"after"}"#,
        ]),
    )
    .await;

    let api = InspectApi::new(server.url());
    let mut buffer = LogBuffer::default();
    let mut stream = subscribe_logs(&api, "j1", 8);
    while let Some(item) = stream.next().await {
        buffer.push(item.unwrap());
    }

    assert_eq!(buffer.lines(), ["epoch 1".to_string()]);
    assert!(stream.next().await.is_none());
}

#[tokio::test]
async fn missing_sentinel_is_a_failure() {
    let mut server = mockito::Server::new_async().await;
    serve(
        &mut server,
        "/api/jobs/j1/logs",
        sse(&[r#"{"text":"x"}"#]),
    )
    .await;

    let api = InspectApi::new(server.url());
    let outcome = subscribe_logs(&api, "j1", 8).drain().await;

    assert_eq!(outcome.items, vec![LogLine("x".into())]);
    assert_matches!(outcome.error, Some(StreamError::Disconnected { kind: "logs", .. }));
}

#[tokio::test]
async fn non_success_status_fails_the_stream() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/api/jobs/missing/logs")
        .with_status(404)
        .with_body(r#"{"detail":"Job not found"}"#)
        .create_async()
        .await;

    let api = InspectApi::new(server.url());
    let outcome = subscribe_logs(&api, "missing", 8).drain().await;

    assert!(outcome.items.is_empty());
    assert_matches!(
        outcome.error,
        Some(StreamError::Open {
            source: ApiError::Status { status: 404, .. },
            ..
        })
    );
}

#[tokio::test]
async fn progress_consumer_keeps_latest_record() {
    let mut server = mockito::Server::new_async().await;
    serve(
        &mut server,
        "/api/jobs/j1/progress",
        sse(&[
            r#"{"progress":10.0,"stage":"fit"}"#,
            r#"{"progress":55.5,"stage":"validation"}"#,
            "DONE",
        ]),
    )
    .await;

    let api = InspectApi::new(server.url());
    let mut latest = LatestProgress::default();
    let mut stream = subscribe_progress(&api, "j1", 1);
    while let Some(item) = stream.next().await {
        latest.apply(item.unwrap());
    }

    let record = latest.get().unwrap();
    assert_eq!(record.progress, 55.5);
    assert_eq!(record.stage, "validation");
}

#[tokio::test]
async fn close_ends_an_open_stream() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/api/jobs/j1/logs")
        .with_status(200)
        .with_header("content-type", "text/event-stream")
        .with_chunked_body(|w| {
            w.write_all(b"data: {\"text\":\"a\"}\n\n")?;
            w.flush()?;
            // Keep the connection open without sending more frames.
            std::thread::sleep(Duration::from_secs(5));
            Ok(())
        })
        .create_async()
        .await;

    let api = InspectApi::new(server.url());
    let mut stream = subscribe_logs(&api, "j1", 8);

    assert_eq!(stream.next().await.unwrap().unwrap(), LogLine("a".into()));

    stream.close();
    let ended = tokio::time::timeout(Duration::from_secs(1), stream.next()).await;
    assert_matches!(ended, Ok(None));
}
