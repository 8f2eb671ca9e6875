//! Connections over the real HTTP transport against a local fake daemon

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::header::{HeaderValue, CONNECTION, UPGRADE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;

use gantry::directory::{InMemoryDirectory, WorkerRecord};
use gantry::transport::routes;
use gantry::worker::{ConstantBackoff, RetryPolicy};
use gantry::{ConnectionFactory, GantryError, HttpTransport, RequestSpec};

/// Minimal container daemon: ping, a file download, one failing endpoint,
/// and an echoing hijack
async fn daemon(mut req: Request<Incoming>) -> Result<Response<Full<Bytes>>, Infallible> {
    let path = req.uri().path().to_string();

    let response = match (req.method().clone(), path.as_str()) {
        (Method::GET, "/ping") => Response::new(Full::new(Bytes::from_static(b"{}"))),

        (Method::GET, "/containers/build-42/files") => {
            let mut response = Response::new(Full::new(Bytes::from_static(b"archive contents")));
            response
                .headers_mut()
                .insert("content-type", HeaderValue::from_static("application/x-tar"));
            response
        }

        (Method::GET, "/containers/bad/info") => {
            let mut response = Response::new(Full::new(Bytes::from_static(
                br#"{"Type":"","Message":"bad params"}"#,
            )));
            *response.status_mut() = StatusCode::UNPROCESSABLE_ENTITY;
            response
        }

        (Method::POST, p) if p.ends_with("/processes") && req.headers().contains_key(UPGRADE) => {
            let on_upgrade = hyper::upgrade::on(&mut req);
            tokio::spawn(async move {
                if let Ok(upgraded) = on_upgrade.await {
                    let (mut reader, mut writer) = tokio::io::split(TokioIo::new(upgraded));
                    let _ = tokio::io::copy(&mut reader, &mut writer).await;
                }
            });

            let mut response = Response::new(Full::new(Bytes::new()));
            *response.status_mut() = StatusCode::SWITCHING_PROTOCOLS;
            response
                .headers_mut()
                .insert(CONNECTION, HeaderValue::from_static("Upgrade"));
            response.headers_mut().insert(UPGRADE, HeaderValue::from_static("tcp"));
            response
        }

        _ => {
            let mut response = Response::new(Full::new(Bytes::from_static(
                br#"{"Type":"ContainerNotFoundError","Message":"unknown handle","Handle":"nope"}"#,
            )));
            *response.status_mut() = StatusCode::NOT_FOUND;
            response
        }
    };

    Ok(response)
}

/// Start a fake daemon; returns its address and a request counter
async fn spawn_daemon() -> (String, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    let hits = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&hits);
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            let counter = Arc::clone(&counter);
            tokio::spawn(async move {
                let service = service_fn(move |req| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    daemon(req)
                });
                let _ = http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), service)
                    .with_upgrades()
                    .await;
            });
        }
    });

    (address, hits)
}

async fn dead_address() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    drop(listener);
    address
}

fn factory(directory: Arc<InMemoryDirectory>, policy: RetryPolicy) -> ConnectionFactory {
    ConnectionFactory::new(directory, Arc::new(HttpTransport::new()), policy)
}

#[tokio::test]
async fn test_round_trip_through_directory() {
    let (address, hits) = spawn_daemon().await;
    let directory = Arc::new(InMemoryDirectory::new());
    directory.register(WorkerRecord::new("worker-a", address));

    let conn = factory(directory, RetryPolicy::default())
        .build_connection_from_directory("worker-a")
        .await
        .unwrap();

    conn.ping().await.unwrap();
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_backend_error_over_the_wire() {
    let (address, hits) = spawn_daemon().await;
    let conn = factory(Arc::new(InMemoryDirectory::new()), RetryPolicy::default()).build_connection(address);

    let spec = RequestSpec::new(routes::INFO).param("handle", "bad");
    let err = conn.request(&spec).await.unwrap_err();

    let backend = err.backend().expect("backend error");
    assert_eq!(backend.status, 422);
    assert_eq!(backend.message, "bad params");
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_worker_moves_between_sends() {
    let (first, first_hits) = spawn_daemon().await;
    let (second, second_hits) = spawn_daemon().await;
    let directory = Arc::new(InMemoryDirectory::new());
    directory.register(WorkerRecord::new("worker-a", first));

    let conn = factory(Arc::clone(&directory), RetryPolicy::default())
        .build_connection_from_directory("worker-a")
        .await
        .unwrap();

    conn.ping().await.unwrap();
    directory.set_address("worker-a", &second);
    conn.ping().await.unwrap();

    assert_eq!(first_hits.load(Ordering::SeqCst), 1);
    assert_eq!(second_hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_retry_picks_up_reregistered_worker() {
    let (live, hits) = spawn_daemon().await;
    let directory = Arc::new(InMemoryDirectory::new());
    directory.register(WorkerRecord::new("worker-a", dead_address().await));

    let policy = RetryPolicy::new(Duration::from_secs(5), ConstantBackoff(Duration::from_millis(100)));
    let conn = factory(Arc::clone(&directory), policy)
        .build_connection_from_directory("worker-a")
        .await
        .unwrap();

    let mover = Arc::clone(&directory);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(250)).await;
        mover.set_address("worker-a", &live);
    });

    conn.ping().await.unwrap();
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_unreachable_worker_times_out() {
    let directory = Arc::new(InMemoryDirectory::new());
    let policy = RetryPolicy::new(Duration::from_millis(300), ConstantBackoff(Duration::from_millis(100)));
    let conn = factory(directory, policy).build_connection(dead_address().await);

    let err = conn.ping().await.unwrap_err();
    match err {
        GantryError::Timeout { attempts, ref last, .. } => {
            assert!(attempts >= 2, "attempts = {}", attempts);
            assert!(last.is_retriable());
        }
        other => panic!("unexpected error: {}", other),
    }
}

#[tokio::test]
async fn test_hijack_echoes_raw_bytes() {
    let (address, _) = spawn_daemon().await;
    let directory = Arc::new(InMemoryDirectory::new());
    directory.register(WorkerRecord::new("worker-a", address.clone()));

    let conn = factory(directory, RetryPolicy::default())
        .build_connection_from_directory("worker-a")
        .await
        .unwrap();

    let spec = RequestSpec::new(routes::RUN).param("handle", "build-42");
    let mut stream = conn.hijack(&spec).await.unwrap();
    assert_eq!(stream.address(), address);

    stream.write_all(b"hello\n\x00\xff").await.unwrap();
    let mut buf = [0u8; 8];
    stream.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"hello\n\x00\xff");

    stream.close().await.unwrap();
    stream.close().await.unwrap();
    assert!(stream.is_closed());
}

#[tokio::test]
async fn test_hijack_refused_is_backend_error() {
    let (address, hits) = spawn_daemon().await;
    let conn = factory(Arc::new(InMemoryDirectory::new()), RetryPolicy::default()).build_connection(address);

    let spec = RequestSpec::new(routes::ATTACH).param("handle", "nope").param("pid", "1");
    let err = conn.hijack(&spec).await.unwrap_err();

    let backend = err.backend().expect("backend error");
    assert_eq!(backend.status, 404);
    assert_eq!(backend.kind, "ContainerNotFoundError");
    assert_eq!(backend.handle, "nope");
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_hijack_unreachable_is_not_retried() {
    let conn = factory(Arc::new(InMemoryDirectory::new()), RetryPolicy::default())
        .build_connection(dead_address().await);

    let spec = RequestSpec::new(routes::RUN).param("handle", "build-42");
    let err = conn.hijack(&spec).await.unwrap_err();
    assert!(matches!(err, GantryError::NetworkFailure { .. }));
}

/// Read a request head off a raw socket
async fn read_head(socket: &mut TcpStream) {
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        if socket.read(&mut byte).await.unwrap() == 0 {
            return;
        }
        head.push(byte[0]);
    }
}

#[tokio::test]
async fn test_stream_reads_file_body() {
    let (address, hits) = spawn_daemon().await;
    let conn = factory(Arc::new(InMemoryDirectory::new()), RetryPolicy::default()).build_connection(address);

    let spec = RequestSpec::new(routes::STREAM_OUT)
        .param("handle", "build-42")
        .query("source", "/tmp/out");
    let mut response = conn.stream(&spec).await.unwrap();
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.headers["content-type"], "application/x-tar");

    let mut body = Vec::new();
    response.body.read_to_end(&mut body).await.unwrap();
    assert_eq!(body, b"archive contents");
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_stream_rejection_is_backend_error() {
    let (address, hits) = spawn_daemon().await;
    let conn = factory(Arc::new(InMemoryDirectory::new()), RetryPolicy::default()).build_connection(address);

    let spec = RequestSpec::new(routes::STREAM_OUT).param("handle", "nope");
    let err = conn.stream(&spec).await.unwrap_err();

    let backend = err.backend().expect("backend error");
    assert_eq!(backend.status, 404);
    assert_eq!(backend.kind, "ContainerNotFoundError");
    assert_eq!(backend.handle, "nope");
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_stream_returns_before_body_completes() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    let (release, released) = oneshot::channel::<()>();

    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        read_head(&mut socket).await;
        socket
            .write_all(b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n")
            .await
            .unwrap();
        let _ = released.await;
        socket.write_all(b"6\r\n world\r\n0\r\n\r\n").await.unwrap();
    });

    let conn = factory(Arc::new(InMemoryDirectory::new()), RetryPolicy::default()).build_connection(address);
    let spec = RequestSpec::new(routes::STREAM_OUT).param("handle", "build-42");
    let mut response = conn.stream(&spec).await.unwrap();

    let mut first = [0u8; 5];
    response.body.read_exact(&mut first).await.unwrap();
    assert_eq!(&first, b"hello");

    release.send(()).unwrap();
    let mut rest = String::new();
    response.body.read_to_string(&mut rest).await.unwrap();
    assert_eq!(rest, " world");
}

#[tokio::test]
async fn test_truncated_rejection_is_not_retried() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    let accepts = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&accepts);
    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            counter.fetch_add(1, Ordering::SeqCst);
            read_head(&mut socket).await;
            // Promise 100 bytes, send a few, hang up
            let _ = socket
                .write_all(b"HTTP/1.1 500 Internal Server Error\r\nContent-Length: 100\r\n\r\n{\"Message\"")
                .await;
        }
    });

    let policy = RetryPolicy::new(Duration::from_secs(2), ConstantBackoff(Duration::from_millis(100)));
    let conn = factory(Arc::new(InMemoryDirectory::new()), policy).build_connection(address);

    let err = conn.ping().await.unwrap_err();
    let backend = err.backend().expect("backend error");
    assert_eq!(backend.status, 500);
    assert!(backend.message.starts_with("bad response"), "message = {}", backend.message);
    assert_eq!(accepts.load(Ordering::SeqCst), 1);
}
