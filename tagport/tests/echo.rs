//! End-to-end echo exchanges over real TCP loopback sockets.
//!
//! The test protocol is length-prefixed: an 8-byte little-endian length,
//! then that many payload bytes. The server increments every payload byte
//! and echoes both messages back, so a successful roundtrip proves the
//! payload actually crossed the wire in both directions.

use std::collections::HashSet;

use tagport::{Context, Endpoint, ProgressMode, TagResult, TokioProviders, WorkerConfig};

fn run<F: std::future::Future>(future: F) -> F::Output {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("runtime");
    let local = tokio::task::LocalSet::new();
    rt.block_on(local.run_until(future))
}

async fn serve_echo(endpoint: Endpoint<TokioProviders>) -> TagResult<()> {
    let mut len_buf = [0u8; 8];
    endpoint.recv(&mut len_buf).await?;
    let len = u64::from_le_bytes(len_buf) as usize;

    let mut data = vec![0u8; len];
    if len > 0 {
        endpoint.recv(&mut data).await?;
    }
    for byte in &mut data {
        *byte = byte.wrapping_add(1);
    }

    endpoint.send(&len_buf).await?;
    if len > 0 {
        endpoint.send(&data).await?;
    }
    Ok(())
}

async fn exchange(endpoint: &Endpoint<TokioProviders>, payload_len: usize) -> TagResult<()> {
    let request: Vec<u8> = (0..payload_len).map(|i| (i % 251) as u8).collect();
    endpoint.send(&(payload_len as u64).to_le_bytes()).await?;
    if payload_len > 0 {
        endpoint.send(&request).await?;
    }

    let mut len_buf = [0u8; 8];
    endpoint.recv(&mut len_buf).await?;
    assert_eq!(u64::from_le_bytes(len_buf) as usize, payload_len);

    let mut reply = vec![0u8; payload_len];
    if payload_len > 0 {
        endpoint.recv(&mut reply).await?;
    }
    for (i, byte) in reply.iter().enumerate() {
        assert_eq!(*byte, ((i % 251) as u8).wrapping_add(1), "byte {i} mangled");
    }
    Ok(())
}

async fn echo_roundtrip(mode: ProgressMode, payload_len: usize) {
    let ctx = Context::tokio();
    let server = ctx.create_worker(WorkerConfig::with_mode(mode));
    let client = ctx.create_worker(WorkerConfig::with_mode(mode));

    let listener = server
        .create_listener(0, serve_echo)
        .await
        .expect("create listener");
    let addr = format!("127.0.0.1:{}", listener.local_port());

    let endpoint = client.create_endpoint(&addr).await.expect("connect");
    exchange(&endpoint, payload_len).await.expect("echo exchange");

    endpoint.close();
    listener.close();
    client.shutdown();
    server.shutdown();
}

#[test]
fn test_echo_empty_payload() {
    run(echo_roundtrip(ProgressMode::Blocking, 0));
}

#[test]
fn test_echo_small_payload_blocking() {
    run(echo_roundtrip(ProgressMode::Blocking, 64));
}

#[test]
fn test_echo_small_payload_polling() {
    run(echo_roundtrip(ProgressMode::Polling, 64));
}

#[test]
fn test_echo_page_sized_payload() {
    run(echo_roundtrip(ProgressMode::Blocking, 4096));
}

#[test]
fn test_echo_large_payload() {
    // Large enough to force multiple socket-level writes per frame.
    run(echo_roundtrip(ProgressMode::Blocking, 8 * 1024 * 1024));
}

#[test]
#[ignore = "gigabyte roundtrip; takes minutes and several GB of memory"]
fn test_echo_gigabyte_payload() {
    run(echo_roundtrip(ProgressMode::Blocking, 1_000_000_000));
}

#[test]
fn test_concurrent_endpoints_are_isolated() {
    run(async {
        let ctx = Context::tokio();
        let server = ctx.create_worker(WorkerConfig::default());
        let client = ctx.create_worker(WorkerConfig::default());

        let listener = server
            .create_listener(0, serve_echo)
            .await
            .expect("create listener");
        let addr = format!("127.0.0.1:{}", listener.local_port());

        let mut endpoints = Vec::new();
        for _ in 0..3 {
            endpoints.push(client.create_endpoint(&addr).await.expect("connect"));
        }

        // Every tag value across the open endpoints is distinct.
        let mut tags = HashSet::new();
        for endpoint in &endpoints {
            let pair = endpoint.tag_pair();
            assert!(tags.insert(pair.send), "send tag reused: {}", pair.send);
            assert!(tags.insert(pair.recv), "recv tag reused: {}", pair.recv);
        }
        assert_eq!(client.active_tag_count(), 6);

        // Drive all three conversations at once.
        let mut joins = Vec::new();
        for (i, endpoint) in endpoints.iter().enumerate() {
            let endpoint = endpoint.clone();
            joins.push(tokio::task::spawn_local(async move {
                exchange(&endpoint, 128 * (i + 1)).await
            }));
        }
        for join in joins {
            join.await.expect("join").expect("exchange");
        }

        for endpoint in &endpoints {
            endpoint.close();
        }
        assert_eq!(client.active_tag_count(), 0);
    });
}
