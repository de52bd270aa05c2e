//! Scheduling behavior of the two progress driver strategies.

use tagport::{Context, ProgressMode, TagResult, WorkerConfig};

fn run<F: std::future::Future>(future: F) -> F::Output {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("runtime");
    let local = tokio::task::LocalSet::new();
    rt.block_on(local.run_until(future))
}

#[test]
fn test_blocking_driver_is_idle_without_work() {
    run(async {
        let ctx = Context::tokio();
        let worker = ctx.create_worker(WorkerConfig::with_mode(ProgressMode::Blocking));

        // Give the driver plenty of scheduler iterations to misbehave in.
        for _ in 0..50 {
            tokio::task::yield_now().await;
        }
        assert_eq!(worker.progress_calls(), 0);
        worker.shutdown();
    });
}

#[test]
fn test_polling_driver_runs_every_iteration() {
    run(async {
        let ctx = Context::tokio();
        let worker = ctx.create_worker(WorkerConfig::with_mode(ProgressMode::Polling));

        for _ in 0..50 {
            tokio::task::yield_now().await;
        }
        assert!(
            worker.progress_calls() >= 10,
            "polling driver only made {} progress calls",
            worker.progress_calls()
        );
        worker.shutdown();
    });
}

#[test]
fn test_blocking_driver_wakes_for_real_work() {
    run(async {
        let ctx = Context::tokio();
        let server = ctx.create_worker(WorkerConfig::with_mode(ProgressMode::Blocking));
        let client = ctx.create_worker(WorkerConfig::with_mode(ProgressMode::Blocking));

        let listener = server
            .create_listener(0, |endpoint| async move {
                let mut buf = [0u8; 4];
                endpoint.recv(&mut buf).await?;
                endpoint.send(&buf).await?;
                TagResult::Ok(())
            })
            .await
            .expect("create listener");

        let addr = format!("127.0.0.1:{}", listener.local_port());
        let endpoint = client.create_endpoint(&addr).await.expect("connect");

        endpoint.send(b"ping").await.expect("send");
        let mut reply = [0u8; 4];
        endpoint.recv(&mut reply).await.expect("recv");
        assert_eq!(&reply, b"ping");

        // Completions above prove the driver was woken; no manual
        // progress() calls were made.
        assert!(client.progress_calls() > 0);
        assert!(server.progress_calls() > 0);

        endpoint.close();
        listener.close();
    });
}

#[test]
fn test_manual_progress_is_allowed_alongside_driver() {
    run(async {
        let ctx = Context::tokio();
        let worker = ctx.create_worker(WorkerConfig::with_mode(ProgressMode::Blocking));

        // No work queued: manual calls are cheap no-ops and still count.
        assert_eq!(worker.progress(), 0);
        assert_eq!(worker.progress(), 0);
        assert_eq!(worker.progress_calls(), 2);
        worker.shutdown();
    });
}
