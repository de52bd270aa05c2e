//! Tagged echo over TCP.
//!
//! Run the server, then the client, in two terminals:
//!
//! ```text
//! cargo run --example echo -- server 4600
//! cargo run --example echo -- client 4600
//! ```
//!
//! Set `TAGPORT_PROGRESS_MODE=1` to drive either side with the polling
//! progress strategy instead of the default blocking one.

use tagport::{
    Context, Endpoint, ProgressMode, TagResult, TokioProviders, WorkerConfig,
};

fn main() -> TagResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    let (role, port) = match args.as_slice() {
        [_, role, port] => (role.clone(), port.parse::<u16>().unwrap_or(4600)),
        _ => {
            eprintln!("usage: echo <server|client> <port>");
            std::process::exit(2);
        }
    };

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|error| tagport::TagError::InvalidArgument {
            message: format!("runtime: {error}"),
        })?;
    let local = tokio::task::LocalSet::new();

    let mode = ProgressMode::from_env();
    rt.block_on(local.run_until(async move {
        match role.as_str() {
            "server" => run_server(port, mode).await,
            "client" => run_client(port, mode).await,
            other => {
                eprintln!("unknown role: {other}");
                std::process::exit(2);
            }
        }
    }))
}

async fn serve(endpoint: Endpoint<TokioProviders>) -> TagResult<()> {
    loop {
        let mut len_buf = [0u8; 8];
        match endpoint.recv(&mut len_buf).await {
            Ok(()) => {}
            // Peer hung up between messages.
            Err(tagport::TagError::ConnectionClosed) => return Ok(()),
            Err(error) => return Err(error),
        }
        let len = u64::from_le_bytes(len_buf) as usize;

        let mut data = vec![0u8; len];
        endpoint.recv(&mut data).await?;
        tracing::info!(bytes = len, "echoing message");

        endpoint.send(&len_buf).await?;
        endpoint.send(&data).await?;
    }
}

async fn run_server(port: u16, mode: ProgressMode) -> TagResult<()> {
    let ctx = Context::tokio();
    let worker = ctx.create_worker(WorkerConfig::with_mode(mode));
    let listener = worker.create_listener(port, serve).await?;
    tracing::info!(addr = listener.local_addr(), ?mode, "echo server listening");

    // Serve until interrupted.
    std::future::pending::<()>().await;
    Ok(())
}

async fn run_client(port: u16, mode: ProgressMode) -> TagResult<()> {
    let ctx = Context::tokio();
    let worker = ctx.create_worker(WorkerConfig::with_mode(mode));
    let endpoint = worker
        .create_endpoint(&format!("127.0.0.1:{port}"))
        .await?;
    tracing::info!(
        peer = endpoint.peer_addr(),
        send_tag = endpoint.tag_pair().send,
        recv_tag = endpoint.tag_pair().recv,
        "connected"
    );

    for round in 0u64..5 {
        let message = format!("hello {round}");
        endpoint
            .send(&(message.len() as u64).to_le_bytes())
            .await?;
        endpoint.send(message.as_bytes()).await?;

        let mut len_buf = [0u8; 8];
        endpoint.recv(&mut len_buf).await?;
        let mut reply = vec![0u8; u64::from_le_bytes(len_buf) as usize];
        endpoint.recv(&mut reply).await?;
        tracing::info!(reply = %String::from_utf8_lossy(&reply), "echo received");
    }

    endpoint.close();
    worker.shutdown();
    Ok(())
}
