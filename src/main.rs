use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{error, info};

use chat_assistant::{
    agents::{ChatAgent, GenerationSettings, ProducerRegistry},
    config::Config,
    llm::LLM,
    queue::{QueueService, QueueSettings, TaskType},
    routes::create_router,
    search::InMemoryDocumentIndex,
    utils::init_logger,
    AppState,
};

/// Queued chat generation server
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Address to bind (overrides HOST)
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on (overrides PORT)
    #[arg(long)]
    port: Option<u16>,

    /// Number of queue workers (overrides QUEUE_WORKERS)
    #[arg(long)]
    workers: Option<usize>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut config = Config::from_env()?;
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(workers) = args.workers {
        config.queue.workers = workers;
    }

    // Initialize tracing; the guard flushes file output on exit
    let _log_guard = init_logger(&config.logging);
    info!(server = ?config.server, queue = ?config.queue, "Configuration loaded");

    let llm = LLM::from_config(&config.llm)
        .map_err(|e| anyhow::anyhow!("Failed to initialize LLM provider: {}", e))?;
    let documents = InMemoryDocumentIndex::new();
    if let Some(dir) = &config.search.documents_dir {
        documents
            .load_dir(dir)
            .with_context(|| format!("Failed to load documents from {}", dir.display()))?;
    }
    let documents = Arc::new(documents);
    let chat = ChatAgent::new(documents, Arc::new(llm), GenerationSettings::from_config(&config.llm));

    let producers = ProducerRegistry::new().register(TaskType::Chat, Arc::new(chat.clone()));
    let queue = QueueService::start(QueueSettings::from(&config.queue), producers);

    // Create shared state
    let state = AppState {
        config: config.clone(),
        queue: queue.clone(),
        chat,
    };

    // Create router
    let app = create_router(state);

    // Start server
    let host: std::net::IpAddr = config
        .server
        .host
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid host {}: {}", config.server.host, e))?;
    let addr = SocketAddr::from((host, config.server.port));
    info!("Server listening on {}", addr);

    let listener = TcpListener::bind(addr).await?;
    // Streams stay open until their job ends, so the queue is drained before axum
    // waits on connections
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(queue.clone()))
        .await;

    queue.shutdown().await;

    served.map_err(|e| {
        error!(error = %e, "Server error");
        anyhow::anyhow!("Server error: {}", e)
    })?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal(queue: QueueService) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
    queue.shutdown().await;
}
