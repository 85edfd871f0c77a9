use env_logger;
use log::{error, info};
use tossbot::config::Config;
use tossbot::supervisor::Supervisor;
use tossbot::transport::{OutboundMessage, Transport};
use std::sync::Arc;

/// Placeholder transport used until a real secure-messaging client is
/// wired in; the transport's own connection lifecycle (stream worker,
/// reconnect backoff) is out of scope for this crate and lives
/// in whatever concrete `Transport` a deployment supplies. This one logs
/// outbound sends so the binary is runnable and observable standalone.
struct LoggingTransport;

#[async_trait::async_trait]
impl Transport for LoggingTransport {
    async fn send(&self, message: OutboundMessage) -> Result<(), tossbot::errors::Error> {
        match message {
            OutboundMessage::Text { conversation_id, body } => {
                info!("[{}] -> {}", conversation_id, body);
            }
            OutboundMessage::WalletSendCalls { conversation_id, payload } => {
                info!(
                    "[{}] -> wallet-send-calls to {}: {} call(s)",
                    conversation_id,
                    payload.calls.first().map(|c| c.to.as_str()).unwrap_or(""),
                    payload.calls.len()
                );
            }
            OutboundMessage::TransactionConfirmation { conversation_id, payload } => {
                info!("[{}] -> transaction-confirmation {}", conversation_id, payload.reference);
            }
        }
        Ok(())
    }
}

fn main() {
    dotenv::dotenv().ok();
    env_logger::init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {}", e);
            std::process::exit(1);
        }
    };

    info!(
        "starting toss bot on {} ({})",
        config.chain_id.network_name(),
        config.network_env
    );

    let sys = actix::System::new();

    actix::spawn(async move {
        let transport: Arc<dyn Transport> = Arc::new(LoggingTransport);
        let supervisor = match Supervisor::start(config, transport).await {
            Ok(supervisor) => supervisor,
            Err(e) => {
                error!("failed to start supervisor: {}", e);
                std::process::exit(1);
            }
        };
        info!("supervisor started; no messaging transport configured, idling");
        // A real deployment's messaging transport stream-worker calls
        // `supervisor.handle_inbound(msg)` per arriving message here; none
        // is wired into this binary - the transport is an external
        // collaborator specified only at the interface boundary. Keep
        // `supervisor` (and with it the watcher/engine actors it holds
        // addresses to) alive for the life of the process.
        std::future::pending::<()>().await;
        drop(supervisor);
    });

    sys.run().expect("actix system run loop failed");
}
