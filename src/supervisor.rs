use crate::agent_front::AgentFront;
use crate::chain::{ChainClient, JsonRpcChainClient};
use crate::chain_watcher::ChainWatcher;
use crate::config::Config;
use crate::correlation::{CorrelationInput, CorrelationLayer};
use crate::errors::Error;
use crate::fsm::TossEngine;
use crate::store::{JsonFileStore, Store};
use crate::toss_parser::{NaiveTossParser, TossParser};
use crate::transport::{InboundMessage, Transport};
use crate::wallet_provider::{HttpWalletProvider, WalletProvider};
use actix::prelude::*;
use log::info;
use std::sync::Arc;
use std::time::Duration;

/// Wires `Store`, `WalletProvider`, `ChainWatcher`, `TossEngine` and
/// `AgentFront` together, the same flat app-state constructor shape used
/// to wire a database pool, wallet client and actor set at start-up. Owns the
/// handles the CLI binary needs to run the system and to shut it down
/// gracefully: stop accepting inbound, drain in-flight engine calls,
/// stop watcher, close transport.
pub struct Supervisor {
    pub store: Arc<dyn Store>,
    pub wallet_provider: Arc<dyn WalletProvider>,
    pub watcher: Addr<ChainWatcher>,
    pub engine: Addr<TossEngine>,
    pub front: Arc<AgentFront>,
}

impl Supervisor {
    pub async fn start(
        config: Config,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, Error> {
        let store: Arc<dyn Store> = Arc::new(JsonFileStore::open(
            &config.data_dir,
            config.chain_id.network_name(),
        )?);

        let wallet_provider: Arc<dyn WalletProvider> = Arc::new(HttpWalletProvider::new(
            &config.wallet_provider_url,
            &config.wallet_provider_key,
            &config.wallet_provider_secret,
            explorer_base(&config),
        ));

        let chain_client: Arc<dyn ChainClient> = Arc::new(JsonRpcChainClient::new(
            &config.rpc_url,
            &config.stablecoin_address,
        ));

        let correlation = Arc::new(CorrelationLayer::new(store.clone(), chain_client.clone()));

        // Reviewed once at start-up: any toss left `IN_PROGRESS` by a
        // prior crash is not retried automatically, only logged.
        for toss in TossEngine::tosses_needing_review(store.as_ref())? {
            log::warn!(
                "toss {} is IN_PROGRESS from a previous run; needs operator review before it can be closed again",
                toss.id
            );
        }

        let watcher_correlation = correlation.clone();
        let watcher_engine_slot: Arc<parking_lot::Mutex<Option<Addr<TossEngine>>>> =
            Arc::new(parking_lot::Mutex::new(None));
        let callback_engine_slot = watcher_engine_slot.clone();
        let callback: crate::chain_watcher::TransactionCallback = Arc::new(move |event, _wallet| {
            let correlation = watcher_correlation.clone();
            let engine_slot = callback_engine_slot.clone();
            Box::pin(async move {
                let outcome = match correlation
                    .correlate(CorrelationInput::FromWatcher(event))
                    .await
                {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        log::error!("watcher correlation failed: {}", e);
                        return;
                    }
                };
                if let crate::correlation::CorrelationOutcome::Resolved(payment) = outcome {
                    let engine = engine_slot.lock().clone();
                    if let Some(engine) = engine {
                        let result = engine
                            .send(crate::fsm::AddParticipant {
                                toss_id: payment.toss_id.clone(),
                                user: payment.sender.clone(),
                                option: payment.option.clone(),
                                paid: true,
                                address: payment.payer_address.clone(),
                            })
                            .await;
                        if let Err(e) = result {
                            log::error!("failed to deliver watcher payment to engine: {}", e);
                        }
                    }
                }
            })
        });

        let watcher = ChainWatcher::new(
            chain_client,
            callback,
            Duration::from_secs(config.watch_poll_interval_secs),
        )
        .start();

        let engine = TossEngine::new(store.clone(), wallet_provider.clone(), watcher.clone())?.start();
        *watcher_engine_slot.lock() = Some(engine.clone());

        let registered = TossEngine::register_existing_wallets(&store, &watcher).await?;
        info!("re-registered {} non-terminal toss wallet(s) with the chain watcher", registered);

        let parser: Arc<dyn TossParser> = Arc::new(NaiveTossParser);

        let front = Arc::new(AgentFront::new(
            config,
            engine.clone(),
            watcher.clone(),
            store.clone(),
            wallet_provider.clone(),
            parser,
            transport,
            correlation,
        ));

        Ok(Supervisor {
            store,
            wallet_provider,
            watcher,
            engine,
            front,
        })
    }

    pub async fn handle_inbound(&self, msg: InboundMessage) {
        if let Err(e) = self.front.handle_inbound(msg).await {
            log::error!("failed to handle inbound message: {}", e);
        }
    }

    /// Graceful shutdown: stop the watcher (must return within one
    /// polling interval) before the process exits. Draining in-flight
    /// engine calls and closing the transport are the caller's
    /// responsibility (the transport connection and inbound dispatch loop
    /// are out of scope here).
    pub async fn shutdown(&self) {
        if let Err(e) = self.watcher.send(crate::chain_watcher::Stop).await {
            log::warn!("chain watcher did not stop cleanly: {}", e);
        }
    }
}

fn explorer_base(config: &Config) -> &'static str {
    match config.chain_id {
        crate::config::ChainId::BaseSepolia => "https://sepolia.basescan.org",
        crate::config::ChainId::BaseMainnet => "https://basescan.org",
    }
}
