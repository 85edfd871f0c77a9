use crate::chain::ChainClient;
use crate::models::MonitoredWallet;
use actix::prelude::*;
use futures::future::BoxFuture;
use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// A transfer event the watcher hands to its callback, paired with the
/// monitored-wallet entry it matched.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionEvent {
    pub tx_hash: String,
    pub from: String,
    pub to: String,
    pub value: i64,
    pub block_number: u64,
}

const LOOKBACK_BLOCKS_ON_ADD: u64 = 100;

pub type TransactionCallback =
    Arc<dyn Fn(TransactionEvent, MonitoredWallet) -> BoxFuture<'static, ()> + Send + Sync>;

/// Polls an EVM JSON-RPC endpoint for stablecoin `Transfer` events
/// targeting any monitored address. Runs as an `actix::Actor`
/// so "start" and "stop" are ordinary actor lifecycle events, the same
/// `ctx.run_interval`-in-`started()` shape a periodic cron actor uses.
/// The monitored-wallet set is guarded by the actor's own
/// single-threaded mailbox; `AddWallet`/`RemoveWallet` messages are safe to
/// send while a poll tick is in flight because actix serializes message
/// handling with the interval callback on the same arbiter.
pub struct ChainWatcher {
    client: Arc<dyn ChainClient>,
    wallets: HashMap<String, MonitoredWallet>,
    callback: TransactionCallback,
    poll_interval: Duration,
}

impl ChainWatcher {
    pub fn new(
        client: Arc<dyn ChainClient>,
        callback: TransactionCallback,
        poll_interval: Duration,
    ) -> Self {
        ChainWatcher {
            client,
            wallets: HashMap::new(),
            callback,
            poll_interval,
        }
    }
}

impl Actor for ChainWatcher {
    type Context = Context<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        info!("starting chain watcher, poll interval {:?}", self.poll_interval);
        ctx.run_interval(self.poll_interval, |watcher: &mut ChainWatcher, ctx| {
            watcher.tick(ctx);
        });
    }

    fn stopping(&mut self, _ctx: &mut Self::Context) -> Running {
        info!("stopping chain watcher");
        Running::Stop
    }
}

impl ChainWatcher {
    fn tick(&mut self, ctx: &mut Context<Self>) {
        if self.wallets.is_empty() {
            return;
        }
        let client = self.client.clone();
        let wallets: Vec<MonitoredWallet> = self.wallets.values().cloned().collect();
        let callback = self.callback.clone();
        let fut = async move {
            let head = match client.current_block_number().await {
                Ok(head) => head,
                Err(e) => {
                    warn!("chain watcher: could not fetch head block: {}", e);
                    return vec![];
                }
            };
            let mut advanced = vec![];
            for wallet in wallets {
                let from_block = wallet.last_scanned_block + 1;
                if from_block > head {
                    continue;
                }
                match client.get_transfer_logs(&wallet.address, from_block, head).await {
                    Ok(logs) => {
                        for log in &logs {
                            let event = TransactionEvent {
                                tx_hash: log.tx_hash.clone(),
                                from: log.from.clone(),
                                to: log.to.clone(),
                                value: log.value,
                                block_number: log.block_number,
                            };
                            (callback)(event, wallet.clone()).await;
                        }
                        advanced.push((wallet.address.clone(), head));
                    }
                    Err(e) => {
                        warn!(
                            "chain watcher: scan failed for wallet {}, will retry range {}..{} next tick: {}",
                            wallet.address, from_block, head, e
                        );
                    }
                }
            }
            advanced
        };
        ctx.spawn(
            actix::fut::wrap_future(fut).map(|advanced, watcher: &mut ChainWatcher, _ctx| {
                for (address, head) in advanced {
                    if let Some(w) = watcher.wallets.get_mut(&address) {
                        w.last_scanned_block = head;
                    }
                }
            }),
        );
    }
}

#[derive(Message)]
#[rtype(result = "()")]
pub struct AddWallet {
    pub address: String,
    pub toss_id: String,
}

#[derive(Message)]
#[rtype(result = "()")]
pub struct RemoveWallet {
    pub address: String,
}

#[derive(Message)]
#[rtype(result = "Vec<MonitoredWallet>")]
pub struct ListMonitored;

/// Halts polling and returns promptly. `Stop` must complete within one
/// polling interval - stopping the actor cancels its `run_interval` timer
/// immediately rather
/// than waiting for the next tick).
#[derive(Message)]
#[rtype(result = "()")]
pub struct Stop;

impl Handler<Stop> for ChainWatcher {
    type Result = ();

    fn handle(&mut self, _msg: Stop, ctx: &mut Self::Context) -> Self::Result {
        ctx.stop();
    }
}

impl Handler<AddWallet> for ChainWatcher {
    type Result = ();

    fn handle(&mut self, msg: AddWallet, ctx: &mut Self::Context) -> Self::Result {
        let key = msg.address.to_lowercase();
        if self.wallets.contains_key(&key) {
            return;
        }
        let client = self.client.clone();
        let fut = async move { client.current_block_number().await };
        let address = msg.address.clone();
        let toss_id = msg.toss_id.clone();
        ctx.spawn(actix::fut::wrap_future(fut).map(
            move |head, watcher: &mut ChainWatcher, _ctx| match head {
                Ok(head) => {
                    let start = head.saturating_sub(LOOKBACK_BLOCKS_ON_ADD);
                    debug!(
                        "chain watcher: now monitoring {} (toss {}) from block {}",
                        address, toss_id, start
                    );
                    watcher.wallets.insert(
                        address.to_lowercase(),
                        MonitoredWallet {
                            address,
                            toss_id,
                            last_scanned_block: start,
                        },
                    );
                }
                Err(e) => error!("chain watcher: could not add wallet {}: {}", address, e),
            },
        ));
    }
}

impl Handler<RemoveWallet> for ChainWatcher {
    type Result = ();

    fn handle(&mut self, msg: RemoveWallet, _ctx: &mut Self::Context) -> Self::Result {
        self.wallets.remove(&msg.address.to_lowercase());
    }
}

impl Handler<ListMonitored> for ChainWatcher {
    type Result = Vec<MonitoredWallet>;

    fn handle(&mut self, _msg: ListMonitored, _ctx: &mut Self::Context) -> Self::Result {
        self.wallets.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{ChainTransaction, TransferLog, TxStatus};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct FakeChainClient {
        head: AtomicU64,
        logs: Mutex<Vec<TransferLog>>,
    }

    #[async_trait]
    impl ChainClient for FakeChainClient {
        async fn current_block_number(&self) -> Result<u64, crate::errors::Error> {
            Ok(self.head.load(Ordering::SeqCst))
        }

        async fn get_transfer_logs(
            &self,
            to_address: &str,
            from_block: u64,
            to_block: u64,
        ) -> Result<Vec<TransferLog>, crate::errors::Error> {
            let logs = self.logs.lock();
            Ok(logs
                .iter()
                .filter(|l| {
                    l.to.eq_ignore_ascii_case(to_address)
                        && l.block_number >= from_block
                        && l.block_number <= to_block
                })
                .cloned()
                .collect())
        }

        async fn get_transaction(
            &self,
            _tx_hash: &str,
        ) -> Result<ChainTransaction, crate::errors::Error> {
            Ok(ChainTransaction {
                status: TxStatus::Success,
                input_data: vec![],
                from: "0x0000000000000000000000000000000000b0b1".into(),
            })
        }
    }

    #[actix::test]
    async fn add_wallet_looks_back_up_to_100_blocks() {
        let client = Arc::new(FakeChainClient {
            head: AtomicU64::new(50),
            logs: Mutex::new(vec![]),
        });
        let callback: TransactionCallback = Arc::new(|_e, _w| Box::pin(async {}));
        let watcher = ChainWatcher::new(client, callback, Duration::from_secs(30)).start();
        watcher
            .send(AddWallet {
                address: "0xabc".into(),
                toss_id: "1".into(),
            })
            .await
            .unwrap();
        actix_rt::time::sleep(Duration::from_millis(10)).await;
        let monitored = watcher.send(ListMonitored).await.unwrap();
        assert_eq!(monitored.len(), 1);
        assert_eq!(monitored[0].last_scanned_block, 0);
    }

    #[actix::test]
    async fn add_wallet_looks_back_capped_at_100() {
        let client = Arc::new(FakeChainClient {
            head: AtomicU64::new(500),
            logs: Mutex::new(vec![]),
        });
        let callback: TransactionCallback = Arc::new(|_e, _w| Box::pin(async {}));
        let watcher = ChainWatcher::new(client, callback, Duration::from_secs(30)).start();
        watcher
            .send(AddWallet {
                address: "0xabc".into(),
                toss_id: "1".into(),
            })
            .await
            .unwrap();
        actix_rt::time::sleep(Duration::from_millis(10)).await;
        let monitored = watcher.send(ListMonitored).await.unwrap();
        assert_eq!(monitored[0].last_scanned_block, 400);
    }

    #[actix::test]
    async fn remove_wallet_forgets_checkpoint() {
        let client = Arc::new(FakeChainClient {
            head: AtomicU64::new(50),
            logs: Mutex::new(vec![]),
        });
        let callback: TransactionCallback = Arc::new(|_e, _w| Box::pin(async {}));
        let watcher = ChainWatcher::new(client, callback, Duration::from_secs(30)).start();
        watcher
            .send(AddWallet {
                address: "0xabc".into(),
                toss_id: "1".into(),
            })
            .await
            .unwrap();
        actix_rt::time::sleep(Duration::from_millis(10)).await;
        watcher
            .send(RemoveWallet {
                address: "0xABC".into(),
            })
            .await
            .unwrap();
        let monitored = watcher.send(ListMonitored).await.unwrap();
        assert!(monitored.is_empty());
    }
}
