use crate::blocking;
use crate::chain_watcher::{AddWallet, ChainWatcher, RemoveWallet};
use crate::errors::Error;
use crate::models::{
    FailedTransfer, ParticipantPick, Participants, Stake, Toss, TossResult, TossStatus,
    WalletRecord,
};
use crate::store::Store;
use crate::toss_parser::ParsedToss;
use crate::wallet_provider::WalletProvider;
use actix::prelude::*;
use log::{info, warn};
use parking_lot::Mutex as SyncMutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex as AsyncMutex;

/// Emitted by the engine on every committed state transition. `AgentFront`
/// subscribes to this instead of the engine holding a back-pointer to the
/// transport; the engine emits events instead of calling out directly.
#[derive(Debug, Clone)]
pub enum TossEvent {
    Created(Toss),
    ParticipantAdded(Toss),
    Closed(Toss),
    ForceClosed(Toss),
}

pub type TossEventHook = Arc<dyn Fn(TossEvent) + Send + Sync>;

/// The per-group toss state machine. Runs as an `actix::Actor`: callers
/// talk to it exclusively through typed `Message`s, never through a
/// shared `&mut` reference, so
/// the single mailbox gives every handler first-writer-wins ordering for
/// free. Per-toss locking on top of that mailbox - a map of mutexes,
/// where creating a new id holds a short global mutex only to allocate
/// the id - exists so a slow `Close` payout loop doesn't stall
/// unrelated tosses' `AddParticipant` calls, which would happen if the
/// whole actor blocked on one in-flight handler.
pub struct TossEngine {
    store: Arc<dyn Store>,
    wallet_provider: Arc<dyn WalletProvider>,
    watcher: Addr<ChainWatcher>,
    next_id: SyncMutex<u64>,
    locks: SyncMutex<HashMap<String, Arc<AsyncMutex<()>>>>,
    event_hook: SyncMutex<Option<TossEventHook>>,
}

impl Actor for TossEngine {
    type Context = Context<Self>;

    fn started(&mut self, _ctx: &mut Self::Context) {
        info!("toss engine started");
    }
}

impl TossEngine {
    pub fn new(
        store: Arc<dyn Store>,
        wallet_provider: Arc<dyn WalletProvider>,
        watcher: Addr<ChainWatcher>,
    ) -> Result<Self, Error> {
        let max_existing = store
            .list_tosses()?
            .iter()
            .filter_map(|t| t.id.parse::<u64>().ok())
            .max()
            .unwrap_or(0);
        Ok(TossEngine {
            store,
            wallet_provider,
            watcher,
            next_id: SyncMutex::new(max_existing + 1),
            locks: SyncMutex::new(HashMap::new()),
            event_hook: SyncMutex::new(None),
        })
    }

    pub fn set_event_hook(&self, hook: TossEventHook) {
        *self.event_hook.lock() = Some(hook);
    }

    fn emit(&self, event: TossEvent) {
        if let Some(hook) = self.event_hook.lock().as_ref() {
            hook(event);
        }
    }

    fn allocate_id(&self) -> String {
        let mut next = self.next_id.lock();
        let id = *next;
        *next += 1;
        id.to_string()
    }

    fn lock_for(&self, toss_id: &str) -> Arc<AsyncMutex<()>> {
        self.locks
            .lock()
            .entry(toss_id.to_owned())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Tosses a crash or restart left in `IN_PROGRESS` must not be
    /// automatically retried (the provider call may already have
    /// succeeded) and should instead surface for operator review.
    pub fn tosses_needing_review(store: &dyn Store) -> Result<Vec<Toss>, Error> {
        Ok(store
            .list_tosses()?
            .into_iter()
            .filter(|t| t.status == TossStatus::InProgress)
            .collect())
    }

    /// Re-registers every non-terminal toss's escrow wallet with the
    /// watcher at start-up: a wallet is in the watcher's monitored set
    /// iff its toss is non-terminal. Called once during supervisor wiring,
    /// before the engine actor itself needs to be running.
    pub async fn register_existing_wallets(
        store: &Arc<dyn Store>,
        watcher: &Addr<ChainWatcher>,
    ) -> Result<usize, Error> {
        let tosses = {
            let store = store.clone();
            blocking::run(move || store.list_tosses()).await?
        };
        let mut registered = 0;
        for toss in tosses {
            if toss.status.is_terminal() {
                continue;
            }
            watcher
                .send(AddWallet {
                    address: toss.wallet_address.clone(),
                    toss_id: toss.id.clone(),
                })
                .await
                .map_err(Error::from)?;
            registered += 1;
        }
        Ok(registered)
    }
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

fn is_evm_address(s: &str) -> bool {
    s.len() == 42 && s.starts_with("0x") && s[2..].chars().all(|c| c.is_ascii_hexdigit())
}

async fn load_toss(store: &Arc<dyn Store>, id: &str) -> Result<Toss, Error> {
    let store = store.clone();
    let id = id.to_owned();
    blocking::run(move || store.get_toss(&id)?.ok_or_else(|| Error::NotFound(id.clone()))).await
}

async fn persist(store: &Arc<dyn Store>, toss: &Toss) -> Result<(), Error> {
    let store = store.clone();
    let toss = toss.clone();
    blocking::run(move || store.put_toss(&toss)).await
}

async fn find_active_for_conv(store: &Arc<dyn Store>, conv: &str) -> Result<Option<Toss>, Error> {
    let store = store.clone();
    let conv = conv.to_owned();
    blocking::run(move || {
        Ok(store
            .list_tosses()?
            .into_iter()
            .find(|t| t.conversation_id.as_deref() == Some(conv.as_str()) && !t.status.is_terminal()))
    })
    .await
}

/// Resolves a participant identity to a payable on-chain address: if the
/// identity already looks like an address (the correlation layer hands the
/// watcher path's `from` address straight through as `senderUser`), use it
/// directly; otherwise fall back to a registered wallet record for that
/// user id. This mapping isn't pinned down elsewhere (only the
/// escrow-wallet mapping is) — the decision is recorded in DESIGN.md.
async fn resolve_payout_address(store: &Arc<dyn Store>, user_id: &str) -> Option<String> {
    if is_evm_address(user_id) {
        return Some(user_id.to_owned());
    }
    let store = store.clone();
    let user_id = user_id.to_owned();
    blocking::run(move || Ok(store.get_wallet(&user_id)?.map(|w| w.address)))
        .await
        .ok()
        .flatten()
}

// --- Messages -------------------------------------------------------------

#[derive(Debug, Message)]
#[rtype(result = "Result<Toss, Error>")]
pub struct Create {
    pub creator: String,
    pub parsed: ParsedToss,
    pub conversation_id: Option<String>,
}

#[derive(Debug, Message)]
#[rtype(result = "Result<Toss, Error>")]
pub struct AddParticipant {
    pub toss_id: String,
    pub user: String,
    pub option: String,
    pub paid: bool,
    /// The address that signed and paid the verified transaction joining
    /// this toss. Recorded as a wallet record for `user` so a later
    /// `Close`/`ForceClose` payout has somewhere to send winnings: the
    /// chat identity in `user` is not itself guaranteed to be payable.
    pub address: String,
}

#[derive(Debug, Message)]
#[rtype(result = "Result<Toss, Error>")]
pub struct Close {
    pub toss_id: String,
    pub caller: String,
    pub winning_option: String,
}

#[derive(Debug, Message)]
#[rtype(result = "Result<Toss, Error>")]
pub struct ForceClose {
    pub toss_id: String,
    pub caller: String,
}

#[derive(Debug, Message)]
#[rtype(result = "Result<String, Error>")]
pub struct Refresh {
    pub toss_id: String,
}

#[derive(Debug, Message)]
#[rtype(result = "Result<Toss, Error>")]
pub struct Status {
    pub toss_id: String,
}

#[derive(Debug, Message)]
#[rtype(result = "Result<Option<Toss>, Error>")]
pub struct GetActiveForConv {
    pub conversation_id: String,
}

#[derive(Debug, Message)]
#[rtype(result = "Result<Option<Toss>, Error>")]
pub struct GetByAddress {
    pub address: String,
}

// --- Handlers --------------------------------------------------------------

impl Handler<Create> for TossEngine {
    type Result = ResponseFuture<Result<Toss, Error>>;

    fn handle(&mut self, msg: Create, _ctx: &mut Self::Context) -> Self::Result {
        let store = self.store.clone();
        let wallet_provider = self.wallet_provider.clone();
        let watcher = self.watcher.clone();
        let id = self.allocate_id();
        let event_hook = self.event_hook.lock().clone();

        Box::pin(async move {
            let stake = Stake::from_stablecoin(msg.parsed.stake_stablecoin);
            if !stake.is_within_bounds() {
                return Err(Error::AmountTooLarge(stake.to_string()));
            }
            if let Some(conv) = &msg.conversation_id {
                if let Some(existing) = find_active_for_conv(&store, conv).await? {
                    return Err(Error::ActiveTossExists(existing.id));
                }
            }

            let wallet = wallet_provider.create(&id).await?;

            let toss = Toss {
                id: id.clone(),
                creator: msg.creator,
                conversation_id: msg.conversation_id,
                stake,
                topic: msg.parsed.topic,
                options: msg.parsed.options,
                wallet_address: wallet.address.clone(),
                created_at: now_ms(),
                status: TossStatus::Created,
                participants: Participants::default(),
                participant_options: vec![],
                result: None,
                payment_success: false,
                tx_hash: None,
                tx_link: None,
                failed_winners: vec![],
                failed_refunds: vec![],
            };

            {
                let store = store.clone();
                let wallet = wallet.clone();
                let toss = toss.clone();
                blocking::run(move || {
                    store.put_wallet(&wallet)?;
                    store.put_toss(&toss)
                })
                .await?;
            }

            watcher
                .send(AddWallet {
                    address: toss.wallet_address.clone(),
                    toss_id: toss.id.clone(),
                })
                .await
                .map_err(Error::from)?;

            if let Some(hook) = event_hook {
                hook(TossEvent::Created(toss.clone()));
            }
            Ok(toss)
        })
    }
}

impl Handler<AddParticipant> for TossEngine {
    type Result = ResponseFuture<Result<Toss, Error>>;

    fn handle(&mut self, msg: AddParticipant, _ctx: &mut Self::Context) -> Self::Result {
        let store = self.store.clone();
        let lock = self.lock_for(&msg.toss_id);
        let event_hook = self.event_hook.lock().clone();

        Box::pin(async move {
            let _guard = lock.lock().await;
            let mut toss = load_toss(&store, &msg.toss_id).await?;

            if toss.status.is_terminal() || toss.status == TossStatus::InProgress {
                return Err(Error::BadState(toss.id));
            }
            if !msg.paid {
                return Err(Error::Unpaid);
            }
            if toss.is_participant(&msg.user) {
                return Err(Error::DuplicateParticipant(msg.user));
            }
            let idx = toss
                .option_index(&msg.option)
                .ok_or_else(|| Error::InvalidOption(msg.option.clone()))?;
            let canonical_option = toss.options[idx].clone();

            toss.participants.0.push(msg.user.clone());
            toss.participant_options.push(ParticipantPick {
                user_id: msg.user.clone(),
                option: Some(canonical_option),
            });
            toss.status = TossStatus::WaitingForPlayer;
            persist(&store, &toss).await?;

            {
                let store = store.clone();
                let wallet = WalletRecord {
                    user_id: msg.user,
                    address: msg.address,
                    provider_blob: String::new(),
                };
                blocking::run(move || store.put_wallet(&wallet)).await?;
            }

            if let Some(hook) = event_hook {
                hook(TossEvent::ParticipantAdded(toss.clone()));
            }
            Ok(toss)
        })
    }
}

/// Shared by `Close` and `ForceClose`: pays `amount` to every entry in
/// `recipients`, returning the first successful `{hash, link}` plus the
/// list of recipients whose transfer could not be completed. Transfer
/// failures are partial-success: the toss still completes.
async fn disburse(
    store: &Arc<dyn Store>,
    wallet_provider: &Arc<dyn WalletProvider>,
    toss_id: &str,
    recipients: &[String],
    amount: Stake,
) -> (Option<crate::wallet_provider::TransferReceipt>, Vec<FailedTransfer>) {
    let mut first_receipt = None;
    let mut failed = Vec::new();
    for recipient in recipients {
        match resolve_payout_address(store, recipient).await {
            Some(address) => match wallet_provider.transfer(toss_id, &address, amount).await {
                Ok(receipt) => {
                    if first_receipt.is_none() {
                        first_receipt = Some(receipt);
                    }
                }
                Err(e) => {
                    warn!("transfer to {} failed for toss {}: {}", recipient, toss_id, e);
                    failed.push(FailedTransfer {
                        user_id: recipient.clone(),
                        reason: e.to_string(),
                    });
                }
            },
            None => failed.push(FailedTransfer {
                user_id: recipient.clone(),
                reason: "no payout address on file".to_owned(),
            }),
        }
    }
    (first_receipt, failed)
}

impl Handler<Close> for TossEngine {
    type Result = ResponseFuture<Result<Toss, Error>>;

    fn handle(&mut self, msg: Close, _ctx: &mut Self::Context) -> Self::Result {
        let store = self.store.clone();
        let wallet_provider = self.wallet_provider.clone();
        let watcher = self.watcher.clone();
        let lock = self.lock_for(&msg.toss_id);
        let event_hook = self.event_hook.lock().clone();

        Box::pin(async move {
            let _guard = lock.lock().await;
            let mut toss = load_toss(&store, &msg.toss_id).await?;

            if msg.caller != toss.creator {
                return Err(Error::NotCreator);
            }
            if toss.status != TossStatus::WaitingForPlayer {
                return Err(Error::BadState(toss.id));
            }
            if toss.participants.0.len() < 2 {
                return Err(Error::NotEnoughPlayers);
            }
            let winning_idx = toss
                .option_index(&msg.winning_option)
                .ok_or_else(|| Error::InvalidOption(msg.winning_option.clone()))?;
            let winning_option = toss.options[winning_idx].clone();

            toss.status = TossStatus::InProgress;
            persist(&store, &toss).await?;

            let winners = toss.winners(&winning_option);
            if winners.is_empty() {
                toss.status = TossStatus::Completed;
                toss.result = Some(TossResult::Option(winning_option));
                toss.payment_success = true;
                persist(&store, &toss).await?;
                let _ = watcher
                    .send(RemoveWallet {
                        address: toss.wallet_address.clone(),
                    })
                    .await;
                if let Some(hook) = event_hook {
                    hook(TossEvent::Closed(toss.clone()));
                }
                return Ok(toss);
            }

            let total_pot = toss.total_pot();
            let prize = total_pot.checked_div(winners.len()).unwrap_or(Stake(0));
            let (receipt, failed) =
                disburse(&store, &wallet_provider, &toss.id, &winners, prize).await;

            toss.status = TossStatus::Completed;
            toss.result = Some(TossResult::Option(winning_option));
            toss.payment_success = failed.len() < winners.len();
            if let Some(receipt) = receipt {
                toss.tx_hash = Some(receipt.hash);
                toss.tx_link = Some(receipt.link);
            }
            toss.failed_winners = failed;
            persist(&store, &toss).await?;

            let _ = watcher
                .send(RemoveWallet {
                    address: toss.wallet_address.clone(),
                })
                .await;
            if let Some(hook) = event_hook {
                hook(TossEvent::Closed(toss.clone()));
            }
            Ok(toss)
        })
    }
}

impl Handler<ForceClose> for TossEngine {
    type Result = ResponseFuture<Result<Toss, Error>>;

    fn handle(&mut self, msg: ForceClose, _ctx: &mut Self::Context) -> Self::Result {
        let store = self.store.clone();
        let wallet_provider = self.wallet_provider.clone();
        let watcher = self.watcher.clone();
        let lock = self.lock_for(&msg.toss_id);
        let event_hook = self.event_hook.lock().clone();

        Box::pin(async move {
            let _guard = lock.lock().await;
            let mut toss = load_toss(&store, &msg.toss_id).await?;

            if msg.caller != toss.creator {
                return Err(Error::NotCreator);
            }
            if toss.status.is_terminal() {
                return Err(Error::BadState(toss.id));
            }

            if toss.participants.0.is_empty() {
                toss.status = TossStatus::Cancelled;
                toss.result = Some(TossResult::ForceClosed);
                toss.payment_success = true;
                persist(&store, &toss).await?;
                let _ = watcher
                    .send(RemoveWallet {
                        address: toss.wallet_address.clone(),
                    })
                    .await;
                if let Some(hook) = event_hook {
                    hook(TossEvent::ForceClosed(toss.clone()));
                }
                return Ok(toss);
            }

            toss.status = TossStatus::InProgress;
            persist(&store, &toss).await?;

            let recipients = toss.participants.0.clone();
            let (receipt, failed) =
                disburse(&store, &wallet_provider, &toss.id, &recipients, toss.stake).await;

            toss.status = TossStatus::Cancelled;
            toss.result = Some(TossResult::ForceClosed);
            toss.payment_success = failed.len() < recipients.len();
            if let Some(receipt) = receipt {
                toss.tx_hash = Some(receipt.hash);
                toss.tx_link = Some(receipt.link);
            }
            toss.failed_refunds = failed;
            persist(&store, &toss).await?;

            let _ = watcher
                .send(RemoveWallet {
                    address: toss.wallet_address.clone(),
                })
                .await;
            if let Some(hook) = event_hook {
                hook(TossEvent::ForceClosed(toss.clone()));
            }
            Ok(toss)
        })
    }
}

impl Handler<Refresh> for TossEngine {
    type Result = ResponseFuture<Result<String, Error>>;

    fn handle(&mut self, msg: Refresh, _ctx: &mut Self::Context) -> Self::Result {
        let store = self.store.clone();
        let wallet_provider = self.wallet_provider.clone();
        let lock = self.lock_for(&msg.toss_id);

        Box::pin(async move {
            let _guard = lock.lock().await;
            let mut toss = load_toss(&store, &msg.toss_id).await?;

            if toss.status.is_terminal() {
                return Ok(format!("toss {} is already {}", toss.id, toss.status));
            }

            let balance = wallet_provider.balance(&toss.id).await?;
            let expected = toss.total_pot();
            let mut added = 0usize;

            if balance.minor_units() > expected.minor_units() && toss.stake.minor_units() > 0 {
                let surplus = balance.minor_units() - expected.minor_units();
                let unrecorded = (surplus / toss.stake.minor_units()) as usize;
                for _ in 0..unrecorded {
                    let slot_id = format!("unknown-{}-{}", toss.id, toss.participants.0.len());
                    toss.participants.0.push(slot_id.clone());
                    toss.participant_options.push(ParticipantPick {
                        user_id: slot_id,
                        option: None,
                    });
                    toss.status = TossStatus::WaitingForPlayer;
                    // Persisted one slot at a time so a crash mid-loop never
                    // loses a previously-applied addition.
                    persist(&store, &toss).await?;
                    added += 1;
                }
            }

            Ok(format!(
                "toss {} ({}): {} participant(s), escrow balance {} vs expected {}, {} unidentified slot(s) recorded as UNKNOWN this refresh",
                toss.id,
                toss.topic,
                toss.participants.0.len(),
                balance,
                expected,
                added
            ))
        })
    }
}

impl Handler<Status> for TossEngine {
    type Result = ResponseFuture<Result<Toss, Error>>;

    fn handle(&mut self, msg: Status, _ctx: &mut Self::Context) -> Self::Result {
        let store = self.store.clone();
        Box::pin(async move { load_toss(&store, &msg.toss_id).await })
    }
}

impl Handler<GetActiveForConv> for TossEngine {
    type Result = ResponseFuture<Result<Option<Toss>, Error>>;

    fn handle(&mut self, msg: GetActiveForConv, _ctx: &mut Self::Context) -> Self::Result {
        let store = self.store.clone();
        Box::pin(async move { find_active_for_conv(&store, &msg.conversation_id).await })
    }
}

impl Handler<GetByAddress> for TossEngine {
    type Result = ResponseFuture<Result<Option<Toss>, Error>>;

    fn handle(&mut self, msg: GetByAddress, _ctx: &mut Self::Context) -> Self::Result {
        let store = self.store.clone();
        Box::pin(async move {
            let wallet = {
                let store = store.clone();
                let address = msg.address.clone();
                blocking::run(move || store.find_wallet_by_address(&address)).await?
            };
            match wallet {
                Some(w) => load_toss(&store, &w.user_id).await.map(Some),
                None => Ok(None),
            }
        })
    }
}
