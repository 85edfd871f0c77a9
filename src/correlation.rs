use crate::amount_codec::AmountCodec;
use crate::chain::{ChainClient, TxStatus};
use crate::chain_watcher::TransactionEvent;
use crate::erc20;
use crate::errors::Error;
use crate::store::Store;
use crate::transport::MetadataBag;
use log::{debug, warn};
use std::sync::Arc;
use std::time::Duration;

const VERIFY_MAX_RETRIES: u32 = 5;
const VERIFY_INITIAL_DELAY: Duration = Duration::from_secs(5);
const VERIFY_BACKOFF_FACTOR: f64 = 1.5;

/// Everything needed to resolve a payment, however it arrived: a chat
/// message carrying only a tx hash (plus whatever metadata the transport
/// attached), or a `TransactionEvent` pushed by the `ChainWatcher`.
#[derive(Debug, Clone, PartialEq)]
pub enum CorrelationInput {
    FromChat {
        tx_hash: String,
        metadata: MetadataBag,
        sender: String,
    },
    FromWatcher(TransactionEvent),
}

impl CorrelationInput {
    fn tx_hash(&self) -> &str {
        match self {
            CorrelationInput::FromChat { tx_hash, .. } => tx_hash,
            CorrelationInput::FromWatcher(event) => &event.tx_hash,
        }
    }

    fn metadata(&self) -> MetadataBag {
        match self {
            CorrelationInput::FromChat { metadata, .. } => metadata.clone(),
            CorrelationInput::FromWatcher(_) => MetadataBag::new(),
        }
    }

    /// The watcher has no chat-level user identity for a payment it
    /// observed directly on-chain; the sending address stands in for the
    /// sender's identity in that path ("senderUser" is only unambiguous
    /// when the correlation input came from a chat message).
    fn sender(&self) -> String {
        match self {
            CorrelationInput::FromChat { sender, .. } => sender.clone(),
            CorrelationInput::FromWatcher(event) => event.from.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedPayment {
    pub toss_id: String,
    pub option: String,
    pub sender: String,
    /// The address that signed and paid the verified transaction - the
    /// payable on-chain address the engine records for this participant,
    /// since `sender` (a chat identity in the `FromChat` path) is not
    /// itself guaranteed to be an address.
    pub payer_address: String,
    pub tx_hash: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnresolvedReason {
    Unverified,
    FailedTx,
    NotForUs,
    TerminalToss,
    UnresolvedOption,
    AlreadyParticipant,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CorrelationOutcome {
    Resolved(ResolvedPayment),
    Unresolved(UnresolvedReason),
}

/// Decides which toss and option an incoming on-chain transfer represents.
/// Given a verified transfer and any metadata found in the
/// transport message, it walks the fallback ladder: explicit metadata
/// marker first (authoritative when present), amount-encoded remainder
/// second (survives hostile re-serialization by intermediate wallets).
pub struct CorrelationLayer {
    store: Arc<dyn Store>,
    chain: Arc<dyn ChainClient>,
}

impl CorrelationLayer {
    pub fn new(store: Arc<dyn Store>, chain: Arc<dyn ChainClient>) -> Self {
        CorrelationLayer { store, chain }
    }

    pub async fn correlate(&self, input: CorrelationInput) -> Result<CorrelationOutcome, Error> {
        let tx_hash = input.tx_hash().to_owned();

        // Step 1: verify on-chain, fail-closed after retries.
        let tx = match self.verify_with_retries(&tx_hash).await {
            Some(tx) => tx,
            None => return Ok(CorrelationOutcome::Unresolved(UnresolvedReason::Unverified)),
        };

        // Step 2: require success.
        if tx.status != TxStatus::Success {
            return Ok(CorrelationOutcome::Unresolved(UnresolvedReason::FailedTx));
        }

        // Step 3: extract the ERC-20 transfer payload from call-data.
        let (to, amount) = match erc20::decode_transfer_calldata(&tx.input_data) {
            Some(pair) => pair,
            None => return Ok(CorrelationOutcome::Unresolved(UnresolvedReason::NotForUs)),
        };
        let to_address = to.to_string();

        // Step 4: look up the recipient in the address index; unknown = not for us.
        let wallet = match self.store.find_wallet_by_address(&to_address)? {
            Some(wallet) => wallet,
            None => return Ok(CorrelationOutcome::Unresolved(UnresolvedReason::NotForUs)),
        };

        // Step 5: escrow wallets are created with user_id == toss_id.
        let toss = match self.store.get_toss(&wallet.user_id)? {
            Some(toss) => toss,
            None => return Ok(CorrelationOutcome::Unresolved(UnresolvedReason::NotForUs)),
        };
        if toss.status.is_terminal() {
            return Ok(CorrelationOutcome::Unresolved(UnresolvedReason::TerminalToss));
        }

        let sender = input.sender();

        // Step 8 (checked before resolving, not only at the engine):
        // at-least-once delivery means the same transfer may arrive twice.
        if toss.is_participant(&sender) {
            return Ok(CorrelationOutcome::Unresolved(UnresolvedReason::AlreadyParticipant));
        }

        // Steps 6-7: explicit metadata marker first, amount codec fallback.
        let metadata = input.metadata();
        let option = if let Some(marker) = metadata.option_marker() {
            if toss.has_option(marker) {
                Some(marker.to_owned())
            } else {
                self.decode_option(&toss.options, amount)
            }
        } else {
            self.decode_option(&toss.options, amount)
        };

        match option {
            Some(option) => Ok(CorrelationOutcome::Resolved(ResolvedPayment {
                toss_id: toss.id,
                option,
                sender,
                payer_address: tx.from,
                tx_hash,
            })),
            None => Ok(CorrelationOutcome::Unresolved(UnresolvedReason::UnresolvedOption)),
        }
    }

    fn decode_option(&self, options: &[String; 2], amount: i64) -> Option<String> {
        AmountCodec::decode(amount, options.len()).map(|idx| options[idx].clone())
    }

    async fn verify_with_retries(&self, tx_hash: &str) -> Option<crate::chain::ChainTransaction> {
        let mut delay = VERIFY_INITIAL_DELAY;
        for attempt in 0..=VERIFY_MAX_RETRIES {
            match self.chain.get_transaction(tx_hash).await {
                Ok(tx) => match tx.status {
                    TxStatus::Success | TxStatus::Failed => return Some(tx),
                    TxStatus::Pending | TxStatus::NotFound => {
                        debug!(
                            "tx {} still {:?} on attempt {}/{}",
                            tx_hash, tx.status, attempt + 1, VERIFY_MAX_RETRIES + 1
                        );
                    }
                },
                Err(e) => warn!("verification attempt for {} failed: {}", tx_hash, e),
            }
            if attempt < VERIFY_MAX_RETRIES {
                tokio::time::sleep(delay).await;
                delay = Duration::from_secs_f64(delay.as_secs_f64() * VERIFY_BACKOFF_FACTOR);
            }
        }
        None
    }
}
