use crate::amount_codec::AmountCodec;
use crate::blocking;
use crate::chain_watcher::{ChainWatcher, ListMonitored};
use crate::config::Config;
use crate::correlation::{CorrelationInput, CorrelationLayer, CorrelationOutcome, UnresolvedReason};
use crate::erc20;
use crate::errors::Error;
use crate::fsm::{AddParticipant, Close, ForceClose, GetActiveForConv, Refresh, Status, TossEngine};
use crate::fsm::Create as CreateToss;
use crate::models::{Toss, WalletRecord};
use crate::store::Store;
use crate::toss_parser::{ParseError, TossParser};
use crate::transport::{
    InboundContent, InboundMessage, OutboundMessage, Transport, WalletSendCall,
    WalletSendCallsPayload,
};
use crate::wallet_provider::WalletProvider;
use actix::Addr;
use log::warn;
use std::sync::Arc;

fn hex0x(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(2 + bytes.len() * 2);
    s.push_str("0x");
    for b in bytes {
        s.push_str(&format!("{:02x}", b));
    }
    s
}

/// Translates chat transport events into engine calls and back.
/// Deliberately not an `actix::Actor`: each inbound message is handled on
/// its own spawned task (the supervisor calls `handle_inbound` from a
/// `actix_rt::spawn`), so there is no shared mutable state here beyond the
/// `Arc`/`Addr` handles this struct holds — it is stateless except for
/// held references to the engine, provider, store and chain client.
pub struct AgentFront {
    config: Config,
    engine: Addr<TossEngine>,
    watcher: Addr<ChainWatcher>,
    store: Arc<dyn Store>,
    wallet_provider: Arc<dyn WalletProvider>,
    parser: Arc<dyn TossParser>,
    transport: Arc<dyn Transport>,
    correlation: Arc<CorrelationLayer>,
}

impl AgentFront {
    pub fn new(
        config: Config,
        engine: Addr<TossEngine>,
        watcher: Addr<ChainWatcher>,
        store: Arc<dyn Store>,
        wallet_provider: Arc<dyn WalletProvider>,
        parser: Arc<dyn TossParser>,
        transport: Arc<dyn Transport>,
        correlation: Arc<CorrelationLayer>,
    ) -> Self {
        AgentFront {
            config,
            engine,
            watcher,
            store,
            wallet_provider,
            parser,
            transport,
            correlation,
        }
    }

    pub async fn handle_inbound(&self, msg: InboundMessage) -> Result<(), Error> {
        match &msg.content {
            InboundContent::TransactionReference(payload) => {
                self.handle_transaction_reference(&msg, payload.reference.clone(), payload.metadata_bag())
                    .await
            }
            InboundContent::Text { body } => self.handle_text(&msg, body).await,
        }
    }

    async fn handle_transaction_reference(
        &self,
        msg: &InboundMessage,
        tx_hash: String,
        metadata: crate::transport::MetadataBag,
    ) -> Result<(), Error> {
        let outcome = self
            .correlation
            .correlate(CorrelationInput::FromChat {
                tx_hash: tx_hash.clone(),
                metadata,
                sender: msg.sender.clone(),
            })
            .await?;

        match outcome {
            CorrelationOutcome::Resolved(payment) => {
                let result = self
                    .engine
                    .send(AddParticipant {
                        toss_id: payment.toss_id.clone(),
                        user: payment.sender.clone(),
                        option: payment.option.clone(),
                        paid: true,
                        address: payment.payer_address.clone(),
                    })
                    .await
                    .map_err(Error::from)?;
                match result {
                    Ok(toss) => {
                        self.reply_text(
                            msg,
                            format!(
                                "{} joined toss {} on \"{}\"",
                                payment.sender, toss.id, payment.option
                            ),
                        )
                        .await?;
                    }
                    Err(e) => {
                        if e.is_user_facing() {
                            self.reply_text(msg, format!("couldn't record that payment: {}", e))
                                .await?;
                        } else {
                            warn!("add participant failed for toss {}: {}", payment.toss_id, e);
                        }
                    }
                }
                Ok(())
            }
            CorrelationOutcome::Unresolved(reason) => self.report_unresolved(msg, reason).await,
        }
    }

    async fn report_unresolved(&self, msg: &InboundMessage, reason: UnresolvedReason) -> Result<(), Error> {
        match reason {
            // Not for us / already recorded: no user-visible effect;
            // these cases are silently discarded.
            UnresolvedReason::NotForUs
            | UnresolvedReason::TerminalToss
            | UnresolvedReason::AlreadyParticipant => Ok(()),
            UnresolvedReason::Unverified => {
                self.reply_text(msg, "couldn't verify that transaction on-chain yet".to_owned())
                    .await
            }
            UnresolvedReason::FailedTx => {
                self.reply_text(msg, "that transaction failed on-chain".to_owned()).await
            }
            UnresolvedReason::UnresolvedOption => {
                self.reply_text(
                    msg,
                    "couldn't tell which option that payment was for - please resend with the option named explicitly".to_owned(),
                )
                .await
            }
        }
    }

    async fn handle_text(&self, msg: &InboundMessage, body: &str) -> Result<(), Error> {
        let prefix = &self.config.command_prefix;
        if let Some(rest) = body.strip_prefix(prefix.as_str()) {
            let rest = rest.trim();
            let mut parts = rest.splitn(2, char::is_whitespace);
            let command = parts.next().unwrap_or("").to_lowercase();
            let args = parts.next().unwrap_or("").trim();
            return self.dispatch_command(msg, &command, args).await;
        }

        if msg.is_dm {
            return Ok(());
        }
        self.create_toss(msg, body).await
    }

    async fn dispatch_command(&self, msg: &InboundMessage, command: &str, args: &str) -> Result<(), Error> {
        if !self.config.command_allowed(command) {
            return self
                .reply_text(msg, format!("unknown command: {}", command))
                .await;
        }
        match command {
            "help" => self.reply_help(msg).await,
            "status" => self.report_status(msg).await,
            "join" => self.resend_join_buttons(msg).await,
            "close" => self.close_toss(msg, args).await,
            "balance" => self.report_balance(msg).await,
            "refresh" => self.refresh_toss(msg).await,
            "monitor" => self.report_monitor(msg).await,
            other => self.reply_text(msg, format!("unknown command: {}", other)).await,
        }
    }

    async fn reply_help(&self, msg: &InboundMessage) -> Result<(), Error> {
        let text = format!(
            "commands: {prefix} help | status | join | close [winningOption] | balance (DM) | refresh | monitor (DM)",
            prefix = self.config.command_prefix
        );
        self.reply_text(msg, text).await
    }

    async fn active_toss_for(&self, conversation_id: &str) -> Result<Option<Toss>, Error> {
        self.engine
            .send(GetActiveForConv {
                conversation_id: conversation_id.to_owned(),
            })
            .await
            .map_err(Error::from)?
    }

    /// Enforces "join/close/status/refresh only in groups that have an
    /// active toss" as two independent checks: `isDM` and `hasActiveToss`
    /// are separate predicates, not one mixed guard.
    async fn report_status(&self, msg: &InboundMessage) -> Result<(), Error> {
        if msg.is_dm {
            return self.reply_text(msg, Error::GroupOnly.to_string()).await;
        }
        let active = match self.active_toss_for(&msg.conversation_id).await? {
            Some(toss) => toss,
            None => return self.reply_text(msg, Error::NoActiveToss.to_string()).await,
        };
        // Re-fetch through the dedicated read op rather than trusting the
        // conversation lookup's snapshot, so `status` always reflects the
        // latest persisted record even if a close landed in between.
        let toss = self
            .engine
            .send(Status { toss_id: active.id })
            .await
            .map_err(Error::from)??;
        self.reply_text(msg, format_status(&toss)).await
    }

    async fn resend_join_buttons(&self, msg: &InboundMessage) -> Result<(), Error> {
        if msg.is_dm {
            return self.reply_text(msg, Error::GroupOnly.to_string()).await;
        }
        let toss = match self.active_toss_for(&msg.conversation_id).await? {
            Some(toss) => toss,
            None => return self.reply_text(msg, Error::NoActiveToss.to_string()).await,
        };
        self.send_payment_intents(msg, &toss).await
    }

    async fn close_toss(&self, msg: &InboundMessage, args: &str) -> Result<(), Error> {
        if msg.is_dm {
            return self.reply_text(msg, Error::GroupOnly.to_string()).await;
        }
        let toss = match self.active_toss_for(&msg.conversation_id).await? {
            Some(toss) => toss,
            None => return self.reply_text(msg, Error::NoActiveToss.to_string()).await,
        };

        let result = if args.is_empty() {
            self.engine
                .send(ForceClose {
                    toss_id: toss.id.clone(),
                    caller: msg.sender.clone(),
                })
                .await
                .map_err(Error::from)?
        } else {
            self.engine
                .send(Close {
                    toss_id: toss.id.clone(),
                    caller: msg.sender.clone(),
                    winning_option: args.to_owned(),
                })
                .await
                .map_err(Error::from)?
        };

        match result {
            Ok(closed) => self.reply_text(msg, format_close_result(&closed)).await,
            Err(e) => self.reply_text(msg, e.to_string()).await,
        }
    }

    async fn report_balance(&self, msg: &InboundMessage) -> Result<(), Error> {
        if !msg.is_dm {
            return self.reply_text(msg, Error::DmOnly.to_string()).await;
        }
        let wallet = self.ensure_user_wallet(&msg.sender).await?;
        let balance = self.wallet_provider.balance(&wallet.user_id).await?;
        self.reply_text(msg, format!("your stablecoin balance: {}", balance)).await
    }

    /// Loads the chat sender's own stablecoin wallet, creating one on
    /// first use - the same load-or-create shape as an escrow wallet's
    /// creation in `Create`, keyed by the sender's chat identity instead
    /// of a toss id.
    async fn ensure_user_wallet(&self, user_id: &str) -> Result<WalletRecord, Error> {
        if let Some(wallet) = self.wallet_provider.load(user_id).await? {
            return Ok(wallet);
        }
        let wallet = self.wallet_provider.create(user_id).await?;
        let store = self.store.clone();
        let record = wallet.clone();
        blocking::run(move || store.put_wallet(&record)).await?;
        Ok(wallet)
    }

    async fn refresh_toss(&self, msg: &InboundMessage) -> Result<(), Error> {
        if msg.is_dm {
            return self.reply_text(msg, Error::GroupOnly.to_string()).await;
        }
        let toss = match self.active_toss_for(&msg.conversation_id).await? {
            Some(toss) => toss,
            None => return self.reply_text(msg, Error::NoActiveToss.to_string()).await,
        };
        let report = self
            .engine
            .send(Refresh { toss_id: toss.id })
            .await
            .map_err(Error::from)??;
        self.reply_text(msg, report).await
    }

    async fn report_monitor(&self, msg: &InboundMessage) -> Result<(), Error> {
        if !msg.is_dm {
            return self.reply_text(msg, Error::DmOnly.to_string()).await;
        }
        let monitored = self.watcher.send(ListMonitored).await.map_err(Error::from)?;
        if monitored.is_empty() {
            return self.reply_text(msg, "no wallets currently monitored".to_owned()).await;
        }
        let lines: Vec<String> = monitored
            .iter()
            .map(|w| format!("toss {}: {} (checkpoint block {})", w.toss_id, w.address, w.last_scanned_block))
            .collect();
        self.reply_text(msg, lines.join("\n")).await
    }

    async fn create_toss(&self, msg: &InboundMessage, prompt: &str) -> Result<(), Error> {
        let parsed = match self.parser.parse(prompt).await {
            Ok(parsed) => parsed,
            Err(e) => return self.reply_text(msg, format_parse_error(&e)).await,
        };

        let result = self
            .engine
            .send(CreateToss {
                creator: msg.sender.clone(),
                parsed,
                conversation_id: Some(msg.conversation_id.clone()),
            })
            .await
            .map_err(Error::from)?;

        match result {
            Ok(toss) => {
                self.reply_text(
                    msg,
                    format!(
                        "toss {} created: \"{}\" - options {} / {}, stake {}",
                        toss.id, toss.topic, toss.options[0], toss.options[1], toss.stake
                    ),
                )
                .await?;
                self.send_payment_intents(msg, &toss).await
            }
            Err(e) => self.reply_text(msg, e.to_string()).await,
        }
    }

    /// Emits one wallet-send-calls button per option, each targeting the
    /// toss's escrow address with the option's remainder-tagged amount.
    /// `from` names the account that will execute the call when the
    /// recipient taps the button - the wire format doesn't pin this down
    /// explicitly, so this treats it as
    /// the sender's own chat identity, the account actually moving funds.
    async fn send_payment_intents(&self, msg: &InboundMessage, toss: &Toss) -> Result<(), Error> {
        let escrow: alloy_primitives::Address = toss
            .wallet_address
            .parse()
            .map_err(|_| Error::InvalidAddress(toss.wallet_address.clone()))?;
        for (idx, option) in toss.options.iter().enumerate() {
            let amount = AmountCodec::encode(idx, toss.stake);
            let calldata = erc20::encode_transfer(escrow, amount);
            let mut metadata = std::collections::HashMap::new();
            metadata.insert("option".to_owned(), option.clone());
            metadata.insert("tossId".to_owned(), toss.id.clone());
            let call = WalletSendCall {
                to: self.config.stablecoin_address.clone(),
                data: hex0x(&calldata),
                metadata,
            };
            let payload = WalletSendCallsPayload::new(&msg.sender, self.config.chain_id.numeric_id(), call);
            self.transport
                .send(OutboundMessage::WalletSendCalls {
                    conversation_id: msg.conversation_id.clone(),
                    payload,
                })
                .await?;
        }
        Ok(())
    }

    async fn reply_text(&self, msg: &InboundMessage, body: String) -> Result<(), Error> {
        self.transport
            .send(OutboundMessage::Text {
                conversation_id: msg.conversation_id.clone(),
                body,
            })
            .await
    }
}

fn format_status(toss: &Toss) -> String {
    format!(
        "toss {} \"{}\": status {}, {} participant(s), options {} / {}",
        toss.id,
        toss.topic,
        toss.status,
        toss.participants.0.len(),
        toss.options[0],
        toss.options[1],
    )
}

fn format_close_result(toss: &Toss) -> String {
    match &toss.result {
        Some(result) => format!(
            "toss {} closed: {} (payment success: {})",
            toss.id, result, toss.payment_success
        ),
        None => format!("toss {} closed", toss.id),
    }
}

fn format_parse_error(e: &ParseError) -> String {
    format!("couldn't create that toss: {}", e)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{ChainClient, ChainTransaction, TransferLog, TxStatus};
    use crate::models::{Stake, WalletRecord};
    use crate::toss_parser::ParsedToss;
    use crate::transport::TransactionReferencePayload;
    use crate::wallet_provider::TransferReceipt;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::HashMap as StdHashMap;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct FakeStore {
        tosses: Mutex<StdHashMap<String, Toss>>,
        wallets: Mutex<StdHashMap<String, WalletRecord>>,
    }

    impl FakeStore {
        fn new() -> Arc<Self> {
            Arc::new(FakeStore {
                tosses: Mutex::new(StdHashMap::new()),
                wallets: Mutex::new(StdHashMap::new()),
            })
        }
    }

    impl Store for FakeStore {
        fn put_toss(&self, toss: &Toss) -> Result<(), Error> {
            self.tosses.lock().insert(toss.id.clone(), toss.clone());
            Ok(())
        }
        fn get_toss(&self, id: &str) -> Result<Option<Toss>, Error> {
            Ok(self.tosses.lock().get(id).cloned())
        }
        fn delete_toss(&self, id: &str) -> Result<(), Error> {
            self.tosses.lock().remove(id);
            Ok(())
        }
        fn list_tosses(&self) -> Result<Vec<Toss>, Error> {
            Ok(self.tosses.lock().values().cloned().collect())
        }
        fn put_wallet(&self, wallet: &WalletRecord) -> Result<(), Error> {
            self.wallets.lock().insert(wallet.user_id.clone(), wallet.clone());
            Ok(())
        }
        fn get_wallet(&self, user_id: &str) -> Result<Option<WalletRecord>, Error> {
            Ok(self.wallets.lock().get(user_id).cloned())
        }
        fn delete_wallet(&self, user_id: &str) -> Result<(), Error> {
            self.wallets.lock().remove(user_id);
            Ok(())
        }
        fn list_wallets(&self) -> Result<Vec<WalletRecord>, Error> {
            Ok(self.wallets.lock().values().cloned().collect())
        }
        fn find_wallet_by_address(&self, address: &str) -> Result<Option<WalletRecord>, Error> {
            Ok(self
                .wallets
                .lock()
                .values()
                .find(|w| w.address.eq_ignore_ascii_case(address))
                .cloned())
        }
    }

    struct FakeWalletProvider {
        counter: AtomicU64,
    }

    #[async_trait]
    impl WalletProvider for FakeWalletProvider {
        async fn create(&self, user_id: &str) -> Result<WalletRecord, Error> {
            let n = self.counter.fetch_add(1, Ordering::SeqCst);
            Ok(WalletRecord {
                user_id: user_id.to_owned(),
                address: format!("0x{:040x}", n + 1),
                provider_blob: "blob".into(),
            })
        }
        async fn load(&self, _user_id: &str) -> Result<Option<WalletRecord>, Error> {
            Ok(None)
        }
        async fn balance(&self, _user_id: &str) -> Result<Stake, Error> {
            Ok(Stake::from_stablecoin(2.0))
        }
        async fn transfer(&self, from: &str, _to: &str, amount: Stake) -> Result<TransferReceipt, Error> {
            Ok(TransferReceipt {
                hash: format!("0xhash{}", from),
                link: format!("https://explorer.test/tx/0xhash{}{}", from, amount),
            })
        }
    }

    struct NoopChainClient;

    #[async_trait]
    impl ChainClient for NoopChainClient {
        async fn current_block_number(&self) -> Result<u64, Error> {
            Ok(0)
        }
        async fn get_transfer_logs(&self, _to: &str, _from: u64, _to_block: u64) -> Result<Vec<TransferLog>, Error> {
            Ok(vec![])
        }
        async fn get_transaction(&self, _tx_hash: &str) -> Result<ChainTransaction, Error> {
            Ok(ChainTransaction {
                status: TxStatus::Success,
                input_data: vec![],
                from: "0x0000000000000000000000000000000000b0b1".into(),
            })
        }
    }

    struct FixedParser(ParsedToss);

    #[async_trait]
    impl TossParser for FixedParser {
        async fn parse(&self, _prompt: &str) -> Result<ParsedToss, ParseError> {
            Ok(self.0.clone())
        }
    }

    struct FakeTransport {
        sent: Mutex<Vec<OutboundMessage>>,
    }

    impl FakeTransport {
        fn new() -> Arc<Self> {
            Arc::new(FakeTransport { sent: Mutex::new(vec![]) })
        }
    }

    #[async_trait]
    impl Transport for FakeTransport {
        async fn send(&self, message: OutboundMessage) -> Result<(), Error> {
            self.sent.lock().push(message);
            Ok(())
        }
    }

    fn test_config() -> Config {
        Config {
            wallet_key: String::new(),
            db_encryption_key: String::new(),
            network_env: crate::config::NetworkEnv::Dev,
            chain_id: crate::config::ChainId::BaseSepolia,
            stablecoin_address: "0x00000000000000000000000000000000000999".into(),
            rpc_url: String::new(),
            wallet_provider_url: String::new(),
            wallet_provider_key: String::new(),
            wallet_provider_secret: String::new(),
            llm_provider_key: String::new(),
            command_prefix: "@toss".into(),
            allowed_commands: vec![
                "help".into(),
                "status".into(),
                "join".into(),
                "close".into(),
                "balance".into(),
                "refresh".into(),
                "monitor".into(),
            ],
            welcome_message_dm: None,
            welcome_message_group: None,
            data_dir: ".data".into(),
            watch_poll_interval_secs: 30,
        }
    }

    async fn setup(
        parser: ParsedToss,
    ) -> (Arc<FakeStore>, Arc<FakeTransport>, AgentFront) {
        let store = FakeStore::new();
        let wallet_provider = Arc::new(FakeWalletProvider { counter: AtomicU64::new(0) });
        let chain_client = Arc::new(NoopChainClient);
        let watcher = ChainWatcher::new(
            chain_client.clone(),
            Arc::new(|_e, _w| Box::pin(async {})),
            std::time::Duration::from_secs(30),
        )
        .start();
        let engine = TossEngine::new(store.clone(), wallet_provider.clone(), watcher.clone())
            .unwrap()
            .start();
        let transport = FakeTransport::new();
        let correlation = Arc::new(CorrelationLayer::new(store.clone(), chain_client));
        let front = AgentFront::new(
            test_config(),
            engine,
            watcher,
            store.clone(),
            wallet_provider,
            Arc::new(FixedParser(parser)),
            transport.clone(),
            correlation,
        );
        (store, transport, front)
    }

    fn inbound_text(conv: &str, sender: &str, is_dm: bool, body: &str) -> InboundMessage {
        InboundMessage {
            conversation_id: conv.to_owned(),
            sender: sender.to_owned(),
            is_dm,
            content: InboundContent::Text { body: body.to_owned() },
        }
    }

    #[actix::test]
    async fn free_text_in_group_creates_toss_and_sends_buttons() {
        let parsed = ParsedToss {
            topic: "Lakers vs Celtics".into(),
            options: ["Lakers".into(), "Celtics".into()],
            stake_stablecoin: 1.0,
        };
        let (_store, transport, front) = setup(parsed).await;
        front
            .handle_inbound(inbound_text("conv1", "alice", false, "Lakers vs Celtics, 1.0"))
            .await
            .unwrap();

        let sent = transport.sent.lock();
        assert_eq!(sent.len(), 3); // confirmation text + 2 buttons
        assert!(matches!(sent[0], OutboundMessage::Text { .. }));
        assert!(matches!(sent[1], OutboundMessage::WalletSendCalls { .. }));
        assert!(matches!(sent[2], OutboundMessage::WalletSendCalls { .. }));
    }

    #[actix::test]
    async fn free_text_in_dm_is_ignored() {
        let parsed = ParsedToss {
            topic: "t".into(),
            options: ["yes".into(), "no".into()],
            stake_stablecoin: 0.1,
        };
        let (_store, transport, front) = setup(parsed).await;
        front
            .handle_inbound(inbound_text("dm1", "alice", true, "some free text"))
            .await
            .unwrap();
        assert!(transport.sent.lock().is_empty());
    }

    #[actix::test]
    async fn balance_command_rejected_outside_dm() {
        let parsed = ParsedToss {
            topic: "t".into(),
            options: ["yes".into(), "no".into()],
            stake_stablecoin: 0.1,
        };
        let (_store, transport, front) = setup(parsed).await;
        front
            .handle_inbound(inbound_text("conv1", "alice", false, "@toss balance"))
            .await
            .unwrap();
        let sent = transport.sent.lock();
        assert_eq!(sent.len(), 1);
        match &sent[0] {
            OutboundMessage::Text { body, .. } => assert!(body.contains("direct message")),
            other => panic!("expected text reply, got {:?}", other),
        }
    }

    #[actix::test]
    async fn balance_command_in_dm_reports_senders_own_wallet() {
        let parsed = ParsedToss {
            topic: "t".into(),
            options: ["yes".into(), "no".into()],
            stake_stablecoin: 0.1,
        };
        let (store, transport, front) = setup(parsed).await;
        front
            .handle_inbound(inbound_text("conv1", "alice", true, "@toss balance"))
            .await
            .unwrap();
        let sent = transport.sent.lock();
        match &sent[0] {
            OutboundMessage::Text { body, .. } => assert!(body.contains("your stablecoin balance")),
            other => panic!("expected text reply, got {:?}", other),
        }
        drop(sent);
        let wallet = store.get_wallet("alice").unwrap();
        assert!(wallet.is_some(), "balance command should register a wallet for the sender");
    }

    #[actix::test]
    async fn status_command_requires_active_toss() {
        let parsed = ParsedToss {
            topic: "t".into(),
            options: ["yes".into(), "no".into()],
            stake_stablecoin: 0.1,
        };
        let (_store, transport, front) = setup(parsed).await;
        front
            .handle_inbound(inbound_text("conv1", "alice", false, "@toss status"))
            .await
            .unwrap();
        let sent = transport.sent.lock();
        match &sent[0] {
            OutboundMessage::Text { body, .. } => assert!(body.contains("no active toss")),
            other => panic!("expected text reply, got {:?}", other),
        }
    }

    #[actix::test]
    async fn close_without_option_force_closes() {
        let parsed = ParsedToss {
            topic: "t".into(),
            options: ["yes".into(), "no".into()],
            stake_stablecoin: 0.1,
        };
        let (_store, transport, front) = setup(parsed).await;
        front
            .handle_inbound(inbound_text("conv1", "alice", false, "coin flip"))
            .await
            .unwrap();
        transport.sent.lock().clear();

        front
            .handle_inbound(inbound_text("conv1", "alice", false, "@toss close"))
            .await
            .unwrap();
        let sent = transport.sent.lock();
        match &sent[0] {
            OutboundMessage::Text { body, .. } => assert!(body.contains("FORCE_CLOSED")),
            other => panic!("expected text reply, got {:?}", other),
        }
    }

    #[actix::test]
    async fn transaction_reference_adds_participant_via_correlation() {
        let parsed = ParsedToss {
            topic: "t".into(),
            options: ["Lakers".into(), "Celtics".into()],
            stake_stablecoin: 1.0,
        };
        let (store, transport, front) = setup(parsed).await;
        front
            .handle_inbound(inbound_text("conv1", "alice", false, "Lakers vs Celtics"))
            .await
            .unwrap();
        let toss = store.list_tosses().unwrap().into_iter().next().unwrap();

        // Wire the fake chain client behind correlation to report a
        // successful tx paying the escrow wallet with option 0 encoded.
        let escrow: alloy_primitives::Address = toss.wallet_address.parse().unwrap();
        let amount = AmountCodec::encode(0, toss.stake);
        let calldata = erc20::encode_transfer(escrow, amount);

        struct ReplayChain {
            tx: Mutex<Option<ChainTransaction>>,
        }
        #[async_trait]
        impl ChainClient for ReplayChain {
            async fn current_block_number(&self) -> Result<u64, Error> {
                Ok(0)
            }
            async fn get_transfer_logs(&self, _to: &str, _from: u64, _to_block: u64) -> Result<Vec<TransferLog>, Error> {
                Ok(vec![])
            }
            async fn get_transaction(&self, _tx_hash: &str) -> Result<ChainTransaction, Error> {
                self.tx.lock().clone().ok_or_else(|| Error::Internal("no tx".into()))
            }
        }
        let chain = Arc::new(ReplayChain {
            tx: Mutex::new(Some(ChainTransaction {
                status: TxStatus::Success,
                input_data: calldata,
                from: "0x0000000000000000000000000000000000b0b2".into(),
            })),
        });
        let correlation = Arc::new(CorrelationLayer::new(store.clone(), chain));

        let front2 = AgentFront::new(
            test_config(),
            front.engine.clone(),
            front.watcher.clone(),
            store.clone(),
            front.wallet_provider.clone(),
            front.parser.clone(),
            transport.clone(),
            correlation,
        );

        transport.sent.lock().clear();
        front2
            .handle_inbound(InboundMessage {
                conversation_id: "conv1".into(),
                sender: "bob".into(),
                is_dm: false,
                content: InboundContent::TransactionReference(TransactionReferencePayload {
                    network_id: "base-sepolia".into(),
                    reference: "0xhash1".into(),
                    metadata: StdHashMap::new(),
                }),
            })
            .await
            .unwrap();

        let updated = store.get_toss(&toss.id).unwrap().unwrap();
        assert!(updated.is_participant("bob"));
        let sent = transport.sent.lock();
        assert_eq!(sent.len(), 1);
        match &sent[0] {
            OutboundMessage::Text { body, .. } => assert!(body.contains("bob")),
            other => panic!("expected text reply, got {:?}", other),
        }
    }
}
