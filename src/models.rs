use crate::errors::Error;
use derive_deref::Deref;
use serde::{Deserialize, Serialize};
use std::fmt;
use strum_macros::{Display, EnumString};

/// One minor unit is 10^-6 of the configured stablecoin, matching the
/// stablecoin's on-chain decimals. Fixed-point throughout: no floating
/// point ever touches a stake or a payout.
pub const MINOR_UNITS_PER_STABLECOIN: i64 = 1_000_000;

/// Max per-call transfer amount a `WalletProvider` will accept.
pub const MAX_STAKE_STABLECOIN: i64 = 10;

/// Default stake used by the parser/agent when a prompt omits an amount.
pub const DEFAULT_STAKE_STABLECOIN: &str = "0.1";

/// Default two-option set used when a prompt omits explicit options.
pub const DEFAULT_OPTIONS: [&str; 2] = ["yes", "no"];

/// A fixed-point stablecoin amount, modeled on a single-currency
/// specialization of a `{amount, currency}` fixed-point money type: no
/// multi-currency dispatch is needed since every toss settles in the one
/// stablecoin configured for the active chain.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Stake(pub i64);

impl Stake {
    pub fn from_stablecoin(units: f64) -> Self {
        Stake((units * MINOR_UNITS_PER_STABLECOIN as f64).round() as i64)
    }

    pub fn minor_units(&self) -> i64 {
        self.0
    }

    pub fn checked_mul(&self, n: usize) -> Option<Stake> {
        self.0.checked_mul(n as i64).map(Stake)
    }

    pub fn checked_div(&self, n: usize) -> Option<Stake> {
        if n == 0 {
            return None;
        }
        Some(Stake(self.0 / n as i64))
    }

    pub fn is_within_bounds(&self) -> bool {
        self.0 > 0 && self.0 <= MAX_STAKE_STABLECOIN * MINOR_UNITS_PER_STABLECOIN
    }
}

impl fmt::Display for Stake {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let whole = self.0 / MINOR_UNITS_PER_STABLECOIN;
        let frac = (self.0 % MINOR_UNITS_PER_STABLECOIN).abs();
        write!(f, "{}.{:06}", whole, frac)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Display, EnumString)]
pub enum TossStatus {
    #[strum(serialize = "CREATED")]
    Created,
    #[strum(serialize = "WAITING_FOR_PLAYER")]
    WaitingForPlayer,
    #[strum(serialize = "IN_PROGRESS")]
    InProgress,
    #[strum(serialize = "COMPLETED")]
    Completed,
    #[strum(serialize = "CANCELLED")]
    Cancelled,
}

impl TossStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TossStatus::Completed | TossStatus::Cancelled)
    }
}

/// The declared outcome of a closed toss: either the winning option label,
/// or the `FORCE_CLOSED` sentinel recorded by `ForceClose`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum TossResult {
    Option(String),
    ForceClosed,
}

impl fmt::Display for TossResult {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TossResult::Option(o) => write!(f, "{}", o),
            TossResult::ForceClosed => write!(f, "FORCE_CLOSED"),
        }
    }
}

/// One participant's recorded pick. `option` is `None` only for slots that
/// `Refresh` inferred from an unexplained balance surplus and could not
/// attribute to a known option - recorded as `UNKNOWN` rather than
/// silently defaulted.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ParticipantPick {
    pub user_id: String,
    pub option: Option<String>,
}

/// A transfer that could not be completed during a payout/refund, kept for
/// manual operator recovery.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct FailedTransfer {
    pub user_id: String,
    pub reason: String,
}

/// Parallel-list wrapper, a newtype-over-Vec idiom that exists mainly to
/// keep "insertion order = join order" documented at the
/// type rather than re-derived from a bare `Vec<String>` at call sites.
#[derive(Debug, Serialize, Deserialize, Clone, Default, Deref, PartialEq)]
pub struct Participants(pub Vec<String>);

/// The central entity: one wagering round. This struct is what `Store`
/// persists under the `tosses` collection.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Toss {
    pub id: String,
    pub creator: String,
    pub conversation_id: Option<String>,
    pub stake: Stake,
    pub topic: String,
    pub options: [String; 2],
    pub wallet_address: String,
    pub created_at: i64,
    pub status: TossStatus,
    pub participants: Participants,
    pub participant_options: Vec<ParticipantPick>,
    pub result: Option<TossResult>,
    pub payment_success: bool,
    pub tx_hash: Option<String>,
    pub tx_link: Option<String>,
    pub failed_winners: Vec<FailedTransfer>,
    pub failed_refunds: Vec<FailedTransfer>,
}

impl Toss {
    /// Case-insensitive membership check against `options`.
    pub fn option_index(&self, option: &str) -> Option<usize> {
        self.options
            .iter()
            .position(|o| o.eq_ignore_ascii_case(option))
    }

    pub fn has_option(&self, option: &str) -> bool {
        self.option_index(option).is_some()
    }

    pub fn is_participant(&self, user_id: &str) -> bool {
        self.participants.0.iter().any(|p| p == user_id)
    }

    pub fn total_pot(&self) -> Stake {
        self.stake
            .checked_mul(self.participants.0.len())
            .unwrap_or(self.stake)
    }

    pub fn winners(&self, winning_option: &str) -> Vec<String> {
        self.participant_options
            .iter()
            .filter(|p| {
                p.option
                    .as_deref()
                    .map(|o| o.eq_ignore_ascii_case(winning_option))
                    .unwrap_or(false)
            })
            .map(|p| p.user_id.clone())
            .collect()
    }

    pub fn assert_mutable(&self) -> Result<(), Error> {
        if self.status.is_terminal() {
            return Err(Error::BadState(self.id.clone()));
        }
        Ok(())
    }
}

/// `{userId, address, providerBlob}`. `provider_blob` is opaque to
/// everything except the `WalletProvider` that issued it.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct WalletRecord {
    pub user_id: String,
    pub address: String,
    pub provider_blob: String,
}

/// In-memory-only monitored wallet entry, reconstructed from non-terminal
/// tosses at start-up, never persisted on its own.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitoredWallet {
    pub address: String,
    pub toss_id: String,
    pub last_scanned_block: u64,
}
