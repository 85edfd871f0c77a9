use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A flat mapping from string keys to string values, populated at each
/// ingress point by extracting a small, enumerated set of known paths out
/// of the transport payload (top-level metadata, per-call metadata,
/// message `extras`). This replaces the reflective "walk any nested object
/// looking for a key that case-folds to option|selectedOption|choice"
/// pattern flagged in the redesign notes: typed code enumerates the paths
/// it actually receives instead of searching arbitrary JSON.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataBag(HashMap<String, String>);

const OPTION_KEY_ALIASES: &[&str] = &["option", "selectedoption", "choice"];

impl MetadataBag {
    pub fn new() -> Self {
        MetadataBag(HashMap::new())
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into().to_lowercase(), value.into());
    }

    pub fn extend(&mut self, other: MetadataBag) {
        self.0.extend(other.0);
    }

    /// Looks up any key whose case-folded form is `option`, `selectedoption`
    /// or `choice`.
    pub fn option_marker(&self) -> Option<&str> {
        OPTION_KEY_ALIASES
            .iter()
            .find_map(|alias| self.0.get(*alias))
            .map(|s| s.as_str())
    }
}

/// Transport content types relevant at the interface boundary.
/// The transport's own codecs (wire encoding, encryption, delivery
/// receipts) are out of scope; only the shapes `AgentFront` consumes or
/// produces are modeled here.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum InboundContent {
    Text { body: String },
    TransactionReference(TransactionReferencePayload),
}

/// `{networkId, reference: txHash, ...}` consumed payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransactionReferencePayload {
    pub network_id: String,
    pub reference: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl TransactionReferencePayload {
    pub fn metadata_bag(&self) -> MetadataBag {
        let mut bag = MetadataBag::new();
        for (k, v) in &self.metadata {
            bag.insert(k.clone(), v.clone());
        }
        bag
    }
}

/// One call inside a `wallet-send-calls` payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WalletSendCall {
    pub to: String,
    pub data: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// Emitted payload that renders as an action button in the recipient's
/// wallet ("wallet send calls").
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WalletSendCallsPayload {
    pub version: String,
    pub from: String,
    pub chain_id: u64,
    pub calls: Vec<WalletSendCall>,
}

impl WalletSendCallsPayload {
    pub fn new(from: &str, chain_id: u64, call: WalletSendCall) -> Self {
        WalletSendCallsPayload {
            version: "1.0".to_owned(),
            from: from.to_owned(),
            chain_id,
            calls: vec![call],
        }
    }
}

/// A message arriving from the transport, already decoded into the shape
/// `AgentFront` dispatches on.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub conversation_id: String,
    pub sender: String,
    pub is_dm: bool,
    pub content: InboundContent,
}

/// An outbound message `AgentFront` asks the transport to deliver.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundMessage {
    Text {
        conversation_id: String,
        body: String,
    },
    WalletSendCalls {
        conversation_id: String,
        payload: WalletSendCallsPayload,
    },
    TransactionConfirmation {
        conversation_id: String,
        payload: TransactionReferencePayload,
    },
}

/// The secure-messaging transport, treated as an external collaborator.
/// Only the `Send` surface `AgentFront` needs is modeled; the
/// transport's own connection lifecycle (stream workers, reconnection
/// backoff) lives outside this trait.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, message: OutboundMessage) -> Result<(), crate::errors::Error>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn option_marker_matches_case_folded_aliases() {
        let mut bag = MetadataBag::new();
        bag.insert("SelectedOption", "Lakers");
        assert_eq!(bag.option_marker(), Some("Lakers"));

        let mut bag2 = MetadataBag::new();
        bag2.insert("choice", "Celtics");
        assert_eq!(bag2.option_marker(), Some("Celtics"));

        let bag3 = MetadataBag::new();
        assert_eq!(bag3.option_marker(), None);
    }
}
