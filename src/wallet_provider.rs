use crate::errors::Error;
use crate::models::{Stake, WalletRecord, MAX_STAKE_STABLECOIN, MINOR_UNITS_PER_STABLECOIN};
use async_trait::async_trait;
use awc::Client;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Result of a successful on-chain transfer: the engine's sole evidence
/// that a payout or refund went through. The call need not block until
/// confirmation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransferReceipt {
    pub hash: String,
    pub link: String,
}

/// Opaque custodial wallet capability. Implementations create
/// a wallet keyed by an arbitrary `user_id` (the engine always passes a
/// fresh `toss_id`), read its stablecoin balance, and send gasless
/// stablecoin transfers.
#[async_trait]
pub trait WalletProvider: Send + Sync {
    async fn create(&self, user_id: &str) -> Result<WalletRecord, Error>;
    async fn load(&self, user_id: &str) -> Result<Option<WalletRecord>, Error>;
    async fn balance(&self, user_id: &str) -> Result<Stake, Error>;
    async fn transfer(
        &self,
        from_user_id: &str,
        to_address: &str,
        amount: Stake,
    ) -> Result<TransferReceipt, Error>;
}

/// Reference HTTP-backed implementation: a fixed base URL + auth header
/// wrapping an HTTP client with connection keep-alive. The request/response
/// shapes below are this
/// crate's own choice, since the actual provider's wire format is out of
/// scope; any provider meeting the `WalletProvider` contract can replace
/// this implementation.
pub struct HttpWalletProvider {
    client: Client,
    base_url: String,
    auth_header: String,
    explorer_base: String,
}

impl HttpWalletProvider {
    pub fn new(base_url: &str, key: &str, secret: &str, explorer_base: &str) -> Self {
        let auth = format!("{}:{}", key, secret);
        let header_value = format!(
            "Basic {}",
            base64::engine::general_purpose::STANDARD.encode(auth)
        );
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .finish();
        HttpWalletProvider {
            client,
            base_url: base_url.trim_end_matches('/').to_owned(),
            auth_header: header_value,
            explorer_base: explorer_base.trim_end_matches('/').to_owned(),
        }
    }

    fn explorer_link(&self, hash: &str) -> String {
        format!("{}/tx/{}", self.explorer_base, hash)
    }
}

#[derive(Serialize)]
struct CreateWalletRequest<'a> {
    user_id: &'a str,
}

#[derive(Deserialize)]
struct CreateWalletResponse {
    address: String,
    provider_blob: String,
}

#[derive(Deserialize)]
struct BalanceResponse {
    balance_minor_units: i64,
}

#[derive(Serialize)]
struct TransferRequest<'a> {
    from_user_id: &'a str,
    to_address: &'a str,
    amount_minor_units: i64,
}

#[derive(Deserialize)]
struct TransferResponse {
    hash: String,
}

#[async_trait]
impl WalletProvider for HttpWalletProvider {
    async fn create(&self, user_id: &str) -> Result<WalletRecord, Error> {
        let url = format!("{}/wallets", self.base_url);
        let mut resp = self
            .client
            .post(&url)
            .insert_header(("Authorization", self.auth_header.clone()))
            .send_json(&CreateWalletRequest { user_id })
            .await
            .map_err(|e| Error::ProviderUnavailable(e.to_string()))?;
        let body: CreateWalletResponse = resp
            .json()
            .await
            .map_err(|e| Error::ProviderUnavailable(e.to_string()))?;
        Ok(WalletRecord {
            user_id: user_id.to_owned(),
            address: body.address,
            provider_blob: body.provider_blob,
        })
    }

    async fn load(&self, user_id: &str) -> Result<Option<WalletRecord>, Error> {
        let url = format!("{}/wallets/{}", self.base_url, user_id);
        let mut resp = self
            .client
            .get(&url)
            .insert_header(("Authorization", self.auth_header.clone()))
            .send()
            .await
            .map_err(|e| Error::ProviderUnavailable(e.to_string()))?;
        if resp.status() == awc::http::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body: CreateWalletResponse = resp
            .json()
            .await
            .map_err(|e| Error::ProviderUnavailable(e.to_string()))?;
        Ok(Some(WalletRecord {
            user_id: user_id.to_owned(),
            address: body.address,
            provider_blob: body.provider_blob,
        }))
    }

    async fn balance(&self, user_id: &str) -> Result<Stake, Error> {
        let url = format!("{}/wallets/{}/balance", self.base_url, user_id);
        let mut resp = self
            .client
            .get(&url)
            .insert_header(("Authorization", self.auth_header.clone()))
            .send()
            .await
            .map_err(|e| Error::ProviderUnavailable(e.to_string()))?;
        let body: BalanceResponse = resp
            .json()
            .await
            .map_err(|e| Error::ProviderUnavailable(e.to_string()))?;
        Ok(Stake(body.balance_minor_units))
    }

    async fn transfer(
        &self,
        from_user_id: &str,
        to_address: &str,
        amount: Stake,
    ) -> Result<TransferReceipt, Error> {
        if amount.minor_units() > MAX_STAKE_STABLECOIN * MINOR_UNITS_PER_STABLECOIN {
            return Err(Error::AmountTooLarge(amount.to_string()));
        }
        if !to_address.starts_with("0x") || to_address.len() != 42 {
            return Err(Error::InvalidAddress(to_address.to_owned()));
        }
        let url = format!("{}/transfers", self.base_url);
        let mut resp = self
            .client
            .post(&url)
            .insert_header(("Authorization", self.auth_header.clone()))
            .send_json(&TransferRequest {
                from_user_id,
                to_address,
                amount_minor_units: amount.minor_units(),
            })
            .await
            .map_err(|e| Error::ProviderUnavailable(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(Error::TransferFailed(format!(
                "provider returned {}",
                resp.status()
            )));
        }
        let body: TransferResponse = resp
            .json()
            .await
            .map_err(|e| Error::TransferFailed(e.to_string()))?;
        Ok(TransferReceipt {
            link: self.explorer_link(&body.hash),
            hash: body.hash,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explorer_link_is_built_from_hash() {
        let provider = HttpWalletProvider::new(
            "http://wallet.local",
            "key",
            "secret",
            "https://sepolia.basescan.org",
        );
        assert_eq!(
            provider.explorer_link("0xdead"),
            "https://sepolia.basescan.org/tx/0xdead"
        );
    }
}
