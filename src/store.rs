use crate::errors::Error;
use crate::models::{Toss, WalletRecord};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Durable mapping from identifier to record for the two namespaces the
/// engine needs, plus the address->wallet reverse index.
///
/// This is a strongly-typed split of a single generic `Put(collection, id,
/// value)` interface; this crate renders that as two typed method families
/// instead of a stringly-typed collection parameter, since `Toss` and
/// `WalletRecord` have different shapes and Rust can check that
/// statically. Any backend implementing this trait satisfies the
/// contract: reads after a successful write return the written value,
/// writes are atomic at single-record granularity, and concurrent callers
/// are serialized by the engine's per-toss locking, not by the store
/// itself.
pub trait Store: Send + Sync {
    fn put_toss(&self, toss: &Toss) -> Result<(), Error>;
    fn get_toss(&self, id: &str) -> Result<Option<Toss>, Error>;
    fn delete_toss(&self, id: &str) -> Result<(), Error>;
    fn list_tosses(&self) -> Result<Vec<Toss>, Error>;

    fn put_wallet(&self, wallet: &WalletRecord) -> Result<(), Error>;
    fn get_wallet(&self, user_id: &str) -> Result<Option<WalletRecord>, Error>;
    fn delete_wallet(&self, user_id: &str) -> Result<(), Error>;
    fn list_wallets(&self) -> Result<Vec<WalletRecord>, Error>;

    /// Case-insensitive over hex address.
    fn find_wallet_by_address(&self, address: &str) -> Result<Option<WalletRecord>, Error>;
}

/// Reference persistence adapter: one JSON file per record under
/// `<data_dir>/tosses/<id>-<network>.json` and
/// `<data_dir>/wallets/<userId>-<network>.json`. Writes go through a
/// temp-file-then-rename
/// so a crash mid-write never leaves a half-written record behind, which is
/// how this backend satisfies "durable on return" / "atomic at
/// single-record granularity" without a database.
pub struct JsonFileStore {
    root: PathBuf,
    network: String,
    toss_lock: RwLock<()>,
    wallet_lock: RwLock<()>,
    address_index: Mutex<HashMap<String, String>>,
}

impl JsonFileStore {
    pub fn open(data_dir: &str, network: &str) -> Result<Self, Error> {
        let root = PathBuf::from(data_dir);
        fs::create_dir_all(root.join("tosses"))?;
        fs::create_dir_all(root.join("wallets"))?;
        let store = JsonFileStore {
            root,
            network: network.to_owned(),
            toss_lock: RwLock::new(()),
            wallet_lock: RwLock::new(()),
            address_index: Mutex::new(HashMap::new()),
        };
        store.rebuild_address_index()?;
        Ok(store)
    }

    fn rebuild_address_index(&self) -> Result<(), Error> {
        let mut index = self.address_index.lock();
        index.clear();
        for wallet in self.list_wallets()? {
            index.insert(wallet.address.to_lowercase(), wallet.user_id.clone());
        }
        Ok(())
    }

    fn toss_path(&self, id: &str) -> PathBuf {
        self.root
            .join("tosses")
            .join(format!("{}-{}.json", id, self.network))
    }

    fn wallet_path(&self, user_id: &str) -> PathBuf {
        self.root
            .join("wallets")
            .join(format!("{}-{}.json", user_id, self.network))
    }

    fn write_atomic<T: serde::Serialize>(path: &Path, value: &T) -> Result<(), Error> {
        let json = serde_json::to_vec_pretty(value)?;
        let tmp_path = path.with_extension("json.tmp");
        {
            let mut tmp = fs::File::create(&tmp_path)?;
            tmp.write_all(&json)?;
            tmp.sync_all()?;
        }
        fs::rename(&tmp_path, path)?;
        Ok(())
    }

    fn read_dir_records<T: serde::de::DeserializeOwned>(dir: &Path) -> Result<Vec<T>, Error> {
        let mut out = Vec::new();
        if !dir.exists() {
            return Ok(out);
        }
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let bytes = fs::read(&path)?;
            let value: T = serde_json::from_slice(&bytes)?;
            out.push(value);
        }
        Ok(out)
    }
}

impl Store for JsonFileStore {
    fn put_toss(&self, toss: &Toss) -> Result<(), Error> {
        let _guard = self.toss_lock.write();
        Self::write_atomic(&self.toss_path(&toss.id), toss)
    }

    fn get_toss(&self, id: &str) -> Result<Option<Toss>, Error> {
        let _guard = self.toss_lock.read();
        let path = self.toss_path(id);
        if !path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(&path)?;
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    fn delete_toss(&self, id: &str) -> Result<(), Error> {
        let _guard = self.toss_lock.write();
        let path = self.toss_path(id);
        if path.exists() {
            fs::remove_file(&path)?;
        }
        Ok(())
    }

    fn list_tosses(&self) -> Result<Vec<Toss>, Error> {
        let _guard = self.toss_lock.read();
        Self::read_dir_records(&self.root.join("tosses"))
    }

    fn put_wallet(&self, wallet: &WalletRecord) -> Result<(), Error> {
        let _guard = self.wallet_lock.write();
        Self::write_atomic(&self.wallet_path(&wallet.user_id), wallet)?;
        self.address_index
            .lock()
            .insert(wallet.address.to_lowercase(), wallet.user_id.clone());
        Ok(())
    }

    fn get_wallet(&self, user_id: &str) -> Result<Option<WalletRecord>, Error> {
        let _guard = self.wallet_lock.read();
        let path = self.wallet_path(user_id);
        if !path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(&path)?;
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    fn delete_wallet(&self, user_id: &str) -> Result<(), Error> {
        let _guard = self.wallet_lock.write();
        if let Some(wallet) = self.get_wallet(user_id)? {
            self.address_index.lock().remove(&wallet.address.to_lowercase());
        }
        let path = self.wallet_path(user_id);
        if path.exists() {
            fs::remove_file(&path)?;
        }
        Ok(())
    }

    fn list_wallets(&self) -> Result<Vec<WalletRecord>, Error> {
        let _guard = self.wallet_lock.read();
        Self::read_dir_records(&self.root.join("wallets"))
    }

    fn find_wallet_by_address(&self, address: &str) -> Result<Option<WalletRecord>, Error> {
        let user_id = self.address_index.lock().get(&address.to_lowercase()).cloned();
        match user_id {
            Some(user_id) => self.get_wallet(&user_id),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Participants, Stake, TossStatus};

    fn sample_toss(id: &str) -> Toss {
        Toss {
            id: id.to_owned(),
            creator: "alice".into(),
            conversation_id: Some("conv1".into()),
            stake: Stake::from_stablecoin(1.0),
            topic: "t".into(),
            options: ["yes".into(), "no".into()],
            wallet_address: "0xAbC".into(),
            created_at: 0,
            status: TossStatus::Created,
            participants: Participants::default(),
            participant_options: vec![],
            result: None,
            payment_success: false,
            tx_hash: None,
            tx_link: None,
            failed_winners: vec![],
            failed_refunds: vec![],
        }
    }

    #[test]
    fn put_then_get_round_trips() {
        let dir = tempdir();
        let store = JsonFileStore::open(dir.to_str().unwrap(), "base-sepolia").unwrap();
        let toss = sample_toss("1");
        store.put_toss(&toss).unwrap();
        assert_eq!(store.get_toss("1").unwrap(), Some(toss));
        assert_eq!(store.get_toss("missing").unwrap(), None);
        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn find_wallet_by_address_is_case_insensitive() {
        let dir = tempdir();
        let store = JsonFileStore::open(dir.to_str().unwrap(), "base-sepolia").unwrap();
        store
            .put_wallet(&WalletRecord {
                user_id: "1".into(),
                address: "0xAbCdEf".into(),
                provider_blob: "blob".into(),
            })
            .unwrap();
        let found = store.find_wallet_by_address("0xabcdef").unwrap().unwrap();
        assert_eq!(found.user_id, "1");
        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn delete_removes_record_and_index_entry() {
        let dir = tempdir();
        let store = JsonFileStore::open(dir.to_str().unwrap(), "base-sepolia").unwrap();
        store
            .put_wallet(&WalletRecord {
                user_id: "1".into(),
                address: "0xAbCdEf".into(),
                provider_blob: "blob".into(),
            })
            .unwrap();
        store.delete_wallet("1").unwrap();
        assert_eq!(store.get_wallet("1").unwrap(), None);
        assert_eq!(store.find_wallet_by_address("0xabcdef").unwrap(), None);
        std::fs::remove_dir_all(dir).ok();
    }

    fn tempdir() -> PathBuf {
        let mut dir = std::env::temp_dir();
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        dir.push(format!("tossbot-store-test-{}", nanos));
        dir
    }
}
