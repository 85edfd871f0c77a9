use std::env;
use strum_macros::{Display, EnumString};

/// Selects which messaging network set the transport connects to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
pub enum NetworkEnv {
    #[strum(serialize = "dev")]
    Dev,
    #[strum(serialize = "production")]
    Production,
    #[strum(serialize = "local")]
    Local,
}

/// Selects the stablecoin address, chain id and network name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
pub enum ChainId {
    #[strum(serialize = "base-sepolia")]
    BaseSepolia,
    #[strum(serialize = "base-mainnet")]
    BaseMainnet,
}

impl ChainId {
    pub fn numeric_id(&self) -> u64 {
        match self {
            ChainId::BaseSepolia => 84532,
            ChainId::BaseMainnet => 8453,
        }
    }

    pub fn network_name(&self) -> &'static str {
        match self {
            ChainId::BaseSepolia => "base-sepolia",
            ChainId::BaseMainnet => "base-mainnet",
        }
    }
}

/// Process-wide configuration, read once at start-up.
#[derive(Debug, Clone)]
pub struct Config {
    pub wallet_key: String,
    pub db_encryption_key: String,
    pub network_env: NetworkEnv,
    pub chain_id: ChainId,
    pub stablecoin_address: String,
    pub rpc_url: String,
    pub wallet_provider_url: String,
    pub wallet_provider_key: String,
    pub wallet_provider_secret: String,
    pub llm_provider_key: String,
    pub command_prefix: String,
    pub allowed_commands: Vec<String>,
    pub welcome_message_dm: Option<String>,
    pub welcome_message_group: Option<String>,
    pub data_dir: String,
    pub watch_poll_interval_secs: u64,
}

const DEFAULT_ALLOWED_COMMANDS: &[&str] = &[
    "help", "status", "join", "close", "balance", "refresh", "monitor",
];

impl Config {
    /// Required keys fail loudly at start-up; optional ones fall back to
    /// a documented default.
    pub fn from_env() -> Result<Self, String> {
        dotenv::dotenv().ok();

        let wallet_key = require_env("WALLET_KEY")?;
        let db_encryption_key = require_env("DB_ENCRYPTION_KEY")?;
        let network_env = env::var("NETWORK_ENV").unwrap_or_else(|_| "dev".to_owned());
        let network_env: NetworkEnv = network_env
            .parse()
            .map_err(|_| format!("invalid NETWORK_ENV: {}", network_env))?;
        let chain_id = env::var("CHAIN_ID").unwrap_or_else(|_| "base-sepolia".to_owned());
        let chain_id: ChainId = chain_id
            .parse()
            .map_err(|_| format!("invalid CHAIN_ID: {}", chain_id))?;
        let stablecoin_address = require_env("STABLECOIN_ADDRESS")?;
        let rpc_url = require_env("RPC_URL")?;
        let wallet_provider_url = require_env("WALLET_PROVIDER_URL")?;
        let wallet_provider_key = require_env("WALLET_PROVIDER_KEY")?;
        let wallet_provider_secret = require_env("WALLET_PROVIDER_SECRET")?;
        let llm_provider_key = require_env("LLM_PROVIDER_KEY")?;
        let command_prefix = env::var("COMMAND_PREFIX").unwrap_or_else(|_| "@toss".to_owned());
        let allowed_commands = env::var("ALLOWED_COMMANDS")
            .map(|v| v.split(',').map(|s| s.trim().to_owned()).collect())
            .unwrap_or_else(|_| {
                DEFAULT_ALLOWED_COMMANDS
                    .iter()
                    .map(|s| s.to_string())
                    .collect()
            });
        let welcome_message_dm = env::var("WELCOME_MESSAGE_DM").ok();
        let welcome_message_group = env::var("WELCOME_MESSAGE_GROUP").ok();
        let data_dir = env::var("DATA_DIR").unwrap_or_else(|_| ".data".to_owned());
        let watch_poll_interval_secs = env::var("WATCH_POLL_INTERVAL_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(30);

        Ok(Config {
            wallet_key,
            db_encryption_key,
            network_env,
            chain_id,
            stablecoin_address,
            rpc_url,
            wallet_provider_url,
            wallet_provider_key,
            wallet_provider_secret,
            llm_provider_key,
            command_prefix,
            allowed_commands,
            welcome_message_dm,
            welcome_message_group,
            data_dir,
            watch_poll_interval_secs,
        })
    }

    pub fn command_allowed(&self, command: &str) -> bool {
        self.allowed_commands.iter().any(|c| c == command)
    }
}

fn require_env(key: &str) -> Result<String, String> {
    env::var(key).map_err(|_| format!("{} must be set", key))
}
