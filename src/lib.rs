pub mod agent_front;
pub mod amount_codec;
pub mod blocking;
pub mod chain;
pub mod chain_watcher;
pub mod config;
pub mod correlation;
pub mod erc20;
pub mod errors;
pub mod fsm;
pub mod models;
pub mod store;
pub mod supervisor;
pub mod toss_parser;
pub mod transport;
pub mod wallet_provider;
