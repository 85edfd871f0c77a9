use alloy_primitives::{Address, U256};

/// `transfer(address,uint256)` selector: first four bytes of
/// `keccak256("transfer(address,uint256)")`.
pub const TRANSFER_SELECTOR: [u8; 4] = [0xa9, 0x05, 0x9c, 0xbb];

/// `Transfer(address,address,uint256)` event topic0, used by the chain
/// watcher to filter logs.
pub fn transfer_event_topic0() -> [u8; 32] {
    alloy_primitives::keccak256(b"Transfer(address,address,uint256)").0
}

/// Encodes an ERC-20 `transfer(to, amount)` call, used by `AgentFront` to
/// build the `wallet-send-calls` payment-intent payload.
pub fn encode_transfer(to: Address, amount_minor_units: i64) -> Vec<u8> {
    let mut data = Vec::with_capacity(4 + 32 + 32);
    data.extend_from_slice(&TRANSFER_SELECTOR);
    data.extend_from_slice(&[0u8; 12]);
    data.extend_from_slice(to.as_slice());
    let amount = U256::from(amount_minor_units.max(0) as u64);
    data.extend_from_slice(&amount.to_be_bytes::<32>());
    data
}

/// Decodes the standard ERC-20 `transfer(address,uint256)` call-data
/// layout: selector, then a 32-byte left-padded address, then a
/// 32-byte big-endian amount. Returns `None` if the data doesn't match that
/// shape (wrong selector, wrong length, or an amount too large to represent
/// in `i64` minor units).
pub fn decode_transfer_calldata(data: &[u8]) -> Option<(Address, i64)> {
    if data.len() != 4 + 32 + 32 || data[0..4] != TRANSFER_SELECTOR {
        return None;
    }
    let addr_word = &data[4..36];
    if addr_word[0..12].iter().any(|b| *b != 0) {
        return None;
    }
    let to = Address::from_slice(&addr_word[12..32]);
    let amount_word = &data[36..68];
    let amount = U256::from_be_slice(amount_word);
    let amount_i64: i64 = amount.try_into().ok()?;
    Some((to, amount_i64))
}
