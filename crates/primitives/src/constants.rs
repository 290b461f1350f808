//! Chain-wide constants.

use alloy_primitives::{b256, B256};

/// Root hash of an empty trie: `KEC(RLP(""))`.
pub const EMPTY_ROOT: B256 =
    b256!("56e81f171bcc55a6ff8345e692c0f86e5b48e01b996cadc001622fb5e363b421");

/// Keccak-256 hash of the RLP of an empty list: `KEC(RLP([]))`.
///
/// This is the ommers hash of a block without ommers.
pub const EMPTY_OMMER_ROOT: B256 =
    b256!("1dcc4de8dec75d7aab85b567b6ccd41ad312451b948a7413f0a142fd40d49347");

/// Keccak-256 hash of empty input: `KEC("")`.
///
/// The code hash of an account without code.
pub const KECCAK_EMPTY: B256 =
    b256!("c5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470");

/// The hard floor below which a block gas limit can never fall.
pub const MIN_GAS_LIMIT: u64 = 5_000;

/// The bound divisor of the gas limit, used to bound block-to-block elasticity.
pub const GAS_LIMIT_BOUND_DIVISOR: u64 = 1_024;
