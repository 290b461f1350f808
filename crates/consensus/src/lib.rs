//! Validation of fetched chain data.
//!
//! Every unit a downloader yields has already passed its stage-local checks;
//! this crate holds the chain-level gates: header-against-parent rules,
//! standalone block rules, the pre-import chain check and the post-execution
//! root comparisons. [`calc`] holds the pure gas-limit elasticity function.

#![warn(missing_docs, unreachable_pub)]

/// Gas-limit elasticity calculation.
pub mod calc;
/// Post-execution validation of receipts, gas accounting and state root.
pub mod post_execution;
/// Pre-execution validation of headers and blocks.
pub mod validation;

pub use calc::next_gas_limit;
pub use post_execution::validate_block_post_execution;
pub use validation::{
    validate_block_regarding_chain, validate_block_standalone, validate_header_regarding_parent,
    validate_header_standalone, ChainValidationError, EthConsensus,
};
