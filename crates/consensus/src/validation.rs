use strata_interfaces::{
    consensus::{BlockStatus, Consensus, ConsensusError},
    provider::{ChainStorage, ProviderError},
};
use strata_primitives::{
    constants::{GAS_LIMIT_BOUND_DIVISOR, MIN_GAS_LIMIT},
    SealedBlock, SealedHeader,
};
use thiserror::Error;

/// From the yellow paper: extraData must be 32 bytes or fewer.
const MAXIMUM_EXTRA_DATA_SIZE: usize = 32;

/// Error of the pre-import chain check.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChainValidationError {
    /// The block failed a consensus rule.
    #[error(transparent)]
    Consensus(#[from] ConsensusError),
    /// Local storage failed while looking up chain context.
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

/// Validate header rules that need no chain context.
pub fn validate_header_standalone(header: &SealedHeader) -> Result<(), ConsensusError> {
    // Declared gas used can never exceed the limit. Whether it matches the
    // executed gas is checked after execution.
    if header.gas_used > header.gas_limit {
        return Err(ConsensusError::HeaderGasUsedExceedsGasLimit {
            gas_used: header.gas_used,
            gas_limit: header.gas_limit,
        })
    }

    if header.extra_data.len() > MAXIMUM_EXTRA_DATA_SIZE {
        return Err(ConsensusError::ExtraDataExceedsMax { len: header.extra_data.len() })
    }

    Ok(())
}

/// Validate a header in regards to its parent.
pub fn validate_header_regarding_parent(
    parent: &SealedHeader,
    child: &SealedHeader,
) -> Result<(), ConsensusError> {
    if parent.number + 1 != child.number {
        return Err(ConsensusError::ParentBlockNumberMismatch {
            parent_block_number: parent.number,
            block_number: child.number,
        })
    }

    if child.timestamp <= parent.timestamp {
        return Err(ConsensusError::TimestampIsInPast {
            parent_timestamp: parent.timestamp,
            timestamp: child.timestamp,
        })
    }

    // The limit may move by strictly less than parent/1024 per block.
    let elasticity_bound = parent.gas_limit / GAS_LIMIT_BOUND_DIVISOR;
    if child.gas_limit > parent.gas_limit {
        if child.gas_limit - parent.gas_limit >= elasticity_bound {
            return Err(ConsensusError::GasLimitInvalidIncrease {
                parent_gas_limit: parent.gas_limit,
                child_gas_limit: child.gas_limit,
            })
        }
    } else if parent.gas_limit - child.gas_limit >= elasticity_bound {
        return Err(ConsensusError::GasLimitInvalidDecrease {
            parent_gas_limit: parent.gas_limit,
            child_gas_limit: child.gas_limit,
        })
    }
    if child.gas_limit < MIN_GAS_LIMIT {
        return Err(ConsensusError::GasLimitBelowMinimum { child_gas_limit: child.gas_limit })
    }

    Ok(())
}

/// Validate a block's body against its own header, without chain context.
pub fn validate_block_standalone(block: &SealedBlock) -> Result<(), ConsensusError> {
    let ommers_hash = block.body.calculate_ommers_root();
    if block.header.ommers_hash != ommers_hash {
        return Err(ConsensusError::BodyOmmersHashDiff {
            got: ommers_hash,
            expected: block.header.ommers_hash,
        })
    }

    let transactions_root = block.body.calculate_tx_root();
    if block.header.transactions_root != transactions_root {
        return Err(ConsensusError::BodyTransactionRootDiff {
            got: transactions_root,
            expected: block.header.transactions_root,
        })
    }

    Ok(())
}

/// Validate a block in regards to the locally stored chain.
///
/// A block that is already fully present, state included, short-circuits as
/// [`BlockStatus::AlreadyKnown`]; the caller must not re-import it. A missing
/// parent and a parent whose state was pruned are reported as distinct
/// errors: the former is recoverable through a deeper header backfill, the
/// latter only through a state sync.
pub fn validate_block_regarding_chain<P: ChainStorage>(
    block: &SealedBlock,
    provider: &P,
) -> Result<BlockStatus, ChainValidationError> {
    let hash = block.hash();

    if provider.has_block(&hash, block.number())? && provider.has_state(&hash)? {
        return Ok(BlockStatus::AlreadyKnown)
    }

    let parent_hash = block.header.parent_hash;
    if provider.sealed_header(&parent_hash)?.is_none() {
        return Err(ConsensusError::AncestorUnknown { hash: parent_hash }.into())
    }
    if !provider.has_state(&parent_hash)? {
        return Err(ConsensusError::AncestorPrunedState { hash: parent_hash }.into())
    }

    Ok(BlockStatus::Valid)
}

/// The protocol-rule validator used by the sync engine.
#[derive(Debug, Clone, Copy, Default)]
pub struct EthConsensus;

impl Consensus for EthConsensus {
    fn validate_header(
        &self,
        header: &SealedHeader,
        parent: &SealedHeader,
    ) -> Result<(), ConsensusError> {
        validate_header_standalone(header)?;
        validate_header_regarding_parent(parent, header)
    }

    fn pre_validate_block(&self, block: &SealedBlock) -> Result<(), ConsensusError> {
        validate_block_standalone(block)?;
        for ommer in &block.body.ommers {
            let sealed = ommer.clone().seal();
            validate_header_standalone(&sealed)
                .map_err(|_| ConsensusError::OmmerInvalid { hash: sealed.hash() })?;
        }
        Ok(())
    }
}
