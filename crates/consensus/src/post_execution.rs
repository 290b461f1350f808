use strata_interfaces::consensus::ConsensusError;
use strata_primitives::{proofs, Receipt, SealedHeader, B256};

/// Validate the outcome of executing a block against its header claims.
///
/// Every mismatch here is a hard failure: the data already passed the
/// downloader cross-checks, so a divergence means either a malicious peer
/// forged the header chain or the execution backend is wrong. Neither is
/// recoverable by retrying, and the error carries both roots for diagnosis.
pub fn validate_block_post_execution(
    header: &SealedHeader,
    receipts: &[Receipt],
    gas_used: u64,
    state_root: B256,
) -> Result<(), ConsensusError> {
    if gas_used != header.gas_used {
        return Err(ConsensusError::BlockGasUsedDiff { got: gas_used, expected: header.gas_used })
    }

    let logs_bloom = proofs::calculate_logs_bloom(receipts.iter().flat_map(|r| r.logs.iter()));
    if logs_bloom != header.logs_bloom {
        return Err(ConsensusError::BloomDiff {
            got: Box::new(logs_bloom),
            expected: Box::new(header.logs_bloom),
        })
    }

    let receipts_root = proofs::calculate_receipt_root(receipts);
    if receipts_root != header.receipts_root {
        return Err(ConsensusError::ReceiptRootDiff {
            got: receipts_root,
            expected: header.receipts_root,
        })
    }

    if state_root != header.state_root {
        return Err(ConsensusError::StateRootDiff { got: state_root, expected: header.state_root })
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use strata_interfaces::test_utils::ChainFixture;

    #[test]
    fn accepts_consistent_execution_outcomes() {
        let chain = ChainFixture::generate(6, 3);
        for number in 1..=6 {
            let block = chain.validated_block(number);
            let header = block.header();
            validate_block_post_execution(
                header,
                block.receipts(),
                header.gas_used,
                header.state_root,
            )
            .unwrap();
        }
    }

    #[test]
    fn each_mismatch_reports_its_own_kind() {
        let chain = ChainFixture::generate(3, 3);
        let block = chain.validated_block(1);
        let header = block.header();

        assert_matches!(
            validate_block_post_execution(
                header,
                block.receipts(),
                header.gas_used + 1,
                header.state_root,
            ),
            Err(ConsensusError::BlockGasUsedDiff { .. })
        );

        assert_matches!(
            validate_block_post_execution(
                header,
                block.receipts(),
                header.gas_used,
                B256::repeat_byte(0xde),
            ),
            Err(ConsensusError::StateRootDiff { .. })
        );

        // Dropping receipts breaks the bloom before the receipt root check.
        if !block.receipts().is_empty() {
            let result = validate_block_post_execution(
                header,
                &[],
                header.gas_used,
                header.state_root,
            );
            assert_matches!(
                result,
                Err(ConsensusError::BloomDiff { .. } | ConsensusError::ReceiptRootDiff { .. })
            );
        }
    }
}
