use alloy_primitives::{Bloom, Log};
use alloy_rlp::{RlpDecodable, RlpEncodable};

/// Receipt containing the result of one transaction's execution.
#[derive(Clone, Debug, Default, PartialEq, Eq, RlpDecodable, RlpEncodable)]
pub struct Receipt {
    /// Whether the transaction executed successfully.
    pub success: bool,
    /// Gas used by this and all preceding transactions in the block.
    pub cumulative_gas_used: u64,
    /// Bloom over the logs emitted by this transaction.
    pub bloom: Bloom,
    /// Logs emitted during execution.
    pub logs: Vec<Log>,
}

impl Receipt {
    /// Recompute the bloom from the receipt's logs.
    pub fn bloom_slow(&self) -> Bloom {
        let mut bloom = Bloom::ZERO;
        for log in &self.logs {
            bloom.accrue_log(log);
        }
        bloom
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{Address, LogData, B256};

    #[test]
    fn bloom_covers_address_and_topics() {
        let log = Log {
            address: Address::repeat_byte(9),
            data: LogData::new_unchecked(vec![B256::repeat_byte(3)], Default::default()),
        };
        let receipt =
            Receipt { success: true, cumulative_gas_used: 21_000, bloom: Bloom::ZERO, logs: vec![log] };

        let bloom = receipt.bloom_slow();
        assert_ne!(bloom, Bloom::ZERO);

        let mut expected = Bloom::ZERO;
        expected.accrue(alloy_primitives::BloomInput::Raw(Address::repeat_byte(9).as_slice()));
        expected.accrue(alloy_primitives::BloomInput::Raw(B256::repeat_byte(3).as_slice()));
        assert_eq!(bloom, expected);
    }
}
