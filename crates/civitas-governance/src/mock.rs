//! In-memory chain for tests and local runs.

use crate::chain::{ChainClient, ChainError, ChainResult, Receipt, ReceiptStatus, TransactionRequest};
use async_trait::async_trait;
use civitas_types::Hash;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Scriptable [`ChainClient`].
///
/// Transactions are accepted and left without a receipt until the test
/// confirms or reverts them, unless `auto_confirm` is on.
#[derive(Clone)]
pub struct MockChain {
    state: Arc<Mutex<MockState>>,
}

struct MockState {
    time: u64,
    block_number: u64,
    submitted: Vec<(Hash, TransactionRequest)>,
    receipts: HashMap<Hash, Receipt>,
    fail_submissions: u32,
    auto_confirm: bool,
    gas_per_tx: u64,
    submit_delay: Option<Duration>,
}

impl MockChain {
    pub fn new(time: u64) -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                time,
                block_number: 1,
                submitted: Vec::new(),
                receipts: HashMap::new(),
                fail_submissions: 0,
                auto_confirm: false,
                gas_per_tx: 0,
                submit_delay: None,
            })),
        }
    }

    pub fn set_time(&self, time: u64) {
        self.state.lock().time = time;
    }

    pub fn advance(&self, seconds: u64) {
        let mut s = self.state.lock();
        s.time += seconds;
        s.block_number += 1;
    }

    pub fn time(&self) -> u64 {
        self.state.lock().time
    }

    /// Fail the next `n` submissions with a transport error.
    pub fn fail_next_submissions(&self, n: u32) {
        self.state.lock().fail_submissions = n;
    }

    /// Mine every accepted transaction immediately.
    pub fn set_auto_confirm(&self, enabled: bool) {
        self.state.lock().auto_confirm = enabled;
    }

    /// Fixed gas reported for confirmed transactions; 0 means the request's limit.
    pub fn set_gas_used(&self, gas: u64) {
        self.state.lock().gas_per_tx = gas;
    }

    /// Hold every submission for `delay` before answering.
    pub fn set_submit_delay(&self, delay: Option<Duration>) {
        self.state.lock().submit_delay = delay;
    }

    pub fn submitted(&self) -> Vec<(Hash, TransactionRequest)> {
        self.state.lock().submitted.clone()
    }

    pub fn confirm(&self, tx_hash: &Hash) {
        self.finish(tx_hash, ReceiptStatus::Success);
    }

    pub fn revert(&self, tx_hash: &Hash) {
        self.finish(tx_hash, ReceiptStatus::Reverted);
    }

    fn finish(&self, tx_hash: &Hash, status: ReceiptStatus) {
        let mut s = self.state.lock();
        let gas_limit = s
            .submitted
            .iter()
            .find(|(h, _)| h == tx_hash)
            .map(|(_, r)| r.gas_limit)
            .unwrap_or(0);
        let gas_used = if s.gas_per_tx > 0 { s.gas_per_tx } else { gas_limit };
        let block_number = s.block_number;
        s.receipts.insert(
            *tx_hash,
            Receipt {
                status,
                block_number,
                gas_used,
            },
        );
    }
}

#[async_trait]
impl ChainClient for MockChain {
    async fn submit_transaction(&self, request: &TransactionRequest) -> ChainResult<Hash> {
        let delay = self.state.lock().submit_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut s = self.state.lock();
        if s.fail_submissions > 0 {
            s.fail_submissions -= 1;
            return Err(ChainError::Transport("mock submission failure".into()));
        }

        let seq = s.submitted.len() as u64;
        let hash = Hash::compute_multi(&[&seq.to_be_bytes(), request.to.as_bytes(), &request.data]);
        s.submitted.push((hash, request.clone()));
        let auto_confirm = s.auto_confirm;
        drop(s);

        if auto_confirm {
            self.confirm(&hash);
        }
        Ok(hash)
    }

    async fn get_receipt(&self, tx_hash: &Hash) -> ChainResult<Option<Receipt>> {
        Ok(self.state.lock().receipts.get(tx_hash).copied())
    }

    async fn current_block_time(&self) -> ChainResult<u64> {
        Ok(self.state.lock().time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use civitas_types::Address;

    fn request() -> TransactionRequest {
        TransactionRequest {
            from: Address::ZERO,
            to: Address::from_bytes([1; 20]),
            data: vec![1, 2, 3],
            value: 0,
            gas_limit: 100_000,
            gas_price: 1,
        }
    }

    #[tokio::test]
    async fn test_submit_then_confirm() {
        let chain = MockChain::new(1_000);
        let hash = chain.submit_transaction(&request()).await.unwrap();
        assert_eq!(chain.get_receipt(&hash).await.unwrap(), None);

        chain.confirm(&hash);
        let receipt = chain.get_receipt(&hash).await.unwrap().unwrap();
        assert_eq!(receipt.status, ReceiptStatus::Success);
        assert_eq!(receipt.gas_used, 100_000);
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let chain = MockChain::new(0);
        chain.fail_next_submissions(1);
        assert!(chain.submit_transaction(&request()).await.is_err());
        assert!(chain.submit_transaction(&request()).await.is_ok());
    }

    #[tokio::test]
    async fn test_hashes_are_unique_per_submission() {
        let chain = MockChain::new(0);
        let a = chain.submit_transaction(&request()).await.unwrap();
        let b = chain.submit_transaction(&request()).await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_time_control() {
        let chain = MockChain::new(50);
        chain.advance(10);
        assert_eq!(chain.current_block_time().await.unwrap(), 60);
    }
}
