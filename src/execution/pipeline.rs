use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::nonce::NonceManager;
use super::submitter::TransactionSubmitter;
use super::transaction_builder::{Credential, TransactionBuilder};
use crate::blockchain::{ChainClient, ConfirmedTransaction, ContractCall};
use crate::types::TxError;

/// 빌드 → 서명 → 제출 → 확정 파이프라인
///
/// 발신자 잠금은 nonce 조회부터 제출 완료까지 유지되고, 영수증 대기는
/// 잠금 밖에서 진행된다.
pub struct TransactionPipeline {
    chain: Arc<dyn ChainClient>,
    builder: TransactionBuilder,
    submitter: TransactionSubmitter,
    nonces: NonceManager,
}

impl TransactionPipeline {
    pub fn new(
        chain: Arc<dyn ChainClient>,
        chain_id: u64,
        receipt_timeout: Duration,
        poll_interval: Duration,
    ) -> Self {
        Self {
            builder: TransactionBuilder::new(chain.clone(), chain_id),
            submitter: TransactionSubmitter::new(chain.clone(), receipt_timeout, poll_interval),
            nonces: NonceManager::new(),
            chain,
        }
    }

    pub fn with_gas_buffer(mut self, pct: u64) -> Self {
        self.builder = self.builder.with_gas_buffer(pct);
        self
    }

    pub async fn execute(
        &self,
        call: ContractCall,
        credential: &Credential,
    ) -> Result<ConfirmedTransaction, TxError> {
        let from = credential.address();
        let function = call.function;

        let tx_hash = {
            let mut lease = self.nonces.lease(from).await;
            let chain_nonce = self.chain.get_nonce(from).await.map_err(TxError::from)?;
            let nonce = lease.reserve(chain_nonce);

            let unsigned = self.builder.build(call, from, nonce).await?;
            let signed = TransactionBuilder::sign(&unsigned, credential)?;

            match self.submitter.submit(&signed).await {
                Ok(hash) => {
                    lease.commit(nonce);
                    hash
                }
                Err(e) => {
                    warn!("❌ {} 제출 실패 (from {:?}, nonce {}): {}", function, from, nonce, e);
                    lease.reset();
                    return Err(e);
                }
            }
        };
        debug!("🔓 nonce 잠금 해제: {:?}", from);

        match self.submitter.confirm(tx_hash).await {
            Ok(confirmed) => {
                info!(
                    function,
                    tx_hash = ?confirmed.tx_hash(),
                    success = confirmed.is_success(),
                    "🧾 트랜잭션 처리 완료"
                );
                Ok(confirmed)
            }
            Err(TxError::NotFound(hash)) => {
                // 사라진 트랜잭션의 nonce는 다시 사용 가능
                self.nonces.reset(from).await;
                Err(TxError::NotFound(hash))
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::{LoanContract, LoanContractAbi};
    use crate::mocks::{MockChainClient, ScriptedOutcome, TEST_PRIVATE_KEYS};
    use ethers::types::{Address, U256};
    use futures::future::join_all;
    use std::collections::HashSet;
    use tokio::sync::Barrier;

    const CHAIN_ID: u64 = 1337;

    fn contract() -> LoanContract {
        LoanContract::new(Address::repeat_byte(0x42), LoanContractAbi::builtin().unwrap())
    }

    fn pipeline(chain: Arc<MockChainClient>) -> TransactionPipeline {
        TransactionPipeline::new(chain, CHAIN_ID, Duration::from_millis(100), Duration::from_millis(5))
    }

    #[tokio::test]
    async fn test_successful_execution_returns_normalized_receipt() {
        let chain = Arc::new(MockChainClient::new(CHAIN_ID));
        let credential = Credential::from_private_key(TEST_PRIVATE_KEYS[0]).unwrap();

        let confirmed = pipeline(chain.clone())
            .execute(contract().approve_request(U256::from(7u64)).unwrap(), &credential)
            .await
            .unwrap();

        assert!(confirmed.is_success());
        assert_eq!(confirmed.normalized["status"], 1);
        let submitted = chain.submitted();
        assert_eq!(submitted.len(), 1);
        assert_eq!(submitted[0].from, credential.address());
        assert_eq!(submitted[0].nonce, U256::zero());
    }

    #[tokio::test]
    async fn test_revert_is_returned_not_raised() {
        let chain = Arc::new(MockChainClient::new(CHAIN_ID));
        chain.push_outcome(ScriptedOutcome::Reverted);
        let credential = Credential::from_private_key(TEST_PRIVATE_KEYS[0]).unwrap();

        let confirmed = pipeline(chain)
            .execute(contract().reject_request(U256::from(1u64)).unwrap(), &credential)
            .await
            .unwrap();
        assert!(!confirmed.is_success());
        assert_eq!(confirmed.normalized["status"], 0);
    }

    #[tokio::test]
    async fn test_dropped_and_unmined_transactions() {
        let chain = Arc::new(MockChainClient::new(CHAIN_ID));
        let credential = Credential::from_private_key(TEST_PRIVATE_KEYS[0]).unwrap();
        let pipeline = pipeline(chain.clone());

        chain.push_outcome(ScriptedOutcome::Dropped);
        let err = pipeline
            .execute(contract().deposit_funds(U256::one()).unwrap(), &credential)
            .await
            .unwrap_err();
        assert!(matches!(err, TxError::NotFound(_)));

        // 사라진 트랜잭션의 nonce가 재사용됨
        chain.push_outcome(ScriptedOutcome::NeverMined);
        let err = pipeline
            .execute(contract().deposit_funds(U256::one()).unwrap(), &credential)
            .await
            .unwrap_err();
        assert!(err.is_outcome_unknown());
        assert_eq!(chain.submitted()[1].nonce, U256::zero());
    }

    #[tokio::test]
    async fn test_late_propagating_transaction_still_confirms() {
        let chain = Arc::new(MockChainClient::new(CHAIN_ID));
        let credential = Credential::from_private_key(TEST_PRIVATE_KEYS[0]).unwrap();
        chain.hide_next_submission(crate::constants::DROPPED_TX_MISSES + 2);

        let confirmed = pipeline(chain.clone())
            .execute(contract().deposit_funds(U256::one()).unwrap(), &credential)
            .await
            .unwrap();
        assert!(confirmed.is_success());
        assert_eq!(chain.submitted().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_same_sender_gets_distinct_nonces() {
        let chain = Arc::new(MockChainClient::new(CHAIN_ID));
        let pipeline = Arc::new(pipeline(chain.clone()));
        let credential = Credential::from_private_key(TEST_PRIVATE_KEYS[0]).unwrap();

        let handles = (0..8u64).map(|i| {
            let pipeline = pipeline.clone();
            let credential = credential.clone();
            tokio::spawn(async move {
                let call = contract().approve_request(U256::from(i)).unwrap();
                pipeline.execute(call, &credential).await
            })
        });
        for result in join_all(handles).await {
            assert!(result.unwrap().unwrap().is_success());
        }

        let nonces: HashSet<U256> = chain.submitted().iter().map(|t| t.nonce).collect();
        assert_eq!(nonces.len(), 8);
        assert_eq!(nonces, (0..8u64).map(U256::from).collect());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_unserialized_nonce_reads_collide() {
        let chain = Arc::new(MockChainClient::new(CHAIN_ID));
        chain.set_nonce_barrier(Arc::new(Barrier::new(2)));
        let credential = Credential::from_private_key(TEST_PRIVATE_KEYS[0]).unwrap();

        // 잠금 없이 nonce 조회 → 빌드 → 제출
        let mut handles = Vec::new();
        for i in 0..2u64 {
            let chain = chain.clone();
            let credential = credential.clone();
            handles.push(tokio::spawn(async move {
                let builder = TransactionBuilder::new(chain.clone(), CHAIN_ID);
                let submitter =
                    TransactionSubmitter::new(chain.clone(), Duration::from_millis(50), Duration::from_millis(5));
                let nonce = chain.get_nonce(credential.address()).await.unwrap();
                let call = contract().approve_request(U256::from(i)).unwrap();
                let unsigned = builder.build(call, credential.address(), nonce).await.unwrap();
                let signed = TransactionBuilder::sign(&unsigned, &credential).unwrap();
                submitter.submit(&signed).await
            }));
        }

        let mut outcomes = Vec::new();
        for handle in handles {
            outcomes.push(handle.await.unwrap());
        }
        let failures: Vec<_> = outcomes.iter().filter_map(|o| o.as_ref().err()).collect();
        assert_eq!(failures.len(), 1);
        assert!(matches!(failures[0], TxError::Submission(msg) if msg.contains("nonce too low")));
    }

    #[tokio::test]
    async fn test_chain_id_mismatch_rejected_at_submission() {
        let chain = Arc::new(MockChainClient::new(1));
        let credential = Credential::from_private_key(TEST_PRIVATE_KEYS[1]).unwrap();
        // 체인 ID 불일치로 제출 거부
        let wrong_chain = TransactionPipeline::new(
            chain.clone(),
            CHAIN_ID,
            Duration::from_millis(50),
            Duration::from_millis(5),
        );
        let err = wrong_chain
            .execute(contract().withdraw_money(U256::one()).unwrap(), &credential)
            .await
            .unwrap_err();
        assert!(matches!(err, TxError::Submission(_)));
        assert!(chain.submitted().is_empty());
    }
}
