use std::sync::Arc;
use std::time::Duration;

use ethers::types::H256;
use tracing::{debug, info, warn};

use super::transaction_builder::SignedTransaction;
use crate::blockchain::{ChainClient, ChainError, ConfirmedTransaction};
use crate::types::TxError;

/// 서명된 트랜잭션 제출 및 확정 대기
pub struct TransactionSubmitter {
    chain: Arc<dyn ChainClient>,
    receipt_timeout: Duration,
    poll_interval: Duration,
}

impl TransactionSubmitter {
    pub fn new(chain: Arc<dyn ChainClient>, receipt_timeout: Duration, poll_interval: Duration) -> Self {
        Self { chain, receipt_timeout, poll_interval }
    }

    pub async fn submit(&self, signed: &SignedTransaction) -> Result<H256, TxError> {
        let tx_hash = self
            .chain
            .send_raw_transaction(signed.raw.clone())
            .await
            .map_err(|e| match e {
                ChainError::Connectivity(msg) => TxError::Connectivity(msg),
                ChainError::Rpc { message, .. } => TxError::Submission(message),
                other => TxError::Submission(other.to_string()),
            })?;

        if tx_hash != signed.hash {
            warn!("⚠️ 노드가 반환한 해시가 로컬 해시와 다름: {:?} != {:?}", tx_hash, signed.hash);
        }
        info!("📤 트랜잭션 제출: {:?} (from: {:?}, nonce: {})", tx_hash, signed.from, signed.nonce);
        Ok(tx_hash)
    }

    /// 영수증이 나올 때까지 대기 후 정규화
    pub async fn confirm(&self, tx_hash: H256) -> Result<ConfirmedTransaction, TxError> {
        debug!("⏳ 영수증 대기: {:?} (timeout {:?})", tx_hash, self.receipt_timeout);
        let receipt = self
            .chain
            .await_receipt(tx_hash, self.receipt_timeout, self.poll_interval)
            .await
            .map_err(|e| match e {
                ChainError::NotFound(hash) => TxError::NotFound(format!("{:?}", hash)),
                ChainError::Timeout { tx_hash, waited_ms } => {
                    warn!("⏰ 영수증 대기 시간 초과: {:?} ({}ms), 결과 미확정", tx_hash, waited_ms);
                    TxError::Timeout { tx_hash, waited_ms }
                }
                other => TxError::from(other),
            })?;

        let confirmed = ConfirmedTransaction::new(receipt);
        if confirmed.is_success() {
            info!("✅ 트랜잭션 확정: {:?} (block {:?})", tx_hash, confirmed.receipt.block_number);
        } else {
            warn!("❌ 트랜잭션 revert: {:?} (block {:?})", tx_hash, confirmed.receipt.block_number);
        }
        Ok(confirmed)
    }
}
