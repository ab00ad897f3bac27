use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ethers::{
    providers::{Http, Middleware, Provider, ProviderError, RpcError},
    types::{
        transaction::eip2718::TypedTransaction, Address, BlockId, BlockNumber, Bytes, H256, U256,
    },
};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::receipt::Receipt;
use crate::constants::DROPPED_TX_MISSES;

/// 체인 RPC 에러
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ChainError {
    #[error("RPC endpoint unreachable: {0}")]
    Connectivity(String),

    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("Transaction not found: {0:?}")]
    NotFound(H256),

    #[error("Receipt for {tx_hash:?} not available after {waited_ms}ms")]
    Timeout { tx_hash: H256, waited_ms: u64 },

    #[error("Malformed RPC response: {0}")]
    Decode(String),
}

impl From<ProviderError> for ChainError {
    fn from(err: ProviderError) -> Self {
        if let Some(rpc) = err.as_error_response() {
            return ChainError::Rpc { code: rpc.code, message: rpc.message.clone() };
        }
        if let Some(serde_err) = err.as_serde_error() {
            return ChainError::Decode(serde_err.to_string());
        }
        ChainError::Connectivity(err.to_string())
    }
}

/// 트랜잭션 파이프라인이 사용하는 체인 접근 계층
#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn chain_id(&self) -> Result<u64, ChainError>;

    /// pending 태그 기준 nonce (mempool 대기 트랜잭션 포함)
    async fn get_nonce(&self, address: Address) -> Result<U256, ChainError>;

    async fn estimate_gas(&self, tx: &TypedTransaction) -> Result<U256, ChainError>;

    async fn get_gas_price(&self) -> Result<U256, ChainError>;

    /// 서명된 raw 트랜잭션 제출
    async fn send_raw_transaction(&self, raw: Bytes) -> Result<H256, ChainError>;

    /// 블록에 포함된 트랜잭션의 영수증. 아직 포함되지 않았으면 `NotFound`
    async fn get_receipt(&self, tx_hash: H256) -> Result<Receipt, ChainError>;

    /// 노드가 트랜잭션을 알고 있는지 (mempool 또는 블록)
    async fn is_known(&self, tx_hash: H256) -> Result<bool, ChainError>;

    /// 영수증이 나올 때까지 폴링
    ///
    /// 한 번 보였던 트랜잭션이 `DROPPED_TX_MISSES`회 연속으로 조회되지 않으면
    /// `NotFound`, 기한을 넘기면 `Timeout`. 아직 전파되지 않은 트랜잭션은
    /// 기한까지 계속 기다린다.
    async fn await_receipt(
        &self,
        tx_hash: H256,
        timeout: Duration,
        poll_interval: Duration,
    ) -> Result<Receipt, ChainError> {
        let started = Instant::now();
        let deadline = started + timeout;
        let mut seen = false;
        let mut misses = 0u32;

        loop {
            match self.get_receipt(tx_hash).await {
                Ok(receipt) => return Ok(receipt),
                Err(ChainError::NotFound(_)) => match self.is_known(tx_hash).await {
                    Ok(true) => {
                        seen = true;
                        misses = 0;
                    }
                    Ok(false) if seen => {
                        misses += 1;
                        if misses >= DROPPED_TX_MISSES {
                            warn!("🕳️ 트랜잭션이 노드에서 사라짐: {:?}", tx_hash);
                            return Err(ChainError::NotFound(tx_hash));
                        }
                        debug!("트랜잭션 조회 안 됨 ({}/{}): {:?}", misses, DROPPED_TX_MISSES, tx_hash);
                    }
                    Ok(false) => {
                        debug!("트랜잭션 아직 전파되지 않음: {:?}", tx_hash);
                    }
                    Err(ChainError::Connectivity(e)) => {
                        debug!("트랜잭션 조회 실패, 재시도: {}", e);
                    }
                    Err(e) => return Err(e),
                },
                // 폴링 중 일시적인 연결 끊김은 기한 내에서 재시도
                Err(ChainError::Connectivity(e)) => {
                    debug!("영수증 조회 실패, 재시도: {}", e);
                }
                Err(e) => return Err(e),
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(ChainError::Timeout {
                    tx_hash,
                    waited_ms: now.duration_since(started).as_millis() as u64,
                });
            }
            tokio::time::sleep(poll_interval.min(deadline - now)).await;
        }
    }
}

/// ethers HTTP Provider 기반 체인 클라이언트
pub struct EthersChainClient {
    provider: Arc<Provider<Http>>,
}

impl EthersChainClient {
    /// RPC URL로 클라이언트 생성 (연결은 첫 호출 시점에 확인)
    pub fn new(rpc_url: &str) -> Result<Self, ChainError> {
        info!("🔌 블록체인 RPC 클라이언트 초기화: {}", rpc_url);
        let provider = Provider::<Http>::try_from(rpc_url)
            .map_err(|e| ChainError::Connectivity(format!("invalid RPC url {}: {}", rpc_url, e)))?;
        Ok(Self { provider: Arc::new(provider) })
    }

    /// 설정된 체인 ID와 노드의 체인 ID가 일치하는지 확인
    pub async fn verify_chain_id(&self, expected: u64) -> Result<(), ChainError> {
        let actual = self.chain_id().await?;
        if actual != expected {
            warn!("⚠️ 체인 ID 불일치: 설정={}, 노드={}", expected, actual);
            return Err(ChainError::Rpc {
                code: -32000,
                message: format!("chain id mismatch: configured {}, node reports {}", expected, actual),
            });
        }
        info!("🔗 체인 ID: {}", actual);
        Ok(())
    }
}

#[async_trait]
impl ChainClient for EthersChainClient {
    async fn chain_id(&self) -> Result<u64, ChainError> {
        Ok(self.provider.get_chainid().await?.as_u64())
    }

    async fn get_nonce(&self, address: Address) -> Result<U256, ChainError> {
        let nonce = self
            .provider
            .get_transaction_count(address, Some(BlockId::Number(BlockNumber::Pending)))
            .await?;
        debug!("🔢 nonce 조회: {:?} -> {}", address, nonce);
        Ok(nonce)
    }

    async fn estimate_gas(&self, tx: &TypedTransaction) -> Result<U256, ChainError> {
        let gas = self.provider.estimate_gas(tx, None).await?;
        debug!("⛽ 가스 추정: {} gas", gas);
        Ok(gas)
    }

    async fn get_gas_price(&self) -> Result<U256, ChainError> {
        Ok(self.provider.get_gas_price().await?)
    }

    async fn send_raw_transaction(&self, raw: Bytes) -> Result<H256, ChainError> {
        let pending = self.provider.send_raw_transaction(raw).await?;
        Ok(pending.tx_hash())
    }

    async fn get_receipt(&self, tx_hash: H256) -> Result<Receipt, ChainError> {
        match self.provider.get_transaction_receipt(tx_hash).await? {
            Some(receipt) => Ok(Receipt::from(receipt)),
            None => Err(ChainError::NotFound(tx_hash)),
        }
    }

    async fn is_known(&self, tx_hash: H256) -> Result<bool, ChainError> {
        Ok(self.provider.get_transaction(tx_hash).await?.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::MockChainClient;

    #[test]
    fn test_provider_error_classification() {
        let err = ChainError::from(ProviderError::CustomError("connection refused".into()));
        assert!(matches!(err, ChainError::Connectivity(_)));

        let serde_err = serde_json::from_str::<u64>("not json").unwrap_err();
        let err = ChainError::from(ProviderError::SerdeJson(serde_err));
        assert!(matches!(err, ChainError::Decode(_)));
    }

    #[test]
    fn test_invalid_rpc_url_rejected() {
        assert!(matches!(EthersChainClient::new("not a url"), Err(ChainError::Connectivity(_))));
        assert!(EthersChainClient::new("http://127.0.0.1:7545").is_ok());
    }

    #[tokio::test]
    async fn test_await_receipt_reports_dropped_transaction() {
        let chain = MockChainClient::new(1337);
        let hash = H256::repeat_byte(9);
        // 한 번 보인 뒤 사라짐
        chain.script_visibility(hash, vec![true]);

        let started = Instant::now();
        let result = chain
            .await_receipt(hash, Duration::from_secs(5), Duration::from_millis(5))
            .await;
        assert_eq!(result, Err(ChainError::NotFound(hash)));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_await_receipt_keeps_waiting_for_unseen_transaction() {
        let chain = MockChainClient::new(1337);
        let hash = H256::repeat_byte(8);

        // 한 번도 보이지 않은 트랜잭션은 drop으로 보지 않음
        let result = chain
            .await_receipt(hash, Duration::from_millis(30), Duration::from_millis(5))
            .await;
        assert!(matches!(result, Err(ChainError::Timeout { tx_hash, .. }) if tx_hash == hash));
    }

    #[tokio::test]
    async fn test_await_receipt_tolerates_brief_misses() {
        let chain = MockChainClient::new(1337);
        let hash = H256::repeat_byte(7);
        chain.mine(hash);
        // 연속 실패가 임계값에 닿기 전에 다시 보이면 카운트 초기화
        chain.script_visibility(hash, vec![true, false, false, true, false, false]);

        let receipt = chain
            .await_receipt(hash, Duration::from_secs(5), Duration::from_millis(1))
            .await
            .unwrap();
        assert_eq!(receipt.tx_hash, hash);
    }

    #[tokio::test]
    async fn test_await_receipt_times_out_on_pending_transaction() {
        let chain = MockChainClient::new(1337);
        let hash = H256::repeat_byte(3);
        chain.mark_pending(hash);

        let result = chain
            .await_receipt(hash, Duration::from_millis(30), Duration::from_millis(5))
            .await;
        match result {
            Err(ChainError::Timeout { tx_hash, waited_ms }) => {
                assert_eq!(tx_hash, hash);
                assert!(waited_ms >= 30);
            }
            other => panic!("expected timeout, got {:?}", other),
        }
    }
}
