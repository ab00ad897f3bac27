use std::sync::Arc;

use dashmap::DashMap;
use ethers::types::{Address, U256};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, warn};

/// 발신자별 nonce 직렬화
///
/// 같은 주소의 트랜잭션은 nonce 확보부터 제출까지 잠금 하나를 공유한다.
/// 서로 다른 주소는 독립적으로 진행된다.
#[derive(Clone, Default)]
pub struct NonceManager {
    locks: Arc<DashMap<Address, Arc<Mutex<Option<U256>>>>>,
}

impl NonceManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, address: Address) -> Arc<Mutex<Option<U256>>> {
        self.locks
            .entry(address)
            .or_insert_with(|| Arc::new(Mutex::new(None)))
            .clone()
    }

    /// 발신자 잠금 획득 (해제는 lease drop 시점)
    pub async fn lease(&self, address: Address) -> NonceLease {
        let guard = self.slot(address).lock_owned().await;
        debug!("🔒 nonce 잠금 획득: {:?}", address);
        NonceLease { address, guard }
    }

    /// 캐시된 nonce를 버려 다음 호출이 체인에서 다시 읽도록 함
    pub async fn reset(&self, address: Address) {
        let slot = self.slot(address);
        let mut cached = slot.lock().await;
        if cached.take().is_some() {
            warn!("🔄 nonce 캐시 초기화: {:?}", address);
        }
    }
}

/// 잠금을 쥔 동안만 유효한 nonce 핸들
pub struct NonceLease {
    address: Address,
    guard: OwnedMutexGuard<Option<U256>>,
}

impl NonceLease {
    pub fn address(&self) -> Address {
        self.address
    }

    /// 체인의 pending nonce와 로컬 캐시 중 큰 값
    pub fn reserve(&self, chain_nonce: U256) -> U256 {
        match *self.guard {
            Some(cached) if cached > chain_nonce => cached,
            _ => chain_nonce,
        }
    }

    /// 제출 성공 후 다음 nonce 기록
    pub fn commit(&mut self, used: U256) {
        *self.guard = Some(used + U256::one());
    }

    /// 제출 실패 시 캐시 폐기
    pub fn reset(&mut self) {
        *self.guard = None;
    }
}
