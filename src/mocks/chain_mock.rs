use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use ethers::{
    abi::Token,
    types::{transaction::eip2718::TypedTransaction, Address, Bytes, H256, U256},
    utils::{keccak256, rlp::Rlp},
};
use tokio::sync::Barrier;
use tracing::debug;

use crate::blockchain::events::LOAN_REQUESTED_TOPIC;
use crate::blockchain::{ChainClient, ChainError, LogEntry, Receipt, ReceiptStatus};

/// 다음 제출 트랜잭션에 적용할 결과
#[derive(Debug, Clone)]
pub enum ScriptedOutcome {
    /// 블록 포함, status=1
    Success { logs: Vec<LogEntry> },
    /// 블록 포함, status=0
    Reverted,
    /// 제출은 받았지만 한 번 조회된 뒤 노드가 잊어버림
    Dropped,
    /// mempool에 계속 머무름
    NeverMined,
}

/// 모의 체인이 받은 트랜잭션
#[derive(Debug, Clone, PartialEq)]
pub struct SubmittedTransaction {
    pub hash: H256,
    pub from: Address,
    pub nonce: U256,
    pub to: Option<Address>,
    pub data: Bytes,
    pub value: U256,
}

#[derive(Default)]
struct ChainState {
    next_nonce: HashMap<Address, U256>,
    receipts: HashMap<H256, Receipt>,
    pending: HashSet<H256>,
    script: VecDeque<ScriptedOutcome>,
    submitted: Vec<SubmittedTransaction>,
    block_number: u64,
    unreachable: bool,
    estimate_revert: Option<String>,
    /// 해시별 `is_known` 응답 대본. 남아 있는 동안 영수증은 숨김
    visibility: HashMap<H256, VecDeque<bool>>,
    hide_next: Option<u32>,
}

/// 테스트용 체인
///
/// 제출된 raw 트랜잭션을 RLP 디코딩해 서명자를 복원하고, 발신자별 nonce
/// 순서를 실제 노드처럼 강제한다.
pub struct MockChainClient {
    chain_id: u64,
    gas_estimate: U256,
    gas_price: U256,
    state: Mutex<ChainState>,
    nonce_barrier: Mutex<Option<Arc<Barrier>>>,
}

impl MockChainClient {
    pub fn new(chain_id: u64) -> Self {
        Self {
            chain_id,
            gas_estimate: U256::from(50_000u64),
            gas_price: U256::from(1_000_000_000u64),
            state: Mutex::new(ChainState::default()),
            nonce_barrier: Mutex::new(None),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, ChainState> {
        // 테스트 중 패닉으로 poison된 경우에도 상태는 계속 사용
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn gas_estimate(&self) -> U256 {
        self.gas_estimate
    }

    pub fn push_outcome(&self, outcome: ScriptedOutcome) {
        self.state().script.push_back(outcome);
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.state().unreachable = unreachable;
    }

    /// 이후 가스 추정을 revert로 응답
    pub fn revert_estimates(&self, reason: &str) {
        self.state().estimate_revert = Some(reason.to_string());
    }

    pub fn mark_pending(&self, hash: H256) {
        self.state().pending.insert(hash);
    }

    /// 제출 없이 성공 영수증 등록
    pub fn mine(&self, hash: H256) {
        let mut state = self.state();
        state.block_number += 1;
        let receipt = self.receipt(hash, ReceiptStatus::Success, state.block_number, Address::zero(), None, Vec::new());
        state.receipts.insert(hash, receipt);
    }

    /// 이후 `is_known` 호출에 순서대로 응답할 값 지정
    pub fn script_visibility(&self, hash: H256, answers: Vec<bool>) {
        self.state().visibility.insert(hash, answers.into());
    }

    /// 다음 제출 트랜잭션을 처음 `polls`번의 조회 동안 노드에 보이지 않게 함
    pub fn hide_next_submission(&self, polls: u32) {
        self.state().hide_next = Some(polls);
    }

    /// nonce 조회 직후 모든 호출자가 모일 때까지 대기시킴
    pub fn set_nonce_barrier(&self, barrier: Arc<Barrier>) {
        *self.nonce_barrier.lock().unwrap_or_else(|p| p.into_inner()) = Some(barrier);
    }

    pub fn submitted(&self) -> Vec<SubmittedTransaction> {
        self.state().submitted.clone()
    }

    fn receipt(
        &self,
        hash: H256,
        status: ReceiptStatus,
        block_number: u64,
        from: Address,
        to: Option<Address>,
        logs: Vec<LogEntry>,
    ) -> Receipt {
        Receipt {
            tx_hash: hash,
            status,
            block_number: Some(block_number),
            block_hash: Some(H256::from_low_u64_be(block_number)),
            from,
            to,
            gas_used: Some(self.gas_estimate),
            cumulative_gas_used: self.gas_estimate,
            effective_gas_price: Some(self.gas_price),
            contract_address: None,
            logs,
        }
    }

    fn ensure_reachable(&self) -> Result<(), ChainError> {
        if self.state().unreachable {
            return Err(ChainError::Connectivity("connection refused".to_string()));
        }
        Ok(())
    }
}

/// 서명된 raw 트랜잭션 디코딩 및 서명자 복원
pub fn decode_raw(raw: &Bytes) -> Result<(TypedTransaction, Address), String> {
    let rlp = Rlp::new(raw.as_ref());
    let (tx, signature) = TypedTransaction::decode_signed(&rlp).map_err(|e| e.to_string())?;
    let from = signature.recover(tx.sighash()).map_err(|e| e.to_string())?;
    Ok((tx, from))
}

/// LoanRequested 로그 생성 (모든 파라미터 non-indexed)
pub fn loan_requested_log(
    contract: Address,
    loan_id: u64,
    borrower: Address,
    amount: U256,
    duration: u64,
    interest_rate: u64,
) -> LogEntry {
    let data = ethers::abi::encode(&[
        Token::Uint(U256::from(loan_id)),
        Token::Address(borrower),
        Token::Uint(amount),
        Token::Uint(U256::from(duration)),
        Token::Uint(U256::from(interest_rate)),
    ]);
    LogEntry { address: contract, topics: vec![*LOAN_REQUESTED_TOPIC], data: Bytes::from(data), log_index: None }
}

fn rpc_error(message: &str) -> ChainError {
    ChainError::Rpc { code: -32000, message: message.to_string() }
}

#[async_trait]
impl ChainClient for MockChainClient {
    async fn chain_id(&self) -> Result<u64, ChainError> {
        self.ensure_reachable()?;
        Ok(self.chain_id)
    }

    async fn get_nonce(&self, address: Address) -> Result<U256, ChainError> {
        self.ensure_reachable()?;
        let nonce = self.state().next_nonce.get(&address).copied().unwrap_or_default();

        let barrier = self.nonce_barrier.lock().unwrap_or_else(|p| p.into_inner()).clone();
        if let Some(barrier) = barrier {
            barrier.wait().await;
        }
        tokio::task::yield_now().await;
        Ok(nonce)
    }

    async fn estimate_gas(&self, _tx: &TypedTransaction) -> Result<U256, ChainError> {
        self.ensure_reachable()?;
        if let Some(reason) = self.state().estimate_revert.clone() {
            return Err(ChainError::Rpc { code: 3, message: reason });
        }
        Ok(self.gas_estimate)
    }

    async fn get_gas_price(&self) -> Result<U256, ChainError> {
        self.ensure_reachable()?;
        Ok(self.gas_price)
    }

    async fn send_raw_transaction(&self, raw: Bytes) -> Result<H256, ChainError> {
        self.ensure_reachable()?;
        let (tx, from) = decode_raw(&raw).map_err(|e| rpc_error(&format!("invalid transaction: {}", e)))?;

        if tx.chain_id().map(|id| id.as_u64()) != Some(self.chain_id) {
            return Err(rpc_error("invalid chain id"));
        }
        let nonce = tx.nonce().copied().unwrap_or_default();
        let hash = H256::from(keccak256(&raw));

        let mut state = self.state();
        let expected = state.next_nonce.get(&from).copied().unwrap_or_default();
        if nonce < expected {
            return Err(rpc_error("nonce too low"));
        }
        if nonce > expected {
            return Err(rpc_error("nonce too high"));
        }

        let outcome = state.script.pop_front().unwrap_or(ScriptedOutcome::Success { logs: Vec::new() });
        debug!("🎭 [MOCK] tx {:?} from {:?} nonce {} -> {:?}", hash, from, nonce, outcome);

        let to = tx.to_addr().copied();
        let status = match outcome {
            ScriptedOutcome::Success { logs } => Some((ReceiptStatus::Success, logs)),
            ScriptedOutcome::Reverted => Some((ReceiptStatus::Failure, Vec::new())),
            ScriptedOutcome::Dropped => {
                state.visibility.insert(hash, VecDeque::from([true]));
                None
            }
            ScriptedOutcome::NeverMined => {
                state.pending.insert(hash);
                state.next_nonce.insert(from, nonce + U256::one());
                None
            }
        };

        if let Some((status, logs)) = status {
            state.block_number += 1;
            state.next_nonce.insert(from, nonce + U256::one());
            let logs = logs
                .into_iter()
                .enumerate()
                .map(|(i, log)| LogEntry { log_index: Some(i as u64), ..log })
                .collect();
            let receipt = self.receipt(hash, status, state.block_number, from, to, logs);
            state.receipts.insert(hash, receipt);
        }

        if let Some(polls) = state.hide_next.take() {
            state.visibility.insert(hash, (0..polls).map(|_| false).collect());
        }

        state.submitted.push(SubmittedTransaction {
            hash,
            from,
            nonce,
            to,
            data: tx.data().cloned().unwrap_or_default(),
            value: tx.value().copied().unwrap_or_default(),
        });
        Ok(hash)
    }

    async fn get_receipt(&self, tx_hash: H256) -> Result<Receipt, ChainError> {
        self.ensure_reachable()?;
        let state = self.state();
        if state.visibility.get(&tx_hash).is_some_and(|answers| !answers.is_empty()) {
            return Err(ChainError::NotFound(tx_hash));
        }
        state.receipts.get(&tx_hash).cloned().ok_or(ChainError::NotFound(tx_hash))
    }

    async fn is_known(&self, tx_hash: H256) -> Result<bool, ChainError> {
        self.ensure_reachable()?;
        let mut state = self.state();
        if let Some(answer) = state.visibility.get_mut(&tx_hash).and_then(VecDeque::pop_front) {
            return Ok(answer);
        }
        Ok(state.receipts.contains_key(&tx_hash) || state.pending.contains(&tx_hash))
    }
}
