use std::sync::Arc;

use anyhow::{anyhow, Result};
use ethers::types::U256;
use rust_decimal::Decimal;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use super::state;
use crate::blockchain::{ChainClient, ConfirmedTransaction, ContractCall, EventDecoder, LoanContract, LoanContractAbi};
use crate::config::Config;
use crate::execution::{Credential, TransactionPipeline};
use crate::storage::{BorrowerDirectory, CredentialStore, LoanStore};
use crate::types::{
    Amount, Borrower, LedgerEntry, LoanAction, LoanError, LoanRecord, LoanStatus, NewLoan, OperationOutcome,
};

/// 오케스트레이터가 사용하는 저장소 묶음
#[derive(Clone)]
pub struct StoreHandles {
    pub loans: Arc<dyn LoanStore>,
    pub borrowers: Arc<dyn BorrowerDirectory>,
    pub credentials: Arc<dyn CredentialStore>,
}

impl StoreHandles {
    /// 세 trait를 모두 구현한 단일 저장소 공유
    pub fn shared<S>(store: Arc<S>) -> Self
    where
        S: LoanStore + BorrowerDirectory + CredentialStore + 'static,
    {
        Self { loans: store.clone(), borrowers: store.clone(), credentials: store }
    }
}

/// 체인에서 확정된 트랜잭션과 로컬 장부를 맞추는 대출 오케스트레이터
///
/// 모든 로컬 상태 변경은 영수증이 성공으로 확정된 뒤에만 일어나며,
/// 상태 전이는 compare-and-set으로 기록된다. 확정 대기 시간이 지나면
/// 결과를 알 수 없으므로 로컬 레코드는 건드리지 않는다.
pub struct LoanOrchestrator {
    config: Arc<Config>,
    pipeline: TransactionPipeline,
    contract: LoanContract,
    decoder: EventDecoder,
    stores: StoreHandles,
    admin: Option<Credential>,
}

impl LoanOrchestrator {
    pub fn new(
        config: Arc<Config>,
        chain: Arc<dyn ChainClient>,
        abi: LoanContractAbi,
        stores: StoreHandles,
    ) -> Result<Self> {
        let address = config
            .contract
            .address
            .ok_or_else(|| anyhow!("Loan contract address is not configured"))?;
        let admin = config.admin_credential()?;
        if admin.is_none() {
            warn!("⚠️ 관리자 키 없음: approve/reject/deposit/withdraw 사용 불가");
        }

        let decoder = EventDecoder::loan_requested(&abi)?.with_emitter(address);
        let pipeline = TransactionPipeline::new(
            chain,
            config.network.chain_id,
            config.receipt_timeout(),
            config.poll_interval(),
        )
        .with_gas_buffer(config.execution.gas_limit_buffer_pct);

        info!("📋 대출 오케스트레이터 초기화: contract {:?}, chain {}", address, config.network.chain_id);

        Ok(Self {
            contract: LoanContract::new(address, abi),
            config,
            pipeline,
            decoder,
            stores,
            admin,
        })
    }

    /// 관리자 자금 예치
    pub async fn deposit(&self, amount: Amount) -> Result<OperationOutcome, LoanError> {
        let span = info_span!("loan_op", action = "deposit", op_id = %Uuid::new_v4());
        async {
            let admin = self.admin()?;
            let value = amount.to_wei()?;
            let call = self.contract.deposit_funds(value)?;

            let confirmed = self.submit(call, admin).await?;
            self.finish_funding(LoanAction::Deposit, &confirmed, value, amount).await
        }
        .instrument(span)
        .await
    }

    /// 관리자 자금 인출
    pub async fn withdraw(&self, amount: Amount) -> Result<OperationOutcome, LoanError> {
        let span = info_span!("loan_op", action = "withdraw", op_id = %Uuid::new_v4());
        async {
            let admin = self.admin()?;
            let value = amount.to_wei()?;
            let call = self.contract.withdraw_money(value)?;

            let confirmed = self.submit(call, admin).await?;
            self.finish_funding(LoanAction::Withdraw, &confirmed, value, amount).await
        }
        .instrument(span)
        .await
    }

    /// 대출 요청 (대출자 본인 키로 서명)
    pub async fn request_loan(&self, email: &str, principal: Decimal) -> Result<OperationOutcome, LoanError> {
        let span = info_span!("loan_op", action = "request", op_id = %Uuid::new_v4(), email);
        async {
            let (borrower, credential) = self.borrower_credential(email).await?;
            let amount_wei = Amount::Ether(principal).to_wei()?;
            let policy = &self.config.loan_policy;
            // 브로드캐스트 전에 상환액 계산이 가능한지 확인
            let to_pay_back = state::payoff(principal, policy.interest_rate)?;

            let call = self.contract.request_loan(
                amount_wei,
                U256::from(policy.duration_secs),
                U256::from(policy.interest_rate),
            )?;
            let confirmed = self.submit(call, &credential).await?;

            if !confirmed.is_success() {
                self.record(LoanAction::Request, &confirmed, None, Some(borrower.id), amount_wei).await;
                self.audit(Some(borrower.id), format!("Loan request of {} ETH reverted", principal)).await;
                return Err(LoanError::TransactionReverted { tx_hash: confirmed.tx_hash() });
            }

            let chain_loan_id = self.decode_loan_id(&confirmed, &credential);
            let new_loan = NewLoan {
                user_id: borrower.id,
                principal,
                due_date: state::due_date(chrono::Utc::now().timestamp(), policy.duration_secs),
                interest_rate: policy.interest_rate,
                blockchain_loan_id: chain_loan_id,
                to_pay_back,
            };

            let record = self.stores.loans.insert_loan(new_loan).await.map_err(|e| {
                error!("❌ 확정된 요청 {:?}의 대출 저장 실패: {}", confirmed.tx_hash(), e);
                e
            })?;
            info!(
                loan_id = record.id,
                chain_loan_id = ?chain_loan_id,
                "💾 대출 저장: {} ETH, 상환액 {} ETH",
                principal,
                to_pay_back
            );

            self.record(LoanAction::Request, &confirmed, Some(record.id), Some(borrower.id), amount_wei).await;
            self.audit(Some(borrower.id), format!("Requested loan of {} ETH", principal)).await;

            Ok(outcome(LoanAction::Request, &confirmed, chain_loan_id, Some(to_pay_back)))
        }
        .instrument(span)
        .await
    }

    pub async fn approve(&self, chain_loan_id: u64) -> Result<OperationOutcome, LoanError> {
        let span = info_span!("loan_op", action = "approve", op_id = %Uuid::new_v4(), chain_loan_id);
        self.admin_decision(LoanAction::Approve, chain_loan_id).instrument(span).await
    }

    pub async fn reject(&self, chain_loan_id: u64) -> Result<OperationOutcome, LoanError> {
        let span = info_span!("loan_op", action = "reject", op_id = %Uuid::new_v4(), chain_loan_id);
        self.admin_decision(LoanAction::Reject, chain_loan_id).instrument(span).await
    }

    /// 대출 상환 (대출자 본인 키로 서명, 금액은 value로 전송)
    pub async fn repay(&self, chain_loan_id: u64, email: &str, amount: Amount) -> Result<OperationOutcome, LoanError> {
        let span = info_span!("loan_op", action = "repay", op_id = %Uuid::new_v4(), chain_loan_id, email);
        async {
            let (borrower, credential) = self.borrower_credential(email).await?;
            let loan = self.loan_by_chain_id(chain_loan_id).await?;
            if loan.user_id != borrower.id {
                return Err(LoanError::NotLoanOwner { loan_id: chain_loan_id, email: email.to_string() });
            }
            state::ensure_transition(loan.status, LoanStatus::Repaid)?;

            let offered = amount.to_wei()?;
            let required = state::payoff_wei(loan.to_pay_back)?;
            if offered < required {
                return Err(LoanError::InsufficientRepayment { offered, required });
            }

            let call = self.contract.repay_loan(U256::from(chain_loan_id), offered)?;
            let confirmed = self.submit(call, &credential).await?;
            self.record(LoanAction::Repay, &confirmed, Some(loan.id), Some(borrower.id), offered).await;

            if !confirmed.is_success() {
                // 상태는 approved 그대로 유지
                self.audit(Some(borrower.id), format!("Repayment of loan {} reverted", chain_loan_id)).await;
                return Err(LoanError::TransactionReverted { tx_hash: confirmed.tx_hash() });
            }

            self.commit_transition(&loan, LoanStatus::Repaid).await?;
            self.audit(Some(borrower.id), format!("Repaid loan {} with {}", chain_loan_id, amount)).await;

            Ok(outcome(LoanAction::Repay, &confirmed, Some(chain_loan_id), Some(loan.to_pay_back)))
        }
        .instrument(span)
        .await
    }

    /// 전체 또는 특정 대출자의 대출 목록
    pub async fn list_loans(&self, email: Option<&str>) -> Result<Vec<LoanRecord>, LoanError> {
        let user_id = match email {
            Some(email) => Some(self.borrower(email).await?.id),
            None => None,
        };
        Ok(self.stores.loans.list_loans(user_id).await?)
    }

    async fn admin_decision(&self, action: LoanAction, chain_loan_id: u64) -> Result<OperationOutcome, LoanError> {
        let target = state::target_status(action).unwrap_or(LoanStatus::Rejected);

        let admin = self.admin()?;
        let loan = self.loan_by_chain_id(chain_loan_id).await?;
        state::ensure_transition(loan.status, target)?;

        let id = U256::from(chain_loan_id);
        let call = match action {
            LoanAction::Approve => self.contract.approve_request(id)?,
            _ => self.contract.reject_request(id)?,
        };
        let confirmed = self.submit(call, admin).await?;
        self.record(action, &confirmed, Some(loan.id), None, U256::zero()).await;

        if !confirmed.is_success() {
            self.audit(None, format!("Admin {} of loan {} reverted", action, chain_loan_id)).await;
            return Err(LoanError::TransactionReverted { tx_hash: confirmed.tx_hash() });
        }

        self.commit_transition(&loan, target).await?;
        self.audit(None, format!("Admin {} loan {}", target, chain_loan_id)).await;

        Ok(outcome(action, &confirmed, Some(chain_loan_id), None))
    }

    async fn finish_funding(
        &self,
        action: LoanAction,
        confirmed: &ConfirmedTransaction,
        value: U256,
        amount: Amount,
    ) -> Result<OperationOutcome, LoanError> {
        self.record(action, confirmed, None, None, value).await;

        if !confirmed.is_success() {
            self.audit(None, format!("Admin {} of {} reverted", action, amount)).await;
            return Err(LoanError::TransactionReverted { tx_hash: confirmed.tx_hash() });
        }

        self.audit(None, format!("Admin {} {}", action, amount)).await;
        Ok(outcome(action, confirmed, None, None))
    }

    async fn submit(&self, call: ContractCall, credential: &Credential) -> Result<ConfirmedTransaction, LoanError> {
        self.pipeline.execute(call, credential).await.map_err(|e| {
            if e.is_outcome_unknown() {
                warn!("⏳ 결과 미확정, 로컬 상태 유지: {}", e);
            }
            LoanError::from(e)
        })
    }

    async fn commit_transition(&self, loan: &LoanRecord, to: LoanStatus) -> Result<(), LoanError> {
        let changed = self.stores.loans.transition_status(loan.id, loan.status, to).await?;
        if !changed {
            error!("❌ 대출 {} 상태가 동시에 변경됨 ({} → {} 실패)", loan.id, loan.status, to);
            return Err(LoanError::StateConflict(loan.id));
        }
        info!(loan_id = loan.id, "🔄 상태 전이: {} → {}", loan.status, to);
        Ok(())
    }

    /// 요청 이벤트에서 컨트랙트 대출 ID 추출 (없거나 디코딩 실패 시 None)
    ///
    /// 이벤트의 대출자가 서명 지갑과 다르거나 ID가 저장 범위(i64)를 넘으면 버린다.
    fn decode_loan_id(&self, confirmed: &ConfirmedTransaction, signer: &Credential) -> Option<u64> {
        match self.decoder.decode_loan_requested(&confirmed.receipt) {
            Ok(Some(event)) if event.borrower != signer.address() => {
                warn!(
                    "⚠️ LoanRequested 대출자 불일치: 이벤트 {:?}, 서명자 {:?}",
                    event.borrower,
                    signer.address()
                );
                None
            }
            Ok(Some(event)) if event.loan_id <= U256::from(i64::MAX as u64) => Some(event.loan_id.as_u64()),
            Ok(Some(event)) => {
                warn!("⚠️ 대출 ID 범위 초과: {}", event.loan_id);
                None
            }
            Ok(None) => {
                warn!("⚠️ LoanRequested 이벤트 없음: {:?}", confirmed.tx_hash());
                None
            }
            Err(e) => {
                warn!("⚠️ LoanRequested 디코딩 실패: {}", e);
                None
            }
        }
    }

    fn admin(&self) -> Result<&Credential, LoanError> {
        self.admin.as_ref().ok_or(LoanError::AdminNotConfigured)
    }

    async fn borrower(&self, email: &str) -> Result<Borrower, LoanError> {
        match self.stores.borrowers.find_by_email(email).await? {
            Some(borrower) if borrower.is_active => Ok(borrower),
            _ => Err(LoanError::BorrowerNotFound(email.to_string())),
        }
    }

    async fn borrower_credential(&self, email: &str) -> Result<(Borrower, Credential), LoanError> {
        let borrower = self.borrower(email).await?;
        let wallet = borrower
            .wallet_address
            .ok_or_else(|| LoanError::WalletNotRegistered(email.to_string()))?;
        let key = self
            .stores
            .credentials
            .signing_key(borrower.id)
            .await?
            .ok_or(LoanError::CredentialNotFound(borrower.id))?;
        Ok((borrower, Credential::new(wallet, key)))
    }

    async fn loan_by_chain_id(&self, chain_loan_id: u64) -> Result<LoanRecord, LoanError> {
        self.stores
            .loans
            .find_by_chain_id(chain_loan_id)
            .await?
            .ok_or(LoanError::LoanNotFound(chain_loan_id))
    }

    /// 원장 기록 (실패해도 작업 결과는 유지)
    async fn record(
        &self,
        action: LoanAction,
        confirmed: &ConfirmedTransaction,
        loan_id: Option<i64>,
        user_id: Option<i64>,
        amount_wei: U256,
    ) {
        let entry = LedgerEntry {
            loan_id,
            user_id,
            action,
            amount_wei,
            tx_hash: confirmed.tx_hash(),
            success: confirmed.is_success(),
            recorded_at: chrono::Utc::now().timestamp(),
        };
        if let Err(e) = self.stores.loans.record_transaction(entry).await {
            error!("❌ 원장 기록 실패 ({:?}): {}", confirmed.tx_hash(), e);
        }
    }

    async fn audit(&self, user_id: Option<i64>, line: String) {
        if let Err(e) = self.stores.loans.record_audit(user_id, &line).await {
            error!("❌ 감사 로그 기록 실패: {}", e);
        }
    }
}

fn outcome(
    action: LoanAction,
    confirmed: &ConfirmedTransaction,
    loan_id: Option<u64>,
    amount_to_returned: Option<Decimal>,
) -> OperationOutcome {
    OperationOutcome {
        action,
        status: action.success_message().to_string(),
        receipt_status: confirmed.receipt.status,
        tx_hash: confirmed.tx_hash(),
        block_number: confirmed.receipt.block_number,
        loan_id,
        amount_to_returned,
        receipt: confirmed.normalized.clone(),
    }
}
