use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use ethers::signers::{LocalWallet, Signer};

use crate::storage::{BorrowerDirectory, CredentialStore, LoanStore};
use crate::types::{Borrower, LedgerEntry, LoanRecord, LoanStatus, NewLoan, StoreError};

#[derive(Default)]
struct StoreState {
    borrowers: Vec<Borrower>,
    keys: HashMap<i64, String>,
    loans: Vec<LoanRecord>,
    ledger: Vec<LedgerEntry>,
    audit: Vec<(Option<i64>, String)>,
}

/// 메모리 저장소 (세 저장소 trait 모두 구현)
#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<StoreState>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// 개인키에서 지갑 주소를 유도해 대출자와 서명 키를 등록
    pub fn add_borrower(&self, email: &str, private_key: &str) -> Result<Borrower, String> {
        let wallet: LocalWallet = private_key.parse().map_err(|e| format!("{}", e))?;
        let mut state = self.state();
        let borrower = Borrower {
            id: state.borrowers.len() as i64 + 1,
            email: email.to_string(),
            wallet_address: Some(wallet.address()),
            is_active: true,
        };
        state.borrowers.push(borrower.clone());
        state.keys.insert(borrower.id, private_key.to_string());
        Ok(borrower)
    }

    /// 지갑 없는 대출자 등록
    pub fn add_borrower_without_wallet(&self, email: &str) -> Borrower {
        let mut state = self.state();
        let borrower = Borrower {
            id: state.borrowers.len() as i64 + 1,
            email: email.to_string(),
            wallet_address: None,
            is_active: true,
        };
        state.borrowers.push(borrower.clone());
        borrower
    }

    pub fn audit_lines(&self) -> Vec<String> {
        self.state().audit.iter().map(|(_, line)| line.clone()).collect()
    }
}

#[async_trait]
impl LoanStore for InMemoryStore {
    async fn insert_loan(&self, loan: NewLoan) -> Result<LoanRecord, StoreError> {
        let mut state = self.state();
        let record = LoanRecord {
            id: state.loans.len() as i64 + 1,
            user_id: loan.user_id,
            principal: loan.principal,
            due_date: loan.due_date,
            interest_rate: loan.interest_rate,
            status: LoanStatus::Pending,
            blockchain_loan_id: loan.blockchain_loan_id,
            to_pay_back: loan.to_pay_back,
        };
        state.loans.push(record.clone());
        Ok(record)
    }

    async fn find_by_chain_id(&self, chain_loan_id: u64) -> Result<Option<LoanRecord>, StoreError> {
        Ok(self
            .state()
            .loans
            .iter()
            .find(|l| l.blockchain_loan_id == Some(chain_loan_id))
            .cloned())
    }

    async fn find_loan(&self, id: i64) -> Result<Option<LoanRecord>, StoreError> {
        Ok(self.state().loans.iter().find(|l| l.id == id).cloned())
    }

    async fn list_loans(&self, user_id: Option<i64>) -> Result<Vec<LoanRecord>, StoreError> {
        Ok(self
            .state()
            .loans
            .iter()
            .filter(|l| user_id.map_or(true, |u| l.user_id == u))
            .cloned()
            .collect())
    }

    async fn transition_status(
        &self,
        id: i64,
        from: LoanStatus,
        to: LoanStatus,
    ) -> Result<bool, StoreError> {
        let mut state = self.state();
        match state.loans.iter_mut().find(|l| l.id == id && l.status == from) {
            Some(loan) => {
                loan.status = to;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn record_transaction(&self, entry: LedgerEntry) -> Result<(), StoreError> {
        self.state().ledger.push(entry);
        Ok(())
    }

    async fn list_transactions(&self, loan_id: Option<i64>) -> Result<Vec<LedgerEntry>, StoreError> {
        Ok(self
            .state()
            .ledger
            .iter()
            .filter(|e| loan_id.map_or(true, |id| e.loan_id == Some(id)))
            .cloned()
            .collect())
    }

    async fn record_audit(&self, user_id: Option<i64>, action: &str) -> Result<(), StoreError> {
        self.state().audit.push((user_id, action.to_string()));
        Ok(())
    }
}

#[async_trait]
impl BorrowerDirectory for InMemoryStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<Borrower>, StoreError> {
        Ok(self.state().borrowers.iter().find(|b| b.email == email).cloned())
    }
}

#[async_trait]
impl CredentialStore for InMemoryStore {
    async fn signing_key(&self, owner_id: i64) -> Result<Option<String>, StoreError> {
        Ok(self.state().keys.get(&owner_id).cloned())
    }

    async fn store_signing_key(&self, owner_id: i64, private_key: &str) -> Result<(), StoreError> {
        self.state().keys.insert(owner_id, private_key.to_string());
        Ok(())
    }
}
