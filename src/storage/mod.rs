pub mod database;

use async_trait::async_trait;

use crate::types::{Borrower, LedgerEntry, LoanRecord, LoanStatus, NewLoan, StoreError};

pub use database::SqliteStore;

/// 대출 레코드 및 원장 저장소
#[async_trait]
pub trait LoanStore: Send + Sync {
    async fn insert_loan(&self, loan: NewLoan) -> Result<LoanRecord, StoreError>;

    /// 컨트랙트 대출 ID로 조회
    async fn find_by_chain_id(&self, chain_loan_id: u64) -> Result<Option<LoanRecord>, StoreError>;

    async fn find_loan(&self, id: i64) -> Result<Option<LoanRecord>, StoreError>;

    /// 전체 또는 특정 사용자의 대출 목록 (id 오름차순)
    async fn list_loans(&self, user_id: Option<i64>) -> Result<Vec<LoanRecord>, StoreError>;

    /// 현재 상태가 `from`일 때만 `to`로 변경. 변경되었으면 true
    async fn transition_status(
        &self,
        id: i64,
        from: LoanStatus,
        to: LoanStatus,
    ) -> Result<bool, StoreError>;

    async fn record_transaction(&self, entry: LedgerEntry) -> Result<(), StoreError>;

    async fn list_transactions(&self, loan_id: Option<i64>) -> Result<Vec<LedgerEntry>, StoreError>;

    async fn record_audit(&self, user_id: Option<i64>, action: &str) -> Result<(), StoreError>;
}

/// 사용자 테이블 읽기 전용 조회
#[async_trait]
pub trait BorrowerDirectory: Send + Sync {
    async fn find_by_email(&self, email: &str) -> Result<Option<Borrower>, StoreError>;
}

/// 서명 키 저장소 (사용자 레코드와 분리)
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn signing_key(&self, owner_id: i64) -> Result<Option<String>, StoreError>;

    async fn store_signing_key(&self, owner_id: i64, private_key: &str) -> Result<(), StoreError>;
}
