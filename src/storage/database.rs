use std::str::FromStr;

use async_trait::async_trait;
use ethers::types::{Address, H256, U256};
use rust_decimal::Decimal;
use sqlx::{
    sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow},
    Row,
};
use tracing::{debug, info};

use super::{BorrowerDirectory, CredentialStore, LoanStore};
use crate::types::{Borrower, LedgerEntry, LoanAction, LoanRecord, LoanStatus, NewLoan, StoreError};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS users (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        email TEXT NOT NULL UNIQUE,
        wallet_address TEXT,
        is_active INTEGER NOT NULL DEFAULT 1
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS signing_credentials (
        owner_id INTEGER PRIMARY KEY,
        private_key TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS loans (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id INTEGER NOT NULL,
        principal TEXT NOT NULL,
        due_date INTEGER NOT NULL,
        interest_rate INTEGER NOT NULL,
        status TEXT NOT NULL DEFAULT 'pending',
        blockchain_loan_id INTEGER,
        to_pay_back TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_loans_blockchain_loan_id ON loans (blockchain_loan_id)",
    r#"
    CREATE TABLE IF NOT EXISTS transactions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        loan_id INTEGER,
        user_id INTEGER,
        transaction_type TEXT NOT NULL,
        transaction_amount TEXT NOT NULL,
        tx_hash TEXT NOT NULL,
        success INTEGER NOT NULL,
        transaction_date INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS audit_logs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id INTEGER,
        action_taken TEXT NOT NULL,
        action_timestamp INTEGER NOT NULL
    )
    "#,
];

/// SQLite 저장소 (대출 미러, 원장, 감사 로그, 서명 키)
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// 데이터베이스 연결 및 스키마 준비
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        info!("🔌 Connecting to SQLite database: {}", database_url);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        let store = Self { pool };
        store.bootstrap().await?;

        info!("✅ SQLite connection established");
        Ok(store)
    }

    async fn bootstrap(&self) -> Result<(), StoreError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        debug!("📋 스키마 준비 완료 ({}개 구문)", SCHEMA.len());
        Ok(())
    }

    #[cfg(test)]
    fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn corrupt(field: &str, err: impl std::fmt::Display) -> StoreError {
    StoreError::Corrupt(format!("{}: {}", field, err))
}

fn loan_from_row(row: &SqliteRow) -> Result<LoanRecord, StoreError> {
    let principal: String = row.try_get("principal")?;
    let to_pay_back: String = row.try_get("to_pay_back")?;
    let status: String = row.try_get("status")?;
    let interest_rate: i64 = row.try_get("interest_rate")?;
    let blockchain_loan_id: Option<i64> = row.try_get("blockchain_loan_id")?;

    Ok(LoanRecord {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        principal: Decimal::from_str(&principal).map_err(|e| corrupt("principal", e))?,
        due_date: row.try_get("due_date")?,
        interest_rate: u32::try_from(interest_rate).map_err(|e| corrupt("interest_rate", e))?,
        status: status.parse()?,
        blockchain_loan_id: blockchain_loan_id
            .map(u64::try_from)
            .transpose()
            .map_err(|e| corrupt("blockchain_loan_id", e))?,
        to_pay_back: Decimal::from_str(&to_pay_back).map_err(|e| corrupt("to_pay_back", e))?,
    })
}

fn ledger_from_row(row: &SqliteRow) -> Result<LedgerEntry, StoreError> {
    let action: String = row.try_get("transaction_type")?;
    let amount: String = row.try_get("transaction_amount")?;
    let tx_hash: String = row.try_get("tx_hash")?;

    Ok(LedgerEntry {
        loan_id: row.try_get("loan_id")?,
        user_id: row.try_get("user_id")?,
        action: action.parse::<LoanAction>()?,
        amount_wei: U256::from_dec_str(&amount).map_err(|e| corrupt("transaction_amount", e))?,
        tx_hash: H256::from_str(&tx_hash).map_err(|e| corrupt("tx_hash", e))?,
        success: row.try_get("success")?,
        recorded_at: row.try_get("transaction_date")?,
    })
}

#[async_trait]
impl LoanStore for SqliteStore {
    async fn insert_loan(&self, loan: NewLoan) -> Result<LoanRecord, StoreError> {
        let status = LoanStatus::Pending;
        let chain_loan_id = loan
            .blockchain_loan_id
            .map(i64::try_from)
            .transpose()
            .map_err(|_| {
                StoreError::OutOfRange(format!("blockchain_loan_id {:?}", loan.blockchain_loan_id))
            })?;
        let result = sqlx::query(
            r#"
            INSERT INTO loans (user_id, principal, due_date, interest_rate, status, blockchain_loan_id, to_pay_back)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(loan.user_id)
        .bind(loan.principal.to_string())
        .bind(loan.due_date)
        .bind(i64::from(loan.interest_rate))
        .bind(status.as_str())
        .bind(chain_loan_id)
        .bind(loan.to_pay_back.to_string())
        .execute(&self.pool)
        .await?;

        let id = result.last_insert_rowid();
        debug!("💾 대출 레코드 저장: id={}, chain_id={:?}", id, loan.blockchain_loan_id);

        Ok(LoanRecord {
            id,
            user_id: loan.user_id,
            principal: loan.principal,
            due_date: loan.due_date,
            interest_rate: loan.interest_rate,
            status,
            blockchain_loan_id: loan.blockchain_loan_id,
            to_pay_back: loan.to_pay_back,
        })
    }

    async fn find_by_chain_id(&self, chain_loan_id: u64) -> Result<Option<LoanRecord>, StoreError> {
        // 저장 범위를 넘는 ID는 기록될 수 없음
        let Ok(chain_loan_id) = i64::try_from(chain_loan_id) else {
            return Ok(None);
        };
        let row = sqlx::query("SELECT * FROM loans WHERE blockchain_loan_id = ? ORDER BY id LIMIT 1")
            .bind(chain_loan_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(loan_from_row).transpose()
    }

    async fn find_loan(&self, id: i64) -> Result<Option<LoanRecord>, StoreError> {
        let row = sqlx::query("SELECT * FROM loans WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(loan_from_row).transpose()
    }

    async fn list_loans(&self, user_id: Option<i64>) -> Result<Vec<LoanRecord>, StoreError> {
        let rows = match user_id {
            Some(user_id) => {
                sqlx::query("SELECT * FROM loans WHERE user_id = ? ORDER BY id")
                    .bind(user_id)
                    .fetch_all(&self.pool)
                    .await?
            }
            None => sqlx::query("SELECT * FROM loans ORDER BY id").fetch_all(&self.pool).await?,
        };
        rows.iter().map(loan_from_row).collect()
    }

    async fn transition_status(
        &self,
        id: i64,
        from: LoanStatus,
        to: LoanStatus,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query("UPDATE loans SET status = ? WHERE id = ? AND status = ?")
            .bind(to.as_str())
            .bind(id)
            .bind(from.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn record_transaction(&self, entry: LedgerEntry) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO transactions (loan_id, user_id, transaction_type, transaction_amount, tx_hash, success, transaction_date)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(entry.loan_id)
        .bind(entry.user_id)
        .bind(entry.action.as_str())
        .bind(entry.amount_wei.to_string())
        .bind(format!("{:?}", entry.tx_hash))
        .bind(entry.success)
        .bind(entry.recorded_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_transactions(&self, loan_id: Option<i64>) -> Result<Vec<LedgerEntry>, StoreError> {
        let rows = match loan_id {
            Some(loan_id) => {
                sqlx::query("SELECT * FROM transactions WHERE loan_id = ? ORDER BY id")
                    .bind(loan_id)
                    .fetch_all(&self.pool)
                    .await?
            }
            None => sqlx::query("SELECT * FROM transactions ORDER BY id").fetch_all(&self.pool).await?,
        };
        rows.iter().map(ledger_from_row).collect()
    }

    async fn record_audit(&self, user_id: Option<i64>, action: &str) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO audit_logs (user_id, action_taken, action_timestamp) VALUES (?, ?, ?)")
            .bind(user_id)
            .bind(action)
            .bind(chrono::Utc::now().timestamp())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl BorrowerDirectory for SqliteStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<Borrower>, StoreError> {
        let row = sqlx::query("SELECT id, email, wallet_address, is_active FROM users WHERE email = ?")
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let wallet: Option<String> = row.try_get("wallet_address")?;
        let wallet_address = match wallet.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(raw) => Some(Address::from_str(raw).map_err(|e| corrupt("wallet_address", e))?),
        };

        Ok(Some(Borrower {
            id: row.try_get("id")?,
            email: row.try_get("email")?,
            wallet_address,
            is_active: row.try_get("is_active")?,
        }))
    }
}

#[async_trait]
impl CredentialStore for SqliteStore {
    async fn signing_key(&self, owner_id: i64) -> Result<Option<String>, StoreError> {
        let row = sqlx::query("SELECT private_key FROM signing_credentials WHERE owner_id = ?")
            .bind(owner_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| r.try_get::<String, _>("private_key")).transpose().map_err(StoreError::from)
    }

    async fn store_signing_key(&self, owner_id: i64, private_key: &str) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO signing_credentials (owner_id, private_key) VALUES (?, ?)
            ON CONFLICT(owner_id) DO UPDATE SET private_key = excluded.private_key
            "#,
        )
        .bind(owner_id)
        .bind(private_key)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
