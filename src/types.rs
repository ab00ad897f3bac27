use std::fmt;
use std::str::FromStr;

use ethers::types::{H256, U256};
use ethers::utils::parse_ether;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::blockchain::receipt::ReceiptStatus;
use crate::blockchain::rpc::ChainError;

/// 대출 상태 (온체인 결과를 미러링)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoanStatus {
    Pending,
    Approved,
    Rejected,
    Repaid,
}

impl LoanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoanStatus::Pending => "pending",
            LoanStatus::Approved => "approved",
            LoanStatus::Rejected => "rejected",
            LoanStatus::Repaid => "repaid",
        }
    }

    /// 종결 상태 여부 (rejected / repaid 이후 전이 없음)
    pub fn is_terminal(&self) -> bool {
        matches!(self, LoanStatus::Rejected | LoanStatus::Repaid)
    }
}

impl fmt::Display for LoanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LoanStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(LoanStatus::Pending),
            "approved" => Ok(LoanStatus::Approved),
            "rejected" => Ok(LoanStatus::Rejected),
            // 기존 레코드의 철자 호환
            "repaid" | "repayed" => Ok(LoanStatus::Repaid),
            other => Err(StoreError::Corrupt(format!("unknown loan status '{}'", other))),
        }
    }
}

/// 금액 단위를 명시한 입력 값
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "unit", content = "value", rename_all = "lowercase")]
pub enum Amount {
    /// 네이티브 통화 단위 (소수 허용)
    Ether(Decimal),
    /// 최소 단위
    Wei(U256),
}

impl Amount {
    /// wei 단위로 변환 (0 이하 금액은 거부)
    pub fn to_wei(&self) -> Result<U256, LoanError> {
        let wei = match self {
            Amount::Ether(value) => {
                if value.is_sign_negative() {
                    return Err(LoanError::InvalidAmount(format!("negative amount {}", value)));
                }
                parse_ether(value.normalize().to_string())
                    .map_err(|e| LoanError::InvalidAmount(format!("{}: {}", value, e)))?
            }
            Amount::Wei(value) => *value,
        };

        if wei.is_zero() {
            return Err(LoanError::InvalidAmount("amount must be greater than zero".to_string()));
        }
        Ok(wei)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Amount::Ether(value) => write!(f, "{} ETH", value),
            Amount::Wei(value) => write!(f, "{} wei", value),
        }
    }
}

/// 로컬 대출 레코드 (스마트 컨트랙트 상태의 비정규화 미러)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoanRecord {
    pub id: i64,
    pub user_id: i64,
    /// 원금 (ETH)
    pub principal: Decimal,
    /// 만기 (unix seconds)
    pub due_date: i64,
    pub interest_rate: u32,
    pub status: LoanStatus,
    /// 컨트랙트가 부여한 대출 ID (이벤트 디코딩 실패 시 None)
    pub blockchain_loan_id: Option<u64>,
    /// 상환 총액 (ETH)
    pub to_pay_back: Decimal,
}

/// 요청 트랜잭션 확정 후 저장할 신규 대출
#[derive(Debug, Clone, PartialEq)]
pub struct NewLoan {
    pub user_id: i64,
    pub principal: Decimal,
    pub due_date: i64,
    pub interest_rate: u32,
    pub blockchain_loan_id: Option<u64>,
    pub to_pay_back: Decimal,
}

/// 대출자 조회 결과 (사용자 테이블 읽기 전용 뷰)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Borrower {
    pub id: i64,
    pub email: String,
    pub wallet_address: Option<ethers::types::Address>,
    pub is_active: bool,
}

/// 오케스트레이터가 처리하는 논리적 작업
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoanAction {
    Deposit,
    Request,
    Approve,
    Reject,
    Repay,
    Withdraw,
}

impl LoanAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoanAction::Deposit => "deposit",
            LoanAction::Request => "request",
            LoanAction::Approve => "approve",
            LoanAction::Reject => "reject",
            LoanAction::Repay => "repay",
            LoanAction::Withdraw => "withdraw",
        }
    }

    /// 성공 시 응답 메시지
    pub fn success_message(&self) -> &'static str {
        match self {
            LoanAction::Deposit => "Funds deposited",
            LoanAction::Request => "Loan requested",
            LoanAction::Approve => "Loan approved",
            LoanAction::Reject => "Loan rejected",
            LoanAction::Repay => "Loan repaid",
            LoanAction::Withdraw => "Funds withdrawn",
        }
    }
}

impl fmt::Display for LoanAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LoanAction {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "deposit" => Ok(LoanAction::Deposit),
            "request" => Ok(LoanAction::Request),
            "approve" => Ok(LoanAction::Approve),
            "reject" => Ok(LoanAction::Reject),
            "repay" => Ok(LoanAction::Repay),
            "withdraw" => Ok(LoanAction::Withdraw),
            other => Err(StoreError::Corrupt(format!("unknown transaction type '{}'", other))),
        }
    }
}

/// 체인 호출 기록 (transactions 테이블)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub loan_id: Option<i64>,
    pub user_id: Option<i64>,
    pub action: LoanAction,
    pub amount_wei: U256,
    pub tx_hash: H256,
    pub success: bool,
    pub recorded_at: i64,
}

/// 작업 결과 (HTTP 계층으로 전달)
#[derive(Debug, Clone, Serialize)]
pub struct OperationOutcome {
    pub action: LoanAction,
    pub status: String,
    pub receipt_status: ReceiptStatus,
    #[serde(rename = "tx_receipt")]
    pub tx_hash: H256,
    pub block_number: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loan_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount_to_returned: Option<Decimal>,
    pub receipt: serde_json::Value,
}

/// 트랜잭션 파이프라인 에러
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum TxError {
    #[error("Chain endpoint unreachable: {0}")]
    Connectivity(String),

    #[error("Gas estimation failed: {reason}")]
    Estimation { reason: String },

    #[error("Signing failed: {0}")]
    Signing(String),

    #[error("Transaction not found: {0}")]
    NotFound(String),

    #[error("Confirmation of {tx_hash:?} not observed within {waited_ms}ms; outcome unknown")]
    Timeout { tx_hash: H256, waited_ms: u64 },

    #[error("Transaction rejected by chain: {0}")]
    Submission(String),

    #[error("Call encoding failed: {0}")]
    Encoding(String),
}

impl TxError {
    /// 결과를 알 수 없는 경우 (성공/실패 어느 쪽으로도 보고하면 안 됨)
    pub fn is_outcome_unknown(&self) -> bool {
        matches!(self, TxError::Timeout { .. })
    }
}

impl From<ChainError> for TxError {
    fn from(err: ChainError) -> Self {
        match err {
            ChainError::Connectivity(msg) => TxError::Connectivity(msg),
            ChainError::Rpc { code, message } => TxError::Submission(format!("{} (code {})", message, code)),
            ChainError::NotFound(hash) => TxError::NotFound(format!("{:?}", hash)),
            ChainError::Timeout { tx_hash, waited_ms } => TxError::Timeout { tx_hash, waited_ms },
            ChainError::Decode(msg) => TxError::Submission(format!("malformed response: {}", msg)),
        }
    }
}

/// 저장소 에러
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Corrupt row: {0}")]
    Corrupt(String),

    #[error("Value out of storage range: {0}")]
    OutOfRange(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Database(err.to_string())
    }
}

/// 오케스트레이터 에러 (HTTP 상태 코드로 매핑 가능)
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum LoanError {
    #[error(transparent)]
    Transaction(#[from] TxError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("User not found: {0}")]
    BorrowerNotFound(String),

    #[error("No wallet registered for user {0}")]
    WalletNotRegistered(String),

    #[error("No signing credential stored for user {0}")]
    CredentialNotFound(i64),

    #[error("Loan not found: {0}")]
    LoanNotFound(u64),

    #[error("Admin credential not configured")]
    AdminNotConfigured,

    #[error("Loan {loan_id} does not belong to {email}")]
    NotLoanOwner { loan_id: u64, email: String },

    #[error("Loan cannot move from {from} to {to}")]
    InvalidTransition { from: LoanStatus, to: LoanStatus },

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Repayment of {offered} wei does not cover payoff of {required} wei")]
    InsufficientRepayment { offered: U256, required: U256 },

    #[error("Transaction {tx_hash:?} reverted")]
    TransactionReverted { tx_hash: H256 },

    #[error("Loan {0} changed concurrently; local record left untouched")]
    StateConflict(i64),
}

impl LoanError {
    /// HTTP 상태 코드 매핑
    pub fn status_code(&self) -> u16 {
        match self {
            LoanError::Transaction(tx) => match tx {
                TxError::Connectivity(_) => 503,
                TxError::Estimation { .. } | TxError::Signing(_) | TxError::Submission(_) => 400,
                TxError::NotFound(_) => 404,
                TxError::Timeout { .. } => 504,
                TxError::Encoding(_) => 500,
            },
            LoanError::Store(_) => 500,
            LoanError::BorrowerNotFound(_)
            | LoanError::WalletNotRegistered(_)
            | LoanError::CredentialNotFound(_)
            | LoanError::LoanNotFound(_)
            | LoanError::AdminNotConfigured => 404,
            LoanError::NotLoanOwner { .. } => 403,
            LoanError::InvalidTransition { .. } | LoanError::StateConflict(_) => 409,
            LoanError::InvalidAmount(_) | LoanError::InsufficientRepayment { .. } => 400,
            LoanError::TransactionReverted { .. } => 500,
        }
    }

    pub fn detail(&self) -> String {
        self.to_string()
    }

    pub fn is_outcome_unknown(&self) -> bool {
        matches!(self, LoanError::Transaction(tx) if tx.is_outcome_unknown())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    #[test]
    fn test_loan_status_parsing() {
        assert_eq!("pending".parse::<LoanStatus>().unwrap(), LoanStatus::Pending);
        assert_eq!("repayed".parse::<LoanStatus>().unwrap(), LoanStatus::Repaid);
        assert!("closed".parse::<LoanStatus>().is_err());
        assert!(LoanStatus::Rejected.is_terminal());
        assert!(!LoanStatus::Approved.is_terminal());
    }

    #[test]
    fn test_ether_amount_to_wei() {
        let wei = Amount::Ether(dec("1.5")).to_wei().unwrap();
        assert_eq!(wei, U256::from(1_500_000_000_000_000_000u128));

        let wei = Amount::Ether(dec("100")).to_wei().unwrap();
        assert_eq!(wei, U256::from(100u64) * U256::exp10(18));
    }

    #[test]
    fn test_invalid_amounts_rejected() {
        assert!(matches!(Amount::Ether(dec("-1")).to_wei(), Err(LoanError::InvalidAmount(_))));
        assert!(matches!(Amount::Ether(dec("0")).to_wei(), Err(LoanError::InvalidAmount(_))));
        assert!(matches!(Amount::Wei(U256::zero()).to_wei(), Err(LoanError::InvalidAmount(_))));
        assert_eq!(Amount::Wei(U256::from(42u64)).to_wei().unwrap(), U256::from(42u64));
    }

    #[test]
    fn test_error_status_codes() {
        let timeout = LoanError::from(TxError::Timeout { tx_hash: H256::zero(), waited_ms: 10 });
        assert_eq!(timeout.status_code(), 504);
        assert!(timeout.is_outcome_unknown());

        assert_eq!(LoanError::from(TxError::Connectivity("down".into())).status_code(), 503);
        assert_eq!(LoanError::from(TxError::Estimation { reason: "revert".into() }).status_code(), 400);
        assert_eq!(LoanError::LoanNotFound(7).status_code(), 404);
        assert_eq!(LoanError::AdminNotConfigured.status_code(), 404);
        assert_eq!(
            LoanError::InvalidTransition { from: LoanStatus::Repaid, to: LoanStatus::Approved }.status_code(),
            409
        );
        assert!(!LoanError::TransactionReverted { tx_hash: H256::zero() }.is_outcome_unknown());
    }

    #[test]
    fn test_outcome_serialization_field_names() {
        let outcome = OperationOutcome {
            action: LoanAction::Request,
            status: LoanAction::Request.success_message().to_string(),
            receipt_status: ReceiptStatus::Success,
            tx_hash: H256::repeat_byte(0xab),
            block_number: Some(3),
            loan_id: Some(7),
            amount_to_returned: Some(dec("120")),
            receipt: serde_json::json!({}),
        };
        let value = serde_json::to_value(&outcome).unwrap();
        assert_eq!(value["loan_id"], 7);
        assert_eq!(value["amount_to_returned"], "120");
        assert!(value["tx_receipt"].as_str().unwrap().starts_with("0xabab"));
    }
}
