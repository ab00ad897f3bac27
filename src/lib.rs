// loanchain: 온체인 대출 트랜잭션 오케스트레이션 라이브러리

pub mod blockchain;
pub mod config;
pub mod execution;
pub mod loans;
pub mod mocks;
pub mod storage;

// Core types
pub mod constants;
pub mod types;

// Re-exports for convenience
pub use config::Config;
pub use loans::{LoanOrchestrator, StoreHandles};
pub use types::{Amount, LoanError, LoanRecord, LoanStatus, OperationOutcome, TxError};
