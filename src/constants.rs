// Loan policy (values the deployed contract was designed around)
pub const DEFAULT_LOAN_DURATION_SECS: u64 = 1_209_600; // 14 days
pub const DEFAULT_INTEREST_RATE: u32 = 20; // percent

// Confirmation wait
pub const DEFAULT_RECEIPT_TIMEOUT_MS: u64 = 120_000;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1_000;
/// 한 번 보였던 트랜잭션을 drop으로 판정하기까지의 연속 조회 실패 횟수
pub const DROPPED_TX_MISSES: u32 = 3;

// Network
pub const DEFAULT_RPC_URL: &str = "http://127.0.0.1:7545";
pub const DEFAULT_CHAIN_ID: u64 = 1337;

// Storage
pub const DEFAULT_DATABASE_URL: &str = "sqlite://loan_management.sqlite3?mode=rwc";

// Contract function names
pub const FN_DEPOSIT_FUNDS: &str = "depositFunds";
pub const FN_REQUEST_LOAN: &str = "requestLoan";
pub const FN_APPROVE_REQUEST: &str = "approveRequest";
pub const FN_REJECT_REQUEST: &str = "rejectRequest";
pub const FN_REPAY_LOAN: &str = "repayLoan";
pub const FN_WITHDRAW_MONEY: &str = "withdrawMoney";

// Events
pub const EVENT_LOAN_REQUESTED: &str = "LoanRequested";
pub const LOAN_REQUESTED_SIGNATURE: &str = "LoanRequested(uint256,address,uint256,uint256,uint256)";

/// Human-readable ABI of the loan contract functions and events this crate touches
pub const LOAN_CONTRACT_ABI: &[&str] = &[
    "function depositFunds() payable",
    "function requestLoan(uint256 amount, uint256 duration, uint256 interestRate)",
    "function approveRequest(uint256 loanId)",
    "function rejectRequest(uint256 loanId)",
    "function repayLoan(uint256 loanId) payable",
    "function withdrawMoney(uint256 amount)",
    "event LoanRequested(uint256 loanId, address borrower, uint256 amount, uint256 duration, uint256 interestRate)",
];
