pub mod abi;
pub mod contracts;
pub mod events;
pub mod receipt;
pub mod rpc;

pub use abi::{AbiError, LoanContractAbi};
pub use contracts::{ContractCall, LoanContract};
pub use events::{DecodedEvent, EventDecoder, EventError, LoanRequested};
pub use receipt::{ConfirmedTransaction, LogEntry, Receipt, ReceiptField, ReceiptStatus};
pub use rpc::{ChainClient, ChainError, EthersChainClient};
