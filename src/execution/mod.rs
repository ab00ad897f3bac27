pub mod nonce;
pub mod pipeline;
pub mod submitter;
pub mod transaction_builder;

pub use nonce::{NonceLease, NonceManager};
pub use pipeline::TransactionPipeline;
pub use submitter::TransactionSubmitter;
pub use transaction_builder::{Credential, SignedTransaction, TransactionBuilder, UnsignedTransaction};
