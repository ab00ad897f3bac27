pub mod orchestrator;
pub mod state;

pub use orchestrator::{LoanOrchestrator, StoreHandles};
