pub mod chain_mock;
pub mod store_mock;

pub use chain_mock::{MockChainClient, ScriptedOutcome, SubmittedTransaction};
pub use store_mock::InMemoryStore;

/// 로컬 개발 체인의 공개 테스트 키 (실제 자금 사용 금지)
pub const TEST_PRIVATE_KEYS: [&str; 3] = [
    "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80",
    "0x59c6995e998f97a5a0044966f0945389dc9e86dae88c7a8412f4603b6b78690d",
    "0x5de4111afa1a4b94908f83103eb1f1706367c2e68ca870fc3fb9a804cdab365a",
];
