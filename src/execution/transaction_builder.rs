use std::fmt;
use std::sync::Arc;

use ethers::{
    signers::{LocalWallet, Signer},
    types::{
        transaction::eip2718::TypedTransaction, Address, Bytes, TransactionRequest, H256, U256,
    },
    utils::keccak256,
};
use tracing::debug;

use crate::blockchain::{ChainClient, ChainError, ContractCall};
use crate::types::TxError;

/// 서명 자격 증명 (주소 + 개인키)
///
/// Debug 출력에는 주소만 노출된다.
#[derive(Clone)]
pub struct Credential {
    address: Address,
    private_key: String,
}

impl Credential {
    pub fn new(address: Address, private_key: impl Into<String>) -> Self {
        Self { address, private_key: private_key.into() }
    }

    /// 개인키에서 주소를 유도
    pub fn from_private_key(private_key: &str) -> Result<Self, TxError> {
        let wallet: LocalWallet = private_key
            .parse()
            .map_err(|e| TxError::Signing(format!("invalid private key: {}", e)))?;
        Ok(Self { address: wallet.address(), private_key: private_key.to_string() })
    }

    pub fn address(&self) -> Address {
        self.address
    }

    fn wallet(&self, chain_id: u64) -> Result<LocalWallet, TxError> {
        let wallet: LocalWallet = self
            .private_key
            .parse()
            .map_err(|e| TxError::Signing(format!("invalid private key: {}", e)))?;
        if wallet.address() != self.address {
            return Err(TxError::Signing(format!(
                "private key does not control {:?}",
                self.address
            )));
        }
        Ok(wallet.with_chain_id(chain_id))
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("address", &self.address)
            .field("private_key", &"<redacted>")
            .finish()
    }
}

/// 가스/nonce가 모두 채워진 서명 전 트랜잭션
#[derive(Debug, Clone, PartialEq)]
pub struct UnsignedTransaction {
    pub call: ContractCall,
    pub from: Address,
    pub nonce: U256,
    pub gas_limit: U256,
    pub gas_price: U256,
    pub chain_id: u64,
}

impl UnsignedTransaction {
    pub fn to_typed(&self) -> TypedTransaction {
        TypedTransaction::Legacy(
            TransactionRequest::new()
                .from(self.from)
                .to(self.call.to)
                .data(self.call.data.clone())
                .value(self.call.value)
                .nonce(self.nonce)
                .gas(self.gas_limit)
                .gas_price(self.gas_price)
                .chain_id(self.chain_id),
        )
    }
}

/// 전송 가능한 서명 트랜잭션
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransaction {
    pub raw: Bytes,
    pub hash: H256,
    pub from: Address,
    pub nonce: U256,
}

/// 트랜잭션 빌더
///
/// nonce는 호출자가 발신자 잠금 안에서 확보해 넘겨준다. 빌더는
/// 가스 추정과 가스 가격 조회를 순서대로 수행한다.
pub struct TransactionBuilder {
    chain: Arc<dyn ChainClient>,
    chain_id: u64,
    gas_limit_buffer_pct: u64,
}

impl TransactionBuilder {
    pub fn new(chain: Arc<dyn ChainClient>, chain_id: u64) -> Self {
        Self { chain, chain_id, gas_limit_buffer_pct: 0 }
    }

    /// 추정 가스에 여유분(%)을 더함
    pub fn with_gas_buffer(mut self, pct: u64) -> Self {
        self.gas_limit_buffer_pct = pct;
        self
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    pub async fn build(
        &self,
        call: ContractCall,
        from: Address,
        nonce: U256,
    ) -> Result<UnsignedTransaction, TxError> {
        let estimate_request: TypedTransaction = TransactionRequest::new()
            .from(from)
            .to(call.to)
            .data(call.data.clone())
            .value(call.value)
            .nonce(nonce)
            .chain_id(self.chain_id)
            .into();

        let estimated = self
            .chain
            .estimate_gas(&estimate_request)
            .await
            .map_err(|e| match e {
                ChainError::Connectivity(msg) => TxError::Connectivity(msg),
                ChainError::Rpc { message, .. } => TxError::Estimation { reason: message },
                other => TxError::Estimation { reason: other.to_string() },
            })?;
        let gas_limit = estimated + estimated * U256::from(self.gas_limit_buffer_pct) / U256::from(100u64);

        let gas_price = self.chain.get_gas_price().await.map_err(TxError::from)?;

        debug!(
            "⛽ {} 빌드: nonce={}, gas={}, gas_price={}",
            call.function, nonce, gas_limit, gas_price
        );

        Ok(UnsignedTransaction { call, from, nonce, gas_limit, gas_price, chain_id: self.chain_id })
    }

    /// 순수 서명 (네트워크 호출 없음, 같은 입력이면 같은 결과)
    pub fn sign(tx: &UnsignedTransaction, credential: &Credential) -> Result<SignedTransaction, TxError> {
        if credential.address() != tx.from {
            return Err(TxError::Signing(format!(
                "credential for {:?} cannot sign for {:?}",
                credential.address(),
                tx.from
            )));
        }

        let wallet = credential.wallet(tx.chain_id)?;
        let typed = tx.to_typed();
        let signature = wallet
            .sign_transaction_sync(&typed)
            .map_err(|e| TxError::Signing(e.to_string()))?;
        let raw = typed.rlp_signed(&signature);
        let hash = H256::from(keccak256(&raw));

        Ok(SignedTransaction { raw, hash, from: tx.from, nonce: tx.nonce })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::{LoanContract, LoanContractAbi};
    use crate::mocks::{chain_mock::decode_raw, MockChainClient, TEST_PRIVATE_KEYS};

    fn call() -> ContractCall {
        LoanContract::new(Address::repeat_byte(0x42), LoanContractAbi::builtin().unwrap())
            .approve_request(U256::from(7u64))
            .unwrap()
    }

    #[test]
    fn test_credential_debug_hides_key() {
        let credential = Credential::from_private_key(TEST_PRIVATE_KEYS[0]).unwrap();
        let printed = format!("{:?}", credential);
        assert!(printed.contains("redacted"));
        assert!(!printed.contains(&TEST_PRIVATE_KEYS[0][2..]));
    }

    #[tokio::test]
    async fn test_build_and_sign_is_deterministic() {
        let chain = Arc::new(MockChainClient::new(1337));
        let credential = Credential::from_private_key(TEST_PRIVATE_KEYS[0]).unwrap();
        let builder = TransactionBuilder::new(chain.clone(), 1337).with_gas_buffer(10);

        let tx = builder.build(call(), credential.address(), U256::from(3u64)).await.unwrap();
        assert_eq!(tx.gas_limit, chain.gas_estimate() * U256::from(110u64) / U256::from(100u64));

        let first = TransactionBuilder::sign(&tx, &credential).unwrap();
        let second = TransactionBuilder::sign(&tx, &credential).unwrap();
        assert_eq!(first, second);

        let (decoded, sender) = decode_raw(&first.raw).unwrap();
        assert_eq!(sender, credential.address());
        assert_eq!(decoded.nonce().copied(), Some(U256::from(3u64)));
        assert_eq!(H256::from(keccak256(&first.raw)), first.hash);
    }

    #[tokio::test]
    async fn test_estimation_revert_maps_to_estimation_error() {
        let chain = Arc::new(MockChainClient::new(1337));
        chain.revert_estimates("execution reverted: Loan is not pending");
        let builder = TransactionBuilder::new(chain, 1337);

        let err = builder.build(call(), Address::repeat_byte(1), U256::zero()).await.unwrap_err();
        assert_eq!(err, TxError::Estimation { reason: "execution reverted: Loan is not pending".into() });
    }

    #[tokio::test]
    async fn test_unreachable_chain_is_connectivity_error() {
        let chain = Arc::new(MockChainClient::new(1337));
        chain.set_unreachable(true);
        let builder = TransactionBuilder::new(chain, 1337);

        let err = builder.build(call(), Address::repeat_byte(1), U256::zero()).await.unwrap_err();
        assert!(matches!(err, TxError::Connectivity(_)));
    }

    #[test]
    fn test_signing_rejects_bad_credentials() {
        let credential = Credential::from_private_key(TEST_PRIVATE_KEYS[0]).unwrap();
        let tx = UnsignedTransaction {
            call: call(),
            from: credential.address(),
            nonce: U256::zero(),
            gas_limit: U256::from(50_000u64),
            gas_price: U256::from(1u64),
            chain_id: 1337,
        };

        let malformed = Credential::new(credential.address(), "0xnot-a-key");
        assert!(matches!(TransactionBuilder::sign(&tx, &malformed), Err(TxError::Signing(_))));

        let mismatched = Credential::new(credential.address(), TEST_PRIVATE_KEYS[1]);
        assert!(matches!(TransactionBuilder::sign(&tx, &mismatched), Err(TxError::Signing(_))));

        let other = Credential::from_private_key(TEST_PRIVATE_KEYS[1]).unwrap();
        assert!(matches!(TransactionBuilder::sign(&tx, &other), Err(TxError::Signing(_))));
    }
}
