use std::path::Path;

use ethers::abi::{Abi, Event, Function};
use serde_json::Value;
use tracing::{info, warn};

use crate::constants::{EVENT_LOAN_REQUESTED, LOAN_CONTRACT_ABI};

/// ABI 로드 에러
#[derive(thiserror::Error, Debug)]
pub enum AbiError {
    #[error("Failed to read ABI file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid ABI JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid ABI definition: {0}")]
    Definition(String),

    #[error("ABI is missing {0}")]
    Missing(String),
}

/// 대출 컨트랙트 ABI
#[derive(Debug, Clone)]
pub struct LoanContractAbi {
    abi: Abi,
}

impl LoanContractAbi {
    /// 내장 human-readable ABI
    pub fn builtin() -> Result<Self, AbiError> {
        let abi = ethers::abi::parse_abi(LOAN_CONTRACT_ABI)
            .map_err(|e| AbiError::Definition(e.to_string()))?;
        Self::from_abi(abi)
    }

    /// 컴파일 산출물 또는 ABI 배열 JSON 파일 로드
    ///
    /// 산출물 형식: `{"contracts": {"LoanContract.sol": {"LoanSystem": {"abi": [...]}}}}`
    pub async fn load(path: &Path) -> Result<Self, AbiError> {
        let content = tokio::fs::read_to_string(path).await.map_err(|source| AbiError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let abi = Self::from_json(&content)?;
        info!("✅ ABI 로드: {}", path.display());
        Ok(abi)
    }

    pub fn from_json(content: &str) -> Result<Self, AbiError> {
        let value: Value = serde_json::from_str(content)?;
        let abi_value = if value.is_array() {
            value
        } else if let Some(abi) = find_artifact_abi(&value) {
            abi.clone()
        } else {
            return Err(AbiError::Missing("abi array in artifact".to_string()));
        };
        let abi: Abi = serde_json::from_value(abi_value)?;
        Self::from_abi(abi)
    }

    fn from_abi(abi: Abi) -> Result<Self, AbiError> {
        // 오케스트레이터가 호출하는 함수와 이벤트가 모두 있어야 함
        for name in [
            crate::constants::FN_DEPOSIT_FUNDS,
            crate::constants::FN_REQUEST_LOAN,
            crate::constants::FN_APPROVE_REQUEST,
            crate::constants::FN_REJECT_REQUEST,
            crate::constants::FN_REPAY_LOAN,
            crate::constants::FN_WITHDRAW_MONEY,
        ] {
            if abi.function(name).is_err() {
                return Err(AbiError::Missing(format!("function {}", name)));
            }
        }
        if abi.event(EVENT_LOAN_REQUESTED).is_err() {
            warn!("⚠️ ABI에 {} 이벤트 없음", EVENT_LOAN_REQUESTED);
            return Err(AbiError::Missing(format!("event {}", EVENT_LOAN_REQUESTED)));
        }
        Ok(Self { abi })
    }

    pub fn function(&self, name: &str) -> Result<&Function, AbiError> {
        self.abi
            .function(name)
            .map_err(|_| AbiError::Missing(format!("function {}", name)))
    }

    pub fn event(&self, name: &str) -> Result<&Event, AbiError> {
        self.abi
            .event(name)
            .map_err(|_| AbiError::Missing(format!("event {}", name)))
    }
}

fn find_artifact_abi(value: &Value) -> Option<&Value> {
    let direct = value
        .get("contracts")
        .and_then(|c| c.get("LoanContract.sol"))
        .and_then(|f| f.get("LoanSystem"))
        .and_then(|c| c.get("abi"));
    if direct.is_some() {
        return direct;
    }

    // 파일/컨트랙트 이름이 다른 산출물은 abi를 가진 첫 항목을 사용
    value.get("contracts")?.as_object()?.values().find_map(|file| {
        file.as_object()?.values().find_map(|contract| contract.get("abi").filter(|a| a.is_array()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::LOAN_REQUESTED_SIGNATURE;
    use std::io::Write;

    #[test]
    fn test_builtin_abi_has_contract_surface() {
        let abi = LoanContractAbi::builtin().unwrap();
        let request = abi.function("requestLoan").unwrap();
        assert_eq!(request.inputs.len(), 3);
        assert!(abi.function("repayLoan").is_ok());
        let event = abi.event("LoanRequested").unwrap();
        assert_eq!(
            event.signature(),
            ethers::types::H256::from(ethers::utils::keccak256(LOAN_REQUESTED_SIGNATURE))
        );
    }

    fn uint(name: &str) -> serde_json::Value {
        serde_json::json!({ "name": name, "type": "uint256", "internalType": "uint256" })
    }

    fn abi_json() -> serde_json::Value {
        let function = |name: &str, inputs: Vec<serde_json::Value>, mutability: &str| {
            serde_json::json!({
                "type": "function", "name": name, "inputs": inputs,
                "outputs": [], "stateMutability": mutability
            })
        };
        serde_json::json!([
            function("depositFunds", vec![], "payable"),
            function("requestLoan", vec![uint("amount"), uint("duration"), uint("interestRate")], "nonpayable"),
            function("approveRequest", vec![uint("loanId")], "nonpayable"),
            function("rejectRequest", vec![uint("loanId")], "nonpayable"),
            function("repayLoan", vec![uint("loanId")], "payable"),
            function("withdrawMoney", vec![uint("amount")], "nonpayable"),
            {
                "type": "event", "name": "LoanRequested", "anonymous": false,
                "inputs": [
                    { "name": "loanId", "type": "uint256", "indexed": false },
                    { "name": "borrower", "type": "address", "indexed": false },
                    { "name": "amount", "type": "uint256", "indexed": false },
                    { "name": "duration", "type": "uint256", "indexed": false },
                    { "name": "interestRate", "type": "uint256", "indexed": false }
                ]
            }
        ])
    }

    #[test]
    fn test_from_artifact_json() {
        let abi_json = abi_json();
        let artifact = serde_json::json!({
            "contracts": { "LoanContract.sol": { "LoanSystem": { "abi": abi_json } } }
        });

        let loaded = LoanContractAbi::from_json(&artifact.to_string()).unwrap();
        assert!(loaded.function("withdrawMoney").is_ok());

        let bare = LoanContractAbi::from_json(&abi_json.to_string()).unwrap();
        assert!(bare.event("LoanRequested").is_ok());
    }

    #[test]
    fn test_incomplete_abi_rejected() {
        let err = LoanContractAbi::from_json("[]").unwrap_err();
        assert!(matches!(err, AbiError::Missing(_)));
        assert!(matches!(LoanContractAbi::from_json("{}"), Err(AbiError::Missing(_))));
    }

    #[tokio::test]
    async fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{}", abi_json()).unwrap();

        let loaded = LoanContractAbi::load(file.path()).await.unwrap();
        assert!(loaded.function("depositFunds").is_ok());

        let missing = LoanContractAbi::load(Path::new("/nonexistent/abi.json")).await;
        assert!(matches!(missing, Err(AbiError::Io { .. })));
    }
}
