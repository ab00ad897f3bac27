use ethers::{
    abi::Token,
    types::{Address, Bytes, U256},
};
use tracing::debug;

use super::abi::LoanContractAbi;
use crate::constants::{
    FN_APPROVE_REQUEST, FN_DEPOSIT_FUNDS, FN_REJECT_REQUEST, FN_REPAY_LOAN, FN_REQUEST_LOAN,
    FN_WITHDRAW_MONEY,
};
use crate::types::TxError;

/// 인코딩된 컨트랙트 호출 (서명 전)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractCall {
    pub function: &'static str,
    pub to: Address,
    pub data: Bytes,
    /// 함께 전송할 네이티브 통화 (wei)
    pub value: U256,
}

/// 대출 컨트랙트 인터페이스
///
/// 상태 변경 함수들의 calldata 인코딩만 담당한다. 서명과 전송은
/// `execution` 파이프라인이 처리한다.
#[derive(Debug, Clone)]
pub struct LoanContract {
    address: Address,
    abi: LoanContractAbi,
}

impl LoanContract {
    pub fn new(address: Address, abi: LoanContractAbi) -> Self {
        Self { address, abi }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    fn encode(&self, function: &'static str, args: &[Token], value: U256) -> Result<ContractCall, TxError> {
        let abi_function = self
            .abi
            .function(function)
            .map_err(|e| TxError::Encoding(e.to_string()))?;
        let data = abi_function
            .encode_input(args)
            .map_err(|e| TxError::Encoding(format!("{}: {}", function, e)))?;

        debug!("📝 {} 인코딩: {} bytes, value={}", function, data.len(), value);
        Ok(ContractCall { function, to: self.address, data: Bytes::from(data), value })
    }

    /// 컨트랙트 풀에 자금 예치 (payable)
    pub fn deposit_funds(&self, value: U256) -> Result<ContractCall, TxError> {
        self.encode(FN_DEPOSIT_FUNDS, &[], value)
    }

    pub fn request_loan(
        &self,
        amount_wei: U256,
        duration_secs: U256,
        interest_rate: U256,
    ) -> Result<ContractCall, TxError> {
        self.encode(
            FN_REQUEST_LOAN,
            &[Token::Uint(amount_wei), Token::Uint(duration_secs), Token::Uint(interest_rate)],
            U256::zero(),
        )
    }

    pub fn approve_request(&self, loan_id: U256) -> Result<ContractCall, TxError> {
        self.encode(FN_APPROVE_REQUEST, &[Token::Uint(loan_id)], U256::zero())
    }

    pub fn reject_request(&self, loan_id: U256) -> Result<ContractCall, TxError> {
        self.encode(FN_REJECT_REQUEST, &[Token::Uint(loan_id)], U256::zero())
    }

    /// 상환 금액은 calldata가 아니라 value로 전송
    pub fn repay_loan(&self, loan_id: U256, value: U256) -> Result<ContractCall, TxError> {
        self.encode(FN_REPAY_LOAN, &[Token::Uint(loan_id)], value)
    }

    /// 인출 금액은 인자로 전달 (value 없음)
    pub fn withdraw_money(&self, amount_wei: U256) -> Result<ContractCall, TxError> {
        self.encode(FN_WITHDRAW_MONEY, &[Token::Uint(amount_wei)], U256::zero())
    }
}
