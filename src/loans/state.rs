use ethers::types::U256;
use rust_decimal::Decimal;

use crate::types::{Amount, LoanAction, LoanError, LoanStatus};

/// 허용된 상태 전이인지 확인
///
/// pending → approved | rejected, approved → repaid. 종결 상태에서는 전이 없음.
pub fn can_transition(from: LoanStatus, to: LoanStatus) -> bool {
    matches!(
        (from, to),
        (LoanStatus::Pending, LoanStatus::Approved)
            | (LoanStatus::Pending, LoanStatus::Rejected)
            | (LoanStatus::Approved, LoanStatus::Repaid)
    )
}

pub fn ensure_transition(from: LoanStatus, to: LoanStatus) -> Result<(), LoanError> {
    if can_transition(from, to) {
        Ok(())
    } else {
        Err(LoanError::InvalidTransition { from, to })
    }
}

/// 작업이 성공했을 때 도달해야 하는 상태 (자금 이동 작업은 None)
pub fn target_status(action: LoanAction) -> Option<LoanStatus> {
    match action {
        LoanAction::Approve => Some(LoanStatus::Approved),
        LoanAction::Reject => Some(LoanStatus::Rejected),
        LoanAction::Repay => Some(LoanStatus::Repaid),
        LoanAction::Request => Some(LoanStatus::Pending),
        LoanAction::Deposit | LoanAction::Withdraw => None,
    }
}

/// 상환 총액 = 원금 + 원금 × 이율 / 100 (표현 범위를 넘으면 InvalidAmount)
pub fn payoff(principal: Decimal, interest_rate: u32) -> Result<Decimal, LoanError> {
    principal
        .checked_mul(Decimal::from(interest_rate))
        .and_then(|interest| interest.checked_div(Decimal::from(100u32)))
        .and_then(|interest| principal.checked_add(interest))
        .ok_or_else(|| {
            LoanError::InvalidAmount(format!("payoff of {} at {}% overflows", principal, interest_rate))
        })
}

/// 상환 총액의 wei 환산
pub fn payoff_wei(to_pay_back: Decimal) -> Result<U256, LoanError> {
    Amount::Ether(to_pay_back).to_wei()
}

pub fn due_date(now: i64, duration_secs: u64) -> i64 {
    now.saturating_add(i64::try_from(duration_secs).unwrap_or(i64::MAX))
}
