use ethers::{
    abi::{Event, RawLog, Token},
    types::{Address, H256, U256},
};
use once_cell::sync::Lazy;
use sha3::{Digest, Keccak256};
use tracing::debug;

use super::abi::{AbiError, LoanContractAbi};
use super::receipt::{LogEntry, Receipt};
use crate::constants::{EVENT_LOAN_REQUESTED, LOAN_REQUESTED_SIGNATURE};

/// LoanRequested 이벤트 토픽 (keccak256 of canonical signature)
pub static LOAN_REQUESTED_TOPIC: Lazy<H256> = Lazy::new(|| event_topic(LOAN_REQUESTED_SIGNATURE));

pub fn event_topic(signature: &str) -> H256 {
    let mut hasher = Keccak256::new();
    hasher.update(signature.as_bytes());
    H256::from_slice(&hasher.finalize())
}

/// 이벤트 디코딩 에러
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum EventError {
    #[error("Failed to decode {event} log: {reason}")]
    Decode { event: String, reason: String },

    #[error("Event {event} has no usable field {field}")]
    MissingField { event: String, field: String },
}

/// 디코딩된 이벤트
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedEvent {
    pub name: String,
    pub address: Address,
    pub log_index: Option<u64>,
    pub params: Vec<(String, Token)>,
}

impl DecodedEvent {
    pub fn param(&self, name: &str) -> Option<&Token> {
        self.params.iter().find(|(n, _)| n == name).map(|(_, t)| t)
    }

    pub fn uint(&self, name: &str) -> Result<U256, EventError> {
        match self.param(name) {
            Some(Token::Uint(value)) => Ok(*value),
            _ => Err(self.missing(name)),
        }
    }

    pub fn address(&self, name: &str) -> Result<Address, EventError> {
        match self.param(name) {
            Some(Token::Address(value)) => Ok(*value),
            _ => Err(self.missing(name)),
        }
    }

    fn missing(&self, field: &str) -> EventError {
        EventError::MissingField { event: self.name.clone(), field: field.to_string() }
    }
}

/// 대출 요청 이벤트
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoanRequested {
    pub loan_id: U256,
    pub borrower: Address,
    pub amount: U256,
    pub duration: U256,
    pub interest_rate: U256,
}

impl TryFrom<&DecodedEvent> for LoanRequested {
    type Error = EventError;

    fn try_from(event: &DecodedEvent) -> Result<Self, Self::Error> {
        Ok(Self {
            loan_id: event.uint("loanId")?,
            borrower: event.address("borrower")?,
            amount: event.uint("amount")?,
            duration: event.uint("duration")?,
            interest_rate: event.uint("interestRate")?,
        })
    }
}

/// 영수증 로그에서 특정 이벤트를 찾아 디코딩
pub struct EventDecoder {
    event: Event,
    topic: H256,
    emitter: Option<Address>,
}

impl EventDecoder {
    pub fn new(event: Event) -> Self {
        let topic = event.signature();
        Self { event, topic, emitter: None }
    }

    pub fn loan_requested(abi: &LoanContractAbi) -> Result<Self, AbiError> {
        let event = abi.event(EVENT_LOAN_REQUESTED)?.clone();
        let decoder = Self::new(event);
        if decoder.topic != *LOAN_REQUESTED_TOPIC {
            return Err(AbiError::Definition(format!(
                "{} does not match {}",
                EVENT_LOAN_REQUESTED, LOAN_REQUESTED_SIGNATURE
            )));
        }
        Ok(decoder)
    }

    /// 지정한 컨트랙트가 발생시킨 로그만 대상으로 함
    pub fn with_emitter(mut self, address: Address) -> Self {
        self.emitter = Some(address);
        self
    }

    pub fn topic(&self) -> H256 {
        self.topic
    }

    /// 로그 순서대로 첫 번째 일치 항목을 디코딩 (없으면 None)
    pub fn find_first(&self, logs: &[LogEntry]) -> Result<Option<DecodedEvent>, EventError> {
        let matched = logs.iter().find(|log| {
            log.topics.first() == Some(&self.topic)
                && self.emitter.map_or(true, |emitter| emitter == log.address)
        });

        let Some(log) = matched else {
            debug!("🔍 {} 로그 없음 ({}개 검사)", self.event.name, logs.len());
            return Ok(None);
        };

        let parsed = self
            .event
            .parse_log(RawLog { topics: log.topics.clone(), data: log.data.to_vec() })
            .map_err(|e| EventError::Decode { event: self.event.name.clone(), reason: e.to_string() })?;

        Ok(Some(DecodedEvent {
            name: self.event.name.clone(),
            address: log.address,
            log_index: log.log_index,
            params: parsed.params.into_iter().map(|p| (p.name, p.value)).collect(),
        }))
    }

    pub fn decode_loan_requested(&self, receipt: &Receipt) -> Result<Option<LoanRequested>, EventError> {
        match self.find_first(&receipt.logs)? {
            Some(event) => LoanRequested::try_from(&event).map(Some),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::chain_mock::loan_requested_log;
    use ethers::types::Bytes;

    fn decoder() -> EventDecoder {
        EventDecoder::loan_requested(&LoanContractAbi::builtin().unwrap()).unwrap()
    }

    #[test]
    fn test_topic_matches_abi_signature() {
        assert_eq!(decoder().topic(), *LOAN_REQUESTED_TOPIC);
        assert_eq!(
            *LOAN_REQUESTED_TOPIC,
            H256::from(ethers::utils::keccak256(LOAN_REQUESTED_SIGNATURE))
        );
    }

    #[test]
    fn test_decodes_first_matching_log() {
        let contract = Address::repeat_byte(0x42);
        let borrower = Address::repeat_byte(0x07);
        let unrelated = LogEntry {
            address: contract,
            topics: vec![H256::repeat_byte(0x01)],
            data: Bytes::new(),
            log_index: Some(0),
        };
        let logs = vec![
            unrelated,
            loan_requested_log(contract, 7, borrower, U256::exp10(20), 1_209_600, 20),
            loan_requested_log(contract, 8, borrower, U256::exp10(18), 60, 5),
        ];

        let event = decoder().find_first(&logs).unwrap().unwrap();
        let request = LoanRequested::try_from(&event).unwrap();
        assert_eq!(request.loan_id, U256::from(7u64));
        assert_eq!(request.borrower, borrower);
        assert_eq!(request.amount, U256::exp10(20));
        assert_eq!(request.interest_rate, U256::from(20u64));
    }

    #[test]
    fn test_no_matching_log_is_none() {
        let logs = vec![LogEntry {
            address: Address::zero(),
            topics: vec![H256::repeat_byte(0x01)],
            data: Bytes::new(),
            log_index: None,
        }];
        assert_eq!(decoder().find_first(&logs).unwrap(), None);
        assert_eq!(decoder().find_first(&[]).unwrap(), None);
    }

    #[test]
    fn test_emitter_filter_and_malformed_data() {
        let other = Address::repeat_byte(0x99);
        let logs = vec![loan_requested_log(other, 1, Address::zero(), U256::one(), 1, 1)];
        let filtered = decoder().with_emitter(Address::repeat_byte(0x42));
        assert_eq!(filtered.find_first(&logs).unwrap(), None);

        let truncated = vec![LogEntry {
            address: other,
            topics: vec![*LOAN_REQUESTED_TOPIC],
            data: Bytes::from(vec![0u8; 10]),
            log_index: None,
        }];
        assert!(matches!(decoder().find_first(&truncated), Err(EventError::Decode { .. })));
    }
}
