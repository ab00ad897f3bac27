use std::collections::BTreeMap;

use ethers::types::{Address, Bytes, TransactionReceipt, H256, U256};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 트랜잭션 실행 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReceiptStatus {
    Success,
    Failure,
}

/// 영수증에 포함된 로그
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub address: Address,
    pub topics: Vec<H256>,
    pub data: Bytes,
    pub log_index: Option<u64>,
}

/// 블록에 포함된 트랜잭션의 영수증
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    pub tx_hash: H256,
    pub status: ReceiptStatus,
    pub block_number: Option<u64>,
    pub block_hash: Option<H256>,
    pub from: Address,
    pub to: Option<Address>,
    pub gas_used: Option<U256>,
    pub cumulative_gas_used: U256,
    pub effective_gas_price: Option<U256>,
    pub contract_address: Option<Address>,
    pub logs: Vec<LogEntry>,
}

impl Receipt {
    pub fn is_success(&self) -> bool {
        self.status == ReceiptStatus::Success
    }

    /// 정규화 전 필드 트리 (해시, 주소, 데이터는 바이너리로 유지)
    pub fn to_field(&self) -> ReceiptField {
        let mut map = BTreeMap::new();
        map.insert("transactionHash".to_string(), ReceiptField::binary(self.tx_hash.as_bytes()));
        map.insert(
            "status".to_string(),
            ReceiptField::Integer(if self.is_success() { 1 } else { 0 }),
        );
        map.insert(
            "blockNumber".to_string(),
            self.block_number.map(ReceiptField::Integer).unwrap_or(ReceiptField::Null),
        );
        map.insert(
            "blockHash".to_string(),
            self.block_hash.map(|h| ReceiptField::binary(h.as_bytes())).unwrap_or(ReceiptField::Null),
        );
        map.insert("from".to_string(), ReceiptField::binary(self.from.as_bytes()));
        map.insert(
            "to".to_string(),
            self.to.map(|a| ReceiptField::binary(a.as_bytes())).unwrap_or(ReceiptField::Null),
        );
        map.insert(
            "gasUsed".to_string(),
            self.gas_used.map(ReceiptField::uint).unwrap_or(ReceiptField::Null),
        );
        map.insert("cumulativeGasUsed".to_string(), ReceiptField::uint(self.cumulative_gas_used));
        map.insert(
            "effectiveGasPrice".to_string(),
            self.effective_gas_price.map(ReceiptField::uint).unwrap_or(ReceiptField::Null),
        );
        map.insert(
            "contractAddress".to_string(),
            self.contract_address
                .map(|a| ReceiptField::binary(a.as_bytes()))
                .unwrap_or(ReceiptField::Null),
        );
        map.insert(
            "logs".to_string(),
            ReceiptField::List(self.logs.iter().map(log_field).collect()),
        );
        ReceiptField::Map(map)
    }

    /// 직렬화 가능한 정규화 영수증
    pub fn normalized(&self) -> Value {
        self.to_field().normalize().into_json()
    }
}

fn log_field(log: &LogEntry) -> ReceiptField {
    let mut map = BTreeMap::new();
    map.insert("address".to_string(), ReceiptField::binary(log.address.as_bytes()));
    map.insert(
        "topics".to_string(),
        ReceiptField::List(log.topics.iter().map(|t| ReceiptField::binary(t.as_bytes())).collect()),
    );
    map.insert("data".to_string(), ReceiptField::binary(&log.data));
    map.insert(
        "logIndex".to_string(),
        log.log_index.map(ReceiptField::Integer).unwrap_or(ReceiptField::Null),
    );
    ReceiptField::Map(map)
}

impl From<TransactionReceipt> for Receipt {
    fn from(receipt: TransactionReceipt) -> Self {
        let status = match receipt.status {
            Some(s) if s.as_u64() == 1 => ReceiptStatus::Success,
            _ => ReceiptStatus::Failure,
        };

        Self {
            tx_hash: receipt.transaction_hash,
            status,
            block_number: receipt.block_number.map(|n| n.as_u64()),
            block_hash: receipt.block_hash,
            from: receipt.from,
            to: receipt.to,
            gas_used: receipt.gas_used,
            cumulative_gas_used: receipt.cumulative_gas_used,
            effective_gas_price: receipt.effective_gas_price,
            contract_address: receipt.contract_address,
            logs: receipt
                .logs
                .into_iter()
                .map(|log| LogEntry {
                    address: log.address,
                    topics: log.topics,
                    data: log.data,
                    log_index: log.log_index.map(|i| i.low_u64()),
                })
                .collect(),
        }
    }
}

/// 영수증 필드 트리
///
/// 바이너리 값은 그대로 JSON에 넣을 수 없으므로 `normalize`로
/// `0x` 접두 소문자 hex 문자열로 바꾼다. 중첩된 리스트/맵도 재귀적으로 처리한다.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiptField {
    Null,
    Integer(u64),
    Text(String),
    Binary(Vec<u8>),
    List(Vec<ReceiptField>),
    Map(BTreeMap<String, ReceiptField>),
}

impl ReceiptField {
    pub fn binary(bytes: &[u8]) -> Self {
        ReceiptField::Binary(bytes.to_vec())
    }

    /// u64 범위를 넘는 값은 10진 문자열
    pub fn uint(value: U256) -> Self {
        if value <= U256::from(u64::MAX) {
            ReceiptField::Integer(value.as_u64())
        } else {
            ReceiptField::Text(value.to_string())
        }
    }

    pub fn normalize(self) -> Self {
        match self {
            ReceiptField::Binary(bytes) => ReceiptField::Text(format!("0x{}", hex::encode(bytes))),
            ReceiptField::List(items) => {
                ReceiptField::List(items.into_iter().map(ReceiptField::normalize).collect())
            }
            ReceiptField::Map(entries) => ReceiptField::Map(
                entries.into_iter().map(|(k, v)| (k, v.normalize())).collect(),
            ),
            other => other,
        }
    }

    /// 트리 어디에도 바이너리 값이 없는지
    pub fn is_normalized(&self) -> bool {
        match self {
            ReceiptField::Binary(_) => false,
            ReceiptField::List(items) => items.iter().all(ReceiptField::is_normalized),
            ReceiptField::Map(entries) => entries.values().all(ReceiptField::is_normalized),
            _ => true,
        }
    }

    pub fn into_json(self) -> Value {
        match self {
            ReceiptField::Null => Value::Null,
            ReceiptField::Integer(n) => Value::from(n),
            ReceiptField::Text(s) => Value::String(s),
            ReceiptField::Binary(bytes) => Value::String(format!("0x{}", hex::encode(bytes))),
            ReceiptField::List(items) => {
                Value::Array(items.into_iter().map(ReceiptField::into_json).collect())
            }
            ReceiptField::Map(entries) => Value::Object(
                entries.into_iter().map(|(k, v)| (k, v.into_json())).collect(),
            ),
        }
    }
}

/// 영수증과 정규화된 표현을 함께 보관
#[derive(Debug, Clone, PartialEq)]
pub struct ConfirmedTransaction {
    pub receipt: Receipt,
    pub normalized: Value,
}

impl ConfirmedTransaction {
    pub fn new(receipt: Receipt) -> Self {
        let normalized = receipt.normalized();
        Self { receipt, normalized }
    }

    pub fn tx_hash(&self) -> H256 {
        self.receipt.tx_hash
    }

    pub fn is_success(&self) -> bool {
        self.receipt.is_success()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::types::{Log, U64};

    fn sample_receipt(status: u64) -> TransactionReceipt {
        TransactionReceipt {
            transaction_hash: H256::repeat_byte(0x11),
            block_number: Some(U64::from(5)),
            block_hash: Some(H256::repeat_byte(0x22)),
            from: Address::repeat_byte(0x33),
            to: Some(Address::repeat_byte(0x44)),
            gas_used: Some(U256::from(21_000)),
            cumulative_gas_used: U256::from(42_000),
            status: Some(U64::from(status)),
            logs: vec![Log {
                address: Address::repeat_byte(0x44),
                topics: vec![H256::repeat_byte(0xaa)],
                data: Bytes::from(vec![0xde, 0xad, 0xbe, 0xef]),
                log_index: Some(U256::from(0)),
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    #[test]
    fn test_receipt_status_mapping() {
        assert_eq!(Receipt::from(sample_receipt(1)).status, ReceiptStatus::Success);
        assert_eq!(Receipt::from(sample_receipt(0)).status, ReceiptStatus::Failure);

        let mut no_status = sample_receipt(1);
        no_status.status = None;
        assert_eq!(Receipt::from(no_status).status, ReceiptStatus::Failure);
    }

    #[test]
    fn test_normalized_receipt_uses_prefixed_hex() {
        let receipt = Receipt::from(sample_receipt(1));
        let json = receipt.normalized();

        assert_eq!(json["transactionHash"], format!("0x{}", "11".repeat(32)));
        assert_eq!(json["blockNumber"], 5);
        assert_eq!(json["status"], 1);
        assert_eq!(json["logs"][0]["data"], "0xdeadbeef");
        assert_eq!(json["logs"][0]["topics"][0], format!("0x{}", "aa".repeat(32)));
        assert_eq!(json["contractAddress"], Value::Null);
    }

    #[test]
    fn test_normalize_nested_and_idempotent() {
        let mut inner = BTreeMap::new();
        inner.insert("raw".to_string(), ReceiptField::Binary(vec![0x01, 0x02]));
        inner.insert("index".to_string(), ReceiptField::Integer(3));
        let tree = ReceiptField::List(vec![
            ReceiptField::Map(inner),
            ReceiptField::List(vec![ReceiptField::Binary(vec![0xff])]),
            ReceiptField::Integer(7),
        ]);
        assert!(!tree.is_normalized());

        let once = tree.normalize();
        assert!(once.is_normalized());
        let twice = once.clone().normalize();
        assert_eq!(once, twice);

        let json = once.into_json();
        assert_eq!(json[0]["raw"], "0x0102");
        assert_eq!(json[0]["index"], 3);
        assert_eq!(json[1][0], "0xff");
        assert_eq!(json[2], 7);
    }

    #[test]
    fn test_large_values_become_decimal_text() {
        let big = U256::from(u64::MAX) + U256::one();
        assert_eq!(ReceiptField::uint(big), ReceiptField::Text(big.to_string()));
        assert_eq!(ReceiptField::uint(U256::from(9)), ReceiptField::Integer(9));
    }
}
