use std::env;
use std::path::Path;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use ethers::types::Address;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::constants::{
    DEFAULT_CHAIN_ID, DEFAULT_DATABASE_URL, DEFAULT_INTEREST_RATE, DEFAULT_LOAN_DURATION_SECS,
    DEFAULT_POLL_INTERVAL_MS, DEFAULT_RECEIPT_TIMEOUT_MS, DEFAULT_RPC_URL,
};
use crate::execution::Credential;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub rpc_url: String,
    /// 노드가 보고해야 하는 체인 ID
    pub chain_id: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractConfig {
    pub address: Option<Address>,
    /// 컴파일 산출물 경로 (없으면 내장 ABI 사용)
    #[serde(default)]
    pub abi_path: Option<String>,
}

#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct AdminConfig {
    pub address: Option<Address>,
    /// 환경 변수에서만 주입 (파일에 저장하지 않음)
    #[serde(skip)]
    pub private_key: Option<String>,
}

impl std::fmt::Debug for AdminConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminConfig")
            .field("address", &self.address)
            .field("private_key", &self.private_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoanPolicyConfig {
    pub duration_secs: u64,
    /// 퍼센트 단위 (20 = 20%)
    pub interest_rate: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionConfig {
    pub receipt_timeout_ms: u64,
    pub poll_interval_ms: u64,
    #[serde(default)]
    pub gas_limit_buffer_pct: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitoringConfig {
    pub log_level: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub network: NetworkConfig,
    pub contract: ContractConfig,
    pub admin: AdminConfig,
    pub loan_policy: LoanPolicyConfig,
    pub execution: ExecutionConfig,
    pub database: DatabaseConfig,
    pub monitoring: MonitoringConfig,
}

impl Config {
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("설정 파일을 읽을 수 없습니다: {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("설정 파일 파싱 실패: {}", path.display()))?;
        Ok(config)
    }

    pub fn default() -> Self {
        Self {
            network: NetworkConfig {
                rpc_url: DEFAULT_RPC_URL.to_string(),
                chain_id: DEFAULT_CHAIN_ID,
            },
            contract: ContractConfig { address: None, abi_path: None },
            admin: AdminConfig { address: None, private_key: None },
            loan_policy: LoanPolicyConfig {
                duration_secs: DEFAULT_LOAN_DURATION_SECS,
                interest_rate: DEFAULT_INTEREST_RATE,
            },
            execution: ExecutionConfig {
                receipt_timeout_ms: DEFAULT_RECEIPT_TIMEOUT_MS,
                poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
                gas_limit_buffer_pct: 0,
            },
            database: DatabaseConfig {
                url: DEFAULT_DATABASE_URL.to_string(),
                max_connections: 5,
            },
            monitoring: MonitoringConfig { log_level: "info".to_string() },
        }
    }

    pub async fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        tokio::fs::write(path, content).await?;
        Ok(())
    }

    /// 프로세스 환경 변수 적용
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides_from(|key| env::var(key).ok())
    }

    pub fn apply_overrides_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(rpc_url) = lookup("RPC_URL") {
            self.network.rpc_url = rpc_url;
            info!("🌐 RPC URL loaded from environment");
        }

        if let Some(chain_id) = lookup("CHAIN_ID") {
            self.network.chain_id = chain_id
                .trim()
                .parse()
                .map_err(|_| anyhow!("CHAIN_ID must be an integer: {}", chain_id))?;
        }

        if let Some(address) = lookup("CONTRACT_ADDRESS") {
            self.contract.address = Some(
                address
                    .trim()
                    .parse()
                    .map_err(|_| anyhow!("Invalid CONTRACT_ADDRESS: {}", address))?,
            );
            info!("📜 Contract address loaded from environment");
        }

        if let Some(address) = lookup("ADMIN_ADDRESS") {
            self.admin.address = Some(
                address
                    .trim()
                    .parse()
                    .map_err(|_| anyhow!("Invalid ADMIN_ADDRESS: {}", address))?,
            );
        }

        if let Some(private_key) = lookup("ADMIN_PRIVATE_KEY") {
            self.admin.private_key = Some(private_key.trim().to_string());
            info!("🔑 Admin private key loaded from environment");
        }

        if let Some(database_url) = lookup("DATABASE_URL") {
            self.database.url = database_url;
        }

        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.network.rpc_url.is_empty() {
            return Err(anyhow!("Network RPC URL cannot be empty"));
        }

        if self.contract.address.is_none() {
            return Err(anyhow!("Loan contract address must be configured"));
        }

        if self.loan_policy.duration_secs == 0 {
            return Err(anyhow!("Loan duration must be greater than 0"));
        }

        if self.execution.receipt_timeout_ms == 0 {
            return Err(anyhow!("Receipt timeout must be greater than 0"));
        }

        if self.execution.poll_interval_ms == 0
            || self.execution.poll_interval_ms > self.execution.receipt_timeout_ms
        {
            return Err(anyhow!("Poll interval must be between 1ms and the receipt timeout"));
        }

        if self.database.url.is_empty() || self.database.max_connections == 0 {
            return Err(anyhow!("Database URL and max connections must be configured"));
        }

        // 키와 주소가 모두 있으면 서로 일치해야 함
        self.admin_credential()?;

        Ok(())
    }

    /// 관리자 서명 자격 증명 (키가 없으면 None)
    pub fn admin_credential(&self) -> Result<Option<Credential>> {
        let Some(private_key) = self.admin.private_key.as_deref() else {
            return Ok(None);
        };
        let credential = Credential::from_private_key(private_key)
            .map_err(|e| anyhow!("Invalid admin private key: {}", e))?;
        if let Some(address) = self.admin.address {
            if address != credential.address() {
                return Err(anyhow!(
                    "Admin private key controls {:?}, not the configured {:?}",
                    credential.address(),
                    address
                ));
            }
        }
        Ok(Some(credential))
    }

    pub fn receipt_timeout(&self) -> Duration {
        Duration::from_millis(self.execution.receipt_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.execution.poll_interval_ms)
    }

    #[cfg(test)]
    pub fn load_test_config() -> Self {
        let mut config = Self::default();
        config.contract.address = Some(Address::repeat_byte(0x42));
        config.admin.private_key = Some(crate::mocks::TEST_PRIVATE_KEYS[2].to_string());
        config.execution.receipt_timeout_ms = 100;
        config.execution.poll_interval_ms = 5;
        config
    }
}
