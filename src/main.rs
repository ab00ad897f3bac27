use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Arg, ArgGroup, ArgMatches, Command};
use ethers::types::U256;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use loanchain::blockchain::{EthersChainClient, LoanContractAbi};
use loanchain::loans::{LoanOrchestrator, StoreHandles};
use loanchain::storage::SqliteStore;
use loanchain::types::{Amount, LoanError};
use loanchain::Config;

#[tokio::main]
async fn main() -> Result<()> {
    let matches = cli().get_matches();

    let log_level = matches
        .get_one::<String>("log-level")
        .map(String::as_str)
        .unwrap_or("info");
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_filter(log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if dotenvy::dotenv().is_ok() {
        info!("📄 .env 파일 로드됨");
    }

    let config_path = matches
        .get_one::<String>("config")
        .map(String::as_str)
        .unwrap_or("config/default.toml");
    let mut config = if Path::new(config_path).exists() {
        info!("📋 설정 파일 로드 중: {}", config_path);
        Config::load(config_path).await?
    } else {
        warn!("⚠️ 설정 파일 없음 ({}), 기본값과 환경 변수 사용", config_path);
        Config::default()
    };

    config.apply_env_overrides()?;
    if let Err(e) = config.validate() {
        error!("❌ 설정 검증 실패: {}", e);
        std::process::exit(1);
    }
    info!("✅ 설정 로드 완료");

    let orchestrator = build_orchestrator(Arc::new(config)).await?;

    match dispatch(&orchestrator, &matches).await {
        Ok(result) => {
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(())
        }
        Err(e) => {
            error!("❌ 작업 실패: {}", e);
            let body = json!({ "status_code": e.status_code(), "detail": e.detail() });
            println!("{}", serde_json::to_string_pretty(&body)?);
            std::process::exit(1);
        }
    }
}

fn cli() -> Command {
    let amount_args = || {
        [
            Arg::new("ether")
                .long("ether")
                .value_name("ETH")
                .help("금액 (ETH, 소수 허용)"),
            Arg::new("wei")
                .long("wei")
                .value_name("WEI")
                .help("금액 (wei)"),
        ]
    };
    let amount_group = || ArgGroup::new("amount").args(["ether", "wei"]).required(true);
    let loan_id = || {
        Arg::new("loan-id")
            .value_name("LOAN_ID")
            .help("컨트랙트 대출 ID")
            .required(true)
            .value_parser(clap::value_parser!(u64))
    };
    let email = || {
        Arg::new("email")
            .short('e')
            .long("email")
            .value_name("EMAIL")
            .help("대출자 이메일")
    };

    Command::new("loanchain")
        .version(env!("CARGO_PKG_VERSION"))
        .about("🏦 온체인 대출 트랜잭션 오케스트레이터")
        .subcommand_required(true)
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("설정 파일 경로")
                .default_value("config/default.toml")
                .global(true),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("로그 레벨 (trace, debug, info, warn, error)")
                .default_value("info")
                .global(true),
        )
        .subcommand(
            Command::new("deposit")
                .about("컨트랙트에 자금 예치 (관리자)")
                .args(amount_args())
                .group(amount_group()),
        )
        .subcommand(
            Command::new("request")
                .about("대출 요청")
                .arg(email().required(true))
                .arg(
                    Arg::new("amount")
                        .short('a')
                        .long("amount")
                        .value_name("ETH")
                        .help("원금 (ETH)")
                        .required(true),
                ),
        )
        .subcommand(Command::new("approve").about("대출 승인 (관리자)").arg(loan_id()))
        .subcommand(Command::new("reject").about("대출 거절 (관리자)").arg(loan_id()))
        .subcommand(
            Command::new("repay")
                .about("대출 상환")
                .arg(loan_id())
                .arg(email().required(true))
                .args(amount_args())
                .group(amount_group()),
        )
        .subcommand(
            Command::new("withdraw")
                .about("컨트랙트에서 자금 인출 (관리자)")
                .args(amount_args())
                .group(amount_group()),
        )
        .subcommand(Command::new("loans").about("대출 목록 조회").arg(email()))
}

fn log_filter(level: &str) -> &'static str {
    match level {
        "trace" => "trace",
        "debug" => "debug",
        "info" => "info",
        "warn" => "warn",
        "error" => "error",
        _ => "info",
    }
}

async fn build_orchestrator(config: Arc<Config>) -> Result<LoanOrchestrator> {
    info!("🔌 RPC 연결 중: {}", config.network.rpc_url);
    let chain = EthersChainClient::new(&config.network.rpc_url)?;
    chain
        .verify_chain_id(config.network.chain_id)
        .await
        .context("체인 ID 확인 실패")?;

    let abi = match config.contract.abi_path.as_deref() {
        Some(path) => LoanContractAbi::load(Path::new(path)).await?,
        None => LoanContractAbi::builtin()?,
    };

    let store = SqliteStore::connect(&config.database.url, config.database.max_connections)
        .await
        .context("데이터베이스 연결 실패")?;

    LoanOrchestrator::new(config, Arc::new(chain), abi, StoreHandles::shared(Arc::new(store)))
}

async fn dispatch(orchestrator: &LoanOrchestrator, matches: &ArgMatches) -> Result<Value, LoanError> {
    let outcome = match matches.subcommand() {
        Some(("deposit", args)) => orchestrator.deposit(parse_amount(args)?).await?,
        Some(("request", args)) => {
            let principal = parse_ether(arg_str(args, "amount"))?;
            orchestrator.request_loan(arg_str(args, "email"), principal).await?
        }
        Some(("approve", args)) => orchestrator.approve(loan_id(args)).await?,
        Some(("reject", args)) => orchestrator.reject(loan_id(args)).await?,
        Some(("repay", args)) => {
            let amount = parse_amount(args)?;
            orchestrator.repay(loan_id(args), arg_str(args, "email"), amount).await?
        }
        Some(("withdraw", args)) => orchestrator.withdraw(parse_amount(args)?).await?,
        Some(("loans", args)) => {
            let email = args.get_one::<String>("email").map(String::as_str);
            let loans = orchestrator.list_loans(email).await?;
            return Ok(json!({ "loans": loans }));
        }
        _ => return Err(LoanError::InvalidAmount("unknown command".to_string())),
    };

    Ok(json!(outcome))
}

fn arg_str<'a>(args: &'a ArgMatches, name: &str) -> &'a str {
    args.get_one::<String>(name).map(String::as_str).unwrap_or_default()
}

fn loan_id(args: &ArgMatches) -> u64 {
    args.get_one::<u64>("loan-id").copied().unwrap_or_default()
}

fn parse_ether(value: &str) -> Result<Decimal, LoanError> {
    Decimal::from_str(value.trim()).map_err(|e| LoanError::InvalidAmount(format!("{}: {}", value, e)))
}

/// --ether / --wei 중 하나를 단위가 명시된 금액으로 변환
fn parse_amount(args: &ArgMatches) -> Result<Amount, LoanError> {
    if let Some(ether) = args.get_one::<String>("ether") {
        return parse_ether(ether).map(Amount::Ether);
    }
    let wei = arg_str(args, "wei");
    U256::from_dec_str(wei.trim())
        .map(Amount::Wei)
        .map_err(|e| LoanError::InvalidAmount(format!("{}: {}", wei, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_argument_parsing() {
        let matches = cli()
            .try_get_matches_from([
                "loanchain",
                "--config",
                "test_config.toml",
                "--log-level",
                "debug",
                "repay",
                "7",
                "--email",
                "alice@example.com",
                "--ether",
                "120",
            ])
            .unwrap();

        assert_eq!(matches.get_one::<String>("config").unwrap(), "test_config.toml");
        assert_eq!(matches.get_one::<String>("log-level").unwrap(), "debug");

        let (name, args) = matches.subcommand().unwrap();
        assert_eq!(name, "repay");
        assert_eq!(loan_id(args), 7);
        assert_eq!(arg_str(args, "email"), "alice@example.com");
        assert_eq!(parse_amount(args).unwrap(), Amount::Ether(Decimal::from(120)));
    }

    #[test]
    fn test_amount_unit_is_required_and_exclusive() {
        assert!(cli().try_get_matches_from(["loanchain", "deposit"]).is_err());
        assert!(cli()
            .try_get_matches_from(["loanchain", "deposit", "--ether", "1", "--wei", "1"])
            .is_err());

        let matches = cli()
            .try_get_matches_from(["loanchain", "withdraw", "--wei", "1000"])
            .unwrap();
        let (_, args) = matches.subcommand().unwrap();
        assert_eq!(parse_amount(args).unwrap(), Amount::Wei(U256::from(1000u64)));

        let matches = cli()
            .try_get_matches_from(["loanchain", "withdraw", "--wei", "ten"])
            .unwrap();
        let (_, args) = matches.subcommand().unwrap();
        assert!(matches!(parse_amount(args), Err(LoanError::InvalidAmount(_))));
    }

    #[test]
    fn test_loan_id_must_be_numeric() {
        assert!(cli().try_get_matches_from(["loanchain", "approve", "abc"]).is_err());
        assert!(cli().try_get_matches_from(["loanchain", "approve"]).is_err());
        assert!(cli().try_get_matches_from(["loanchain"]).is_err());

        let matches = cli().try_get_matches_from(["loanchain", "loans"]).unwrap();
        assert_eq!(matches.get_one::<String>("config").unwrap(), "config/default.toml");
    }

    #[test]
    fn test_log_level_selection() {
        for level in ["trace", "debug", "info", "warn", "error"] {
            assert_eq!(log_filter(level), level);
        }
        assert_eq!(log_filter("invalid"), "info");
    }
}
