//! Client cho contract flag registry on-chain: đọc trạng thái flag, ghi
//! phán quyết CRITICAL với ước lượng gas và chờ xác nhận. Contract là nơi
//! lưu trữ bền duy nhất của hệ thống.

// External imports
use ethers::abi::parse_abi;
use ethers::contract::Contract;
use ethers::middleware::SignerMiddleware;
use ethers::providers::{Http, Provider};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address, H256, U256};

// Standard library imports
use std::sync::Arc;
use std::time::Duration;

// Third party imports
use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{debug, info, warn};

// Internal imports
use crate::chain::ChainRpc;
use crate::config::{FLAG_CONFIRMATIONS, FLAG_FALLBACK_GAS};
use common::cache::TtlCache;
use common::codec;
use common::error::{classify_rpc_error, SentinelError};
use common::models::flag::{FlagOutcome, WalletFlag};
use common::models::score::RiskLevel;

/// ABI của flag contract ở dạng human-readable
const FLAG_REGISTRY_ABI: &[&str] = &[
    "function flagWallet(address wallet, uint256 score, string reason)",
    "function unflagWallet(address wallet)",
    "function updateRiskLevel(address wallet, uint8 riskLevel)",
    "function isWalletFlagged(address wallet) view returns (bool)",
    "function getWalletFlag(address wallet) view returns (bool, uint8, uint256, uint256, uint256, address, string)",
    "function getAllFlaggedWallets() view returns (address[])",
    "function getActiveFlaggedCount() view returns (uint256)",
    "event WalletFlagged(address indexed wallet, uint8 riskLevel, uint256 score)",
    "event WalletUnflagged(address indexed wallet)",
    "event RiskLevelUpdated(address indexed wallet, uint8 riskLevel)",
];

/// Thời gian chờ tối đa cho một lần ghi flag đạt đủ xác nhận
const WRITE_TIMEOUT: Duration = Duration::from_secs(120);
/// TTL cache kết quả isWalletFlagged để batch tick không dội contract
const FLAG_CACHE_TTL: Duration = Duration::from_secs(30);
const FLAG_CACHE_SIZE: usize = 10_000;

/// Bề mặt registry mà coordinator và API façade dùng. `is_flagged` tôn
/// trọng luật hết hạn của chính contract.
#[async_trait]
pub trait FlagRegistry: Send + Sync {
    async fn is_flagged(&self, wallet: Address) -> Result<bool, SentinelError>;

    async fn get_flag(&self, wallet: Address) -> Result<Option<WalletFlag>, SentinelError>;

    async fn list_flagged(&self) -> Result<Vec<Address>, SentinelError>;

    async fn active_count(&self) -> Result<u64, SentinelError>;

    /// Ghi flag CRITICAL. "Already flagged" là thành công idempotent.
    async fn flag(
        &self,
        wallet: Address,
        level: RiskLevel,
        score: f64,
        reason: &str,
    ) -> Result<FlagOutcome, SentinelError>;

    async fn unflag(&self, wallet: Address) -> Result<FlagOutcome, SentinelError>;

    async fn update_risk(
        &self,
        wallet: Address,
        level: RiskLevel,
    ) -> Result<FlagOutcome, SentinelError>;

    /// Có signer để ghi on-chain không
    fn can_write(&self) -> bool;
}

type WriteClient = SignerMiddleware<Provider<Http>, LocalWallet>;

/// Registry trên contract thật qua ethers. Không có signer thì chỉ đọc.
pub struct ContractFlagRegistry {
    read: Contract<Provider<Http>>,
    write: Option<Contract<WriteClient>>,
    chain: Arc<dyn ChainRpc>,
    /// Cache đọc isWalletFlagged; chỉ cache kết quả true vô hại vì flag
    /// không tự biến mất trong cửa sổ TTL
    flag_cache: TtlCache<bool>,
}

impl ContractFlagRegistry {
    pub fn new(
        contract_address: Address,
        provider: Arc<Provider<Http>>,
        signer_key: Option<&str>,
        chain_id: u64,
        chain: Arc<dyn ChainRpc>,
    ) -> Result<Self> {
        let abi = parse_abi(FLAG_REGISTRY_ABI).context("flag registry ABI is malformed")?;
        let read = Contract::new(contract_address, abi.clone(), provider.clone());

        let write = match signer_key {
            Some(key) => {
                let wallet: LocalWallet = key
                    .trim()
                    .parse()
                    .context("PRIVATE_KEY is not a valid secp256k1 key")?;
                let wallet = wallet.with_chain_id(chain_id);
                info!(signer = %codec::short_address(&wallet.address()), "flag registry signer ready");
                let client = SignerMiddleware::new((*provider).clone(), wallet);
                Some(Contract::new(contract_address, abi, Arc::new(client)))
            }
            None => {
                info!("no PRIVATE_KEY configured, flag registry is read-only");
                None
            }
        };

        Ok(Self {
            read,
            write,
            chain,
            flag_cache: TtlCache::new(FLAG_CACHE_TTL, FLAG_CACHE_SIZE),
        })
    }

    fn write_contract(&self) -> Result<&Contract<WriteClient>, SentinelError> {
        self.write.as_ref().ok_or_else(|| {
            SentinelError::NotConfigured("flag registry has no signer".to_string())
        })
    }

    /// Gửi một contract call ghi: ước lượng gas (fallback cố định), chọn
    /// EIP-1559 khi chain hỗ trợ, chờ đủ xác nhận.
    async fn submit_write(
        &self,
        method: &str,
        call: ethers::contract::ContractCall<WriteClient, H256>,
    ) -> Result<FlagOutcome, SentinelError> {
        let gas = match call.estimate_gas().await {
            Ok(estimate) => estimate,
            Err(e) => {
                let classified = classify_rpc_error(&e.to_string());
                if let SentinelError::AlreadyFlagged(_) = classified {
                    return Ok(FlagOutcome::already_flagged());
                }
                debug!(method, error = %e, "gas estimation failed, using fallback limit");
                U256::from(FLAG_FALLBACK_GAS)
            }
        };
        let mut call = call.gas(gas);

        match self.chain.fee_data().await {
            Ok(fee) if !fee.supports_eip1559() => {
                call = call.legacy().gas_price(fee.gas_price);
            }
            Ok(_) => {} // SignerMiddleware tự điền các trường 1559
            Err(e) => {
                debug!(method, error = %e, "fee data unavailable, provider defaults apply");
            }
        }

        let tx_hash = match call.send().await {
            Ok(pending) => *pending,
            Err(e) => {
                let classified = classify_rpc_error(&e.to_string());
                return match classified {
                    SentinelError::AlreadyFlagged(_) => Ok(FlagOutcome::already_flagged()),
                    other => {
                        warn!(method, error = %other, "registry write rejected");
                        Ok(FlagOutcome::failure(other.to_string()))
                    }
                };
            }
        };

        match self
            .chain
            .wait_for_tx(tx_hash, FLAG_CONFIRMATIONS, WRITE_TIMEOUT)
            .await
        {
            Ok(Some(_receipt)) => {
                info!(method, tx = %codec::short_hash(&tx_hash), "registry write confirmed");
                Ok(FlagOutcome::success(tx_hash))
            }
            Ok(None) => Ok(FlagOutcome::failure(format!(
                "{} receipt missing for {:#x}",
                method, tx_hash
            ))),
            Err(e) => Ok(FlagOutcome::failure(e.to_string())),
        }
    }
}

#[async_trait]
impl FlagRegistry for ContractFlagRegistry {
    async fn is_flagged(&self, wallet: Address) -> Result<bool, SentinelError> {
        let key = codec::canonical(&wallet);
        if let Some(true) = self.flag_cache.get(&key).await {
            return Ok(true);
        }

        let flagged = self
            .read
            .method::<_, bool>("isWalletFlagged", wallet)
            .map_err(|e| SentinelError::ContractRejected(e.to_string()))?
            .call()
            .await
            .map_err(|e| classify_rpc_error(&e.to_string()))?;

        if flagged {
            self.flag_cache.set(key, true).await;
        }
        Ok(flagged)
    }

    async fn get_flag(&self, wallet: Address) -> Result<Option<WalletFlag>, SentinelError> {
        let (is_flagged, level, score, flagged_at, expires_at, flagged_by, reason) = self
            .read
            .method::<_, (bool, U256, U256, U256, U256, Address, String)>("getWalletFlag", wallet)
            .map_err(|e| SentinelError::ContractRejected(e.to_string()))?
            .call()
            .await
            .map_err(|e| classify_rpc_error(&e.to_string()))?;

        if !is_flagged && flagged_at.is_zero() {
            return Ok(None);
        }

        Ok(Some(WalletFlag {
            wallet,
            is_flagged,
            risk_level: RiskLevel::from_u8(level.as_u64().min(3) as u8)
                .unwrap_or(RiskLevel::Critical),
            reputation_score: score.as_u64(),
            flagged_at: flagged_at.as_u64(),
            expires_at: expires_at.as_u64(),
            flagged_by,
            reason,
            tx_hash: None,
        }))
    }

    async fn list_flagged(&self) -> Result<Vec<Address>, SentinelError> {
        self.read
            .method::<_, Vec<Address>>("getAllFlaggedWallets", ())
            .map_err(|e| SentinelError::ContractRejected(e.to_string()))?
            .call()
            .await
            .map_err(|e| classify_rpc_error(&e.to_string()))
    }

    async fn active_count(&self) -> Result<u64, SentinelError> {
        let count = self
            .read
            .method::<_, U256>("getActiveFlaggedCount", ())
            .map_err(|e| SentinelError::ContractRejected(e.to_string()))?
            .call()
            .await
            .map_err(|e| classify_rpc_error(&e.to_string()))?;
        Ok(count.as_u64())
    }

    async fn flag(
        &self,
        wallet: Address,
        level: RiskLevel,
        score: f64,
        reason: &str,
    ) -> Result<FlagOutcome, SentinelError> {
        let contract = self.write_contract()?;
        let score = U256::from(score.clamp(0.0, 100.0).round() as u64);
        let call = contract
            .method::<_, H256>("flagWallet", (wallet, score, reason.to_string()))
            .map_err(|e| SentinelError::ContractRejected(e.to_string()))?;
        debug!(
            wallet = %codec::short_address(&wallet),
            level = %level,
            "submitting on-chain flag"
        );
        let outcome = self.submit_write("flagWallet", call).await?;
        if outcome.ok {
            self.flag_cache.set(codec::canonical(&wallet), true).await;
        }
        Ok(outcome)
    }

    async fn unflag(&self, wallet: Address) -> Result<FlagOutcome, SentinelError> {
        let contract = self.write_contract()?;
        let call = contract
            .method::<_, H256>("unflagWallet", wallet)
            .map_err(|e| SentinelError::ContractRejected(e.to_string()))?;
        let outcome = self.submit_write("unflagWallet", call).await?;
        if outcome.ok {
            self.flag_cache.remove(&codec::canonical(&wallet)).await;
        }
        Ok(outcome)
    }

    async fn update_risk(
        &self,
        wallet: Address,
        level: RiskLevel,
    ) -> Result<FlagOutcome, SentinelError> {
        let contract = self.write_contract()?;
        let call = contract
            .method::<_, H256>("updateRiskLevel", (wallet, U256::from(level.as_u8())))
            .map_err(|e| SentinelError::ContractRejected(e.to_string()))?;
        self.submit_write("updateRiskLevel", call).await
    }

    fn can_write(&self) -> bool {
        self.write.is_some()
    }
}
