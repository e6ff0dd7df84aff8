// External imports
use ethers::providers::{Http, Middleware, Provider};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Block, Bytes, Filter, Log, Transaction, TransactionReceipt, H256, U256};

// Standard library imports
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

// Third party imports
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::{debug, info};

// Internal imports
use common::error::{classify_rpc_error, SentinelError};
use common::retry_policy::RetryPolicy;

/// Thời gian chờ mặc định cho một lời gọi RPC
const CALL_TIMEOUT: Duration = Duration::from_secs(10);

/// Thông tin phí gas của chain; ưu tiên EIP-1559 khi node trả về.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeeData {
    pub gas_price: U256,
    pub max_fee_per_gas: Option<U256>,
    pub max_priority_fee_per_gas: Option<U256>,
}

impl FeeData {
    pub fn supports_eip1559(&self) -> bool {
        self.max_fee_per_gas.is_some() && self.max_priority_fee_per_gas.is_some()
    }
}

/// Bề mặt truy cập chain chỉ đọc (cộng estimate gas) mà pipeline cần.
/// Mọi lời gọi đều được retry với backoff bên trong implementation;
/// receipt null nghĩa là pending, KHÔNG phải lỗi.
#[async_trait]
pub trait ChainRpc: Send + Sync {
    async fn block_number(&self) -> Result<u64, SentinelError>;

    async fn block_with_txs(&self, number: u64)
        -> Result<Option<Block<Transaction>>, SentinelError>;

    async fn transaction(&self, hash: H256) -> Result<Option<Transaction>, SentinelError>;

    async fn receipt(&self, hash: H256) -> Result<Option<TransactionReceipt>, SentinelError>;

    async fn logs(&self, filter: &Filter) -> Result<Vec<Log>, SentinelError>;

    async fn balance(&self, address: Address) -> Result<U256, SentinelError>;

    async fn nonce(&self, address: Address) -> Result<u64, SentinelError>;

    async fn code(&self, address: Address) -> Result<Bytes, SentinelError>;

    async fn estimate_gas(&self, tx: &TypedTransaction) -> Result<U256, SentinelError>;

    async fn fee_data(&self) -> Result<FeeData, SentinelError>;

    /// Đợi giao dịch đạt đủ số xác nhận, poll receipt định kỳ.
    /// Hết `timeout` mà chưa đủ xác nhận là lỗi Timeout.
    async fn wait_for_tx(
        &self,
        hash: H256,
        confirmations: usize,
        timeout: Duration,
    ) -> Result<Option<TransactionReceipt>, SentinelError> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(receipt) = self.receipt(hash).await? {
                if confirmations <= 1 {
                    return Ok(Some(receipt));
                }
                if let Some(mined_in) = receipt.block_number {
                    let latest = self.block_number().await?;
                    if latest.saturating_sub(mined_in.as_u64()) + 1 >= confirmations as u64 {
                        return Ok(Some(receipt));
                    }
                }
            }
            if Instant::now() >= deadline {
                return Err(SentinelError::Timeout(
                    timeout,
                    format!("waiting for tx {:#x}", hash),
                ));
            }
            sleep(crate::config::BLOCK_POLL_INTERVAL).await;
        }
    }
}

/// Chain client mỏng trên JSON-RPC: Provider<Http> + retry policy dùng
/// chung + timeout từng lời gọi.
pub struct ChainClient {
    provider: Arc<Provider<Http>>,
    retry: RetryPolicy,
    call_timeout: Duration,
}

impl ChainClient {
    /// Kết nối endpoint và đối chiếu chain id khai báo với chain id thật.
    /// Endpoint không phản hồi hoặc chain id lệch là lỗi khởi động fatal.
    pub async fn connect(rpc_url: &str, expected_chain_id: u64) -> Result<Self> {
        let provider = Provider::<Http>::try_from(rpc_url)
            .map_err(|e| anyhow!("cannot build provider for {}: {}", rpc_url, e))?;
        let client = Self {
            provider: Arc::new(provider),
            retry: RetryPolicy::default(),
            call_timeout: CALL_TIMEOUT,
        };

        let actual = client
            .call("eth_chainId", |p| async move { p.get_chainid().await })
            .await
            .map_err(|e| anyhow!("chain endpoint unreachable: {}", e))?;
        if actual.as_u64() != expected_chain_id {
            return Err(anyhow!(
                "chain id mismatch: endpoint reports {}, configured {}",
                actual,
                expected_chain_id
            ));
        }

        info!(rpc_url, chain_id = expected_chain_id, "chain client connected");
        Ok(client)
    }

    /// Provider gốc cho các thành phần cần xây contract call (registry).
    pub fn provider(&self) -> Arc<Provider<Http>> {
        self.provider.clone()
    }

    /// Gọi provider với timeout + retry. Lỗi provider được phân loại theo
    /// thông báo; chỉ lỗi transient mới được retry.
    async fn call<T, F, Fut>(&self, op: &'static str, f: F) -> Result<T, SentinelError>
    where
        F: Fn(Arc<Provider<Http>>) -> Fut,
        Fut: Future<Output = Result<T, ethers::providers::ProviderError>>,
    {
        let call_timeout = self.call_timeout;
        self.retry
            .retry(op, || {
                let fut = f(self.provider.clone());
                async move {
                    match tokio::time::timeout(call_timeout, fut).await {
                        Ok(Ok(value)) => Ok(value),
                        Ok(Err(e)) => Err(classify_rpc_error(&e.to_string())),
                        Err(_) => Err(SentinelError::Timeout(call_timeout, op.to_string())),
                    }
                }
            })
            .await
    }
}

#[async_trait]
impl ChainRpc for ChainClient {
    async fn block_number(&self) -> Result<u64, SentinelError> {
        let number = self
            .call("eth_blockNumber", |p| async move { p.get_block_number().await })
            .await?;
        Ok(number.as_u64())
    }

    async fn block_with_txs(
        &self,
        number: u64,
    ) -> Result<Option<Block<Transaction>>, SentinelError> {
        self.call("eth_getBlockByNumber", |p| async move {
            p.get_block_with_txs(number).await
        })
        .await
    }

    async fn transaction(&self, hash: H256) -> Result<Option<Transaction>, SentinelError> {
        self.call("eth_getTransactionByHash", |p| async move {
            p.get_transaction(hash).await
        })
        .await
    }

    async fn receipt(&self, hash: H256) -> Result<Option<TransactionReceipt>, SentinelError> {
        // Receipt null = giao dịch còn pending
        self.call("eth_getTransactionReceipt", |p| async move {
            p.get_transaction_receipt(hash).await
        })
        .await
    }

    async fn logs(&self, filter: &Filter) -> Result<Vec<Log>, SentinelError> {
        let filter = filter.clone();
        self.call("eth_getLogs", move |p| {
            let filter = filter.clone();
            async move { p.get_logs(&filter).await }
        })
        .await
    }

    async fn balance(&self, address: Address) -> Result<U256, SentinelError> {
        self.call("eth_getBalance", |p| async move {
            p.get_balance(address, None).await
        })
        .await
    }

    async fn nonce(&self, address: Address) -> Result<u64, SentinelError> {
        let count = self
            .call("eth_getTransactionCount", |p| async move {
                p.get_transaction_count(address, None).await
            })
            .await?;
        Ok(count.as_u64())
    }

    async fn code(&self, address: Address) -> Result<Bytes, SentinelError> {
        self.call("eth_getCode", |p| async move { p.get_code(address, None).await })
            .await
    }

    async fn estimate_gas(&self, tx: &TypedTransaction) -> Result<U256, SentinelError> {
        let tx = tx.clone();
        self.call("eth_estimateGas", move |p| {
            let tx = tx.clone();
            async move { p.estimate_gas(&tx, None).await }
        })
        .await
    }

    async fn fee_data(&self) -> Result<FeeData, SentinelError> {
        let gas_price = self
            .call("eth_gasPrice", |p| async move { p.get_gas_price().await })
            .await?;

        // Chain không hỗ trợ 1559 sẽ lỗi ở đây; rơi về legacy gas price
        let eip1559 = self
            .call("eth_feeHistory", |p| async move {
                p.estimate_eip1559_fees(None).await
            })
            .await;

        match eip1559 {
            Ok((max_fee, max_priority)) => Ok(FeeData {
                gas_price,
                max_fee_per_gas: Some(max_fee),
                max_priority_fee_per_gas: Some(max_priority),
            }),
            Err(e) => {
                debug!(error = %e, "EIP-1559 fee estimation unavailable, using legacy gas price");
                Ok(FeeData {
                    gas_price,
                    max_fee_per_gas: None,
                    max_priority_fee_per_gas: None,
                })
            }
        }
    }
}

/// Mock chain cho test: trạng thái block/receipt/balance cài sẵn,
/// có thể ép lỗi transient để kiểm tra chính sách skip-tick.
#[cfg(test)]
pub mod mock {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct MockState {
        pub latest_block: u64,
        pub blocks: HashMap<u64, Block<Transaction>>,
        pub receipts: HashMap<H256, TransactionReceipt>,
        pub balances: HashMap<Address, U256>,
        pub nonces: HashMap<Address, u64>,
        /// Khi true, mọi lời gọi trả lỗi transient
        pub fail_all: bool,
    }

    pub struct MockChain {
        pub state: Mutex<MockState>,
        pub call_count: AtomicU64,
    }

    impl MockChain {
        pub fn new(latest_block: u64) -> Self {
            Self {
                state: Mutex::new(MockState {
                    latest_block,
                    ..Default::default()
                }),
                call_count: AtomicU64::new(0),
            }
        }

        /// Tạo một transaction kèm receipt thành công/thất bại trong block
        pub fn add_tx(
            &self,
            hash_seed: u64,
            block_number: u64,
            timestamp_secs: u64,
            from: Address,
            to: Option<Address>,
            value: u64,
            success: bool,
        ) -> H256 {
            let hash = H256::from_low_u64_be(hash_seed);
            let mut tx = Transaction::default();
            tx.hash = hash;
            tx.from = from;
            tx.to = to;
            tx.value = U256::from(value);
            tx.nonce = U256::from(hash_seed);
            tx.gas_price = Some(U256::from(1_000_000_000u64));
            tx.block_number = Some(block_number.into());

            let mut receipt = TransactionReceipt::default();
            receipt.transaction_hash = hash;
            receipt.block_number = Some(block_number.into());
            receipt.gas_used = Some(U256::from(21_000u64));
            receipt.status = Some(if success { 1u64.into() } else { 0u64.into() });

            let mut state = self.state.lock().unwrap();
            let block = state.blocks.entry(block_number).or_insert_with(|| {
                let mut b: Block<Transaction> = Block::default();
                b.number = Some(block_number.into());
                b.timestamp = U256::from(timestamp_secs);
                b
            });
            block.transactions.push(tx);
            state.receipts.insert(hash, receipt);
            if block_number > state.latest_block {
                state.latest_block = block_number;
            }
            hash
        }

        pub fn set_latest(&self, number: u64) {
            self.state.lock().unwrap().latest_block = number;
        }

        pub fn set_fail_all(&self, fail: bool) {
            self.state.lock().unwrap().fail_all = fail;
        }

        fn check_fail(&self) -> Result<(), SentinelError> {
            self.call_count.fetch_add(1, Ordering::SeqCst);
            if self.state.lock().unwrap().fail_all {
                Err(SentinelError::Rpc("mock chain failure".to_string()))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl ChainRpc for MockChain {
        async fn block_number(&self) -> Result<u64, SentinelError> {
            self.check_fail()?;
            Ok(self.state.lock().unwrap().latest_block)
        }

        async fn block_with_txs(
            &self,
            number: u64,
        ) -> Result<Option<Block<Transaction>>, SentinelError> {
            self.check_fail()?;
            Ok(self.state.lock().unwrap().blocks.get(&number).cloned())
        }

        async fn transaction(&self, hash: H256) -> Result<Option<Transaction>, SentinelError> {
            self.check_fail()?;
            let state = self.state.lock().unwrap();
            for block in state.blocks.values() {
                if let Some(tx) = block.transactions.iter().find(|t| t.hash == hash) {
                    return Ok(Some(tx.clone()));
                }
            }
            Ok(None)
        }

        async fn receipt(&self, hash: H256) -> Result<Option<TransactionReceipt>, SentinelError> {
            self.check_fail()?;
            Ok(self.state.lock().unwrap().receipts.get(&hash).cloned())
        }

        async fn logs(&self, _filter: &Filter) -> Result<Vec<Log>, SentinelError> {
            self.check_fail()?;
            Ok(Vec::new())
        }

        async fn balance(&self, address: Address) -> Result<U256, SentinelError> {
            self.check_fail()?;
            Ok(self
                .state
                .lock()
                .unwrap()
                .balances
                .get(&address)
                .cloned()
                .unwrap_or_default())
        }

        async fn nonce(&self, address: Address) -> Result<u64, SentinelError> {
            self.check_fail()?;
            Ok(self
                .state
                .lock()
                .unwrap()
                .nonces
                .get(&address)
                .cloned()
                .unwrap_or_default())
        }

        async fn code(&self, _address: Address) -> Result<Bytes, SentinelError> {
            self.check_fail()?;
            Ok(Bytes::default())
        }

        async fn estimate_gas(&self, _tx: &TypedTransaction) -> Result<U256, SentinelError> {
            self.check_fail()?;
            Ok(U256::from(21_000u64))
        }

        async fn fee_data(&self) -> Result<FeeData, SentinelError> {
            self.check_fail()?;
            Ok(FeeData {
                gas_price: U256::from(1_000_000_000u64),
                max_fee_per_gas: None,
                max_priority_fee_per_gas: None,
            })
        }
    }
}

/// Module tests
#[cfg(test)]
mod tests {
    use super::mock::MockChain;
    use super::*;
    use std::str::FromStr;

    fn wallet() -> Address {
        Address::from_str("0x1111111111111111111111111111111111111111").unwrap()
    }

    /// Test mock trả về block và receipt đã cài
    #[tokio::test]
    async fn test_mock_chain_basics() {
        let chain = MockChain::new(100);
        let hash = chain.add_tx(1, 100, 1_700_000_000, wallet(), None, 10, true);

        assert_eq!(chain.block_number().await.unwrap(), 100);
        let block = chain.block_with_txs(100).await.unwrap().unwrap();
        assert_eq!(block.transactions.len(), 1);
        let receipt = chain.receipt(hash).await.unwrap().unwrap();
        assert_eq!(receipt.status, Some(1u64.into()));
        // Receipt chưa có = pending, không phải lỗi
        assert!(chain
            .receipt(H256::from_low_u64_be(99))
            .await
            .unwrap()
            .is_none());
    }

    /// Test wait_for_tx đạt đủ xác nhận qua default method của trait
    #[tokio::test]
    async fn test_wait_for_tx_confirmations() {
        let chain = MockChain::new(100);
        let hash = chain.add_tx(2, 100, 1_700_000_000, wallet(), None, 10, true);

        // latest 100, mined 100 → 1 xác nhận, cần 2 → set latest 101
        chain.set_latest(101);
        let receipt = chain
            .wait_for_tx(hash, 2, Duration::from_secs(5))
            .await
            .unwrap();
        assert!(receipt.is_some());
    }

    /// Test wait_for_tx timeout khi giao dịch mãi pending
    #[tokio::test]
    async fn test_wait_for_tx_timeout() {
        let chain = MockChain::new(100);
        let result = chain
            .wait_for_tx(H256::from_low_u64_be(5), 2, Duration::from_millis(10))
            .await;
        assert!(matches!(result, Err(SentinelError::Timeout(_, _))));
    }

    /// Test ép lỗi transient
    #[tokio::test]
    async fn test_mock_fail_all() {
        let chain = MockChain::new(100);
        chain.set_fail_all(true);
        assert!(chain.block_number().await.is_err());
        chain.set_fail_all(false);
        assert!(chain.block_number().await.is_ok());
    }
}
