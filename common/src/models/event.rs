// External imports
use ethers::types::{Address, Bytes, H256, U256};

// Third party imports
use serde::{Deserialize, Serialize};

/// Loại hành động on-chain quan sát được
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Transfer,
    ContractCall,
    TokenTransfer,
}

/// Trạng thái thực thi của giao dịch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Success,
    Failed,
}

/// Một hành động on-chain chạm tới ví đang giám sát. Được ingester tạo,
/// nối vào ring buffer của coordinator, scoring tiêu thụ; bất biến sau
/// khi tạo. `tx_hash` định danh duy nhất trong tập giám sát.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletEvent {
    pub kind: EventKind,
    pub tx_hash: H256,
    pub from: Address,
    pub to: Option<Address>,
    /// Giá trị native theo minor units (wei)
    pub value: U256,
    pub block_number: u64,
    /// Unix timestamp theo milliseconds (UTC)
    pub timestamp: u64,
    pub gas_price: U256,
    pub gas_used: U256,
    pub status: EventStatus,
    pub input: Bytes,
    pub contract_address: Option<Address>,
    pub token_symbol: Option<String>,
    pub token_value: Option<U256>,
    /// 4 byte đầu của input nếu có
    pub method_selector: Option<[u8; 4]>,
    pub nonce: u64,
    pub log_index: u64,
    /// Metadata tùy chọn, không dùng làm khóa sắp xếp
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<u64>,
}

impl WalletEvent {
    /// Sự kiện có chạm tới ví này không (sender hoặc receiver)
    pub fn touches(&self, wallet: &Address) -> bool {
        self.from == *wallet || self.to.map(|t| t == *wallet).unwrap_or(false)
    }

    pub fn is_success(&self) -> bool {
        self.status == EventStatus::Success
    }

    /// Tương tác contract: có contract address hoặc input dài hơn selector
    pub fn is_contract_interaction(&self) -> bool {
        self.contract_address.is_some() || self.input.len() > 4
    }

    /// Khóa sắp xếp trong một ví: block number rồi log index
    pub fn order_key(&self) -> (u64, u64) {
        (self.block_number, self.log_index)
    }
}

/// Module tests
#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn sample_event() -> WalletEvent {
        WalletEvent {
            kind: EventKind::Transfer,
            tx_hash: H256::from_low_u64_be(1),
            from: Address::from_str("0x1111111111111111111111111111111111111111").unwrap(),
            to: Some(Address::from_str("0x2222222222222222222222222222222222222222").unwrap()),
            value: U256::from(1000u64),
            block_number: 100,
            timestamp: 1_700_000_000_000,
            gas_price: U256::from(5u64),
            gas_used: U256::from(21000u64),
            status: EventStatus::Success,
            input: Bytes::default(),
            contract_address: None,
            token_symbol: None,
            token_value: None,
            method_selector: None,
            nonce: 0,
            log_index: 0,
            position: None,
        }
    }

    /// Test touches với sender và receiver
    #[test]
    fn test_touches() {
        let event = sample_event();
        assert!(event.touches(&event.from));
        assert!(event.touches(&event.to.unwrap()));
        assert!(!event.touches(
            &Address::from_str("0x3333333333333333333333333333333333333333").unwrap()
        ));
    }

    /// Test phát hiện tương tác contract
    #[test]
    fn test_contract_interaction() {
        let mut event = sample_event();
        assert!(!event.is_contract_interaction());

        event.input = Bytes::from(vec![0xab, 0xcd, 0xef, 0x01, 0x02]);
        assert!(event.is_contract_interaction());

        let mut with_contract = sample_event();
        with_contract.contract_address =
            Some(Address::from_str("0x4444444444444444444444444444444444444444").unwrap());
        assert!(with_contract.is_contract_interaction());
    }

    /// Test serde giữ nguyên kind snake_case
    #[test]
    fn test_event_kind_serde() {
        let json = serde_json::to_string(&EventKind::TokenTransfer).unwrap();
        assert_eq!(json, "\"token_transfer\"");
    }

    /// Test khóa sắp xếp
    #[test]
    fn test_order_key() {
        let mut a = sample_event();
        let mut b = sample_event();
        a.block_number = 10;
        a.log_index = 2;
        b.block_number = 10;
        b.log_index = 3;
        assert!(a.order_key() < b.order_key());
        b.block_number = 9;
        assert!(a.order_key() > b.order_key());
    }
}
