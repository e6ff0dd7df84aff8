// External imports
use ethers::types::{Address, H256, U256};
use ethers::utils::to_checksum;

// Standard library imports
use std::str::FromStr;

// Third party imports
use lazy_static::lazy_static;
use regex::Regex;

// Internal imports
use crate::error::SentinelError;

lazy_static! {
    static ref ADDRESS_REGEX: Regex = Regex::new(r"^(0x)?[0-9a-fA-F]{40}$").unwrap();
    static ref HASH_REGEX: Regex = Regex::new(r"^(0x)?[0-9a-fA-F]{64}$").unwrap();
}

/// Địa chỉ đã chuẩn hóa: dạng canonical lowercase dùng làm key trong toàn
/// hệ thống, dạng checksum EIP-55 dùng để hiển thị.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedAddress {
    /// Key canonical, luôn lowercase có tiền tố 0x
    pub canonical: String,
    /// Dạng checksum EIP-55 để hiển thị
    pub checksummed: String,
    /// Địa chỉ đã parse
    pub address: Address,
}

/// Chuẩn hóa một địa chỉ ví. Địa chỉ mixed-case phải có checksum EIP-55
/// đúng; địa chỉ toàn lowercase/uppercase được chấp nhận không cần checksum.
pub fn normalize_address(input: &str) -> Result<NormalizedAddress, SentinelError> {
    let trimmed = input.trim();
    if !ADDRESS_REGEX.is_match(trimmed) {
        return Err(SentinelError::InvalidAddress(trimmed.to_string()));
    }

    let with_prefix = if trimmed.starts_with("0x") {
        trimmed.to_string()
    } else {
        format!("0x{}", trimmed)
    };

    let address = Address::from_str(&with_prefix)
        .map_err(|_| SentinelError::InvalidAddress(trimmed.to_string()))?;
    let checksummed = to_checksum(&address, None);

    // Chỉ kiểm tra checksum khi input thật sự mixed-case
    let hex_part = &with_prefix[2..];
    let is_uniform_case =
        hex_part == hex_part.to_lowercase() || hex_part == hex_part.to_uppercase();
    if !is_uniform_case && with_prefix != checksummed {
        return Err(SentinelError::InvalidAddress(format!(
            "bad checksum: {}",
            trimmed
        )));
    }

    Ok(NormalizedAddress {
        canonical: format!("{:#x}", address),
        checksummed,
        address,
    })
}

/// Key canonical lowercase từ một `Address` đã parse.
pub fn canonical(address: &Address) -> String {
    format!("{:#x}", address)
}

/// Parse hash giao dịch 32 byte.
pub fn parse_tx_hash(input: &str) -> Result<H256, SentinelError> {
    let trimmed = input.trim();
    if !HASH_REGEX.is_match(trimmed) {
        return Err(SentinelError::Validation(format!(
            "invalid transaction hash: {}",
            trimmed
        )));
    }
    let with_prefix = if trimmed.starts_with("0x") {
        trimmed.to_string()
    } else {
        format!("0x{}", trimmed)
    };
    H256::from_str(&with_prefix)
        .map_err(|_| SentinelError::Validation(format!("invalid transaction hash: {}", trimmed)))
}

/// Định dạng một số nguyên minor-unit thành chuỗi thập phân với `decimals`
/// chữ số. Số học chuỗi thuần, không dùng float.
pub fn format_amount(amount: U256, decimals: u8) -> String {
    if amount.is_zero() {
        return "0".to_string();
    }

    let digits = amount.to_string();
    let decimals = decimals as usize;

    let (integer_part, decimal_part) = if digits.len() <= decimals {
        let padded = format!("{}{}", "0".repeat(decimals - digits.len()), digits);
        ("0".to_string(), padded)
    } else {
        let split = digits.len() - decimals;
        (digits[..split].to_string(), digits[split..].to_string())
    };

    let trimmed = decimal_part.trim_end_matches('0');
    if trimmed.is_empty() {
        integer_part
    } else {
        format!("{}.{}", integer_part, trimmed)
    }
}

/// Nghịch đảo của `format_amount`: parse chuỗi thập phân thành minor units.
/// Phần thập phân dài hơn `decimals` bị từ chối thay vì làm tròn ngầm.
pub fn parse_amount(input: &str, decimals: u8) -> Result<U256, SentinelError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(SentinelError::Validation("empty amount".to_string()));
    }

    let (integer_part, decimal_part) = match trimmed.split_once('.') {
        Some((i, d)) => (i, d),
        None => (trimmed, ""),
    };

    let decimals = decimals as usize;
    if decimal_part.len() > decimals {
        return Err(SentinelError::Validation(format!(
            "too many decimal places in amount: {}",
            trimmed
        )));
    }
    if !integer_part.chars().all(|c| c.is_ascii_digit())
        || !decimal_part.chars().all(|c| c.is_ascii_digit())
        || integer_part.is_empty()
    {
        return Err(SentinelError::Validation(format!(
            "invalid amount: {}",
            trimmed
        )));
    }

    let padded = format!("{}{}", decimal_part, "0".repeat(decimals - decimal_part.len()));
    let combined = format!("{}{}", integer_part, padded);
    U256::from_dec_str(&combined)
        .map_err(|_| SentinelError::Validation(format!("amount overflow: {}", trimmed)))
}

/// Rút gọn địa chỉ cho log: 0x1234...5678
pub fn short_address(address: &Address) -> String {
    let s = canonical(address);
    format!("{}...{}", &s[0..6], &s[s.len() - 4..])
}

/// Rút gọn hash cho log
pub fn short_hash(hash: &H256) -> String {
    let s = format!("{:#x}", hash);
    format!("{}...{}", &s[0..10], &s[s.len() - 6..])
}

/// Module tests
#[cfg(test)]
mod tests {
    use super::*;

    const ADDR: &str = "0xC188d7E186682502B0177bEbE427828e8F5daf50";

    /// Test chuẩn hóa idempotent và không phân biệt hoa thường
    #[test]
    fn test_normalize_idempotent() {
        let first = normalize_address(ADDR).unwrap();
        let second = normalize_address(&first.canonical).unwrap();
        assert_eq!(first.canonical, second.canonical);
        assert_eq!(first.checksummed, second.checksummed);

        let lower = normalize_address(&ADDR.to_lowercase()).unwrap();
        assert_eq!(lower.canonical, first.canonical);
    }

    /// Test checksum EIP-55
    #[test]
    fn test_checksum_validation() {
        // Checksum đúng
        assert!(normalize_address(ADDR).is_ok());
        // Mixed-case với checksum sai
        let bad = "0xC188d7e186682502B0177bEbE427828e8F5daf50";
        assert!(matches!(
            normalize_address(bad),
            Err(SentinelError::InvalidAddress(_))
        ));
        // Toàn lowercase luôn được chấp nhận
        assert!(normalize_address(&ADDR.to_lowercase()).is_ok());
    }

    /// Test địa chỉ không hợp lệ
    #[test]
    fn test_invalid_address() {
        assert!(normalize_address("not-an-address").is_err());
        assert!(normalize_address("0x1234").is_err());
        assert!(normalize_address("").is_err());
        // Thiếu tiền tố 0x vẫn hợp lệ nếu đủ 40 hex
        assert!(normalize_address("c188d7e186682502b0177bebe427828e8f5daf50").is_ok());
    }

    /// Test định dạng số lượng
    #[test]
    fn test_format_amount() {
        assert_eq!(
            format_amount(U256::from_dec_str("1000000000000000000").unwrap(), 18),
            "1"
        );
        assert_eq!(
            format_amount(U256::from_dec_str("1500000000000000000").unwrap(), 18),
            "1.5"
        );
        assert_eq!(
            format_amount(U256::from_dec_str("123456789").unwrap(), 18),
            "0.000000000123456789"
        );
        assert_eq!(format_amount(U256::zero(), 18), "0");
    }

    /// Test parse số lượng và vòng lặp với format
    #[test]
    fn test_parse_amount() {
        assert_eq!(
            parse_amount("1.5", 18).unwrap(),
            U256::from_dec_str("1500000000000000000").unwrap()
        );
        assert_eq!(parse_amount("0", 18).unwrap(), U256::zero());
        assert_eq!(
            parse_amount(&format_amount(U256::from(123456u64), 6), 6).unwrap(),
            U256::from(123456u64)
        );
        // Quá nhiều chữ số thập phân
        assert!(parse_amount("1.1234567", 6).is_err());
        assert!(parse_amount("abc", 6).is_err());
        assert!(parse_amount(".5", 6).is_err());
    }

    /// Test rút gọn hiển thị
    #[test]
    fn test_short_forms() {
        let addr = normalize_address(ADDR).unwrap().address;
        assert_eq!(short_address(&addr), "0xc188...af50");
    }
}
