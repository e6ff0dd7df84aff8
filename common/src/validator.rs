// Internal imports
use crate::codec::{normalize_address, NormalizedAddress};
use crate::error::SentinelError;
use crate::models::score::RiskLevel;

/// Giới hạn đầu vào của API façade
pub const MAX_BATCH_SIZE: usize = 50;
pub const MAX_REASON_LENGTH: usize = 256;

/// Validate và chuẩn hóa địa chỉ ví từ đầu vào của caller.
pub fn validate_wallet(input: &str) -> Result<NormalizedAddress, SentinelError> {
    if input.trim().is_empty() {
        return Err(SentinelError::InvalidAddress("empty address".to_string()));
    }
    normalize_address(input)
}

/// Validate mức rủi ro dạng chuỗi (API flag thủ công).
pub fn validate_risk_level(input: &str) -> Result<RiskLevel, SentinelError> {
    input.parse::<RiskLevel>()
}

/// Validate điểm uy tín thuộc [0,100].
pub fn validate_score(score: f64) -> Result<(), SentinelError> {
    if !score.is_finite() || !(0.0..=100.0).contains(&score) {
        return Err(SentinelError::ScoreOutOfRange(score));
    }
    Ok(())
}

/// Validate kích thước batch score.
pub fn validate_batch(wallets: &[String]) -> Result<(), SentinelError> {
    if wallets.is_empty() {
        return Err(SentinelError::Validation("empty wallet batch".to_string()));
    }
    if wallets.len() > MAX_BATCH_SIZE {
        return Err(SentinelError::BatchTooLarge {
            got: wallets.len(),
            max: MAX_BATCH_SIZE,
        });
    }
    Ok(())
}

/// Validate lý do flag: không rỗng, độ dài bị chặn.
pub fn validate_reason(reason: &str) -> Result<(), SentinelError> {
    let trimmed = reason.trim();
    if trimmed.is_empty() {
        return Err(SentinelError::Validation("empty flag reason".to_string()));
    }
    if trimmed.len() > MAX_REASON_LENGTH {
        return Err(SentinelError::Validation(format!(
            "flag reason too long: {} chars (max {})",
            trimmed.len(),
            MAX_REASON_LENGTH
        )));
    }
    Ok(())
}
