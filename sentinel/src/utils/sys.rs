// Standard library imports
use std::fs;

/// RSS thô của tiến trình tính bằng MB, đọc từ /proc/self/statm.
/// Trả về 0.0 khi không đọc được (ngoài Linux).
pub fn memory_usage_mb() -> f64 {
    let raw = match fs::read_to_string("/proc/self/statm") {
        Ok(raw) => raw,
        Err(_) => return 0.0,
    };
    let resident_pages: f64 = raw
        .split_whitespace()
        .nth(1)
        .and_then(|field| field.parse().ok())
        .unwrap_or(0.0);
    resident_pages * 4096.0 / (1024.0 * 1024.0)
}

/// Module tests
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_usage_non_negative() {
        assert!(memory_usage_mb() >= 0.0);
    }
}
