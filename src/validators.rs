//! Input validation and sanitization functions for Gatewall
//!
//! This module provides centralized validation for all user inputs. Every
//! function returns a plain `String` error message destined for a per-field
//! error map; nothing here panics or aborts an operation on its own.

use crate::core::rules::BLOCK_RANGES;
use std::net::IpAddr;

/// Sanitizes a label for safe storage and log output.
///
/// Removes control characters, quotes, and shell metacharacters.
/// Limits length to 64 bytes (ASCII characters only).
///
/// Uses `is_ascii_alphanumeric()` to prevent Unicode-based bypasses and
/// ensure labels stay within system limits (64 bytes max).
pub fn sanitize_label(input: &str) -> String {
    input
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, ' ' | '-' | '_' | '.' | ':'))
        .take(64)
        .collect()
}

/// Validates an IP address string (v4 or v6).
///
/// # Errors
///
/// Returns `Err` if the string does not parse as an IP address.
pub fn validate_ip(input: &str) -> Result<IpAddr, String> {
    input
        .trim()
        .parse::<IpAddr>()
        .map_err(|_| "Invalid IP address".to_string())
}

/// Validates a block-rule CIDR prefix length.
///
/// # Errors
///
/// Returns `Err` unless the range is one of 8/16/24/32.
pub fn validate_block_range(range: u8) -> Result<u8, String> {
    if BLOCK_RANGES.contains(&range) {
        Ok(range)
    } else {
        Err("Invalid range. Only 8/16/24/32 is supported".to_string())
    }
}

/// Parses and validates a port number string.
///
/// # Errors
///
/// Returns `Err` if the string is empty, non-numeric, zero, or above 65535.
pub fn parse_port(input: &str) -> Result<u16, String> {
    let trimmed = input.trim();

    if trimmed.is_empty() {
        return Err("Leave blank or enter a numeric port number to use this option".to_string());
    }

    match trimmed.parse::<u32>() {
        Ok(0) => Err("Invalid port number".to_string()),
        Ok(port) if port > 65_535 => Err("Invalid port number".to_string()),
        Ok(port) => Ok(u16::try_from(port).unwrap_or(0)),
        Err(_) => Err("Invalid port number".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_label_normal() {
        assert_eq!(sanitize_label("Normal Label"), "Normal Label");
        assert_eq!(sanitize_label("web-01 console"), "web-01 console");
        assert_eq!(sanitize_label("Rule_123"), "Rule_123");
    }

    #[test]
    fn test_sanitize_label_removes_control_chars() {
        assert_eq!(sanitize_label("Test\nNewline"), "TestNewline");
        assert_eq!(sanitize_label("Test\rCarriage"), "TestCarriage");
        assert_eq!(sanitize_label("Test\0Null"), "TestNull");
        assert_eq!(sanitize_label("Test\tTab"), "TestTab");
    }

    #[test]
    fn test_sanitize_label_removes_shell_metacharacters() {
        assert_eq!(sanitize_label("Test$Dollar"), "TestDollar");
        assert_eq!(sanitize_label("Test`Backtick"), "TestBacktick");
        assert_eq!(sanitize_label("Test|Pipe"), "TestPipe");
        assert_eq!(sanitize_label("Test;Semicolon"), "TestSemicolon");
    }

    #[test]
    fn test_sanitize_label_length_limit() {
        let long_label = "a".repeat(100);
        assert_eq!(sanitize_label(&long_label).len(), 64);
    }

    #[test]
    fn test_validate_ip_v4() {
        assert!(validate_ip("123.123.123.123").is_ok());
        assert!(validate_ip("10.0.3.15").is_ok());
        assert!(validate_ip(" 10.0.3.15 ").is_ok());
    }

    #[test]
    fn test_validate_ip_v6() {
        assert!(validate_ip("2001:db8::1").is_ok());
        assert!(validate_ip("::1").is_ok());
    }

    #[test]
    fn test_validate_ip_invalid() {
        assert!(validate_ip("").is_err());
        assert!(validate_ip("999.1.1.1").is_err());
        assert!(validate_ip("10.0.3").is_err());
        assert!(validate_ip("10.0.3.0/24").is_err());
        assert!(validate_ip("example.com").is_err());
    }

    #[test]
    fn test_validate_block_range() {
        for range in [8, 16, 24, 32] {
            assert_eq!(validate_block_range(range).unwrap(), range);
        }
        assert!(validate_block_range(0).is_err());
        assert!(validate_block_range(12).is_err());
        assert!(validate_block_range(33).is_err());
    }

    #[test]
    fn test_parse_port_valid() {
        assert_eq!(parse_port("2210").unwrap(), 2210);
        assert_eq!(parse_port(" 8080 ").unwrap(), 8080);
        assert_eq!(parse_port("65535").unwrap(), 65535);
    }

    #[test]
    fn test_parse_port_invalid() {
        assert!(parse_port("").is_err());
        assert!(parse_port("   ").is_err());
        assert!(parse_port("0").is_err());
        assert!(parse_port("65536").is_err());
        assert!(parse_port("-1").is_err());
        assert!(parse_port("22a").is_err());
        assert!(parse_port("ssh").is_err());
    }
}
