//! CLI argument validation functions
//!
//! This module provides custom validation functions for CLI arguments
//! that go beyond what clap can validate automatically.

use jiff::SignedDuration;
use serde_json::Value as JsonValue;
use std::fs;
use std::path::PathBuf;

/// Validate that a file path is accessible (exists and is readable)
pub fn validate_config_file_path(path_str: &str) -> Result<PathBuf, String> {
    let path = PathBuf::from(path_str);

    if !path.exists() {
        return Err(format!("Configuration file does not exist: '{}'", path_str));
    }

    if !path.is_file() {
        return Err(format!("Configuration path is not a file: '{}'", path_str));
    }

    match fs::File::open(&path) {
        Ok(_) => Ok(path),
        Err(e) => Err(format!("Cannot read configuration file '{}': {}", path_str, e)),
    }
}

/// Validate rollback steps is a positive number
pub fn validate_rollback_steps(steps_str: &str) -> Result<u32, String> {
    let steps: u32 = steps_str.parse().map_err(|_| {
        format!(
            "Rollback steps must be a valid positive number, got: '{}'",
            steps_str
        )
    })?;

    if steps == 0 {
        return Err("Rollback steps must be greater than 0".to_string());
    }

    if steps > 100 {
        return Err("Rollback steps cannot exceed 100 for safety reasons".to_string());
    }

    Ok(steps)
}

/// Parse a strictly positive duration in friendly ("1h 30m") or ISO 8601
/// ("PT1H30M") notation
pub fn validate_duration(duration_str: &str) -> Result<SignedDuration, String> {
    let duration: SignedDuration = duration_str
        .trim()
        .parse()
        .map_err(|e| format!("Invalid duration '{}': {}", duration_str, e))?;

    if !duration.is_positive() {
        return Err(format!("Duration must be positive, got: '{}'", duration_str));
    }

    Ok(duration)
}

/// Parse flow arguments; they must form a JSON object
pub fn validate_flow_args(args_str: &str) -> Result<JsonValue, String> {
    let value: JsonValue =
        serde_json::from_str(args_str).map_err(|e| format!("Invalid JSON arguments: {}", e))?;

    if !value.is_object() {
        return Err("Flow arguments must be a JSON object".to_string());
    }

    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_config_file_path_validation() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[scheduler]").unwrap();
        let path = file.path().to_str().unwrap();
        assert!(validate_config_file_path(path).is_ok());

        let dir = tempfile::tempdir().unwrap();
        assert!(validate_config_file_path(dir.path().to_str().unwrap()).is_err());
        assert!(validate_config_file_path("/definitely/not/here.toml").is_err());
    }

    #[test]
    fn test_rollback_steps_validation_valid() {
        for steps_str in ["1", "5", "10", "50", "100"] {
            let result = validate_rollback_steps(steps_str);
            assert!(result.is_ok(), "Steps {} should be valid", steps_str);
        }
    }

    #[test]
    fn test_rollback_steps_validation_invalid() {
        for steps_str in ["0", "101", "999", "-1", "abc", ""] {
            let result = validate_rollback_steps(steps_str);
            assert!(result.is_err(), "Steps '{}' should be invalid", steps_str);
        }
    }

    #[test]
    fn test_duration_validation_valid() {
        assert_eq!(validate_duration("10s").unwrap(), SignedDuration::from_secs(10));
        assert_eq!(validate_duration("1h 30m").unwrap(), SignedDuration::from_mins(90));
        assert_eq!(validate_duration("PT5M").unwrap(), SignedDuration::from_mins(5));
    }

    #[test]
    fn test_duration_validation_invalid() {
        for duration_str in ["", "0s", "-5m", "ten minutes", "5"] {
            let result = validate_duration(duration_str);
            assert!(result.is_err(), "Duration '{}' should be invalid", duration_str);
        }
    }

    #[test]
    fn test_flow_args_validation() {
        assert!(validate_flow_args(r#"{"retention_days": 7}"#).is_ok());
        assert!(validate_flow_args("{}").is_ok());
        assert!(validate_flow_args("[1, 2]").is_err());
        assert!(validate_flow_args("null").is_err());
        assert!(validate_flow_args("{not json").is_err());
    }
}
