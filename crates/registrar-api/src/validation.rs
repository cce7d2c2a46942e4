//! Input validation utilities for Registrar API
//!
//! Malformed input is rejected here, at the boundary, before it reaches the
//! registry core.

use std::collections::BTreeMap;

use validator::ValidationError;

/// Maximum length for service_name field
pub const MAX_SERVICE_NAME_LENGTH: usize = 512;

/// Maximum length for instance_id field
pub const MAX_INSTANCE_ID_LENGTH: usize = 256;

/// Maximum length for endpoint field
pub const MAX_ENDPOINT_LENGTH: usize = 512;

/// Maximum number of metadata entries per lease
pub const MAX_METADATA_ENTRIES: usize = 64;

/// Maximum length of a metadata key or value
pub const MAX_METADATA_ITEM_LENGTH: usize = 1024;

fn is_identifier_char(c: char) -> bool {
    c.is_alphanumeric() || c == '.' || c == '-' || c == '_' || c == ':'
}

/// Validate service_name format
///
/// Service name must:
/// - Not be empty
/// - Not exceed MAX_SERVICE_NAME_LENGTH characters
/// - Contain only alphanumeric characters, dots, hyphens, underscores and colons
pub fn validate_service_name(service_name: &str) -> Result<(), ValidationError> {
    if service_name.is_empty() {
        return Err(ValidationError::new("service_name_empty"));
    }
    if service_name.len() > MAX_SERVICE_NAME_LENGTH {
        return Err(ValidationError::new("service_name_too_long"));
    }
    if !service_name.chars().all(is_identifier_char) {
        return Err(ValidationError::new("service_name_invalid_chars"));
    }
    Ok(())
}

/// Validate instance_id format
pub fn validate_instance_id(instance_id: &str) -> Result<(), ValidationError> {
    if instance_id.is_empty() {
        return Err(ValidationError::new("instance_id_empty"));
    }
    if instance_id.len() > MAX_INSTANCE_ID_LENGTH {
        return Err(ValidationError::new("instance_id_too_long"));
    }
    if !instance_id.chars().all(is_identifier_char) {
        return Err(ValidationError::new("instance_id_invalid_chars"));
    }
    Ok(())
}

/// Validate endpoint format: `host:port` with a numeric, non-zero port
pub fn validate_endpoint(endpoint: &str) -> Result<(), ValidationError> {
    if endpoint.is_empty() {
        return Err(ValidationError::new("endpoint_empty"));
    }
    if endpoint.len() > MAX_ENDPOINT_LENGTH {
        return Err(ValidationError::new("endpoint_too_long"));
    }
    let Some((host, port)) = endpoint.rsplit_once(':') else {
        return Err(ValidationError::new("endpoint_missing_port"));
    };
    if host.is_empty() || host.chars().any(char::is_whitespace) {
        return Err(ValidationError::new("endpoint_invalid_host"));
    }
    match port.parse::<u16>() {
        Ok(p) if p > 0 => Ok(()),
        _ => Err(ValidationError::new("endpoint_invalid_port")),
    }
}

/// Validate metadata size limits
pub fn validate_metadata(metadata: &BTreeMap<String, String>) -> Result<(), ValidationError> {
    if metadata.len() > MAX_METADATA_ENTRIES {
        return Err(ValidationError::new("metadata_too_many_entries"));
    }
    if metadata.iter().any(|(k, v)| {
        k.is_empty() || k.len() > MAX_METADATA_ITEM_LENGTH || v.len() > MAX_METADATA_ITEM_LENGTH
    }) {
        return Err(ValidationError::new("metadata_invalid_entry"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_service_name() {
        assert!(validate_service_name("billing").is_ok());
        assert!(validate_service_name("billing-api.v2").is_ok());
        assert!(validate_service_name("").is_err());
        assert!(validate_service_name("with space").is_err());
        assert!(validate_service_name("with/slash").is_err());
        assert!(validate_service_name(&"a".repeat(MAX_SERVICE_NAME_LENGTH + 1)).is_err());
    }

    #[test]
    fn test_validate_instance_id() {
        assert!(validate_instance_id("i-1").is_ok());
        assert!(validate_instance_id("10.0.0.5:8080").is_ok());
        assert!(validate_instance_id("").is_err());
        assert!(validate_instance_id("a b").is_err());
    }

    #[test]
    fn test_validate_endpoint() {
        assert!(validate_endpoint("10.0.0.5:8080").is_ok());
        assert!(validate_endpoint("billing.internal:443").is_ok());
        assert!(validate_endpoint("[::1]:8080").is_ok());
        assert!(validate_endpoint("10.0.0.5").is_err());
        assert!(validate_endpoint(":8080").is_err());
        assert!(validate_endpoint("10.0.0.5:0").is_err());
        assert!(validate_endpoint("10.0.0.5:http").is_err());
    }

    #[test]
    fn test_validate_metadata() {
        let mut metadata = BTreeMap::new();
        metadata.insert("zone".to_string(), "eu-1".to_string());
        assert!(validate_metadata(&metadata).is_ok());

        metadata.insert(String::new(), "x".to_string());
        assert!(validate_metadata(&metadata).is_err());

        let too_many: BTreeMap<String, String> = (0..=MAX_METADATA_ENTRIES)
            .map(|i| (format!("k{}", i), "v".to_string()))
            .collect();
        assert!(validate_metadata(&too_many).is_err());
    }
}
