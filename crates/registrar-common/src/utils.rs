//! Utility functions for Registrar

/// Current wall-clock time in milliseconds since the UNIX epoch
pub fn current_time_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Build the storage key of an instance: `serviceName@@instanceId`
pub fn build_instance_key(service_name: &str, instance_id: &str) -> String {
    format!("{}@@{}", service_name, instance_id)
}

/// Default node id: `<hostname>:<port>`, falling back to a random uuid
pub fn default_node_id(port: u16) -> String {
    match hostname::get() {
        Ok(name) => format!("{}:{}", name.to_string_lossy(), port),
        Err(_) => uuid::Uuid::new_v4().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_time_ms_is_positive() {
        assert!(current_time_ms() > 0);
    }

    #[test]
    fn test_build_instance_key() {
        assert_eq!(build_instance_key("billing", "i-1"), "billing@@i-1");
    }

    #[test]
    fn test_default_node_id_not_empty() {
        assert!(!default_node_id(8761).is_empty());
    }
}
