//! Identity and naming rules for managed resources.
//!
//! Templates, stacks, and instances share one naming rule; container names
//! are derived deterministically from stack and instance names so that the
//! planner can correlate observed containers with desired instances. Every
//! managed container carries the standard `devarch.*` identity label set,
//! which is also how observation queries filter the runtime.

use crate::error::{Error, Result};
use std::collections::BTreeMap;

/// Label key prefix reserved for control-plane use; rejected on user writes
pub const RESERVED_LABEL_PREFIX: &str = "devarch.";

/// Identity label: marks a container as managed by this control plane
pub const LABEL_MANAGED_BY: &str = "devarch.managed_by";

/// Identity label: the owning stack's name
pub const LABEL_STACK_ID: &str = "devarch.stack_id";

/// Identity label: the instance id within the stack
pub const LABEL_INSTANCE_ID: &str = "devarch.instance_id";

/// Identity label: the backing template's numeric id
pub const LABEL_TEMPLATE_ID: &str = "devarch.template_id";

/// Value of [`LABEL_MANAGED_BY`] on every managed container
pub const MANAGED_BY_VALUE: &str = "devarch";

/// The runtime's container-name length limit
pub const CONTAINER_NAME_MAX: usize = 63;

const NAME_MIN: usize = 2;
const NAME_MAX: usize = 64;

/// Validate a template, stack, or instance name.
///
/// Names must be 2-64 characters of lowercase alphanumerics and hyphens,
/// with no leading or trailing hyphen.
pub fn validate_name(name: &str) -> Result<()> {
    if name.len() < NAME_MIN || name.len() > NAME_MAX {
        return Err(Error::validation(format!(
            "name '{name}' must be {NAME_MIN}-{NAME_MAX} characters, got {}",
            name.len()
        )));
    }

    let bytes = name.as_bytes();
    if bytes[0] == b'-' || bytes[bytes.len() - 1] == b'-' {
        return Err(Error::validation(format!(
            "name '{name}' must not start or end with a hyphen"
        )));
    }

    for c in name.chars() {
        if !c.is_ascii_lowercase() && !c.is_ascii_digit() && c != '-' {
            return Err(Error::validation(format!(
                "name '{name}' contains invalid character '{c}': only lowercase alphanumerics and hyphens are allowed"
            )));
        }
    }

    Ok(())
}

/// Derive the container name for an instance: `<stack>-<instance>`.
///
/// Both components must individually pass [`validate_name`]; the combined
/// name must fit the runtime's 63-character limit.
pub fn container_name(stack: &str, instance: &str) -> Result<String> {
    validate_name(stack)?;
    validate_name(instance)?;

    let name = format!("{stack}-{instance}");
    if name.len() > CONTAINER_NAME_MAX {
        return Err(Error::validation(format!(
            "container name '{name}' exceeds {CONTAINER_NAME_MAX} characters ({})",
            name.len()
        )));
    }
    Ok(name)
}

/// Default network name for a stack: `devarch-<stack>-net`
#[must_use]
pub fn default_network_name(stack: &str) -> String {
    format!("devarch-{stack}-net")
}

/// Build the identity label set for a managed container
#[must_use]
pub fn identity_labels(
    stack: &str,
    instance: &str,
    template_id: i64,
) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(LABEL_MANAGED_BY.to_string(), MANAGED_BY_VALUE.to_string());
    labels.insert(LABEL_STACK_ID.to_string(), stack.to_string());
    labels.insert(LABEL_INSTANCE_ID.to_string(), instance.to_string());
    labels.insert(LABEL_TEMPLATE_ID.to_string(), template_id.to_string());
    labels
}

/// Reject user-supplied label keys that collide with the reserved prefix.
///
/// Applied at the override write boundary; identity labels are injected
/// after user overrides, so a key that passes here can never collide.
pub fn validate_user_label_key(key: &str) -> Result<()> {
    if key.starts_with(RESERVED_LABEL_PREFIX) {
        return Err(Error::validation(format!(
            "label key '{key}' uses the reserved '{RESERVED_LABEL_PREFIX}' prefix"
        )));
    }
    if key.is_empty() {
        return Err(Error::validation("label key must not be empty"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_name_accepts_valid() {
        assert!(validate_name("web").is_ok());
        assert!(validate_name("app1").is_ok());
        assert!(validate_name("my-service").is_ok());
        assert!(validate_name("a1").is_ok());
        assert!(validate_name("0a").is_ok());
        assert!(validate_name(&"a".repeat(64)).is_ok());
    }

    #[test]
    fn test_validate_name_rejects_length() {
        assert!(validate_name("").is_err());
        assert!(validate_name("a").is_err());
        assert!(validate_name(&"a".repeat(65)).is_err());
    }

    #[test]
    fn test_validate_name_rejects_hyphen_edges() {
        assert!(validate_name("-web").is_err());
        assert!(validate_name("web-").is_err());
        assert!(validate_name("--").is_err());
    }

    #[test]
    fn test_validate_name_rejects_bad_characters() {
        assert!(validate_name("Web").is_err());
        assert!(validate_name("my_service").is_err());
        assert!(validate_name("my.service").is_err());
        assert!(validate_name("my service").is_err());
        assert!(validate_name("caf\u{e9}").is_err());
    }

    #[test]
    fn test_container_name_derivation() {
        assert_eq!(container_name("web", "app1").unwrap(), "web-app1");
    }

    #[test]
    fn test_container_name_length_limit() {
        // 31 + 1 + 31 = 63: exactly at the limit
        let stack = "a".repeat(31);
        let instance = "b".repeat(31);
        assert_eq!(container_name(&stack, &instance).unwrap().len(), 63);

        // 32 + 1 + 31 = 64: one over
        let stack = "a".repeat(32);
        assert!(container_name(&stack, &instance).is_err());
    }

    #[test]
    fn test_container_name_validates_components() {
        assert!(container_name("-bad", "app1").is_err());
        assert!(container_name("web", "App1").is_err());
    }

    #[test]
    fn test_default_network_name() {
        assert_eq!(default_network_name("web"), "devarch-web-net");
    }

    #[test]
    fn test_identity_labels() {
        let labels = identity_labels("web", "app1", 7);
        assert_eq!(labels.get(LABEL_MANAGED_BY).unwrap(), "devarch");
        assert_eq!(labels.get(LABEL_STACK_ID).unwrap(), "web");
        assert_eq!(labels.get(LABEL_INSTANCE_ID).unwrap(), "app1");
        assert_eq!(labels.get(LABEL_TEMPLATE_ID).unwrap(), "7");
        assert_eq!(labels.len(), 4);
    }

    #[test]
    fn test_reserved_label_prefix_rejected() {
        let err = validate_user_label_key("devarch.foo").unwrap_err();
        assert!(err.to_string().contains("devarch."));
        assert!(validate_user_label_key("app.foo").is_ok());
        assert!(validate_user_label_key("").is_err());
    }
}
