//! Topic name and client identifier validation
//!
//! MQTT 3.1.1 forbids wildcards in the topic of a PUBLISH and limits what a
//! broker is required to accept as a client identifier.

use thiserror::Error;

/// Longest client identifier every 3.1.1 broker must accept
pub const MAX_CLIENT_ID_LEN: usize = 23;

/// Longest UTF-8 string the wire format can carry
pub const MAX_TOPIC_LEN: usize = u16::MAX as usize;

/// Check that `topic` may be used as the topic of an outgoing PUBLISH
pub fn validate_topic_name(topic: &str) -> Result<(), ValidationError> {
    if topic.is_empty() {
        return Err(ValidationError::EmptyTopic);
    }

    if topic.len() > MAX_TOPIC_LEN {
        return Err(ValidationError::TopicTooLong(topic.len()));
    }

    for ch in topic.chars() {
        match ch {
            '+' | '#' => return Err(ValidationError::WildcardInTopic(ch)),
            '\0' => return Err(ValidationError::NullInTopic),
            _ => {}
        }
    }

    Ok(())
}

/// Check a client identifier against the portable 3.1.1 character set
pub fn validate_client_id(client_id: &str) -> Result<(), ValidationError> {
    if client_id.is_empty() {
        return Err(ValidationError::EmptyClientId);
    }

    if client_id.len() > MAX_CLIENT_ID_LEN {
        return Err(ValidationError::ClientIdTooLong(client_id.len()));
    }

    for ch in client_id.chars() {
        if !ch.is_ascii_alphanumeric() && ch != '.' && ch != '_' && ch != '-' {
            return Err(ValidationError::InvalidClientIdChar(ch));
        }
    }

    Ok(())
}

/// Validation errors for topics and client identifiers
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("Topic cannot be empty")]
    EmptyTopic,
    #[error("Topic is {0} bytes, longer than the protocol allows")]
    TopicTooLong(usize),
    #[error("Publish topic contains wildcard '{0}'")]
    WildcardInTopic(char),
    #[error("Topic contains a NUL character")]
    NullInTopic,
    #[error("Client ID cannot be empty")]
    EmptyClientId,
    #[error("Client ID is {0} characters, maximum is 23")]
    ClientIdTooLong(usize),
    #[error("Client ID contains invalid character: '{0}'")]
    InvalidClientIdChar(char),
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn test_valid_client_id_format(id in "[a-zA-Z0-9._-]{1,23}") {
            prop_assert!(validate_client_id(&id).is_ok(), "Valid client ID should pass: {}", id);
        }

        #[test]
        fn test_invalid_client_id_chars(id in "[^a-zA-Z0-9._-]{1}[a-zA-Z0-9._-]{0,10}") {
            prop_assert!(validate_client_id(&id).is_err(), "Invalid client ID should fail: {}", id);
        }

        #[test]
        fn test_topics_without_wildcards_are_valid(topic in "[a-z0-9/]{1,64}") {
            prop_assert!(validate_topic_name(&topic).is_ok());
        }
    }

    #[test]
    fn test_topic_validation_examples() {
        assert!(validate_topic_name("sensors/kitchen/temp").is_ok());
        assert!(validate_topic_name("/leading/slash").is_ok());
        assert!(validate_topic_name("a").is_ok());

        assert_eq!(validate_topic_name(""), Err(ValidationError::EmptyTopic));
        assert_eq!(
            validate_topic_name("sensors/+/temp"),
            Err(ValidationError::WildcardInTopic('+'))
        );
        assert_eq!(
            validate_topic_name("sensors/#"),
            Err(ValidationError::WildcardInTopic('#'))
        );
        assert_eq!(
            validate_topic_name("bad\0topic"),
            Err(ValidationError::NullInTopic)
        );
    }

    #[test]
    fn test_client_id_length_limit() {
        assert!(validate_client_id(&"a".repeat(23)).is_ok());
        assert_eq!(
            validate_client_id(&"a".repeat(24)),
            Err(ValidationError::ClientIdTooLong(24))
        );
    }

    #[test]
    fn test_client_id_specific_errors() {
        assert_eq!(validate_client_id(""), Err(ValidationError::EmptyClientId));

        if let Err(ValidationError::InvalidClientIdChar(ch)) = validate_client_id("dev@home") {
            assert_eq!(ch, '@');
        } else {
            panic!("Expected InvalidClientIdChar error");
        }
    }
}
