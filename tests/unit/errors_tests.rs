/*!
 * Tests for error types and conversions
 */

use storelingo::errors::{JobFailure, ProviderError, QueueError, TerminalReason, TranslationError};

#[test]
fn test_providerError_apiError_shouldDisplayStatusAndMessage() {
    let error = ProviderError::ApiError {
        status_code: 429,
        message: "Too many requests".to_string(),
    };
    let display = format!("{}", error);
    assert!(display.contains("429"));
    assert!(display.contains("Too many requests"));
}

#[test]
fn test_providerError_isTransient_shouldFollowStatusClasses() {
    assert!(ProviderError::RateLimitExceeded("429".into()).is_transient());
    assert!(ProviderError::Timeout(30_000).is_transient());
    assert!(ProviderError::ApiError { status_code: 503, message: String::new() }.is_transient());
    assert!(!ProviderError::ApiError { status_code: 400, message: String::new() }.is_transient());
    assert!(!ProviderError::AuthenticationError("bad key".into()).is_transient());
    assert!(!ProviderError::TooLong("context".into()).is_transient());
    assert!(ProviderError::TooLong("context".into()).is_length_related());
}

#[test]
fn test_queueError_isConnectivity_shouldOnlyMatchOutages() {
    assert!(QueueError::Connectivity("database is locked".into()).is_connectivity());
    assert!(!QueueError::Backend("constraint".into()).is_connectivity());
    assert!(!QueueError::Closed.is_connectivity());
}

#[test]
fn test_queueError_fromSerdeError_shouldBeSerialization() {
    let parse = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
    assert!(matches!(QueueError::from(parse), QueueError::Serialization(_)));
}

#[test]
fn test_jobFailure_terminalReasons_shouldDescribeTheResource() {
    let failure = JobFailure::Terminal(TerminalReason::CrossEnvironment {
        resource_id: "r1".into(),
        expected: "shop-a".into(),
        actual: "shop-b".into(),
    });
    assert!(failure.is_terminal());
    let display = failure.to_string();
    assert!(display.contains("r1"));
    assert!(display.contains("shop-a"));
    assert!(display.contains("shop-b"));

    let retryable = JobFailure::from(anyhow::anyhow!("disk hiccup"));
    assert!(!retryable.is_terminal());
}

#[test]
fn test_translationError_shouldNameLostPlaceholders() {
    let lost = TranslationError::MissingPlaceholders(vec!["__PROTECTED_URL_0__".into(), "__PROTECTED_MEDIA_1__".into()]);
    assert_eq!(
        lost.to_string(),
        "Placeholders lost during translation: __PROTECTED_URL_0__, __PROTECTED_MEDIA_1__"
    );

    let provider: TranslationError = ProviderError::Timeout(500).into();
    assert!(provider.to_string().contains("500 ms"));
    assert_eq!(TranslationError::NoStrategy.to_string(), "No translation strategy applied");
}
