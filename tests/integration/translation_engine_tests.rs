/*!
 * End-to-end tests of the translation engine with a scripted provider
 */

use std::sync::Arc;

use storelingo::app_config::Config;
use storelingo::errors::ProviderError;
use storelingo::providers::mock::MockProvider;
use storelingo::resource::{FieldName, Resource, ResourceType};
use storelingo::translation::protector::PlaceholderKind;
use storelingo::translation::{RateLimiter, StrategyKind, TranslationCache, TranslationOrchestrator};
use storelingo::translation_service::build_orchestrator;

use crate::common::{self, translators};

fn orchestrator(config: &Config, mock: &MockProvider) -> TranslationOrchestrator {
    build_orchestrator(
        config,
        Arc::new(mock.clone()),
        Arc::new(RateLimiter::unlimited()),
        TranslationCache::new(false),
    )
}

#[tokio::test]
async fn test_longHtmlDescription_shouldKeepMediaSourcesByteIdentical() {
    common::init_logging();
    let html = translators::long_product_html();
    assert!(html.len() >= 5_000);

    let config = common::fast_config();
    let mock = MockProvider::mapping(translators::to_french);
    let engine = orchestrator(&config, &mock);

    let protected = engine.protector().protect(&html);
    assert!(protected.map.len() >= 4);
    assert_eq!(protected.map.of_kind(PlaceholderKind::Iframe).count(), 1);
    assert_eq!(protected.map.of_kind(PlaceholderKind::Media).count(), 3);

    let mut resource = Resource::new("p-long", "shop-1", ResourceType::Product);
    resource.description_html = Some(html.clone());
    let result = engine.translate_resource(&resource, "fr").await;

    let field = &result.fields[&FieldName::DescriptionHtml];
    assert!(field.success, "notes: {:?}", field.notes);
    assert!(field.text.contains("Notre hamac"));
    assert!(!field.text.contains("__PROTECTED_"));
    assert_eq!(translators::src_values(&field.text), translators::src_values(&html));
    assert_eq!(translators::src_values(&html).len(), 4);
    // chunked: more than one request for one field
    assert!(mock.call_count() > 1);
}

#[tokio::test(start_paused = true)]
async fn test_rateLimitedThreeTimes_shouldSucceedViaSimplifiedStrategy() {
    let mut config = common::fast_config();
    config.api.max_retries = 3;
    config.api.backoff_base_ms = 100;
    let mock = MockProvider::mapping(|_| {
        "Ce hamac se monte en deux minutes et tient deux adultes sans effort.".to_string()
    })
    .then_error(ProviderError::RateLimitExceeded("429 Too Many Requests".into()))
    .then_error(ProviderError::RateLimitExceeded("429 Too Many Requests".into()))
    .then_error(ProviderError::RateLimitExceeded("429 Too Many Requests".into()));

    let mut resource = Resource::new("p1", "shop-1", ResourceType::Page);
    resource.description = Some("This hammock sets up in two minutes and holds two adults with ease.".into());
    let result = orchestrator(&config, &mock).translate_resource(&resource, "fr").await;

    let field = &result.fields[&FieldName::Description];
    assert!(field.success);
    assert_eq!(field.strategy, Some(StrategyKind::Simplified));
    assert_eq!(mock.call_count(), 4);

    let calls = mock.calls();
    let first_gap = calls[1].at - calls[0].at;
    let second_gap = calls[2].at - calls[1].at;
    assert!(second_gap > first_gap, "{:?} then {:?}", first_gap, second_gap);
}

#[tokio::test]
async fn test_totalProviderFailure_shouldKeepOriginalTextForReview() {
    let config = common::fast_config();
    let mock = MockProvider::failing(ProviderError::ApiError {
        status_code: 400,
        message: "bad request".into(),
    });
    let mut resource = Resource::new("p1", "shop-1", ResourceType::Article);
    resource.summary = Some("A short guide to hanging a hammock between two trees safely.".into());

    let result = orchestrator(&config, &mock).translate_resource(&resource, "de").await;

    let field = &result.fields[&FieldName::Summary];
    assert!(!field.success);
    assert!(field.needs_review);
    assert_eq!(field.text, "A short guide to hanging a hammock between two trees safely.");
    assert!(!field.notes.is_empty());
    assert!(mock.call_count() <= 4);
}

#[tokio::test]
async fn test_brandTerms_shouldSurviveTranslationUntouched() {
    let mut config = common::fast_config();
    config.translation.brand_terms = vec!["Trailhaven".into()];
    let mock = MockProvider::mapping(|text| {
        assert!(!text.contains("Trailhaven"), "brand sent to the provider: {}", text);
        translators::to_french(text)
    });
    let mut resource = Resource::new("p1", "shop-1", ResourceType::Collection);
    resource.description = Some("Trailhaven makes the hammock you take between two trees for easy travel.".into());

    let result = orchestrator(&config, &mock).translate_resource(&resource, "fr").await;

    let text = result.text(FieldName::Description).unwrap();
    assert!(text.starts_with("Trailhaven"));
    assert!(text.contains("entre deux arbres"));
}
