/*!
 * Translation caching functionality.
 *
 * Accepted translations are memoised per (text, target language, strategy
 * family) so that repeated fields across resources (shared list items, SEO
 * boilerplate) do not hit the endpoint twice. The cache holds at most
 * `max_entries` translations and drops the oldest ones beyond that, so a
 * long-running worker stays bounded.
 */

use log::debug;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::app_config::TranslationConfig;
use crate::translation::strategy::StrategyKind;

/// Entries kept when no limit is configured
pub const DEFAULT_MAX_ENTRIES: usize = 10_000;

/// Cache key combining a digest of the source text, target language and strategy family
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    /// SHA-256 of the source text
    digest: [u8; 32],

    /// Target language code
    target_language: String,

    /// Prompt family the translation was produced with
    family: &'static str,
}

impl CacheKey {
    fn new(source_text: &str, target_language: &str, family: &'static str) -> Self {
        let digest: [u8; 32] = Sha256::digest(source_text.as_bytes()).into();
        Self {
            digest,
            target_language: target_language.to_lowercase(),
            family,
        }
    }
}

/// Hit and miss counts since the cache was created
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: usize,
    pub misses: usize,
    /// Entries dropped to stay within the size limit
    pub evictions: usize,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        match self.hits + self.misses {
            0 => 0.0,
            lookups => self.hits as f64 / lookups as f64,
        }
    }
}

impl std::fmt::Display for CacheStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} hit(s), {} miss(es), {:.0}% hit rate, {} eviction(s)",
            self.hits,
            self.misses,
            self.hit_rate() * 100.0,
            self.evictions
        )
    }
}

/// An accepted translation and the strategy that produced it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedTranslation {
    pub text: String,
    pub strategy: StrategyKind,
}

/// Entries plus their insertion order; the oldest entry is evicted first
#[derive(Debug, Default)]
struct Entries {
    map: HashMap<CacheKey, CachedTranslation>,
    order: VecDeque<CacheKey>,
}

/// Process-wide memo of accepted translations, bounded to `max_entries`;
/// clones share storage
#[derive(Clone, Debug)]
pub struct TranslationCache {
    entries: Arc<Mutex<Entries>>,
    hits: Arc<AtomicUsize>,
    misses: Arc<AtomicUsize>,
    evictions: Arc<AtomicUsize>,
    enabled: bool,
    max_entries: usize,
}

impl TranslationCache {
    /// A disabled cache never stores and always misses silently
    pub fn new(enabled: bool) -> Self {
        Self::with_max_entries(enabled, DEFAULT_MAX_ENTRIES)
    }

    pub fn with_max_entries(enabled: bool, max_entries: usize) -> Self {
        Self {
            entries: Arc::default(),
            hits: Arc::default(),
            misses: Arc::default(),
            evictions: Arc::default(),
            enabled: enabled && max_entries > 0,
            max_entries,
        }
    }

    pub fn from_config(config: &TranslationConfig) -> Self {
        Self::with_max_entries(config.cache_enabled, config.cache_max_entries)
    }

    pub fn get(&self, source_text: &str, target_language: &str, family: &'static str) -> Option<CachedTranslation> {
        if !self.enabled {
            return None;
        }

        let found = self
            .entries
            .lock()
            .map
            .get(&CacheKey::new(source_text, target_language, family))
            .cloned();
        let counter = if found.is_some() { &self.hits } else { &self.misses };
        counter.fetch_add(1, Ordering::Relaxed);
        if found.is_some() {
            debug!("Cache hit for '{}' ({}, {})", truncate_text(source_text, 30), target_language, family);
        }
        found
    }

    pub fn store(
        &self,
        source_text: &str,
        target_language: &str,
        family: &'static str,
        translation: &str,
        strategy: StrategyKind,
    ) {
        if !self.enabled {
            return;
        }

        let key = CacheKey::new(source_text, target_language, family);
        let value = CachedTranslation { text: translation.to_string(), strategy };
        let mut entries = self.entries.lock();
        if entries.map.insert(key.clone(), value).is_some() {
            return;
        }
        entries.order.push_back(key);
        while entries.map.len() > self.max_entries {
            let Some(oldest) = entries.order.pop_front() else {
                break;
            };
            entries.map.remove(&oldest);
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for TranslationCache {
    fn default() -> Self {
        Self::new(true)
    }
}

/// Truncate text to a maximum number of chars with ellipsis
pub(crate) fn truncate_text(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_storeAndGet_shouldRoundTrip() {
        let cache = TranslationCache::new(true);
        cache.store("hello", "fr", "enhanced", "bonjour", StrategyKind::Enhanced);
        let cached = cache.get("hello", "fr", "enhanced").unwrap();
        assert_eq!(cached.text, "bonjour");
        assert_eq!(cached.strategy, StrategyKind::Enhanced);
        assert!(cache.get("hello", "FR", "enhanced").is_some());
        assert_eq!(cache.get("hello", "de", "enhanced"), None);
        assert_eq!(cache.get("hello", "fr", "title"), None);
        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses), (2, 2));
        assert!((stats.hit_rate() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_cache_disabled_shouldNeverReturn() {
        let cache = TranslationCache::new(false);
        cache.store("hello", "fr", "enhanced", "bonjour", StrategyKind::Enhanced);
        assert!(cache.get("hello", "fr", "enhanced").is_none());
        assert!(cache.is_empty());
        assert_eq!(cache.stats(), CacheStats::default());
    }

    #[test]
    fn test_cache_pastMaxEntries_shouldEvictOldest() {
        let cache = TranslationCache::with_max_entries(true, 2);
        cache.store("one", "fr", "enhanced", "un", StrategyKind::Enhanced);
        cache.store("two", "fr", "enhanced", "deux", StrategyKind::Enhanced);
        cache.store("one", "fr", "enhanced", "un", StrategyKind::Enhanced);
        assert_eq!(cache.len(), 2);

        cache.store("three", "fr", "enhanced", "trois", StrategyKind::Simplified);

        assert_eq!(cache.len(), 2);
        assert!(cache.get("one", "fr", "enhanced").is_none());
        assert_eq!(cache.get("two", "fr", "enhanced").unwrap().text, "deux");
        assert_eq!(cache.get("three", "fr", "enhanced").unwrap().strategy, StrategyKind::Simplified);
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_fromConfig_shouldUseConfiguredLimit() {
        let config = TranslationConfig { cache_max_entries: 1, ..TranslationConfig::default() };
        let cache = TranslationCache::from_config(&config);
        cache.store("a", "ja", "title", "エー", StrategyKind::Title);
        cache.store("b", "ja", "title", "ビー", StrategyKind::Title);
        assert_eq!(cache.len(), 1);

        let off = TranslationConfig { cache_enabled: false, ..TranslationConfig::default() };
        assert!(TranslationCache::from_config(&off).get("a", "ja", "title").is_none());
    }

    #[test]
    fn test_truncateText_shouldRespectCharBoundaries() {
        assert_eq!(truncate_text("防水天幕吊床", 2), "防水...");
        assert_eq!(truncate_text("short", 10), "short");
    }
}
