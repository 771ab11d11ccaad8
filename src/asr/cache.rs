//! Transcription result cache
//!
//! Process-wide LRU keyed by the content hash of the chunk samples plus a
//! fingerprint of the recognizer configuration, so identical audio under
//! identical settings never hits the recognizer twice.

use crate::asr::types::RecognizerOutput;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use tracing::debug;

struct CacheInner {
    map: HashMap<String, RecognizerOutput>,
    order: VecDeque<String>,
    hits: u64,
    misses: u64,
}

/// Fixed-capacity LRU cache of recognizer outputs.
pub struct TranscriptionCache {
    capacity: usize,
    inner: Mutex<CacheInner>,
}

impl TranscriptionCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(CacheInner {
                map: HashMap::new(),
                order: VecDeque::new(),
                hits: 0,
                misses: 0,
            }),
        }
    }

    /// Cache key: sha256 of the raw samples and of the configuration
    /// fingerprint. Chunk ids are deliberately excluded so identical audio
    /// across jobs shares entries.
    pub fn content_key(samples: &[f32], config_fingerprint: &str) -> String {
        let mut audio_hasher = Sha256::new();
        for sample in samples {
            audio_hasher.update(sample.to_le_bytes());
        }
        let audio_digest = audio_hasher.finalize();

        let config_digest = Sha256::digest(config_fingerprint.as_bytes());

        let mut key = String::with_capacity(128);
        for byte in audio_digest.iter().chain(config_digest.iter()) {
            key.push_str(&format!("{:02x}", byte));
        }
        key
    }

    pub fn get(&self, key: &str) -> Option<RecognizerOutput> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(output) = inner.map.get(key).cloned() {
            // Refresh LRU position.
            if let Some(pos) = inner.order.iter().position(|k| k == key) {
                inner.order.remove(pos);
            }
            inner.order.push_back(key.to_string());
            inner.hits += 1;
            debug!("Transcription cache hit");
            Some(output)
        } else {
            inner.misses += 1;
            None
        }
    }

    pub fn put(&self, key: String, output: RecognizerOutput) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if inner.map.contains_key(&key) {
            if let Some(pos) = inner.order.iter().position(|k| *k == key) {
                inner.order.remove(pos);
            }
        } else if inner.map.len() >= self.capacity {
            if let Some(oldest) = inner.order.pop_front() {
                inner.map.remove(&oldest);
            }
        }
        inner.order.push_back(key.clone());
        inner.map.insert(key, output);
    }

    /// Drop every entry. Wired to the governor's emergency cleanup.
    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.map.clear();
        inner.order.clear();
        debug!("Transcription cache cleared");
    }

    /// (entries, hits, misses)
    pub fn stats(&self) -> (usize, u64, u64) {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        (inner.map.len(), inner.hits, inner.misses)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output(text: &str) -> RecognizerOutput {
        RecognizerOutput {
            text: text.to_string(),
            language: "en".to_string(),
            confidence: -0.2,
            segments: vec![],
        }
    }

    #[test]
    fn same_audio_same_config_hits() {
        let cache = TranscriptionCache::new(10);
        let samples = vec![0.1f32, -0.2, 0.3];
        let key = TranscriptionCache::content_key(&samples, "large-v3:0.0");

        assert!(cache.get(&key).is_none());
        cache.put(key.clone(), output("hello"));
        assert_eq!(cache.get(&key).unwrap().text, "hello");

        let (entries, hits, misses) = cache.stats();
        assert_eq!((entries, hits, misses), (1, 1, 1));
    }

    #[test]
    fn different_config_misses() {
        let samples = vec![0.1f32, -0.2, 0.3];
        let a = TranscriptionCache::content_key(&samples, "large-v3:0.0");
        let b = TranscriptionCache::content_key(&samples, "large-v3:0.1");
        assert_ne!(a, b);
    }

    #[test]
    fn evicts_least_recently_used() {
        let cache = TranscriptionCache::new(2);
        cache.put("a".to_string(), output("a"));
        cache.put("b".to_string(), output("b"));

        // Touch "a" so "b" becomes the eviction candidate.
        assert!(cache.get("a").is_some());
        cache.put("c".to_string(), output("c"));

        assert!(cache.get("a").is_some());
        assert!(cache.get("b").is_none());
        assert!(cache.get("c").is_some());
    }
}
