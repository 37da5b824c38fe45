use std::env;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Round-robin pool of API keys shared by the Gemini provider and
/// embedder. Callers read `current()` per request and call `rotate()`
/// when a key hits a quota or throttling response, so the retry that
/// follows goes out on a fresh key.
pub struct KeyRotator {
    keys: Vec<String>,
    current: AtomicUsize,
}

impl KeyRotator {
    pub fn new(keys: Vec<String>) -> Option<Self> {
        if keys.is_empty() {
            return None;
        }
        Some(Self {
            keys,
            current: AtomicUsize::new(0),
        })
    }

    /// Collects `GOOGLE_API_KEY` plus numbered spares
    /// (`GOOGLE_API_KEY_2` .. `GOOGLE_API_KEY_9`).
    pub fn from_env() -> Option<Self> {
        let mut keys: Vec<String> = env::var("GOOGLE_API_KEY").ok().into_iter().collect();
        for i in 2..=9 {
            if let Ok(key) = env::var(format!("GOOGLE_API_KEY_{}", i)) {
                keys.push(key);
            }
        }
        Self::new(keys)
    }

    pub fn current(&self) -> String {
        self.keys[self.current.load(Ordering::Relaxed) % self.keys.len()].clone()
    }

    /// Advances to the next key and returns it.
    pub fn rotate(&self) -> String {
        let next = self.current.fetch_add(1, Ordering::Relaxed) + 1;
        let index = next % self.keys.len();
        if self.keys.len() > 1 {
            log::info!("Rotated to API key {} of {}", index + 1, self.keys.len());
        }
        self.keys[index].clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_pool_is_rejected() {
        assert!(KeyRotator::new(Vec::new()).is_none());
    }

    #[test]
    fn rotates_round_robin_and_wraps() {
        let rotator =
            KeyRotator::new(vec!["a".into(), "b".into(), "c".into()]).unwrap();
        assert_eq!(rotator.current(), "a");
        assert_eq!(rotator.rotate(), "b");
        assert_eq!(rotator.current(), "b");
        assert_eq!(rotator.rotate(), "c");
        assert_eq!(rotator.rotate(), "a");
    }

    #[test]
    fn single_key_rotation_is_a_no_op() {
        let rotator = KeyRotator::new(vec!["only".into()]).unwrap();
        assert_eq!(rotator.rotate(), "only");
        assert_eq!(rotator.current(), "only");
    }
}
