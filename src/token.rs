//! Single-use anti-replay tokens for the stream endpoint.
//!
//! A token is fetched from `/token` and is good for exactly one `/stream`
//! request. Unused tokens expire after `ttl`. At most `capacity` tokens are
//! outstanding; issuing past that evicts the oldest.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use subtle::ConstantTimeEq;

/// Default lifetime of an unused token.
pub const DEFAULT_TTL: Duration = Duration::from_secs(10 * 60);

/// Default bound on outstanding tokens.
pub const DEFAULT_CAPACITY: usize = 1024;

struct Issued {
    value: String,
    issued_at: Instant,
}

/// Tokens in issue order, so expired ones sit at the front.
struct Ledger {
    tokens: VecDeque<Issued>,
}

impl Ledger {
    fn prune(&mut self, ttl: Duration) {
        while self
            .tokens
            .front()
            .is_some_and(|t| t.issued_at.elapsed() >= ttl)
        {
            self.tokens.pop_front();
        }
    }
}

/// Shared token store, cloned into every connection.
#[derive(Clone)]
pub struct TokenStore {
    inner: Arc<Mutex<Ledger>>,
    ttl: Duration,
    capacity: usize,
}

impl Default for TokenStore {
    fn default() -> Self {
        Self::new(DEFAULT_TTL, DEFAULT_CAPACITY)
    }
}

impl TokenStore {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        TokenStore {
            inner: Arc::new(Mutex::new(Ledger {
                tokens: VecDeque::new(),
            })),
            ttl,
            capacity: capacity.max(1),
        }
    }

    /// Mint a fresh token.
    pub fn issue(&self) -> String {
        let value = uuid::Uuid::new_v4().simple().to_string();
        if let Ok(mut ledger) = self.inner.lock() {
            ledger.prune(self.ttl);
            while ledger.tokens.len() >= self.capacity {
                ledger.tokens.pop_front();
            }
            ledger.tokens.push_back(Issued {
                value: value.clone(),
                issued_at: Instant::now(),
            });
        }
        value
    }

    /// Redeem a token. Succeeds at most once per issued token.
    pub fn consume(&self, candidate: &str) -> bool {
        let Ok(mut ledger) = self.inner.lock() else {
            return false;
        };
        ledger.prune(self.ttl);
        let position = ledger
            .tokens
            .iter()
            .position(|t| bool::from(t.value.as_bytes().ct_eq(candidate.as_bytes())));
        match position {
            Some(idx) => {
                ledger.tokens.remove(idx);
                true
            }
            None => false,
        }
    }

    /// Number of live, unused tokens.
    pub fn outstanding(&self) -> usize {
        self.inner.lock().map(|l| l.tokens.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issued_token_consumes_once() {
        let store = TokenStore::default();
        let token = store.issue();
        assert!(store.consume(&token));
        assert!(!store.consume(&token));
    }

    #[test]
    fn test_unknown_token_rejected() {
        let store = TokenStore::default();
        store.issue();
        assert!(!store.consume("not-a-token"));
        assert!(!store.consume(""));
        assert_eq!(store.outstanding(), 1);
    }

    #[test]
    fn test_tokens_are_distinct() {
        let store = TokenStore::default();
        let a = store.issue();
        let b = store.issue();
        assert_ne!(a, b);
        assert_eq!(a.len(), 32);
        assert_eq!(store.outstanding(), 2);
    }

    #[test]
    fn test_expired_token_rejected() {
        let store = TokenStore::new(Duration::ZERO, DEFAULT_CAPACITY);
        let token = store.issue();
        assert!(!store.consume(&token));
    }

    #[test]
    fn test_clones_share_state() {
        let store = TokenStore::default();
        let other = store.clone();
        let token = store.issue();
        assert!(other.consume(&token));
        assert!(!store.consume(&token));
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let store = TokenStore::new(DEFAULT_TTL, 3);
        let oldest = store.issue();
        let kept: Vec<String> = (0..3).map(|_| store.issue()).collect();
        assert_eq!(store.outstanding(), 3);
        assert!(!store.consume(&oldest));
        for token in &kept {
            assert!(store.consume(token));
        }
        assert_eq!(store.outstanding(), 0);
    }

    #[test]
    fn test_flood_stays_bounded() {
        let store = TokenStore::default();
        for _ in 0..(DEFAULT_CAPACITY * 20) {
            store.issue();
        }
        assert_eq!(store.outstanding(), DEFAULT_CAPACITY);
        let fresh = store.issue();
        assert!(store.consume(&fresh));
    }
}
