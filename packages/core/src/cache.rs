use std::time::{Duration, Instant};

/// Single-slot cache whose value expires after a fixed TTL.
///
/// Used by the Railway client so that one monitoring cycle resolves the
/// project's service list once instead of once per lookup.
#[derive(Debug)]
pub struct TtlCache<T: Clone> {
    entry: Option<(T, Instant)>,
    ttl: Duration,
}

impl<T: Clone> TtlCache<T> {
    pub fn new(ttl: Duration) -> Self {
        Self { entry: None, ttl }
    }

    /// Cached value, or `None` once the TTL has elapsed.
    pub fn get(&self) -> Option<T> {
        match &self.entry {
            Some((value, stored_at)) if stored_at.elapsed() <= self.ttl => Some(value.clone()),
            _ => None,
        }
    }

    pub fn store(&mut self, value: T) {
        self.entry = Some((value, Instant::now()));
    }

    pub fn invalidate(&mut self) {
        self.entry = None;
    }
}
