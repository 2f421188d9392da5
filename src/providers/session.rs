//! Session ids, proxy ids and the hyphen-token username encoding shared by gateway vendors

use rand::Rng;
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

const BASE36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

static LAST_MILLIS: AtomicU64 = AtomicU64::new(0);

/// Wall-clock milliseconds, bumped so that no two calls in this process return the same value
pub fn monotonic_millis() -> u64 {
    let wall = chrono::Utc::now().timestamp_millis().max(0) as u64;
    let mut last = LAST_MILLIS.load(Ordering::Relaxed);
    loop {
        let next = wall.max(last + 1);
        match LAST_MILLIS.compare_exchange_weak(last, next, Ordering::AcqRel, Ordering::Relaxed) {
            Ok(_) => return next,
            Err(current) => last = current,
        }
    }
}

pub fn random_base36(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| BASE36[rng.gen_range(0..BASE36.len())] as char)
        .collect()
}

pub fn to_base36(mut n: u64) -> String {
    if n == 0 {
        return "0".to_string();
    }
    let mut digits = Vec::new();
    while n > 0 {
        digits.push(BASE36[(n % 36) as usize]);
        n /= 36;
    }
    digits.reverse();
    String::from_utf8_lossy(&digits).into_owned()
}

/// `<millis>-<random base36>`
pub fn session_id() -> String {
    format!("{}-{}", monotonic_millis(), random_base36(9))
}

/// Alphanumeric-only variant for gateways that reject `-` inside the session token
pub fn compact_session_id() -> String {
    format!("{}{}", to_base36(monotonic_millis()), random_base36(6))
}

/// Opaque cache key for a generated credential
pub fn proxy_id(prefix: &str) -> String {
    format!("{}-{}", prefix, Uuid::new_v4().simple())
}

/// Lower-case and join whitespace-separated words with `_` (`New York` -> `new_york`)
pub fn slug(value: &str) -> String {
    value
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join("_")
}

/// Lower-case and drop whitespace entirely (`New York` -> `newyork`)
pub fn squash(value: &str) -> String {
    value
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<String>()
}

/// Appends `-<key>-<value>` tokens to a gateway username
#[derive(Debug, Clone)]
pub struct UsernameBuilder {
    value: String,
}

impl UsernameBuilder {
    pub fn new(base: &str) -> Self {
        Self {
            value: base.to_string(),
        }
    }

    pub fn token(mut self, key: &str, value: impl AsRef<str>) -> Self {
        let value = value.as_ref();
        if !value.is_empty() {
            self.value.push('-');
            self.value.push_str(key);
            self.value.push('-');
            self.value.push_str(value);
        }
        self
    }

    pub fn token_opt(self, key: &str, value: Option<impl AsRef<str>>) -> Self {
        match value {
            Some(v) => self.token(key, v),
            None => self,
        }
    }

    pub fn build(self) -> String {
        self.value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_monotonic_millis_strictly_increases() {
        let mut last = 0;
        for _ in 0..1000 {
            let now = monotonic_millis();
            assert!(now > last);
            last = now;
        }
    }

    #[test]
    fn test_session_ids_unique_and_well_formed() {
        let ids: Vec<String> = (0..500).map(|_| session_id()).collect();
        let unique: HashSet<_> = ids.iter().collect();
        assert_eq!(unique.len(), ids.len());

        for id in &ids {
            let (ts, rand) = id.split_once('-').unwrap();
            assert!(ts.chars().all(|c| c.is_ascii_digit()));
            assert_eq!(rand.len(), 9);
            assert!(rand.chars().all(|c| c.is_ascii_digit() || c.is_ascii_lowercase()));
        }
    }

    #[test]
    fn test_compact_session_id_is_alphanumeric() {
        let ids: HashSet<String> = (0..200).map(|_| compact_session_id()).collect();
        assert_eq!(ids.len(), 200);
        assert!(ids.iter().all(|id| id.chars().all(|c| c.is_ascii_alphanumeric())));
    }

    #[test]
    fn test_to_base36() {
        assert_eq!(to_base36(0), "0");
        assert_eq!(to_base36(35), "z");
        assert_eq!(to_base36(36), "10");
    }

    #[test]
    fn test_slug_and_squash() {
        assert_eq!(slug("New York"), "new_york");
        assert_eq!(slug("  Rio   de Janeiro "), "rio_de_janeiro");
        assert_eq!(slug("california"), "california");
        assert_eq!(squash("New York"), "newyork");
    }

    #[test]
    fn test_username_builder_skips_empty_values() {
        let username = UsernameBuilder::new("user-alice")
            .token("country", "us")
            .token("state", "")
            .token_opt("city", Some("new_york"))
            .token_opt("zip", None::<&str>)
            .build();

        assert_eq!(username, "user-alice-country-us-city-new_york");
    }

    #[test]
    fn test_proxy_ids_unique() {
        let ids: HashSet<String> = (0..100).map(|_| proxy_id("oxylabs")).collect();
        assert_eq!(ids.len(), 100);
        assert!(ids.iter().all(|id| id.starts_with("oxylabs-")));
    }
}
