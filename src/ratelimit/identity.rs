//! Client identity and counter key generation.

/// Prefix shared by every rate limit counter in the store.
pub const KEY_PREFIX: &str = "rate_limit:";

/// The identity a request is counted against, typically the caller's
/// network address.
///
/// Identities are used verbatim. An empty identity is still a valid bucket:
/// its key is the bare [`KEY_PREFIX`], which no non-empty identity can
/// produce, so anonymous callers are limited collectively without sharing a
/// counter with any named caller.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientIdentity(String);

impl ClientIdentity {
    pub fn new(raw: &str) -> Self {
        Self(raw.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the caller could not be identified.
    pub fn is_anonymous(&self) -> bool {
        self.0.is_empty()
    }

    /// The store key holding this identity's window counter.
    pub fn counter_key(&self) -> String {
        format!("{}{}", KEY_PREFIX, self.0)
    }
}

impl std::fmt::Display for ClientIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_anonymous() {
            f.write_str("<anonymous>")
        } else {
            f.write_str(&self.0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_key_format() {
        let identity = ClientIdentity::new("203.0.113.7");
        assert_eq!(identity.counter_key(), "rate_limit:203.0.113.7");
    }

    #[test]
    fn test_identity_kept_verbatim() {
        assert_ne!(ClientIdentity::new(" a"), ClientIdentity::new("a"));
        assert_eq!(ClientIdentity::new(" a").counter_key(), "rate_limit: a");
    }

    #[test]
    fn test_empty_identity_key_is_bare_prefix() {
        let empty = ClientIdentity::new("");

        assert!(empty.is_anonymous());
        assert_eq!(empty.counter_key(), KEY_PREFIX);
        assert_ne!(empty.counter_key(), ClientIdentity::new("unknown").counter_key());
        assert_eq!(empty.to_string(), "<anonymous>");
    }

    #[test]
    fn test_ipv6_identity_kept_verbatim() {
        let identity = ClientIdentity::new("2001:db8::1");
        assert_eq!(identity.to_string(), "2001:db8::1");
        assert_eq!(identity.counter_key(), "rate_limit:2001:db8::1");
    }
}
