//! Redaction wrapper for signing keys.
//!
//! [`Redacted`] hides its inner value from `Debug`, `Display` and `Serialize`
//! output so a private key carried in [`crate::config::ChainConfig`] can never
//! leak through a log line or the health endpoint.

use std::fmt::{self, Debug, Display};

/// Wrapper that prints `<redacted>` in place of its inner value.
///
/// ```
/// use pool_relayer::redact::Redacted;
///
/// let key = Redacted("0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80".to_string());
/// assert_eq!(format!("{key:?}"), "<redacted>");
/// ```
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Redacted<T>(pub T);

impl<T> Redacted<T> {
    /// Access the wrapped secret
    pub fn expose(&self) -> &T {
        &self.0
    }
}

impl<T> Debug for Redacted<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<redacted>")
    }
}

impl<T> Display for Redacted<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<redacted>")
    }
}

impl<T> serde::Serialize for Redacted<T> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        "<redacted>".serialize(serializer)
    }
}
