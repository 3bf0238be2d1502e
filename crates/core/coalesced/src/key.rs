use std::{
    fmt,
    sync::atomic::{AtomicU64, Ordering},
};

static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1);

/// Unique, unforgeable key component.
///
/// Two tokens are only equal if one is a copy of the other, so a token can
/// be used to share work between call sites that hold it without any risk
/// of colliding with a string or number somebody else picked.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Token {
    id: u64,
    label: Option<&'static str>,
}

impl Token {
    pub fn new() -> Self {
        Self {
            id: NEXT_TOKEN.fetch_add(1, Ordering::Relaxed),
            label: None,
        }
    }

    /// Create a token carrying a label for diagnostics
    pub fn labelled(label: &'static str) -> Self {
        Self {
            label: Some(label),
            ..Self::new()
        }
    }
}

impl Default for Token {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Token({})#{}", self.label.unwrap_or_default(), self.id)
    }
}

/// Identifier under which in-flight work and cached results are shared
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Key {
    /// No key, every call runs on its own
    None,
    Str(String),
    Int(i64),
    Token(Token),
}

impl Key {
    /// Falsy keys opt out of deduplication, caching and retries
    pub fn is_falsy(&self) -> bool {
        match self {
            Key::None => true,
            Key::Str(s) => s.is_empty(),
            Key::Int(n) => *n == 0,
            Key::Token(_) => false,
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::None => Ok(()),
            Key::Str(s) => f.write_str(s),
            Key::Int(n) => write!(f, "{n}"),
            Key::Token(token) => write!(f, "{token}"),
        }
    }
}

impl From<&str> for Key {
    fn from(value: &str) -> Self {
        Key::Str(value.to_string())
    }
}

impl From<String> for Key {
    fn from(value: String) -> Self {
        Key::Str(value)
    }
}

impl From<&String> for Key {
    fn from(value: &String) -> Self {
        Key::Str(value.clone())
    }
}

impl From<i64> for Key {
    fn from(value: i64) -> Self {
        Key::Int(value)
    }
}

impl From<i32> for Key {
    fn from(value: i32) -> Self {
        Key::Int(value.into())
    }
}

impl From<u32> for Key {
    fn from(value: u32) -> Self {
        Key::Int(value.into())
    }
}

impl From<Token> for Key {
    fn from(value: Token) -> Self {
        Key::Token(value)
    }
}

impl From<&Key> for Key {
    fn from(value: &Key) -> Self {
        value.clone()
    }
}

impl<K: Into<Key>> From<Option<K>> for Key {
    fn from(value: Option<K>) -> Self {
        value.map(Into::into).unwrap_or(Key::None)
    }
}

#[cfg(test)]
mod tests {
    use super::{Key, Token};

    #[test]
    fn falsy_keys() {
        assert!(Key::from("").is_falsy());
        assert!(Key::from(0).is_falsy());
        assert!(Key::from(None::<&str>).is_falsy());
        assert!(Key::None.is_falsy());

        assert!(!Key::from("0").is_falsy());
        assert!(!Key::from(-1).is_falsy());
        assert!(!Key::from(Token::new()).is_falsy());
    }

    #[test]
    fn tokens_are_unique() {
        let a = Token::labelled("a");
        let b = Token::labelled("a");
        assert_ne!(a, b);
        assert_eq!(Key::from(a), Key::from(a));
        assert_ne!(Key::from(a), Key::from(b));
    }
}
