//! Debug-only diagnostics: call-site collision warnings and read-only
//! cached values.

use std::{fmt, ops::Deref, panic::Location, sync::Arc};

use crate::Key;

/// Attempted to mutate a value that is shared through the cache
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct ReadOnlyViolation {
    pub key: String,
}

impl fmt::Display for ReadOnlyViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "The cached value for key `{}` is shared by every caller and is read-only, clone it before mutating",
            self.key
        )
    }
}

impl std::error::Error for ReadOnlyViolation {}

/// Value handed out by a coalesced call.
///
/// Every caller sharing a key gets a handle to the same allocation.
pub struct Cached<T> {
    value: Arc<T>,
    /// Set when the value is shared through the cache and guarded
    guard: Option<Arc<str>>,
}

impl<T> Cached<T> {
    /// Value shared through the cache, read-only when `guarded`
    pub(crate) fn shared(value: T, key: &Key, guarded: bool) -> Self {
        Self {
            value: Arc::new(value),
            guard: guarded.then(|| key.to_string().into()),
        }
    }

    /// Value produced for a single caller
    pub(crate) fn detached(value: T) -> Self {
        Self {
            value: Arc::new(value),
            guard: None,
        }
    }

    /// Whether both handles point to the same value
    pub fn ptr_eq(this: &Self, other: &Self) -> bool {
        Arc::ptr_eq(&this.value, &other.value)
    }

    pub fn is_read_only(&self) -> bool {
        self.guard.is_some()
    }

    pub fn as_arc(&self) -> &Arc<T> {
        &self.value
    }

    pub fn into_arc(self) -> Arc<T> {
        self.value
    }

    /// Mutable access to the value.
    ///
    /// Guarded values refuse with [`ReadOnlyViolation`]. Otherwise the value
    /// is cloned first if anybody else still holds it.
    pub fn make_mut(&mut self) -> Result<&mut T, ReadOnlyViolation>
    where
        T: Clone,
    {
        if let Some(key) = &self.guard {
            return Err(ReadOnlyViolation {
                key: key.to_string(),
            });
        }

        Ok(Arc::make_mut(&mut self.value))
    }
}

impl<T> Deref for Cached<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T> AsRef<T> for Cached<T> {
    fn as_ref(&self) -> &T {
        &self.value
    }
}

impl<T> Clone for Cached<T> {
    fn clone(&self) -> Self {
        Self {
            value: self.value.clone(),
            guard: self.guard.clone(),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Cached<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.value, f)
    }
}

impl<T: fmt::Display> fmt::Display for Cached<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&*self.value, f)
    }
}

impl<T: PartialEq> PartialEq<T> for Cached<T> {
    fn eq(&self, other: &T) -> bool {
        *self.value == *other
    }
}

/// Record the call sites sharing a key and warn the first time a new one shows up.
///
/// Returns whether a warning was emitted.
pub(crate) fn check_call_site(
    key: &Key,
    sites: &mut Vec<&'static Location<'static>>,
    current: &'static Location<'static>,
) -> bool {
    if sites.contains(&current) {
        return false;
    }

    sites.push(current);

    let [first, .., _] = sites.as_slice() else {
        return false;
    };

    warn!(
        "[idmp] the same key `{key}` may be used in different places:\n1. {first}\n------------\n2. {current}"
    );
    true
}

#[cfg(test)]
mod tests {
    use std::panic::Location;

    use super::{check_call_site, Cached, ReadOnlyViolation};
    use crate::Key;

    #[track_caller]
    fn here() -> &'static Location<'static> {
        Location::caller()
    }

    #[test]
    fn call_site_collision_warns_once_per_site() {
        let key = Key::from("profile");
        let mut sites = Vec::new();
        let a = here();
        let b = here();
        let c = here();

        assert!(!check_call_site(&key, &mut sites, a));
        assert!(!check_call_site(&key, &mut sites, a));
        assert!(check_call_site(&key, &mut sites, b));
        assert!(!check_call_site(&key, &mut sites, b));
        assert!(!check_call_site(&key, &mut sites, a));
        assert!(check_call_site(&key, &mut sites, c));
        assert_eq!(sites, vec![a, b, c]);
    }

    #[test]
    fn guarded_value_refuses_mutation() {
        let mut value = Cached::shared(vec![1, 2, 3], &Key::from("list"), true);
        let other = value.clone();

        assert_eq!(
            value.make_mut(),
            Err(ReadOnlyViolation {
                key: "list".to_string()
            })
        );
        assert!(value.is_read_only());
        assert_eq!(*other, vec![1, 2, 3]);
    }

    #[test]
    fn unguarded_value_clones_on_write() {
        let mut value = Cached::shared(vec![1, 2, 3], &Key::from("list"), false);
        let other = value.clone();

        value.make_mut().unwrap().push(4);

        assert_eq!(*value, vec![1, 2, 3, 4]);
        assert_eq!(*other, vec![1, 2, 3]);
        assert!(!Cached::ptr_eq(&value, &other));
    }

    #[test]
    fn violation_message_names_key() {
        let violation = ReadOnlyViolation {
            key: "user:1".to_string(),
        };
        assert!(violation.to_string().contains("`user:1`"));
    }
}
