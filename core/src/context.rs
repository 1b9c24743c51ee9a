//! Request-scoped context.
//!
//! A [`Context`] is an immutable, heterogeneous map from field names to
//! values. Fields are addressed with typed tokens ([`Field`]) so a lookup
//! always names the type it expects:
//!
//! ```
//! use rpc_chain_core::context::{Context, Field};
//!
//! const USER_ID: Field<u64> = Field::new("user_id");
//!
//! let ctx = Context::new().with(USER_ID, 42);
//! assert_eq!(ctx.get(USER_ID), Some(&42));
//! ```
//!
//! # Merge rule
//!
//! Merging never mutates either side. The result holds every field of the
//! left-hand context plus every field of the right-hand one, and a field
//! present on both sides takes the right-hand value.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use thiserror::Error;

/// Errors raised by typed context lookups.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ContextError {
    /// No field with this name has been merged into the context.
    #[error("context field `{0}` is missing")]
    Missing(&'static str),

    /// The field exists but holds a value of another type.
    #[error("context field `{field}` holds `{actual}`, expected `{expected}`")]
    TypeMismatch {
        /// Field name
        field: &'static str,
        /// Type requested by the caller
        expected: &'static str,
        /// Type stored in the context
        actual: &'static str,
    },
}

/// Typed token naming one context field.
///
/// Two tokens with the same name address the same field, regardless of
/// their type parameter. Reading through a token of the wrong type yields
/// `None` from [`Context::get`] and [`ContextError::TypeMismatch`] from
/// [`Context::require`].
pub struct Field<T> {
    name: &'static str,
    _type: PhantomData<fn() -> T>,
}

impl<T> Field<T> {
    /// Declare a field token.
    #[must_use]
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _type: PhantomData,
        }
    }

    /// The field name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }
}

impl<T> Clone for Field<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Field<T> {}

impl<T> fmt::Debug for Field<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Field").field(&self.name).finish()
    }
}

#[derive(Clone)]
struct Slot {
    value: Arc<dyn Any + Send + Sync>,
    type_name: &'static str,
}

/// Immutable request context.
///
/// Cloning is cheap (one reference count). Every "mutating" method takes
/// `self` by value and returns the updated context; the underlying map is
/// only copied when it is shared with another clone.
#[derive(Clone, Default)]
pub struct Context {
    fields: Arc<BTreeMap<&'static str, Slot>>,
}

impl Context {
    /// Create an empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Return a context with `field` set to `value`, replacing any previous
    /// value stored under the same name.
    #[must_use]
    pub fn with<T>(mut self, field: Field<T>, value: T) -> Self
    where
        T: Send + Sync + 'static,
    {
        Arc::make_mut(&mut self.fields).insert(
            field.name,
            Slot {
                value: Arc::new(value),
                type_name: std::any::type_name::<T>(),
            },
        );
        self
    }

    /// Return a context without the named field.
    #[must_use]
    pub fn without<T>(mut self, field: Field<T>) -> Self {
        if self.fields.contains_key(field.name) {
            Arc::make_mut(&mut self.fields).remove(field.name);
        }
        self
    }

    /// Merge `other` into this context. Fields of `other` win.
    #[must_use]
    pub fn merge(mut self, other: &Self) -> Self {
        if other.fields.is_empty() {
            return self;
        }
        if self.fields.is_empty() {
            return other.clone();
        }
        let fields = Arc::make_mut(&mut self.fields);
        for (name, slot) in other.fields.iter() {
            fields.insert(*name, slot.clone());
        }
        self
    }

    /// Look up a field.
    ///
    /// Returns `None` when the field is absent or stores another type.
    #[must_use]
    pub fn get<T>(&self, field: Field<T>) -> Option<&T>
    where
        T: 'static,
    {
        self.fields
            .get(field.name)
            .and_then(|slot| slot.value.downcast_ref::<T>())
    }

    /// Look up a field that the caller requires to be present.
    ///
    /// # Errors
    ///
    /// - [`ContextError::Missing`] if nothing was stored under the name
    /// - [`ContextError::TypeMismatch`] if the stored value has another type
    pub fn require<T>(&self, field: Field<T>) -> Result<&T, ContextError>
    where
        T: 'static,
    {
        let slot = self
            .fields
            .get(field.name)
            .ok_or(ContextError::Missing(field.name))?;
        slot.value
            .downcast_ref::<T>()
            .ok_or(ContextError::TypeMismatch {
                field: field.name,
                expected: std::any::type_name::<T>(),
                actual: slot.type_name,
            })
    }

    /// Whether a field with this name exists (of any type).
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    /// Field names in sorted order.
    pub fn keys(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.fields.keys().copied()
    }

    /// Number of fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the context has no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.fields.iter().map(|(name, slot)| (name, slot.type_name)))
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const X: Field<i32> = Field::new("x");
    const NAME: Field<String> = Field::new("name");
    const X_AS_STRING: Field<String> = Field::new("x");

    #[test]
    fn test_with_and_get() {
        let ctx = Context::new().with(X, 1).with(NAME, "alice".to_string());

        assert_eq!(ctx.get(X), Some(&1));
        assert_eq!(ctx.get(NAME).map(String::as_str), Some("alice"));
        assert_eq!(ctx.len(), 2);
    }

    #[test]
    fn test_with_does_not_touch_clones() {
        let original = Context::new().with(X, 1);
        let updated = original.clone().with(X, 2);

        assert_eq!(original.get(X), Some(&1));
        assert_eq!(updated.get(X), Some(&2));
    }

    #[test]
    fn test_merge_right_side_wins() {
        let left = Context::new().with(X, 1).with(NAME, "left".to_string());
        let right = Context::new().with(X, 7);

        let merged = left.clone().merge(&right);

        assert_eq!(merged.get(X), Some(&7));
        assert_eq!(merged.get(NAME).map(String::as_str), Some("left"));
        assert_eq!(left.get(X), Some(&1));
    }

    #[test]
    fn test_merge_can_change_field_type() {
        let ctx = Context::new()
            .with(X, 1)
            .merge(&Context::new().with(X_AS_STRING, "one".to_string()));

        assert_eq!(ctx.get(X), None);
        assert_eq!(ctx.get(X_AS_STRING).map(String::as_str), Some("one"));
    }

    #[test]
    fn test_require_errors() {
        let ctx = Context::new().with(X, 1);

        assert_eq!(ctx.require(NAME), Err(ContextError::Missing("name")));
        assert!(matches!(
            ctx.require(X_AS_STRING),
            Err(ContextError::TypeMismatch { field: "x", .. })
        ));
        assert_eq!(*ctx.require(X).unwrap(), 1);
    }

    #[test]
    fn test_without() {
        let ctx = Context::new().with(X, 1).with(NAME, String::new());
        let trimmed = ctx.clone().without(X);

        assert!(!trimmed.contains("x"));
        assert!(ctx.contains("x"));
        assert_eq!(trimmed.keys().collect::<Vec<_>>(), vec!["name"]);
    }
}
