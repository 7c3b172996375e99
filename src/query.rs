//! Queries
//!
//! A [`Query`] is a tuple-sized predicate: each position is either a
//! concrete [`Value`] that must compare equal, or a typed wildcard
//! ([`formal`]) admitting any value of one variant. Wildcards bind through
//! the matched tuple returned by the store and runtime operations.

use std::cmp::Ordering;
use std::fmt::{self, Display, Formatter};

use crate::tuple::Tuple;
use crate::value::{FromValue, Value, ValueKind};

////////////////////////////////////////////////////////////////////////////////
// Field
////////////////////////////////////////////////////////////////////////////////

/// One query position.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Field {
    /// Matches a value comparing equal.
    Exact(Value),
    /// Matches any value of the given kind.
    Formal(ValueKind),
}

impl Field {
    /// Whether a tuple value satisfies this position.
    #[inline]
    pub fn admits(&self, value: &Value) -> bool {
        match self {
            Self::Exact(expected) => expected == value,
            Self::Formal(kind) => !value.is_ref() && value.kind() == *kind,
        }
    }

    /// Three-way comparison against a tuple value: equal on a match,
    /// otherwise ordered by value (exact) or by variant-index difference
    /// (wildcard).
    pub fn cmp_value(&self, value: &Value) -> Ordering {
        match self {
            Self::Exact(expected) => value.cmp(expected),
            Self::Formal(kind) => {
                if self.admits(value) {
                    Ordering::Equal
                } else {
                    value.kind().index().cmp(&kind.index())
                }
            }
        }
    }

    /// An index can only be narrowed by a concrete position.
    #[inline]
    pub fn indexable(&self) -> bool {
        matches!(self, Self::Exact(_))
    }
}

impl Display for Field {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact(value) => write!(f, "{value}"),
            Self::Formal(kind) => write!(f, "?{kind}"),
        }
    }
}

macro_rules! impl_field_from {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for Field {
                #[inline]
                fn from(value: $ty) -> Self {
                    Self::Exact(Value::from(value))
                }
            }
        )*
    };
}

impl_field_from! {
    i16, u16, i32, u32, i64, u64, f32, f64, &str, String,
    crate::value::FnCall,
}

impl From<Value> for Field {
    #[inline]
    fn from(value: Value) -> Self {
        Self::Exact(value)
    }
}

/// A typed wildcard position admitting values of the variant that `T` maps
/// to. The conventional Linda name for these is a *formal*.
///
/// ```
/// use linda::{query, query::formal};
///
/// let q = query!("x", formal::<i32>());
/// ```
#[inline]
pub fn formal<T: FromValue>() -> Field {
    Field::Formal(T::KIND)
}

////////////////////////////////////////////////////////////////////////////////
// Query
////////////////////////////////////////////////////////////////////////////////

/// A content-match predicate over tuples.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Query {
    fields: Vec<Field>,
}

impl Query {
    #[inline]
    pub fn from_fields(fields: impl IntoIterator<Item = Field>) -> Self {
        Self {
            fields: fields.into_iter().collect(),
        }
    }

    /// A concrete query matching tuples equal to `tuple`.
    pub fn from_tuple(tuple: &Tuple) -> Self {
        Self::from_fields(tuple.iter().cloned().map(Field::Exact))
    }

    /// Reconstruct a query from a representing tuple received off the wire:
    /// `Ref` values become wildcards of their admitted kind, everything else
    /// an exact position.
    pub fn from_representing(tuple: &Tuple) -> Self {
        Self::from_fields(tuple.iter().map(|value| match value {
            Value::Ref(kind) => Field::Formal(*kind),
            concrete => Field::Exact(concrete.clone()),
        }))
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    #[inline]
    pub fn field(&self, position: usize) -> Option<&Field> {
        self.fields.get(position)
    }

    #[inline]
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Whether `tuple` satisfies the query: sizes agree and every position
    /// matches.
    pub fn matches(&self, tuple: &Tuple) -> bool {
        self.fields.len() == tuple.len()
            && self
                .fields
                .iter()
                .zip(tuple.iter())
                .all(|(field, value)| field.admits(value))
    }

    /// Three-way comparison against a tuple: size first, then positionwise.
    pub fn cmp_tuple(&self, tuple: &Tuple) -> Ordering {
        tuple.len().cmp(&self.fields.len()).then_with(|| {
            for (field, value) in self.fields.iter().zip(tuple.iter()) {
                let ord = field.cmp_value(value);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            Ordering::Equal
        })
    }

    /// Projection used for transport: concrete values as-is, wildcards as
    /// [`Value::Ref`] carrying the admitted kind.
    pub fn representing_tuple(&self) -> Tuple {
        self.fields
            .iter()
            .map(|field| match field {
                Field::Exact(value) => value.clone(),
                Field::Formal(kind) => Value::Ref(*kind),
            })
            .collect()
    }

    /// Canonical, deterministic type signature, for logging.
    ///
    /// ```
    /// use linda::{query, query::formal};
    ///
    /// let q = query!("x", 42i32, formal::<f64>());
    /// assert_eq!(q.type_signature(), "(str, i32, ?f64)");
    /// ```
    pub fn type_signature(&self) -> String {
        let mut out = String::from("(");
        for (i, field) in self.fields.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            match field {
                Field::Exact(value) => out.push_str(value.kind().name()),
                Field::Formal(kind) => {
                    out.push('?');
                    out.push_str(kind.name());
                }
            }
        }
        out.push(')');
        out
    }
}

impl Display for Query {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for (i, field) in self.fields.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{field}")?;
        }
        f.write_str(")")
    }
}

/// Builds a [`Query`] from positions that are either concrete values or
/// wildcards produced by [`formal`].
#[macro_export]
macro_rules! query {
    ($($field:expr),+ $(,)?) => {
        $crate::query::Query::from_fields([
            $($crate::query::Field::from($field)),+
        ])
    };
}
