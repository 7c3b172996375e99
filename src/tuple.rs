//! Tuples
//!
//! The `tuple` submodule provides the immutable, ordered field sequence that
//! is the atomic unit of communication of the tuple space. Tuples of up to
//! three fields are stored inline, which covers the overwhelming majority of
//! coordination traffic (key + one or two payload fields).

use std::cmp::Ordering;
use std::fmt::{self, Display, Formatter};

use smallvec::SmallVec;

use crate::value::{FromValue, Value};

/// Number of fields a tuple can hold without allocating.
pub(crate) const INLINE_FIELDS: usize = 3;

////////////////////////////////////////////////////////////////////////////////
// Tuple
////////////////////////////////////////////////////////////////////////////////

/// An ordered, finite sequence of [`Value`]s.
///
/// Tuples are immutable once constructed; [`Tuple::len`] and positional
/// access are total. Use the [`tuple!`](crate::tuple!) macro for literals:
///
/// ```
/// use linda::tuple;
///
/// let t = tuple!("rank", 2i32, "Hello World!");
/// assert_eq!(t.len(), 3);
/// assert_eq!(t.get::<i32>(1), Some(2));
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Tuple {
    fields: SmallVec<[Value; INLINE_FIELDS]>,
}

impl Tuple {
    /// Build a tuple from an already-collected field list.
    #[inline]
    pub fn from_values(fields: impl IntoIterator<Item = Value>) -> Self {
        Self {
            fields: fields.into_iter().collect(),
        }
    }

    /// Return the number of fields in the tuple.
    #[inline]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Positional access. `None` for an out-of-range position.
    #[inline]
    pub fn field(&self, position: usize) -> Option<&Value> {
        self.fields.get(position)
    }

    /// Typed positional access; `None` if the position is out of range *or*
    /// holds a different variant. This is how wildcard bindings are read out
    /// of a matched tuple.
    #[inline]
    pub fn get<T: FromValue>(&self, position: usize) -> Option<T> {
        self.field(position).and_then(T::from_value)
    }

    #[inline]
    pub fn iter(&self) -> std::slice::Iter<'_, Value> {
        self.fields.iter()
    }

    pub fn values(&self) -> &[Value] {
        &self.fields
    }
}

impl FromIterator<Value> for Tuple {
    fn from_iter<I: IntoIterator<Item = Value>>(iter: I) -> Self {
        Self::from_values(iter)
    }
}

impl<'a> IntoIterator for &'a Tuple {
    type Item = &'a Value;
    type IntoIter = std::slice::Iter<'a, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.iter()
    }
}

// Size first, then positionwise. Keeps tuple order consistent with query
// comparison and gives `FnCall` arguments a total order.
impl Ord for Tuple {
    fn cmp(&self, other: &Self) -> Ordering {
        self.len()
            .cmp(&other.len())
            .then_with(|| self.fields.cmp(&other.fields))
    }
}

impl PartialOrd for Tuple {
    #[inline]
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Display for Tuple {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for (i, value) in self.fields.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{value}")?;
        }
        f.write_str(")")
    }
}

/// Builds a [`Tuple`] from heterogeneous field expressions, each of which
/// must convert [`Into`] a [`Value`].
#[macro_export]
macro_rules! tuple {
    ($($field:expr),+ $(,)?) => {
        $crate::tuple::Tuple::from_values([
            $($crate::value::Value::from($field)),+
        ])
    };
}
