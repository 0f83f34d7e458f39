//! Typed extraction from [`Value`]s.

use crate::error::{ValueError, ValueResult};
use crate::value::Value;

/// Types that can be extracted from a single [`Value`].
///
/// Used for scalar query results and for hand-written DTO constructors.
pub trait FromValue: Sized {
    /// Converts the value, failing on a type mismatch.
    fn from_value(value: Value) -> ValueResult<Self>;
}

impl FromValue for Value {
    fn from_value(value: Value) -> ValueResult<Self> {
        Ok(value)
    }
}

impl FromValue for i64 {
    fn from_value(value: Value) -> ValueResult<Self> {
        match value {
            Value::Integer(n) => Ok(n),
            other => Err(ValueError::type_mismatch("integer", &other)),
        }
    }
}

impl FromValue for i32 {
    fn from_value(value: Value) -> ValueResult<Self> {
        let n = i64::from_value(value)?;
        Self::try_from(n).map_err(|_| ValueError::OutOfRange {
            value: n,
            target: "i32",
        })
    }
}

impl FromValue for u32 {
    fn from_value(value: Value) -> ValueResult<Self> {
        let n = i64::from_value(value)?;
        Self::try_from(n).map_err(|_| ValueError::OutOfRange {
            value: n,
            target: "u32",
        })
    }
}

impl FromValue for bool {
    fn from_value(value: Value) -> ValueResult<Self> {
        match value {
            Value::Bool(b) => Ok(b),
            other => Err(ValueError::type_mismatch("bool", &other)),
        }
    }
}

impl FromValue for String {
    fn from_value(value: Value) -> ValueResult<Self> {
        match value {
            Value::Text(s) => Ok(s),
            other => Err(ValueError::type_mismatch("text", &other)),
        }
    }
}

impl FromValue for Vec<u8> {
    fn from_value(value: Value) -> ValueResult<Self> {
        match value {
            Value::Bytes(b) => Ok(b),
            other => Err(ValueError::type_mismatch("bytes", &other)),
        }
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: Value) -> ValueResult<Self> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}

/// Types that can be built from an ordered list of column values.
///
/// Implemented for tuples and by hand for constructor-style result types.
pub trait FromRow: Sized {
    /// Builds the value from positional columns.
    fn from_row(values: Vec<Value>) -> ValueResult<Self>;
}

macro_rules! tuple_from_row {
    ($len:expr; $($name:ident),+) => {
        impl<$($name: FromValue),+> FromRow for ($($name,)+) {
            fn from_row(values: Vec<Value>) -> ValueResult<Self> {
                if values.len() != $len {
                    return Err(ValueError::Arity {
                        expected: $len,
                        found: values.len(),
                    });
                }
                let mut iter = values.into_iter();
                Ok(($(
                    $name::from_value(iter.next().unwrap_or(Value::Null))?,
                )+))
            }
        }
    };
}

tuple_from_row!(1; A);
tuple_from_row!(2; A, B);
tuple_from_row!(3; A, B, C);
tuple_from_row!(4; A, B, C, D);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_conversions() {
        assert_eq!(i64::from_value(Value::Integer(5)).unwrap(), 5);
        assert_eq!(i32::from_value(Value::Integer(5)).unwrap(), 5);
        assert_eq!(
            String::from_value(Value::from("abc")).unwrap(),
            "abc".to_string()
        );
        assert!(bool::from_value(Value::Bool(true)).unwrap());
    }

    #[test]
    fn mismatch_reports_types() {
        let err = i64::from_value(Value::from("x")).unwrap_err();
        assert_eq!(
            err,
            ValueError::TypeMismatch {
                expected: "integer",
                found: "text"
            }
        );
    }

    #[test]
    fn narrowing_out_of_range() {
        let err = i32::from_value(Value::Integer(i64::MAX)).unwrap_err();
        assert!(matches!(err, ValueError::OutOfRange { target: "i32", .. }));
    }

    #[test]
    fn option_maps_null() {
        assert_eq!(Option::<i64>::from_value(Value::Null).unwrap(), None);
        assert_eq!(Option::<i64>::from_value(Value::Integer(3)).unwrap(), Some(3));
    }

    #[test]
    fn tuple_from_row() {
        let (name, age): (String, i64) =
            FromRow::from_row(vec![Value::from("a"), Value::Integer(10)]).unwrap();
        assert_eq!(name, "a");
        assert_eq!(age, 10);
    }

    #[test]
    fn tuple_arity_checked() {
        let result: ValueResult<(String, i64)> = FromRow::from_row(vec![Value::from("a")]);
        assert_eq!(
            result.unwrap_err(),
            ValueError::Arity {
                expected: 2,
                found: 1
            }
        );
    }
}
