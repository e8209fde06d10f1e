//! Tagged constant values.
//!
//! Literals carry filter constants, DEFAULT values and single fetched cells
//! before a caller has committed to a concrete Arrow type. Conversion helpers
//! defer type checking until the target column type is known.

use std::cmp::Ordering;
use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, BooleanArray, Float64Array, Int32Array, Int64Array, StringArray,
    new_null_array,
};
use arrow::datatypes::DataType;
use strata_result::{Error, Result};

/// A constant value not yet coerced into a column's native type.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Null,
    Int64(i64),
    Float64(f64),
    String(String),
    Boolean(bool),
}

macro_rules! impl_from_for_literal {
    ($variant:ident, $($t:ty),*) => {
        $(
            impl From<$t> for Literal {
                fn from(v: $t) -> Self {
                    Literal::$variant(v.into())
                }
            }
        )*
    };
}

impl_from_for_literal!(Int64, i8, i16, i32, i64, u8, u16, u32);
impl_from_for_literal!(Float64, f32, f64);
impl_from_for_literal!(String, String);
impl_from_for_literal!(Boolean, bool);

impl From<&str> for Literal {
    fn from(v: &str) -> Self {
        Literal::String(v.to_string())
    }
}

impl<T: Into<Literal>> From<Option<T>> for Literal {
    fn from(v: Option<T>) -> Self {
        v.map_or(Literal::Null, Into::into)
    }
}

impl Literal {
    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Literal::Null)
    }

    /// Three-way comparison. Integers and floats compare numerically with each
    /// other; NULL and mismatched kinds are incomparable.
    pub fn compare(&self, other: &Literal) -> Option<Ordering> {
        match (self, other) {
            (Literal::Int64(a), Literal::Int64(b)) => Some(a.cmp(b)),
            (Literal::Float64(a), Literal::Float64(b)) => a.partial_cmp(b),
            (Literal::Int64(a), Literal::Float64(b)) => (*a as f64).partial_cmp(b),
            (Literal::Float64(a), Literal::Int64(b)) => a.partial_cmp(&(*b as f64)),
            (Literal::String(a), Literal::String(b)) => Some(a.cmp(b)),
            (Literal::Boolean(a), Literal::Boolean(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// Read the value at `idx` of a supported Arrow array.
    pub fn from_array(array: &dyn Array, idx: usize) -> Result<Literal> {
        if array.is_null(idx) {
            return Ok(Literal::Null);
        }
        let any = array.as_any();
        let value = match array.data_type() {
            DataType::Int32 => downcast::<Int32Array>(any)?.value(idx).into(),
            DataType::Int64 => downcast::<Int64Array>(any)?.value(idx).into(),
            DataType::Float64 => downcast::<Float64Array>(any)?.value(idx).into(),
            DataType::Utf8 => downcast::<StringArray>(any)?.value(idx).into(),
            DataType::Boolean => downcast::<BooleanArray>(any)?.value(idx).into(),
            other => {
                return Err(Error::NotImplemented(format!(
                    "literal extraction for type {other:?}"
                )));
            }
        };
        Ok(value)
    }

    /// Materialize this literal `len` times as an array of `data_type`.
    pub fn to_array(&self, data_type: &DataType, len: usize) -> Result<ArrayRef> {
        if self.is_null() {
            return Ok(new_null_array(data_type, len));
        }
        let array: ArrayRef = match (data_type, self) {
            (DataType::Int32, Literal::Int64(v)) => {
                let v = i32::try_from(*v).map_err(|_| {
                    Error::InvalidArgumentError(format!("value {v} out of range for INTEGER"))
                })?;
                Arc::new(Int32Array::from(vec![v; len]))
            }
            (DataType::Int64, Literal::Int64(v)) => Arc::new(Int64Array::from(vec![*v; len])),
            (DataType::Float64, Literal::Float64(v)) => {
                Arc::new(Float64Array::from(vec![*v; len]))
            }
            (DataType::Float64, Literal::Int64(v)) => {
                Arc::new(Float64Array::from(vec![*v as f64; len]))
            }
            (DataType::Utf8, Literal::String(v)) => {
                Arc::new(StringArray::from(vec![v.as_str(); len]))
            }
            (DataType::Boolean, Literal::Boolean(v)) => {
                Arc::new(BooleanArray::from(vec![*v; len]))
            }
            (dt, lit) => {
                return Err(Error::InvalidArgumentError(format!(
                    "cannot materialize {lit:?} as {dt:?}"
                )));
            }
        };
        Ok(array)
    }
}

fn downcast<T: 'static>(any: &dyn std::any::Any) -> Result<&T> {
    any.downcast_ref::<T>()
        .ok_or_else(|| Error::Internal("array type does not match its data type".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_literals_compare_across_kinds() {
        assert_eq!(
            Literal::from(5).compare(&Literal::from(5.5)),
            Some(Ordering::Less)
        );
        assert_eq!(Literal::Null.compare(&Literal::from(1)), None);
        assert_eq!(Literal::from("b").compare(&Literal::from("a")), Some(Ordering::Greater));
    }

    #[test]
    fn to_array_rejects_out_of_range_integers() {
        let err = Literal::from(i64::MAX).to_array(&DataType::Int32, 1).unwrap_err();
        assert!(matches!(err, Error::InvalidArgumentError(_)));
        let arr = Literal::from(7).to_array(&DataType::Int32, 3).unwrap();
        assert_eq!(arr.len(), 3);
        assert_eq!(Literal::from_array(arr.as_ref(), 2).unwrap(), Literal::from(7));
    }
}
