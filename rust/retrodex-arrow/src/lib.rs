// SPDX-License-Identifier: Apache-2.0
// SPDX-FileCopyrightText: Copyright The Lance Authors

//! Extend Arrow Functionality
//!
//! To improve Arrow-RS ergonomic

use std::sync::Arc;

use arrow_array::{
    cast::AsArray, types::Float32Type, Array, FixedSizeListArray, Float32Array,
};
use arrow_schema::{ArrowError, DataType, Field};

type Result<T> = std::result::Result<T, ArrowError>;

pub trait FixedSizeListArrayExt {
    /// Create an [`FixedSizeListArray`] from values and list size.
    ///
    /// ```
    /// use arrow_array::{Array, Float32Array, FixedSizeListArray};
    /// use retrodex_arrow::FixedSizeListArrayExt;
    ///
    /// let values = Float32Array::from_iter_values((0..6).map(|v| v as f32));
    /// let arr = FixedSizeListArray::try_new_from_values(values, 3).unwrap();
    /// assert_eq!(arr.len(), 2);
    /// ```
    fn try_new_from_values<T: Array + 'static>(
        values: T,
        list_size: i32,
    ) -> Result<FixedSizeListArray>;
}

impl FixedSizeListArrayExt for FixedSizeListArray {
    fn try_new_from_values<T: Array + 'static>(values: T, list_size: i32) -> Result<Self> {
        if list_size <= 0 {
            return Err(ArrowError::InvalidArgumentError(format!(
                "list size must be positive, got {list_size}"
            )));
        }
        let field = Arc::new(Field::new("item", values.data_type().clone(), true));
        let values = Arc::new(values);

        Self::try_new(field, list_size, values, None)
    }
}

/// Row-major `f32` access to a [`FixedSizeListArray`] of `Float32` values.
pub trait FloatVectorsExt {
    /// The width of each vector.
    fn dimension(&self) -> usize;

    /// Flattened `rows * dimension` values.
    ///
    /// Returns an error if the items are not `Float32`.
    fn flat_values(&self) -> Result<&[f32]>;
}

impl FloatVectorsExt for FixedSizeListArray {
    fn dimension(&self) -> usize {
        self.value_length() as usize
    }

    fn flat_values(&self) -> Result<&[f32]> {
        if self.value_type() != DataType::Float32 {
            return Err(ArrowError::InvalidArgumentError(format!(
                "expected Float32 vectors, got {}",
                self.value_type()
            )));
        }
        let values: &Float32Array = self.values().as_primitive::<Float32Type>();
        // Slicing a FixedSizeListArray slices its child values as well.
        Ok(&values.values()[..self.len() * self.dimension()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flat_values_respects_slicing() {
        let values = Float32Array::from_iter_values((0..12).map(|v| v as f32));
        let arr = FixedSizeListArray::try_new_from_values(values, 4).unwrap();
        let sliced = arr.slice(1, 2);
        assert_eq!(sliced.dimension(), 4);
        assert_eq!(
            sliced.flat_values().unwrap(),
            &[4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 10.0, 11.0]
        );
    }

    #[test]
    fn test_rejects_non_float_items() {
        let values = arrow_array::UInt32Array::from(vec![1, 2, 3, 4]);
        let arr = FixedSizeListArray::try_new_from_values(values, 2).unwrap();
        assert!(arr.flat_values().is_err());
    }
}
