//! This module provides a set of shared, low-level utility functions used
//! throughout the rhseg core.
//!
//! Its primary responsibilities include:
//! 1.  Providing safe, validated conversions between raw byte slices and typed slices.
//! 2.  Checked narrowing of counts and indices into the fixed-width integers
//!     used on the wire.

use num_traits::ToPrimitive;
use std::fmt::Display;

use crate::error::RhsegError;

//==================================================================================
// 1. Byte <-> Typed Slice Conversions
//==================================================================================

/// Reinterprets a typed slice as its raw bytes (native byte order) and copies them.
pub fn typed_slice_to_bytes<T: bytemuck::Pod>(slice: &[T]) -> Vec<u8> {
    bytemuck::cast_slice::<T, u8>(slice).to_vec()
}

/// Copies a byte slice into a freshly allocated, correctly aligned `Vec<T>`.
///
/// # Errors
/// Returns `RhsegError::PodCast` if the byte length is not a multiple of the
/// size of `T`.
pub fn bytes_to_typed_vec<T: bytemuck::Pod>(bytes: &[u8]) -> Result<Vec<T>, RhsegError> {
    let width = std::mem::size_of::<T>();
    if width == 0 || bytes.len() % width != 0 {
        return Err(RhsegError::PodCast(format!(
            "byte length {} is not a multiple of element size {}",
            bytes.len(),
            width
        )));
    }
    // Copy into a typed allocation so the result is aligned for `T`.
    let mut typed = vec![T::zeroed(); bytes.len() / width];
    bytemuck::cast_slice_mut::<T, u8>(&mut typed).copy_from_slice(bytes);
    Ok(typed)
}

//==================================================================================
// 2. Checked Narrowing
//==================================================================================

/// Narrows a count or index into a `u32` wire integer.
pub fn checked_u32<T>(value: T, what: &str) -> Result<u32, RhsegError>
where
    T: ToPrimitive + Display + Copy,
{
    value.to_u32().ok_or_else(|| {
        RhsegError::Internal(format!("{} ({}) does not fit in a u32 wire field", what, value))
    })
}

/// Narrows a section id into the `i16` short slot used by index records.
pub fn checked_i16<T>(value: T, what: &str) -> Result<i16, RhsegError>
where
    T: ToPrimitive + Display + Copy,
{
    value.to_i16().ok_or_else(|| {
        RhsegError::Internal(format!("{} ({}) does not fit in an i16 wire field", what, value))
    })
}
