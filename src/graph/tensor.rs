//! Constant tensor payloads and element types.
//!
//! A [`Tensor`] stores a compile-time constant as raw little-endian bytes plus
//! a dtype tag and shape. The emitter reads elements back through width
//! dispatch: signed integers over {1,2,4,8}-byte widths, floats over {4,8}.
//! Any other width, or a payload shorter than the declared shape requires, is
//! a fatal condition surfaced as [`ElementError`] and mapped to
//! `MalformedAttribute` by the caller.

use std::fmt;

/// Element type of a tensor or scalar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dtype {
    Bool,
    Int8,
    Int16,
    Int32,
    Int64,
    Float16,
    Float32,
    Float64,
}

impl Dtype {
    /// Element width in bytes.
    pub fn size_of(self) -> usize {
        match self {
            Dtype::Bool | Dtype::Int8 => 1,
            Dtype::Int16 | Dtype::Float16 => 2,
            Dtype::Int32 | Dtype::Float32 => 4,
            Dtype::Int64 | Dtype::Float64 => 8,
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, Dtype::Float16 | Dtype::Float32 | Dtype::Float64)
    }

    /// Stable numeric tag used in instruction operands and the binary
    /// container.
    pub fn code(self) -> i64 {
        match self {
            Dtype::Bool => 1,
            Dtype::Int8 => 2,
            Dtype::Int16 => 3,
            Dtype::Int32 => 4,
            Dtype::Int64 => 5,
            Dtype::Float16 => 6,
            Dtype::Float32 => 7,
            Dtype::Float64 => 8,
        }
    }
}

impl fmt::Display for Dtype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Dtype::Bool => "bool",
            Dtype::Int8 => "int8",
            Dtype::Int16 => "int16",
            Dtype::Int32 => "int32",
            Dtype::Int64 => "int64",
            Dtype::Float16 => "float16",
            Dtype::Float32 => "float32",
            Dtype::Float64 => "float64",
        };
        f.write_str(s)
    }
}

/// Static type of a value: dtype plus shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TensorType {
    pub dtype: Dtype,
    pub dims: Vec<i64>,
}

impl TensorType {
    /// Total size in bytes, when every dim is known non-negative.
    pub fn nbytes(&self) -> Option<i64> {
        let mut n = self.dtype.size_of() as i64;
        for &d in &self.dims {
            if d < 0 {
                return None;
            }
            n = n.checked_mul(d)?;
        }
        Some(n)
    }
}

/// A payload element that cannot be read back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementError {
    /// The dtype's byte width has no reader in the current dispatch.
    Width { dtype: Dtype },
    /// The raw payload ends before the requested element.
    Truncated { index: usize, len: usize },
}

impl fmt::Display for ElementError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ElementError::Width { dtype } => {
                write!(f, "no element reader for dtype {dtype} ({} bytes)", dtype.size_of())
            }
            ElementError::Truncated { index, len } => {
                write!(f, "payload of {len} bytes ends before element {index}")
            }
        }
    }
}

/// Compile-time constant payload: raw little-endian element bytes.
#[derive(Debug, Clone)]
pub struct Tensor {
    dtype: Dtype,
    dims: Vec<i64>,
    data: Vec<u8>,
}

impl Tensor {
    pub fn new(dtype: Dtype, dims: Vec<i64>, data: Vec<u8>) -> Self {
        Tensor { dtype, dims, data }
    }

    /// Build an integer tensor from element values.
    pub fn from_ints(dtype: Dtype, dims: Vec<i64>, elements: &[i64]) -> Self {
        let mut data = Vec::with_capacity(elements.len() * dtype.size_of());
        for &e in elements {
            match dtype.size_of() {
                1 => data.push(e as i8 as u8),
                2 => data.extend_from_slice(&(e as i16).to_le_bytes()),
                4 => data.extend_from_slice(&(e as i32).to_le_bytes()),
                _ => data.extend_from_slice(&e.to_le_bytes()),
            }
        }
        Tensor { dtype, dims, data }
    }

    /// Build a float tensor from element values.
    pub fn from_floats(dtype: Dtype, dims: Vec<i64>, elements: &[f64]) -> Self {
        let mut data = Vec::with_capacity(elements.len() * dtype.size_of());
        for &e in elements {
            if dtype.size_of() == 4 {
                data.extend_from_slice(&(e as f32).to_le_bytes());
            } else {
                data.extend_from_slice(&e.to_le_bytes());
            }
        }
        Tensor { dtype, dims, data }
    }

    pub fn dtype(&self) -> Dtype {
        self.dtype
    }

    pub fn dims(&self) -> &[i64] {
        &self.dims
    }

    pub fn num_elements(&self) -> usize {
        self.dims.iter().product::<i64>().max(0) as usize
    }

    fn element_bytes(&self, index: usize) -> Result<&[u8], ElementError> {
        let w = self.dtype.size_of();
        let start = index * w;
        let end = start + w;
        if end > self.data.len() {
            return Err(ElementError::Truncated { index, len: self.data.len() });
        }
        Ok(&self.data[start..end])
    }

    /// Read one element as a signed integer, dispatching on width.
    pub fn int_element(&self, index: usize) -> Result<i64, ElementError> {
        let b = self.element_bytes(index)?;
        match self.dtype.size_of() {
            1 => Ok(b[0] as i8 as i64),
            2 => Ok(i16::from_le_bytes([b[0], b[1]]) as i64),
            4 => Ok(i32::from_le_bytes([b[0], b[1], b[2], b[3]]) as i64),
            8 => Ok(i64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]])),
            _ => Err(ElementError::Width { dtype: self.dtype }),
        }
    }

    /// Read one element as a float, dispatching on width. Only 4- and 8-byte
    /// floats have readers.
    pub fn float_element(&self, index: usize) -> Result<f64, ElementError> {
        let b = self.element_bytes(index)?;
        match self.dtype.size_of() {
            4 => Ok(f32::from_le_bytes([b[0], b[1], b[2], b[3]]) as f64),
            8 => Ok(f64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]])),
            _ => Err(ElementError::Width { dtype: self.dtype }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_int_width_dispatch() {
        for (dtype, want) in [
            (Dtype::Int8, -5i64),
            (Dtype::Int16, -300),
            (Dtype::Int32, -70000),
            (Dtype::Int64, -5_000_000_000),
        ] {
            let t = Tensor::from_ints(dtype, vec![1], &[want]);
            assert_eq!(t.int_element(0), Ok(want), "{dtype}");
        }
    }

    #[test]
    fn test_float_width_dispatch() {
        let t = Tensor::from_floats(Dtype::Float32, vec![2], &[1.5, -2.25]);
        assert_eq!(t.float_element(1), Ok(-2.25));
        let t = Tensor::from_floats(Dtype::Float64, vec![1], &[3.141592653589793]);
        assert_eq!(t.float_element(0), Ok(3.141592653589793));
    }

    #[test]
    fn test_half_float_width_is_rejected() {
        let t = Tensor::new(Dtype::Float16, vec![1], vec![0, 0]);
        assert_eq!(t.float_element(0), Err(ElementError::Width { dtype: Dtype::Float16 }));
    }

    #[test]
    fn test_truncated_payload_is_rejected() {
        // Room for two elements, shape declares four.
        let t = Tensor::new(Dtype::Int32, vec![4], vec![0; 8]);
        assert_eq!(t.int_element(1), Ok(0));
        assert_eq!(t.int_element(2), Err(ElementError::Truncated { index: 2, len: 8 }));
    }

    #[test]
    fn test_scalar_has_one_element() {
        let t = Tensor::from_floats(Dtype::Float32, vec![], &[7.0]);
        assert_eq!(t.num_elements(), 1);
        assert!(t.dims().is_empty());
    }
}
