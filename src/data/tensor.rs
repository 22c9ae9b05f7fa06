//! Named n-dimensional arrays exchanged between devices, captures and storage.
//!
//! A [`Tensor`] keeps its data in the element type the device produced it in,
//! the same way camera frames keep their native bit depth. The set of
//! supported element types mirrors what the dataset archives contain.

use crate::error::{AppResult, DaqError};
use ndarray::{ArrayD, ArrayViewD, Axis, IxDyn};
use serde::Serialize;
use std::fmt;

/// Element type of a [`Tensor`], named by its NPY descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum DType {
    /// `|u1`
    U8,
    /// `|b1`
    Bool,
    /// `<i8`
    I64,
    /// `<f8`
    F64,
    /// `<U{n}`, fixed-width unicode holding up to `n` characters
    Unicode(usize),
}

impl DType {
    /// NPY header descriptor for this element type.
    pub fn descr(&self) -> String {
        match self {
            DType::U8 => "|u1".to_string(),
            DType::Bool => "|b1".to_string(),
            DType::I64 => "<i8".to_string(),
            DType::F64 => "<f8".to_string(),
            DType::Unicode(width) => format!("<U{}", width),
        }
    }

    /// Parse an NPY header descriptor.
    pub fn from_descr(descr: &str) -> AppResult<Self> {
        match descr {
            "|u1" | "<u1" => Ok(DType::U8),
            "|b1" => Ok(DType::Bool),
            "<i8" => Ok(DType::I64),
            "<f8" => Ok(DType::F64),
            other => other
                .strip_prefix("<U")
                .and_then(|width| width.parse().ok())
                .map(DType::Unicode)
                .ok_or_else(|| DaqError::Array(format!("Unsupported array dtype '{}'", other))),
        }
    }

    /// Whether two dtypes describe the same kind of element.
    ///
    /// Unicode widths are ignored since they depend on the longest string.
    pub fn same_kind(&self, other: &DType) -> bool {
        match (self, other) {
            (DType::Unicode(_), DType::Unicode(_)) => true,
            _ => self == other,
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.descr())
    }
}

/// A single value extracted from a one-element tensor.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Scalar {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Bool(v) => write!(f, "{}", v),
            Scalar::Int(v) => write!(f, "{}", v),
            Scalar::Float(v) => write!(f, "{}", v),
            Scalar::Str(v) => write!(f, "{}", v),
        }
    }
}

/// N-dimensional array in its native element type.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq)]
pub enum Tensor {
    U8(ArrayD<u8>),
    Bool(ArrayD<bool>),
    I64(ArrayD<i64>),
    F64(ArrayD<f64>),
    Str(ArrayD<String>),
}

impl Tensor {
    /// One-element `u8` array of shape `[1]`.
    pub fn u8_1d(value: u8) -> Self {
        Tensor::U8(ArrayD::from_elem(IxDyn(&[1]), value))
    }

    /// One-element `bool` array of shape `[1]`.
    pub fn bool_1d(value: bool) -> Self {
        Tensor::Bool(ArrayD::from_elem(IxDyn(&[1]), value))
    }

    /// One-element `i64` array of shape `[1]`.
    pub fn i64_1d(value: i64) -> Self {
        Tensor::I64(ArrayD::from_elem(IxDyn(&[1]), value))
    }

    /// One-element `f64` array of shape `[1]`.
    pub fn f64_1d(value: f64) -> Self {
        Tensor::F64(ArrayD::from_elem(IxDyn(&[1]), value))
    }

    /// Zero-dimensional scalar array.
    pub fn scalar(value: Scalar) -> Self {
        let shape = IxDyn(&[]);
        match value {
            Scalar::Bool(v) => Tensor::Bool(ArrayD::from_elem(shape, v)),
            Scalar::Int(v) => Tensor::I64(ArrayD::from_elem(shape, v)),
            Scalar::Float(v) => Tensor::F64(ArrayD::from_elem(shape, v)),
            Scalar::Str(v) => Tensor::Str(ArrayD::from_elem(shape, v)),
        }
    }

    /// Element type.
    pub fn dtype(&self) -> DType {
        match self {
            Tensor::U8(_) => DType::U8,
            Tensor::Bool(_) => DType::Bool,
            Tensor::I64(_) => DType::I64,
            Tensor::F64(_) => DType::F64,
            Tensor::Str(a) => DType::Unicode(a.iter().map(|s| s.chars().count()).max().unwrap_or(0).max(1)),
        }
    }

    /// Array shape.
    pub fn shape(&self) -> &[usize] {
        match self {
            Tensor::U8(a) => a.shape(),
            Tensor::Bool(a) => a.shape(),
            Tensor::I64(a) => a.shape(),
            Tensor::F64(a) => a.shape(),
            Tensor::Str(a) => a.shape(),
        }
    }

    /// Total number of elements.
    pub fn len(&self) -> usize {
        self.shape().iter().product()
    }

    /// Returns true if the tensor holds no elements.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The only value of a one-element tensor, regardless of its shape.
    pub fn item(&self) -> Option<Scalar> {
        if self.len() != 1 {
            return None;
        }
        match self {
            Tensor::U8(a) => a.iter().next().map(|v| Scalar::Int(i64::from(*v))),
            Tensor::Bool(a) => a.iter().next().map(|v| Scalar::Bool(*v)),
            Tensor::I64(a) => a.iter().next().map(|v| Scalar::Int(*v)),
            Tensor::F64(a) => a.iter().next().map(|v| Scalar::Float(*v)),
            Tensor::Str(a) => a.iter().next().map(|v| Scalar::Str(v.clone())),
        }
    }

    /// First element as `u8`, for status-style fields.
    pub fn first_u8(&self) -> Option<u8> {
        match self {
            Tensor::U8(a) => a.iter().next().copied(),
            _ => None,
        }
    }

    /// Sub-array at `index` along the leading axis.
    pub fn index_axis0(&self, index: usize) -> AppResult<Tensor> {
        let leading = self.shape().first().copied().ok_or_else(|| {
            DaqError::Array("Cannot index a zero-dimensional array".to_string())
        })?;
        if index >= leading {
            return Err(DaqError::Array(format!(
                "Index {} out of range for leading dimension {}",
                index, leading
            )));
        }
        Ok(match self {
            Tensor::U8(a) => Tensor::U8(a.index_axis(Axis(0), index).to_owned()),
            Tensor::Bool(a) => Tensor::Bool(a.index_axis(Axis(0), index).to_owned()),
            Tensor::I64(a) => Tensor::I64(a.index_axis(Axis(0), index).to_owned()),
            Tensor::F64(a) => Tensor::F64(a.index_axis(Axis(0), index).to_owned()),
            Tensor::Str(a) => Tensor::Str(a.index_axis(Axis(0), index).to_owned()),
        })
    }

    /// Stack tensors along a new leading axis.
    ///
    /// All inputs must share dtype and shape.
    pub fn stack(tensors: &[&Tensor]) -> AppResult<Tensor> {
        let first = tensors
            .first()
            .ok_or_else(|| DaqError::Array("Cannot stack an empty series".to_string()))?;
        for other in &tensors[1..] {
            if !first.dtype().same_kind(&other.dtype()) {
                return Err(DaqError::Array(format!(
                    "Cannot stack {} with {}",
                    first.dtype(),
                    other.dtype()
                )));
            }
        }
        Ok(match first {
            Tensor::U8(_) => Tensor::U8(stack_views(tensors.iter().filter_map(|t| match t {
                Tensor::U8(a) => Some(a.view()),
                _ => None,
            }))?),
            Tensor::Bool(_) => Tensor::Bool(stack_views(tensors.iter().filter_map(|t| match t {
                Tensor::Bool(a) => Some(a.view()),
                _ => None,
            }))?),
            Tensor::I64(_) => Tensor::I64(stack_views(tensors.iter().filter_map(|t| match t {
                Tensor::I64(a) => Some(a.view()),
                _ => None,
            }))?),
            Tensor::F64(_) => Tensor::F64(stack_views(tensors.iter().filter_map(|t| match t {
                Tensor::F64(a) => Some(a.view()),
                _ => None,
            }))?),
            Tensor::Str(_) => Tensor::Str(stack_views(tensors.iter().filter_map(|t| match t {
                Tensor::Str(a) => Some(a.view()),
                _ => None,
            }))?),
        })
    }
}

fn stack_views<'a, T: Clone + 'a>(
    views: impl Iterator<Item = ArrayViewD<'a, T>>,
) -> AppResult<ArrayD<T>> {
    let views: Vec<ArrayViewD<'a, T>> = views.collect();
    Ok(ndarray::stack(Axis(0), &views)?)
}

impl From<ArrayD<u8>> for Tensor {
    fn from(array: ArrayD<u8>) -> Self {
        Tensor::U8(array)
    }
}

impl From<ArrayD<bool>> for Tensor {
    fn from(array: ArrayD<bool>) -> Self {
        Tensor::Bool(array)
    }
}

impl From<ArrayD<i64>> for Tensor {
    fn from(array: ArrayD<i64>) -> Self {
        Tensor::I64(array)
    }
}

impl From<ArrayD<f64>> for Tensor {
    fn from(array: ArrayD<f64>) -> Self {
        Tensor::F64(array)
    }
}
