//! Staged values, variable initialisers and typed host buffers.
//!
//! Callers stage values as `f64`; they are converted to the engine's element
//! type only when copied into a [`HostView`].

use ndarray::{s, Array1};
use num_traits::{NumCast, ToPrimitive};
use parking_lot::{MappedRwLockReadGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::types::ScalarType;
use crate::{BindError, Result};

// ============================================================================
// STAGED VALUES
// ============================================================================

/// Initialisation handed to the engine when a population is created
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum VarInitialiser {
    /// Engine leaves the variable alone (host copies values in later)
    Uninitialised,
    /// Every element set to the same value by the engine
    Constant(f64),
    /// Procedural initialisation snippet run by the engine, e.g. `Uniform`
    Snippet { name: String, params: Vec<f64> },
}

/// Values staged for a variable before (re)initialisation
#[derive(Debug, Clone, PartialEq, Default)]
pub enum VarValues {
    /// Nothing supplied; engine default applies
    #[default]
    Unset,
    /// Manual value broadcast to every element
    Scalar(f64),
    /// Manual per-element values
    Array(Array1<f64>),
    /// Engine-side initialisation
    Init(VarInitialiser),
}

impl VarValues {
    /// True iff values must be copied in from the host
    pub fn init_required(&self) -> bool {
        matches!(self, VarValues::Scalar(_) | VarValues::Array(_))
    }

    /// Number of staged elements, if array-valued
    pub fn len(&self) -> Option<usize> {
        match self {
            VarValues::Array(values) => Some(values.len()),
            _ => None,
        }
    }

    /// Check every manual value fits `ty` without touching any buffer
    pub fn check_representable(&self, ty: ScalarType) -> Result<()> {
        match self {
            VarValues::Scalar(value) => check_representable(*value, ty),
            VarValues::Array(values) => values.iter().try_for_each(|&v| check_representable(v, ty)),
            VarValues::Unset | VarValues::Init(_) => Ok(()),
        }
    }

    /// Initialiser to pass to the engine for this staging
    pub fn initialiser(&self) -> VarInitialiser {
        match self {
            VarValues::Init(init) => init.clone(),
            _ => VarInitialiser::Uninitialised,
        }
    }
}

impl From<f64> for VarValues {
    fn from(value: f64) -> Self {
        VarValues::Scalar(value)
    }
}

impl From<Vec<f64>> for VarValues {
    fn from(values: Vec<f64>) -> Self {
        VarValues::Array(Array1::from(values))
    }
}

impl From<&[f64]> for VarValues {
    fn from(values: &[f64]) -> Self {
        VarValues::Array(Array1::from(values.to_vec()))
    }
}

impl From<Array1<f64>> for VarValues {
    fn from(values: Array1<f64>) -> Self {
        VarValues::Array(values)
    }
}

impl From<VarInitialiser> for VarValues {
    fn from(init: VarInitialiser) -> Self {
        VarValues::Init(init)
    }
}

fn convert<S, T>(value: S, target: ScalarType) -> Result<T>
where
    S: ToPrimitive + Copy,
    T: NumCast,
{
    <T as NumCast>::from(value).ok_or_else(|| BindError::ValueConversion {
        value: value.to_f64().unwrap_or(f64::NAN),
        target,
    })
}

/// Fail unless `value` can be stored as an element of type `ty`
pub fn check_representable(value: f64, ty: ScalarType) -> Result<()> {
    let representable = match ty {
        ScalarType::I8 => <i8 as NumCast>::from(value).is_some(),
        ScalarType::U8 => <u8 as NumCast>::from(value).is_some(),
        ScalarType::I16 => <i16 as NumCast>::from(value).is_some(),
        ScalarType::U16 => <u16 as NumCast>::from(value).is_some(),
        ScalarType::I32 => <i32 as NumCast>::from(value).is_some(),
        ScalarType::U32 => <u32 as NumCast>::from(value).is_some(),
        ScalarType::I64 => <i64 as NumCast>::from(value).is_some(),
        ScalarType::U64 => <u64 as NumCast>::from(value).is_some(),
        ScalarType::F32 => <f32 as NumCast>::from(value).is_some(),
        ScalarType::F64 => true,
    };
    if representable {
        Ok(())
    } else {
        Err(BindError::ValueConversion { value, target: ty })
    }
}

// ============================================================================
// HOST ARRAYS
// ============================================================================

/// Contiguous engine buffer of one element type
#[derive(Debug, Clone, PartialEq)]
pub enum HostArray {
    I8(Array1<i8>),
    U8(Array1<u8>),
    I16(Array1<i16>),
    U16(Array1<u16>),
    I32(Array1<i32>),
    U32(Array1<u32>),
    I64(Array1<i64>),
    U64(Array1<u64>),
    F32(Array1<f32>),
    F64(Array1<f64>),
}

macro_rules! for_each_array {
    ($array:expr, $inner:ident => $body:expr) => {
        match $array {
            HostArray::I8($inner) => $body,
            HostArray::U8($inner) => $body,
            HostArray::I16($inner) => $body,
            HostArray::U16($inner) => $body,
            HostArray::I32($inner) => $body,
            HostArray::U32($inner) => $body,
            HostArray::I64($inner) => $body,
            HostArray::U64($inner) => $body,
            HostArray::F32($inner) => $body,
            HostArray::F64($inner) => $body,
        }
    };
}

impl HostArray {
    pub fn zeros(ty: ScalarType, len: usize) -> Self {
        match ty {
            ScalarType::I8 => HostArray::I8(Array1::zeros(len)),
            ScalarType::U8 => HostArray::U8(Array1::zeros(len)),
            ScalarType::I16 => HostArray::I16(Array1::zeros(len)),
            ScalarType::U16 => HostArray::U16(Array1::zeros(len)),
            ScalarType::I32 => HostArray::I32(Array1::zeros(len)),
            ScalarType::U32 => HostArray::U32(Array1::zeros(len)),
            ScalarType::I64 => HostArray::I64(Array1::zeros(len)),
            ScalarType::U64 => HostArray::U64(Array1::zeros(len)),
            ScalarType::F32 => HostArray::F32(Array1::zeros(len)),
            ScalarType::F64 => HostArray::F64(Array1::zeros(len)),
        }
    }

    /// Buffer with every element set to `value`
    pub fn filled(ty: ScalarType, len: usize, value: f64) -> Result<Self> {
        let mut array = Self::zeros(ty, len);
        array.fill(value)?;
        Ok(array)
    }

    pub fn scalar_type(&self) -> ScalarType {
        match self {
            HostArray::I8(_) => ScalarType::I8,
            HostArray::U8(_) => ScalarType::U8,
            HostArray::I16(_) => ScalarType::I16,
            HostArray::U16(_) => ScalarType::U16,
            HostArray::I32(_) => ScalarType::I32,
            HostArray::U32(_) => ScalarType::U32,
            HostArray::I64(_) => ScalarType::I64,
            HostArray::U64(_) => ScalarType::U64,
            HostArray::F32(_) => ScalarType::F32,
            HostArray::F64(_) => ScalarType::F64,
        }
    }

    pub fn len(&self) -> usize {
        for_each_array!(self, a => a.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Broadcast one value to every element
    pub fn fill(&mut self, value: f64) -> Result<()> {
        let ty = self.scalar_type();
        for_each_array!(self, a => {
            a.fill(convert(value, ty)?);
        });
        Ok(())
    }

    /// Copy `values` into `[offset, offset + values.len())`
    pub fn write<S>(&mut self, offset: usize, values: &[S]) -> Result<()>
    where
        S: ToPrimitive + Copy,
    {
        let len = self.len();
        let end = offset + values.len();
        if end > len {
            return Err(BindError::SizeMismatch {
                name: "host array write".into(),
                expected: len,
                got: end,
            });
        }

        let ty = self.scalar_type();
        for_each_array!(self, a => {
            for (dst, &src) in a.slice_mut(s![offset..end]).iter_mut().zip(values) {
                *dst = convert(src, ty)?;
            }
        });
        Ok(())
    }

    /// Read `[offset, offset + len)` as `f64`
    pub fn read(&self, offset: usize, len: usize) -> Result<Vec<f64>> {
        let end = offset + len;
        if end > self.len() {
            return Err(BindError::SizeMismatch {
                name: "host array read".into(),
                expected: self.len(),
                got: end,
            });
        }

        let ty = self.scalar_type();
        for_each_array!(self, a => {
            a.slice(s![offset..end])
                .iter()
                .map(|&v| convert::<_, f64>(v, ty))
                .collect()
        })
    }

    pub fn to_f64(&self) -> Result<Array1<f64>> {
        Ok(Array1::from(self.read(0, self.len())?))
    }

    pub fn as_u32(&self) -> Option<&[u32]> {
        match self {
            HostArray::U32(a) => a.as_slice(),
            _ => None,
        }
    }
}

// ============================================================================
// HOST VIEWS
// ============================================================================

/// Shared handle onto engine-owned host memory.
///
/// Cloning a view clones the handle, never the data; the engine and the
/// group that bound the view see the same buffer.
#[derive(Clone)]
pub struct HostView {
    name: Arc<str>,
    buffer: Arc<RwLock<HostArray>>,
}

impl HostView {
    pub fn new(name: &str, array: HostArray) -> Self {
        Self {
            name: Arc::from(name),
            buffer: Arc::new(RwLock::new(array)),
        }
    }

    pub fn from_shared(name: &str, buffer: Arc<RwLock<HostArray>>) -> Self {
        Self {
            name: Arc::from(name),
            buffer,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.buffer.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn scalar_type(&self) -> ScalarType {
        self.buffer.read().scalar_type()
    }

    pub fn read(&self) -> RwLockReadGuard<'_, HostArray> {
        self.buffer.read()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, HostArray> {
        self.buffer.write()
    }

    /// Same underlying buffer
    pub fn ptr_eq(&self, other: &HostView) -> bool {
        Arc::ptr_eq(&self.buffer, &other.buffer)
    }

    /// Copy staged values into the whole view, broadcasting scalars.
    /// Non-manual stagings leave the view untouched.
    pub fn assign(&self, values: &VarValues) -> Result<()> {
        match values {
            VarValues::Scalar(value) => self.buffer.write().fill(*value),
            VarValues::Array(array) => {
                let len = self.len();
                if array.len() != len {
                    return Err(BindError::SizeMismatch {
                        name: self.name.to_string(),
                        expected: len,
                        got: array.len(),
                    });
                }
                match array.as_slice() {
                    Some(slice) => self.buffer.write().write(0, slice),
                    None => self.buffer.write().write(0, &array.to_vec()),
                }
            }
            VarValues::Unset | VarValues::Init(_) => Ok(()),
        }
    }

    pub fn write_at<S>(&self, offset: usize, values: &[S]) -> Result<()>
    where
        S: ToPrimitive + Copy,
    {
        self.buffer.write().write(offset, values)
    }

    pub fn read_range(&self, offset: usize, len: usize) -> Result<Vec<f64>> {
        self.buffer.read().read(offset, len)
    }

    pub fn to_f64(&self) -> Result<Array1<f64>> {
        self.buffer.read().to_f64()
    }

    /// Zero-copy read of `[offset, offset + len)` of an `unsigned int` buffer
    pub fn map_u32(&self, offset: usize, len: usize) -> Option<MappedRwLockReadGuard<'_, [u32]>> {
        let guard = self.buffer.read();
        RwLockReadGuard::try_map(guard, |array| {
            array.as_u32().and_then(|slice| slice.get(offset..offset + len))
        })
        .ok()
    }
}

impl fmt::Debug for HostView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let array = self.buffer.read();
        f.debug_struct("HostView")
            .field("name", &self.name)
            .field("type", &array.scalar_type())
            .field("len", &array.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_required() {
        assert!(!VarValues::Unset.init_required());
        assert!(VarValues::from(1.0).init_required());
        assert!(VarValues::from(vec![1.0, 2.0]).init_required());
        assert!(!VarValues::from(VarInitialiser::Constant(0.5)).init_required());
        assert_eq!(VarValues::from(vec![1.0, 2.0]).len(), Some(2));
    }

    #[test]
    fn test_broadcast_scalar() {
        let view = HostView::new("VPop", HostArray::zeros(ScalarType::F32, 4));
        view.assign(&VarValues::Scalar(-65.0)).unwrap();
        assert_eq!(view.to_f64().unwrap().to_vec(), vec![-65.0; 4]);
    }

    #[test]
    fn test_assign_array_length_checked() {
        let view = HostView::new("VPop", HostArray::zeros(ScalarType::F64, 3));
        let result = view.assign(&VarValues::from(vec![1.0, 2.0]));
        assert!(matches!(result, Err(BindError::SizeMismatch { expected: 3, got: 2, .. })));
    }

    #[test]
    fn test_conversion_failure() {
        let mut array = HostArray::zeros(ScalarType::U32, 2);
        let result = array.write(0, &[-1.0f64]);
        assert!(matches!(result, Err(BindError::ValueConversion { .. })));
    }

    #[test]
    fn test_convert_between_element_types() {
        let mut array = HostArray::zeros(ScalarType::F32, 2);
        array.write(0, &[3u32, 7]).unwrap();
        assert_eq!(array.read(0, 2).unwrap(), vec![3.0, 7.0]);

        let mut bytes = HostArray::zeros(ScalarType::U8, 1);
        assert!(matches!(
            bytes.write(0, &[300i32]),
            Err(BindError::ValueConversion { target: ScalarType::U8, .. })
        ));
    }

    #[test]
    fn test_check_representable() {
        assert!(check_representable(4.0, ScalarType::U32).is_ok());
        assert!(matches!(
            check_representable(-1.0, ScalarType::U32),
            Err(BindError::ValueConversion { target: ScalarType::U32, .. })
        ));
        assert!(check_representable(-1.0, ScalarType::I16).is_ok());

        assert!(VarValues::from(vec![0.0, 2.0]).check_representable(ScalarType::U8).is_ok());
        assert!(VarValues::from(vec![0.0, 256.0]).check_representable(ScalarType::U8).is_err());
        assert!(VarValues::from(VarInitialiser::Constant(-5.0))
            .check_representable(ScalarType::U8)
            .is_ok());
    }

    #[test]
    fn test_write_offset_and_read() {
        let mut array = HostArray::filled(ScalarType::U32, 6, 7.0).unwrap();
        array.write(2, &[1u32, 2]).unwrap();
        assert_eq!(array.read(0, 6).unwrap(), vec![7.0, 7.0, 1.0, 2.0, 7.0, 7.0]);
        assert!(array.write(5, &[1u32, 2]).is_err());
    }

    #[test]
    fn test_view_handles_share_buffer() {
        let view = HostView::new("gSyn", HostArray::zeros(ScalarType::F32, 2));
        let alias = view.clone();
        alias.write_at(1, &[0.5f64]).unwrap();
        assert!(view.ptr_eq(&alias));
        assert_eq!(view.read_range(1, 1).unwrap(), vec![0.5]);
    }

    #[test]
    fn test_map_u32() {
        let view = HostView::new("glbSpkPop", HostArray::zeros(ScalarType::U32, 4));
        view.write_at(0, &[3u32, 1, 4, 1]).unwrap();
        let slice = view.map_u32(1, 2).unwrap();
        assert_eq!(&*slice, &[1, 4]);
        drop(slice);

        let floats = HostView::new("V", HostArray::zeros(ScalarType::F32, 4));
        assert!(floats.map_u32(0, 1).is_none());
    }
}
