//! Scalar types, precision, variable locations and synapse matrix types.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::BitOr;
use std::str::FromStr;

use crate::{BindError, Result};

// ============================================================================
// SCALAR TYPES
// ============================================================================

/// Floating point precision the engine was generated with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Precision {
    #[default]
    Float,
    Double,
}

impl Precision {
    pub fn scalar_type(&self) -> ScalarType {
        match self {
            Precision::Float => ScalarType::F32,
            Precision::Double => ScalarType::F64,
        }
    }
}

/// Element types understood by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScalarType {
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    F32,
    F64,
}

impl ScalarType {
    /// Parse an engine type name, e.g. `"unsigned int"`.
    /// `"scalar"` is not accepted here; use [`ScalarType::resolve`].
    pub fn from_c_name(name: &str) -> Result<Self> {
        let normalised = name.split_whitespace().collect::<Vec<_>>().join(" ");
        let ty = match normalised.as_str() {
            "char" | "signed char" | "int8_t" => ScalarType::I8,
            "unsigned char" | "uint8_t" | "bool" => ScalarType::U8,
            "short" | "signed short" | "int16_t" => ScalarType::I16,
            "unsigned short" | "uint16_t" => ScalarType::U16,
            "int" | "signed int" | "int32_t" => ScalarType::I32,
            "unsigned int" | "unsigned" | "uint32_t" => ScalarType::U32,
            "long" | "long long" | "signed long" | "int64_t" => ScalarType::I64,
            "unsigned long" | "unsigned long long" | "uint64_t" => ScalarType::U64,
            "float" => ScalarType::F32,
            // No long double on the host side
            "double" | "long double" => ScalarType::F64,
            _ => return Err(BindError::UnknownType(name.to_string())),
        };
        Ok(ty)
    }

    /// Resolve a model type tag, substituting `precision` for `"scalar"`
    pub fn resolve(tag: &str, precision: Precision) -> Result<Self> {
        if tag.trim() == "scalar" {
            Ok(precision.scalar_type())
        } else {
            Self::from_c_name(tag)
        }
    }

    pub fn c_name(&self) -> &'static str {
        match self {
            ScalarType::I8 => "char",
            ScalarType::U8 => "unsigned char",
            ScalarType::I16 => "short",
            ScalarType::U16 => "unsigned short",
            ScalarType::I32 => "int",
            ScalarType::U32 => "unsigned int",
            ScalarType::I64 => "long long",
            ScalarType::U64 => "unsigned long long",
            ScalarType::F32 => "float",
            ScalarType::F64 => "double",
        }
    }

    pub fn size_bytes(&self) -> usize {
        match self {
            ScalarType::I8 | ScalarType::U8 => 1,
            ScalarType::I16 | ScalarType::U16 => 2,
            ScalarType::I32 | ScalarType::U32 | ScalarType::F32 => 4,
            ScalarType::I64 | ScalarType::U64 | ScalarType::F64 => 8,
        }
    }

    pub fn is_float(&self) -> bool {
        matches!(self, ScalarType::F32 | ScalarType::F64)
    }
}

impl fmt::Display for ScalarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.c_name())
    }
}

// ============================================================================
// VARIABLE LOCATION
// ============================================================================

/// Where the engine keeps a variable, as a bitmask
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VarLocation(u32);

impl VarLocation {
    pub const HOST: VarLocation = VarLocation(1 << 0);
    pub const DEVICE: VarLocation = VarLocation(1 << 1);
    pub const ZERO_COPY: VarLocation = VarLocation(1 << 2);
    pub const HOST_DEVICE: VarLocation = VarLocation(Self::HOST.0 | Self::DEVICE.0);
    pub const HOST_DEVICE_ZERO_COPY: VarLocation =
        VarLocation(Self::HOST.0 | Self::DEVICE.0 | Self::ZERO_COPY.0);

    pub fn from_bits(bits: u32) -> Self {
        VarLocation(bits)
    }

    pub fn bits(&self) -> u32 {
        self.0
    }

    pub fn contains(&self, other: VarLocation) -> bool {
        (self.0 & other.0) == other.0
    }

    /// Whether this layer can address the variable directly
    pub fn is_host_visible(&self) -> bool {
        (self.0 & Self::HOST.0) != 0
    }
}

impl Default for VarLocation {
    fn default() -> Self {
        Self::HOST_DEVICE
    }
}

impl BitOr for VarLocation {
    type Output = VarLocation;

    fn bitor(self, rhs: Self) -> Self::Output {
        VarLocation(self.0 | rhs.0)
    }
}

impl FromStr for VarLocation {
    type Err = BindError;

    /// Parses `"host"`, `"device"`, `"zero_copy"` joined with `|`
    fn from_str(s: &str) -> Result<Self> {
        let mut bits = 0;
        for part in s.split('|') {
            bits |= match part.trim().to_ascii_lowercase().as_str() {
                "host" => Self::HOST.0,
                "device" => Self::DEVICE.0,
                "zero_copy" => Self::ZERO_COPY.0,
                "host_device" => Self::HOST_DEVICE.0,
                other => return Err(BindError::UnknownType(format!("var location '{}'", other))),
            };
        }
        Ok(VarLocation(bits))
    }
}

impl TryFrom<String> for VarLocation {
    type Error = BindError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<VarLocation> for String {
    fn from(loc: VarLocation) -> Self {
        loc.to_string()
    }
}

impl fmt::Display for VarLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = vec![];
        if self.contains(Self::HOST) {
            parts.push("host");
        }
        if self.contains(Self::DEVICE) {
            parts.push("device");
        }
        if self.contains(Self::ZERO_COPY) {
            parts.push("zero_copy");
        }
        f.write_str(&parts.join("|"))
    }
}

// ============================================================================
// SYNAPSE MATRIX TYPES
// ============================================================================

/// Physical storage of a synaptic connectivity matrix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectivityKind {
    /// Full matrix, no index data
    Dense,
    /// Rows padded to a uniform maximum row length
    Ragged,
    /// One bit per possible edge
    Bitmask,
}

/// Connectivity format crossed with weight/postsynaptic individuality
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MatrixType {
    connectivity: ConnectivityKind,
    individual_weights: bool,
    individual_psm: bool,
}

impl MatrixType {
    /// Bitmask connectivity cannot carry per-synapse values
    pub fn new(
        connectivity: ConnectivityKind,
        individual_weights: bool,
        individual_psm: bool,
    ) -> Result<Self> {
        if connectivity == ConnectivityKind::Bitmask && individual_weights {
            return Err(BindError::InvalidMatrixType(
                "bitmask connectivity cannot have individual weights".into(),
            ));
        }
        Ok(Self {
            connectivity,
            individual_weights,
            individual_psm,
        })
    }

    pub fn dense_individual() -> Self {
        Self {
            connectivity: ConnectivityKind::Dense,
            individual_weights: true,
            individual_psm: false,
        }
    }

    pub fn ragged_individual() -> Self {
        Self {
            connectivity: ConnectivityKind::Ragged,
            individual_weights: true,
            individual_psm: false,
        }
    }

    pub fn ragged_global() -> Self {
        Self {
            connectivity: ConnectivityKind::Ragged,
            individual_weights: false,
            individual_psm: false,
        }
    }

    pub fn bitmask_global() -> Self {
        Self {
            connectivity: ConnectivityKind::Bitmask,
            individual_weights: false,
            individual_psm: false,
        }
    }

    pub fn connectivity(&self) -> ConnectivityKind {
        self.connectivity
    }

    pub fn is_dense(&self) -> bool {
        self.connectivity == ConnectivityKind::Dense
    }

    pub fn is_ragged(&self) -> bool {
        self.connectivity == ConnectivityKind::Ragged
    }

    pub fn is_bitmask(&self) -> bool {
        self.connectivity == ConnectivityKind::Bitmask
    }

    pub fn has_individual_synapse_vars(&self) -> bool {
        self.individual_weights
    }

    pub fn has_individual_postsynaptic_vars(&self) -> bool {
        self.individual_psm
    }
}

impl FromStr for MatrixType {
    type Err = BindError;

    /// Engine names such as `SPARSE_INDIVIDUALG` or `DENSE_GLOBALG_INDIVIDUAL_PSM`
    fn from_str(s: &str) -> Result<Self> {
        let upper = s.trim().to_ascii_uppercase();
        let (base, individual_psm) = match upper.strip_suffix("_INDIVIDUAL_PSM") {
            Some(base) => (base, true),
            None => (upper.as_str(), false),
        };

        let (connectivity, weights) = base
            .split_once('_')
            .ok_or_else(|| BindError::InvalidMatrixType(s.to_string()))?;

        let connectivity = match connectivity {
            "DENSE" => ConnectivityKind::Dense,
            "SPARSE" | "RAGGED" => ConnectivityKind::Ragged,
            "BITMASK" => ConnectivityKind::Bitmask,
            _ => return Err(BindError::InvalidMatrixType(s.to_string())),
        };
        let individual_weights = match weights {
            "INDIVIDUALG" => true,
            "GLOBALG" => false,
            _ => return Err(BindError::InvalidMatrixType(s.to_string())),
        };

        Self::new(connectivity, individual_weights, individual_psm)
    }
}

impl TryFrom<String> for MatrixType {
    type Error = BindError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<MatrixType> for String {
    fn from(matrix_type: MatrixType) -> Self {
        matrix_type.to_string()
    }
}

impl fmt::Display for MatrixType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let connectivity = match self.connectivity {
            ConnectivityKind::Dense => "DENSE",
            ConnectivityKind::Ragged => "SPARSE",
            ConnectivityKind::Bitmask => "BITMASK",
        };
        let weights = if self.individual_weights {
            "INDIVIDUALG"
        } else {
            "GLOBALG"
        };
        write!(f, "{}_{}", connectivity, weights)?;
        if self.individual_psm {
            f.write_str("_INDIVIDUAL_PSM")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_resolution() {
        assert_eq!(ScalarType::resolve("scalar", Precision::Float).unwrap(), ScalarType::F32);
        assert_eq!(ScalarType::resolve("scalar", Precision::Double).unwrap(), ScalarType::F64);
        assert_eq!(
            ScalarType::resolve("unsigned  int", Precision::Float).unwrap(),
            ScalarType::U32
        );
        assert!(matches!(
            ScalarType::resolve("quaternion", Precision::Float),
            Err(BindError::UnknownType(_))
        ));
    }

    #[test]
    fn test_var_location_bits() {
        assert!(VarLocation::HOST_DEVICE.is_host_visible());
        assert!(!VarLocation::DEVICE.is_host_visible());
        assert!(VarLocation::HOST_DEVICE_ZERO_COPY.contains(VarLocation::ZERO_COPY));

        let loc: VarLocation = "host|device".parse().unwrap();
        assert_eq!(loc, VarLocation::HOST_DEVICE);
        assert_eq!(loc.to_string(), "host|device");
    }

    #[test]
    fn test_bitmask_individual_rejected() {
        let result = MatrixType::new(ConnectivityKind::Bitmask, true, false);
        assert!(matches!(result, Err(BindError::InvalidMatrixType(_))));

        let result = "BITMASK_INDIVIDUALG".parse::<MatrixType>();
        assert!(result.is_err());
    }

    #[test]
    fn test_matrix_type_names() {
        let mt: MatrixType = "SPARSE_INDIVIDUALG".parse().unwrap();
        assert!(mt.is_ragged());
        assert!(mt.has_individual_synapse_vars());
        assert!(!mt.has_individual_postsynaptic_vars());

        let mt: MatrixType = "DENSE_GLOBALG_INDIVIDUAL_PSM".parse().unwrap();
        assert!(mt.is_dense());
        assert!(!mt.has_individual_synapse_vars());
        assert!(mt.has_individual_postsynaptic_vars());
        assert_eq!(mt.to_string(), "DENSE_GLOBALG_INDIVIDUAL_PSM");
    }
}
