//! Variable and extra global parameter records owned by groups.

use ndarray::Array1;
use std::collections::HashMap;

use crate::types::{Precision, ScalarType};
use crate::values::{check_representable, HostView, VarValues};
use crate::{BindError, Result};

/// Variable records of one role, keyed by variable name
pub type VarMap = HashMap<String, Variable>;

/// Extra global parameter records, keyed by parameter name
pub type EgpMap = HashMap<String, ExtraGlobalParam>;

// ============================================================================
// VARIABLE RECORD
// ============================================================================

/// A model state variable: staged values plus, once bound, a host view
#[derive(Debug, Clone)]
pub struct Variable {
    name: String,
    type_name: String,
    values: VarValues,
    view: Option<HostView>,
}

impl Variable {
    pub fn new(name: &str, type_name: &str) -> Self {
        Self {
            name: name.to_string(),
            type_name: type_name.to_string(),
            values: VarValues::Unset,
            view: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared type tag, possibly `"scalar"`
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn resolved_type(&self, precision: Precision) -> Result<ScalarType> {
        ScalarType::resolve(&self.type_name, precision)
    }

    pub fn values(&self) -> &VarValues {
        &self.values
    }

    pub fn set_values(&mut self, values: impl Into<VarValues>) {
        self.values = values.into();
    }

    /// Manual values were staged and must be copied in from the host
    pub fn init_required(&self) -> bool {
        self.values.init_required()
    }

    /// Bound host view; `None` before load or for device-only variables
    pub fn view(&self) -> Option<&HostView> {
        self.view.as_ref()
    }

    pub fn bind(&mut self, view: Option<HostView>) {
        self.view = view;
    }
}

// ============================================================================
// EXTRA GLOBAL PARAMETER RECORD
// ============================================================================

/// Values of an extra global parameter
#[derive(Debug, Clone, PartialEq)]
pub enum EgpValues {
    Scalar(f64),
    Array(Array1<f64>),
}

impl EgpValues {
    /// Check every value fits `ty` without touching any buffer
    pub fn check_representable(&self, ty: ScalarType) -> Result<()> {
        match self {
            EgpValues::Scalar(value) => check_representable(*value, ty),
            EgpValues::Array(values) => values.iter().try_for_each(|&v| check_representable(v, ty)),
        }
    }
}

impl From<f64> for EgpValues {
    fn from(value: f64) -> Self {
        EgpValues::Scalar(value)
    }
}

impl From<Vec<f64>> for EgpValues {
    fn from(values: Vec<f64>) -> Self {
        EgpValues::Array(Array1::from(values))
    }
}

impl From<Array1<f64>> for EgpValues {
    fn from(values: Array1<f64>) -> Self {
        EgpValues::Array(values)
    }
}

/// Model input sized independently of the group.
///
/// Types ending in `*` (e.g. `"scalar*"`) are array-valued and have to be
/// allocated and pushed explicitly; all other types are single values.
#[derive(Debug, Clone)]
pub struct ExtraGlobalParam {
    name: String,
    type_name: String,
    values: EgpValues,
    view: Option<HostView>,
}

impl ExtraGlobalParam {
    pub fn new(name: &str, type_name: &str, values: impl Into<EgpValues>) -> Result<Self> {
        let is_scalar = !type_name.trim_end().ends_with('*');
        let values = match (is_scalar, values.into()) {
            (true, EgpValues::Array(array)) => {
                if array.len() != 1 {
                    return Err(BindError::SizeMismatch {
                        name: name.to_string(),
                        expected: 1,
                        got: array.len(),
                    });
                }
                EgpValues::Scalar(array[0])
            }
            (false, EgpValues::Scalar(value)) => EgpValues::Array(Array1::from(vec![value])),
            (_, values) => values,
        };

        Ok(Self {
            name: name.to_string(),
            type_name: type_name.to_string(),
            values,
            view: None,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn is_scalar(&self) -> bool {
        matches!(self.values, EgpValues::Scalar(_))
    }

    /// Element type tag with any trailing `*` removed
    pub fn element_type_name(&self) -> &str {
        self.type_name.trim_end().trim_end_matches('*').trim_end()
    }

    pub fn resolved_type(&self, precision: Precision) -> Result<ScalarType> {
        ScalarType::resolve(self.element_type_name(), precision)
    }

    pub fn values(&self) -> &EgpValues {
        &self.values
    }

    /// Number of elements to allocate, bind and push
    pub fn len(&self) -> usize {
        match &self.values {
            EgpValues::Scalar(_) => 1,
            EgpValues::Array(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Values as a flat slice-compatible vector
    pub fn to_vec(&self) -> Vec<f64> {
        match &self.values {
            EgpValues::Scalar(value) => vec![*value],
            EgpValues::Array(values) => values.to_vec(),
        }
    }

    pub fn view(&self) -> Option<&HostView> {
        self.view.as_ref()
    }

    pub fn bind(&mut self, view: HostView) {
        self.view = Some(view);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_variable_staging() {
        let mut var = Variable::new("V", "scalar");
        assert!(!var.init_required());
        assert!(var.view().is_none());

        var.set_values(vec![-65.0, -70.0]);
        assert!(var.init_required());
        assert_eq!(var.resolved_type(Precision::Double).unwrap(), ScalarType::F64);
    }

    #[test]
    fn test_egp_scalar_and_array() {
        let egp = ExtraGlobalParam::new("rate", "scalar", 10.0).unwrap();
        assert!(egp.is_scalar());
        assert_eq!(egp.len(), 1);

        let egp = ExtraGlobalParam::new("spikeTimes", "scalar*", vec![1.0, 2.0, 3.0]).unwrap();
        assert!(!egp.is_scalar());
        assert_eq!(egp.element_type_name(), "scalar");
        assert_eq!(egp.len(), 3);
        assert_eq!(egp.resolved_type(Precision::Float).unwrap(), ScalarType::F32);
    }

    #[test]
    fn test_egp_shape_coercion() {
        let egp = ExtraGlobalParam::new("offset", "float", vec![2.5]).unwrap();
        assert_eq!(egp.values(), &EgpValues::Scalar(2.5));

        let egp = ExtraGlobalParam::new("table", "unsigned int *", 4.0).unwrap();
        assert!(!egp.is_scalar());
        assert_eq!(egp.to_vec(), vec![4.0]);

        let result = ExtraGlobalParam::new("offset", "float", vec![1.0, 2.0]);
        assert!(matches!(result, Err(BindError::SizeMismatch { .. })));
    }
}
