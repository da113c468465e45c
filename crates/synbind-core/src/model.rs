//! Model descriptors, model families and the built-in model registry.
//!
//! A [`ModelDescriptor`] declares the parameters, variables and extra global
//! parameters of a neuron, weight update, postsynaptic or current source
//! model. Preparing a model orders the caller's parameters and stages the
//! caller's variable values into fresh [`Variable`] records.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::record::{VarMap, Variable};
use crate::values::{VarInitialiser, VarValues};
use crate::{BindError, Result};

/// Named parameter values, in any order
pub type ParamSpace = HashMap<String, f64>;

/// Named variable stagings, in any order
pub type VarSpace = HashMap<String, VarValues>;

// ============================================================================
// DESCRIPTORS
// ============================================================================

/// What a model is attached to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModelRole {
    Neuron,
    WeightUpdate,
    Postsynaptic,
    CurrentSource,
}

impl fmt::Display for ModelRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ModelRole::Neuron => "neuron",
            ModelRole::WeightUpdate => "weight update",
            ModelRole::Postsynaptic => "postsynaptic",
            ModelRole::CurrentSource => "current source",
        };
        f.write_str(name)
    }
}

/// Declared variable: name and type tag
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VarDecl {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
}

impl VarDecl {
    pub fn new(name: &str, type_name: &str) -> Self {
        Self {
            name: name.to_string(),
            type_name: type_name.to_string(),
        }
    }
}

/// Declared extra global parameter; array-valued types end in `*`
pub type EgpDecl = VarDecl;

/// Declaration of a model's inputs and state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub kind: String,
    #[serde(default)]
    pub param_names: Vec<String>,
    #[serde(default)]
    pub vars: Vec<VarDecl>,
    #[serde(default)]
    pub pre_vars: Vec<VarDecl>,
    #[serde(default)]
    pub post_vars: Vec<VarDecl>,
    #[serde(default)]
    pub extra_global_params: Vec<EgpDecl>,
}

impl ModelDescriptor {
    pub fn new(kind: &str) -> Self {
        Self {
            kind: kind.to_string(),
            param_names: vec![],
            vars: vec![],
            pre_vars: vec![],
            post_vars: vec![],
            extra_global_params: vec![],
        }
    }

    pub fn with_params(mut self, names: &[&str]) -> Self {
        self.param_names.extend(names.iter().map(|n| n.to_string()));
        self
    }

    pub fn with_var(mut self, name: &str, type_name: &str) -> Self {
        self.vars.push(VarDecl::new(name, type_name));
        self
    }

    pub fn with_pre_var(mut self, name: &str, type_name: &str) -> Self {
        self.pre_vars.push(VarDecl::new(name, type_name));
        self
    }

    pub fn with_post_var(mut self, name: &str, type_name: &str) -> Self {
        self.post_vars.push(VarDecl::new(name, type_name));
        self
    }

    pub fn with_egp(mut self, name: &str, type_name: &str) -> Self {
        self.extra_global_params.push(EgpDecl::new(name, type_name));
        self
    }

    /// Type tag of a declared extra global parameter
    pub fn egp_type(&self, name: &str) -> Option<&str> {
        self.extra_global_params
            .iter()
            .find(|egp| egp.name == name)
            .map(|egp| egp.type_name.as_str())
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Caller-side model initialisation bundle
#[derive(Debug, Clone, Default)]
pub struct ModelInit {
    pub params: ParamSpace,
    pub vars: VarSpace,
    pub pre_vars: VarSpace,
    pub post_vars: VarSpace,
}

impl ModelInit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn param(mut self, name: &str, value: f64) -> Self {
        self.params.insert(name.to_string(), value);
        self
    }

    pub fn var(mut self, name: &str, values: impl Into<VarValues>) -> Self {
        self.vars.insert(name.to_string(), values.into());
        self
    }

    pub fn pre_var(mut self, name: &str, values: impl Into<VarValues>) -> Self {
        self.pre_vars.insert(name.to_string(), values.into());
        self
    }

    pub fn post_var(mut self, name: &str, values: impl Into<VarValues>) -> Self {
        self.post_vars.insert(name.to_string(), values.into());
        self
    }
}

/// Either a registered model kind or a caller-built descriptor
#[derive(Debug, Clone)]
pub enum ModelSource {
    Builtin(String),
    Custom(Arc<ModelDescriptor>),
}

impl From<&str> for ModelSource {
    fn from(kind: &str) -> Self {
        ModelSource::Builtin(kind.to_string())
    }
}

impl From<ModelDescriptor> for ModelSource {
    fn from(descriptor: ModelDescriptor) -> Self {
        ModelSource::Custom(Arc::new(descriptor))
    }
}

impl From<Arc<ModelDescriptor>> for ModelSource {
    fn from(descriptor: Arc<ModelDescriptor>) -> Self {
        ModelSource::Custom(descriptor)
    }
}

// ============================================================================
// PREPARATION
// ============================================================================

/// A resolved model with ordered parameters and staged variable records
#[derive(Debug, Clone)]
pub struct PreparedModel {
    pub descriptor: Arc<ModelDescriptor>,
    pub param_values: Vec<f64>,
    pub vars: VarMap,
    pub pre_vars: VarMap,
    pub post_vars: VarMap,
}

impl PreparedModel {
    pub fn kind(&self) -> &str {
        &self.descriptor.kind
    }

    pub fn param_names(&self) -> &[String] {
        &self.descriptor.param_names
    }
}

fn stage_vars(model: &str, decls: &[VarDecl], space: &VarSpace) -> Result<VarMap> {
    if let Some(unknown) = space.keys().find(|name| !decls.iter().any(|d| &d.name == *name)) {
        return Err(BindError::UnknownVariable {
            group: model.to_string(),
            name: unknown.clone(),
        });
    }

    Ok(decls
        .iter()
        .map(|decl| {
            let mut var = Variable::new(&decl.name, &decl.type_name);
            if let Some(values) = space.get(&decl.name) {
                var.set_values(values.clone());
            }
            (decl.name.clone(), var)
        })
        .collect())
}

/// Ordered initialiser bundle for the engine, one entry per declared variable
pub fn var_space_to_vals(decls: &[VarDecl], vars: &VarMap) -> Vec<VarInitialiser> {
    decls
        .iter()
        .map(|decl| {
            vars.get(&decl.name)
                .map(|var| var.values().initialiser())
                .unwrap_or(VarInitialiser::Uninitialised)
        })
        .collect()
}

/// A family of models sharing a role, able to resolve and prepare them
pub trait ModelFamily {
    fn role(&self) -> ModelRole;

    fn resolve(&self, kind: &str) -> Option<Arc<ModelDescriptor>>;

    fn prepare(&self, model: ModelSource, init: &ModelInit) -> Result<PreparedModel> {
        let descriptor = match model {
            ModelSource::Builtin(kind) => self.resolve(&kind).ok_or(BindError::UnknownModel {
                role: self.role(),
                kind,
            })?,
            ModelSource::Custom(descriptor) => descriptor,
        };

        if let Some(unknown) = init
            .params
            .keys()
            .find(|name| !descriptor.param_names.contains(*name))
        {
            return Err(BindError::UnknownParameter {
                model: descriptor.kind.clone(),
                name: unknown.clone(),
            });
        }

        let param_values = descriptor
            .param_names
            .iter()
            .map(|name| {
                init.params
                    .get(name)
                    .copied()
                    .ok_or_else(|| BindError::MissingParameter {
                        model: descriptor.kind.clone(),
                        name: name.clone(),
                    })
            })
            .collect::<Result<Vec<_>>>()?;

        let vars = stage_vars(&descriptor.kind, &descriptor.vars, &init.vars)?;
        let pre_vars = stage_vars(&descriptor.kind, &descriptor.pre_vars, &init.pre_vars)?;
        let post_vars = stage_vars(&descriptor.kind, &descriptor.post_vars, &init.post_vars)?;

        Ok(PreparedModel {
            descriptor,
            param_values,
            vars,
            pre_vars,
            post_vars,
        })
    }
}

// ============================================================================
// REGISTRY
// ============================================================================

/// Model descriptors keyed by `(role, kind)`
#[derive(Debug, Clone, Default)]
pub struct ModelRegistry {
    models: HashMap<(ModelRole, String), Arc<ModelDescriptor>>,
}

impl ModelRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Registry pre-populated with the standard models
    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        for (role, descriptor) in builtin_models() {
            registry.register(role, descriptor);
        }
        registry
    }

    /// Register a model, returning any descriptor it replaced
    pub fn register(
        &mut self,
        role: ModelRole,
        descriptor: ModelDescriptor,
    ) -> Option<Arc<ModelDescriptor>> {
        self.models
            .insert((role, descriptor.kind.clone()), Arc::new(descriptor))
    }

    pub fn get(&self, role: ModelRole, kind: &str) -> Result<Arc<ModelDescriptor>> {
        self.models
            .get(&(role, kind.to_string()))
            .cloned()
            .ok_or_else(|| BindError::UnknownModel {
                role,
                kind: kind.to_string(),
            })
    }

    /// Registered kinds for a role, sorted
    pub fn kinds(&self, role: ModelRole) -> Vec<&str> {
        let mut kinds: Vec<&str> = self
            .models
            .keys()
            .filter(|(r, _)| *r == role)
            .map(|(_, kind)| kind.as_str())
            .collect();
        kinds.sort_unstable();
        kinds
    }

    pub fn family(&self, role: ModelRole) -> RegistryFamily<'_> {
        RegistryFamily {
            registry: self,
            role,
        }
    }
}

/// One role's view of a [`ModelRegistry`]
pub struct RegistryFamily<'a> {
    registry: &'a ModelRegistry,
    role: ModelRole,
}

impl ModelFamily for RegistryFamily<'_> {
    fn role(&self) -> ModelRole {
        self.role
    }

    fn resolve(&self, kind: &str) -> Option<Arc<ModelDescriptor>> {
        self.registry.get(self.role, kind).ok()
    }
}

fn builtin_models() -> Vec<(ModelRole, ModelDescriptor)> {
    vec![
        // Neurons
        (
            ModelRole::Neuron,
            ModelDescriptor::new("LIF")
                .with_params(&["C", "TauM", "Vrest", "Vreset", "Vthresh", "Ioffset", "TauRefrac"])
                .with_var("V", "scalar")
                .with_var("RefracTime", "scalar"),
        ),
        (
            ModelRole::Neuron,
            ModelDescriptor::new("Izhikevich")
                .with_params(&["a", "b", "c", "d"])
                .with_var("V", "scalar")
                .with_var("U", "scalar"),
        ),
        (
            ModelRole::Neuron,
            ModelDescriptor::new("Poisson")
                .with_params(&["rate"])
                .with_var("timeStepToSpike", "scalar"),
        ),
        (
            ModelRole::Neuron,
            ModelDescriptor::new("SpikeSourceArray")
                .with_var("startSpike", "unsigned int")
                .with_var("endSpike", "unsigned int")
                .with_egp("spikeTimes", "scalar*"),
        ),
        // Weight update
        (
            ModelRole::WeightUpdate,
            ModelDescriptor::new("StaticPulse").with_var("g", "scalar"),
        ),
        (
            ModelRole::WeightUpdate,
            ModelDescriptor::new("StaticPulseDendriticDelay")
                .with_var("g", "scalar")
                .with_var("d", "uint8_t"),
        ),
        (
            ModelRole::WeightUpdate,
            ModelDescriptor::new("STDP")
                .with_params(&["tauPlus", "tauMinus", "Aplus", "Aminus", "Wmin", "Wmax"])
                .with_var("g", "scalar")
                .with_pre_var("preTrace", "scalar")
                .with_post_var("postTrace", "scalar"),
        ),
        // Postsynaptic
        (ModelRole::Postsynaptic, ModelDescriptor::new("DeltaCurr")),
        (
            ModelRole::Postsynaptic,
            ModelDescriptor::new("ExpCurr").with_params(&["tau"]),
        ),
        (
            ModelRole::Postsynaptic,
            ModelDescriptor::new("ExpCond").with_params(&["tau", "E"]),
        ),
        // Current sources
        (
            ModelRole::CurrentSource,
            ModelDescriptor::new("DC").with_params(&["amp"]),
        ),
        (
            ModelRole::CurrentSource,
            ModelDescriptor::new("GaussianNoise").with_params(&["mean", "sd"]),
        ),
        (
            ModelRole::CurrentSource,
            ModelDescriptor::new("PoissonExp")
                .with_params(&["weight", "tauSyn", "rate"])
                .with_var("current", "scalar"),
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lif_init() -> ModelInit {
        ModelInit::new()
            .param("C", 1.0)
            .param("TauM", 20.0)
            .param("Vrest", -70.0)
            .param("Vreset", -70.0)
            .param("Vthresh", -51.0)
            .param("Ioffset", 0.0)
            .param("TauRefrac", 2.0)
    }

    #[test]
    fn test_param_ordering() {
        let registry = ModelRegistry::with_builtins();
        let prepared = registry
            .family(ModelRole::Neuron)
            .prepare("LIF".into(), &lif_init().var("V", -65.0))
            .unwrap();

        assert_eq!(prepared.kind(), "LIF");
        assert_eq!(prepared.param_values, vec![1.0, 20.0, -70.0, -70.0, -51.0, 0.0, 2.0]);
        assert!(prepared.vars["V"].init_required());
        assert!(!prepared.vars["RefracTime"].init_required());
    }

    #[test]
    fn test_unknown_variable_rejected() {
        let registry = ModelRegistry::with_builtins();
        let result = registry
            .family(ModelRole::Neuron)
            .prepare("LIF".into(), &lif_init().var("W", 1.0));
        assert!(matches!(result, Err(BindError::UnknownVariable { .. })));
    }

    #[test]
    fn test_missing_and_unknown_params() {
        let registry = ModelRegistry::with_builtins();
        let family = registry.family(ModelRole::Neuron);

        let result = family.prepare("Izhikevich".into(), &ModelInit::new().param("a", 0.02));
        assert!(matches!(result, Err(BindError::MissingParameter { .. })));

        let result = family.prepare("Poisson".into(), &ModelInit::new().param("rate", 1.0).param("x", 2.0));
        assert!(matches!(result, Err(BindError::UnknownParameter { .. })));
    }

    #[test]
    fn test_unknown_model() {
        let registry = ModelRegistry::with_builtins();
        let result = registry
            .family(ModelRole::CurrentSource)
            .prepare("LIF".into(), &ModelInit::new());
        assert!(matches!(
            result,
            Err(BindError::UnknownModel { role: ModelRole::CurrentSource, .. })
        ));
    }

    #[test]
    fn test_custom_descriptor_from_json() {
        let json = r#"{
            "kind": "TraceCurr",
            "param_names": ["tau"],
            "vars": [{"name": "inSynTrace", "type": "scalar"}]
        }"#;
        let descriptor = ModelDescriptor::from_json_str(json).unwrap();
        assert_eq!(descriptor.vars[0].name, "inSynTrace");

        let registry = ModelRegistry::empty();
        let prepared = registry
            .family(ModelRole::Postsynaptic)
            .prepare(descriptor.into(), &ModelInit::new().param("tau", 5.0))
            .unwrap();
        assert_eq!(prepared.param_values, vec![5.0]);
        assert!(prepared.vars.contains_key("inSynTrace"));
    }

    #[test]
    fn test_var_space_to_vals() {
        let registry = ModelRegistry::with_builtins();
        let prepared = registry
            .family(ModelRole::Neuron)
            .prepare(
                "Izhikevich".into(),
                &ModelInit::new()
                    .param("a", 0.02)
                    .param("b", 0.2)
                    .param("c", -65.0)
                    .param("d", 8.0)
                    .var("V", vec![-65.0, -60.0])
                    .var("U", VarInitialiser::Constant(-13.0)),
            )
            .unwrap();

        let vals = var_space_to_vals(&prepared.descriptor.vars, &prepared.vars);
        assert_eq!(
            vals,
            vec![VarInitialiser::Uninitialised, VarInitialiser::Constant(-13.0)]
        );
    }

    #[test]
    fn test_registry_kinds() {
        let registry = ModelRegistry::with_builtins();
        assert_eq!(
            registry.kinds(ModelRole::Postsynaptic),
            vec!["DeltaCurr", "ExpCond", "ExpCurr"]
        );
        assert!(registry.get(ModelRole::Neuron, "SpikeSourceArray").is_ok());
    }
}
