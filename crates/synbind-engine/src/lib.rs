//! # Synbind Engine
//!
//! Interface to the simulation engine that owns population memory.
//!
//! The binding layer never allocates state itself. It asks the engine for:
//! - population handles, queried for sizes, delay slots and variable locations
//! - typed host views onto engine buffers (`assign_external_*`)
//! - allocation and transfer of extra global parameters
//!
//! [`MemoryEngine`] implements the whole interface in host memory and keeps a
//! log of every call, which makes it suitable for tests and tooling.

use std::fmt::Debug;
use std::sync::Arc;

use synbind_core::{
    EgpDecl, HostView, MatrixType, ModelDescriptor, Precision, Result, ScalarType,
    VarInitialiser, VarLocation,
};

pub mod memory;

pub use memory::{EngineOp, MemoryEngine};

// ============================================================================
// RUNTIME
// ============================================================================

/// Access to the memory of a built model
pub trait Runtime {
    /// Precision the model was built with; resolves every `"scalar"` type
    fn precision(&self) -> Precision;

    /// View of `len` elements of the buffer called `name`
    fn assign_external_array(&self, name: &str, len: usize, ty: ScalarType) -> Result<HostView>;

    /// View of the single-element buffer called `name`
    fn assign_external_scalar(&self, name: &str, ty: ScalarType) -> Result<HostView>;

    /// Reserve `len` elements for an array-valued extra global parameter
    fn allocate_extra_global_param(&self, group: &str, param: &str, len: usize) -> Result<()>;

    /// Transfer the host copy of an extra global parameter to the device
    fn push_extra_global_param(&self, group: &str, param: &str, len: usize) -> Result<()>;
}

// ============================================================================
// POPULATION HANDLES
// ============================================================================

pub trait NeuronPopulation: Debug + Send + Sync {
    fn name(&self) -> &str;

    fn num_neurons(&self) -> usize;

    /// Spike history slots; grows as longer-delay projections are added
    fn num_delay_slots(&self) -> usize;

    fn var_location(&self, var: &str) -> VarLocation;
}

pub trait SynapsePopulation: Debug + Send + Sync {
    fn name(&self) -> &str;

    /// Padded row capacity of ragged connectivity
    fn max_connections(&self) -> usize;

    fn set_max_connections(&self, max_connections: usize);

    fn wu_var_location(&self, var: &str) -> VarLocation;

    fn wu_pre_var_location(&self, var: &str) -> VarLocation;

    fn wu_post_var_location(&self, var: &str) -> VarLocation;

    fn ps_var_location(&self, var: &str) -> VarLocation;
}

pub trait CurrentSourcePopulation: Debug + Send + Sync {
    fn name(&self) -> &str;

    fn var_location(&self, var: &str) -> VarLocation;
}

// ============================================================================
// MODEL BUILDER
// ============================================================================

/// Procedural connectivity generated on the engine side
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectivityInitialiser {
    pub snippet: String,
    pub params: Vec<f64>,
    pub extra_global_params: Vec<EgpDecl>,
    /// Upper bound on row length, if the snippet can compute one
    pub max_row_length: Option<usize>,
}

impl ConnectivityInitialiser {
    pub fn new(snippet: &str, params: Vec<f64>) -> Self {
        Self {
            snippet: snippet.to_string(),
            params,
            extra_global_params: vec![],
            max_row_length: None,
        }
    }

    pub fn with_egp(mut self, name: &str, type_name: &str) -> Self {
        self.extra_global_params.push(EgpDecl::new(name, type_name));
        self
    }

    pub fn with_max_row_length(mut self, max_row_length: usize) -> Self {
        self.max_row_length = Some(max_row_length);
        self
    }

    pub fn egp_type(&self, name: &str) -> Option<&str> {
        self.extra_global_params
            .iter()
            .find(|egp| egp.name == name)
            .map(|egp| egp.type_name.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct NeuronPopulationSpec {
    pub name: String,
    pub num_neurons: usize,
    pub model: Arc<ModelDescriptor>,
    pub params: Vec<f64>,
    pub var_init: Vec<VarInitialiser>,
}

#[derive(Debug, Clone)]
pub struct SynapsePopulationSpec {
    pub name: String,
    pub matrix_type: MatrixType,
    pub delay_steps: usize,
    /// Delay applied to postsynaptic spikes seen by the weight update model
    pub back_prop_delay_steps: usize,
    pub source: String,
    pub target: String,
    pub weight_update: Arc<ModelDescriptor>,
    pub wu_params: Vec<f64>,
    pub wu_var_init: Vec<VarInitialiser>,
    pub wu_pre_var_init: Vec<VarInitialiser>,
    pub wu_post_var_init: Vec<VarInitialiser>,
    pub postsynaptic: Arc<ModelDescriptor>,
    pub ps_params: Vec<f64>,
    pub ps_var_init: Vec<VarInitialiser>,
    /// `None` when connectivity is supplied from the host
    pub connectivity: Option<ConnectivityInitialiser>,
}

#[derive(Debug, Clone)]
pub struct CurrentSourceSpec {
    pub name: String,
    pub model: Arc<ModelDescriptor>,
    pub target: String,
    pub params: Vec<f64>,
    pub var_init: Vec<VarInitialiser>,
}

/// Factory for populations in a model under construction
pub trait ModelBuilder {
    fn add_neuron_population(
        &mut self,
        spec: NeuronPopulationSpec,
    ) -> Result<Arc<dyn NeuronPopulation>>;

    fn add_synapse_population(
        &mut self,
        spec: SynapsePopulationSpec,
    ) -> Result<Arc<dyn SynapsePopulation>>;

    fn add_current_source(
        &mut self,
        spec: CurrentSourceSpec,
    ) -> Result<Arc<dyn CurrentSourcePopulation>>;
}
