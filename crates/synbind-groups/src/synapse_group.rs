//! Synaptic projections between two neuron groups.
//!
//! A projection's connectivity moves from declared, to connections set
//! (explicit ragged only) or procedural, to loaded. Weight variables follow
//! the connectivity's padded row layout, so connectivity is always bound
//! first.

use ndarray::Array1;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

use synbind_core::{
    qualified_name, var_space_to_vals, BindError, ConnectivityKind, EgpMap, EgpValues, HostView,
    MatrixType, ModelDescriptor, ModelFamily, ModelInit, ModelRegistry, ModelRole, ModelSource,
    Result, ScalarType, VarDecl, VarInitialiser, VarMap, VarValues, Variable,
};
use synbind_engine::{
    ConnectivityInitialiser, ModelBuilder, NeuronPopulation, Runtime, SynapsePopulation,
    SynapsePopulationSpec,
};

use crate::connectivity::{gather_rows, scatter_rows, SparseConnections};
use crate::group::{
    check_refresh, check_staged_len, copy_variables, plan_extra_global_params, plan_variables,
    publish_extra_global_params, publish_variables, refresh_variables, stage_egp, stage_var,
    var_view, Group,
};
use crate::neuron_group::NeuronGroup;

#[derive(Debug, Clone)]
enum Connectivity {
    /// Nothing supplied yet
    Declared,
    /// Generated on the engine side
    Procedural(ConnectivityInitialiser),
    /// Explicit ragged connections from the host
    Explicit(SparseConnections),
}

/// Physical layout of synapse-indexed variables for one load
enum Layout<'a> {
    Dense,
    Ragged(&'a SparseConnections),
    Procedural,
    Bitmask,
}

/// A directed projection from a source to a target neuron group
#[derive(Debug)]
pub struct SynapseGroup {
    group: Group,
    matrix_type: MatrixType,
    delay_steps: usize,
    back_prop_delay_steps: usize,
    source: Option<Arc<dyn NeuronPopulation>>,
    target: Option<Arc<dyn NeuronPopulation>>,
    pre_vars: VarMap,
    post_vars: VarMap,
    postsynaptic: Option<Arc<ModelDescriptor>>,
    ps_param_values: Vec<f64>,
    psm_vars: VarMap,
    psm_extra_global_params: EgpMap,
    connectivity: Connectivity,
    connectivity_extra_global_params: EgpMap,
    connectivity_egps_loaded: bool,
    population: Option<Arc<dyn SynapsePopulation>>,
    row_length: Option<HostView>,
    ind: Option<HostView>,
}

impl SynapseGroup {
    pub fn new(name: &str, matrix_type: MatrixType) -> Self {
        Self {
            group: Group::new(name),
            matrix_type,
            delay_steps: 0,
            back_prop_delay_steps: 0,
            source: None,
            target: None,
            pre_vars: HashMap::new(),
            post_vars: HashMap::new(),
            postsynaptic: None,
            ps_param_values: vec![],
            psm_vars: HashMap::new(),
            psm_extra_global_params: HashMap::new(),
            connectivity: Connectivity::Declared,
            connectivity_extra_global_params: HashMap::new(),
            connectivity_egps_loaded: false,
            population: None,
            row_length: None,
            ind: None,
        }
    }

    pub fn name(&self) -> &str {
        self.group.name()
    }

    pub fn matrix_type(&self) -> MatrixType {
        self.matrix_type
    }

    pub fn delay_steps(&self) -> usize {
        self.delay_steps
    }

    pub fn back_prop_delay_steps(&self) -> usize {
        self.back_prop_delay_steps
    }

    /// Delay postsynaptic spikes reaching the weight update model; applied
    /// to the target population at `add_to`
    pub fn set_back_prop_delay_steps(&mut self, steps: usize) -> Result<()> {
        if self.population.is_some() {
            return Err(BindError::Engine(format!(
                "back-propagation delay of '{}' must be set before it is added",
                self.name()
            )));
        }
        self.back_prop_delay_steps = steps;
        Ok(())
    }

    pub fn is_loaded(&self) -> bool {
        self.group.is_loaded()
    }

    // ------------------------------------------------------------------------
    // Wiring
    // ------------------------------------------------------------------------

    /// Both groups must already have been added to the model
    pub fn set_connected_populations(&mut self, source: &NeuronGroup, target: &NeuronGroup) -> Result<()> {
        self.group.ensure_unloaded()?;
        self.source = Some(source.population()?.clone());
        self.target = Some(target.population()?.clone());
        Ok(())
    }

    fn source(&self) -> Result<&Arc<dyn NeuronPopulation>> {
        self.source
            .as_ref()
            .ok_or_else(|| BindError::NotAdded(self.name().to_string()))
    }

    fn target(&self) -> Result<&Arc<dyn NeuronPopulation>> {
        self.target
            .as_ref()
            .ok_or_else(|| BindError::NotAdded(self.name().to_string()))
    }

    pub fn source_size(&self) -> Result<usize> {
        Ok(self.source()?.num_neurons())
    }

    pub fn target_size(&self) -> Result<usize> {
        Ok(self.target()?.num_neurons())
    }

    pub fn population(&self) -> Result<&Arc<dyn SynapsePopulation>> {
        self.population
            .as_ref()
            .ok_or_else(|| BindError::NotAdded(self.name().to_string()))
    }

    pub fn set_weight_update(
        &mut self,
        registry: &ModelRegistry,
        model: impl Into<ModelSource>,
        init: &ModelInit,
    ) -> Result<()> {
        let prepared = registry
            .family(ModelRole::WeightUpdate)
            .prepare(model.into(), init)?;
        self.group
            .set_model(prepared.descriptor, prepared.param_values, prepared.vars)?;
        self.pre_vars = prepared.pre_vars;
        self.post_vars = prepared.post_vars;
        Ok(())
    }

    pub fn set_post_syn(
        &mut self,
        registry: &ModelRegistry,
        model: impl Into<ModelSource>,
        init: &ModelInit,
    ) -> Result<()> {
        self.group.ensure_unloaded()?;
        let prepared = registry
            .family(ModelRole::Postsynaptic)
            .prepare(model.into(), init)?;
        self.postsynaptic = Some(prepared.descriptor);
        self.ps_param_values = prepared.param_values;
        self.psm_vars = prepared.vars;
        self.psm_extra_global_params = HashMap::new();
        Ok(())
    }

    /// Generate connectivity on the engine side instead of from host indices
    pub fn set_connectivity_initialiser(&mut self, init: ConnectivityInitialiser) -> Result<()> {
        self.group.ensure_unloaded()?;
        if self.matrix_type.is_dense() {
            return Err(self.unsupported("procedural connectivity"));
        }
        if let (true, Some(pop), Ok(target)) = (
            self.matrix_type.is_ragged(),
            &self.population,
            self.target_size(),
        ) {
            pop.set_max_connections(init.max_row_length.unwrap_or(target));
        }
        self.connectivity = Connectivity::Procedural(init);
        self.connectivity_extra_global_params = HashMap::new();
        Ok(())
    }

    /// Set explicit ragged connectivity from parallel `(pre, post)` index lists
    pub fn set_sparse_connections(&mut self, pre_indices: &[u32], post_indices: &[u32]) -> Result<()> {
        self.group.ensure_unloaded()?;
        if !self.matrix_type.is_ragged() {
            return Err(self.unsupported("set_sparse_connections"));
        }

        let connections = SparseConnections::from_indices(
            self.source_size()?,
            self.target_size()?,
            pre_indices,
            post_indices,
        )?;
        if connections.num_synapses() == 0 {
            warn!("Synapse group '{}' has no connections", self.name());
        }
        if let Some(pop) = &self.population {
            pop.set_max_connections(connections.max_row_length());
        }
        self.connectivity = Connectivity::Explicit(connections);
        Ok(())
    }

    /// Explicit connectivity, if it has been set
    pub fn connections(&self) -> Option<&SparseConnections> {
        match &self.connectivity {
            Connectivity::Explicit(connections) => Some(connections),
            _ => None,
        }
    }

    /// Bound `rowLength` buffer of explicit ragged connectivity
    pub fn row_length_view(&self) -> Option<&HostView> {
        self.row_length.as_ref()
    }

    /// Bound padded `ind` buffer of explicit ragged connectivity
    pub fn index_view(&self) -> Option<&HostView> {
        self.ind.as_ref()
    }

    pub fn add_to(&mut self, builder: &mut dyn ModelBuilder, delay_steps: usize) -> Result<()> {
        let source = self.source()?.name().to_string();
        let target = self.target()?.name().to_string();
        let weight_update = self.group.model()?.clone();
        let postsynaptic = self
            .postsynaptic
            .clone()
            .ok_or_else(|| BindError::ModelNotSet(self.name().to_string()))?;

        let wu_var_init = if self.matrix_type.has_individual_synapse_vars() {
            self.group.var_init()?
        } else {
            global_var_init(self.name(), &weight_update.vars, self.group.vars())?
        };
        let ps_var_init = if self.matrix_type.has_individual_postsynaptic_vars() {
            var_space_to_vals(&postsynaptic.vars, &self.psm_vars)
        } else {
            global_var_init(self.name(), &postsynaptic.vars, &self.psm_vars)?
        };
        let connectivity = match &self.connectivity {
            Connectivity::Procedural(init) => Some(init.clone()),
            _ => None,
        };

        let spec = SynapsePopulationSpec {
            name: self.name().to_string(),
            matrix_type: self.matrix_type,
            delay_steps,
            back_prop_delay_steps: self.back_prop_delay_steps,
            source,
            target,
            wu_params: self.group.param_values().to_vec(),
            wu_var_init,
            wu_pre_var_init: var_space_to_vals(&weight_update.pre_vars, &self.pre_vars),
            wu_post_var_init: var_space_to_vals(&weight_update.post_vars, &self.post_vars),
            weight_update,
            ps_params: self.ps_param_values.clone(),
            ps_var_init,
            postsynaptic,
            connectivity,
        };
        let pop = builder.add_synapse_population(spec)?;
        if let Connectivity::Explicit(connections) = &self.connectivity {
            pop.set_max_connections(connections.max_row_length());
        }
        self.population = Some(pop);
        self.delay_steps = delay_steps;
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Sizes
    // ------------------------------------------------------------------------

    pub fn num_synapses(&self) -> Result<usize> {
        match self.matrix_type.connectivity() {
            ConnectivityKind::Dense => Ok(self.source_size()? * self.target_size()?),
            ConnectivityKind::Ragged => match &self.connectivity {
                Connectivity::Explicit(connections) => Ok(connections.num_synapses()),
                Connectivity::Procedural(_) => {
                    Err(BindError::ConnectivityNotAccessible(self.name().to_string()))
                }
                Connectivity::Declared => Err(BindError::ConnectivityNotSet(self.name().to_string())),
            },
            ConnectivityKind::Bitmask => Err(self.unsupported("num_synapses")),
        }
    }

    /// Padded row capacity of ragged connectivity
    pub fn max_row_length(&self) -> Result<usize> {
        if let Some(pop) = &self.population {
            return Ok(pop.max_connections());
        }
        match &self.connectivity {
            Connectivity::Explicit(connections) => Ok(connections.max_row_length()),
            _ => Err(BindError::NotAdded(self.name().to_string())),
        }
    }

    /// Length of every synapse-indexed variable, padding included
    pub fn weight_update_var_size(&self) -> Result<usize> {
        match self.matrix_type.connectivity() {
            ConnectivityKind::Dense => Ok(self.source_size()? * self.target_size()?),
            ConnectivityKind::Ragged => Ok(self.max_row_length()? * self.source_size()?),
            ConnectivityKind::Bitmask => Err(self.unsupported("weight_update_var_size")),
        }
    }

    fn row_stride(&self) -> Result<usize> {
        match self.matrix_type.connectivity() {
            ConnectivityKind::Ragged => self.max_row_length(),
            _ => self.target_size(),
        }
    }

    fn layout(&self) -> Result<Layout<'_>> {
        match self.matrix_type.connectivity() {
            ConnectivityKind::Dense => Ok(Layout::Dense),
            ConnectivityKind::Bitmask => Ok(Layout::Bitmask),
            ConnectivityKind::Ragged => match &self.connectivity {
                Connectivity::Explicit(connections) => Ok(Layout::Ragged(connections)),
                Connectivity::Procedural(_) => Ok(Layout::Procedural),
                Connectivity::Declared => Err(BindError::ConnectivityNotSet(self.name().to_string())),
            },
        }
    }

    // ------------------------------------------------------------------------
    // Staging
    // ------------------------------------------------------------------------

    pub fn set_var(&mut self, name: &str, values: impl Into<VarValues>) -> Result<()> {
        self.group.set_var(name, values)
    }

    pub fn set_pre_var(&mut self, name: &str, values: impl Into<VarValues>) -> Result<()> {
        let loaded = self.is_loaded();
        stage_var(self.group.name(), &mut self.pre_vars, name, values.into(), loaded)
    }

    pub fn set_post_var(&mut self, name: &str, values: impl Into<VarValues>) -> Result<()> {
        let loaded = self.is_loaded();
        stage_var(self.group.name(), &mut self.post_vars, name, values.into(), loaded)
    }

    pub fn set_psm_var(&mut self, name: &str, values: impl Into<VarValues>) -> Result<()> {
        let loaded = self.is_loaded();
        stage_var(self.group.name(), &mut self.psm_vars, name, values.into(), loaded)
    }

    pub fn set_extra_global_param(&mut self, name: &str, values: impl Into<EgpValues>) -> Result<()> {
        self.group.set_extra_global_param(name, values)
    }

    pub fn set_psm_extra_global_param(&mut self, name: &str, values: impl Into<EgpValues>) -> Result<()> {
        self.group.ensure_unloaded()?;
        let model = self
            .postsynaptic
            .clone()
            .ok_or_else(|| BindError::ModelNotSet(self.name().to_string()))?;
        stage_egp(
            self.group.name(),
            &mut self.psm_extra_global_params,
            &model.extra_global_params,
            name,
            values.into(),
        )
    }

    pub fn set_connectivity_extra_global_param(
        &mut self,
        name: &str,
        values: impl Into<EgpValues>,
    ) -> Result<()> {
        if self.connectivity_egps_loaded {
            return Err(BindError::AlreadyLoaded(self.name().to_string()));
        }
        let decls = match &self.connectivity {
            Connectivity::Procedural(init) => init.extra_global_params.clone(),
            _ => vec![],
        };
        stage_egp(
            self.group.name(),
            &mut self.connectivity_extra_global_params,
            &decls,
            name,
            values.into(),
        )
    }

    pub fn vars(&self) -> &VarMap {
        self.group.vars()
    }

    pub fn var_view(&self, name: &str) -> Result<Option<&HostView>> {
        self.group.var_view(name)
    }

    pub fn pre_var_view(&self, name: &str) -> Result<Option<&HostView>> {
        var_view(self.name(), &self.pre_vars, name)
    }

    pub fn post_var_view(&self, name: &str) -> Result<Option<&HostView>> {
        var_view(self.name(), &self.post_vars, name)
    }

    pub fn psm_var_view(&self, name: &str) -> Result<Option<&HostView>> {
        var_view(self.name(), &self.psm_vars, name)
    }

    // ------------------------------------------------------------------------
    // Load
    // ------------------------------------------------------------------------

    /// Bind connectivity, then weights, pre, post and postsynaptic variables,
    /// then extra global parameters
    pub fn load(&mut self, runtime: &dyn Runtime) -> Result<()> {
        self.group.ensure_unloaded()?;
        let precision = runtime.precision();
        let pop = self.population()?.clone();
        let name = self.name().to_string();
        let src = self.source_size()?;
        let trg = self.target_size()?;
        let layout = self.layout()?;

        let wu_plan = if self.matrix_type.has_individual_synapse_vars() {
            let staged_len = self.staged_weight_len(&layout)?;
            let plan = plan_variables(&name, precision, self.group.vars(), staged_len, |var| {
                pop.wu_var_location(var)
            })?;
            Some((plan, self.weight_update_var_size()?, self.row_stride()?))
        } else {
            None
        };
        let pre_plan = plan_variables(&name, precision, &self.pre_vars, src, |var| {
            pop.wu_pre_var_location(var)
        })?;
        let post_plan = plan_variables(&name, precision, &self.post_vars, trg, |var| {
            pop.wu_post_var_location(var)
        })?;
        let psm_plan = if self.matrix_type.has_individual_postsynaptic_vars() {
            Some(plan_variables(&name, precision, &self.psm_vars, trg, |var| {
                pop.ps_var_location(var)
            })?)
        } else {
            None
        };
        let wu_egp_plan = plan_extra_global_params(precision, self.group.extra_global_params())?;
        let psm_egp_plan = plan_extra_global_params(precision, &self.psm_extra_global_params)?;

        let (row_length, ind) = match &layout {
            Layout::Ragged(connections) => {
                let (row_length, ind) = bind_ragged(runtime, &name, &pop, src, connections)?;
                (Some(row_length), Some(ind))
            }
            _ => (None, None),
        };

        let wu_bindings = match wu_plan {
            Some((plan, size, stride)) => {
                let bindings = plan.bind(runtime, &name, size)?;
                for (var_name, view) in &bindings {
                    if let (Some(var), Some(view)) = (self.group.vars().get(var_name), view) {
                        init_weight_variable(&name, var, view, &layout, stride)?;
                    }
                }
                bindings
            }
            None => vec![],
        };

        let pre_bindings = pre_plan.bind(runtime, &name, src)?;
        copy_variables(&self.pre_vars, &pre_bindings)?;
        let post_bindings = post_plan.bind(runtime, &name, trg)?;
        copy_variables(&self.post_vars, &post_bindings)?;
        let psm_bindings = match psm_plan {
            Some(plan) => {
                let bindings = plan.bind(runtime, &name, trg)?;
                copy_variables(&self.psm_vars, &bindings)?;
                bindings
            }
            None => vec![],
        };

        let wu_egp_bindings = wu_egp_plan.bind(runtime, &name, self.group.extra_global_params())?;
        let psm_egp_bindings = psm_egp_plan.bind(runtime, &name, &self.psm_extra_global_params)?;

        self.row_length = row_length;
        self.ind = ind;
        publish_variables(&mut self.pre_vars, pre_bindings);
        publish_variables(&mut self.post_vars, post_bindings);
        publish_variables(&mut self.psm_vars, psm_bindings);
        publish_extra_global_params(&mut self.psm_extra_global_params, psm_egp_bindings);
        self.group.publish((wu_bindings, wu_egp_bindings));

        info!(
            "Loaded synapse group '{}' ({}, {} -> {} neurons)",
            name, self.matrix_type, src, trg
        );
        Ok(())
    }

    /// Bind the connectivity initialiser's extra global parameters.
    ///
    /// Runs after the whole model has loaded, as the engine only creates the
    /// initialiser once every group is wired.
    pub fn load_connectivity_init_egps(&mut self, runtime: &dyn Runtime) -> Result<()> {
        self.group.ensure_loaded()?;
        if self.connectivity_egps_loaded {
            return Err(BindError::AlreadyLoaded(self.name().to_string()));
        }
        let name = self.name().to_string();
        let plan = plan_extra_global_params(runtime.precision(), &self.connectivity_extra_global_params)?;
        let bindings = plan.bind(runtime, &name, &self.connectivity_extra_global_params)?;
        publish_extra_global_params(&mut self.connectivity_extra_global_params, bindings);
        self.connectivity_egps_loaded = true;
        Ok(())
    }

    /// Re-copy staged values. Connectivity is never touched.
    pub fn reinitialise(&mut self) -> Result<()> {
        self.group.ensure_loaded()?;
        let name = self.name();
        let layout = self.layout()?;

        check_refresh(name, &self.pre_vars)?;
        check_refresh(name, &self.post_vars)?;
        if self.matrix_type.has_individual_postsynaptic_vars() {
            check_refresh(name, &self.psm_vars)?;
        }
        if self.matrix_type.has_individual_synapse_vars() {
            let staged_len = self.staged_weight_len(&layout)?;
            let stride = self.row_stride()?;
            for var in self.group.vars().values() {
                check_staged_len(name, var.name(), var.values(), staged_len)?;
                if let Some(view) = var.view() {
                    var.values().check_representable(view.scalar_type())?;
                }
            }
            for var in self.group.vars().values() {
                if let Some(view) = var.view() {
                    init_weight_variable(name, var, view, &layout, stride)?;
                }
            }
        }
        refresh_variables(name, &self.pre_vars)?;
        refresh_variables(name, &self.post_vars)?;
        if self.matrix_type.has_individual_postsynaptic_vars() {
            refresh_variables(name, &self.psm_vars)?;
        }

        info!("Reinitialised synapse group '{}'", name);
        Ok(())
    }

    fn staged_weight_len(&self, layout: &Layout<'_>) -> Result<usize> {
        match layout {
            Layout::Dense => Ok(self.source_size()? * self.target_size()?),
            Layout::Ragged(connections) => Ok(connections.num_synapses()),
            Layout::Procedural | Layout::Bitmask => {
                match self.group.vars().values().find(|var| var.init_required()) {
                    Some(var) => Err(self.unsupported(&format!(
                        "manual values for synapse variable '{}'",
                        var.name()
                    ))),
                    None => self.weight_update_var_size(),
                }
            }
        }
    }

    // ------------------------------------------------------------------------
    // Read-back
    // ------------------------------------------------------------------------

    /// Logical values of a weight update variable, padding removed
    pub fn get_var_values(&self, name: &str) -> Result<Array1<f64>> {
        self.group.ensure_loaded()?;
        if !self.matrix_type.has_individual_synapse_vars() {
            return Err(self.unsupported("get_var_values"));
        }
        let view = self
            .group
            .var_view(name)?
            .ok_or_else(|| BindError::DeviceOnlyVariable {
                group: self.name().to_string(),
                name: name.to_string(),
            })?;

        match self.layout()? {
            Layout::Dense => view.to_f64(),
            Layout::Ragged(connections) => Ok(Array1::from(gather_rows(
                view,
                connections.row_lengths(),
                self.row_stride()?,
            )?)),
            Layout::Procedural => Err(BindError::ConnectivityNotAccessible(self.name().to_string())),
            Layout::Bitmask => Err(self.unsupported("get_var_values")),
        }
    }

    /// Source index of every synapse, in row-major order
    pub fn get_sparse_pre_inds(&self) -> Result<Vec<u32>> {
        Ok(self.explicit_connections()?.pre_indices())
    }

    /// Target index of every synapse, in row-major order
    pub fn get_sparse_post_inds(&self) -> Result<Vec<u32>> {
        let connections = self.explicit_connections()?;
        match &self.ind {
            Some(ind) => Ok(gather_rows(ind, connections.row_lengths(), self.row_stride()?)?
                .into_iter()
                .map(|index| index as u32)
                .collect()),
            None => Ok(connections.column_indices().to_vec()),
        }
    }

    fn explicit_connections(&self) -> Result<&SparseConnections> {
        if !self.matrix_type.is_ragged() {
            return Err(self.unsupported("sparse index read-back"));
        }
        self.connections()
            .ok_or_else(|| BindError::ConnectivityNotAccessible(self.name().to_string()))
    }

    fn unsupported(&self, operation: &str) -> BindError {
        BindError::UnsupportedFormat {
            group: self.name().to_string(),
            operation: operation.to_string(),
        }
    }
}

/// Bind and fill `rowLength` and the padded `ind` buffer
fn bind_ragged(
    runtime: &dyn Runtime,
    group: &str,
    pop: &Arc<dyn SynapsePopulation>,
    source_size: usize,
    connections: &SparseConnections,
) -> Result<(HostView, HostView)> {
    let stride = pop.max_connections();
    if stride < connections.max_row_length() {
        return Err(BindError::SizeMismatch {
            name: qualified_name("ind", group),
            expected: stride,
            got: connections.max_row_length(),
        });
    }

    let row_length = runtime.assign_external_array(
        &qualified_name("rowLength", group),
        source_size,
        ScalarType::U32,
    )?;
    let ind = runtime.assign_external_array(
        &qualified_name("ind", group),
        stride * source_size,
        ScalarType::U32,
    )?;
    row_length.write_at(0, connections.row_lengths())?;
    scatter_rows(&ind, connections.row_lengths(), stride, connections.column_indices())?;
    Ok((row_length, ind))
}

/// Copy manual weight values following the connectivity's layout
fn init_weight_variable(
    group: &str,
    var: &Variable,
    view: &HostView,
    layout: &Layout<'_>,
    stride: usize,
) -> Result<()> {
    if !var.init_required() {
        return Ok(());
    }
    match layout {
        Layout::Dense => view.assign(var.values()),
        Layout::Ragged(connections) => {
            let values = match var.values() {
                VarValues::Scalar(value) => vec![*value; connections.num_synapses()],
                VarValues::Array(values) => connections.permute(&values.to_vec())?,
                VarValues::Unset | VarValues::Init(_) => return Ok(()),
            };
            scatter_rows(view, connections.row_lengths(), stride, &values)
        }
        Layout::Procedural | Layout::Bitmask => Err(BindError::UnsupportedFormat {
            group: group.to_string(),
            operation: format!("manual values for synapse variable '{}'", var.name()),
        }),
    }
}

/// Initialisers for variables shared by every synapse: manual scalars become
/// constants, per-synapse arrays have nowhere to go
fn global_var_init(group: &str, decls: &[VarDecl], vars: &VarMap) -> Result<Vec<VarInitialiser>> {
    decls
        .iter()
        .map(|decl| match vars.get(&decl.name).map(|var| var.values()) {
            Some(VarValues::Scalar(value)) => Ok(VarInitialiser::Constant(*value)),
            Some(VarValues::Array(_)) => Err(BindError::UnsupportedFormat {
                group: group.to_string(),
                operation: format!("per-synapse values for global variable '{}'", decl.name),
            }),
            Some(VarValues::Init(init)) => Ok(init.clone()),
            Some(VarValues::Unset) | None => Ok(VarInitialiser::Uninitialised),
        })
        .collect()
}
