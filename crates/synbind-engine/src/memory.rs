//! Host-memory engine.
//!
//! Buffers live in a name-keyed table and are created on first assignment.
//! Every call is appended to an operation log so callers can check ordering.

use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

use synbind_core::{
    qualified_name, BindError, BindingConfig, ConnectivityKind, EgpDecl, HostArray, HostView,
    Precision, Result, ScalarType, VarLocation,
};

use crate::{
    CurrentSourcePopulation, CurrentSourceSpec, ModelBuilder, NeuronPopulation,
    NeuronPopulationSpec, Runtime, SynapsePopulation, SynapsePopulationSpec,
};

/// One recorded engine call
#[derive(Debug, Clone, PartialEq)]
pub enum EngineOp {
    AddNeuronPopulation { name: String },
    AddSynapsePopulation { name: String },
    AddCurrentSource { name: String },
    SetMaxConnections { group: String, max_connections: usize },
    AssignArray { name: String, len: usize },
    AssignScalar { name: String },
    AllocateEgp { group: String, param: String, len: usize },
    PushEgp { group: String, param: String, len: usize },
}

type OpLog = Arc<Mutex<Vec<EngineOp>>>;

// ============================================================================
// POPULATIONS
// ============================================================================

#[derive(Debug)]
pub struct MemoryNeuronPopulation {
    name: String,
    num_neurons: usize,
    delay_slots: AtomicUsize,
    config: Arc<BindingConfig>,
}

impl MemoryNeuronPopulation {
    /// Make room for spikes delayed by `delay_steps`
    fn check_num_delay_slots(&self, delay_steps: usize) {
        let previous = self.delay_slots.fetch_max(delay_steps + 1, Ordering::SeqCst);
        if delay_steps >= previous {
            debug!(
                "Population '{}' delay slots raised to {}",
                self.name,
                delay_steps + 1
            );
        }
    }
}

impl NeuronPopulation for MemoryNeuronPopulation {
    fn name(&self) -> &str {
        &self.name
    }

    fn num_neurons(&self) -> usize {
        self.num_neurons
    }

    fn num_delay_slots(&self) -> usize {
        self.delay_slots.load(Ordering::SeqCst)
    }

    fn var_location(&self, var: &str) -> VarLocation {
        self.config.var_location(&self.name, var)
    }
}

#[derive(Debug)]
pub struct MemorySynapsePopulation {
    name: String,
    max_connections: AtomicUsize,
    config: Arc<BindingConfig>,
    ops: OpLog,
}

impl SynapsePopulation for MemorySynapsePopulation {
    fn name(&self) -> &str {
        &self.name
    }

    fn max_connections(&self) -> usize {
        self.max_connections.load(Ordering::SeqCst)
    }

    fn set_max_connections(&self, max_connections: usize) {
        self.max_connections.store(max_connections, Ordering::SeqCst);
        self.ops.lock().push(EngineOp::SetMaxConnections {
            group: self.name.clone(),
            max_connections,
        });
    }

    fn wu_var_location(&self, var: &str) -> VarLocation {
        self.config.var_location(&self.name, var)
    }

    fn wu_pre_var_location(&self, var: &str) -> VarLocation {
        self.config.var_location(&self.name, var)
    }

    fn wu_post_var_location(&self, var: &str) -> VarLocation {
        self.config.var_location(&self.name, var)
    }

    fn ps_var_location(&self, var: &str) -> VarLocation {
        self.config.var_location(&self.name, var)
    }
}

#[derive(Debug)]
pub struct MemoryCurrentSource {
    name: String,
    config: Arc<BindingConfig>,
}

impl CurrentSourcePopulation for MemoryCurrentSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn var_location(&self, var: &str) -> VarLocation {
        self.config.var_location(&self.name, var)
    }
}

// ============================================================================
// ENGINE
// ============================================================================

/// Engine keeping all population state in host buffers
#[derive(Debug, Default)]
pub struct MemoryEngine {
    config: Arc<BindingConfig>,
    neurons: HashMap<String, Arc<MemoryNeuronPopulation>>,
    synapses: HashMap<String, Arc<MemorySynapsePopulation>>,
    current_sources: HashMap<String, Arc<MemoryCurrentSource>>,
    /// Extra global parameter types keyed by qualified name
    egp_types: HashMap<String, String>,
    /// Ragged index buffers, pre-filled with the padding value
    padded: HashSet<String>,
    buffers: RwLock<HashMap<String, Arc<RwLock<HostArray>>>>,
    /// Device copies of pushed extra global parameters
    device_egps: RwLock<HashMap<String, Vec<f64>>>,
    ops: OpLog,
}

impl MemoryEngine {
    pub fn new(config: BindingConfig) -> Self {
        Self {
            config: Arc::new(config),
            ..Default::default()
        }
    }

    pub fn config(&self) -> &BindingConfig {
        &self.config
    }

    /// Snapshot of the operation log
    pub fn ops(&self) -> Vec<EngineOp> {
        self.ops.lock().clone()
    }

    pub fn clear_ops(&self) {
        self.ops.lock().clear();
    }

    pub fn neuron_population(&self, name: &str) -> Option<Arc<MemoryNeuronPopulation>> {
        self.neurons.get(name).cloned()
    }

    /// View of an existing buffer, if it has been assigned
    pub fn buffer(&self, name: &str) -> Option<HostView> {
        self.buffers
            .read()
            .get(name)
            .map(|buffer| HostView::from_shared(name, buffer.clone()))
    }

    /// Last pushed device copy of an extra global parameter
    pub fn device_extra_global_param(&self, group: &str, param: &str) -> Option<Vec<f64>> {
        self.device_egps
            .read()
            .get(&qualified_name(param, group))
            .cloned()
    }

    /// Record one timestep of spikes for a loaded neuron population.
    ///
    /// With more than one delay slot the queue pointer advances first and the
    /// spikes land in the new slot.
    pub fn emit_spikes(&self, group: &str, spikes: &[u32]) -> Result<()> {
        let pop = self
            .neurons
            .get(group)
            .ok_or_else(|| BindError::Engine(format!("unknown neuron population '{}'", group)))?;
        let n = pop.num_neurons;
        if let Some(&bad) = spikes.iter().find(|&&id| id as usize >= n) {
            return Err(BindError::IndexOutOfRange {
                index: bad as usize,
                size: n,
            });
        }

        let spk = self.loaded_buffer(&qualified_name("glbSpk", group))?;
        let spk_cnt = self.loaded_buffer(&qualified_name("glbSpkCnt", group))?;

        let slots = pop.num_delay_slots();
        let slot = if slots > 1 {
            let ptr = self.loaded_buffer(&qualified_name("spkQuePtr", group))?;
            let current = ptr.read_range(0, 1)?[0] as usize;
            let next = (current + 1) % slots;
            ptr.write_at(0, &[next as u32])?;
            next
        } else {
            0
        };

        spk.write_at(slot * n, spikes)?;
        spk_cnt.write_at(slot, &[spikes.len() as u32])?;
        Ok(())
    }

    fn loaded_buffer(&self, name: &str) -> Result<HostView> {
        self.buffer(name)
            .ok_or_else(|| BindError::Engine(format!("buffer '{}' has not been assigned", name)))
    }

    fn record(&self, op: EngineOp) {
        self.ops.lock().push(op);
    }

    fn register_egps(&mut self, group: &str, decls: &[EgpDecl]) {
        for egp in decls {
            self.egp_types
                .insert(qualified_name(&egp.name, group), egp.type_name.clone());
        }
    }

    fn is_array_egp(&self, name: &str) -> bool {
        self.egp_types
            .get(name)
            .is_some_and(|ty| ty.trim_end().ends_with('*'))
    }

    fn neuron(&self, name: &str) -> Result<Arc<MemoryNeuronPopulation>> {
        self.neurons
            .get(name)
            .cloned()
            .ok_or_else(|| BindError::Engine(format!("unknown neuron population '{}'", name)))
    }

    fn check_unique(&self, name: &str) -> Result<()> {
        if self.neurons.contains_key(name)
            || self.synapses.contains_key(name)
            || self.current_sources.contains_key(name)
        {
            return Err(BindError::Engine(format!(
                "a population named '{}' already exists",
                name
            )));
        }
        Ok(())
    }

    fn view(&self, name: &str, len: usize, ty: ScalarType) -> Result<HostView> {
        if let Some(existing) = self.buffers.read().get(name) {
            let array = existing.read();
            if array.scalar_type() != ty {
                return Err(BindError::Engine(format!(
                    "buffer '{}' holds {} but {} was requested",
                    name,
                    array.scalar_type(),
                    ty
                )));
            }
            if array.len() != len {
                return Err(BindError::SizeMismatch {
                    name: name.to_string(),
                    expected: array.len(),
                    got: len,
                });
            }
            return Ok(HostView::from_shared(name, existing.clone()));
        }

        if self.is_array_egp(name) {
            return Err(BindError::Engine(format!(
                "extra global parameter '{}' must be allocated before it is bound",
                name
            )));
        }

        let array = if self.padded.contains(name) {
            HostArray::filled(ty, len, self.config.ragged_padding as f64)?
        } else {
            HostArray::zeros(ty, len)
        };
        debug!("Created buffer '{}' ({} x {})", name, len, ty);

        let buffer = Arc::new(RwLock::new(array));
        self.buffers
            .write()
            .insert(name.to_string(), buffer.clone());
        Ok(HostView::from_shared(name, buffer))
    }
}

impl Runtime for MemoryEngine {
    fn precision(&self) -> Precision {
        self.config.precision
    }

    fn assign_external_array(&self, name: &str, len: usize, ty: ScalarType) -> Result<HostView> {
        let view = self.view(name, len, ty)?;
        self.record(EngineOp::AssignArray {
            name: name.to_string(),
            len,
        });
        Ok(view)
    }

    fn assign_external_scalar(&self, name: &str, ty: ScalarType) -> Result<HostView> {
        let view = self.view(name, 1, ty)?;
        self.record(EngineOp::AssignScalar {
            name: name.to_string(),
        });
        Ok(view)
    }

    fn allocate_extra_global_param(&self, group: &str, param: &str, len: usize) -> Result<()> {
        let name = qualified_name(param, group);
        let type_name = self.egp_types.get(&name).ok_or_else(|| {
            BindError::UnknownExtraGlobalParam {
                group: group.to_string(),
                name: param.to_string(),
            }
        })?;
        let element = type_name.trim_end().trim_end_matches('*').trim_end();
        let ty = ScalarType::resolve(element, self.precision())?;

        debug!("Allocating {} x {} for '{}'", len, ty, name);
        self.buffers
            .write()
            .insert(name, Arc::new(RwLock::new(HostArray::zeros(ty, len))));
        self.record(EngineOp::AllocateEgp {
            group: group.to_string(),
            param: param.to_string(),
            len,
        });
        Ok(())
    }

    fn push_extra_global_param(&self, group: &str, param: &str, len: usize) -> Result<()> {
        let name = qualified_name(param, group);
        let host = self.buffer(&name).ok_or_else(|| {
            BindError::Engine(format!(
                "extra global parameter '{}' must be allocated before it is pushed",
                name
            ))
        })?;
        let values = host.read_range(0, len)?;

        self.device_egps.write().insert(name, values);
        self.record(EngineOp::PushEgp {
            group: group.to_string(),
            param: param.to_string(),
            len,
        });
        Ok(())
    }
}

impl ModelBuilder for MemoryEngine {
    fn add_neuron_population(
        &mut self,
        spec: NeuronPopulationSpec,
    ) -> Result<Arc<dyn NeuronPopulation>> {
        self.check_unique(&spec.name)?;
        self.register_egps(&spec.name, &spec.model.extra_global_params);

        let pop = Arc::new(MemoryNeuronPopulation {
            name: spec.name.clone(),
            num_neurons: spec.num_neurons,
            delay_slots: AtomicUsize::new(1),
            config: self.config.clone(),
        });
        info!(
            "Added neuron population '{}' ({} x {})",
            spec.name, spec.num_neurons, spec.model.kind
        );
        self.neurons.insert(spec.name.clone(), pop.clone());
        self.record(EngineOp::AddNeuronPopulation { name: spec.name });
        Ok(pop)
    }

    fn add_synapse_population(
        &mut self,
        spec: SynapsePopulationSpec,
    ) -> Result<Arc<dyn SynapsePopulation>> {
        self.check_unique(&spec.name)?;
        let source = self.neuron(&spec.source)?;
        let target = self.neuron(&spec.target)?;

        source.check_num_delay_slots(spec.delay_steps);
        target.check_num_delay_slots(spec.back_prop_delay_steps);

        let max_connections = match spec.matrix_type.connectivity() {
            ConnectivityKind::Dense | ConnectivityKind::Bitmask => target.num_neurons,
            ConnectivityKind::Ragged => spec
                .connectivity
                .as_ref()
                .map(|init| init.max_row_length.unwrap_or(target.num_neurons))
                .unwrap_or(0),
        };

        if spec.matrix_type.is_ragged() {
            self.padded.insert(qualified_name("ind", &spec.name));
        }
        self.register_egps(&spec.name, &spec.weight_update.extra_global_params);
        self.register_egps(&spec.name, &spec.postsynaptic.extra_global_params);
        if let Some(init) = &spec.connectivity {
            self.register_egps(&spec.name, &init.extra_global_params);
        }

        let pop = Arc::new(MemorySynapsePopulation {
            name: spec.name.clone(),
            max_connections: AtomicUsize::new(max_connections),
            config: self.config.clone(),
            ops: self.ops.clone(),
        });
        info!(
            "Added synapse population '{}' ({} -> {}, {})",
            spec.name, spec.source, spec.target, spec.matrix_type
        );
        self.synapses.insert(spec.name.clone(), pop.clone());
        self.record(EngineOp::AddSynapsePopulation { name: spec.name });
        Ok(pop)
    }

    fn add_current_source(
        &mut self,
        spec: CurrentSourceSpec,
    ) -> Result<Arc<dyn CurrentSourcePopulation>> {
        self.check_unique(&spec.name)?;
        self.neuron(&spec.target)?;
        self.register_egps(&spec.name, &spec.model.extra_global_params);

        let source = Arc::new(MemoryCurrentSource {
            name: spec.name.clone(),
            config: self.config.clone(),
        });
        info!(
            "Added current source '{}' -> '{}' ({})",
            spec.name, spec.target, spec.model.kind
        );
        self.current_sources.insert(spec.name.clone(), source.clone());
        self.record(EngineOp::AddCurrentSource { name: spec.name });
        Ok(source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ConnectivityInitialiser;
    use synbind_core::{MatrixType, ModelDescriptor, ModelRegistry, ModelRole};

    fn neuron_spec(registry: &ModelRegistry, name: &str, n: usize) -> NeuronPopulationSpec {
        NeuronPopulationSpec {
            name: name.to_string(),
            num_neurons: n,
            model: registry.get(ModelRole::Neuron, "SpikeSourceArray").unwrap(),
            params: vec![],
            var_init: vec![],
        }
    }

    fn synapse_spec(
        registry: &ModelRegistry,
        matrix_type: MatrixType,
        delay_steps: usize,
        connectivity: Option<ConnectivityInitialiser>,
    ) -> SynapsePopulationSpec {
        SynapsePopulationSpec {
            name: "Syn".to_string(),
            matrix_type,
            delay_steps,
            back_prop_delay_steps: 0,
            source: "Pre".to_string(),
            target: "Post".to_string(),
            weight_update: registry.get(ModelRole::WeightUpdate, "StaticPulse").unwrap(),
            wu_params: vec![],
            wu_var_init: vec![],
            wu_pre_var_init: vec![],
            wu_post_var_init: vec![],
            postsynaptic: registry.get(ModelRole::Postsynaptic, "DeltaCurr").unwrap(),
            ps_params: vec![],
            ps_var_init: vec![],
            connectivity,
        }
    }

    fn engine_with_pops() -> (MemoryEngine, ModelRegistry) {
        let registry = ModelRegistry::with_builtins();
        let mut engine = MemoryEngine::default();
        engine.add_neuron_population(neuron_spec(&registry, "Pre", 3)).unwrap();
        engine.add_neuron_population(neuron_spec(&registry, "Post", 4)).unwrap();
        (engine, registry)
    }

    #[test]
    fn test_delay_slots_raised_by_synapse_delay() {
        let (mut engine, registry) = engine_with_pops();
        let pre = engine.neuron_population("Pre").unwrap();
        assert_eq!(pre.num_delay_slots(), 1);

        engine
            .add_synapse_population(synapse_spec(&registry, MatrixType::dense_individual(), 5, None))
            .unwrap();
        assert_eq!(pre.num_delay_slots(), 6);

        pre.check_num_delay_slots(2);
        assert_eq!(pre.num_delay_slots(), 6);
    }

    #[test]
    fn test_back_prop_delay_raises_target_slots() {
        let (mut engine, registry) = engine_with_pops();
        let mut spec = synapse_spec(&registry, MatrixType::dense_individual(), 1, None);
        spec.back_prop_delay_steps = 3;
        engine.add_synapse_population(spec).unwrap();

        assert_eq!(engine.neuron_population("Pre").unwrap().num_delay_slots(), 2);
        assert_eq!(engine.neuron_population("Post").unwrap().num_delay_slots(), 4);
    }

    #[test]
    fn test_initial_max_connections() {
        let (mut engine, registry) = engine_with_pops();
        let dense = engine
            .add_synapse_population(synapse_spec(&registry, MatrixType::dense_individual(), 0, None))
            .unwrap();
        assert_eq!(dense.max_connections(), 4);

        let (mut engine, registry) = engine_with_pops();
        let ragged = engine
            .add_synapse_population(synapse_spec(&registry, MatrixType::ragged_individual(), 0, None))
            .unwrap();
        assert_eq!(ragged.max_connections(), 0);
        ragged.set_max_connections(2);
        assert_eq!(ragged.max_connections(), 2);

        let (mut engine, registry) = engine_with_pops();
        let init = ConnectivityInitialiser::new("FixedProbability", vec![0.1]).with_max_row_length(3);
        let procedural = engine
            .add_synapse_population(synapse_spec(
                &registry,
                MatrixType::ragged_individual(),
                0,
                Some(init),
            ))
            .unwrap();
        assert_eq!(procedural.max_connections(), 3);
    }

    #[test]
    fn test_buffers_shared_and_checked() {
        let engine = MemoryEngine::default();
        let a = engine.assign_external_array("VPop", 3, ScalarType::F32).unwrap();
        let b = engine.assign_external_array("VPop", 3, ScalarType::F32).unwrap();
        assert!(a.ptr_eq(&b));

        assert!(matches!(
            engine.assign_external_array("VPop", 4, ScalarType::F32),
            Err(BindError::SizeMismatch { .. })
        ));
        assert!(matches!(
            engine.assign_external_array("VPop", 3, ScalarType::F64),
            Err(BindError::Engine(_))
        ));
    }

    #[test]
    fn test_ragged_index_padding() {
        let (mut engine, registry) = engine_with_pops();
        engine
            .add_synapse_population(synapse_spec(&registry, MatrixType::ragged_individual(), 0, None))
            .unwrap();
        let ind = engine.assign_external_array("indSyn", 4, ScalarType::U32).unwrap();
        assert_eq!(ind.to_f64().unwrap().to_vec(), vec![u32::MAX as f64; 4]);

        let row_length = engine.assign_external_array("rowLengthSyn", 2, ScalarType::U32).unwrap();
        assert_eq!(row_length.to_f64().unwrap().to_vec(), vec![0.0; 2]);
    }

    #[test]
    fn test_array_egp_requires_allocation() {
        let (engine, _) = engine_with_pops();
        assert!(matches!(
            engine.assign_external_array("spikeTimesPre", 2, ScalarType::F32),
            Err(BindError::Engine(_))
        ));
        assert!(engine.push_extra_global_param("Pre", "spikeTimes", 2).is_err());

        engine.allocate_extra_global_param("Pre", "spikeTimes", 2).unwrap();
        let view = engine.assign_external_array("spikeTimesPre", 2, ScalarType::F32).unwrap();
        view.write_at(0, &[1.5f64, 3.0]).unwrap();
        engine.push_extra_global_param("Pre", "spikeTimes", 2).unwrap();

        assert_eq!(
            engine.device_extra_global_param("Pre", "spikeTimes"),
            Some(vec![1.5, 3.0])
        );
        assert!(matches!(
            engine.allocate_extra_global_param("Pre", "rate", 1),
            Err(BindError::UnknownExtraGlobalParam { .. })
        ));
    }

    #[test]
    fn test_emit_spikes_with_delay_queue() {
        let (mut engine, registry) = engine_with_pops();
        engine
            .add_synapse_population(synapse_spec(&registry, MatrixType::dense_individual(), 2, None))
            .unwrap();

        assert!(engine.emit_spikes("Pre", &[0]).is_err());

        engine.assign_external_array("glbSpkPre", 9, ScalarType::U32).unwrap();
        engine.assign_external_array("glbSpkCntPre", 3, ScalarType::U32).unwrap();
        let ptr = engine.assign_external_scalar("spkQuePtrPre", ScalarType::U32).unwrap();

        engine.emit_spikes("Pre", &[2, 0]).unwrap();
        assert_eq!(ptr.read_range(0, 1).unwrap(), vec![1.0]);
        let spk = engine.buffer("glbSpkPre").unwrap();
        assert_eq!(spk.read_range(3, 2).unwrap(), vec![2.0, 0.0]);
        let cnt = engine.buffer("glbSpkCntPre").unwrap();
        assert_eq!(cnt.read_range(0, 3).unwrap(), vec![0.0, 2.0, 0.0]);

        assert!(matches!(
            engine.emit_spikes("Pre", &[3]),
            Err(BindError::IndexOutOfRange { index: 3, size: 3 })
        ));
    }

    #[test]
    fn test_duplicate_and_unknown_populations() {
        let (mut engine, registry) = engine_with_pops();
        assert!(engine
            .add_neuron_population(neuron_spec(&registry, "Pre", 1))
            .is_err());

        let spec = CurrentSourceSpec {
            name: "Stim".to_string(),
            model: Arc::new(ModelDescriptor::new("DC").with_params(&["amp"])),
            target: "Missing".to_string(),
            params: vec![1.0],
            var_init: vec![],
        };
        assert!(engine.add_current_source(spec).is_err());
    }

    #[test]
    fn test_var_location_from_config() {
        let mut config = BindingConfig::default();
        config.set_var_location("Pre", "startSpike", VarLocation::DEVICE);
        let registry = ModelRegistry::with_builtins();
        let mut engine = MemoryEngine::new(config);
        let pop = engine
            .add_neuron_population(neuron_spec(&registry, "Pre", 2))
            .unwrap();

        assert_eq!(pop.var_location("startSpike"), VarLocation::DEVICE);
        assert_eq!(pop.var_location("endSpike"), VarLocation::HOST_DEVICE);
    }
}
