//! Neuron populations.

use ndarray::Array1;
use parking_lot::MappedRwLockReadGuard;
use std::sync::Arc;
use tracing::info;

use synbind_core::{
    qualified_name, BindError, EgpValues, HostView, ModelInit, ModelRegistry, ModelRole,
    ModelFamily, ModelSource, Result, ScalarType, VarMap, VarValues,
};
use synbind_engine::{ModelBuilder, NeuronPopulation, NeuronPopulationSpec, Runtime};

use crate::group::Group;

const SPIKE_SOURCE_ARRAY: &str = "SpikeSourceArray";

/// A population of homogeneous neurons with spike output buffers
#[derive(Debug)]
pub struct NeuronGroup {
    group: Group,
    is_spike_source_array: bool,
    population: Option<Arc<dyn NeuronPopulation>>,
    spikes: Option<HostView>,
    spike_count: Option<HostView>,
    spike_queue_ptr: Option<HostView>,
}

impl NeuronGroup {
    pub fn new(name: &str) -> Self {
        Self {
            group: Group::new(name),
            is_spike_source_array: false,
            population: None,
            spikes: None,
            spike_count: None,
            spike_queue_ptr: None,
        }
    }

    pub fn name(&self) -> &str {
        self.group.name()
    }

    pub fn is_loaded(&self) -> bool {
        self.group.is_loaded()
    }

    pub fn set_model(
        &mut self,
        registry: &ModelRegistry,
        model: impl Into<ModelSource>,
        init: &ModelInit,
    ) -> Result<()> {
        let prepared = registry.family(ModelRole::Neuron).prepare(model.into(), init)?;
        let is_spike_source_array = prepared.kind() == SPIKE_SOURCE_ARRAY;
        self.group
            .set_model(prepared.descriptor, prepared.param_values, prepared.vars)?;
        self.is_spike_source_array = is_spike_source_array;
        Ok(())
    }

    /// Model replays recorded spike times
    pub fn is_spike_source_array(&self) -> bool {
        self.is_spike_source_array
    }

    pub fn add_to(&mut self, builder: &mut dyn ModelBuilder, num_neurons: usize) -> Result<()> {
        let spec = NeuronPopulationSpec {
            name: self.name().to_string(),
            num_neurons,
            model: self.group.model()?.clone(),
            params: self.group.param_values().to_vec(),
            var_init: self.group.var_init()?,
        };
        self.population = Some(builder.add_neuron_population(spec)?);
        Ok(())
    }

    pub fn population(&self) -> Result<&Arc<dyn NeuronPopulation>> {
        self.population
            .as_ref()
            .ok_or_else(|| BindError::NotAdded(self.name().to_string()))
    }

    pub fn size(&self) -> Result<usize> {
        Ok(self.population()?.num_neurons())
    }

    pub fn delay_slots(&self) -> Result<usize> {
        Ok(self.population()?.num_delay_slots())
    }

    pub fn vars(&self) -> &VarMap {
        self.group.vars()
    }

    pub fn set_var(&mut self, name: &str, values: impl Into<VarValues>) -> Result<()> {
        self.group.set_var(name, values)
    }

    pub fn set_extra_global_param(&mut self, name: &str, values: impl Into<EgpValues>) -> Result<()> {
        self.group.set_extra_global_param(name, values)
    }

    pub fn var_view(&self, name: &str) -> Result<Option<&HostView>> {
        self.group.var_view(name)
    }

    pub fn get_var_values(&self, name: &str) -> Result<Array1<f64>> {
        self.group.get_var_values(name)
    }

    /// Spikes emitted in the current timestep.
    ///
    /// The guard borrows the engine's spike buffer; drop it before the
    /// engine advances.
    pub fn current_spikes(&self) -> Result<MappedRwLockReadGuard<'_, [u32]>> {
        self.group.ensure_loaded()?;
        let (spikes, spike_count) = match (&self.spikes, &self.spike_count) {
            (Some(spikes), Some(spike_count)) => (spikes, spike_count),
            _ => return Err(BindError::NotLoaded(self.name().to_string())),
        };

        let size = self.size()?;
        let slot = match &self.spike_queue_ptr {
            Some(ptr) => ptr.read_range(0, 1)?[0] as usize,
            None => 0,
        };
        let count = spike_count.read_range(slot, 1)?[0] as usize;
        if count > size || (slot + 1) * size > spikes.len() {
            return Err(BindError::SizeMismatch {
                name: spikes.name().to_string(),
                expected: size,
                got: count,
            });
        }

        spikes.map_u32(slot * size, count).ok_or_else(|| {
            BindError::Engine(format!(
                "spike buffer of '{}' holds {} instead of unsigned int",
                self.name(),
                spikes.scalar_type()
            ))
        })
    }

    /// Bind spike buffers, then variables and extra global parameters
    pub fn load(&mut self, runtime: &dyn Runtime) -> Result<()> {
        self.group.ensure_unloaded()?;
        let precision = runtime.precision();
        let pop = self.population()?.clone();
        let name = self.name().to_string();
        let size = pop.num_neurons();
        let slots = pop.num_delay_slots();

        let plan = self.group.plan(precision, size, |var| pop.var_location(var))?;

        let spikes = runtime.assign_external_array(
            &qualified_name("glbSpk", &name),
            size * slots,
            ScalarType::U32,
        )?;
        let spike_count =
            runtime.assign_external_array(&qualified_name("glbSpkCnt", &name), slots, ScalarType::U32)?;
        let spike_queue_ptr = if slots > 1 {
            Some(runtime.assign_external_scalar(&qualified_name("spkQuePtr", &name), ScalarType::U32)?)
        } else {
            None
        };

        let bindings = self.group.bind(runtime, size, plan)?;

        self.spikes = Some(spikes);
        self.spike_count = Some(spike_count);
        self.spike_queue_ptr = spike_queue_ptr;
        self.group.publish(bindings);
        info!("Loaded neuron group '{}' ({} neurons, {} delay slots)", name, size, slots);
        Ok(())
    }

    /// Re-copy staged variable values; spike state belongs to the engine
    pub fn reinitialise(&mut self) -> Result<()> {
        self.group.refresh()?;
        info!("Reinitialised neuron group '{}'", self.name());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use synbind_core::{BindingConfig, Precision, VarInitialiser, VarLocation};
    use synbind_engine::{EngineOp, MemoryEngine};

    fn izhikevich() -> ModelInit {
        ModelInit::new()
            .param("a", 0.02)
            .param("b", 0.2)
            .param("c", -65.0)
            .param("d", 8.0)
    }

    #[test]
    fn test_set_model() {
        let registry = ModelRegistry::with_builtins();
        let mut pop = NeuronGroup::new("Exc");
        pop.set_model(&registry, "Izhikevich", &izhikevich().var("V", -65.0))
            .unwrap();
        assert!(!pop.is_spike_source_array());
        assert!(pop.vars()["V"].init_required());

        let mut ssa = NeuronGroup::new("Input");
        ssa.set_model(&registry, "SpikeSourceArray", &ModelInit::new())
            .unwrap();
        assert!(ssa.is_spike_source_array());
    }

    #[test]
    fn test_queries_require_add() {
        let pop = NeuronGroup::new("Exc");
        assert!(matches!(pop.size(), Err(BindError::NotAdded(_))));

        let mut engine = MemoryEngine::default();
        let mut pop = NeuronGroup::new("Exc");
        assert!(matches!(
            pop.add_to(&mut engine, 10),
            Err(BindError::ModelNotSet(_))
        ));
    }

    #[test]
    fn test_load_binds_spikes_and_vars() {
        let registry = ModelRegistry::with_builtins();
        let mut engine = MemoryEngine::default();
        let mut pop = NeuronGroup::new("Exc");
        pop.set_model(
            &registry,
            "Izhikevich",
            &izhikevich()
                .var("V", vec![-65.0, -60.0, -55.0])
                .var("U", VarInitialiser::Constant(-13.0)),
        )
        .unwrap();
        pop.add_to(&mut engine, 3).unwrap();
        pop.load(&engine).unwrap();

        assert_eq!(engine.buffer("glbSpkExc").unwrap().len(), 3);
        assert_eq!(engine.buffer("glbSpkCntExc").unwrap().len(), 1);
        assert!(engine.buffer("spkQuePtrExc").is_none());
        assert_eq!(
            pop.get_var_values("V").unwrap().to_vec(),
            vec![-65.0, -60.0, -55.0]
        );
        assert_eq!(pop.get_var_values("U").unwrap().to_vec(), vec![0.0; 3]);

        assert!(matches!(
            pop.load(&engine),
            Err(BindError::AlreadyLoaded(_))
        ));
    }

    #[test]
    fn test_current_spikes() {
        let registry = ModelRegistry::with_builtins();
        let mut engine = MemoryEngine::default();
        let mut pop = NeuronGroup::new("Exc");
        pop.set_model(&registry, "Izhikevich", &izhikevich()).unwrap();
        pop.add_to(&mut engine, 4).unwrap();
        assert!(matches!(pop.current_spikes(), Err(BindError::NotLoaded(_))));

        pop.load(&engine).unwrap();
        assert!(pop.current_spikes().unwrap().is_empty());

        engine.emit_spikes("Exc", &[3, 1]).unwrap();
        assert_eq!(&*pop.current_spikes().unwrap(), &[3, 1]);
    }

    #[test]
    fn test_device_only_var() {
        let registry = ModelRegistry::with_builtins();
        let mut config = BindingConfig::default();
        config.set_var_location("Exc", "U", VarLocation::DEVICE);
        let mut engine = MemoryEngine::new(config);

        let mut pop = NeuronGroup::new("Exc");
        pop.set_model(&registry, "Izhikevich", &izhikevich().var("U", -13.0))
            .unwrap();
        pop.add_to(&mut engine, 2).unwrap();
        assert!(matches!(
            pop.load(&engine),
            Err(BindError::InitOnDeviceOnlyVariable { .. })
        ));
        assert!(!pop.is_loaded());

        pop.set_var("U", VarValues::Unset).unwrap();
        pop.load(&engine).unwrap();
        assert!(pop.var_view("U").unwrap().is_none());
        assert!(matches!(
            pop.get_var_values("U"),
            Err(BindError::DeviceOnlyVariable { .. })
        ));
    }

    #[test]
    fn test_reinitialise() {
        let registry = ModelRegistry::with_builtins();
        let mut engine = MemoryEngine::new(BindingConfig {
            precision: Precision::Double,
            ..Default::default()
        });
        let mut pop = NeuronGroup::new("Exc");
        pop.set_model(&registry, "Izhikevich", &izhikevich().var("V", -65.0))
            .unwrap();
        pop.add_to(&mut engine, 2).unwrap();
        assert!(matches!(pop.reinitialise(), Err(BindError::NotLoaded(_))));

        pop.load(&engine).unwrap();
        let v = pop.var_view("V").unwrap().unwrap().clone();
        v.write_at(0, &[-40.0f64, -30.0]).unwrap();

        pop.set_var("V", vec![-70.0, -71.0]).unwrap();
        pop.reinitialise().unwrap();
        assert_eq!(v.to_f64().unwrap().to_vec(), vec![-70.0, -71.0]);
        assert_eq!(v.scalar_type(), ScalarType::F64);
    }

    #[test]
    fn test_spike_times_follow_engine_precision() {
        let registry = ModelRegistry::with_builtins();
        let mut engine = MemoryEngine::new(BindingConfig {
            precision: Precision::Double,
            ..Default::default()
        });
        let mut input = NeuronGroup::new("Input");
        input
            .set_model(&registry, "SpikeSourceArray", &ModelInit::new())
            .unwrap();
        input.set_extra_global_param("spikeTimes", vec![1.0, 2.0]).unwrap();
        input.add_to(&mut engine, 2).unwrap();
        input.load(&engine).unwrap();

        let times = engine.buffer("spikeTimesInput").unwrap();
        assert_eq!(times.scalar_type(), ScalarType::F64);
        assert_eq!(
            engine.device_extra_global_param("Input", "spikeTimes"),
            Some(vec![1.0, 2.0])
        );
    }

    #[test]
    fn test_unrepresentable_value_binds_nothing() {
        let registry = ModelRegistry::with_builtins();
        let mut engine = MemoryEngine::default();
        let mut input = NeuronGroup::new("Input");
        input
            .set_model(&registry, "SpikeSourceArray", &ModelInit::new().var("startSpike", -1.0))
            .unwrap();
        input.add_to(&mut engine, 2).unwrap();
        engine.clear_ops();

        assert!(matches!(
            input.load(&engine),
            Err(BindError::ValueConversion { target: ScalarType::U32, .. })
        ));
        assert!(engine.ops().is_empty());
        assert!(!input.is_loaded());

        input.set_var("startSpike", vec![0.0, 3.0]).unwrap();
        input.load(&engine).unwrap();
        assert!(engine
            .ops()
            .iter()
            .any(|op| matches!(op, EngineOp::AssignArray { name, .. } if name == "startSpikeInput")));
    }

    #[test]
    fn test_spike_count_past_buffer_end() {
        let registry = ModelRegistry::with_builtins();
        let mut engine = MemoryEngine::default();
        let mut pop = NeuronGroup::new("Exc");
        pop.set_model(&registry, "Izhikevich", &izhikevich()).unwrap();
        pop.add_to(&mut engine, 2).unwrap();
        pop.load(&engine).unwrap();

        engine
            .buffer("glbSpkCntExc")
            .unwrap()
            .write_at(0, &[5u32])
            .unwrap();
        assert!(matches!(
            pop.current_spikes(),
            Err(BindError::SizeMismatch { expected: 2, got: 5, .. })
        ));
    }
}
