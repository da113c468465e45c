//! Current injected into a neuron group.

use ndarray::Array1;
use std::sync::Arc;
use tracing::info;

use synbind_core::{
    BindError, EgpValues, HostView, ModelFamily, ModelInit, ModelRegistry, ModelRole, ModelSource,
    Result, VarMap, VarValues,
};
use synbind_engine::{CurrentSourcePopulation, CurrentSourceSpec, ModelBuilder, NeuronPopulation, Runtime};

use crate::group::Group;
use crate::neuron_group::NeuronGroup;

/// Current source whose variables are sized to its target population
#[derive(Debug)]
pub struct CurrentSource {
    group: Group,
    target: Option<Arc<dyn NeuronPopulation>>,
    population: Option<Arc<dyn CurrentSourcePopulation>>,
}

impl CurrentSource {
    pub fn new(name: &str) -> Self {
        Self {
            group: Group::new(name),
            target: None,
            population: None,
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
        let prepared = registry
            .family(ModelRole::CurrentSource)
            .prepare(model.into(), init)?;
        self.group
            .set_model(prepared.descriptor, prepared.param_values, prepared.vars)
    }

    pub fn add_to(&mut self, builder: &mut dyn ModelBuilder, target: &NeuronGroup) -> Result<()> {
        let target_pop = target.population()?.clone();
        let spec = CurrentSourceSpec {
            name: self.name().to_string(),
            model: self.group.model()?.clone(),
            target: target.name().to_string(),
            params: self.group.param_values().to_vec(),
            var_init: self.group.var_init()?,
        };
        self.population = Some(builder.add_current_source(spec)?);
        self.target = Some(target_pop);
        Ok(())
    }

    pub fn population(&self) -> Result<&Arc<dyn CurrentSourcePopulation>> {
        self.population
            .as_ref()
            .ok_or_else(|| BindError::NotAdded(self.name().to_string()))
    }

    /// Size of the target population
    pub fn size(&self) -> Result<usize> {
        self.target
            .as_ref()
            .map(|target| target.num_neurons())
            .ok_or_else(|| BindError::NotAdded(self.name().to_string()))
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

    pub fn load(&mut self, runtime: &dyn Runtime) -> Result<()> {
        self.group.ensure_unloaded()?;
        let precision = runtime.precision();
        let pop = self.population()?.clone();
        let size = self.size()?;

        let plan = self.group.plan(precision, size, |var| pop.var_location(var))?;
        let bindings = self.group.bind(runtime, size, plan)?;
        self.group.publish(bindings);
        info!("Loaded current source '{}' ({} targets)", self.name(), size);
        Ok(())
    }

    pub fn reinitialise(&mut self) -> Result<()> {
        self.group.refresh()?;
        info!("Reinitialised current source '{}'", self.name());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use synbind_engine::MemoryEngine;

    #[test]
    fn test_size_follows_target() {
        let registry = ModelRegistry::with_builtins();
        let mut engine = MemoryEngine::default();
        let mut pop = NeuronGroup::new("Exc");
        pop.set_model(&registry, "Poisson", &ModelInit::new().param("rate", 5.0))
            .unwrap();
        pop.add_to(&mut engine, 7).unwrap();

        let mut stim = CurrentSource::new("Stim");
        assert!(matches!(stim.size(), Err(BindError::NotAdded(_))));
        stim.set_model(&registry, "DC", &ModelInit::new().param("amp", 0.7))
            .unwrap();
        stim.add_to(&mut engine, &pop).unwrap();
        assert_eq!(stim.size().unwrap(), pop.size().unwrap());
    }

    #[test]
    fn test_load_and_reinitialise() {
        let registry = ModelRegistry::with_builtins();
        let mut engine = MemoryEngine::default();
        let mut pop = NeuronGroup::new("Exc");
        pop.set_model(&registry, "Poisson", &ModelInit::new().param("rate", 5.0))
            .unwrap();
        pop.add_to(&mut engine, 3).unwrap();

        let mut stim = CurrentSource::new("Noise");
        stim.set_model(
            &registry,
            "PoissonExp",
            &ModelInit::new()
                .param("weight", 1.0)
                .param("tauSyn", 5.0)
                .param("rate", 10.0)
                .var("current", 0.25),
        )
        .unwrap();
        stim.add_to(&mut engine, &pop).unwrap();
        stim.load(&engine).unwrap();
        assert_eq!(stim.get_var_values("current").unwrap().to_vec(), vec![0.25; 3]);

        let view = stim.var_view("current").unwrap().unwrap().clone();
        view.write_at(1, &[9.0f64]).unwrap();
        stim.reinitialise().unwrap();
        assert_eq!(view.to_f64().unwrap().to_vec(), vec![0.25; 3]);
    }
}
