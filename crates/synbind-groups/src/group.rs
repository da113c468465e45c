//! Variable and extra global parameter binding shared by every group kind.
//!
//! Binding runs in two phases. Planning validates every staged value and
//! resolves every type without touching the engine; binding then requests
//! views and copies values. Records are only updated once a whole load has
//! succeeded, so a failed load leaves the group exactly as it was.

use ndarray::Array1;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use synbind_core::{
    qualified_name, var_space_to_vals, BindError, EgpDecl, EgpMap, EgpValues, ExtraGlobalParam,
    HostView, ModelDescriptor, Precision, Result, ScalarType, VarInitialiser, VarLocation, VarMap,
    VarValues,
};
use synbind_engine::Runtime;

/// Views obtained for a variable map, keyed by variable name
pub(crate) type VarBindings = Vec<(String, Option<HostView>)>;

/// Views obtained for an extra global parameter map
pub(crate) type EgpBindings = Vec<(String, HostView)>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadState {
    #[default]
    Unloaded,
    Loaded,
}

// ============================================================================
// VARIABLES
// ============================================================================

struct PlannedVar {
    name: String,
    ty: ScalarType,
    host: bool,
}

/// Validated variable map, ready to bind
pub(crate) struct VarPlan {
    entries: Vec<PlannedVar>,
}

/// Validate a variable map before anything is bound.
///
/// `staged_len` is the number of elements an array staging must have; it
/// differs from the view length for padded ragged weights.
pub(crate) fn plan_variables<F>(
    group: &str,
    precision: Precision,
    vars: &VarMap,
    staged_len: usize,
    location: F,
) -> Result<VarPlan>
where
    F: Fn(&str) -> VarLocation,
{
    let mut names: Vec<&String> = vars.keys().collect();
    names.sort();

    let mut entries = Vec::with_capacity(names.len());
    for name in names {
        let var = &vars[name];
        let host = location(name).is_host_visible();
        if !host && var.init_required() {
            return Err(BindError::InitOnDeviceOnlyVariable {
                group: group.to_string(),
                name: name.clone(),
            });
        }
        check_staged_len(group, name, var.values(), staged_len)?;
        let ty = var.resolved_type(precision)?;
        var.values().check_representable(ty)?;

        entries.push(PlannedVar {
            name: name.clone(),
            ty,
            host,
        });
    }
    Ok(VarPlan { entries })
}

impl VarPlan {
    /// Request a view of `size` elements for every host-visible variable
    pub(crate) fn bind(self, runtime: &dyn Runtime, group: &str, size: usize) -> Result<VarBindings> {
        self.entries
            .into_iter()
            .map(|entry| {
                let view = if entry.host {
                    let qualified = qualified_name(&entry.name, group);
                    debug!("Binding '{}' ({} x {})", qualified, size, entry.ty);
                    Some(runtime.assign_external_array(&qualified, size, entry.ty)?)
                } else {
                    debug!("'{}' in '{}' is device-only", entry.name, group);
                    None
                };
                Ok((entry.name, view))
            })
            .collect()
    }
}

pub(crate) fn check_staged_len(
    group: &str,
    name: &str,
    values: &VarValues,
    expected: usize,
) -> Result<()> {
    match values.len() {
        Some(got) if got != expected => Err(BindError::SizeMismatch {
            name: qualified_name(name, group),
            expected,
            got,
        }),
        _ => Ok(()),
    }
}

/// Copy manual stagings into freshly bound views
pub(crate) fn copy_variables(vars: &VarMap, bindings: &VarBindings) -> Result<()> {
    for (name, view) in bindings {
        if let (Some(var), Some(view)) = (vars.get(name), view) {
            if var.init_required() {
                view.assign(var.values())?;
            }
        }
    }
    Ok(())
}

pub(crate) fn publish_variables(vars: &mut VarMap, bindings: VarBindings) {
    for (name, view) in bindings {
        if let Some(var) = vars.get_mut(&name) {
            var.bind(view);
        }
    }
}

/// Re-copy manual stagings into already bound views.
///
/// Device-only records are skipped; nothing is re-queried or re-allocated.
pub(crate) fn refresh_variables(group: &str, vars: &VarMap) -> Result<()> {
    check_refresh(group, vars)?;
    for var in vars.values() {
        if let (true, Some(view)) = (var.init_required(), var.view()) {
            view.assign(var.values())?;
        }
    }
    Ok(())
}

/// Validate manual stagings against views that are already bound
pub(crate) fn check_refresh(group: &str, vars: &VarMap) -> Result<()> {
    for var in vars.values() {
        if let (true, Some(view)) = (var.init_required(), var.view()) {
            check_staged_len(group, var.name(), var.values(), view.len())?;
            var.values().check_representable(view.scalar_type())?;
        }
    }
    Ok(())
}

/// Stage values on a declared variable.
///
/// After load, manual values can only be staged where a host view exists.
pub(crate) fn stage_var(
    group: &str,
    vars: &mut VarMap,
    name: &str,
    values: VarValues,
    loaded: bool,
) -> Result<()> {
    let var = vars.get_mut(name).ok_or_else(|| BindError::UnknownVariable {
        group: group.to_string(),
        name: name.to_string(),
    })?;
    if loaded && var.view().is_none() && values.init_required() {
        return Err(BindError::InitOnDeviceOnlyVariable {
            group: group.to_string(),
            name: name.to_string(),
        });
    }
    var.set_values(values);
    Ok(())
}

pub(crate) fn var_view<'a>(group: &str, vars: &'a VarMap, name: &str) -> Result<Option<&'a HostView>> {
    vars.get(name)
        .map(|var| var.view())
        .ok_or_else(|| BindError::UnknownVariable {
            group: group.to_string(),
            name: name.to_string(),
        })
}

// ============================================================================
// EXTRA GLOBAL PARAMETERS
// ============================================================================

/// Validated extra global parameter map, ready to bind
pub(crate) struct EgpPlan {
    entries: Vec<(String, ScalarType)>,
}

pub(crate) fn plan_extra_global_params(precision: Precision, egps: &EgpMap) -> Result<EgpPlan> {
    let mut names: Vec<&String> = egps.keys().collect();
    names.sort();

    let entries = names
        .into_iter()
        .map(|name| {
            let egp = &egps[name];
            let ty = egp.resolved_type(precision)?;
            egp.values().check_representable(ty)?;
            Ok((name.clone(), ty))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(EgpPlan { entries })
}

impl EgpPlan {
    /// Bind every parameter. Scalars get a single-element view; arrays are
    /// allocated, bound, filled and pushed, in that order.
    pub(crate) fn bind(self, runtime: &dyn Runtime, group: &str, egps: &EgpMap) -> Result<EgpBindings> {
        let mut bindings = Vec::with_capacity(self.entries.len());
        for (name, ty) in self.entries {
            let egp = &egps[&name];
            let qualified = qualified_name(&name, group);

            let view = match egp.values() {
                EgpValues::Scalar(value) => {
                    let view = runtime.assign_external_scalar(&qualified, ty)?;
                    view.write_at(0, &[*value])?;
                    view
                }
                EgpValues::Array(values) => {
                    let len = values.len();
                    runtime.allocate_extra_global_param(group, &name, len)?;
                    let view = runtime.assign_external_array(&qualified, len, ty)?;
                    view.write_at(0, &values.to_vec())?;
                    runtime.push_extra_global_param(group, &name, len)?;
                    view
                }
            };
            debug!("Bound extra global parameter '{}' ({} x {})", qualified, egp.len(), ty);
            bindings.push((name, view));
        }
        Ok(bindings)
    }
}

pub(crate) fn publish_extra_global_params(egps: &mut EgpMap, bindings: EgpBindings) {
    for (name, view) in bindings {
        if let Some(egp) = egps.get_mut(&name) {
            egp.bind(view);
        }
    }
}

/// Stage an extra global parameter declared in `decls`
pub(crate) fn stage_egp(
    group: &str,
    egps: &mut EgpMap,
    decls: &[EgpDecl],
    name: &str,
    values: EgpValues,
) -> Result<()> {
    let decl = decls
        .iter()
        .find(|decl| decl.name == name)
        .ok_or_else(|| BindError::UnknownExtraGlobalParam {
            group: group.to_string(),
            name: name.to_string(),
        })?;
    let egp = ExtraGlobalParam::new(name, &decl.type_name, values)?;
    egps.insert(name.to_string(), egp);
    Ok(())
}

// ============================================================================
// GROUP
// ============================================================================

/// State common to every group kind: the group's primary model, its
/// variables and its extra global parameters
#[derive(Debug, Default)]
pub struct Group {
    name: String,
    model: Option<Arc<ModelDescriptor>>,
    param_values: Vec<f64>,
    vars: VarMap,
    extra_global_params: EgpMap,
    state: LoadState,
}

impl Group {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> LoadState {
        self.state
    }

    pub fn is_loaded(&self) -> bool {
        self.state == LoadState::Loaded
    }

    pub fn model(&self) -> Result<&Arc<ModelDescriptor>> {
        self.model
            .as_ref()
            .ok_or_else(|| BindError::ModelNotSet(self.name.clone()))
    }

    pub fn param_values(&self) -> &[f64] {
        &self.param_values
    }

    pub fn vars(&self) -> &VarMap {
        &self.vars
    }

    pub fn extra_global_params(&self) -> &EgpMap {
        &self.extra_global_params
    }

    /// Replace the model; any previously staged extra global parameters are dropped
    pub(crate) fn set_model(
        &mut self,
        descriptor: Arc<ModelDescriptor>,
        param_values: Vec<f64>,
        vars: VarMap,
    ) -> Result<()> {
        self.ensure_unloaded()?;
        self.model = Some(descriptor);
        self.param_values = param_values;
        self.vars = vars;
        self.extra_global_params = HashMap::new();
        Ok(())
    }

    pub fn set_var(&mut self, name: &str, values: impl Into<VarValues>) -> Result<()> {
        let loaded = self.is_loaded();
        stage_var(&self.name, &mut self.vars, name, values.into(), loaded)
    }

    pub fn set_extra_global_param(&mut self, name: &str, values: impl Into<EgpValues>) -> Result<()> {
        self.ensure_unloaded()?;
        let model = self.model()?.clone();
        stage_egp(
            &self.name,
            &mut self.extra_global_params,
            &model.extra_global_params,
            name,
            values.into(),
        )
    }

    pub fn var_view(&self, name: &str) -> Result<Option<&HostView>> {
        var_view(&self.name, &self.vars, name)
    }

    /// Flat copy of a bound variable
    pub fn get_var_values(&self, name: &str) -> Result<Array1<f64>> {
        self.ensure_loaded()?;
        match self.var_view(name)? {
            Some(view) => view.to_f64(),
            None => Err(BindError::DeviceOnlyVariable {
                group: self.name.clone(),
                name: name.to_string(),
            }),
        }
    }

    /// Ordered initialiser bundle handed to the engine at `add_to`
    pub(crate) fn var_init(&self) -> Result<Vec<VarInitialiser>> {
        Ok(var_space_to_vals(&self.model()?.vars, &self.vars))
    }

    /// Validate variables and extra global parameters against `size`
    pub(crate) fn plan(
        &self,
        precision: Precision,
        size: usize,
        location: impl Fn(&str) -> VarLocation,
    ) -> Result<(VarPlan, EgpPlan)> {
        let vars = plan_variables(&self.name, precision, &self.vars, size, location)?;
        let egps = plan_extra_global_params(precision, &self.extra_global_params)?;
        Ok((vars, egps))
    }

    pub(crate) fn bind(
        &self,
        runtime: &dyn Runtime,
        size: usize,
        (vars, egps): (VarPlan, EgpPlan),
    ) -> Result<(VarBindings, EgpBindings)> {
        let var_bindings = vars.bind(runtime, &self.name, size)?;
        copy_variables(&self.vars, &var_bindings)?;
        let egp_bindings = egps.bind(runtime, &self.name, &self.extra_global_params)?;
        Ok((var_bindings, egp_bindings))
    }

    pub(crate) fn publish(&mut self, (vars, egps): (VarBindings, EgpBindings)) {
        publish_variables(&mut self.vars, vars);
        publish_extra_global_params(&mut self.extra_global_params, egps);
        self.state = LoadState::Loaded;
    }

    pub(crate) fn refresh(&self) -> Result<()> {
        self.ensure_loaded()?;
        refresh_variables(&self.name, &self.vars)
    }

    pub(crate) fn ensure_unloaded(&self) -> Result<()> {
        match self.state {
            LoadState::Unloaded => Ok(()),
            LoadState::Loaded => Err(BindError::AlreadyLoaded(self.name.clone())),
        }
    }

    pub(crate) fn ensure_loaded(&self) -> Result<()> {
        match self.state {
            LoadState::Loaded => Ok(()),
            LoadState::Unloaded => Err(BindError::NotLoaded(self.name.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use synbind_core::{ModelRegistry, ModelRole, Variable};
    use synbind_engine::{EngineOp, MemoryEngine, ModelBuilder, NeuronPopulationSpec};

    fn var_map(entries: &[(&str, VarValues)]) -> VarMap {
        entries
            .iter()
            .map(|(name, values)| {
                let mut var = Variable::new(name, "scalar");
                var.set_values(values.clone());
                (name.to_string(), var)
            })
            .collect()
    }

    #[test]
    fn test_plan_rejects_device_only_init() {
        let vars = var_map(&[("V", VarValues::Scalar(-65.0))]);
        let result = plan_variables("Pop", Precision::Float, &vars, 4, |_| VarLocation::DEVICE);
        assert!(matches!(result, Err(BindError::InitOnDeviceOnlyVariable { .. })));

        let vars = var_map(&[("V", VarValues::Unset)]);
        assert!(plan_variables("Pop", Precision::Float, &vars, 4, |_| VarLocation::DEVICE).is_ok());
    }

    #[test]
    fn test_plan_rejects_wrong_length() {
        let vars = var_map(&[("V", VarValues::from(vec![1.0, 2.0]))]);
        let result = plan_variables("Pop", Precision::Float, &vars, 3, |_| VarLocation::HOST_DEVICE);
        assert!(matches!(
            result,
            Err(BindError::SizeMismatch { expected: 3, got: 2, .. })
        ));
    }

    #[test]
    fn test_plan_rejects_unrepresentable_values() {
        let mut count = Variable::new("count", "unsigned int");
        count.set_values(vec![1.0, -2.0]);
        let vars: VarMap = [("count".to_string(), count)].into_iter().collect();
        assert!(matches!(
            plan_variables("Pop", Precision::Float, &vars, 2, |_| VarLocation::HOST_DEVICE),
            Err(BindError::ValueConversion { target: ScalarType::U32, .. })
        ));

        let decls = vec![EgpDecl::new("seeds", "unsigned int*")];
        let mut egps = EgpMap::new();
        stage_egp("Pop", &mut egps, &decls, "seeds", vec![3.0, -1.0].into()).unwrap();
        assert!(matches!(
            plan_extra_global_params(Precision::Float, &egps),
            Err(BindError::ValueConversion { value, .. }) if value == -1.0
        ));
    }

    #[test]
    fn test_refresh_checks_before_copying() {
        let engine = MemoryEngine::default();
        let mut vars = var_map(&[("V", VarValues::Scalar(-65.0))]);
        vars.insert("n".to_string(), Variable::new("n", "unsigned char"));
        let plan = plan_variables("Pop", Precision::Float, &vars, 2, |_| VarLocation::HOST_DEVICE).unwrap();
        let bindings = plan.bind(&engine, "Pop", 2).unwrap();
        copy_variables(&vars, &bindings).unwrap();
        publish_variables(&mut vars, bindings);

        vars.get_mut("V").unwrap().set_values(-70.0);
        vars.get_mut("n").unwrap().set_values(300.0);
        assert!(matches!(
            refresh_variables("Pop", &vars),
            Err(BindError::ValueConversion { .. })
        ));
        assert_eq!(
            vars["V"].view().unwrap().to_f64().unwrap().to_vec(),
            vec![-65.0; 2]
        );
    }

    #[test]
    fn test_bind_copy_and_refresh() {
        let engine = MemoryEngine::default();
        let mut vars = var_map(&[
            ("V", VarValues::Scalar(-65.0)),
            ("U", VarValues::Unset),
            ("W", VarValues::Unset),
        ]);
        let location = |name: &str| {
            if name == "W" {
                VarLocation::DEVICE
            } else {
                VarLocation::HOST_DEVICE
            }
        };

        let plan = plan_variables("Pop", Precision::Float, &vars, 3, location).unwrap();
        let bindings = plan.bind(&engine, "Pop", 3).unwrap();
        copy_variables(&vars, &bindings).unwrap();
        publish_variables(&mut vars, bindings);

        assert!(vars["W"].view().is_none());
        let v = vars["V"].view().unwrap().clone();
        assert_eq!(v.to_f64().unwrap().to_vec(), vec![-65.0; 3]);

        v.write_at(0, &[0.0f64]).unwrap();
        refresh_variables("Pop", &vars).unwrap();
        assert_eq!(v.to_f64().unwrap().to_vec(), vec![-65.0; 3]);
        assert_eq!(vars["U"].view().unwrap().to_f64().unwrap().to_vec(), vec![0.0; 3]);
    }

    #[test]
    fn test_stage_var_after_load_on_device_only() {
        let mut vars = var_map(&[("V", VarValues::Unset)]);
        assert!(stage_var("Pop", &mut vars, "V", VarValues::Scalar(1.0), false).is_ok());
        assert!(matches!(
            stage_var("Pop", &mut vars, "V", VarValues::Scalar(1.0), true),
            Err(BindError::InitOnDeviceOnlyVariable { .. })
        ));
        assert!(matches!(
            stage_var("Pop", &mut vars, "X", VarValues::Scalar(1.0), false),
            Err(BindError::UnknownVariable { .. })
        ));
    }

    #[test]
    fn test_egp_allocate_bind_push_order() {
        let registry = ModelRegistry::with_builtins();
        let model = registry.get(ModelRole::Neuron, "SpikeSourceArray").unwrap();
        let mut engine = MemoryEngine::default();
        engine
            .add_neuron_population(NeuronPopulationSpec {
                name: "Pop".to_string(),
                num_neurons: 2,
                model: model.clone(),
                params: vec![],
                var_init: vec![],
            })
            .unwrap();
        engine.clear_ops();

        let mut egps = EgpMap::new();
        stage_egp("Pop", &mut egps, &model.extra_global_params, "spikeTimes", vec![1.0, 2.0].into())
            .unwrap();
        assert!(matches!(
            stage_egp("Pop", &mut egps, &model.extra_global_params, "rate", 1.0.into()),
            Err(BindError::UnknownExtraGlobalParam { .. })
        ));

        let plan = plan_extra_global_params(Precision::Float, &egps).unwrap();
        let bindings = plan.bind(&engine, "Pop", &egps).unwrap();
        assert_eq!(bindings.len(), 1);
        assert_eq!(
            engine.ops(),
            vec![
                EngineOp::AllocateEgp {
                    group: "Pop".into(),
                    param: "spikeTimes".into(),
                    len: 2
                },
                EngineOp::AssignArray {
                    name: "spikeTimesPop".into(),
                    len: 2
                },
                EngineOp::PushEgp {
                    group: "Pop".into(),
                    param: "spikeTimes".into(),
                    len: 2
                },
            ]
        );
        assert_eq!(
            engine.device_extra_global_param("Pop", "spikeTimes"),
            Some(vec![1.0, 2.0])
        );
    }
}
