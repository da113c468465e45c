//! # Synbind Groups
//!
//! Neuron populations, synaptic projections and current sources bound to
//! engine memory.
//!
//! ## Lifecycle
//!
//! | Step | Call |
//! |------|------|
//! | Model assignment | `set_model` / `set_weight_update` / `set_post_syn` |
//! | Staging | `set_var`, `set_extra_global_param`, role-specific setters |
//! | Connectivity (ragged) | `set_sparse_connections` or `set_connectivity_initialiser` |
//! | Engine wiring | `add_to` |
//! | First bind | `load` (once) |
//! | Refresh | `reinitialise` (any number of times) |
//!
//! ## Example
//!
//! ```no_run
//! use synbind_core::{MatrixType, ModelInit, ModelRegistry};
//! use synbind_engine::MemoryEngine;
//! use synbind_groups::{NeuronGroup, SynapseGroup};
//!
//! # fn main() -> synbind_core::Result<()> {
//! let registry = ModelRegistry::with_builtins();
//! let mut engine = MemoryEngine::default();
//!
//! let mut pre = NeuronGroup::new("Pre");
//! pre.set_model(&registry, "Poisson", &ModelInit::new().param("rate", 10.0))?;
//! pre.add_to(&mut engine, 2)?;
//! let mut post = NeuronGroup::new("Post");
//! post.set_model(&registry, "Poisson", &ModelInit::new().param("rate", 10.0))?;
//! post.add_to(&mut engine, 4)?;
//!
//! let mut syn = SynapseGroup::new("Syn", MatrixType::ragged_individual());
//! syn.set_connected_populations(&pre, &post)?;
//! syn.set_weight_update(&registry, "StaticPulse", &ModelInit::new().var("g", vec![0.1, 0.2, 0.3]))?;
//! syn.set_post_syn(&registry, "DeltaCurr", &ModelInit::new())?;
//! syn.set_sparse_connections(&[1, 0, 1], &[2, 0, 3])?;
//! syn.add_to(&mut engine, 0)?;
//!
//! pre.load(&engine)?;
//! post.load(&engine)?;
//! syn.load(&engine)?;
//! assert_eq!(syn.get_sparse_post_inds()?, vec![0, 2, 3]);
//! # Ok(())
//! # }
//! ```

pub mod connectivity;
pub mod current_source;
pub mod group;
pub mod neuron_group;
pub mod synapse_group;

pub use connectivity::SparseConnections;
pub use current_source::CurrentSource;
pub use group::{Group, LoadState};
pub use neuron_group::NeuronGroup;
pub use synapse_group::SynapseGroup;
