//! # Synbind CLI
//!
//! Command-line tools for inspecting ragged layouts and binding summaries.

use anyhow::Context;
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use synbind_core::{BindingConfig, MatrixType, ModelInit, ModelRegistry, ModelRole, VarInitialiser};
use synbind_engine::MemoryEngine;
use synbind_groups::{CurrentSource, NeuronGroup, SynapseGroup};

#[derive(Parser)]
#[command(name = "synbind")]
#[command(author = "Yatrogenesis")]
#[command(version = "0.1.0")]
#[command(about = "Host-side data binding for spiking network engines", long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the padded ragged layout of a connection list
    Ragged {
        /// Number of presynaptic neurons
        #[arg(short, long)]
        source_size: usize,
        /// Number of postsynaptic neurons (defaults to one past the largest index)
        #[arg(short, long)]
        target_size: Option<usize>,
        /// Presynaptic indices, comma separated
        #[arg(long, value_delimiter = ',', required = true)]
        pre: Vec<u32>,
        /// Postsynaptic indices, comma separated
        #[arg(long, value_delimiter = ',', required = true)]
        post: Vec<u32>,
        /// Weights in connection order, comma separated
        #[arg(short, long, value_delimiter = ',')]
        weights: Vec<f64>,
    },

    /// List built-in models
    Models,

    /// Build, load and reinitialise a small network
    Demo {
        /// Binding configuration (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Matrix type of the excitatory projection
        #[arg(short, long, default_value = "SPARSE_INDIVIDUALG")]
        matrix_type: MatrixType,
    },
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Ragged {
            source_size,
            target_size,
            pre,
            post,
            weights,
        } => ragged(source_size, target_size, &pre, &post, weights)?,

        Commands::Models => {
            let registry = ModelRegistry::with_builtins();
            println!("{}", "Built-in Models:".green().bold());
            for role in [
                ModelRole::Neuron,
                ModelRole::WeightUpdate,
                ModelRole::Postsynaptic,
                ModelRole::CurrentSource,
            ] {
                println!();
                println!("  {}", role.to_string().cyan());
                for kind in registry.kinds(role) {
                    let model = registry.get(role, kind)?;
                    let vars: Vec<&str> = model.vars.iter().map(|v| v.name.as_str()).collect();
                    println!("    {:<28} params: [{}]  vars: [{}]", kind, model.param_names.join(", "), vars.join(", "));
                }
            }
        }

        Commands::Demo {
            config,
            matrix_type,
        } => {
            let config = match config {
                Some(path) => BindingConfig::from_json_file(&path)
                    .with_context(|| format!("reading config {}", path.display()))?,
                None => BindingConfig::default(),
            };
            debug!("Binding config: {:?}", config);
            demo(config, matrix_type)?;
        }
    }

    Ok(())
}

fn ragged(
    source_size: usize,
    target_size: Option<usize>,
    pre: &[u32],
    post: &[u32],
    weights: Vec<f64>,
) -> anyhow::Result<()> {
    let registry = ModelRegistry::with_builtins();
    let mut engine = MemoryEngine::default();
    let target_size = target_size.unwrap_or_else(|| post.iter().max().map_or(1, |&m| m as usize + 1));

    let mut source = NeuronGroup::new("Pre");
    source.set_model(&registry, "SpikeSourceArray", &ModelInit::new())?;
    source.add_to(&mut engine, source_size)?;
    let mut target = NeuronGroup::new("Post");
    target.set_model(&registry, "SpikeSourceArray", &ModelInit::new())?;
    target.add_to(&mut engine, target_size)?;

    let weights = if weights.is_empty() {
        vec![1.0; pre.len()]
    } else {
        weights
    };
    let mut syn = SynapseGroup::new("Syn", MatrixType::ragged_individual());
    syn.set_connected_populations(&source, &target)?;
    syn.set_weight_update(&registry, "StaticPulse", &ModelInit::new().var("g", weights))?;
    syn.set_post_syn(&registry, "DeltaCurr", &ModelInit::new())?;
    syn.set_sparse_connections(pre, post)?;
    syn.add_to(&mut engine, 0)?;
    syn.load(&engine)?;

    let stride = syn.max_row_length()?;
    let padding = f64::from(engine.config().ragged_padding);
    let ind = syn
        .index_view()
        .context("index buffer was not bound")?
        .to_f64()?;
    let g = syn
        .var_view("g")?
        .context("weight buffer was not bound")?
        .to_f64()?;

    println!("{} {} synapses", "Ragged layout:".green().bold(), syn.num_synapses()?);
    println!("  Max row length: {}", stride.to_string().cyan());
    for row in 0..source_size {
        let slots = (row * stride)..((row + 1) * stride);
        let cells: Vec<String> = slots
            .map(|i| {
                if ind[i] == padding {
                    "_".to_string()
                } else {
                    format!("{}:{}", ind[i], g[i])
                }
            })
            .collect();
        println!("  row {:>4}  [{}]", row, cells.join(" "));
    }
    Ok(())
}

fn demo(config: BindingConfig, matrix_type: MatrixType) -> anyhow::Result<()> {
    let registry = ModelRegistry::with_builtins();
    let mut engine = MemoryEngine::new(config);

    println!("{}", "Building network".green().bold());

    let mut input = NeuronGroup::new("Input");
    input.set_model(
        &registry,
        "Poisson",
        &ModelInit::new()
            .param("rate", 20.0)
            .var("timeStepToSpike", 0.0),
    )?;
    input.add_to(&mut engine, 8)?;

    let mut exc = NeuronGroup::new("Exc");
    exc.set_model(
        &registry,
        "Izhikevich",
        &ModelInit::new()
            .param("a", 0.02)
            .param("b", 0.2)
            .param("c", -65.0)
            .param("d", 8.0)
            .var("V", -65.0)
            .var("U", -13.0),
    )?;
    exc.add_to(&mut engine, 4)?;

    let mut syn = SynapseGroup::new("InputExc", matrix_type);
    syn.set_connected_populations(&input, &exc)?;
    let stdp = ModelInit::new()
        .param("tauPlus", 20.0)
        .param("tauMinus", 20.0)
        .param("Aplus", 0.01)
        .param("Aminus", 0.012)
        .param("Wmin", 0.0)
        .param("Wmax", 1.0)
        .pre_var("preTrace", 0.0)
        .post_var("postTrace", 0.0);
    if matrix_type.is_ragged() {
        let pre: Vec<u32> = (0..8).collect();
        let post: Vec<u32> = (0..8).map(|i| i % 4).collect();
        let weights: Vec<f64> = (0..8).map(|i| 0.125 * f64::from(i + 1)).collect();
        syn.set_weight_update(&registry, "STDP", &stdp.var("g", weights))?;
        syn.set_sparse_connections(&pre, &post)?;
    } else {
        syn.set_weight_update(&registry, "STDP", &stdp.var("g", VarInitialiser::Constant(0.5)))?;
    }
    syn.set_post_syn(&registry, "ExpCurr", &ModelInit::new().param("tau", 5.0))?;
    syn.add_to(&mut engine, 2)?;

    let mut stim = CurrentSource::new("Bias");
    stim.set_model(&registry, "DC", &ModelInit::new().param("amp", 0.5))?;
    stim.add_to(&mut engine, &exc)?;

    println!("{}", "Loading".green().bold());
    input.load(&engine)?;
    exc.load(&engine)?;
    syn.load(&engine)?;
    stim.load(&engine)?;

    println!("  {} {} neurons, {} delay slots", "Input".cyan(), input.size()?, input.delay_slots()?);
    println!("  {} {} neurons, {} delay slots", "Exc".cyan(), exc.size()?, exc.delay_slots()?);
    match syn.weight_update_var_size() {
        Ok(size) => println!("  {} {} ({} synapse slots)", "InputExc".cyan(), syn.matrix_type(), size),
        Err(_) => println!("  {} {}", "InputExc".cyan(), syn.matrix_type()),
    }
    if matrix_type.is_ragged() {
        println!("    max row length: {}", syn.max_row_length()?);
    }
    if let Ok(g) = syn.get_var_values("g") {
        println!("    g: {:?}", g.to_vec());
    }
    println!("  {} targets {} neurons", "Bias".cyan(), stim.size()?);

    engine.emit_spikes("Input", &[1, 5])?;
    println!("  Input spikes: {:?}", &*input.current_spikes()?);

    println!("{}", "Reinitialising".green().bold());
    if let Some(v) = exc.var_view("V")? {
        v.write_at(0, &[-40.0f64])?;
    }
    exc.reinitialise()?;
    syn.reinitialise()?;
    stim.reinitialise()?;
    if let Ok(v) = exc.get_var_values("V") {
        println!("  Exc V: {:?}", v.to_vec());
    }

    println!();
    println!("{} {} engine operations", "Done:".green().bold(), engine.ops().len());
    Ok(())
}
