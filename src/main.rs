use std::{fs, path::PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Registry};
use zk_circuit_pipeline::{
    bin_loader::save_bytes,
    deploy::DeploymentManifest,
    export::TargetPlatform,
    scalar, Argument, CircuitCatalog, CompileOptions, Pipeline, PipelineConfig, ProofSystem,
};

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// TOML pipeline configuration
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Overrides the configured proof system
    #[arg(long, global = true)]
    proof_system: Option<ProofSystem>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Lists the built-in circuit variants
    List,

    /// Compiles a circuit and prints its size
    Compile {
        name: String,
        /// Persists the compiled artifact
        #[arg(long, short = 'o')]
        out: Option<PathBuf>,
        /// Replaces an artifact with different provenance
        #[arg(long)]
        overwrite: bool,
    },

    /// Runs compile, witness, setup, prove and verify
    Prove {
        name: String,
        /// Argument in declaration order; arrays are comma separated
        #[arg(long = "arg", value_name = "VALUE", allow_hyphen_values = true)]
        args: Vec<String>,
        /// Writes the encoded proof
        #[arg(long)]
        proof_out: Option<PathBuf>,
    },

    /// Exports direct and wrapped verifiers plus a deployment manifest
    Export {
        /// Variants to export; all of them when empty
        names: Vec<String>,
        #[arg(long, short = 'd', default_value = "verifiers")]
        dir: PathBuf,
        #[arg(long, default_value = "solidity")]
        target: TargetPlatform,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = Registry::default()
        .with(filter)
        .with(fmt::layer().with_target(false));
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        eprintln!("a tracing subscriber is already installed");
    }
}

fn parse_argument(raw: &str) -> Argument {
    let trimmed = raw.trim();
    let inner = trimmed
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'));
    match inner {
        Some(list) => Argument::array(list.split(',').map(str::trim).filter(|v| !v.is_empty())),
        None if trimmed.contains(',') => Argument::array(trimmed.split(',').map(str::trim)),
        None => Argument::from(trimmed),
    }
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => PipelineConfig::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    if let Some(proof_system) = cli.proof_system {
        config.proof_system = proof_system;
    }
    let pipeline = Pipeline::new(config)?;
    let catalog = CircuitCatalog::builtin();

    match cli.command {
        Command::List => {
            for definition in catalog.iter() {
                println!(
                    "{:<38} {:<40} {}",
                    definition.name, definition.contract_name, definition.signature
                );
            }
        }
        Command::Compile {
            name,
            out,
            overwrite,
        } => {
            let definition = catalog.get(&name)?;
            let options = CompileOptions {
                output_location: out,
                overwrite,
                ..Default::default()
            };
            let artifact = pipeline.compile(&definition, &options)?;
            let metadata = &artifact.metadata;
            println!("artifact     {}", artifact.id());
            println!("proof system {}", artifact.provenance.proof_system);
            println!("constraints  {}", metadata.num_constraints);
            println!("variables    {}", metadata.num_variables);
            println!("public       {}", metadata.num_public_inputs);
            println!("private      {}", metadata.num_private_arguments);
            println!("non-zero     {}", metadata.num_non_zero_entries);
        }
        Command::Prove {
            name,
            args,
            proof_out,
        } => {
            let definition = catalog.get(&name)?;
            let arguments: Vec<Argument> = args.iter().map(|raw| parse_argument(raw)).collect();
            let run = pipeline.run(&definition, &arguments)?;
            let outputs: Vec<String> = run.outputs().iter().map(scalar::to_decimal).collect();
            println!("outputs  [{}]", outputs.join(", "));
            println!("key      {}", run.keys.key_id());
            println!("verified {}", run.verified);
            if let Some(path) = proof_out {
                let bytes = run.proof.to_bytes()?;
                save_bytes(&bytes, &path)?;
                info!(path = %path.display(), size = bytes.len(), "proof written");
            }
            if !run.verified {
                bail!("proof for `{name}` did not verify");
            }
        }
        Command::Export { names, dir, target } => {
            let definitions = if names.is_empty() {
                catalog.iter().cloned().collect::<Vec<_>>()
            } else {
                names
                    .iter()
                    .map(|name| catalog.get(name))
                    .collect::<Result<Vec<_>, _>>()?
            };
            fs::create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;

            let mut manifest = DeploymentManifest::default();
            for definition in definitions {
                let artifact = pipeline.compile(&definition, &CompileOptions::default())?;
                let keys = pipeline.setup(&artifact)?;
                let unit = pipeline.deployment_unit(&artifact, &keys, target)?;
                for verifier in [&unit.direct, &unit.wrapped] {
                    let path = dir.join(verifier.file_name());
                    save_bytes(verifier.source.as_bytes(), &path)?;
                    println!("{}", path.display());
                }
                manifest.units.push(unit);
            }
            let path = dir.join("deployment.json");
            save_bytes(manifest.to_json()?.as_bytes(), &path)?;
            println!("{}", path.display());
        }
    }
    Ok(())
}
