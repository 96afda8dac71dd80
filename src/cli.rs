//! Minimal CLI: registry file in → (generate | roundtrip | bind)
use std::path::PathBuf;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use rayon::prelude::*;

use crate::load;
use crate::shape::{Registry, ShapeId};

// ————————————————————————————————————————————————————————————————————————————
// TYPES
// ————————————————————————————————————————————————————————————————————————————

/// derive codecs, generators and binders from shape registries
#[derive(Parser, Debug)]
pub struct CommandLineInterface {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// generate random values for a shape and print them as JSON
    Generate(GenerateArgs),
    /// decode JSON inputs, push them through the binary codec, and re-encode
    Roundtrip(RoundtripArgs),
    /// bind a config file to a shape
    Bind(BindArgs),
}

#[derive(Args, Debug, Clone)]
struct RegistrySettings {
    /// shape registry .json file
    #[arg(long, short)]
    registry: PathBuf,

    /// root shape name within the registry
    #[arg(long)]
    root: String,
}

#[derive(Args, Debug)]
struct GenerateArgs {
    #[command(flatten)]
    registry_settings: RegistrySettings,

    /// PRNG seed; all values draw from one stream
    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// size budget per value
    #[arg(long, default_value_t = 4)]
    budget: u32,

    /// number of values to generate
    #[arg(long, short = 'n', default_value_t = 1)]
    count: u64,

    /// output .json file (stdout if omitted)
    #[arg(short, long)]
    out: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct RoundtripArgs {
    #[command(flatten)]
    registry_settings: RegistrySettings,

    /// One or more inputs. May be literal paths or quoted glob patterns
    #[arg(long, short, num_args = 1.., required = true)]
    input: Vec<String>,
}

#[derive(Args, Debug)]
struct BindArgs {
    #[command(flatten)]
    registry_settings: RegistrySettings,

    /// hierarchical config .json file
    #[arg(long, short)]
    config: PathBuf,

    /// output .json file (stdout if omitted)
    #[arg(short, long)]
    out: Option<PathBuf>,
}

// ————————————————————————————————————————————————————————————————————————————
// IMPLEMENTATION
// ————————————————————————————————————————————————————————————————————————————

impl RegistrySettings {
    fn load(&self) -> anyhow::Result<(Registry, ShapeId)> {
        let registry = load::load_registry(&self.registry)?;
        let root = registry
            .find(&self.root)
            .with_context(|| format!("no shape named `{}` in {}", self.root, self.registry.display()))?;
        Ok((registry, root))
    }
}

impl CommandLineInterface {
    pub fn load() -> Self {
        Self::parse()
    }

    pub fn run(&self) -> anyhow::Result<()> {
        match &self.cmd {
            Command::Generate(target) => {
                let (registry, root) = target.registry_settings.load()?;
                let generator = crate::random::generator(&registry, root)?;
                let encoder = crate::json::codec(&registry, root)?;

                let mut rng = crate::random::Rng::new(target.seed);
                let mut out = Vec::with_capacity(target.count as usize);
                for _ in 0..target.count {
                    let value = generator.generate_with(&mut rng, target.budget);
                    out.push((encoder.encode)(&value)?);
                }
                let rendered = serde_json::to_string_pretty(&out)?;
                write_output(target.out.as_deref(), &rendered)
            }
            Command::Roundtrip(target) => {
                let (registry, root) = target.registry_settings.load()?;
                let json = crate::json::codec(&registry, root)?;
                let binary = crate::binary::codec(&registry, root)?;
                let paths = load::resolve_file_path_patterns(&target.input)?;

                // Artifacts are immutable; each input roundtrips on its own
                // rayon worker.
                let reports: Vec<String> = paths
                    .par_iter()
                    .map(|path| {
                        let outcome = (|| -> anyhow::Result<()> {
                            let doc = load::load_json(path)?;
                            let value = (json.decode)(&doc)?;
                            let bytes = binary.to_bytes(&value)?;
                            let back = binary.from_bytes(&bytes)?;
                            anyhow::ensure!(
                                back == value,
                                "binary roundtrip diverged ({} wire bytes)",
                                bytes.len()
                            );
                            anyhow::ensure!(
                                (json.encode)(&back)? == doc,
                                "json re-encoding diverged from input"
                            );
                            Ok(())
                        })();
                        match outcome {
                            Ok(()) => format!("ok   {}", path.display()),
                            Err(e) => format!("FAIL {}: {e:#}", path.display()),
                        }
                    })
                    .collect();

                let mut failed = false;
                for report in &reports {
                    println!("{report}");
                    failed |= report.starts_with("FAIL");
                }
                anyhow::ensure!(!failed, "one or more inputs failed to roundtrip");
                Ok(())
            }
            Command::Bind(target) => {
                let (registry, root) = target.registry_settings.load()?;
                let binder = crate::config::binder(&registry, root)?;
                let encoder = crate::json::codec(&registry, root)?;

                let tree = load::load_json(&target.config)?;
                let value = binder.bind(&tree)?;
                let rendered = serde_json::to_string_pretty(&(encoder.encode)(&value)?)?;
                write_output(target.out.as_deref(), &rendered)
            }
        }
    }
}

// ————————————————————————————————————————————————————————————————————————————
// INTERNAL HELPERS
// ————————————————————————————————————————————————————————————————————————————

fn write_output(out: Option<&std::path::Path>, rendered: &str) -> anyhow::Result<()> {
    if let Some(out) = out {
        if let Some(parent) = out.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        std::fs::write(out, rendered)
            .with_context(|| format!("failed to write {}", out.display()))?;
    } else {
        println!("{rendered}");
    }
    Ok(())
}
