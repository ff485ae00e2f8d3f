//! CLI Command Implementations
//!
//! Implements the actual logic for each CLI command.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::info;

use super::{BackendKind, UpscaleArgs};
use crate::config::Config;
use crate::dispatch::Dispatcher;
use crate::engine::{BridgeBackend, EngineBackend, MockBackend};
use crate::error::Result;
use crate::registry::{self, ModelFamily};
use crate::weights::{HttpFetcher, WeightCache};

/// Configuration from `--config` if given, else defaults; environment
/// overrides apply either way.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Config::load(path),
        None => Ok(Config::from_env()),
    }
}

fn backend(kind: BackendKind, config: &Config) -> Result<Arc<dyn EngineBackend>> {
    Ok(match kind {
        BackendKind::Bridge => Arc::new(BridgeBackend::from_config(config)?),
        BackendKind::Mock => Arc::new(MockBackend::new()),
    })
}

fn weight_cache(config: &Config) -> WeightCache {
    WeightCache::new(
        config.weights_dir.clone(),
        Arc::new(HttpFetcher::new(config.download_timeout())),
    )
}

/// Where to write the result: an explicit file, a directory, or next to
/// the input.
fn output_path(input: &Path, output: Option<&Path>, file_name: &str) -> PathBuf {
    match output {
        Some(path) if path.is_dir() || path.extension().is_none() => path.join(file_name),
        Some(path) => path.to_path_buf(),
        None => input
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(file_name),
    }
}

/// Restore one image file.
pub fn upscale(config: &Config, args: &UpscaleArgs) -> Result<()> {
    info!("Upscaling {} with {}", args.input.display(), args.model);

    let dispatcher = Dispatcher::from_config(config, backend(args.backend, config)?);
    let bytes = std::fs::read(&args.input)?;
    let file_name = args
        .input
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let output = dispatcher.restore_encoded(&bytes, &file_name, args.family, &args.model, args.options())?;

    let destination = output_path(&args.input, args.output.as_deref(), &output.file_name);
    if let Some(parent) = destination.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&destination, &output.bytes)?;

    println!(
        "Saved {} ({}x{}, {} ms)",
        destination.display(),
        output.dimensions.0,
        output.dimensions.1,
        output.elapsed_ms
    );
    Ok(())
}

/// Print the model table.
pub fn list_models(json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(registry::all())?);
        return Ok(());
    }

    for family in ModelFamily::ALL {
        let status = if family.is_dispatchable() { "" } else { " (not implemented)" };
        println!("{}{}", family, status);
        for identifier in family.identifiers() {
            match registry::describe(identifier) {
                Ok(descriptor) => println!(
                    "  {:<28} x{}  {}{}",
                    identifier,
                    descriptor.native_scale,
                    descriptor.family.as_str(),
                    if descriptor.supports_denoise_blend() { "  denoise" } else { "" }
                ),
                Err(_) => println!("  {}", identifier),
            }
        }
    }
    Ok(())
}

/// Download weights for `models` (all when empty).
pub fn fetch(config: &Config, models: &[String], face: bool) -> Result<()> {
    let cache = weight_cache(config);
    let descriptors = if models.is_empty() {
        registry::all().iter().collect::<Vec<_>>()
    } else {
        models
            .iter()
            .map(|m| registry::describe(m))
            .collect::<Result<Vec<_>>>()?
    };

    for descriptor in descriptors {
        // Any strength below 1 pulls in the denoise companion too.
        let resolved = cache.resolve(descriptor, None, 0.5)?;
        for path in resolved.paths() {
            println!("{}", path.display());
        }
    }
    if face {
        println!("{}", cache.resolve_face_weights()?.display());
    }
    Ok(())
}

/// List the weight cache.
pub fn show_cache(config: &Config) -> Result<()> {
    let cache = weight_cache(config);
    let files = cache.cached_files()?;
    println!("Weights directory: {}", cache.dir().display());
    if files.is_empty() {
        println!("  (empty)");
    }
    for file in files {
        let source = file
            .manifest
            .as_ref()
            .map(|m| format!("sha256 {} from {}", &m.sha256[..12.min(m.sha256.len())], m.source_url))
            .unwrap_or_else(|| "no manifest".to_string());
        println!("  {:<36} {:>12} bytes  {}", file.path.display(), file.bytes, source);
    }
    Ok(())
}
