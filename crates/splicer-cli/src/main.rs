// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Splicer developer CLI.
//!
//! `splicer concretize` resolves a request against a JSON repository and a
//! set of installs; `splicer check-splice` explains whether one build may
//! stand in for another; `splicer config` prints or seeds the stored
//! concretizer settings.

use std::collections::BTreeSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use splicer_config::{
    ConcretizerConfig, ConfigService, RepositoryDocument, CONCRETIZER_KEY, REPOSITORY_KEY,
};
use splicer_config_fs::FsConfigStore;
use splicer_core::{
    Concretizer, InstallStore, MemoryInstallStore, MemoryRepository, NodeConstraint, Policy,
    SpecNode, SpliceEngine,
};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

mod render;

#[derive(Parser, Debug)]
#[command(name = "splicer", author, version, about = "Concretize dependency requests with ABI splicing")]
struct Cli {
    /// Directory holding stored configs (defaults to the user config dir)
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,
    /// Log more (repeat for trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Resolve a request against the repository and installed specs
    Concretize {
        /// Request, e.g. `splice-t@1 ^splice-h@1.0.2`
        request: String,
        /// Repository document (JSON); defaults to the stored `repository`
        #[arg(long)]
        repo: Option<PathBuf>,
        /// Concretizer config (JSON); defaults to the stored `concretizer`
        #[arg(long)]
        config: Option<PathBuf>,
        /// Install this request before resolving (repeatable)
        #[arg(long = "install")]
        installs: Vec<String>,
        /// Enable the splice fallback regardless of config
        #[arg(long)]
        splice: bool,
        /// Emit JSON instead of tables
        #[arg(long)]
        json: bool,
    },
    /// Explain whether REPLACEMENT may be spliced in for ORIGINAL
    CheckSplice {
        /// Request for the node being replaced
        original: String,
        /// Request for the replacement
        replacement: String,
        /// Repository document (JSON); defaults to the stored `repository`
        #[arg(long)]
        repo: Option<PathBuf>,
        /// Virtual the replaced edge provides (repeatable)
        #[arg(long = "virtual")]
        virtuals: Vec<String>,
    },
    /// Print the effective concretizer config
    Config {
        /// Write the default config when none is stored
        #[arg(long)]
        init: bool,
    },
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let level = match cli.verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.parse()?))
        .with_writer(std::io::stderr)
        .init();

    let store = open_store(cli.config_dir.as_deref())?;
    match cli.command {
        Command::Concretize {
            request,
            repo,
            config,
            installs,
            splice,
            json,
        } => {
            let repository = load_repository(repo.as_deref(), &store)?;
            let mut settings = load_config(config.as_deref(), &store)?;
            if splice {
                settings.splice.automatic = true;
            }
            concretize(&repository, &settings, &request, &installs, json)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::CheckSplice {
            original,
            replacement,
            repo,
            virtuals,
        } => {
            let repository = load_repository(repo.as_deref(), &store)?;
            let settings = load_config(None, &store)?;
            check_splice(&repository, &settings, &original, &replacement, virtuals)
        }
        Command::Config { init } => {
            let service = ConfigService::new(store);
            let settings = match service.load::<ConcretizerConfig>(CONCRETIZER_KEY)? {
                Some(settings) => settings,
                None if init => {
                    let settings = ConcretizerConfig::default();
                    service.save(CONCRETIZER_KEY, &settings)?;
                    info!(path = %service.store().path_for(CONCRETIZER_KEY).display(), "wrote default config");
                    settings
                }
                None => ConcretizerConfig::default(),
            };
            let mut out = std::io::stdout().lock();
            writeln!(out, "{}", serde_json::to_string_pretty(&settings)?)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn open_store(dir: Option<&Path>) -> Result<FsConfigStore> {
    match dir {
        Some(dir) => FsConfigStore::at(dir)
            .with_context(|| format!("open config dir {}", dir.display())),
        None => FsConfigStore::new().context("open user config dir"),
    }
}

fn load_repository(path: Option<&Path>, store: &FsConfigStore) -> Result<MemoryRepository> {
    let doc: RepositoryDocument = match path {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("read repository {}", path.display()))?;
            serde_json::from_str(&text)
                .with_context(|| format!("parse repository {}", path.display()))?
        }
        None => match ConfigService::new(store.clone()).load(REPOSITORY_KEY)? {
            Some(doc) => doc,
            None => bail!(
                "no repository: pass --repo or store one at {}",
                store.path_for(REPOSITORY_KEY).display()
            ),
        },
    };
    debug!(packages = doc.packages.len(), "loaded repository");
    Ok(doc.to_repository()?)
}

fn load_config(path: Option<&Path>, store: &FsConfigStore) -> Result<ConcretizerConfig> {
    match path {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("read config {}", path.display()))?;
            serde_json::from_str(&text).with_context(|| format!("parse config {}", path.display()))
        }
        None => Ok(ConfigService::new(store.clone()).load_or_default(CONCRETIZER_KEY)?),
    }
}

fn concretize(
    repo: &MemoryRepository,
    settings: &ConcretizerConfig,
    request: &str,
    installs: &[String],
    json: bool,
) -> Result<()> {
    let mut installed = MemoryInstallStore::new();
    let installer = Concretizer::new(repo, Policy::default());
    for text in installs {
        let spec = installer
            .concretize_str(text, &installed.snapshot())
            .with_context(|| format!("install `{text}`"))?
            .spec;
        info!(spec = %spec, hash = %spec.hash().short(), "installed");
        installed.install(&spec);
    }

    let policy = settings.to_policy()?;
    let resolution = Concretizer::new(repo, policy)
        .concretize_str(request, &installed.snapshot())
        .with_context(|| format!("concretize `{request}`"))?;

    let mut out = std::io::stdout().lock();
    if json {
        writeln!(out, "{}", serde_json::to_string_pretty(&render::resolution_json(&resolution))?)?;
    } else {
        write!(out, "{}", render::resolution_text(&resolution))?;
    }
    Ok(())
}

fn check_splice(
    repo: &MemoryRepository,
    settings: &ConcretizerConfig,
    original: &str,
    replacement: &str,
    virtuals: Vec<String>,
) -> Result<ExitCode> {
    let builder = Concretizer::new(repo, Policy::default());
    let empty = MemoryInstallStore::new().snapshot();
    let original = builder
        .concretize_str(original, &empty)
        .with_context(|| format!("concretize `{original}`"))?
        .spec;
    let replacement = builder
        .concretize_str(replacement, &empty)
        .with_context(|| format!("concretize `{replacement}`"))?
        .spec;

    let policy = settings.to_policy()?;
    let engine = SpliceEngine::new(repo, policy.splice.match_variants);
    let replacement_root: &Arc<SpecNode> = replacement.root();
    let goal = NodeConstraint::named(replacement_root.name());
    let virtuals: BTreeSet<String> = virtuals.into_iter().collect();

    let mut out = std::io::stdout().lock();
    match engine.check_eligible(original.root(), replacement_root, &goal, &virtuals) {
        Ok(selector) => {
            writeln!(
                out,
                "eligible: {} may replace {} (match variants: {selector})",
                replacement_root.identity(),
                original.root().identity()
            )?;
            Ok(ExitCode::SUCCESS)
        }
        Err(reason) => {
            writeln!(out, "not eligible: {reason}")?;
            Ok(ExitCode::FAILURE)
        }
    }
}
