//! dexproto - Recover protobuf-lite message definitions from decompiled classes
//!
//! This tool reads classes exported from a disassembler, finds the schema
//! method of each requested protobuf-lite class, and reconstructs
//! human-readable `message` definitions for it and every message it reaches.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, ValueEnum};
use dexproto_core::signature;
use dexproto_core::{CommandDecoder, ComposerConfig, DexDump, ParseOutcome, ProtoParser};
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn, Level};
use tracing_subscriber::EnvFilter;

/// Recover protobuf-lite message definitions from decompiled Android classes
#[derive(Parser, Debug)]
#[command(name = "dexproto")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Class dump: a JSON file or a directory of JSON files
    #[arg(short, long, env = "DEXPROTO_DUMP")]
    dump: PathBuf,

    #[command(flatten)]
    selection: ClassSelection,

    /// Program that decodes message-info strings
    #[arg(long, env = "DEXPROTO_DECODER")]
    decoder: PathBuf,

    /// Extra argument passed to the decoder before the message-info string
    #[arg(long = "decoder-arg", allow_hyphen_values = true)]
    decoder_args: Vec<String>,

    /// Output directory for .proto files (default: print to stdout)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Output format
    #[arg(long, value_enum, default_value = "proto")]
    format: OutputFormat,

    /// Indentation of field lines
    #[arg(long, default_value = "\t")]
    indent: String,

    /// Maximum nesting depth of composed messages
    #[arg(long, default_value = "64")]
    max_depth: usize,

    /// Dry run - don't write files, just show what would be written
    #[arg(long)]
    dry_run: bool,

    /// Overwrite existing files without prompting
    #[arg(long)]
    force: bool,

    /// Conflict resolution strategy for same-name different-content messages
    #[arg(long, value_enum, default_value = "hash-suffix")]
    conflict_strategy: ConflictStrategy,
}

#[derive(Args, Debug)]
#[group(required = true, multiple = false)]
struct ClassSelection {
    /// Class to parse (`Lcom/a/B;`, `com.a.B` or `com/a/B`); repeatable
    #[arg(short, long = "class")]
    classes: Vec<String>,

    /// Try every class in the dump
    #[arg(short, long)]
    all: bool,
}

/// Output format for recovered definitions
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    /// Proto message definitions
    Proto,
    /// One JSON parse outcome per line
    Json,
}

/// Strategy for resolving naming conflicts
#[derive(Debug, Clone, Copy, ValueEnum)]
enum ConflictStrategy {
    /// Append a short content hash: Foo~a1b2c3d4.proto
    HashSuffix,
    /// Append the class package: Foo~com_example.proto
    PackageSuffix,
    /// Skip conflicting files (keep first occurrence only)
    SkipConflicts,
}

/// Tracks written definitions for deduplication
#[derive(Default)]
struct ProtoRegistry {
    /// Maps file name -> content hashes of the variants written for it
    seen: HashMap<String, Vec<String>>,
    /// Statistics
    stats: RegistryStats,
}

#[derive(Default)]
struct RegistryStats {
    parsed: usize,
    failed: usize,
    duplicates_skipped: usize,
    conflicts_renamed: usize,
    written: usize,
}

impl ProtoRegistry {
    fn new() -> Self {
        Self::default()
    }

    /// Compute a short hash of the content (first 8 chars of blake3)
    fn content_hash(content: &str) -> String {
        let hash = blake3::hash(content.as_bytes());
        hash.to_hex()[..8].to_string()
    }

    /// Check if this exact content was already seen for this file name
    fn is_duplicate(&self, filename: &str, content_hash: &str) -> bool {
        self.seen
            .get(filename)
            .map(|hashes| hashes.iter().any(|h| h == content_hash))
            .unwrap_or(false)
    }

    /// Get the number of variants we've seen for this file name
    fn variant_count(&self, filename: &str) -> usize {
        self.seen.get(filename).map(|e| e.len()).unwrap_or(0)
    }

    /// Register a definition and return the resolved output path
    fn register(
        &mut self,
        class_signature: &str,
        content_hash: &str,
        output_dir: &Path,
        strategy: ConflictStrategy,
    ) -> Option<PathBuf> {
        let filename = format!("{}.proto", signature::simple_name(class_signature));

        if self.is_duplicate(&filename, content_hash) {
            debug!("Skipping duplicate: {} (hash: {})", filename, content_hash);
            self.stats.duplicates_skipped += 1;
            return None;
        }

        let output_path = if self.variant_count(&filename) == 0 {
            output_dir.join(&filename)
        } else {
            match strategy {
                ConflictStrategy::SkipConflicts => {
                    debug!(
                        "Skipping conflict: {} (different content, hash: {})",
                        filename, content_hash
                    );
                    self.stats.duplicates_skipped += 1;
                    return None;
                }
                ConflictStrategy::HashSuffix => {
                    let new_name = Self::add_suffix(&filename, &format!("~{}", content_hash));
                    info!(
                        "Conflict resolved: {} -> {} (content differs)",
                        filename, new_name
                    );
                    self.stats.conflicts_renamed += 1;
                    output_dir.join(new_name)
                }
                ConflictStrategy::PackageSuffix => {
                    let package = Self::package_tag(class_signature);
                    let new_name = Self::add_suffix(&filename, &format!("~{}", package));
                    info!(
                        "Conflict resolved: {} -> {} (from {})",
                        filename, new_name, class_signature
                    );
                    self.stats.conflicts_renamed += 1;
                    output_dir.join(new_name)
                }
            }
        };

        self.seen
            .entry(filename)
            .or_default()
            .push(content_hash.to_string());

        Some(output_path)
    }

    /// Add a suffix before the .proto extension
    fn add_suffix(filename: &str, suffix: &str) -> String {
        if let Some(stem) = filename.strip_suffix(".proto") {
            format!("{}{}.proto", stem, suffix)
        } else {
            format!("{}{}", filename, suffix)
        }
    }

    /// Package of a class as a file name fragment: `com_example`
    fn package_tag(class_signature: &str) -> String {
        let binary = signature::binary_name(class_signature);
        match binary.rsplit_once('/') {
            Some((package, _)) => package.replace('/', "_"),
            None => "default".to_string(),
        }
    }

    fn print_summary(&self) {
        info!(
            "Summary: {} parsed, {} failed, {} duplicates skipped, {} conflicts renamed, {} written",
            self.stats.parsed,
            self.stats.failed,
            self.stats.duplicates_skipped,
            self.stats.conflicts_renamed,
            self.stats.written
        );
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.into()))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    run(&cli)
}

fn run(cli: &Cli) -> Result<()> {
    let dump = DexDump::load(&cli.dump)
        .with_context(|| format!("Failed to load class dump: {}", cli.dump.display()))?;
    if dump.is_empty() {
        bail!("Class dump contains no classes: {}", cli.dump.display());
    }
    info!("Loaded {} classes", dump.len());

    let decoder = CommandDecoder::new(&cli.decoder).args(cli.decoder_args.iter().cloned());
    let config = ComposerConfig::new()
        .indent_str(cli.indent.clone())
        .max_depth(cli.max_depth);
    let parser = ProtoParser::new(&dump, &decoder).with_config(config);

    let signatures: Vec<String> = if cli.selection.all {
        dump.signatures().into_iter().map(str::to_string).collect()
    } else {
        cli.selection.classes.clone()
    };

    let mut registry = ProtoRegistry::new();
    let mut stdout = std::io::stdout().lock();

    for class_signature in &signatures {
        let outcome = match parser.parse_class(class_signature) {
            Ok(outcome) => outcome,
            Err(e) if cli.selection.all => {
                warn!("Error parsing {}: {}", class_signature, e);
                registry.stats.failed += 1;
                continue;
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to parse {}", class_signature));
            }
        };

        if outcome.success {
            registry.stats.parsed += 1;
        } else {
            registry.stats.failed += 1;
            if cli.selection.all && cli.format == OutputFormat::Proto {
                debug!(
                    "Skipping {}: {}",
                    outcome.class_signature,
                    outcome.error.as_deref().unwrap_or("unknown error")
                );
                continue;
            }
            error!(
                "{}: {}",
                outcome.class_signature,
                outcome.error.as_deref().unwrap_or("unknown error")
            );
        }

        emit(cli, &outcome, &mut registry, &mut stdout)?;
    }

    if cli.output.is_some() && !cli.dry_run {
        registry.print_summary();
    }

    if !cli.selection.all && registry.stats.failed > 0 {
        bail!("{} of {} classes could not be parsed", registry.stats.failed, signatures.len());
    }

    Ok(())
}

/// Print or write one outcome
fn emit(
    cli: &Cli,
    outcome: &ParseOutcome,
    registry: &mut ProtoRegistry,
    out: &mut impl Write,
) -> Result<()> {
    if cli.format == OutputFormat::Json {
        let line = serde_json::to_string(outcome).context("Failed to serialize outcome")?;
        writeln!(out, "{}", line)?;
        return Ok(());
    }

    let Some(definition) = outcome.proto_definition.as_deref() else {
        return Ok(());
    };

    let Some(output_dir) = cli.output.as_deref() else {
        write!(out, "{}", definition)?;
        return Ok(());
    };

    let content_hash = ProtoRegistry::content_hash(definition);
    let Some(output_path) = registry.register(
        &outcome.class_signature,
        &content_hash,
        output_dir,
        cli.conflict_strategy,
    ) else {
        return Ok(());
    };

    if cli.dry_run {
        writeln!(out, "Would write: {}", output_path.display())?;
        if cli.verbose > 0 {
            writeln!(out, "---")?;
            write!(out, "{}", definition)?;
            writeln!(out, "---")?;
        }
        return Ok(());
    }

    match write_proto_file(&output_path, definition, cli.force) {
        Ok(()) => {
            writeln!(out, "Wrote {}", output_path.display())?;
            registry.stats.written += 1;
        }
        Err(e) => {
            error!("Failed to write {}: {}", output_path.display(), e);
        }
    }

    Ok(())
}

/// Write a proto file to disk
fn write_proto_file(output_path: &Path, content: &str, force: bool) -> Result<()> {
    // Create parent directories
    if let Some(parent) = output_path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }

    // Check if file exists
    if output_path.exists() && !force {
        bail!(
            "File already exists: {} (use --force to overwrite)",
            output_path.display()
        );
    }

    let mut file = fs::File::create(output_path)
        .with_context(|| format!("Failed to create file: {}", output_path.display()))?;

    file.write_all(content.as_bytes())
        .with_context(|| format!("Failed to write file: {}", output_path.display()))?;

    Ok(())
}
