mod annotations;
mod archive;
mod classfile;
mod config;
mod descriptor;
mod element;
mod error;
mod filter;
mod matcher;
mod mutf8;
mod remover;
mod telemetry;
#[cfg(test)]
mod testing;
mod traversal;
mod walk;

use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use opentelemetry::KeyValue;
use tracing::{debug, info, warn};

use crate::archive::{Summary, ZipOptimizer};
use crate::config::{ConfigBuilder, Configuration, RewriteFlag, Targets, load_config_file};
use crate::element::ElementKind;
use crate::matcher::Matcher;
use crate::remover::AnnotationRemover;
use crate::telemetry::{Telemetry, current_trace_id, init_logging, with_span};
use crate::walk::{WriteMode, plan_jobs, process_jobs};

/// CLI arguments for purgeannorefs execution.
#[derive(Parser, Debug)]
#[command(
    name = "purgeannorefs",
    about = "Strip annotation references from JVM class files and JAR, WAR, EAR and ZIP archives.",
    version
)]
struct Cli {
    /// Class file, archive or directory to process; repeatable.
    #[arg(long, value_name = "PATH", required = true)]
    input: Vec<PathBuf>,
    /// Write results here instead of rewriting inputs in place.
    #[arg(long, value_name = "DIR")]
    target_dir: Option<PathBuf>,
    /// Rewrite destinations even when they are newer than their source.
    #[arg(long)]
    overwrite: bool,
    /// JSON file with removal rules and rewrite flags.
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,
    /// Fully qualified annotation class name to remove.
    #[arg(long, value_name = "ANNOTATION")]
    name: Vec<String>,
    /// Regular expression matched against the whole annotation class name.
    #[arg(long, value_name = "PATTERN")]
    regexp: Vec<String>,
    /// Element kinds that --name and --regexp apply to (default: all).
    #[arg(long, value_name = "KIND")]
    from: Vec<String>,
    #[arg(long, value_enum, value_name = "FLAG")]
    rewrite: Vec<RewriteFlag>,
    /// Print the annotation references that would be removed and write nothing.
    #[arg(long)]
    list: bool,
    #[arg(long)]
    quiet: bool,
    #[arg(long)]
    timing: bool,
    /// OTLP/HTTP collector endpoint for trace export.
    #[arg(long, value_name = "URL")]
    otel: Option<String>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.quiet);
    run(cli)
}

fn run(cli: Cli) -> Result<()> {
    let started_at = Instant::now();
    let (configuration, overwrite) = build_configuration(&cli)?;
    let jobs = plan_jobs(&cli.input, cli.target_dir.as_deref())?;

    let flags = configuration.rewrite_flags;
    let remover = AnnotationRemover::new(configuration);
    if remover.filters().is_empty() && !flags.rewrites_attributes() {
        warn!("nothing to rewrite; classes will be copied unchanged");
    }
    for kind in ElementKind::ALL {
        for matcher in remover.filters().filter(kind).matchers() {
            debug!("removing {matcher} from {kind}");
        }
    }
    if flags.rewrites_attributes() {
        info!("rewrite flags: {flags:?}");
    }
    for flag in flags.inert() {
        warn!("rewrite flag {flag:?} has no effect; stack map frames are copied as they are");
    }

    let telemetry = cli.otel.clone().map(Telemetry::new).transpose()?;
    let mode = WriteMode {
        overwrite,
        dry_run: cli.list,
    };
    let attributes = [KeyValue::new("purgeannorefs.inputs", cli.input.len() as i64)];
    let result = with_span(telemetry.as_ref(), "purgeannorefs.run", &attributes, || {
        if let Some(trace_id) = current_trace_id() {
            info!("trace id {trace_id}");
        }
        let optimizer = ZipOptimizer::new(&remover, telemetry.as_ref());
        process_jobs(&jobs, &optimizer, mode, telemetry.as_ref())
    });
    if let Some(telemetry) = &telemetry {
        telemetry.shutdown()?;
    }
    let summary = result?;

    if cli.list {
        let mut stdout = io::stdout().lock();
        for removal in &summary.removals {
            writeln!(stdout, "{removal}").context("failed to write listing")?;
        }
    }
    if !cli.quiet {
        eprintln!("{}", summary_line(&summary, cli.list));
        if cli.timing {
            eprintln!(
                "timing: total_ms={} files={} classes={} archives={}",
                started_at.elapsed().as_millis(),
                jobs.len(),
                summary.classes,
                summary.archives
            );
        }
    }
    Ok(())
}

/// Merge rules from the configuration file and the command line.
///
/// Returns the configuration and the effective overwrite flag.
fn build_configuration(cli: &Cli) -> Result<(Configuration, bool)> {
    let mut builder = ConfigBuilder::default();
    let mut overwrite = cli.overwrite;
    if let Some(path) = &cli.config {
        let file = load_config_file(path)?;
        overwrite |= file.overwrite;
        builder
            .config_file(file)
            .with_context(|| format!("invalid configuration in {}", path.display()))?;
    }

    let targets = if cli.from.is_empty() {
        Targets::All
    } else {
        Targets::from_names(&cli.from)?
    };
    for name in &cli.name {
        builder.rule(targets.clone(), Matcher::literal(name.as_str()));
    }
    for pattern in &cli.regexp {
        builder.rule(targets.clone(), Matcher::regex(pattern.as_str())?);
    }
    for flag in &cli.rewrite {
        builder.rewrite_flag(*flag);
    }
    Ok((builder.build()?, overwrite))
}

fn summary_line(summary: &Summary, dry_run: bool) -> String {
    let verb = if dry_run { "would remove" } else { "removed" };
    let mut line = format!(
        "{verb} {} annotation reference(s) in {} of {} class(es), {} archive(s)",
        summary.removed(),
        summary.changed_classes,
        summary.classes,
        summary.archives
    );
    if summary.skipped > 0 {
        line.push_str(&format!(", {} up-to-date file(s) skipped", summary.skipped));
    }
    line
}
