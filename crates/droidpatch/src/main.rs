use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use droidpatch::Result;
use droidpatch::config::ConfigDoc;
use droidpatch::requirements::{Partition, ResourceRequirement};
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List compiled-in modules and what each one declares
    Modules,
    /// Print what the host must prepare for a run definition
    Requirements {
        /// Path to a run definition TOML
        run: PathBuf,
        /// Override a config value (dotted KEY=VALUE); repeatable
        #[arg(long = "set")]
        set: Vec<String>,
    },
    /// Load a run definition and print the fully-resolved TOML (after imports/extends)
    Resolve {
        /// Path to a run definition TOML
        run: PathBuf,
        /// Override a config value (dotted KEY=VALUE); repeatable
        #[arg(long = "set")]
        set: Vec<String>,
    },
    /// Run every enabled module against the prepared partitions
    Inject {
        /// Path to a run definition TOML
        run: PathBuf,
        /// Log what would be appended without touching any file
        #[arg(long)]
        dry_run: bool,
        /// Override a config value (dotted KEY=VALUE); repeatable
        #[arg(long = "set")]
        set: Vec<String>,
    },
}

fn main() -> Result<()> {
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("droidpatch=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    match args.cmd {
        Command::Modules => cmd_modules(),
        Command::Requirements { run, set } => cmd_requirements(&run, &set),
        Command::Resolve { run, set } => cmd_resolve(&run, &set),
        Command::Inject { run, dry_run, set } => cmd_inject(&run, dry_run, &set),
    }
}

fn load_doc(path: &Path, set: &[String]) -> Result<ConfigDoc> {
    let mut doc = droidpatch::config::load(path)?;
    droidpatch::overrides::apply_cli_overrides(&mut doc, set)?;
    Ok(doc)
}

fn fmt_set(ps: &std::collections::BTreeSet<Partition>) -> String {
    let names: Vec<&str> = ps.iter().map(|p| p.as_str()).collect();
    format!("{{{}}}", names.join(", "))
}

fn print_requirement(label: &str, req: &ResourceRequirement) {
    println!(
        "{:<10} boot_images={:<24} ext_images={:<24} selinux_patching={}",
        label,
        fmt_set(&req.boot_images),
        fmt_set(&req.ext_images),
        req.selinux_patching
    );
}

fn cmd_modules() -> Result<()> {
    let reg = droidpatch::executor::builtin_registry()?;
    for m in reg.iter() {
        print_requirement(m.id(), &m.requirements());
    }
    Ok(())
}

fn cmd_requirements(path: &Path, set: &[String]) -> Result<()> {
    let doc = load_doc(path, set)?;
    let reg = droidpatch::executor::builtin_registry()?;
    for m in reg.iter() {
        if doc.module_enabled(m.id())? {
            print_requirement(m.id(), &m.requirements());
        }
    }
    print_requirement("(all)", &reg.combined_requirements(&doc)?);
    Ok(())
}

fn cmd_resolve(path: &Path, set: &[String]) -> Result<()> {
    let doc = load_doc(path, set)?;
    // Best-effort pretty print of resolved config.
    let s = toml::to_string_pretty(&doc.value).unwrap_or_else(|_| format!("{:?}", doc.value));
    print!("{s}");
    Ok(())
}

fn cmd_inject(path: &Path, dry_run: bool, set: &[String]) -> Result<()> {
    let doc = load_doc(path, set)?;
    let ws = droidpatch::workspace::load_paths(&doc)?;
    let mut pool = droidpatch::resources::ResourcePool::load(&doc, &ws)?;

    let reg = droidpatch::executor::builtin_registry()?;
    let sink = Arc::new(droidpatch::executor::StdoutSink::default());
    let mut ctx = droidpatch::executor::ExecCtx::new(dry_run, sink);

    droidpatch::executor::execute(&doc, &reg, &mut pool, &mut ctx)?;
    Ok(())
}
