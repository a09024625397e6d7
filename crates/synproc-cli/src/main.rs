//! synproc: browse a synthetic process namespace.
//!
//! Mounts the namespace in-process over the host's `/proc` (Linux) or a
//! seeded demo registry, then runs one command against it.
//!
//! Usage:
//!   synproc ls /
//!   synproc -o noprocperms tree / --depth 1
//!   synproc --demo cat /curproc/tty
//!   synproc --demo stat --json /4242/info

mod render;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, fmt};

use synproc_kernel::{
    MemoryRegistry, MountOptions, ProcFs, ProcFsOps, ProcSession, ProcessRegistry,
};
use synproc_types::Credential;

/// Browse a read-only synthetic process namespace.
#[derive(Parser, Debug)]
#[command(name = "synproc")]
#[command(about = "Browse a read-only synthetic process namespace")]
struct Args {
    /// Mount options, comma separated (procperms, noprocperms, ro, ...)
    #[arg(short = 'o', long = "options")]
    options: Option<String>,

    /// TOML file with mount options
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,

    /// Use a seeded in-memory process table instead of the host
    #[arg(long)]
    demo: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List a directory
    Ls {
        #[arg(default_value = "/")]
        path: String,
    },
    /// Print a file's contents
    Cat {
        /// Always print a hex dump
        #[arg(long)]
        hex: bool,
        path: String,
    },
    /// Print a symlink's target
    Readlink { path: String },
    /// Print attributes
    Stat {
        /// Print as JSON
        #[arg(long)]
        json: bool,
        path: String,
    },
    /// Print the namespace as a tree
    Tree {
        #[arg(default_value = "/")]
        path: String,
        /// Levels to descend
        #[arg(long, default_value_t = 2)]
        depth: usize,
    },
}

/// Defaults, then the config file, then `-o`, then `-v`.
fn mount_options(args: &Args) -> Result<MountOptions> {
    let mut options = match &args.config {
        Some(path) => MountOptions::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => MountOptions::default(),
    };
    if let Some(opts) = &args.options {
        options
            .apply_opts(opts)
            .with_context(|| format!("parsing -o {opts}"))?;
    }
    if args.verbose {
        options.verbose = true;
    }
    Ok(options)
}

/// The demo credential owns the demo shell, so `curproc` and its files
/// resolve without privileges.
const DEMO_PID: i32 = 4242;
const DEMO_UID: u32 = 1000;
const DEMO_GID: u32 = 1000;

fn registry_and_caller(demo: bool) -> Result<(Arc<dyn ProcessRegistry>, Credential)> {
    if demo {
        let reg = MemoryRegistry::demo(DEMO_UID, DEMO_GID);
        return Ok((Arc::new(reg), Credential::new(DEMO_PID, DEMO_UID, DEMO_GID)));
    }
    host_registry()
}

#[cfg(target_os = "linux")]
fn host_registry() -> Result<(Arc<dyn ProcessRegistry>, Credential)> {
    let reg = synproc_kernel::HostRegistry::new().context("opening /proc")?;
    Ok((Arc::new(reg), Credential::current()))
}

#[cfg(not(target_os = "linux"))]
fn host_registry() -> Result<(Arc<dyn ProcessRegistry>, Credential)> {
    anyhow::bail!("the host registry needs Linux /proc; try --demo")
}

fn main() -> Result<()> {
    let args = Args::parse();
    let options = mount_options(&args)?;

    let level = if options.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    let rust_log = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    fmt()
        .with_env_filter(log_filter(rust_log.as_deref(), level))
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    let (registry, cred) = registry_and_caller(args.demo)?;
    let fs = ProcFs::new(registry);
    let mount = fs.mount(options).context("mounting namespace")?;
    tracing::debug!(mount = %mount.id(), pid = cred.pid, uid = cred.uid, "session ready");
    let session = ProcSession::new(Arc::new(mount), cred);

    run(&session, &args.command)
}

/// `RUST_LOG` when set and valid, else the level picked by `-v`.
fn log_filter(rust_log: Option<&str>, level: tracing::Level) -> EnvFilter {
    rust_log
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new(level.as_str()))
}

fn run(s: &ProcSession, command: &Command) -> Result<()> {
    match command {
        Command::Ls { path } => {
            let entries = s
                .readdir(Path::new(path))
                .with_context(|| format!("ls {path}"))?;
            for entry in &entries {
                let child = render::child_path(path, &entry.name);
                let child = Path::new(&child);
                let attr = s.getattr(child).ok();
                let target = if entry.kind.is_symlink() {
                    s.readlink(child).ok()
                } else {
                    None
                };
                println!(
                    "{}",
                    render::format_entry(entry, attr.as_ref(), target.as_deref())
                );
            }
        }
        Command::Cat { hex, path } => {
            let data = s
                .read_all(Path::new(path))
                .with_context(|| format!("cat {path}"))?;
            if *hex || !render::is_text(&data) {
                for line in render::hex_dump(&data) {
                    println!("{line}");
                }
            } else {
                println!("{}", String::from_utf8_lossy(&data));
            }
        }
        Command::Readlink { path } => {
            let target = s
                .readlink(Path::new(path))
                .with_context(|| format!("readlink {path}"))?;
            println!("{}", target.display());
        }
        Command::Stat { json, path } => {
            let attr = s
                .getattr(Path::new(path))
                .with_context(|| format!("stat {path}"))?;
            if *json {
                println!("{}", serde_json::to_string_pretty(&attr)?);
            } else {
                let mtime = attr
                    .mtime
                    .duration_since(std::time::UNIX_EPOCH)
                    .map(|d| d.as_secs())
                    .unwrap_or(0);
                println!("  path: {path}");
                println!("  kind: {}", attr.kind);
                println!("  mode: {} ({:o})", attr.mode_string(), attr.perm);
                println!("  size: {}", attr.size);
                println!("  file: {:#x}", attr.file_id);
                println!("  fsid: {}", attr.fsid);
                println!(" links: {}", attr.nlink);
                println!("   uid: {}  gid: {}", attr.uid, attr.gid);
                println!(" mtime: {mtime}");
            }
        }
        Command::Tree { path, depth } => {
            for line in render::format_tree(s, path, *depth) {
                println!("{line}");
            }
        }
    }
    Ok(())
}
