//! rgwfs-inspect: bootstrap an export against a fixture namespace and show
//! what the file-sharing server would see for one path.
//!
//! Usage:
//!   rgwfs-inspect --fixture ns.ron /photos/cat.jpg
//!   rgwfs-inspect --fixture ns.ron --config module.ron --list /photos
//!
//! Logging goes to stderr; `RUST_LOG=rgwfs=debug` shows lookups.

mod fixture;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use clap::Parser;
use rgwfs::{AttrList, ExportParams, ModuleConfig, ObjectKey, RgwExport, RgwHandle, RgwModule, UpcallOps};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use fixture::Fixture;

/// Inspect an rgwfs export backed by an in-memory namespace.
#[derive(Parser, Debug)]
#[command(name = "rgwfs-inspect")]
#[command(about = "Resolve a path through an rgwfs export and print its attributes")]
struct Args {
    /// Namespace fixture (RON)
    #[arg(long)]
    fixture: PathBuf,

    /// Module configuration (RON); defaults apply when omitted
    #[arg(long)]
    config: Option<PathBuf>,

    /// User to mount as
    #[arg(long, default_value = "tester")]
    user: String,

    /// Secret for --user
    #[arg(long, default_value = "")]
    secret: String,

    /// List the directory instead of describing the object
    #[arg(short, long)]
    list: bool,

    /// Path to resolve from the export root
    #[arg(default_value = "/")]
    path: String,
}

/// Logs notifications instead of forwarding them to a server cache.
struct LogUpcall;

impl UpcallOps for LogUpcall {
    fn invalidate(&self, handle_id: u64, key: ObjectKey) {
        tracing::info!(handle_id, ?key, "invalidate");
    }

    fn update(&self, handle_id: u64, key: ObjectKey, attrs: &AttrList) {
        tracing::info!(handle_id, ?key, mask = ?attrs.mask(), "attributes changed");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => ModuleConfig::load(path).with_context(|| format!("loading {}", path.display()))?,
        None => ModuleConfig::default(),
    };
    let gateway = Fixture::load(&args.fixture)?.build();
    let module = RgwModule::new(config, Arc::new(gateway));

    let params = ExportParams::new(args.user.as_str(), args.user.as_str(), args.secret.as_str());
    let export = module
        .create_export(&params, Arc::new(LogUpcall))
        .await
        .context("creating export")?;

    let outcome = inspect(&export, &args).await;
    export.release().await.context("releasing export")?;
    outcome
}

async fn inspect(export: &Arc<RgwExport>, args: &Args) -> Result<()> {
    let handle = export
        .lookup_path(&args.path)
        .await
        .with_context(|| format!("resolving {}", args.path))?;

    if args.list {
        let mut whence = 0;
        loop {
            let entries = handle.readdir(whence).await.context("reading directory")?;
            let Some(last) = entries.last() else { break };
            whence = last.cookie;
            for entry in &entries {
                let kind: &'static str = entry.handle.object_type().into();
                println!("{:>8}  {kind:<12} {}", entry.cookie, entry.name);
            }
        }
        return Ok(());
    }

    describe(&handle).await
}

async fn describe(handle: &RgwHandle) -> Result<()> {
    let attrs = handle.getattrs().await.context("fetching attributes")?;
    let wire = handle.to_wire().context("encoding wire handle")?;

    println!("handle   {}", handle.id());
    println!("key      {:?}", handle.key());
    println!("type     {}", handle.object_type());
    print_field("size", attrs.size());
    print_field("used", attrs.space_used());
    print_field("fileid", attrs.fileid());
    if let Some(mode) = attrs.mode() {
        println!("mode     {mode:o}");
    }
    print_field("links", attrs.numlinks());
    print_field("owner", attrs.owner());
    print_field("group", attrs.group());
    print_time("mtime", attrs.mtime());
    print_time("ctime", attrs.ctime());
    print_time("chgtime", attrs.chgtime());
    print_field("change", attrs.change());
    if !attrs.invalid().is_empty() {
        println!("invalid  {:?}", attrs.invalid());
    }
    println!("wire     {}", hex(&wire));
    Ok(())
}

fn print_field<T: std::fmt::Display>(name: &str, value: Option<T>) {
    if let Some(value) = value {
        println!("{name:<8} {value}");
    }
}

fn print_time(name: &str, value: Option<SystemTime>) {
    if let Some(time) = value {
        match time.duration_since(UNIX_EPOCH) {
            Ok(since) => println!("{name:<8} {}.{:09}", since.as_secs(), since.subsec_nanos()),
            Err(before) => println!("{name:<8} -{:?}", before.duration()),
        }
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
