use clap::{Parser, Subcommand};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::process;
use treesync::{
    LocalRelay, Operation, PumpReport, Snapshot, SnapshotStore, SyncTree, SyncableResource,
    TransformConfig,
};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replays an operation log (one JSON operation per line) and prints the
    /// resulting snapshot
    Apply {
        /// Starting snapshot; without it the log must begin with an INIT
        #[arg(long)]
        snapshot: Option<PathBuf>,
        #[arg(long)]
        ops: PathBuf,
        /// Write the result here instead of stdout
        #[arg(long)]
        out: Option<PathBuf>,
        /// Apply operations even when their node id no longer matches
        #[arg(long)]
        no_guard: bool,
        /// Exit with code 2 when stale operations were skipped
        #[arg(long)]
        strict: bool,
    },
    /// Lists every node with its path and payload
    Inspect {
        #[arg(long)]
        snapshot: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Persists a snapshot into a store directory
    Save {
        #[arg(long)]
        snapshot: PathBuf,
        #[arg(long)]
        store: PathBuf,
    },
    /// Prints the snapshot held by a store directory
    Load {
        #[arg(long)]
        store: PathBuf,
    },
}

#[derive(Serialize)]
struct ApplyReport {
    applied: usize,
    stale: usize,
    inits: usize,
    dropped: usize,
}

impl From<&PumpReport> for ApplyReport {
    fn from(report: &PumpReport) -> Self {
        Self {
            applied: report.applied,
            stale: report.stale,
            inits: report.inits,
            dropped: report.dropped,
        }
    }
}

fn print_summary(report: &PumpReport) -> CommandResult {
    eprintln!("{}", serde_json::to_string(&ApplyReport::from(report))?);
    Ok(())
}

#[derive(Serialize)]
struct NodeListing {
    path: String,
    node_id: String,
    data: Option<serde_json::Value>,
}

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Apply {
            snapshot,
            ops,
            out,
            no_guard,
            strict,
        } => apply_command(snapshot.as_deref(), &ops, out.as_deref(), no_guard, strict),
        Commands::Inspect { snapshot, json } => inspect_command(&snapshot, json),
        Commands::Save { snapshot, store } => save_command(&snapshot, &store),
        Commands::Load { store } => load_command(&store),
    };

    if let Err(err) = result {
        eprintln!("Error: {err}");
        process::exit(1);
    }
}

type CommandResult = Result<(), Box<dyn std::error::Error>>;

fn read_snapshot(path: &Path) -> Result<Snapshot, Box<dyn std::error::Error>> {
    let text = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}

fn apply_command(
    snapshot: Option<&Path>,
    ops: &Path,
    out: Option<&Path>,
    no_guard: bool,
    strict: bool,
) -> CommandResult {
    let config = TransformConfig {
        identity_guard: !no_guard,
        ..TransformConfig::default()
    };
    let mut resource = SyncableResource::awaiting_init(LocalRelay::new()).with_config(config);

    if let Some(path) = snapshot {
        resource.queue_operation(Operation::init(&read_snapshot(path)?)?);
    }
    for (line_no, line) in fs::read_to_string(ops)?.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let operation = Operation::from_json(line)
            .map_err(|err| format!("{}:{}: {err}", ops.display(), line_no + 1))?;
        resource.queue_operation(operation);
    }

    let report = match resource.pump() {
        Ok(report) => report,
        Err(err) => {
            print_summary(&err.report)?;
            return Err(err.into());
        }
    };
    let tree = resource
        .tree()
        .ok_or("operation log contains no INIT and no --snapshot was given")?;
    let encoded = serde_json::to_string_pretty(&tree.to_snapshot()?)?;
    match out {
        Some(path) => fs::write(path, encoded)?,
        None => println!("{encoded}"),
    }

    print_summary(&report)?;

    if strict && report.stale > 0 {
        process::exit(2);
    }
    Ok(())
}

fn inspect_command(snapshot: &Path, json: bool) -> CommandResult {
    let tree = SyncTree::from_snapshot(&read_snapshot(snapshot)?)?;
    let mut listings = Vec::new();
    let mut pending = vec![tree.root_id()];
    while let Some(id) = pending.pop() {
        let node = tree.node(id)?;
        let path = serde_json::to_string(&tree.path_from_root(id)?)?;
        listings.push(NodeListing {
            path,
            node_id: id.to_string(),
            data: node.data().cloned(),
        });
        pending.extend(node.children().iter().rev());
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&listings)?);
    } else {
        for listing in listings {
            let data = listing
                .data
                .map(|data| data.to_string())
                .unwrap_or_else(|| "-".to_string());
            println!("{}\t{}\t{}", listing.path, listing.node_id, data);
        }
    }
    Ok(())
}

fn save_command(snapshot: &Path, store: &Path) -> CommandResult {
    let snapshot = read_snapshot(snapshot)?;
    // Validates ids before anything reaches the store.
    SyncTree::from_snapshot(&snapshot)?;
    SnapshotStore::open(store)?.write_snapshot(&snapshot)?;
    Ok(())
}

fn load_command(store: &Path) -> CommandResult {
    let tree = SnapshotStore::open(store)?.load_tree()?;
    println!("{}", serde_json::to_string_pretty(&tree.to_snapshot()?)?);
    Ok(())
}
