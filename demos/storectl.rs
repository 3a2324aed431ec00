//! A demo CLI that exercises the storage engine's operation surface
//! (§6) against a real on-disk root. This is a harness for manual
//! exercise of the engine, not a front-end protocol.

use std::sync::Arc;

use anyhow::{Context as _, Result, bail};
use camino::Utf8PathBuf;
use clap::{Parser, Subcommand};
use decomposedfs::config;
use decomposedfs::context::Context;
use decomposedfs::grant::CallerIdentity;
use decomposedfs::ids::NodeId;
use decomposedfs::lookup::{self, Reference};
use decomposedfs::node::{Node, Owner};
use decomposedfs::upload::{self, UploadHeaders};
use decomposedfs::{recycle, space, tree};

#[derive(Parser)]
#[command(name = "storectl", about = "Exercise the storage engine by hand")]
struct Args {
    /// Storage root; defaults to the configured one (`~/.config/decomposedfs.toml`).
    #[arg(long)]
    root: Option<Utf8PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create a storage space and print its id.
    CreateSpace {
        #[arg(long, default_value = "personal")]
        space_type: String,
        name: String,
        #[arg(long)]
        owner: String,
        #[arg(long)]
        quota: Option<i64>,
    },
    /// Create a directory at a space-relative path.
    Mkdir {
        space: NodeId,
        path: Utf8PathBuf,
        #[arg(long)]
        owner: String,
    },
    /// Upload a local file to a space-relative path.
    Upload {
        space: NodeId,
        path: Utf8PathBuf,
        local_file: Utf8PathBuf,
        #[arg(long)]
        owner: String,
        #[arg(long)]
        checksum: Option<String>,
    },
    /// List a folder's children.
    Ls { space: NodeId, path: Utf8PathBuf },
    /// Delete (to trash) a space-relative path.
    Rm { space: NodeId, path: Utf8PathBuf },
    /// List a space's trash.
    ListTrash {
        space: NodeId,
        #[arg(long)]
        as_user: String,
    },
    /// Restore a trashed node by id to a destination path.
    Restore {
        space: NodeId,
        node_id: NodeId,
        dest_parent: Utf8PathBuf,
        dest_name: String,
        #[arg(long)]
        as_user: String,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let mut config = config::load().unwrap_or_default();
    if let Some(root) = args.root {
        config.root = root;
    }
    let ctx = Context::open(&config).context("opening storage engine")?;

    match args.command {
        Command::CreateSpace { space_type, name, owner, quota } => {
            let node = space::create(&ctx, &space_type, &name, owner_of(&owner), None, quota)
                .context("creating space")?;
            println!("{}", node.id());
        }
        Command::Mkdir { space, path, owner } => {
            let (parent, leaf) = resolve_parent(&ctx, space, &path)?;
            let node = tree::create_dir(&parent, &leaf, owner_of(&owner), false)
                .context("creating directory")?;
            println!("{}", node.id());
        }
        Command::Upload { space, path, local_file, owner, checksum } => {
            let (parent, leaf) = resolve_parent(&ctx, space, &path)?;
            let existing = parent.child(&leaf)?;
            let bytes = std::fs::read(&local_file).context("reading local file")?;

            let caller = CallerIdentity::new(owner, vec![]);
            let headers = UploadHeaders { checksum, ..Default::default() };
            let session = upload::initiate(
                &caller,
                &parent,
                existing.as_ref(),
                &leaf,
                bytes.len() as u64,
                false,
                headers,
            )
            .context("initiating upload")?;
            upload::write_chunk(&ctx, session.id, 0, &mut bytes.as_slice())
                .context("writing upload bytes")?;
            let node = upload::finish(&ctx, session.id, &parent, existing.as_ref(), None)
                .context("finalizing upload")?;
            println!("{}", node.id());
        }
        Command::Ls { space, path } => {
            let node = resolve(&ctx, space, &path)?;
            for child in tree::list_folder(&node)? {
                println!("{}\t{:?}", child.name()?, child.node_type()?);
            }
        }
        Command::Rm { space, path } => {
            let node = resolve(&ctx, space, &path)?;
            tree::delete(&node, &path)?;
        }
        Command::ListTrash { space, as_user } => {
            let space_root = lookup::node_from_id(&ctx, space)?;
            let caller = CallerIdentity::new(as_user, vec![]);
            for item in recycle::list(&caller, &space_root, "", camino::Utf8Path::new("/"))? {
                println!("{}\t{:?}\t{}", item.id, item.node_type, item.original_path);
            }
        }
        Command::Restore { space, node_id, dest_parent, dest_name, as_user } => {
            let space_root = lookup::node_from_id(&ctx, space)?;
            let caller = CallerIdentity::new(as_user, vec![]);
            let dest = resolve(&ctx, space, &dest_parent)?;
            recycle::restore(&caller, &space_root, node_id, &dest, &dest_name)?;
        }
    }

    Ok(())
}

fn owner_of(id: &str) -> Owner {
    Owner { id: id.to_string(), idp: "local".to_string(), kind: "user".to_string() }
}

fn resolve(ctx: &Arc<Context>, space: NodeId, path: &camino::Utf8Path) -> Result<Node> {
    let space_root = lookup::node_from_id(ctx, space)?;
    Ok(lookup::node_from_resource(ctx, &space_root, Reference::Path(path))?)
}

fn resolve_parent(
    ctx: &Arc<Context>,
    space: NodeId,
    path: &camino::Utf8Path,
) -> Result<(Node, String)> {
    let leaf = path
        .file_name()
        .ok_or_else(|| anyhow::anyhow!("{path} has no leaf name"))?
        .to_string();
    let parent_path = path.parent().unwrap_or_else(|| camino::Utf8Path::new("/"));
    let parent = resolve(ctx, space, parent_path)?;
    if !parent.exists() {
        bail!("parent {parent_path} does not exist");
    }
    Ok((parent, leaf))
}
