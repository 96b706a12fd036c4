//! famgraph command-line host.
//!
//! Drives the sync engine against a real backend with a headless surface.
//!
//! Usage:
//!   FAMGRAPH_TOKEN=... famgraph --user 12 trees
//!   famgraph show 4
//!   famgraph members 4
//!   famgraph validate 4
//!   famgraph apply 4 batch.json      # {"addNodesData": [...], "updateNodesData": [...]}
//!
//! Logs go to stderr (`RUST_LOG` filters them); command output goes to stdout.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, fmt};

use famgraph_client::constants::ENV_TOKEN;
use famgraph_client::{
    ClientConfig, ContainerHandle, EditBatch, HeadlessSurfaceFactory, HttpStore, Session,
    SyncController,
};
use famgraph_types::{FamilyTreeId, GraphModel, Person, PersonId};

/// Inspect and edit family trees on a famgraph backend.
#[derive(Parser, Debug)]
#[command(name = "famgraph")]
#[command(about = "Inspect and edit family trees on a famgraph backend")]
struct Args {
    /// Backend origin, e.g. https://family.example.org
    #[arg(long, global = true)]
    backend: Option<String>,

    /// Bearer token (defaults to $FAMGRAPH_TOKEN)
    #[arg(long, global = true)]
    token: Option<String>,

    /// Signed-in user id, needed by `trees`
    #[arg(long, global = true)]
    user: Option<String>,

    /// Config file (defaults to $XDG_CONFIG_HOME/famgraph/client.ron)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the family trees of --user
    Trees,
    /// Print every person of a family tree
    Show { tree: String },
    /// List the users who share a family tree
    Members { tree: String },
    /// Check referential integrity; exits non-zero on findings
    Validate { tree: String },
    /// List the children of one person
    Children { tree: String, person: String },
    /// Submit an edit batch from a JSON file
    Apply { tree: String, batch: PathBuf },
    /// Delete a person and print the remaining tree
    Delete { tree: String, person: String },
    /// Record a partnership between two persons
    AddPartner {
        tree: String,
        person: String,
        partner: String,
    },
    /// Create a new family tree
    CreateTree {
        last_name: String,
        #[arg(long, default_value = "")]
        description: String,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // stdout carries command output
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    // The engine holds Rc state, so everything runs on this thread.
    let local_set = tokio::task::LocalSet::new();
    local_set.run_until(run(args)).await
}

async fn run(args: Args) -> Result<()> {
    let mut config = ClientConfig::load(args.config.as_deref()).context("loading config")?;
    if let Some(backend) = args.backend {
        config.backend_origin = backend;
        config.normalize()?;
    }

    let session = Session::new();
    session.set_token(args.token.or_else(|| std::env::var(ENV_TOKEN).ok()));
    session.set_user_id(args.user);

    let factory = HeadlessSurfaceFactory::new();
    let mut controller = SyncController::connect(
        &config,
        session,
        Box::new(factory.clone()),
        ContainerHandle::new("famgraph-cli"),
    )?;
    tracing::debug!(origin = %controller.store().origin(), "backend");

    match args.command {
        Command::Trees => {
            for tree in controller.list_family_trees().await? {
                let description = tree.description.as_deref().unwrap_or("");
                println!("{}\t{}\t{}", tree.id, tree.display_name(), description);
            }
        }
        Command::Members { tree } => {
            let members = controller
                .list_family_tree_users(&FamilyTreeId::new(tree.as_str()))
                .await
                .with_context(|| format!("listing users of family tree {}", tree))?;
            for member in members {
                let id = member.id.as_ref().map(ToString::to_string).unwrap_or_else(|| "-".into());
                let profession = member.profession.as_deref().unwrap_or("");
                println!("{}\t{}\t{}", id, member.display_name(), profession);
            }
        }
        Command::Show { tree } => {
            select(&mut controller, &tree).await?;
            print_graph(&controller.graph());
            report_load(&controller);
        }
        Command::Validate { tree } => {
            select(&mut controller, &tree).await?;
            report_load(&controller);
            let findings = controller.warnings().len();
            if findings > 0 {
                bail!("{} integrity finding(s) in family tree {}", findings, tree);
            }
            println!("family tree {} is consistent ({} persons)", tree, controller.graph().len());
        }
        Command::Children { tree, person } => {
            select(&mut controller, &tree).await?;
            let graph = controller.graph();
            let id = PersonId::new(person);
            if !graph.contains(&id) {
                bail!("person {} is not in family tree {}", id, tree);
            }
            for child in graph.children_of(&id) {
                print_person(child);
            }
        }
        Command::Apply { tree, batch } => {
            let batch = read_batch(&batch)?;
            select(&mut controller, &tree).await?;

            // Feed the batch through the surface like a user edit would.
            if factory.emit(batch).is_none() {
                bail!("no surface bound for family tree {}", tree);
            }
            let handled = controller.process_pending_edits().await?;
            if handled == 0 {
                bail!("edit batch was not accepted");
            }
            println!("applied; family tree {} now has {} persons", tree, controller.graph().len());
        }
        Command::Delete { tree, person } => {
            select(&mut controller, &tree).await?;
            controller.delete_person(&PersonId::new(person)).await?;
            print_graph(&controller.graph());
        }
        Command::AddPartner { tree, person, partner } => {
            select(&mut controller, &tree).await?;
            let (person, partner) = (PersonId::new(person), PersonId::new(partner));
            controller.add_partner(&person, &partner).await?;
            println!("{} and {} are now partners", person, partner);
        }
        Command::CreateTree { last_name, description } => {
            controller.create_family_tree(&last_name, &description).await?;
            println!("created family tree {}", last_name.trim());
        }
    }
    Ok(())
}

async fn select(controller: &mut SyncController<HttpStore>, tree: &str) -> Result<()> {
    controller
        .select_family_tree(FamilyTreeId::new(tree))
        .await
        .with_context(|| format!("loading family tree {}", tree))
}

fn read_batch(path: &Path) -> Result<EditBatch> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let value: serde_json::Value =
        serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
    let (batch, skipped) = EditBatch::from_surface_json(&value);
    for error in &skipped {
        tracing::warn!("{}: {}", path.display(), error);
    }
    if batch.is_empty() {
        bail!("{} contains no usable nodes", path.display());
    }
    Ok(batch)
}

fn report_load(controller: &SyncController<HttpStore>) {
    for skipped in controller.skipped() {
        eprintln!("skipped: {}", skipped);
    }
    for violation in controller.warnings() {
        eprintln!("warning: {}", violation);
    }
}

fn print_graph(graph: &GraphModel) {
    for person in graph.iter() {
        print_person(person);
    }
}

fn print_person(person: &Person) {
    let opt = |id: &Option<PersonId>| id.as_ref().map(ToString::to_string).unwrap_or_else(|| "-".into());
    let gender = person.gender.map(|g| g.to_string()).unwrap_or_else(|| "-".into());
    let born = person.birth_date.as_ref().map(ToString::to_string).unwrap_or_else(|| "-".into());
    let pids: Vec<String> = person.pids.iter().map(ToString::to_string).collect();
    println!(
        "{}\t{}\t{}\t{}\tfid={}\tmid={}\tpids=[{}]",
        person.id,
        person.name,
        gender,
        born,
        opt(&person.fid),
        opt(&person.mid),
        pids.join(",")
    );
}
