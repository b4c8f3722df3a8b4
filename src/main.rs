use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use commitcov::attribution::AttributeOptions;
use commitcov::cli::{self, AttributeRequest, BlameSource, ChangesetSource, Style};
use commitcov::db;
use commitcov::gateway::DEFAULT_SERVER;

/// commitcov — attribute build coverage to the individual commits of a push.
#[derive(Parser)]
#[command(name = "commitcov", version, about)]
struct Cli {
    /// Path to the SQLite database of per-commit totals (default: ./.commitcov.db)
    #[arg(long, global = true, default_value = ".commitcov.db")]
    db: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Attribute a build's coverage report to the commits it was built from.
    Attribute {
        /// Covdir JSON coverage report measured at the build revision.
        #[arg(long)]
        report: PathBuf,

        /// The build (tip) changeset the report was measured at.
        #[arg(long)]
        build: String,

        /// Saved automation-relevance JSON listing the build's changesets.
        #[arg(long, conflicts_with = "server")]
        changesets: Option<PathBuf>,

        /// Version-control server to fetch the build's changesets from.
        #[arg(long, default_value = DEFAULT_SERVER)]
        server: String,

        /// Local Mercurial clone to run `hg annotate` in.
        #[arg(long)]
        repo: Option<PathBuf>,

        /// JSON annotate fixture to use instead of a Mercurial clone.
        #[arg(long)]
        blame: Option<PathBuf>,

        /// Write per-review coverage strings to this JSON file.
        #[arg(long)]
        payload: Option<PathBuf>,

        /// Output style.
        #[arg(long, value_enum, default_value = "text")]
        style: Style,

        /// Worker threads for annotate queries (default: one per CPU).
        #[arg(long)]
        workers: Option<usize>,

        /// First-line description marker identifying merge changesets.
        /// May be repeated; defaults to "r=merge" and "a=merge".
        #[arg(long = "merge-marker")]
        merge_markers: Vec<String>,

        /// Log missing first-party paths at info instead of warn.
        #[arg(long)]
        no_warnings: bool,

        /// Do not store totals in the database.
        #[arg(long)]
        no_store: bool,

        /// Re-analyze a build that is already in the database.
        #[arg(long)]
        force: bool,
    },

    /// Show stored coverage totals for one changeset.
    Show {
        /// Changeset id.
        node: String,
    },

    /// List stored coverage totals.
    List,

    /// Print the coverage array recorded for one path of a report.
    Tree {
        /// Covdir JSON coverage report.
        #[arg(long)]
        report: PathBuf,

        /// Slash-separated path inside the report.
        path: String,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    let output = match cli.command {
        Commands::Attribute {
            report,
            build,
            changesets,
            server,
            repo,
            blame,
            payload,
            style,
            workers,
            merge_markers,
            no_warnings,
            no_store,
            force,
        } => {
            let changesets = match changesets {
                Some(path) => ChangesetSource::File(path),
                None => ChangesetSource::Server(server),
            };
            let blame = match (blame, &repo) {
                (Some(path), _) => BlameSource::Fixture(path),
                (None, Some(dir)) => BlameSource::Repo(dir.clone()),
                (None, None) => bail!("One of --blame or --repo is required"),
            };
            let mut options = AttributeOptions {
                workers,
                ..Default::default()
            };
            if !merge_markers.is_empty() {
                options.merge_markers = merge_markers;
            }
            let req = AttributeRequest {
                report,
                build_revision: build,
                changesets,
                blame,
                repo_dir: repo,
                payload,
                style,
                options,
                warnings: !no_warnings,
                force,
            };

            if no_store {
                cli::cmd_attribute(None, &req)?
            } else {
                let mut conn = open_db(&cli.db)?;
                cli::cmd_attribute(Some(&mut conn), &req)?
            }
        }
        Commands::Show { node } => cli::cmd_show(&open_db(&cli.db)?, &node)?,
        Commands::List => cli::cmd_list(&open_db(&cli.db)?)?,
        Commands::Tree { report, path } => cli::cmd_tree(&report, &path)?,
    };

    print!("{output}");
    Ok(())
}

fn open_db(path: &std::path::Path) -> Result<rusqlite::Connection> {
    let conn = db::open(path).context("Failed to open database")?;
    db::init_schema(&conn).context("Failed to initialize schema")?;
    Ok(conn)
}
