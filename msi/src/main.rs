use anyhow::{Context, Result};
use clap::Parser;
use tracing::instrument;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "msi",
    version,
    about = "Browse and mirror the lab's MSI datasets",
    long_about = "`msi` lists, searches and describes the datasets of the MSI research manifest and \
mirrors them from the dataset host to local storage with rsync.

EXAMPLE:
    # List public datasets, then fetch one
    msi ls --scope Public
    msi search cancer
    msi sync PXD001283 --ask

The local database path defaults to $MSI_DBPATH (or /Volumes/Datasets/)."
)]
struct Args {
    /// Local database path (holds MSIResearch/manifest.json)
    #[arg(long, value_name = "PATH", global = true)]
    dbpath: Option<std::path::PathBuf>,

    /// Verbose level: -v INFO / -vv DEBUG / -vvv TRACE (default: ERROR)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Quiet mode, don't report errors
    #[arg(short = 'q', long = "quiet", global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Args, Debug, Clone)]
struct Selection {
    /// Filter by scope (regex, case-insensitive)
    #[arg(short = 's', long)]
    scope: Option<String>,

    /// Filter by group (regex, case-insensitive)
    #[arg(short = 'g', long)]
    group: Option<String>,
}

impl Selection {
    fn filter(&self) -> Result<catalog::Filter, catalog::Error> {
        catalog::Filter::new(self.scope.as_deref(), self.group.as_deref())
    }
}

#[derive(clap::Args, Debug, Clone)]
struct Connection {
    /// Local port for gateway forwarding
    #[arg(short = 'p', long, value_name = "PORT")]
    port: Option<u16>,

    /// Remote database user
    #[arg(short = 'u', long, value_name = "USER")]
    user: Option<String>,

    /// Gateway server user
    #[arg(short = 'L', long, value_name = "USER")]
    login: Option<String>,

    /// Gateway server host
    #[arg(short = 'S', long, value_name = "HOST")]
    server: Option<String>,

    /// Remote database host
    #[arg(long, value_name = "HOST")]
    remote_host: Option<String>,

    /// Remote database path
    #[arg(long, value_name = "PATH")]
    remote_path: Option<String>,
}

impl Connection {
    fn apply(self, settings: &mut common::Settings) {
        if let Some(port) = self.port {
            settings.port = port;
        }
        if let Some(user) = self.user {
            settings.username = user;
        }
        if self.login.is_some() {
            settings.server_username = self.login;
        }
        if self.server.is_some() {
            settings.server = self.server;
        }
        if self.remote_host.is_some() {
            settings.remote_host = self.remote_host;
        }
        if self.remote_path.is_some() {
            settings.remote_path = self.remote_path;
        }
    }
}

#[derive(clap::Subcommand, Debug, Clone)]
enum Command {
    /// List all datasets
    Ls {
        #[command(flatten)]
        selection: Selection,

        /// Show full details
        #[arg(short = 'l', long)]
        details: bool,
    },

    /// List cached datasets
    LsCache {
        #[command(flatten)]
        selection: Selection,

        /// Sort by file attribute (atime, mtime, size)
        #[arg(short = 'o', long, value_name = "ATTR")]
        sort: Option<catalog::SortKey>,

        /// Reverse order (only applied if sorted)
        #[arg(short = 'r', long)]
        reverse: bool,

        /// Show full details
        #[arg(short = 'l', long)]
        details: bool,
    },

    /// Search all datasets
    Search {
        /// Search pattern (regex allowed)
        pattern: String,

        #[command(flatten)]
        selection: Selection,
    },

    /// Search cached datasets
    SearchCache {
        /// Search pattern (regex allowed)
        pattern: String,

        #[command(flatten)]
        selection: Selection,
    },

    /// Describe a dataset
    Describe {
        /// The identifier of the dataset to describe
        name: String,
    },

    /// Sync a dataset to local storage
    Sync {
        /// The identifier of the dataset to sync
        name: String,

        /// Ask to confirm before syncing
        #[arg(short = 'a', long)]
        ask: bool,

        /// Force re-sync if already cached
        #[arg(short = 'f', long)]
        force: bool,

        /// Show what would be transferred
        #[arg(short = 'n', long)]
        dry_run: bool,

        #[command(flatten)]
        connection: Connection,
    },

    /// Remove cached datasets until the cache fits in a size limit
    PruneCache {
        /// Maximum cache size (10, 100, 1000, etc.)
        limit: f64,

        /// Cache size units (MB, GB, TB, etc.)
        units: String,

        /// Ask to confirm before deleting
        #[arg(short = 'a', long)]
        ask: bool,

        /// Show what would be deleted
        #[arg(short = 'n', long)]
        dry_run: bool,

        /// Prune least recently used (default)
        #[arg(long, group = "strategy")]
        lru: bool,

        /// Prune most recently used
        #[arg(long, group = "strategy")]
        mru: bool,

        /// Prune largest datasets
        #[arg(long, group = "strategy")]
        big: bool,

        /// Prune smallest datasets
        #[arg(long, group = "strategy")]
        small: bool,
    },
}

fn strategy(mru: bool, big: bool, small: bool) -> catalog::Strategy {
    if mru {
        catalog::Strategy::Mru
    } else if big {
        catalog::Strategy::Big
    } else if small {
        catalog::Strategy::Small
    } else {
        catalog::Strategy::Lru
    }
}

fn print_hits(hits: &[catalog::SearchHit]) {
    println!("#### {} hits ####", hits.len());
    for hit in hits {
        println!();
        print!("{hit}");
    }
}

fn print_entries(entries: &[&catalog::CacheEntry]) {
    for entry in entries {
        print!("{entry}");
    }
    let total: u64 = entries.iter().map(|entry| entry.size).sum();
    println!("~= {} total", common::format_size(total));
}

#[instrument]
async fn async_main(args: Args) -> Result<()> {
    let mut settings = common::Settings::from_env().context("invalid environment")?;
    if let Some(dbpath) = args.dbpath {
        settings.dbpath = dbpath;
    }
    let mut db = catalog::Catalog::new(settings)?;
    let ui = common::Terminal;
    match args.command {
        Command::Ls { selection, details } => {
            let filter = selection.filter()?;
            for record in db.list(&filter).await? {
                if details {
                    print!("{record}");
                } else {
                    println!("{}", record.name);
                }
            }
        }
        Command::LsCache {
            selection,
            sort,
            reverse,
            details,
        } => {
            let filter = selection.filter()?;
            let mut entries = db.list_cached(&filter).await?;
            if let Some(key) = sort {
                catalog::cache::sort_entries(&mut entries, key, reverse);
            }
            if details || sort.is_some() {
                print_entries(&entries);
            } else {
                for entry in entries {
                    println!("{}", entry.name);
                }
            }
        }
        Command::Search { pattern, selection } => {
            let hits = db.search(&pattern, &selection.filter()?).await?;
            print_hits(&hits);
        }
        Command::SearchCache { pattern, selection } => {
            let hits = db.search_cached(&pattern, &selection.filter()?).await?;
            print_hits(&hits);
        }
        Command::Describe { name } => {
            let record = db.describe(&name).await?;
            print!("{record}");
        }
        Command::Sync {
            name,
            ask,
            force,
            dry_run,
            connection,
        } => {
            connection.apply(db.settings_mut());
            let options = catalog::SyncOptions {
                force,
                ask,
                dry_run,
            };
            let outcome = db
                .sync(&name, options, &remote::SystemLauncher, &ui)
                .await?;
            match outcome {
                catalog::SyncOutcome::Synced if dry_run => println!("dry run of '{name}' complete"),
                catalog::SyncOutcome::Synced => println!("'{name}' is synced"),
                catalog::SyncOutcome::Declined => println!("sync of '{name}' cancelled"),
                catalog::SyncOutcome::AlreadyCached => {}
            }
        }
        Command::PruneCache {
            limit,
            units,
            ask,
            dry_run,
            lru: _,
            mru,
            big,
            small,
        } => {
            let limit = common::parse_size(limit, &units)?;
            let pruned = db
                .prune(limit, strategy(mru, big, small), dry_run, ask, &ui)
                .await?;
            if !dry_run && !pruned.is_empty() {
                let freed: u64 = pruned.iter().map(|entry| entry.size).sum();
                println!(
                    "removed {} datasets ({})",
                    pruned.len(),
                    common::format_size(freed)
                );
            }
        }
    }
    db.close();
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();
    let output = common::OutputConfig {
        quiet: args.quiet,
        verbose: args.verbose,
    };
    let func = {
        let args = args.clone();
        || async_main(args)
    };
    let res = common::run(output, func);
    if res.is_none() {
        std::process::exit(1);
    }
    Ok(())
}
