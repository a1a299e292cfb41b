//! chartdex repository commands
//!
//! Publishing, deleting and rebuilding charts in a repository, plus
//! management of the named repositories in the local catalog.

use anyhow::{Context, Result};
use clap::Subcommand;
use std::io::Write;
use std::path::PathBuf;
use tabled::{
    settings::{object::Rows, Alignment, Modify, Style},
    Table, Tabled,
};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use chartdex_core::repo::{
    store_for, IndexSchema, InitOptions, PublishOptions, PublishOutcome, ReindexOptions,
    RepoCatalog, RepoUrl, Repository, DEFAULT_CHART_CONTENT_TYPE, DEFAULT_CONCURRENCY,
};

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create an empty index in a repository
    Init {
        /// Repository URL (e.g., s3://bucket/charts, file:///srv/charts)
        url: String,

        /// Replace an existing index with an empty one
        #[clap(long)]
        force: bool,

        /// ACL applied to the uploaded index
        #[clap(long)]
        acl: Option<String>,
    },

    /// Publish a packaged chart
    Push {
        /// Path to the chart archive (.tgz)
        chart: PathBuf,

        /// Repository name or URL
        repo: String,

        /// Replace the chart if this version is already published
        #[clap(long)]
        force: bool,

        /// Succeed without changes if this version is already published
        #[clap(long)]
        ignore_if_exists: bool,

        /// Check everything but upload nothing
        #[clap(long)]
        dry_run: bool,

        /// Record the chart location relative to the index
        #[clap(long)]
        relative: bool,

        /// Content type of the uploaded archive
        #[clap(long, default_value = DEFAULT_CHART_CONTENT_TYPE)]
        content_type: String,

        /// ACL applied to uploaded objects
        #[clap(long)]
        acl: Option<String>,
    },

    /// Remove a chart version and its archive
    Delete {
        /// Chart name
        name: String,

        /// Repository name or URL
        repo: String,

        /// Chart version to remove
        #[clap(long)]
        version: String,

        /// ACL applied to the uploaded index
        #[clap(long)]
        acl: Option<String>,
    },

    /// Rebuild the index from the chart archives in storage
    Reindex {
        /// Repository name or URL
        repo: String,

        /// Record chart locations relative to the index
        #[clap(long)]
        relative: bool,

        /// Archives fetched concurrently
        #[clap(long, default_value_t = DEFAULT_CONCURRENCY)]
        concurrency: usize,

        /// Upload the rebuilt index even if some archives could not be read
        #[clap(long)]
        publish_partial: bool,

        /// ACL applied to the uploaded index
        #[clap(long)]
        acl: Option<String>,
    },

    /// Print a repository's index as stored
    Fetch {
        /// Repository name or URL
        repo: String,
    },

    /// List the charts in a repository
    List {
        /// Repository name or URL
        repo: String,

        /// Output as JSON
        #[clap(long)]
        json: bool,
    },

    /// Manage named repositories
    Repo {
        #[clap(subcommand)]
        command: RepoCommand,
    },
}

#[derive(Subcommand, Debug)]
pub enum RepoCommand {
    /// Add a named repository
    Add {
        /// Repository name (e.g., "stable")
        name: String,
        /// Repository URL
        url: String,
    },

    /// List configured repositories
    List,

    /// Remove a named repository
    Remove {
        /// Repository name
        name: String,
    },
}

impl Command {
    pub async fn execute(self, schema: IndexSchema) -> Result<()> {
        match self {
            Command::Init { url, force, acl } => execute_init(&url, force, acl, schema).await,
            Command::Push {
                chart,
                repo,
                force,
                ignore_if_exists,
                dry_run,
                relative,
                content_type,
                acl,
            } => {
                let options = PublishOptions {
                    force,
                    ignore_if_exists,
                    relative,
                    dry_run,
                    acl,
                    content_type,
                    ..Default::default()
                };
                execute_push(&chart, &repo, &options, schema).await
            }
            Command::Delete {
                name,
                repo,
                version,
                acl,
            } => execute_delete(&name, &version, &repo, acl, schema).await,
            Command::Reindex {
                repo,
                relative,
                concurrency,
                publish_partial,
                acl,
            } => {
                let options = ReindexOptions {
                    relative,
                    acl,
                    concurrency,
                    publish_partial,
                };
                execute_reindex(&repo, &options, schema).await
            }
            Command::Fetch { repo } => execute_fetch(&repo, schema).await,
            Command::List { repo, json } => execute_list(&repo, json, schema).await,
            Command::Repo { command } => execute_repo_command(command),
        }
    }
}

/// Open a repository by catalog name or URL
fn open_repository(name_or_url: &str, schema: IndexSchema) -> Result<Repository> {
    let catalog = RepoCatalog::load()?;
    let (url, cache_path) = catalog.resolve(name_or_url)?;
    debug!("Resolved '{}' to {}", name_or_url, url);

    let store = store_for(&url)?;
    let repository = Repository::new(url, store).with_schema(schema);

    Ok(match cache_path {
        Some(path) => repository.with_cache_path(path),
        None => repository,
    })
}

async fn execute_init(url: &str, force: bool, acl: Option<String>, schema: IndexSchema) -> Result<()> {
    let url = RepoUrl::parse(url)?;
    let store = store_for(&url)?;
    let repository = Repository::new(url, store).with_schema(schema);

    repository
        .init(&InitOptions { force, acl })
        .await
        .with_context(|| format!("Failed to initialize {}", repository.url()))?;

    println!("Initialized empty repository at {}", repository.url());
    Ok(())
}

async fn execute_push(
    chart: &std::path::Path,
    repo: &str,
    options: &PublishOptions,
    schema: IndexSchema,
) -> Result<()> {
    let repository = open_repository(repo, schema)?;

    let outcome = repository
        .publish_file(chart, options)
        .await
        .with_context(|| format!("Failed to push {}", chart.display()))?;

    match outcome {
        PublishOutcome::Published(entry) => {
            println!(
                "Pushed {} {} to {}",
                entry.name(),
                entry.version(),
                entry.download_url().unwrap_or_default()
            );
        }
        PublishOutcome::AlreadyExists => {
            println!(
                "{} is already published in {}; nothing to do",
                chart.display(),
                repository.url()
            );
        }
        PublishOutcome::DryRun(entry) => {
            println!(
                "Dry run: {} {} would be pushed to {} (digest {})",
                entry.name(),
                entry.version(),
                entry.download_url().unwrap_or_default(),
                entry.digest
            );
        }
    }

    Ok(())
}

async fn execute_delete(
    name: &str,
    version: &str,
    repo: &str,
    acl: Option<String>,
    schema: IndexSchema,
) -> Result<()> {
    let repository = open_repository(repo, schema)?;

    let location = repository
        .delete(name, version, acl)
        .await
        .with_context(|| format!("Failed to delete {name} {version}"))?;

    println!("Deleted {name} {version} ({location})");
    Ok(())
}

async fn execute_reindex(repo: &str, options: &ReindexOptions, schema: IndexSchema) -> Result<()> {
    let repository = open_repository(repo, schema)?;

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Interrupted, stopping reindex...");
            on_interrupt.cancel();
        }
    });

    let index = repository
        .reindex(options, cancel)
        .await
        .with_context(|| format!("Failed to reindex {}", repository.url()))?;

    println!(
        "Reindexed {}: {} chart(s), {} version(s)",
        repository.url(),
        index.chart_count(),
        index.version_count()
    );
    Ok(())
}

async fn execute_fetch(repo: &str, schema: IndexSchema) -> Result<()> {
    let repository = open_repository(repo, schema)?;
    let bytes = repository.fetch_raw_index().await?;

    let mut stdout = std::io::stdout().lock();
    stdout
        .write_all(&bytes)
        .context("Failed to write index to stdout")?;
    stdout.flush()?;

    Ok(())
}

/// Table row for chart listings
#[derive(Tabled)]
struct ChartRow {
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Version")]
    version: String,
    #[tabled(rename = "App Version")]
    app_version: String,
    #[tabled(rename = "Created")]
    created: String,
    #[tabled(rename = "Digest")]
    digest: String,
}

async fn execute_list(repo: &str, json_output: bool, schema: IndexSchema) -> Result<()> {
    let repository = open_repository(repo, schema)?;
    let mut index = repository.fetch_index().await?;
    index.sort_entries();

    let entries: Vec<_> = index.entries.values().flatten().collect();

    if json_output {
        let json_results: Vec<serde_json::Value> = entries
            .iter()
            .map(|entry| {
                serde_json::json!({
                    "name": entry.name(),
                    "version": entry.version(),
                    "appVersion": entry.metadata.app_version,
                    "description": entry.metadata.description,
                    "urls": entry.urls,
                    "digest": entry.digest,
                    "created": entry.created.to_rfc3339(),
                })
            })
            .collect();

        println!("{}", serde_json::to_string_pretty(&json_results)?);
        return Ok(());
    }

    if entries.is_empty() {
        println!("No charts in {}", repository.url());
        return Ok(());
    }

    let table_rows: Vec<ChartRow> = entries
        .iter()
        .map(|entry| ChartRow {
            name: entry.name().to_string(),
            version: entry.version().to_string(),
            app_version: entry.metadata.app_version.clone().unwrap_or_default(),
            created: entry.created.format("%Y-%m-%d %H:%M").to_string(),
            digest: short_digest(&entry.digest),
        })
        .collect();

    let table = Table::new(&table_rows)
        .with(Style::rounded())
        .with(Modify::new(Rows::first()).with(Alignment::center()))
        .to_string();

    println!("{table}");
    Ok(())
}

/// First 12 characters of the digest value, keeping the algorithm
fn short_digest(digest: &str) -> String {
    let Some((algorithm, value)) = digest.split_once(':') else {
        return digest.to_string();
    };

    match value.char_indices().nth(12) {
        Some((end, _)) => format!("{algorithm}:{}", &value[..end]),
        None => digest.to_string(),
    }
}

fn execute_repo_command(command: RepoCommand) -> Result<()> {
    let mut catalog = RepoCatalog::load()?;

    match command {
        RepoCommand::Add { name, url } => {
            catalog.add_repository(&name, &url)?;
            catalog.save()?;
            println!("Added repository '{name}' -> {url}");
        }
        RepoCommand::List => {
            if catalog.repositories().is_empty() {
                println!("No repositories configured.");
                return Ok(());
            }
            println!("Configured repositories:\n");
            for repository in catalog.repositories() {
                println!("  {} -> {}", repository.name, repository.url);
            }
        }
        RepoCommand::Remove { name } => {
            catalog.remove_repository(&name)?;
            catalog.save()?;
            println!("Removed repository '{name}'");
        }
    }

    Ok(())
}
