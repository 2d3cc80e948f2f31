//! tagstash CLI - inspect and drive a tag-aware cache from the shell.
//!
//! Lists and reports go to stdout as JSON, `load` writes the raw payload, and
//! logs go to stderr so output stays pipeable.

mod commands;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tagstash::{CacheStore, CleaningMode, DefaultStoreFactory, SqliteStore, TagStashConfig};
use tracing::{debug, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "tagstash")]
#[command(about = "Tag-aware cache over a key-value store")]
struct Args {
    /// SQLite database file to use, overriding the configured dsn
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// JSON configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Default lifetime in seconds for saves without --ttl
    #[arg(long, global = true)]
    lifetime: Option<u64>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
enum Command {
    /// Store a payload (VALUE, or stdin when omitted) under an id
    Save {
        id: String,
        /// Tag to attach; repeat for several
        #[arg(short, long = "tag")]
        tags: Vec<String>,
        /// Lifetime in seconds instead of the default
        #[arg(long, conflicts_with = "infinite")]
        ttl: Option<u64>,
        /// Never expire
        #[arg(long)]
        infinite: bool,
        value: Option<String>,
    },
    /// Write an entry's payload to stdout; exits 1 on a miss
    Load { id: String },
    /// Exit 0 if an entry exists, 1 otherwise
    Test { id: String },
    /// Delete an entry's payload; exits 1 if it did not exist
    Remove { id: String },
    /// Remove entries: all, old, matching_tag, not_matching_tag, matching_any_tag
    Clean {
        mode: CleaningMode,
        #[arg(short, long = "tag")]
        tags: Vec<String>,
    },
    /// List every saved id
    Ids,
    /// List every tag in use
    Tags,
    /// List ids carrying all of the tags
    Matching {
        #[arg(short, long = "tag")]
        tags: Vec<String>,
    },
    /// List ids carrying none of the tags
    NotMatching {
        #[arg(short, long = "tag")]
        tags: Vec<String>,
    },
    /// List ids carrying any of the tags
    Any {
        #[arg(short, long = "tag")]
        tags: Vec<String>,
    },
    /// Set an entry to expire SECS seconds from now
    Touch { id: String, secs: u64 },
    /// Prune removed and expired ids from the tag index
    Compact,
    /// Print the cache capability descriptor
    Capabilities,
}

fn open_cache(args: &Args) -> Result<CacheStore> {
    let mut config = match &args.config {
        Some(path) => TagStashConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => TagStashConfig::default(),
    };
    if let Some(secs) = args.lifetime {
        config.directives.default_lifetime = Duration::from_secs(secs);
    }

    let cache = match &args.db {
        Some(path) => {
            let store = SqliteStore::open(path)
                .with_context(|| format!("Failed to open {}", path.display()))?;
            debug!("Using store at {}", path.display());
            CacheStore::new(Arc::new(store), config.directives)
        }
        None => CacheStore::open(
            &DefaultStoreFactory::default(),
            &config.connection,
            config.directives,
        )
        .with_context(|| format!("Failed to open store {}", config.connection.dsn))?,
    };
    Ok(cache)
}

fn main() -> Result<ExitCode> {
    let args = Args::parse();

    let log_level = if args.debug { Level::DEBUG } else { Level::WARN };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();

    let cache = open_cache(&args)?;
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    commands::run(&cache, &args.command, std::io::stdin().lock(), &mut out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_parse_save() {
        let args = Args::try_parse_from([
            "tagstash", "--db", "/tmp/c.sqlite", "save", "k1", "-t", "a", "--tag", "b", "--ttl",
            "60", "hello",
        ])
        .unwrap();

        assert_eq!(args.db, Some(PathBuf::from("/tmp/c.sqlite")));
        assert_eq!(
            args.command,
            Command::Save {
                id: "k1".into(),
                tags: vec!["a".into(), "b".into()],
                ttl: Some(60),
                infinite: false,
                value: Some("hello".into()),
            }
        );
    }

    #[test]
    fn test_ttl_conflicts_with_infinite() {
        let result =
            Args::try_parse_from(["tagstash", "save", "k1", "--ttl", "60", "--infinite"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_clean_mode() {
        let args =
            Args::try_parse_from(["tagstash", "clean", "matching-any-tag", "-t", "a"]).unwrap();
        assert_eq!(
            args.command,
            Command::Clean {
                mode: CleaningMode::MatchingAnyTag,
                tags: vec!["a".into()],
            }
        );

        assert!(Args::try_parse_from(["tagstash", "clean", "sometimes"]).is_err());
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let args = Args::try_parse_from(["tagstash", "ids", "--debug", "--lifetime", "30"]).unwrap();
        assert!(args.debug);
        assert_eq!(args.lifetime, Some(30));
    }
}
