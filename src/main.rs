//! Fraud feature store CLI: materialize point-in-time feature tables from a transaction
//! log, join them onto entity rows, query the offline store, and check the external stack.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use fraud_feature_store::{
    config::FeatureStoreConfig,
    dataset::{parse_timestamp, read_transactions, FeedFormat},
    export::{self, read_user_features, write_joined, write_transactions},
    features::FeatureMaterializer,
    join::{read_entity_rows, ttl_from_days, SnapshotIndex},
    logging::{LogEvent, StructuredLogger},
    registry::{self, USER_TRANSACTION_FEATURES},
    stack::StackChecker,
    storage::OfflineStore,
};
use serde::Serialize;
use std::fs::File;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(name = "fraud-feature-store", version, about = "Point-in-time feature materializer")]
struct Cli {
    /// Config file (default: $FFS_CONFIG_PATH, then config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Build user/merchant/category feature tables from a transaction CSV
    Materialize {
        #[arg(long)]
        input: PathBuf,
        /// Input is a raw card log (cc_num, merchant, amt, ...) rather than the feed schema
        #[arg(long)]
        raw: bool,
        /// Output directory (default: config data_dir)
        #[arg(long)]
        out_dir: Option<PathBuf>,
        /// Skip loading the SQLite offline store
        #[arg(long)]
        no_store: bool,
    },
    /// Point-in-time join of user features onto entity rows (user_id, event_timestamp)
    Join {
        #[arg(long)]
        entities: PathBuf,
        /// user_features CSV; read from the offline store when omitted
        #[arg(long)]
        features: Option<PathBuf>,
        #[arg(long)]
        output: Option<PathBuf>,
        /// Ignore snapshots older than this many days before the request (positive)
        #[arg(long)]
        ttl_days: Option<i64>,
    },
    /// Latest user snapshot at or before a timestamp, from the offline store
    Lookup {
        #[arg(long)]
        user: String,
        #[arg(long)]
        at: String,
    },
    /// Check Postgres, Redis and MLflow connectivity
    Check,
    /// Print entity and feature-view declarations
    Registry,
}

#[derive(Serialize)]
struct MaterializeSummary {
    transactions: usize,
    user_features: usize,
    merchant_features: usize,
    category_features: usize,
    files: Vec<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    store: Option<PathBuf>,
}

#[derive(Serialize)]
struct JoinSummary {
    entity_rows: usize,
    matched: usize,
    output: PathBuf,
}

fn emit<T: Serialize>(command: &str, message: &str, detail: T) {
    StructuredLogger::emit_json(&LogEvent::info(command, message, detail), &mut std::io::stdout());
}

fn materialize(
    config: &FeatureStoreConfig,
    input: PathBuf,
    raw: bool,
    out_dir: Option<PathBuf>,
    no_store: bool,
) -> anyhow::Result<()> {
    let format = if raw { FeedFormat::RawCardLog } else { FeedFormat::Feed };
    let transactions = read_transactions(&input, format)
        .with_context(|| format!("reading {}", input.display()))?;

    let tables = FeatureMaterializer::new(config.materializer.clone()).run(&transactions);
    let out_dir = out_dir.unwrap_or_else(|| config.data_dir.clone());
    let mut files = vec![write_transactions(&out_dir, &transactions)?];
    files.extend(export::write_tables(&out_dir, &tables)?);

    let store = if no_store {
        None
    } else {
        let path = out_dir.join(&config.store_file);
        let counts = OfflineStore::open(&path)?.load(&transactions, &tables)?;
        info!(path = %path.display(), ?counts, "offline store loaded");
        Some(path)
    };

    emit(
        "materialize",
        "feature tables written",
        MaterializeSummary {
            transactions: transactions.len(),
            user_features: tables.user_features.len(),
            merchant_features: tables.merchant_features.len(),
            category_features: tables.category_features.len(),
            files,
            store,
        },
    );
    Ok(())
}

fn join(
    config: &FeatureStoreConfig,
    entities: PathBuf,
    features: Option<PathBuf>,
    output: Option<PathBuf>,
    ttl_days: Option<i64>,
) -> anyhow::Result<()> {
    let entity_set = read_entity_rows(
        File::open(&entities).with_context(|| format!("opening {}", entities.display()))?,
    )?;
    let snapshots = match features {
        Some(path) => read_user_features(File::open(&path)?)?,
        None => OfflineStore::open(&config.store_path())?.user_features()?,
    };

    let mut index = SnapshotIndex::build(snapshots)?;
    let ttl = match ttl_days {
        Some(days) => Some(ttl_from_days(days)?),
        None if config.join.respect_ttl => Some(USER_TRANSACTION_FEATURES.ttl()),
        None => None,
    };
    if let Some(ttl) = ttl {
        index = index.with_ttl(ttl);
    }

    let joined = index.historical_features(&entity_set.rows);
    let matched = joined.iter().filter(|r| r.features.is_some()).count();
    let output = output.unwrap_or_else(|| config.data_dir.join("training_dataset.csv"));
    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    write_joined(File::create(&output)?, &entity_set.extra_columns, &joined)?;

    emit(
        "join",
        "point-in-time join written",
        JoinSummary {
            entity_rows: entity_set.rows.len(),
            matched,
            output,
        },
    );
    Ok(())
}

fn lookup(config: &FeatureStoreConfig, user: &str, at: &str) -> anyhow::Result<()> {
    let Some(at) = parse_timestamp(at) else {
        bail!("cannot parse timestamp {at:?}");
    };
    let snapshot = OfflineStore::open(&config.store_path())?.user_features_as_of(user, at)?;
    emit("lookup", "as-of lookup", snapshot);
    Ok(())
}

fn check(config: &FeatureStoreConfig) -> anyhow::Result<bool> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let checker = StackChecker::new(config.stack.clone())?;
    let report = runtime.block_on(checker.run());
    let passed = report.all_passed();
    emit("check", if passed { "stack healthy" } else { "stack degraded" }, &report);
    Ok(passed)
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config_path = cli
        .config
        .or_else(|| std::env::var("FFS_CONFIG_PATH").ok().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("config.json"));
    let config = FeatureStoreConfig::load(&config_path);

    StructuredLogger::init(config.log.json, &config.log.level);
    info!(config = %config_path.display(), data_dir = ?config.data_dir, "fraud feature store starting");

    let result = match cli.command {
        Command::Materialize {
            input,
            raw,
            out_dir,
            no_store,
        } => materialize(&config, input, raw, out_dir, no_store),
        Command::Join {
            entities,
            features,
            output,
            ttl_days,
        } => join(&config, entities, features, output, ttl_days),
        Command::Lookup { user, at } => lookup(&config, &user, &at),
        Command::Check => match check(&config) {
            Ok(true) => Ok(()),
            Ok(false) => std::process::exit(1),
            Err(e) => Err(e),
        },
        Command::Registry => {
            emit("registry", "feature views", registry::summary());
            Ok(())
        }
    };

    if let Err(e) = &result {
        StructuredLogger::emit_json(
            &LogEvent::<()>::error("run", "command failed", format!("{e:#}")),
            &mut std::io::stdout(),
        );
    }
    result
}
