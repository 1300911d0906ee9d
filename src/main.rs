use std::sync::Arc;

use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lotbook::config::Config;
use lotbook::model::{ClassKey, LotRef, NodeId, Query, RegionCode, TimeSlot};
use lotbook::scheduler::Scheduler;
use lotbook::store::Store;

#[derive(Parser)]
#[command(name = "lotbook")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Book and cancel hour windows on lots over per-node timeslot tables")]
#[command(long_about = "Configuration comes from LOTBOOK_* environment variables \
(LOTBOOK_DB, LOTBOOK_NODES, LOTBOOK_EPOCH, ...) or a JSON file named by LOTBOOK_CONFIG.")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the timeslot table of every configured node
    Init,
    /// Register a lot as free over the whole horizon
    Register {
        #[command(flatten)]
        lot: LotArgs,
    },
    /// Book a window on a lot
    Book {
        #[command(flatten)]
        lot: LotArgs,
        #[command(flatten)]
        window: WindowArgs,
    },
    /// Cancel a booked window on a lot
    Cancel {
        #[command(flatten)]
        lot: LotArgs,
        #[command(flatten)]
        window: WindowArgs,
    },
    /// Find lots free over a whole window
    Search {
        #[arg(long)]
        node: NodeId,
        #[arg(long)]
        region: RegionCode,
        #[arg(long)]
        area: Option<u32>,
        #[arg(long)]
        locality: Option<u32>,
        #[arg(long)]
        sublocality: Option<u32>,
        #[arg(long)]
        housing: Option<u64>,
        #[arg(long)]
        lot: Option<u64>,
        #[command(flatten)]
        window: WindowArgs,
        #[arg(long, default_value_t = 0)]
        offset: u64,
        /// Page size (default 100, at most 1000)
        #[arg(long)]
        limit: Option<u64>,
    },
    /// Print every free row of a lot
    Timeline {
        #[command(flatten)]
        lot: LotArgs,
    },
}

#[derive(Args)]
struct LotArgs {
    #[arg(long)]
    node: NodeId,
    #[arg(long)]
    region: RegionCode,
    #[arg(long, default_value_t = 0)]
    area: u32,
    #[arg(long, default_value_t = 0)]
    locality: u32,
    #[arg(long, default_value_t = 0)]
    sublocality: u32,
    #[arg(long)]
    housing: u64,
    #[arg(long)]
    lot: u64,
}

impl LotArgs {
    fn key(&self) -> ClassKey {
        ClassKey::new(self.region, self.area, self.locality, self.sublocality)
    }

    fn lot(&self) -> LotRef {
        LotRef::new(self.housing, self.lot)
    }

    fn slot(&self, window: &WindowArgs) -> TimeSlot {
        TimeSlot {
            node: self.node,
            key: self.key(),
            lot: self.lot(),
            start_at: window.from,
            end_at: window.to,
        }
    }
}

#[derive(Args)]
struct WindowArgs {
    /// Window start, RFC 3339
    #[arg(long)]
    from: DateTime<Utc>,
    /// Window end (exclusive), RFC 3339
    #[arg(long)]
    to: DateTime<Utc>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "lotbook=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;
    lotbook::observability::init(config.metrics_port)?;

    let registry = config.registry()?;
    let store = Arc::new(Store::open(&config.store, registry)?);

    if let Commands::Init = cli.command {
        let tables: Vec<&str> = store.tables().tables().map(|t| t.name()).collect();
        info!("schema ready for {} node tables", tables.len());
        println!("{}", serde_json::to_string_pretty(&tables)?);
        return Ok(());
    }

    let scheduler = Scheduler::with_settings(store, config.epoch()?, config.scheduler);
    info!("  epoch: {}", scheduler.horizon().epoch());

    let ok = serde_json::json!({ "status": "ok" });
    let out = match cli.command {
        Commands::Init => return Ok(()),
        Commands::Register { lot } => {
            scheduler.register_lot(lot.node, lot.key(), lot.lot()).await?;
            ok
        }
        Commands::Book { lot, window } => {
            scheduler.book(&lot.slot(&window)).await?;
            ok
        }
        Commands::Cancel { lot, window } => {
            scheduler.cancel(&lot.slot(&window)).await?;
            ok
        }
        Commands::Search {
            node,
            region,
            area,
            locality,
            sublocality,
            housing,
            lot,
            window,
            offset,
            limit,
        } => {
            let query = Query {
                area,
                locality,
                sublocality,
                housing_id: housing,
                lot_id: lot,
                offset,
                limit,
                ..Query::new(node, region, window.from, window.to)
            };
            serde_json::to_value(scheduler.search(&query).await?)?
        }
        Commands::Timeline { lot } => {
            serde_json::to_value(scheduler.timeline(lot.node, lot.key(), lot.lot()).await?)?
        }
    };
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}
