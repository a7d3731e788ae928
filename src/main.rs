use anyhow::{bail, Result};
use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand, ValueEnum};
use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use event_scraper::config::{AppConfig, StorageBackend};
use event_scraper::dates::{format_month_day_year, DateParser, YearPolicy};
use event_scraper::export::{write_events, ExportFormat};
use event_scraper::pipeline::{Pipeline, ScrapeFilter};
use event_scraper::storage::mongo::MongoStore;
use event_scraper::storage::Repository;
use event_scraper::utils::{self, clip, fmt_count, fmt_when};
use event_scraper::venues::{Catalogue, City};

#[derive(Parser)]
#[command(name = "event-scraper", about = "City event listings scraper", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Command {
    /// Scrape venue listing pages and store new events
    Scrape {
        /// Only venues in this city (e.g. toronto, nyc, montreal)
        city: Option<City>,

        /// Only this venue id
        #[arg(long)]
        venue: Option<String>,

        /// Print events as JSON lines instead of writing them
        #[arg(long)]
        dry_run: bool,
    },

    /// List configured venues
    Venues {
        city: Option<City>,
    },

    /// Run the date parser on a piece of text
    ParseDate {
        text: String,

        /// Reference day (default: today)
        #[arg(long)]
        today: Option<NaiveDate>,

        #[arg(long, value_enum, default_value = "roll-forward")]
        policy: PolicyArg,
    },

    /// Show event store statistics
    Stats,

    /// Show per-venue scrape health
    Health,

    /// Export stored events
    Export {
        #[arg(short, long, value_enum, default_value = "csv")]
        format: ExportFormat,

        #[arg(long)]
        city: Option<City>,

        /// Output file (default: stdout)
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Apply schema migrations
    Migrate,
}

#[derive(Clone, Copy, ValueEnum)]
enum PolicyArg {
    Current,
    RollForward,
}

impl From<PolicyArg> for YearPolicy {
    fn from(p: PolicyArg) -> Self {
        match p {
            PolicyArg::Current => YearPolicy::CurrentYear,
            PolicyArg::RollForward => YearPolicy::RollForward,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "event_scraper=info,warn",
        1 => "event_scraper=debug,info",
        _ => "trace",
    };

    // stdout is reserved for command output (dry-run JSON, exports)
    tracing_subscriber::registry()
        .with(fmt::layer().compact().with_target(false).with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();

    let config = AppConfig::load()?;

    match cli.command {
        Command::Scrape { city, venue, dry_run } => {
            let _t = utils::Timer::start("Scrape");
            let filter = ScrapeFilter { city, venue };
            let stats = Pipeline::new(config).dry_run(dry_run).run(&filter).await?;
            if stats.all_failed() {
                bail!("all {} venues failed", stats.venues);
            }
        }

        Command::Venues { city } => {
            let catalogue = Catalogue::with_overrides(&config.venues);
            let venues: Vec<_> = match city {
                Some(city) => catalogue.for_city(city),
                None => catalogue.all().iter().collect(),
            };
            for v in venues {
                println!(
                    "{:<26} {:<10} {:<28} {:<9} {}{}",
                    v.id,
                    v.city.name(),
                    clip(&v.name, 28),
                    format!("{:?}", v.kind).to_lowercase(),
                    v.listing_url,
                    if v.enabled { "" } else { "  (disabled)" },
                );
            }
        }

        Command::ParseDate { text, today, policy } => {
            let today = today.unwrap_or_else(|| Local::now().date_naive());
            let parser = DateParser::new(today, policy.into());
            match parser.parse(&text) {
                Some(p) => {
                    println!("pattern : {:?}", p.pattern);
                    println!("start   : {}", format_month_day_year(p.start));
                    if let Some(end) = p.end {
                        println!("end     : {}", format_month_day_year(end));
                    }
                    if let Some(t) = p.start_time {
                        println!("time    : {}", t.format("%H:%M"));
                    }
                    if let Some(t) = p.end_time {
                        println!("until   : {}", t.format("%H:%M"));
                    }
                }
                None => println!("no date found in {:?}", text),
            }
        }

        Command::Stats if config.storage.selected_backend() == StorageBackend::MongoDb => {
            let store = MongoStore::connect(&config.storage).await?;
            println!("  Events (MongoDB) : {}", fmt_count(store.event_count().await? as i64));
        }

        Command::Stats => {
            let repo = Repository::open(&config.storage.db_path)?;
            let total = repo.event_count()?;
            let (min, max) = repo.date_range().unwrap_or((None, None));
            println!("─────────────────────────────────");
            println!("  Event store stats");
            println!("─────────────────────────────────");
            println!("  Events   : {}", fmt_count(total));
            for (city, n) in repo.count_by_city()? {
                println!("    {:<12}: {}", city, fmt_count(n));
            }
            println!("  From     : {}", fmt_when(min));
            println!("  To       : {}", fmt_when(max));
            println!("─────────────────────────────────");

            let upcoming = repo.upcoming(None, Local::now().naive_local(), 5)?;
            if !upcoming.is_empty() {
                println!("  Next up:");
                for e in upcoming {
                    println!("    {}  {}  ({})", fmt_when(e.start_date), clip(&e.title, 40), e.venue.name);
                }
            }
        }

        Command::Health => {
            let repo = Repository::open(&config.storage.db_path)?;
            let report = repo.venue_health(config.monitoring.alert_threshold)?;
            if report.is_empty() {
                println!("No scrape runs yet — run `event-scraper scrape` first.");
            }
            for h in report {
                println!(
                    "{} {:<26} streak {:<2} last {:<8} {}{}",
                    if h.healthy { "ok  " } else { "WARN" },
                    h.venue_id,
                    h.consecutive_failures,
                    h.last_status,
                    fmt_when(h.last_run),
                    h.last_error.map(|e| format!("  {}", clip(&e, 60))).unwrap_or_default(),
                );
            }
        }

        Command::Export { format, city, out } => {
            let repo = Repository::open(&config.storage.db_path)?;
            let events = repo.all_events(city.map(City::name))?;
            let n = match &out {
                Some(path) => write_events(&events, format, BufWriter::new(File::create(path)?))?,
                None => write_events(&events, format, std::io::stdout().lock())?,
            };
            info!("Exported {} events", n);
        }

        Command::Migrate => {
            Repository::open(&config.storage.db_path)?.run_migrations()?;
            println!("Migrations applied.");
        }
    }

    Ok(())
}
