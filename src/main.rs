//! Honeyforge CLI
//!
//! Each subcommand runs one batch job against the shared database and
//! the honeypot log index.

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use honeyforge::clustering::{self, ClusteringAlgorithm};
use honeyforge::enrichment::{self, AbuseIpDbFeed, TagFeed, ThreatFoxFeed};
use honeyforge::extraction::ExtractionPipeline;
use honeyforge::jobs::{self, Job};
use honeyforge::logsource::elastic::ElasticEventSource;
use honeyforge::logsource::{EXTRACTION_INTERVAL, LogSourceAdapter};
use honeyforge::scoring::forest::ModelStore;
use honeyforge::scoring::jobs::{TrainModels, UpdateScores};
use honeyforge::storage::{self, Storage};

/// Honeyforge
#[derive(Parser, Debug)]
#[command(name = "honeyforge")]
#[command(about = "Extract, deduplicate, and score IOCs from honeypot telemetry")]
struct Args {
    /// Database URL
    #[arg(long, env = "DATABASE_URL")]
    database_url: String,

    /// Elasticsearch base URL of the honeypot log index
    #[arg(long, env = "ELASTIC_URL", default_value = "http://localhost:9200")]
    elastic_url: String,

    /// Directory for trained models and the training snapshot
    #[arg(long, env = "MODEL_DIRECTORY", default_value = "./models")]
    model_directory: String,

    /// Minutes between two subsequent extraction runs (divisor of 60)
    #[arg(long, env = "EXTRACTION_INTERVAL", default_value_t = EXTRACTION_INTERVAL)]
    extraction_interval: u32,

    /// AbuseIPDB API key for tag enrichment
    #[arg(long, env = "ABUSEIPDB_API_KEY")]
    abuseipdb_api_key: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run database migrations
    Migrate,
    /// Extract IOCs from the honeypot log index
    Extract,
    /// Cluster stored command sequences
    Cluster {
        /// Grouping engine: exact, approximate, or auto
        #[arg(long, default_value = "auto")]
        algorithm: String,
        /// Jaccard similarity threshold for grouping
        #[arg(long, default_value_t = 0.55)]
        threshold: f64,
    },
    /// Recompute scores for all active scanner IOCs
    Score,
    /// Train the scoring models against the previous snapshot
    Train,
    /// Apply tag enrichment feeds
    Enrich,
    /// Refresh the static reference lists
    RefreshLists,
    /// Check that every enabled honeypot still produces events
    Monitor {
        /// Minutes of silence before a honeypot is reported
        #[arg(long, default_value_t = 360)]
        lookback: i64,
    },
}

struct ExtractJob {
    storage: Storage,
    elastic_url: String,
    model_directory: String,
    interval: u32,
}

#[async_trait]
impl Job for ExtractJob {
    fn name(&self) -> &'static str {
        "extract"
    }

    async fn run(&mut self) -> Result<()> {
        let source = ElasticEventSource::new(&self.elastic_url);
        let mut pipeline = ExtractionPipeline::new(&source, &self.storage, self.interval).await?;
        let outcome = pipeline.execute().await?;
        tracing::info!(count = outcome.ioc_names.len(), "extracted IOCs");

        // rescore just the records this run touched
        let iocs = storage::IocRepository::new(self.storage.pool().clone()).await?;
        let highrisk = storage::HighRiskNetworkRepository::new(self.storage.pool().clone()).await?;
        let store = ModelStore::new(&self.model_directory);
        let scores = UpdateScores::new(&iocs, &highrisk, &store);
        scores.score_only(&outcome.ioc_names).await?;
        Ok(())
    }
}

struct ClusterJob {
    storage: Storage,
    algorithm: ClusteringAlgorithm,
    threshold: f64,
}

#[async_trait]
impl Job for ClusterJob {
    fn name(&self) -> &'static str {
        "cluster"
    }

    async fn run(&mut self) -> Result<()> {
        let sessions = storage::CowrieSessionRepository::new(self.storage.pool().clone());
        clustering::cluster_command_sequences(&sessions, self.algorithm, self.threshold).await?;
        Ok(())
    }
}

struct ScoreJob {
    storage: Storage,
    model_directory: String,
}

#[async_trait]
impl Job for ScoreJob {
    fn name(&self) -> &'static str {
        "score"
    }

    async fn run(&mut self) -> Result<()> {
        let iocs = storage::IocRepository::new(self.storage.pool().clone()).await?;
        let highrisk = storage::HighRiskNetworkRepository::new(self.storage.pool().clone()).await?;
        let store = ModelStore::new(&self.model_directory);
        UpdateScores::new(&iocs, &highrisk, &store).run().await?;
        Ok(())
    }
}

struct TrainJob {
    storage: Storage,
    model_directory: String,
}

#[async_trait]
impl Job for TrainJob {
    fn name(&self) -> &'static str {
        "train"
    }

    async fn run(&mut self) -> Result<()> {
        let iocs = storage::IocRepository::new(self.storage.pool().clone()).await?;
        let store = ModelStore::new(&self.model_directory);
        TrainModels::new(&iocs, store).run().await?;
        Ok(())
    }
}

struct EnrichJob {
    storage: Storage,
    abuseipdb_api_key: Option<String>,
}

#[async_trait]
impl Job for EnrichJob {
    fn name(&self) -> &'static str {
        "enrich"
    }

    async fn run(&mut self) -> Result<()> {
        let tags = storage::TagRepository::new(self.storage.pool().clone());
        let feeds: Vec<Box<dyn TagFeed>> = vec![
            Box::new(ThreatFoxFeed::new()),
            Box::new(AbuseIpDbFeed::new(self.abuseipdb_api_key.clone())),
        ];
        let created = enrichment::apply_feeds(&tags, &feeds).await?;
        tracing::info!(created, "tag enrichment finished");
        Ok(())
    }
}

struct MonitorJob {
    storage: Storage,
    elastic_url: String,
    interval: u32,
    lookback: i64,
}

#[async_trait]
impl Job for MonitorJob {
    fn name(&self) -> &'static str {
        "monitor"
    }

    async fn run(&mut self) -> Result<()> {
        let source = ElasticEventSource::new(&self.elastic_url);
        let adapter = LogSourceAdapter::new(&source, self.interval);
        let iocs = storage::IocRepository::new(self.storage.pool().clone()).await?;

        let mut silent = 0;
        for honeypot in iocs.get_active_honeypots().await? {
            let hit = adapter
                .has_honeypot_been_hit(Utc::now(), self.lookback, &honeypot.name)
                .await?;
            if hit {
                tracing::debug!(honeypot = honeypot.name, "honeypot is producing events");
            } else {
                tracing::warn!(
                    honeypot = honeypot.name,
                    lookback_minutes = self.lookback,
                    "no events from honeypot"
                );
                silent += 1;
            }
        }
        tracing::info!(silent, "honeypot monitoring finished");
        Ok(())
    }
}

struct RefreshListsJob {
    storage: Storage,
}

impl RefreshListsJob {
    const WHATSMYIP_URL: &'static str =
        "https://raw.githubusercontent.com/MISP/misp-warninglists/refs/heads/main/lists/whats-my-ip/list.json";
    const MASS_SCANNER_URL: &'static str =
        "https://raw.githubusercontent.com/stamparm/maltrail/master/trails/static/mass_scanner.txt";
    const ASN_DROP_URL: &'static str = "https://www.spamhaus.org/drop/asndrop.json";

    async fn refresh_whatsmyip(&self, client: &reqwest::Client) -> Result<()> {
        let response: serde_json::Value =
            client.get(Self::WHATSMYIP_URL).send().await?.json().await?;
        let domains = response["list"]
            .as_array()
            .ok_or_else(|| anyhow::anyhow!("missing 'list' key in whats-my-ip response"))?;
        let mut repo = storage::WhatsMyIpRepository::new(self.storage.pool().clone()).await?;
        for domain in domains.iter().filter_map(|d| d.as_str()) {
            repo.add_domain(domain).await?;
        }
        Ok(())
    }

    async fn refresh_mass_scanners(&self, client: &reqwest::Client) -> Result<()> {
        let body = client
            .get(Self::MASS_SCANNER_URL)
            .send()
            .await?
            .text()
            .await?;
        let addresses: Vec<String> = body
            .lines()
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .filter_map(|line| {
                let candidate = line.split('#').next().unwrap_or(line).trim();
                candidate
                    .parse::<std::net::Ipv4Addr>()
                    .ok()
                    .map(|_| candidate.to_string())
            })
            .collect();
        let mut repo = storage::MassScannerRepository::new(self.storage.pool().clone()).await?;
        let count = repo.replace_all(&addresses).await?;
        tracing::info!(count, "refreshed mass scanner list");
        Ok(())
    }

    async fn refresh_highrisk_networks(&self, client: &reqwest::Client) -> Result<()> {
        let body = client.get(Self::ASN_DROP_URL).send().await?.text().await?;
        let entries: Vec<(String, Option<String>)> = body
            .lines()
            .filter_map(|line| serde_json::from_str::<serde_json::Value>(line).ok())
            .filter_map(|value| {
                value["asn"]
                    .as_i64()
                    .map(|asn| (asn.to_string(), value["cidr"].as_str().map(String::from)))
            })
            .collect();
        let mut repo = storage::HighRiskNetworkRepository::new(self.storage.pool().clone()).await?;
        let count = repo.replace_all(&entries).await?;
        tracing::info!(count, "refreshed high-risk network list");
        Ok(())
    }
}

#[async_trait]
impl Job for RefreshListsJob {
    fn name(&self) -> &'static str {
        "refresh-lists"
    }

    async fn run(&mut self) -> Result<()> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()?;
        self.refresh_whatsmyip(&client).await?;
        self.refresh_mass_scanners(&client).await?;
        self.refresh_highrisk_networks(&client).await?;
        Ok(())
    }
}

fn parse_algorithm(raw: &str) -> Result<ClusteringAlgorithm> {
    match raw {
        "exact" => Ok(ClusteringAlgorithm::Exact),
        "approximate" => Ok(ClusteringAlgorithm::Approximate),
        "auto" => Ok(ClusteringAlgorithm::Auto),
        other => anyhow::bail!("unknown clustering algorithm: {other}"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "honeyforge=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    tracing::info!("starting honeyforge");

    let storage = Storage::connect(&args.database_url).await?;

    let mut job: Box<dyn Job> = match args.command {
        Command::Migrate => {
            tracing::info!("running database migrations");
            storage.migrate().await?;
            tracing::info!("migrations complete");
            return Ok(());
        }
        Command::Extract => Box::new(ExtractJob {
            storage,
            elastic_url: args.elastic_url,
            model_directory: args.model_directory,
            interval: args.extraction_interval,
        }),
        Command::Cluster {
            algorithm,
            threshold,
        } => Box::new(ClusterJob {
            storage,
            algorithm: parse_algorithm(&algorithm)?,
            threshold,
        }),
        Command::Score => Box::new(ScoreJob {
            storage,
            model_directory: args.model_directory,
        }),
        Command::Train => Box::new(TrainJob {
            storage,
            model_directory: args.model_directory,
        }),
        Command::Enrich => Box::new(EnrichJob {
            storage,
            abuseipdb_api_key: args.abuseipdb_api_key,
        }),
        Command::RefreshLists => Box::new(RefreshListsJob { storage }),
        Command::Monitor { lookback } => Box::new(MonitorJob {
            storage,
            elastic_url: args.elastic_url,
            interval: args.extraction_interval,
            lookback,
        }),
    };

    if !jobs::execute(job.as_mut()).await {
        std::process::exit(1);
    }
    Ok(())
}
