mod cli;
mod config;
mod datasources;
mod db;
mod error;
mod logic;
mod models;

use anyhow::Context as _;
use chrono::{Duration, Utc};
use clap::Parser;
use cli::{Cli, Commands};
use config::Config;
use datasources::{AppDbClient, ForecastSource, OpenMeteoClient};
use db::Database;
use logic::{
    DataSyncService, RuleRegistry, RulesEngine, SignalEvaluationService, SnapshotBuilder,
    SuggestionEngine, WeatherSnapshotCache,
};
use models::{TriggerSet, WeatherRegion};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(e) = run(cli).await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = match cli.command {
        Commands::Init => {
            Config::setup_interactive()?;
            return Ok(());
        }
        _ => Config::load(cli.config.as_ref()).context(
            "Please copy config/config.yaml.example to config/config.yaml or run `wellcast init`",
        )?,
    };
    let db = Database::open(cli.data_dir.as_ref())?;
    let today = Utc::now().date_naive();

    match cli.command {
        Commands::UpdateWeather { date } => {
            let date = date.unwrap_or(today);
            let report = weather_cache(&config, &db).update_weather_snapshots(date).await?;
            println!(
                "Weather {}: {} regions, {} updated, {} without data, {} failed",
                date, report.regions, report.updated, report.empty, report.failed
            );
        }
        Commands::BuildSnapshots { date } => {
            let date = date.unwrap_or(today);
            let builder = SnapshotBuilder::new(
                db.clone(),
                rules_engine(&config),
                weather_cache(&config, &db),
                config.batch.snapshot_limit,
            );
            let report = builder.build_suggestion_snapshots(date).await?;
            println!(
                "Snapshots {}: {} regions, {} built, {} skipped, {} rows, {} failed",
                date, report.regions, report.built, report.skipped, report.rows, report.failed
            );
        }
        Commands::EvaluateSignals { date, user, json } => {
            let date = date.unwrap_or(today);
            let triggers = TriggerSet::from_path(&config.rules.triggers_path)?;
            let service = SignalEvaluationService::new(db.clone(), Arc::new(triggers));

            match user {
                Some(user_id) => {
                    let events = service.evaluate(user_id, date)?;
                    if json {
                        println!("{}", serde_json::to_string_pretty(&events)?);
                    } else if events.is_empty() {
                        println!("No signals for user {} on {}", user_id, date);
                    } else {
                        for event in &events {
                            println!(
                                "{:<16} {:<10} priority {:>3}  observed {} ({} {})",
                                event.trigger_key,
                                event.level_id,
                                event.priority,
                                event.metadata.observed,
                                event.metadata.operator,
                                event.metadata.threshold
                            );
                        }
                    }
                }
                None => {
                    let report = service.evaluate_all(date)?;
                    println!(
                        "Signals {}: {} users, {} events, {} failed",
                        date, report.users, report.events, report.failed
                    );
                }
            }
        }
        Commands::Suggest { user, date, json } => {
            let date = date.unwrap_or(today);
            let engine = SuggestionEngine::new(
                db.clone(),
                rules_engine(&config),
                config.batch.snapshot_limit,
            );
            let suggestions = match engine.run(user, date) {
                Err(e) if e.is_not_found() => {
                    println!("No suggestions for user {} on {}: {}", user, date, e);
                    return Ok(());
                }
                result => result?,
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&suggestions)?);
            } else if suggestions.is_empty() {
                println!("No suggestions for user {} on {}", user, date);
            } else {
                for (i, s) in suggestions.iter().enumerate() {
                    println!("{}. [{}] {} ({})", i + 1, s.category, s.title, s.severity);
                    if !s.message.is_empty() {
                        println!("   {}", s.message);
                    }
                }
            }
        }
        Commands::Sync { since } => {
            let since = since.unwrap_or(today - Duration::days(7));
            let report = DataSyncService::new(config, db).sync(since).await?;
            println!(
                "Imported {} regions, {} users, {} daily logs ({} skipped), topics for {} users",
                report.regions, report.users, report.logs, report.skipped_logs, report.topic_users
            );
        }
        Commands::Check => check(&config, &db).await?,
        // Handled before the config is loaded
        Commands::Init => {}
    }

    Ok(())
}

fn rules_engine(config: &Config) -> Arc<RulesEngine> {
    let registry = RuleRegistry::from_path(config.rules.rules_path.clone());
    Arc::new(RulesEngine::new(Arc::new(registry)))
}

fn weather_cache(config: &Config, db: &Database) -> WeatherSnapshotCache {
    WeatherSnapshotCache::new(
        db.clone(),
        datasources::from_config(&config.forecast),
        config.forecast.anchor_hour,
        config.batch.workers,
    )
}

async fn check(config: &Config, db: &Database) -> anyhow::Result<()> {
    println!("Database: {}", db.path().display());

    let registry = RuleRegistry::from_path(config.rules.rules_path.clone());
    match registry.refresh() {
        Ok(set) => println!(
            "Rules:    OK ({} rules, version {}, {})",
            set.len(),
            set.version,
            config.rules.rules_path.display()
        ),
        Err(e) => println!("Rules:    FAILED - {}", e),
    }

    match TriggerSet::from_path(&config.rules.triggers_path) {
        Ok(set) => println!(
            "Triggers: OK ({} active of {}, version {})",
            set.active().count(),
            set.triggers.len(),
            set.version
        ),
        Err(e) => println!("Triggers: FAILED - {}", e),
    }

    let region = db
        .list_regions()?
        .into_iter()
        .next()
        .unwrap_or_else(|| WeatherRegion {
            id: "13".into(),
            name: "Tokyo".into(),
            latitude: 35.6895,
            longitude: 139.6917,
        });
    match config.forecast.provider {
        config::ForecastProvider::OpenMeteo => {
            let client = OpenMeteoClient::new(config.forecast.base_url.clone());
            match client.test_connection(&region).await {
                Ok(true) => println!("Forecast: OK (open_meteo, {})", region.name),
                Ok(false) => println!("Forecast: FAILED (open_meteo returned an error status)"),
                Err(e) => println!("Forecast: FAILED - {}", e),
            }
        }
        config::ForecastProvider::Dummy => {
            let source = datasources::DummyForecastSource;
            let sample = source.fetch_hour(&region, Utc::now()).await?;
            println!("Forecast: OK (dummy, sample {:?})", sample);
        }
    }

    match config.appdb.as_ref().filter(|c| c.enabled) {
        Some(appdb) => match AppDbClient::connect(appdb).await {
            Ok(client) if client.test_connection().await.unwrap_or(false) => {
                println!("App DB:   OK ({}:{})", appdb.host, appdb.port)
            }
            Ok(_) => println!("App DB:   FAILED (query failed)"),
            Err(e) => println!("App DB:   FAILED - {}", e),
        },
        None => println!("App DB:   not configured"),
    }

    Ok(())
}
