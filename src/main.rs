use bolletta_bot::config::Config;
use bolletta_bot::intake::{InboundEvent, IntakeCoordinator, MediaRef};
use bolletta_bot::link_builder::LinkBuilder;
use bolletta_bot::model_extractor::ModelExtractor;
use bolletta_bot::store::{AirtableStore, MemoryStore, RecordStore};
use clap::{Arg, Command};
use log::LevelFilter;
use std::io::BufRead;
use std::process;
use std::sync::Arc;

#[tokio::main]
async fn main() {
    let matches = Command::new("bolletta-bot")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Bill intake engine: extracts and validates payment fields from documents and chat turns, producing payment links")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .default_value("/etc/bolletta-bot.yaml"),
        )
        .arg(
            Arg::new("generate-config")
                .long("generate-config")
                .value_name("FILE")
                .help("Generate a default configuration file")
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("test-config")
                .long("test-config")
                .help("Test configuration validity")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("extract")
                .long("extract")
                .value_name("FILE")
                .help("Run the extraction pipeline on a text document and print the result")
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("demo")
                .long("demo")
                .help("Run a scripted conversation against an in-memory store (no external services)")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Enable verbose logging")
                .action(clap::ArgAction::SetTrue),
        )
        .get_matches();

    let log_level = if matches.get_flag("verbose") {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .init();

    if let Some(generate_path) = matches.get_one::<String>("generate-config") {
        match Config::default().to_file(generate_path) {
            Ok(()) => println!("Default configuration written to {generate_path}"),
            Err(e) => {
                eprintln!("Error generating configuration: {e}");
                process::exit(1);
            }
        }
        return;
    }

    if matches.get_flag("demo") {
        run_demo().await;
        return;
    }

    let config_path = matches.get_one::<String>("config").unwrap();
    let config = match Config::from_file(config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading configuration from {config_path}: {e}");
            process::exit(1);
        }
    };

    if matches.get_flag("test-config") {
        test_config(&config);
        return;
    }

    if let Some(document_path) = matches.get_one::<String>("extract") {
        extract_document(&config, document_path).await;
        return;
    }

    run_interactive(&config).await;
}

fn test_config(config: &Config) {
    println!("🔍 Testing configuration...");
    println!("Store base: {}/{}", config.store.base_url, config.store.base_id);
    println!(
        "Tables: sessions={} bills={}",
        config.store.sessions_table, config.store.bills_table
    );
    println!("Session timeout: {} minutes", config.session.timeout_minutes);

    if let Err(e) = LinkBuilder::new(&config.payment.base_url) {
        println!("❌ Invalid payment base URL: {e}");
        process::exit(1);
    }
    if config.model.enabled {
        match ModelExtractor::new(&config.model) {
            Ok(_) => println!("Model extractor: {} at {}", config.model.model, config.model.endpoint),
            Err(e) => {
                println!("❌ Model extractor configuration failed: {e}");
                process::exit(1);
            }
        }
    } else {
        println!("Model extractor disabled, heuristics only");
    }
    println!("✅ Configuration validated");
}

fn build_model(config: &Config) -> Option<ModelExtractor> {
    if !config.model.enabled {
        return None;
    }
    match ModelExtractor::new(&config.model) {
        Ok(extractor) => Some(extractor),
        Err(e) => {
            log::warn!("model extractor unavailable, heuristics only: {e}");
            None
        }
    }
}

async fn extract_document(config: &Config, path: &str) {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) => {
            eprintln!("Error reading {path}: {e}");
            process::exit(1);
        }
    };

    // the local store keeps the run self-contained
    let store: Arc<dyn RecordStore> = Arc::new(MemoryStore::new());
    let coordinator = match IntakeCoordinator::new(config, store, build_model(config)) {
        Ok(coordinator) => coordinator,
        Err(e) => {
            eprintln!("Error building intake coordinator: {e}");
            process::exit(1);
        }
    };

    let reply = coordinator
        .handle(InboundEvent {
            sender: "cli:extract".to_string(),
            text: String::new(),
            media: Some(MediaRef {
                content_type: "text/plain".to_string(),
                data: text.into_bytes(),
            }),
        })
        .await;
    println!("{reply}");
}

async fn run_demo() {
    let mut config = Config::default();
    config.payment.base_url = "https://runner.example.com".to_string();
    config.model.enabled = false;

    let store = Arc::new(MemoryStore::new());
    let coordinator =
        IntakeCoordinator::new(&config, store.clone(), None).expect("demo configuration is valid");

    println!("🧪 Demo: scripted bill intake (in-memory store, heuristics only)");
    println!();

    let turns = [
        "ciao",
        "bolletta",
        "Enel Energia",
        "quarantanove e novanta",
        "49,90",
        "IT60X0542811101000000123456",
        "10/09/2025",
    ];
    for turn in turns {
        println!("utente> {turn}");
        let reply = coordinator
            .handle(InboundEvent {
                sender: "demo:+390000000000".to_string(),
                text: turn.to_string(),
                media: None,
            })
            .await;
        println!("bot> {reply}");
        println!();
    }

    let document = "Fastweb S.p.A.\nTotale da pagare: € 29,90\nScadenza: 2025-10-01\n";
    println!("utente> [invia un documento]");
    let reply = coordinator
        .handle(InboundEvent {
            sender: "demo:+390000000000".to_string(),
            text: String::new(),
            media: Some(MediaRef {
                content_type: "text/plain".to_string(),
                data: document.as_bytes().to_vec(),
            }),
        })
        .await;
    println!("bot> {reply}");
    println!();
    println!("Recorded bills: {}", store.records("Bollette").len());
}

async fn run_interactive(config: &Config) {
    let store: Arc<dyn RecordStore> = match AirtableStore::new(&config.store) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            eprintln!("Error building record store client: {e}");
            process::exit(1);
        }
    };
    let coordinator = match IntakeCoordinator::new(config, store, build_model(config)) {
        Ok(coordinator) => coordinator,
        Err(e) => {
            eprintln!("Error building intake coordinator: {e}");
            process::exit(1);
        }
    };

    log::info!("interactive mode, messages are read from stdin (quit to exit)");
    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let line = match line {
            Ok(line) => line,
            Err(_) => break,
        };
        if line.trim() == "quit" {
            break;
        }
        let reply = coordinator
            .handle(InboundEvent {
                sender: "cli:local".to_string(),
                text: line,
                media: None,
            })
            .await;
        println!("{reply}");
    }
}
