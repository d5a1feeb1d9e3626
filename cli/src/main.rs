//! stencil CLI: inspect schema registries from the terminal.
//!
//! Usage:
//! ```bash
//! # List every type in a descriptor set
//! stencil types --url http://localhost:8000/v1beta1/namespaces/ns/schemas/events
//!
//! # Show the fields of one type, falling back across registries
//! stencil get --url http://primary/schemas/events --url http://backup/schemas/events \
//!     --type events.Click
//!
//! # Keep refreshing every 60s and log each new descriptor set
//! stencil watch --url http://localhost:8000/schemas/events --interval 60 --version-based
//! ```

use std::env;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use prost_reflect::{FieldDescriptor, Kind};
use stencil_core::{ClientOptions, FetchOptions, MultiSourceClient, RefreshStrategyKind, TypeTree};
use stencil_http::HttpFetcher;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        print_usage();
        process::exit(1);
    }
    init_tracing(args.iter().any(|a| a == "--json-logs"));

    let result = match args[1].as_str() {
        "types" => cmd_types(&args[2..]).await,
        "get" => cmd_get(&args[2..]).await,
        "watch" => cmd_watch(&args[2..]).await,
        "version" | "--version" | "-V" => {
            println!("stencil {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        "help" | "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {other}");
            print_usage();
            process::exit(1);
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

/// `RUST_LOG` wins over the default `info` filter.
fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json().with_writer(std::io::stderr)).init();
    } else {
        registry.with(fmt::layer().with_writer(std::io::stderr)).init();
    }
}

fn print_usage() {
    println!("stencil {}", env!("CARGO_PKG_VERSION"));
    println!("Inspect protobuf schema registries\n");
    println!("USAGE:");
    println!("    stencil <COMMAND> [FLAGS]\n");
    println!("COMMANDS:");
    println!("    types      List every message type in the descriptor set");
    println!("    get        Print the fields of one message type");
    println!("    watch      Refresh on an interval and log each update (Ctrl-C to stop)");
    println!("    version    Print version");
    println!("    help       Print this help\n");
    println!("FLAGS:");
    println!("    --url <URL>          Registry schema URL, repeatable  [required]");
    println!("    --type <NAME>        Fully-qualified type name        [get]");
    println!("    --interval <SECS>    Refresh interval in seconds      [watch, default 60]");
    println!("    --version-based      Download only when a newer version is listed");
    println!("    --header <K:V>       Extra request header, repeatable");
    println!("    --json-logs          Emit logs as JSON on stderr");
}

async fn cmd_types(args: &[String]) -> Result<(), String> {
    let client = connect(args, client_options(args)?).await?;
    for name in client.type_names() {
        println!("{name}");
    }
    client.close();
    Ok(())
}

async fn cmd_get(args: &[String]) -> Result<(), String> {
    let name = parse_flag(args, "--type").ok_or("--type is required")?;
    let client = connect(args, client_options(args)?).await?;
    let desc = client.get_type(&name).map_err(|e| e.to_string())?;

    println!("{}", desc.full_name());
    for field in desc.fields() {
        println!("  {:>4}  {:<28} {}", field.number(), field.name(), field_type(&field));
    }
    client.close();
    Ok(())
}

async fn cmd_watch(args: &[String]) -> Result<(), String> {
    let secs = match parse_flag(args, "--interval") {
        Some(raw) => raw
            .parse::<u64>()
            .map_err(|_| format!("--interval must be a whole number of seconds, got {raw:?}"))?,
        None => 60,
    };
    let options = client_options(args)?.with_refresh(Duration::from_secs(secs));
    let urls = parse_flags(args, "--url");
    if urls.is_empty() {
        return Err("--url is required".into());
    }

    let fetcher = Arc::new(HttpFetcher::with_defaults().map_err(|e| e.to_string())?);
    let client = MultiSourceClient::builder(urls, fetcher)
        .options(options)
        .on_update(|source: &str, tree: &TypeTree| {
            tracing::info!(url = %source, types = tree.len(), "schema updated");
        })
        .connect()
        .await
        .map_err(|e| e.to_string())?;

    println!(
        "Watching {} source(s), {} types loaded. Press Ctrl-C to stop.",
        client.len(),
        client.type_names().len()
    );
    tokio::signal::ctrl_c().await.map_err(|e| e.to_string())?;
    client.close();
    Ok(())
}

async fn connect(args: &[String], options: ClientOptions) -> Result<MultiSourceClient, String> {
    let urls = parse_flags(args, "--url");
    if urls.is_empty() {
        return Err("--url is required".into());
    }
    stencil_http::connect_multi(urls, options)
        .await
        .map_err(|e| e.to_string())
}

fn client_options(args: &[String]) -> Result<ClientOptions, String> {
    let mut transport = FetchOptions::default();
    for raw in parse_flags(args, "--header") {
        let (name, value) = parse_header(&raw)?;
        transport = transport.with_header(name, value);
    }
    let strategy = if args.iter().any(|a| a == "--version-based") {
        RefreshStrategyKind::VersionBased
    } else {
        RefreshStrategyKind::LongPolling
    };
    Ok(ClientOptions::default()
        .with_strategy(strategy)
        .with_transport(transport))
}

fn field_type(field: &FieldDescriptor) -> String {
    let base = match field.kind() {
        Kind::Message(m) => m.full_name().to_string(),
        Kind::Enum(e) => e.full_name().to_string(),
        other => format!("{other:?}").to_lowercase(),
    };
    if field.is_map() {
        format!("map {base}")
    } else if field.is_list() {
        format!("repeated {base}")
    } else {
        base
    }
}

fn parse_header(raw: &str) -> Result<(String, String), String> {
    let (name, value) = raw
        .split_once(':')
        .ok_or_else(|| format!("--header must look like NAME:VALUE, got {raw:?}"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("--header has an empty name: {raw:?}"));
    }
    Ok((name.to_string(), value.trim().to_string()))
}

fn parse_flag(args: &[String], flag: &str) -> Option<String> {
    let pos = args.iter().position(|a| a == flag)?;
    args.get(pos + 1).cloned()
}

/// Every value given for a repeatable flag, in order.
fn parse_flags(args: &[String], flag: &str) -> Vec<String> {
    args.windows(2)
        .filter(|pair| pair[0] == flag)
        .map(|pair| pair[1].clone())
        .collect()
}
