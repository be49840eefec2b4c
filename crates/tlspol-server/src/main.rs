//! tlspold - policy daemon entry point

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::net::ToSocketAddrs;
use std::path::PathBuf;
use std::sync::Arc;
use tlspol_common::Config;
use tlspol_core::cache::redis::RedisStore;
use tlspol_core::cache::PolicyCache;
use tlspol_core::dns::DnsClient;
use tlspol_core::netstring::marshal;
use tlspol_core::prefetch::Prefetcher;
use tlspol_core::socketmap::server::ServerContext;
use tlspol_core::{domain, PolicyResolver, PolicyServer};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpStream, UnixStream};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const VERSION: &str = env!("CARGO_PKG_VERSION");
const LICENSE: &str = include_str!("../../../LICENSE");

#[derive(Parser, Debug)]
#[command(name = "tlspold", about = "DANE / MTA-STS policy resolution daemon for Postfix", disable_version_flag = true)]
struct Cli {
    /// Show version
    #[arg(long)]
    version: bool,

    /// Show license
    #[arg(long)]
    license: bool,

    /// Path to the config file
    #[arg(long, default_value = "/etc/tlspol/config.toml")]
    config: PathBuf,

    /// Query a domain against the running daemon and print the JSON answer
    #[arg(long, value_name = "DOMAIN")]
    query: Option<String>,

    /// Purge all cached policies and exit
    #[arg(long)]
    purge: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.version {
        println!("{VERSION}");
        return Ok(());
    }
    if cli.license {
        println!("{LICENSE}");
        return Ok(());
    }

    init_logging();

    let mut config = if cli.config.exists() {
        Config::from_file(&cli.config)?
    } else {
        Config::load()?
    };
    config.apply_env_overrides();

    if let Some(domain) = cli.query {
        return query_daemon(&config, &domain).await;
    }
    if cli.purge {
        return purge_cache(&config).await;
    }

    run_daemon(config).await
}

fn init_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,tlspol=debug"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_level(true))
        .with(filter)
        .init();
}

/// One-shot `JSON` round-trip against the running daemon
async fn query_daemon(config: &Config, domain: &str) -> Result<()> {
    let domain = domain.trim().to_lowercase();
    if domain::validate(&domain).is_err() {
        bail!("invalid domain: {domain:?}");
    }

    let frame = marshal(format!("JSON {domain}").as_bytes());
    let mut line = String::new();

    if let Some(path) = config.unix_socket_path() {
        let mut stream = UnixStream::connect(path)
            .await
            .with_context(|| format!("could not reach tlspold at unix:{path}, is it running?"))?;
        stream.write_all(&frame).await?;
        BufReader::new(stream).read_line(&mut line).await?;
    } else {
        let mut stream = TcpStream::connect(&config.server.address)
            .await
            .with_context(|| {
                format!(
                    "could not reach tlspold at {}, is it running?",
                    config.server.address
                )
            })?;
        stream.write_all(&frame).await?;
        BufReader::new(stream).read_line(&mut line).await?;
    }

    let value: serde_json::Value =
        serde_json::from_str(&line).context("undecodable answer from the daemon")?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

/// Drop every cached policy and rewrite the schema tag
async fn purge_cache(config: &Config) -> Result<()> {
    if config.redis.disable {
        bail!("cannot purge: the cache is disabled in the configuration");
    }

    let store = RedisStore::connect(&config.redis).await?;
    let cache = PolicyCache::new(Arc::new(store));
    let purged = cache.purge().await?;
    info!("Cache purged successfully ({purged} keys)");
    Ok(())
}

async fn run_daemon(config: Config) -> Result<()> {
    info!("Starting tlspold {VERSION}...");

    let dns_addr = config
        .dns
        .address
        .to_socket_addrs()
        .with_context(|| format!("invalid dns.address {:?}", config.dns.address))?
        .next()
        .with_context(|| format!("dns.address {:?} resolves to nothing", config.dns.address))?;

    let resolver = Arc::new(PolicyResolver::new(DnsClient::new(dns_addr))?);

    // an unreachable backend is fatal here; with the cache disabled the
    // resolver simply runs cache-less
    let cache = if config.redis.disable {
        info!("Cache disabled, resolving every query");
        None
    } else {
        let store = RedisStore::connect(&config.redis)
            .await
            .context("cache backend unavailable")?;
        let cache = PolicyCache::new(Arc::new(store));
        cache.ensure_schema().await?;
        info!("Cache backend connected");
        Some(cache)
    };

    let prefetch_handle = match (&cache, config.server.prefetch) {
        (Some(cache), true) => {
            info!("Prefetching enabled");
            let prefetcher = Prefetcher::new(cache.clone(), resolver.clone());
            Some(tokio::spawn(async move { prefetcher.run().await }))
        }
        (None, true) => {
            warn!("Cannot prefetch with the cache disabled");
            None
        }
        _ => None,
    };

    let context = Arc::new(ServerContext {
        resolver,
        cache,
        tlsrpt: config.server.tlsrpt,
        version: VERSION.to_string(),
    });
    let server = PolicyServer::new(config.server.address.clone(), context);

    let server_handle = tokio::spawn(async move {
        if let Err(e) = server.run().await {
            error!("socketmap server error: {e}");
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    server_handle.abort();
    if let Some(handle) = prefetch_handle {
        handle.abort();
    }

    info!("tlspold shutdown complete");
    Ok(())
}
