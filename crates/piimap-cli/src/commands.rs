//! Command handlers.
//!
//! Each invocation is a fresh process, like a browser restarting the worker
//! script: commands other than `install` and `clear` resume the version
//! already installed in the cache directory.

use std::io::Write;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context as _, Result};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, info};

use piimap_core::http::ACCEPT;
use piimap_core::message::SearchResults;
use piimap_core::net::SharedNetwork;
use piimap_core::store::SharedStorage;
use piimap_core::{
    CacheError, Config, Connectivity, DiskStorage, FetchOutcome, HttpNetwork, MessageEvent,
    PartitionRegistry, Request, Response, SharedRegistry, StatusReply, Worker,
};

/// Shared collaborators for every worker built during one invocation.
pub struct Context {
    config: Config,
    registry: SharedRegistry,
    storage: SharedStorage,
    network: SharedNetwork,
    connectivity: Connectivity,
}

impl Context {
    pub fn new(config: Config, online: bool) -> Result<Self> {
        let cache_dir = config.cache_dir()?;
        let storage = DiskStorage::new(cache_dir.clone())
            .with_context(|| format!("Failed to open cache directory {}", cache_dir.display()))?;
        let network = HttpNetwork::from_config(&config)?;
        debug!(cache_dir = %cache_dir.display(), online, "Context ready");

        Ok(Self {
            registry: PartitionRegistry::shared(config.namespace.clone()),
            storage: Arc::new(storage),
            network: Arc::new(network),
            connectivity: Connectivity::new(online),
            config,
        })
    }

    fn worker(&self) -> Result<Worker> {
        let worker = Worker::new(
            self.config.clone(),
            self.registry.clone(),
            self.storage.clone(),
            self.network.clone(),
        )?;
        Ok(worker.with_connectivity(self.connectivity.clone()))
    }

    /// Worker for the installed version, activated without re-fetching.
    async fn resumed(&self) -> Result<Worker> {
        let worker = self.worker()?;
        match worker.resume().await {
            Ok(report) => {
                if !report.deleted.is_empty() {
                    info!(deleted = ?report.deleted, "Evicted stale partitions on resume");
                }
                Ok(worker)
            }
            Err(CacheError::NotInstalled(version)) => Err(anyhow!(
                "Version {} is not installed. Run `piimap install` first.",
                version
            )),
            Err(e) => Err(e.into()),
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn parse_json(input: &str, what: &str) -> Result<Value> {
    serde_json::from_str(input).with_context(|| format!("{} is not valid JSON", what))
}

pub async fn install(ctx: &Context) -> Result<()> {
    let worker = ctx.worker()?;
    let (install, activation) = worker
        .install_and_activate()
        .await
        .context("Install failed")?;
    print_json(&json!({
        "install": install,
        "activation": activation,
    }))
}

pub async fn fetch(
    ctx: &Context,
    url: &str,
    accept: Option<&str>,
    include_headers: bool,
) -> Result<()> {
    let worker = ctx.resumed().await?;
    let mut request = Request::get(ctx.config.resolve(url)?);
    if let Some(accept) = accept {
        request = request.with_header(ACCEPT, accept);
    }

    let response = match worker.handle_fetch(&request).await {
        FetchOutcome::Served(response) => response,
        FetchOutcome::Forwarded(result) => result.context("Network request failed")?,
        FetchOutcome::Bypass => ctx
            .network
            .fetch(&request)
            .await
            .context("Network request failed")?,
    };

    write_response(&response, include_headers)
}

fn write_response(response: &Response, include_headers: bool) -> Result<()> {
    if include_headers {
        eprintln!("HTTP {}", response.status());
        for (name, value) in response.headers() {
            eprintln!("{}: {}", name, value);
        }
        eprintln!();
    }

    let mut stdout = std::io::stdout().lock();
    stdout.write_all(response.body())?;
    stdout.flush()?;

    if !response.is_success() {
        bail!("HTTP {}", response.status());
    }
    Ok(())
}

pub async fn status(ctx: &Context) -> Result<()> {
    let worker = ctx.resumed().await?;
    let (event, reply) = MessageEvent::with_reply(json!({"type": "GET_CACHE_STATUS"}));
    worker.handle_message(event).await;

    match reply.await.context("Worker did not answer the status request")? {
        StatusReply::Status(status) => print_json(&status),
        StatusReply::Error { error } => Err(anyhow!("Status failed: {}", error)),
    }
}

pub async fn sync(ctx: &Context) -> Result<()> {
    let worker = ctx.resumed().await?;
    match worker.sync_data().await {
        None => {
            eprintln!("Offline, sync skipped");
            Ok(())
        }
        Some(notification) => {
            print_json(&notification)?;
            if !notification.is_success() {
                bail!("Sync failed");
            }
            Ok(())
        }
    }
}

pub async fn clear(ctx: &Context, reinstall: bool) -> Result<()> {
    let worker = ctx.worker()?;
    let notification = worker.clear_cache().await;
    print_json(&notification)?;
    if !notification.is_success() {
        bail!("Clearing caches failed");
    }

    if worker.take_update_request() && reinstall {
        info!("Re-installing after cache clear");
        install(ctx).await?;
    }
    Ok(())
}

pub async fn cache_country(ctx: &Context, record: &str) -> Result<()> {
    let record = parse_json(record, "Country record")?;
    let worker = ctx.resumed().await?;
    let key = worker.cache_country_data(&record).await?;
    println!("{}", key);
    Ok(())
}

pub async fn cache_search(ctx: &Context, query: String, results: &str) -> Result<()> {
    let results = parse_json(results, "Search results")?;
    let worker = ctx.resumed().await?;
    let key = worker
        .cache_search_results(&SearchResults { query, results })
        .await?;
    println!("{}", key);
    Ok(())
}

pub async fn item(ctx: &Context, key: &str) -> Result<()> {
    let worker = ctx.resumed().await?;
    let item = worker.cached_item(key).await?;
    print_json(&item)
}

/// Post a raw message. Prints the status reply, if the message asked for
/// one, and every notification the message produced.
pub async fn message(ctx: &Context, input: &str) -> Result<()> {
    let data = parse_json(input, "Message")?;
    let worker = ctx.resumed().await?;
    let mut notifications = worker.subscribe();

    let (event, reply) = MessageEvent::with_reply(data);
    worker.handle_message(event).await;

    if let Ok(reply) = reply.await {
        print_json(&reply)?;
    }
    while let Ok(notification) = notifications.try_recv() {
        print_json(&notification)?;
    }

    if worker.take_update_request() {
        info!("Re-installing after cache clear");
        install(ctx).await?;
    }
    Ok(())
}

pub fn show_config(config: &Config, save: bool) -> Result<()> {
    if save {
        config.save().context("Failed to save config")?;
        info!("Config saved");
    }
    print_json(config)
}
