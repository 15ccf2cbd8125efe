use crate::output::{print_json, print_table};
use anyhow::Context;
use clap::Subcommand;
use plank_core::config::{Config, OutboundEndpoint, WarnLevel};
use plank_core::dead_letter::{DeadLetterSink, FileDeadLetterStore, MemoryDeadLetterStore};
use plank_core::domain_event::{DomainEvent, WEBHOOK_TEST};
use plank_core::processor::EventProcessor;
use plank_core::state::FileStateRepository;
use plank_core::types::Provider;
use plank_server::notify::Notifier;
use plank_server::providers::default_handlers;
use plank_server::state::{SharedRepository, DEFAULT_RECENT_CAPACITY};
use plank_server::{ServerConfig, WebhookServer, DEFAULT_PORT};
use serde::Serialize;
use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// How long `serve` waits for in-flight requests after Ctrl-C.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// Subcommand types
// ---------------------------------------------------------------------------

#[derive(Subcommand)]
pub enum WebhookSubcommand {
    /// Receive GitHub, Jira and Linear webhooks and sync task state
    Serve {
        /// Port to listen on (0 = OS-assigned)
        #[arg(long, default_value_t = DEFAULT_PORT)]
        port: u16,
        /// Address to bind
        #[arg(long, default_value = "0.0.0.0")]
        bind: IpAddr,
        /// Shared secret for GitHub signatures
        #[arg(long, env = "GITHUB_WEBHOOK_SECRET", hide_env_values = true)]
        github_secret: Option<String>,
        /// Shared secret Jira sends as a bearer token or `?secret=`
        #[arg(long, env = "JIRA_WEBHOOK_SECRET", hide_env_values = true)]
        jira_secret: Option<String>,
        /// Shared secret for Linear signatures
        #[arg(long, env = "LINEAR_WEBHOOK_SECRET", hide_env_values = true)]
        linear_secret: Option<String>,
        /// Number of processed events kept for GET /events
        #[arg(long, default_value_t = DEFAULT_RECENT_CAPACITY)]
        recent_events: usize,
        /// Don't forward status changes to configured endpoints
        #[arg(long)]
        no_notify: bool,
    },

    /// Manage outbound notification endpoints
    Endpoint {
        #[command(subcommand)]
        subcommand: EndpointSubcommand,
    },

    /// Send a `webhook.test` event to one endpoint and report the result
    Test {
        /// Endpoint name
        name: String,
    },

    /// List deliveries that exhausted their retries
    DeadLetters {
        /// Only show entries for this endpoint
        #[arg(long)]
        endpoint: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum EndpointSubcommand {
    /// Register an endpoint
    Add {
        name: String,
        url: String,
        /// HMAC secret used to sign deliveries
        #[arg(long)]
        secret: Option<String>,
        /// Total delivery attempts before dead-lettering
        #[arg(long, default_value_t = 3)]
        max_retries: u32,
        /// Base backoff in milliseconds, doubled after each failure
        #[arg(long, default_value_t = 1000)]
        retry_delay_ms: u64,
        /// Only deliver these event types (repeatable; default: all)
        #[arg(long = "event", value_name = "TYPE")]
        events: Vec<String>,
        /// Register the endpoint without delivering to it
        #[arg(long)]
        disabled: bool,
    },

    /// Remove an endpoint
    Remove { name: String },

    /// List endpoints
    List,
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub fn run(root: &Path, subcmd: WebhookSubcommand, json: bool) -> anyhow::Result<()> {
    match subcmd {
        WebhookSubcommand::Serve {
            port,
            bind,
            github_secret,
            jira_secret,
            linear_secret,
            recent_events,
            no_notify,
        } => {
            let config = ServerConfig {
                bind,
                port,
                recent_capacity: recent_events,
                ..ServerConfig::default()
            }
            .with_secret(Provider::Github, github_secret)
            .with_secret(Provider::Jira, jira_secret)
            .with_secret(Provider::Linear, linear_secret);
            serve(root, config, !no_notify)
        }
        WebhookSubcommand::Endpoint { subcommand } => match subcommand {
            EndpointSubcommand::Add {
                name,
                url,
                secret,
                max_retries,
                retry_delay_ms,
                events,
                disabled,
            } => {
                let endpoint = OutboundEndpoint {
                    secret,
                    max_retries,
                    retry_delay_ms,
                    enabled: !disabled,
                    event_filters: events,
                    ..OutboundEndpoint::new(name, url)
                };
                add_endpoint(root, endpoint, json)
            }
            EndpointSubcommand::Remove { name } => remove_endpoint(root, &name, json),
            EndpointSubcommand::List => list_endpoints(root, json),
        },
        WebhookSubcommand::Test { name } => test_endpoint(root, &name, json),
        WebhookSubcommand::DeadLetters { endpoint } => {
            dead_letters(root, endpoint.as_deref(), json)
        }
    }
}

// ---------------------------------------------------------------------------
// serve
// ---------------------------------------------------------------------------

fn serve(root: &Path, config: ServerConfig, notify: bool) -> anyhow::Result<()> {
    let repo: SharedRepository = Arc::new(FileStateRepository::new(root));
    let mut server = WebhookServer::new(config, EventProcessor::new(repo));
    for handler in default_handlers() {
        server.register_handler(handler);
    }

    if notify {
        let cfg = Config::load_or_default(root).context("failed to load config")?;
        if cfg.enabled_endpoints().next().is_some() {
            let dead_letters: Arc<dyn DeadLetterSink> = Arc::new(FileDeadLetterStore::new(root));
            let notifier = Notifier::from_config(&cfg, dead_letters)?
                .with_cancellation(server.cancellation_token());
            tracing::info!(
                endpoints = notifier.endpoints().len(),
                "forwarding status changes to outbound endpoints"
            );
            server = server.with_notifier(Arc::new(notifier));
        }
    }

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async move {
        let server = Arc::new(server);
        let serving = Arc::clone(&server);
        let mut task = tokio::spawn(async move { serving.start().await });

        tokio::select! {
            res = &mut task => return res?,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("received Ctrl-C, shutting down");
            }
        }

        server.shutdown(SHUTDOWN_GRACE).await?;
        task.await?
    })
}

// ---------------------------------------------------------------------------
// endpoint add / remove / list
// ---------------------------------------------------------------------------

fn add_endpoint(root: &Path, endpoint: OutboundEndpoint, json: bool) -> anyhow::Result<()> {
    let mut config = Config::load_or_default(root).context("failed to load config")?;
    let name = endpoint.name.clone();
    config.add_endpoint(endpoint)?;
    config.save(root).context("failed to save config")?;

    let prefix = format!("endpoint '{name}'");
    let warnings: Vec<_> = config
        .validate()
        .into_iter()
        .filter(|w| w.message.starts_with(&prefix))
        .collect();

    if json {
        print_json(&serde_json::json!({ "added": name, "warnings": warnings }))?;
    } else {
        println!("Added endpoint '{name}'");
        for w in &warnings {
            let level = match w.level {
                WarnLevel::Warning => "warning",
                WarnLevel::Error => "error",
            };
            eprintln!("[{level}] {}", w.message);
        }
    }
    Ok(())
}

fn remove_endpoint(root: &Path, name: &str, json: bool) -> anyhow::Result<()> {
    let mut config = Config::load(root).context("failed to load config")?;
    let removed = config.remove_endpoint(name)?;
    config.save(root).context("failed to save config")?;

    if json {
        print_json(&serde_json::json!({ "removed": removed.name }))?;
    } else {
        println!("Removed endpoint '{}'", removed.name);
    }
    Ok(())
}

/// Endpoint as shown to users; the secret itself is never printed.
#[derive(Serialize)]
struct EndpointView<'a> {
    name: &'a str,
    url: &'a str,
    signed: bool,
    enabled: bool,
    max_retries: u32,
    retry_delay_ms: u64,
    event_filters: &'a [String],
}

impl<'a> From<&'a OutboundEndpoint> for EndpointView<'a> {
    fn from(ep: &'a OutboundEndpoint) -> Self {
        Self {
            name: &ep.name,
            url: &ep.url,
            signed: ep.secret.is_some(),
            enabled: ep.enabled,
            max_retries: ep.max_retries,
            retry_delay_ms: ep.retry_delay_ms,
            event_filters: &ep.event_filters,
        }
    }
}

fn list_endpoints(root: &Path, json: bool) -> anyhow::Result<()> {
    let config = Config::load_or_default(root).context("failed to load config")?;
    let views: Vec<EndpointView<'_>> = config.webhooks.endpoints.iter().map(Into::into).collect();

    if json {
        return print_json(&views);
    }
    if views.is_empty() {
        println!("No endpoints configured.");
        return Ok(());
    }

    let rows: Vec<Vec<String>> = views
        .iter()
        .map(|v| {
            vec![
                v.name.to_string(),
                v.url.to_string(),
                if v.enabled { "yes" } else { "no" }.to_string(),
                if v.signed { "yes" } else { "no" }.to_string(),
                format!("{}x/{}ms", v.max_retries, v.retry_delay_ms),
                if v.event_filters.is_empty() {
                    "*".to_string()
                } else {
                    v.event_filters.join(",")
                },
            ]
        })
        .collect();
    print_table(&["NAME", "URL", "ENABLED", "SIGNED", "RETRY", "EVENTS"], &rows);
    Ok(())
}

// ---------------------------------------------------------------------------
// test
// ---------------------------------------------------------------------------

fn test_endpoint(root: &Path, name: &str, json: bool) -> anyhow::Result<()> {
    let config = Config::load(root).context("failed to load config")?;
    // The test event goes out even to disabled or filtered endpoints.
    let endpoint = OutboundEndpoint {
        enabled: true,
        event_filters: Vec::new(),
        ..config.endpoint(name)?.clone()
    };

    // Test failures are reported, not dead-lettered.
    let notifier = Notifier::new(vec![endpoint], Arc::new(MemoryDeadLetterStore::new()))?;
    let event = DomainEvent::new(
        WEBHOOK_TEST,
        serde_json::json!({ "endpoint": name, "message": "test delivery from plank" }),
    );
    let event_id = event.id;

    let rt = tokio::runtime::Runtime::new()?;
    let reports = rt.block_on(async { notifier.notify(event).wait().await });
    let report = reports
        .into_iter()
        .next()
        .ok_or_else(|| anyhow::anyhow!("delivery to '{name}' did not complete"))?;

    if json {
        print_json(&serde_json::json!({
            "event_id": event_id,
            "endpoint": report.endpoint,
            "delivered": report.delivered,
            "attempts": report.attempts,
            "error": report.last_error,
        }))?;
    } else if report.delivered {
        println!(
            "Delivered {event_id} to '{name}' in {} attempt(s)",
            report.attempts
        );
    }

    if !report.delivered {
        anyhow::bail!(
            "delivery to '{name}' failed after {} attempt(s): {}",
            report.attempts,
            report.last_error.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// dead-letters
// ---------------------------------------------------------------------------

fn dead_letters(root: &Path, endpoint: Option<&str>, json: bool) -> anyhow::Result<()> {
    let store = FileDeadLetterStore::new(root);
    let entries: Vec<_> = store
        .load_all()
        .with_context(|| format!("failed to read {}", store.path().display()))?
        .into_iter()
        .filter(|e| endpoint.map_or(true, |name| e.endpoint_name == name))
        .collect();

    if json {
        return print_json(&entries);
    }
    if entries.is_empty() {
        println!("No dead letters.");
        return Ok(());
    }

    let rows: Vec<Vec<String>> = entries
        .iter()
        .map(|e| {
            vec![
                e.last_attempt_at.format("%Y-%m-%d %H:%M:%S").to_string(),
                e.endpoint_name.clone(),
                e.event_payload["type"].as_str().unwrap_or("-").to_string(),
                e.attempt_count.to_string(),
                e.failure_reason.clone(),
            ]
        })
        .collect();
    print_table(&["LAST ATTEMPT", "ENDPOINT", "EVENT", "ATTEMPTS", "REASON"], &rows);
    Ok(())
}
