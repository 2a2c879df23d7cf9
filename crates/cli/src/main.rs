use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand, ValueEnum};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::core::DynamicObject;
use serde::Serialize;
use sieve_core::{Event, EventKind};
use sieve_operator::{ConfigError, Operator, OperatorConfig};
use sieve_predicates::Predicate;
use sieve_reconcile::Context;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "sievectl", version, about = "Sieve CLI: check, explain and run operator configurations")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// Namespace to watch; overrides the config file
    #[arg(long = "ns", global = true)]
    namespace: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Subcommand, Debug)]
enum Commands {
    /// Load and validate a configuration file
    Check {
        config: PathBuf,
    },
    /// Evaluate the composed predicate against a synthetic object
    Explain {
        config: PathBuf,
        /// Object labels, e.g. "app=web,tier=backend"
        #[arg(long = "labels", default_value = "")]
        labels: String,
        /// Object annotations, e.g. "keep=true"
        #[arg(long = "annotations", default_value = "")]
        annotations: String,
        /// Labels of the old object for UPDATE (default: same as --labels)
        #[arg(long = "old-labels")]
        old_labels: Option<String>,
        /// Annotations of the old object for UPDATE (default: same as --annotations)
        #[arg(long = "old-annotations")]
        old_annotations: Option<String>,
    },
    /// Watch the configured kind and log every dispatched reconcile until Ctrl-C
    Run {
        config: PathBuf,
    },
}

fn init_tracing() {
    let env = std::env::var("SIEVE_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("SIEVE_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid SIEVE_METRICS_ADDR; expected host:port");
        }
    }
}

async fn log_create_or_update(obj: Arc<DynamicObject>, ctx: Context) -> Result<()> {
    info!(
        gvk = %ctx.kind().gvk_key(),
        name = ?obj.metadata.name,
        ns = ?obj.metadata.namespace,
        rv = ?obj.metadata.resource_version,
        "reconciling created/updated object"
    );
    Ok(())
}

async fn log_delete(obj: Arc<DynamicObject>, ctx: Context) -> Result<()> {
    if obj.metadata.deletion_timestamp.is_none() {
        return Ok(());
    }
    info!(gvk = %ctx.kind().gvk_key(), name = ?obj.metadata.name, ns = ?obj.metadata.namespace, "reconciling deleted object");
    Ok(())
}

fn load(path: &Path, ns_override: Option<String>) -> Result<OperatorConfig> {
    let mut cfg = OperatorConfig::load(path)?;
    if ns_override.is_some() {
        cfg.namespace = ns_override;
    }
    Ok(cfg)
}

fn build(cfg: &OperatorConfig) -> Result<Operator<DynamicObject>, ConfigError> {
    cfg.builder(log_create_or_update, log_delete).build()
}

/// Parse `k=v,k2=v2`; a bare key maps to an empty value.
fn parse_pairs(s: &str) -> BTreeMap<String, String> {
    s.split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(|p| match p.split_once('=') {
            Some((k, v)) => (k.trim().to_string(), v.trim().to_string()),
            None => (p.to_string(), String::new()),
        })
        .collect()
}

fn synthetic(labels: &str, annotations: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some("sieve-explain".into()),
        namespace: Some("default".into()),
        labels: Some(parse_pairs(labels)),
        annotations: Some(parse_pairs(annotations)),
        ..Default::default()
    }
}

#[derive(Debug, Serialize, PartialEq, Eq)]
struct Decision {
    event: EventKind,
    admitted: bool,
}

fn explain(predicate: &Predicate, old: &ObjectMeta, new: &ObjectMeta) -> Vec<Decision> {
    EventKind::ALL
        .into_iter()
        .map(|event| {
            let ev = match event {
                EventKind::Create => Event::Create(new),
                EventKind::Update => Event::Update { old, new },
                EventKind::Delete => Event::Delete(new),
                EventKind::Generic => Event::Generic(new),
            };
            Decision { event, admitted: predicate.admit(&ev) }
        })
        .collect()
}

#[derive(Serialize)]
struct CheckReport<'a> {
    ok: bool,
    gvk: String,
    handlers: Vec<String>,
    owns: Vec<String>,
    problems: &'a [String],
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();

    match cli.command {
        Commands::Check { config } => {
            let cfg = load(&config, cli.namespace)?;
            let gvk = cfg.kind.to_kind().gvk_key();
            let (handlers, owns, problems): (Vec<String>, Vec<String>, Vec<String>) = match build(&cfg) {
                Ok(op) => (
                    op.handler_kinds().iter().map(|k| k.to_string()).collect(),
                    op.owns().iter().map(|o| o.kind.gvk_key()).collect(),
                    Vec::new(),
                ),
                Err(e) => (Vec::new(), Vec::new(), e.problems.iter().map(|p| p.to_string()).collect()),
            };
            match cli.output {
                Output::Human => {
                    if problems.is_empty() {
                        println!("ok: {} (handlers: {}; owns: {})", gvk, handlers.join(", "), owns.join(", "));
                    } else {
                        for p in &problems {
                            eprintln!("error: {}", p);
                        }
                    }
                }
                Output::Json => {
                    let report = CheckReport { ok: problems.is_empty(), gvk, handlers, owns, problems: &problems };
                    println!("{}", serde_json::to_string_pretty(&report)?);
                }
            }
            if !problems.is_empty() {
                std::process::exit(1);
            }
        }
        Commands::Explain { config, labels, annotations, old_labels, old_annotations } => {
            let cfg = load(&config, cli.namespace)?;
            let op = build(&cfg)?;
            let new = synthetic(&labels, &annotations);
            let old = synthetic(old_labels.as_deref().unwrap_or(&labels), old_annotations.as_deref().unwrap_or(&annotations));
            let rows = explain(op.predicate(), &old, &new);
            match cli.output {
                Output::Human => {
                    println!("EVENT     DECISION");
                    for r in &rows {
                        println!("{:<9} {}", r.event.as_str(), if r.admitted { "admit" } else { "ignore" });
                    }
                }
                Output::Json => println!("{}", serde_json::to_string_pretty(&rows)?),
            }
        }
        Commands::Run { config } => {
            let cfg = load(&config, cli.namespace)?;
            let op = build(&cfg)?;
            let client = kube::Client::try_default().await.context("connecting to cluster")?;
            let cancel = CancellationToken::new();
            let on_signal = cancel.clone();
            tokio::spawn(async move {
                if signal::ctrl_c().await.is_ok() {
                    info!("Ctrl-C received; shutting down");
                }
                on_signal.cancel();
            });
            info!(gvk = %op.kind().gvk_key(), ns = ?op.runtime_options().namespace, "run invoked");
            if let Err(e) = op.run(client, cancel).await {
                warn!(error = %e, "operator stopped with error");
                return Err(e);
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_pairs_handles_bare_keys_and_spaces() {
        let m = parse_pairs(" app=web , important,,tier = backend ");
        assert_eq!(m.get("app").map(String::as_str), Some("web"));
        assert_eq!(m.get("important").map(String::as_str), Some(""));
        assert_eq!(m.get("tier").map(String::as_str), Some("backend"));
        assert_eq!(m.len(), 3);
        assert!(parse_pairs("").is_empty());
    }

    #[test]
    fn explain_reports_update_against_old_object() {
        let cfg = OperatorConfig::from_yaml(
            "kind: { version: v1, kind: Secret }\non_create_or_update:\n  labels: { app: web }\n",
        )
        .expect("parse");
        let op = build(&cfg).expect("build");
        let old = synthetic("app=web", "");
        let new = synthetic("app=other", "");
        let rows = explain(op.predicate(), &old, &new);
        let admitted: Vec<_> = rows.iter().map(|r| r.admitted).collect();
        assert_eq!(admitted, vec![false, true, false, false]);
    }

    #[test]
    fn cli_parses_explain() {
        let cli = Cli::try_parse_from(["sievectl", "-o", "json", "explain", "op.yaml", "--labels", "a=b"]).expect("parse");
        assert_eq!(cli.output, Output::Json);
        match cli.command {
            Commands::Explain { labels, old_labels, .. } => {
                assert_eq!(labels, "a=b");
                assert!(old_labels.is_none());
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
