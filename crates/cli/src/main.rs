use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use cnpg_core::{CnpgError, Intent, OperationResult};
use cnpg_kubehub::{ClientConfig, KubeClient};
use cnpg_ops::Dispatcher;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::signal;
use tokio::sync::{mpsc, Semaphore};
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "cnpgctl", version, about = "CloudNativePG control surface")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// API server URL (default: kubeconfig / in-cluster config)
    #[arg(long = "endpoint", env = "CNPG_ENDPOINT", global = true)]
    endpoint: Option<String>,

    /// Bearer token for --endpoint
    #[arg(long = "token", env = "CNPG_TOKEN", hide_env_values = true, global = true)]
    token: Option<String>,

    /// Upper bound for every API call, in seconds
    #[arg(long = "timeout-secs", env = "CNPG_TIMEOUT_SECS", global = true, default_value_t = 30)]
    timeout_secs: u64,

    /// Skip TLS verification for --endpoint
    #[arg(long = "insecure-skip-tls-verify", action = ArgAction::SetTrue, global = true)]
    insecure_skip_tls_verify: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Subcommand, Debug)]
enum Commands {
    /// List every operation with its arguments
    Tools,
    /// Dispatch one operation and print its result
    Call {
        /// Operation name, e.g. scale_cluster
        operation: String,
        /// Arguments as a JSON object
        #[arg(long = "args")]
        args: Option<String>,
        /// One argument as key=value (value parsed as JSON, else taken as a string); repeatable
        #[arg(long = "arg", value_name = "KEY=VALUE")]
        arg: Vec<String>,
    },
    /// Read one JSON intent per stdin line, write one JSON result per stdout line
    Serve {
        /// Intents processed at the same time
        #[arg(long = "max-in-flight", default_value_t = 16)]
        max_in_flight: usize,
    },
}

fn init_tracing() {
    let env = std::env::var("CNPG_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    // stdout carries results; logs go to stderr.
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("CNPG_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid CNPG_METRICS_ADDR; expected host:port");
        }
    }
}

impl Cli {
    fn client_config(&self) -> ClientConfig {
        ClientConfig {
            endpoint: self.endpoint.clone(),
            token: self.token.clone(),
            timeout: Duration::from_secs(self.timeout_secs.max(1)),
            insecure_skip_tls_verify: self.insecure_skip_tls_verify,
        }
    }

    async fn dispatcher(&self) -> Result<Dispatcher> {
        let cfg = self.client_config();
        let client = KubeClient::connect(&cfg).await.context("connecting to the Kubernetes API")?;
        info!(endpoint = ?cfg.endpoint, timeout_secs = cfg.timeout.as_secs(), "client ready");
        Ok(Dispatcher::new(Arc::new(client)))
    }
}

/// Merge `--args` and repeated `--arg key=value` into one argument bag; later keys win.
fn build_arguments(args: Option<&str>, pairs: &[String]) -> Result<Map<String, Value>> {
    let mut bag = match args {
        Some(raw) => match serde_json::from_str::<Value>(raw).context("--args is not valid JSON")? {
            Value::Object(m) => m,
            other => return Err(anyhow!("--args must be a JSON object, got {}", other)),
        },
        None => Map::new(),
    };
    for pair in pairs {
        let (k, v) = pair.split_once('=').ok_or_else(|| anyhow!("--arg '{}' is not key=value", pair))?;
        let value = serde_json::from_str::<Value>(v).unwrap_or_else(|_| Value::String(v.to_string()));
        bag.insert(k.trim().to_string(), value);
    }
    Ok(bag)
}

fn print_result(output: Output, res: &OperationResult) -> Result<()> {
    match output {
        Output::Human => {
            if res.ok {
                println!("{}", res.message);
            } else {
                let kind = res.error_kind.map(|k| k.to_string()).unwrap_or_default();
                println!("error[{}]: {}", kind, res.message);
                if res.retryable {
                    println!("(retryable: re-issue the same request)");
                }
            }
        }
        Output::Json => println!("{}", serde_json::to_string_pretty(res)?),
    }
    Ok(())
}

fn print_tools(output: Output) -> Result<()> {
    match output {
        Output::Human => {
            for op in cnpg_schema::CATALOG {
                println!("{} [{:?}]", op.name, op.class);
                println!("    {}", op.description);
                for p in op.params {
                    let req = if p.required { " (required)" } else { "" };
                    println!("    --arg {}=…{}  {}", p.name, req, p.description);
                }
            }
        }
        Output::Json => {
            let tools: Vec<Value> = cnpg_schema::CATALOG
                .iter()
                .map(|op| {
                    serde_json::json!({
                        "name": op.name,
                        "class": op.class,
                        "description": op.description,
                        "inputSchema": op.input_schema(),
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&tools)?);
        }
    }
    Ok(())
}

/// One stdin line. `id` is echoed back untouched so callers can match replies.
#[derive(Debug, Deserialize)]
struct Request {
    #[serde(default)]
    id: Option<Value>,
    #[serde(flatten)]
    intent: Intent,
}

#[derive(Debug, Serialize)]
struct Reply {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<Value>,
    #[serde(flatten)]
    result: OperationResult,
}

fn bad_line(err: &serde_json::Error) -> Reply {
    let e = CnpgError::Validation(format!("request line is not a JSON intent: {}", err));
    Reply { id: None, result: OperationResult::failure("request", &e) }
}

async fn serve(dispatcher: Dispatcher, max_in_flight: usize) -> Result<()> {
    let (tx, mut rx) = mpsc::channel::<Reply>(max_in_flight.max(1) * 2);
    // Single writer so concurrent replies never interleave within a line.
    let writer = tokio::spawn(async move {
        let mut out = tokio::io::stdout();
        while let Some(reply) = rx.recv().await {
            match serde_json::to_string(&reply) {
                Ok(mut line) => {
                    line.push('\n');
                    if let Err(e) = out.write_all(line.as_bytes()).await {
                        error!(error = %e, "stdout closed");
                        break;
                    }
                    let _ = out.flush().await;
                }
                Err(e) => error!(error = %e, "reply serialization failed"),
            }
        }
    });

    let permits = Arc::new(Semaphore::new(max_in_flight.max(1)));
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    info!(max_in_flight, "serving intents on stdin");
    loop {
        let line = tokio::select! {
            _ = signal::ctrl_c() => { warn!("interrupted; finishing in-flight intents"); break; }
            next = lines.next_line() => match next.context("reading stdin")? {
                Some(l) => l,
                None => break,
            },
        };
        if line.trim().is_empty() {
            continue;
        }
        let req = match serde_json::from_str::<Request>(&line) {
            Ok(r) => r,
            Err(e) => {
                metrics::counter!("cnpg_serve_bad_lines_total", 1u64);
                let _ = tx.send(bad_line(&e)).await;
                continue;
            }
        };
        let permit = permits.clone().acquire_owned().await.context("semaphore closed")?;
        let (d, tx) = (dispatcher.clone(), tx.clone());
        tokio::spawn(async move {
            let result = d.dispatch(&req.intent).await;
            let _ = tx.send(Reply { id: req.id, result }).await;
            drop(permit);
        });
    }
    // Wait for every in-flight intent to hand back its permit.
    let _ = permits.acquire_many(max_in_flight.max(1) as u32).await;
    drop(tx);
    let _ = writer.await;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();

    match &cli.command {
        Commands::Tools => print_tools(cli.output)?,
        Commands::Call { operation, args, arg } => {
            let arguments = build_arguments(args.as_deref(), arg)?;
            let dispatcher = cli.dispatcher().await?;
            let res = dispatcher.dispatch(&Intent { operation: operation.clone(), arguments }).await;
            print_result(cli.output, &res)?;
            if !res.ok {
                std::process::exit(1);
            }
        }
        Commands::Serve { max_in_flight } => {
            let dispatcher = cli.dispatcher().await?;
            serve(dispatcher, *max_in_flight).await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn arguments_merge_json_and_pairs() {
        let bag = build_arguments(Some(r#"{"name": "prod", "instances": 3}"#), &["instances=5".into(), "namespace=db".into()]).unwrap();
        assert_eq!(Value::Object(bag), json!({"name": "prod", "instances": 5, "namespace": "db"}));
    }

    #[test]
    fn pair_values_fall_back_to_strings() {
        let bag = build_arguments(None, &["parameters=[\"a=1\"]".into(), "schedule=0 0 2 * * *".into(), "suspend=true".into()]).unwrap();
        assert_eq!(bag["parameters"], json!(["a=1"]));
        assert_eq!(bag["schedule"], "0 0 2 * * *");
        assert_eq!(bag["suspend"], true);
    }

    #[test]
    fn bad_arguments_are_reported() {
        assert!(build_arguments(Some("[1]"), &[]).is_err());
        assert!(build_arguments(None, &["novalue".into()]).is_err());
    }

    #[test]
    fn request_lines_echo_ids() {
        let req: Request = serde_json::from_str(r#"{"id": 7, "operation": "list_clusters", "arguments": {"namespace": "db"}}"#).unwrap();
        assert_eq!(req.id, Some(json!(7)));
        assert_eq!(req.intent.operation, "list_clusters");
        let reply = Reply { id: req.id, result: OperationResult::success("ok") };
        assert_eq!(serde_json::to_value(&reply).unwrap(), json!({"id": 7, "ok": true, "message": "ok"}));
    }

    #[test]
    fn unparseable_line_becomes_validation_failure() {
        let err = serde_json::from_str::<Request>("not json").unwrap_err();
        let v = serde_json::to_value(bad_line(&err)).unwrap();
        assert_eq!(v["ok"], false);
        assert_eq!(v["errorKind"], "validation");
    }

    #[tokio::test]
    async fn dispatch_metrics_reach_the_exporter() {
        let handle = metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder().unwrap();
        let d = Dispatcher::new(Arc::new(cnpg_kubehub::memory::MemoryClient::new()));
        let res = d.dispatch(&Intent::new("list_clusters", json!({"namespace": "db"}))).await;
        assert!(res.ok, "{:?}", res);
        let text = handle.render();
        assert!(text.contains("cnpg_ops_total{op=\"list_clusters\"} 1"), "{}", text);
    }

    #[test]
    fn cli_parses_call() {
        let cli = Cli::try_parse_from(["cnpgctl", "-o", "json", "call", "scale_cluster", "--arg", "instances=5"]).unwrap();
        assert_eq!(cli.output, Output::Json);
        assert!(matches!(cli.command, Commands::Call { ref operation, .. } if operation == "scale_cluster"));
    }
}
