//! `clawdis` — gateway daemon launcher and control-plane client.

mod client;

use {
    clap::{Parser, Subcommand},
    tracing::info,
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

use client::{ClientError, GatewayClient};

#[derive(Parser)]
#[command(name = "clawdis", about = "Clawdis — personal assistant relay gateway")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Gateway host for client commands.
    #[arg(long, global = true, default_value = "127.0.0.1")]
    host: String,

    /// Gateway port (client commands and `gateway`).
    #[arg(long, global = true)]
    port: Option<u16>,

    /// Control-plane auth token.
    #[arg(long, global = true, env = "CLAWDIS_GATEWAY_TOKEN")]
    token: Option<String>,

    /// Bind address for `gateway` (overrides config).
    #[arg(long, global = true)]
    bind: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway daemon (default when no subcommand is given).
    Gateway,
    /// Send a message through a channel.
    Send {
        #[arg(long)]
        to: String,
        #[arg(short, long)]
        message: String,
        #[arg(long)]
        channel: Option<String>,
        #[arg(long)]
        account_id: Option<String>,
    },
    /// Invoke the agent.
    Agent {
        #[arg(short, long)]
        message: String,
        #[arg(long)]
        thinking: Option<String>,
        #[arg(long)]
        session_key: Option<String>,
    },
    /// Provider link health.
    Health,
    /// Gateway status snapshot.
    Status,
    /// Paired-node management.
    Nodes {
        #[command(subcommand)]
        action: NodesAction,
    },
    /// Trigger a heartbeat now.
    Heartbeat {
        #[arg(short, long)]
        message: Option<String>,
    },
    /// Scheduled job management.
    Cron {
        #[command(subcommand)]
        action: CronAction,
    },
}

#[derive(Subcommand)]
enum NodesAction {
    List,
    Pending,
    Approve {
        request_id: String,
    },
    Reject {
        request_id: String,
    },
    Invoke {
        #[arg(long)]
        node: String,
        #[arg(long)]
        command: String,
        #[arg(long)]
        params: Option<String>,
    },
}

#[derive(Subcommand)]
enum CronAction {
    List,
    Add {
        #[arg(long)]
        name: String,
        /// Cron expression, e.g. "0 9 * * *".
        #[arg(long, conflicts_with = "every")]
        cron: Option<String>,
        /// Interval, e.g. "30m".
        #[arg(long)]
        every: Option<String>,
        #[arg(short, long)]
        message: String,
        /// Deliver the agent reply to the last active channel.
        #[arg(long, default_value_t = true)]
        deliver: bool,
    },
    Remove {
        id: String,
    },
    RunNow {
        id: String,
    },
}

fn main() {
    let cli = Cli::parse();
    let _log_guard = init_logging(&cli);

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("failed to start runtime: {e}");
            std::process::exit(1);
        },
    };
    let code = runtime.block_on(run(cli));
    std::process::exit(code);
}

fn init_logging(cli: &Cli) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cli.log_level.clone()));
    let registry = tracing_subscriber::registry().with(filter);

    // The daemon also writes daily-rotated JSON logs under the state dir.
    let is_gateway = matches!(cli.command, None | Some(Commands::Gateway));
    if is_gateway {
        let appender = tracing_appender::rolling::daily(
            clawdis_config::state_dir().join("logs"),
            "gateway.log",
        );
        let (writer, guard) = tracing_appender::non_blocking(appender);
        if cli.json_logs {
            let file_layer = fmt::layer().json().with_writer(writer);
            registry.with(fmt::layer().json()).with(file_layer).init();
        } else {
            let file_layer = fmt::layer().json().with_writer(writer);
            registry.with(fmt::layer()).with(file_layer).init();
        }
        return Some(guard);
    }

    if cli.json_logs {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }
    None
}

async fn run(cli: Cli) -> i32 {
    match cli.command.unwrap_or(Commands::Gateway) {
        Commands::Gateway => run_gateway_cmd(cli.bind, cli.port).await,
        Commands::Send {
            to,
            message,
            channel,
            account_id,
        } => {
            client_call(
                &cli.host,
                cli.port,
                cli.token.as_deref(),
                "send",
                serde_json::json!({
                    "to": to,
                    "message": message,
                    "channel": channel,
                    "accountId": account_id,
                }),
            )
            .await
        },
        Commands::Agent {
            message,
            thinking,
            session_key,
        } => {
            client_call(
                &cli.host,
                cli.port,
                cli.token.as_deref(),
                "agent",
                serde_json::json!({
                    "message": message,
                    "thinking": thinking,
                    "sessionKey": session_key,
                }),
            )
            .await
        },
        Commands::Health => {
            client_call(&cli.host, cli.port, cli.token.as_deref(), "health", serde_json::Value::Null)
                .await
        },
        Commands::Status => {
            client_call(&cli.host, cli.port, cli.token.as_deref(), "status", serde_json::Value::Null)
                .await
        },
        Commands::Heartbeat { message } => {
            client_call(
                &cli.host,
                cli.port,
                cli.token.as_deref(),
                "heartbeat.run",
                serde_json::json!({ "message": message }),
            )
            .await
        },
        Commands::Nodes { action } => {
            let (method, params) = match action {
                NodesAction::List => ("nodes.list", serde_json::Value::Null),
                NodesAction::Pending => ("nodes.pending", serde_json::Value::Null),
                NodesAction::Approve { request_id } => {
                    ("nodes.approve", serde_json::json!({ "requestId": request_id }))
                },
                NodesAction::Reject { request_id } => {
                    ("nodes.reject", serde_json::json!({ "requestId": request_id }))
                },
                NodesAction::Invoke {
                    node,
                    command,
                    params,
                } => (
                    "nodes.invoke",
                    serde_json::json!({
                        "nodeId": node,
                        "command": command,
                        "paramsJSON": params,
                    }),
                ),
            };
            client_call(&cli.host, cli.port, cli.token.as_deref(), method, params).await
        },
        Commands::Cron { action } => {
            let (method, params) = match action {
                CronAction::List => ("cron.list", serde_json::Value::Null),
                CronAction::Add {
                    name,
                    cron,
                    every,
                    message,
                    deliver,
                } => {
                    let schedule = match (cron, every) {
                        (Some(expr), _) => serde_json::json!({ "kind": "cron", "expr": expr }),
                        (None, Some(every)) => {
                            match clawdis_cron_interval(&every) {
                                Some(ms) => serde_json::json!({ "kind": "every", "everyMs": ms }),
                                None => {
                                    eprintln!("invalid --every interval: {every}");
                                    return 2;
                                },
                            }
                        },
                        (None, None) => {
                            eprintln!("one of --cron or --every is required");
                            return 2;
                        },
                    };
                    (
                        "cron.add",
                        serde_json::json!({
                            "name": name,
                            "schedule": schedule,
                            "payload": {
                                "kind": "agentTurn",
                                "message": message,
                                "deliver": deliver,
                            },
                        }),
                    )
                },
                CronAction::Remove { id } => ("cron.remove", serde_json::json!({ "id": id })),
                CronAction::RunNow { id } => ("cron.runNow", serde_json::json!({ "id": id })),
            };
            client_call(&cli.host, cli.port, cli.token.as_deref(), method, params).await
        },
    }
}

/// Parse a "30m"-style interval into milliseconds.
fn clawdis_cron_interval(every: &str) -> Option<u64> {
    let every = every.trim();
    let (num, mult) = if let Some(n) = every.strip_suffix('d') {
        (n, 86_400_000)
    } else if let Some(n) = every.strip_suffix('h') {
        (n, 3_600_000)
    } else if let Some(n) = every.strip_suffix('m') {
        (n, 60_000)
    } else if let Some(n) = every.strip_suffix('s') {
        (n, 1_000)
    } else {
        (every, 1)
    };
    num.trim().parse::<u64>().ok().filter(|n| *n > 0).map(|n| n * mult)
}

async fn run_gateway_cmd(bind: Option<String>, port: Option<u16>) -> i32 {
    let mut config = clawdis_config::discover_and_load();
    if let Some(bind) = bind {
        config.gateway.bind = bind;
    }
    if let Some(port) = port {
        config.gateway.port = port;
    }
    info!(
        bind = %config.gateway.bind,
        port = config.gateway.port,
        "starting clawdis gateway"
    );
    let handle = clawdis_config::ConfigHandle::new(config);
    match clawdis_gateway::run_gateway(handle).await {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("gateway failed: {e}");
            1
        },
    }
}

async fn client_call(
    host: &str,
    port: Option<u16>,
    token: Option<&str>,
    method: &str,
    params: serde_json::Value,
) -> i32 {
    let port = port.unwrap_or(clawdis_protocol::DEFAULT_PORT);
    let mut client = match GatewayClient::connect(host, port, token).await {
        Ok(client) => client,
        Err(e) => {
            eprintln!("{e}");
            return e.exit_code();
        },
    };
    match client.request(method, params).await {
        Ok(result) => {
            match serde_json::to_string_pretty(&result) {
                Ok(pretty) => println!("{pretty}"),
                Err(_) => println!("{result}"),
            }
            0
        },
        Err(e) => {
            eprintln!("{e}");
            e.exit_code()
        },
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interval_parsing() {
        assert_eq!(clawdis_cron_interval("30m"), Some(1_800_000));
        assert_eq!(clawdis_cron_interval("1h"), Some(3_600_000));
        assert_eq!(clawdis_cron_interval("oops"), None);
        assert_eq!(clawdis_cron_interval("0m"), None);
    }

    #[test]
    fn cli_parses_core_commands() {
        Cli::try_parse_from(["clawdis", "gateway", "--port", "19000"]).unwrap();
        Cli::try_parse_from(["clawdis", "send", "--to", "+1555", "-m", "hi"]).unwrap();
        Cli::try_parse_from(["clawdis", "nodes", "invoke", "--node", "n1", "--command", "c"])
            .unwrap();
        Cli::try_parse_from([
            "clawdis", "cron", "add", "--name", "n", "--every", "5m", "-m", "x",
        ])
        .unwrap();
        assert!(Cli::try_parse_from(["clawdis", "bogus"]).is_err());
    }
}
