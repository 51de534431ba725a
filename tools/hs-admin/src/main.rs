//! # hs-admin - Operator CLI for the HashSentry Control Plane
//!
//! Thin HTTP client over the admin and health surfaces:
//!
//! ```text
//! hs-admin health
//! hs-admin dlq stats --consumer portfolio
//! hs-admin dlq replay --kind miner.added --limit 50 --dry-run
//! hs-admin keys issue --tenant T1 --site S1
//! hs-admin keys revoke --id <key-id> --tenant T1
//! hs-admin devices register --tenant T1 --site S1 --id edge-1 --name rack-a
//! hs-admin audit verify --tenant T1
//! hs-admin uploads --site S1
//! ```

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "hs-admin", about = "HashSentry operator control panel")]
struct Cli {
    /// Control plane base URL.
    #[arg(long, env = "HS_SERVER_URL", default_value = "http://127.0.0.1:8080")]
    server: String,

    /// Operator session token.
    #[arg(long, env = "HS_ADMIN_TOKEN")]
    token: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Fetch the health/SLO report.
    Health,
    /// Dead-letter queue operations.
    Dlq {
        #[command(subcommand)]
        command: DlqCommand,
    },
    /// Collector key management.
    Keys {
        #[command(subcommand)]
        command: KeysCommand,
    },
    /// Edge device management.
    Devices {
        #[command(subcommand)]
        command: DevicesCommand,
    },
    /// Audit chain operations.
    Audit {
        #[command(subcommand)]
        command: AuditCommand,
    },
    /// Recent uploads for a site.
    Uploads {
        #[arg(long)]
        site: String,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

#[derive(Args)]
struct DlqFilterArgs {
    #[arg(long)]
    consumer: Option<String>,
    #[arg(long)]
    kind: Option<String>,
    #[arg(long)]
    tenant: Option<String>,
}

impl DlqFilterArgs {
    fn query(&self) -> Vec<(&'static str, String)> {
        let mut query = Vec::new();
        if let Some(consumer) = &self.consumer {
            query.push(("consumer", consumer.clone()));
        }
        if let Some(kind) = &self.kind {
            query.push(("kind", kind.clone()));
        }
        if let Some(tenant) = &self.tenant {
            query.push(("tenant", tenant.clone()));
        }
        query
    }
}

#[derive(Subcommand)]
enum DlqCommand {
    /// Count and break down dead letters.
    Stats {
        #[command(flatten)]
        filter: DlqFilterArgs,
    },
    /// Re-inject dead letters onto their original topics.
    Replay {
        #[command(flatten)]
        filter: DlqFilterArgs,
        #[arg(long, default_value_t = 100)]
        limit: usize,
        /// Report what would replay without side effects.
        #[arg(long)]
        dry_run: bool,
    },
}

#[derive(Subcommand)]
enum KeysCommand {
    /// Issue a new collector key; prints the plaintext once.
    Issue {
        #[arg(long)]
        tenant: String,
        #[arg(long)]
        site: String,
    },
    /// Revoke a key by id.
    Revoke {
        #[arg(long)]
        id: String,
        #[arg(long)]
        tenant: String,
    },
    /// List keys for a site.
    List {
        #[arg(long)]
        site: String,
    },
}

#[derive(Subcommand)]
enum DevicesCommand {
    /// Register an edge device; prints the shared secret once.
    Register {
        #[arg(long)]
        tenant: String,
        #[arg(long)]
        site: String,
        #[arg(long)]
        id: String,
        #[arg(long)]
        name: String,
    },
}

#[derive(Subcommand)]
enum AuditCommand {
    /// Walk a tenant's audit chain and report integrity.
    Verify {
        #[arg(long)]
        tenant: String,
    },
}

struct Client {
    http: reqwest::Client,
    server: String,
    token: String,
}

impl Client {
    fn new(server: String, token: String) -> Result<Self> {
        Ok(Self {
            http: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(30))
                .build()?,
            server,
            token,
        })
    }

    async fn get(&self, path: &str, query: &[(&str, String)]) -> Result<serde_json::Value> {
        let response = self
            .http
            .get(format!("{}{path}", self.server))
            .header("Authorization", format!("Bearer {}", self.token))
            .query(query)
            .send()
            .await
            .with_context(|| format!("GET {path}"))?;
        Self::decode(response).await
    }

    async fn post(
        &self,
        path: &str,
        query: &[(&str, String)],
        body: Option<serde_json::Value>,
    ) -> Result<serde_json::Value> {
        let mut request = self
            .http
            .post(format!("{}{path}", self.server))
            .header("Authorization", format!("Bearer {}", self.token))
            .query(query);
        if let Some(body) = body {
            request = request.json(&body);
        }
        let response = request.send().await.with_context(|| format!("POST {path}"))?;
        Self::decode(response).await
    }

    async fn decode(response: reqwest::Response) -> Result<serde_json::Value> {
        let status = response.status();
        let body: serde_json::Value = response.json().await.unwrap_or_default();
        if !status.is_success() {
            bail!("server returned {status}: {body}");
        }
        Ok(body)
    }
}

fn print_json(value: &serde_json::Value) {
    println!("{}", serde_json::to_string_pretty(value).unwrap_or_default());
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let client = Client::new(cli.server, cli.token)?;

    match cli.command {
        Command::Health => {
            print_json(&client.get("/health", &[]).await?);
        }
        Command::Dlq { command } => match command {
            DlqCommand::Stats { filter } => {
                print_json(&client.get("/admin/dlq/stats", &filter.query()).await?);
            }
            DlqCommand::Replay { filter, limit, dry_run } => {
                let mut query = filter.query();
                query.push(("limit", limit.to_string()));
                if dry_run {
                    query.push(("dry_run", "true".to_string()));
                }
                print_json(&client.post("/admin/dlq/replay", &query, None).await?);
            }
        },
        Command::Keys { command } => match command {
            KeysCommand::Issue { tenant, site } => {
                let body = serde_json::json!({"tenant": tenant, "site": site});
                let result = client.post("/admin/keys", &[], Some(body)).await?;
                print_json(&result);
                eprintln!("note: the token above is shown once and never stored server-side");
            }
            KeysCommand::Revoke { id, tenant } => {
                let body = serde_json::json!({"tenant": tenant});
                print_json(
                    &client
                        .post(&format!("/admin/keys/{id}/revoke"), &[], Some(body))
                        .await?,
                );
            }
            KeysCommand::List { site } => {
                print_json(&client.get("/admin/keys", &[("site", site)]).await?);
            }
        },
        Command::Devices { command } => match command {
            DevicesCommand::Register { tenant, site, id, name } => {
                let body = serde_json::json!({
                    "tenant": tenant, "site": site, "device_id": id, "name": name,
                });
                let result = client.post("/admin/devices", &[], Some(body)).await?;
                print_json(&result);
                eprintln!("note: the secret above is shown once and never stored in plaintext");
            }
        },
        Command::Audit { command } => match command {
            AuditCommand::Verify { tenant } => {
                let result = client.get("/audit/verify", &[("tenant", tenant)]).await?;
                if result["verify_ok"] == true {
                    println!("chain ok ({} rows checked)", result["checked"]);
                } else {
                    println!(
                        "CHAIN BROKEN at event id {} ({} rows checked)",
                        result["first_broken_event_id"], result["checked"]
                    );
                    std::process::exit(2);
                }
            }
        },
        Command::Uploads { site, limit } => {
            print_json(
                &client
                    .get(
                        "/admin/uploads",
                        &[("site", site), ("limit", limit.to_string())],
                    )
                    .await?,
            );
        }
    }
    Ok(())
}
