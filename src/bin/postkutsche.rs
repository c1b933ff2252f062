use std::{
    net::SocketAddr,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use postkutsche::{
    AppState, api,
    config::{DEFAULT_QUOTA_MIB, Inspector, ProvisionerConfig, tlsa_deriver},
    powerdns::client::DEFAULT_TTL,
    provision::{ProvisionReport, ProvisionRequest, Provisioner, within},
    tlsa::ProbeEndpoint,
};
use tokio::{net::TcpListener, signal};
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about, rename_all = "kebab-case")]
struct Cli {
    #[command(flatten)]
    backend: BackendArgs,
    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct BackendArgs {
    /// PowerDNS API URL (e.g. http://127.0.0.1:8081/api/v1)
    #[arg(long, value_name = "URL", env = "POSTKUTSCHE_PDNS_URL", global = true)]
    pdns_url: Option<String>,
    /// PowerDNS API key
    #[arg(long, value_name = "KEY", env = "POSTKUTSCHE_PDNS_KEY", global = true, hide_env_values = true)]
    pdns_key: Option<String>,
    /// PowerDNS server ID
    #[arg(long, value_name = "ID", env = "POSTKUTSCHE_PDNS_SERVER_ID", default_value = "localhost", global = true)]
    pdns_server_id: String,
    /// Mailcow base URL (e.g. https://mail.example.com)
    #[arg(long, value_name = "URL", env = "POSTKUTSCHE_MAILCOW_URL", global = true)]
    mailcow_url: Option<String>,
    /// Mailcow API key
    #[arg(long, value_name = "KEY", env = "POSTKUTSCHE_MAILCOW_KEY", global = true, hide_env_values = true)]
    mailcow_key: Option<String>,
    /// Read certificates with this openssl binary instead of the built-in TLS client
    #[arg(long, value_name = "PATH", env = "POSTKUTSCHE_OPENSSL", global = true)]
    openssl: Option<PathBuf>,
    /// Seconds each TLS probe may take
    #[arg(long, value_name = "SECS", env = "POSTKUTSCHE_PROBE_TIMEOUT", default_value_t = 10, global = true)]
    probe_timeout: u64,
    /// Seconds a whole operation may take (unbounded when unset)
    #[arg(long, value_name = "SECS", env = "POSTKUTSCHE_OPERATION_TIMEOUT", global = true)]
    operation_timeout: Option<u64>,
    /// TTL of published records
    #[arg(long, value_name = "SECS", env = "POSTKUTSCHE_TTL", default_value_t = DEFAULT_TTL, global = true)]
    ttl: u32,
    /// Quota of the default mailbox when the request sets none
    #[arg(long, value_name = "MIB", env = "POSTKUTSCHE_DEFAULT_QUOTA", default_value_t = DEFAULT_QUOTA_MIB, global = true)]
    default_quota: u32,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the mail domain, its DKIM key, default mailbox and DNS records
    AddMailDomain { request: PathBuf },
    /// Publish TLSA, address and CAA records for the mail server
    AddMailServer { request: PathBuf },
    /// Remove what add-mail-domain created
    CleanupMailDomain { request: PathBuf },
    /// Remove what add-mail-server created
    CleanupMailServer { request: PathBuf },
    /// Publish an OPENPGPKEY record
    SetOpenpgp {
        #[arg(long)]
        local_part: String,
        #[arg(long)]
        domain: String,
        /// File holding the ASCII-armored public key
        #[arg(long, value_name = "PATH")]
        key_file: PathBuf,
    },
    /// Print the records the add commands would publish
    Plan { request: PathBuf },
    /// Probe the mail server and print its TLSA records
    Tlsa {
        hostname: String,
        #[arg(long)]
        ipv6: Option<std::net::Ipv6Addr>,
        #[arg(long)]
        ipv4: Option<std::net::Ipv4Addr>,
    },
    /// Serve the operations over HTTP
    Serve {
        /// Listen address for the HTTP server
        #[arg(long, value_name = "ADDR", default_value = "127.0.0.1:8080")]
        listen: SocketAddr,
        /// Key clients present in the X-API-Key header
        #[arg(long, value_name = "KEY", env = "POSTKUTSCHE_API_KEY", hide_env_values = true)]
        api_key: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let limit = cli.backend.operation_timeout.map(Duration::from_secs);

    let report = match &cli.command {
        Command::Plan { request } => {
            let plan = read_request(request)?.plan()?;
            println!("{}", serde_json::to_string_pretty(&plan)?);
            return Ok(());
        }
        Command::Tlsa { hostname, ipv6, ipv4 } => return print_tlsa(&cli.backend, hostname, *ipv6, *ipv4).await,
        Command::Serve { listen, api_key } => return serve(&cli.backend, *listen, api_key, limit).await,
        Command::AddMailDomain { request } => {
            let req = read_request(request)?;
            let provisioner = provisioner(&cli.backend)?;
            within(limit, provisioner.add_mail_domain(&req)).await?
        }
        Command::AddMailServer { request } => {
            let req = read_request(request)?;
            let provisioner = provisioner(&cli.backend)?;
            within(limit, provisioner.add_mail_server_dns_records(&req)).await?
        }
        Command::CleanupMailDomain { request } => {
            let req = read_request(request)?;
            let provisioner = provisioner(&cli.backend)?;
            within(limit, provisioner.cleanup_add_mail_domain(&req)).await?
        }
        Command::CleanupMailServer { request } => {
            let req = read_request(request)?;
            let provisioner = provisioner(&cli.backend)?;
            within(limit, provisioner.cleanup_add_mail_server(&req)).await?
        }
        Command::SetOpenpgp {
            local_part,
            domain,
            key_file,
        } => {
            let key = std::fs::read_to_string(key_file)
                .with_context(|| format!("failed to read {}", key_file.display()))?;
            let provisioner = provisioner(&cli.backend)?;
            within(limit, provisioner.set_openpgp_record(local_part, domain, &key)).await?
        }
    };

    finish(&report)
}

fn finish(report: &ProvisionReport) -> Result<()> {
    eprint!("{report}");
    println!("{}", serde_json::to_string_pretty(report)?);
    let failed = report.failures().count();
    if failed > 0 {
        bail!("{failed} step(s) of {} failed", report.operation);
    }
    Ok(())
}

fn read_request(path: &Path) -> Result<ProvisionRequest> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read request {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("invalid request in {}", path.display()))
}

fn inspector(args: &BackendArgs) -> Inspector {
    match &args.openssl {
        Some(path) => Inspector::Openssl(path.clone()),
        None => Inspector::Native,
    }
}

fn build_config(args: &BackendArgs) -> Result<ProvisionerConfig> {
    let Some(pdns_url) = &args.pdns_url else {
        bail!("--pdns-url is required");
    };
    let Some(pdns_key) = &args.pdns_key else {
        bail!("--pdns-key is required");
    };
    let Some(mailcow_url) = &args.mailcow_url else {
        bail!("--mailcow-url is required");
    };
    let Some(mailcow_key) = &args.mailcow_key else {
        bail!("--mailcow-key is required");
    };

    let mut config = ProvisionerConfig::new(pdns_url, pdns_key, mailcow_url, mailcow_key);
    config.pdns_server_id = args.pdns_server_id.clone();
    config.ttl = args.ttl;
    config.inspector = inspector(args);
    config.probe_timeout = Duration::from_secs(args.probe_timeout);
    config.default_quota_mib = args.default_quota;
    Ok(config)
}

fn provisioner(args: &BackendArgs) -> Result<Provisioner> {
    let config = build_config(args)?;
    Provisioner::from_config(&config).context("failed to set up provisioner")
}

async fn print_tlsa(
    args: &BackendArgs,
    hostname: &str,
    ipv6: Option<std::net::Ipv6Addr>,
    ipv4: Option<std::net::Ipv4Addr>,
) -> Result<()> {
    let deriver = tlsa_deriver(&inspector(args), Duration::from_secs(args.probe_timeout))?;
    let endpoint = ProbeEndpoint::preferred(ipv6, ipv4, hostname);

    let mut failed = 0;
    for result in deriver.derive(hostname, &endpoint).await {
        match result {
            Ok(tlsa) => println!("{}", tlsa.record),
            Err(failure) => {
                warn!("{failure}");
                failed += 1;
            }
        }
    }
    if failed > 0 {
        bail!("{failed} probe(s) failed");
    }
    Ok(())
}

async fn serve(
    args: &BackendArgs,
    listen: SocketAddr,
    api_key: &str,
    operation_timeout: Option<Duration>,
) -> Result<()> {
    if api_key.is_empty() {
        bail!("--api-key must not be empty");
    }
    let state = Arc::new(AppState {
        provisioner: provisioner(args)?,
        api_key: api_key.to_string(),
        operation_timeout,
    });
    let app = api::create_router(state);

    let listener = TcpListener::bind(listen)
        .await
        .with_context(|| format!("failed to bind to {listen}"))?;

    info!("listening on http://{}", listener.local_addr()?);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server exited with error")?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = signal::ctrl_c().await {
        error!("failed to install CTRL+C handler: {err}");
    }
    info!("shutdown signal received");
}

fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tower_http=info".into());
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();
}
