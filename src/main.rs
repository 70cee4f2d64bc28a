//! Peerlink - CLI Entry Point
//!
//! Thin command layer over [`peerlink::ClientInstall`]. Every subcommand
//! loads settings, runs exactly one client workflow and prints the result,
//! either as plain text or as JSON with `--json`.

// Use mimalloc as global allocator
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use anyhow::Context;
use clap::{Args as ClapArgs, Parser, Subcommand};
use peerlink::client::{
    EndpointRecord, ForwardRequest, InstallRequest, RedirectRequest, RemoveOptions,
};
use peerlink::config::{parse_bool, LogFormat};
use peerlink::forward::{Protocol, Selector};
use peerlink::link::TrojanLink;
use peerlink::{ClientInstall, Settings, VERSION};
use serde::Serialize;
use std::path::PathBuf;
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "peerlink")]
#[command(author = "Tsang")]
#[command(version = VERSION)]
#[command(about = "Client-side provisioning for Trojan tunnel overlays")]
struct Args {
    /// Path to settings file (defaults to ./peerlink.yaml when present)
    #[arg(short = 'c', long = "config", global = true)]
    config: Option<PathBuf>,

    /// Installation root (overrides settings)
    #[arg(short = 'd', long = "install-dir", global = true)]
    install_dir: Option<PathBuf>,

    /// Config directory, relative to the installation root unless absolute
    #[arg(long = "config-dir", global = true)]
    config_dir: Option<String>,

    /// Log level (overrides settings)
    #[arg(long = "log-level", global = true)]
    log_level: Option<String>,

    /// Print results as JSON
    #[arg(long = "json", global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Add or update a client endpoint
    Install(InstallArgs),

    /// Remove the client installation
    Remove {
        /// Keep files on disk
        #[arg(long)]
        keep_files: bool,

        /// Succeed when nothing is installed
        #[arg(long)]
        ignore_missing: bool,
    },

    /// Manage endpoints
    #[command(subcommand)]
    Endpoint(EndpointCommand),

    /// List endpoints
    List,

    /// Manage redirect rules
    #[command(subcommand)]
    Redirect(RedirectCommand),

    /// Manage local port forwards
    #[command(subcommand)]
    Forward(ForwardCommand),

    /// Manage reverse channels
    #[command(subcommand)]
    Reverse(ReverseCommand),
}

#[derive(ClapArgs, Debug)]
struct InstallArgs {
    /// trojan:// share link (replaces the credential flags)
    #[arg(long, conflicts_with_all = ["address", "port", "user", "password", "sni"])]
    link: Option<String>,

    /// Remote server address
    #[arg(long, required_unless_present = "link")]
    address: Option<String>,

    /// Remote server port (defaults to settings)
    #[arg(long)]
    port: Option<u16>,

    /// User email
    #[arg(long, required_unless_present = "link")]
    user: Option<String>,

    /// Trojan password
    #[arg(long, required_unless_present = "link")]
    password: Option<String>,

    /// TLS server name (defaults to the address)
    #[arg(long)]
    sni: Option<String>,

    /// Skip TLS certificate verification (defaults to settings)
    #[arg(long, value_parser = parse_flag)]
    allow_insecure: Option<bool>,

    /// Replace an existing endpoint with the same hostname
    #[arg(long)]
    force: bool,
}

#[derive(Subcommand, Debug)]
enum EndpointCommand {
    /// Remove one endpoint by hostname or tag
    Remove { target: String },
    /// List endpoints
    List,
}

#[derive(ClapArgs, Debug)]
struct RedirectSelector {
    /// Destination network
    #[arg(long, conflicts_with = "domain", required_unless_present = "domain")]
    cidr: Option<String>,

    /// Destination domain
    #[arg(long)]
    domain: Option<String>,

    /// Endpoint outbound tag
    #[arg(long, default_value = "")]
    tag: String,

    /// Endpoint hostname
    #[arg(long, default_value = "")]
    host: String,
}

impl From<RedirectSelector> for RedirectRequest {
    fn from(sel: RedirectSelector) -> Self {
        RedirectRequest {
            cidr: sel.cidr,
            domain: sel.domain,
            tag: sel.tag,
            host: sel.host,
        }
    }
}

#[derive(Subcommand, Debug)]
enum RedirectCommand {
    /// Route a network or domain through an endpoint
    Add(RedirectSelector),
    /// Remove a redirect rule
    Remove(RedirectSelector),
    /// List redirect rules
    List,
}

#[derive(Subcommand, Debug)]
enum ForwardCommand {
    /// Open a local listener forwarding to a remote ip:port
    Add {
        /// Remote ip:port
        #[arg(long)]
        target: String,

        /// Listen address (defaults to loopback)
        #[arg(long, default_value = "")]
        listen: String,

        /// Listen port (allocated from the base port when unset)
        #[arg(long)]
        listen_port: Option<u16>,

        /// tcp, udp, or both
        #[arg(long = "proto", default_value = "both")]
        protocol: Protocol,

        /// First port probed when allocating
        #[arg(long)]
        base_port: Option<u16>,
    },
    /// Remove a forward by listen port, tag, or remark
    Remove {
        #[arg(long)]
        listen_port: Option<u16>,

        #[arg(long)]
        tag: Option<String>,

        #[arg(long)]
        remark: Option<String>,
    },
    /// List forwards
    List,
}

#[derive(Subcommand, Debug)]
enum ReverseCommand {
    /// Ensure a reverse channel for a user through an endpoint
    Add {
        #[arg(long)]
        user: String,

        /// Endpoint hostname or tag
        #[arg(long)]
        endpoint: String,
    },
    /// List reverse channels
    List,
}

fn parse_flag(value: &str) -> std::result::Result<bool, String> {
    parse_bool(value).map_err(|e| e.to_string())
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut settings = Settings::load(args.config.as_deref()).context("load settings")?;
    if let Some(dir) = &args.install_dir {
        settings.client.install_dir = Some(dir.clone());
    }
    if let Some(dir) = &args.config_dir {
        settings.client.config_dir = dir.clone();
    }
    if let Some(level) = &args.log_level {
        settings.log_level = level.trim().to_ascii_lowercase();
    }
    settings.validate()?;

    init_logging(&settings)?;
    debug!("Peerlink v{}", VERSION);

    let client = ClientInstall::from_settings(&settings)?;
    debug!(install_dir = %client.paths().install_dir.display(), "using installation");

    run(&client, &settings, args.command, args.json)
}

fn init_logging(settings: &Settings) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(format!("peerlink={}", settings.log_level)))?;

    // logs go to stderr so --json output stays clean
    let registry = tracing_subscriber::registry().with(filter);
    match settings.log_format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init(),
        LogFormat::Text => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init(),
    }
    Ok(())
}

fn run(
    client: &ClientInstall,
    settings: &Settings,
    command: Command,
    json: bool,
) -> anyhow::Result<()> {
    match command {
        Command::Install(install) => {
            let req = install_request(install, settings)?;
            let endpoint = client.install(&req)?;
            emit(json, &EndpointRecord::from(&endpoint), |ep| {
                format!("installed {} ({}) as {}", ep.hostname, ep.port, ep.tag)
            })
        }
        Command::Remove {
            keep_files,
            ignore_missing,
        } => {
            client.remove(RemoveOptions {
                keep_files,
                ignore_missing,
            })?;
            println!("client installation removed");
            Ok(())
        }
        Command::Endpoint(EndpointCommand::Remove { target }) => {
            let endpoint = client.remove_endpoint(&target)?;
            emit(json, &EndpointRecord::from(&endpoint), |ep| {
                format!("removed {} ({})", ep.hostname, ep.tag)
            })
        }
        Command::Endpoint(EndpointCommand::List) | Command::List => {
            let endpoints = client.list_endpoints()?;
            emit_rows(json, &endpoints, |ep| {
                format!(
                    "{}\t{}\t{}:{}\t{}\tsni={}\tinsecure={}",
                    ep.hostname,
                    ep.tag,
                    ep.address,
                    ep.port,
                    ep.user,
                    ep.server_name,
                    ep.allow_insecure
                )
            })
        }
        Command::Redirect(RedirectCommand::Add(sel)) => {
            let rule = client.add_redirect(&sel.into())?;
            emit(json, &rule, |r| format!("redirect {} via {}", r.target, r.outbound_tag))
        }
        Command::Redirect(RedirectCommand::Remove(sel)) => {
            client.remove_redirect(&sel.into())?;
            println!("redirect removed");
            Ok(())
        }
        Command::Redirect(RedirectCommand::List) => {
            let records = client.list_redirects()?;
            emit_rows(json, &records, |r| {
                format!("{}\t{}\t{}\t{}", r.kind, r.value, r.tag, r.hostname)
            })
        }
        Command::Forward(ForwardCommand::Add {
            target,
            listen,
            listen_port,
            protocol,
            base_port,
        }) => {
            let req = ForwardRequest {
                target,
                listen_address: listen,
                listen_port,
                protocol,
                base_port,
            };
            let outcome = client.add_forward(&req)?;
            if !outcome.routed {
                info!(
                    remote = %outcome.rule.target(),
                    "no redirect covers this target, traffic uses the default route"
                );
            }
            emit(json, &outcome.rule, |r| {
                format!(
                    "{} {}:{} -> {} ({})",
                    r.tag,
                    r.listen_address,
                    r.listen_port,
                    r.target(),
                    r.protocol
                )
            })
        }
        Command::Forward(ForwardCommand::Remove {
            listen_port,
            tag,
            remark,
        }) => {
            let rule = client.remove_forward(&Selector {
                listen_port,
                tag,
                remark,
            })?;
            emit(json, &rule, |r| format!("removed {} ({})", r.tag, r.remark))
        }
        Command::Forward(ForwardCommand::List) => {
            let forwards = client.list_forwards()?;
            emit_rows(json, &forwards, |r| {
                format!(
                    "{}\t{}:{}\t{}\t{}\t{}",
                    r.tag, r.listen_address, r.listen_port, r.target(), r.protocol, r.remark
                )
            })
        }
        Command::Reverse(ReverseCommand::Add { user, endpoint }) => {
            let channel = client.add_reverse(&user, &endpoint)?;
            emit(json, &channel, |c| format!("reverse {} via {}", c.tag, c.endpoint_tag))
        }
        Command::Reverse(ReverseCommand::List) => {
            let records = client.list_reverse()?;
            emit_rows(json, &records, |r| {
                format!(
                    "{}\t{}\t{}\t{}\tbridge={}\tdirect={}",
                    r.tag, r.user, r.host, r.endpoint_tag, r.bridge, r.direct_rule
                )
            })
        }
    }
}

fn install_request(args: InstallArgs, settings: &Settings) -> anyhow::Result<InstallRequest> {
    let mut req = match &args.link {
        Some(link) => InstallRequest::from(TrojanLink::parse(link)?),
        None => InstallRequest {
            address: args.address.unwrap_or_default(),
            port: args.port.unwrap_or(settings.client.server_port),
            user: args.user.unwrap_or_default(),
            password: args.password.unwrap_or_default(),
            server_name: args.sni.unwrap_or_default(),
            allow_insecure: settings.client.allow_insecure,
            force: false,
        },
    };
    if let Some(flag) = args.allow_insecure {
        req.allow_insecure = flag;
    }
    req.force = args.force;
    Ok(req)
}

fn emit<T: Serialize>(json: bool, value: &T, text: impl Fn(&T) -> String) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        println!("{}", text(value));
    }
    Ok(())
}

fn emit_rows<T: Serialize>(
    json: bool,
    rows: &[T],
    text: impl Fn(&T) -> String,
) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(rows)?);
        return Ok(());
    }
    if rows.is_empty() {
        println!("(none)");
    }
    for row in rows {
        println!("{}", text(row));
    }
    Ok(())
}
