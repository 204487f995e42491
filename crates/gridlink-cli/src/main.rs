//! Gridlink CLI - expose cluster endpoints on local TCP ports

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use dialoguer::{Input, Select};
use std::collections::HashSet;
use tracing::{debug, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gridlink_cli::api::{self, ManagementApi};
use gridlink_cli::store::{ProxyConfig, WorkspaceStore};
use gridlink_client::{ensure_client, ControlClient};
use gridlink_proto::{StartProxyParams, TunnelId};

/// Gridlink CLI - reach services inside managed clusters from localhost
#[derive(Parser, Debug)]
#[command(name = "gridlink")]
#[command(about = "Expose remote cluster endpoints on local TCP ports", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Manage local workspaces
    #[command(alias = "ws")]
    Workspace {
        #[command(subcommand)]
        command: WorkspaceCommands,
    },
    /// Manage local proxies
    #[command(alias = "px")]
    Proxy {
        #[command(subcommand)]
        command: ProxyCommands,
    },
    /// Run the tunnel daemon in the foreground (spawned automatically)
    #[command(hide = true)]
    Daemon {
        /// Control port to listen on
        #[arg(long)]
        port: u16,
    },
}

#[derive(Subcommand, Debug)]
enum WorkspaceCommands {
    /// Create a new workspace
    Create {
        /// Workspace name
        name: String,
    },
    /// Remove a workspace
    Remove {
        /// Workspace name
        name: String,
    },
    /// Switch the current workspace
    Toggle {
        /// Workspace name
        name: String,
    },
    /// List all workspaces
    List,
    /// Set a workspace's gateway host
    Host {
        /// Gateway base URL (http or https)
        host: String,
        /// Workspace name (defaults to the current one)
        #[arg(short, long)]
        name: Option<String>,
    },
    /// Set a workspace's access token
    Token {
        /// Access token
        token: String,
        /// Workspace name (defaults to the current one)
        #[arg(short, long)]
        name: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
enum ProxyCommands {
    /// Configure a new proxy (interactive)
    Add {
        /// Proxy name
        name: String,
        /// Free-form description
        description: Option<String>,
        /// Target kind: svc, pod, or path
        #[arg(short = 't', long = "type", default_value = "path")]
        kind: String,
    },
    /// Remove a proxy (stops it first if running)
    Remove {
        /// Proxy name (interactive selection when omitted)
        name: Option<String>,
    },
    /// List proxies in the current workspace
    List,
    /// Start a proxy
    Start {
        /// Proxy name (interactive selection when omitted)
        name: Option<String>,
    },
    /// Stop a running proxy
    Stop {
        /// Proxy name (interactive selection when omitted)
        name: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    let store = WorkspaceStore::new()?;

    match cli.command {
        Commands::Workspace { command } => handle_workspace_command(&store, command).await,
        Commands::Proxy { command } => handle_proxy_command(&store, command).await,
        Commands::Daemon { port } => {
            gridlink_daemon::run(port).await?;
            Ok(())
        }
    }
}

fn init_logging(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn handle_workspace_command(store: &WorkspaceStore, command: WorkspaceCommands) -> Result<()> {
    match command {
        WorkspaceCommands::Create { name } => {
            store.create(&name)?;
            println!("=> Workspace '{}' created", name);
            Ok(())
        }
        WorkspaceCommands::Remove { name } => {
            store.remove(&name)?;
            println!("=> Workspace '{}' removed", name);
            Ok(())
        }
        WorkspaceCommands::Toggle { name } => {
            store.toggle(&name)?;
            println!("=> Current workspace is now '{}'", name);
            Ok(())
        }
        WorkspaceCommands::List => {
            let doc = store.load()?;
            println!("{:<16} {:<8} {:<40} Token", "Name", "Current", "Host");
            for workspace in &doc.list {
                let current = if workspace.name == doc.current { "*" } else { "" };
                let token = if workspace.token.is_empty() { "" } else { "set" };
                println!(
                    "{:<16} {:<8} {:<40} {}",
                    workspace.name, current, workspace.host, token
                );
            }
            Ok(())
        }
        WorkspaceCommands::Host { host, name } => {
            if let Err(e) = ManagementApi::check_host(&host).await {
                warn!("gateway check for {} failed: {}", host, e);
                println!("=> Warning: {}", e);
            }
            store.set_host(name.as_deref(), &host)?;
            println!("=> Host updated");
            Ok(())
        }
        WorkspaceCommands::Token { token, name } => {
            store.set_token(name.as_deref(), &token)?;
            println!("=> Token updated");
            Ok(())
        }
    }
}

async fn handle_proxy_command(store: &WorkspaceStore, command: ProxyCommands) -> Result<()> {
    match command {
        ProxyCommands::Add {
            name,
            description,
            kind,
        } => handle_proxy_add(store, name, description.unwrap_or_default(), &kind).await,
        ProxyCommands::Remove { name } => handle_proxy_remove(store, name).await,
        ProxyCommands::List => handle_proxy_list(store).await,
        ProxyCommands::Start { name } => handle_proxy_start(store, name).await,
        ProxyCommands::Stop { name } => handle_proxy_stop(store, name).await,
    }
}

async fn handle_proxy_add(
    store: &WorkspaceStore,
    name: String,
    description: String,
    kind: &str,
) -> Result<()> {
    let workspace = store.current()?;
    let api = ManagementApi::new(&workspace.host, &workspace.token)?;

    let clusters = api.get_clusters().await?;
    if clusters.is_empty() {
        bail!("no clusters available on this gateway");
    }
    let items: Vec<String> = clusters.iter().map(|c| c.name.clone()).collect();
    let idx = Select::new()
        .with_prompt("Select a cluster")
        .items(&items)
        .default(0)
        .interact()?;
    let cluster = &clusters[idx];

    // central traffic authenticates with the workspace token
    let token = if cluster.is_central() {
        None
    } else {
        cluster.token.clone()
    };
    let edge_id = if cluster.edge_id.is_empty() {
        api::CENTRAL_EDGE.to_string()
    } else {
        cluster.edge_id.clone()
    };
    let edge_for_api = if cluster.is_central() {
        api::CENTRAL_EDGE
    } else {
        cluster.edge_id.as_str()
    };

    let (host, port) = match kind {
        "svc" => {
            let namespace = select_namespace(&api, edge_for_api).await?;
            let services = api.get_services(edge_for_api, &namespace).await?;
            let services: Vec<_> = services.into_iter().filter(|s| s.is_routable()).collect();
            if services.is_empty() {
                bail!("no routable services in namespace '{}'", namespace);
            }
            let items: Vec<String> = services.iter().map(|s| s.metadata.name.clone()).collect();
            let idx = Select::new()
                .with_prompt("Select a service")
                .items(&items)
                .default(0)
                .interact()?;
            let service = &services[idx];
            let ip = service
                .spec
                .cluster_ip
                .clone()
                .context("service has no cluster IP")?;
            let port = service
                .spec
                .ports
                .first()
                .context("service exposes no ports")?
                .port;
            (ip, port)
        }
        "pod" => {
            let namespace = select_namespace(&api, edge_for_api).await?;
            let pods = api.get_pods(edge_for_api, &namespace).await?;
            let pods: Vec<_> = pods
                .into_iter()
                .filter(|p| p.status.pod_ip.is_some())
                .collect();
            if pods.is_empty() {
                bail!("no running pods in namespace '{}'", namespace);
            }
            let items: Vec<String> = pods.iter().map(|p| p.metadata.name.clone()).collect();
            let idx = Select::new()
                .with_prompt("Select a pod")
                .items(&items)
                .default(0)
                .interact()?;
            let pod = &pods[idx];
            let ip = pod.status.pod_ip.clone().context("pod has no IP")?;
            let port = pod
                .spec
                .containers
                .first()
                .and_then(|c| c.ports.first())
                .context("pod exposes no container ports")?
                .container_port;
            (ip, port)
        }
        "path" => {
            let host: String = Input::new()
                .with_prompt("Remote service host")
                .interact_text()?;
            let port: u16 = Input::new()
                .with_prompt("Remote service port")
                .interact_text()?;
            (host, port)
        }
        other => bail!("invalid type '{}'; expected svc, pod, or path", other),
    };

    let local_port = prompt_local_port()?;
    let proxy = ProxyConfig {
        name: name.clone(),
        description,
        edge_id,
        edge_name: cluster.name.clone(),
        token,
        host,
        port,
        local_port,
    };
    store.add_proxy(proxy)?;
    println!("=> Proxy '{}' saved", name);
    Ok(())
}

async fn select_namespace(api: &ManagementApi, edge_id: &str) -> Result<String> {
    let namespaces = api.get_namespaces(edge_id).await?;
    if namespaces.is_empty() {
        bail!("no namespaces visible on this cluster");
    }
    let items: Vec<String> = namespaces.iter().map(|n| n.metadata.name.clone()).collect();
    let idx = Select::new()
        .with_prompt("Select a namespace")
        .items(&items)
        .default(0)
        .interact()?;
    Ok(items[idx].clone())
}

fn prompt_local_port() -> Result<Option<u16>> {
    let raw: String = Input::new()
        .with_prompt("Local port (blank for an ephemeral one)")
        .allow_empty(true)
        .interact_text()?;
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    Ok(Some(raw.parse().context("invalid port number")?))
}

/// Pick a proxy by name, or interactively when `name` is `None`.
fn resolve_proxy<'a>(
    proxies: &'a [ProxyConfig],
    name: Option<String>,
    prompt: &str,
) -> Result<&'a ProxyConfig> {
    if proxies.is_empty() {
        bail!("no proxies configured; add one with 'gridlink proxy add <name>'");
    }
    match name {
        Some(name) => proxies
            .iter()
            .find(|p| p.name == name)
            .with_context(|| format!("proxy '{}' not found", name)),
        None => {
            let items: Vec<String> = proxies.iter().map(|p| p.name.clone()).collect();
            let idx = Select::new()
                .with_prompt(prompt)
                .items(&items)
                .default(0)
                .interact()?;
            Ok(&proxies[idx])
        }
    }
}

/// Identities of the tunnels the daemon currently runs, or empty when no
/// daemon is reachable. Never spawns a daemon.
async fn live_tunnels(store: &WorkspaceStore) -> HashSet<TunnelId> {
    let Ok(doc) = store.load() else {
        return HashSet::new();
    };
    let Some(port) = doc.daemon_port else {
        return HashSet::new();
    };
    let Ok(client) = ControlClient::connect(port).await else {
        debug!("no daemon reachable on port {}", port);
        return HashSet::new();
    };
    match client.get_proxies().await {
        Ok(list) => list.into_iter().map(|p| p.id).collect(),
        Err(e) => {
            debug!("getProxies failed: {}", e);
            HashSet::new()
        }
    }
}

async fn handle_proxy_list(store: &WorkspaceStore) -> Result<()> {
    let workspace = store.current()?;
    if workspace.proxies.is_empty() {
        println!("No proxies configured");
        println!("Add one with: gridlink proxy add <name> --type svc|pod|path");
        return Ok(());
    }

    let live = live_tunnels(store).await;
    println!(
        "{:<16} {:<24} {:<12} {:<20} {:>7} {:>9} Running",
        "Name", "Description", "EdgeName", "Host", "Port", "LocalPort"
    );
    for proxy in &workspace.proxies {
        let running = if live.contains(&proxy.tunnel_id()) {
            "yes"
        } else {
            "no"
        };
        let local_port = proxy
            .local_port
            .map(|p| p.to_string())
            .unwrap_or_else(|| "auto".to_string());
        println!(
            "{:<16} {:<24} {:<12} {:<20} {:>7} {:>9} {}",
            proxy.name, proxy.description, proxy.edge_name, proxy.host, proxy.port, local_port,
            running
        );
    }
    Ok(())
}

async fn handle_proxy_start(store: &WorkspaceStore, name: Option<String>) -> Result<()> {
    let workspace = store.current()?;
    if workspace.host.is_empty() {
        bail!("workspace host is empty; set it with 'gridlink workspace host <url>'");
    }
    let proxy = resolve_proxy(&workspace.proxies, name, "Select a proxy to start")?;

    let params = StartProxyParams {
        ws_url: workspace.host.clone(),
        port: proxy.local_port,
        token: proxy
            .token
            .clone()
            .unwrap_or_else(|| workspace.token.clone()),
        link_host: proxy.host.clone(),
        link_port: proxy.port,
        link_edge_id: proxy.edge_id.clone(),
    };

    let port = store.daemon_port()?;
    let logs = store.log_paths()?;
    let client = ensure_client(port, &logs).await?;
    let id = client.start_proxy(&params).await?;
    println!("=> Proxy '{}' is running ({})", proxy.name, id);
    Ok(())
}

async fn handle_proxy_stop(store: &WorkspaceStore, name: Option<String>) -> Result<()> {
    let workspace = store.current()?;
    let live = live_tunnels(store).await;
    let running: Vec<ProxyConfig> = workspace
        .proxies
        .iter()
        .filter(|p| live.contains(&p.tunnel_id()))
        .cloned()
        .collect();
    if running.is_empty() {
        println!("=> No running proxy");
        return Ok(());
    }

    let proxy = resolve_proxy(&running, name, "Select a proxy to stop")?;
    let doc = store.load()?;
    let port = doc.daemon_port.context("no daemon port recorded")?;
    let client = ControlClient::connect(port).await?;
    client.stop_proxy(&proxy.tunnel_id()).await?;
    println!("=> Proxy '{}' stopped", proxy.name);
    Ok(())
}

async fn handle_proxy_remove(store: &WorkspaceStore, name: Option<String>) -> Result<()> {
    let workspace = store.current()?;
    let proxy = resolve_proxy(&workspace.proxies, name, "Select a proxy to remove")?.clone();

    // stop the tunnel first when a daemon is running it
    let live = live_tunnels(store).await;
    if live.contains(&proxy.tunnel_id()) {
        if let Some(port) = store.load()?.daemon_port {
            if let Ok(client) = ControlClient::connect(port).await {
                let _ = client.stop_proxy(&proxy.tunnel_id()).await;
            }
        }
    }

    store.remove_proxy(&proxy.name)?;
    println!("=> Proxy '{}' removed", proxy.name);
    Ok(())
}
