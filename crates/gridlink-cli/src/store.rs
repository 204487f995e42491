//! Workspace configuration storage
//!
//! All CLI state lives in one JSON document at `~/.gridlink/workspaces.json`:
//! the named workspaces, which one is current, the proxies configured in
//! each, and the daemon control port. The `default` workspace always exists
//! and cannot be removed.

use anyhow::{bail, Context, Result};
use gridlink_client::LogPaths;
use gridlink_daemon::allocator::probe_free_port;
use gridlink_proto::{TunnelId, TunnelTarget};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_WORKSPACE: &str = "default";

/// One configured proxy: a remote target plus how to reach and expose it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyConfig {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub edge_id: String,
    #[serde(default)]
    pub edge_name: String,
    /// Per-proxy token; falls back to the workspace token when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    pub host: String,
    pub port: u16,
    /// Fixed local port; absent means "let the daemon pick one".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_port: Option<u16>,
}

impl ProxyConfig {
    pub fn target(&self) -> TunnelTarget {
        TunnelTarget::new(&self.edge_id, &self.host, self.port)
    }

    /// The identity the daemon will use for this proxy's tunnel.
    pub fn tunnel_id(&self) -> TunnelId {
        self.target().id()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workspace {
    pub name: String,
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub proxies: Vec<ProxyConfig>,
}

impl Workspace {
    fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            host: String::new(),
            token: String::new(),
            proxies: Vec::new(),
        }
    }

    pub fn proxy(&self, name: &str) -> Option<&ProxyConfig> {
        self.proxies.iter().find(|p| p.name == name)
    }
}

/// The whole on-disk document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceDoc {
    pub current: String,
    #[serde(default)]
    pub daemon_port: Option<u16>,
    pub list: Vec<Workspace>,
}

impl Default for WorkspaceDoc {
    fn default() -> Self {
        Self {
            current: DEFAULT_WORKSPACE.to_string(),
            daemon_port: None,
            list: vec![Workspace::named(DEFAULT_WORKSPACE)],
        }
    }
}

/// Reads and writes the workspace document.
pub struct WorkspaceStore {
    base_dir: PathBuf,
}

impl WorkspaceStore {
    pub fn new() -> Result<Self> {
        let home = dirs::home_dir().context("failed to resolve home directory")?;
        Self::at(home.join(".gridlink"))
    }

    /// Open a store rooted at an explicit directory.
    pub fn at(base_dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&base_dir)
            .with_context(|| format!("failed to create {}", base_dir.display()))?;
        Ok(Self { base_dir })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn doc_path(&self) -> PathBuf {
        self.base_dir.join("workspaces.json")
    }

    fn validate_name(name: &str) -> Result<()> {
        if name.is_empty() {
            bail!("workspace name cannot be empty");
        }
        if !name
            .chars()
            .all(|c| c.is_alphanumeric() || c == '-' || c == '_')
        {
            bail!("workspace name must contain only alphanumeric characters, hyphens, and underscores");
        }
        Ok(())
    }

    /// Load the document, creating the default one on first use.
    pub fn load(&self) -> Result<WorkspaceDoc> {
        let path = self.doc_path();
        if !path.exists() {
            let doc = WorkspaceDoc::default();
            self.save(&doc)?;
            return Ok(doc);
        }
        let json = fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        serde_json::from_str(&json).with_context(|| format!("failed to parse {}", path.display()))
    }

    pub fn save(&self, doc: &WorkspaceDoc) -> Result<()> {
        let path = self.doc_path();
        let json = serde_json::to_string_pretty(doc).context("failed to serialize workspaces")?;
        fs::write(&path, json).with_context(|| format!("failed to write {}", path.display()))
    }

    pub fn create(&self, name: &str) -> Result<()> {
        Self::validate_name(name)?;
        let mut doc = self.load()?;
        if doc.list.iter().any(|w| w.name == name) {
            bail!("workspace '{}' already exists", name);
        }
        doc.list.push(Workspace::named(name));
        self.save(&doc)
    }

    pub fn remove(&self, name: &str) -> Result<()> {
        if name == DEFAULT_WORKSPACE {
            bail!("the default workspace cannot be removed");
        }
        let mut doc = self.load()?;
        let before = doc.list.len();
        doc.list.retain(|w| w.name != name);
        if doc.list.len() == before {
            bail!("workspace '{}' not found", name);
        }
        if doc.current == name {
            doc.current = DEFAULT_WORKSPACE.to_string();
        }
        self.save(&doc)
    }

    pub fn toggle(&self, name: &str) -> Result<()> {
        let mut doc = self.load()?;
        if !doc.list.iter().any(|w| w.name == name) {
            bail!("workspace '{}' not found", name);
        }
        doc.current = name.to_string();
        self.save(&doc)
    }

    /// The named workspace, or the current one when `name` is `None`.
    pub fn get(&self, name: Option<&str>) -> Result<Workspace> {
        let doc = self.load()?;
        let name = name.unwrap_or(&doc.current);
        doc.list
            .iter()
            .find(|w| w.name == name)
            .cloned()
            .with_context(|| format!("workspace '{}' not found", name))
    }

    pub fn current(&self) -> Result<Workspace> {
        self.get(None)
    }

    pub fn set_host(&self, name: Option<&str>, host: &str) -> Result<()> {
        self.update(name, |w| w.host = host.to_string())
    }

    pub fn set_token(&self, name: Option<&str>, token: &str) -> Result<()> {
        self.update(name, |w| w.token = token.to_string())
    }

    /// Insert or overwrite a proxy in the current workspace, keyed by name.
    pub fn add_proxy(&self, proxy: ProxyConfig) -> Result<()> {
        self.update(None, |w| {
            match w.proxies.iter_mut().find(|p| p.name == proxy.name) {
                Some(existing) => *existing = proxy,
                None => w.proxies.push(proxy),
            }
        })
    }

    /// Remove a proxy from the current workspace. Returns whether it existed.
    pub fn remove_proxy(&self, name: &str) -> Result<bool> {
        let mut removed = false;
        self.update(None, |w| {
            let before = w.proxies.len();
            w.proxies.retain(|p| p.name != name);
            removed = w.proxies.len() != before;
        })?;
        Ok(removed)
    }

    pub fn clear_proxies(&self) -> Result<()> {
        self.update(None, |w| w.proxies.clear())
    }

    fn update(&self, name: Option<&str>, f: impl FnOnce(&mut Workspace)) -> Result<()> {
        let mut doc = self.load()?;
        let name = name.unwrap_or(&doc.current).to_string();
        let workspace = doc
            .list
            .iter_mut()
            .find(|w| w.name == name)
            .with_context(|| format!("workspace '{}' not found", name))?;
        f(workspace);
        self.save(&doc)
    }

    /// The control port every CLI invocation and the daemon agree on.
    ///
    /// Allocated once, then persisted so that later invocations reach the
    /// same daemon instead of spawning a second one.
    pub fn daemon_port(&self) -> Result<u16> {
        let mut doc = self.load()?;
        if let Some(port) = doc.daemon_port {
            return Ok(port);
        }
        let port = probe_free_port().context("failed to allocate a daemon port")?;
        doc.daemon_port = Some(port);
        self.save(&doc)?;
        Ok(port)
    }

    /// Log files a spawned daemon writes to. Created on first use.
    pub fn log_paths(&self) -> Result<LogPaths> {
        let dir = self.base_dir.join("logs");
        fs::create_dir_all(&dir).with_context(|| format!("failed to create {}", dir.display()))?;
        let paths = LogPaths {
            log: dir.join("daemon.log"),
            err: dir.join("daemon.err"),
        };
        for path in [&paths.log, &paths.err] {
            fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to create {}", path.display()))?;
        }
        Ok(paths)
    }
}
