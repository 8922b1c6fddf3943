// ── Linux provider ──
//
// Drives a generic Linux network stack through its own tools:
//
// - routes live in a dedicated routing table, managed with `ip route`
// - firewall and NAT rules live in dedicated nftables tables that are
//   replaced atomically with one `nft -f -` transaction per apply; every
//   rule carries its idempotency key in a comment
// - WireGuard tunnels are `ip link` devices configured with `wg`
// - interface and device counters come from `ip -json addr`, sysfs and procfs
//
// The kernel cannot hand back the exact model entries it was given (defaults
// get filled in, names are lost), so the provider keeps a journal of the last
// applied sets in `state_dir` and reports a journal entry as present only
// while the kernel still carries it. Local edits therefore show up as drift.

use std::collections::HashSet;
use std::io;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use super::{Provider, ProviderError};
use crate::config::LinuxSettings;
use crate::model::{
    ActualState, FirewallAction, FirewallRule, Interface, InterfaceStats, MatchSpec, Metrics,
    NatKind, NatRule, Prefix, Protocol, Resource, Route, Tunnel, VpnProfile, WireGuardTunnel,
};

const FILTER_TABLE: &str = "edgeward_filter";
const NAT_TABLE: &str = "edgeward_nat";
const COMMENT_PREFIX: &str = "edgeward:";
const JOURNAL_FILE: &str = "applied.json";

// ── Command execution ────────────────────────────────────────────────

/// Captured result of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            success: true,
            code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            success: false,
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }
}

/// Runs local commands. Swapped for a fake in tests.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(
        &self,
        program: &Path,
        args: &[String],
        stdin: Option<&str>,
    ) -> Result<CommandOutput, ProviderError>;
}

/// Spawns real processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(
        &self,
        program: &Path,
        args: &[String],
        stdin: Option<&str>,
    ) -> Result<CommandOutput, ProviderError> {
        let mut command = tokio::process::Command::new(program);
        command
            .args(args)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = command
            .spawn()
            .map_err(|e| classify_io(&format!("spawning {}", program.display()), &e))?;

        if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
            pipe.write_all(input.as_bytes())
                .await
                .map_err(|e| classify_io(&format!("writing to {}", program.display()), &e))?;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| classify_io(&format!("waiting for {}", program.display()), &e))?;

        Ok(CommandOutput {
            success: output.status.success(),
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Map a failed command to a provider error class from its stderr.
pub fn classify_failure(program: &Path, output: &CommandOutput) -> ProviderError {
    let stderr = output.stderr.trim();
    let lower = stderr.to_ascii_lowercase();
    let code = output
        .code
        .map_or_else(|| "a signal".to_owned(), |c| format!("status {c}"));
    let message = format!("{} exited with {code}: {stderr}", program.display());

    if lower.contains("operation not permitted") || lower.contains("permission denied") {
        ProviderError::PermissionDenied(message)
    } else if lower.contains("resource busy")
        || lower.contains("temporarily unavailable")
        || lower.contains("try again")
        || lower.contains("lock")
    {
        ProviderError::Transient(message)
    } else {
        ProviderError::Permanent(message)
    }
}

fn classify_io(context: &str, error: &io::Error) -> ProviderError {
    let message = format!("{context}: {error}");
    match error.kind() {
        io::ErrorKind::PermissionDenied => ProviderError::PermissionDenied(message),
        io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => {
            ProviderError::Transient(message)
        }
        _ => ProviderError::Permanent(message),
    }
}

// ── Journal ──────────────────────────────────────────────────────────

/// Last sets applied through this provider.
#[derive(Debug, Default, Serialize, Deserialize)]
struct Journal {
    #[serde(default)]
    routes: Vec<Route>,
    #[serde(default)]
    firewall: Vec<FirewallRule>,
    #[serde(default)]
    nat: Vec<NatRule>,
    #[serde(default)]
    vpn: Vec<VpnProfile>,
}

// ── Provider ─────────────────────────────────────────────────────────

pub struct LinuxProvider {
    settings: LinuxSettings,
    runner: Arc<dyn CommandRunner>,
}

impl LinuxProvider {
    pub fn new(settings: LinuxSettings) -> Self {
        Self::with_runner(settings, Arc::new(SystemRunner))
    }

    pub fn with_runner(settings: LinuxSettings, runner: Arc<dyn CommandRunner>) -> Self {
        Self { settings, runner }
    }

    /// Run a command, turning a non-zero exit into a classified error.
    async fn exec(
        &self,
        program: &Path,
        args: Vec<String>,
        stdin: Option<&str>,
    ) -> Result<String, ProviderError> {
        debug!(program = %program.display(), args = ?args, "running command");
        let output = self.runner.run(program, &args, stdin).await?;
        if output.success {
            Ok(output.stdout)
        } else {
            Err(classify_failure(program, &output))
        }
    }

    /// Like `exec`, but a failure whose stderr contains `benign` is ignored.
    async fn exec_tolerating(
        &self,
        program: &Path,
        args: Vec<String>,
        benign: &[&str],
    ) -> Result<(), ProviderError> {
        let output = self.runner.run(program, &args, None).await?;
        if output.success || benign.iter().any(|b| output.stderr.contains(b)) {
            Ok(())
        } else {
            Err(classify_failure(program, &output))
        }
    }

    fn ip(&self) -> &Path {
        &self.settings.ip_path
    }

    fn journal_path(&self) -> PathBuf {
        self.settings.state_dir.join(JOURNAL_FILE)
    }

    async fn load_journal(&self) -> Result<Journal, ProviderError> {
        let path = self.journal_path();
        match tokio::fs::read_to_string(&path).await {
            Ok(text) => Ok(serde_json::from_str(&text).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "unreadable journal, treating device as unmanaged");
                Journal::default()
            })),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Journal::default()),
            Err(e) => Err(classify_io(&format!("reading {}", path.display()), &e)),
        }
    }

    async fn save_journal(&self, journal: &Journal) -> Result<(), ProviderError> {
        let dir = &self.settings.state_dir;
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| classify_io(&format!("creating {}", dir.display()), &e))?;

        let text = serde_json::to_string_pretty(journal)
            .map_err(|e| ProviderError::Permanent(format!("encoding journal: {e}")))?;
        let path = self.journal_path();
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, text)
            .await
            .map_err(|e| classify_io(&format!("writing {}", tmp.display()), &e))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| classify_io(&format!("replacing {}", path.display()), &e))
    }

    async fn update_journal(&self, change: impl FnOnce(&mut Journal)) -> Result<(), ProviderError> {
        let mut journal = self.load_journal().await?;
        change(&mut journal);
        self.save_journal(&journal).await
    }

    // ── Routing ──────────────────────────────────────────────────────

    async fn kernel_routes(&self) -> Result<Vec<Route>, ProviderError> {
        let table = self.settings.route_table.to_string();
        let mut routes = Vec::new();
        for family in ["-4", "-6"] {
            let args = strings(&[family, "-json", "route", "show", "table", &table]);
            let stdout = self.exec(self.ip(), args, None).await?;
            routes.extend(parse_routes(&stdout, family == "-6")?);
        }
        Ok(routes)
    }

    // ── nftables ─────────────────────────────────────────────────────

    /// Idempotency keys found in the comments of one agent-owned table.
    async fn nft_rule_keys(&self, table: &str) -> Result<HashSet<String>, ProviderError> {
        let args = strings(&["-j", "list", "table", "inet", table]);
        let output = self.runner.run(&self.settings.nft_path, &args, None).await?;
        if !output.success {
            if output.stderr.contains("No such file or directory") {
                return Ok(HashSet::new());
            }
            return Err(classify_failure(&self.settings.nft_path, &output));
        }
        parse_nft_keys(&output.stdout)
    }

    async fn nft_replace(&self, script: &str) -> Result<(), ProviderError> {
        self.exec(&self.settings.nft_path, strings(&["-f", "-"]), Some(script))
            .await
            .map(|_| ())
    }

    // ── WireGuard ────────────────────────────────────────────────────

    async fn wireguard_links(&self) -> Result<HashSet<String>, ProviderError> {
        let args = strings(&["-json", "link", "show", "type", "wireguard"]);
        let stdout = self.exec(self.ip(), args, None).await?;
        if stdout.trim().is_empty() {
            return Ok(HashSet::new());
        }
        let links: Vec<IpLink> = serde_json::from_str(&stdout)
            .map_err(|e| ProviderError::Permanent(format!("unexpected `ip link` output: {e}")))?;
        Ok(links.into_iter().map(|l| l.ifname).collect())
    }

    async fn delete_link(&self, name: &str) -> Result<(), ProviderError> {
        self.exec_tolerating(
            self.ip(),
            strings(&["link", "del", "dev", name]),
            &["Cannot find device"],
        )
        .await
    }

    async fn create_wireguard(&self, name: &str, wg: &WireGuardTunnel) -> Result<(), ProviderError> {
        let key_path = wg
            .private_key_ref
            .strip_prefix("file:")
            .unwrap_or(&wg.private_key_ref);
        if !key_path.starts_with('/') {
            return Err(ProviderError::Permanent(format!(
                "wireguard private key for {name} must be a file: reference, got {:?}",
                wg.private_key_ref
            )));
        }

        self.exec(
            self.ip(),
            strings(&["link", "add", "dev", name, "type", "wireguard"]),
            None,
        )
        .await?;

        let mut set = strings(&["set", name, "private-key", key_path]);
        if let Some(port) = wg.listen_port {
            set.extend(strings(&["listen-port", &port.to_string()]));
        }
        self.exec(&self.settings.wg_path, set, None).await?;

        for address in &wg.address {
            let args = strings(&["address", "add", &address.to_string(), "dev", name]);
            self.exec(self.ip(), args, None).await?;
        }

        for peer in &wg.peers {
            let mut args = strings(&["set", name, "peer", &peer.public_key]);
            if let Some(endpoint) = &peer.endpoint {
                args.extend(strings(&["endpoint", endpoint]));
            }
            if let Some(keepalive) = peer.persistent_keepalive {
                args.extend(strings(&["persistent-keepalive", &keepalive.to_string()]));
            }
            if !peer.allowed_ips.is_empty() {
                let allowed: Vec<String> = peer.allowed_ips.iter().map(ToString::to_string).collect();
                args.extend(strings(&["allowed-ips", &allowed.join(",")]));
            }
            self.exec(&self.settings.wg_path, args, None).await?;
        }

        self.exec(self.ip(), strings(&["link", "set", "up", "dev", name]), None)
            .await
            .map(|_| ())
    }

    // ── Introspection ────────────────────────────────────────────────

    async fn interface_stats(&self, name: &str) -> InterfaceStats {
        let dir = self
            .settings
            .sysfs_root
            .join("class/net")
            .join(name)
            .join("statistics");
        InterfaceStats {
            rx_bytes: read_counter(&dir.join("rx_bytes")).await.unwrap_or(0),
            tx_bytes: read_counter(&dir.join("tx_bytes")).await.unwrap_or(0),
            rx_packets: read_counter(&dir.join("rx_packets")).await.unwrap_or(0),
            tx_packets: read_counter(&dir.join("tx_packets")).await.unwrap_or(0),
            rx_errors: read_counter(&dir.join("rx_errors")).await.unwrap_or(0),
            tx_errors: read_counter(&dir.join("tx_errors")).await.unwrap_or(0),
        }
    }
}

#[async_trait]
impl Provider for LinuxProvider {
    fn name(&self) -> &'static str {
        "linux"
    }

    async fn read_config(&self) -> Result<ActualState, ProviderError> {
        let journal = self.load_journal().await?;
        let kernel_routes = self.kernel_routes().await?;
        let filter_keys = self.nft_rule_keys(FILTER_TABLE).await?;
        let nat_keys = self.nft_rule_keys(NAT_TABLE).await?;
        let links = self.wireguard_links().await?;

        Ok(ActualState {
            routes: merge_routes(kernel_routes, &journal.routes),
            nat: journal
                .nat
                .into_iter()
                .filter(|r| nat_keys.contains(r.key().as_str()))
                .collect(),
            firewall: journal
                .firewall
                .into_iter()
                .filter(|r| filter_keys.contains(r.key().as_str()))
                .collect(),
            vpn: journal
                .vpn
                .into_iter()
                .filter(|p| p.enabled == links.contains(&p.name))
                .collect(),
            ddns: Vec::new(),
        })
    }

    async fn apply_firewall(&self, rules: &[FirewallRule]) -> Result<(), ProviderError> {
        self.nft_replace(&render_filter_table(rules)).await?;
        self.update_journal(|j| j.firewall = rules.to_vec()).await
    }

    async fn apply_nat(&self, rules: &[NatRule]) -> Result<(), ProviderError> {
        self.nft_replace(&render_nat_table(rules)).await?;
        self.update_journal(|j| j.nat = rules.to_vec()).await
    }

    async fn apply_routing(&self, routes: &[Route]) -> Result<(), ProviderError> {
        let table = self.settings.route_table.to_string();
        let current = self.kernel_routes().await?;
        let wanted: HashSet<String> = routes.iter().map(Resource::identity).collect();

        for stale in current.iter().filter(|r| !wanted.contains(&r.identity())) {
            let mut args = family_flag(&stale.destination);
            args.extend(strings(&[
                "route",
                "del",
                &stale.destination.to_string(),
                "metric",
                &stale.metric.to_string(),
                "table",
                &table,
            ]));
            self.exec_tolerating(self.ip(), args, &["No such process"])
                .await?;
        }

        for route in routes {
            let mut args = family_flag(&route.destination);
            args.extend(strings(&["route", "replace", &route.destination.to_string()]));
            if let Some(gateway) = route.gateway {
                args.extend(strings(&["via", &gateway.to_string()]));
            }
            if let Some(interface) = &route.interface {
                args.extend(strings(&["dev", interface]));
            }
            args.extend(strings(&["metric", &route.metric.to_string(), "table", &table]));
            self.exec(self.ip(), args, None).await?;
        }

        self.update_journal(|j| j.routes = routes.to_vec()).await
    }

    async fn apply_vpn(&self, profiles: &[VpnProfile]) -> Result<(), ProviderError> {
        if let Some(unsupported) = profiles
            .iter()
            .find(|p| p.enabled && !matches!(p.tunnel, Tunnel::Wireguard(_)))
        {
            return Err(ProviderError::Permanent(format!(
                "{} tunnels are not supported by the linux provider ({})",
                unsupported.tunnel_type(),
                unsupported.name
            )));
        }

        let journal = self.load_journal().await?;
        let links = self.wireguard_links().await?;

        for previous in &journal.vpn {
            if !profiles.iter().any(|p| p.name == previous.name) {
                self.delete_link(&previous.name).await?;
            }
        }

        for profile in profiles {
            let unchanged = journal
                .vpn
                .iter()
                .any(|prev| prev.name == profile.name && prev.key() == profile.key())
                && profile.enabled == links.contains(&profile.name);
            if unchanged {
                continue;
            }

            self.delete_link(&profile.name).await?;
            if let (true, Tunnel::Wireguard(wg)) = (profile.enabled, &profile.tunnel) {
                self.create_wireguard(&profile.name, wg).await?;
            }
        }

        self.update_journal(|j| j.vpn = profiles.to_vec()).await
    }

    async fn get_metrics(&self) -> Result<Metrics, ProviderError> {
        let proc_root = &self.settings.proc_root;
        let mut metrics = Metrics::default();

        let sources = [
            ("conntrack_entries", "sys/net/netfilter/nf_conntrack_count"),
            ("conntrack_max", "sys/net/netfilter/nf_conntrack_max"),
            ("ipv4_forwarding", "sys/net/ipv4/ip_forward"),
        ];
        for (name, relative) in sources {
            if let Some(value) = read_counter(&proc_root.join(relative)).await {
                metrics.counters.insert(name.into(), value);
            }
        }

        if let Ok(uptime) = tokio::fs::read_to_string(proc_root.join("uptime")).await {
            if let Some(secs) = uptime
                .split_whitespace()
                .next()
                .and_then(|s| s.split('.').next())
                .and_then(|s| s.parse::<u64>().ok())
            {
                metrics.counters.insert("uptime_secs".into(), secs);
            }
        }

        Ok(metrics)
    }

    async fn get_interfaces(&self) -> Result<Vec<Interface>, ProviderError> {
        let stdout = self
            .exec(self.ip(), strings(&["-json", "addr", "show"]), None)
            .await?;
        let entries: Vec<IpAddrEntry> = if stdout.trim().is_empty() {
            Vec::new()
        } else {
            serde_json::from_str(&stdout)
                .map_err(|e| ProviderError::Permanent(format!("unexpected `ip addr` output: {e}")))?
        };

        let mut interfaces = Vec::with_capacity(entries.len());
        for entry in entries {
            let stats = self.interface_stats(&entry.ifname).await;
            interfaces.push(Interface {
                up: entry.flags.iter().any(|f| f == "UP"),
                mac: entry.address.filter(|mac| !mac.is_empty()),
                mtu: entry.mtu,
                addresses: entry
                    .addr_info
                    .iter()
                    .map(|a| format!("{}/{}", a.local, a.prefixlen))
                    .collect(),
                name: entry.ifname,
                stats,
            });
        }
        Ok(interfaces)
    }
}

// ── `ip -json` shapes ────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct IpRoute {
    dst: String,
    #[serde(default)]
    gateway: Option<IpAddr>,
    #[serde(default)]
    dev: Option<String>,
    #[serde(default)]
    metric: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct IpLink {
    ifname: String,
}

#[derive(Debug, Deserialize)]
struct IpAddrEntry {
    ifname: String,
    #[serde(default)]
    flags: Vec<String>,
    #[serde(default)]
    mtu: Option<u32>,
    #[serde(default)]
    address: Option<String>,
    #[serde(default)]
    addr_info: Vec<AddrInfo>,
}

#[derive(Debug, Deserialize)]
struct AddrInfo {
    local: String,
    prefixlen: u8,
}

fn parse_routes(stdout: &str, ipv6: bool) -> Result<Vec<Route>, ProviderError> {
    if stdout.trim().is_empty() {
        return Ok(Vec::new());
    }
    let raw: Vec<IpRoute> = serde_json::from_str(stdout)
        .map_err(|e| ProviderError::Permanent(format!("unexpected `ip route` output: {e}")))?;

    raw.into_iter()
        .map(|r| {
            let dst = if r.dst == "default" && ipv6 {
                "::/0"
            } else {
                r.dst.as_str()
            };
            let destination: Prefix = dst.parse().map_err(|e| {
                ProviderError::Permanent(format!("unexpected route destination {:?}: {e}", r.dst))
            })?;
            Ok(Route {
                destination,
                gateway: r.gateway,
                interface: r.dev,
                metric: r.metric.unwrap_or(0),
            })
        })
        .collect()
}

/// Prefer the journal's version of a kernel route, so fields the kernel
/// fills in on its own (the outgoing device) do not look like drift.
fn merge_routes(kernel: Vec<Route>, recorded: &[Route]) -> Vec<Route> {
    kernel
        .into_iter()
        .map(|live| {
            recorded
                .iter()
                .find(|r| {
                    r.identity() == live.identity()
                        && r.gateway.is_none_or(|g| live.gateway == Some(g))
                        && r
                            .interface
                            .as_ref()
                            .is_none_or(|i| live.interface.as_ref() == Some(i))
                })
                .cloned()
                .unwrap_or(live)
        })
        .collect()
}

fn parse_nft_keys(stdout: &str) -> Result<HashSet<String>, ProviderError> {
    #[derive(Deserialize)]
    struct Document {
        #[serde(default)]
        nftables: Vec<serde_json::Value>,
    }

    let doc: Document = serde_json::from_str(stdout)
        .map_err(|e| ProviderError::Permanent(format!("unexpected `nft -j` output: {e}")))?;

    Ok(doc
        .nftables
        .iter()
        .filter_map(|item| item.get("rule")?.get("comment")?.as_str())
        .filter_map(|comment| comment.strip_prefix(COMMENT_PREFIX))
        .map(str::to_owned)
        .collect())
}

async fn read_counter(path: &Path) -> Option<u64> {
    tokio::fs::read_to_string(path)
        .await
        .ok()?
        .trim()
        .parse()
        .ok()
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| (*s).to_owned()).collect()
}

fn family_flag(prefix: &Prefix) -> Vec<String> {
    vec![if prefix.is_ipv4() { "-4" } else { "-6" }.to_owned()]
}

// ── nftables rendering ───────────────────────────────────────────────

/// Interface names and similar go inside double quotes.
fn quoted(value: &str) -> String {
    let clean: String = value.chars().filter(|c| *c != '"' && *c != '\\').collect();
    format!("\"{clean}\"")
}

fn render_match(spec: &MatchSpec) -> Vec<String> {
    let mut parts = Vec::new();

    if let Some(iface) = &spec.in_interface {
        parts.push(format!("iifname {}", quoted(iface)));
    }
    if let Some(iface) = &spec.out_interface {
        parts.push(format!("oifname {}", quoted(iface)));
    }
    for (prefix, dir) in [(spec.src, "saddr"), (spec.dst, "daddr")] {
        if let Some(prefix) = prefix {
            let family = if prefix.is_ipv4() { "ip" } else { "ip6" };
            parts.push(format!("{family} {dir} {prefix}"));
        }
    }

    let ports = [(spec.src_port, "sport"), (spec.dst_port, "dport")];
    let has_ports = ports.iter().any(|(port, _)| port.is_some());
    let port_proto = match spec.protocol {
        Some(Protocol::Tcp) => "tcp",
        Some(Protocol::Udp) => "udp",
        Some(Protocol::Icmp) => {
            parts.push("meta l4proto { icmp, ipv6-icmp }".into());
            "th"
        }
        None => "th",
    };
    if has_ports {
        for (port, dir) in ports {
            if let Some(port) = port {
                parts.push(format!("{port_proto} {dir} {port}"));
            }
        }
    } else if let Some(proto @ (Protocol::Tcp | Protocol::Udp)) = spec.protocol {
        parts.push(format!("meta l4proto {proto}"));
    }

    parts
}

fn rule_line(mut parts: Vec<String>, action: String, key: &str) -> String {
    parts.push(action);
    parts.push(format!("comment \"{COMMENT_PREFIX}{key}\""));
    parts.join(" ")
}

fn render_filter_table(rules: &[FirewallRule]) -> String {
    let mut script = table_preamble(FILTER_TABLE);
    script.push_str("\tchain forward {\n\t\ttype filter hook forward priority filter; policy accept;\n");
    for rule in rules {
        let mut parts = render_match(&rule.matches);
        if rule.log {
            parts.push(format!("log prefix {}", quoted(&format!("edgeward {}: ", rule.name))));
        }
        let verdict = match rule.action {
            FirewallAction::Allow => "accept",
            FirewallAction::Deny => "drop",
            FirewallAction::Reject => "reject",
        };
        script.push_str(&format!(
            "\t\t{}\n",
            rule_line(parts, verdict.into(), rule.key().as_str())
        ));
    }
    script.push_str("\t}\n}\n");
    script
}

fn render_nat_table(rules: &[NatRule]) -> String {
    let mut script = table_preamble(NAT_TABLE);

    script.push_str("\tchain prerouting {\n\t\ttype nat hook prerouting priority dstnat; policy accept;\n");
    for rule in rules.iter().filter(|r| r.kind == NatKind::Dnat) {
        script.push_str(&format!("\t\t{}\n", nat_line(rule)));
    }
    script.push_str("\t}\n");

    script.push_str("\tchain postrouting {\n\t\ttype nat hook postrouting priority srcnat; policy accept;\n");
    for rule in rules.iter().filter(|r| r.is_source_nat()) {
        script.push_str(&format!("\t\t{}\n", nat_line(rule)));
    }
    script.push_str("\t}\n}\n");
    script
}

fn nat_line(rule: &NatRule) -> String {
    let target = |verb: &str| match rule.to_address {
        Some(IpAddr::V4(addr)) => match rule.to_port {
            Some(port) => format!("{verb} ip to {addr}:{port}"),
            None => format!("{verb} ip to {addr}"),
        },
        Some(IpAddr::V6(addr)) => match rule.to_port {
            Some(port) => format!("{verb} ip6 to [{addr}]:{port}"),
            None => format!("{verb} ip6 to {addr}"),
        },
        None => verb.to_owned(),
    };
    let action = match rule.kind {
        NatKind::Masquerade => "masquerade".to_owned(),
        NatKind::Snat => target("snat"),
        NatKind::Dnat => target("dnat"),
    };
    rule_line(render_match(&rule.matches), action, rule.key().as_str())
}

/// Create-then-delete makes the delete safe when the table does not exist
/// yet; the whole script is one nft transaction.
fn table_preamble(table: &str) -> String {
    format!("table inet {table}\ndelete table inet {table}\ntable inet {table} {{\n")
}
