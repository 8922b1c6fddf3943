// ── In-memory provider ──
//
// A simulated device. It stores whatever set it is given, counts every
// `apply_*` invocation per domain, and can be scripted to fail. Used by the
// `plan` command, demos, and the test suites.

use std::collections::VecDeque;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use dashmap::DashMap;

use super::{Provider, ProviderError};
use crate::model::{
    ActualState, DdnsBinding, Domain, FirewallRule, Interface, InterfaceStats, Metrics, NatRule,
    Resource, Route, VpnProfile,
};

#[derive(Debug, Default)]
struct FailureScript {
    queued: VecDeque<ProviderError>,
    sticky: Option<ProviderError>,
}

#[derive(Debug)]
pub struct MemoryProvider {
    state: RwLock<ActualState>,
    interfaces: RwLock<Vec<Interface>>,
    apply_calls: DashMap<Domain, u32>,
    scripts: DashMap<Domain, FailureScript>,
    read_failure: RwLock<Option<ProviderError>>,
}

impl Default for MemoryProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self::with_state(ActualState::default())
    }

    /// Start from a pre-populated device.
    pub fn with_state(state: ActualState) -> Self {
        Self {
            state: RwLock::new(state),
            interfaces: RwLock::new(default_interfaces()),
            apply_calls: DashMap::new(),
            scripts: DashMap::new(),
            read_failure: RwLock::new(None),
        }
    }

    /// Current device configuration.
    pub fn snapshot(&self) -> ActualState {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Change the device behind the agent's back (local drift).
    pub fn edit(&self, change: impl FnOnce(&mut ActualState)) {
        change(&mut self.state.write().unwrap_or_else(PoisonError::into_inner));
    }

    pub fn set_interfaces(&self, interfaces: Vec<Interface>) {
        *self
            .interfaces
            .write()
            .unwrap_or_else(PoisonError::into_inner) = interfaces;
    }

    /// `apply_*` invocations for one domain, failed ones included.
    pub fn apply_calls(&self, domain: Domain) -> u32 {
        self.apply_calls.get(&domain).map_or(0, |calls| *calls)
    }

    pub fn total_apply_calls(&self) -> u32 {
        self.apply_calls.iter().map(|entry| *entry.value()).sum()
    }

    /// Fail the next `apply_*` call of `domain` once with `error`.
    pub fn fail_next(&self, domain: Domain, error: ProviderError) {
        self.scripts
            .entry(domain)
            .or_default()
            .queued
            .push_back(error);
    }

    /// Fail every `apply_*` call of `domain` until cleared.
    pub fn fail_always(&self, domain: Domain, error: ProviderError) {
        self.scripts.entry(domain).or_default().sticky = Some(error);
    }

    pub fn clear_failures(&self, domain: Domain) {
        self.scripts.remove(&domain);
    }

    /// Make `read_config` fail (or succeed again with `None`).
    pub fn fail_reads(&self, error: Option<ProviderError>) {
        *self
            .read_failure
            .write()
            .unwrap_or_else(PoisonError::into_inner) = error;
    }

    fn scripted_failure(&self, domain: Domain) -> Option<ProviderError> {
        let mut script = self.scripts.get_mut(&domain)?;
        script
            .queued
            .pop_front()
            .or_else(|| script.sticky.clone())
    }

    fn store<R: Resource>(
        &self,
        set: &[R],
        slot: impl FnOnce(&mut ActualState) -> &mut Vec<R>,
    ) -> Result<(), ProviderError> {
        *self.apply_calls.entry(R::DOMAIN).or_insert(0) += 1;
        if let Some(error) = self.scripted_failure(R::DOMAIN) {
            return Err(error);
        }

        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        *slot(&mut state) = set.to_vec();
        tracing::trace!(domain = %R::DOMAIN, entries = set.len(), "memory provider applied set");
        Ok(())
    }
}

fn default_interfaces() -> Vec<Interface> {
    vec![
        Interface {
            name: "lo".into(),
            up: true,
            mac: None,
            mtu: Some(65536),
            addresses: vec!["127.0.0.1/8".into()],
            stats: InterfaceStats::default(),
        },
        Interface {
            name: "eth0".into(),
            up: true,
            mac: Some("02:00:00:00:00:01".into()),
            mtu: Some(1500),
            addresses: vec!["192.0.2.10/24".into()],
            stats: InterfaceStats::default(),
        },
    ]
}

#[async_trait]
impl Provider for MemoryProvider {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn read_config(&self) -> Result<ActualState, ProviderError> {
        if let Some(error) = self
            .read_failure
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
        {
            return Err(error);
        }
        Ok(self.snapshot())
    }

    async fn apply_firewall(&self, rules: &[FirewallRule]) -> Result<(), ProviderError> {
        self.store(rules, |state| &mut state.firewall)
    }

    async fn apply_nat(&self, rules: &[NatRule]) -> Result<(), ProviderError> {
        self.store(rules, |state| &mut state.nat)
    }

    async fn apply_routing(&self, routes: &[Route]) -> Result<(), ProviderError> {
        self.store(routes, |state| &mut state.routes)
    }

    async fn apply_vpn(&self, profiles: &[VpnProfile]) -> Result<(), ProviderError> {
        self.store(profiles, |state| &mut state.vpn)
    }

    async fn apply_ddns(&self, bindings: &[DdnsBinding]) -> Result<(), ProviderError> {
        self.store(bindings, |state| &mut state.ddns)
    }

    async fn get_metrics(&self) -> Result<Metrics, ProviderError> {
        let mut metrics = Metrics::default();
        metrics
            .counters
            .insert("apply_calls_total".into(), u64::from(self.total_apply_calls()));
        for domain in Domain::ORDER {
            metrics.counters.insert(
                format!("apply_calls.{domain}"),
                u64::from(self.apply_calls(domain)),
            );
        }
        Ok(metrics)
    }

    async fn get_interfaces(&self) -> Result<Vec<Interface>, ProviderError> {
        Ok(self
            .interfaces
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }
}
