//! In-process model of a project's instances and the metadata server.
//!
//! Implements [`ComputeApi`] and [`MetadataSource`] with the provider
//! semantics the agent relies on: fingerprints that change on every write
//! and reject stale updates, operations that take several polls to finish,
//! and paged aggregated listings.  Every control-plane call is recorded so
//! tests can assert on exactly what the agent did.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use bytes::Bytes;
use reqwest::StatusCode;

use super::types::{
    AggregatedInstanceList, AliasIpRange, Instance, InstanceRef, InstancesScopedList,
    NetworkInterface, NetworkInterfacePatch, Operation, OperationError, OperationErrorItem,
    OperationStatus,
};
use super::{ComputeApi, PRIMARY_INTERFACE};
use crate::errors::AgentError;
use crate::metadata::MetadataSource;

/// A recorded control-plane call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComputeCall {
    GetInstance(String),
    UpdateNetworkInterface {
        instance: String,
        aliases: Vec<String>,
    },
    GetOperation(String),
    ListInstances {
        filter: Option<String>,
        page_token: Option<String>,
    },
}

struct StoredInstance {
    zone: String,
    name: String,
    ranges: Vec<AliasIpRange>,
    fingerprint: String,
}

struct StoredOperation {
    name: String,
    polls_left: u32,
    error: Option<String>,
}

#[derive(Default)]
struct State {
    instances: Vec<StoredInstance>,
    operations: Vec<StoredOperation>,
    calls: Vec<ComputeCall>,
    next_id: u64,
    page_size: Option<usize>,
    polls_before_done: u32,
    fail_next_operation: Option<String>,
    race_after_read: Option<String>,
    tamper_after_write: Option<(String, Option<String>)>,
}

impl State {
    fn next_fingerprint(&mut self) -> String {
        self.next_id += 1;
        format!("fp-{}", self.next_id)
    }

    fn find(&mut self, name: &str) -> Option<&mut StoredInstance> {
        self.instances.iter_mut().find(|i| i.name == name)
    }

    fn replace_ranges(&mut self, name: &str, ranges: Vec<AliasIpRange>) {
        let fingerprint = self.next_fingerprint();
        if let Some(stored) = self.find(name) {
            stored.ranges = ranges;
            stored.fingerprint = fingerprint;
        }
    }
}

fn not_found(context: String) -> AgentError {
    AgentError::from_response(
        &context,
        StatusCode::NOT_FOUND,
        r#"{"error":{"code":404,"message":"The resource was not found"}}"#,
    )
}

fn zone_url(zone: &str) -> String {
    format!("https://www.googleapis.com/compute/v1/projects/proj/zones/{zone}")
}

/// In-memory compute control plane.
#[derive(Default)]
pub struct MemoryCompute {
    state: Mutex<State>,
}

impl MemoryCompute {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().expect("memory compute mutex poisoned")
    }

    /// Register an instance, optionally already holding `alias`.
    pub fn add_instance(&self, zone: &str, name: &str, alias: Option<&str>) {
        let mut state = self.state();
        let fingerprint = state.next_fingerprint();
        state.instances.push(StoredInstance {
            zone: zone.to_string(),
            name: name.to_string(),
            ranges: alias
                .map(|cidr| {
                    vec![AliasIpRange {
                        ip_cidr_range: cidr.to_string(),
                        subnetwork_range_name: None,
                    }]
                })
                .unwrap_or_default(),
            fingerprint,
        });
    }

    /// Change an instance's alias behind the agent's back.
    pub fn force_alias(&self, name: &str, alias: Option<&str>) {
        let ranges = alias
            .map(|cidr| {
                vec![AliasIpRange {
                    ip_cidr_range: cidr.to_string(),
                    subnetwork_range_name: None,
                }]
            })
            .unwrap_or_default();
        self.state().replace_ranges(name, ranges);
    }

    pub fn alias_of(&self, name: &str) -> Option<String> {
        self.ranges_of(name)
            .into_iter()
            .next()
            .map(|r| r.ip_cidr_range)
    }

    pub fn ranges_of(&self, name: &str) -> Vec<AliasIpRange> {
        self.state()
            .find(name)
            .map(|i| i.ranges.clone())
            .unwrap_or_default()
    }

    pub fn fingerprint_of(&self, name: &str) -> Option<String> {
        self.state().find(name).map(|i| i.fingerprint.clone())
    }

    /// Names of every instance currently holding `alias`.
    pub fn holders_of(&self, alias: &str) -> Vec<String> {
        self.state()
            .instances
            .iter()
            .filter(|i| i.ranges.iter().any(|r| r.ip_cidr_range == alias))
            .map(|i| i.name.clone())
            .collect()
    }

    pub fn set_page_size(&self, size: usize) {
        self.state().page_size = Some(size);
    }

    /// Operations report RUNNING for `polls` reads before reaching DONE.
    pub fn set_polls_before_done(&self, polls: u32) {
        self.state().polls_before_done = polls;
    }

    /// The next write's operation finishes DONE with `message` and changes nothing.
    pub fn fail_next_operation(&self, message: &str) {
        self.state().fail_next_operation = Some(message.to_string());
    }

    /// Simulate a concurrent writer: right after the next read of `name`,
    /// its interface changes and the fingerprint just handed out goes stale.
    pub fn race_after_next_read(&self, name: &str) {
        self.state().race_after_read = Some(name.to_string());
    }

    /// Right after the next successful write to `name`, overwrite its alias.
    pub fn tamper_after_next_write(&self, name: &str, alias: Option<&str>) {
        self.state().tamper_after_write = Some((name.to_string(), alias.map(str::to_string)));
    }

    pub fn calls(&self) -> Vec<ComputeCall> {
        self.state().calls.clone()
    }

    /// Recorded writes as `(instance, aliases)` pairs.
    pub fn updates(&self) -> Vec<(String, Vec<String>)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                ComputeCall::UpdateNetworkInterface { instance, aliases } => {
                    Some((instance, aliases))
                }
                _ => None,
            })
            .collect()
    }

    /// Instance names read with `instances.get`, in order.
    pub fn reads(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                ComputeCall::GetInstance(name) => Some(name),
                _ => None,
            })
            .collect()
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    fn do_get_instance(&self, instance: &InstanceRef) -> Result<Instance, AgentError> {
        let mut state = self.state();
        state.calls.push(ComputeCall::GetInstance(instance.name.clone()));
        let stored = state
            .instances
            .iter()
            .find(|i| i.name == instance.name && i.zone == instance.zone)
            .ok_or_else(|| not_found(format!("get instance {}", instance.name)))?;
        let result = Instance {
            name: stored.name.clone(),
            zone: zone_url(&stored.zone),
            network_interfaces: vec![NetworkInterface {
                fingerprint: Some(stored.fingerprint.clone()),
                alias_ip_ranges: stored.ranges.clone(),
            }],
        };
        if state.race_after_read.as_deref() == Some(instance.name.as_str()) {
            state.race_after_read = None;
            let fingerprint = state.next_fingerprint();
            if let Some(stored) = state.find(&instance.name) {
                stored.fingerprint = fingerprint;
            }
        }
        Ok(result)
    }

    fn do_update(
        &self,
        instance: &InstanceRef,
        interface: &str,
        patch: NetworkInterfacePatch,
    ) -> Result<Operation, AgentError> {
        let mut state = self.state();
        state.calls.push(ComputeCall::UpdateNetworkInterface {
            instance: instance.name.clone(),
            aliases: patch
                .alias_ip_ranges
                .iter()
                .map(|r| r.ip_cidr_range.clone())
                .collect(),
        });
        let context = format!("update network interface of {}", instance.name);
        if interface != PRIMARY_INTERFACE {
            return Err(not_found(context));
        }
        let current = state
            .instances
            .iter()
            .find(|i| i.name == instance.name && i.zone == instance.zone)
            .map(|i| i.fingerprint.clone())
            .ok_or_else(|| not_found(context.clone()))?;
        if current != patch.fingerprint {
            return Err(AgentError::from_response(
                &context,
                StatusCode::PRECONDITION_FAILED,
                r#"{"error":{"code":412,"message":"Supplied fingerprint does not match current metadata fingerprint."}}"#,
            ));
        }

        state.next_id += 1;
        let name = format!("operation-{}", state.next_id);
        let error = state.fail_next_operation.take();
        if error.is_none() {
            state.replace_ranges(&instance.name, patch.alias_ip_ranges);
            let tamper = state
                .tamper_after_write
                .take_if(|(target, _)| *target == instance.name);
            if let Some((target, alias)) = tamper {
                let ranges = alias
                    .map(|cidr| {
                        vec![AliasIpRange {
                            ip_cidr_range: cidr,
                            subnetwork_range_name: None,
                        }]
                    })
                    .unwrap_or_default();
                state.replace_ranges(&target, ranges);
            }
        }
        let polls_left = state.polls_before_done;
        state.operations.push(StoredOperation {
            name: name.clone(),
            polls_left,
            error,
        });
        Ok(Operation {
            name,
            status: OperationStatus::Pending,
            error: None,
        })
    }

    fn do_get_operation(&self, operation: &str) -> Result<Operation, AgentError> {
        let mut state = self.state();
        state.calls.push(ComputeCall::GetOperation(operation.to_string()));
        let stored = state
            .operations
            .iter_mut()
            .find(|o| o.name == operation)
            .ok_or_else(|| not_found(format!("get operation {operation}")))?;
        if stored.polls_left > 0 {
            stored.polls_left -= 1;
            return Ok(Operation {
                name: stored.name.clone(),
                status: OperationStatus::Running,
                error: None,
            });
        }
        Ok(Operation {
            name: stored.name.clone(),
            status: OperationStatus::Done,
            error: stored.error.as_ref().map(|message| OperationError {
                errors: vec![OperationErrorItem {
                    code: Some("RESOURCE_OPERATION_FAILED".to_string()),
                    message: Some(message.clone()),
                }],
            }),
        })
    }

    fn do_list(
        &self,
        filter: Option<&str>,
        page_token: Option<&str>,
    ) -> Result<AggregatedInstanceList, AgentError> {
        let mut state = self.state();
        state.calls.push(ComputeCall::ListInstances {
            filter: filter.map(str::to_string),
            page_token: page_token.map(str::to_string),
        });
        let wanted = filter.map(|f| {
            f.trim_start_matches("name=")
                .trim_matches('"')
                .to_string()
        });
        let matching: Vec<&StoredInstance> = state
            .instances
            .iter()
            .filter(|i| wanted.as_ref().map_or(true, |w| *w == i.name))
            .collect();

        let offset: usize = page_token.and_then(|t| t.parse().ok()).unwrap_or(0);
        let size = state.page_size.unwrap_or(500);
        let end = (offset + size).min(matching.len());
        let slice = matching.get(offset..end).unwrap_or(&[]);

        let mut items: Vec<(String, InstancesScopedList)> = Vec::new();
        for stored in slice {
            let scope = format!("zones/{}", stored.zone);
            let instance = Instance {
                name: stored.name.clone(),
                zone: zone_url(&stored.zone),
                network_interfaces: Vec::new(),
            };
            match items.iter_mut().find(|(key, _)| *key == scope) {
                Some((_, scoped)) => scoped.instances.push(instance),
                None => items.push((
                    scope,
                    InstancesScopedList {
                        instances: vec![instance],
                    },
                )),
            }
        }

        Ok(AggregatedInstanceList {
            items,
            next_page_token: (end < matching.len()).then(|| end.to_string()),
        })
    }
}

impl ComputeApi for MemoryCompute {
    fn get_instance(
        &self,
        instance: &InstanceRef,
    ) -> Pin<Box<dyn Future<Output = Result<Instance, AgentError>> + Send + '_>> {
        let result = self.do_get_instance(instance);
        Box::pin(async move { result })
    }

    fn update_network_interface(
        &self,
        instance: &InstanceRef,
        interface: &str,
        patch: NetworkInterfacePatch,
    ) -> Pin<Box<dyn Future<Output = Result<Operation, AgentError>> + Send + '_>> {
        let result = self.do_update(instance, interface, patch);
        Box::pin(async move { result })
    }

    fn get_zone_operation(
        &self,
        _project: &str,
        _zone: &str,
        operation: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Operation, AgentError>> + Send + '_>> {
        let result = self.do_get_operation(operation);
        Box::pin(async move { result })
    }

    fn list_instances_page(
        &self,
        _project: &str,
        filter: Option<&str>,
        page_token: Option<&str>,
    ) -> Pin<Box<dyn Future<Output = Result<AggregatedInstanceList, AgentError>> + Send + '_>>
    {
        let result = self.do_list(filter, page_token);
        Box::pin(async move { result })
    }
}

/// Metadata server view of one instance in a [`MemoryCompute`].
pub struct MemoryMetadata {
    compute: Arc<MemoryCompute>,
    project: String,
    name: String,
    unavailable: AtomicBool,
}

impl MemoryMetadata {
    pub fn new(compute: Arc<MemoryCompute>, project: &str, name: &str) -> Self {
        Self {
            compute,
            project: project.to_string(),
            name: name.to_string(),
            unavailable: AtomicBool::new(false),
        }
    }

    /// Make every read fail as if the server were unreachable.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn lookup(&self, key: &str) -> Result<Bytes, AgentError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(AgentError::transport(
                &format!("metadata {key}"),
                "connection refused",
            ));
        }
        let body = match key.trim_end_matches('/') {
            "instance/name" => self.name.clone(),
            "project/project-id" => self.project.clone(),
            "instance/zone" => {
                let zone = self
                    .compute
                    .state()
                    .find(&self.name)
                    .map(|i| i.zone.clone())
                    .ok_or_else(|| not_found(format!("metadata {key}")))?;
                format!("projects/123456789/zones/{zone}")
            }
            "instance/network-interfaces" => {
                let aliases: Vec<String> = self
                    .compute
                    .ranges_of(&self.name)
                    .into_iter()
                    .map(|r| r.ip_cidr_range)
                    .collect();
                serde_json::json!([{ "ip": "10.128.0.2", "ipAliases": aliases }]).to_string()
            }
            _ => return Err(not_found(format!("metadata {key}"))),
        };
        Ok(Bytes::from(body))
    }
}

impl MetadataSource for MemoryMetadata {
    fn read(
        &self,
        key: &str,
        _query: &[(&str, &str)],
        _timeout: Option<Duration>,
    ) -> Pin<Box<dyn Future<Output = Result<Bytes, AgentError>> + Send + '_>> {
        let result = self.lookup(key);
        Box::pin(async move { result })
    }
}
