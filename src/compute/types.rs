//! Compute Engine v1 REST resources, reduced to the fields the agent reads
//! or writes.  Absent fields deserialize to `None` or an empty `Vec`.

use std::fmt;
use std::marker::PhantomData;

use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};

use crate::metadata::last_segment;

/// A fully located instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InstanceRef {
    pub project: String,
    pub zone: String,
    pub name: String,
}

impl InstanceRef {
    pub fn new(
        project: impl Into<String>,
        zone: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            project: project.into(),
            zone: zone.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for InstanceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.project, self.zone, self.name)
    }
}

/// `instances.get` response.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instance {
    #[serde(default)]
    pub name: String,
    /// Zone URL, e.g. `.../projects/p/zones/us-central1-a`.
    #[serde(default)]
    pub zone: String,
    #[serde(default)]
    pub network_interfaces: Vec<NetworkInterface>,
}

impl Instance {
    /// Zone name without the URL prefix.
    pub fn zone_name(&self) -> &str {
        last_segment(&self.zone)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkInterface {
    pub fingerprint: Option<String>,
    #[serde(default)]
    pub alias_ip_ranges: Vec<AliasIpRange>,
}

/// One alias range on an interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AliasIpRange {
    pub ip_cidr_range: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subnetwork_range_name: Option<String>,
}

/// Desired alias state of an interface. `cidr: None` means no alias.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AliasAssignment {
    pub cidr: Option<String>,
    pub range_name: Option<String>,
}

impl AliasAssignment {
    /// The full replacement alias list for this assignment.
    pub fn to_ranges(&self) -> Vec<AliasIpRange> {
        match &self.cidr {
            Some(cidr) => vec![AliasIpRange {
                ip_cidr_range: cidr.clone(),
                subnetwork_range_name: self.range_name.clone(),
            }],
            None => Vec::new(),
        }
    }
}

/// `instances.updateNetworkInterface` request body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkInterfacePatch {
    pub alias_ip_ranges: Vec<AliasIpRange>,
    pub fingerprint: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationStatus {
    #[default]
    Pending,
    Running,
    Done,
}

/// A zonal operation handle.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    pub name: String,
    #[serde(default)]
    pub status: OperationStatus,
    pub error: Option<OperationError>,
}

impl Operation {
    pub fn is_done(&self) -> bool {
        self.status == OperationStatus::Done
    }

    /// Error text of a failed operation, `None` if it carries no errors.
    pub fn error_message(&self) -> Option<String> {
        let error = self.error.as_ref()?;
        if error.errors.is_empty() {
            return Some("operation reported an unspecified error".to_string());
        }
        Some(
            error
                .errors
                .iter()
                .map(|e| match (&e.code, &e.message) {
                    (Some(code), Some(msg)) => format!("{code}: {msg}"),
                    (Some(code), None) => code.clone(),
                    (None, Some(msg)) => msg.clone(),
                    (None, None) => "unknown error".to_string(),
                })
                .collect::<Vec<_>>()
                .join("; "),
        )
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OperationError {
    #[serde(default)]
    pub errors: Vec<OperationErrorItem>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OperationErrorItem {
    pub code: Option<String>,
    pub message: Option<String>,
}

/// One page of `instances.aggregatedList`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedInstanceList {
    /// `(scope, instances)` in the order the provider sent them.
    #[serde(default, deserialize_with = "ordered_entries")]
    pub items: Vec<(String, InstancesScopedList)>,
    pub next_page_token: Option<String>,
}

impl AggregatedInstanceList {
    /// Every instance on the page, scope by scope.
    pub fn instances(&self) -> impl Iterator<Item = &Instance> {
        self.items.iter().flat_map(|(_, scoped)| scoped.instances.iter())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct InstancesScopedList {
    #[serde(default)]
    pub instances: Vec<Instance>,
}

/// Deserialize a JSON object into a `Vec` of entries, keeping key order.
fn ordered_entries<'de, D, V>(deserializer: D) -> Result<Vec<(String, V)>, D::Error>
where
    D: Deserializer<'de>,
    V: Deserialize<'de>,
{
    struct EntriesVisitor<V>(PhantomData<V>);

    impl<'de, V: Deserialize<'de>> Visitor<'de> for EntriesVisitor<V> {
        type Value = Vec<(String, V)>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a map of scoped lists")
        }

        fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
            let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(0));
            while let Some(entry) = map.next_entry()? {
                entries.push(entry);
            }
            Ok(entries)
        }
    }

    deserializer.deserialize_map(EntriesVisitor(PhantomData))
}
