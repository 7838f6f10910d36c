// Typed views of the inventory objects each sensor caches.
use crate::helper::Matcher;
use crate::vsphere::{EntityKind, EntityRef};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// An entity kind with a dedicated inventory sensor.
pub trait InventoryObject: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    const KIND: EntityKind;
    /// Properties requested from the remote API.
    const PROPERTIES: &'static [&'static str];
    /// Keywords selecting the sensor for manual refresh and dumps. The first
    /// one is the sensor name.
    const MATCHER: Matcher;

    fn self_ref(&self) -> &EntityRef;

    fn name(&self) -> &str;

    fn parent(&self) -> Option<&EntityRef>;

    /// Next step up the ownership chain.
    fn owner(&self) -> Option<&EntityRef> {
        self.parent()
    }
}

macro_rules! inventory_object {
    ($ty:ty, $kind:expr, [$($prop:literal),* $(,)?], [$($keyword:literal),* $(,)?]) => {
        impl InventoryObject for $ty {
            const KIND: EntityKind = $kind;
            const PROPERTIES: &'static [&'static str] = &[$($prop),*];
            const MATCHER: Matcher = Matcher::new(&[$($keyword),*]);

            fn self_ref(&self) -> &EntityRef {
                &self.self_ref
            }

            fn name(&self) -> &str {
                &self.name
            }

            fn parent(&self) -> Option<&EntityRef> {
                self.parent.as_ref()
            }
        }
    };
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    #[serde(rename = "self")]
    pub self_ref: EntityRef,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub parent: Option<EntityRef>,
    #[serde(default)]
    pub summary: Option<Value>,
}

inventory_object!(
    Cluster,
    EntityKind::Cluster,
    ["parent", "name", "summary"],
    ["cluster"]
);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComputeResource {
    #[serde(rename = "self")]
    pub self_ref: EntityRef,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub parent: Option<EntityRef>,
    #[serde(default)]
    pub summary: Option<Value>,
}

inventory_object!(
    ComputeResource,
    EntityKind::ComputeResource,
    ["parent", "name", "summary"],
    ["compute_resource", "computeresource", "compresource"]
);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Datacenter {
    #[serde(rename = "self")]
    pub self_ref: EntityRef,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub parent: Option<EntityRef>,
}

inventory_object!(
    Datacenter,
    EntityKind::Datacenter,
    ["parent", "name"],
    ["datacenter", "dc"]
);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Datastore {
    #[serde(rename = "self")]
    pub self_ref: EntityRef,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub parent: Option<EntityRef>,
    #[serde(default)]
    pub summary: Option<Value>,
    #[serde(default)]
    pub info: Option<Value>,
}

inventory_object!(
    Datastore,
    EntityKind::Datastore,
    ["name", "parent", "summary", "info"],
    ["datastore", "ds"]
);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Folder {
    #[serde(rename = "self")]
    pub self_ref: EntityRef,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub parent: Option<EntityRef>,
}

inventory_object!(Folder, EntityKind::Folder, ["parent", "name"], ["folder"]);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Host {
    #[serde(rename = "self")]
    pub self_ref: EntityRef,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub parent: Option<EntityRef>,
    #[serde(default)]
    pub summary: Option<Value>,
    #[serde(default)]
    pub runtime: Option<Value>,
    #[serde(default)]
    pub config: Option<Value>,
    #[serde(default)]
    pub hardware: Option<Value>,
    #[serde(default)]
    pub vm: Vec<EntityRef>,
}

inventory_object!(
    Host,
    EntityKind::Host,
    [
        "name",
        "parent",
        "summary",
        "runtime",
        "config.storageDevice",
        "config.fileSystemVolume",
        "hardware",
        "vm",
    ],
    ["host", "esx"]
);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourcePool {
    #[serde(rename = "self")]
    pub self_ref: EntityRef,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub parent: Option<EntityRef>,
    #[serde(default)]
    pub summary: Option<Value>,
}

inventory_object!(
    ResourcePool,
    EntityKind::ResourcePool,
    ["parent", "name", "summary"],
    ["resource_pool", "resourcepool", "rpool", "respool"]
);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoragePod {
    #[serde(rename = "self")]
    pub self_ref: EntityRef,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub parent: Option<EntityRef>,
    #[serde(default)]
    pub summary: Option<Value>,
}

inventory_object!(
    StoragePod,
    EntityKind::StoragePod,
    ["parent", "name", "summary"],
    ["storage_pod", "storagepod", "datastore_cluster", "datastorecluster"]
);

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VmConfig {
    #[serde(default)]
    pub change_version: Option<String>,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachine {
    #[serde(rename = "self")]
    pub self_ref: EntityRef,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub parent: Option<EntityRef>,
    #[serde(default)]
    pub resource_pool: Option<EntityRef>,
    #[serde(default)]
    pub config: Option<VmConfig>,
    #[serde(default)]
    pub guest: Option<Value>,
    #[serde(default)]
    pub runtime: Option<Value>,
    #[serde(default)]
    pub summary: Option<Value>,
}

impl VirtualMachine {
    /// Logical clock of the last configuration change. `None` when it is
    /// missing or not an RFC 3339 timestamp.
    pub fn change_version(&self) -> Option<DateTime<Utc>> {
        self.config
            .as_ref()
            .and_then(|c| c.change_version.as_deref())
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|d| d.with_timezone(&Utc))
    }
}

impl InventoryObject for VirtualMachine {
    const KIND: EntityKind = EntityKind::VirtualMachine;
    const PROPERTIES: &'static [&'static str] = &[
        "name",
        "config",
        "guest",
        "parent",
        "resourcePool",
        "runtime",
        "summary",
    ];
    const MATCHER: Matcher = Matcher::new(&["vm", "virtualmachine", "virtual_machine"]);

    fn self_ref(&self) -> &EntityRef {
        &self.self_ref
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn parent(&self) -> Option<&EntityRef> {
        self.parent.as_ref()
    }

    // Compute placement goes through the resource pool, not the VM folder.
    fn owner(&self) -> Option<&EntityRef> {
        self.resource_pool.as_ref().or(self.parent.as_ref())
    }
}

/// Deserialize raw objects, skipping (and logging) the ones that don't fit.
pub fn parse_objects<T: DeserializeOwned>(sensor: &str, values: Vec<Value>) -> Vec<T> {
    values
        .into_iter()
        .filter_map(|v| {
            let id = v.get("self").cloned();
            match serde_json::from_value::<T>(v) {
                Ok(o) => Some(o),
                Err(e) => {
                    log::warn!("[{}] skipping malformed object {:?}: {}", sensor, id, e);
                    None
                }
            }
        })
        .collect()
}
