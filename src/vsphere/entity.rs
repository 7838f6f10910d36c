use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of a remote managed object, named the way the remote API names it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EntityKind {
    Cluster,
    ComputeResource,
    Datacenter,
    Datastore,
    Folder,
    Host,
    ResourcePool,
    StoragePod,
    VirtualMachine,
    Other(String),
}

impl EntityKind {
    pub fn as_str(&self) -> &str {
        match self {
            EntityKind::Cluster => "ClusterComputeResource",
            EntityKind::ComputeResource => "ComputeResource",
            EntityKind::Datacenter => "Datacenter",
            EntityKind::Datastore => "Datastore",
            EntityKind::Folder => "Folder",
            EntityKind::Host => "HostSystem",
            EntityKind::ResourcePool => "ResourcePool",
            EntityKind::StoragePod => "StoragePod",
            EntityKind::VirtualMachine => "VirtualMachine",
            EntityKind::Other(kind) => kind,
        }
    }
}

impl From<&str> for EntityKind {
    fn from(s: &str) -> Self {
        match s {
            "ClusterComputeResource" => EntityKind::Cluster,
            "ComputeResource" => EntityKind::ComputeResource,
            "Datacenter" => EntityKind::Datacenter,
            "Datastore" => EntityKind::Datastore,
            "Folder" => EntityKind::Folder,
            "HostSystem" => EntityKind::Host,
            "ResourcePool" => EntityKind::ResourcePool,
            "StoragePod" => EntityKind::StoragePod,
            "VirtualMachine" => EntityKind::VirtualMachine,
            other => EntityKind::Other(other.to_string()),
        }
    }
}

impl From<String> for EntityKind {
    fn from(s: String) -> Self {
        EntityKind::from(s.as_str())
    }
}

impl From<EntityKind> for String {
    fn from(kind: EntityKind) -> Self {
        kind.as_str().to_string()
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Globally unique reference to a remote object. Used as cache key everywhere.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityRef {
    #[serde(rename = "type")]
    pub kind: EntityKind,
    #[serde(rename = "value")]
    pub id: String,
}

impl EntityRef {
    pub fn new(kind: EntityKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

/// Minimal view of any remote entity: enough to walk the ownership hierarchy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagedEntity {
    #[serde(rename = "self")]
    pub self_ref: EntityRef,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub parent: Option<EntityRef>,
}
