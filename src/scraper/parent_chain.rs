use super::objects::InventoryObject;
use crate::vsphere::{EntityKind, EntityRef, ManagedEntity};
use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashSet;

/// Walks longer than this are treated as malformed hierarchy data.
pub const MAX_CHAIN_DEPTH: usize = 64;

/// Resolved ownership path of an entity. Named fields hold the nearest
/// ancestor of that kind.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ParentChain {
    pub datacenter: Option<String>,
    pub cluster: Option<String>,
    pub resource_pool: Option<String>,
    pub storage_pod: Option<String>,
    /// Every resolved reference, starting entity first.
    pub chain: Vec<EntityRef>,
}

/// What the walker needs to know about one entity.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityNode {
    pub name: String,
    pub owner: Option<EntityRef>,
}

impl EntityNode {
    pub fn of<T: InventoryObject>(object: &T) -> Self {
        Self {
            name: object.name().to_string(),
            owner: object.owner().cloned(),
        }
    }
}

impl From<ManagedEntity> for EntityNode {
    fn from(e: ManagedEntity) -> Self {
        Self {
            name: e.name,
            owner: e.parent,
        }
    }
}

#[async_trait]
pub trait EntityLookup: Send + Sync {
    /// Resolve `r` through whichever cache owns its kind.
    async fn lookup(&self, r: &EntityRef) -> Option<EntityNode>;
}

/// Follow owners from `start` up to the root. Stops at an entity without
/// owner, an unresolvable reference, a revisited reference, or after
/// `MAX_CHAIN_DEPTH` steps.
pub async fn walk_parent_chain(lookup: &dyn EntityLookup, start: &EntityRef) -> ParentChain {
    let mut result = ParentChain::default();
    let mut visited: HashSet<EntityRef> = HashSet::new();
    let mut next = Some(start.clone());

    while let Some(r) = next.take() {
        if result.chain.len() >= MAX_CHAIN_DEPTH {
            log::warn!("parent chain of {} exceeds {} levels", start, MAX_CHAIN_DEPTH);
            break;
        }
        if !visited.insert(r.clone()) {
            log::warn!("cycle in parent chain of {} at {}", start, r);
            break;
        }
        let Some(node) = lookup.lookup(&r).await else {
            break;
        };

        let slot = match r.kind {
            EntityKind::Datacenter => Some(&mut result.datacenter),
            EntityKind::Cluster => Some(&mut result.cluster),
            EntityKind::ResourcePool => Some(&mut result.resource_pool),
            EntityKind::StoragePod => Some(&mut result.storage_pod),
            _ => None,
        };
        if let Some(slot) = slot {
            if slot.is_none() {
                *slot = Some(node.name);
            }
        }
        result.chain.push(r);
        next = node.owner;
    }
    result
}
