//! Accessor for this process's own state.

use std::sync::Arc;

use tether_types::{ConfiguredRole, DynamicRole, NodeRecord};
use tracing::{debug, info};

use crate::NodeState;
use crate::error::StateResult;
use crate::store::RecordStore;

/// Collection holding node records.
const NODES: &str = "nodes";

/// This node's own state, read through the durable record store.
///
/// Cloning is cheap; clones share the same store. The database controller
/// holds a clone and is the only caller of the `record_*` methods.
#[derive(Debug, Clone)]
pub struct LocalState {
    configured: ConfiguredRole,
    location: String,
    store: Arc<RecordStore>,
}

impl LocalState {
    /// Opens the local state for the node advertised at `location`.
    ///
    /// A node with no record yet starts out [`DynamicRole::Initialized`].
    /// An existing record is left untouched, so a restart remembers whether
    /// the node was mid-sync.
    pub fn open(
        configured: ConfiguredRole,
        location: impl Into<String>,
        store: Arc<RecordStore>,
    ) -> StateResult<Self> {
        let state = Self {
            configured,
            location: location.into(),
            store,
        };

        match state.store.read::<NodeRecord>(NODES, &state.location)? {
            Some(record) => {
                info!(
                    location = %state.location,
                    role = %record.role,
                    synced = record.synced,
                    "restored node record"
                );
            }
            None => {
                state.write(NodeRecord::initial())?;
                info!(location = %state.location, "created initial node record");
            }
        }

        Ok(state)
    }

    /// Returns the full record.
    pub fn record(&self) -> StateResult<NodeRecord> {
        Ok(self
            .store
            .read::<NodeRecord>(NODES, &self.location)?
            .unwrap_or_else(NodeRecord::initial))
    }

    /// Records a new dynamic role, keeping the sync flag.
    pub fn record_role(&self, role: DynamicRole) -> StateResult<()> {
        let mut record = self.record()?;
        record.role = role;
        self.write(record)
    }

    /// Records whether the replica is caught up.
    pub fn record_synced(&self, synced: bool) -> StateResult<()> {
        let mut record = self.record()?;
        record.synced = synced;
        self.write(record)
    }

    /// Returns the static configured role.
    pub fn configured(&self) -> ConfiguredRole {
        self.configured
    }

    fn write(&self, record: NodeRecord) -> StateResult<()> {
        debug!(
            location = %self.location,
            role = %record.role,
            synced = record.synced,
            "writing node record"
        );
        self.store.write(NODES, &self.location, &record)?;
        Ok(())
    }
}

impl NodeState for LocalState {
    async fn dynamic_role(&self) -> StateResult<DynamicRole> {
        Ok(self.record()?.role)
    }

    async fn configured_role(&self) -> StateResult<ConfiguredRole> {
        Ok(self.configured)
    }

    async fn has_synced(&self) -> StateResult<bool> {
        Ok(self.record()?.synced)
    }

    fn location(&self) -> &str {
        &self.location
    }

    async fn ready(&self) {}
}
