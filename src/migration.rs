use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use crate::db::{DatabaseManager, MappingStore, MembershipStore};
use crate::matrix::Homeserver;

pub mod direct_messages;
pub mod messages;
pub mod notifications;
pub mod read_state;
pub mod rooms;
pub mod users;

#[cfg(test)]
pub(crate) mod testing;

pub use self::direct_messages::DirectMessageReconciler;
pub use self::messages::MessageImporter;
pub use self::notifications::NotificationImporter;
pub use self::read_state::{LastRoomMessages, ReadStatePropagator};
pub use self::rooms::RoomImporter;
pub use self::users::UserImporter;

/// Stores and homeserver shared by every migration phase.
#[derive(Clone)]
pub struct MigrationContext {
    pub mappings: Arc<dyn MappingStore>,
    pub memberships: Arc<dyn MembershipStore>,
    pub homeserver: Arc<dyn Homeserver>,
}

impl MigrationContext {
    pub fn new(db: &DatabaseManager, homeserver: Arc<dyn Homeserver>) -> Self {
        Self {
            mappings: db.mapping_store(),
            memberships: db.membership_store(),
            homeserver,
        }
    }
}

/// Outcome of one import phase over an export file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportReport {
    pub imported: usize,
    /// Already migrated, excluded, or missing a prerequisite mapping.
    pub skipped: usize,
    pub failed: usize,
}

impl fmt::Display for ImportReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} imported, {} skipped, {} failed",
            self.imported, self.skipped, self.failed
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Imported,
    Skipped,
    Failed,
}

impl ImportReport {
    pub fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Imported => self.imported += 1,
            Outcome::Skipped => self.skipped += 1,
            Outcome::Failed => self.failed += 1,
        }
    }
}

/// Drops repeated IDs, keeping first occurrences in order.
pub(crate) fn distinct(ids: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::with_capacity(ids.len());
    ids.into_iter().filter(|id| seen.insert(id.clone())).collect()
}
