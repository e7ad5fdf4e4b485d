use std::collections::BTreeMap;
use std::fmt;

use futures::future::join_all;
use tracing::{debug, info, warn};

use super::{MigrationContext, distinct};
use crate::db::{DatabaseError, IdMapping, MappingType};
use crate::matrix::DirectRooms;

/// Per-user `m.direct` content: Matrix user ID to peer to DM rooms.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectDirectory(BTreeMap<String, DirectRooms>);

impl DirectDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Points `peer` in `user_id`'s directory at `room_id`, replacing any
    /// room recorded for that peer before.
    pub fn record(&mut self, user_id: &str, peer_id: &str, room_id: &str) {
        self.0
            .entry(user_id.to_string())
            .or_default()
            .insert(peer_id.to_string(), vec![room_id.to_string()]);
    }

    pub fn merge(&mut self, other: DirectDirectory) {
        for (user_id, peers) in other.0 {
            for (peer_id, rooms) in peers {
                for room_id in rooms {
                    self.record(&user_id, &peer_id, &room_id);
                }
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &DirectRooms)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub rooms_processed: usize,
    pub rooms_skipped: usize,
    pub users_updated: usize,
    pub users_skipped: usize,
    pub users_failed: usize,
}

impl fmt::Display for ReconcileReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} rooms processed, {} rooms skipped, {} users updated, {} users skipped, {} users failed",
            self.rooms_processed,
            self.rooms_skipped,
            self.users_updated,
            self.users_skipped,
            self.users_failed
        )
    }
}

enum Delivery {
    Updated,
    Skipped,
    Failed,
}

/// Rebuilds every migrated user's `m.direct` account data from the direct
/// room mappings and the membership index.
pub struct DirectMessageReconciler {
    context: MigrationContext,
}

impl DirectMessageReconciler {
    pub fn new(context: MigrationContext) -> Self {
        Self { context }
    }

    pub async fn reconcile(&self) -> Result<ReconcileReport, DatabaseError> {
        let mut report = ReconcileReport::default();
        let directory = self.build_directory(&mut report).await?;
        if directory.is_empty() {
            info!("no direct rooms to reconcile");
            return Ok(report);
        }
        info!("direct message directory covers {} users", directory.len());

        let deliveries = join_all(
            directory
                .iter()
                .map(|(user_id, rooms)| self.deliver(user_id, rooms)),
        )
        .await;

        for delivery in deliveries {
            match delivery? {
                Delivery::Updated => report.users_updated += 1,
                Delivery::Skipped => report.users_skipped += 1,
                Delivery::Failed => report.users_failed += 1,
            }
        }

        info!("direct messages: {}", report);
        Ok(report)
    }

    /// Resolves every direct room concurrently and merges the fragments.
    pub async fn build_directory(
        &self,
        report: &mut ReconcileReport,
    ) -> Result<DirectDirectory, DatabaseError> {
        let rooms = self
            .context
            .mappings
            .get_all_mappings_by_type(MappingType::DirectMessage)
            .await?;
        debug!("reconciling {} direct rooms", rooms.len());

        let fragments = join_all(rooms.iter().map(|room| self.room_fragment(room))).await;

        let mut directory = DirectDirectory::new();
        for fragment in fragments {
            match fragment? {
                Some(fragment) => {
                    report.rooms_processed += 1;
                    directory.merge(fragment);
                }
                None => report.rooms_skipped += 1,
            }
        }
        Ok(directory)
    }

    async fn room_fragment(
        &self,
        room: &IdMapping,
    ) -> Result<Option<DirectDirectory>, DatabaseError> {
        let mappings = &self.context.mappings;
        let members = distinct(self.context.memberships.get_memberships(&room.rc_id).await?);

        let room_id = if room.has_matrix_id() {
            room.matrix_id.clone()
        } else {
            match mappings.get_room_id(&room.rc_id).await? {
                Some(room_id) => room_id,
                None => {
                    warn!("direct room {} has no matrix room, skipping", room.rc_id);
                    return Ok(None);
                }
            }
        };

        let mut fragment = DirectDirectory::new();
        match members.as_slice() {
            [] => {
                warn!("direct room {} has no members, skipping", room.rc_id);
                return Ok(None);
            }
            [first, second] => {
                let (Some(a), Some(b)) = (
                    mappings.get_user_id(first).await?,
                    mappings.get_user_id(second).await?,
                ) else {
                    warn!(
                        "direct room {} has an unmapped member ({}, {}), skipping",
                        room.rc_id, first, second
                    );
                    return Ok(None);
                };
                fragment.record(&a, &b, &room_id);
                fragment.record(&b, &a, &room_id);
            }
            // Single-member rooms and group DMs both become a self entry; group
            // DMs lose their peers here.
            [first, rest @ ..] => {
                if !rest.is_empty() {
                    debug!(
                        "direct room {} has {} members, recording for {} only",
                        room.rc_id,
                        members.len(),
                        first
                    );
                }
                let Some(user_id) = mappings.get_user_id(first).await? else {
                    warn!("direct room {} member {} is unmapped, skipping", room.rc_id, first);
                    return Ok(None);
                };
                fragment.record(&user_id, &user_id, &room_id);
            }
        }
        Ok(Some(fragment))
    }

    async fn deliver(&self, user_id: &str, rooms: &DirectRooms) -> Result<Delivery, DatabaseError> {
        let user = self
            .context
            .mappings
            .get_mapping_by_matrix_id_and_type(user_id, MappingType::User)
            .await?;

        let Some(token) = user
            .and_then(|u| u.access_token)
            .filter(|token| !token.is_empty())
        else {
            warn!("no access token for {}, not updating m.direct", user_id);
            return Ok(Delivery::Skipped);
        };

        match self
            .context
            .homeserver
            .set_direct_rooms(&token, user_id, rooms)
            .await
        {
            Ok(()) => {
                debug!("m.direct updated for {} ({} peers)", user_id, rooms.len());
                Ok(Delivery::Updated)
            }
            Err(err) => {
                warn!("failed to update m.direct for {}: {}", user_id, err);
                Ok(Delivery::Failed)
            }
        }
    }
}
