use std::path::Path;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use super::{ImportReport, MigrationContext, Outcome, distinct};
use crate::db::{DatabaseError, IdMapping, MappingType};
use crate::export::{ExportReader, RcRoom};
use crate::matrix::CreateRoomRequest;

/// A room member who already has a Matrix account.
struct MappedMember {
    rc_id: String,
    matrix_id: String,
    access_token: Option<String>,
}

/// Creates Matrix rooms for exported channels, groups and direct messages.
pub struct RoomImporter {
    context: MigrationContext,
}

impl RoomImporter {
    pub fn new(context: MigrationContext) -> Self {
        Self { context }
    }

    pub async fn import_file(&self, path: &Path) -> Result<ImportReport> {
        let reader = ExportReader::<RcRoom>::open(path)?;
        info!("importing rooms from {}", reader.path().display());

        let mut report = ImportReport::default();
        for record in reader {
            let room = record?;
            let outcome = self
                .import_room(&room)
                .await
                .with_context(|| format!("failed to import room {}", room.id))?;
            report.record(outcome);
        }

        info!("rooms: {}", report);
        Ok(report)
    }

    pub async fn import_room(&self, room: &RcRoom) -> Result<Outcome> {
        let mappings = &self.context.mappings;
        let memberships = &self.context.memberships;

        if let Some(room_id) = mappings.get_room_id(&room.id).await? {
            debug!("mapping exists: {} -> {}", room.id, room_id);
            return Ok(Outcome::Skipped);
        }

        for rc_user_id in &room.uids {
            memberships.create_membership(&room.id, rc_user_id).await?;
        }
        let members = distinct(memberships.get_memberships(&room.id).await?);

        let Some((creator, token)) = self.creator_credentials(room, &members).await? else {
            warn!("room {} has no member with an access token, skipping", room.id);
            return Ok(Outcome::Skipped);
        };

        let mut others = Vec::new();
        for rc_user_id in members.iter().filter(|id| **id != creator) {
            match self.mapped_member(rc_user_id).await? {
                Some(member) => others.push(member),
                None => debug!("member {} of room {} is not migrated", rc_user_id, room.id),
            }
        }

        if room.is_direct() {
            if let Some(existing) = self.existing_direct_room(room, &members).await? {
                warn!(
                    "direct room {} has the same participants as {}, skipping",
                    room.id, existing
                );
                return Ok(Outcome::Skipped);
            }
        }

        let request = room_request(room, &others);
        let room_id = match self.context.homeserver.create_room(&token, &request).await {
            Ok(room_id) => room_id,
            Err(err) => {
                warn!("failed to create room {}: {}", room.id, err);
                return Ok(Outcome::Failed);
            }
        };
        info!("room {} created as {}", room.id, room_id);

        mappings
            .save(&IdMapping::new(&room.id, &room_id, MappingType::Room))
            .await?;
        if room.is_direct() {
            mappings
                .save(&IdMapping::new(&room.id, &room_id, MappingType::DirectMessage))
                .await?;
        }

        self.add_members(&token, &room_id, &others, room.is_direct())
            .await;

        Ok(Outcome::Imported)
    }

    /// Creator first, then any member with an access token.
    async fn creator_credentials(
        &self,
        room: &RcRoom,
        members: &[String],
    ) -> Result<Option<(String, String)>, DatabaseError> {
        let candidates = room
            .creator
            .as_ref()
            .map(|creator| &creator.id)
            .into_iter()
            .chain(members.iter());

        for rc_user_id in candidates {
            if let Some(token) = self.context.mappings.get_access_token(rc_user_id).await? {
                return Ok(Some((rc_user_id.clone(), token)));
            }
        }
        Ok(None)
    }

    async fn mapped_member(&self, rc_user_id: &str) -> Result<Option<MappedMember>, DatabaseError> {
        let mapping = self
            .context
            .mappings
            .get_mapping(rc_user_id, MappingType::User)
            .await?;

        Ok(mapping.filter(IdMapping::has_matrix_id).map(|m| MappedMember {
            rc_id: m.rc_id,
            matrix_id: m.matrix_id,
            access_token: m.access_token.filter(|t| !t.is_empty()),
        }))
    }

    /// A migrated direct room whose participant set equals `members`.
    async fn existing_direct_room(
        &self,
        room: &RcRoom,
        members: &[String],
    ) -> Result<Option<String>, DatabaseError> {
        if members.is_empty() {
            return Ok(None);
        }

        let candidates = self.context.memberships.get_rooms_for_members(members).await?;
        for candidate in candidates.iter().filter(|id| **id != room.id) {
            let direct = self
                .context
                .mappings
                .matrix_id_of(candidate, MappingType::DirectMessage)
                .await?;
            if direct.is_none() {
                continue;
            }

            let participants = distinct(self.context.memberships.get_memberships(candidate).await?);
            if participants.len() == members.len() {
                return Ok(Some(candidate.clone()));
            }
        }
        Ok(None)
    }

    /// Invites for regular rooms go out after creation; direct rooms carry
    /// them in the create request.
    async fn add_members(&self, token: &str, room_id: &str, others: &[MappedMember], invited: bool) {
        let homeserver = &self.context.homeserver;

        for member in others {
            if !invited {
                if let Err(err) = homeserver.invite_user(token, room_id, &member.matrix_id).await {
                    warn!("failed to invite {} to {}: {}", member.matrix_id, room_id, err);
                    continue;
                }
            }

            let Some(member_token) = member.access_token.as_deref() else {
                debug!("member {} has no access token, not joining", member.rc_id);
                continue;
            };
            if let Err(err) = homeserver.join_room(member_token, room_id).await {
                warn!("failed to join {} to {}: {}", member.matrix_id, room_id, err);
            }
        }
    }
}

fn room_request(room: &RcRoom, others: &[MappedMember]) -> CreateRoomRequest {
    if room.is_direct() {
        return CreateRoomRequest {
            preset: Some("trusted_private_chat".to_string()),
            invite: others.iter().map(|m| m.matrix_id.clone()).collect(),
            is_direct: true,
            ..Default::default()
        };
    }

    let preset = if room.is_public() {
        "public_chat"
    } else {
        "private_chat"
    };
    CreateRoomRequest {
        name: room.display_name().map(ToOwned::to_owned),
        topic: room.topic.clone().filter(|t| !t.is_empty()),
        preset: Some(preset.to_string()),
        ..Default::default()
    }
}
