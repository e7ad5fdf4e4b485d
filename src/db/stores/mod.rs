use async_trait::async_trait;

use super::DatabaseError;
use super::models::{IdMapping, MappingType};

#[async_trait]
pub trait MappingStore: Send + Sync {
    async fn get_mapping(
        &self,
        rc_id: &str,
        mapping_type: MappingType,
    ) -> Result<Option<IdMapping>, DatabaseError>;

    /// Reverse lookup across every mapping type. When the same Matrix ID is
    /// stored under several types the lowest discriminant wins.
    async fn get_mapping_by_matrix_id(
        &self,
        matrix_id: &str,
    ) -> Result<Option<IdMapping>, DatabaseError>;

    async fn get_mapping_by_matrix_id_and_type(
        &self,
        matrix_id: &str,
        mapping_type: MappingType,
    ) -> Result<Option<IdMapping>, DatabaseError>;

    /// Case-insensitive match of `username` against the local part of user
    /// mappings' Matrix IDs.
    async fn get_user_mapping_by_name(
        &self,
        username: &str,
    ) -> Result<Option<IdMapping>, DatabaseError>;

    async fn get_all_mappings_by_type(
        &self,
        mapping_type: MappingType,
    ) -> Result<Vec<IdMapping>, DatabaseError>;

    /// Insert, or update the existing row with the same `(rc_id, mapping_type)`.
    async fn save(&self, mapping: &IdMapping) -> Result<(), DatabaseError>;

    async fn count_mappings(&self, mapping_type: Option<MappingType>)
    -> Result<i64, DatabaseError>;

    async fn get_access_token(&self, rc_user_id: &str) -> Result<Option<String>, DatabaseError> {
        Ok(self
            .get_mapping(rc_user_id, MappingType::User)
            .await?
            .and_then(|m| m.access_token)
            .filter(|token| !token.is_empty()))
    }

    async fn get_user_id(&self, rc_user_id: &str) -> Result<Option<String>, DatabaseError> {
        self.matrix_id_of(rc_user_id, MappingType::User).await
    }

    async fn get_room_id(&self, rc_room_id: &str) -> Result<Option<String>, DatabaseError> {
        self.matrix_id_of(rc_room_id, MappingType::Room).await
    }

    async fn get_message_id(&self, rc_message_id: &str) -> Result<Option<String>, DatabaseError> {
        self.matrix_id_of(rc_message_id, MappingType::Message).await
    }

    async fn matrix_id_of(
        &self,
        rc_id: &str,
        mapping_type: MappingType,
    ) -> Result<Option<String>, DatabaseError> {
        Ok(self
            .get_mapping(rc_id, mapping_type)
            .await?
            .map(|m| m.matrix_id)
            .filter(|id| !id.is_empty()))
    }
}

#[async_trait]
pub trait MembershipStore: Send + Sync {
    /// Recording the same pair twice is a no-op.
    async fn create_membership(&self, rc_room_id: &str, rc_user_id: &str)
    -> Result<(), DatabaseError>;

    /// Members of a room, ordered by user ID.
    async fn get_memberships(&self, rc_room_id: &str) -> Result<Vec<String>, DatabaseError>;

    /// Rooms in which every one of `members` has a membership.
    async fn get_rooms_for_members(&self, members: &[String])
    -> Result<Vec<String>, DatabaseError>;

    async fn count_memberships(&self) -> Result<i64, DatabaseError>;
}
