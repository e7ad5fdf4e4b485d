use serde::{Deserialize, Serialize};

use super::DatabaseError;

/// Kind of entity an [`IdMapping`] translates. The discriminants are what the
/// `mapping_type` column stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(i32)]
pub enum MappingType {
    User = 0,
    Room = 1,
    Message = 2,
    DirectMessage = 3,
}

impl MappingType {
    pub fn as_i32(self) -> i32 {
        self as i32
    }
}

impl TryFrom<i32> for MappingType {
    type Error = DatabaseError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(MappingType::User),
            1 => Ok(MappingType::Room),
            2 => Ok(MappingType::Message),
            3 => Ok(MappingType::DirectMessage),
            other => Err(DatabaseError::InvalidData(format!(
                "unknown mapping type {other}"
            ))),
        }
    }
}

/// A Rocket.Chat ID translated to its Matrix counterpart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdMapping {
    pub rc_id: String,
    /// Empty until the Matrix side has been created.
    pub matrix_id: String,
    pub mapping_type: MappingType,
    /// Only carried by user mappings.
    pub access_token: Option<String>,
}

impl IdMapping {
    pub fn new(
        rc_id: impl Into<String>,
        matrix_id: impl Into<String>,
        mapping_type: MappingType,
    ) -> Self {
        Self {
            rc_id: rc_id.into(),
            matrix_id: matrix_id.into(),
            mapping_type,
            access_token: None,
        }
    }

    pub fn with_access_token(mut self, access_token: impl Into<String>) -> Self {
        self.access_token = Some(access_token.into());
        self
    }

    pub fn has_matrix_id(&self) -> bool {
        !self.matrix_id.is_empty()
    }
}
