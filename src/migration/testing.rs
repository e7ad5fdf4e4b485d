use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use tempfile::NamedTempFile;

use super::MigrationContext;
use crate::db::manager::tests::temp_database;
use crate::db::{IdMapping, MappingType};
use crate::matrix::{
    CreateRoomRequest, DirectRooms, EmailPusher, Homeserver, MatrixError, RegisteredUser,
    RegistrationRequest,
};

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct SentMessage {
    pub token: String,
    pub room_id: String,
    pub content: Value,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Receipt {
    pub token: String,
    pub room_id: String,
    pub event_id: String,
    pub thread_id: String,
}

#[derive(Default)]
struct Calls {
    registrations: Vec<RegistrationRequest>,
    created_rooms: Vec<(String, CreateRoomRequest)>,
    invites: Vec<(String, String)>,
    joins: Vec<(String, String)>,
    messages: Vec<SentMessage>,
    direct: Vec<(String, String, DirectRooms)>,
    receipts: Vec<Receipt>,
    threepids: Vec<(String, String)>,
    pushers: Vec<(String, EmailPusher)>,
}

/// In-memory homeserver that records every call. Tokens listed in
/// `failing_tokens` get an `M_FORBIDDEN` response.
pub(crate) struct RecordingHomeserver {
    domain: String,
    failing_tokens: HashSet<String>,
    calls: Mutex<Calls>,
}

impl RecordingHomeserver {
    pub fn new(domain: &str) -> Self {
        Self {
            domain: domain.to_string(),
            failing_tokens: HashSet::new(),
            calls: Mutex::new(Calls::default()),
        }
    }

    pub fn failing_for(mut self, token: &str) -> Self {
        self.failing_tokens.insert(token.to_string());
        self
    }

    fn check(&self, token: &str) -> Result<(), MatrixError> {
        if self.failing_tokens.contains(token) {
            return Err(MatrixError::Api {
                status: 403,
                errcode: "M_FORBIDDEN".to_string(),
                error: "rejected by test homeserver".to_string(),
            });
        }
        Ok(())
    }

    fn calls(&self) -> std::sync::MutexGuard<'_, Calls> {
        self.calls.lock().unwrap()
    }

    pub fn registrations(&self) -> Vec<RegistrationRequest> {
        self.calls().registrations.clone()
    }

    pub fn created_rooms(&self) -> Vec<(String, CreateRoomRequest)> {
        self.calls().created_rooms.clone()
    }

    pub fn invites(&self) -> Vec<(String, String)> {
        self.calls().invites.clone()
    }

    pub fn joins(&self) -> Vec<(String, String)> {
        self.calls().joins.clone()
    }

    pub fn messages(&self) -> Vec<SentMessage> {
        self.calls().messages.clone()
    }

    /// `(token, user_id, directory)` per `m.direct` update, sorted by user.
    pub fn direct_updates(&self) -> Vec<(String, String, DirectRooms)> {
        let mut updates = self.calls().direct.clone();
        updates.sort_by(|a, b| a.1.cmp(&b.1));
        updates
    }

    pub fn receipts(&self) -> Vec<Receipt> {
        self.calls().receipts.clone()
    }

    pub fn threepids(&self) -> Vec<(String, String)> {
        self.calls().threepids.clone()
    }

    pub fn pushers(&self) -> Vec<(String, EmailPusher)> {
        self.calls().pushers.clone()
    }
}

#[async_trait]
impl Homeserver for RecordingHomeserver {
    async fn whoami(&self, token: &str) -> Result<String, MatrixError> {
        self.check(token)?;
        Ok(format!("@admin:{}", self.domain))
    }

    async fn registration_nonce(&self) -> Result<String, MatrixError> {
        Ok("abc123".to_string())
    }

    async fn register(&self, request: &RegistrationRequest) -> Result<RegisteredUser, MatrixError> {
        self.calls().registrations.push(request.clone());
        Ok(RegisteredUser {
            user_id: format!("@{}:{}", request.username, self.domain),
            access_token: format!("token-{}", request.username),
        })
    }

    async fn create_room(
        &self,
        token: &str,
        request: &CreateRoomRequest,
    ) -> Result<String, MatrixError> {
        self.check(token)?;
        let mut calls = self.calls();
        calls.created_rooms.push((token.to_string(), request.clone()));
        Ok(format!("!room{}:{}", calls.created_rooms.len(), self.domain))
    }

    async fn invite_user(
        &self,
        token: &str,
        room_id: &str,
        user_id: &str,
    ) -> Result<(), MatrixError> {
        self.check(token)?;
        self.calls()
            .invites
            .push((room_id.to_string(), user_id.to_string()));
        Ok(())
    }

    async fn join_room(&self, token: &str, room_id: &str) -> Result<(), MatrixError> {
        self.check(token)?;
        self.calls()
            .joins
            .push((token.to_string(), room_id.to_string()));
        Ok(())
    }

    async fn send_message(
        &self,
        token: &str,
        room_id: &str,
        _txn_id: &str,
        content: &Value,
    ) -> Result<String, MatrixError> {
        self.check(token)?;
        let mut calls = self.calls();
        calls.messages.push(SentMessage {
            token: token.to_string(),
            room_id: room_id.to_string(),
            content: content.clone(),
        });
        Ok(format!("$event{}", calls.messages.len()))
    }

    async fn set_direct_rooms(
        &self,
        token: &str,
        user_id: &str,
        directory: &DirectRooms,
    ) -> Result<(), MatrixError> {
        self.check(token)?;
        self.calls()
            .direct
            .push((token.to_string(), user_id.to_string(), directory.clone()));
        Ok(())
    }

    async fn send_read_receipt(
        &self,
        token: &str,
        room_id: &str,
        event_id: &str,
        thread_id: &str,
    ) -> Result<(), MatrixError> {
        self.check(token)?;
        self.calls().receipts.push(Receipt {
            token: token.to_string(),
            room_id: room_id.to_string(),
            event_id: event_id.to_string(),
            thread_id: thread_id.to_string(),
        });
        Ok(())
    }

    async fn add_email_threepid(&self, user_id: &str, email: &str) -> Result<(), MatrixError> {
        self.calls()
            .threepids
            .push((user_id.to_string(), email.to_string()));
        Ok(())
    }

    async fn set_pusher(&self, token: &str, pusher: &EmailPusher) -> Result<(), MatrixError> {
        self.check(token)?;
        self.calls()
            .pushers
            .push((token.to_string(), pusher.clone()));
        Ok(())
    }
}

pub(crate) struct Harness {
    _file: NamedTempFile,
    pub homeserver: Arc<RecordingHomeserver>,
    pub context: MigrationContext,
}

impl Harness {
    pub async fn new(homeserver: RecordingHomeserver) -> Self {
        let (file, db) = temp_database().await;
        let homeserver = Arc::new(homeserver);
        let context = MigrationContext::new(&db, homeserver.clone());
        Self {
            _file: file,
            homeserver,
            context,
        }
    }

    /// Stores a registered user with token `token-<localpart>`.
    pub async fn seed_user(&self, rc_id: &str, matrix_id: &str) {
        let localpart = matrix_id
            .trim_start_matches('@')
            .split(':')
            .next()
            .unwrap();
        let token = format!("token-{localpart}");
        self.context
            .mappings
            .save(&IdMapping::new(rc_id, matrix_id, MappingType::User).with_access_token(token))
            .await
            .unwrap();
    }

    pub async fn seed(&self, rc_id: &str, matrix_id: &str, mapping_type: MappingType) {
        self.context
            .mappings
            .save(&IdMapping::new(rc_id, matrix_id, mapping_type))
            .await
            .unwrap();
    }

    pub async fn seed_members(&self, rc_room_id: &str, rc_user_ids: &[&str]) {
        for user in rc_user_ids {
            self.context
                .memberships
                .create_membership(rc_room_id, user)
                .await
                .unwrap();
        }
    }
}
