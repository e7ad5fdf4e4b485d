use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Body of `m.direct` account data: peer user ID to the DM rooms shared with
/// that peer.
pub type DirectRooms = BTreeMap<String, Vec<String>>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegistrationRequest {
    pub nonce: String,
    pub username: String,
    pub displayname: String,
    pub password: String,
    pub admin: bool,
    pub mac: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RegisteredUser {
    pub user_id: String,
    pub access_token: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CreateRoomRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preset: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visibility: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub invite: Vec<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub is_direct: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmailPusher {
    pub kind: String,
    pub app_id: String,
    pub pushkey: String,
    pub app_display_name: String,
    pub device_display_name: String,
    pub lang: String,
    pub append: bool,
    pub data: PusherData,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PusherData {
    pub brand: String,
}

impl EmailPusher {
    pub fn new(email: &str, brand: &str) -> Self {
        Self {
            kind: "email".to_string(),
            app_id: "m.email".to_string(),
            pushkey: email.to_string(),
            app_display_name: "Email Notifications".to_string(),
            device_display_name: email.to_string(),
            lang: "en".to_string(),
            append: true,
            data: PusherData {
                brand: brand.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{CreateRoomRequest, EmailPusher};

    #[test]
    fn create_room_request_omits_unset_fields() {
        let request = CreateRoomRequest {
            name: Some("general".to_string()),
            preset: Some("public_chat".to_string()),
            ..Default::default()
        };

        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({"name": "general", "preset": "public_chat"})
        );
    }

    #[test]
    fn direct_room_request_flags_is_direct() {
        let request = CreateRoomRequest {
            preset: Some("trusted_private_chat".to_string()),
            invite: vec!["@bob:example.org".to_string()],
            is_direct: true,
            ..Default::default()
        };

        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({
                "preset": "trusted_private_chat",
                "invite": ["@bob:example.org"],
                "is_direct": true
            })
        );
    }

    #[test]
    fn email_pusher_uses_address_as_pushkey() {
        let pusher = EmailPusher::new("alice@example.org", "IM");
        let value = serde_json::to_value(&pusher).unwrap();

        assert_eq!(value["kind"], "email");
        assert_eq!(value["app_id"], "m.email");
        assert_eq!(value["pushkey"], "alice@example.org");
        assert_eq!(value["device_display_name"], "alice@example.org");
        assert_eq!(value["append"], true);
        assert_eq!(value["data"]["brand"], "IM");
    }
}
