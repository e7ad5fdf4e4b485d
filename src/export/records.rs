use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RcUser {
    #[serde(rename = "_id")]
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(rename = "__rooms", default)]
    pub rooms: Vec<String>,
    #[serde(default)]
    pub emails: Vec<RcEmail>,
}

impl RcUser {
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.username
        } else {
            &self.name
        }
    }

    pub fn first_email(&self) -> Option<&str> {
        self.emails
            .first()
            .map(|e| e.address.as_str())
            .filter(|address| !address.is_empty())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RcEmail {
    pub address: String,
    #[serde(default)]
    pub verified: bool,
}

/// Author or creator reference embedded in rooms and messages.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RcUserRef {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(default)]
    pub username: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RcRoom {
    #[serde(rename = "_id")]
    pub id: String,
    /// `c` public channel, `p` private group, `d` direct message.
    #[serde(rename = "t")]
    pub room_type: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub fname: Option<String>,
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(rename = "u", default)]
    pub creator: Option<RcUserRef>,
    #[serde(default)]
    pub uids: Vec<String>,
}

impl RcRoom {
    pub fn is_direct(&self) -> bool {
        self.room_type == "d"
    }

    pub fn is_public(&self) -> bool {
        self.room_type == "c"
    }

    pub fn display_name(&self) -> Option<&str> {
        self.name
            .as_deref()
            .or(self.fname.as_deref())
            .filter(|name| !name.is_empty())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RcMessage {
    #[serde(rename = "_id")]
    pub id: String,
    pub rid: String,
    #[serde(default)]
    pub msg: String,
    #[serde(default)]
    pub u: Option<RcUserRef>,
    /// Set on system messages such as joins and topic changes.
    #[serde(default)]
    pub t: Option<String>,
    /// Thread root, for replies inside a thread.
    #[serde(default)]
    pub tmid: Option<String>,
    #[serde(default)]
    pub ts: Option<RcDate>,
}

impl RcMessage {
    pub fn is_system(&self) -> bool {
        self.t.as_deref().is_some_and(|t| !t.is_empty())
    }

    pub fn thread_root(&self) -> Option<&str> {
        self.tmid.as_deref().filter(|tmid| !tmid.is_empty())
    }

    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.ts.as_ref().and_then(RcDate::to_utc)
    }
}

/// Export dates come either as MongoDB extended JSON (`{"$date": …}`) or bare.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum RcDate {
    Extended {
        #[serde(rename = "$date")]
        date: RcDateValue,
    },
    Bare(RcDateValue),
    Unrecognized(serde_json::Value),
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum RcDateValue {
    Millis(i64),
    Text(String),
}

impl RcDate {
    pub fn to_utc(&self) -> Option<DateTime<Utc>> {
        let value = match self {
            RcDate::Extended { date } => date,
            RcDate::Bare(value) => value,
            RcDate::Unrecognized(_) => return None,
        };
        match value {
            RcDateValue::Millis(ms) => Utc.timestamp_millis_opt(*ms).single(),
            RcDateValue::Text(text) => DateTime::parse_from_rfc3339(text)
                .ok()
                .map(|dt| dt.with_timezone(&Utc)),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::{RcMessage, RcRoom, RcUser};

    #[test]
    fn user_export_fields_are_renamed() {
        let user: RcUser = serde_json::from_str(
            r#"{"_id":"u1","username":"alice","name":"Alice","roles":["user","admin"],
                "__rooms":["r1","r2"],"emails":[{"address":"alice@example.org","verified":true}],
                "createdAt":{"$date":"2021-01-01T00:00:00.000Z"}}"#,
        )
        .expect("decode user");

        assert_eq!(user.id, "u1");
        assert_eq!(user.rooms, vec!["r1", "r2"]);
        assert!(user.has_role("admin"));
        assert_eq!(user.first_email(), Some("alice@example.org"));
        assert_eq!(user.display_name(), "Alice");
    }

    #[test]
    fn direct_room_without_name() {
        let room: RcRoom =
            serde_json::from_str(r#"{"_id":"u1u2","t":"d","uids":["u1","u2"],"usernames":["a","b"]}"#)
                .expect("decode room");

        assert!(room.is_direct());
        assert!(room.creator.is_none());
        assert_eq!(room.display_name(), None);
    }

    #[test]
    fn message_timestamps_accept_every_export_shape() {
        let expected = Utc.with_ymd_and_hms(2023, 5, 1, 12, 0, 0).unwrap();

        for raw in [
            r#"{"_id":"m","rid":"r","ts":{"$date":"2023-05-01T12:00:00.000Z"}}"#,
            r#"{"_id":"m","rid":"r","ts":{"$date":1682942400000}}"#,
            r#"{"_id":"m","rid":"r","ts":"2023-05-01T12:00:00Z"}"#,
        ] {
            let message: RcMessage = serde_json::from_str(raw).expect("decode message");
            assert_eq!(message.timestamp(), Some(expected), "{raw}");
        }
    }

    #[test]
    fn unknown_timestamp_shape_does_not_reject_the_message() {
        let message: RcMessage = serde_json::from_str(
            r#"{"_id":"m","rid":"r","ts":{"$date":{"$numberLong":"1682942400000"}}}"#,
        )
        .expect("decode message");
        assert_eq!(message.timestamp(), None);
    }

    #[test]
    fn system_messages_are_flagged() {
        let join: RcMessage =
            serde_json::from_str(r#"{"_id":"m","rid":"r","t":"uj","msg":"alice"}"#).unwrap();
        let text: RcMessage = serde_json::from_str(r#"{"_id":"m","rid":"r","msg":"hi"}"#).unwrap();

        assert!(join.is_system());
        assert!(!text.is_system());
        assert_eq!(text.thread_root(), None);
    }
}
