use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::debug;
use url::Url;

pub mod registration;
pub mod types;

pub use self::registration::register_user;
pub use self::types::{CreateRoomRequest, DirectRooms, EmailPusher, RegisteredUser, RegistrationRequest};

const CLIENT_V3: [&str; 3] = ["_matrix", "client", "v3"];

#[derive(Debug, Error)]
pub enum MatrixError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("homeserver returned {status} {errcode}: {error}")]
    Api {
        status: u16,
        errcode: String,
        error: String,
    },
    #[error("invalid homeserver url: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("failed to decode response: {0}")]
    Decode(String),
}

/// The homeserver operations the migration needs. `token` is always the
/// access token of the account acting.
#[async_trait]
pub trait Homeserver: Send + Sync {
    async fn whoami(&self, token: &str) -> Result<String, MatrixError>;

    async fn registration_nonce(&self) -> Result<String, MatrixError>;

    async fn register(&self, request: &RegistrationRequest) -> Result<RegisteredUser, MatrixError>;

    async fn create_room(
        &self,
        token: &str,
        request: &CreateRoomRequest,
    ) -> Result<String, MatrixError>;

    async fn invite_user(&self, token: &str, room_id: &str, user_id: &str)
    -> Result<(), MatrixError>;

    async fn join_room(&self, token: &str, room_id: &str) -> Result<(), MatrixError>;

    async fn send_message(
        &self,
        token: &str,
        room_id: &str,
        txn_id: &str,
        content: &Value,
    ) -> Result<String, MatrixError>;

    /// Replaces the `m.direct` account data of `user_id`.
    async fn set_direct_rooms(
        &self,
        token: &str,
        user_id: &str,
        directory: &DirectRooms,
    ) -> Result<(), MatrixError>;

    async fn send_read_receipt(
        &self,
        token: &str,
        room_id: &str,
        event_id: &str,
        thread_id: &str,
    ) -> Result<(), MatrixError>;

    /// Attaches an e-mail threepid to the account; authenticated as admin.
    async fn add_email_threepid(&self, user_id: &str, email: &str) -> Result<(), MatrixError>;

    async fn set_pusher(&self, token: &str, pusher: &EmailPusher) -> Result<(), MatrixError>;
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    errcode: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
struct WhoAmI {
    user_id: String,
}

#[derive(Deserialize)]
struct Nonce {
    nonce: String,
}

#[derive(Deserialize)]
struct RoomCreated {
    room_id: String,
}

#[derive(Deserialize)]
struct EventSent {
    event_id: String,
}

/// Synapse client speaking the client-server and admin APIs over reqwest.
#[derive(Clone)]
pub struct MatrixClient {
    http: Client,
    base_url: Url,
    admin_token: SecretString,
}

impl MatrixClient {
    pub fn new(
        homeserver_url: &str,
        admin_token: SecretString,
        timeout: Duration,
    ) -> Result<Self, MatrixError> {
        let base_url = Url::parse(homeserver_url)?;
        if base_url.cannot_be_a_base() {
            return Err(MatrixError::InvalidUrl(
                url::ParseError::RelativeUrlWithCannotBeABaseBase,
            ));
        }

        let http = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            http,
            base_url,
            admin_token,
        })
    }

    /// Builds a URL below the base, percent-encoding each segment.
    fn endpoint<'a>(&self, segments: impl IntoIterator<Item = &'a str>) -> Result<Url, MatrixError> {
        let mut target = self.base_url.clone();
        target
            .path_segments_mut()
            .map_err(|_| {
                MatrixError::InvalidUrl(url::ParseError::RelativeUrlWithCannotBeABaseBase)
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(target)
    }

    fn client_endpoint<'a>(
        &self,
        segments: impl IntoIterator<Item = &'a str>,
    ) -> Result<Url, MatrixError> {
        let prefix: [&'a str; 3] = CLIENT_V3;
        self.endpoint(prefix.into_iter().chain(segments))
    }

    async fn execute<R: DeserializeOwned>(
        &self,
        method: Method,
        url: Url,
        token: Option<&str>,
        body: Option<&Value>,
    ) -> Result<R, MatrixError> {
        debug!(%method, path = url.path(), "homeserver request");

        let mut request: RequestBuilder = self.http.request(method, url);
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();
        let bytes = response.bytes().await?;

        if !status.is_success() {
            let parsed: Option<ErrorBody> = serde_json::from_slice(&bytes).ok();
            let (errcode, error) = match parsed {
                Some(body) => (
                    body.errcode.unwrap_or_else(|| "M_UNKNOWN".to_string()),
                    body.error.unwrap_or_default(),
                ),
                None => (
                    "M_UNKNOWN".to_string(),
                    String::from_utf8_lossy(&bytes).into_owned(),
                ),
            };
            return Err(MatrixError::Api {
                status: status.as_u16(),
                errcode,
                error,
            });
        }

        let bytes = if bytes.is_empty() { &b"{}"[..] } else { &bytes[..] };
        serde_json::from_slice(bytes).map_err(|e| MatrixError::Decode(e.to_string()))
    }

    async fn get<R: DeserializeOwned>(&self, url: Url, token: Option<&str>) -> Result<R, MatrixError> {
        self.execute(Method::GET, url, token, None).await
    }

    async fn post<R: DeserializeOwned>(
        &self,
        url: Url,
        token: Option<&str>,
        body: &Value,
    ) -> Result<R, MatrixError> {
        self.execute(Method::POST, url, token, Some(body)).await
    }

    async fn put<R: DeserializeOwned>(
        &self,
        url: Url,
        token: Option<&str>,
        body: &Value,
    ) -> Result<R, MatrixError> {
        self.execute(Method::PUT, url, token, Some(body)).await
    }
}

fn to_body<T: serde::Serialize + ?Sized>(value: &T) -> Result<Value, MatrixError> {
    serde_json::to_value(value).map_err(|e| MatrixError::Decode(e.to_string()))
}

#[async_trait]
impl Homeserver for MatrixClient {
    async fn whoami(&self, token: &str) -> Result<String, MatrixError> {
        let url = self.client_endpoint(["account", "whoami"])?;
        let whoami: WhoAmI = self.get(url, Some(token)).await?;
        Ok(whoami.user_id)
    }

    async fn registration_nonce(&self) -> Result<String, MatrixError> {
        let url = self.endpoint(["_synapse", "admin", "v1", "register"])?;
        let nonce: Nonce = self.get(url, None).await?;
        Ok(nonce.nonce)
    }

    async fn register(&self, request: &RegistrationRequest) -> Result<RegisteredUser, MatrixError> {
        let url = self.endpoint(["_synapse", "admin", "v1", "register"])?;
        self.post(url, None, &to_body(request)?).await
    }

    async fn create_room(
        &self,
        token: &str,
        request: &CreateRoomRequest,
    ) -> Result<String, MatrixError> {
        let url = self.client_endpoint(["createRoom"])?;
        let created: RoomCreated = self.post(url, Some(token), &to_body(request)?).await?;
        Ok(created.room_id)
    }

    async fn invite_user(
        &self,
        token: &str,
        room_id: &str,
        user_id: &str,
    ) -> Result<(), MatrixError> {
        let url = self.client_endpoint(["rooms", room_id, "invite"])?;
        let _: Value = self
            .post(url, Some(token), &json!({ "user_id": user_id }))
            .await?;
        Ok(())
    }

    async fn join_room(&self, token: &str, room_id: &str) -> Result<(), MatrixError> {
        let url = self.client_endpoint(["rooms", room_id, "join"])?;
        let _: Value = self.post(url, Some(token), &json!({})).await?;
        Ok(())
    }

    async fn send_message(
        &self,
        token: &str,
        room_id: &str,
        txn_id: &str,
        content: &Value,
    ) -> Result<String, MatrixError> {
        let url = self.client_endpoint(["rooms", room_id, "send", "m.room.message", txn_id])?;
        let sent: EventSent = self.put(url, Some(token), content).await?;
        Ok(sent.event_id)
    }

    async fn set_direct_rooms(
        &self,
        token: &str,
        user_id: &str,
        directory: &DirectRooms,
    ) -> Result<(), MatrixError> {
        let url = self.client_endpoint(["user", user_id, "account_data", "m.direct"])?;
        let _: Value = self.put(url, Some(token), &to_body(directory)?).await?;
        Ok(())
    }

    async fn send_read_receipt(
        &self,
        token: &str,
        room_id: &str,
        event_id: &str,
        thread_id: &str,
    ) -> Result<(), MatrixError> {
        let url = self.client_endpoint(["rooms", room_id, "receipt", "m.read", event_id])?;
        let _: Value = self
            .post(url, Some(token), &json!({ "thread_id": thread_id }))
            .await?;
        Ok(())
    }

    async fn add_email_threepid(&self, user_id: &str, email: &str) -> Result<(), MatrixError> {
        let url = self.endpoint(["_synapse", "admin", "v2", "users", user_id])?;
        let body = json!({ "threepids": [{ "medium": "email", "address": email }] });
        let _: Value = self
            .put(url, Some(self.admin_token.expose_secret()), &body)
            .await?;
        Ok(())
    }

    async fn set_pusher(&self, token: &str, pusher: &EmailPusher) -> Result<(), MatrixError> {
        let url = self.client_endpoint(["pushers", "set"])?;
        let _: Value = self.post(url, Some(token), &to_body(pusher)?).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use secrecy::SecretString;

    use super::{MatrixClient, MatrixError};

    fn client(base: &str) -> MatrixClient {
        MatrixClient::new(base, SecretString::from("admin".to_string()), Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn endpoint_segments_are_percent_encoded() {
        let url = client("http://localhost:8008")
            .client_endpoint(["rooms", "!abc:example.org", "receipt", "m.read", "$ev/1"])
            .unwrap();

        assert_eq!(
            url.as_str(),
            "http://localhost:8008/_matrix/client/v3/rooms/!abc:example.org/receipt/m.read/$ev%2F1"
        );
    }

    #[test]
    fn endpoint_keeps_a_base_path_prefix() {
        let url = client("https://matrix.example.org/synapse/")
            .endpoint(["_synapse", "admin", "v1", "register"])
            .unwrap();

        assert_eq!(
            url.as_str(),
            "https://matrix.example.org/synapse/_synapse/admin/v1/register"
        );
    }

    #[test]
    fn non_base_url_is_rejected() {
        let result = MatrixClient::new(
            "mailto:admin@example.org",
            SecretString::from("admin".to_string()),
            Duration::from_secs(5),
        );
        assert!(matches!(result, Err(MatrixError::InvalidUrl(_))));
    }
}
