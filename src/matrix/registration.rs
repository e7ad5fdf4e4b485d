use hmac::{Hmac, Mac};
use sha1::Sha1;

use tracing::debug;

use super::types::{RegisteredUser, RegistrationRequest};
use super::{Homeserver, MatrixError};

type HmacSha1 = Hmac<Sha1>;

/// MAC for Synapse's shared-secret registration endpoint:
/// HMAC-SHA1 over `nonce\0username\0password\0admin|notadmin`, hex encoded.
pub fn registration_mac(
    shared_secret: &str,
    nonce: &str,
    username: &str,
    password: &str,
    admin: bool,
) -> Result<String, MatrixError> {
    let mut mac = <HmacSha1 as Mac>::new_from_slice(shared_secret.as_bytes())
        .map_err(|e| MatrixError::Decode(format!("invalid registration secret: {e}")))?;

    mac.update(nonce.as_bytes());
    mac.update(b"\0");
    mac.update(username.as_bytes());
    mac.update(b"\0");
    mac.update(password.as_bytes());
    mac.update(b"\0");
    let role: &[u8] = if admin { b"admin" } else { b"notadmin" };
    mac.update(role);

    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Registers an account through the shared-secret flow: fetch a nonce, sign
/// it, submit.
pub async fn register_user(
    homeserver: &dyn Homeserver,
    shared_secret: &str,
    username: &str,
    displayname: &str,
    password: &str,
    admin: bool,
) -> Result<RegisteredUser, MatrixError> {
    let nonce = homeserver.registration_nonce().await?;
    let mac = registration_mac(shared_secret, &nonce, username, password, admin)?;
    debug!(username, admin, "submitting shared-secret registration");

    homeserver
        .register(&RegistrationRequest {
            nonce,
            username: username.to_string(),
            displayname: displayname.to_string(),
            password: password.to_string(),
            admin,
            mac,
        })
        .await
}

#[cfg(test)]
mod tests {
    use super::{register_user, registration_mac};
    use crate::migration::testing::RecordingHomeserver;

    #[test]
    fn mac_for_regular_user_with_empty_password() {
        let mac = registration_mac("shared-secret", "abc123", "alice", "", false).unwrap();
        assert_eq!(mac, "6148fe4bdd26a94990c259187e063df79cf978a4");
    }

    #[test]
    fn mac_for_admin_user() {
        let mac = registration_mac("shared-secret", "abc123", "root", "pw", true).unwrap();
        assert_eq!(mac, "c00637c2ba1d3f77dc3696c23b7b625d0a50f3ac");
    }

    #[test]
    fn nonce_changes_the_mac() {
        let a = registration_mac("shared-secret", "n1", "alice", "", false).unwrap();
        let b = registration_mac("shared-secret", "n2", "alice", "", false).unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn register_user_signs_the_fetched_nonce() {
        let homeserver = RecordingHomeserver::new("example.org");

        let registered = register_user(&homeserver, "shared-secret", "alice", "Alice", "", false)
            .await
            .unwrap();

        assert_eq!(registered.user_id, "@alice:example.org");
        let requests = homeserver.registrations();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].nonce, "abc123");
        assert_eq!(requests[0].mac, "6148fe4bdd26a94990c259187e063df79cf978a4");
        assert!(!requests[0].admin);
    }
}
