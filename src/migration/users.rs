use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, info, warn};

use super::{ImportReport, MigrationContext, Outcome};
use crate::config::AdminConfig;
use crate::db::{IdMapping, MappingType};
use crate::export::{ExportReader, RcUser};
use crate::matrix::register_user;

/// Registers Rocket.Chat users on the homeserver and records their mappings
/// and room memberships.
pub struct UserImporter {
    context: MigrationContext,
    admin: AdminConfig,
    shared_secret: SecretString,
    excluded: HashSet<String>,
}

impl UserImporter {
    pub fn new(
        context: MigrationContext,
        admin: AdminConfig,
        shared_secret: SecretString,
        excluded_users: &[String],
    ) -> Self {
        Self {
            context,
            admin,
            shared_secret,
            excluded: excluded_users.iter().cloned().collect(),
        }
    }

    pub async fn import_file(&self, path: &Path) -> Result<ImportReport> {
        let reader = ExportReader::<RcUser>::open(path)?;
        info!("importing users from {}", reader.path().display());

        let mut report = ImportReport::default();
        for record in reader {
            let user = record?;
            let outcome = self
                .import_user(&user)
                .await
                .with_context(|| format!("failed to import user {}", user.id))?;
            report.record(outcome);
        }

        info!("users: {}", report);
        Ok(report)
    }

    pub async fn import_user(&self, user: &RcUser) -> Result<Outcome> {
        debug!(rc_id = %user.id, username = %user.username, "parsing user");

        if let Some(matrix_id) = self.context.mappings.get_user_id(&user.id).await? {
            debug!("mapping exists: {} -> {}", user.id, matrix_id);
            return Ok(Outcome::Skipped);
        }

        let mapping = if user.username == self.admin.username {
            info!(
                "user {} is the configured admin, mapping to {}",
                user.username, self.admin.matrix_id
            );
            IdMapping::new(&user.id, &self.admin.matrix_id, MappingType::User)
                .with_access_token(&self.admin.access_token)
        } else {
            let reasons = exclusion_reasons(user, &self.excluded);
            if !reasons.is_empty() {
                warn!("user {} is excluded: {}", user.username, reasons.join(", "));
                return Ok(Outcome::Skipped);
            }

            // Synapse lowercases localparts, so `Alice` and `alice` collide.
            if let Some(taken) = self
                .context
                .mappings
                .get_user_mapping_by_name(&user.username)
                .await?
            {
                warn!(
                    "username {} is already taken by {} ({}), skipping",
                    user.username, taken.matrix_id, taken.rc_id
                );
                return Ok(Outcome::Skipped);
            }

            let registered = match register_user(
                self.context.homeserver.as_ref(),
                self.shared_secret.expose_secret(),
                &user.username,
                user.display_name(),
                "",
                user.has_role("admin"),
            )
            .await
            {
                Ok(registered) => registered,
                Err(err) => {
                    warn!("failed to register user {}: {}", user.username, err);
                    return Ok(Outcome::Failed);
                }
            };
            info!("user {} registered as {}", user.username, registered.user_id);

            IdMapping::new(&user.id, registered.user_id, MappingType::User)
                .with_access_token(registered.access_token)
        };

        self.context.mappings.save(&mapping).await?;
        for rc_room_id in &user.rooms {
            self.context
                .memberships
                .create_membership(rc_room_id, &user.id)
                .await?;
        }
        debug!(
            "{} memberships recorded for {}",
            user.rooms.len(),
            user.username
        );

        Ok(Outcome::Imported)
    }
}

/// Why a user is not migrated; empty when the user should be registered.
pub fn exclusion_reasons(user: &RcUser, excluded: &HashSet<String>) -> Vec<String> {
    let mut reasons = Vec::new();
    if user.has_role("app") {
        reasons.push("has role \"app\"".to_string());
    }
    if user.has_role("bot") {
        reasons.push("has role \"bot\"".to_string());
    }
    if excluded.contains(&user.id) {
        reasons.push(format!("id \"{}\" is on exclusion list", user.id));
    }
    if excluded.contains(&user.username) {
        reasons.push(format!("username \"{}\" is on exclusion list", user.username));
    }
    reasons
}
