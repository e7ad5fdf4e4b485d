use std::path::Path;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use super::{ImportReport, MigrationContext, Outcome};
use crate::export::{ExportReader, RcUser};
use crate::matrix::EmailPusher;

/// Carries users' e-mail addresses over and subscribes them to e-mail
/// notifications.
pub struct NotificationImporter {
    context: MigrationContext,
    brand: String,
}

impl NotificationImporter {
    pub fn new(context: MigrationContext, brand: impl Into<String>) -> Self {
        Self {
            context,
            brand: brand.into(),
        }
    }

    pub async fn import_file(&self, path: &Path) -> Result<ImportReport> {
        let reader = ExportReader::<RcUser>::open(path)?;
        info!("importing e-mail notifications from {}", reader.path().display());

        let mut report = ImportReport::default();
        for record in reader {
            let user = record?;
            let outcome = self
                .import_user(&user)
                .await
                .with_context(|| format!("failed to set up notifications for {}", user.id))?;
            report.record(outcome);
        }

        info!("notifications: {}", report);
        Ok(report)
    }

    pub async fn import_user(&self, user: &RcUser) -> Result<Outcome> {
        let mappings = &self.context.mappings;
        let (Some(matrix_id), Some(token)) = (
            mappings.get_user_id(&user.id).await?,
            mappings.get_access_token(&user.id).await?,
        ) else {
            debug!("user {} is not registered, skipping", user.id);
            return Ok(Outcome::Skipped);
        };
        let Some(email) = user.first_email() else {
            debug!("user {} has no e-mail address", user.id);
            return Ok(Outcome::Skipped);
        };

        let homeserver = &self.context.homeserver;
        if let Err(err) = homeserver.add_email_threepid(&matrix_id, email).await {
            warn!("failed to add e-mail for {}: {}", matrix_id, err);
            return Ok(Outcome::Failed);
        }
        if let Err(err) = homeserver
            .set_pusher(&token, &EmailPusher::new(email, &self.brand))
            .await
        {
            warn!("failed to add e-mail pusher for {}: {}", matrix_id, err);
            return Ok(Outcome::Failed);
        }

        debug!("e-mail notifications enabled for {}", matrix_id);
        Ok(Outcome::Imported)
    }
}

#[cfg(test)]
mod tests {
    use super::NotificationImporter;
    use crate::export::tests::export_file;
    use crate::migration::ImportReport;
    use crate::migration::testing::{Harness, RecordingHomeserver};

    #[tokio::test]
    async fn registered_users_with_email_get_a_pusher() {
        let harness = Harness::new(RecordingHomeserver::new("x").failing_for("token-c")).await;
        harness.seed_user("ua", "@a:x").await;
        harness.seed_user("ub", "@b:x").await;
        harness.seed_user("uc", "@c:x").await;

        let file = export_file(&[
            r#"{"_id":"ua","username":"a","emails":[{"address":"a@example.org"},{"address":"old@example.org"}]}"#,
            r#"{"_id":"ub","username":"b"}"#,
            r#"{"_id":"uc","username":"c","emails":[{"address":"c@example.org"}]}"#,
            r#"{"_id":"ud","username":"d","emails":[{"address":"d@example.org"}]}"#,
        ]);

        let report = NotificationImporter::new(harness.context.clone(), "Acme Chat")
            .import_file(file.path())
            .await
            .unwrap();

        assert_eq!(
            report,
            ImportReport {
                imported: 1,
                skipped: 2,
                failed: 1
            }
        );
        assert_eq!(
            harness.homeserver.threepids(),
            vec![
                ("@a:x".to_string(), "a@example.org".to_string()),
                ("@c:x".to_string(), "c@example.org".to_string()),
            ]
        );

        let pushers = harness.homeserver.pushers();
        assert_eq!(pushers.len(), 1);
        assert_eq!(pushers[0].0, "token-a");
        assert_eq!(pushers[0].1.pushkey, "a@example.org");
        assert_eq!(pushers[0].1.data.brand, "Acme Chat");
    }
}
