use std::path::Path;

use anyhow::{Context, Result};
use serde_json::{Value, json};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{ImportReport, MigrationContext, Outcome};
use crate::db::{IdMapping, MappingType};
use crate::export::{ExportReader, RcMessage};

/// Replays text messages into their migrated rooms, as their authors.
pub struct MessageImporter {
    context: MigrationContext,
}

impl MessageImporter {
    pub fn new(context: MigrationContext) -> Self {
        Self { context }
    }

    pub async fn import_file(&self, path: &Path) -> Result<ImportReport> {
        let reader = ExportReader::<RcMessage>::open(path)?;
        info!("importing messages from {}", reader.path().display());

        let mut report = ImportReport::default();
        for record in reader {
            let message = record?;
            let outcome = self
                .import_message(&message)
                .await
                .with_context(|| format!("failed to import message {}", message.id))?;
            report.record(outcome);
        }

        info!("messages: {}", report);
        Ok(report)
    }

    pub async fn import_message(&self, message: &RcMessage) -> Result<Outcome> {
        let mappings = &self.context.mappings;

        if message.is_system() {
            debug!("message {} is a system message, skipping", message.id);
            return Ok(Outcome::Skipped);
        }
        if mappings.get_message_id(&message.id).await?.is_some() {
            debug!("message {} already migrated", message.id);
            return Ok(Outcome::Skipped);
        }

        let Some(room_id) = mappings.get_room_id(&message.rid).await? else {
            warn!("room {} of message {} is not migrated, skipping", message.rid, message.id);
            return Ok(Outcome::Skipped);
        };
        let Some(author) = message.u.as_ref() else {
            warn!("message {} has no author, skipping", message.id);
            return Ok(Outcome::Skipped);
        };
        let Some(token) = mappings.get_access_token(&author.id).await? else {
            warn!("author {} of message {} has no access token, skipping", author.id, message.id);
            return Ok(Outcome::Skipped);
        };

        let thread_root = match message.thread_root() {
            Some(root) => match mappings.get_message_id(root).await? {
                Some(event_id) => Some(event_id),
                None => {
                    warn!("thread root {} of message {} is not migrated, skipping", root, message.id);
                    return Ok(Outcome::Skipped);
                }
            },
            None => None,
        };

        let content = message_content(&message.msg, thread_root.as_deref());
        let txn_id = Uuid::new_v4().to_string();
        let event_id = match self
            .context
            .homeserver
            .send_message(&token, &room_id, &txn_id, &content)
            .await
        {
            Ok(event_id) => event_id,
            Err(err) => {
                warn!("failed to send message {}: {}", message.id, err);
                return Ok(Outcome::Failed);
            }
        };

        mappings
            .save(&IdMapping::new(&message.id, event_id, MappingType::Message))
            .await?;
        Ok(Outcome::Imported)
    }
}

fn message_content(body: &str, thread_root: Option<&str>) -> Value {
    let mut content = json!({
        "msgtype": "m.text",
        "body": body,
    });

    if let Some(root) = thread_root {
        content["m.relates_to"] = json!({
            "rel_type": "m.thread",
            "event_id": root,
            "is_falling_back": true,
            "m.in_reply_to": { "event_id": root },
        });
    }
    content
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{MessageImporter, message_content};
    use crate::db::MappingType;
    use crate::export::tests::export_file;
    use crate::migration::ImportReport;
    use crate::migration::testing::{Harness, RecordingHomeserver};

    #[test]
    fn thread_replies_relate_to_their_root() {
        let content = message_content("reply", Some("$root"));
        assert_eq!(content["m.relates_to"]["rel_type"], "m.thread");
        assert_eq!(content["m.relates_to"]["event_id"], "$root");
        assert_eq!(message_content("hi", None), json!({"msgtype": "m.text", "body": "hi"}));
    }

    #[tokio::test]
    async fn messages_are_sent_as_their_authors() {
        let harness = Harness::new(RecordingHomeserver::new("example.org")).await;
        harness.seed_user("u1", "@alice:example.org").await;
        harness.seed_user("u2", "@bob:example.org").await;
        harness.seed("r1", "!general:example.org", MappingType::Room).await;

        let file = export_file(&[
            r#"{"_id":"m1","rid":"r1","msg":"hello","u":{"_id":"u1","username":"alice"}}"#,
            r#"{"_id":"m2","rid":"r1","msg":"alice","t":"uj","u":{"_id":"u1","username":"alice"}}"#,
            r#"{"_id":"m3","rid":"r1","msg":"hi back","tmid":"m1","u":{"_id":"u2","username":"bob"}}"#,
            r#"{"_id":"m4","rid":"r9","msg":"lost","u":{"_id":"u2","username":"bob"}}"#,
            r#"{"_id":"m5","rid":"r1","msg":"ghost","u":{"_id":"u7","username":"ghost"}}"#,
        ]);
        let importer = MessageImporter::new(harness.context.clone());

        let report = importer.import_file(file.path()).await.unwrap();

        assert_eq!(
            report,
            ImportReport {
                imported: 2,
                skipped: 3,
                failed: 0
            }
        );
        let sent = harness.homeserver.messages();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].token, "token-alice");
        assert_eq!(sent[0].room_id, "!general:example.org");
        assert_eq!(sent[1].token, "token-bob");
        assert_eq!(sent[1].content["m.relates_to"]["event_id"], "$event1");

        let mappings = &harness.context.mappings;
        assert_eq!(
            mappings.get_message_id("m3").await.unwrap().as_deref(),
            Some("$event2")
        );

        let again = importer.import_file(file.path()).await.unwrap();
        assert_eq!(again.imported, 0);
        assert_eq!(harness.homeserver.messages().len(), 2);
    }
}
