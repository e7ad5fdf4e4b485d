use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use super::{MigrationContext, distinct};
use crate::db::DatabaseError;
use crate::export::{ExportError, ExportReader, RcMessage};

/// Thread key and receipt `thread_id` of a room's main timeline.
pub const MAIN_THREAD: &str = "main";

#[derive(Debug, Clone, PartialEq, Eq)]
struct LastMessage {
    id: String,
    ts: Option<DateTime<Utc>>,
}

/// Latest message per thread per room, as seen in a message export.
#[derive(Debug, Clone, Default)]
pub struct LastRoomMessages {
    rooms: BTreeMap<String, BTreeMap<String, LastMessage>>,
}

impl LastRoomMessages {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_messages<I>(messages: I) -> Self
    where
        I: IntoIterator<Item = RcMessage>,
    {
        let mut last = Self::new();
        for message in messages {
            last.observe(&message);
        }
        last
    }

    pub fn from_export(path: &Path) -> Result<Self, ExportError> {
        let mut last = Self::new();
        for message in ExportReader::<RcMessage>::open(path)? {
            last.observe(&message?);
        }
        Ok(last)
    }

    /// Later messages replace earlier ones for the same thread unless both
    /// carry timestamps and the newcomer is older.
    pub fn observe(&mut self, message: &RcMessage) {
        if message.is_system() {
            return;
        }

        let thread = message.thread_root().unwrap_or(MAIN_THREAD);
        let incoming = LastMessage {
            id: message.id.clone(),
            ts: message.timestamp(),
        };

        let threads = self.rooms.entry(message.rid.clone()).or_default();
        let older = threads
            .get(thread)
            .and_then(|current| current.ts)
            .zip(incoming.ts)
            .is_some_and(|(current, ts)| ts < current);
        if !older {
            threads.insert(thread.to_string(), incoming);
        }
    }

    /// `(room, thread, message)` source IDs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str, &str)> {
        self.rooms.iter().flat_map(|(room, threads)| {
            threads
                .iter()
                .map(move |(thread, last)| (room.as_str(), thread.as_str(), last.id.as_str()))
        })
    }

    pub fn to_map(&self) -> BTreeMap<String, BTreeMap<String, String>> {
        self.rooms
            .iter()
            .map(|(room, threads)| {
                let threads = threads
                    .iter()
                    .map(|(thread, last)| (thread.clone(), last.id.clone()))
                    .collect();
                (room.clone(), threads)
            })
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadStateReport {
    pub threads_processed: usize,
    pub threads_skipped: usize,
    pub receipts_sent: usize,
    pub members_skipped: usize,
    pub receipts_failed: usize,
}

impl fmt::Display for ReadStateReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} threads processed, {} threads skipped, {} receipts sent, {} members skipped, {} receipts failed",
            self.threads_processed,
            self.threads_skipped,
            self.receipts_sent,
            self.members_skipped,
            self.receipts_failed
        )
    }
}

/// Marks the last message of every thread as read for every room member.
pub struct ReadStatePropagator {
    context: MigrationContext,
}

impl ReadStatePropagator {
    pub fn new(context: MigrationContext) -> Self {
        Self { context }
    }

    pub async fn propagate(&self, last: &LastRoomMessages) -> Result<ReadStateReport, DatabaseError> {
        let mappings = &self.context.mappings;
        let mut report = ReadStateReport::default();

        for (rc_room_id, thread, rc_message_id) in last.iter() {
            let Some(room_id) = mappings.get_room_id(rc_room_id).await? else {
                debug!("room {} is not migrated", rc_room_id);
                report.threads_skipped += 1;
                continue;
            };
            let Some(event_id) = mappings.get_message_id(rc_message_id).await? else {
                debug!("message {} is not migrated", rc_message_id);
                report.threads_skipped += 1;
                continue;
            };
            let thread_id = if thread == MAIN_THREAD {
                MAIN_THREAD.to_string()
            } else {
                match mappings.get_message_id(thread).await? {
                    Some(root) => root,
                    None => {
                        warn!("thread root {} in room {} is not migrated", thread, rc_room_id);
                        report.threads_skipped += 1;
                        continue;
                    }
                }
            };

            let members = distinct(self.context.memberships.get_memberships(rc_room_id).await?);
            for rc_user_id in &members {
                let (Some(user_id), Some(token)) = (
                    mappings.get_user_id(rc_user_id).await?,
                    mappings.get_access_token(rc_user_id).await?,
                ) else {
                    debug!("member {} of {} has no session, skipping", rc_user_id, rc_room_id);
                    report.members_skipped += 1;
                    continue;
                };

                match self
                    .context
                    .homeserver
                    .send_read_receipt(&token, &room_id, &event_id, &thread_id)
                    .await
                {
                    Ok(()) => report.receipts_sent += 1,
                    Err(err) => {
                        warn!("failed to mark {} read for {}: {}", event_id, user_id, err);
                        report.receipts_failed += 1;
                    }
                }
            }
            report.threads_processed += 1;
        }

        info!("read state: {}", report);
        Ok(report)
    }
}
