use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;

use crate::db::schema_sqlite::{id_mappings, memberships};

use super::{
    DatabaseError, RetryPolicy,
    models::{IdMapping, MappingType},
};

// Helper function to convert DateTime to ISO string for SQLite
fn datetime_to_string(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

fn query_error(e: diesel::result::Error) -> DatabaseError {
    use diesel::result::{DatabaseErrorKind, Error};

    match e {
        Error::DatabaseError(
            DatabaseErrorKind::UniqueViolation
            | DatabaseErrorKind::ForeignKeyViolation
            | DatabaseErrorKind::NotNullViolation
            | DatabaseErrorKind::CheckViolation,
            info,
        ) => DatabaseError::Constraint(info.message().to_string()),
        other => DatabaseError::Query(other.to_string()),
    }
}

/// Escape `LIKE` wildcards so user input only matches literally.
fn escape_like(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for c in input.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Keep rooms whose tally across the matched membership rows equals the
/// number of distinct members queried.
fn rooms_with_full_tally(room_ids: Vec<String>, expected: usize) -> Vec<String> {
    let mut tally: BTreeMap<String, usize> = BTreeMap::new();
    for room_id in room_ids {
        *tally.entry(room_id).or_default() += 1;
    }
    tally
        .into_iter()
        .filter(|(_, count)| *count == expected)
        .map(|(room_id, _)| room_id)
        .collect()
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = id_mappings)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
struct DbIdMapping {
    rc_id: String,
    mapping_type: i32,
    matrix_id: String,
    access_token: Option<String>,
}

impl DbIdMapping {
    fn into_id_mapping(self) -> Result<IdMapping, DatabaseError> {
        Ok(IdMapping {
            mapping_type: MappingType::try_from(self.mapping_type)?,
            rc_id: self.rc_id,
            matrix_id: self.matrix_id,
            access_token: self.access_token,
        })
    }
}

#[derive(Insertable)]
#[diesel(table_name = id_mappings)]
struct NewIdMapping<'a> {
    rc_id: &'a str,
    mapping_type: i32,
    matrix_id: &'a str,
    access_token: Option<&'a str>,
    created_at: String,
    updated_at: String,
}

#[derive(Insertable)]
#[diesel(table_name = memberships)]
struct NewMembership<'a> {
    rc_room_id: &'a str,
    rc_user_id: &'a str,
}

pub(crate) fn establish_connection(path: &str) -> Result<SqliteConnection, DatabaseError> {
    let mut conn =
        SqliteConnection::establish(path).map_err(|e| DatabaseError::Connection(e.to_string()))?;
    conn.batch_execute("PRAGMA busy_timeout = 5000;")
        .map_err(|e| DatabaseError::Connection(e.to_string()))?;
    Ok(conn)
}

/// Shared path and retry policy for the SQLite stores. Every operation opens
/// its own connection on the blocking pool.
#[derive(Debug, Clone)]
pub struct SqliteHandle {
    db_path: Arc<String>,
    retry: RetryPolicy,
}

impl SqliteHandle {
    pub fn new(db_path: Arc<String>, retry: RetryPolicy) -> Self {
        Self { db_path, retry }
    }

    async fn run<T, F>(&self, operation: &'static str, f: F) -> Result<T, DatabaseError>
    where
        T: Send + 'static,
        F: Fn(&mut SqliteConnection) -> Result<T, DatabaseError> + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        self.retry
            .run(operation, || {
                let db_path = self.db_path.clone();
                let f = f.clone();
                async move {
                    tokio::task::spawn_blocking(move || {
                        let mut conn = establish_connection(&db_path)?;
                        f(&mut conn)
                    })
                    .await
                    .map_err(|e| DatabaseError::Task(format!("{operation}: {e}")))?
                }
            })
            .await
    }
}

pub struct SqliteMappingStore {
    handle: SqliteHandle,
}

impl SqliteMappingStore {
    pub fn new(handle: SqliteHandle) -> Self {
        Self { handle }
    }
}

#[async_trait]
impl super::MappingStore for SqliteMappingStore {
    async fn get_mapping(
        &self,
        rc_id: &str,
        mapping_type: MappingType,
    ) -> Result<Option<IdMapping>, DatabaseError> {
        let rc_id = rc_id.to_string();
        let mapping_type = mapping_type.as_i32();
        self.handle
            .run("get_mapping", move |conn| {
                id_mappings::table
                    .filter(id_mappings::rc_id.eq(&rc_id))
                    .filter(id_mappings::mapping_type.eq(mapping_type))
                    .select(DbIdMapping::as_select())
                    .first::<DbIdMapping>(conn)
                    .optional()
                    .map_err(query_error)?
                    .map(DbIdMapping::into_id_mapping)
                    .transpose()
            })
            .await
    }

    async fn get_mapping_by_matrix_id(
        &self,
        matrix_id: &str,
    ) -> Result<Option<IdMapping>, DatabaseError> {
        if matrix_id.is_empty() {
            return Ok(None);
        }
        let matrix_id = matrix_id.to_string();
        self.handle
            .run("get_mapping_by_matrix_id", move |conn| {
                id_mappings::table
                    .filter(id_mappings::matrix_id.eq(&matrix_id))
                    .order(id_mappings::mapping_type.asc())
                    .select(DbIdMapping::as_select())
                    .first::<DbIdMapping>(conn)
                    .optional()
                    .map_err(query_error)?
                    .map(DbIdMapping::into_id_mapping)
                    .transpose()
            })
            .await
    }

    async fn get_mapping_by_matrix_id_and_type(
        &self,
        matrix_id: &str,
        mapping_type: MappingType,
    ) -> Result<Option<IdMapping>, DatabaseError> {
        if matrix_id.is_empty() {
            return Ok(None);
        }
        let matrix_id = matrix_id.to_string();
        let mapping_type = mapping_type.as_i32();
        self.handle
            .run("get_mapping_by_matrix_id_and_type", move |conn| {
                id_mappings::table
                    .filter(id_mappings::matrix_id.eq(&matrix_id))
                    .filter(id_mappings::mapping_type.eq(mapping_type))
                    .select(DbIdMapping::as_select())
                    .first::<DbIdMapping>(conn)
                    .optional()
                    .map_err(query_error)?
                    .map(DbIdMapping::into_id_mapping)
                    .transpose()
            })
            .await
    }

    async fn get_user_mapping_by_name(
        &self,
        username: &str,
    ) -> Result<Option<IdMapping>, DatabaseError> {
        // SQLite's LIKE is case-insensitive for ASCII.
        let pattern = format!("@{}:%", escape_like(&username.to_lowercase()));
        self.handle
            .run("get_user_mapping_by_name", move |conn| {
                id_mappings::table
                    .filter(id_mappings::matrix_id.like(&pattern).escape('\\'))
                    .filter(id_mappings::mapping_type.eq(MappingType::User.as_i32()))
                    .select(DbIdMapping::as_select())
                    .first::<DbIdMapping>(conn)
                    .optional()
                    .map_err(query_error)?
                    .map(DbIdMapping::into_id_mapping)
                    .transpose()
            })
            .await
    }

    async fn get_all_mappings_by_type(
        &self,
        mapping_type: MappingType,
    ) -> Result<Vec<IdMapping>, DatabaseError> {
        let mapping_type = mapping_type.as_i32();
        self.handle
            .run("get_all_mappings_by_type", move |conn| {
                let results = id_mappings::table
                    .filter(id_mappings::mapping_type.eq(mapping_type))
                    .order(id_mappings::rc_id.asc())
                    .select(DbIdMapping::as_select())
                    .load::<DbIdMapping>(conn)
                    .map_err(query_error)?;

                results
                    .into_iter()
                    .map(DbIdMapping::into_id_mapping)
                    .collect()
            })
            .await
    }

    async fn save(&self, mapping: &IdMapping) -> Result<(), DatabaseError> {
        let mapping = mapping.clone();
        self.handle
            .run("save_mapping", move |conn| {
                let now = datetime_to_string(&Utc::now());
                let new_mapping = NewIdMapping {
                    rc_id: &mapping.rc_id,
                    mapping_type: mapping.mapping_type.as_i32(),
                    matrix_id: &mapping.matrix_id,
                    access_token: mapping.access_token.as_deref(),
                    created_at: now.clone(),
                    updated_at: now.clone(),
                };

                diesel::insert_into(id_mappings::table)
                    .values(&new_mapping)
                    .on_conflict((id_mappings::rc_id, id_mappings::mapping_type))
                    .do_update()
                    .set((
                        id_mappings::matrix_id.eq(&mapping.matrix_id),
                        id_mappings::access_token.eq(mapping.access_token.as_deref()),
                        id_mappings::updated_at.eq(&now),
                    ))
                    .execute(conn)
                    .map(|_| ())
                    .map_err(query_error)
            })
            .await
    }

    async fn count_mappings(
        &self,
        mapping_type: Option<MappingType>,
    ) -> Result<i64, DatabaseError> {
        let mapping_type = mapping_type.map(MappingType::as_i32);
        self.handle
            .run("count_mappings", move |conn| {
                match mapping_type {
                    Some(ty) => id_mappings::table
                        .filter(id_mappings::mapping_type.eq(ty))
                        .count()
                        .get_result::<i64>(conn),
                    None => id_mappings::table.count().get_result::<i64>(conn),
                }
                .map_err(query_error)
            })
            .await
    }
}

pub struct SqliteMembershipStore {
    handle: SqliteHandle,
}

impl SqliteMembershipStore {
    pub fn new(handle: SqliteHandle) -> Self {
        Self { handle }
    }
}

#[async_trait]
impl super::MembershipStore for SqliteMembershipStore {
    async fn create_membership(
        &self,
        rc_room_id: &str,
        rc_user_id: &str,
    ) -> Result<(), DatabaseError> {
        let rc_room_id = rc_room_id.to_string();
        let rc_user_id = rc_user_id.to_string();
        self.handle
            .run("create_membership", move |conn| {
                diesel::insert_or_ignore_into(memberships::table)
                    .values(&NewMembership {
                        rc_room_id: &rc_room_id,
                        rc_user_id: &rc_user_id,
                    })
                    .execute(conn)
                    .map(|_| ())
                    .map_err(query_error)
            })
            .await
    }

    async fn get_memberships(&self, rc_room_id: &str) -> Result<Vec<String>, DatabaseError> {
        let rc_room_id = rc_room_id.to_string();
        self.handle
            .run("get_memberships", move |conn| {
                memberships::table
                    .filter(memberships::rc_room_id.eq(&rc_room_id))
                    .select(memberships::rc_user_id)
                    .order(memberships::rc_user_id.asc())
                    .load::<String>(conn)
                    .map_err(query_error)
            })
            .await
    }

    async fn get_rooms_for_members(
        &self,
        members: &[String],
    ) -> Result<Vec<String>, DatabaseError> {
        let users: Vec<String> = members
            .iter()
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if users.is_empty() {
            return Ok(Vec::new());
        }

        self.handle
            .run("get_rooms_for_members", move |conn| {
                let room_ids = memberships::table
                    .filter(memberships::rc_user_id.eq_any(&users))
                    .select(memberships::rc_room_id)
                    .load::<String>(conn)
                    .map_err(query_error)?;
                Ok(rooms_with_full_tally(room_ids, users.len()))
            })
            .await
    }

    async fn count_memberships(&self) -> Result<i64, DatabaseError> {
        self.handle
            .run("count_memberships", |conn| {
                memberships::table
                    .count()
                    .get_result::<i64>(conn)
                    .map_err(query_error)
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::{escape_like, rooms_with_full_tally};

    fn ids(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn full_tally_keeps_rooms_shared_by_every_member() {
        let rows = ids(&["r1", "r2", "r1", "r3", "r3"]);
        assert_eq!(rooms_with_full_tally(rows, 2), ids(&["r1", "r3"]));
    }

    #[test]
    fn full_tally_with_single_member_returns_all_rooms() {
        let rows = ids(&["r2", "r1"]);
        assert_eq!(rooms_with_full_tally(rows, 1), ids(&["r1", "r2"]));
    }

    #[test]
    fn like_wildcards_are_escaped() {
        assert_eq!(escape_like("a_b%c\\d"), "a\\_b\\%c\\\\d");
        assert_eq!(escape_like("alice"), "alice");
    }
}
