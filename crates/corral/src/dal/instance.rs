/*
 *  Copyright 2025-2026 Corral Maintainers
 *
 *  Licensed under the Apache License, Version 2.0 (the "License");
 *  you may not use this file except in compliance with the License.
 *  You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 *  Unless required by applicable law or agreed to in writing, software
 *  distributed under the License is distributed on an "AS IS" BASIS,
 *  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  See the License for the specific language governing permissions and
 *  limitations under the License.
 */

//! Instance store.

use super::models::InstanceRow;
use super::DAL;
use crate::database::schema::instances;
use crate::database::universal_types::UniversalTimestamp;
use crate::error::DatabaseError;
use crate::models::instance::{BackupPolicy, Instance, NewInstance};
use diesel::prelude::*;
use std::collections::BTreeMap;

fn encode_limits(limits: &BTreeMap<String, String>) -> Result<String, diesel::result::Error> {
    serde_json::to_string(limits).map_err(|e| diesel::result::Error::SerializationError(Box::new(e)))
}

fn decode_limits(raw: &str) -> Result<BTreeMap<String, String>, diesel::result::Error> {
    serde_json::from_str(raw).map_err(|e| diesel::result::Error::DeserializationError(Box::new(e)))
}

fn instance_not_found(name: &str) -> DatabaseError {
    DatabaseError::NotFound {
        entity: "Instance",
        id: name.to_string(),
    }
}

/// Data access for the `instances` table.
#[derive(Clone)]
pub struct InstanceDAL<'a> {
    dal: &'a DAL,
}

impl<'a> InstanceDAL<'a> {
    pub fn new(dal: &'a DAL) -> Self {
        Self { dal }
    }

    fn new_row(new_instance: NewInstance) -> Result<InstanceRow, DatabaseError> {
        let now = UniversalTimestamp::now().to_naive();
        Ok(InstanceRow {
            limits: serde_json::to_string(&new_instance.limits)?,
            name: new_instance.name,
            image: new_instance.image,
            user_data: new_instance.user_data,
            instance_type: new_instance.instance_type,
            backup_schedule: new_instance.backup.schedule,
            backup_retention: new_instance.backup.retention,
            backup_enabled: new_instance.backup.enabled,
            created_at: now,
            updated_at: now,
        })
    }

    /// Inserts a new instance. Fails if the name is already tracked.
    pub async fn create(&self, new_instance: NewInstance) -> Result<Instance, DatabaseError> {
        let conn = self.dal.database.get_connection().await?;
        let row = Self::new_row(new_instance)?;

        let insert = row.clone();
        conn.interact(move |conn| {
            diesel::insert_into(instances::table)
                .values(&insert)
                .execute(conn)
        })
        .await
        .map_err(|e| DatabaseError::ConnectionPool(e.to_string()))??;

        Instance::try_from(row)
    }

    /// Inserts the instance, or overwrites the definition of an existing row
    /// with the same name while keeping its creation time.
    pub async fn upsert(&self, new_instance: NewInstance) -> Result<Instance, DatabaseError> {
        let conn = self.dal.database.get_connection().await?;
        let row = Self::new_row(new_instance)?;

        let stored: InstanceRow = conn
            .interact(move |conn| {
                conn.transaction::<_, diesel::result::Error, _>(|conn| {
                    let updated = diesel::update(instances::table.find(&row.name))
                        .set((
                            instances::image.eq(&row.image),
                            instances::limits.eq(&row.limits),
                            instances::user_data.eq(&row.user_data),
                            instances::instance_type.eq(&row.instance_type),
                            instances::updated_at.eq(row.updated_at),
                        ))
                        .execute(conn)?;

                    if updated == 0 {
                        diesel::insert_into(instances::table)
                            .values(&row)
                            .execute(conn)?;
                    }

                    instances::table
                        .find(&row.name)
                        .select(InstanceRow::as_select())
                        .first(conn)
                })
            })
            .await
            .map_err(|e| DatabaseError::ConnectionPool(e.to_string()))??;

        Instance::try_from(stored)
    }

    pub async fn get(&self, name: &str) -> Result<Option<Instance>, DatabaseError> {
        let conn = self.dal.database.get_connection().await?;
        let name = name.to_string();

        let row: Option<InstanceRow> = conn
            .interact(move |conn| {
                instances::table
                    .find(name)
                    .select(InstanceRow::as_select())
                    .first(conn)
                    .optional()
            })
            .await
            .map_err(|e| DatabaseError::ConnectionPool(e.to_string()))??;

        row.map(Instance::try_from).transpose()
    }

    pub async fn exists(&self, name: &str) -> Result<bool, DatabaseError> {
        let conn = self.dal.database.get_connection().await?;
        let name = name.to_string();

        let exists = conn
            .interact(move |conn| {
                diesel::select(diesel::dsl::exists(instances::table.find(name))).get_result(conn)
            })
            .await
            .map_err(|e| DatabaseError::ConnectionPool(e.to_string()))??;

        Ok(exists)
    }

    /// All tracked instances ordered by name.
    pub async fn list(&self) -> Result<Vec<Instance>, DatabaseError> {
        let conn = self.dal.database.get_connection().await?;

        let rows: Vec<InstanceRow> = conn
            .interact(move |conn| {
                instances::table
                    .order(instances::name.asc())
                    .select(InstanceRow::as_select())
                    .load(conn)
            })
            .await
            .map_err(|e| DatabaseError::ConnectionPool(e.to_string()))??;

        rows.into_iter().map(Instance::try_from).collect()
    }

    /// Replaces the limits map of an instance.
    pub async fn update_limits(
        &self,
        name: &str,
        limits: &BTreeMap<String, String>,
    ) -> Result<(), DatabaseError> {
        let conn = self.dal.database.get_connection().await?;
        let encoded = serde_json::to_string(limits)?;
        let key = name.to_string();
        let now = UniversalTimestamp::now().to_naive();

        let updated = conn
            .interact(move |conn| {
                diesel::update(instances::table.find(key))
                    .set((instances::limits.eq(encoded), instances::updated_at.eq(now)))
                    .execute(conn)
            })
            .await
            .map_err(|e| DatabaseError::ConnectionPool(e.to_string()))??;

        if updated == 0 {
            return Err(instance_not_found(name));
        }
        Ok(())
    }

    /// Merges `changes` into the stored limits map in one transaction and
    /// returns the updated instance.
    pub async fn merge_limits(
        &self,
        name: &str,
        changes: BTreeMap<String, String>,
    ) -> Result<Instance, DatabaseError> {
        let conn = self.dal.database.get_connection().await?;
        let key = name.to_string();
        let now = UniversalTimestamp::now().to_naive();

        let row: Option<InstanceRow> = conn
            .interact(move |conn| {
                conn.transaction::<_, diesel::result::Error, _>(|conn| {
                    let current: Option<String> = instances::table
                        .find(&key)
                        .select(instances::limits)
                        .first(conn)
                        .optional()?;
                    let Some(current) = current else {
                        return Ok(None);
                    };

                    let mut limits = decode_limits(&current)?;
                    limits.extend(changes);

                    diesel::update(instances::table.find(&key))
                        .set((
                            instances::limits.eq(encode_limits(&limits)?),
                            instances::updated_at.eq(now),
                        ))
                        .execute(conn)?;

                    instances::table
                        .find(&key)
                        .select(InstanceRow::as_select())
                        .first(conn)
                        .map(Some)
                })
            })
            .await
            .map_err(|e| DatabaseError::ConnectionPool(e.to_string()))??;

        match row {
            Some(row) => Instance::try_from(row),
            None => Err(instance_not_found(name)),
        }
    }

    pub async fn update_backup_policy(
        &self,
        name: &str,
        policy: &BackupPolicy,
    ) -> Result<(), DatabaseError> {
        let conn = self.dal.database.get_connection().await?;
        let key = name.to_string();
        let policy = policy.clone();
        let now = UniversalTimestamp::now().to_naive();

        let updated = conn
            .interact(move |conn| {
                diesel::update(instances::table.find(key))
                    .set((
                        instances::backup_schedule.eq(policy.schedule),
                        instances::backup_retention.eq(policy.retention),
                        instances::backup_enabled.eq(policy.enabled),
                        instances::updated_at.eq(now),
                    ))
                    .execute(conn)
            })
            .await
            .map_err(|e| DatabaseError::ConnectionPool(e.to_string()))??;

        if updated == 0 {
            return Err(instance_not_found(name));
        }
        Ok(())
    }

    /// Removes an instance row. Returns whether a row was deleted.
    pub async fn delete(&self, name: &str) -> Result<bool, DatabaseError> {
        let conn = self.dal.database.get_connection().await?;
        let key = name.to_string();

        let deleted = conn
            .interact(move |conn| diesel::delete(instances::table.find(key)).execute(conn))
            .await
            .map_err(|e| DatabaseError::ConnectionPool(e.to_string()))??;

        Ok(deleted > 0)
    }
}
