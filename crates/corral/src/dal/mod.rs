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

//! Data access layer.
//!
//! `DAL` wraps the shared [`Database`] and hands out short-lived accessors
//! per entity, e.g. `dal.job().create(..)`. Every accessor checks a
//! connection out of the pool, runs its statements inside `interact` and
//! returns it before the method returns, so accessors never hold a
//! connection across an await on another accessor.

pub mod instance;
pub mod job;
pub mod models;
pub mod network;

pub use instance::InstanceDAL;
pub use job::JobDAL;
pub use network::{NetworkDAL, NetworkDeletion};

use crate::database::Database;

#[derive(Clone, Debug)]
pub struct DAL {
    pub(crate) database: Database,
}

impl DAL {
    pub fn new(database: Database) -> Self {
        Self { database }
    }

    pub fn database(&self) -> &Database {
        &self.database
    }

    pub fn job(&self) -> JobDAL<'_> {
        JobDAL::new(self)
    }

    pub fn instance(&self) -> InstanceDAL<'_> {
        InstanceDAL::new(self)
    }

    pub fn network(&self) -> NetworkDAL<'_> {
        NetworkDAL::new(self)
    }
}
