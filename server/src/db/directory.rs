//! Read-only view of the study group store used by the relay: group lookup
//! (existence and membership) and user lookup (handshake identity).

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;
use sqlx::SqlitePool;
use thiserror::Error;
use tokio::sync::Notify;

use super::models::{GroupRecord, UserRow};
use super::queries;

/// The store could not answer a lookup.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("store unavailable")]
    Unavailable,
}

/// Where group and user records are read from.
#[derive(Clone)]
pub enum Directory {
    Sqlite(SqlitePool),
    Memory(Arc<MemoryDirectory>),
}

impl Directory {
    pub fn memory() -> (Self, Arc<MemoryDirectory>) {
        let store = Arc::new(MemoryDirectory::default());
        (Self::Memory(store.clone()), store)
    }

    /// Look up a group and its current member list.
    pub async fn find_group(&self, group_id: &str) -> Result<Option<GroupRecord>, StoreError> {
        match self {
            Self::Sqlite(pool) => {
                let Some(row) = queries::groups::get_group(pool, group_id).await? else {
                    return Ok(None);
                };
                let member_ids = queries::groups::get_member_ids(pool, group_id).await?;
                Ok(Some(GroupRecord {
                    id: row.id,
                    name: row.name,
                    member_ids,
                }))
            }
            Self::Memory(store) => {
                store.wait_for_release().await;
                store.find_group(group_id)
            }
        }
    }

    /// Look up a user by ID.
    pub async fn find_user(&self, user_id: &str) -> Result<Option<UserRow>, StoreError> {
        match self {
            Self::Sqlite(pool) => Ok(queries::users::get_user(pool, user_id).await?),
            Self::Memory(store) => {
                store.wait_for_release().await;
                store.find_user(user_id)
            }
        }
    }
}

/// In-process store for tests and local demos.
#[derive(Debug, Default)]
pub struct MemoryDirectory {
    groups: DashMap<String, GroupRecord>,
    users: DashMap<String, UserRow>,
    /// When set, every lookup fails with `StoreError::Unavailable`.
    offline: AtomicBool,
    /// When set, lookups wait until `release` is called.
    held: AtomicBool,
    released: Notify,
}

impl MemoryDirectory {
    pub fn insert_user(&self, id: &str, name: &str) {
        self.users.insert(
            id.to_string(),
            UserRow {
                id: id.to_string(),
                name: name.to_string(),
                email: None,
            },
        );
    }

    pub fn insert_group(&self, id: &str, name: &str, member_ids: &[&str]) {
        self.groups.insert(
            id.to_string(),
            GroupRecord {
                id: id.to_string(),
                name: name.to_string(),
                member_ids: member_ids.iter().map(|m| m.to_string()).collect(),
            },
        );
    }

    pub fn remove_group(&self, id: &str) {
        self.groups.remove(id);
    }

    pub fn remove_member(&self, group_id: &str, user_id: &str) {
        if let Some(mut group) = self.groups.get_mut(group_id) {
            group.member_ids.retain(|m| m != user_id);
        }
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Make lookups pend, as a slow store would.
    pub fn hold(&self) {
        self.held.store(true, Ordering::SeqCst);
    }

    pub fn release(&self) {
        self.held.store(false, Ordering::SeqCst);
        self.released.notify_waiters();
    }

    async fn wait_for_release(&self) {
        while self.held.load(Ordering::SeqCst) {
            let released = self.released.notified();
            if !self.held.load(Ordering::SeqCst) {
                break;
            }
            released.await;
        }
    }

    fn check_online(&self) -> Result<(), StoreError> {
        if self.offline.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable)
        } else {
            Ok(())
        }
    }

    fn find_group(&self, group_id: &str) -> Result<Option<GroupRecord>, StoreError> {
        self.check_online()?;
        Ok(self.groups.get(group_id).map(|g| g.clone()))
    }

    fn find_user(&self, user_id: &str) -> Result<Option<UserRow>, StoreError> {
        self.check_online()?;
        Ok(self.users.get(user_id).map(|u| u.clone()))
    }
}
