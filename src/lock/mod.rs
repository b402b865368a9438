// Cluster-wide execution lock with a lease
//
// A lock row stays held until its holder releases it or `locked_until` passes,
// so a crashed instance can never block the job for longer than one lease.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use sqlx::PgPool;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{AppError, AppResult};

/// Proof of holding a named lock until `locked_until`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockToken {
    pub name: String,
    pub holder: Uuid,
    pub locked_until: DateTime<Utc>,
}

#[async_trait]
pub trait LockService: Send + Sync {
    /// `Ok(None)` when another holder's lease is still live
    async fn acquire(&self, name: &str, lease: Duration) -> AppResult<Option<LockToken>>;

    /// Ends the lease early. Releasing a lock that was already taken over is a no-op.
    async fn release(&self, token: &LockToken) -> AppResult<()>;
}

fn lease_delta(lease: Duration) -> AppResult<chrono::Duration> {
    chrono::Duration::from_std(lease)
        .map_err(|e| AppError::Config(format!("Invalid lock lease {:?}: {}", lease, e)))
}

/// `scheduler_locks` table, one row per job name
pub struct PgLockService {
    pool: PgPool,
    /// Identifies this instance in `locked_by`
    instance: String,
}

impl PgLockService {
    pub fn new(pool: PgPool, instance: String) -> Self {
        Self { pool, instance }
    }
}

#[async_trait]
impl LockService for PgLockService {
    async fn acquire(&self, name: &str, lease: Duration) -> AppResult<Option<LockToken>> {
        let holder = Uuid::new_v4();
        // validates the lease range before it reaches the database
        lease_delta(lease)?;

        // Insert a fresh row, or take over one whose lease has run out.
        // Lease times come from the database clock, same as release.
        let acquired: Option<(String, DateTime<Utc>)> = sqlx::query_as(
            r#"
            INSERT INTO scheduler_locks (name, locked_until, locked_at, locked_by, holder)
            VALUES ($1, NOW() + make_interval(secs => $2), NOW(), $3, $4)
            ON CONFLICT (name) DO UPDATE
            SET locked_until = EXCLUDED.locked_until,
                locked_at = EXCLUDED.locked_at,
                locked_by = EXCLUDED.locked_by,
                holder = EXCLUDED.holder
            WHERE scheduler_locks.locked_until <= EXCLUDED.locked_at
            RETURNING name, locked_until
            "#,
        )
        .bind(name)
        .bind(lease.as_secs_f64())
        .bind(&self.instance)
        .bind(holder)
        .fetch_optional(&self.pool)
        .await?;

        Ok(acquired.map(|(name, locked_until)| LockToken {
            name,
            holder,
            locked_until,
        }))
    }

    async fn release(&self, token: &LockToken) -> AppResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE scheduler_locks
            SET locked_until = NOW()
            WHERE name = $1 AND holder = $2
            "#,
        )
        .bind(&token.name)
        .bind(token.holder)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            warn!(
                "⚠️ Lock {} was no longer held by {} at release",
                token.name, token.holder
            );
        }
        Ok(())
    }
}

/// Process-local lock with the same lease semantics, for single-node runs and tests
#[derive(Debug, Default)]
pub struct InMemoryLockService {
    held: Mutex<HashMap<String, (Uuid, DateTime<Utc>)>>,
}

impl InMemoryLockService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_held(&self, name: &str) -> bool {
        self.held
            .lock()
            .get(name)
            .map(|(_, until)| *until > Utc::now())
            .unwrap_or(false)
    }
}

#[async_trait]
impl LockService for InMemoryLockService {
    async fn acquire(&self, name: &str, lease: Duration) -> AppResult<Option<LockToken>> {
        let now = Utc::now();
        let mut held = self.held.lock();

        if let Some((_, until)) = held.get(name) {
            if *until > now {
                debug!("Lock {} busy until {}", name, until);
                return Ok(None);
            }
        }

        let token = LockToken {
            name: name.to_string(),
            holder: Uuid::new_v4(),
            locked_until: now + lease_delta(lease)?,
        };
        held.insert(name.to_string(), (token.holder, token.locked_until));
        Ok(Some(token))
    }

    async fn release(&self, token: &LockToken) -> AppResult<()> {
        let mut held = self.held.lock();
        if matches!(held.get(&token.name), Some((holder, _)) if *holder == token.holder) {
            held.remove(&token.name);
        }
        Ok(())
    }
}
