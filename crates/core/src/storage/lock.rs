use crate::domain::transaction::UserId;
use anyhow::Context;
use sqlx::PgConnection;

// Two namespaces so the worker's session lock never waits on the store's
// transaction-scoped lock for the same user.
const MUTATION_NAMESPACE: i64 = 0x4649_4E56_4D55; // "FINVMU"
const SYNC_NAMESPACE: i64 = 0x4649_4E56_5359; // "FINVSY"

fn user_hash(user: &UserId) -> i64 {
    // FNV-1a; stable across processes, unlike `DefaultHasher`.
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in user.as_str().bytes() {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    hash as i64
}

pub fn mutation_lock_key(user: &UserId) -> i64 {
    MUTATION_NAMESPACE ^ user_hash(user)
}

pub fn sync_lock_key(user: &UserId) -> i64 {
    SYNC_NAMESPACE ^ user_hash(user)
}

/// Serialises mutations for one user until the surrounding SQL transaction ends.
pub async fn lock_user_for_mutation(conn: &mut PgConnection, user: &UserId) -> anyhow::Result<()> {
    let key = mutation_lock_key(user);
    sqlx::query("SELECT pg_advisory_xact_lock($1)")
        .persistent(false)
        .bind(key)
        .execute(conn)
        .await
        .with_context(|| format!("failed to take mutation lock (key={key})"))?;
    Ok(())
}

// Session-scoped: acquire and release on the same connection.
pub async fn try_acquire_sync_lock(conn: &mut PgConnection, user: &UserId) -> anyhow::Result<bool> {
    let key = sync_lock_key(user);
    let acquired: (bool,) = sqlx::query_as("SELECT pg_try_advisory_lock($1)")
        .persistent(false)
        .bind(key)
        .fetch_one(conn)
        .await
        .with_context(|| format!("failed to acquire sync lock (key={key})"))?;
    Ok(acquired.0)
}

pub async fn release_sync_lock(conn: &mut PgConnection, user: &UserId) -> anyhow::Result<()> {
    let key = sync_lock_key(user);
    sqlx::query("SELECT pg_advisory_unlock($1)")
        .persistent(false)
        .bind(key)
        .execute(conn)
        .await
        .with_context(|| format!("failed to release sync lock (key={key})"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_stable_and_namespaced() {
        let user = UserId::new("user_2abc").unwrap();
        assert_eq!(mutation_lock_key(&user), mutation_lock_key(&user));
        assert_ne!(mutation_lock_key(&user), sync_lock_key(&user));

        let other = UserId::new("user_2abd").unwrap();
        assert_ne!(mutation_lock_key(&user), mutation_lock_key(&other));
    }
}
