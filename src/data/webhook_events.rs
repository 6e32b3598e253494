//! Idempotency ledger for payment webhooks.

use sqlx::PgPool;

/// Record an event id. Returns `false` if it was already processed.
///
/// Insert-first (rather than check-then-insert) so two concurrent deliveries
/// of the same event cannot both proceed.
pub async fn record(pool: &PgPool, event_id: &str, event_type: &str) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "INSERT INTO processed_webhook_events (event_id, event_type) VALUES ($1, $2) ON CONFLICT DO NOTHING",
    )
    .bind(event_id)
    .bind(event_type)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Drop an event id so a failed delivery can be retried by the sender.
pub async fn forget(pool: &PgPool, event_id: &str) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM processed_webhook_events WHERE event_id = $1")
        .bind(event_id)
        .execute(pool)
        .await?;
    Ok(())
}
