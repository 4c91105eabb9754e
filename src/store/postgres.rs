use async_trait::async_trait;
use chrono::{Local, NaiveDate};
use sqlx::PgPool;
use uuid::Uuid;

use super::{local_day_bounds, DueToday, SubscriptionStore, TaskDirectory};
use crate::models::subscription::{NewSubscription, Subscription};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run pending migrations from the migrations/ directory.
    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl SubscriptionStore for PgStore {
    async fn list(&self, user_id: Uuid) -> anyhow::Result<Vec<Subscription>> {
        let rows = sqlx::query_as::<_, Subscription>(
            r#"SELECT id, user_id, endpoint, keys_auth, keys_p256dh, created_at
               FROM subscriptions
               WHERE user_id = $1
               ORDER BY created_at ASC, id ASC"#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn list_user_ids(&self) -> anyhow::Result<Vec<Uuid>> {
        let ids = sqlx::query_scalar::<_, Uuid>(
            "SELECT DISTINCT user_id FROM subscriptions ORDER BY user_id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    async fn upsert(&self, sub: &NewSubscription) -> anyhow::Result<Subscription> {
        let row = sqlx::query_as::<_, Subscription>(
            r#"INSERT INTO subscriptions (user_id, endpoint, keys_auth, keys_p256dh)
               VALUES ($1, $2, $3, $4)
               ON CONFLICT (user_id, endpoint) DO UPDATE
                   SET keys_auth   = EXCLUDED.keys_auth,
                       keys_p256dh = EXCLUDED.keys_p256dh
               RETURNING id, user_id, endpoint, keys_auth, keys_p256dh, created_at"#,
        )
        .bind(sub.user_id)
        .bind(&sub.endpoint)
        .bind(&sub.keys_auth)
        .bind(&sub.keys_p256dh)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn delete(&self, user_id: Uuid, endpoint: &str) -> anyhow::Result<bool> {
        let result = sqlx::query("DELETE FROM subscriptions WHERE user_id = $1 AND endpoint = $2")
            .bind(user_id)
            .bind(endpoint)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl TaskDirectory for PgStore {
    async fn due_today(&self, user_id: Uuid, today: NaiveDate) -> anyhow::Result<DueToday> {
        let (start, end) = local_day_bounds(&Local, today);
        let (count, sample_title) = sqlx::query_as::<_, (i64, Option<String>)>(
            r#"
            SELECT
                COUNT(*) AS due,
                (ARRAY_AGG(t.title ORDER BY t.created_at ASC))[1] AS sample_title
            FROM tasks t
            JOIN groups g ON t.group_id = g.id
            WHERE g.user_id = $1
              AND t.is_completed = false
              AND t.reminder_enabled = true
              AND t.due_date >= $2
              AND t.due_date < $3
            "#,
        )
        .bind(user_id)
        .bind(start)
        .bind(end)
        .fetch_one(&self.pool)
        .await?;

        Ok(DueToday {
            count,
            sample_title,
        })
    }
}
