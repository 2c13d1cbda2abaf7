use anyhow::Result;
use sqlx::PgPool;
use tracing::{info, warn};

/// Ordered list of embedded migrations. New files are appended, never reordered.
const MIGRATIONS: &[(&str, &str)] = &[
    ("0001_accounts", include_str!("sql/0001_accounts.sql")),
    ("0002_cameras", include_str!("sql/0002_cameras.sql")),
    ("0003_incidents", include_str!("sql/0003_incidents.sql")),
    ("0004_jobs", include_str!("sql/0004_jobs.sql")),
    ("0005_alerts", include_str!("sql/0005_alerts.sql")),
    ("0006_reports", include_str!("sql/0006_reports.sql")),
    (
        "0007_evidence_and_camera_health",
        include_str!("sql/0007_evidence_and_camera_health.sql"),
    ),
];

/// Apply every migration that has not been recorded in `schema_migrations`
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    sqlx::raw_sql(
        r#"
        CREATE TABLE IF NOT EXISTS schema_migrations (
            name TEXT PRIMARY KEY,
            applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    )
    .execute(pool)
    .await?;

    for (name, sql) in MIGRATIONS {
        let applied: Option<String> =
            sqlx::query_scalar("SELECT name FROM schema_migrations WHERE name = $1")
                .bind(name)
                .fetch_optional(pool)
                .await?;

        if applied.is_some() {
            continue;
        }

        let mut tx = pool.begin().await?;
        sqlx::raw_sql(sql).execute(&mut *tx).await?;
        sqlx::query("INSERT INTO schema_migrations (name) VALUES ($1)")
            .bind(name)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        info!("Applied migration: {}", name);
    }

    create_default_admin(pool).await?;

    Ok(())
}

/// Names of the embedded migrations in application order
pub fn migration_names() -> Vec<&'static str> {
    MIGRATIONS.iter().map(|(name, _)| *name).collect()
}

/// Create default admin user if no users exist
async fn create_default_admin(pool: &PgPool) -> Result<()> {
    let user_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
        .fetch_one(pool)
        .await?;

    if user_count == 0 {
        let password_hash = bcrypt::hash("admin", 10)?;
        let now = chrono::Utc::now();

        sqlx::query(
            r#"
            INSERT INTO users (id, email, password_hash, first_name, last_name, role,
                               email_verified, active, created_at, updated_at)
            VALUES ($1, 'admin@localhost', $2, 'System', 'Administrator', 'admin', true, true, $3, $3)
            "#,
        )
        .bind(uuid::Uuid::new_v4())
        .bind(password_hash)
        .bind(now)
        .execute(pool)
        .await?;

        warn!("Created default admin user admin@localhost; change its password immediately!");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_are_numbered_in_order() {
        let names = migration_names();
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(names, sorted);
        assert!(names.iter().all(|name| name.split('_').next().unwrap().parse::<u32>().is_ok()));
    }

    #[test]
    fn tables_are_created_before_they_are_referenced() {
        // (migration index, byte offset) of the first occurrence
        let position = |needle: &str| {
            MIGRATIONS
                .iter()
                .enumerate()
                .find_map(|(index, (_, sql))| sql.find(needle).map(|offset| (index, offset)))
                .unwrap_or((usize::MAX, usize::MAX))
        };

        for table in [
            "users",
            "locations",
            "cameras",
            "incidents",
            "video_processing_jobs",
            "camera_groups",
        ] {
            let created = position(&format!("CREATE TABLE {}", table));
            let referenced = position(&format!("REFERENCES {}(id)", table));
            assert!(created.0 != usize::MAX, "{} is never created", table);
            assert!(created < referenced, "{} is referenced before it is created", table);
        }
    }
}
