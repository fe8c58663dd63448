use anyhow::{Context, Result};
use futures::future::BoxFuture;
use tracing::{debug, info};

/// Versioned schema steps for one catalog backend.
///
/// Each step is applied at most once; the applied version is recorded in
/// `schema_migrations` after the step succeeds.
pub trait CatalogMigrations {
    type Pool;

    fn ensure_migrations_table(pool: &Self::Pool) -> BoxFuture<'_, Result<()>>;
    fn current_version(pool: &Self::Pool) -> BoxFuture<'_, Result<i64>>;
    fn record_version(pool: &Self::Pool, version: i64) -> BoxFuture<'_, Result<()>>;

    /// Datasets, headers, operations, records, cells and processed-record accounting.
    fn migrate_v1(pool: &Self::Pool) -> BoxFuture<'_, Result<()>>;
}

type MigrationStep<P> = for<'a> fn(&'a P) -> BoxFuture<'a, Result<()>>;

fn schema_steps<M: CatalogMigrations>() -> Vec<(i64, MigrationStep<M::Pool>)> {
    vec![(1, M::migrate_v1)]
}

/// Bring the catalog up to the newest schema this build knows.
///
/// A catalog already past that version was written by a newer build and is
/// refused rather than used with a schema this code does not understand.
pub async fn run_migrations<M: CatalogMigrations>(pool: &M::Pool) -> Result<()> {
    M::ensure_migrations_table(pool).await?;

    let steps = schema_steps::<M>();
    let latest = steps.iter().map(|(version, _)| *version).max().unwrap_or(0);
    let applied = M::current_version(pool).await?;

    if applied > latest {
        anyhow::bail!(
            "catalog schema version {} is newer than the latest supported version {}",
            applied,
            latest
        );
    }
    if applied == latest {
        debug!(version = applied, "Catalog schema is up to date");
        return Ok(());
    }

    for (version, apply) in steps.into_iter().filter(|(version, _)| *version > applied) {
        info!(from = applied, version, "Applying catalog migration");
        apply(pool)
            .await
            .with_context(|| format!("catalog migration to version {} failed", version))?;
        M::record_version(pool, version).await?;
    }

    Ok(())
}
