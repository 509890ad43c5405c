use anyhow::Result;
use sqlx::SqlitePool;

/// Create the vector and chunk-text tables. Idempotent.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    // One row per indexed chunk. `id` is the composite datapoint id, which
    // is only unique within a tenant.
    sqlx::query(&chunk_vectors_ddl("chunk_vectors"))
        .execute(pool)
        .await?;
    rekey_legacy_vectors(pool).await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunk_texts (
            tenant_id TEXT NOT NULL,
            doc_id TEXT NOT NULL,
            chunk_id TEXT NOT NULL,
            page INTEGER NOT NULL,
            checksum TEXT NOT NULL,
            text TEXT NOT NULL,
            PRIMARY KEY (tenant_id, doc_id, chunk_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunk_vectors_tenant ON chunk_vectors(tenant_id)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_chunk_vectors_tenant_doc ON chunk_vectors(tenant_id, doc_id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

fn chunk_vectors_ddl(table: &str) -> String {
    format!(
        r#"
        CREATE TABLE IF NOT EXISTS {table} (
            id TEXT NOT NULL,
            tenant_id TEXT NOT NULL,
            doc_id TEXT NOT NULL,
            chunk_id TEXT NOT NULL,
            metadata_json TEXT NOT NULL DEFAULT '{{}}',
            dims INTEGER NOT NULL,
            embedding BLOB NOT NULL,
            updated_at INTEGER NOT NULL,
            PRIMARY KEY (tenant_id, id)
        )
        "#
    )
}

/// Databases created before vectors were keyed per tenant have `id` as the
/// sole primary key. Rebuild that table in place with the composite key.
async fn rekey_legacy_vectors(pool: &SqlitePool) -> Result<()> {
    let pk_columns: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM pragma_table_info('chunk_vectors') WHERE pk > 0",
    )
    .fetch_one(pool)
    .await?;
    if pk_columns != 1 {
        return Ok(());
    }

    let mut tx = pool.begin().await?;
    sqlx::query(&chunk_vectors_ddl("chunk_vectors_rekeyed"))
        .execute(&mut *tx)
        .await?;
    sqlx::query(
        r#"
        INSERT INTO chunk_vectors_rekeyed
            (id, tenant_id, doc_id, chunk_id, metadata_json, dims, embedding, updated_at)
        SELECT id, tenant_id, doc_id, chunk_id, metadata_json, dims, embedding, updated_at
        FROM chunk_vectors
        "#,
    )
    .execute(&mut *tx)
    .await?;
    sqlx::query("DROP TABLE chunk_vectors")
        .execute(&mut *tx)
        .await?;
    sqlx::query("ALTER TABLE chunk_vectors_rekeyed RENAME TO chunk_vectors")
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(())
}
