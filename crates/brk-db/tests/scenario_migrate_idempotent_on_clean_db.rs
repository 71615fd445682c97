/// Migrating twice must be a no-op the second time.
///
/// DB-backed test, skipped if BRK_DATABASE_URL is not set.
#[tokio::test]
async fn migrate_idempotent_on_clean_db() -> anyhow::Result<()> {
    let url = match std::env::var(brk_db::ENV_DB_URL) {
        Ok(v) => v,
        Err(_) => {
            eprintln!("SKIP: BRK_DATABASE_URL not set");
            return Ok(());
        }
    };

    let pool = brk_db::connect(&url, 2).await?;
    brk_db::migrate(&pool).await?;
    brk_db::migrate(&pool).await?;

    let st = brk_db::status(&pool).await?;
    assert!(st.ok);
    assert!(st.has_trades_table);
    Ok(())
}
