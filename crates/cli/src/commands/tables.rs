use console::style;

use dbfresh_engine::{
    adapter_for, enumerate_tables, DatabaseBackendRegistry, DatabasePool, DatabasePoolConfig,
};

use super::Context;

pub async fn run(ctx: Context) -> anyhow::Result<i32> {
    let dialect = adapter_for(&ctx.descriptor, &ctx.config.postgres_schema)?;
    let pool = DatabaseBackendRegistry::with_defaults()
        .create_pool(&ctx.descriptor, &DatabasePoolConfig::default())
        .await?;

    let listed = match pool.acquire().await {
        Ok(mut conn) => enumerate_tables(conn.as_mut(), dialect.as_ref()).await,
        Err(e) => Err(e),
    };
    pool.close().await;
    let tables = listed?;

    if tables.is_empty() {
        println!("{}", style("No tables; the schema is empty").dim());
        return Ok(0);
    }

    println!("{} table(s) in {}:", tables.len(), style(ctx.descriptor.database()).bold());
    for table in &tables {
        println!("  {}", table);
    }
    Ok(0)
}
