use anyhow::bail;
use sea_orm_migration::MigratorTrait;
use storefront_api::{config::AppConfig, db::create_orm_conn, migration::Migrator};

/// `migrate [up|down|fresh|status]`, `up` when no argument is given.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,sea_orm_migration=info".into()),
        )
        .init();

    let config = AppConfig::from_env()?;
    let orm = create_orm_conn(&config.database_url).await?;

    let command = std::env::args().nth(1).unwrap_or_else(|| "up".to_string());
    match command.as_str() {
        "up" => Migrator::up(&orm, None).await?,
        "down" => Migrator::down(&orm, None).await?,
        "fresh" => Migrator::fresh(&orm).await?,
        "status" => Migrator::status(&orm).await?,
        other => bail!("unknown command `{other}`, expected up, down, fresh or status"),
    }
    println!("Migration command `{command}` finished");
    Ok(())
}
