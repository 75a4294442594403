//! Default account provisioning

use std::sync::Arc;

use async_trait::async_trait;

use dbfresh_core::AccountConfig;

use super::{PostStep, PostStepOutcome};
use crate::backends::DatabaseConnection;
use crate::dialect::DialectAdapter;
use crate::error::EngineResult;

/// Makes sure the default account exists. Only mutates when it is absent.
#[async_trait]
pub trait AccountProvisioner: Send + Sync {
    /// Returns `true` when the account was created
    async fn ensure_default_account(
        &self,
        conn: &mut dyn DatabaseConnection,
        dialect: &dyn DialectAdapter,
    ) -> EngineResult<bool>;
}

/// Inserts a configured row when no row with the same identity exists
#[derive(Debug, Clone)]
pub struct SqlAccountProvisioner {
    config: AccountConfig,
}

impl SqlAccountProvisioner {
    pub fn new(config: AccountConfig) -> Self {
        Self { config }
    }

    fn literal(value: &str) -> String {
        format!("'{}'", value.replace('\'', "''"))
    }

    fn exists_sql(&self, dialect: &dyn DialectAdapter) -> String {
        format!(
            "SELECT COUNT(*) FROM {} WHERE {} = {}",
            dialect.quote_identifier(&self.config.table),
            dialect.quote_identifier(&self.config.identity_column),
            Self::literal(&self.config.identity)
        )
    }

    fn insert_sql(&self, dialect: &dyn DialectAdapter) -> String {
        let mut columns = vec![dialect.quote_identifier(&self.config.identity_column)];
        let mut values = vec![Self::literal(&self.config.identity)];

        for (column, value) in &self.config.columns {
            columns.push(dialect.quote_identifier(column));
            values.push(Self::literal(value));
        }

        format!(
            "INSERT INTO {} ({}) VALUES ({})",
            dialect.quote_identifier(&self.config.table),
            columns.join(", "),
            values.join(", ")
        )
    }
}

#[async_trait]
impl AccountProvisioner for SqlAccountProvisioner {
    async fn ensure_default_account(
        &self,
        conn: &mut dyn DatabaseConnection,
        dialect: &dyn DialectAdapter,
    ) -> EngineResult<bool> {
        let existing = conn.fetch_scalar_i64(&self.exists_sql(dialect)).await?.unwrap_or(0);
        if existing > 0 {
            return Ok(false);
        }

        conn.execute(&self.insert_sql(dialect)).await?;
        tracing::info!(table = %self.config.table, identity = %self.config.identity, "Created default account");
        Ok(true)
    }
}

/// Post step wrapper around an [`AccountProvisioner`]
pub struct ProvisionAccountStep {
    provisioner: Arc<dyn AccountProvisioner>,
}

impl ProvisionAccountStep {
    pub const NAME: &'static str = "default_account";

    pub fn new(provisioner: Arc<dyn AccountProvisioner>) -> Self {
        Self { provisioner }
    }
}

#[async_trait]
impl PostStep for ProvisionAccountStep {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn run(
        &self,
        conn: &mut dyn DatabaseConnection,
        dialect: &dyn DialectAdapter,
    ) -> EngineResult<PostStepOutcome> {
        if self.provisioner.ensure_default_account(conn, dialect).await? {
            Ok(PostStepOutcome::Completed("default account created".to_string()))
        } else {
            Ok(PostStepOutcome::Skipped("default account already exists".to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::DatabaseValue;
    use crate::dialect::PostgresDialect;
    use crate::fake::{FakeDatabase, FakeScript};
    use std::collections::BTreeMap;

    fn provisioner() -> SqlAccountProvisioner {
        SqlAccountProvisioner::new(AccountConfig {
            table: "users".to_string(),
            identity_column: "email".to_string(),
            identity: "admin@example.com".to_string(),
            columns: BTreeMap::from([("role".to_string(), "admin".to_string())]),
        })
    }

    #[tokio::test]
    async fn test_creates_missing_account() {
        let db = FakeDatabase::with_tables(&["users"]);
        let mut conn = db.connection();

        let created = provisioner()
            .ensure_default_account(&mut conn, &PostgresDialect::default())
            .await
            .unwrap();

        assert!(created);
        assert_eq!(
            db.statements(),
            vec![r#"INSERT INTO "users" ("email", "role") VALUES ('admin@example.com', 'admin')"#]
        );
    }

    #[tokio::test]
    async fn test_existing_account_is_left_alone() {
        let db = FakeDatabase::with_script(FakeScript {
            tables: vec!["users".to_string()],
            query_results: vec![(
                "SELECT COUNT(*) FROM \"users\"".to_string(),
                vec![vec![DatabaseValue::Int64(1)]],
            )],
            ..FakeScript::default()
        });
        let mut conn = db.connection();

        let step = ProvisionAccountStep::new(Arc::new(provisioner()));
        let outcome = step.run(&mut conn, &PostgresDialect::default()).await.unwrap();

        assert!(matches!(outcome, PostStepOutcome::Skipped(_)));
        assert!(db.statements().is_empty());
    }
}
