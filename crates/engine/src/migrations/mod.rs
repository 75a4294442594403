//! Migration replay
//!
//! After the tables are dropped, a [`MigrationReplayer`] rebuilds the schema.
//! Two implementations ship with the engine: one applies `.sql` migration
//! files directly, the other runs an external migration command.

pub mod command;
pub mod definitions;
pub mod manager;
pub mod replayer;

pub use command::CommandMigrationReplayer;
pub use definitions::{Migration, MigrationConfig, ReplaySummary};
pub use manager::MigrationManager;
pub use replayer::SqlMigrationReplayer;

use async_trait::async_trait;

use crate::backends::DatabaseConnection;
use crate::descriptor::ConnectionDescriptor;
use crate::error::EngineResult;

/// Rebuilds the schema from its declared definitions.
///
/// Must be safe against an empty schema and idempotent. Invoked exactly once
/// per reset, on the same session that dropped the tables.
#[async_trait]
pub trait MigrationReplayer: Send + Sync {
    async fn replay(
        &self,
        descriptor: &ConnectionDescriptor,
        conn: &mut dyn DatabaseConnection,
    ) -> EngineResult<ReplaySummary>;
}
