//! Schema migrations.
//!
//! Statements are applied one at a time. A failure whose SQLSTATE says the
//! object already exists (`duplicate_column`, `duplicate_table`,
//! `duplicate_object`) is logged and skipped. Any other failure aborts the run
//! with `StorageError::MigrationFailed`.

use hearth_core::{HearthError, HearthResult, StorageError};
use tokio_postgres::error::SqlState;
use tokio_postgres::Client;

/// A named group of DDL statements.
#[derive(Debug, Clone, Copy)]
pub struct Migration {
    pub name: &'static str,
    pub statements: &'static [&'static str],
}

/// Ordered list of every migration.
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        name: "0001_create_suggestions",
        statements: &[r#"
            CREATE TABLE suggestions (
                id UUID PRIMARY KEY,
                pattern JSONB NOT NULL,
                automation_id TEXT NOT NULL,
                description_only TEXT NOT NULL DEFAULT '',
                phase TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL
            )
        "#],
    },
    Migration {
        name: "0002_conversational_refinement",
        statements: &[
            "ALTER TABLE suggestions ADD COLUMN conversation_history JSONB NOT NULL DEFAULT '[]'::jsonb",
            "ALTER TABLE suggestions ADD COLUMN device_capabilities JSONB NOT NULL DEFAULT '{\"devices\": []}'::jsonb",
            "ALTER TABLE suggestions ADD COLUMN refinement_count INTEGER NOT NULL DEFAULT 0",
            "ALTER TABLE suggestions ADD COLUMN description_generated_at TIMESTAMPTZ",
            "ALTER TABLE suggestions ADD COLUMN approved_at TIMESTAMPTZ",
        ],
    },
    Migration {
        name: "0003_automation_compilation",
        statements: &[
            "ALTER TABLE suggestions ADD COLUMN automation_yaml TEXT",
            "ALTER TABLE suggestions ADD COLUMN yaml_generated_at TIMESTAMPTZ",
            "ALTER TABLE suggestions ADD COLUMN safety_score INTEGER",
            "ALTER TABLE suggestions ADD COLUMN safety_issues JSONB NOT NULL DEFAULT '[]'::jsonb",
            "ALTER TABLE suggestions ADD COLUMN deployed_version_id UUID",
            "ALTER TABLE suggestions ADD COLUMN failure JSONB",
            "CREATE INDEX idx_suggestions_phase ON suggestions (phase, created_at)",
        ],
    },
    Migration {
        name: "0004_automation_versions",
        statements: &[
            r#"
            CREATE TABLE automation_versions (
                id UUID PRIMARY KEY,
                automation_id TEXT NOT NULL,
                version_number INTEGER NOT NULL,
                definition_text TEXT NOT NULL,
                content_hash TEXT NOT NULL,
                safety_score INTEGER NOT NULL,
                suggestion_id UUID,
                deployed_at TIMESTAMPTZ NOT NULL,
                CONSTRAINT uq_automation_version UNIQUE (automation_id, version_number)
            )
            "#,
            "CREATE INDEX idx_automation_versions_automation_id ON automation_versions (automation_id)",
            r#"
            CREATE TABLE automation_active_versions (
                automation_id TEXT PRIMARY KEY,
                version_id UUID NOT NULL REFERENCES automation_versions (id)
            )
            "#,
        ],
    },
];

/// What happened while running migrations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    /// Statements that executed
    pub applied: usize,
    /// Statements skipped because their object already existed
    pub already_present: usize,
}

/// Whether a SQLSTATE means the object a DDL statement creates is already there.
pub fn is_already_exists(code: &SqlState) -> bool {
    *code == SqlState::DUPLICATE_COLUMN
        || *code == SqlState::DUPLICATE_TABLE
        || *code == SqlState::DUPLICATE_OBJECT
}

/// Apply every migration in order.
pub async fn run_migrations(client: &Client) -> HearthResult<MigrationReport> {
    let mut report = MigrationReport::default();

    for migration in MIGRATIONS {
        for (index, statement) in migration.statements.iter().enumerate() {
            match client.batch_execute(statement).await {
                Ok(()) => report.applied += 1,
                Err(e) => {
                    let already_exists = e.code().is_some_and(is_already_exists);
                    if already_exists {
                        tracing::debug!(
                            migration = migration.name,
                            statement = index,
                            "Migration object already exists, skipping"
                        );
                        report.already_present += 1;
                    } else {
                        tracing::error!(
                            migration = migration.name,
                            statement = index,
                            error = %e,
                            "Migration failed"
                        );
                        return Err(HearthError::Storage(StorageError::MigrationFailed {
                            migration: migration.name.to_string(),
                            reason: e.to_string(),
                        }));
                    }
                }
            }
        }
    }

    tracing::info!(
        applied = report.applied,
        already_present = report.already_present,
        "Migrations complete"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_already_exists_classification() {
        assert!(is_already_exists(&SqlState::DUPLICATE_COLUMN));
        assert!(is_already_exists(&SqlState::DUPLICATE_TABLE));
        assert!(is_already_exists(&SqlState::DUPLICATE_OBJECT));

        assert!(!is_already_exists(&SqlState::UNDEFINED_TABLE));
        assert!(!is_already_exists(&SqlState::INSUFFICIENT_PRIVILEGE));
        assert!(!is_already_exists(&SqlState::SYNTAX_ERROR));
        assert!(!is_already_exists(&SqlState::UNIQUE_VIOLATION));
    }

    #[test]
    fn test_migration_names_are_ordered_and_unique() {
        let names: Vec<&str> = MIGRATIONS.iter().map(|m| m.name).collect();
        let mut sorted = names.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(names, sorted);
        assert!(MIGRATIONS.iter().all(|m| !m.statements.is_empty()));
    }
}
