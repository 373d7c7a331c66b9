//! PostgreSQL storage over a deadpool connection pool.

use crate::migrations::{run_migrations, MigrationReport};
use crate::{expected_next, SuggestionStore, VersionStore};
use async_trait::async_trait;
use deadpool_postgres::{Config, ManagerConfig, Pool, RecyclingMethod, Runtime};
use hearth_core::{
    AutomationVersion, HearthError, HearthResult, StorageError, Suggestion, SuggestionId,
    SuggestionPhase, VersionId,
};
use serde_json::Value as JsonValue;
use std::time::Duration;
use tokio_postgres::{NoTls, Row};

// ============================================================================
// CONNECTION POOL CONFIGURATION
// ============================================================================

/// Database connection pool configuration.
#[derive(Debug, Clone)]
pub struct DbConfig {
    pub host: String,
    pub port: u16,
    pub dbname: String,
    pub user: String,
    pub password: String,
    /// Maximum pool size
    pub max_size: usize,
    /// Wait for a free connection
    pub timeout: Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            dbname: "hearth".to_string(),
            user: "postgres".to_string(),
            password: String::new(),
            max_size: 16,
            timeout: Duration::from_secs(30),
        }
    }
}

impl DbConfig {
    /// Create a database configuration from `HEARTH_DB_*` environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: std::env::var("HEARTH_DB_HOST").unwrap_or(defaults.host),
            port: std::env::var("HEARTH_DB_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.port),
            dbname: std::env::var("HEARTH_DB_NAME").unwrap_or(defaults.dbname),
            user: std::env::var("HEARTH_DB_USER").unwrap_or(defaults.user),
            password: std::env::var("HEARTH_DB_PASSWORD").unwrap_or_default(),
            max_size: std::env::var("HEARTH_DB_POOL_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_size),
            timeout: Duration::from_secs(
                std::env::var("HEARTH_DB_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(defaults.timeout.as_secs()),
            ),
        }
    }

    /// Create a connection pool from this configuration.
    pub fn create_pool(&self) -> HearthResult<Pool> {
        let mut cfg = Config::new();
        cfg.host = Some(self.host.clone());
        cfg.port = Some(self.port);
        cfg.dbname = Some(self.dbname.clone());
        cfg.user = Some(self.user.clone());
        cfg.password = Some(self.password.clone());
        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });
        let mut pool_cfg = deadpool_postgres::PoolConfig::new(self.max_size);
        pool_cfg.timeouts.wait = Some(self.timeout);
        cfg.pool = Some(pool_cfg);

        cfg.create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| database(format!("Failed to create pool: {}", e)))
    }
}

fn database(reason: impl Into<String>) -> HearthError {
    HearthError::Storage(StorageError::Database {
        reason: reason.into(),
    })
}

fn db_error(err: tokio_postgres::Error) -> HearthError {
    tracing::error!(error = ?err, "Database error");
    database(err.to_string())
}

// ============================================================================
// STORE
// ============================================================================

const SUGGESTION_COLUMNS: &str = "id, pattern, automation_id, description_only, phase, \
     conversation_history, device_capabilities, refinement_count, automation_yaml, \
     safety_score, safety_issues, deployed_version_id, failure, description_generated_at, \
     approved_at, yaml_generated_at, created_at, updated_at";

const VERSION_COLUMNS: &str = "id, automation_id, version_number, definition_text, \
     content_hash, safety_score, suggestion_id, deployed_at";

/// Suggestion and version store backed by PostgreSQL.
#[derive(Clone)]
pub struct PgStore {
    pool: Pool,
}

impl PgStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub fn from_config(config: &DbConfig) -> HearthResult<Self> {
        Ok(Self::new(config.create_pool()?))
    }

    /// Get the current pool size for observability.
    pub fn pool_size(&self) -> usize {
        self.pool.status().size
    }

    async fn get_conn(&self) -> HearthResult<deadpool_postgres::Object> {
        self.pool
            .get()
            .await
            .map_err(|e| database(format!("Connection pool error: {}", e)))
    }

    /// Bring the schema up to date.
    pub async fn migrate(&self) -> HearthResult<MigrationReport> {
        let conn = self.get_conn().await?;
        run_migrations(&conn).await
    }
}

impl std::fmt::Debug for PgStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgStore")
            .field("pool_size", &self.pool_size())
            .finish()
    }
}

// ============================================================================
// ROW MAPPING
// ============================================================================

fn to_json<T: serde::Serialize>(value: &T, field: &str) -> HearthResult<JsonValue> {
    serde_json::to_value(value).map_err(|e| database(format!("Failed to encode {}: {}", field, e)))
}

fn from_json<T: serde::de::DeserializeOwned>(value: JsonValue, field: &str) -> HearthResult<T> {
    serde_json::from_value(value).map_err(|e| database(format!("Failed to decode {}: {}", field, e)))
}

fn score_to_u8(value: i32, field: &str) -> HearthResult<u8> {
    u8::try_from(value).map_err(|_| database(format!("{} out of range: {}", field, value)))
}

fn u32_from_i32(value: i32, field: &str) -> HearthResult<u32> {
    u32::try_from(value).map_err(|_| database(format!("{} out of range: {}", field, value)))
}

fn row_to_suggestion(row: &Row) -> HearthResult<Suggestion> {
    let phase_str: String = row.get("phase");
    let phase = SuggestionPhase::from_db_str(&phase_str)
        .map_err(|e| database(format!("Invalid phase column: {}", e)))?;
    let safety_score: Option<i32> = row.get("safety_score");
    let failure: Option<JsonValue> = row.get("failure");

    Ok(Suggestion {
        suggestion_id: row.get("id"),
        pattern: from_json(row.get("pattern"), "pattern")?,
        automation_id: row.get("automation_id"),
        description: row.get("description_only"),
        automation_definition: row.get("automation_yaml"),
        conversation_history: from_json(row.get("conversation_history"), "conversation_history")?,
        device_capability_snapshot: from_json(row.get("device_capabilities"), "device_capabilities")?,
        refinement_count: u32_from_i32(row.get("refinement_count"), "refinement_count")?,
        phase,
        safety_score: safety_score
            .map(|s| score_to_u8(s, "safety_score"))
            .transpose()?,
        safety_issues: from_json(row.get("safety_issues"), "safety_issues")?,
        deployed_version_id: row.get("deployed_version_id"),
        failure: failure.map(|f| from_json(f, "failure")).transpose()?,
        description_generated_at: row.get("description_generated_at"),
        approved_at: row.get("approved_at"),
        yaml_generated_at: row.get("yaml_generated_at"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn row_to_version(row: &Row) -> HearthResult<AutomationVersion> {
    Ok(AutomationVersion {
        version_id: row.get("id"),
        automation_id: row.get("automation_id"),
        version_number: u32_from_i32(row.get("version_number"), "version_number")?,
        definition_text: row.get("definition_text"),
        content_hash: row.get("content_hash"),
        safety_score: score_to_u8(row.get("safety_score"), "safety_score")?,
        suggestion_id: row.get("suggestion_id"),
        deployed_at: row.get("deployed_at"),
    })
}

/// JSON-encoded columns of a suggestion, in bind order.
struct EncodedSuggestion {
    pattern: JsonValue,
    history: JsonValue,
    capabilities: JsonValue,
    issues: JsonValue,
    failure: Option<JsonValue>,
    refinement_count: i32,
    safety_score: Option<i32>,
}

impl EncodedSuggestion {
    fn encode(s: &Suggestion) -> HearthResult<Self> {
        Ok(Self {
            pattern: to_json(&s.pattern, "pattern")?,
            history: to_json(&s.conversation_history, "conversation_history")?,
            capabilities: to_json(&s.device_capability_snapshot, "device_capabilities")?,
            issues: to_json(&s.safety_issues, "safety_issues")?,
            failure: s.failure.as_ref().map(|f| to_json(f, "failure")).transpose()?,
            refinement_count: i32::try_from(s.refinement_count)
                .map_err(|_| database("refinement_count out of range"))?,
            safety_score: s.safety_score.map(i32::from),
        })
    }
}

// ============================================================================
// SUGGESTION STORE
// ============================================================================

#[async_trait]
impl SuggestionStore for PgStore {
    async fn insert(&self, s: &Suggestion) -> HearthResult<()> {
        let encoded = EncodedSuggestion::encode(s)?;
        let conn = self.get_conn().await?;
        let sql = format!(
            "INSERT INTO suggestions ({}) VALUES \
             ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)",
            SUGGESTION_COLUMNS
        );
        conn.execute(
            sql.as_str(),
            &[
                &s.suggestion_id,
                &encoded.pattern,
                &s.automation_id,
                &s.description,
                &s.phase.as_db_str(),
                &encoded.history,
                &encoded.capabilities,
                &encoded.refinement_count,
                &s.automation_definition,
                &encoded.safety_score,
                &encoded.issues,
                &s.deployed_version_id,
                &encoded.failure,
                &s.description_generated_at,
                &s.approved_at,
                &s.yaml_generated_at,
                &s.created_at,
                &s.updated_at,
            ],
        )
        .await
        .map_err(|e| {
            HearthError::Storage(StorageError::InsertFailed {
                entity: "suggestion",
                reason: e.to_string(),
            })
        })?;
        Ok(())
    }

    async fn get(&self, id: SuggestionId) -> HearthResult<Option<Suggestion>> {
        let conn = self.get_conn().await?;
        let sql = format!("SELECT {} FROM suggestions WHERE id = $1", SUGGESTION_COLUMNS);
        let row = conn.query_opt(sql.as_str(), &[&id]).await.map_err(db_error)?;
        row.as_ref().map(row_to_suggestion).transpose()
    }

    async fn update_if_phase(
        &self,
        s: &Suggestion,
        expected: SuggestionPhase,
    ) -> HearthResult<()> {
        s.check_invariants().map_err(|reason| {
            HearthError::Storage(StorageError::UpdateFailed {
                entity: "suggestion",
                id: s.suggestion_id.to_string(),
                reason,
            })
        })?;

        let encoded = EncodedSuggestion::encode(s)?;
        let conn = self.get_conn().await?;
        let updated = conn
            .execute(
                "UPDATE suggestions SET \
                 description_only = $3, phase = $4, conversation_history = $5, \
                 device_capabilities = $6, refinement_count = $7, automation_yaml = $8, \
                 safety_score = $9, safety_issues = $10, deployed_version_id = $11, \
                 failure = $12, description_generated_at = $13, approved_at = $14, \
                 yaml_generated_at = $15, updated_at = $16 \
                 WHERE id = $1 AND phase = $2",
                &[
                    &s.suggestion_id,
                    &expected.as_db_str(),
                    &s.description,
                    &s.phase.as_db_str(),
                    &encoded.history,
                    &encoded.capabilities,
                    &encoded.refinement_count,
                    &s.automation_definition,
                    &encoded.safety_score,
                    &encoded.issues,
                    &s.deployed_version_id,
                    &encoded.failure,
                    &s.description_generated_at,
                    &s.approved_at,
                    &s.yaml_generated_at,
                    &s.updated_at,
                ],
            )
            .await
            .map_err(db_error)?;

        if updated == 1 {
            return Ok(());
        }

        // Nothing matched: either the row is gone or the phase moved.
        let current = conn
            .query_opt("SELECT phase FROM suggestions WHERE id = $1", &[&s.suggestion_id])
            .await
            .map_err(db_error)?;
        match current {
            None => Err(HearthError::Storage(StorageError::NotFound {
                entity: "suggestion",
                id: s.suggestion_id.to_string(),
            })),
            Some(row) => {
                let found: String = row.get(0);
                let found = SuggestionPhase::from_db_str(&found)
                    .map_err(|e| database(format!("Invalid phase column: {}", e)))?;
                Err(HearthError::Storage(StorageError::Conflict {
                    id: s.suggestion_id,
                    expected,
                    found,
                }))
            }
        }
    }

    async fn list_by_phase(&self, phase: SuggestionPhase) -> HearthResult<Vec<Suggestion>> {
        let conn = self.get_conn().await?;
        let sql = format!(
            "SELECT {} FROM suggestions WHERE phase = $1 ORDER BY created_at, id",
            SUGGESTION_COLUMNS
        );
        let rows = conn
            .query(sql.as_str(), &[&phase.as_db_str()])
            .await
            .map_err(db_error)?;
        rows.iter().map(row_to_suggestion).collect()
    }

    async fn delete(&self, id: SuggestionId) -> HearthResult<()> {
        let conn = self.get_conn().await?;
        let deleted = conn
            .execute("DELETE FROM suggestions WHERE id = $1", &[&id])
            .await
            .map_err(db_error)?;
        if deleted == 0 {
            return Err(HearthError::Storage(StorageError::NotFound {
                entity: "suggestion",
                id: id.to_string(),
            }));
        }
        Ok(())
    }
}

// ============================================================================
// VERSION STORE
// ============================================================================

#[async_trait]
impl VersionStore for PgStore {
    async fn append(&self, v: &AutomationVersion) -> HearthResult<()> {
        let mut conn = self.get_conn().await?;
        let tx = conn.transaction().await.map_err(db_error)?;

        // Serialise appends per automation for the gap check.
        tx.execute(
            "SELECT pg_advisory_xact_lock(hashtext($1))",
            &[&v.automation_id],
        )
        .await
        .map_err(db_error)?;

        let latest: Option<i32> = tx
            .query_one(
                "SELECT MAX(version_number) FROM automation_versions WHERE automation_id = $1",
                &[&v.automation_id],
            )
            .await
            .map_err(db_error)?
            .get(0);
        let latest = latest
            .map(|n| u32_from_i32(n, "version_number"))
            .transpose()?;

        let expected = expected_next(latest);
        if v.version_number != expected {
            return Err(HearthError::Storage(StorageError::VersionGap {
                automation_id: v.automation_id.clone(),
                expected,
                got: v.version_number,
            }));
        }

        let version_number = i32::try_from(v.version_number)
            .map_err(|_| database("version_number out of range"))?;
        let sql = format!(
            "INSERT INTO automation_versions ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
            VERSION_COLUMNS
        );
        tx.execute(
            sql.as_str(),
            &[
                &v.version_id,
                &v.automation_id,
                &version_number,
                &v.definition_text,
                &v.content_hash,
                &i32::from(v.safety_score),
                &v.suggestion_id,
                &v.deployed_at,
            ],
        )
        .await
        .map_err(|e| {
            HearthError::Storage(StorageError::InsertFailed {
                entity: "automation_version",
                reason: e.to_string(),
            })
        })?;

        tx.execute(
            "INSERT INTO automation_active_versions (automation_id, version_id) VALUES ($1, $2) \
             ON CONFLICT (automation_id) DO UPDATE SET version_id = EXCLUDED.version_id",
            &[&v.automation_id, &v.version_id],
        )
        .await
        .map_err(db_error)?;

        tx.commit().await.map_err(db_error)
    }

    async fn list(&self, automation_id: &str) -> HearthResult<Vec<AutomationVersion>> {
        let conn = self.get_conn().await?;
        let sql = format!(
            "SELECT {} FROM automation_versions WHERE automation_id = $1 \
             ORDER BY version_number, deployed_at",
            VERSION_COLUMNS
        );
        let rows = conn
            .query(sql.as_str(), &[&automation_id])
            .await
            .map_err(db_error)?;
        rows.iter().map(row_to_version).collect()
    }

    async fn get(&self, version_id: VersionId) -> HearthResult<Option<AutomationVersion>> {
        let conn = self.get_conn().await?;
        let sql = format!("SELECT {} FROM automation_versions WHERE id = $1", VERSION_COLUMNS);
        let row = conn
            .query_opt(sql.as_str(), &[&version_id])
            .await
            .map_err(db_error)?;
        row.as_ref().map(row_to_version).transpose()
    }

    async fn active(&self, automation_id: &str) -> HearthResult<Option<AutomationVersion>> {
        let conn = self.get_conn().await?;
        let row = conn
            .query_opt(
                "SELECT v.id, v.automation_id, v.version_number, v.definition_text, \
                 v.content_hash, v.safety_score, v.suggestion_id, v.deployed_at \
                 FROM automation_active_versions a \
                 JOIN automation_versions v ON v.id = a.version_id \
                 WHERE a.automation_id = $1",
                &[&automation_id],
            )
            .await
            .map_err(db_error)?;
        row.as_ref().map(row_to_version).transpose()
    }

    async fn set_active(&self, automation_id: &str, version_id: VersionId) -> HearthResult<()> {
        let conn = self.get_conn().await?;
        let updated = conn
            .execute(
                "INSERT INTO automation_active_versions (automation_id, version_id) \
                 SELECT automation_id, id FROM automation_versions \
                 WHERE id = $2 AND automation_id = $1 \
                 ON CONFLICT (automation_id) DO UPDATE SET version_id = EXCLUDED.version_id",
                &[&automation_id, &version_id],
            )
            .await
            .map_err(db_error)?;
        if updated == 0 {
            return Err(HearthError::Storage(StorageError::NotFound {
                entity: "automation_version",
                id: version_id.to_string(),
            }));
        }
        Ok(())
    }
}
