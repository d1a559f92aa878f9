//! Schema DDL and the migration runner.
//!
//! Table and column names are kept bit-exact to the names `manifest.json`
//! and the FTS trigger definitions reference (`spec.md §9`, "Replace
//! object-relational mapping"), so they intentionally read as the
//! PascalCase an EF-Core-shaped original would have used rather than
//! idiomatic `snake_case`.

use sqlx::{Row, SqlitePool};

/// Name of the table the initializer checks for to distinguish "no
/// migration history" (repair path) from "has run before" (migrate in
/// place path).
pub const MIGRATION_HISTORY_TABLE: &str = "SchemaMigrationHistory";

/// Tables the initializer requires to exist after any successful migration
/// or repair; their absence after repair is a fatal `InvalidWorkspaceState`
/// (`spec.md §4.1`).
pub const REQUIRED_TABLES: &[&str] = &[
    "CaseRecord",
    "EvidenceItemRecord",
    "AuditEventRecord",
    "JobRecord",
    "MessageThreadRecord",
    "MessageEventRecord",
    "MessageParticipantRecord",
    "TargetRecord",
    "TargetAliasRecord",
    "IdentifierRecord",
    "TargetIdentifierLinkRecord",
    "MessageParticipantLinkRecord",
    "GlobalPersonRecord",
    "PersonAliasRecord",
    "PersonIdentifierRecord",
    "TargetMessagePresenceRecord",
];

struct Migration {
    version: i64,
    name: &'static str,
    statements: &'static [&'static str],
}

const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    name: "initial_schema",
    statements: &[
        r#"CREATE TABLE IF NOT EXISTS "CaseRecord" (
            "CaseId" TEXT PRIMARY KEY,
            "Name" TEXT NOT NULL,
            "CreatedAtUtc" TEXT NOT NULL,
            "LastOpenedAtUtc" TEXT
        )"#,
        r#"CREATE TABLE IF NOT EXISTS "EvidenceItemRecord" (
            "EvidenceItemId" TEXT PRIMARY KEY,
            "CaseId" TEXT NOT NULL REFERENCES "CaseRecord"("CaseId") ON DELETE CASCADE,
            "DisplayName" TEXT NOT NULL,
            "OriginalPath" TEXT NOT NULL,
            "OriginalFileName" TEXT NOT NULL,
            "AddedAtUtc" TEXT NOT NULL,
            "SizeBytes" INTEGER NOT NULL,
            "Sha256Hex" TEXT NOT NULL,
            "FileExtension" TEXT NOT NULL,
            "SourceType" TEXT NOT NULL,
            "ManifestRelativePath" TEXT NOT NULL,
            "StoredRelativePath" TEXT NOT NULL
        )"#,
        r#"CREATE INDEX IF NOT EXISTS "IX_EvidenceItemRecord_CaseId" ON "EvidenceItemRecord"("CaseId")"#,
        r#"CREATE TABLE IF NOT EXISTS "AuditEventRecord" (
            "AuditEventId" TEXT PRIMARY KEY,
            "TimestampUtc" TEXT NOT NULL,
            "Operator" TEXT NOT NULL,
            "ActionType" TEXT NOT NULL,
            "CaseId" TEXT,
            "EvidenceItemId" TEXT,
            "Summary" TEXT NOT NULL,
            "JsonPayload" TEXT NOT NULL
        )"#,
        r#"CREATE INDEX IF NOT EXISTS "IX_AuditEventRecord_CaseId" ON "AuditEventRecord"("CaseId")"#,
        r#"CREATE TABLE IF NOT EXISTS "JobRecord" (
            "JobId" TEXT PRIMARY KEY,
            "CreatedAtUtc" TEXT NOT NULL,
            "StartedAtUtc" TEXT,
            "CompletedAtUtc" TEXT,
            "Status" TEXT NOT NULL,
            "JobType" TEXT NOT NULL,
            "CaseId" TEXT,
            "EvidenceItemId" TEXT,
            "Progress" REAL NOT NULL,
            "StatusMessage" TEXT NOT NULL,
            "ErrorMessage" TEXT,
            "JsonPayload" TEXT NOT NULL,
            "CorrelationId" TEXT NOT NULL,
            "Operator" TEXT NOT NULL
        )"#,
        r#"CREATE INDEX IF NOT EXISTS "IX_JobRecord_Status" ON "JobRecord"("Status")"#,
        r#"CREATE INDEX IF NOT EXISTS "IX_JobRecord_CreatedAtUtc" ON "JobRecord"("CreatedAtUtc")"#,
        r#"CREATE TABLE IF NOT EXISTS "MessageThreadRecord" (
            "ThreadId" TEXT PRIMARY KEY,
            "CaseId" TEXT NOT NULL,
            "EvidenceItemId" TEXT NOT NULL,
            "Platform" TEXT NOT NULL,
            "ThreadKey" TEXT NOT NULL,
            "Title" TEXT,
            "CreatedAtUtc" TEXT NOT NULL,
            "SourceLocator" TEXT NOT NULL,
            "IngestModuleVersion" TEXT NOT NULL
        )"#,
        r#"CREATE INDEX IF NOT EXISTS "IX_MessageThreadRecord_EvidenceItemId" ON "MessageThreadRecord"("EvidenceItemId")"#,
        r#"CREATE TABLE IF NOT EXISTS "MessageEventRecord" (
            "MessageEventId" TEXT PRIMARY KEY,
            "ThreadId" TEXT NOT NULL REFERENCES "MessageThreadRecord"("ThreadId") ON DELETE CASCADE,
            "CaseId" TEXT NOT NULL,
            "EvidenceItemId" TEXT NOT NULL,
            "Platform" TEXT NOT NULL,
            "TimestampUtc" TEXT,
            "Direction" TEXT NOT NULL,
            "Sender" TEXT,
            "Recipients" TEXT,
            "Body" TEXT,
            "IsDeleted" INTEGER NOT NULL,
            "SourceLocator" TEXT NOT NULL,
            "IngestModuleVersion" TEXT NOT NULL,
            UNIQUE("EvidenceItemId", "SourceLocator")
        )"#,
        r#"CREATE INDEX IF NOT EXISTS "IX_MessageEventRecord_ThreadId" ON "MessageEventRecord"("ThreadId")"#,
        r#"CREATE INDEX IF NOT EXISTS "IX_MessageEventRecord_EvidenceItemId" ON "MessageEventRecord"("EvidenceItemId")"#,
        r#"CREATE TABLE IF NOT EXISTS "MessageParticipantRecord" (
            "ParticipantId" TEXT PRIMARY KEY,
            "ThreadId" TEXT NOT NULL REFERENCES "MessageThreadRecord"("ThreadId") ON DELETE CASCADE,
            "Value" TEXT NOT NULL,
            "Kind" TEXT NOT NULL,
            "SourceLocator" TEXT NOT NULL,
            "IngestModuleVersion" TEXT NOT NULL
        )"#,
        r#"CREATE INDEX IF NOT EXISTS "IX_MessageParticipantRecord_ThreadId" ON "MessageParticipantRecord"("ThreadId")"#,
        r#"CREATE TABLE IF NOT EXISTS "TargetRecord" (
            "TargetId" TEXT PRIMARY KEY,
            "CaseId" TEXT NOT NULL REFERENCES "CaseRecord"("CaseId") ON DELETE CASCADE,
            "DisplayName" TEXT NOT NULL,
            "PrimaryAlias" TEXT,
            "Notes" TEXT,
            "CreatedAtUtc" TEXT NOT NULL,
            "UpdatedAtUtc" TEXT NOT NULL,
            "SourceType" TEXT NOT NULL,
            "SourceLocator" TEXT NOT NULL,
            "IngestModuleVersion" TEXT NOT NULL,
            "GlobalEntityId" TEXT
        )"#,
        r#"CREATE INDEX IF NOT EXISTS "IX_TargetRecord_CaseId" ON "TargetRecord"("CaseId")"#,
        r#"CREATE TABLE IF NOT EXISTS "TargetAliasRecord" (
            "AliasId" TEXT PRIMARY KEY,
            "TargetId" TEXT NOT NULL REFERENCES "TargetRecord"("TargetId") ON DELETE CASCADE,
            "CaseId" TEXT NOT NULL,
            "Alias" TEXT NOT NULL,
            "AliasNormalized" TEXT NOT NULL,
            UNIQUE("CaseId", "AliasNormalized", "TargetId")
        )"#,
        r#"CREATE TABLE IF NOT EXISTS "IdentifierRecord" (
            "IdentifierId" TEXT PRIMARY KEY,
            "CaseId" TEXT NOT NULL REFERENCES "CaseRecord"("CaseId") ON DELETE CASCADE,
            "Type" TEXT NOT NULL,
            "ValueRaw" TEXT NOT NULL,
            "ValueNormalized" TEXT NOT NULL,
            "Notes" TEXT,
            "SourceType" TEXT NOT NULL,
            "SourceLocator" TEXT NOT NULL,
            "IngestModuleVersion" TEXT NOT NULL,
            UNIQUE("CaseId", "Type", "ValueNormalized")
        )"#,
        r#"CREATE TABLE IF NOT EXISTS "TargetIdentifierLinkRecord" (
            "LinkId" TEXT PRIMARY KEY,
            "CaseId" TEXT NOT NULL,
            "TargetId" TEXT NOT NULL REFERENCES "TargetRecord"("TargetId") ON DELETE CASCADE,
            "IdentifierId" TEXT NOT NULL REFERENCES "IdentifierRecord"("IdentifierId") ON DELETE CASCADE,
            "IsPrimary" INTEGER NOT NULL,
            "SourceType" TEXT NOT NULL,
            "SourceLocator" TEXT NOT NULL,
            "IngestModuleVersion" TEXT NOT NULL,
            UNIQUE("TargetId", "IdentifierId")
        )"#,
        r#"CREATE INDEX IF NOT EXISTS "IX_TargetIdentifierLinkRecord_IdentifierId" ON "TargetIdentifierLinkRecord"("IdentifierId")"#,
        r#"CREATE TABLE IF NOT EXISTS "MessageParticipantLinkRecord" (
            "ParticipantLinkId" TEXT PRIMARY KEY,
            "CaseId" TEXT NOT NULL,
            "MessageEventId" TEXT NOT NULL REFERENCES "MessageEventRecord"("MessageEventId") ON DELETE CASCADE,
            "Role" TEXT NOT NULL,
            "ParticipantRaw" TEXT NOT NULL,
            "IdentifierId" TEXT NOT NULL REFERENCES "IdentifierRecord"("IdentifierId") ON DELETE CASCADE,
            "TargetId" TEXT REFERENCES "TargetRecord"("TargetId") ON DELETE SET NULL
        )"#,
        r#"CREATE INDEX IF NOT EXISTS "IX_MessageParticipantLinkRecord_MessageEventId" ON "MessageParticipantLinkRecord"("MessageEventId")"#,
        r#"CREATE INDEX IF NOT EXISTS "IX_MessageParticipantLinkRecord_TargetId" ON "MessageParticipantLinkRecord"("TargetId")"#,
        r#"CREATE TABLE IF NOT EXISTS "GlobalPersonRecord" (
            "GlobalPersonId" TEXT PRIMARY KEY,
            "DisplayName" TEXT NOT NULL,
            "Notes" TEXT,
            "CreatedAtUtc" TEXT NOT NULL,
            "UpdatedAtUtc" TEXT NOT NULL
        )"#,
        r#"CREATE TABLE IF NOT EXISTS "PersonAliasRecord" (
            "PersonAliasId" TEXT PRIMARY KEY,
            "GlobalPersonId" TEXT NOT NULL REFERENCES "GlobalPersonRecord"("GlobalPersonId") ON DELETE CASCADE,
            "Alias" TEXT NOT NULL,
            "AliasNormalized" TEXT NOT NULL
        )"#,
        r#"CREATE TABLE IF NOT EXISTS "PersonIdentifierRecord" (
            "PersonIdentifierId" TEXT PRIMARY KEY,
            "GlobalPersonId" TEXT NOT NULL REFERENCES "GlobalPersonRecord"("GlobalPersonId") ON DELETE CASCADE,
            "Type" TEXT NOT NULL,
            "ValueRaw" TEXT NOT NULL,
            "ValueNormalized" TEXT NOT NULL,
            "IsPrimary" INTEGER NOT NULL,
            UNIQUE("Type", "ValueNormalized")
        )"#,
        r#"CREATE TABLE IF NOT EXISTS "TargetMessagePresenceRecord" (
            "PresenceId" TEXT PRIMARY KEY,
            "CaseId" TEXT NOT NULL,
            "TargetId" TEXT NOT NULL,
            "MessageEventId" TEXT NOT NULL,
            "MatchedIdentifierId" TEXT NOT NULL,
            "Role" TEXT NOT NULL,
            "EvidenceItemId" TEXT NOT NULL,
            "SourceLocator" TEXT NOT NULL,
            "MessageTimestampUtc" TEXT,
            "FirstSeenUtc" TEXT NOT NULL,
            "LastSeenUtc" TEXT NOT NULL
        )"#,
        r#"CREATE INDEX IF NOT EXISTS "IX_TargetMessagePresenceRecord_CaseId" ON "TargetMessagePresenceRecord"("CaseId")"#,
        r#"CREATE INDEX IF NOT EXISTS "IX_TargetMessagePresenceRecord_TargetId" ON "TargetMessagePresenceRecord"("TargetId")"#,
        r#"CREATE INDEX IF NOT EXISTS "IX_TargetMessagePresenceRecord_EvidenceItemId" ON "TargetMessagePresenceRecord"("EvidenceItemId")"#,
        r#"CREATE INDEX IF NOT EXISTS "IX_TargetMessagePresenceRecord_MatchedIdentifierId" ON "TargetMessagePresenceRecord"("MatchedIdentifierId")"#,
        // Full-text search over message bodies (`spec.md §6`).
        r#"CREATE VIRTUAL TABLE IF NOT EXISTS "MessageEventFts" USING fts5(
            "MessageEventId" UNINDEXED,
            "CaseId" UNINDEXED,
            "Platform",
            "Sender",
            "Recipients",
            "Body"
        )"#,
        r#"CREATE TRIGGER IF NOT EXISTS "TR_MessageEventRecord_AfterInsert"
           AFTER INSERT ON "MessageEventRecord"
           BEGIN
             INSERT INTO "MessageEventFts"("MessageEventId", "CaseId", "Platform", "Sender", "Recipients", "Body")
             VALUES (new."MessageEventId", new."CaseId", new."Platform", new."Sender", new."Recipients", new."Body");
           END"#,
        r#"CREATE TRIGGER IF NOT EXISTS "TR_MessageEventRecord_AfterUpdate"
           AFTER UPDATE ON "MessageEventRecord"
           BEGIN
             DELETE FROM "MessageEventFts" WHERE "MessageEventId" = old."MessageEventId";
             INSERT INTO "MessageEventFts"("MessageEventId", "CaseId", "Platform", "Sender", "Recipients", "Body")
             VALUES (new."MessageEventId", new."CaseId", new."Platform", new."Sender", new."Recipients", new."Body");
           END"#,
        r#"CREATE TRIGGER IF NOT EXISTS "TR_MessageEventRecord_AfterDelete"
           AFTER DELETE ON "MessageEventRecord"
           BEGIN
             DELETE FROM "MessageEventFts" WHERE "MessageEventId" = old."MessageEventId";
           END"#,
    ],
}];

/// Run every migration not yet recorded in `SchemaMigrationHistory`,
/// creating that table first if absent. Idempotent: safe to call on every
/// startup.
pub async fn migrate(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(&format!(
        r#"CREATE TABLE IF NOT EXISTS "{MIGRATION_HISTORY_TABLE}" (
            "Version" INTEGER PRIMARY KEY,
            "Name" TEXT NOT NULL,
            "AppliedAtUtc" TEXT NOT NULL
        )"#
    ))
    .execute(pool)
    .await?;

    for migration in MIGRATIONS {
        let applied: Option<i64> = sqlx::query(&format!(
            r#"SELECT "Version" FROM "{MIGRATION_HISTORY_TABLE}" WHERE "Version" = ?"#
        ))
        .bind(migration.version)
        .fetch_optional(pool)
        .await?
        .map(|row| row.get("Version"));

        if applied.is_some() {
            continue;
        }

        let mut tx = pool.begin().await?;
        for statement in migration.statements {
            sqlx::query(statement).execute(&mut *tx).await?;
        }
        sqlx::query(&format!(
            r#"INSERT INTO "{MIGRATION_HISTORY_TABLE}" ("Version", "Name", "AppliedAtUtc") VALUES (?, ?, ?)"#
        ))
        .bind(migration.version)
        .bind(migration.name)
        .bind(chrono::Utc::now().to_rfc3339())
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
    }

    // Back-fill the FTS index in case it pre-dates the triggers (repair
    // path or a future migration adds a column).
    sqlx::query(
        r#"INSERT INTO "MessageEventFts"("MessageEventId", "CaseId", "Platform", "Sender", "Recipients", "Body")
           SELECT m."MessageEventId", m."CaseId", m."Platform", m."Sender", m."Recipients", m."Body"
           FROM "MessageEventRecord" m
           WHERE NOT EXISTS (SELECT 1 FROM "MessageEventFts" f WHERE f."MessageEventId" = m."MessageEventId")"#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// `true` once `SchemaMigrationHistory` exists — distinguishes a workspace
/// that has been initialized by this code at least once from a foreign or
/// pre-migration database file (`spec.md §4.1` case (b) vs (c)).
pub async fn has_migration_history(pool: &SqlitePool) -> Result<bool, sqlx::Error> {
    table_exists(pool, MIGRATION_HISTORY_TABLE).await
}

/// Check whether every table in [`REQUIRED_TABLES`] exists.
pub async fn has_all_required_tables(pool: &SqlitePool) -> Result<bool, sqlx::Error> {
    for table in REQUIRED_TABLES {
        if !table_exists(pool, table).await? {
            return Ok(false);
        }
    }
    Ok(true)
}

async fn table_exists(pool: &SqlitePool, name: &str) -> Result<bool, sqlx::Error> {
    let row = sqlx::query(r#"SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?"#)
        .bind(name)
        .fetch_optional(pool)
        .await?;
    Ok(row.is_some())
}
