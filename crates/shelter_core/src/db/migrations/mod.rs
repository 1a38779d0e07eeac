//! Schema migrations for the embedded document table.
//!
//! # Invariants
//! - Versions are strictly increasing and mirrored to `PRAGMA user_version`.
//! - A migration's SQL and its row backfill commit together; a body that
//!   fails to decode aborts the whole upgrade.

use crate::db::{DbError, DbResult, DocumentRow};
use rusqlite::{params, Connection, Transaction};

type Backfill = fn(&Transaction<'_>) -> DbResult<()>;

struct Migration {
    version: u32,
    sql: &'static str,
    backfill: Option<Backfill>,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        sql: include_str!("0001_init.sql"),
        backfill: None,
    },
    Migration {
        version: 2,
        sql: include_str!("0002_rec_num_index.sql"),
        backfill: Some(rederive_columns),
    },
];

pub fn latest_version() -> u32 {
    MIGRATIONS.last().map_or(0, |migration| migration.version)
}

/// Brings `conn` up to [`latest_version`].
///
/// # Errors
/// - `UnsupportedSchemaVersion` when the file was written by a newer build.
/// - `CorruptDocument` when a backfill meets an undecodable body.
pub fn apply_migrations(conn: &mut Connection) -> DbResult<()> {
    let from = current_user_version(conn)?;
    let latest = latest_version();
    if from > latest {
        return Err(DbError::UnsupportedSchemaVersion {
            db_version: from,
            latest_supported: latest,
        });
    }

    let pending: Vec<&Migration> = MIGRATIONS
        .iter()
        .filter(|migration| migration.version > from)
        .collect();
    if pending.is_empty() {
        return Ok(());
    }

    let tx = conn.transaction()?;
    for migration in pending {
        tx.execute_batch(migration.sql)?;
        if let Some(backfill) = migration.backfill {
            backfill(&tx)?;
        }
        tx.pragma_update(None, "user_version", migration.version)?;
    }
    tx.commit()?;
    Ok(())
}

pub fn current_user_version(conn: &Connection) -> DbResult<u32> {
    Ok(conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?)
}

/// Recomputes `doc_key` and the `rec_num` columns from every stored body.
fn rederive_columns(tx: &Transaction<'_>) -> DbResult<()> {
    let rows: Vec<(i64, Vec<u8>)> = {
        let mut stmt = tx.prepare("SELECT seq, body FROM documents ORDER BY seq;")?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
        rows.collect::<rusqlite::Result<_>>()?
    };

    let mut update = tx.prepare(
        "UPDATE documents
         SET doc_key = ?1, rec_num = ?2, rec_num_irregular = ?3
         WHERE seq = ?4;",
    )?;
    for (seq, body) in rows {
        let row = DocumentRow::encode(&DocumentRow::decode(seq, &body)?)?;
        update.execute(params![row.doc_key, row.rec_num, row.rec_num_irregular, seq])?;
    }
    Ok(())
}
