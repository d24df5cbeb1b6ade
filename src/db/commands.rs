//! Persistence of the queue set: load at start, replace-all on flush.

use crate::command::Command;
use crate::error::DatabaseError;
use crate::types::QueueType;
use crate::{Error, Result};

use super::{CommandRow, Database};

impl Database {
    /// Load every persisted command with the partition it was stored in
    ///
    /// Rows that cannot be decoded are logged and skipped so one bad row does
    /// not take the whole queue set down.
    pub async fn load_commands(&self) -> Result<Vec<(QueueType, Command)>> {
        let rows: Vec<CommandRow> = sqlx::query_as(
            r#"
            SELECT command_id, queue_type, command_type, account, timeline_kind, actor_id,
                   origin, search_query, item_id, created_at, in_foreground, manually_launched,
                   executed, execution_count, retries_left, last_executed_at, delayed_till,
                   auth_errors, io_errors, parse_errors, downloaded_count, new_count, message,
                   notifications_json, cancelled
            FROM commands
            ORDER BY queue_type ASC, command_id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to load commands: {}",
                e
            )))
        })?;

        let mut commands = Vec::with_capacity(rows.len());
        for row in rows {
            let command_id = row.command_id;
            match row.into_command() {
                Ok(entry) => commands.push(entry),
                Err(e) => {
                    tracing::warn!(command_id, error = %e, "Skipping unreadable command row");
                }
            }
        }
        Ok(commands)
    }

    /// Replace the stored queue set with `commands` in one transaction
    pub async fn replace_all_commands(&self, commands: &[(QueueType, Command)]) -> Result<()> {
        let rows = commands
            .iter()
            .map(|(queue, command)| CommandRow::from_command(*queue, command))
            .collect::<Result<Vec<_>>>()?;

        let mut tx = self.pool.begin().await.map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to begin transaction: {}",
                e
            )))
        })?;

        sqlx::query("DELETE FROM commands")
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to clear commands: {}",
                    e
                )))
            })?;

        for row in &rows {
            sqlx::query(
                r#"
                INSERT INTO commands (
                    command_id, queue_type, command_type, account, timeline_kind, actor_id,
                    origin, search_query, item_id, created_at, in_foreground, manually_launched,
                    executed, execution_count, retries_left, last_executed_at, delayed_till,
                    auth_errors, io_errors, parse_errors, downloaded_count, new_count, message,
                    notifications_json, cancelled
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(row.command_id)
            .bind(row.queue_type)
            .bind(&row.command_type)
            .bind(&row.account)
            .bind(&row.timeline_kind)
            .bind(row.actor_id)
            .bind(&row.origin)
            .bind(&row.search_query)
            .bind(row.item_id)
            .bind(row.created_at)
            .bind(row.in_foreground)
            .bind(row.manually_launched)
            .bind(row.executed)
            .bind(row.execution_count)
            .bind(row.retries_left)
            .bind(row.last_executed_at)
            .bind(row.delayed_till)
            .bind(row.auth_errors)
            .bind(row.io_errors)
            .bind(row.parse_errors)
            .bind(row.downloaded_count)
            .bind(row.new_count)
            .bind(&row.message)
            .bind(&row.notifications_json)
            .bind(row.cancelled)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to insert command {}: {}",
                    row.command_id, e
                )))
            })?;
        }

        tx.commit().await.map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to commit commands: {}",
                e
            )))
        })?;

        tracing::debug!(count = rows.len(), "Queue set written to database");
        Ok(())
    }

    /// Number of stored commands, per partition code
    pub async fn count_commands_by_queue(&self) -> Result<Vec<(i32, i64)>> {
        sqlx::query_as(
            "SELECT queue_type, COUNT(*) FROM commands GROUP BY queue_type ORDER BY queue_type",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to count commands: {}",
                e
            )))
        })
    }
}
