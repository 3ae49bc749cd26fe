//! DB stage: one page of one table per call.

use super::chunk::{ChunkSeries, SqlChunkWriter};
use super::cursor::TableCursor;
use super::{StageContext, StageOutcome};
use crate::models::job_state::JobState;
use crate::source::{quote_ident, RowBatch};
use crate::utils::errors::Result;
use std::io;
use tracing::{debug, info, warn};

pub(crate) fn export_page(ctx: &StageContext<'_>, state: &mut JobState) -> Result<StageOutcome> {
    let Some(table) = state.current_table().map(str::to_owned) else {
        return Ok(StageOutcome::Done);
    };

    let first_visit = state.cursor.is_none();
    let mut cursor = match state.cursor.take() {
        Some(cursor) => cursor,
        None => match TableCursor::resolve(ctx.source, &table) {
            Ok(cursor) => cursor,
            Err(e) => return Ok(skip_table(state, &table, e)),
        },
    };
    if first_visit && cursor.is_degraded() {
        warn!("Table {table} has no single-column primary key; exporting by row offset");
    }

    let limit = ctx.config.limits.batch_rows;
    let batch = match ctx.source.fetch_page(&table, &cursor.page(), limit) {
        Ok(batch) => batch,
        Err(e) => return Ok(skip_table(state, &table, e)),
    };

    let create = if first_visit {
        match ctx.source.create_statement(&table) {
            Ok(sql) => Some(sql),
            Err(e) => return Ok(skip_table(state, &table, e)),
        }
    } else {
        None
    };

    let series = ChunkSeries::sql(&state.work_dir);
    let written = SqlChunkWriter::open(
        series,
        state.sql_chunk_index,
        state.sql_chunk_bytes,
        ctx.config.limits.sql_chunk_bytes,
    )
    .and_then(|mut writer| {
        write_page(&mut writer, &table, create.as_deref(), &batch)?;
        writer.finish()
    });

    match written {
        Ok((index, bytes)) => {
            state.sql_chunk_index = index;
            state.sql_chunk_bytes = bytes;
        }
        // Committed length is unchanged, so the partial write is dropped on reopen
        Err(e) => return Ok(skip_table(state, &table, e)),
    }

    state.rows_exported += batch.len() as u64;
    debug!("Exported {} rows from {table}", batch.len());

    if batch.len() < limit {
        info!("Finished table {table}");
        state.advance_table();
    } else if cursor.advance(&batch) {
        state.cursor = Some(cursor);
    } else {
        warn!("Table {table} returned a NULL key; remaining rows skipped");
        state.skipped.table(&table, "NULL primary key value");
        state.advance_table();
    }

    Ok(remaining_tables(state))
}

fn skip_table(state: &mut JobState, table: &str, reason: impl std::fmt::Display) -> StageOutcome {
    warn!("Skipping table {table}: {reason}");
    state.skipped.table(table, reason);
    state.advance_table();
    remaining_tables(state)
}

fn remaining_tables(state: &JobState) -> StageOutcome {
    if state.current_table().is_some() {
        StageOutcome::Continue
    } else {
        StageOutcome::Done
    }
}

fn write_page(
    writer: &mut SqlChunkWriter,
    table: &str,
    create: Option<&str>,
    batch: &RowBatch,
) -> io::Result<()> {
    let quoted = quote_ident(table);
    if let Some(create) = create {
        writer.write_record(&format!(
            "-- Table: {quoted}\nDROP TABLE IF EXISTS {quoted};\n{create}\n\n"
        ))?;
    }

    let columns = batch
        .columns
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ");
    for row in &batch.rows {
        let values = row
            .iter()
            .map(|v| v.to_sql_literal())
            .collect::<Vec<_>>()
            .join(", ");
        writer.write_record(&format!("INSERT INTO {quoted} ({columns}) VALUES ({values});\n"))?;
    }
    Ok(())
}
