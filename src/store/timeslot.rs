use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, ValueRef};
use rusqlite::{params, params_from_iter, Connection, Row, ToSql};

use crate::limits::{DEFAULT_PAGE_LIMIT, MAX_PAGE_LIMIT};
use crate::model::*;

use super::{Deadline, StoreError, Table};

const COLUMNS: &str =
    "id, region, area, locality, sublocality, housing_id, lot_id, start_at, end_at";

/// One stored free interval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotRecord {
    pub id: i64,
    pub key: ClassKey,
    pub lot: LotRef,
    pub span: Span,
}

/// Containment search: rows whose interval holds `[from, to]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotQuery {
    pub region: RegionCode,
    pub area: Option<u32>,
    pub locality: Option<u32>,
    pub sublocality: Option<u32>,
    pub housing_id: Option<u64>,
    pub lot_id: Option<u64>,
    pub from: Hour,
    pub to: Hour,
    pub offset: u64,
    pub limit: Option<u64>,
}

impl SlotQuery {
    /// Exact match on one lot's classification key, as used by Book.
    pub fn for_lot(key: &ClassKey, lot: &LotRef, window: Span) -> Self {
        Self {
            region: key.region,
            area: Some(key.area),
            locality: Some(key.locality),
            sublocality: Some(key.sublocality),
            housing_id: Some(lot.housing_id),
            lot_id: Some(lot.lot_id),
            from: window.start,
            to: window.end,
            offset: 0,
            limit: None,
        }
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Update for one row. Only the boundaries that are `Some` are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotPatch {
    pub id: i64,
    pub lot: LotRef,
    pub start_at: Option<Hour>,
    pub end_at: Option<Hour>,
}

impl SlotPatch {
    pub fn resize(id: i64, lot: LotRef, span: Span) -> Self {
        Self {
            id,
            lot,
            start_at: Some(span.start),
            end_at: Some(span.end),
        }
    }
}

/// Free rows directly before (`end_at == from`) and after (`start_at == to`)
/// a window.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Neighbors {
    pub before: Option<SlotRecord>,
    pub after: Option<SlotRecord>,
}

impl Neighbors {
    /// Place a single adjacent row on the side it touches.
    pub fn from_adjacent(record: SlotRecord, window: Span) -> Self {
        if record.span.end == window.start {
            Self {
                before: Some(record),
                after: None,
            }
        } else {
            Self {
                before: None,
                after: Some(record),
            }
        }
    }
}

impl ToSql for RegionCode {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for RegionCode {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e| FromSqlError::Other(Box::new(e)))
    }
}

/// Lot identifiers cover the whole u64 range. SQLite integers are signed,
/// so ids are stored with their bits reinterpreted as i64.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SqlId(u64);

impl ToSql for SqlId {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.0 as i64))
    }
}

impl FromSql for SqlId {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        i64::column_result(value).map(|v| SqlId(v as u64))
    }
}

fn scan(row: &Row<'_>) -> rusqlite::Result<SlotRecord> {
    Ok(SlotRecord {
        id: row.get(0)?,
        key: ClassKey {
            region: row.get(1)?,
            area: row.get(2)?,
            locality: row.get(3)?,
            sublocality: row.get(4)?,
        },
        lot: LotRef {
            housing_id: row.get::<_, SqlId>(5)?.0,
            lot_id: row.get::<_, SqlId>(6)?.0,
        },
        span: Span {
            start: row.get(7)?,
            end: row.get(8)?,
        },
    })
}

/// Storage connector for one node table, bound to a caller-supplied
/// connection (plain or inside a [`TxScope`](super::TxScope)) and deadline.
pub struct Timeslots<'a> {
    conn: &'a Connection,
    table: &'a Table,
    deadline: Deadline,
}

impl<'a> Timeslots<'a> {
    pub fn new(conn: &'a Connection, table: &'a Table, deadline: Deadline) -> Self {
        Self {
            conn,
            table,
            deadline,
        }
    }

    fn sql_err(&self, op: &'static str) -> impl Fn(rusqlite::Error) -> StoreError + '_ {
        move |source| StoreError::from_sqlite(op, self.table.name(), source)
    }

    /// Rows containing `[query.from, query.to]`, paginated.
    pub fn list(&self, query: &SlotQuery) -> Result<Vec<SlotRecord>, StoreError> {
        self.deadline.check("list slots")?;

        let mut clauses = vec!["region = ?", "start_at <= ?", "end_at >= ?"];
        let mut args: Vec<Box<dyn ToSql>> = vec![
            Box::new(query.region),
            Box::new(query.from),
            Box::new(query.to),
        ];
        let filters: [(&str, Option<Box<dyn ToSql>>); 5] = [
            ("area = ?", query.area.map(|v| Box::new(v) as Box<dyn ToSql>)),
            ("locality = ?", query.locality.map(|v| Box::new(v) as Box<dyn ToSql>)),
            ("sublocality = ?", query.sublocality.map(|v| Box::new(v) as Box<dyn ToSql>)),
            ("housing_id = ?", query.housing_id.map(|v| Box::new(SqlId(v)) as Box<dyn ToSql>)),
            ("lot_id = ?", query.lot_id.map(|v| Box::new(SqlId(v)) as Box<dyn ToSql>)),
        ];
        for (clause, value) in filters {
            if let Some(value) = value {
                clauses.push(clause);
                args.push(value);
            }
        }
        let limit = query
            .limit
            .filter(|l| *l > 0)
            .unwrap_or(DEFAULT_PAGE_LIMIT)
            .min(MAX_PAGE_LIMIT);
        args.push(Box::new(limit));
        args.push(Box::new(query.offset));

        let sql = format!(
            "SELECT {COLUMNS} FROM {} WHERE {} \
             ORDER BY housing_id, lot_id, start_at LIMIT ? OFFSET ?",
            self.table.name(),
            clauses.join(" AND "),
        );
        let mut stmt = self.conn.prepare_cached(&sql).map_err(self.sql_err("build select query"))?;
        let rows = stmt
            .query_map(params_from_iter(args.iter()), scan)
            .map_err(self.sql_err("execute query"))?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(self.sql_err("scan"))
    }

    /// The free row immediately adjacent to `window` on either side.
    pub fn get(&self, key: &ClassKey, lot: &LotRef, window: Span) -> Result<SlotRecord, StoreError> {
        self.deadline.check("get slot")?;
        let sql = format!(
            "SELECT {COLUMNS} FROM {} WHERE region = ?1 AND area = ?2 AND locality = ?3 \
             AND sublocality = ?4 AND housing_id = ?5 AND lot_id = ?6 \
             AND (end_at = ?7 OR start_at = ?8) ORDER BY start_at LIMIT 1",
            self.table.name()
        );
        self.conn
            .query_row(
                &sql,
                params![
                    key.region,
                    key.area,
                    key.locality,
                    key.sublocality,
                    SqlId(lot.housing_id),
                    SqlId(lot.lot_id),
                    window.start,
                    window.end
                ],
                scan,
            )
            .map_err(self.sql_err("scan"))
    }

    /// Both adjacent free rows of `window`, if present.
    pub fn neighbors(&self, key: &ClassKey, lot: &LotRef, window: Span) -> Result<Neighbors, StoreError> {
        self.deadline.check("get neighbors")?;
        let sql = format!(
            "SELECT {COLUMNS} FROM {} WHERE region = ?1 AND area = ?2 AND locality = ?3 \
             AND sublocality = ?4 AND housing_id = ?5 AND lot_id = ?6 \
             AND (end_at = ?7 OR start_at = ?8) ORDER BY start_at",
            self.table.name()
        );
        let mut stmt = self.conn.prepare_cached(&sql).map_err(self.sql_err("build select query"))?;
        let rows = stmt
            .query_map(
                params![
                    key.region,
                    key.area,
                    key.locality,
                    key.sublocality,
                    SqlId(lot.housing_id),
                    SqlId(lot.lot_id),
                    window.start,
                    window.end
                ],
                scan,
            )
            .map_err(self.sql_err("execute query"))?;

        let mut found = Neighbors::default();
        for row in rows {
            let rec = row.map_err(self.sql_err("scan"))?;
            if rec.span.end == window.start && found.before.is_none() {
                found.before = Some(rec);
            } else if rec.span.start == window.end && found.after.is_none() {
                found.after = Some(rec);
            }
        }
        Ok(found)
    }

    /// Free rows of one lot that intersect `window`.
    pub fn overlapping(&self, key: &ClassKey, lot: &LotRef, window: Span) -> Result<Vec<SlotRecord>, StoreError> {
        self.deadline.check("find overlapping slots")?;
        let sql = format!(
            "SELECT {COLUMNS} FROM {} WHERE region = ?1 AND area = ?2 AND locality = ?3 \
             AND sublocality = ?4 AND housing_id = ?5 AND lot_id = ?6 \
             AND start_at < ?7 AND end_at > ?8 ORDER BY start_at",
            self.table.name()
        );
        let mut stmt = self.conn.prepare_cached(&sql).map_err(self.sql_err("build select query"))?;
        let rows = stmt
            .query_map(
                params![
                    key.region,
                    key.area,
                    key.locality,
                    key.sublocality,
                    SqlId(lot.housing_id),
                    SqlId(lot.lot_id),
                    window.end,
                    window.start
                ],
                scan,
            )
            .map_err(self.sql_err("execute query"))?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(self.sql_err("scan"))
    }

    /// All free rows of one lot, ordered by start.
    pub fn timeline(&self, key: &ClassKey, lot: &LotRef) -> Result<Vec<SlotRecord>, StoreError> {
        self.overlapping(key, lot, Span::FULL)
    }

    /// Insert one row; returns its id.
    pub fn add(&self, key: &ClassKey, lot: &LotRef, span: Span) -> Result<i64, StoreError> {
        self.deadline.check("insert")?;
        let sql = format!(
            "INSERT INTO {} (region, area, locality, sublocality, housing_id, lot_id, start_at, end_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            self.table.name()
        );
        let affected = self
            .conn
            .prepare_cached(&sql)
            .and_then(|mut stmt| {
                stmt.execute(params![
                    key.region,
                    key.area,
                    key.locality,
                    key.sublocality,
                    SqlId(lot.housing_id),
                    SqlId(lot.lot_id),
                    span.start,
                    span.end
                ])
            })
            .map_err(self.sql_err("insert"))?;
        if affected != 1 {
            return Err(StoreError::Affected { op: "insert", rows: affected });
        }
        Ok(self.conn.last_insert_rowid())
    }

    /// Write the `Some` boundaries of `patch` to the row it names.
    pub fn upd(&self, patch: &SlotPatch) -> Result<(), StoreError> {
        self.deadline.check("update")?;
        let mut sets = Vec::with_capacity(2);
        let mut args: Vec<Box<dyn ToSql>> = Vec::with_capacity(5);
        if let Some(start) = patch.start_at {
            sets.push("start_at = ?");
            args.push(Box::new(start));
        }
        if let Some(end) = patch.end_at {
            sets.push("end_at = ?");
            args.push(Box::new(end));
        }
        if sets.is_empty() {
            return Err(StoreError::Affected { op: "update", rows: 0 });
        }
        args.push(Box::new(SqlId(patch.lot.housing_id)));
        args.push(Box::new(SqlId(patch.lot.lot_id)));
        args.push(Box::new(patch.id));

        let sql = format!(
            "UPDATE {} SET {} WHERE housing_id = ? AND lot_id = ? AND id = ?",
            self.table.name(),
            sets.join(", ")
        );
        let affected = self
            .conn
            .prepare_cached(&sql)
            .and_then(|mut stmt| stmt.execute(params_from_iter(args.iter())))
            .map_err(self.sql_err("update a record"))?;
        if affected != 1 {
            return Err(StoreError::Affected { op: "update", rows: affected });
        }
        Ok(())
    }

    /// Remove one row. Used when a row is consumed whole or coalesced.
    pub fn del(&self, lot: &LotRef, id: i64) -> Result<(), StoreError> {
        self.deadline.check("delete")?;
        let sql = format!(
            "DELETE FROM {} WHERE housing_id = ?1 AND lot_id = ?2 AND id = ?3",
            self.table.name()
        );
        let affected = self
            .conn
            .prepare_cached(&sql)
            .and_then(|mut stmt| stmt.execute(params![SqlId(lot.housing_id), SqlId(lot.lot_id), id]))
            .map_err(self.sql_err("delete a record"))?;
        if affected != 1 {
            return Err(StoreError::Affected { op: "delete", rows: affected });
        }
        Ok(())
    }

    /// Does the row with `id` exist at all.
    #[cfg(test)]
    fn exists(&self, id: i64) -> Result<bool, StoreError> {
        use rusqlite::OptionalExtension;

        self.deadline.check("find slot")?;
        let sql = format!("SELECT 1 FROM {} WHERE id = ?1", self.table.name());
        self.conn
            .query_row(&sql, [id], |_| Ok(()))
            .optional()
            .map(|found| found.is_some())
            .map_err(self.sql_err("execute query"))
    }
}
