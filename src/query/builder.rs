//! Chainable statement builder.
//!
//! A builder collects a table, predicates, and select modifiers, then renders a
//! [`Statement`] through its [`Grammar`]. Builders obtained from
//! [`Connection::new_query`] can also run what they render; builders from
//! [`Builder::new`] only render.
//!
//! ```ignore
//! let stmt = Builder::new(Grammar::default())
//!     .table("ott_video")
//!     .where_eq("id", 1)
//!     .update_sql(&video)?;
//! assert_eq!(stmt.sql, "UPDATE ott_video SET name=? WHERE id=?");
//! ```

use crate::db::Connection;
use crate::error::{DbError, DbResult};
use crate::models::{ExecResult, Row, Rows, Statement, Value};
use crate::query::grammar::{
    Clauses, Condition, Conjunction, Direction, Grammar, Join, JoinKind, Order, Predicate,
};
use crate::query::record::Record;

/// One INSERT template with an argument row per record.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchInsert {
    pub sql: String,
    pub rows: Vec<Vec<Value>>,
}

#[derive(Debug, Clone)]
pub struct Builder<'c> {
    connection: Option<&'c Connection>,
    grammar: Grammar,
    table: Option<String>,
    clauses: Clauses,
}

impl Builder<'static> {
    /// An unbound builder. Rendering works; executing fails with `InvalidInput`.
    pub fn new(grammar: Grammar) -> Self {
        Self {
            connection: None,
            grammar,
            table: None,
            clauses: Clauses::default(),
        }
    }
}

impl<'c> Builder<'c> {
    pub(crate) fn bound(connection: &'c Connection, grammar: Grammar) -> Self {
        Self {
            connection: Some(connection),
            grammar,
            table: None,
            clauses: Clauses::default(),
        }
    }

    pub fn table(mut self, name: impl Into<String>) -> Self {
        self.table = Some(name.into());
        self
    }

    pub fn where_eq(self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.where_op(column, "=", value)
    }

    pub fn where_op(
        self,
        column: impl Into<String>,
        operator: impl Into<String>,
        value: impl Into<Value>,
    ) -> Self {
        self.compare(column, operator, value, Conjunction::And)
    }

    pub fn or_where_eq(self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.or_where_op(column, "=", value)
    }

    pub fn or_where_op(
        self,
        column: impl Into<String>,
        operator: impl Into<String>,
        value: impl Into<Value>,
    ) -> Self {
        self.compare(column, operator, value, Conjunction::Or)
    }

    pub fn where_in<I, V>(self, column: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let values = values.into_iter().map(Into::into).collect();
        self.predicate(column, Condition::In(values), Conjunction::And)
    }

    pub fn where_null(self, column: impl Into<String>) -> Self {
        self.predicate(column, Condition::Null, Conjunction::And)
    }

    pub fn where_not_null(self, column: impl Into<String>) -> Self {
        self.predicate(column, Condition::NotNull, Conjunction::And)
    }

    pub fn join(
        self,
        table: impl Into<String>,
        first: impl Into<String>,
        operator: impl Into<String>,
        second: impl Into<String>,
    ) -> Self {
        self.push_join(JoinKind::Inner, table, first, operator, second)
    }

    pub fn left_join(
        self,
        table: impl Into<String>,
        first: impl Into<String>,
        operator: impl Into<String>,
        second: impl Into<String>,
    ) -> Self {
        self.push_join(JoinKind::Left, table, first, operator, second)
    }

    pub fn order_by(mut self, column: impl Into<String>, direction: Direction) -> Self {
        self.clauses.orders.push(Order {
            column: column.into(),
            direction,
        });
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.clauses.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.clauses.offset = Some(offset);
        self
    }

    fn compare(
        self,
        column: impl Into<String>,
        operator: impl Into<String>,
        value: impl Into<Value>,
        conjunction: Conjunction,
    ) -> Self {
        let condition = Condition::Compare {
            operator: operator.into(),
            value: value.into(),
        };
        self.predicate(column, condition, conjunction)
    }

    fn predicate(
        mut self,
        column: impl Into<String>,
        condition: Condition,
        conjunction: Conjunction,
    ) -> Self {
        self.clauses.wheres.push(Predicate {
            column: column.into(),
            condition,
            conjunction,
        });
        self
    }

    fn push_join(
        mut self,
        kind: JoinKind,
        table: impl Into<String>,
        first: impl Into<String>,
        operator: impl Into<String>,
        second: impl Into<String>,
    ) -> Self {
        self.clauses.joins.push(Join {
            kind,
            table: table.into(),
            first: first.into(),
            operator: operator.into(),
            second: second.into(),
        });
        self
    }

    // ---------------------------------------------------------------------
    // Rendering
    // ---------------------------------------------------------------------

    fn target(&self) -> DbResult<&str> {
        self.table.as_deref().ok_or(DbError::MissingTable)
    }

    fn require_where(&self, operation: &'static str) -> DbResult<()> {
        if self.clauses.wheres.is_empty() {
            return Err(DbError::MissingWhere { operation });
        }
        Ok(())
    }

    fn record_values<R: Record>(record: &R) -> DbResult<(Vec<&'static str>, Vec<Value>)> {
        let (columns, values): (Vec<_>, Vec<_>) = record.values().into_iter().unzip();
        if columns.is_empty() {
            return Err(DbError::invalid_input("Record has no writable fields"));
        }
        Ok((columns, values))
    }

    pub fn insert_sql<R: Record>(&self, record: &R) -> DbResult<Statement> {
        let table = self.target()?;
        let (columns, args) = Self::record_values(record)?;
        Ok(Statement::new(
            self.grammar.compile_insert(table, &columns),
            args,
        ))
    }

    /// Refuses to render without at least one predicate.
    pub fn update_sql<R: Record>(&self, record: &R) -> DbResult<Statement> {
        let table = self.target()?;
        self.require_where("UPDATE")?;
        let (columns, mut args) = Self::record_values(record)?;
        let sql = self
            .grammar
            .compile_update(table, &columns, &self.clauses.wheres, &mut args)?;
        Ok(Statement::new(sql, args))
    }

    /// Refuses to render without at least one predicate.
    pub fn delete_sql(&self) -> DbResult<Statement> {
        let table = self.target()?;
        self.require_where("DELETE")?;
        let mut args = Vec::new();
        let sql = self
            .grammar
            .compile_delete(table, &self.clauses.wheres, &mut args)?;
        Ok(Statement::new(sql, args))
    }

    /// An empty column list selects `*`.
    pub fn select_sql(&self, columns: &[&str]) -> DbResult<Statement> {
        self.compile_select(columns, &self.clauses)
    }

    fn compile_select(&self, columns: &[&str], clauses: &Clauses) -> DbResult<Statement> {
        let table = self.target()?;
        let mut args = Vec::new();
        let sql = self
            .grammar
            .compile_select(table, columns, clauses, &mut args)?;
        Ok(Statement::new(sql, args))
    }

    pub fn multi_insert_sql<R: Record>(&self, records: &[R]) -> DbResult<BatchInsert> {
        let table = self.target()?;
        if records.is_empty() {
            return Err(DbError::invalid_input("No records to insert"));
        }
        let columns = R::schema().columns();
        if columns.is_empty() {
            return Err(DbError::invalid_input("Record has no writable fields"));
        }
        let rows = records
            .iter()
            .map(|r| r.values().into_iter().map(|(_, v)| v).collect())
            .collect();
        Ok(BatchInsert {
            sql: self.grammar.compile_insert(table, &columns),
            rows,
        })
    }

    // ---------------------------------------------------------------------
    // Execution
    // ---------------------------------------------------------------------

    fn connection(&self) -> DbResult<&'c Connection> {
        self.connection.ok_or_else(|| {
            DbError::invalid_input("Builder is not bound to a connection; use Connection::new_query")
        })
    }

    /// Run an INSERT and return the generated id.
    pub async fn insert<R: Record>(&self, record: &R) -> DbResult<i64> {
        let conn = self.connection()?;
        let stmt = self.insert_sql(record)?;
        Ok(conn.execute(&stmt.sql, stmt.args).await?.last_insert_id)
    }

    /// Run an UPDATE and return the number of rows affected.
    pub async fn update<R: Record>(&self, record: &R) -> DbResult<u64> {
        let conn = self.connection()?;
        let stmt = self.update_sql(record)?;
        Ok(conn.execute(&stmt.sql, stmt.args).await?.rows_affected)
    }

    /// Run a DELETE and return the number of rows affected.
    pub async fn delete(&self) -> DbResult<u64> {
        let conn = self.connection()?;
        let stmt = self.delete_sql()?;
        Ok(conn.execute(&stmt.sql, stmt.args).await?.rows_affected)
    }

    pub async fn get(&self, columns: &[&str]) -> DbResult<Rows> {
        let conn = self.connection()?;
        let stmt = self.select_sql(columns)?;
        conn.query(&stmt.sql, stmt.args).await
    }

    /// Like [`get`](Self::get) with `LIMIT 1`, returning the row if any.
    pub async fn first(&self, columns: &[&str]) -> DbResult<Option<Row>> {
        let conn = self.connection()?;
        let clauses = Clauses {
            limit: Some(1),
            ..self.clauses.clone()
        };
        let stmt = self.compile_select(columns, &clauses)?;
        let rows = conn.query(&stmt.sql, stmt.args).await?;
        Ok(rows.into_iter().next())
    }

    /// Insert every record with one prepared statement, returning the ids in order.
    pub async fn multi_insert<R: Record>(&self, records: &[R]) -> DbResult<Vec<i64>> {
        let conn = self.connection()?;
        let batch = self.multi_insert_sql(records)?;
        conn.multi_insert(&batch.sql, batch.rows).await
    }

    /// Run a prebuilt write through the bound connection.
    pub async fn execute(&self, statement: Statement) -> DbResult<ExecResult> {
        self.connection()?
            .execute(&statement.sql, statement.args)
            .await
    }
}
