//! Dialect rules for assembling SQL text from builder state.
//!
//! The grammar never sees argument values except to append them to the
//! statement's argument list in placeholder order: columns first, then
//! predicates left to right.

use crate::error::{DbError, DbResult};
use crate::models::{PLACEHOLDER, Value};

const SYMBOLIC_OPERATORS: &[&str] = &["=", "<>", "!=", "<", "<=", ">", ">=", "<=>"];
const WORD_OPERATORS: &[&str] = &["LIKE", "NOT LIKE"];

/// How a predicate attaches to the one before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Conjunction {
    #[default]
    And,
    Or,
}

impl Conjunction {
    fn keyword(self) -> &'static str {
        match self {
            Self::And => "AND",
            Self::Or => "OR",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Compare { operator: String, value: Value },
    In(Vec<Value>),
    Null,
    NotNull,
}

/// One WHERE predicate.
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    pub column: String,
    pub condition: Condition,
    pub conjunction: Conjunction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Join {
    pub kind: JoinKind,
    pub table: String,
    pub first: String,
    pub operator: String,
    pub second: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub column: String,
    pub direction: Direction,
}

/// Everything after the table name that a builder accumulates.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Clauses {
    pub wheres: Vec<Predicate>,
    pub joins: Vec<Join>,
    pub orders: Vec<Order>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

/// Identifier quoting and table naming rules.
///
/// The default grammar leaves identifiers bare, which is what MySQL accepts for
/// ordinary names. Use [`Grammar::quoted`] when names may collide with keywords.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Grammar {
    quote: Option<char>,
    table_prefix: String,
}

impl Grammar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Grammar that wraps every identifier segment in `quote`.
    pub fn quoted(quote: char) -> Self {
        Self {
            quote: Some(quote),
            table_prefix: String::new(),
        }
    }

    pub fn with_table_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.table_prefix = prefix.into();
        self
    }

    pub fn table_prefix(&self) -> &str {
        &self.table_prefix
    }

    /// Prefix and wrap a table name. With `schema.table`, only the table gets the prefix.
    pub fn wrap_table(&self, table: &str) -> String {
        self.quote_segments(&self.prefix_last(table))
    }

    /// Wrap a possibly dotted column. In `table.column` and `schema.table.column`
    /// the table segment gets the prefix. `*` is never quoted.
    pub fn wrap(&self, identifier: &str) -> String {
        match identifier.rsplit_once('.') {
            Some((table, column)) => {
                self.quote_segments(&format!("{}.{}", self.prefix_last(table), column))
            }
            None => self.quote_segments(identifier),
        }
    }

    fn prefix_last(&self, table: &str) -> String {
        match table.rsplit_once('.') {
            Some((schema, name)) => format!("{}.{}{}", schema, self.table_prefix, name),
            None => format!("{}{}", self.table_prefix, table),
        }
    }

    fn quote_segments(&self, identifier: &str) -> String {
        let Some(q) = self.quote else {
            return identifier.to_string();
        };
        identifier
            .split('.')
            .map(|segment| {
                if segment == "*" {
                    segment.to_string()
                } else {
                    let escaped = segment.replace(q, &format!("{q}{q}"));
                    format!("{q}{escaped}{q}")
                }
            })
            .collect::<Vec<_>>()
            .join(".")
    }

    /// Comma-separated wrapped column list; empty means `*`.
    pub fn columnize<S: AsRef<str>>(&self, columns: &[S]) -> String {
        if columns.is_empty() {
            return "*".to_string();
        }
        columns
            .iter()
            .map(|c| self.wrap(c.as_ref()))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// `?, ?, ...` with `count` placeholders.
    pub fn parameterize(&self, count: usize) -> String {
        vec![PLACEHOLDER.to_string(); count].join(", ")
    }

    /// Render the WHERE clause (without a leading space) and push its arguments.
    ///
    /// Returns an empty string when there are no predicates. The first
    /// predicate's conjunction is ignored.
    pub fn compile_wheres(&self, wheres: &[Predicate], args: &mut Vec<Value>) -> DbResult<String> {
        if wheres.is_empty() {
            return Ok(String::new());
        }
        let mut sql = String::from("WHERE ");
        for (idx, predicate) in wheres.iter().enumerate() {
            if idx > 0 {
                sql.push(' ');
                sql.push_str(predicate.conjunction.keyword());
                sql.push(' ');
            }
            sql.push_str(&self.compile_predicate(predicate, args)?);
        }
        Ok(sql)
    }

    fn compile_predicate(&self, predicate: &Predicate, args: &mut Vec<Value>) -> DbResult<String> {
        let column = self.wrap(&predicate.column);
        match &predicate.condition {
            Condition::Compare { operator, value } => {
                let rendered = format!("{}{}{}", column, Self::operator(operator)?, PLACEHOLDER);
                args.push(value.clone());
                Ok(rendered)
            }
            Condition::In(values) => {
                if values.is_empty() {
                    return Err(DbError::invalid_input(format!(
                        "IN list for column {} is empty",
                        predicate.column
                    )));
                }
                args.extend(values.iter().cloned());
                Ok(format!("{} IN ({})", column, self.parameterize(values.len())))
            }
            Condition::Null => Ok(format!("{} IS NULL", column)),
            Condition::NotNull => Ok(format!("{} IS NOT NULL", column)),
        }
    }

    /// Normalized operator text including any surrounding spaces.
    fn operator(raw: &str) -> DbResult<String> {
        let trimmed = raw.trim();
        if SYMBOLIC_OPERATORS.contains(&trimmed) {
            return Ok(trimmed.to_string());
        }
        let upper = trimmed
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_ascii_uppercase();
        if WORD_OPERATORS.contains(&upper.as_str()) {
            return Ok(format!(" {} ", upper));
        }
        Err(DbError::invalid_input(format!("Unsupported operator: {}", raw)))
    }

    /// `INSERT INTO <table> (<cols>) VALUES (<placeholders>)`
    pub fn compile_insert<S: AsRef<str>>(&self, table: &str, columns: &[S]) -> String {
        format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.wrap_table(table),
            self.columnize(columns),
            self.parameterize(columns.len())
        )
    }

    /// `UPDATE <table> SET <col>=?[, ...] WHERE ...`
    ///
    /// `args` must already hold the SET values; predicate arguments are appended.
    pub fn compile_update<S: AsRef<str>>(
        &self,
        table: &str,
        columns: &[S],
        wheres: &[Predicate],
        args: &mut Vec<Value>,
    ) -> DbResult<String> {
        let sets = columns
            .iter()
            .map(|c| format!("{}={}", self.wrap(c.as_ref()), PLACEHOLDER))
            .collect::<Vec<_>>()
            .join(", ");
        let wheres = self.compile_wheres(wheres, args)?;
        Ok(Self::concat(&[
            format!("UPDATE {} SET {}", self.wrap_table(table), sets),
            wheres,
        ]))
    }

    /// `DELETE FROM <table> WHERE ...`
    pub fn compile_delete(
        &self,
        table: &str,
        wheres: &[Predicate],
        args: &mut Vec<Value>,
    ) -> DbResult<String> {
        let wheres = self.compile_wheres(wheres, args)?;
        Ok(Self::concat(&[
            format!("DELETE FROM {}", self.wrap_table(table)),
            wheres,
        ]))
    }

    /// `SELECT <cols> FROM <table> [JOIN] [WHERE] [ORDER BY] [LIMIT] [OFFSET]`
    pub fn compile_select<S: AsRef<str>>(
        &self,
        table: &str,
        columns: &[S],
        clauses: &Clauses,
        args: &mut Vec<Value>,
    ) -> DbResult<String> {
        if clauses.offset.is_some() && clauses.limit.is_none() {
            return Err(DbError::invalid_input("OFFSET requires a LIMIT"));
        }

        let mut parts = vec![format!(
            "SELECT {} FROM {}",
            self.columnize(columns),
            self.wrap_table(table)
        )];
        for join in &clauses.joins {
            parts.push(self.compile_join(join)?);
        }
        parts.push(self.compile_wheres(&clauses.wheres, args)?);
        if !clauses.orders.is_empty() {
            let orders = clauses
                .orders
                .iter()
                .map(|o| {
                    let direction = match o.direction {
                        Direction::Asc => "ASC",
                        Direction::Desc => "DESC",
                    };
                    format!("{} {}", self.wrap(&o.column), direction)
                })
                .collect::<Vec<_>>()
                .join(", ");
            parts.push(format!("ORDER BY {}", orders));
        }
        if let Some(limit) = clauses.limit {
            parts.push(format!("LIMIT {}", limit));
        }
        if let Some(offset) = clauses.offset {
            parts.push(format!("OFFSET {}", offset));
        }
        Ok(Self::concat(&parts))
    }

    fn compile_join(&self, join: &Join) -> DbResult<String> {
        let operator = join.operator.trim();
        if !SYMBOLIC_OPERATORS.contains(&operator) {
            return Err(DbError::invalid_input(format!(
                "Unsupported join operator: {}",
                join.operator
            )));
        }
        let keyword = match join.kind {
            JoinKind::Inner => "INNER JOIN",
            JoinKind::Left => "LEFT JOIN",
        };
        Ok(format!(
            "{} {} ON {} {} {}",
            keyword,
            self.wrap_table(&join.table),
            self.wrap(&join.first),
            operator,
            self.wrap(&join.second)
        ))
    }

    fn concat(parts: &[String]) -> String {
        parts
            .iter()
            .filter(|p| !p.is_empty())
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eq(column: &str, value: impl Into<Value>) -> Predicate {
        Predicate {
            column: column.to_string(),
            condition: Condition::Compare {
                operator: "=".to_string(),
                value: value.into(),
            },
            conjunction: Conjunction::And,
        }
    }

    #[test]
    fn test_wrap_unquoted_by_default() {
        let g = Grammar::default();
        assert_eq!(g.wrap("users.id"), "users.id");
        assert_eq!(g.wrap_table("ott_video"), "ott_video");
    }

    #[test]
    fn test_wrap_quoted() {
        let g = Grammar::quoted('`');
        assert_eq!(g.wrap("users.id"), "`users`.`id`");
        assert_eq!(g.wrap("users.*"), "`users`.*");
        assert_eq!(g.wrap("we`ird"), "`we``ird`");
    }

    #[test]
    fn test_table_prefix() {
        let g = Grammar::default().with_table_prefix("ott_");
        assert_eq!(g.wrap_table("video"), "ott_video");
        assert_eq!(g.wrap_table("media.video"), "media.ott_video");
        assert_eq!(g.wrap("video.id"), "ott_video.id");
        assert_eq!(g.wrap("media.video.id"), "media.ott_video.id");
        assert_eq!(g.wrap("video.*"), "ott_video.*");
        assert_eq!(g.wrap("id"), "id");
    }

    #[test]
    fn test_columnize_and_parameterize() {
        let g = Grammar::default();
        assert_eq!(g.columnize(&["id", "name"]), "id, name");
        assert_eq!(g.columnize::<&str>(&[]), "*");
        assert_eq!(g.parameterize(3), "?, ?, ?");
        assert_eq!(g.parameterize(0), "");
    }

    #[test]
    fn test_compile_wheres_mixed() {
        let g = Grammar::default();
        let wheres = vec![
            eq("id", 1),
            Predicate {
                column: "name".into(),
                condition: Condition::Compare {
                    operator: "like".into(),
                    value: "M%".into(),
                },
                conjunction: Conjunction::Or,
            },
            Predicate {
                column: "state".into(),
                condition: Condition::In(vec![1.into(), 2.into()]),
                conjunction: Conjunction::And,
            },
            Predicate {
                column: "deleted_at".into(),
                condition: Condition::Null,
                conjunction: Conjunction::And,
            },
        ];
        let mut args = Vec::new();
        let sql = g.compile_wheres(&wheres, &mut args).unwrap();
        assert_eq!(
            sql,
            "WHERE id=? OR name LIKE ? AND state IN (?, ?) AND deleted_at IS NULL"
        );
        assert_eq!(args, vec![1.into(), "M%".into(), 1.into(), 2.into()]);
    }

    #[test]
    fn test_first_conjunction_ignored() {
        let mut first = eq("id", 1);
        first.conjunction = Conjunction::Or;
        let mut args = Vec::new();
        let sql = Grammar::default().compile_wheres(&[first], &mut args).unwrap();
        assert_eq!(sql, "WHERE id=?");
    }

    #[test]
    fn test_rejects_unknown_operator() {
        let predicate = Predicate {
            column: "id".into(),
            condition: Condition::Compare {
                operator: "; DROP TABLE x; --".into(),
                value: 1.into(),
            },
            conjunction: Conjunction::And,
        };
        let result = Grammar::default().compile_wheres(&[predicate], &mut Vec::new());
        assert!(matches!(result, Err(DbError::InvalidInput { .. })));
    }

    #[test]
    fn test_rejects_empty_in_list() {
        let predicate = Predicate {
            column: "id".into(),
            condition: Condition::In(Vec::new()),
            conjunction: Conjunction::And,
        };
        let result = Grammar::default().compile_wheres(&[predicate], &mut Vec::new());
        assert!(matches!(result, Err(DbError::InvalidInput { .. })));
    }

    #[test]
    fn test_compile_insert() {
        let sql = Grammar::default().compile_insert("ott_video", &["id", "name"]);
        assert_eq!(sql, "INSERT INTO ott_video (id, name) VALUES (?, ?)");
    }

    #[test]
    fn test_compile_update_orders_args() {
        let mut args = vec![Value::from("Mike")];
        let sql = Grammar::default()
            .compile_update("ott_video", &["name"], &[eq("id", 1)], &mut args)
            .unwrap();
        assert_eq!(sql, "UPDATE ott_video SET name=? WHERE id=?");
        assert_eq!(args, vec![Value::from("Mike"), Value::from(1)]);
    }

    #[test]
    fn test_compile_select_full() {
        let clauses = Clauses {
            wheres: vec![eq("video.state", 1)],
            joins: vec![Join {
                kind: JoinKind::Left,
                table: "tag".into(),
                first: "tag.video_id".into(),
                operator: "=".into(),
                second: "video.id".into(),
            }],
            orders: vec![
                Order {
                    column: "video.id".into(),
                    direction: Direction::Desc,
                },
                Order {
                    column: "tag.name".into(),
                    direction: Direction::Asc,
                },
            ],
            limit: Some(10),
            offset: Some(20),
        };
        let mut args = Vec::new();
        let sql = Grammar::quoted('`')
            .with_table_prefix("ott_")
            .compile_select("video", &["video.id", "tag.name"], &clauses, &mut args)
            .unwrap();
        assert_eq!(
            sql,
            "SELECT `ott_video`.`id`, `ott_tag`.`name` FROM `ott_video` LEFT JOIN `ott_tag` ON `ott_tag`.`video_id` = `ott_video`.`id` WHERE `ott_video`.`state`=? ORDER BY `ott_video`.`id` DESC, `ott_tag`.`name` ASC LIMIT 10 OFFSET 20"
        );
        assert_eq!(args, vec![Value::from(1)]);
    }

    #[test]
    fn test_offset_without_limit() {
        let clauses = Clauses {
            offset: Some(5),
            ..Clauses::default()
        };
        let result = Grammar::default().compile_select::<&str>("t", &[], &clauses, &mut Vec::new());
        assert!(matches!(result, Err(DbError::InvalidInput { .. })));
    }
}
