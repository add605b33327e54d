//! The statement record: SQL template, positional arguments, and elapsed time.

use crate::models::Value;
use serde::Serialize;
use std::fmt::Write as _;
use std::time::Duration;

/// Positional placeholder used by every supported dialect.
pub const PLACEHOLDER: char = '?';

/// A parameterized statement plus how long its last execution took.
///
/// `sql` and `args` are what the driver receives. [`Statement::render`] is for
/// humans only and never reaches the database.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Statement {
    pub sql: String,
    pub args: Vec<Value>,
    #[serde(serialize_with = "serialize_duration")]
    pub cost_time: Duration,
}

#[derive(Serialize)]
struct DebugRecord<'a> {
    sql: &'a str,
    costtime: String,
}

impl Statement {
    pub fn new(sql: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            sql: sql.into(),
            args,
            cost_time: Duration::ZERO,
        }
    }

    /// Number of `?` placeholders in the template.
    pub fn placeholder_count(&self) -> usize {
        self.sql.matches(PLACEHOLDER).count()
    }

    /// Substitute the display form of each argument into the template.
    ///
    /// Placeholders are consumed left to right in a single pass. Placeholders
    /// without a matching argument stay as `?`; surplus arguments are ignored.
    pub fn render(&self) -> String {
        let mut out = String::with_capacity(self.sql.len() + self.args.len() * 8);
        let mut args = self.args.iter();
        for ch in self.sql.chars() {
            if ch == PLACEHOLDER {
                if let Some(arg) = args.next() {
                    let _ = write!(out, "{}", arg.display_form());
                    continue;
                }
            }
            out.push(ch);
        }
        out
    }

    /// `{"sql":"<rendered>","costtime":"<duration>"}` for log sinks.
    pub fn to_json(&self) -> String {
        let sql = self.render();
        let record = DebugRecord {
            sql: &sql,
            costtime: format!("{:?}", self.cost_time),
        };
        serde_json::to_string(&record).unwrap_or_else(|_| String::from("{}"))
    }
}

impl std::fmt::Display for Statement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.render())
    }
}

fn serialize_duration<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&format!("{:?}", d))
}
