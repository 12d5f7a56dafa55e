//! # Assembler
//!
//! Renders a `QueryBuilder`'s accumulated state to parameterized SQL. Walks
//! clauses in a fixed order — WHERE → GROUP → HAVING → ORDER → LIMIT →
//! OFFSET → LOCK — so that positional parameters line up with the
//! adapter's placeholder style regardless of the order the caller chained
//! builder methods in.

use sqlx::any::AnyArguments;

use crate::adapter::{Drivers, LockMode};
use crate::model::ColumnValue;
use crate::query::predicate::{ComparisonOp, Predicate};
use crate::value_binding::bind_column_value;

/// The rendered form of a query: a SQL template plus parallel bound
/// arguments, ready to hand to `sqlx::query_with`/`query_as_with`.
pub struct Assembled<'a> {
    pub sql: String,
    pub args: AnyArguments<'a>,
}

/// Stateless renderer; one `Assembler` per render call. Holds only the
/// driver, since quoting and placeholder style are dialect-specific.
pub struct Assembler {
    driver: Drivers,
}

impl Assembler {
    pub fn new(driver: Drivers) -> Self {
        Self { driver }
    }

    /// The dialect this assembler renders for.
    pub fn driver(&self) -> Drivers {
        self.driver
    }

    /// Renders a standalone predicate (no surrounding `SELECT`) into an
    /// already-in-progress argument list, continuing placeholder numbering
    /// from `idx`. Used by `update_all`/`delete_all`, which build their own
    /// `UPDATE`/`DELETE` prefix and need the WHERE fragment's parameters
    /// appended after their own SET-clause parameters.
    pub fn render_where(&self, pred: &Predicate, args: &mut AnyArguments<'_>, idx: &mut usize) -> String {
        self.render_predicate(pred, args, idx)
    }

    /// Renders a `Predicate` tree to a boolean SQL expression, appending
    /// bound parameters to `args` and advancing `placeholder_idx` (1-indexed,
    /// only meaningful for Postgres's `$N` style).
    fn render_predicate(&self, pred: &Predicate, args: &mut AnyArguments<'_>, idx: &mut usize) -> String {
        match pred {
            Predicate::Comparison { column, op, values } => self.render_comparison(column, *op, values, args, idx),
            Predicate::And(a, b) => {
                format!("({} AND {})", self.render_predicate(a, args, idx), self.render_predicate(b, args, idx))
            }
            Predicate::Or(a, b) => {
                format!("({} OR {})", self.render_predicate(a, args, idx), self.render_predicate(b, args, idx))
            }
            Predicate::Not(inner) => format!("NOT ({})", self.render_predicate(inner, args, idx)),
            Predicate::Raw { template, params } => {
                let mut rendered = String::new();
                let mut param_iter = params.iter();
                for ch in template.chars() {
                    if ch == '?' {
                        if let Some(p) = param_iter.next() {
                            rendered.push_str(&self.next_placeholder(idx));
                            bind_column_value(args, p, &self.driver);
                        }
                    } else {
                        rendered.push(ch);
                    }
                }
                rendered
            }
            Predicate::Exists(sub) => format!("EXISTS ({})", self.inline_subquery(&sub.sql, &sub.params, args, idx)),
            Predicate::NotExists(sub) => {
                format!("NOT EXISTS ({})", self.inline_subquery(&sub.sql, &sub.params, args, idx))
            }
        }
    }

    fn inline_subquery(
        &self,
        sql: &str,
        params: &[ColumnValue],
        args: &mut AnyArguments<'_>,
        idx: &mut usize,
    ) -> String {
        for p in params {
            bind_column_value(args, p, &self.driver);
            let _ = self.next_placeholder(idx);
        }
        sql.to_string()
    }

    fn next_placeholder(&self, idx: &mut usize) -> String {
        let p = self.driver.placeholder(*idx);
        *idx += 1;
        p
    }

    fn render_comparison(
        &self,
        column: &str,
        op: ComparisonOp,
        values: &[ColumnValue],
        args: &mut AnyArguments<'_>,
        idx: &mut usize,
    ) -> String {
        let quoted = self.driver.quote(column);
        match op {
            ComparisonOp::IsNull => format!("{} IS NULL", quoted),
            ComparisonOp::IsNotNull => format!("{} IS NOT NULL", quoted),
            ComparisonOp::Between => {
                let lo = self.next_placeholder(idx);
                bind_column_value(args, &values[0], &self.driver);
                let hi = self.next_placeholder(idx);
                bind_column_value(args, &values[1], &self.driver);
                format!("{} BETWEEN {} AND {}", quoted, lo, hi)
            }
            ComparisonOp::In | ComparisonOp::NotIn => {
                let keyword = if op == ComparisonOp::In { "IN" } else { "NOT IN" };
                if values.is_empty() {
                    // An empty IN-list is always false; NOT IN is always true.
                    return if op == ComparisonOp::In { "1 = 0".to_string() } else { "1 = 1".to_string() };
                }
                let placeholders: Vec<String> = values
                    .iter()
                    .map(|v| {
                        let ph = self.next_placeholder(idx);
                        bind_column_value(args, v, &self.driver);
                        ph
                    })
                    .collect();
                format!("{} {} ({})", quoted, keyword, placeholders.join(", "))
            }
            _ => {
                let op_str = match op {
                    ComparisonOp::Eq => "=",
                    ComparisonOp::NotEq => "!=",
                    ComparisonOp::Lt => "<",
                    ComparisonOp::Lte => "<=",
                    ComparisonOp::Gt => ">",
                    ComparisonOp::Gte => ">=",
                    ComparisonOp::Like => "LIKE",
                    ComparisonOp::ILike if matches!(self.driver, Drivers::Postgres) => "ILIKE",
                    ComparisonOp::ILike => "LIKE",
                    _ => unreachable!(),
                };
                let ph = self.next_placeholder(idx);
                bind_column_value(args, &values[0], &self.driver);
                format!("{} {} {}", quoted, op_str, ph)
            }
        }
    }

    /// Renders a full `SELECT` statement against `table` for the given
    /// clause set, in the fixed WHERE → GROUP → HAVING → ORDER → LIMIT →
    /// OFFSET → LOCK order.
    #[allow(clippy::too_many_arguments)]
    pub fn assemble_select<'a>(
        &self,
        table: &str,
        select_list: &[String],
        where_clause: Option<&Predicate>,
        group_by: &[String],
        having: Option<&Predicate>,
        order_by: &[(String, bool)],
        limit: Option<i64>,
        offset: Option<i64>,
        lock_mode: Option<LockMode>,
        distinct: bool,
        annotation: Option<&str>,
    ) -> Assembled<'a> {
        let mut args = AnyArguments::default();
        let mut idx = 1usize;

        let projection = if select_list.is_empty() {
            "*".to_string()
        } else {
            select_list.iter().map(|c| self.driver.quote(c)).collect::<Vec<_>>().join(", ")
        };
        let distinct_kw = if distinct { "DISTINCT " } else { "" };
        let mut sql = format!("SELECT {}{} FROM {}", distinct_kw, projection, self.driver.quote(table));

        if let Some(pred) = where_clause {
            sql.push_str(" WHERE ");
            sql.push_str(&self.render_predicate(pred, &mut args, &mut idx));
        }

        if !group_by.is_empty() {
            let cols = group_by.iter().map(|c| self.driver.quote(c)).collect::<Vec<_>>().join(", ");
            sql.push_str(" GROUP BY ");
            sql.push_str(&cols);
        }

        if let Some(pred) = having {
            sql.push_str(" HAVING ");
            sql.push_str(&self.render_predicate(pred, &mut args, &mut idx));
        }

        if !order_by.is_empty() {
            let cols = order_by
                .iter()
                .map(|(c, asc)| format!("{} {}", self.driver.quote(c), if *asc { "ASC" } else { "DESC" }))
                .collect::<Vec<_>>()
                .join(", ");
            sql.push_str(" ORDER BY ");
            sql.push_str(&cols);
        }

        if let Some(n) = limit {
            let ph = self.next_placeholder(&mut idx);
            bind_column_value(&mut args, &ColumnValue::I64(n), &self.driver);
            sql.push_str(&format!(" LIMIT {}", ph));
        }

        if let Some(n) = offset {
            let ph = self.next_placeholder(&mut idx);
            bind_column_value(&mut args, &ColumnValue::I64(n), &self.driver);
            sql.push_str(&format!(" OFFSET {}", ph));
        }

        if let Some(mode) = lock_mode {
            sql.push_str(self.driver.lock_clause(mode));
        }

        if let Some(comment) = annotation {
            sql.push_str(&format!(" /* {} */", comment.replace("*/", "")));
        }

        Assembled { sql, args }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_clause_order_is_respected() {
        let asm = Assembler::new(Drivers::Postgres);
        let where_pred = Predicate::eq("age", ColumnValue::I32(18));
        let having_pred = Predicate::gt("cnt", ColumnValue::I64(1));
        let assembled = asm.assemble_select(
            "users",
            &[],
            Some(&where_pred),
            &["dept".to_string()],
            Some(&having_pred),
            &[("id".to_string(), true)],
            Some(10),
            Some(5),
            None,
            false,
            None,
        );
        let where_pos = assembled.sql.find("WHERE").unwrap();
        let group_pos = assembled.sql.find("GROUP BY").unwrap();
        let having_pos = assembled.sql.find("HAVING").unwrap();
        let order_pos = assembled.sql.find("ORDER BY").unwrap();
        let limit_pos = assembled.sql.find("LIMIT").unwrap();
        let offset_pos = assembled.sql.find("OFFSET").unwrap();
        assert!(where_pos < group_pos);
        assert!(group_pos < having_pos);
        assert!(having_pos < order_pos);
        assert!(order_pos < limit_pos);
        assert!(limit_pos < offset_pos);
    }

    #[test]
    fn empty_in_list_short_circuits() {
        let asm = Assembler::new(Drivers::SQLite);
        let pred = Predicate::in_list("id", vec![]);
        let assembled = asm.assemble_select("t", &[], Some(&pred), &[], None, &[], None, None, None, false, None);
        assert!(assembled.sql.contains("1 = 0"));
    }
}
