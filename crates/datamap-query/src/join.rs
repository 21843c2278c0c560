//! JOIN nodes.
//!
//! A join source is a typed entity table, a verbatim string (for self-joins
//! needing distinct aliases), or a subquery with its own parameter list.
//! `on` may be called repeatedly; clauses AND-combine.

use crate::expr::Expr;
use crate::query::Query;
use datamap_core::{Entity, SqlEnv, Value};

/// Join flavors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
    Right,
    Cross,
}

impl JoinKind {
    /// SQL keyword for this join kind.
    pub const fn as_str(self) -> &'static str {
        match self {
            JoinKind::Inner => "INNER JOIN",
            JoinKind::Left => "LEFT JOIN",
            JoinKind::Right => "RIGHT JOIN",
            JoinKind::Cross => "CROSS JOIN",
        }
    }
}

/// What is being joined.
#[derive(Debug, Clone)]
pub enum JoinSource {
    /// A table reference, emitted verbatim (`"player_home AS h2"` allowed).
    Table(String),
    /// A parenthesized subquery with a required alias.
    Subquery { query: Box<Query>, alias: String },
}

/// A JOIN clause.
#[derive(Debug, Clone)]
pub struct Join {
    pub kind: JoinKind,
    pub source: JoinSource,
    on: Vec<Expr>,
}

impl Join {
    /// INNER JOIN on a table reference.
    pub fn inner(table: impl Into<String>) -> Self {
        Self::new(JoinKind::Inner, JoinSource::Table(table.into()))
    }

    /// LEFT JOIN on a table reference.
    pub fn left(table: impl Into<String>) -> Self {
        Self::new(JoinKind::Left, JoinSource::Table(table.into()))
    }

    /// RIGHT JOIN on a table reference.
    pub fn right(table: impl Into<String>) -> Self {
        Self::new(JoinKind::Right, JoinSource::Table(table.into()))
    }

    /// CROSS JOIN on a table reference.
    pub fn cross(table: impl Into<String>) -> Self {
        Self::new(JoinKind::Cross, JoinSource::Table(table.into()))
    }

    /// INNER JOIN on an entity's table.
    pub fn inner_entity<T: Entity>() -> Self {
        Self::inner(T::descriptor().table_name)
    }

    /// LEFT JOIN on an entity's table.
    pub fn left_entity<T: Entity>() -> Self {
        Self::left(T::descriptor().table_name)
    }

    /// INNER JOIN on a subquery under `alias`.
    ///
    /// The subquery's parameters bind before any ON or outer WHERE
    /// parameters, matching their position in the FROM clause.
    pub fn subquery(query: Query, alias: impl Into<String>) -> Self {
        Self::new(
            JoinKind::Inner,
            JoinSource::Subquery {
                query: Box::new(query),
                alias: alias.into(),
            },
        )
    }

    fn new(kind: JoinKind, source: JoinSource) -> Self {
        Self {
            kind,
            source,
            on: Vec::new(),
        }
    }

    /// Add an ON clause; repeated calls AND-combine.
    pub fn on(mut self, pred: Expr) -> Self {
        self.on.push(pred);
        self
    }

    /// Render this join, pushing subquery parameters then ON parameters.
    pub(crate) fn render(&self, env: &SqlEnv, params: &mut Vec<Value>) -> String {
        let source = match &self.source {
            JoinSource::Table(t) => t.clone(),
            JoinSource::Subquery { query, alias } => {
                let sub_sql = query.render_into(env, params);
                format!("({sub_sql}) AS {}", env.quote(alias))
            }
        };
        let mut sql = format!(" {} {source}", self.kind.as_str());
        if !self.on.is_empty() {
            let on_sql = self
                .on
                .iter()
                .map(|e| e.render(env, params))
                .collect::<Vec<_>>()
                .join(" AND ");
            sql.push_str(&format!(" ON {on_sql}"));
        }
        sql
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{col, pre};
    use datamap_core::Dialect;

    #[test]
    fn string_form_table_emitted_verbatim() {
        let env = SqlEnv::new(Dialect::Sqlite);
        let mut params = Vec::new();
        let join = Join::inner("player_home AS h2")
            .on(col("h1.world").eq(pre("h2.world")))
            .on(col("h1.username").lt(pre("h2.username")));
        let sql = join.render(&env, &mut params);
        assert_eq!(
            sql,
            " INNER JOIN player_home AS h2 ON `h1`.`world` = `h2`.`world` \
             AND `h1`.`username` < `h2`.`username`"
        );
        assert!(params.is_empty());
    }

    #[test]
    fn subquery_params_precede_on_params() {
        let env = SqlEnv::new(Dialect::Postgres);
        let mut params = Vec::new();
        let sub = Query::new("scores").rows(["player"]).filter(col("points").gt(100));
        let join = Join::subquery(sub, "s").on(col("s.player").eq("u"));
        let sql = join.render(&env, &mut params);
        assert!(sql.contains("(SELECT"));
        assert!(sql.contains("AS \"s\""));
        assert_eq!(
            params,
            vec![Value::Int(100), Value::Text("u".into())]
        );
        // ON placeholder numbers after the subquery's
        assert!(sql.contains("$2"), "{sql}");
    }
}
