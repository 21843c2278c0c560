//! The SELECT query builder.

use crate::clause::OrderBy;
use crate::expr::Expr;
use crate::join::Join;
use datamap_core::{SqlEnv, Value};

/// A composable SELECT over one table.
///
/// Used internally by the mapper for predicate-filtered entity reads and
/// directly by callers for the join DSL. Everything renders at submission
/// time under a concrete dialect; parameters come back in textual order.
#[derive(Debug, Clone)]
pub struct Query {
    table: String,
    projection: Vec<String>,
    aliases: Vec<(String, String)>,
    filter: Option<Expr>,
    joins: Vec<Join>,
    order: Vec<OrderBy>,
    group: Vec<String>,
    having: Option<Expr>,
    limit: Option<u64>,
    offset: Option<u64>,
    distinct: bool,
    count_star: bool,
}

impl Query {
    /// A query over `table` (already qualified/aliased as desired).
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            projection: Vec::new(),
            aliases: Vec::new(),
            filter: None,
            joins: Vec::new(),
            order: Vec::new(),
            group: Vec::new(),
            having: None,
            limit: None,
            offset: None,
            distinct: false,
            count_star: false,
        }
    }

    /// Project the given columns (empty means `*`).
    pub fn rows<I, S>(mut self, cols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.projection = cols.into_iter().map(Into::into).collect();
        self
    }

    /// Project `column AS alias`, resolving same-name conflicts across
    /// join sides. The declared aliases are the row shape of the result.
    pub fn select_as(mut self, column: impl Into<String>, alias: impl Into<String>) -> Self {
        self.aliases.push((column.into(), alias.into()));
        self
    }

    /// Add a WHERE predicate; repeated calls AND-combine.
    pub fn filter(mut self, pred: Expr) -> Self {
        self.filter = Some(match self.filter {
            Some(existing) => existing.and(pred),
            None => pred,
        });
        self
    }

    /// OR-combine a WHERE predicate.
    pub fn or_filter(mut self, pred: Expr) -> Self {
        self.filter = Some(match self.filter {
            Some(existing) => existing.or(pred),
            None => pred,
        });
        self
    }

    /// Add a JOIN.
    pub fn join(mut self, join: Join) -> Self {
        self.joins.push(join);
        self
    }

    /// Append an ORDER BY term.
    pub fn order_by(mut self, order: OrderBy) -> Self {
        self.order.push(order);
        self
    }

    /// Append GROUP BY columns.
    pub fn group_by<I, S>(mut self, cols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.group.extend(cols.into_iter().map(Into::into));
        self
    }

    /// Add a HAVING predicate; repeated calls AND-combine.
    pub fn having(mut self, pred: Expr) -> Self {
        self.having = Some(match self.having {
            Some(existing) => existing.and(pred),
            None => pred,
        });
        self
    }

    /// Set LIMIT.
    pub fn limit(mut self, n: u64) -> Self {
        self.limit = Some(n);
        self
    }

    /// Set OFFSET.
    pub fn offset(mut self, n: u64) -> Self {
        self.offset = Some(n);
        self
    }

    /// Make this a DISTINCT query.
    pub fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    /// Project `COUNT(1)` instead of columns.
    pub fn count(mut self) -> Self {
        self.count_star = true;
        self
    }

    /// The declared `select_as` aliases, in order.
    pub fn selected_aliases(&self) -> Vec<&str> {
        self.aliases.iter().map(|(_, a)| a.as_str()).collect()
    }

    /// Build SQL and parameters for the given environment.
    pub fn build(&self, env: &SqlEnv) -> (String, Vec<Value>) {
        let mut params = Vec::new();
        let sql = self.render_into(env, &mut params);
        (sql, params)
    }

    /// Render into a shared parameter list (placeholder numbering continues
    /// from what is already bound; used for subqueries in FROM).
    pub(crate) fn render_into(&self, env: &SqlEnv, params: &mut Vec<Value>) -> String {
        let mut sql = String::from("SELECT ");
        if self.distinct {
            sql.push_str("DISTINCT ");
        }
        if self.count_star {
            sql.push_str("COUNT(1)");
        } else if !self.aliases.is_empty() {
            let list = self
                .aliases
                .iter()
                .map(|(c, a)| {
                    format!("{} AS {}", env.dialect.quote_qualified(c), env.quote(a))
                })
                .collect::<Vec<_>>()
                .join(", ");
            sql.push_str(&list);
        } else if self.projection.is_empty() {
            sql.push('*');
        } else {
            let list = self
                .projection
                .iter()
                .map(|c| env.dialect.quote_qualified(c))
                .collect::<Vec<_>>()
                .join(", ");
            sql.push_str(&list);
        }

        sql.push_str(" FROM ");
        sql.push_str(&self.table);

        for join in &self.joins {
            sql.push_str(&join.render(env, params));
        }

        if let Some(filter) = &self.filter {
            sql.push_str(" WHERE ");
            sql.push_str(&filter.render(env, params));
        }

        if !self.group.is_empty() {
            sql.push_str(" GROUP BY ");
            let list = self
                .group
                .iter()
                .map(|c| env.dialect.quote_qualified(c))
                .collect::<Vec<_>>()
                .join(", ");
            sql.push_str(&list);
        }

        if let Some(having) = &self.having {
            sql.push_str(" HAVING ");
            sql.push_str(&having.render(env, params));
        }

        if !self.order.is_empty() {
            sql.push_str(" ORDER BY ");
            let list = self
                .order
                .iter()
                .map(|o| o.render(env))
                .collect::<Vec<_>>()
                .join(", ");
            sql.push_str(&list);
        }

        sql.push_str(&env.dialect.limit_offset(self.limit, self.offset));
        sql
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{col, pre};
    use crate::join::Join;
    use datamap_core::Dialect;

    #[test]
    fn plain_select() {
        let (sql, params) = Query::new("`player_home`")
            .rows(["username", "world"])
            .filter(col("world").eq("w"))
            .order_by(OrderBy::asc("username"))
            .limit(10)
            .build(&SqlEnv::new(Dialect::Sqlite));
        assert_eq!(
            sql,
            "SELECT `username`, `world` FROM `player_home` WHERE `world` = ? \
             ORDER BY `username` ASC LIMIT 10"
        );
        assert_eq!(params, vec![Value::Text("w".into())]);
    }

    #[test]
    fn self_join_pairs() {
        let (sql, params) = Query::new("player_home AS h1")
            .select_as("h1.username", "left_name")
            .select_as("h2.username", "right_name")
            .join(
                Join::inner("player_home AS h2")
                    .on(col("h1.world").eq(pre("h2.world")))
                    .on(col("h1.username").lt(pre("h2.username"))),
            )
            .filter(col("h1.world").eq("w"))
            .build(&SqlEnv::new(Dialect::Sqlite));
        assert_eq!(
            sql,
            "SELECT `h1`.`username` AS `left_name`, `h2`.`username` AS `right_name` \
             FROM player_home AS h1 INNER JOIN player_home AS h2 \
             ON `h1`.`world` = `h2`.`world` AND `h1`.`username` < `h2`.`username` \
             WHERE `h1`.`world` = ?"
        );
        assert_eq!(params, vec![Value::Text("w".into())]);
    }

    #[test]
    fn subquery_params_bind_before_where_params() {
        let sub = Query::new("`scores`")
            .rows(["player"])
            .filter(col("points").gt(100));
        let (sql, params) = Query::new("`player_home` AS `h`")
            .select_as("h.username", "username")
            .join(Join::subquery(sub, "s").on(col("s.player").eq(pre("h.username"))))
            .filter(col("h.world").eq("w"))
            .build(&SqlEnv::new(Dialect::Postgres));
        // FROM parameters first, then WHERE: $1 inside the subquery, $2 outside
        assert!(sql.contains("\"points\" > $1"), "{sql}");
        assert!(sql.contains("\"h\".\"world\" = $2"), "{sql}");
        assert_eq!(params, vec![Value::Int(100), Value::Text("w".into())]);
    }

    #[test]
    fn group_and_having() {
        let (sql, params) = Query::new("`t`")
            .rows(["world"])
            .group_by(["world"])
            .having(col("world").ne("x"))
            .build(&SqlEnv::new(Dialect::Sqlite));
        assert_eq!(
            sql,
            "SELECT `world` FROM `t` GROUP BY `world` HAVING `world` <> ?"
        );
        assert_eq!(params.len(), 1);
    }

    #[test]
    fn count_projection() {
        let (sql, _) = Query::new("`t`").count().build(&SqlEnv::new(Dialect::Sqlite));
        assert_eq!(sql, "SELECT COUNT(1) FROM `t`");
    }
}
