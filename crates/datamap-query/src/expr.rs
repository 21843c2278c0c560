//! SQL predicate expressions.

use datamap_core::{SqlEnv, Value};

/// Start a predicate from a column reference.
pub fn col(name: impl Into<String>) -> Expr {
    Expr::Column(name.into())
}

/// A column reference used as a right-hand operand.
///
/// Without `pre`, right-hand operands are bound as parameters:
/// `col("x").eq(1)` binds `1`, while `col("h1.world").eq(pre("h2.world"))`
/// compares two columns.
pub fn pre(name: impl Into<String>) -> Operand {
    Operand::Column(name.into())
}

/// A right-hand operand: a bound parameter or a column reference.
#[derive(Debug, Clone)]
pub enum Operand {
    /// Bound as a parameter.
    Value(Value),
    /// Rendered as a (possibly qualified) column name.
    Column(String),
}

macro_rules! operand_from {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for Operand {
                fn from(v: $ty) -> Self {
                    Operand::Value(Value::from(v))
                }
            }
        )*
    };
}

operand_from!(bool, i8, i16, i32, i64, u8, u16, u32, u64, f32, f64, String, &str);

impl From<Value> for Operand {
    fn from(v: Value) -> Self {
        Operand::Value(v)
    }
}

impl Operand {
    fn into_expr(self) -> Expr {
        match self {
            Operand::Value(v) => Expr::Literal(v),
            Operand::Column(c) => Expr::Column(c),
        }
    }
}

/// Binary operators of the predicate language.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinaryOp {
    /// SQL spelling of this operator.
    pub const fn as_str(self) -> &'static str {
        match self {
            BinaryOp::Eq => "=",
            BinaryOp::Ne => "<>",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::And => "AND",
            BinaryOp::Or => "OR",
        }
    }
}

/// A SQL predicate expression.
#[derive(Debug, Clone)]
pub enum Expr {
    /// Column reference, `table.column` allowed.
    Column(String),

    /// Literal bound as a parameter.
    Literal(Value),

    /// Binary operation.
    Binary {
        left: Box<Expr>,
        op: BinaryOp,
        right: Box<Expr>,
    },

    /// Logical negation.
    Not(Box<Expr>),

    /// `IN` list.
    In {
        expr: Box<Expr>,
        values: Vec<Value>,
        negated: bool,
    },

    /// `BETWEEN low AND high`.
    Between {
        expr: Box<Expr>,
        low: Box<Expr>,
        high: Box<Expr>,
    },

    /// `IS NULL` / `IS NOT NULL`.
    IsNull { expr: Box<Expr>, negated: bool },

    /// `LIKE` pattern.
    Like {
        expr: Box<Expr>,
        pattern: Box<Expr>,
        negated: bool,
    },

    /// Raw SQL fragment with positional parameters (escape hatch).
    Raw { sql: String, params: Vec<Value> },
}

impl Expr {
    /// `self = rhs`.
    pub fn eq(self, rhs: impl Into<Operand>) -> Expr {
        self.binary(BinaryOp::Eq, rhs)
    }

    /// `self <> rhs`.
    pub fn ne(self, rhs: impl Into<Operand>) -> Expr {
        self.binary(BinaryOp::Ne, rhs)
    }

    /// `self < rhs`.
    pub fn lt(self, rhs: impl Into<Operand>) -> Expr {
        self.binary(BinaryOp::Lt, rhs)
    }

    /// `self <= rhs`.
    pub fn le(self, rhs: impl Into<Operand>) -> Expr {
        self.binary(BinaryOp::Le, rhs)
    }

    /// `self > rhs`.
    pub fn gt(self, rhs: impl Into<Operand>) -> Expr {
        self.binary(BinaryOp::Gt, rhs)
    }

    /// `self >= rhs`.
    pub fn ge(self, rhs: impl Into<Operand>) -> Expr {
        self.binary(BinaryOp::Ge, rhs)
    }

    /// `self LIKE pattern`.
    pub fn like(self, pattern: impl Into<Operand>) -> Expr {
        Expr::Like {
            expr: Box::new(self),
            pattern: Box::new(pattern.into().into_expr()),
            negated: false,
        }
    }

    /// `self NOT LIKE pattern`.
    pub fn not_like(self, pattern: impl Into<Operand>) -> Expr {
        Expr::Like {
            expr: Box::new(self),
            pattern: Box::new(pattern.into().into_expr()),
            negated: true,
        }
    }

    /// `self IN (values...)`.
    pub fn is_in<I, T>(self, values: I) -> Expr
    where
        I: IntoIterator<Item = T>,
        T: Into<Value>,
    {
        Expr::In {
            expr: Box::new(self),
            values: values.into_iter().map(Into::into).collect(),
            negated: false,
        }
    }

    /// `self NOT IN (values...)`.
    pub fn not_in<I, T>(self, values: I) -> Expr
    where
        I: IntoIterator<Item = T>,
        T: Into<Value>,
    {
        Expr::In {
            expr: Box::new(self),
            values: values.into_iter().map(Into::into).collect(),
            negated: true,
        }
    }

    /// `self BETWEEN low AND high`.
    pub fn between(self, low: impl Into<Operand>, high: impl Into<Operand>) -> Expr {
        Expr::Between {
            expr: Box::new(self),
            low: Box::new(low.into().into_expr()),
            high: Box::new(high.into().into_expr()),
        }
    }

    /// `self IS NULL`.
    pub fn is_null(self) -> Expr {
        Expr::IsNull {
            expr: Box::new(self),
            negated: false,
        }
    }

    /// `self IS NOT NULL`.
    pub fn is_not_null(self) -> Expr {
        Expr::IsNull {
            expr: Box::new(self),
            negated: true,
        }
    }

    /// `self AND other`.
    pub fn and(self, other: Expr) -> Expr {
        Expr::Binary {
            left: Box::new(self),
            op: BinaryOp::And,
            right: Box::new(other),
        }
    }

    /// `self OR other`.
    pub fn or(self, other: Expr) -> Expr {
        Expr::Binary {
            left: Box::new(self),
            op: BinaryOp::Or,
            right: Box::new(other),
        }
    }

    /// `NOT (self)`.
    pub fn not(self) -> Expr {
        Expr::Not(Box::new(self))
    }

    /// Raw SQL fragment with parameters.
    pub fn raw(sql: impl Into<String>, params: Vec<Value>) -> Expr {
        Expr::Raw {
            sql: sql.into(),
            params,
        }
    }

    fn binary(self, op: BinaryOp, rhs: impl Into<Operand>) -> Expr {
        Expr::Binary {
            left: Box::new(self),
            op,
            right: Box::new(rhs.into().into_expr()),
        }
    }

    /// Render this expression, pushing bound values onto `params`.
    ///
    /// Placeholder numbering continues from `params.len()`, so callers that
    /// already bound FROM/ON parameters keep a consistent sequence.
    pub fn render(&self, env: &SqlEnv, params: &mut Vec<Value>) -> String {
        match self {
            Expr::Column(name) => env.dialect.quote_qualified(name),
            Expr::Literal(value) => {
                params.push(value.clone());
                env.dialect.placeholder(params.len())
            }
            Expr::Binary { left, op, right } => {
                let l = left.render(env, params);
                let r = right.render(env, params);
                match op {
                    BinaryOp::And | BinaryOp::Or => format!("({l} {} {r})", op.as_str()),
                    _ => format!("{l} {} {r}", op.as_str()),
                }
            }
            Expr::Not(inner) => format!("NOT ({})", inner.render(env, params)),
            Expr::In {
                expr,
                values,
                negated,
            } => {
                // `IN ()` is not valid SQL; nothing is in an empty list.
                if values.is_empty() {
                    return if *negated { "1 = 1" } else { "1 = 0" }.to_string();
                }
                let target = expr.render(env, params);
                let list = values
                    .iter()
                    .map(|v| {
                        params.push(v.clone());
                        env.dialect.placeholder(params.len())
                    })
                    .collect::<Vec<_>>()
                    .join(", ");
                let op = if *negated { "NOT IN" } else { "IN" };
                format!("{target} {op} ({list})")
            }
            Expr::Between { expr, low, high } => {
                let target = expr.render(env, params);
                let low = low.render(env, params);
                let high = high.render(env, params);
                format!("{target} BETWEEN {low} AND {high}")
            }
            Expr::IsNull { expr, negated } => {
                let target = expr.render(env, params);
                if *negated {
                    format!("{target} IS NOT NULL")
                } else {
                    format!("{target} IS NULL")
                }
            }
            Expr::Like {
                expr,
                pattern,
                negated,
            } => {
                let target = expr.render(env, params);
                let pattern = pattern.render(env, params);
                let op = if *negated { "NOT LIKE" } else { "LIKE" };
                format!("{target} {op} {pattern}")
            }
            Expr::Raw { sql, params: raw } => {
                params.extend(raw.iter().cloned());
                sql.clone()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use datamap_core::Dialect;

    fn render(e: &Expr, dialect: Dialect) -> (String, Vec<Value>) {
        let mut params = Vec::new();
        let sql = e.render(&SqlEnv::new(dialect), &mut params);
        (sql, params)
    }

    #[test]
    fn literal_binds_parameter() {
        let (sql, params) = render(&col("x").eq(1), Dialect::Sqlite);
        assert_eq!(sql, "`x` = ?");
        assert_eq!(params, vec![Value::Int(1)]);
    }

    #[test]
    fn pre_renders_column_not_parameter() {
        let (sql, params) = render(&col("h1.world").eq(pre("h2.world")), Dialect::Sqlite);
        assert_eq!(sql, "`h1`.`world` = `h2`.`world`");
        assert!(params.is_empty());
    }

    #[test]
    fn postgres_placeholders_number_sequentially() {
        let e = col("a").gt(1).and(col("b").le(2.5));
        let (sql, params) = render(&e, Dialect::Postgres);
        assert_eq!(sql, "(\"a\" > $1 AND \"b\" <= $2)");
        assert_eq!(params, vec![Value::Int(1), Value::Double(2.5)]);
    }

    #[test]
    fn in_and_between() {
        let (sql, params) = render(&col("id").is_in(["a", "b"]), Dialect::Sqlite);
        assert_eq!(sql, "`id` IN (?, ?)");
        assert_eq!(params.len(), 2);

        let (sql, params) = render(&col("x").between(1, 9), Dialect::Postgres);
        assert_eq!(sql, "\"x\" BETWEEN $1 AND $2");
        assert_eq!(params.len(), 2);
    }

    #[test]
    fn empty_in_lists_collapse_to_constants() {
        let (sql, params) = render(&col("id").is_in(Vec::<i64>::new()), Dialect::Sqlite);
        assert_eq!(sql, "1 = 0");
        assert!(params.is_empty());

        let (sql, params) = render(&col("id").not_in(Vec::<i64>::new()), Dialect::Sqlite);
        assert_eq!(sql, "1 = 1");
        assert!(params.is_empty());

        // Composes without breaking surrounding placeholder numbering
        let e = col("id").is_in(Vec::<String>::new()).and(col("x").gt(1));
        let (sql, params) = render(&e, Dialect::Postgres);
        assert_eq!(sql, "(1 = 0 AND \"x\" > $1)");
        assert_eq!(params.len(), 1);
    }

    #[test]
    fn not_and_null_checks() {
        let (sql, _) = render(&col("x").eq(1).not(), Dialect::Sqlite);
        assert_eq!(sql, "NOT (`x` = ?)");
        let (sql, _) = render(&col("fk").is_null(), Dialect::Sqlite);
        assert_eq!(sql, "`fk` IS NULL");
        let (sql, _) = render(&col("fk").is_not_null(), Dialect::Sqlite);
        assert_eq!(sql, "`fk` IS NOT NULL");
    }

    #[test]
    fn like_binds_pattern() {
        let (sql, params) = render(&col("name").like("lo%"), Dialect::Sqlite);
        assert_eq!(sql, "`name` LIKE ?");
        assert_eq!(params, vec![Value::Text("lo%".into())]);
    }

    #[test]
    fn raw_carries_its_params() {
        let e = Expr::raw("x = ? + ?", vec![Value::Int(1), Value::Int(2)]);
        let (sql, params) = render(&e, Dialect::Sqlite);
        assert_eq!(sql, "x = ? + ?");
        assert_eq!(params.len(), 2);
    }
}
