//! ORDER BY and friends.

use datamap_core::SqlEnv;

/// Sort direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OrderDirection {
    #[default]
    Asc,
    Desc,
}

impl OrderDirection {
    /// SQL keyword.
    pub const fn as_str(self) -> &'static str {
        match self {
            OrderDirection::Asc => "ASC",
            OrderDirection::Desc => "DESC",
        }
    }
}

/// One ORDER BY term.
#[derive(Debug, Clone)]
pub struct OrderBy {
    pub column: String,
    pub direction: OrderDirection,
}

impl OrderBy {
    /// Ascending order on a column.
    pub fn asc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            direction: OrderDirection::Asc,
        }
    }

    /// Descending order on a column.
    pub fn desc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            direction: OrderDirection::Desc,
        }
    }

    /// Render `column ASC|DESC`.
    pub fn render(&self, env: &SqlEnv) -> String {
        format!(
            "{} {}",
            env.dialect.quote_qualified(&self.column),
            self.direction.as_str()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use datamap_core::Dialect;

    #[test]
    fn renders_direction() {
        let env = SqlEnv::new(Dialect::Sqlite);
        assert_eq!(OrderBy::asc("x").render(&env), "`x` ASC");
        assert_eq!(OrderBy::desc("t.x").render(&env), "`t`.`x` DESC");
    }
}
