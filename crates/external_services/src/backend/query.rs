//! Table query builder.
//!
//! Queries are rendered as REST query-string pairs:
//! `select=...`, `{column}={op}.{value}`, `order={column}.{asc|desc}`, `limit=N`.

/// Comparison operator for a filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    Is,
}

impl FilterOp {
    fn as_str(&self) -> &'static str {
        match self {
            FilterOp::Eq => "eq",
            FilterOp::Neq => "neq",
            FilterOp::Gt => "gt",
            FilterOp::Gte => "gte",
            FilterOp::Lt => "lt",
            FilterOp::Lte => "lte",
            FilterOp::In => "in",
            FilterOp::Is => "is",
        }
    }
}

/// Row filter on a single column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
    pub column: String,
    pub op: FilterOp,
    pub value: String,
}

impl Filter {
    pub fn eq(column: impl Into<String>, value: impl ToString) -> Self {
        Self {
            column: column.into(),
            op: FilterOp::Eq,
            value: value.to_string(),
        }
    }

    /// Membership filter. Values are rendered as `in.(a,b,c)`.
    pub fn one_of<I, S>(column: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let joined = values
            .into_iter()
            .map(|v| v.as_ref().to_string())
            .collect::<Vec<_>>()
            .join(",");
        Self {
            column: column.into(),
            op: FilterOp::In,
            value: format!("({})", joined),
        }
    }

    pub fn new(column: impl Into<String>, op: FilterOp, value: impl ToString) -> Self {
        Self {
            column: column.into(),
            op,
            value: value.to_string(),
        }
    }

    /// Render as a query-string pair.
    pub fn to_pair(&self) -> (String, String) {
        (self.column.clone(), format!("{}.{}", self.op.as_str(), self.value))
    }
}

/// Result ordering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub column: String,
    pub ascending: bool,
}

impl Order {
    pub fn asc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            ascending: true,
        }
    }

    pub fn desc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            ascending: false,
        }
    }
}

/// A read against a single table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub table: String,
    pub select: String,
    pub filters: Vec<Filter>,
    pub order: Option<Order>,
    pub limit: Option<usize>,
}

impl Query {
    /// Select all columns from a table.
    pub fn table(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            select: "*".to_string(),
            filters: Vec::new(),
            order: None,
            limit: None,
        }
    }

    pub fn select(mut self, columns: impl Into<String>) -> Self {
        self.select = columns.into();
        self
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn order(mut self, order: Order) -> Self {
        self.order = Some(order);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Render the query string pairs in a stable order.
    pub fn to_query_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = vec![("select".to_string(), self.select.clone())];
        pairs.extend(self.filters.iter().map(Filter::to_pair));
        if let Some(order) = &self.order {
            let direction = if order.ascending { "asc" } else { "desc" };
            pairs.push(("order".to_string(), format!("{}.{}", order.column, direction)));
        }
        if let Some(limit) = self.limit {
            pairs.push(("limit".to_string(), limit.to_string()));
        }
        pairs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recent_orders_query() {
        let query = Query::table("orders")
            .select("id, customer_name, total_price, created_at, order_items")
            .order(Order::desc("created_at"))
            .limit(5);

        let pairs = query.to_query_pairs();
        assert_eq!(
            pairs,
            vec![
                (
                    "select".to_string(),
                    "id, customer_name, total_price, created_at, order_items".to_string()
                ),
                ("order".to_string(), "created_at.desc".to_string()),
                ("limit".to_string(), "5".to_string()),
            ]
        );
    }

    #[test]
    fn test_filters_render() {
        let query = Query::table("guide_topics")
            .filter(Filter::eq("id", "abc"))
            .filter(Filter::eq("is_enabled", true));
        let pairs = query.to_query_pairs();
        assert_eq!(pairs[1], ("id".to_string(), "eq.abc".to_string()));
        assert_eq!(pairs[2], ("is_enabled".to_string(), "eq.true".to_string()));
    }

    #[test]
    fn test_in_filter() {
        let filter = Filter::one_of("id", ["p1", "p2"]);
        assert_eq!(filter.to_pair(), ("id".to_string(), "in.(p1,p2)".to_string()));
    }
}
