use rusqlite::types::Value;

/// Comparison applied by a [`Clause`].
#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    Eq,
    Gt,
    Lt,
    Glob,
    /// Parameter equals any of the listed columns.
    InAny(&'static [&'static str]),
    /// Column equals the parameter or lies below it as a `/`-separated path.
    Under,
}

/// One bound condition on a `FindView` column.
#[derive(Debug, Clone, PartialEq)]
pub struct Clause {
    pub column: &'static str,
    pub op: Op,
    pub param: Value,
}

impl Clause {
    pub fn new(column: &'static str, op: Op, param: impl Into<Value>) -> Self {
        Self { column, op, param: param.into() }
    }

    fn render(&self, params: &mut Vec<Value>) -> String {
        let col = self.column;
        match &self.op {
            Op::Eq => self.bind(params, format!("{col} = ?")),
            Op::Gt => self.bind(params, format!("{col} > ?")),
            Op::Lt => self.bind(params, format!("{col} < ?")),
            Op::Glob => self.bind(params, format!("{col} GLOB ?")),
            Op::InAny(columns) => self.bind(params, format!("? IN ({})", columns.join(", "))),
            Op::Under => {
                let base = match &self.param {
                    Value::Text(s) => s.clone(),
                    _ => String::new(),
                };
                let below = format!("{base}/");
                params.push(Value::Text(base));
                params.push(Value::Text(below.clone()));
                params.push(Value::Text(below));
                format!("({col} = ? OR substr({col}, 1, length(?)) = ?)")
            }
        }
    }

    fn bind(&self, params: &mut Vec<Value>, sql: String) -> String {
        params.push(self.param.clone());
        sql
    }
}

/// Conjunction of clauses over `FindView`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Predicate {
    clauses: Vec<Clause>,
}

impl Predicate {
    pub fn push(&mut self, clause: Clause) {
        self.clauses.push(clause);
    }

    pub fn clauses(&self) -> &[Clause] {
        &self.clauses
    }

    /// Render a name query with `?` placeholders and the parameters to bind,
    /// in order.
    pub fn to_sql(&self) -> (String, Vec<Value>) {
        let mut params = Vec::new();
        let conditions: Vec<String> = self.clauses.iter().map(|c| c.render(&mut params)).collect();
        let where_sql = if conditions.is_empty() {
            "1".to_string()
        } else {
            conditions.join(" AND ")
        };
        (format!("SELECT name FROM FindView WHERE {where_sql} ORDER BY name"), params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_predicate_selects_everything() {
        let (sql, params) = Predicate::default().to_sql();
        assert_eq!(sql, "SELECT name FROM FindView WHERE 1 ORDER BY name");
        assert!(params.is_empty());
    }

    #[test]
    fn clauses_are_joined_and_bound_in_order() {
        let mut p = Predicate::default();
        p.push(Clause::new("name", Op::Glob, "*.txt".to_string()));
        p.push(Clause::new("size", Op::Gt, 10i64));
        p.push(Clause::new("tag", Op::InAny(&["tag", "tag2", "tag3"]), "Griffin".to_string()));
        let (sql, params) = p.to_sql();
        assert_eq!(
            sql,
            "SELECT name FROM FindView WHERE name GLOB ? AND size > ? AND ? IN (tag, tag2, tag3) ORDER BY name"
        );
        assert_eq!(
            params,
            vec![
                Value::Text("*.txt".into()),
                Value::Integer(10),
                Value::Text("Griffin".into()),
            ]
        );
    }

    #[test]
    fn under_binds_exact_and_child_forms() {
        let mut p = Predicate::default();
        p.push(Clause::new("name", Op::Under, "children".to_string()));
        let (sql, params) = p.to_sql();
        assert!(sql.contains("(name = ? OR substr(name, 1, length(?)) = ?)"));
        assert_eq!(
            params,
            vec![
                Value::Text("children".into()),
                Value::Text("children/".into()),
                Value::Text("children/".into()),
            ]
        );
    }

    #[test]
    fn parameters_are_never_interpolated() {
        let mut p = Predicate::default();
        p.push(Clause::new("mime", Op::Eq, "x'; DROP TABLE Files; --".to_string()));
        let (sql, _) = p.to_sql();
        assert!(!sql.contains("DROP"));
    }
}
