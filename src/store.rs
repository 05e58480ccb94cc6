use crate::error::Result;
use crate::structs::{Dataset, Value};
use log::debug;
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, params_from_iter};
use std::fmt;
use std::path::Path;

/// Rows returned by a read-only query.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl fmt::Display for QueryResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.columns.join(" | "))?;
        for row in &self.rows {
            let cells: Vec<String> = row.iter().map(ToString::to_string).collect();
            writeln!(f, "{}", cells.join(" | "))?;
        }
        write!(f, "({} rows)", self.rows.len())
    }
}

/// A tabular store the loader can replace tables in and query.
pub trait TableStore {
    /// Replaces `name` with the dataset. Loading the same dataset twice
    /// leaves the same table behind.
    fn write_table(&mut self, name: &str, dataset: &Dataset) -> Result<usize>;

    fn query(&self, sql: &str) -> Result<QueryResult>;
}

pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self> {
        debug!("Opening SQLite store {}", path.display());
        Ok(Self {
            conn: Connection::open(path)?,
        })
    }

    pub fn in_memory() -> Result<Self> {
        Ok(Self {
            conn: Connection::open_in_memory()?,
        })
    }

    /// Closes the connection, surfacing any error SQLite reports.
    pub fn close(self) -> Result<()> {
        self.conn.close().map_err(|(_, e)| e)?;
        Ok(())
    }
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Number(n) => SqlValue::Real(*n),
        Value::Text(s) => SqlValue::Text(s.clone()),
        Value::Missing => SqlValue::Null,
    }
}

fn from_sql(value: SqlValue) -> Value {
    match value {
        SqlValue::Null => Value::Missing,
        SqlValue::Integer(i) => Value::Number(i as f64),
        SqlValue::Real(f) => Value::Number(f),
        SqlValue::Text(s) => Value::Text(s),
        SqlValue::Blob(b) => Value::Text(String::from_utf8_lossy(&b).into_owned()),
    }
}

impl TableStore for SqliteStore {
    fn write_table(&mut self, name: &str, dataset: &Dataset) -> Result<usize> {
        let table = quote_ident(name);
        let fields = dataset.schema().fields();
        let columns: Vec<String> = fields
            .iter()
            .map(|f| {
                let ty = if dataset.is_numeric(f) { "REAL" } else { "TEXT" };
                format!("{} {}", quote_ident(f), ty)
            })
            .collect();
        let placeholders = vec!["?"; fields.len()].join(", ");

        let tx = self.conn.transaction()?;
        tx.execute(&format!("DROP TABLE IF EXISTS {}", table), [])?;
        tx.execute(
            &format!("CREATE TABLE {} ({})", table, columns.join(", ")),
            [],
        )?;
        {
            let mut insert = tx.prepare(&format!(
                "INSERT INTO {} VALUES ({})",
                table, placeholders
            ))?;
            for record in dataset.records() {
                insert.execute(params_from_iter(record.values().iter().map(to_sql)))?;
            }
        }
        tx.commit()?;

        debug!("Replaced table {} with {} rows", name, dataset.len());
        Ok(dataset.len())
    }

    fn query(&self, sql: &str) -> Result<QueryResult> {
        let mut stmt = self.conn.prepare(sql)?;
        let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
        let width = columns.len();

        let rows = stmt
            .query_map([], |row| {
                (0..width)
                    .map(|i| row.get::<_, SqlValue>(i).map(from_sql))
                    .collect::<rusqlite::Result<Vec<_>>>()
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(QueryResult { columns, rows })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structs::{Batch, Schema};

    fn gdp() -> Dataset {
        let schema = Schema::new(["Country", "GDP_USD_billions"]).unwrap();
        let mut batch = Batch::new("test", schema.clone());
        for (country, gdp) in [("United States", 26854.6), ("China", 19373.59), ("Tuvalu", 0.06)] {
            batch
                .push(vec![Value::Text(country.to_string()), Value::Number(gdp)])
                .unwrap();
        }
        Dataset::from_batches(schema, vec![batch]).unwrap()
    }

    #[test]
    fn loading_twice_replaces_instead_of_appending() {
        let mut store = SqliteStore::in_memory().unwrap();
        store.write_table("Countries_by_GDP", &gdp()).unwrap();
        let first = store.query("SELECT * FROM Countries_by_GDP").unwrap();
        store.write_table("Countries_by_GDP", &gdp()).unwrap();
        let second = store.query("SELECT * FROM Countries_by_GDP").unwrap();

        assert_eq!(first.rows.len(), 3);
        assert_eq!(first, second);
    }

    #[test]
    fn queries_see_typed_columns() {
        let mut store = SqliteStore::in_memory().unwrap();
        store.write_table("Countries_by_GDP", &gdp()).unwrap();
        let result = store
            .query("SELECT Country FROM Countries_by_GDP WHERE GDP_USD_billions >= 100")
            .unwrap();
        assert_eq!(result.columns, vec!["Country"]);
        assert_eq!(
            result.rows,
            vec![
                vec![Value::Text("United States".to_string())],
                vec![Value::Text("China".to_string())],
            ]
        );
    }

    #[test]
    fn aggregate_query_and_display() {
        let mut store = SqliteStore::in_memory().unwrap();
        store.write_table("t", &gdp()).unwrap();
        let result = store.query("SELECT COUNT(*) AS n FROM t").unwrap();
        assert_eq!(result.rows[0][0], Value::Number(3.0));
        assert_eq!(result.to_string(), "n\n3\n(1 rows)");
    }

    #[test]
    fn missing_values_round_trip_as_null() {
        let schema = Schema::new(["Name", "Region"]).unwrap();
        let mut batch = Batch::new("test", schema.clone());
        batch
            .push(vec![Value::Text("ICBC".to_string()), Value::Missing])
            .unwrap();
        let ds = Dataset::from_batches(schema, vec![batch]).unwrap();

        let mut store = SqliteStore::in_memory().unwrap();
        store.write_table("banks", &ds).unwrap();
        let result = store.query("SELECT Region FROM banks WHERE Region IS NULL").unwrap();
        assert_eq!(result.rows, vec![vec![Value::Missing]]);
    }

    #[test]
    fn file_store_persists_after_close() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("World_Economies.db");
        let mut store = SqliteStore::open(&path).unwrap();
        store.write_table("Countries_by_GDP", &gdp()).unwrap();
        store.close().unwrap();

        let reopened = SqliteStore::open(&path).unwrap();
        let result = reopened.query("SELECT * FROM Countries_by_GDP").unwrap();
        assert_eq!(result.rows.len(), 3);
    }
}
