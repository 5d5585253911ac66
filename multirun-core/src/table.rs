//! Parameter table, one row of named values per simulation.

use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use linked_hash_map::LinkedHashMap;

use crate::error::Error;
use crate::Result;

/// Literal value of a single table cell.
///
/// Numeric values are recognized so they can be told apart from strings,
/// but the original text is always kept. Whatever was written in the table
/// is what ends up on the command line.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Int(i64, String),
    Float(f64, String),
    Str(String),
}

impl ParamValue {
    pub fn parse(s: &str) -> Self {
        if let Ok(i) = s.parse::<i64>() {
            ParamValue::Int(i, s.to_string())
        } else if let Ok(f) = s.parse::<f64>() {
            ParamValue::Float(f, s.to_string())
        } else {
            ParamValue::Str(s.to_string())
        }
    }

    /// Literal text of the value, exactly as read.
    pub fn as_str(&self) -> &str {
        match self {
            ParamValue::Int(_, s) | ParamValue::Float(_, s) | ParamValue::Str(s) => s,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.as_str().is_empty()
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mapping of variable names to values for a single simulation.
///
/// Iteration order is the column order of the table the row came from.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterRow {
    values: LinkedHashMap<String, ParamValue>,
}

impl ParameterRow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: &str, value: ParamValue) {
        self.values.insert(key.to_string(), value);
    }

    pub fn with(mut self, key: &str, value: &str) -> Self {
        self.insert(key, ParamValue::parse(value));
        self
    }

    pub fn get(&self, key: &str) -> Option<&ParamValue> {
        self.values.get(key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.values.keys()
    }
}

/// Ordered collection of parameter rows sharing a common set of columns.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterTable {
    columns: Vec<String>,
    rows: Vec<ParameterRow>,
}

impl ParameterTable {
    /// Creates a table from already assembled rows.
    ///
    /// No validation is performed here, see [`validate_schema`].
    ///
    /// [`validate_schema`]: #method.validate_schema
    pub fn new(columns: Vec<String>, rows: Vec<ParameterRow>) -> Self {
        Self { columns, rows }
    }

    /// Reads a comma-separated table from the file at the given path.
    pub fn from_path(path: &Path) -> Result<Self> {
        debug!("reading parameter table: {}", path.to_string_lossy());
        let file = File::open(path).map_err(|e| {
            Error::config(format!(
                "can't open parameter table {}: {}",
                path.to_string_lossy(),
                e
            ))
        })?;
        Self::from_reader(file)
    }

    /// Reads a comma-separated table, first record being the header.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(reader);

        let columns: Vec<String> = rdr.headers()?.iter().map(|h| h.to_string()).collect();
        let mut rows = Vec::new();
        for (n, record) in rdr.records().enumerate() {
            let record = record?;
            // line 1 is the header
            let line = record.position().map(|p| p.line()).unwrap_or(n as u64 + 2);
            if record.len() != columns.len() {
                return Err(Error::config(format!(
                    "malformed parameter table: line {} has {} values, header has {} columns",
                    line,
                    record.len(),
                    columns.len()
                )));
            }
            let mut row = ParameterRow::new();
            for (column, field) in columns.iter().zip(record.iter()) {
                row.insert(column, ParamValue::parse(field));
            }
            rows.push(row);
        }

        let table = Self { columns, rows };
        table.validate_schema()?;
        Ok(table)
    }

    /// Checks the header is well formed and that every row has exactly the
    /// header's set of keys.
    pub fn validate_schema(&self) -> Result<()> {
        for (n, column) in self.columns.iter().enumerate() {
            if column.is_empty() {
                return Err(Error::config(format!(
                    "malformed parameter table: column {} has an empty name",
                    n + 1
                )));
            }
            if self.columns[..n].contains(column) {
                return Err(Error::config(format!(
                    "malformed parameter table: column \"{}\" appears more than once",
                    column
                )));
            }
        }
        for (n, row) in self.rows.iter().enumerate() {
            let same_keys = row.len() == self.columns.len()
                && self.columns.iter().all(|c| row.get(c).is_some());
            if !same_keys {
                return Err(Error::config(format!(
                    "malformed parameter table: row {} keys {:?} don't match header {:?}",
                    n + 1,
                    row.keys().collect::<Vec<_>>(),
                    self.columns
                )));
            }
        }
        Ok(())
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[ParameterRow] {
        &self.rows
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c == name)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_rows_in_order() {
        let data = "X,Y,filename\n1,0.5,a.dat\n2, -3e2 ,b.dat\n";
        let table = ParameterTable::from_reader(data.as_bytes()).unwrap();
        assert_eq!(table.columns(), &["X", "Y", "filename"]);
        assert_eq!(table.len(), 2);
        let row = &table.rows()[1];
        assert_eq!(row.get("X"), Some(&ParamValue::Int(2, "2".to_string())));
        assert_eq!(row.get("Y").unwrap().as_str(), "-3e2");
        assert!(matches!(row.get("Y"), Some(ParamValue::Float(..))));
        assert_eq!(
            row.keys().cloned().collect::<Vec<_>>(),
            vec!["X", "Y", "filename"]
        );
    }

    #[test]
    fn quoted_values_keep_delimiter() {
        let data = "label,filename\n\"left, upper\",a.dat\n";
        let table = ParameterTable::from_reader(data.as_bytes()).unwrap();
        let value = table.rows()[0].get("label").unwrap();
        assert_eq!(value, &ParamValue::Str("left, upper".to_string()));
    }

    #[test]
    fn row_with_extra_value_is_rejected() {
        let data = "X,filename\n1,a.dat\n2,b.dat,oops\n";
        match ParameterTable::from_reader(data.as_bytes()) {
            Err(Error::ConfigurationError(msg)) => assert!(msg.contains("line 3")),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn duplicate_column_is_rejected() {
        let data = "X,X,filename\n1,2,a.dat\n";
        assert!(matches!(
            ParameterTable::from_reader(data.as_bytes()),
            Err(Error::ConfigurationError(_))
        ));
    }

    #[test]
    fn mismatched_row_keys_fail_validation() {
        let columns = vec!["X".to_string(), "filename".to_string()];
        let rows = vec![
            ParameterRow::new().with("X", "1").with("filename", "a"),
            ParameterRow::new().with("Z", "1").with("filename", "b"),
        ];
        let table = ParameterTable::new(columns, rows);
        assert!(table.validate_schema().is_err());
    }
}
