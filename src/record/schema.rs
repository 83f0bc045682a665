//! Helpers over the schema record stored in page 0 of every heap file:
//! an ordered list of free-form column declarations like `"name TEXT"`.

/// Leading identifier of a column declaration.
pub fn column_name(declaration: &str) -> &str {
    declaration.split_whitespace().next().unwrap_or("")
}

/// Resolve a column reference against a schema. The reference may be a
/// numeric position or a column name; positions are canonical.
pub fn column_position(schema: &[String], column: &str) -> Option<usize> {
    if let Ok(position) = column.parse::<usize>() {
        if position < schema.len() {
            return Some(position);
        }
        return None;
    }
    schema
        .iter()
        .position(|declaration| column_name(declaration) == column)
}
