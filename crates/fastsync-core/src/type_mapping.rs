//! Source-to-target column type mapping

/// Maps a MySQL column to the target system's column type.
///
/// `data_type` is the bare type (`decimal`), `column_type` the full declaration
/// (`decimal(10,2) unsigned`).
pub trait TypeMapper: Send + Sync {
    fn target_type(&self, data_type: &str, column_type: &str) -> String;
}

impl<F> TypeMapper for F
where
    F: Fn(&str, &str) -> String + Send + Sync,
{
    fn target_type(&self, data_type: &str, column_type: &str) -> String {
        self(data_type, column_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closure_as_mapper() {
        let mapper = |data_type: &str, column_type: &str| {
            if column_type == "tinyint(1)" {
                "BOOLEAN".to_string()
            } else {
                data_type.to_uppercase()
            }
        };
        assert_eq!(mapper.target_type("tinyint", "tinyint(1)"), "BOOLEAN");
        assert_eq!(mapper.target_type("int", "int(11)"), "INT");
    }
}
