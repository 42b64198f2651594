//! Default MySQL to Postgres column type mapping

use fastsync_core::TypeMapper;

#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresTypeMapper;

impl TypeMapper for PostgresTypeMapper {
    fn target_type(&self, data_type: &str, column_type: &str) -> String {
        let data_type = data_type.trim().to_lowercase();
        let column_type = column_type.trim().to_lowercase();

        if column_type.starts_with("tinyint(1)") {
            return "BOOLEAN".into();
        }

        match data_type.as_str() {
            "char" | "varchar" | "tinytext" | "text" | "mediumtext" | "longtext" | "enum"
            | "set" => "CHARACTER VARYING",
            "binary" | "varbinary" | "blob" | "tinyblob" | "mediumblob" | "longblob"
            | "geometry" => "CHARACTER VARYING",
            "bit" => "BOOLEAN",
            "tinyint" | "smallint" | "mediumint" | "int" | "integer" | "year" => "INTEGER",
            "bigint" => "BIGINT",
            "decimal" | "numeric" => "NUMERIC",
            "float" | "double" | "real" => "DOUBLE PRECISION",
            "date" | "datetime" | "timestamp" => "TIMESTAMP WITHOUT TIME ZONE",
            "time" => "TIME WITHOUT TIME ZONE",
            "json" => "JSONB",
            _ => "CHARACTER VARYING",
        }
        .into()
    }
}
