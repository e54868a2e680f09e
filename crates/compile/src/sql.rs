/// Double-quote an SQL identifier, doubling embedded quotes.
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

pub fn create_extension_sql(extension: &str) -> String {
    format!("CREATE EXTENSION IF NOT EXISTS {};", quote_ident(extension))
}

pub fn create_database_sql(database: &str, owner: Option<&str>) -> String {
    match owner {
        Some(o) => format!("CREATE DATABASE {} OWNER {};", quote_ident(database), quote_ident(o)),
        None => format!("CREATE DATABASE {};", quote_ident(database)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifiers_are_quoted() {
        assert_eq!(quote_ident("app"), "\"app\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn statements() {
        assert_eq!(create_extension_sql("pg_stat_statements"), "CREATE EXTENSION IF NOT EXISTS \"pg_stat_statements\";");
        assert_eq!(create_database_sql("sales", None), "CREATE DATABASE \"sales\";");
        assert_eq!(create_database_sql("sales", Some("app")), "CREATE DATABASE \"sales\" OWNER \"app\";");
    }
}
