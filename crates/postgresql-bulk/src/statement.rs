//! SQL text for staging, COPY and reconciliation statements.
//!
//! Every identifier is double-quoted; nothing here ever interpolates a
//! record value.

use bulk_core::{ConflictAction, TableName};

/// Column added to every staging table to carry submission order.
pub const ORDINAL_COLUMN: &str = "__pgbulk_ordinal";

/// Alias of the target table in `UPDATE ... FROM`.
const TARGET_ALIAS: &str = "target";

/// Alias of the staging table in `UPDATE ... FROM`.
const STAGED_ALIAS: &str = "staged";

/// Quote an identifier, doubling embedded quotes.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quoted, optionally schema-qualified table name.
pub fn qualified_table(table: &TableName) -> String {
    match &table.schema {
        Some(schema) => format!("{}.{}", quote_ident(schema), quote_ident(&table.name)),
        None => quote_ident(&table.name),
    }
}

fn column_list(columns: &[&str]) -> String {
    columns
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ")
}

/// `CREATE TEMP TABLE` shaped like `columns` of `target`, plus the ordinal
/// column. Dropped on commit and discarded by rollback.
pub fn create_staging(staging: &str, target: &TableName, columns: &[&str]) -> String {
    format!(
        "CREATE TEMP TABLE {} ON COMMIT DROP AS SELECT {}, NULL::int8 AS {} FROM {} WITH NO DATA",
        quote_ident(staging),
        column_list(columns),
        quote_ident(ORDINAL_COLUMN),
        qualified_table(target)
    )
}

pub fn drop_staging(staging: &str) -> String {
    format!("DROP TABLE IF EXISTS {}", quote_ident(staging))
}

/// `COPY` of `columns` into an already-rendered relation name.
pub fn copy_in(relation: &str, columns: &[&str]) -> String {
    format!(
        "COPY {} ({}) FROM STDIN (FORMAT binary)",
        relation,
        column_list(columns)
    )
}

/// `COPY` of `columns` into a staging table, ordinal last.
pub fn copy_in_staging(staging: &str, columns: &[&str]) -> String {
    let mut with_ordinal = columns.to_vec();
    with_ordinal.push(ORDINAL_COLUMN);
    copy_in(&quote_ident(staging), &with_ordinal)
}

/// Parameters of the staged insert statement.
#[derive(Debug, Clone)]
pub struct StagedInsert<'a> {
    pub target: &'a TableName,
    pub staging: &'a str,
    pub columns: &'a [&'a str],
    pub overriding_system_value: bool,
    pub conflict: Option<&'a ConflictAction>,
    /// Key used as the `DO NOTHING` conflict target, when known.
    pub key: Option<&'a str>,
    pub returning: &'a [&'a str],
}

/// `INSERT INTO target SELECT ... FROM staging ORDER BY ordinal` with the
/// conflict clause and `RETURNING` list the parameters ask for.
pub fn insert_from_staging(p: &StagedInsert<'_>) -> String {
    let columns = column_list(p.columns);
    let mut sql = format!("INSERT INTO {} ({})", qualified_table(p.target), columns);
    if p.overriding_system_value {
        sql.push_str(" OVERRIDING SYSTEM VALUE");
    }
    sql.push_str(&format!(
        " SELECT {} FROM {} ORDER BY {}",
        columns,
        quote_ident(p.staging),
        quote_ident(ORDINAL_COLUMN)
    ));

    match p.conflict {
        None | Some(ConflictAction::Fail) => {}
        Some(ConflictAction::DoNothing) => match p.key {
            Some(key) => sql.push_str(&format!(" ON CONFLICT ({}) DO NOTHING", quote_ident(key))),
            None => sql.push_str(" ON CONFLICT DO NOTHING"),
        },
        Some(ConflictAction::UpdateColumns { key, columns }) => {
            let set = columns
                .iter()
                .map(|c| format!("{0} = EXCLUDED.{0}", quote_ident(c)))
                .collect::<Vec<_>>()
                .join(", ");
            sql.push_str(&format!(" ON CONFLICT ({}) DO UPDATE SET {}", quote_ident(key), set));
        }
    }

    if !p.returning.is_empty() {
        sql.push_str(&format!(" RETURNING {}", column_list(p.returning)));
    }
    sql
}

/// `UPDATE target SET cols FROM staging WHERE key = key`.
pub fn update_from_staging(
    target: &TableName,
    staging: &str,
    key: &str,
    set_columns: &[&str],
) -> String {
    let set = set_columns
        .iter()
        .map(|c| format!("{} = {}.{}", quote_ident(c), quote_ident(STAGED_ALIAS), quote_ident(c)))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "UPDATE {} AS {t} SET {} FROM {} AS {s} WHERE {t}.{k} = {s}.{k}",
        qualified_table(target),
        set,
        quote_ident(staging),
        t = quote_ident(TARGET_ALIAS),
        s = quote_ident(STAGED_ALIAS),
        k = quote_ident(key)
    )
}

/// Count staged rows whose key has no match in the target.
pub fn count_unmatched(target: &TableName, staging: &str, key: &str) -> String {
    format!(
        "SELECT count(*)::int8 FROM {} AS {s} WHERE NOT EXISTS (SELECT 1 FROM {} AS {t} WHERE {t}.{k} = {s}.{k})",
        quote_ident(staging),
        qualified_table(target),
        t = quote_ident(TARGET_ALIAS),
        s = quote_ident(STAGED_ALIAS),
        k = quote_ident(key)
    )
}

/// `COPY (SELECT cols FROM target) TO STDOUT` in binary format.
pub fn copy_out(target: &TableName, columns: &[&str]) -> String {
    format!(
        "COPY (SELECT {} FROM {}) TO STDOUT (FORMAT binary)",
        column_list(columns),
        qualified_table(target)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_ident_doubles_quotes() {
        assert_eq!(quote_ident("street_name"), "\"street_name\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
        assert_eq!(
            qualified_table(&TableName::qualified("public", "addresses")),
            "\"public\".\"addresses\""
        );
    }

    #[test]
    fn test_create_staging() {
        assert_eq!(
            create_staging("stg", &TableName::new("addresses"), &["address_id", "postal_code"]),
            "CREATE TEMP TABLE \"stg\" ON COMMIT DROP AS SELECT \"address_id\", \"postal_code\", \
             NULL::int8 AS \"__pgbulk_ordinal\" FROM \"addresses\" WITH NO DATA"
        );
    }

    #[test]
    fn test_copy_in_staging_appends_ordinal() {
        assert_eq!(
            copy_in_staging("stg", &["a", "b"]),
            "COPY \"stg\" (\"a\", \"b\", \"__pgbulk_ordinal\") FROM STDIN (FORMAT binary)"
        );
    }

    #[test]
    fn test_insert_with_update_policy() {
        let policy = ConflictAction::update_columns("address_id", ["postal_code"]).unwrap();
        let target = TableName::new("addresses");
        let sql = insert_from_staging(&StagedInsert {
            target: &target,
            staging: "stg",
            columns: &["address_id", "postal_code"],
            overriding_system_value: true,
            conflict: Some(&policy),
            key: Some("address_id"),
            returning: &[],
        });
        assert_eq!(
            sql,
            "INSERT INTO \"addresses\" (\"address_id\", \"postal_code\") OVERRIDING SYSTEM VALUE \
             SELECT \"address_id\", \"postal_code\" FROM \"stg\" ORDER BY \"__pgbulk_ordinal\" \
             ON CONFLICT (\"address_id\") DO UPDATE SET \"postal_code\" = EXCLUDED.\"postal_code\""
        );
    }

    #[test]
    fn test_insert_do_nothing_and_returning() {
        let target = TableName::new("t");
        let sql = insert_from_staging(&StagedInsert {
            target: &target,
            staging: "stg",
            columns: &["name"],
            overriding_system_value: false,
            conflict: Some(&ConflictAction::DoNothing),
            key: None,
            returning: &[],
        });
        assert!(sql.ends_with("ON CONFLICT DO NOTHING"));

        let sql = insert_from_staging(&StagedInsert {
            target: &target,
            staging: "stg",
            columns: &["name"],
            overriding_system_value: false,
            conflict: None,
            key: Some("id"),
            returning: &["id", "created_at"],
        });
        assert!(sql.ends_with("ORDER BY \"__pgbulk_ordinal\" RETURNING \"id\", \"created_at\""));
        assert!(!sql.contains("ON CONFLICT"));
    }

    #[test]
    fn test_update_from_staging() {
        assert_eq!(
            update_from_staging(&TableName::new("addresses"), "stg", "address_id", &["house_number"]),
            "UPDATE \"addresses\" AS \"target\" SET \"house_number\" = \"staged\".\"house_number\" \
             FROM \"stg\" AS \"staged\" WHERE \"target\".\"address_id\" = \"staged\".\"address_id\""
        );
    }

    #[test]
    fn test_copy_out() {
        assert_eq!(
            copy_out(&TableName::new("t"), &["a", "b"]),
            "COPY (SELECT \"a\", \"b\" FROM \"t\") TO STDOUT (FORMAT binary)"
        );
    }
}
