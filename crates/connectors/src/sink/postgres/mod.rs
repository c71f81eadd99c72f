use crate::{
    error::ConnectorError,
    sink::{RecordSink, postgres::params::PgParamStore},
};
use async_trait::async_trait;
use model::{record::NormalizedRecord, schema::TableSchema};
use tokio_postgres::{Client, Config, NoTls};
use tracing::{error, info};

pub mod params;

/// The wire protocol caps bind parameters per statement at 65,535, so large
/// batches are applied as several statements inside one transaction.
const MAX_PARAMS_PER_STATEMENT: usize = 60_000;

pub struct PostgresSink {
    client: Client,
}

impl PostgresSink {
    pub async fn connect(conn_string: &str) -> Result<Self, ConnectorError> {
        let config = conn_string
            .parse::<Config>()
            .map_err(|e| ConnectorError::InvalidUrl(e.to_string()))?;

        let (client, connection) = config.connect(NoTls).await?;
        tokio::spawn(async move {
            if let Err(err) = connection.await {
                error!(%err, "Postgres connection error");
            }
        });

        Ok(Self { client })
    }
}

#[async_trait]
impl RecordSink for PostgresSink {
    async fn ping(&mut self) -> Result<(), ConnectorError> {
        self.client.batch_execute("SELECT 1").await?;
        Ok(())
    }

    async fn ensure_table(
        &mut self,
        schema: &TableSchema,
        drop_existing: bool,
    ) -> Result<(), ConnectorError> {
        if drop_existing {
            let drop_sql = format!("DROP TABLE IF EXISTS {}", quote_ident(&schema.table));
            self.client.batch_execute(&drop_sql).await?;
            info!(table = %schema.table, "Dropped existing destination table.");
        }

        self.client.batch_execute(&create_table_sql(schema)).await?;
        Ok(())
    }

    async fn write_batch(
        &mut self,
        schema: &TableSchema,
        records: &[NormalizedRecord],
    ) -> Result<u64, ConnectorError> {
        if records.is_empty() {
            return Ok(0);
        }

        let columns = schema.columns.len().max(1);
        let rows_per_statement = (MAX_PARAMS_PER_STATEMENT / columns).max(1);

        let tx = self.client.transaction().await?;
        for slice in records.chunks(rows_per_statement) {
            let sql = upsert_sql(schema, slice.len());
            let store = PgParamStore::from_records(schema, slice);
            tx.execute(sql.as_str(), &store.as_refs()).await?;
        }
        tx.commit().await?;

        Ok(records.len() as u64)
    }

    async fn write_record(
        &mut self,
        schema: &TableSchema,
        record: &NormalizedRecord,
    ) -> Result<(), ConnectorError> {
        let sql = upsert_sql(schema, 1);
        let store = PgParamStore::from_records(schema, std::slice::from_ref(record));
        self.client.execute(sql.as_str(), &store.as_refs()).await?;
        Ok(())
    }

    async fn create_indexes(&mut self, schema: &TableSchema) -> Result<(), ConnectorError> {
        for index in &schema.indexes {
            let sql = format!(
                "CREATE INDEX IF NOT EXISTS {} ON {} ({})",
                quote_ident(&index.name),
                quote_ident(&schema.table),
                quote_ident(&index.column)
            );
            self.client.batch_execute(&sql).await?;
            info!(index = %index.name, "Created destination index.");
        }
        Ok(())
    }
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn create_table_sql(schema: &TableSchema) -> String {
    let columns = schema
        .columns
        .iter()
        .map(|col| {
            let mut def = format!("{} {}", quote_ident(&col.name), col.column_type.sql_name());
            if col.primary_key {
                def.push_str(" PRIMARY KEY");
            }
            def
        })
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "CREATE TABLE IF NOT EXISTS {} ({})",
        quote_ident(&schema.table),
        columns
    )
}

fn upsert_sql(schema: &TableSchema, rows: usize) -> String {
    let column_list = schema
        .columns
        .iter()
        .map(|col| quote_ident(&col.name))
        .collect::<Vec<_>>()
        .join(", ");

    let width = schema.columns.len();
    let values = (0..rows)
        .map(|row| {
            let placeholders = (0..width)
                .map(|col| format!("${}", row * width + col + 1))
                .collect::<Vec<_>>()
                .join(", ");
            format!("({placeholders})")
        })
        .collect::<Vec<_>>()
        .join(", ");

    let mut sql = format!(
        "INSERT INTO {} ({}) VALUES {}",
        quote_ident(&schema.table),
        column_list,
        values
    );

    if let Some(pk) = schema.primary_key() {
        let updates = schema
            .columns
            .iter()
            .filter(|col| !col.primary_key)
            .map(|col| {
                let ident = quote_ident(&col.name);
                format!("{ident} = EXCLUDED.{ident}")
            })
            .collect::<Vec<_>>()
            .join(", ");

        if updates.is_empty() {
            sql.push_str(&format!(
                " ON CONFLICT ({}) DO NOTHING",
                quote_ident(&pk.name)
            ));
        } else {
            sql.push_str(&format!(
                " ON CONFLICT ({}) DO UPDATE SET {}",
                quote_ident(&pk.name),
                updates
            ));
        }
    }

    sql
}

#[cfg(test)]
mod tests {
    use super::*;
    use model::schema::{ColumnDef, ColumnType, IndexDef};

    fn schema() -> TableSchema {
        TableSchema {
            table: "patents".into(),
            columns: vec![
                ColumnDef {
                    name: "publication_number".into(),
                    column_type: ColumnType::Text,
                    primary_key: true,
                },
                ColumnDef {
                    name: "filing_date".into(),
                    column_type: ColumnType::Date,
                    primary_key: false,
                },
                ColumnDef {
                    name: "claims".into(),
                    column_type: ColumnType::Jsonb,
                    primary_key: false,
                },
            ],
            indexes: vec![IndexDef {
                name: "idx_patents_filing_date".into(),
                column: "filing_date".into(),
            }],
        }
    }

    #[test]
    fn create_table_declares_primary_key() {
        let sql = create_table_sql(&schema());
        assert_eq!(
            sql,
            "CREATE TABLE IF NOT EXISTS \"patents\" (\"publication_number\" TEXT PRIMARY KEY, \
             \"filing_date\" DATE, \"claims\" JSONB)"
        );
    }

    #[test]
    fn upsert_updates_non_key_columns_on_conflict() {
        let sql = upsert_sql(&schema(), 2);
        assert!(sql.starts_with(
            "INSERT INTO \"patents\" (\"publication_number\", \"filing_date\", \"claims\") \
             VALUES ($1, $2, $3), ($4, $5, $6)"
        ));
        assert!(sql.ends_with(
            "ON CONFLICT (\"publication_number\") DO UPDATE SET \
             \"filing_date\" = EXCLUDED.\"filing_date\", \"claims\" = EXCLUDED.\"claims\""
        ));
    }

    #[test]
    fn upsert_without_primary_key_is_a_plain_insert() {
        let mut schema = schema();
        for col in &mut schema.columns {
            col.primary_key = false;
        }
        let sql = upsert_sql(&schema, 1);
        assert!(!sql.contains("ON CONFLICT"));
    }

    #[test]
    fn identifiers_are_quoted() {
        assert_eq!(quote_ident("weird\"name"), "\"weird\"\"name\"");
    }
}
