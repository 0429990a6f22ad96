// database.rs
use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Row};
use tracing::warn;

use crate::error::Result;
use crate::store::{TransactionStore, UpdateFn};
use crate::transaction::{Currency, OrderLine, Partner, Transaction, TransactionState};

const SELECT_COLUMNS: &str = r#"
    SELECT id, reference, provider_code, amount, currency_code, currency_decimal_places,
           state, state_message, provider_reference, partner, invoice_lines,
           sale_order_lines, created_at, updated_at
    FROM payment_transactions
"#;

#[derive(Debug, Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Database { pool })
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS payment_transactions (
                id UUID PRIMARY KEY,
                reference TEXT NOT NULL UNIQUE,
                provider_code TEXT NOT NULL,
                amount NUMERIC NOT NULL,
                currency_code TEXT NOT NULL,
                currency_decimal_places INTEGER NOT NULL DEFAULT 2,
                state TEXT NOT NULL DEFAULT 'draft',
                state_message TEXT,
                provider_reference TEXT,
                partner JSONB NOT NULL DEFAULT '{}',
                invoice_lines JSONB NOT NULL DEFAULT '[]',
                sale_order_lines JSONB NOT NULL DEFAULT '[]',
                created_at TIMESTAMPTZ DEFAULT NOW(),
                updated_at TIMESTAMPTZ DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_payment_transactions_provider_reference
            ON payment_transactions(provider_code, provider_reference)
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn write_state<'c, E>(&self, executor: E, tx: &Transaction) -> Result<()>
    where
        E: sqlx::Executor<'c, Database = Postgres>,
    {
        sqlx::query(
            r#"
            UPDATE payment_transactions
            SET state = $2, state_message = $3, provider_reference = $4, updated_at = $5
            WHERE reference = $1
            "#,
        )
        .bind(tx.reference())
        .bind(tx.state().as_str())
        .bind(&tx.state_message)
        .bind(&tx.provider_reference)
        .bind(tx.updated_at)
        .execute(executor)
        .await?;

        Ok(())
    }
}

fn from_row(row: &PgRow) -> Result<Transaction> {
    let state_name: String = row.try_get("state")?;
    let state = TransactionState::parse(&state_name).unwrap_or_else(|| {
        warn!("Unknown transaction state {:?}, reading as draft", state_name);
        TransactionState::Draft
    });
    let decimal_places: i32 = row.try_get("currency_decimal_places")?;
    let code: String = row.try_get("currency_code")?;

    let mut tx = Transaction::restore(
        row.try_get("id")?,
        row.try_get("reference")?,
        row.try_get("provider_code")?,
        state,
        row.try_get("created_at")?,
    );
    tx.amount = row.try_get("amount")?;
    tx.currency = Currency::new(&code, decimal_places.max(0) as u32);
    tx.state_message = row.try_get("state_message")?;
    tx.provider_reference = row.try_get("provider_reference")?;
    tx.partner = row.try_get::<Json<Partner>, _>("partner")?.0;
    tx.invoice_lines = row.try_get::<Json<Vec<OrderLine>>, _>("invoice_lines")?.0;
    tx.sale_order_lines = row.try_get::<Json<Vec<OrderLine>>, _>("sale_order_lines")?.0;
    tx.updated_at = row.try_get("updated_at")?;
    Ok(tx)
}

#[async_trait]
impl TransactionStore for Database {
    async fn insert(&self, tx: &Transaction) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO payment_transactions
            (id, reference, provider_code, amount, currency_code, currency_decimal_places,
             state, state_message, provider_reference, partner, invoice_lines,
             sale_order_lines, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            ON CONFLICT (reference) DO NOTHING
            "#,
        )
        .bind(tx.id)
        .bind(tx.reference())
        .bind(&tx.provider_code)
        .bind(tx.amount)
        .bind(&tx.currency.code)
        .bind(tx.currency.decimal_places as i32)
        .bind(tx.state().as_str())
        .bind(&tx.state_message)
        .bind(&tx.provider_reference)
        .bind(Json(&tx.partner))
        .bind(Json(&tx.invoice_lines))
        .bind(Json(&tx.sale_order_lines))
        .bind(tx.created_at)
        .bind(tx.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, reference: &str) -> Result<Option<Transaction>> {
        let row = sqlx::query(&format!("{} WHERE reference = $1", SELECT_COLUMNS))
            .bind(reference)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(from_row).transpose()
    }

    async fn update(&self, reference: &str, apply: UpdateFn) -> Result<Option<Transaction>> {
        let mut db_tx = self.pool.begin().await?;

        // Row lock held until commit
        let row = sqlx::query(&format!("{} WHERE reference = $1 FOR UPDATE", SELECT_COLUMNS))
            .bind(reference)
            .fetch_optional(&mut *db_tx)
            .await?;

        let mut tx = match row {
            Some(row) => from_row(&row)?,
            None => return Ok(None),
        };

        apply(&mut tx);
        self.write_state(&mut *db_tx, &tx).await?;
        db_tx.commit().await?;

        Ok(Some(tx))
    }
}
