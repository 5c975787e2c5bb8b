use chrono::Utc;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{OptionalExtension, Row, params, types::Type};
use rust_decimal::Decimal;

use crate::{
    config::Config,
    error::StoreError,
    payment::{NewPayment, Payment},
};

pub type DbPool = Pool<SqliteConnectionManager>;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS payments (
        id          INTEGER PRIMARY KEY AUTOINCREMENT,
        payer_id    VARCHAR(100) NOT NULL,
        payment_id  VARCHAR(100) NOT NULL,
        amount      TEXT NOT NULL,
        currency    VARCHAR(3) NOT NULL,
        status      VARCHAR(50) NOT NULL,
        email       VARCHAR(120) NOT NULL,
        created_at  TEXT NOT NULL,
        updated_at  TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS payments_payment_id ON payments (payment_id);
";

const COLUMNS: &str =
    "id, payer_id, payment_id, amount, currency, status, email, created_at, updated_at";

/// Lookup and update of payment records by the provider's payment id.
pub trait PaymentStore: Send + Sync {
    fn insert(&self, payment: NewPayment) -> Result<Payment, StoreError>;

    /// Oldest record carrying `payment_id`, if any.
    fn find_by_payment_id(&self, payment_id: &str) -> Result<Option<Payment>, StoreError>;

    /// Persists `status` and refreshes `updated_at`. Other fields are write-once.
    fn save(&self, payment: &mut Payment) -> Result<(), StoreError>;
}

pub fn init_pool(config: &Config) -> Result<DbPool, StoreError> {
    if config.is_in_memory() {
        // every pooled connection would otherwise get its own empty database
        let manager = SqliteConnectionManager::memory().with_init(|c| c.execute_batch(SCHEMA));

        return Ok(Pool::builder()
            .max_size(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .build(manager)?);
    }

    let path = config
        .database_url
        .strip_prefix("sqlite://")
        .unwrap_or(&config.database_url);

    let manager = SqliteConnectionManager::file(path).with_init(|c| c.execute_batch(SCHEMA));

    let pool = Pool::builder().max_size(8).build(manager)?;

    tracing::info!(path, "sqlite pool ready");

    Ok(pool)
}

#[derive(Clone)]
pub struct SqliteStore {
    pool: DbPool,
}

impl SqliteStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

impl PaymentStore for SqliteStore {
    fn insert(&self, payment: NewPayment) -> Result<Payment, StoreError> {
        let conn = self.pool.get()?;
        let now = Utc::now();

        conn.execute(
            "INSERT INTO payments (payer_id, payment_id, amount, currency, status, email, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
            params![
                payment.payer_id,
                payment.payment_id,
                payment.amount.to_string(),
                payment.currency,
                payment.status,
                payment.email,
                now,
            ],
        )?;

        let payment = payment.into_payment(conn.last_insert_rowid(), now);

        tracing::debug!(%payment, "db_insert");

        Ok(payment)
    }

    fn find_by_payment_id(&self, payment_id: &str) -> Result<Option<Payment>, StoreError> {
        let conn = self.pool.get()?;

        let payment = conn
            .query_row(
                &format!("SELECT {COLUMNS} FROM payments WHERE payment_id = ?1 ORDER BY id LIMIT 1"),
                params![payment_id],
                read_payment,
            )
            .optional()?;

        Ok(payment)
    }

    fn save(&self, payment: &mut Payment) -> Result<(), StoreError> {
        let conn = self.pool.get()?;
        let now = Utc::now();

        conn.execute(
            "UPDATE payments SET status = ?1, updated_at = ?2 WHERE id = ?3",
            params![payment.status, now, payment.id],
        )?;

        payment.updated_at = now;

        tracing::debug!(%payment, status = %payment.status, "db_save");

        Ok(())
    }
}

fn read_payment(row: &Row<'_>) -> rusqlite::Result<Payment> {
    let amount: String = row.get(3)?;
    let amount = amount
        .parse::<Decimal>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(3, Type::Text, Box::new(e)))?;

    Ok(Payment {
        id: row.get(0)?,
        payer_id: row.get(1)?,
        payment_id: row.get(2)?,
        amount,
        currency: row.get(4)?,
        status: row.get(5)?,
        email: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}
