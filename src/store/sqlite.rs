use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqlitePool, SqlitePoolOptions,
    SqliteRow, SqliteSynchronous,
};
use std::path::Path;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

use super::{AuditView, LedgerTotals, Mutation, Store, StoreError, StoreResult, TransactionPage};
use crate::Amount;
use crate::model::{
    AssetId, AssetType, MetaValue, Metadata, OwnerId, Receipt, Transaction, TransactionStatus,
    TxId, UnknownKind, Wallet, WalletId, WalletSnapshot,
};
use crate::request::IdempotencyKey;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS asset_types (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        code TEXT UNIQUE NOT NULL,
        name TEXT NOT NULL,
        decimals INTEGER NOT NULL DEFAULT 0
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS wallets (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        owner_id INTEGER NOT NULL,
        asset_id INTEGER NOT NULL REFERENCES asset_types(id),
        balance INTEGER NOT NULL DEFAULT 0 CHECK (balance >= 0),
        version INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        UNIQUE(owner_id, asset_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS transactions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        idempotency_key TEXT UNIQUE NOT NULL,
        wallet_id INTEGER NOT NULL REFERENCES wallets(id),
        transaction_type TEXT NOT NULL,
        amount INTEGER NOT NULL,
        reason TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'completed',
        created_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS transaction_metadata (
        transaction_id INTEGER NOT NULL REFERENCES transactions(id),
        key TEXT NOT NULL,
        bool_value INTEGER,
        int_value INTEGER,
        text_value TEXT,
        PRIMARY KEY (transaction_id, key)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS wallet_history (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        wallet_id INTEGER NOT NULL REFERENCES wallets(id),
        balance INTEGER NOT NULL,
        version INTEGER NOT NULL,
        transaction_id INTEGER NOT NULL UNIQUE REFERENCES transactions(id),
        recorded_at TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_wallets_owner_id ON wallets(owner_id)",
    "CREATE INDEX IF NOT EXISTS idx_transactions_wallet_id ON transactions(wallet_id)",
    "CREATE INDEX IF NOT EXISTS idx_wallet_history_wallet_id ON wallet_history(wallet_id)",
];

const WALLET_COLUMNS: &str =
    "id, owner_id, asset_id, balance, version, created_at, updated_at";

const TRANSACTION_COLUMNS: &str =
    "id, idempotency_key, wallet_id, transaction_type, amount, reason, created_at";

const SNAPSHOT_COLUMNS: &str = "id, wallet_id, balance, version, transaction_id, recorded_at";

/// [`Store`] backed by a SQLite database file.
///
/// Every commit runs in one SQL transaction: the key lookup, the version
/// check, the conditional wallet update and the transaction, metadata and
/// history inserts either all land or none do. A transaction dropped before
/// it commits is rolled back. Writers inside the process queue on a gate so
/// they never contend for the SQLite write lock; the version guard in the
/// `UPDATE` still catches a writer outside the process.
pub struct SqliteStore {
    pool: SqlitePool,
    write_gate: Mutex<()>,
}

impl SqliteStore {
    /// Open (or create) the database at `path` and bring its schema up.
    pub async fn open(path: impl AsRef<Path>, max_connections: u32) -> StoreResult<Self> {
        let path = path.as_ref();
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Full)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .acquire_timeout(Duration::from_secs(5))
            .connect_with(options)
            .await?;

        for statement in SCHEMA {
            sqlx::query(statement).execute(&pool).await?;
        }
        debug!(path = %path.display(), "opened sqlite store");

        Ok(Self {
            pool,
            write_gate: Mutex::new(()),
        })
    }

    /// Number of transactions recorded across all wallets.
    pub async fn transaction_count(&self) -> StoreResult<usize> {
        let count: i64 = sqlx::query("SELECT COUNT(*) FROM transactions")
            .fetch_one(&self.pool)
            .await?
            .try_get(0)?;
        Ok(to_usize(count))
    }

    /// Wait for in-flight work and close every connection.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

impl Store for SqliteStore {
    async fn ensure_asset(&self, code: &str, name: &str, decimals: u8) -> StoreResult<AssetType> {
        let code = code.trim().to_ascii_uppercase();
        let _gate = self.write_gate.lock().await;
        let mut conn = self.pool.acquire().await?;

        sqlx::query("INSERT OR IGNORE INTO asset_types (code, name, decimals) VALUES (?, ?, ?)")
            .bind(&code)
            .bind(name)
            .bind(decimals)
            .execute(&mut *conn)
            .await?;

        let row = sqlx::query("SELECT id, code, name, decimals FROM asset_types WHERE code = ?")
            .bind(&code)
            .fetch_one(&mut *conn)
            .await?;
        Ok(asset_from_row(&row)?)
    }

    async fn asset(&self, code: &str) -> StoreResult<Option<AssetType>> {
        let row = sqlx::query("SELECT id, code, name, decimals FROM asset_types WHERE code = ?")
            .bind(code)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(asset_from_row).transpose()?)
    }

    async fn asset_by_id(&self, id: AssetId) -> StoreResult<Option<AssetType>> {
        let row = sqlx::query("SELECT id, code, name, decimals FROM asset_types WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(asset_from_row).transpose()?)
    }

    async fn provision_wallet(&self, owner: OwnerId, asset: AssetId) -> StoreResult<Wallet> {
        let now = Utc::now();
        let _gate = self.write_gate.lock().await;
        let mut conn = self.pool.acquire().await?;

        let known = sqlx::query("SELECT 1 FROM asset_types WHERE id = ?")
            .bind(asset)
            .fetch_optional(&mut *conn)
            .await?;
        if known.is_none() {
            return Err(StoreError::UnknownAsset(asset));
        }

        sqlx::query(
            r#"
            INSERT OR IGNORE INTO wallets (owner_id, asset_id, balance, version, created_at, updated_at)
            VALUES (?, ?, 0, 0, ?, ?)
            "#,
        )
        .bind(to_sql(owner))
        .bind(asset)
        .bind(now)
        .bind(now)
        .execute(&mut *conn)
        .await?;

        fetch_wallet(&mut conn, owner, asset)
            .await?
            .ok_or(StoreError::UnknownAsset(asset))
    }

    async fn wallet(&self, owner: OwnerId, asset: AssetId) -> StoreResult<Option<Wallet>> {
        let mut conn = self.pool.acquire().await?;
        fetch_wallet(&mut conn, owner, asset).await
    }

    async fn wallet_by_id(&self, id: WalletId) -> StoreResult<Option<Wallet>> {
        let mut conn = self.pool.acquire().await?;
        fetch_wallet_by_id(&mut conn, id).await
    }

    async fn wallets_for_owner(&self, owner: OwnerId) -> StoreResult<Vec<Wallet>> {
        let rows = sqlx::query(&format!(
            "SELECT {WALLET_COLUMNS} FROM wallets WHERE owner_id = ? ORDER BY id"
        ))
        .bind(to_sql(owner))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(wallet_from_row)
            .collect::<sqlx::Result<_>>()?)
    }

    async fn wallets(&self) -> StoreResult<Vec<Wallet>> {
        let rows = sqlx::query(&format!("SELECT {WALLET_COLUMNS} FROM wallets ORDER BY id"))
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .iter()
            .map(wallet_from_row)
            .collect::<sqlx::Result<_>>()?)
    }

    async fn receipt(&self, key: &IdempotencyKey) -> StoreResult<Option<Receipt>> {
        let mut tx = self.pool.begin().await?;
        let receipt = fetch_receipt(&mut tx, key).await?;
        tx.commit().await?;
        Ok(receipt)
    }

    async fn commit(&self, mutation: Mutation) -> StoreResult<Receipt> {
        let now = Utc::now();
        let _gate = self.write_gate.lock().await;
        let mut tx = self.pool.begin().await?;

        // Nothing is written until both checks pass
        if let Some(existing) = fetch_receipt(&mut tx, &mutation.entry.idempotency_key).await? {
            return Err(StoreError::DuplicateKey(Box::new(existing)));
        }
        let current = fetch_wallet_by_id(&mut tx, mutation.wallet_id)
            .await?
            .ok_or(StoreError::UnknownWallet(mutation.wallet_id))?;
        if current.version != mutation.expected_version {
            return Err(StoreError::VersionConflict {
                wallet: current.id,
                expected: mutation.expected_version,
                found: current.version,
            });
        }
        if mutation.new_balance.is_negative() {
            return Err(StoreError::NegativeBalance {
                wallet: current.id,
                balance: mutation.new_balance,
            });
        }

        let updated = sqlx::query(
            r#"
            UPDATE wallets
            SET balance = ?, version = version + 1, updated_at = ?
            WHERE id = ? AND version = ?
            "#,
        )
        .bind(mutation.new_balance.units())
        .bind(now)
        .bind(to_sql(current.id))
        .bind(to_sql(mutation.expected_version))
        .execute(&mut *tx)
        .await?;
        if updated.rows_affected() != 1 {
            return Err(StoreError::VersionConflict {
                wallet: current.id,
                expected: mutation.expected_version,
                found: mutation.expected_version + 1,
            });
        }

        let entry = mutation.entry;
        let tx_id = sqlx::query(
            r#"
            INSERT INTO transactions
                (idempotency_key, wallet_id, transaction_type, amount, reason, status, created_at)
            VALUES (?, ?, ?, ?, ?, 'completed', ?)
            "#,
        )
        .bind(entry.idempotency_key.as_str())
        .bind(to_sql(current.id))
        .bind(entry.kind.as_str())
        .bind(entry.amount.units())
        .bind(&entry.reason)
        .bind(now)
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

        for (key, value) in &entry.metadata {
            let (flag, int, text) = match value {
                MetaValue::Bool(b) => (Some(*b), None, None),
                MetaValue::Int(i) => (None, Some(*i), None),
                MetaValue::Str(s) => (None, None, Some(s.as_str())),
            };
            sqlx::query(
                r#"
                INSERT INTO transaction_metadata (transaction_id, key, bool_value, int_value, text_value)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(tx_id)
            .bind(key)
            .bind(flag)
            .bind(int)
            .bind(text)
            .execute(&mut *tx)
            .await?;
        }

        let version = mutation.expected_version + 1;
        let snapshot_id = sqlx::query(
            r#"
            INSERT INTO wallet_history (wallet_id, balance, version, transaction_id, recorded_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(to_sql(current.id))
        .bind(mutation.new_balance.units())
        .bind(to_sql(version))
        .bind(tx_id)
        .bind(now)
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

        tx.commit().await?;

        let transaction = Transaction {
            id: to_u64(tx_id),
            idempotency_key: entry.idempotency_key,
            wallet_id: current.id,
            amount: entry.amount,
            kind: entry.kind,
            reason: entry.reason,
            metadata: entry.metadata,
            status: TransactionStatus::Completed,
            created_at: now,
        };
        let snapshot = WalletSnapshot {
            id: to_u64(snapshot_id),
            wallet_id: current.id,
            balance: mutation.new_balance,
            version,
            transaction_id: transaction.id,
            recorded_at: now,
        };
        Ok(Receipt {
            transaction,
            snapshot,
        })
    }

    async fn transactions(
        &self,
        wallet: WalletId,
        limit: usize,
        offset: usize,
    ) -> StoreResult<TransactionPage> {
        // One read transaction so `total` and the page agree
        let mut tx = self.pool.begin().await?;

        let total: i64 = sqlx::query("SELECT COUNT(*) FROM transactions WHERE wallet_id = ?")
            .bind(to_sql(wallet))
            .fetch_one(&mut *tx)
            .await?
            .try_get(0)?;

        let rows = sqlx::query(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE wallet_id = ? \
             ORDER BY id DESC LIMIT ? OFFSET ?"
        ))
        .bind(to_sql(wallet))
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .bind(i64::try_from(offset).unwrap_or(i64::MAX))
        .fetch_all(&mut *tx)
        .await?;

        let mut transactions = Vec::with_capacity(rows.len());
        for row in &rows {
            let id: i64 = row.try_get("id")?;
            let metadata = fetch_metadata(&mut tx, id).await?;
            transactions.push(transaction_from_row(row, metadata)?);
        }
        tx.commit().await?;

        Ok(TransactionPage {
            transactions,
            total: to_usize(total),
        })
    }

    async fn totals(&self, wallet: WalletId) -> StoreResult<LedgerTotals> {
        let mut conn = self.pool.acquire().await?;
        fetch_totals(&mut conn, wallet).await
    }

    async fn latest_snapshot(&self, wallet: WalletId) -> StoreResult<Option<WalletSnapshot>> {
        let mut conn = self.pool.acquire().await?;
        fetch_latest_snapshot(&mut conn, wallet).await
    }

    async fn audit_view(&self, wallet: WalletId) -> StoreResult<Option<AuditView>> {
        // The first read pins the WAL snapshot for the rest of the transaction
        let mut tx = self.pool.begin().await?;
        let Some(stored) = fetch_wallet_by_id(&mut tx, wallet).await? else {
            return Ok(None);
        };
        let totals = fetch_totals(&mut tx, wallet).await?;
        let latest_snapshot = fetch_latest_snapshot(&mut tx, wallet).await?;
        tx.commit().await?;

        Ok(Some(AuditView {
            wallet: stored,
            totals,
            latest_snapshot,
        }))
    }
}

async fn fetch_wallet(
    conn: &mut SqliteConnection,
    owner: OwnerId,
    asset: AssetId,
) -> StoreResult<Option<Wallet>> {
    let row = sqlx::query(&format!(
        "SELECT {WALLET_COLUMNS} FROM wallets WHERE owner_id = ? AND asset_id = ?"
    ))
    .bind(to_sql(owner))
    .bind(asset)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(row.as_ref().map(wallet_from_row).transpose()?)
}

async fn fetch_wallet_by_id(
    conn: &mut SqliteConnection,
    id: WalletId,
) -> StoreResult<Option<Wallet>> {
    let row = sqlx::query(&format!("SELECT {WALLET_COLUMNS} FROM wallets WHERE id = ?"))
        .bind(to_sql(id))
        .fetch_optional(&mut *conn)
        .await?;
    Ok(row.as_ref().map(wallet_from_row).transpose()?)
}

async fn fetch_receipt(
    conn: &mut SqliteConnection,
    key: &IdempotencyKey,
) -> StoreResult<Option<Receipt>> {
    let Some(row) = sqlx::query(&format!(
        "SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE idempotency_key = ?"
    ))
    .bind(key.as_str())
    .fetch_optional(&mut *conn)
    .await?
    else {
        return Ok(None);
    };

    let id: i64 = row.try_get("id")?;
    let metadata = fetch_metadata(conn, id).await?;
    let transaction = transaction_from_row(&row, metadata)?;

    let snapshot = sqlx::query(&format!(
        "SELECT {SNAPSHOT_COLUMNS} FROM wallet_history WHERE transaction_id = ?"
    ))
    .bind(id)
    .fetch_one(&mut *conn)
    .await?;

    Ok(Some(Receipt {
        transaction,
        snapshot: snapshot_from_row(&snapshot)?,
    }))
}

async fn fetch_metadata(conn: &mut SqliteConnection, transaction: i64) -> StoreResult<Metadata> {
    let rows = sqlx::query(
        "SELECT key, bool_value, int_value, text_value FROM transaction_metadata \
         WHERE transaction_id = ?",
    )
    .bind(transaction)
    .fetch_all(&mut *conn)
    .await?;

    let mut metadata = Metadata::new();
    for row in &rows {
        let key: String = row.try_get("key")?;
        let flag: Option<bool> = row.try_get("bool_value")?;
        let int: Option<i64> = row.try_get("int_value")?;
        let text: Option<String> = row.try_get("text_value")?;
        let value = match (flag, int, text) {
            (Some(b), _, _) => MetaValue::Bool(b),
            (_, Some(i), _) => MetaValue::Int(i),
            (_, _, Some(s)) => MetaValue::Str(s),
            (None, None, None) => {
                return Err(decode_error("value", format!("metadata '{key}' has no value")).into());
            }
        };
        metadata.insert(key, value);
    }
    Ok(metadata)
}

async fn fetch_totals(conn: &mut SqliteConnection, wallet: WalletId) -> StoreResult<LedgerTotals> {
    let row = sqlx::query(
        r#"
        SELECT COALESCE(SUM(amount), 0) AS sum, COUNT(*) AS count
        FROM transactions
        WHERE wallet_id = ? AND status = 'completed'
        "#,
    )
    .bind(to_sql(wallet))
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| match e {
        // SQLite's SUM fails instead of wrapping
        sqlx::Error::Database(db) if db.message().contains("integer overflow") => {
            StoreError::SumOverflow(wallet)
        }
        other => StoreError::Database(other),
    })?;

    let sum: i64 = row.try_get("sum")?;
    let count: i64 = row.try_get("count")?;
    Ok(LedgerTotals {
        sum: Amount::from_units(sum),
        count: to_u64(count),
    })
}

async fn fetch_latest_snapshot(
    conn: &mut SqliteConnection,
    wallet: WalletId,
) -> StoreResult<Option<WalletSnapshot>> {
    let row = sqlx::query(&format!(
        "SELECT {SNAPSHOT_COLUMNS} FROM wallet_history WHERE wallet_id = ? ORDER BY id DESC LIMIT 1"
    ))
    .bind(to_sql(wallet))
    .fetch_optional(&mut *conn)
    .await?;
    Ok(row.as_ref().map(snapshot_from_row).transpose()?)
}

// row mapping

fn asset_from_row(row: &SqliteRow) -> sqlx::Result<AssetType> {
    Ok(AssetType {
        id: int_column(row, "id")?,
        code: row.try_get("code")?,
        name: row.try_get("name")?,
        decimals: int_column(row, "decimals")?,
    })
}

fn wallet_from_row(row: &SqliteRow) -> sqlx::Result<Wallet> {
    Ok(Wallet {
        id: int_column(row, "id")?,
        owner: int_column(row, "owner_id")?,
        asset: int_column(row, "asset_id")?,
        balance: Amount::from_units(row.try_get("balance")?),
        version: int_column(row, "version")?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
        updated_at: row.try_get::<DateTime<Utc>, _>("updated_at")?,
    })
}

fn transaction_from_row(row: &SqliteRow, metadata: Metadata) -> sqlx::Result<Transaction> {
    let key: String = row.try_get("idempotency_key")?;
    let kind: String = row.try_get("transaction_type")?;
    Ok(Transaction {
        id: int_column(row, "id")?,
        idempotency_key: IdempotencyKey::new(key)
            .map_err(|e| decode_error("idempotency_key", e.to_string()))?,
        wallet_id: int_column(row, "wallet_id")?,
        amount: Amount::from_units(row.try_get("amount")?),
        kind: kind
            .parse()
            .map_err(|e: UnknownKind| decode_error("transaction_type", e.to_string()))?,
        reason: row.try_get("reason")?,
        metadata,
        status: TransactionStatus::Completed,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
    })
}

fn snapshot_from_row(row: &SqliteRow) -> sqlx::Result<WalletSnapshot> {
    Ok(WalletSnapshot {
        id: int_column(row, "id")?,
        wallet_id: int_column(row, "wallet_id")?,
        balance: Amount::from_units(row.try_get("balance")?),
        version: int_column(row, "version")?,
        transaction_id: int_column::<TxId>(row, "transaction_id")?,
        recorded_at: row.try_get::<DateTime<Utc>, _>("recorded_at")?,
    })
}

/// Read an INTEGER column into an unsigned id or counter.
fn int_column<T: TryFrom<i64>>(row: &SqliteRow, column: &str) -> sqlx::Result<T> {
    let value: i64 = row.try_get(column)?;
    T::try_from(value).map_err(|_| decode_error(column, format!("{value} is out of range")))
}

fn decode_error(column: &str, reason: String) -> sqlx::Error {
    sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: reason.into(),
    }
}

// Ids and versions are assigned by SQLite, so they always fit back into i64
fn to_sql(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn to_u64(value: i64) -> u64 {
    u64::try_from(value).unwrap_or_default()
}

fn to_usize(value: i64) -> usize {
    usize::try_from(value).unwrap_or_default()
}
