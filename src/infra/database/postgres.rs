//! PostgreSQL store implementation.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{PgPool, QueryBuilder, Row, postgres::PgPoolOptions};
use std::time::Duration;
use tracing::{info, instrument};

use crate::domain::{
    AppError, DatabaseError, NewWithdrawal, Paginated, Reward, Store, TransactionRecord,
    TransactionStatus, Withdrawal, WithdrawalQuery, WithdrawalState, WithdrawalType,
};

/// PostgreSQL connection pool configuration
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: Duration,
    pub idle_timeout: Duration,
    pub max_lifetime: Duration,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 2,
            acquire_timeout: Duration::from_secs(3),
            idle_timeout: Duration::from_secs(600),
            max_lifetime: Duration::from_secs(1800),
        }
    }
}

/// Withdrawal projection with transaction ids aggregated in creation order.
const WITHDRAWAL_SELECT: &str = r#"
    SELECT w.id, w.withdrawal_type, w.sub, w.pool_address, w.chain_id,
           w.reward_id, w.beneficiary, w.amount, w.unlock_date, w.state,
           w.withdrawal_id, w.fail_reason, w.attempt_count, w.version,
           w.created_at, w.updated_at,
           COALESCE(
               array_agg(t.id ORDER BY t.created_at) FILTER (WHERE t.id IS NOT NULL),
               '{}'
           ) AS transactions
    FROM withdrawals w
    LEFT JOIN transactions t ON t.withdrawal_ref = w.id
"#;

/// PostgreSQL store with connection pooling
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Create a new PostgreSQL store with custom configuration
    pub async fn new(database_url: &str, config: PostgresConfig) -> Result<Self, AppError> {
        info!("Connecting to PostgreSQL...");
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.acquire_timeout)
            .idle_timeout(config.idle_timeout)
            .max_lifetime(config.max_lifetime)
            .connect(database_url)
            .await
            .map_err(|e| AppError::Database(DatabaseError::Connection(e.to_string())))?;
        info!("Connected to PostgreSQL");
        Ok(Self { pool })
    }

    /// Create a new PostgreSQL store with default configuration
    pub async fn with_defaults(database_url: &str) -> Result<Self, AppError> {
        Self::new(database_url, PostgresConfig::default()).await
    }

    /// Run database migrations using sqlx migrate
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations...");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::Database(DatabaseError::Migration(e.to_string())))?;
        info!("Database migrations completed");
        Ok(())
    }

    /// Get the underlying connection pool (for testing)
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Parse a database row into a Withdrawal
    fn row_to_withdrawal(row: &sqlx::postgres::PgRow) -> Result<Withdrawal, AppError> {
        let withdrawal_type: String = row.get("withdrawal_type");
        let state: String = row.get("state");

        Ok(Withdrawal {
            id: row.get("id"),
            withdrawal_type: withdrawal_type
                .parse()
                .unwrap_or(WithdrawalType::ProposeWithdraw),
            sub: row.get("sub"),
            pool_address: row.get("pool_address"),
            chain_id: row.get::<i64, _>("chain_id") as u64,
            reward_id: row.get("reward_id"),
            beneficiary: row.get("beneficiary"),
            amount: row.get("amount"),
            unlock_date: row.get("unlock_date"),
            state: state.parse().unwrap_or(WithdrawalState::Pending),
            withdrawal_id: row
                .get::<Option<i64>, _>("withdrawal_id")
                .map(|v| v as u64),
            fail_reason: row.get("fail_reason"),
            attempt_count: row.get("attempt_count"),
            version: row.get("version"),
            transactions: row.get("transactions"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }

    /// Parse a database row into a TransactionRecord
    fn row_to_transaction(row: &sqlx::postgres::PgRow) -> Result<TransactionRecord, AppError> {
        let status: String = row.get("status");

        Ok(TransactionRecord {
            id: row.get("id"),
            withdrawal_ref: row.get("withdrawal_ref"),
            to_address: row.get("to_address"),
            call_data: row.get("call_data"),
            chain_id: row.get::<i64, _>("chain_id") as u64,
            nonce: row.get::<i64, _>("nonce") as u64,
            max_fee_per_gas: row.get("max_fee_per_gas"),
            tx_hash: row.get("tx_hash"),
            block_number: row.get("block_number"),
            gas_used: row.get("gas_used"),
            status: status.parse().unwrap_or(TransactionStatus::Pending),
            fail_reason: row.get("fail_reason"),
            created_at: row.get("created_at"),
        })
    }

    fn push_filters(qb: &mut QueryBuilder<'_, sqlx::Postgres>, query: &WithdrawalQuery) {
        if let Some(member) = &query.member {
            qb.push(" AND w.beneficiary = ");
            qb.push_bind(member.clone());
        }
        if let Some(reward_id) = &query.reward_id {
            qb.push(" AND w.reward_id = ");
            qb.push_bind(reward_id.clone());
        }
        if let Some(state) = query.state {
            qb.push(" AND w.state = ");
            qb.push_bind(state.as_str());
        }
    }
}

#[async_trait]
impl Store for PostgresStore {
    #[instrument(skip(self))]
    async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::Database(DatabaseError::Connection(e.to_string())))?;
        Ok(())
    }

    #[instrument(skip(self, data), fields(pool = %data.pool_address, sub = %data.sub))]
    async fn insert_withdrawal(&self, data: &NewWithdrawal) -> Result<Withdrawal, AppError> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO withdrawals (
                id, withdrawal_type, sub, pool_address, chain_id, reward_id,
                beneficiary, amount, unlock_date, state, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $11)
            "#,
        )
        .bind(&id)
        .bind(data.withdrawal_type.as_str())
        .bind(&data.sub)
        .bind(&data.pool_address)
        .bind(data.chain_id as i64)
        .bind(&data.reward_id)
        .bind(&data.beneficiary)
        .bind(&data.amount)
        .bind(data.unlock_date)
        .bind(data.state.as_str())
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from)?;

        Ok(Withdrawal {
            id,
            withdrawal_type: data.withdrawal_type,
            sub: data.sub.clone(),
            pool_address: data.pool_address.clone(),
            chain_id: data.chain_id,
            reward_id: data.reward_id.clone(),
            beneficiary: data.beneficiary.clone(),
            amount: data.amount.clone(),
            unlock_date: data.unlock_date,
            state: data.state,
            withdrawal_id: None,
            fail_reason: None,
            attempt_count: 0,
            version: 0,
            transactions: Vec::new(),
            created_at: now,
            updated_at: now,
        })
    }

    #[instrument(skip(self))]
    async fn get_withdrawal(&self, id: &str) -> Result<Option<Withdrawal>, AppError> {
        let row = sqlx::query(&format!("{WITHDRAWAL_SELECT} WHERE w.id = $1 GROUP BY w.id"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from)?;

        match row {
            Some(row) => Ok(Some(Self::row_to_withdrawal(&row)?)),
            None => Ok(None),
        }
    }

    #[instrument(skip(self, query))]
    async fn find_withdrawals(
        &self,
        pool_address: &str,
        query: &WithdrawalQuery,
    ) -> Result<Paginated<Withdrawal>, AppError> {
        let mut count_qb =
            QueryBuilder::new("SELECT COUNT(*) FROM withdrawals w WHERE w.pool_address = ");
        count_qb.push_bind(pool_address);
        Self::push_filters(&mut count_qb, query);

        let total: i64 = count_qb
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await
            .map_err(DatabaseError::from)?;

        if total == 0 {
            return Ok(Paginated::empty());
        }

        let offset = i64::from(query.page.saturating_sub(1)) * i64::from(query.limit);
        let mut qb = QueryBuilder::new(WITHDRAWAL_SELECT);
        qb.push(" WHERE w.pool_address = ");
        qb.push_bind(pool_address);
        Self::push_filters(&mut qb, query);
        qb.push(" GROUP BY w.id ORDER BY w.created_at DESC LIMIT ");
        qb.push_bind(i64::from(query.limit));
        qb.push(" OFFSET ");
        qb.push_bind(offset);

        let rows = qb
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(DatabaseError::from)?;

        let results = rows
            .iter()
            .map(Self::row_to_withdrawal)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Paginated::new(
            results,
            total as u64,
            query.page,
            query.limit,
        ))
    }

    #[instrument(skip(self))]
    async fn count_by_pool(&self, pool_address: &str) -> Result<u64, AppError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM withdrawals WHERE pool_address = $1")
            .bind(pool_address)
            .fetch_one(&self.pool)
            .await
            .map_err(DatabaseError::from)?;
        Ok(count as u64)
    }

    #[instrument(skip(self))]
    async fn pending_amounts(
        &self,
        pool_address: &str,
        beneficiary: &str,
    ) -> Result<Vec<String>, AppError> {
        let amounts = sqlx::query_scalar(
            r#"
            SELECT amount FROM withdrawals
            WHERE pool_address = $1 AND beneficiary = $2
              AND state IN ('pending', 'deferred')
            "#,
        )
        .bind(pool_address)
        .bind(beneficiary)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from)?;
        Ok(amounts)
    }

    #[instrument(skip(self))]
    async fn list_processable(&self, limit: i64) -> Result<Vec<Withdrawal>, AppError> {
        let rows = sqlx::query(&format!(
            r#"
            {WITHDRAWAL_SELECT}
            WHERE w.state = 'pending' AND w.withdrawal_id IS NULL
            GROUP BY w.id
            ORDER BY w.created_at ASC
            LIMIT $1
            "#
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from)?;

        rows.iter().map(Self::row_to_withdrawal).collect()
    }

    #[instrument(skip(self))]
    async fn list_deferred(&self, limit: i64) -> Result<Vec<Withdrawal>, AppError> {
        let rows = sqlx::query(&format!(
            r#"
            {WITHDRAWAL_SELECT}
            WHERE w.state = 'deferred'
            GROUP BY w.id
            ORDER BY w.created_at ASC
            LIMIT $1
            "#
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from)?;

        rows.iter().map(Self::row_to_withdrawal).collect()
    }

    #[instrument(skip(self), fields(withdrawal_id))]
    async fn record_proposal(
        &self,
        id: &str,
        version: i32,
        withdrawal_id: u64,
        transaction_id: &str,
    ) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await.map_err(DatabaseError::from)?;

        let result = sqlx::query(
            r#"
            UPDATE withdrawals
            SET withdrawal_id = $3, fail_reason = NULL,
                version = version + 1, updated_at = NOW()
            WHERE id = $1 AND version = $2 AND withdrawal_id IS NULL
            "#,
        )
        .bind(id)
        .bind(version)
        .bind(withdrawal_id as i64)
        .execute(&mut *tx)
        .await
        .map_err(DatabaseError::from)?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::Conflict(format!(
                "withdrawal {id} changed since version {version}"
            ))
            .into());
        }

        sqlx::query("UPDATE transactions SET withdrawal_ref = $1 WHERE id = $2")
            .bind(id)
            .bind(transaction_id)
            .execute(&mut *tx)
            .await
            .map_err(DatabaseError::from)?;

        tx.commit().await.map_err(DatabaseError::from)?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn set_state(
        &self,
        id: &str,
        version: i32,
        state: WithdrawalState,
        transaction_id: Option<&str>,
    ) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await.map_err(DatabaseError::from)?;

        let result = sqlx::query(
            r#"
            UPDATE withdrawals
            SET state = $3, fail_reason = NULL,
                version = version + 1, updated_at = NOW()
            WHERE id = $1 AND version = $2
            "#,
        )
        .bind(id)
        .bind(version)
        .bind(state.as_str())
        .execute(&mut *tx)
        .await
        .map_err(DatabaseError::from)?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::Conflict(format!(
                "withdrawal {id} changed since version {version}"
            ))
            .into());
        }

        if let Some(transaction_id) = transaction_id {
            sqlx::query("UPDATE transactions SET withdrawal_ref = $1 WHERE id = $2")
                .bind(id)
                .bind(transaction_id)
                .execute(&mut *tx)
                .await
                .map_err(DatabaseError::from)?;
        }

        tx.commit().await.map_err(DatabaseError::from)?;
        Ok(())
    }

    #[instrument(skip(self, reason))]
    async fn set_fail_reason(
        &self,
        id: &str,
        version: i32,
        reason: &str,
    ) -> Result<(), AppError> {
        let result = sqlx::query(
            r#"
            UPDATE withdrawals
            SET fail_reason = $3, attempt_count = attempt_count + 1,
                version = version + 1, updated_at = NOW()
            WHERE id = $1 AND version = $2
            "#,
        )
        .bind(id)
        .bind(version)
        .bind(reason)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from)?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::Conflict(format!(
                "withdrawal {id} changed since version {version}"
            ))
            .into());
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn promote_deferred(
        &self,
        id: &str,
        version: i32,
        beneficiary: &str,
    ) -> Result<(), AppError> {
        let result = sqlx::query(
            r#"
            UPDATE withdrawals
            SET state = 'pending', beneficiary = $3,
                version = version + 1, updated_at = NOW()
            WHERE id = $1 AND version = $2 AND state = 'deferred'
            "#,
        )
        .bind(id)
        .bind(version)
        .bind(beneficiary)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from)?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::Conflict(format!(
                "withdrawal {id} changed since version {version}"
            ))
            .into());
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_withdrawal(&self, id: &str) -> Result<(), AppError> {
        let result = sqlx::query("DELETE FROM withdrawals WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(DatabaseError::from)?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound(format!("withdrawal {id} not found")).into());
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_withdrawals_for_pool(&self, pool_address: &str) -> Result<u64, AppError> {
        let result = sqlx::query("DELETE FROM withdrawals WHERE pool_address = $1")
            .bind(pool_address)
            .execute(&self.pool)
            .await
            .map_err(DatabaseError::from)?;
        Ok(result.rows_affected())
    }

    #[instrument(skip(self, record), fields(id = %record.id, chain_id = record.chain_id, nonce = record.nonce))]
    async fn insert_transaction(&self, record: &TransactionRecord) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO transactions (
                id, withdrawal_ref, to_address, call_data, chain_id, nonce,
                max_fee_per_gas, tx_hash, block_number, gas_used, status,
                fail_reason, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(&record.id)
        .bind(&record.withdrawal_ref)
        .bind(&record.to_address)
        .bind(&record.call_data)
        .bind(record.chain_id as i64)
        .bind(record.nonce as i64)
        .bind(&record.max_fee_per_gas)
        .bind(&record.tx_hash)
        .bind(record.block_number)
        .bind(&record.gas_used)
        .bind(record.status.as_str())
        .bind(&record.fail_reason)
        .bind(record.created_at)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from)?;
        Ok(())
    }

    #[instrument(skip(self, record), fields(id = %record.id))]
    async fn update_transaction(&self, record: &TransactionRecord) -> Result<(), AppError> {
        let result = sqlx::query(
            r#"
            UPDATE transactions
            SET tx_hash = $2, block_number = $3, gas_used = $4,
                status = $5, fail_reason = $6
            WHERE id = $1
            "#,
        )
        .bind(&record.id)
        .bind(&record.tx_hash)
        .bind(record.block_number)
        .bind(&record.gas_used)
        .bind(record.status.as_str())
        .bind(&record.fail_reason)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from)?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound(format!(
                "transaction {} not found",
                record.id
            ))
            .into());
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_transaction(&self, id: &str) -> Result<Option<TransactionRecord>, AppError> {
        let row = sqlx::query("SELECT * FROM transactions WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from)?;

        match row {
            Some(row) => Ok(Some(Self::row_to_transaction(&row)?)),
            None => Ok(None),
        }
    }

    #[instrument(skip(self, ids))]
    async fn list_transactions(&self, ids: &[String]) -> Result<Vec<TransactionRecord>, AppError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query("SELECT * FROM transactions WHERE id = ANY($1) ORDER BY created_at")
            .bind(ids)
            .fetch_all(&self.pool)
            .await
            .map_err(DatabaseError::from)?;

        rows.iter().map(Self::row_to_transaction).collect()
    }

    #[instrument(skip(self, ids))]
    async fn find_fail_reasons(&self, ids: &[String]) -> Result<Vec<String>, AppError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let reasons = sqlx::query_scalar(
            r#"
            SELECT fail_reason FROM transactions
            WHERE id = ANY($1) AND fail_reason IS NOT NULL
            ORDER BY created_at
            "#,
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from)?;
        Ok(reasons)
    }

    #[instrument(skip(self, reward), fields(id = %reward.id, pool = %reward.pool_address))]
    async fn insert_reward(&self, reward: &Reward) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO rewards (
                id, pool_address, chain_id, amount, withdraw_duration, title, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(&reward.id)
        .bind(&reward.pool_address)
        .bind(reward.chain_id as i64)
        .bind(&reward.amount)
        .bind(reward.withdraw_duration)
        .bind(&reward.title)
        .bind(reward.created_at)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from)?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_reward(&self, id: &str) -> Result<Option<Reward>, AppError> {
        let row = sqlx::query("SELECT * FROM rewards WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from)?;

        match row {
            None => Ok(None),
            Some(row) => Ok(Some(Reward {
                id: row.get("id"),
                pool_address: row.get("pool_address"),
                chain_id: row.get::<i64, _>("chain_id") as u64,
                amount: row.get("amount"),
                withdraw_duration: row.get("withdraw_duration"),
                title: row.get("title"),
                created_at: row.get("created_at"),
            })),
        }
    }

    #[instrument(skip(self))]
    async fn get_wallet(&self, sub: &str) -> Result<Option<String>, AppError> {
        let address = sqlx::query_scalar("SELECT address FROM account_wallets WHERE sub = $1")
            .bind(sub)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from)?;
        Ok(address)
    }

    #[instrument(skip(self))]
    async fn set_wallet(&self, sub: &str, address: &str) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO account_wallets (sub, address, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (sub) DO UPDATE
            SET address = EXCLUDED.address, updated_at = NOW()
            "#,
        )
        .bind(sub)
        .bind(address)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from)?;
        Ok(())
    }
}
