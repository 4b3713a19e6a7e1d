//! PostgreSQL storage backend
//!
//! Rollback deletions use `DELETE ... RETURNING` so the removed rows come
//! back in the same round trip that removes them. All pipeline writes run
//! inside one sqlx transaction per rollback step.

use {
    crate::traits::{
        BalanceUpdate, DelegationUpdate, NamespaceUpdate, Storage, StorageTx, ValidatorUpdate,
    },
    anyhow::{anyhow, Context, Result},
    async_trait::async_trait,
    sqlx::{
        postgres::{PgPool, PgPoolOptions, PgRow},
        Postgres, Row, Transaction,
    },
    tiascan_common::{
        config::DatabaseConfig,
        types::{
            Address, Balance, BlockStats, Delegation, Event, EventKind, Height, IndexerState,
            Jail, Message, MessageAddress, Namespace, NamespaceMessage, Signer, StakingLog,
            StakingLogKind, Tx, Validator,
        },
    },
};

pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections as u32)
            .connect(&config.connection_string)
            .await
            .context("Failed to connect to postgres")?;

        let store = Self { pool };

        if config.create_tables {
            store.initialize_schema().await?;
        }

        Ok(store)
    }

    async fn initialize_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS blocks (
                height BIGINT PRIMARY KEY,
                hash TEXT NOT NULL,
                parent_hash TEXT NOT NULL,
                time TIMESTAMP WITH TIME ZONE NOT NULL
            );

            CREATE TABLE IF NOT EXISTS block_stats (
                height BIGINT PRIMARY KEY REFERENCES blocks(height),
                tx_count BIGINT NOT NULL DEFAULT 0,
                events_count BIGINT NOT NULL DEFAULT 0,
                fee BIGINT NOT NULL DEFAULT 0,
                blobs_size BIGINT NOT NULL DEFAULT 0,
                blobs_count BIGINT NOT NULL DEFAULT 0,
                supply_change BIGINT NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS txs (
                id BIGSERIAL PRIMARY KEY,
                height BIGINT NOT NULL,
                hash TEXT NOT NULL,
                position INT NOT NULL,
                fee BIGINT NOT NULL DEFAULT 0,
                gas_wanted BIGINT NOT NULL DEFAULT 0,
                gas_used BIGINT NOT NULL DEFAULT 0,
                messages_count INT NOT NULL DEFAULT 0
            );
            CREATE INDEX IF NOT EXISTS txs_height_idx ON txs(height);

            CREATE TABLE IF NOT EXISTS signers (
                tx_id BIGINT NOT NULL,
                address_id BIGINT NOT NULL,
                PRIMARY KEY (tx_id, address_id)
            );

            CREATE TABLE IF NOT EXISTS messages (
                id BIGSERIAL PRIMARY KEY,
                tx_id BIGINT NOT NULL,
                height BIGINT NOT NULL,
                position INT NOT NULL,
                msg_type TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS messages_height_idx ON messages(height);

            CREATE TABLE IF NOT EXISTS message_addresses (
                msg_id BIGINT NOT NULL,
                address_id BIGINT NOT NULL,
                PRIMARY KEY (msg_id, address_id)
            );

            CREATE TABLE IF NOT EXISTS namespace_messages (
                namespace_id TEXT NOT NULL,
                msg_id BIGINT NOT NULL,
                height BIGINT NOT NULL,
                size BIGINT NOT NULL DEFAULT 0,
                PRIMARY KEY (namespace_id, msg_id)
            );
            CREATE INDEX IF NOT EXISTS namespace_messages_height_idx
                ON namespace_messages(height);

            CREATE TABLE IF NOT EXISTS namespaces (
                id BIGSERIAL PRIMARY KEY,
                namespace_id TEXT NOT NULL UNIQUE,
                version INT NOT NULL DEFAULT 0,
                size BIGINT NOT NULL DEFAULT 0,
                pfb_count BIGINT NOT NULL DEFAULT 0,
                first_height BIGINT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS events (
                id BIGSERIAL PRIMARY KEY,
                height BIGINT NOT NULL,
                tx_id BIGINT,
                kind TEXT NOT NULL,
                attributes JSONB NOT NULL DEFAULT '{}'::jsonb
            );
            CREATE INDEX IF NOT EXISTS events_height_idx ON events(height);

            CREATE TABLE IF NOT EXISTS addresses (
                id BIGSERIAL PRIMARY KEY,
                address TEXT NOT NULL UNIQUE,
                height BIGINT NOT NULL,
                spendable BIGINT NOT NULL DEFAULT 0,
                delegated BIGINT NOT NULL DEFAULT 0,
                unbonding BIGINT NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS validators (
                id BIGSERIAL PRIMARY KEY,
                address TEXT NOT NULL UNIQUE,
                delegator TEXT NOT NULL,
                stake BIGINT NOT NULL DEFAULT 0,
                commissions BIGINT NOT NULL DEFAULT 0,
                rewards BIGINT NOT NULL DEFAULT 0,
                height BIGINT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS staking_logs (
                id BIGSERIAL PRIMARY KEY,
                height BIGINT NOT NULL,
                kind TEXT NOT NULL,
                validator_id BIGINT NOT NULL,
                address TEXT,
                amount BIGINT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS staking_logs_height_idx ON staking_logs(height);

            CREATE TABLE IF NOT EXISTS jails (
                id BIGSERIAL PRIMARY KEY,
                validator_id BIGINT NOT NULL,
                height BIGINT NOT NULL,
                reason TEXT NOT NULL DEFAULT '',
                burned BIGINT NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS delegations (
                id BIGSERIAL PRIMARY KEY,
                address TEXT NOT NULL,
                validator_id BIGINT NOT NULL,
                amount BIGINT NOT NULL DEFAULT 0,
                height BIGINT NOT NULL,
                UNIQUE (address, validator_id)
            );

            CREATE TABLE IF NOT EXISTS state (
                name TEXT PRIMARY KEY,
                last_height BIGINT NOT NULL DEFAULT 0,
                last_hash TEXT NOT NULL DEFAULT '',
                last_time TIMESTAMP WITH TIME ZONE NOT NULL,
                total_tx BIGINT NOT NULL DEFAULT 0,
                total_accounts BIGINT NOT NULL DEFAULT 0,
                total_namespaces BIGINT NOT NULL DEFAULT 0,
                total_blobs_size BIGINT NOT NULL DEFAULT 0,
                total_fee BIGINT NOT NULL DEFAULT 0,
                total_supply BIGINT NOT NULL DEFAULT 0
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn state_from_row(row: PgRow) -> Result<IndexerState> {
    Ok(IndexerState {
        name: row.try_get("name")?,
        last_height: row.try_get::<i64, _>("last_height")? as Height,
        last_hash: row.try_get("last_hash")?,
        last_time: row.try_get("last_time")?,
        total_tx: row.try_get("total_tx")?,
        total_accounts: row.try_get("total_accounts")?,
        total_namespaces: row.try_get("total_namespaces")?,
        total_blobs_size: row.try_get("total_blobs_size")?,
        total_fee: row.try_get("total_fee")?,
        total_supply: row.try_get("total_supply")?,
    })
}

fn tx_from_row(row: PgRow) -> Result<Tx> {
    Ok(Tx {
        id: row.try_get("id")?,
        height: row.try_get::<i64, _>("height")? as Height,
        hash: row.try_get("hash")?,
        position: row.try_get("position")?,
        fee: row.try_get("fee")?,
        gas_wanted: row.try_get("gas_wanted")?,
        gas_used: row.try_get("gas_used")?,
        messages_count: row.try_get("messages_count")?,
    })
}

fn event_from_row(row: PgRow) -> Result<Event> {
    let kind: String = row.try_get("kind")?;
    let attributes: serde_json::Value = row.try_get("attributes")?;
    Ok(Event {
        id: row.try_get("id")?,
        height: row.try_get::<i64, _>("height")? as Height,
        tx_id: row.try_get("tx_id")?,
        kind: EventKind::from_type(&kind),
        attributes: serde_json::from_value(attributes)
            .context("Malformed event attributes in storage")?,
    })
}

fn address_from_row(row: PgRow) -> Result<Address> {
    Ok(Address {
        id: row.try_get("id")?,
        address: row.try_get("address")?,
        height: row.try_get::<i64, _>("height")? as Height,
        balance: Balance {
            spendable: row.try_get("spendable")?,
            delegated: row.try_get("delegated")?,
            unbonding: row.try_get("unbonding")?,
        },
    })
}

fn validator_from_row(row: PgRow) -> Result<Validator> {
    Ok(Validator {
        id: row.try_get("id")?,
        address: row.try_get("address")?,
        delegator: row.try_get("delegator")?,
        stake: row.try_get("stake")?,
        commissions: row.try_get("commissions")?,
        rewards: row.try_get("rewards")?,
        height: row.try_get::<i64, _>("height")? as Height,
    })
}

fn staking_log_from_row(row: PgRow) -> Result<StakingLog> {
    let kind: String = row.try_get("kind")?;
    Ok(StakingLog {
        id: row.try_get("id")?,
        height: row.try_get::<i64, _>("height")? as Height,
        kind: StakingLogKind::from_str(&kind)
            .ok_or_else(|| anyhow!("Unknown staking log kind in storage: {kind}"))?,
        validator_id: row.try_get("validator_id")?,
        address: row.try_get("address")?,
        amount: row.try_get("amount")?,
    })
}

#[async_trait]
impl Storage for PostgresStore {
    async fn begin(&self) -> Result<Box<dyn StorageTx>> {
        let tx = self.pool.begin().await.context("Failed to open transaction")?;
        Ok(Box::new(PgTx { tx }))
    }

    async fn state(&self, name: &str) -> Result<Option<IndexerState>> {
        let row = sqlx::query("SELECT * FROM state WHERE name = $1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        row.map(state_from_row).transpose()
    }
}

pub struct PgTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl StorageTx for PgTx {
    async fn last_block(&mut self) -> Result<Option<(Height, String)>> {
        let row = sqlx::query("SELECT height, hash FROM blocks ORDER BY height DESC LIMIT 1")
            .fetch_optional(&mut *self.tx)
            .await?;
        match row {
            Some(row) => Ok(Some((
                row.try_get::<i64, _>("height")? as Height,
                row.try_get("hash")?,
            ))),
            None => Ok(None),
        }
    }

    async fn rollback_block(&mut self, height: Height) -> Result<()> {
        sqlx::query("DELETE FROM blocks WHERE height = $1")
            .bind(height as i64)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn rollback_block_stats(&mut self, height: Height) -> Result<Option<BlockStats>> {
        let row = sqlx::query("DELETE FROM block_stats WHERE height = $1 RETURNING *")
            .bind(height as i64)
            .fetch_optional(&mut *self.tx)
            .await?;
        match row {
            Some(row) => Ok(Some(BlockStats {
                height: row.try_get::<i64, _>("height")? as Height,
                tx_count: row.try_get("tx_count")?,
                events_count: row.try_get("events_count")?,
                fee: row.try_get("fee")?,
                blobs_size: row.try_get("blobs_size")?,
                blobs_count: row.try_get("blobs_count")?,
                supply_change: row.try_get("supply_change")?,
            })),
            None => Ok(None),
        }
    }

    async fn rollback_txs(&mut self, height: Height) -> Result<Vec<Tx>> {
        let rows = sqlx::query("DELETE FROM txs WHERE height = $1 RETURNING *")
            .bind(height as i64)
            .fetch_all(&mut *self.tx)
            .await?;
        rows.into_iter().map(tx_from_row).collect()
    }

    async fn rollback_signers(&mut self, height: Height) -> Result<Vec<Signer>> {
        let rows = sqlx::query(
            "DELETE FROM signers WHERE tx_id IN (SELECT id FROM txs WHERE height = $1) RETURNING *",
        )
        .bind(height as i64)
        .fetch_all(&mut *self.tx)
        .await?;
        rows.into_iter()
            .map(|row| {
                Ok(Signer {
                    tx_id: row.try_get("tx_id")?,
                    address_id: row.try_get("address_id")?,
                })
            })
            .collect()
    }

    async fn rollback_messages(&mut self, height: Height) -> Result<Vec<Message>> {
        let rows = sqlx::query("DELETE FROM messages WHERE height = $1 RETURNING *")
            .bind(height as i64)
            .fetch_all(&mut *self.tx)
            .await?;
        rows.into_iter()
            .map(|row| {
                Ok(Message {
                    id: row.try_get("id")?,
                    tx_id: row.try_get("tx_id")?,
                    height: row.try_get::<i64, _>("height")? as Height,
                    position: row.try_get("position")?,
                    msg_type: row.try_get("msg_type")?,
                })
            })
            .collect()
    }

    async fn rollback_message_addresses(&mut self, height: Height) -> Result<Vec<MessageAddress>> {
        let rows = sqlx::query(
            "DELETE FROM message_addresses WHERE msg_id IN \
             (SELECT id FROM messages WHERE height = $1) RETURNING *",
        )
        .bind(height as i64)
        .fetch_all(&mut *self.tx)
        .await?;
        rows.into_iter()
            .map(|row| {
                Ok(MessageAddress {
                    msg_id: row.try_get("msg_id")?,
                    address_id: row.try_get("address_id")?,
                })
            })
            .collect()
    }

    async fn rollback_namespace_messages(
        &mut self,
        height: Height,
    ) -> Result<Vec<NamespaceMessage>> {
        let rows = sqlx::query("DELETE FROM namespace_messages WHERE height = $1 RETURNING *")
            .bind(height as i64)
            .fetch_all(&mut *self.tx)
            .await?;
        rows.into_iter()
            .map(|row| {
                Ok(NamespaceMessage {
                    namespace_id: row.try_get("namespace_id")?,
                    msg_id: row.try_get("msg_id")?,
                    height: row.try_get::<i64, _>("height")? as Height,
                    size: row.try_get("size")?,
                })
            })
            .collect()
    }

    async fn rollback_namespaces(&mut self, height: Height) -> Result<Vec<Namespace>> {
        let rows = sqlx::query("DELETE FROM namespaces WHERE first_height = $1 RETURNING *")
            .bind(height as i64)
            .fetch_all(&mut *self.tx)
            .await?;
        rows.into_iter()
            .map(|row| {
                Ok(Namespace {
                    id: row.try_get("id")?,
                    namespace_id: row.try_get("namespace_id")?,
                    version: row.try_get("version")?,
                    size: row.try_get("size")?,
                    pfb_count: row.try_get("pfb_count")?,
                    first_height: row.try_get::<i64, _>("first_height")? as Height,
                })
            })
            .collect()
    }

    async fn rollback_events(&mut self, height: Height) -> Result<Vec<Event>> {
        let rows = sqlx::query("DELETE FROM events WHERE height = $1 RETURNING *")
            .bind(height as i64)
            .fetch_all(&mut *self.tx)
            .await?;
        rows.into_iter().map(event_from_row).collect()
    }

    async fn rollback_addresses(&mut self, height: Height) -> Result<Vec<Address>> {
        let rows = sqlx::query("DELETE FROM addresses WHERE height = $1 RETURNING *")
            .bind(height as i64)
            .fetch_all(&mut *self.tx)
            .await?;
        rows.into_iter().map(address_from_row).collect()
    }

    async fn rollback_validators(&mut self, height: Height) -> Result<Vec<Validator>> {
        let rows = sqlx::query("DELETE FROM validators WHERE height = $1 RETURNING *")
            .bind(height as i64)
            .fetch_all(&mut *self.tx)
            .await?;
        rows.into_iter().map(validator_from_row).collect()
    }

    async fn rollback_staking_logs(&mut self, height: Height) -> Result<Vec<StakingLog>> {
        let rows = sqlx::query("DELETE FROM staking_logs WHERE height = $1 RETURNING *")
            .bind(height as i64)
            .fetch_all(&mut *self.tx)
            .await?;
        rows.into_iter().map(staking_log_from_row).collect()
    }

    async fn rollback_jails(&mut self, height: Height) -> Result<Vec<Jail>> {
        let rows = sqlx::query("DELETE FROM jails WHERE height = $1 RETURNING *")
            .bind(height as i64)
            .fetch_all(&mut *self.tx)
            .await?;
        rows.into_iter()
            .map(|row| {
                Ok(Jail {
                    id: row.try_get("id")?,
                    validator_id: row.try_get("validator_id")?,
                    height: row.try_get::<i64, _>("height")? as Height,
                    reason: row.try_get("reason")?,
                    burned: row.try_get("burned")?,
                })
            })
            .collect()
    }

    async fn rollback_delegations(&mut self, height: Height) -> Result<Vec<Delegation>> {
        let rows = sqlx::query(
            "DELETE FROM delegations WHERE height = $1 \
             OR validator_id IN (SELECT id FROM validators WHERE height = $1) RETURNING *",
        )
        .bind(height as i64)
        .fetch_all(&mut *self.tx)
        .await?;
        rows.into_iter()
            .map(|row| {
                Ok(Delegation {
                    id: row.try_get("id")?,
                    address: row.try_get("address")?,
                    validator_id: row.try_get("validator_id")?,
                    amount: row.try_get("amount")?,
                    height: row.try_get::<i64, _>("height")? as Height,
                })
            })
            .collect()
    }

    async fn save_addresses(&mut self, addresses: &[Address]) -> Result<()> {
        for address in addresses {
            sqlx::query(
                r#"
                INSERT INTO addresses (address, height, spendable, delegated, unbonding)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT (address)
                DO UPDATE SET
                    spendable = EXCLUDED.spendable,
                    delegated = EXCLUDED.delegated,
                    unbonding = EXCLUDED.unbonding
                "#,
            )
            .bind(&address.address)
            .bind(address.height as i64)
            .bind(address.balance.spendable)
            .bind(address.balance.delegated)
            .bind(address.balance.unbonding)
            .execute(&mut *self.tx)
            .await?;
        }
        Ok(())
    }

    async fn save_balances(&mut self, updates: &[BalanceUpdate]) -> Result<()> {
        for update in updates {
            sqlx::query(
                r#"
                UPDATE addresses SET
                    spendable = spendable + $2,
                    delegated = delegated + $3,
                    unbonding = unbonding + $4
                WHERE address = $1
                "#,
            )
            .bind(&update.address)
            .bind(update.spendable)
            .bind(update.delegated)
            .bind(update.unbonding)
            .execute(&mut *self.tx)
            .await?;
        }
        Ok(())
    }

    async fn save_delegations(&mut self, updates: &[DelegationUpdate]) -> Result<()> {
        for update in updates {
            sqlx::query(
                "UPDATE delegations SET amount = amount + $3 \
                 WHERE address = $1 AND validator_id = $2",
            )
            .bind(&update.address)
            .bind(update.validator_id)
            .bind(update.amount)
            .execute(&mut *self.tx)
            .await?;
        }
        sqlx::query("DELETE FROM delegations WHERE amount = 0")
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn update_validators(&mut self, updates: &[ValidatorUpdate]) -> Result<()> {
        for update in updates {
            sqlx::query(
                r#"
                UPDATE validators SET
                    stake = stake + $2,
                    commissions = commissions + $3,
                    rewards = rewards + $4
                WHERE id = $1
                "#,
            )
            .bind(update.id)
            .bind(update.stake)
            .bind(update.commissions)
            .bind(update.rewards)
            .execute(&mut *self.tx)
            .await?;
        }
        Ok(())
    }

    async fn update_namespaces(&mut self, updates: &[NamespaceUpdate]) -> Result<()> {
        for update in updates {
            sqlx::query(
                "UPDATE namespaces SET size = size + $2, pfb_count = pfb_count + $3 \
                 WHERE namespace_id = $1",
            )
            .bind(&update.namespace_id)
            .bind(update.size)
            .bind(update.pfb_count)
            .execute(&mut *self.tx)
            .await?;
        }
        Ok(())
    }

    async fn state(&mut self, name: &str) -> Result<Option<IndexerState>> {
        let row = sqlx::query("SELECT * FROM state WHERE name = $1")
            .bind(name)
            .fetch_optional(&mut *self.tx)
            .await?;
        row.map(state_from_row).transpose()
    }

    async fn update_state(&mut self, state: &IndexerState) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO state (name, last_height, last_hash, last_time, total_tx,
                total_accounts, total_namespaces, total_blobs_size, total_fee, total_supply)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (name)
            DO UPDATE SET
                last_height = EXCLUDED.last_height,
                last_hash = EXCLUDED.last_hash,
                last_time = EXCLUDED.last_time,
                total_tx = EXCLUDED.total_tx,
                total_accounts = EXCLUDED.total_accounts,
                total_namespaces = EXCLUDED.total_namespaces,
                total_blobs_size = EXCLUDED.total_blobs_size,
                total_fee = EXCLUDED.total_fee,
                total_supply = EXCLUDED.total_supply
            "#,
        )
        .bind(&state.name)
        .bind(state.last_height as i64)
        .bind(&state.last_hash)
        .bind(state.last_time)
        .bind(state.total_tx)
        .bind(state.total_accounts)
        .bind(state.total_namespaces)
        .bind(state.total_blobs_size)
        .bind(state.total_fee)
        .bind(state.total_supply)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn flush(self: Box<Self>) -> Result<()> {
        self.tx.commit().await.context("Failed to commit transaction")
    }

    async fn handle_error(self: Box<Self>) -> Result<()> {
        self.tx.rollback().await.context("Failed to abort transaction")
    }
}
