// (c) Meta Platforms, Inc. and affiliates. Confidential and proprietary.

use std::collections::HashMap;
use std::rc::Rc;
use std::time::Duration;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use anyhow::Context;
use anyhow::Result;
use aws_sdk_dynamodb::operation::transact_write_items::TransactWriteItemsError;
use aws_sdk_dynamodb::types::AttributeValue;
use aws_sdk_dynamodb::types::ConditionCheck;
use aws_sdk_dynamodb::types::KeySchemaElement;
use aws_sdk_dynamodb::types::KeyType;
use aws_sdk_dynamodb::types::ReturnValue;
use aws_sdk_dynamodb::types::TransactWriteItem;
use aws_sdk_dynamodb::types::Update;
use counterbench_api::CounterError;
use counterbench_api::CounterResult;
use counterbench_api::CounterSnapshot;
use counterbench_api::CounterStore;
use counterbench_api::Environment;
use counterbench_api::LockConfig;
use counterbench_api::LockToken;
use counterbench_api::StoreConnector;
use rand::Rng;
use tracing::debug;
use tracing::warn;

use crate::error::classify_cancellation;
use crate::error::condition_failed_at;
use crate::error::map_sdk_error;

const COUNTER_ID_COLUMN: &str = "counter_id";
const VAL_COLUMN: &str = "val";
const VERSION_COLUMN: &str = "version";
const OWNER_COLUMN: &str = "owner";
const LEASE_COLUMN: &str = "lease_expires_at";

/// Lock items live next to the counters. Counter ids cannot contain `#`.
const LOCK_SUFFIX: &str = "#lock";

/// The lock item still belongs to the token: same owner, same grant.
const LOCK_HELD_CONDITION: &str = "#owner = :owner AND #lease = :fencing";

/// Version condition for a write that expects `expected` to still be current. A
/// counter that was never written reads as version 0 without having the
/// attribute.
fn version_condition(expected: u64) -> &'static str {
    if expected == 0 {
        "attribute_not_exists(#version) OR #version = :expected"
    } else {
        "#version = :expected"
    }
}

fn number(value: impl ToString) -> AttributeValue {
    AttributeValue::N(value.to_string())
}

fn parse_number<T: std::str::FromStr>(
    item: &HashMap<String, AttributeValue>,
    column: &str,
) -> CounterResult<Option<T>> {
    let Some(attribute) = item.get(column) else {
        return Ok(None);
    };
    let raw = attribute.as_n().map_err(|_| {
        CounterError::PermanentFailure(format!("attribute {column} is not a number"))
    })?;
    raw.parse::<T>()
        .map(Some)
        .map_err(|_| CounterError::PermanentFailure(format!("attribute {column} is out of range: {raw}")))
}

fn snapshot_of(item: Option<&HashMap<String, AttributeValue>>) -> CounterResult<CounterSnapshot> {
    let Some(item) = item else {
        return Ok(CounterSnapshot::default());
    };
    Ok(CounterSnapshot {
        value: parse_number(item, VAL_COLUMN)?.unwrap_or(0),
        version: parse_number(item, VERSION_COLUMN)?.unwrap_or(0),
    })
}

fn epoch_millis() -> CounterResult<u64> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .map_err(|err| CounterError::PermanentFailure(format!("system clock before epoch: {err}")))
}

#[derive(Debug, Default)]
struct Transaction {
    observed_versions: HashMap<String, u64>,
    pending_writes: HashMap<String, i64>,
}

/// A `CounterStore` backed by a DynamoDB table keyed by `counter_id` (S, HASH).
///
/// - reads are strongly consistent
/// - in-place increments are `UpdateItem ADD`
/// - version checks are condition expressions
/// - locks are lease items written with a conditional put; writes under a lock
///   are transactions conditioned on the lock item still matching the token
/// - serializable transactions buffer their writes and commit them with one
///   `TransactWriteItems` conditioned on every version they read
pub struct DynamoCounterStore<E: Environment> {
    client: aws_sdk_dynamodb::Client,
    table_name: String,
    lock: LockConfig,
    env: Rc<E>,
    owner: u64,
    transaction: Option<Transaction>,
}

impl<E: Environment> DynamoCounterStore<E> {
    pub async fn new(
        client: aws_sdk_dynamodb::Client,
        table_name: String,
        lock: LockConfig,
        env: Rc<E>,
    ) -> Result<Self> {
        let output = client
            .describe_table()
            .table_name(&table_name)
            .send()
            .await
            .context("failed to describe table")?;

        let table = output.table.context("missing table description")?;
        let has_hash = table.key_schema().iter().any(|k: &KeySchemaElement| {
            k.attribute_name() == COUNTER_ID_COLUMN && k.key_type() == &KeyType::Hash
        });
        anyhow::ensure!(
            has_hash,
            "table '{}' must have partition key '{}' (S, HASH)",
            table_name,
            COUNTER_ID_COLUMN,
        );

        let owner = env.with_rng(|rng| rng.gen());
        Ok(Self {
            client,
            table_name,
            lock,
            env,
            owner,
            transaction: None,
        })
    }

    /// A new connection sharing the client, with its own lock owner id and no
    /// open transaction.
    pub fn handle(&self) -> Self {
        Self {
            client: self.client.clone(),
            table_name: self.table_name.clone(),
            lock: self.lock.clone(),
            env: self.env.clone(),
            owner: self.env.with_rng(|rng| rng.gen()),
            transaction: None,
        }
    }

    fn key(counter_id: &str) -> AttributeValue {
        AttributeValue::S(counter_id.to_string())
    }

    fn lock_key(counter_id: &str) -> AttributeValue {
        AttributeValue::S(format!("{counter_id}{LOCK_SUFFIX}"))
    }

    async fn read_committed(&self, counter_id: &str) -> CounterResult<CounterSnapshot> {
        let output = self
            .client
            .get_item()
            .table_name(&self.table_name)
            .key(COUNTER_ID_COLUMN, Self::key(counter_id))
            .consistent_read(true)
            .send()
            .await
            .map_err(map_sdk_error)?;
        snapshot_of(output.item())
    }

    async fn store(&self, counter_id: &str, value: i64) -> CounterResult<()> {
        self.client
            .update_item()
            .table_name(&self.table_name)
            .key(COUNTER_ID_COLUMN, Self::key(counter_id))
            .update_expression("SET #val = :val ADD #version :one")
            .expression_attribute_names("#val", VAL_COLUMN)
            .expression_attribute_names("#version", VERSION_COLUMN)
            .expression_attribute_values(":val", number(value))
            .expression_attribute_values(":one", number(1))
            .send()
            .await
            .map_err(map_sdk_error)?;
        Ok(())
    }

    /// One conditional put on the lock item. `Ok(None)` when someone else holds
    /// an unexpired lease.
    async fn try_lock(&self, counter_id: &str) -> CounterResult<Option<LockToken>> {
        let now = epoch_millis()?;
        let expires_at = now + self.lock.lease.as_millis() as u64;
        let result = self
            .client
            .put_item()
            .table_name(&self.table_name)
            .item(COUNTER_ID_COLUMN, Self::lock_key(counter_id))
            .item(OWNER_COLUMN, number(self.owner))
            .item(LEASE_COLUMN, number(expires_at))
            .condition_expression(format!(
                "attribute_not_exists({COUNTER_ID_COLUMN}) OR {LEASE_COLUMN} < :now"
            ))
            .expression_attribute_values(":now", number(now))
            .send()
            .await;
        match result {
            Ok(_) => Ok(Some(LockToken {
                counter_id: counter_id.to_string(),
                owner: self.owner,
                fencing: expires_at,
            })),
            Err(err) => {
                if err
                    .as_service_error()
                    .is_some_and(|service_err| service_err.is_conditional_check_failed_exception())
                {
                    Ok(None)
                } else {
                    Err(map_sdk_error(err))
                }
            }
        }
    }

    fn transaction_update(
        &self,
        counter_id: &str,
        value: i64,
        observed: Option<u64>,
    ) -> CounterResult<TransactWriteItem> {
        let mut update = Update::builder()
            .table_name(&self.table_name)
            .key(COUNTER_ID_COLUMN, Self::key(counter_id))
            .update_expression("SET #val = :val ADD #version :one")
            .expression_attribute_names("#val", VAL_COLUMN)
            .expression_attribute_names("#version", VERSION_COLUMN)
            .expression_attribute_values(":val", number(value))
            .expression_attribute_values(":one", number(1));
        if let Some(expected) = observed {
            update = update
                .condition_expression(version_condition(expected))
                .expression_attribute_values(":expected", number(expected));
        }
        let update = update
            .build()
            .map_err(|err| CounterError::PermanentFailure(err.to_string()))?;
        Ok(TransactWriteItem::builder().update(update).build())
    }
}

impl<E: Environment> CounterStore for DynamoCounterStore<E> {
    async fn read(&mut self, counter_id: &str) -> CounterResult<CounterSnapshot> {
        let committed = self.read_committed(counter_id).await?;
        let Some(tx) = self.transaction.as_mut() else {
            return Ok(committed);
        };
        let observed = *tx
            .observed_versions
            .entry(counter_id.to_string())
            .or_insert(committed.version);
        Ok(match tx.pending_writes.get(counter_id) {
            Some(value) => CounterSnapshot {
                value: *value,
                version: observed,
            },
            None => committed,
        })
    }

    async fn write_unconditional(&mut self, counter_id: &str, value: i64) -> CounterResult<()> {
        if let Some(tx) = self.transaction.as_mut() {
            tx.pending_writes.insert(counter_id.to_string(), value);
            return Ok(());
        }
        self.store(counter_id, value).await
    }

    async fn write_if_version_matches(
        &mut self,
        counter_id: &str,
        value: i64,
        expected_version: u64,
    ) -> CounterResult<bool> {
        let result = self
            .client
            .update_item()
            .table_name(&self.table_name)
            .key(COUNTER_ID_COLUMN, Self::key(counter_id))
            .update_expression("SET #val = :val ADD #version :one")
            .condition_expression(version_condition(expected_version))
            .expression_attribute_names("#val", VAL_COLUMN)
            .expression_attribute_names("#version", VERSION_COLUMN)
            .expression_attribute_values(":val", number(value))
            .expression_attribute_values(":one", number(1))
            .expression_attribute_values(":expected", number(expected_version))
            .send()
            .await;
        match result {
            Ok(_) => Ok(true),
            Err(err) => {
                if err
                    .as_service_error()
                    .is_some_and(|service_err| service_err.is_conditional_check_failed_exception())
                {
                    debug!(counter_id, expected_version, "version check failed");
                    Ok(false)
                } else {
                    Err(map_sdk_error(err))
                }
            }
        }
    }

    async fn increment_in_place(&mut self, counter_id: &str) -> CounterResult<i64> {
        let output = self
            .client
            .update_item()
            .table_name(&self.table_name)
            .key(COUNTER_ID_COLUMN, Self::key(counter_id))
            .update_expression("ADD #val :one, #version :one")
            .expression_attribute_names("#val", VAL_COLUMN)
            .expression_attribute_names("#version", VERSION_COLUMN)
            .expression_attribute_values(":one", number(1))
            .return_values(ReturnValue::UpdatedNew)
            .send()
            .await
            .map_err(map_sdk_error)?;
        output
            .attributes()
            .map(|attributes| parse_number::<i64>(attributes, VAL_COLUMN))
            .transpose()?
            .flatten()
            .ok_or_else(|| {
                CounterError::PermanentFailure(format!("increment of {counter_id} returned no value"))
            })
    }

    async fn lock(&mut self, counter_id: &str) -> CounterResult<LockToken> {
        self.lock.validate()?;
        let deadline = self.env.now() + self.lock.acquire_timeout;
        loop {
            if let Some(token) = self.try_lock(counter_id).await? {
                return Ok(token);
            }
            if self.env.now() >= deadline {
                return Err(CounterError::LockTimeout {
                    counter_id: counter_id.to_string(),
                    timeout: self.lock.acquire_timeout,
                });
            }
            self.env.sleep(self.lock.retry_interval).await;
        }
    }

    /// One transaction: a condition check that the lock item still carries
    /// this token's owner and lease, and the counter update.
    async fn write_locked(&mut self, token: &LockToken, value: i64) -> CounterResult<()> {
        let check = ConditionCheck::builder()
            .table_name(&self.table_name)
            .key(COUNTER_ID_COLUMN, Self::lock_key(&token.counter_id))
            .condition_expression(LOCK_HELD_CONDITION)
            .expression_attribute_names("#owner", OWNER_COLUMN)
            .expression_attribute_names("#lease", LEASE_COLUMN)
            .expression_attribute_values(":owner", number(token.owner))
            .expression_attribute_values(":fencing", number(token.fencing))
            .build()
            .map_err(|err| CounterError::PermanentFailure(err.to_string()))?;
        let result = self
            .client
            .transact_write_items()
            .transact_items(TransactWriteItem::builder().condition_check(check).build())
            .transact_items(self.transaction_update(&token.counter_id, value, None)?)
            .send()
            .await;
        let Err(err) = result else {
            return Ok(());
        };
        if let Some(TransactWriteItemsError::TransactionCanceledException(cancelled)) =
            err.as_service_error()
        {
            if condition_failed_at(cancelled, 0) {
                return Err(CounterError::LockLost {
                    counter_id: token.counter_id.clone(),
                    fencing: token.fencing,
                });
            }
            return Err(classify_cancellation(cancelled));
        }
        Err(map_sdk_error(err))
    }

    async fn unlock(&mut self, token: LockToken) -> CounterResult<()> {
        let result = self
            .client
            .delete_item()
            .table_name(&self.table_name)
            .key(COUNTER_ID_COLUMN, Self::lock_key(&token.counter_id))
            .condition_expression(LOCK_HELD_CONDITION)
            .expression_attribute_names("#owner", OWNER_COLUMN)
            .expression_attribute_names("#lease", LEASE_COLUMN)
            .expression_attribute_values(":owner", number(token.owner))
            .expression_attribute_values(":fencing", number(token.fencing))
            .send()
            .await;
        match result {
            Ok(_) => Ok(()),
            Err(err) => {
                if err
                    .as_service_error()
                    .is_some_and(|service_err| service_err.is_conditional_check_failed_exception())
                {
                    warn!(counter_id = %token.counter_id, owner = token.owner, "lock lease expired before release");
                    Ok(())
                } else {
                    Err(map_sdk_error(err))
                }
            }
        }
    }

    async fn begin_serializable(&mut self) -> CounterResult<()> {
        if self.transaction.is_some() {
            return Err(CounterError::PermanentFailure(
                "transaction already open".to_string(),
            ));
        }
        self.transaction = Some(Transaction::default());
        Ok(())
    }

    async fn commit(&mut self) -> CounterResult<()> {
        let tx = self.transaction.take().ok_or_else(|| {
            CounterError::PermanentFailure("no open transaction".to_string())
        })?;
        if tx.pending_writes.is_empty() {
            return Ok(());
        }
        let mut request = self.client.transact_write_items();
        for (counter_id, value) in &tx.pending_writes {
            let observed = tx.observed_versions.get(counter_id).copied();
            request = request.transact_items(self.transaction_update(counter_id, *value, observed)?);
        }
        let Err(err) = request.send().await else {
            return Ok(());
        };
        if let Some(TransactWriteItemsError::TransactionCanceledException(cancelled)) =
            err.as_service_error()
        {
            return Err(classify_cancellation(cancelled));
        }
        Err(map_sdk_error(err))
    }

    async fn rollback(&mut self) -> CounterResult<()> {
        self.transaction = None;
        Ok(())
    }

    async fn reset(&mut self, counter_id: &str) -> CounterResult<()> {
        self.store(counter_id, 0).await
    }
}

impl<E: Environment> StoreConnector for DynamoCounterStore<E> {
    type Store = DynamoCounterStore<E>;

    async fn connect(&self) -> CounterResult<Self::Store> {
        Ok(self.handle())
    }
}
