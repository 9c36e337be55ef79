use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use ethereum_types::U256;
use tabrex_common::{CallResult, Comparator, Condition, Entry, KeyCondition, TableSchema};
use tracing::debug;

use crate::codec::{Codec, Value};
use crate::condition::ConditionPrecompiled;
use crate::entries::EntriesPrecompiled;
use crate::entry::EntryPrecompiled;
use crate::error::{codes, PrecompiledError};
use crate::gas::{GasPricer, InterfaceOpcode};
use crate::registry::{Precompiled, PrecompiledContext, PrecompiledObject};
use crate::utils::{field_length_ok, func_selector, key_length_ok, split_param};

/// CRUD service bound to one table at registration time.
pub struct TablePrecompiled {
    table: String,
    schema: TableSchema,
    /// Identity whose `authority` row gates mutations; `None` means
    /// unrestricted.
    authority_of: Option<String>,
}

/// Key-field clauses split out of a condition: EQ literals become
/// direct candidates, the rest filter the key scan.
struct KeySplit {
    eq_keys: Vec<String>,
    key_condition: KeyCondition,
    found_key_clause: bool,
}

impl TablePrecompiled {
    pub fn new(table: impl Into<String>, schema: TableSchema) -> Self {
        Self {
            table: table.into(),
            schema,
            authority_of: None,
        }
    }

    pub fn with_authority(mut self, identity: impl Into<String>) -> Self {
        self.authority_of = Some(identity.into());
        self
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    fn split_key_condition(&self, condition: &Condition) -> KeySplit {
        let mut split = KeySplit {
            eq_keys: Vec::new(),
            key_condition: KeyCondition::new(),
            found_key_clause: false,
        };
        for triple in &condition.triples {
            if triple.field != self.schema.key_field {
                continue;
            }
            split.found_key_clause = true;
            match triple.cmp {
                Comparator::Eq => split.eq_keys.push(triple.value.clone()),
                cmp => split.key_condition.push(cmp, triple.value.clone()),
            }
        }
        // the result window is applied after filtering, not to the scan,
        // so EQ-literal candidates are never windowed away early
        split
    }

    /// Candidate keys: the scan filtered by the key condition, unioned
    /// with the EQ literals, ascending.
    async fn candidate_keys(
        &self,
        ctx: &PrecompiledContext,
        split: &KeySplit,
    ) -> Result<Vec<String>, PrecompiledError> {
        let scanned = ctx
            .storage
            .get_primary_keys(&self.table, Some(&split.key_condition))
            .await?;
        let mut keys: BTreeSet<String> = scanned.into_iter().collect();
        keys.extend(split.eq_keys.iter().cloned());
        Ok(keys.into_iter().collect())
    }

    async fn check_authority(
        &self,
        ctx: &PrecompiledContext,
        origin: &str,
    ) -> Result<(), PrecompiledError> {
        let Some(identity) = &self.authority_of else {
            return Ok(());
        };
        if ctx.state.check_authority(origin, identity).await? {
            Ok(())
        } else {
            Err(PrecompiledError::PermissionDenied {
                origin: origin.to_string(),
                target: self.table.clone(),
            })
        }
    }

    /// Entry fields must be known to the schema; the original left this
    /// case undefined and is pinned down here as a parse failure.
    fn unknown_field(&self, entry: &Entry) -> Option<String> {
        entry
            .fields()
            .map(|(field, _)| field)
            .find(|&field| field != self.schema.key_field && !self.schema.has_field(field))
            .map(|field| field.to_string())
    }

    async fn do_select(
        &self,
        ctx: &PrecompiledContext,
        codec: &Codec,
        condition: &Condition,
        pricer: &mut GasPricer,
    ) -> Result<Vec<u8>, PrecompiledError> {
        let split = self.split_key_condition(condition);
        let mut selected = Vec::new();

        if split.found_key_clause {
            let keys = self.candidate_keys(ctx, &split).await?;
            let rows = ctx.storage.get_rows(&self.table, &keys).await?;
            for row in rows.into_iter().flatten() {
                if condition.filter(Some(&row)) {
                    selected.push(row);
                }
            }
            if let Some((offset, count)) = condition.limit {
                selected = selected.into_iter().skip(offset).take(count).collect();
            }
        } else {
            debug!(table = %self.table, "select without a key clause returns empty");
        }

        let capacity: usize = selected.iter().map(Entry::capacity_of_hash_field).sum();
        pricer.update_mem_used(capacity);
        pricer.append_operation(InterfaceOpcode::Select, selected.len() as u64);

        let id = ctx.registry.register(PrecompiledObject::Entries(Arc::new(
            EntriesPrecompiled::new(self.schema.clone(), selected),
        )));
        codec.encode_identity(&id)
    }

    async fn do_insert(
        &self,
        ctx: &PrecompiledContext,
        codec: &Codec,
        entry: Entry,
        origin: &str,
        pricer: &mut GasPricer,
    ) -> Result<(Vec<u8>, i32), PrecompiledError> {
        if let Some(field) = self.unknown_field(&entry) {
            debug!(table = %self.table, %field, "insert with field unknown to schema");
            return Ok(status_output(codec, codes::PARSE_ENTRY));
        }
        for (field, value) in entry.fields() {
            if !field_length_ok(value) {
                debug!(table = %self.table, %field, "field value over budget");
                return Ok(status_output(codec, codes::TABLE_KEY_VALUE_LENGTH_OVERFLOW));
            }
        }

        let key = match entry.get_field(&self.schema.key_field) {
            Some(key) if !key.is_empty() => match std::str::from_utf8(key) {
                Ok(key) => key.to_string(),
                Err(_) => return Ok(status_output(codec, codes::KEY_NOT_IN_ENTRY)),
            },
            _ => {
                debug!(
                    table = %self.table,
                    key_field = %self.schema.key_field,
                    "insert entry does not bind the key field"
                );
                return Ok(status_output(codec, codes::KEY_NOT_IN_ENTRY));
            }
        };
        if !key_length_ok(key.as_bytes()) {
            return Ok(status_output(codec, codes::TABLE_KEY_VALUE_LENGTH_OVERFLOW));
        }

        self.check_authority(ctx, origin).await?;

        if ctx.storage.get_row(&self.table, &key).await?.is_some() {
            debug!(table = %self.table, %key, "insert on existing key");
            return Ok(status_output(codec, codes::INSERT_KEY_EXISTS));
        }

        // missing schema fields default to empty
        let mut row = Entry::from_schema(&self.schema);
        for (field, value) in entry.fields() {
            if field != self.schema.key_field {
                row.set_field(field.to_string(), value.to_vec());
            }
        }
        row.set_field(
            self.schema.key_field.clone(),
            key.clone().into_bytes(),
        );

        pricer.append_operation(InterfaceOpcode::Insert, 1);
        pricer.update_mem_used(row.capacity_of_hash_field());
        ctx.storage.set_row(&self.table, &key, row).await?;

        Ok((codec.encode(&[Value::Uint(U256::one())]), codes::SUCCESS))
    }

    async fn do_update(
        &self,
        ctx: &PrecompiledContext,
        codec: &Codec,
        entry: Entry,
        condition: &Condition,
        origin: &str,
        pricer: &mut GasPricer,
    ) -> Result<(Vec<u8>, i32), PrecompiledError> {
        let split = self.split_key_condition(condition);
        if !split.found_key_clause {
            return Ok(status_output(codec, codes::KEY_NOT_IN_COND));
        }
        if let Some(field) = self.unknown_field(&entry) {
            debug!(table = %self.table, %field, "update with field unknown to schema");
            return Ok(status_output(codec, codes::PARSE_ENTRY));
        }
        for (field, value) in entry.fields() {
            if !field_length_ok(value) {
                debug!(table = %self.table, %field, "field value over budget");
                return Ok(status_output(codec, codes::TABLE_KEY_VALUE_LENGTH_OVERFLOW));
            }
        }

        self.check_authority(ctx, origin).await?;

        for key in &split.eq_keys {
            if ctx.storage.get_row(&self.table, key).await?.is_none() {
                debug!(table = %self.table, %key, "update on missing key");
                return Ok(status_output(codec, codes::UPDATE_KEY_NOT_EXIST));
            }
        }

        let keys = self.candidate_keys(ctx, &split).await?;
        let mut updated = 0u64;
        for key in keys {
            let Some(row) = ctx.storage.get_row(&self.table, &key).await? else {
                continue;
            };
            if !condition.filter(Some(&row)) {
                continue;
            }
            // apply only the fields the entry binds; the key is immutable
            let mut next = row;
            for (field, value) in entry.fields() {
                if field != self.schema.key_field {
                    next.set_field(field.to_string(), value.to_vec());
                }
            }
            ctx.storage.set_row(&self.table, &key, next).await?;
            updated += 1;
        }

        pricer.set_mem_used(entry.capacity_of_hash_field());
        pricer.append_operation(InterfaceOpcode::Update, updated);
        Ok((
            codec.encode(&[Value::Uint(U256::from(updated))]),
            codes::SUCCESS,
        ))
    }

    async fn do_remove(
        &self,
        ctx: &PrecompiledContext,
        codec: &Codec,
        condition: &Condition,
        origin: &str,
        pricer: &mut GasPricer,
    ) -> Result<(Vec<u8>, i32), PrecompiledError> {
        let split = self.split_key_condition(condition);
        if !split.found_key_clause {
            return Ok(status_output(codec, codes::KEY_NOT_IN_COND));
        }

        self.check_authority(ctx, origin).await?;

        let keys = self.candidate_keys(ctx, &split).await?;
        let mut removed = 0u64;
        for key in keys {
            let row = ctx.storage.get_row(&self.table, &key).await?;
            if condition.filter(row.as_ref()) {
                ctx.storage
                    .set_row(&self.table, &key, Entry::deleted())
                    .await?;
                removed += 1;
            }
        }

        pricer.append_operation(InterfaceOpcode::Remove, removed.max(1));
        Ok((
            codec.encode(&[Value::Uint(U256::from(removed))]),
            codes::SUCCESS,
        ))
    }

    fn resolve_condition(
        ctx: &PrecompiledContext,
        codec: &Codec,
        value: &Value,
    ) -> Result<Condition, PrecompiledError> {
        let id = codec.decode_identity(value)?;
        let object = ctx.registry.require(&id)?;
        Ok(object.expect_condition(&id)?.snapshot())
    }

    fn resolve_entry(
        ctx: &PrecompiledContext,
        codec: &Codec,
        value: &Value,
    ) -> Result<Entry, PrecompiledError> {
        let id = codec.decode_identity(value)?;
        let object = ctx.registry.require(&id)?;
        Ok(object.expect_entry(&id)?.snapshot())
    }
}

fn status_output(codec: &Codec, code: i32) -> (Vec<u8>, i32) {
    let word = if code < 0 {
        let magnitude = U256::from((-(code as i64)) as u64);
        (!magnitude).overflowing_add(U256::one()).0
    } else {
        U256::from(code as u32 as u64)
    };
    (codec.encode(&[Value::Int(word)]), code)
}

#[async_trait]
impl Precompiled for TablePrecompiled {
    async fn call(
        &self,
        ctx: &PrecompiledContext,
        param: &[u8],
        origin: &str,
        _sender: &str,
        _gas_left: i64,
    ) -> Result<CallResult, PrecompiledError> {
        let (selector, data) = split_param(param)?;
        let codec = ctx.codec();
        let identity = codec.identity_type();
        let mut pricer = GasPricer::new();
        pricer.set_mem_used(param.len());

        let (output, status) = if selector == func_selector("select(address)")
            || selector == func_selector("select(string)")
        {
            let args = codec.decode(data, &[identity])?;
            let condition = Self::resolve_condition(ctx, &codec, &args[0])?;
            let output = self.do_select(ctx, &codec, &condition, &mut pricer).await?;
            (output, codes::SUCCESS)
        } else if selector == func_selector("insert(address)")
            || selector == func_selector("insert(string)")
        {
            let args = codec.decode(data, &[identity])?;
            let entry = Self::resolve_entry(ctx, &codec, &args[0])?;
            self.do_insert(ctx, &codec, entry, origin, &mut pricer)
                .await?
        } else if selector == func_selector("update(address,address)")
            || selector == func_selector("update(string,string)")
        {
            let args = codec.decode(data, &[identity, identity])?;
            let entry = Self::resolve_entry(ctx, &codec, &args[0])?;
            let condition = Self::resolve_condition(ctx, &codec, &args[1])?;
            self.do_update(ctx, &codec, entry, &condition, origin, &mut pricer)
                .await?
        } else if selector == func_selector("remove(address)")
            || selector == func_selector("remove(string)")
        {
            let args = codec.decode(data, &[identity])?;
            let condition = Self::resolve_condition(ctx, &codec, &args[0])?;
            self.do_remove(ctx, &codec, &condition, origin, &mut pricer)
                .await?
        } else if selector == func_selector("newCondition()") {
            let id = ctx
                .registry
                .register(PrecompiledObject::Condition(Arc::new(
                    ConditionPrecompiled::new(Condition::new()),
                )));
            (codec.encode_identity(&id)?, codes::SUCCESS)
        } else if selector == func_selector("newEntry()") {
            let id = ctx.registry.register(PrecompiledObject::Entry(Arc::new(
                EntryPrecompiled::empty(self.schema.clone()),
            )));
            (codec.encode_identity(&id)?, codes::SUCCESS)
        } else {
            return Err(PrecompiledError::UnknownFunction {
                target: format!("Table({})", self.table),
                selector,
            });
        };

        pricer.update_mem_used(output.len());
        Ok(CallResult {
            output: output.into(),
            status,
            gas_used: pricer.total_gas(),
        })
    }
}
