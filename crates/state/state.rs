use std::sync::Arc;

use bytes::Bytes;
use ethereum_types::{H256, U256};
use tabrex_common::constants::{
    contract_table_name, path_table_name, ACCOUNT_ALIVE, ACCOUNT_AUTHORITY, ACCOUNT_BALANCE,
    ACCOUNT_CODE, ACCOUNT_CODE_HASH, ACCOUNT_FIELDS, ACCOUNT_FROZEN, ACCOUNT_NONCE, STORAGE_KEY,
    STORAGE_VALUE,
};
use tabrex_common::{Address, Entry, TableSchema, VmKind};
use tabrex_crypto::keccak256;
use tabrex_storage::{SavepointId, StateStorage, StoreError};
use tracing::debug;

use crate::error::StateError;

/// Call-eligibility of an account, derived from its fixed rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContractStatus {
    NonExistent,
    Frozen,
    Killed,
    Available,
}

/// Account facade over a storage layer.
///
/// Addresses are identity strings: lowercase hex (no `0x`) in the native
/// space, absolute paths in the linear space. Integer rows are ASCII
/// decimal; code and hash rows are raw bytes. All rows live under the
/// single-value schema (`key` → `value`).
pub struct State {
    storage: Arc<StateStorage>,
    vm_kind: VmKind,
}

fn account_schema() -> TableSchema {
    TableSchema::new(STORAGE_KEY, &[STORAGE_VALUE])
}

impl State {
    pub fn new(storage: Arc<StateStorage>, vm_kind: VmKind) -> Self {
        Self { storage, vm_kind }
    }

    pub fn storage(&self) -> &Arc<StateStorage> {
        &self.storage
    }

    pub fn vm_kind(&self) -> VmKind {
        self.vm_kind
    }

    /// Table backing the account `address`.
    pub fn table_name(&self, address: &str) -> String {
        match self.vm_kind {
            VmKind::Native => {
                let raw = address.strip_prefix("0x").unwrap_or(address);
                match raw.parse::<Address>() {
                    Ok(addr) => contract_table_name(&addr),
                    // non-hex identities (registry-assigned ids) keep
                    // the prefix convention
                    Err(_) => format!("c_{raw}"),
                }
            }
            VmKind::Linear => path_table_name(address),
        }
    }

    async fn read_value(&self, address: &str, row: &str) -> Result<Option<Bytes>, StateError> {
        let table = self.table_name(address);
        match self.storage.get_row(&table, row).await {
            Ok(Some(entry)) => Ok(entry
                .get_field(STORAGE_VALUE)
                .map(Bytes::copy_from_slice)),
            Ok(None) => Ok(None),
            Err(StoreError::TableNotFound(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_value(
        &self,
        address: &str,
        row: &str,
        value: impl Into<Bytes>,
    ) -> Result<(), StateError> {
        let table = self.table_name(address);
        let mut entry = Entry::from_schema(&account_schema());
        entry.set_field(STORAGE_VALUE, value.into());
        match self.storage.set_row(&table, row, entry).await {
            Ok(()) => Ok(()),
            Err(StoreError::TableNotFound(_)) => {
                Err(StateError::AccountNonexistent(address.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn read_u256(&self, address: &str, row: &str) -> Result<U256, StateError> {
        match self.read_value(address, row).await? {
            Some(raw) if !raw.is_empty() => {
                let text =
                    std::str::from_utf8(&raw).map_err(|_| StateError::InvalidNumeric {
                        table: self.table_name(address),
                        row: row.to_string(),
                    })?;
                U256::from_dec_str(text).map_err(|_| StateError::InvalidNumeric {
                    table: self.table_name(address),
                    row: row.to_string(),
                })
            }
            _ => Ok(U256::zero()),
        }
    }

    async fn write_u256(&self, address: &str, row: &str, value: U256) -> Result<(), StateError> {
        self.write_value(address, row, value.to_string().into_bytes())
            .await
    }

    pub async fn address_in_use(&self, address: &str) -> Result<bool, StateError> {
        let table = self.table_name(address);
        Ok(self.storage.open_table(&table).await?.is_some())
    }

    /// Nonce > 0, balance > 0 or non-empty code, and still alive.
    pub async fn exists_and_nonempty(&self, address: &str) -> Result<bool, StateError> {
        if !self.address_in_use(address).await? {
            return Ok(false);
        }
        let alive = self.read_value(address, ACCOUNT_ALIVE).await?;
        if alive.as_deref() == Some(b"false".as_ref()) {
            return Ok(false);
        }
        let nonce = self.read_u256(address, ACCOUNT_NONCE).await?;
        let balance = self.read_u256(address, ACCOUNT_BALANCE).await?;
        let code = self.read_value(address, ACCOUNT_CODE).await?;
        Ok(!nonce.is_zero()
            || !balance.is_zero()
            || code.map(|c| !c.is_empty()).unwrap_or(false))
    }

    pub async fn has_code(&self, address: &str) -> Result<bool, StateError> {
        Ok(self
            .read_value(address, ACCOUNT_CODE)
            .await?
            .map(|c| !c.is_empty())
            .unwrap_or(false))
    }

    /// Balance of `address`; zero if the address was never used.
    pub async fn balance(&self, address: &str) -> Result<U256, StateError> {
        self.read_u256(address, ACCOUNT_BALANCE).await
    }

    /// Adds to the balance, initializing the account if it has never
    /// been used.
    pub async fn add_balance(&self, address: &str, amount: U256) -> Result<(), StateError> {
        if !self.address_in_use(address).await? {
            self.create_account(address, U256::zero(), amount).await?;
            return Ok(());
        }
        let balance = self.balance(address).await?;
        self.write_u256(address, ACCOUNT_BALANCE, balance + amount)
            .await
    }

    /// Fails with `NotEnoughCash` when the account is absent or the
    /// balance is below `amount`.
    pub async fn sub_balance(&self, address: &str, amount: U256) -> Result<(), StateError> {
        if !self.address_in_use(address).await? {
            return Err(StateError::NotEnoughCash {
                address: address.to_string(),
            });
        }
        let balance = self.balance(address).await?;
        if balance < amount {
            return Err(StateError::NotEnoughCash {
                address: address.to_string(),
            });
        }
        self.write_u256(address, ACCOUNT_BALANCE, balance - amount)
            .await
    }

    pub async fn set_balance(&self, address: &str, amount: U256) -> Result<(), StateError> {
        if !self.address_in_use(address).await? {
            self.create_account(address, U256::zero(), amount).await?;
            return Ok(());
        }
        self.write_u256(address, ACCOUNT_BALANCE, amount).await
    }

    /// Not atomic across the two accounts; callers bracket the pair with
    /// a savepoint.
    pub async fn transfer_balance(
        &self,
        from: &str,
        to: &str,
        amount: U256,
    ) -> Result<(), StateError> {
        self.sub_balance(from, amount).await?;
        self.add_balance(to, amount).await
    }

    /// A contract-defined storage slot; empty if never written.
    pub async fn storage_at(&self, address: &str, key: &str) -> Result<Bytes, StateError> {
        Ok(self
            .read_value(address, key)
            .await?
            .unwrap_or_default())
    }

    pub async fn set_storage(
        &self,
        address: &str,
        key: &str,
        value: impl Into<Bytes>,
    ) -> Result<(), StateError> {
        self.write_value(address, key, value).await
    }

    /// No-op by policy: per-slot tombstones would make the storage root
    /// depend on deletion order.
    pub fn clear_storage(&self, _address: &str) {}

    pub async fn set_code(&self, address: &str, code: impl Into<Bytes>) -> Result<(), StateError> {
        let code = code.into();
        let hash = keccak256(&code);
        self.write_value(address, ACCOUNT_CODE, code).await?;
        self.write_value(address, ACCOUNT_CODE_HASH, hash.to_vec())
            .await
    }

    pub async fn code(&self, address: &str) -> Result<Option<Bytes>, StateError> {
        self.read_value(address, ACCOUNT_CODE).await
    }

    /// Code hash; the hash of empty input for never-used accounts.
    pub async fn code_hash(&self, address: &str) -> Result<H256, StateError> {
        match self.read_value(address, ACCOUNT_CODE_HASH).await? {
            Some(raw) if raw.len() == 32 => Ok(H256::from_slice(&raw)),
            _ => Ok(H256(keccak256(b""))),
        }
    }

    pub async fn code_size(&self, address: &str) -> Result<usize, StateError> {
        Ok(self
            .read_value(address, ACCOUNT_CODE)
            .await?
            .map(|c| c.len())
            .unwrap_or(0))
    }

    pub async fn frozen(&self, address: &str) -> Result<bool, StateError> {
        Ok(self.read_value(address, ACCOUNT_FROZEN).await?.as_deref()
            == Some(b"true".as_ref()))
    }

    pub async fn alive(&self, address: &str) -> Result<bool, StateError> {
        Ok(self.read_value(address, ACCOUNT_ALIVE).await?.as_deref()
            != Some(b"false".as_ref()))
    }

    /// Gate used before dispatching a call into an account: frozen and
    /// killed accounts no longer accept calls.
    pub async fn contract_status(&self, address: &str) -> Result<ContractStatus, StateError> {
        if !self.address_in_use(address).await? {
            return Ok(ContractStatus::NonExistent);
        }
        if self.frozen(address).await? {
            return Ok(ContractStatus::Frozen);
        }
        if !self.alive(address).await? {
            return Ok(ContractStatus::Killed);
        }
        Ok(ContractStatus::Available)
    }

    pub async fn get_nonce(&self, address: &str) -> Result<U256, StateError> {
        self.read_u256(address, ACCOUNT_NONCE).await
    }

    pub async fn inc_nonce(&self, address: &str) -> Result<(), StateError> {
        let nonce = self.get_nonce(address).await?;
        self.set_nonce(address, nonce + U256::one()).await
    }

    pub async fn set_nonce(&self, address: &str, nonce: U256) -> Result<(), StateError> {
        if !self.address_in_use(address).await? {
            self.create_account(address, nonce, U256::zero()).await?;
            return Ok(());
        }
        self.write_u256(address, ACCOUNT_NONCE, nonce).await
    }

    /// Processes a self-destruct: the table stays, the account does not.
    pub async fn kill(&self, address: &str) -> Result<(), StateError> {
        if !self.address_in_use(address).await? {
            return Ok(());
        }
        self.write_value(address, ACCOUNT_CODE, Bytes::new()).await?;
        self.write_value(address, ACCOUNT_CODE_HASH, keccak256(b"").to_vec())
            .await?;
        self.write_u256(address, ACCOUNT_BALANCE, U256::zero())
            .await?;
        self.write_value(address, ACCOUNT_ALIVE, &b"false"[..])
            .await?;
        debug!(address, "account killed");
        Ok(())
    }

    /// Initializes every fixed row of the account layout.
    pub async fn create_account(
        &self,
        address: &str,
        nonce: U256,
        amount: U256,
    ) -> Result<(), StateError> {
        let table = self.table_name(address);
        match self.storage.create_table(&table, account_schema()).await {
            Ok(()) => {}
            Err(StoreError::TableExists(_)) => {}
            Err(e) => return Err(e.into()),
        }
        for row in ACCOUNT_FIELDS {
            let value: Bytes = match row {
                ACCOUNT_BALANCE => amount.to_string().into_bytes().into(),
                ACCOUNT_CODE_HASH => keccak256(b"").to_vec().into(),
                ACCOUNT_CODE => Bytes::new(),
                ACCOUNT_NONCE => nonce.to_string().into_bytes().into(),
                ACCOUNT_ALIVE => Bytes::from_static(b"true"),
                _ => Bytes::from_static(b"false"),
            };
            self.write_value(address, row, value).await?;
        }
        debug!(address, %table, "account created");
        Ok(())
    }

    /// Digest over the dirty rows of the underlying layer.
    pub fn root_hash(&self) -> H256 {
        self.storage.hash()
    }

    pub fn savepoint(&self) -> SavepointId {
        self.storage.savepoint()
    }

    pub fn rollback(&self, savepoint: SavepointId) -> Result<(), StateError> {
        self.storage.rollback(savepoint)?;
        Ok(())
    }

    /// True when `origin` may mutate the account owned by `address`.
    ///
    /// The `authority` row holds a comma-separated allow list; an absent
    /// or empty row means unrestricted. A `true` return always means
    /// "authorized".
    pub async fn check_authority(&self, origin: &str, address: &str) -> Result<bool, StateError> {
        match self.read_value(address, ACCOUNT_AUTHORITY).await? {
            None => Ok(true),
            Some(raw) if raw.is_empty() => Ok(true),
            Some(raw) => {
                let allowed = std::str::from_utf8(&raw).unwrap_or("");
                Ok(allowed.split(',').any(|entry| entry.trim() == origin))
            }
        }
    }
}
