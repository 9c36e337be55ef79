use tabrex_storage::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("not enough cash: {address}")]
    NotEnoughCash { address: String },
    #[error("account does not exist: {0}")]
    AccountNonexistent(String),
    #[error("corrupt numeric row {row} of {table}")]
    InvalidNumeric { table: String, row: String },
    #[error("storage error: {0}")]
    Store(#[from] StoreError),
}
