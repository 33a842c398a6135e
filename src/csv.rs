use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io;
use std::path::Path;
use thiserror::Error;

use crate::model::{AccountIdError, BalanceSnapshot, Operation, parse_account_id};
use crate::{AccountId, Points};

/// Errors that can occur when reading or writing csv rows
#[derive(Debug, Error)]
pub enum CsvError {
    #[error("failed to open operations file: {0}")]
    Open(#[source] csv::Error),

    #[error("line {line}: failed to parse row: {source}")]
    Parse { line: usize, source: csv::Error },

    #[error("line {line}: unrecognized operation type '{op_type}'")]
    UnrecognizedType { line: usize, op_type: String },

    #[error("line {line}: {op_type} missing amount")]
    MissingAmount { line: usize, op_type: String },

    #[error("line {line}: {source}")]
    InvalidAccount {
        line: usize,
        source: AccountIdError,
    },

    #[error("failed to write balances: {0}")]
    Write(#[from] csv::Error),

    #[error("failed to flush balances: {0}")]
    Flush(#[from] io::Error),
}

#[derive(Debug, Deserialize)]
struct InputRow {
    r#type: String,
    account: String,
    amount: Option<i64>,
}

#[derive(Debug, Serialize)]
struct OutputRow {
    account: AccountId,
    balance: Points,
}

/// Read operations from a csv file with a `type,account,amount` header.
pub fn read_operations(
    path: &Path,
) -> Result<impl Iterator<Item = Result<Operation, CsvError>> + Send + use<>, CsvError> {
    let reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(CsvError::Open)?;

    Ok(parse_rows(reader))
}

fn parse_rows(
    reader: csv::Reader<File>,
) -> impl Iterator<Item = Result<Operation, CsvError>> + Send {
    reader
        .into_deserialize::<InputRow>()
        .enumerate()
        .map(|(idx, result)| {
            let line = idx + 2; // 1-indexed, skip header
            let row = result.map_err(|source| CsvError::Parse { line, source })?;

            let account = parse_account_id(&row.account)
                .map_err(|source| CsvError::InvalidAccount { line, source })?;
            let missing = |op_type: &str| CsvError::MissingAmount {
                line,
                op_type: op_type.to_string(),
            };

            match row.r#type.as_str() {
                "charge" => Ok(Operation::Charge {
                    account,
                    amount: row.amount.map(Points::new).ok_or_else(|| missing("charge"))?,
                }),
                "use" => Ok(Operation::Use {
                    account,
                    amount: row.amount.map(Points::new).ok_or_else(|| missing("use"))?,
                }),
                other => Err(CsvError::UnrecognizedType {
                    line,
                    op_type: other.to_string(),
                }),
            }
        })
}

/// Write account balances in csv format
pub fn write_balances(
    snapshots: impl IntoIterator<Item = BalanceSnapshot>,
    out: impl io::Write,
) -> Result<(), CsvError> {
    let mut writer = csv::Writer::from_writer(out);

    for snapshot in snapshots {
        writer.serialize(OutputRow {
            account: snapshot.account,
            balance: snapshot.balance,
        })?;
    }

    writer.flush()?;
    Ok(())
}
