use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io;
use std::path::Path;
use thiserror::Error;

use crate::amount::AmountError;
use crate::request::{CreditRequest, DebitRequest, IdempotencyKey};
use crate::{Amount, LedgerError, OwnerId, Request, WalletBalance};

/// Errors that can occur when parsing csv rows
#[derive(Debug, Error)]
pub enum CsvError {
    #[error("failed to open {path}: {source}")]
    Open { path: String, source: csv::Error },

    #[error("line {line}: failed to parse row: {source}")]
    Parse { line: usize, source: csv::Error },

    #[error("line {line}: unrecognized transaction type '{tx_type}'")]
    UnrecognizedType { line: usize, tx_type: String },

    #[error("line {line}: {tx_type} missing {field}")]
    MissingField {
        line: usize,
        tx_type: String,
        field: &'static str,
    },

    #[error("line {line}: {source}")]
    InvalidAmount { line: usize, source: AmountError },

    #[error("line {line}: {source}")]
    Invalid { line: usize, source: LedgerError },
}

#[derive(Debug, Deserialize)]
struct InputRow {
    r#type: String,
    owner: OwnerId,
    asset: String,
    amount: Option<String>,
    key: Option<String>,
    note: Option<String>,
}

#[derive(Debug, Serialize)]
struct OutputRow<'a> {
    owner: OwnerId,
    asset: &'a str,
    balance: String,
    version: u64,
    audited: bool,
}

/// Read requests from a csv file with the header `type,owner,asset,amount,key,note`.
///
/// `decimals` maps asset codes to their precision; amounts of unknown assets
/// are parsed as whole units.
pub fn read_requests(
    path: impl AsRef<Path>,
    decimals: HashMap<String, u8>,
) -> Result<impl Iterator<Item = Result<Request, CsvError>>, CsvError> {
    let path = path.as_ref();
    let reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_path(path)
        .map_err(|source| CsvError::Open {
            path: path.display().to_string(),
            source,
        })?;

    Ok(reader
        .into_deserialize::<InputRow>()
        .enumerate()
        .map(move |(idx, result)| {
            let line = idx + 2; // 1-indexed, skip header
            let row = result.map_err(|source| CsvError::Parse { line, source })?;
            parse_row(line, row, &decimals)
        }))
}

fn parse_row(
    line: usize,
    row: InputRow,
    decimals: &HashMap<String, u8>,
) -> Result<Request, CsvError> {
    let tx_type = row.r#type.to_ascii_lowercase();
    let asset = row.asset.to_ascii_uppercase();
    let places = decimals.get(&asset).copied().unwrap_or(0);

    let missing = |field: &'static str| CsvError::MissingField {
        line,
        tx_type: tx_type.clone(),
        field,
    };
    let invalid = |source: LedgerError| CsvError::Invalid { line, source };
    let parse_amount = |value: &str| {
        Amount::parse(value, places).map_err(|source| CsvError::InvalidAmount { line, source })
    };
    let non_empty = |value: Option<String>| value.filter(|v| !v.is_empty());

    let amount = non_empty(row.amount);
    let key = non_empty(row.key);
    let note = non_empty(row.note);

    match tx_type.as_str() {
        "open" => {
            let opening = match amount {
                Some(value) => parse_amount(&value)?,
                None => Amount::ZERO,
            };
            Request::open(row.owner, &asset, opening).map_err(invalid)
        }
        "topup" => {
            let amount = parse_amount(&amount.ok_or_else(|| missing("amount"))?)?;
            let key = IdempotencyKey::new(key.ok_or_else(|| missing("key"))?).map_err(invalid)?;
            let order_id = note.ok_or_else(|| missing("order id"))?;
            CreditRequest::top_up(row.owner, &asset, amount, key, order_id)
                .map(Request::Credit)
                .map_err(invalid)
        }
        "bonus" => {
            let amount = parse_amount(&amount.ok_or_else(|| missing("amount"))?)?;
            let key = IdempotencyKey::new(key.ok_or_else(|| missing("key"))?).map_err(invalid)?;
            CreditRequest::bonus(row.owner, &asset, amount, key, note)
                .map(Request::Credit)
                .map_err(invalid)
        }
        "purchase" => {
            let amount = parse_amount(&amount.ok_or_else(|| missing("amount"))?)?;
            let key = IdempotencyKey::new(key.ok_or_else(|| missing("key"))?).map_err(invalid)?;
            let item = note.ok_or_else(|| missing("item"))?;
            DebitRequest::purchase(row.owner, &asset, amount, key, item)
                .map(Request::Debit)
                .map_err(invalid)
        }
        _ => Err(CsvError::UnrecognizedType {
            line,
            tx_type: row.r#type,
        }),
    }
}

/// Write wallet balances and their audit verdict in csv format
pub fn write_balances<'a>(
    writer: impl io::Write,
    balances: impl IntoIterator<Item = (&'a WalletBalance, bool)>,
) -> Result<(), csv::Error> {
    let mut writer = csv::Writer::from_writer(writer);

    for (balance, audited) in balances {
        writer.serialize(OutputRow {
            owner: balance.owner,
            asset: &balance.asset_code,
            balance: balance.balance.scaled(balance.decimals).to_string(),
            version: balance.version,
            audited,
        })?;
    }

    writer.flush()?;
    Ok(())
}
