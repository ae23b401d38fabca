use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;

use crate::amount::AmountError;
use crate::engine::Account;
use crate::{Amount, ClientId, Transaction, TxId};

/// Errors that can occur when reading or writing csv
#[derive(Debug, Error)]
pub enum CsvError {
    #[error("failed to open '{}': {source}", .path.display())]
    Open { path: PathBuf, source: csv::Error },

    #[error("line {line}: failed to parse row: {source}")]
    Parse { line: usize, source: csv::Error },

    #[error("line {line}: unrecognized transaction type '{tx_type}'")]
    UnrecognizedType { line: usize, tx_type: String },

    #[error("line {line}: {tx_type} missing amount")]
    MissingAmount { line: usize, tx_type: &'static str },

    #[error("line {line}: {tx_type} has invalid amount: {source}")]
    InvalidAmount {
        line: usize,
        tx_type: &'static str,
        source: AmountError,
    },

    #[error("failed to write accounts: {0}")]
    Write(#[from] csv::Error),
}

#[derive(Debug, Deserialize)]
struct InputRow {
    r#type: String,
    client: ClientId,
    tx: TxId,
    #[serde(default)]
    amount: Option<String>,
}

impl InputRow {
    fn parse_amount(&self, line: usize, tx_type: &'static str) -> Result<Amount, CsvError> {
        let raw = self
            .amount
            .as_deref()
            .filter(|s| !s.is_empty())
            .ok_or(CsvError::MissingAmount { line, tx_type })?;
        raw.parse().map_err(|source| CsvError::InvalidAmount {
            line,
            tx_type,
            source,
        })
    }

    fn into_transaction(self, line: usize) -> Result<Transaction, CsvError> {
        let (client, tx) = (self.client, self.tx);
        match self.r#type.as_str() {
            "deposit" => Ok(Transaction::Deposit {
                client,
                tx,
                amount: self.parse_amount(line, "deposit")?,
            }),
            "withdrawal" => Ok(Transaction::Withdrawal {
                client,
                tx,
                amount: self.parse_amount(line, "withdrawal")?,
            }),
            "dispute" => Ok(Transaction::Dispute { client, tx }),
            "resolve" => Ok(Transaction::Resolve { client, tx }),
            "chargeback" => Ok(Transaction::Chargeback { client, tx }),
            other => Err(CsvError::UnrecognizedType {
                line,
                tx_type: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Serialize)]
struct OutputRow {
    client: ClientId,
    available: String,
    held: String,
    total: String,
    locked: bool,
}

impl From<&Account> for OutputRow {
    fn from(account: &Account) -> Self {
        Self {
            client: account.client(),
            available: account.available.to_string(),
            held: account.held.to_string(),
            total: account.total().to_string(),
            locked: account.locked,
        }
    }
}

/// Open a csv file of transactions
///
/// The file is opened eagerly, so the returned rows do not borrow `path`.
pub fn open_transactions(
    path: &Path,
) -> Result<impl Iterator<Item = Result<Transaction, CsvError>> + use<>, CsvError> {
    let file = File::open(path).map_err(|e| CsvError::Open {
        path: path.to_path_buf(),
        source: e.into(),
    })?;
    Ok(read_transactions(io::BufReader::new(file)))
}

/// Where non-empty lines start in the raw input, so rows are reported by
/// their physical line even though the csv reader skips blank lines.
#[derive(Debug)]
struct LineIndex {
    offset: u64,
    line: u64,
    at_line_start: bool,
    /// (byte offset, line) of every non-empty line not yet claimed by a row
    starts: VecDeque<(u64, u64)>,
}

impl LineIndex {
    fn new() -> Self {
        Self {
            offset: 0,
            line: 1,
            at_line_start: true,
            starts: VecDeque::new(),
        }
    }

    fn scan(&mut self, bytes: &[u8]) {
        for &b in bytes {
            let terminator = b == b'\n' || b == b'\r';
            if self.at_line_start && !terminator {
                self.starts.push_back((self.offset, self.line));
            }
            self.at_line_start = terminator;
            self.line += u64::from(b == b'\n');
            self.offset += 1;
        }
    }

    /// Line of the first non-empty line at or after byte `start`.
    fn line_at(&mut self, start: u64) -> usize {
        while let Some(&(offset, line)) = self.starts.front() {
            if offset >= start {
                return line as usize;
            }
            self.starts.pop_front();
        }
        self.line as usize
    }
}

/// Feeds every byte read through a [`LineIndex`].
struct Indexed<R> {
    inner: R,
    index: Arc<Mutex<LineIndex>>,
}

impl<R: io::Read> io::Read for Indexed<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        lock(&self.index).scan(&buf[..n]);
        Ok(n)
    }
}

fn lock(index: &Mutex<LineIndex>) -> MutexGuard<'_, LineIndex> {
    index.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Read transactions from csv, one result per row.
///
/// Rows that are malformed come back as errors; they never end the iteration.
/// Only an I/O failure of the underlying reader does.
pub fn read_transactions<R: io::Read>(
    reader: R,
) -> impl Iterator<Item = Result<Transaction, CsvError>> {
    let index = Arc::new(Mutex::new(LineIndex::new()));
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(Indexed {
            inner: reader,
            index: Arc::clone(&index),
        });
    let mut headers: Option<csv::StringRecord> = None;
    let mut record = csv::StringRecord::new();
    let mut done = false;

    std::iter::from_fn(move || {
        if done {
            return None;
        }
        if headers.is_none() {
            match reader.headers() {
                Ok(h) => headers = Some(h.clone()),
                Err(source) => {
                    done = true;
                    return Some(Err(CsvError::Parse { line: 1, source }));
                }
            }
        }

        match reader.read_record(&mut record) {
            Ok(false) => None,
            Ok(true) => {
                let start = record.position().map_or(0, |p| p.byte());
                let line = lock(&index).line_at(start);
                let row = record
                    .deserialize::<InputRow>(headers.as_ref())
                    .map_err(|source| CsvError::Parse { line, source });
                Some(row.and_then(|row| row.into_transaction(line)))
            }
            Err(source) => {
                done = source.is_io_error();
                let start = source.position().map_or(0, |p| p.byte());
                let line = lock(&index).line_at(start);
                Some(Err(CsvError::Parse { line, source }))
            }
        }
    })
}

/// Write client accounts in csv format
pub fn write_accounts<'a, W: io::Write>(
    writer: W,
    accounts: impl IntoIterator<Item = &'a Account>,
) -> Result<(), CsvError> {
    let mut writer = csv::Writer::from_writer(writer);

    for account in accounts {
        writer.serialize(OutputRow::from(account))?;
    }

    writer.flush().map_err(csv::Error::from)?;
    Ok(())
}
