//! Durable account records.
//!
//! Accounts live in a plain text file, one `username,credential` record per
//! line, appended to and never rewritten. Every lookup scans the whole file;
//! there is no in-memory index. Credentials are stored and compared exactly as
//! the caller hands them over.
//!
//! The read-then-append in [`AccountStore::create`] is not atomic. The store
//! must have a single owner (the server's tick) or sit behind one.

use crate::error::AccountError;
use log::debug;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::path::{Path, PathBuf};

pub const DEFAULT_ACCOUNTS_FILE: &str = "Accounts.txt";

const RECORD_DELIMITER: char = ',';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    Created,
    AlreadyExists,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyOutcome {
    Authenticated,
    NotFound,
}

#[derive(Debug, Clone)]
pub struct AccountStore {
    path: PathBuf,
}

impl AccountStore {
    /// Uses the file at `path`. A missing file is an empty store; it is
    /// created by the first successful `create`.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends a record unless the username is already taken
    pub fn create(&self, username: &str, credential: &str) -> Result<CreateOutcome, AccountError> {
        for field in [username, credential] {
            if field.contains(['\n', '\r', RECORD_DELIMITER]) {
                return Err(AccountError::InvalidField(field.to_string()));
            }
        }

        if self.scan(|user, _| user == username)? {
            return Ok(CreateOutcome::AlreadyExists);
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{}{}{}", username, RECORD_DELIMITER, credential)?;
        file.sync_data()?;

        debug!("Appended account record to {}", self.path.display());
        Ok(CreateOutcome::Created)
    }

    /// Looks for a record matching both username and credential
    pub fn verify(&self, username: &str, credential: &str) -> Result<VerifyOutcome, AccountError> {
        let found = self.scan(|user, stored| user == username && stored == Some(credential))?;
        Ok(if found {
            VerifyOutcome::Authenticated
        } else {
            VerifyOutcome::NotFound
        })
    }

    /// Number of records in the file
    pub fn count(&self) -> Result<usize, AccountError> {
        let mut count = 0;
        self.scan(|_, _| {
            count += 1;
            false
        })?;
        Ok(count)
    }

    /// Walks the records until `matches` returns true
    fn scan(
        &self,
        mut matches: impl FnMut(&str, Option<&str>) -> bool,
    ) -> Result<bool, AccountError> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        };

        for line in BufReader::new(file).lines() {
            let line = line?;
            if line.is_empty() {
                continue;
            }

            let mut fields = line.split(RECORD_DELIMITER);
            let username = fields.next().unwrap_or_default();
            let credential = fields.next();
            if matches(username, credential) {
                return Ok(true);
            }
        }

        Ok(false)
    }
}
