// Licensed under the Apache-2.0 license

//! Board address tables.
//!
//! A [`BoardTable`] maps a board identifier to the flash base the bootloader
//! is linked at, and optionally to where the application and its metadata
//! header live. The application and header addresses usually come from the
//! `target_overrides` section of an `mbed_app.json` ([`AppConfig`]).

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::error::CombineError;

/// `mbed_app.json` key holding the application start address.
pub const APP_START_KEY: &str = "target.mbed_app_start";
/// `mbed_app.json` key holding the metadata header address.
pub const HEADER_ADDRESS_KEY: &str = "update-client.application-details";

/// Parses an address literal: decimal, or hexadecimal with a `0x`/`0X`
/// prefix. Nothing else is accepted.
pub fn parse_address(text: &str) -> Result<u64> {
    let literal = text.trim();
    let (digits, radix) = match literal
        .strip_prefix("0x")
        .or_else(|| literal.strip_prefix("0X"))
    {
        Some(digits) => (digits, 16),
        None => (literal, 10),
    };
    if digits.is_empty() || !digits.chars().all(|c| c.is_digit(radix)) {
        bail!(CombineError::InvalidAddress(text.to_string()));
    }
    u64::from_str_radix(digits, radix)
        .map_err(|_| anyhow!(CombineError::InvalidAddress(text.to_string())))
}

/// Accepts a JSON integer or a string holding an address literal.
pub fn address_from_json(value: &Value) -> Result<u64> {
    match value {
        Value::Number(number) => number
            .as_u64()
            .ok_or_else(|| anyhow!(CombineError::InvalidAddress(number.to_string()))),
        Value::String(text) => parse_address(text),
        other => bail!(CombineError::InvalidAddress(other.to_string())),
    }
}

/// Lower-cases a board name and replaces `-` with `_`.
pub fn normalize_board_name(name: &str) -> String {
    name.to_lowercase().replace('-', "_")
}

fn de_address<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    let value = Value::deserialize(deserializer)?;
    address_from_json(&value).map_err(serde::de::Error::custom)
}

fn de_opt_address<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u64>, D::Error> {
    match Option::<Value>::deserialize(deserializer)? {
        Some(value) => address_from_json(&value)
            .map(Some)
            .map_err(serde::de::Error::custom),
        None => Ok(None),
    }
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Board {
    /// Start of flash; a `.bin` bootloader is loaded here.
    #[serde(deserialize_with = "de_address")]
    pub mem_start: u64,
    #[serde(default, deserialize_with = "de_opt_address")]
    pub application_start: Option<u64>,
    #[serde(default, deserialize_with = "de_opt_address")]
    pub header_address: Option<u64>,
}

impl Board {
    pub fn new(mem_start: u64) -> Self {
        Self {
            mem_start,
            ..Default::default()
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BoardTable {
    boards: BTreeMap<String, Board>,
}

impl BoardTable {
    /// The boards the update client ships bootloaders for.
    pub fn builtin() -> Self {
        let mut table = Self::default();
        table.insert("k64f", Board::new(0x0));
        table.insert("ublox_evk_odin_w2", Board::new(0x0800_0000));
        table.insert("nucleo_f429zi", Board::new(0x0800_0000));
        table.insert("numaker_pfm_nuc472", Board::new(0x0));
        table.insert("numaker_pfm_m487", Board::new(0x0));
        table
    }

    /// Parses a JSON object of board name to [`Board`].
    pub fn from_json_str(text: &str) -> Result<Self> {
        let boards: BTreeMap<String, Board> = serde_json::from_str(text)?;
        let mut table = Self::default();
        for (name, board) in boards {
            table.insert(&name, board);
        }
        Ok(table)
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot read board table {}", path.display()))?;
        Self::from_json_str(&text)
            .with_context(|| format!("Invalid board table {}", path.display()))
    }

    pub fn insert(&mut self, name: &str, board: Board) {
        self.boards.insert(normalize_board_name(name), board);
    }

    pub fn get(&self, name: &str) -> Result<&Board> {
        self.boards
            .get(&normalize_board_name(name))
            .ok_or_else(|| anyhow!(CombineError::UnknownBoard(name.to_string())))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.boards.keys().map(String::as_str)
    }

    /// Copies the application and header addresses of every known board out
    /// of the `target_overrides` section. Targets with no board entry are
    /// ignored.
    pub fn apply_app_config(&mut self, config: &AppConfig) -> Result<()> {
        for (target, overrides) in &config.target_overrides {
            let Some(board) = self.boards.get_mut(&normalize_board_name(target)) else {
                continue;
            };
            if let Some(value) = overrides.get(APP_START_KEY) {
                board.application_start = Some(
                    address_from_json(value)
                        .with_context(|| format!("target_overrides.{target}.{APP_START_KEY}"))?,
                );
            }
            if let Some(value) = overrides.get(HEADER_ADDRESS_KEY) {
                board.header_address = Some(
                    address_from_json(value)
                        .with_context(|| format!("target_overrides.{target}.{HEADER_ADDRESS_KEY}"))?,
                );
            }
        }
        Ok(())
    }
}

/// The parts of an `mbed_app.json` this tool reads.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub target_overrides: BTreeMap<String, BTreeMap<String, Value>>,
}

impl AppConfig {
    pub fn from_json_str(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot read {}", path.display()))?;
        Self::from_json_str(&text).with_context(|| format!("Invalid JSON in {}", path.display()))
    }
}
