//! Decoder for the game's server announcement replies.
//!
//! The reply layout is undocumented; every offset below was observed on the
//! wire and must stay as is to remain compatible with live servers:
//!
//! ```text
//! [0 .. name_offset)        header, ignored
//! [name_offset .. t)        server name, terminated by the first NUL at t
//! t + 3                     player count
//! t + 7                     slot count
//! t + 8                     mode identifier
//! (t + 8 ..]                opaque tail, searched for a level signature
//! ```

pub mod lookup;

use std::net::IpAddr;
use sha2::{Digest, Sha256};
use thiserror::Error;
use shared::types::ServerRecord;
use crate::config::DecoderConfig;
use self::lookup::LookupTables;

const PLAYERS_OFFSET: usize = 3;
const SLOTS_OFFSET: usize = 7;
const MODE_OFFSET: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("reply too short: {len} bytes, need at least {min}")]
    TooShort { len: usize, min: usize },
    #[error("no NUL terminates the server name")]
    MalformedName,
    #[error("reply ends {len} bytes after the server name, fields need {need}")]
    Truncated { len: usize, need: usize },
}

pub struct Decoder {
    name_offset: usize,
    min_reply_len: usize,
    tables: LookupTables,
}

impl Decoder {
    pub fn new(config: &DecoderConfig) -> Self {
        Self {
            name_offset: config.name_offset,
            min_reply_len: config.min_reply_len,
            tables: LookupTables::from_config(config),
        }
    }

    /// Decode one reply, logging failures and unresolved fields.
    pub fn decode(&self, source: IpAddr, raw: &[u8]) -> Result<ServerRecord, DecodeError> {
        if raw.len() < self.min_reply_len {
            tracing::debug!(%source, len = raw.len(), "Ignoring short reply");
            return Err(DecodeError::TooShort { len: raw.len(), min: self.min_reply_len });
        }

        let reply = normalize(raw);
        let result = self.parse(source, &reply);

        match &result {
            Ok(server) => {
                if server.mode.is_none() {
                    tracing::warn!(
                        "Could not parse mode for reply '{}', bytes: '{}'",
                        escape_reply(&reply),
                        byte_listing(raw)
                    );
                }
                if server.level.is_none() {
                    tracing::warn!(
                        "Could not parse level for reply '{}', bytes: '{}'",
                        escape_reply(&reply),
                        byte_listing(raw)
                    );
                }
            }
            Err(e) => {
                tracing::error!(
                    "Failed to decode reply from {} '{}', bytes: '{}': {}",
                    source,
                    escape_reply(&reply),
                    byte_listing(raw),
                    e
                );
            }
        }

        result
    }

    fn parse(&self, source: IpAddr, reply: &[u8]) -> Result<ServerRecord, DecodeError> {
        let name_part = reply.get(self.name_offset..).ok_or(DecodeError::MalformedName)?;
        let name_len = name_part
            .iter()
            .position(|&b| b == 0)
            .ok_or(DecodeError::MalformedName)?;
        let name = String::from_utf8_lossy(&name_part[..name_len]).trim().to_string();

        let tail = &name_part[name_len..];
        if tail.len() <= MODE_OFFSET {
            return Err(DecodeError::Truncated { len: tail.len(), need: MODE_OFFSET + 1 });
        }

        Ok(ServerRecord {
            id: reply_id(source, reply),
            name,
            level: self.tables.levels.resolve(&tail[MODE_OFFSET + 1..]).map(str::to_string),
            mode: self.tables.modes.resolve(tail[MODE_OFFSET]).map(str::to_string),
            slots: tail[SLOTS_OFFSET],
            players: tail[PLAYERS_OFFSET],
        })
    }
}

/// Replace every non-ASCII byte with `?`, the alphabet level signatures use.
pub fn normalize(raw: &[u8]) -> Vec<u8> {
    raw.iter()
        .map(|&b| if b.is_ascii() { b } else { b'?' })
        .collect()
}

/// Lowercase hex SHA-256 of `"<source>~"` followed by the reply
fn reply_id(source: IpAddr, reply: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{}~", source).as_bytes());
    hasher.update(reply);
    hex::encode(hasher.finalize())
}

/// Printable rendering of a reply for diagnostics
pub fn escape_reply(reply: &[u8]) -> String {
    let mut out = String::with_capacity(reply.len());
    for &b in reply {
        match b {
            0 => out.push_str("\\0"),
            b'\n' => out.push_str("\\n"),
            b'\\' => out.push_str("\\\\"),
            0x20..=0x7e => out.push(b as char),
            _ => out.push_str(&format!("\\x{:02x}", b)),
        }
    }
    out
}

/// Space-separated decimal byte values
pub fn byte_listing(raw: &[u8]) -> String {
    raw.iter().map(u8::to_string).collect::<Vec<_>>().join(" ")
}
