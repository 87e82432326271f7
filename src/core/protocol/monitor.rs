// src/core/protocol/monitor.rs

//! Parsing and formatting of `MONITOR` output lines such as
//! `1339518083.107412 [0 127.0.0.1:60866] "keys" "*"`.

use crate::core::RediscopeError;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

/// One command observed on a node's live command stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandEvent {
    /// Unix timestamp with microseconds, as reported by the server.
    pub time: String,
    pub args: Vec<String>,
    /// Address of the client that issued the command (`ip:port`, `lua`, `unix:/path`).
    pub source: String,
    pub database: u32,
    /// Address of the node the command was observed on.
    #[serde(default)]
    pub shard: String,
}

impl CommandEvent {
    /// Parses one MONITOR line. `shard` is the address of the node it came from.
    pub fn parse(line: &str, shard: &str) -> Result<Self, RediscopeError> {
        let bad = || RediscopeError::Protocol(format!("unrecognized MONITOR line: {line}"));

        let (time, rest) = line.trim_end().split_once(' ').ok_or_else(bad)?;
        let rest = rest.strip_prefix('[').ok_or_else(bad)?;
        let (header, args) = rest.split_once(']').ok_or_else(bad)?;
        let (database, source) = header.split_once(' ').ok_or_else(bad)?;
        let database = database.parse::<u32>().map_err(|_| bad())?;

        Ok(CommandEvent {
            time: time.to_string(),
            args: parse_quoted_args(args).ok_or_else(bad)?,
            source: source.to_string(),
            database,
            shard: shard.to_string(),
        })
    }

    /// Lower-cased command name, if any.
    pub fn command_name(&self) -> Option<String> {
        self.args.first().map(|name| name.to_ascii_lowercase())
    }

    /// Renders the event back into the MONITOR line format.
    pub fn to_line(&self) -> String {
        let mut line = format!("{} [{} {}]", self.time, self.database, self.source);
        for arg in &self.args {
            line.push(' ');
            push_quoted(&mut line, arg);
        }
        line
    }
}

fn push_quoted(out: &mut String, arg: &str) {
    out.push('"');
    for ch in arg.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{7}' => out.push_str("\\a"),
            '\u{8}' => out.push_str("\\b"),
            c if c.is_control() => {
                let _ = write!(out, "\\x{:02x}", c as u32);
            }
            c => out.push(c),
        }
    }
    out.push('"');
}

/// Splits the `"arg" "arg"` tail of a MONITOR line, undoing the server's escaping.
fn parse_quoted_args(input: &str) -> Option<Vec<String>> {
    let mut args = Vec::new();
    let mut chars = input.chars().peekable();

    loop {
        while chars.next_if(|c| *c == ' ').is_some() {}
        match chars.next() {
            None => return Some(args),
            Some('"') => {}
            Some(_) => return None,
        }

        let mut bytes = Vec::new();
        loop {
            match chars.next()? {
                '"' => break,
                '\\' => match chars.next()? {
                    'n' => bytes.push(b'\n'),
                    'r' => bytes.push(b'\r'),
                    't' => bytes.push(b'\t'),
                    'a' => bytes.push(0x07),
                    'b' => bytes.push(0x08),
                    'x' => {
                        let hi = chars.next()?.to_digit(16)?;
                        let lo = chars.next()?.to_digit(16)?;
                        bytes.push((hi * 16 + lo) as u8);
                    }
                    other => {
                        let mut buf = [0u8; 4];
                        bytes.extend_from_slice(other.encode_utf8(&mut buf).as_bytes());
                    }
                },
                c => {
                    let mut buf = [0u8; 4];
                    bytes.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
                }
            }
        }
        args.push(String::from_utf8_lossy(&bytes).into_owned());
    }
}
