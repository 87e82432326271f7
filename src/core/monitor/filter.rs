// src/core/monitor/filter.rs

//! Per-subscriber event filters.

use crate::core::RediscopeError;
use crate::core::protocol::CommandEvent;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use strum_macros::{Display, EnumString};

/// Decides whether one subscriber sees an event. An `Err` drops the event for
/// that subscriber only.
pub trait EventFilter: Send + Sync + fmt::Debug {
    fn accept(&self, event: &CommandEvent) -> Result<bool, RediscopeError>;
}

/// Keeps only commands issued by one client connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrentClientFilter {
    address: String,
}

impl CurrentClientFilter {
    /// `address` is the client's `ip:port` as the server sees it (`CLIENT INFO` `addr=`).
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
        }
    }
}

impl EventFilter for CurrentClientFilter {
    fn accept(&self, event: &CommandEvent) -> Result<bool, RediscopeError> {
        Ok(event.source == self.address)
    }
}

/// Command groups as listed by `COMMAND DOCS`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[strum(serialize_all = "kebab-case", ascii_case_insensitive)]
#[serde(rename_all = "kebab-case")]
pub enum CommandGroup {
    Generic,
    String,
    List,
    Set,
    SortedSet,
    Hash,
    Pubsub,
    Transactions,
    Connection,
    Server,
    Scripting,
    Hyperloglog,
    Cluster,
    Geo,
    Stream,
    Bitmap,
    Search,
    Json,
    Timeseries,
    Other,
}

static COMMAND_GROUPS: Lazy<HashMap<&'static str, CommandGroup>> = Lazy::new(|| {
    use CommandGroup::*;
    let table: &[(CommandGroup, &[&str])] = &[
        (
            Generic,
            &[
                "del", "unlink", "exists", "expire", "expireat", "pexpire", "pexpireat", "ttl",
                "pttl", "persist", "type", "keys", "scan", "rename", "renamenx", "randomkey",
                "dump", "restore", "object", "sort", "sort_ro", "touch", "copy", "move",
                "expiretime", "pexpiretime", "wait",
            ],
        ),
        (
            String,
            &[
                "get", "set", "setnx", "setex", "psetex", "mget", "mset", "msetnx", "append",
                "incr", "incrby", "incrbyfloat", "decr", "decrby", "getrange", "setrange",
                "strlen", "getset", "getdel", "getex", "lcs", "substr",
            ],
        ),
        (
            List,
            &[
                "lpush", "rpush", "lpushx", "rpushx", "lpop", "rpop", "llen", "lrange", "lindex",
                "lset", "lrem", "ltrim", "linsert", "lpos", "lmove", "blmove", "blpop", "brpop",
                "rpoplpush", "brpoplpush", "lmpop", "blmpop",
            ],
        ),
        (
            Set,
            &[
                "sadd", "srem", "smembers", "sismember", "smismember", "scard", "spop",
                "srandmember", "smove", "sinter", "sintercard", "sinterstore", "sunion",
                "sunionstore", "sdiff", "sdiffstore", "sscan",
            ],
        ),
        (
            SortedSet,
            &[
                "zadd", "zrem", "zscore", "zmscore", "zincrby", "zcard", "zcount", "zrange",
                "zrangebyscore", "zrangebylex", "zrevrange", "zrevrangebyscore",
                "zrevrangebylex", "zrank", "zrevrank", "zremrangebyrank", "zremrangebyscore",
                "zremrangebylex", "zpopmin", "zpopmax", "bzpopmin", "bzpopmax", "zscan",
                "zunionstore", "zinterstore", "zdiffstore", "zrangestore", "zlexcount",
                "zrandmember", "zmpop", "bzmpop",
            ],
        ),
        (
            Hash,
            &[
                "hset", "hsetnx", "hget", "hmset", "hmget", "hdel", "hexists", "hlen", "hkeys",
                "hvals", "hgetall", "hincrby", "hincrbyfloat", "hstrlen", "hscan", "hrandfield",
            ],
        ),
        (
            Pubsub,
            &[
                "publish", "subscribe", "unsubscribe", "psubscribe", "punsubscribe", "pubsub",
                "spublish", "ssubscribe", "sunsubscribe",
            ],
        ),
        (Transactions, &["multi", "exec", "discard", "watch", "unwatch"]),
        (
            Connection,
            &[
                "auth", "client", "echo", "hello", "ping", "quit", "reset", "select",
            ],
        ),
        (
            Server,
            &[
                "info", "config", "dbsize", "flushdb", "flushall", "save", "bgsave",
                "bgrewriteaof", "lastsave", "monitor", "slowlog", "time", "command", "memory",
                "latency", "acl", "debug", "module", "role", "replicaof", "slaveof", "shutdown",
                "swapdb", "lolwut",
            ],
        ),
        (
            Scripting,
            &[
                "eval", "evalsha", "eval_ro", "evalsha_ro", "script", "fcall", "fcall_ro",
                "function",
            ],
        ),
        (Hyperloglog, &["pfadd", "pfcount", "pfmerge"]),
        (Cluster, &["cluster", "asking", "readonly", "readwrite"]),
        (
            Geo,
            &[
                "geoadd", "geodist", "geohash", "geopos", "georadius", "georadiusbymember",
                "geosearch", "geosearchstore",
            ],
        ),
        (
            Stream,
            &[
                "xadd", "xrange", "xrevrange", "xlen", "xread", "xreadgroup", "xgroup", "xack",
                "xpending", "xclaim", "xautoclaim", "xdel", "xtrim", "xinfo", "xsetid",
            ],
        ),
        (Bitmap, &["setbit", "getbit", "bitcount", "bitpos", "bitop", "bitfield", "bitfield_ro"]),
    ];

    table
        .iter()
        .flat_map(|(group, names)| names.iter().map(move |name| (*name, *group)))
        .collect()
});

impl CommandGroup {
    /// Looks up the group of a command by name. Module commands are grouped by prefix.
    pub fn of(command: &str) -> CommandGroup {
        let name = command.to_ascii_lowercase();
        if let Some(group) = COMMAND_GROUPS.get(name.as_str()) {
            return *group;
        }
        match name.split_once('.') {
            Some(("ft", _)) => CommandGroup::Search,
            Some(("json", _)) => CommandGroup::Json,
            Some(("ts", _)) => CommandGroup::Timeseries,
            _ => CommandGroup::Other,
        }
    }
}

/// Keeps only commands belonging to one of the allowed groups.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandGroupFilter {
    allowed: HashSet<CommandGroup>,
}

impl CommandGroupFilter {
    pub fn new(allowed: impl IntoIterator<Item = CommandGroup>) -> Self {
        Self {
            allowed: allowed.into_iter().collect(),
        }
    }
}

impl EventFilter for CommandGroupFilter {
    fn accept(&self, event: &CommandEvent) -> Result<bool, RediscopeError> {
        let name = event.args.first().ok_or_else(|| {
            RediscopeError::Protocol(format!("command event at {} has no arguments", event.time))
        })?;
        Ok(self.allowed.contains(&CommandGroup::of(name)))
    }
}
