// src/core/protocol/slot.rs

//! Redis Cluster key hashing, used to route single-key commands to their owner.

use crc::{CRC_16_XMODEM, Crc};

/// The number of hash slots in a Redis Cluster.
pub const NUM_SLOTS: u16 = 16384;

// Redis Cluster uses the XMODEM variant of CRC16.
const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_XMODEM);

/// Returns the slot owning `key`.
///
/// If the key contains a non-empty `{...}` hash tag, only the tag is hashed, so
/// `{user1000}.following` and `{user1000}.followers` land in the same slot.
pub fn key_slot(key: &[u8]) -> u16 {
    CRC16.checksum(hash_tag(key)) % NUM_SLOTS
}

fn hash_tag(key: &[u8]) -> &[u8] {
    if let Some(start) = key.iter().position(|&b| b == b'{')
        && let Some(len) = key[start + 1..].iter().position(|&b| b == b'}')
        && len > 0
    {
        return &key[start + 1..start + 1 + len];
    }
    key
}

/// Picks the key a command is routed by. Returns `None` for keyless commands,
/// which go to any node.
pub fn routing_key(args: &[bytes::Bytes]) -> Option<&[u8]> {
    let name = args.first()?;
    let upper = String::from_utf8_lossy(name).to_ascii_uppercase();
    let index = match upper.as_str() {
        "PING" | "INFO" | "DBSIZE" | "SCAN" | "KEYS" | "FLUSHDB" | "FLUSHALL" | "CLIENT"
        | "CLUSTER" | "CONFIG" | "MONITOR" | "COMMAND" | "MODULE" | "FT._LIST" | "SELECT"
        | "SLOWLOG" | "MEMORY" | "LATENCY" | "RANDOMKEY" => return None,
        "EVAL" | "EVALSHA" | "FCALL" | "FCALL_RO" => 3,
        "XREAD" | "XREADGROUP" => {
            let streams = args
                .iter()
                .position(|a| a.eq_ignore_ascii_case(b"STREAMS"))?;
            streams + 1
        }
        _ => 1,
    };
    args.get(index).map(|k| k.as_ref())
}
