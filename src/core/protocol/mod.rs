// src/core/protocol/mod.rs

//! Wire-level helpers shared by the default connector: the RESP2 codec, reply
//! conversion, MONITOR line parsing and cluster key slots.

pub mod monitor;
pub mod reply;
pub mod resp_frame;
pub mod slot;

pub use monitor::CommandEvent;
pub use reply::{CommandOptions, Reply, ReplyEncoding};
pub use resp_frame::{RespFrame, RespFrameCodec};
