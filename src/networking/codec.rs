/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Framing of [`Message`]s for byte-oriented transports.
//!
//! A frame is:
//! 1. The wire version ([`WIRE_VERSION`]), one byte,
//! 2. The version of the entry function registry
//!    ([`FUNCTION_REGISTRY_VERSION`]), one byte,
//! 3. The borsh encoding of the message.
//!
//! Peers must agree on both versions. A frame written under other versions is rejected before its body
//! is looked at, since its variants and functions may mean something else.

use std::io;

use borsh::{BorshDeserialize, BorshSerialize};

use crate::backup_write::ProtocolViolation;
use crate::types::functions::FUNCTION_REGISTRY_VERSION;

use super::messages::Message;

pub const WIRE_VERSION: u8 = 1;

const HEADER_LEN: usize = 2;

pub fn encode_message(message: &Message) -> io::Result<Vec<u8>> {
    let mut bytes = vec![WIRE_VERSION, FUNCTION_REGISTRY_VERSION];
    message.serialize(&mut bytes)?;
    Ok(bytes)
}

pub fn decode_message(bytes: &[u8]) -> Result<Message, ProtocolViolation> {
    if bytes.len() < HEADER_LEN {
        return Err(ProtocolViolation::MalformedRecord {
            reason: format!("frame of {} bytes has no header", bytes.len()),
        });
    }

    let (wire, functions) = (bytes[0], bytes[1]);
    if wire != WIRE_VERSION || functions != FUNCTION_REGISTRY_VERSION {
        return Err(ProtocolViolation::UnsupportedVersion { wire, functions });
    }

    Message::try_from_slice(&bytes[HEADER_LEN..]).map_err(|err| ProtocolViolation::MalformedRecord {
        reason: err.to_string(),
    })
}
