/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Exhaustive enumeration of the messages nodes exchange.

use borsh::{BorshDeserialize, BorshSerialize};

use crate::backup_write::BackupWriteRecord;

/// All message variants sent between nodes.
#[derive(Clone, PartialEq, Eq, Debug, BorshSerialize, BorshDeserialize)]
pub enum Message {
    /// A write that already happened on the primary, sent to a backup owner. See
    /// [`BackupWriteRecord`].
    BackupWrite(BackupWriteRecord),
}

impl From<BackupWriteRecord> for Message {
    fn from(value: BackupWriteRecord) -> Self {
        Message::BackupWrite(value)
    }
}
