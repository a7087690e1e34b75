/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The primary side of the triangle protocol: ordering writes per segment and sending them to backups.
//!
//! The [`PrimarySequencer`](sequencer::PrimarySequencer) hands out the sequence numbers that define the
//! order in which backups apply the writes of a segment. Every sequence number is handed out inside a
//! [`SequenceReservation`](reservation::SequenceReservation), which makes sure the number reaches every
//! backup owner: as a real record if the reservation is completed, or as a no-op if it is dropped.

pub mod replicator;

pub mod reservation;

pub mod sequencer;
