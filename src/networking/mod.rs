/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Pluggable point-to-point networking.
//!
//! The triangle protocol only needs unicast, fire-and-forget delivery without any ordering guarantee.
//! Users provide it by implementing [`Network`](network::Network).

pub mod codec;

pub mod messages;

pub mod network;

pub(crate) mod receiving;

pub(crate) mod sending;
