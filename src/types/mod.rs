/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Types and traits that are used across the primary and the backup sides of the triangle protocol.
//!
//! Types specific to one side live in that side's module, e.g., [`crate::backup::pipeline`].

pub mod basic;

pub mod functions;

pub mod topology;
