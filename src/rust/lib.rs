// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

#![deny(clippy::all)]

#[macro_use]
extern crate log;

pub mod engine;
pub mod runtime;

pub use crate::{
    engine::{
        config::ConnectionConfig,
        connection::{ConnectionEngine, ConnectionEvent, State, TcbSnapshot},
        segment::{Segment, SegmentOption},
        Completion, SeqNumber,
    },
    runtime::{
        fail::Fail,
        timer::{TimerKind, TimerSet},
        transport::SegmentTransport,
    },
};

//======================================================================================================================
// Macros
//======================================================================================================================

/// Ensures that two expressions are equal, bailing out of the calling test otherwise.
#[macro_export]
macro_rules! ensure_eq {
    ($left:expr, $right:expr $(,)?) => {{
        match (&$left, &$right) {
            (left_val, right_val) => {
                if !(*left_val == *right_val) {
                    anyhow::bail!(
                        "ensure_eq!({}, {}) failed: {:?} != {:?}",
                        stringify!($left),
                        stringify!($right),
                        left_val,
                        right_val
                    );
                }
            },
        }
    }};
}

/// Ensures that two expressions are not equal, bailing out of the calling test otherwise.
#[macro_export]
macro_rules! ensure_neq {
    ($left:expr, $right:expr $(,)?) => {{
        match (&$left, &$right) {
            (left_val, right_val) => {
                if *left_val == *right_val {
                    anyhow::bail!(
                        "ensure_neq!({}, {}) failed: both sides are {:?}",
                        stringify!($left),
                        stringify!($right),
                        left_val
                    );
                }
            },
        }
    }};
}
