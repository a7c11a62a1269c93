// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

// Sequence numbers live in a circular space of size 2^32 and all arithmetic on them is performed
// modulo 2^32 (RFC 9293, Section 3.4; comparison rules per RFC 1982).  Excluding equality, the
// comparisons below are non-transitive: for distinct a, b, c it is possible that a < b < c < a.
// They are only meaningful while the compared values are less than half the space apart, which
// window discipline guarantees for every comparison the engine performs.  A caller that violates
// that discipline gets a wrong answer, not a panic.

use ::std::{cmp::Ordering, convert::From, fmt};

/// A sequence (or acknowledgment) number.  Wraps a `u32` and restricts the available operations to
/// the modular arithmetic that is actually valid on the circular space.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct SeqNumber {
    value: u32,
}

impl From<SeqNumber> for u32 {
    #[inline]
    fn from(item: SeqNumber) -> u32 {
        item.value
    }
}

impl From<u32> for SeqNumber {
    #[inline]
    fn from(item: u32) -> Self {
        SeqNumber { value: item }
    }
}

impl fmt::Display for SeqNumber {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.value.fmt(f)
    }
}

impl std::ops::Add for SeqNumber {
    type Output = SeqNumber;

    #[inline]
    fn add(self, other: SeqNumber) -> SeqNumber {
        (self.value.wrapping_add(other.value)).into()
    }
}

impl std::ops::Sub for SeqNumber {
    type Output = SeqNumber;

    #[inline]
    fn sub(self, other: SeqNumber) -> SeqNumber {
        (self.value.wrapping_sub(other.value)).into()
    }
}

// We implement PartialOrd to get the "<", "<=", ">", and ">=" operators, but sequence numbers are
// not a partially ordered set (they wrap), so `partial_cmp` itself must never be used.  The
// compiler insists on a body for it; that body panics to catch any accidental caller.
impl std::cmp::PartialOrd for SeqNumber {
    fn partial_cmp(&self, _other: &Self) -> Option<Ordering> {
        panic!("sequence numbers have no total order; use the comparison operators directly");
    }

    #[inline]
    fn lt(&self, other: &Self) -> bool {
        (self.value.wrapping_sub(other.value) as i32) < 0
    }

    #[inline]
    fn le(&self, other: &Self) -> bool {
        (self.value.wrapping_sub(other.value) as i32) <= 0
    }

    #[inline]
    fn gt(&self, other: &Self) -> bool {
        (self.value.wrapping_sub(other.value) as i32) > 0
    }

    #[inline]
    fn ge(&self, other: &Self) -> bool {
        (self.value.wrapping_sub(other.value) as i32) >= 0
    }
}

// Note that Ord is deliberately not implemented: there is no max or min sequence number, and three
// or more of them cannot be sorted into a unique order.

//======================================================================================================================
// Unit Tests
//======================================================================================================================
