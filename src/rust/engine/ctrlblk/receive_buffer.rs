// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::engine::sequence_number::SeqNumber;
use ::std::collections::VecDeque;

//======================================================================================================================
// Constants
//======================================================================================================================

// Cap on the number of out-of-order blocks held at once.  The receive window already bounds the
// amount of out-of-order data; this additionally bounds bookkeeping for pathological peers that
// send many tiny disjoint blocks.
const MAX_OUT_OF_ORDER_BLOCKS: usize = 16;

/// Receiver-side silly-window-syndrome fraction: freed buffer space is not advertised until it
/// reaches `min(capacity * FR, eff_mss)`.
const FR: f64 = 0.5;

//======================================================================================================================
// Structures
//======================================================================================================================

/// Reassembly buffer for inbound payload bytes.
///
/// ```text
///                  |<-------------------- capacity -------------------->|
///                  |                                                    |
///                  |                         |<------ window ---------->|
///             delivered                 receive_next         receive_next + window
///                  v                         v                          v
/// -----------------|-------------------------|--------------------------|---------------------
///   read by user   |  received, not yet read |    willing to receive    | future sequence space
/// ```
///
/// In RFC 9293 terms `receive_next` is RCV.NXT and `window` is RCV.WND.  Segments at
/// `receive_next` extend the contiguous region immediately; segments beyond it wait in a sorted
/// out-of-order store until the gap closes.  The callers must trim segments to the window before
/// handing them in.
pub struct ReceiveBuffer {
    capacity: u32,

    // Sequence number of the next byte (or FIN) we expect.  In RFC 9293 terms, RCV.NXT.
    receive_next: SeqNumber,

    // Advertised receive window.  Shrinks as contiguous data arrives; grows on delivery to the
    // user, withheld until the growth is worth advertising.
    window: u32,

    // Contiguous, received, not yet delivered to the user.
    ready: VecDeque<Vec<u8>>,
    readable: usize,

    // Received blocks beyond `receive_next`, sorted by starting sequence number, no overlaps.
    out_of_order: VecDeque<(SeqNumber, Vec<u8>)>,

    // Sequence number of a FIN that arrived out-of-order, if any.
    out_of_order_fin: Option<SeqNumber>,
}

//======================================================================================================================
// Associated Functions
//======================================================================================================================

impl ReceiveBuffer {
    pub fn new(capacity: u32) -> Self {
        Self {
            capacity,
            receive_next: SeqNumber::from(0),
            window: capacity,
            ready: VecDeque::new(),
            readable: 0,
            out_of_order: VecDeque::new(),
            out_of_order_fin: None,
        }
    }

    /// Synchronizes the buffer with the peer's initial sequence number (the sequence number
    /// following its SYN).
    pub fn synchronize(&mut self, receive_next: SeqNumber) {
        self.receive_next = receive_next;
    }

    pub fn receive_next(&self) -> SeqNumber {
        self.receive_next
    }

    pub fn window(&self) -> u32 {
        self.window
    }

    pub fn readable_bytes(&self) -> usize {
        self.readable
    }

    pub fn has_readable_bytes(&self) -> bool {
        self.readable > 0
    }

    /// Accepts a trimmed, in-window segment payload starting at `seq`.  In-order data extends the
    /// contiguous region (pulling in any now-contiguous out-of-order blocks); later data is stored
    /// aside.  Returns true when a previously out-of-order FIN has become deliverable.
    pub fn receive(&mut self, seq: SeqNumber, data: Vec<u8>) -> bool {
        if data.is_empty() {
            return false;
        }

        if seq != self.receive_next {
            self.store_out_of_order(seq, data);
            return false;
        }

        self.append_ready(data);

        // The gap may have closed on one or more stored blocks.
        while let Some((start, _)) = self.out_of_order.front() {
            if *start != self.receive_next {
                break;
            }
            match self.out_of_order.pop_front() {
                Some((_, block)) => {
                    trace!("recovering out-of-order block at {}", self.receive_next);
                    self.append_ready(block);
                },
                None => break,
            }
        }

        self.out_of_order_fin == Some(self.receive_next)
    }

    fn append_ready(&mut self, data: Vec<u8>) {
        let len: u32 = data.len() as u32;
        self.readable += data.len();
        self.receive_next = self.receive_next + SeqNumber::from(len);
        self.ready.push_back(data);
        // The contiguous region grew, so the window shrinks at once (it may never grow silently).
        self.window = self.window.min(self.capacity.saturating_sub(self.readable as u32));
    }

    // Inserts a block into the out-of-order store, trimming away any bytes already present.
    // Written for clarity over speed: this is not the fast path.
    fn store_out_of_order(&mut self, mut new_start: SeqNumber, mut data: Vec<u8>) {
        let mut another_pass_needed: bool = true;
        let mut insert_index: usize = 0;

        while another_pass_needed {
            another_pass_needed = false;
            insert_index = self.out_of_order.len();

            for index in 0..self.out_of_order.len() {
                let (stored_start, stored_block): &(SeqNumber, Vec<u8>) = &self.out_of_order[index];
                let stored_start: SeqNumber = *stored_start;
                let stored_end: SeqNumber = stored_start + SeqNumber::from(stored_block.len() as u32 - 1);
                let new_end: SeqNumber = new_start + SeqNumber::from(data.len() as u32 - 1);

                // A new block has six possibilities against an existing one:
                //
                //                          |<--- stored block --->|
                // |<- before ->|  |<- front overlap ->|  |<- end overlap ->|  |<- after ->|
                //                      |<- duplicate ->|
                //                |<------- completely encompassing ------->|
                if new_start < stored_start {
                    if new_end < stored_start {
                        // Entirely before this block; the store is sorted, so we are done.
                        insert_index = index;
                        break;
                    }
                    if stored_end < new_end {
                        // The new block swallows this one whole.  Drop the stored block and rerun
                        // the scan, since more blocks may be swallowed too.
                        self.out_of_order.remove(index);
                        another_pass_needed = true;
                        break;
                    }
                    // The tail of the new block overlaps the front of the stored one: trim the
                    // tail and insert before it.
                    let excess: usize = (u32::from(new_end - stored_start) + 1) as usize;
                    data.truncate(data.len() - excess);
                    insert_index = index;
                    break;
                } else {
                    if new_end <= stored_end {
                        // Complete duplicate of data we already hold.
                        return;
                    }
                    if stored_end < new_start {
                        // Entirely after this block; keep scanning.
                        continue;
                    }
                    // The front of the new block overlaps the tail of the stored one: trim the
                    // front and keep scanning forward.
                    let duplicate: usize = (u32::from(stored_end - new_start) + 1) as usize;
                    data.drain(..duplicate);
                    new_start = new_start + SeqNumber::from(duplicate as u32);
                }
            }
        }

        if data.is_empty() {
            return;
        }
        self.out_of_order.insert(insert_index, (new_start, data));

        while self.out_of_order.len() > MAX_OUT_OF_ORDER_BLOCKS {
            self.out_of_order.pop_back();
        }
    }

    /// Remembers a FIN that arrived ahead of the data before it.
    pub fn park_out_of_order_fin(&mut self, seq: SeqNumber) {
        self.out_of_order_fin = Some(seq);
    }

    /// Advances RCV.NXT over a FIN, which consumes one sequence number but no buffer space.
    pub fn advance_over_fin(&mut self) {
        self.receive_next = self.receive_next + SeqNumber::from(1);
        self.out_of_order_fin = None;
    }

    /// Hands up to `max_bytes` of contiguous data to the application and frees the space.
    /// Returns the bytes and whether the advertised window grew (in which case the peer should be
    /// told with a window update).
    pub fn deliver(&mut self, max_bytes: usize, eff_mss: usize) -> (Vec<u8>, bool) {
        let mut data: Vec<u8> = Vec::with_capacity(max_bytes.min(self.readable));

        while data.len() < max_bytes {
            let Some(front) = self.ready.front_mut() else {
                break;
            };
            let wanted: usize = max_bytes - data.len();
            if front.len() > wanted {
                data.extend_from_slice(&front[..wanted]);
                front.drain(..wanted);
                self.readable -= wanted;
                break;
            }
            self.readable -= front.len();
            match self.ready.pop_front() {
                Some(block) => data.extend_from_slice(&block),
                None => break,
            }
        }

        (data, self.maybe_grow_window(eff_mss))
    }

    // Receiver-side SWS avoidance (RFC 9293, Section 3.8.6.2.2): only advertise freed space once
    // there is at least min(FR * capacity, eff_mss) of it.
    fn maybe_grow_window(&mut self, eff_mss: usize) -> bool {
        let available: u32 = self.capacity.saturating_sub(self.readable as u32);
        let withheld: u32 = available.saturating_sub(self.window);
        let threshold: u32 = ((self.capacity as f64 * FR) as u32).min(eff_mss as u32);
        if withheld >= threshold.max(1) {
            self.window = available;
            return true;
        }
        false
    }

    /// Drops all buffered data.  Used on teardown.
    pub fn release(&mut self) {
        self.ready.clear();
        self.readable = 0;
        self.out_of_order.clear();
        self.out_of_order_fin = None;
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
