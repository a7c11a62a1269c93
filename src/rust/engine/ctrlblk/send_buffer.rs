// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{engine::Completion, runtime::fail::Fail};
use ::std::collections::VecDeque;

//======================================================================================================================
// Structures
//======================================================================================================================

// One user SEND call: its not-yet-segmentized bytes plus the completion to fire once every byte
// has been acknowledged.  A chunk with no data is the end-of-stream marker queued by CLOSE; it
// tells the segmentizer to emit a FIN once everything before it has drained.
struct PendingChunk {
    data: Vec<u8>,
    offset: usize,
    completion: Option<Completion>,
    end_of_stream: bool,
}

/// Result of draining up to `max_bytes` from the front of the send buffer.
pub struct SendChunk {
    pub data: Vec<u8>,
    /// True when this read drained the buffer: the segment should carry PSH.
    pub push: bool,
    /// Completions of every SEND call whose last byte is contained in `data`.  They travel with
    /// the segment into the retransmission queue and fire when the segment is fully acknowledged.
    pub completions: Vec<Completion>,
}

/// FIFO of outbound user data that has not yet been handed to the network.  Acknowledgment
/// tracking does not live here: once bytes are read out of this buffer they are owned by a
/// segment on the retransmission queue.
pub struct SendBuffer {
    chunks: VecDeque<PendingChunk>,
    readable: usize,
}

//======================================================================================================================
// Associated Functions
//======================================================================================================================

impl SendBuffer {
    pub fn new() -> Self {
        Self {
            chunks: VecDeque::new(),
            readable: 0,
        }
    }

    /// Bytes queued and not yet handed to the network.
    pub fn readable_bytes(&self) -> usize {
        self.readable
    }

    pub fn is_empty(&self) -> bool {
        self.readable == 0
    }

    pub fn enqueue(&mut self, data: Vec<u8>, completion: Option<Completion>) {
        self.readable += data.len();
        self.chunks.push_back(PendingChunk {
            data,
            offset: 0,
            completion,
            end_of_stream: false,
        });
    }

    /// Queues the end-of-stream marker.  Data enqueued afterwards would never be sent, so callers
    /// must reject sends once this has been called.
    pub fn mark_end_of_stream(&mut self) {
        self.chunks.push_back(PendingChunk {
            data: Vec::new(),
            offset: 0,
            completion: None,
            end_of_stream: true,
        });
    }

    /// Whether all queued data has drained and the end-of-stream marker is at the front.
    pub fn end_of_stream_reached(&self) -> bool {
        self.readable == 0 && self.chunks.front().map_or(false, |chunk| chunk.end_of_stream)
    }

    pub fn end_of_stream_marked(&self) -> bool {
        self.chunks.iter().any(|chunk| chunk.end_of_stream)
    }

    /// Consumes the end-of-stream marker, if it is at the front.  Returns whether a FIN should be
    /// emitted now.
    pub fn take_end_of_stream(&mut self) -> bool {
        if self.end_of_stream_reached() {
            self.chunks.pop_front();
            return true;
        }
        false
    }

    /// Removes up to `max_bytes` from the front of the buffer for segmentization.
    pub fn read(&mut self, max_bytes: usize) -> SendChunk {
        let mut data: Vec<u8> = Vec::with_capacity(max_bytes.min(self.readable));
        let mut completions: Vec<Completion> = Vec::new();

        while data.len() < max_bytes {
            let Some(chunk) = self.chunks.front_mut() else {
                break;
            };
            if chunk.end_of_stream {
                // The marker is never consumed by a data read.
                break;
            }

            let wanted: usize = max_bytes - data.len();
            let available: usize = chunk.data.len() - chunk.offset;
            if available > wanted {
                // Partial read: take a slice and leave the rest (and the completion) queued.
                data.extend_from_slice(&chunk.data[chunk.offset..chunk.offset + wanted]);
                chunk.offset += wanted;
                self.readable -= wanted;
                break;
            }

            // This read consumes the rest of the chunk; its completion rides along.
            data.extend_from_slice(&chunk.data[chunk.offset..]);
            self.readable -= available;
            let mut chunk: PendingChunk = match self.chunks.pop_front() {
                Some(chunk) => chunk,
                None => break,
            };
            if let Some(completion) = chunk.completion.take() {
                completions.push(completion);
            }
        }

        SendChunk {
            data,
            push: self.readable == 0,
            completions,
        }
    }

    /// Releases all pending chunks, failing every completion with `cause`.  Used on teardown.
    pub fn fail_all(&mut self, cause: &Fail) {
        self.readable = 0;
        while let Some(mut chunk) = self.chunks.pop_front() {
            if let Some(completion) = chunk.completion.take() {
                completion(Err(cause.clone()));
            }
        }
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl Default for SendBuffer {
    fn default() -> Self {
        Self::new()
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
