//
// Copyright 2026 Hans W. Uhlig. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

//! Injectable byte-buffer pooling.
//!
//! Negotiation code rents scratch buffers (SASL frame bodies, mostly) from a
//! [`BufferPool`] configured on
//! [`AmqpSettings`](crate::negotiation::AmqpSettings) rather than from a
//! process-wide singleton, so tests can swap in [`NoPool`] or a counting
//! implementation.
//!
//! # Example
//!
//! ```rust
//! use amqp_transport::buffer::{BufferPool, SizeClassPool};
//!
//! let pool = SizeClassPool::new();
//! let mut buffer = pool.rent(1024);
//! buffer.extend_from_slice(b"sasl frame body");
//! pool.give_back(buffer);
//!
//! assert_eq!(pool.pooled(1024), 1);
//! ```

use bytes::BytesMut;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

/// Maximum buffer capacity the pool retains.
const MAX_POOLED_SIZE: usize = 1024 * 1024;

/// Maximum number of buffers kept per size class.
const MAX_BUFFERS_PER_CLASS: usize = 32;

/// Size classes (powers of 4 from 256 B to 1 MB).
const SIZE_CLASSES: &[usize] = &[
    256,     // 256 B
    1024,    // 1 KB
    4096,    // 4 KB
    16384,   // 16 KB
    65536,   // 64 KB
    262144,  // 256 KB
    1048576, // 1 MB
];

/// Rent/return service for scratch byte buffers.
///
/// Ownership of a rented buffer is exclusive to the caller until it is handed
/// back. Returning a buffer is optional; a dropped buffer is simply freed.
pub trait BufferPool: Send + Sync {
    /// Rents an empty buffer with at least `min_capacity` bytes of capacity.
    fn rent(&self, min_capacity: usize) -> BytesMut;

    /// Returns a buffer to the pool for reuse.
    fn give_back(&self, buffer: BytesMut);
}

/// Shared handle to a buffer pool.
pub type SharedBufferPool = Arc<dyn BufferPool>;

/// A pool that never retains anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPool;

impl BufferPool for NoPool {
    fn rent(&self, min_capacity: usize) -> BytesMut {
        BytesMut::with_capacity(min_capacity)
    }

    fn give_back(&self, _buffer: BytesMut) {}
}

/// A pool of buffers organized into size classes.
///
/// Each class keeps a bounded free list under its own lock, so contention is
/// limited to callers renting the same size.
pub struct SizeClassPool {
    classes: Vec<Mutex<Vec<BytesMut>>>,
}

impl SizeClassPool {
    /// Creates an empty pool.
    pub fn new() -> Self {
        Self {
            classes: SIZE_CLASSES.iter().map(|_| Mutex::new(Vec::new())).collect(),
        }
    }

    /// Number of buffers currently pooled in the class serving `size`.
    #[must_use]
    pub fn pooled(&self, size: usize) -> usize {
        class_index(size).map_or(0, |idx| self.classes[idx].lock().len())
    }

    /// Returns `(size_class, buffer_count)` for every class.
    #[must_use]
    pub fn stats(&self) -> Vec<(usize, usize)> {
        SIZE_CLASSES
            .iter()
            .zip(self.classes.iter())
            .map(|(size, class)| (*size, class.lock().len()))
            .collect()
    }
}

impl Default for SizeClassPool {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SizeClassPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SizeClassPool")
            .field("stats", &self.stats())
            .finish()
    }
}

fn class_index(capacity: usize) -> Option<usize> {
    SIZE_CLASSES.iter().position(|&size| size >= capacity)
}

impl BufferPool for SizeClassPool {
    fn rent(&self, min_capacity: usize) -> BytesMut {
        match class_index(min_capacity) {
            Some(idx) => {
                if let Some(mut buffer) = self.classes[idx].lock().pop() {
                    buffer.clear();
                    return buffer;
                }
                BytesMut::with_capacity(SIZE_CLASSES[idx])
            }
            // Larger than the largest class, never pooled
            None => BytesMut::with_capacity(min_capacity),
        }
    }

    fn give_back(&self, mut buffer: BytesMut) {
        let capacity = buffer.capacity();
        if capacity == 0 || capacity > MAX_POOLED_SIZE {
            return;
        }
        // File under the largest class the buffer can fully serve.
        let idx = match SIZE_CLASSES.iter().rposition(|&size| size <= capacity) {
            Some(idx) => idx,
            None => return,
        };
        let mut class = self.classes[idx].lock();
        if class.len() < MAX_BUFFERS_PER_CLASS {
            buffer.clear();
            class.push(buffer);
        }
    }
}
