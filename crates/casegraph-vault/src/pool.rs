//! A shared pool of fixed-size byte buffers for streaming copy/hash work
//! (`spec.md §4.3`: "Buffers are drawn from a shared pool and returned
//! under all exits").

use std::sync::Mutex;

/// Size of every buffer handed out by [`BufferPool`]. Matches the 64 KiB
/// chunk size `spec.md §4.3` specifies for the evidence copy loop.
pub const CHUNK_SIZE: usize = 64 * 1024;

/// A pool of reusable `Vec<u8>` scratch buffers, all [`CHUNK_SIZE`] bytes.
pub struct BufferPool {
    free: Mutex<Vec<Vec<u8>>>,
}

impl BufferPool {
    /// Build an empty pool; buffers are allocated lazily on first checkout.
    pub fn new() -> Self {
        Self {
            free: Mutex::new(Vec::new()),
        }
    }

    /// Check out a buffer, returning it to the pool when the guard drops
    /// regardless of how the caller's scope exits (success, early return,
    /// or panic-unwind).
    pub fn checkout(self: &std::sync::Arc<Self>) -> PooledBuffer {
        let buf = self
            .free
            .lock()
            .expect("buffer pool mutex poisoned")
            .pop()
            .unwrap_or_else(|| vec![0u8; CHUNK_SIZE]);
        PooledBuffer {
            buf: Some(buf),
            pool: std::sync::Arc::clone(self),
        }
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new()
    }
}

/// A checked-out buffer. Returned to its [`BufferPool`] on drop.
pub struct PooledBuffer {
    buf: Option<Vec<u8>>,
    pool: std::sync::Arc<BufferPool>,
}

impl std::ops::Deref for PooledBuffer {
    type Target = Vec<u8>;

    fn deref(&self) -> &Vec<u8> {
        self.buf.as_ref().expect("buffer taken before drop")
    }
}

impl std::ops::DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut Vec<u8> {
        self.buf.as_mut().expect("buffer taken before drop")
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            self.pool
                .free
                .lock()
                .expect("buffer pool mutex poisoned")
                .push(buf);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checked_out_buffer_returns_to_pool_on_drop() {
        let pool = std::sync::Arc::new(BufferPool::new());
        {
            let buf = pool.checkout();
            assert_eq!(buf.len(), CHUNK_SIZE);
        }
        assert_eq!(pool.free.lock().unwrap().len(), 1);
    }
}
