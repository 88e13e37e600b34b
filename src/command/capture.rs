// Jackson Coxson
//! The capture buffer (spec.md §4.1): a shared, growable byte store that
//! every output sink appends to regardless of its configured
//! destination, with support for opening independent reader views that
//! block when caught up and wake on new bytes or writer close.

use std::sync::Arc;

use tokio::sync::Notify;

#[derive(Debug, Default)]
struct Inner {
    bytes: std::sync::Mutex<Vec<u8>>,
    closed: std::sync::atomic::AtomicBool,
    notify: Notify,
}

/// A single growable, append-only byte store shared between a writer
/// (the command engine's stdout/stderr copier) and any number of
/// [`CaptureReader`]s.
#[derive(Debug, Clone, Default)]
pub struct CaptureBuffer {
    inner: Arc<Inner>,
}

impl CaptureBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends bytes and wakes any readers. Size increments are only
    /// published once the bytes themselves are in place, so a reader can
    /// never observe a length without the data behind it.
    pub fn push(&self, chunk: &[u8]) {
        if chunk.is_empty() {
            return;
        }
        self.inner
            .bytes
            .lock()
            .expect("capture buffer mutex poisoned")
            .extend_from_slice(chunk);
        self.inner.notify.notify_waiters();
    }

    /// Marks the buffer closed; outstanding and future readers caught up
    /// to the end will observe EOF instead of blocking.
    pub fn close(&self) {
        self.inner
            .closed
            .store(true, std::sync::atomic::Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    /// Returns a snapshot of everything written so far. Used by
    /// `await()` to materialize the final [`crate::command::CommandResult`].
    pub fn snapshot(&self) -> Vec<u8> {
        self.inner
            .bytes
            .lock()
            .expect("capture buffer mutex poisoned")
            .clone()
    }

    pub fn reader(&self) -> CaptureReader {
        CaptureReader {
            inner: self.inner.clone(),
            position: 0,
            mark: 0,
        }
    }
}

/// An independent view over a [`CaptureBuffer`]. Multiple readers may be
/// open simultaneously; each tracks its own read position.
#[derive(Debug, Clone)]
pub struct CaptureReader {
    inner: Arc<Inner>,
    position: usize,
    mark: usize,
}

impl CaptureReader {
    /// Returns the next chunk of unread bytes, blocking until at least
    /// one byte is available or the buffer is closed (in which case an
    /// empty slice means EOF).
    pub async fn read_chunk(&mut self) -> Vec<u8> {
        loop {
            let notified = self.inner.notify.notified();
            {
                let buf = self
                    .inner
                    .bytes
                    .lock()
                    .expect("capture buffer mutex poisoned");
                if self.position < buf.len() {
                    let chunk = buf[self.position..].to_vec();
                    self.position = buf.len();
                    return chunk;
                }
                if self.inner.closed.load(std::sync::atomic::Ordering::SeqCst) {
                    return Vec::new();
                }
            }
            notified.await;
        }
    }

    /// Marks the current position for a later [`Self::reset`].
    pub fn mark(&mut self) {
        self.mark = self.position;
    }

    /// Rewinds to the last [`Self::mark`] (or the start, if never marked).
    pub fn reset(&mut self) {
        self.position = self.mark;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reader_sees_bytes_written_before_it_was_opened() {
        let buf = CaptureBuffer::new();
        buf.push(b"hello");
        let mut reader = buf.reader();
        assert_eq!(reader.read_chunk().await, b"hello");
    }

    #[tokio::test]
    async fn reader_blocks_until_closed_then_returns_eof() {
        let buf = CaptureBuffer::new();
        let mut reader = buf.reader();
        buf.close();
        assert_eq!(reader.read_chunk().await, Vec::<u8>::new());
    }

    #[tokio::test]
    async fn two_readers_each_see_every_byte() {
        let buf = CaptureBuffer::new();
        let mut r1 = buf.reader();
        let mut r2 = buf.reader();
        buf.push(b"abc");
        buf.close();
        assert_eq!(r1.read_chunk().await, b"abc");
        assert_eq!(r2.read_chunk().await, b"abc");
    }

    #[tokio::test]
    async fn mark_and_reset_rewinds_position() {
        let buf = CaptureBuffer::new();
        let mut reader = buf.reader();
        buf.push(b"abc");
        reader.mark();
        assert_eq!(reader.read_chunk().await, b"abc");
        reader.reset();
        buf.close();
        assert_eq!(reader.read_chunk().await, b"abc");
    }
}
