// CLASSIFICATION: COMMUNITY
// Filename: ring.rs v0.3
// Author: Lukas Bower
// Date Modified: 2026-06-27

//! Bounded byte ring between the upload producer and its writer.
//!
//! Single producer, single consumer, copy-in/copy-out semantics. The
//! producer blocks while the ring is full; the consumer pops with a
//! bounded wait so it can notice the closed flag during network stalls.

use std::sync::{Condvar, Mutex};
use std::time::Duration;

/// Result of one bounded pop.
#[derive(Debug, PartialEq, Eq)]
pub enum Pop {
    /// `n` bytes were copied out.
    Data(usize),
    /// Nothing arrived within the wait.
    Empty,
    /// Ring closed and fully drained.
    Closed,
}

struct RingState {
    buf: Box<[u8]>,
    head: usize,
    len: usize,
    closed: bool,
}

pub struct ByteRing {
    state: Mutex<RingState>,
    not_full: Condvar,
    not_empty: Condvar,
}

fn try_alloc(bytes: usize) -> Option<Box<[u8]>> {
    let mut v: Vec<u8> = Vec::new();
    if v.try_reserve_exact(bytes).is_err() {
        return None;
    }
    v.resize(bytes, 0);
    Some(v.into_boxed_slice())
}

impl ByteRing {
    /// Allocate the ring, preferring `primary` bytes and falling back to
    /// `fallback`. Returns `None` when neither allocation succeeds.
    pub fn allocate(primary: usize, fallback: usize) -> Option<ByteRing> {
        let buf = try_alloc(primary).or_else(|| try_alloc(fallback))?;
        Some(ByteRing {
            state: Mutex::new(RingState {
                buf,
                head: 0,
                len: 0,
                closed: false,
            }),
            not_full: Condvar::new(),
            not_empty: Condvar::new(),
        })
    }

    pub fn capacity(&self) -> usize {
        self.state.lock().unwrap().buf.len()
    }

    /// Copy `data` in, blocking while the ring is full. Fails only when
    /// the ring has been closed underneath the producer.
    pub fn push(&self, data: &[u8]) -> Result<(), ()> {
        let mut remaining = data;
        while !remaining.is_empty() {
            let mut st = self.state.lock().unwrap();
            while st.len == st.buf.len() && !st.closed {
                st = self.not_full.wait(st).unwrap();
            }
            if st.closed {
                return Err(());
            }
            let cap = st.buf.len();
            let free = cap - st.len;
            let n = free.min(remaining.len());
            let tail = (st.head + st.len) % cap;
            let first = n.min(cap - tail);
            st.buf[tail..tail + first].copy_from_slice(&remaining[..first]);
            if n > first {
                let wrapped = n - first;
                st.buf[..wrapped].copy_from_slice(&remaining[first..n]);
            }
            st.len += n;
            remaining = &remaining[n..];
            drop(st);
            self.not_empty.notify_one();
        }
        Ok(())
    }

    /// Copy up to `out.len()` bytes out, waiting at most `timeout` for
    /// data to arrive.
    pub fn pop(&self, out: &mut [u8], timeout: Duration) -> Pop {
        let mut st = self.state.lock().unwrap();
        if st.len == 0 {
            if st.closed {
                return Pop::Closed;
            }
            let (next, _timed_out) = self.not_empty.wait_timeout(st, timeout).unwrap();
            st = next;
            if st.len == 0 {
                return if st.closed { Pop::Closed } else { Pop::Empty };
            }
        }
        let cap = st.buf.len();
        let n = st.len.min(out.len());
        let head = st.head;
        let first = n.min(cap - head);
        out[..first].copy_from_slice(&st.buf[head..head + first]);
        if n > first {
            let wrapped = n - first;
            out[first..n].copy_from_slice(&st.buf[..wrapped]);
        }
        st.head = (head + n) % cap;
        st.len -= n;
        drop(st);
        self.not_full.notify_one();
        Pop::Data(n)
    }

    /// Signal end of input. The consumer drains what is buffered, then
    /// sees [`Pop::Closed`].
    pub fn close(&self) {
        let mut st = self.state.lock().unwrap();
        st.closed = true;
        drop(st);
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }
}
