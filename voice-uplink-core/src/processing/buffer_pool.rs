use crate::models::error::CaptureError;

/// Lifecycle of a pool slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// Buffer is home in the pool.
    Free,
    /// Buffer was handed to the input queue and is waiting to be filled.
    Enqueued,
    /// Buffer came back from the input queue with captured audio.
    Filled,
}

/// A fixed-capacity capture buffer.
///
/// Not `Clone`: a `CaptureBuffer` is the capability to write into one pool
/// slot, and it moves between the pool, the input queue and the capture
/// callback by value.
#[derive(Debug)]
pub struct CaptureBuffer {
    slot: usize,
    data: Box<[u8]>,
    len: usize,
}

impl CaptureBuffer {
    fn new(slot: usize, capacity: usize) -> Self {
        Self {
            slot,
            data: vec![0u8; capacity].into_boxed_slice(),
            len: 0,
        }
    }

    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len == self.data.len()
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.len
    }

    /// The captured bytes.
    pub fn filled(&self) -> &[u8] {
        &self.data[..self.len]
    }

    /// Append as many bytes as fit; returns how many were taken.
    pub fn append(&mut self, bytes: &[u8]) -> usize {
        let take = bytes.len().min(self.remaining());
        self.data[self.len..self.len + take].copy_from_slice(&bytes[..take]);
        self.len += take;
        take
    }

    /// Shrink the fill length to at most `len`, e.g. to drop a trailing partial packet.
    pub fn truncate(&mut self, len: usize) {
        self.len = self.len.min(len);
    }

    pub fn clear(&mut self) {
        self.len = 0;
    }
}

struct Slot {
    state: SlotState,
    buffer: Option<CaptureBuffer>,
}

/// Fixed set of reusable capture buffers.
///
/// Only slot bookkeeping lives here; a lent buffer is physically moved out
/// and comes back through [`BufferPool::restore`]. Wrap in
/// `parking_lot::Mutex` when the capture callback and the controller share it.
pub struct BufferPool {
    slots: Vec<Slot>,
    buffer_capacity: usize,
}

impl BufferPool {
    pub fn new(count: usize, buffer_capacity: usize) -> Self {
        let slots = (0..count)
            .map(|slot| Slot {
                state: SlotState::Free,
                buffer: Some(CaptureBuffer::new(slot, buffer_capacity)),
            })
            .collect();
        Self { slots, buffer_capacity }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn buffer_capacity(&self) -> usize {
        self.buffer_capacity
    }

    pub fn state(&self, slot: usize) -> Option<SlotState> {
        self.slots.get(slot).map(|s| s.state)
    }

    pub fn states(&self) -> Vec<SlotState> {
        self.slots.iter().map(|s| s.state).collect()
    }

    pub fn count_in(&self, state: SlotState) -> usize {
        self.slots.iter().filter(|s| s.state == state).count()
    }

    /// Hand out the buffer of a free slot for enqueueing. Free → Enqueued.
    pub fn lend(&mut self, slot: usize) -> Result<CaptureBuffer, CaptureError> {
        let entry = self.slot_mut(slot)?;
        if entry.state != SlotState::Free {
            return Err(CaptureError::BufferState(format!(
                "slot {} is {:?}, expected Free",
                slot, entry.state
            )));
        }
        let mut buffer = entry
            .buffer
            .take()
            .ok_or_else(|| CaptureError::BufferState(format!("slot {} has no buffer", slot)))?;
        buffer.clear();
        entry.state = SlotState::Enqueued;
        Ok(buffer)
    }

    /// Lend every slot, in slot order.
    pub fn lend_all(&mut self) -> Result<Vec<CaptureBuffer>, CaptureError> {
        (0..self.slots.len()).map(|slot| self.lend(slot)).collect()
    }

    /// Record that the input queue delivered this slot's buffer. Enqueued → Filled.
    pub fn mark_filled(&mut self, slot: usize) -> Result<(), CaptureError> {
        self.transition(slot, SlotState::Enqueued, SlotState::Filled)
    }

    /// Record that a delivered buffer is going straight back to the input queue.
    /// Filled → Enqueued.
    pub fn mark_requeued(&mut self, slot: usize) -> Result<(), CaptureError> {
        self.transition(slot, SlotState::Filled, SlotState::Enqueued)
    }

    /// Return a buffer to its slot. Any lent state → Free.
    pub fn restore(&mut self, mut buffer: CaptureBuffer) -> Result<(), CaptureError> {
        let slot = buffer.slot();
        let entry = self.slot_mut(slot)?;
        if entry.buffer.is_some() {
            return Err(CaptureError::BufferState(format!(
                "slot {} already holds its buffer",
                slot
            )));
        }
        buffer.clear();
        entry.buffer = Some(buffer);
        entry.state = SlotState::Free;
        Ok(())
    }

    fn transition(
        &mut self,
        slot: usize,
        from: SlotState,
        to: SlotState,
    ) -> Result<(), CaptureError> {
        let entry = self.slot_mut(slot)?;
        if entry.state != from {
            return Err(CaptureError::BufferState(format!(
                "slot {} is {:?}, expected {:?}",
                slot, entry.state, from
            )));
        }
        entry.state = to;
        Ok(())
    }

    fn slot_mut(&mut self, slot: usize) -> Result<&mut Slot, CaptureError> {
        self.slots
            .get_mut(slot)
            .ok_or_else(|| CaptureError::BufferState(format!("no slot {}", slot)))
    }
}
