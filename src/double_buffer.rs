// double_buffer.rs — Ping-pong pair.
//
// Two values of identical shape: `front` is read, `back` is written. `swap`
// flips which slot is which; nothing is copied. Used for host vectors by the
// CPU reference relaxations and for `Image2D`s by the GPU pipelines.
//
// Front and back are always different slots of the pair, so a kernel reading
// `front()` and writing `back()` can never alias as long as the two values
// passed to `new` are distinct allocations (which the constructors here and
// in the session guarantee).

#[derive(Debug, Clone)]
pub struct DoubleBuffer<T> {
    slots: [T; 2],
    front: usize,
}

impl<T> DoubleBuffer<T> {
    /// `front` starts as the read side, `back` as the write side.
    pub fn new(front: T, back: T) -> Self {
        DoubleBuffer { slots: [front, back], front: 0 }
    }

    /// Build both halves with the same constructor.
    pub fn from_fn(mut make: impl FnMut() -> T) -> Self {
        DoubleBuffer::new(make(), make())
    }

    /// Fallible variant of `from_fn`, used for device allocations.
    pub fn try_from_fn<E>(mut make: impl FnMut() -> Result<T, E>) -> Result<Self, E> {
        let front = make()?;
        let back = make()?;
        Ok(DoubleBuffer::new(front, back))
    }

    #[inline]
    pub fn front(&self) -> &T {
        &self.slots[self.front]
    }

    #[inline]
    pub fn back(&self) -> &T {
        &self.slots[1 - self.front]
    }

    #[inline]
    pub fn back_mut(&mut self) -> &mut T {
        &mut self.slots[1 - self.front]
    }

    #[inline]
    pub fn front_mut(&mut self) -> &mut T {
        &mut self.slots[self.front]
    }

    /// `(front, back)` at once, for kernels that bind both.
    #[inline]
    pub fn split(&self) -> (&T, &T) {
        (self.front(), self.back())
    }

    /// `(&front, &mut back)` for host-side relaxations.
    pub fn split_mut(&mut self) -> (&T, &mut T) {
        let (a, b) = self.slots.split_at_mut(1);
        if self.front == 0 {
            (&a[0], &mut b[0])
        } else {
            (&b[0], &mut a[0])
        }
    }

    /// Exchange the roles. O(1), no copy. Its own inverse.
    #[inline]
    pub fn swap(&mut self) {
        self.front = 1 - self.front;
    }

    /// Which slot (0 or 1) is currently the front.
    #[inline]
    pub fn front_index(&self) -> usize {
        self.front
    }

    pub fn into_front(self) -> T {
        let [a, b] = self.slots;
        if self.front == 0 {
            a
        } else {
            b
        }
    }
}
