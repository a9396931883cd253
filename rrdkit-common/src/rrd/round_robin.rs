use serde::{Deserialize, Serialize};

/**
Round-robin row buffer.

# Note

Holds `size` rows of `width` values each, and overwrites the oldest row
after writing `size` rows.

# Design

```plain
------------------> Rows order

+-----------------+
|...C P=>.........|
+-----------------+

C: Cursor (most recently written row)
P: Round Robin position (next row to write)
=> : Next position after push()
```

New rows are written at `P` then increment position (or wrap it to 0 if `P >= size`).
The cursor is always the row right before `P`.

*/
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RoundRobinBuffer<T: Sized> {
    pos: usize,
    size: usize,
    width: usize,
    buffer: Box<[T]>,
}

impl<T> RoundRobinBuffer<T>
where
    T: Sized + Default + Copy,
{
    pub fn new(size: usize, width: usize, default: T) -> Self {
        Self {
            pos: 0,
            size,
            width,
            buffer: vec![default; size * width].into_boxed_slice(),
        }
    }

    /// Build a buffer from `size` rows given oldest first, so that the last one lands at `cursor`.
    pub fn restore<'a, I>(size: usize, width: usize, default: T, cursor: usize, rows: I) -> Self
    where
        I: IntoIterator<Item = &'a [T]>,
        T: 'a,
    {
        let mut buffer = Self::new(size, width, default);
        buffer.pos = (cursor + 1) % size;

        // `size` pushes wrap back to the starting position.
        rows.into_iter().take(size).for_each(|row| buffer.push(row));

        buffer
    }

    /// Write a row, overwriting the oldest one.
    pub fn push(&mut self, row: &[T]) {
        debug_assert_eq!(row.len(), self.width);

        let offset = self.pos * self.width;
        self.buffer[offset..offset + self.width].copy_from_slice(row);
        self.pos = (self.pos + 1) % self.size;
    }

    /// Write the same row `count` times. Writing more than `size` rows only
    /// overwrites the same rows again, so at most `size` are written.
    pub fn push_repeated(&mut self, row: &[T], count: u64) {
        let writes = count.min(self.size as u64) as usize;
        let skipped = ((count - writes as u64) % self.size as u64) as usize;

        // Keep the cursor where `count` pushes would have left it.
        self.pos = (self.pos + skipped) % self.size;
        (0..writes).for_each(|_| self.push(row));
    }

    /// Row `age` writes ago (0 is the most recent row).
    pub fn get(&self, age: usize) -> Option<&[T]> {
        if age >= self.size {
            return None;
        }

        let index = (self.pos + self.size - 1 - age) % self.size;
        Some(&self.buffer[index * self.width..(index + 1) * self.width])
    }

    /// Index of the most recently written row.
    pub fn cursor(&self) -> usize {
        (self.pos + self.size - 1) % self.size
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn iter(&self) -> RoundRobinIterator<T> {
        RoundRobinIterator {
            rrb: self,
            pos: self.pos,
            done: false,
        }
    }
}

/**
Iterator for Round-Robin buffer, from the oldest row to the newest.

# Design

```plain
------------------> Rows order

+-----------------+
|...........PS=>..|
+-----------------+

S: Initial iterator position
P: Iterator position
```

Iterate over the buffer, wrapping once until reaching `P` where in this
case `done` is set, and iterator ends at the following `next()`.

*/
#[derive(Debug, Clone)]
pub struct RoundRobinIterator<'a, T: Sized> {
    /// Round-robin buffer being iterated.
    rrb: &'a RoundRobinBuffer<T>,

    /// Row position of the iterator in the buffer.
    pos: usize,

    /// Indicate if the iterator has completed.
    /// We need this as self.rrb.pos contains valid information so we can't rely on `self.pos == self.rrb.pos`
    /// to report end; and we don't want to discard this value.
    done: bool,
}

impl<'a, T: Sized> Iterator for RoundRobinIterator<'a, T> {
    type Item = &'a [T];

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let width = self.rrb.width;
        let value = &self.rrb.buffer[self.pos * width..(self.pos + 1) * width];

        self.pos = (self.pos + 1) % self.rrb.size;

        if self.pos == self.rrb.pos {
            self.done = true;
        }

        Some(value)
    }

    /**
      # Design

      ```plain
      * I < B
      +-----------------+
      |.....I.....B.....|
      +-----------------+

      'I' already wrapped arround, so B - I is remaining count.

      * I > B
      +-----------------+
      |.....B.....I.....|
      +-----------------+

      'I' haven't wrapped arround, so size - I + B is remaining.

      * I = B

      0 if done, size otherwise

      I: Iterator position
      B: Buffer position
      ```
    */
    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = if self.done {
            0
        } else if self.pos < self.rrb.pos {
            self.rrb.pos - self.pos
        } else if self.pos > self.rrb.pos {
            self.rrb.size - self.pos + self.rrb.pos
        } else {
            self.rrb.size
        };

        (remaining, Some(remaining))
    }
}

impl<T: Sized> ExactSizeIterator for RoundRobinIterator<'_, T> {}

#[test]
fn round_robin_test_insert() {
    let mut buffer = RoundRobinBuffer::new(32, 1, f64::NAN);
    assert!(f64::is_nan(buffer.iter().next().unwrap()[0]));

    // Add 32 rows into the buffer.
    (0..32).for_each(|i| buffer.push(&[i as f64]));

    // Rows should come in the same order (we filled the buffer).
    (0..32).zip(buffer.iter()).for_each(|(reference, row)| {
        assert_eq!(reference, row[0] as i32);
    });

    // Overwrite all rows.
    (32..64).for_each(|i| buffer.push(&[i as f64]));

    (32..64).zip(buffer.iter()).for_each(|(reference, row)| {
        assert_eq!(reference, row[0] as i32);
    });
}

#[test]
fn round_robin_test_iter_count() {
    let buffer = RoundRobinBuffer::new(32, 2, f64::NAN);
    assert_eq!(buffer.iter().count(), 32);
    assert_eq!(buffer.iter().len(), 32);

    let buffer = RoundRobinBuffer::new(1, 2, f64::NAN);
    assert_eq!(buffer.iter().count(), 1);
}

#[test]
fn round_robin_test_cursor_and_age() {
    let mut buffer = RoundRobinBuffer::new(3, 2, 0.0);

    buffer.push(&[1.0, 10.0]);
    assert_eq!(buffer.cursor(), 0);
    assert_eq!(buffer.get(0), Some(&[1.0, 10.0][..]));

    buffer.push(&[2.0, 20.0]);
    buffer.push(&[3.0, 30.0]);
    buffer.push(&[4.0, 40.0]);

    // Oldest row (1.0) got overwritten.
    assert_eq!(buffer.cursor(), 0);
    assert_eq!(buffer.get(0), Some(&[4.0, 40.0][..]));
    assert_eq!(buffer.get(2), Some(&[2.0, 20.0][..]));
    assert_eq!(buffer.get(3), None);
}

#[test]
fn round_robin_test_push_repeated() {
    let mut reference = RoundRobinBuffer::new(4, 1, 0.0);
    let mut buffer = reference.clone();

    reference.push(&[1.0]);
    buffer.push(&[1.0]);

    (0..10).for_each(|_| reference.push(&[7.0]));
    buffer.push_repeated(&[7.0], 10);

    assert_eq!(buffer.cursor(), reference.cursor());
    assert!(buffer.iter().eq(reference.iter()));
}

#[test]
fn round_robin_test_restore() {
    let mut buffer = RoundRobinBuffer::new(3, 1, 0.0);
    (1..=5).for_each(|i| buffer.push(&[i as f64]));

    let rows: Vec<&[f64]> = buffer.iter().collect();
    let restored = RoundRobinBuffer::restore(3, 1, 0.0, buffer.cursor(), rows);

    assert_eq!(restored.cursor(), buffer.cursor());
    assert!(restored.iter().eq(buffer.iter()));
}
