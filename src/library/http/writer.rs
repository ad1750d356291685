/// A message that can be serialized as a sequence of byte segments.
///
/// The segment list must be identical across calls for an unmodified message, so a
/// [`MessageWriter`] can resume where the previous buffer ran out.
pub trait Message {
    fn segments(&self) -> Vec<&[u8]>;
}

/// Remembers how many bytes of a message were emitted so far.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MessageWriter {
    written: usize,
}

impl MessageWriter {
    /// Copies the next part of `message` into `buf`.
    ///
    /// Returns `(complete, bytes_written)`. Never writes past `buf.len()`; when the
    /// message does not fit, `complete` is false and the next call continues with the
    /// first byte that was left out.
    pub fn write<M: Message + ?Sized>(&mut self, message: &M, buf: &mut [u8]) -> (bool, usize) {
        let mut skip: usize = self.written;
        let mut n: usize = 0;
        for segment in message.segments() {
            if skip >= segment.len() {
                skip -= segment.len();
                continue;
            }
            let segment: &[u8] = &segment[skip..];
            skip = 0;
            let room: usize = buf.len() - n;
            if segment.len() > room {
                buf[n..].copy_from_slice(&segment[..room]);
                n += room;
                self.written += n;
                return (false, n);
            }
            buf[n..n + segment.len()].copy_from_slice(segment);
            n += segment.len();
        }
        self.written += n;
        (true, n)
    }

    #[inline(always)]
    pub fn written(&self) -> usize {
        self.written
    }
}

/// A message together with its write progress, kept while it is flushed in pieces.
#[derive(Debug)]
pub struct PendingWrite<M> {
    message: M,
    writer: MessageWriter,
    complete: bool,
}

impl<M: Message> PendingWrite<M> {
    pub fn new(message: M) -> Self {
        Self {
            message,
            writer: MessageWriter::default(),
            complete: false,
        }
    }

    /// Fills `buf` with the next chunk. See [`MessageWriter::write`].
    pub fn fill(&mut self, buf: &mut [u8]) -> (bool, usize) {
        let (complete, n) = self.writer.write(&self.message, buf);
        self.complete = complete;
        (complete, n)
    }

    #[inline(always)]
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    #[inline(always)]
    pub fn message(&self) -> &M {
        &self.message
    }
}

/// Serializes `message` into `buf` in one go; `complete` is false if it did not fit.
pub fn write_message<M: Message + ?Sized>(message: &M, buf: &mut [u8]) -> (bool, usize) {
    MessageWriter::default().write(message, buf)
}
