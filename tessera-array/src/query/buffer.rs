use std::any::Any;

use tessera_dtype::{NativePType, PType};
use tessera_error::{TesseraResult, tessera_err};
use tessera_schema::Field;

/// A caller-owned buffer with its element type erased.
pub(crate) trait ErasedBuffer: Send {
    fn ptype(&self) -> PType;

    /// The number of elements the buffer holds.
    fn len(&self) -> usize;

    /// The little-endian bytes of every element.
    fn to_le_bytes(&self) -> Vec<u8>;

    /// Overwrite element `idx` with the value encoded in `bytes`.
    fn write_le_at(&mut self, idx: usize, bytes: &[u8]);

    fn as_any(&self) -> &dyn Any;

    fn into_any(self: Box<Self>) -> Box<dyn Any>;
}

pub(crate) struct TypedBuffer<T>(pub(crate) Vec<T>);

impl<T: NativePType> ErasedBuffer for TypedBuffer<T> {
    fn ptype(&self) -> PType {
        T::PTYPE
    }

    fn len(&self) -> usize {
        self.0.len()
    }

    fn to_le_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.0.len() * T::PTYPE.byte_width());
        for &value in &self.0 {
            value.write_le(&mut out);
        }
        out
    }

    fn write_le_at(&mut self, idx: usize, bytes: &[u8]) {
        self.0[idx] = T::read_le(bytes);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }
}

/// A buffer bound to a field of a query.
pub(crate) struct Binding {
    pub(crate) field: Field,
    pub(crate) buffer: Box<dyn ErasedBuffer>,
    /// Elements produced by the last read submission. Write buffers count as fully produced.
    pub(crate) produced: usize,
}

impl Binding {
    pub(crate) fn new<T: NativePType>(field: Field, data: Vec<T>, produced_all: bool) -> Self {
        let produced = if produced_all { data.len() } else { 0 };
        Self {
            field,
            buffer: Box::new(TypedBuffer(data)),
            produced,
        }
    }

    pub(crate) fn typed<T: NativePType>(&self) -> TesseraResult<&[T]> {
        self.buffer
            .as_any()
            .downcast_ref::<TypedBuffer<T>>()
            .map(|b| &b.0[..self.produced])
            .ok_or_else(|| tessera_err!(MismatchedTypes: self.buffer.ptype(), T::PTYPE))
    }

    pub(crate) fn into_typed<T: NativePType>(self) -> TesseraResult<Vec<T>> {
        let ptype = self.buffer.ptype();
        self.buffer
            .into_any()
            .downcast::<TypedBuffer<T>>()
            .map(|b| b.0)
            .map_err(|_| tessera_err!(MismatchedTypes: ptype, T::PTYPE))
    }

    /// Bytes produced by the last submission.
    pub(crate) fn size(&self) -> usize {
        self.produced * self.buffer.ptype().byte_width()
    }
}
