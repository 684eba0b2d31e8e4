//! Table-driven wire layouts.
//!
//! Every message in this crate is described by a [`Layout`]: a constant byte
//! prefix followed by a list of fields, each with a fixed width and byte
//! order. One encoder and one decoder walk the table, so no message type packs
//! bytes by hand.

use bytes::{BufMut, BytesMut};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    U8,
    U16Be,
    U16Le,
    U32Le,
    /// Opaque bytes of exactly this length.
    Fixed(usize),
    /// Everything up to the end of the message. Only valid as the last field.
    Tail,
}

impl FieldKind {
    const fn width(self) -> usize {
        match self {
            FieldKind::U8 => 1,
            FieldKind::U16Be | FieldKind::U16Le => 2,
            FieldKind::U32Le => 4,
            FieldKind::Fixed(n) => n,
            FieldKind::Tail => 0,
        }
    }
}

fn narrow<T: TryFrom<u32>>(field: &Field, value: u32) -> Result<T> {
    T::try_from(value).map_err(|_| Error::FieldOverflow {
        field: field.name,
        value,
    })
}

#[derive(Debug, Clone, Copy)]
pub struct Field {
    pub name: &'static str,
    pub kind: FieldKind,
}

impl Field {
    pub const fn new(name: &'static str, kind: FieldKind) -> Self {
        Self { name, kind }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Value<'a> {
    Int(u32),
    Bytes(&'a [u8]),
}

impl<'a> Value<'a> {
    pub fn as_int(&self) -> Option<u32> {
        match *self {
            Value::Int(v) => Some(v),
            Value::Bytes(_) => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&'a [u8]> {
        match *self {
            Value::Bytes(b) => Some(b),
            Value::Int(_) => None,
        }
    }
}

#[derive(Debug)]
pub struct Layout {
    pub name: &'static str,
    pub prefix: &'static [u8],
    pub fields: &'static [Field],
}

impl Layout {
    /// Length of the prefix plus every fixed-width field.
    pub const fn fixed_len(&self) -> usize {
        let mut len = self.prefix.len();
        let mut i = 0;
        while i < self.fields.len() {
            len += self.fields[i].kind.width();
            i += 1;
        }
        len
    }

    fn has_tail(&self) -> bool {
        matches!(self.fields.last(), Some(f) if f.kind == FieldKind::Tail)
    }

    pub fn encode(&self, values: &[Value<'_>], out: &mut BytesMut) -> Result<()> {
        if values.len() != self.fields.len() {
            return Err(Error::Protocol(format!(
                "{}: expected {} values, got {}",
                self.name,
                self.fields.len(),
                values.len()
            )));
        }

        out.reserve(self.fixed_len());
        out.put_slice(self.prefix);

        for (i, (field, value)) in self.fields.iter().zip(values).enumerate() {
            match (field.kind, *value) {
                (FieldKind::Tail, _) if i + 1 != self.fields.len() => {
                    return Err(Error::Protocol(format!(
                        "{}: tail field {} is not last",
                        self.name, field.name
                    )));
                }
                (FieldKind::Tail, Value::Bytes(b)) => out.put_slice(b),
                (FieldKind::Fixed(n), Value::Bytes(b)) => {
                    if b.len() != n {
                        return Err(Error::Protocol(format!(
                            "{}: field {} needs {} bytes, got {}",
                            self.name,
                            field.name,
                            n,
                            b.len()
                        )));
                    }
                    out.put_slice(b);
                }
                (FieldKind::U8, Value::Int(v)) => out.put_u8(narrow(field, v)?),
                (FieldKind::U16Be, Value::Int(v)) => out.put_u16(narrow(field, v)?),
                (FieldKind::U16Le, Value::Int(v)) => out.put_u16_le(narrow(field, v)?),
                (FieldKind::U32Le, Value::Int(v)) => out.put_u32_le(v),
                (kind, value) => {
                    return Err(Error::Protocol(format!(
                        "{}: field {} ({:?}) cannot hold {:?}",
                        self.name, field.name, kind, value
                    )));
                }
            }
        }

        Ok(())
    }

    pub fn to_bytes(&self, values: &[Value<'_>]) -> Result<BytesMut> {
        let mut buf = BytesMut::with_capacity(self.fixed_len());
        self.encode(values, &mut buf)?;
        Ok(buf)
    }

    pub fn decode<'a>(&self, raw: &'a [u8]) -> Result<Vec<Value<'a>>> {
        let need = self.fixed_len();
        if raw.len() < need {
            return Err(Error::Truncated {
                what: self.name,
                need,
                got: raw.len(),
            });
        }
        if !self.has_tail() && raw.len() != need {
            return Err(Error::Protocol(format!(
                "{}: expected {} bytes, got {}",
                self.name,
                need,
                raw.len()
            )));
        }
        if !raw.starts_with(self.prefix) {
            return Err(Error::Protocol(format!(
                "{}: prefix mismatch, got {:02x?}",
                self.name,
                &raw[..self.prefix.len()]
            )));
        }

        let mut pos = self.prefix.len();
        let mut values = Vec::with_capacity(self.fields.len());

        for field in self.fields {
            let value = match field.kind {
                FieldKind::U8 => Value::Int(raw[pos] as u32),
                FieldKind::U16Be => Value::Int(u16::from_be_bytes([raw[pos], raw[pos + 1]]) as u32),
                FieldKind::U16Le => Value::Int(u16::from_le_bytes([raw[pos], raw[pos + 1]]) as u32),
                FieldKind::U32Le => Value::Int(u32::from_le_bytes([
                    raw[pos],
                    raw[pos + 1],
                    raw[pos + 2],
                    raw[pos + 3],
                ])),
                FieldKind::Fixed(n) => Value::Bytes(&raw[pos..pos + n]),
                FieldKind::Tail => Value::Bytes(&raw[pos..]),
            };
            pos += field.kind.width();
            values.push(value);
        }

        Ok(values)
    }
}
