//! Byte and human-readable text encodings of crypto primitives.
use anyhow::Context as _;

/// Cursor over a text being decoded. Keeps the whole input around, so that
/// errors can say how far parsing got.
pub struct Text<'a> {
    context: &'a str,
    inner: &'a str,
}

impl<'a> Text<'a> {
    /// Wraps a text to be decoded.
    pub fn new(s: &'a str) -> Self {
        Self {
            context: s,
            inner: s,
        }
    }

    /// Already consumed prefix.
    fn prefix(&self) -> &'a str {
        &self.context[..self.context.len() - self.inner.len()]
    }

    /// Consumes a fixed prefix.
    pub fn strip(mut self, prefix: &str) -> anyhow::Result<Self> {
        let Some(inner) = self.inner.strip_prefix(prefix) else {
            anyhow::bail!("{}: expected {} got {}", self.prefix(), prefix, self.inner);
        };
        self.inner = inner;
        Ok(self)
    }

    /// Decodes the rest of the text as hex, then as `T`.
    pub fn decode_hex<T: ByteFmt>(self) -> anyhow::Result<T> {
        let raw = hex::decode(self.inner).context(self.prefix().to_owned())?;
        ByteFmt::decode(&raw).context(self.prefix().to_owned())
    }

    /// Syntax sugar for `<T as TextFmt>::decode(self)`.
    pub fn decode<T: TextFmt>(self) -> anyhow::Result<T> {
        TextFmt::decode(self)
    }
}

/// Human-readable encoding. `decode(encode(x)) == x` has to hold, and
/// encodings of different types should not collide (hence type prefixes such
/// as `validator:public:ed25519:`).
pub trait TextFmt: Sized {
    /// Decodes the value.
    fn decode(text: Text) -> anyhow::Result<Self>;
    /// Encodes the value.
    fn encode(&self) -> String;
}

/// Binary encoding. `decode(encode(x)) == x` has to hold.
pub trait ByteFmt: Sized {
    /// Decodes the value.
    fn decode(bytes: &[u8]) -> anyhow::Result<Self>;
    /// Encodes the value.
    fn encode(&self) -> Vec<u8>;
}

impl ByteFmt for Vec<u8> {
    fn decode(bytes: &[u8]) -> anyhow::Result<Self> {
        Ok(bytes.to_vec())
    }

    fn encode(&self) -> Vec<u8> {
        self.clone()
    }
}
