//! The wire framing for the hub protocol.
//!
//! A frame is a 6 byte header followed by `data_len` bytes of body:
//!
//! ```text
//! [ data_len: u16 ][ request_id: u16 ][ count: u16 ][ components... ]
//! ```
//!
//! Each component is a NUL-terminated byte string; `data_len` covers the
//! component bytes plus their terminators but not the header itself. All
//! integers are big-endian (network byte order), matching spec.md's wire
//! format rather than the little-endian length prefixes shpool used for its
//! MsgPack headers.

use std::io::{self, Read, Write};

use anyhow::{anyhow, Context};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

/// Protocol ceiling: `data_len` is a u16, so the body can never exceed this.
pub const MAX_DATA_LEN: usize = u16::MAX as usize;

/// request_id of zero means "no response expected".
pub const NO_RESPONSE: u16 = 0;

/// A parsed or about-to-be-sent message: a request id plus an ordered list
/// of components. `components[0]` is the namespace tag, `components[1]` the
/// verb within that namespace (see dispatch.rs).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub request_id: u16,
    pub components: Vec<Vec<u8>>,
}

impl Message {
    pub fn new(request_id: u16, components: Vec<impl Into<Vec<u8>>>) -> Message {
        Message { request_id, components: components.into_iter().map(Into::into).collect() }
    }

    /// Build a message with no response expected (request_id = 0), the
    /// common case for broadcasts and fan-outs.
    pub fn unsolicited(components: Vec<impl Into<Vec<u8>>>) -> Message {
        Message::new(NO_RESPONSE, components)
    }

    pub fn component_str(&self, idx: usize) -> anyhow::Result<&str> {
        let bytes = self
            .components
            .get(idx)
            .ok_or_else(|| anyhow!("missing component {}", idx))?;
        std::str::from_utf8(bytes).context("component is not valid utf8")
    }

    /// Pack this message into its wire representation.
    ///
    /// Returns an error if the packed body would overflow the u16 `data_len`
    /// or component `count` fields.
    pub fn pack(&self) -> anyhow::Result<Vec<u8>> {
        let count: u16 = self
            .components
            .len()
            .try_into()
            .map_err(|_| anyhow!("too many components ({})", self.components.len()))?;

        let mut body = Vec::new();
        for component in &self.components {
            body.extend_from_slice(component);
            body.push(0);
        }
        let data_len: u16 = body
            .len()
            .try_into()
            .map_err(|_| anyhow!("message body too large ({} bytes)", body.len()))?;

        let mut out = Vec::with_capacity(6 + body.len());
        out.write_u16::<BigEndian>(data_len)?;
        out.write_u16::<BigEndian>(self.request_id)?;
        out.write_u16::<BigEndian>(count)?;
        out.extend_from_slice(&body);
        Ok(out)
    }

    /// Read a single frame off `r`, blocking until the whole frame has
    /// arrived or an I/O error (including a clean EOF) occurs.
    pub fn read_from(r: &mut impl Read) -> io::Result<Message> {
        let data_len = r.read_u16::<BigEndian>()?;
        let request_id = r.read_u16::<BigEndian>()?;
        let count = r.read_u16::<BigEndian>()?;

        let mut body = vec![0u8; data_len as usize];
        r.read_exact(&mut body)?;

        let components = split_components(&body, count)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;

        Ok(Message { request_id, components })
    }

    pub fn write_to(&self, w: &mut impl Write) -> anyhow::Result<()> {
        let packed = self.pack()?;
        w.write_all(&packed).context("writing packed frame")?;
        Ok(())
    }
}

/// Split `body` on NUL bytes into exactly `count` components. A frame whose
/// NUL count disagrees with its declared component count is malformed and
/// rejected (the caller kicks the session with "Illegal message").
fn split_components(body: &[u8], count: u16) -> anyhow::Result<Vec<Vec<u8>>> {
    let mut components = Vec::with_capacity(count as usize);
    let mut start = 0;
    for (i, &b) in body.iter().enumerate() {
        if b == 0 {
            components.push(body[start..i].to_vec());
            start = i + 1;
        }
    }

    if start != body.len() {
        return Err(anyhow!(
            "frame body did not end on a component terminator (trailing {} bytes)",
            body.len() - start
        ));
    }
    if components.len() != count as usize {
        return Err(anyhow!(
            "declared component count {} does not match {} terminators found",
            count,
            components.len()
        ));
    }

    Ok(components)
}
