//! ISO-BMFF box construction, the write-side counterpart to the box-walking
//! utilities this workspace already carried for MP4 inspection.

use bytes::{BufMut, Bytes, BytesMut};

/// Builds one length-prefixed box (`size` + 4cc + payload), with nested
/// boxes composed by passing their already-built bytes in as a child.
pub struct BoxBuilder {
    box_type: [u8; 4],
    payload: BytesMut,
}

impl BoxBuilder {
    pub fn new(box_type: &[u8; 4]) -> Self {
        Self {
            box_type: *box_type,
            payload: BytesMut::new(),
        }
    }

    pub fn put_u8(mut self, v: u8) -> Self {
        self.payload.put_u8(v);
        self
    }

    pub fn put_u16(mut self, v: u16) -> Self {
        self.payload.put_u16(v);
        self
    }

    pub fn put_u32(mut self, v: u32) -> Self {
        self.payload.put_u32(v);
        self
    }

    pub fn put_u64(mut self, v: u64) -> Self {
        self.payload.put_u64(v);
        self
    }

    pub fn put_i32(mut self, v: i32) -> Self {
        self.payload.put_i32(v);
        self
    }

    pub fn put_bytes(mut self, bytes: &[u8]) -> Self {
        self.payload.put_slice(bytes);
        self
    }

    pub fn put_fourcc(mut self, fourcc: &[u8; 4]) -> Self {
        self.payload.put_slice(fourcc);
        self
    }

    /// Append an already-built child box's bytes.
    pub fn child(mut self, child: Bytes) -> Self {
        self.payload.put_slice(&child);
        self
    }

    pub fn build(self) -> Bytes {
        let size = 8 + self.payload.len();
        let mut out = BytesMut::with_capacity(size);
        out.put_u32(size as u32);
        out.put_slice(&self.box_type);
        out.put_slice(&self.payload);
        out.freeze()
    }
}

/// `ftyp` box, identical for the init segment of every fMP4 track since
/// this crate only ever emits CMAF-compatible fragments.
pub fn ftyp() -> Bytes {
    BoxBuilder::new(b"ftyp")
        .put_fourcc(b"iso5")
        .put_u32(0)
        .put_fourcc(b"iso5")
        .put_fourcc(b"iso6")
        .put_fourcc(b"mp41")
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_correctly_sized_box() {
        let b = BoxBuilder::new(b"free").put_bytes(&[1, 2, 3, 4]).build();
        assert_eq!(b.len(), 12);
        assert_eq!(&b[4..8], b"free");
    }

    #[test]
    fn nests_child_boxes() {
        let child = BoxBuilder::new(b"tkhd").put_u32(1).build();
        let parent = BoxBuilder::new(b"trak").child(child.clone()).build();
        assert_eq!(parent.len(), 8 + child.len());
    }

    #[test]
    fn ftyp_is_well_formed() {
        let b = ftyp();
        let size = u32::from_be_bytes([b[0], b[1], b[2], b[3]]) as usize;
        assert_eq!(size, b.len());
        assert_eq!(&b[4..8], b"ftyp");
    }
}
