//! On-flash header formats.

use core::fmt;

pub type ObjId = u16;
pub type SpanIx = u16;
pub type PageIx = u32;

pub const NAME_LEN: usize = 16;
pub const OBJ_ID_BITS: u32 = 16;
pub const SPAN_IX_BITS: u32 = 16;
pub const WORD_ALIGN: u32 = 4;

/// Length of an object that was created but never written.
pub const UNDEF_LEN: u32 = u32::MAX;

pub const SECTOR_HDR_SIZE: u32 = 8;
pub const PAGE_HDR_SIZE: u32 = 8;
pub const OBJ_HDR_SIZE: u32 = 32;
pub const LIN_HDR_SIZE: u32 = 40;

pub const OFFS_ID: u32 = 0;
pub const OFFS_FLAG: u32 = 4;
pub const OFFS_LEN: u32 = 8;
pub const OFFS_NAME: u32 = 12;
pub const OFFS_TYPE: u32 = 28;
pub const OFFS_START_SECTOR: u32 = 32;
pub const OFFS_RESV_SECTORS: u32 = 36;

pub(crate) fn le_u32(raw: &[u8], offs: u32) -> u32 {
    let offs = offs as usize;
    let mut word = [0u8; 4];
    word.copy_from_slice(&raw[offs..offs + 4]);
    u32::from_le_bytes(word)
}

pub(crate) fn put_le_u32(raw: &mut [u8], offs: u32, value: u32) {
    let offs = offs as usize;
    raw[offs..offs + 4].copy_from_slice(&value.to_le_bytes());
}

/// Packed page id, object id in the high bits, span index in the low bits.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct PageId(u32);

impl PageId {
    pub const FREE: Self = Self(u32::MAX);
    pub const DELETED: Self = Self(0);

    const SPAN_MASK: u32 = (1 << SPAN_IX_BITS) - 1;
    const OBJ_MASK: u32 = (1 << OBJ_ID_BITS) - 1;

    pub const fn new(obj_id: ObjId, spix: SpanIx) -> Self {
        Self(((obj_id as u32 & Self::OBJ_MASK) << SPAN_IX_BITS) | (spix as u32 & Self::SPAN_MASK))
    }

    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }

    pub const fn obj_id(self) -> ObjId {
        ((self.0 >> SPAN_IX_BITS) & Self::OBJ_MASK) as ObjId
    }

    pub const fn spix(self) -> SpanIx {
        (self.0 & Self::SPAN_MASK) as SpanIx
    }

    pub const fn is_free(self) -> bool {
        self.0 == Self::FREE.0
    }

    pub const fn is_deleted(self) -> bool {
        self.0 == Self::DELETED.0
    }

    /// Neither of the reserved object ids (zero, all ones).
    pub const fn is_valid(self) -> bool {
        let obj_id = self.obj_id() as u32;
        obj_id != 0 && obj_id != Self::OBJ_MASK
    }

    pub const fn is_object_header(self) -> bool {
        self.is_valid() && self.spix() == 0
    }
}

impl fmt::Debug for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x}:{:04x}", self.obj_id(), self.spix())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Flag {
    Clean,
    Written,
    Moving,
    Bad(u32),
}

impl Flag {
    const CLEAN: u32 = u32::MAX;
    const WRITTEN: u32 = 1;
    const MOVING: u32 = 0;

    pub const fn from_raw(raw: u32) -> Self {
        match raw {
            Self::CLEAN => Flag::Clean,
            Self::WRITTEN => Flag::Written,
            Self::MOVING => Flag::Moving,
            other => Flag::Bad(other),
        }
    }

    pub const fn raw(self) -> u32 {
        match self {
            Flag::Clean => Self::CLEAN,
            Flag::Written => Self::WRITTEN,
            Flag::Moving => Self::MOVING,
            Flag::Bad(raw) => raw,
        }
    }

    pub const fn is_valid(self) -> bool {
        !matches!(self, Flag::Bad(_))
    }
}

/// Flag to give the destination of a page move.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MoveFlag {
    /// `CLEAN` stays `CLEAN`, `MOVING` stays `MOVING`, anything else becomes `WRITTEN`.
    Keep,
    Force(Flag),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PageHdr {
    pub id: PageId,
    pub flag: Flag,
}

impl PageHdr {
    pub fn decode(raw: &[u8]) -> Self {
        Self {
            id: PageId::from_raw(le_u32(raw, OFFS_ID)),
            flag: Flag::from_raw(le_u32(raw, OFFS_FLAG)),
        }
    }

    pub fn encode(&self, raw: &mut [u8]) {
        put_le_u32(raw, OFFS_ID, self.id.raw());
        put_le_u32(raw, OFFS_FLAG, self.flag.raw());
    }

    /// Allocated and not deleted.
    pub const fn is_used(&self) -> bool {
        !self.id.is_free() && !self.id.is_deleted()
    }

    pub fn is_free_clean(&self) -> bool {
        self.id.is_free() && self.flag == Flag::Clean
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileType {
    File,
    Linear,
    Other(u8),
}

impl FileType {
    pub const fn from_raw(raw: u8) -> Self {
        match raw {
            0 => FileType::File,
            1 => FileType::Linear,
            other => FileType::Other(other),
        }
    }

    pub const fn raw(self) -> u8 {
        match self {
            FileType::File => 0,
            FileType::Linear => 1,
            FileType::Other(raw) => raw,
        }
    }
}

/// Fixed size, zero padded file name.
///
/// Names longer than [`NAME_LEN`] bytes are cut, a NUL byte ends the name.
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct Name([u8; NAME_LEN]);

impl Name {
    pub fn new(name: &str) -> Self {
        let mut raw = [0u8; NAME_LEN];
        for (dst, &src) in raw.iter_mut().zip(name.as_bytes()) {
            if src == 0 {
                break;
            }
            *dst = src;
        }
        Self(raw)
    }

    pub const fn from_raw(raw: [u8; NAME_LEN]) -> Self {
        Self(raw)
    }

    pub const fn raw(&self) -> &[u8; NAME_LEN] {
        &self.0
    }

    /// Name bytes up to the first NUL.
    pub fn as_bytes(&self) -> &[u8] {
        let len = self.0.iter().position(|&b| b == 0).unwrap_or(NAME_LEN);
        &self.0[..len]
    }

    /// The name, or the empty string if it is not UTF-8.
    pub fn as_str(&self) -> &str {
        core::str::from_utf8(self.as_bytes()).unwrap_or("")
    }

    pub fn matches(&self, name: &str) -> bool {
        Name::new(name).as_bytes() == self.as_bytes()
    }
}

impl fmt::Debug for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.as_str())
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SectorHdr {
    pub era_cnt: u32,
    pub magic: u32,
}

impl SectorHdr {
    pub fn decode(raw: &[u8; SECTOR_HDR_SIZE as usize]) -> Self {
        Self {
            era_cnt: le_u32(raw, 0),
            magic: le_u32(raw, 4),
        }
    }

    pub fn encode(&self) -> [u8; SECTOR_HDR_SIZE as usize] {
        let mut raw = [0u8; SECTOR_HDR_SIZE as usize];
        put_le_u32(&mut raw, 0, self.era_cnt);
        put_le_u32(&mut raw, 4, self.magic);
        raw
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ObjectHdr {
    pub phdr: PageHdr,
    pub len: u32,
    pub name: Name,
    pub ftype: FileType,
}

impl ObjectHdr {
    /// Interprets the first [`OBJ_HDR_SIZE`] bytes as an object header,
    /// whatever the page actually holds.
    pub fn decode(raw: &[u8]) -> Self {
        let mut name = [0u8; NAME_LEN];
        name.copy_from_slice(&raw[OFFS_NAME as usize..OFFS_NAME as usize + NAME_LEN]);
        Self {
            phdr: PageHdr::decode(raw),
            len: le_u32(raw, OFFS_LEN),
            name: Name::from_raw(name),
            ftype: FileType::from_raw(raw[OFFS_TYPE as usize]),
        }
    }

    /// Writes the header into `raw`, padding is left erased.
    pub fn encode(&self, raw: &mut [u8]) {
        raw[..OBJ_HDR_SIZE as usize].fill(0xff);
        self.phdr.encode(raw);
        put_le_u32(raw, OFFS_LEN, self.len);
        raw[OFFS_NAME as usize..OFFS_NAME as usize + NAME_LEN].copy_from_slice(self.name.raw());
        raw[OFFS_TYPE as usize] = self.ftype.raw();
    }

    /// Length in bytes, an undefined length reads as empty.
    pub const fn file_len(&self) -> u32 {
        if self.len == UNDEF_LEN {
            0
        } else {
            self.len
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LinearFileHdr {
    pub ohdr: ObjectHdr,
    /// Absolute sector index.
    pub start_sector: u32,
    pub resv_sectors: u32,
}

impl LinearFileHdr {
    pub fn decode(raw: &[u8]) -> Self {
        Self {
            ohdr: ObjectHdr::decode(raw),
            start_sector: le_u32(raw, OFFS_START_SECTOR),
            resv_sectors: le_u32(raw, OFFS_RESV_SECTORS),
        }
    }

    pub fn encode(&self, raw: &mut [u8]) {
        self.ohdr.encode(raw);
        put_le_u32(raw, OFFS_START_SECTOR, self.start_sector);
        put_le_u32(raw, OFFS_RESV_SECTORS, self.resv_sectors);
    }
}

/// A page header as seen by the traversal, with the object header decoded
/// where the id says there is one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Header {
    Page(PageHdr),
    Object(ObjectHdr),
    Linear(LinearFileHdr),
}

impl Header {
    pub fn decode(raw: &[u8; LIN_HDR_SIZE as usize]) -> Self {
        let phdr = PageHdr::decode(raw);
        if !phdr.id.is_object_header() {
            return Header::Page(phdr);
        }
        let ohdr = ObjectHdr::decode(raw);
        match ohdr.ftype {
            FileType::Linear => Header::Linear(LinearFileHdr::decode(raw)),
            _ => Header::Object(ohdr),
        }
    }

    pub fn phdr(&self) -> &PageHdr {
        match self {
            Header::Page(phdr) => phdr,
            Header::Object(ohdr) => &ohdr.phdr,
            Header::Linear(lhdr) => &lhdr.ohdr.phdr,
        }
    }

    pub fn object(&self) -> Option<&ObjectHdr> {
        match self {
            Header::Page(_) => None,
            Header::Object(ohdr) => Some(ohdr),
            Header::Linear(lhdr) => Some(&lhdr.ohdr),
        }
    }

    pub fn linear(&self) -> Option<&LinearFileHdr> {
        match self {
            Header::Linear(lhdr) => Some(lhdr),
            _ => None,
        }
    }
}
