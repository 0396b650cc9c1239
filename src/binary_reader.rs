//! C1: ELF32 container parsing for the MIPS target.
//!
//! Decodes just enough of the ELF32 header/section/segment layout to locate
//! the `.mdebug` payload and translate file offsets to virtual addresses.
//! Ported from the teacher's `File::open_stream`/`read_u16!` family, scoped
//! down to 32-bit little-endian MIPS per this crate's target.

use crate::error::{Error, Result};
use byteorder::{LittleEndian, ReadBytesExt};
use num_enum::TryFromPrimitive;
use std::convert::TryFrom;
use std::io::{self, Cursor, Read, Seek, SeekFrom};

const EI_NIDENT: usize = 16;
const ELFMAG: [u8; 4] = [0x7f, 0x45, 0x4c, 0x46];
const EI_CLASS: usize = 4;
const EI_DATA: usize = 5;

const ELFCLASS32: u8 = 1;
const ELFDATA2LSB: u8 = 1;
const EM_MIPS: u16 = 8;

/// MIPS-specific section type tag carrying the `.mdebug` payload.
pub const MIPS_DEBUG: u32 = 0x7000_0005;

#[derive(Copy, Clone, Debug, PartialEq, Eq, TryFromPrimitive)]
#[repr(u32)]
pub enum SectionType {
    Null = 0x0,
    Progbits = 0x1,
    Symtab = 0x2,
    Strtab = 0x3,
    Rela = 0x4,
    Hash = 0x5,
    Dynamic = 0x6,
    Note = 0x7,
    Nobits = 0x8,
    Rel = 0x9,
    Shlib = 0xa,
    Dynsym = 0xb,
}

/// Section types that fall outside the plain `TryFromPrimitive` range (e.g.
/// processor-specific tags) are kept as a raw value rather than rejected.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SectionKind {
    Known(SectionType),
    MipsDebug,
    Raw(u32),
}

impl SectionKind {
    fn from_raw(value: u32) -> SectionKind {
        if value == MIPS_DEBUG {
            SectionKind::MipsDebug
        } else if let Ok(known) = SectionType::try_from(value) {
            SectionKind::Known(known)
        } else {
            SectionKind::Raw(value)
        }
    }
}

#[derive(Clone, Debug)]
pub struct Section {
    pub name: String,
    pub file_offset: u32,
    pub size: u32,
    pub kind: SectionKind,
    pub virtual_address: Option<u32>,
}

#[derive(Copy, Clone, Debug)]
pub struct Segment {
    pub file_offset: u32,
    pub size: u32,
    pub virtual_address: u32,
}

/// A parsed ELF32 MIPS image. Immutable after construction.
pub struct ElfImage {
    pub bytes: Vec<u8>,
    pub entry: u32,
    pub sections: Vec<Section>,
    pub segments: Vec<Segment>,
}

impl ElfImage {
    pub fn parse(bytes: Vec<u8>) -> Result<ElfImage> {
        let mut cursor = Cursor::new(&bytes);

        let mut ident = [0u8; EI_NIDENT];
        cursor
            .read_exact(&mut ident)
            .map_err(|_| Error::BadInput("file shorter than the ELF ident bytes".into()))?;

        if ident[0..4] != ELFMAG {
            return Err(Error::BadInput("bad ELF magic".into()));
        }
        if ident[EI_CLASS] != ELFCLASS32 {
            return Err(Error::UnsupportedTarget("not a 32-bit ELF file".into()));
        }
        if ident[EI_DATA] != ELFDATA2LSB {
            return Err(Error::UnsupportedTarget(
                "not a little-endian ELF file".into(),
            ));
        }

        let elftype = cursor.read_u16::<LittleEndian>()?;
        let machine = cursor.read_u16::<LittleEndian>()?;
        if machine != EM_MIPS {
            return Err(Error::UnsupportedTarget(format!(
                "not a MIPS ELF file (e_machine = {:#x})",
                machine
            )));
        }
        let _ = elftype;
        let _version = cursor.read_u32::<LittleEndian>()?;
        let entry = cursor.read_u32::<LittleEndian>()?;
        let phoff = cursor.read_u32::<LittleEndian>()?;
        let shoff = cursor.read_u32::<LittleEndian>()?;
        let _flags = cursor.read_u32::<LittleEndian>()?;
        let _ehsize = cursor.read_u16::<LittleEndian>()?;
        let _phentsize = cursor.read_u16::<LittleEndian>()?;
        let phnum = cursor.read_u16::<LittleEndian>()?;
        let _shentsize = cursor.read_u16::<LittleEndian>()?;
        let shnum = cursor.read_u16::<LittleEndian>()?;
        let shstrndx = cursor.read_u16::<LittleEndian>()?;

        let segments = read_segments(&mut cursor, phoff, phnum)?;
        let (mut sections, name_offsets) = read_section_headers(&mut cursor, shoff, shnum)?;

        if (shstrndx as usize) < sections.len() {
            let strtab_offset = sections[shstrndx as usize].file_offset;
            for (section, name_offset) in sections.iter_mut().zip(name_offsets.iter()) {
                section.name = read_cstr(&bytes, strtab_offset as usize + *name_offset as usize)?;
            }
        }

        Ok(ElfImage {
            bytes,
            entry,
            sections,
            segments,
        })
    }

    pub fn lookup_section(&self, name: &str) -> Option<&Section> {
        self.sections.iter().find(|s| s.name == name)
    }

    pub fn section_data(&self, section: &Section) -> Result<&[u8]> {
        let start = section.file_offset as usize;
        let end = start
            .checked_add(section.size as usize)
            .ok_or_else(|| Error::BadInput("section size overflows file offset".into()))?;
        self.bytes
            .get(start..end)
            .ok_or_else(|| Error::BadInput(format!("section '{}' runs past end of file", section.name)))
    }

    pub fn file_offset_to_virtual_address(&self, offset: u32) -> Option<u32> {
        for segment in &self.segments {
            if offset >= segment.file_offset && offset < segment.file_offset + segment.size {
                return Some(segment.virtual_address + (offset - segment.file_offset));
            }
        }
        None
    }

    /// Finds which section owns virtual address `address`, if any section
    /// header carries a (non-zero) virtual address and `address` falls in
    /// its range.
    pub fn section_containing_address(&self, address: u32) -> Option<&Section> {
        self.sections.iter().find(|s| match s.virtual_address {
            Some(va) => address >= va && address < va + s.size,
            None => false,
        })
    }

    /// Classifies a data address by the well-known section name that owns
    /// it (spec §3's `Variable Storage::Global::location`), the same
    /// `{bss, data, sbss, sdata, …}` vocabulary as
    /// [`decode_gnu_linkonce`]'s tag letters.
    pub fn classify_address(&self, address: u32) -> GnuLinkOnceLocation {
        match self.section_containing_address(address).map(|s| s.name.as_str()) {
            Some(".bss") => GnuLinkOnceLocation::Bss,
            Some(".data") => GnuLinkOnceLocation::Data,
            Some(".sdata") => GnuLinkOnceLocation::Sdata,
            Some(".sbss") => GnuLinkOnceLocation::Sbss,
            Some(".text") => GnuLinkOnceLocation::Nil,
            _ => GnuLinkOnceLocation::Other,
        }
    }
}

fn read_segments<R: Read + Seek>(
    reader: &mut R,
    phoff: u32,
    phnum: u16,
) -> Result<Vec<Segment>> {
    reader.seek(SeekFrom::Start(phoff as u64))?;
    let mut segments = Vec::with_capacity(phnum as usize);
    for _ in 0..phnum {
        let _p_type = reader.read_u32::<LittleEndian>()?;
        let offset = reader.read_u32::<LittleEndian>()?;
        let vaddr = reader.read_u32::<LittleEndian>()?;
        let _paddr = reader.read_u32::<LittleEndian>()?;
        let filesz = reader.read_u32::<LittleEndian>()?;
        let _memsz = reader.read_u32::<LittleEndian>()?;
        let _flags = reader.read_u32::<LittleEndian>()?;
        let _align = reader.read_u32::<LittleEndian>()?;
        segments.push(Segment {
            file_offset: offset,
            size: filesz,
            virtual_address: vaddr,
        });
    }
    Ok(segments)
}

fn read_section_headers<R: Read + Seek>(
    reader: &mut R,
    shoff: u32,
    shnum: u16,
) -> Result<(Vec<Section>, Vec<u32>)> {
    reader.seek(SeekFrom::Start(shoff as u64))?;
    let mut sections = Vec::with_capacity(shnum as usize);
    let mut name_offsets = Vec::with_capacity(shnum as usize);
    for _ in 0..shnum {
        let name_offset = reader.read_u32::<LittleEndian>()?;
        let sh_type = reader.read_u32::<LittleEndian>()?;
        let _flags = reader.read_u32::<LittleEndian>()?;
        let addr = reader.read_u32::<LittleEndian>()?;
        let offset = reader.read_u32::<LittleEndian>()?;
        let size = reader.read_u32::<LittleEndian>()?;
        let _link = reader.read_u32::<LittleEndian>()?;
        let _info = reader.read_u32::<LittleEndian>()?;
        let _addralign = reader.read_u32::<LittleEndian>()?;
        let _entsize = reader.read_u32::<LittleEndian>()?;

        name_offsets.push(name_offset);
        sections.push(Section {
            name: String::new(),
            file_offset: offset,
            size,
            kind: SectionKind::from_raw(sh_type),
            virtual_address: if addr == 0 { None } else { Some(addr) },
        });
    }
    Ok((sections, name_offsets))
}

fn read_cstr(bytes: &[u8], start: usize) -> Result<String> {
    let slice = bytes
        .get(start..)
        .ok_or_else(|| Error::BadInput("string table offset out of bounds".into()))?;
    let end = slice.iter().position(|&b| b == 0).unwrap_or(slice.len());
    Ok(String::from_utf8_lossy(&slice[..end]).into_owned())
}

/// Reads `dest.len()` bytes starting at virtual address `va`, across
/// possibly multiple images (primary executable + overlays). Fails if any
/// byte of the window is unmapped in every image.
pub fn read_virtual(dest: &mut [u8], va: u32, images: &[&ElfImage]) -> Result<()> {
    let mut address = va;
    let mut remaining = dest.len();
    let mut written = 0usize;

    while remaining > 0 {
        let mut mapped = false;
        for image in images {
            for segment in &image.segments {
                if address >= segment.virtual_address
                    && address < segment.virtual_address + segment.size
                {
                    let offset_in_segment = address - segment.virtual_address;
                    let copy_size = std::cmp::min(segment.size - offset_in_segment, remaining as u32) as usize;
                    let file_start = segment.file_offset as usize + offset_in_segment as usize;
                    let file_end = file_start + copy_size;
                    let src = image
                        .bytes
                        .get(file_start..file_end)
                        .ok_or_else(|| Error::OutOfBoundsMemory {
                            address,
                            len: copy_size as u32,
                        })?;
                    dest[written..written + copy_size].copy_from_slice(src);
                    written += copy_size;
                    address += copy_size as u32;
                    remaining -= copy_size;
                    mapped = true;
                    break;
                }
            }
            if mapped {
                break;
            }
        }
        if !mapped {
            return Err(Error::OutOfBoundsMemory {
                address,
                len: remaining as u32,
            });
        }
    }
    Ok(())
}

/// Bounds-checked byte span, the building block both `get`/`copy` use.
pub fn get_bytes(bytes: &[u8], offset: usize, len: usize) -> Option<&[u8]> {
    bytes.get(offset..offset.checked_add(len)?)
}

/// Values that can be decoded from a little-endian byte span without
/// alignment requirements -- the "unaligned copy" primitive from spec §4.1.
pub trait FromLeBytes: Sized {
    const SIZE: usize;
    fn from_le_bytes_slice(bytes: &[u8]) -> Self;
}

macro_rules! impl_from_le_bytes {
    ($ty:ty) => {
        impl FromLeBytes for $ty {
            const SIZE: usize = std::mem::size_of::<$ty>();
            fn from_le_bytes_slice(bytes: &[u8]) -> Self {
                let mut buf = [0u8; std::mem::size_of::<$ty>()];
                buf.copy_from_slice(bytes);
                <$ty>::from_le_bytes(buf)
            }
        }
    };
}

impl_from_le_bytes!(u8);
impl_from_le_bytes!(u16);
impl_from_le_bytes!(u32);
impl_from_le_bytes!(u64);
impl_from_le_bytes!(i8);
impl_from_le_bytes!(i16);
impl_from_le_bytes!(i32);
impl_from_le_bytes!(i64);
impl_from_le_bytes!(f32);
impl_from_le_bytes!(f64);

/// `copy<T>(bytes, offset) -> T | none` from spec §4.1.
pub fn copy<T: FromLeBytes>(bytes: &[u8], offset: usize) -> Option<T> {
    let span = get_bytes(bytes, offset, T::SIZE)?;
    Some(T::from_le_bytes_slice(span))
}

/// The storage location a `.gnu.linkonce.<tag>.<symbol>` section name
/// implies for the symbol it carries (spec §4.1).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum GnuLinkOnceLocation {
    Bss,
    Data,
    Sdata,
    Sbss,
    /// The linkonce section holds code, not data; there is no data
    /// storage location to report.
    Nil,
    /// A data location that exists but isn't one of the four well-known
    /// ones above (spec §3's "…" after `{bss, data, sbss, sdata}`) -- e.g.
    /// `.rodata`, or an address this image has no section record for at
    /// all.
    Other,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GnuLinkOnce {
    pub location: GnuLinkOnceLocation,
    pub is_text: bool,
    pub symbol: String,
}

/// Decodes `".gnu.linkonce.<s>.<symbol>"`. `<s>` selects the storage
/// location: `b`->BSS, `d`->DATA, `s`->SDATA, `sb`->SBSS, `t`->text. Any
/// other prefix, or a name missing the symbol part, yields `None`.
pub fn decode_gnu_linkonce(name: &str) -> Option<GnuLinkOnce> {
    let rest = name.strip_prefix(".gnu.linkonce.")?;
    let (tag, symbol) = rest.split_once('.')?;
    if symbol.is_empty() {
        return None;
    }
    let (location, is_text) = match tag {
        "b" => (GnuLinkOnceLocation::Bss, false),
        "d" => (GnuLinkOnceLocation::Data, false),
        "s" => (GnuLinkOnceLocation::Sdata, false),
        "sb" => (GnuLinkOnceLocation::Sbss, false),
        "t" => (GnuLinkOnceLocation::Nil, true),
        _ => return None,
    };
    Some(GnuLinkOnce {
        location,
        is_text,
        symbol: symbol.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gnu_linkonce_bss_global() {
        let decoded = decode_gnu_linkonce(".gnu.linkonce.b.MyBSSGlobal").unwrap();
        assert_eq!(decoded.location, GnuLinkOnceLocation::Bss);
        assert!(!decoded.is_text);
        assert_eq!(decoded.symbol, "MyBSSGlobal");
    }

    #[test]
    fn gnu_linkonce_text_function() {
        let decoded = decode_gnu_linkonce(".gnu.linkonce.t.MyFunction").unwrap();
        assert_eq!(decoded.location, GnuLinkOnceLocation::Nil);
        assert!(decoded.is_text);
        assert_eq!(decoded.symbol, "MyFunction");
    }

    #[test]
    fn gnu_linkonce_unknown_prefix_rejected() {
        assert!(decode_gnu_linkonce(".gnu.linkonce.a.Hello").is_none());
    }

    #[test]
    fn classifies_address_by_owning_section_name() {
        let image = ElfImage {
            bytes: vec![],
            entry: 0,
            sections: vec![
                Section {
                    name: ".bss".to_string(),
                    file_offset: 0,
                    size: 0x10,
                    kind: SectionKind::Known(SectionType::Nobits),
                    virtual_address: Some(0x1000),
                },
                Section {
                    name: ".data".to_string(),
                    file_offset: 0x10,
                    size: 0x10,
                    kind: SectionKind::Known(SectionType::Progbits),
                    virtual_address: Some(0x2000),
                },
            ],
            segments: vec![],
        };
        assert_eq!(image.classify_address(0x1004), GnuLinkOnceLocation::Bss);
        assert_eq!(image.classify_address(0x2004), GnuLinkOnceLocation::Data);
        assert_eq!(image.classify_address(0x9999), GnuLinkOnceLocation::Other);
    }

    #[test]
    fn copy_primitive_out_of_bounds_is_none() {
        let bytes = [1u8, 2, 3];
        assert!(copy::<u32>(&bytes, 0).is_none());
        assert_eq!(copy::<u16>(&bytes, 0), Some(0x0201));
    }

    fn sample_elf(phdrs: &[(u32, u32, u32)], shdrs_after_phdrs: &[(u32, u32, u32)]) -> Vec<u8> {
        // Builds a minimal well-formed ELF32 LE MIPS image with the given
        // program headers (offset, vaddr, filesz) and section headers
        // (name_offset, offset, size), followed by a one-byte shstrtab.
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&ELFMAG);
        bytes.push(ELFCLASS32);
        bytes.push(ELFDATA2LSB);
        bytes.extend_from_slice(&[0u8; 10]); // rest of ident
        bytes.extend_from_slice(&2u16.to_le_bytes()); // e_type
        bytes.extend_from_slice(&EM_MIPS.to_le_bytes());
        bytes.extend_from_slice(&1u32.to_le_bytes()); // version
        bytes.extend_from_slice(&0u32.to_le_bytes()); // entry
        let phoff = 52u32;
        let phnum = phdrs.len() as u16;
        let phentsize = 32u32;
        let shoff = phoff + phnum as u32 * phentsize;
        bytes.extend_from_slice(&phoff.to_le_bytes());
        bytes.extend_from_slice(&shoff.to_le_bytes());
        bytes.extend_from_slice(&0u32.to_le_bytes()); // flags
        bytes.extend_from_slice(&52u16.to_le_bytes()); // ehsize
        bytes.extend_from_slice(&(phentsize as u16).to_le_bytes());
        bytes.extend_from_slice(&phnum.to_le_bytes());
        bytes.extend_from_slice(&40u16.to_le_bytes()); // shentsize
        bytes.extend_from_slice(&(shdrs_after_phdrs.len() as u16).to_le_bytes());
        bytes.extend_from_slice(&0u16.to_le_bytes()); // shstrndx (unused in these tests)

        for &(offset, vaddr, filesz) in phdrs {
            bytes.extend_from_slice(&1u32.to_le_bytes()); // PT_LOAD
            bytes.extend_from_slice(&offset.to_le_bytes());
            bytes.extend_from_slice(&vaddr.to_le_bytes());
            bytes.extend_from_slice(&vaddr.to_le_bytes()); // paddr
            bytes.extend_from_slice(&filesz.to_le_bytes());
            bytes.extend_from_slice(&filesz.to_le_bytes()); // memsz
            bytes.extend_from_slice(&0u32.to_le_bytes()); // flags
            bytes.extend_from_slice(&0u32.to_le_bytes()); // align
        }

        for &(name_offset, offset, size) in shdrs_after_phdrs {
            bytes.extend_from_slice(&name_offset.to_le_bytes());
            bytes.extend_from_slice(&1u32.to_le_bytes()); // PROGBITS
            bytes.extend_from_slice(&0u32.to_le_bytes()); // flags
            bytes.extend_from_slice(&0u32.to_le_bytes()); // addr
            bytes.extend_from_slice(&offset.to_le_bytes());
            bytes.extend_from_slice(&size.to_le_bytes());
            bytes.extend_from_slice(&0u32.to_le_bytes()); // link
            bytes.extend_from_slice(&0u32.to_le_bytes()); // info
            bytes.extend_from_slice(&0u32.to_le_bytes()); // addralign
            bytes.extend_from_slice(&0u32.to_le_bytes()); // entsize
        }
        bytes
    }

    #[test]
    fn rejects_bad_magic() {
        let bytes = vec![0u8; 64];
        assert!(matches!(ElfImage::parse(bytes), Err(Error::BadInput(_))));
    }

    #[test]
    fn rejects_non_mips_machine() {
        let mut bytes = sample_elf(&[], &[]);
        bytes[18] = 0x3e; // e_machine low byte -> EM_X86_64
        assert!(matches!(
            ElfImage::parse(bytes),
            Err(Error::UnsupportedTarget(_))
        ));
    }

    #[test]
    fn file_offset_to_virtual_address_round_trips() {
        let bytes = sample_elf(&[(0x100, 0x8000, 0x40)], &[]);
        let image = ElfImage::parse(bytes).unwrap();
        assert_eq!(image.file_offset_to_virtual_address(0x110), Some(0x8010));
        assert_eq!(image.file_offset_to_virtual_address(0x200), None);
    }

    #[test]
    fn read_virtual_fails_when_unmapped() {
        let bytes = sample_elf(&[(0x100, 0x8000, 0x10)], &[]);
        let image = ElfImage::parse(bytes).unwrap();
        let mut dest = [0u8; 4];
        assert!(read_virtual(&mut dest, 0x9000, &[&image]).is_err());
    }
}
