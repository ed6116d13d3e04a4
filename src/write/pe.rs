//! Minimal PE envelope around the CLI payload.
//!
//! One `.text` section holding the CLI header, method bodies, field data and
//! metadata. No imports, exports, relocations, resources or debug data; the
//! optional header carries exactly the 15 data directories needed to reach
//! the CLR directory slot, the smallest standards-legal count.
//!
//! The COFF machine field is written as a placeholder during layout, so no
//! architecture-specific bootstrap stub is ever emitted, and the real value
//! is patched into the finished bytes afterwards.

const FILE_ALIGN: u32 = 0x200;
/// Matching section alignment keeps RVAs equal to file offsets.
const SECT_ALIGN: u32 = 0x200;

const DOS_HEADER_LEN: usize = 0x40;
/// PE32 fixed part plus 15 data directories.
const OPT_HEADER_LEN: u16 = 96 + 15 * 8;
const SECTION_HEADER_LEN: usize = 40;
const CLI_HEADER_SIZE: u32 = 72;

const MACHINE_PLACEHOLDER: u16 = 0x0000;
const MACHINE_I386: u16 = 0x014C;
/// Offset of the COFF machine field: DOS header, then the PE signature.
const MACHINE_OFFSET: usize = DOS_HEADER_LEN + 4;

fn align(v: u32, to: u32) -> u32 {
    v.div_ceil(to) * to
}

/// Wraps the `.text` payload (CLI header first) into a complete PE image.
pub fn wrap(text: &[u8]) -> Vec<u8> {
    let text_rva = align(
        (DOS_HEADER_LEN + 4 + 20 + OPT_HEADER_LEN as usize + SECTION_HEADER_LEN) as u32,
        FILE_ALIGN,
    );
    let text_raw = align(text.len() as u32, FILE_ALIGN);
    let image_size = align(text_rva + text.len() as u32, SECT_ALIGN);

    let mut out = Vec::with_capacity((text_rva + text_raw) as usize);

    // DOS header: magic and the PE offset, nothing else.
    out.extend_from_slice(b"MZ");
    out.resize(0x3C, 0);
    out.extend_from_slice(&(DOS_HEADER_LEN as u32).to_le_bytes());

    out.extend_from_slice(b"PE\0\0");

    // COFF file header.
    out.extend_from_slice(&MACHINE_PLACEHOLDER.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes()); // sections
    out.extend_from_slice(&0u32.to_le_bytes()); // timestamp
    out.extend_from_slice(&0u32.to_le_bytes()); // symbol table
    out.extend_from_slice(&0u32.to_le_bytes()); // symbol count
    out.extend_from_slice(&OPT_HEADER_LEN.to_le_bytes());
    // executable, 32-bit, dll
    out.extend_from_slice(&0x2102u16.to_le_bytes());

    // Optional header, PE32.
    out.extend_from_slice(&0x010Bu16.to_le_bytes());
    out.extend_from_slice(&[6, 0]); // linker version
    out.extend_from_slice(&text_raw.to_le_bytes()); // size of code
    out.extend_from_slice(&0u32.to_le_bytes()); // initialized data
    out.extend_from_slice(&0u32.to_le_bytes()); // uninitialized data
    out.extend_from_slice(&0u32.to_le_bytes()); // entry point
    out.extend_from_slice(&text_rva.to_le_bytes()); // base of code
    out.extend_from_slice(&0u32.to_le_bytes()); // base of data
    out.extend_from_slice(&0x0040_0000u32.to_le_bytes()); // image base
    out.extend_from_slice(&SECT_ALIGN.to_le_bytes());
    out.extend_from_slice(&FILE_ALIGN.to_le_bytes());
    out.extend_from_slice(&4u16.to_le_bytes()); // os major
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes()); // image version
    out.extend_from_slice(&4u16.to_le_bytes()); // subsystem major
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes()); // win32 version
    out.extend_from_slice(&image_size.to_le_bytes());
    out.extend_from_slice(&text_rva.to_le_bytes()); // size of headers
    out.extend_from_slice(&0u32.to_le_bytes()); // checksum
    out.extend_from_slice(&3u16.to_le_bytes()); // console subsystem
    out.extend_from_slice(&0x0540u16.to_le_bytes()); // dll characteristics
    out.extend_from_slice(&0x0010_0000u32.to_le_bytes()); // stack reserve
    out.extend_from_slice(&0x1000u32.to_le_bytes()); // stack commit
    out.extend_from_slice(&0x0010_0000u32.to_le_bytes()); // heap reserve
    out.extend_from_slice(&0x1000u32.to_le_bytes()); // heap commit
    out.extend_from_slice(&0u32.to_le_bytes()); // loader flags
    out.extend_from_slice(&15u32.to_le_bytes()); // directory count

    // 15 data directories; only the CLR slot (14) is populated.
    for i in 0..15u32 {
        if i == 14 {
            out.extend_from_slice(&text_rva.to_le_bytes());
            out.extend_from_slice(&CLI_HEADER_SIZE.to_le_bytes());
        } else {
            out.extend_from_slice(&0u64.to_le_bytes());
        }
    }

    // Section header.
    out.extend_from_slice(b".text\0\0\0");
    out.extend_from_slice(&(text.len() as u32).to_le_bytes()); // virtual size
    out.extend_from_slice(&text_rva.to_le_bytes());
    out.extend_from_slice(&text_raw.to_le_bytes());
    out.extend_from_slice(&text_rva.to_le_bytes()); // raw pointer
    out.extend_from_slice(&0u32.to_le_bytes()); // relocations
    out.extend_from_slice(&0u32.to_le_bytes()); // line numbers
    out.extend_from_slice(&0u32.to_le_bytes()); // their counts
    out.extend_from_slice(&0x6000_0020u32.to_le_bytes()); // code | execute | read

    out.resize(text_rva as usize, 0);
    out.extend_from_slice(text);
    out.resize((text_rva + text_raw) as usize, 0);

    // Layout is done; restore the real machine.
    out[MACHINE_OFFSET..MACHINE_OFFSET + 2].copy_from_slice(&MACHINE_I386.to_le_bytes());
    out
}

/// RVA of the `.text` payload, needed to compute method and field RVAs
/// before the envelope exists.
pub fn text_rva() -> u32 {
    align(
        (DOS_HEADER_LEN + 4 + 20 + OPT_HEADER_LEN as usize + SECTION_HEADER_LEN) as u32,
        FILE_ALIGN,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn machine_restored_after_layout() {
        let image = wrap(&[0u8; 80]);
        let machine = u16::from_le_bytes([image[MACHINE_OFFSET], image[MACHINE_OFFSET + 1]]);
        assert_eq!(machine, MACHINE_I386);
    }

    #[test]
    fn clr_directory_points_at_payload() {
        let image = wrap(&[0xABu8; 100]);
        // Data directory 14 lives at the end of the optional header.
        let dir = DOS_HEADER_LEN + 4 + 20 + 96 + 14 * 8;
        let rva = u32::from_le_bytes(image[dir..dir + 4].try_into().unwrap());
        let size = u32::from_le_bytes(image[dir + 4..dir + 8].try_into().unwrap());
        assert_eq!(rva, text_rva());
        assert_eq!(size, CLI_HEADER_SIZE);
        assert_eq!(image[text_rva() as usize], 0xAB);
        assert_eq!(image.len() % FILE_ALIGN as usize, 0);
    }

    #[test]
    fn dos_stub_is_minimal() {
        let image = wrap(&[0u8; 16]);
        assert_eq!(&image[..2], b"MZ");
        let e_lfanew = u32::from_le_bytes(image[0x3C..0x40].try_into().unwrap());
        assert_eq!(e_lfanew, DOS_HEADER_LEN as u32);
        assert_eq!(&image[0x40..0x44], b"PE\0\0");
    }
}
