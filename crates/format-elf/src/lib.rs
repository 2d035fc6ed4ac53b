//! ELF32 symbol table reader.
//!
//! Parses just enough of a little-endian ELF32 image to extract the
//! function symbols: the section header table, the `.symtab` / `.dynsym`
//! sections, and their linked string tables. The result is a table of
//! `{start, end, name}` records sorted by start address, queried by binary
//! search during function tracing.
//!
//! Functions never overlap in a well-formed image, so containment lookup is
//! unambiguous; this is relied on, not re-checked.

/// Section type: symbol table.
const SHT_SYMTAB: u32 = 2;
/// Section type: dynamic symbol table.
const SHT_DYNSYM: u32 = 11;
/// Symbol type: function.
const STT_FUNC: u8 = 2;

/// Size of an ELF32 section header entry.
const SHDR_SIZE: usize = 40;
/// Size of an ELF32 symbol entry.
const SYM_SIZE: usize = 16;

/// Longest symbol name kept; longer names are truncated.
const NAME_MAX: usize = 63;

/// One function symbol. `end` is `start + max(size, 1)` so that zero-size
/// symbols (common for assembly labels) still own their start address.
#[derive(Debug, Clone)]
pub struct FuncSym {
    pub start: u32,
    pub end: u32,
    pub name: String,
}

/// Function symbols sorted by start address.
pub struct SymbolTable {
    funcs: Vec<FuncSym>,
}

impl SymbolTable {
    /// Parse the function symbols out of an ELF image.
    ///
    /// # Errors
    ///
    /// Returns an error if the data is not a little-endian ELF32 image or
    /// the section/symbol tables are truncated. An image with *no* function
    /// symbols parses successfully into an empty table.
    pub fn parse(data: &[u8]) -> Result<Self, String> {
        if data.len() < 52 {
            return Err(format!("ELF image too short: {} bytes", data.len()));
        }
        if data[0..4] != [0x7f, b'E', b'L', b'F'] {
            return Err("not an ELF image (bad magic)".to_string());
        }
        if data[4] != 1 {
            return Err(format!("not a 32-bit ELF image (class {})", data[4]));
        }
        if data[5] != 1 {
            return Err(format!("not a little-endian ELF image (data {})", data[5]));
        }

        let e_shoff = read_u32(data, 32)? as usize;
        let e_shentsize = read_u16(data, 46)? as usize;
        let e_shnum = read_u16(data, 48)? as usize;
        if e_shentsize < SHDR_SIZE {
            return Err(format!("bad section header entry size {e_shentsize}"));
        }

        let mut funcs = Vec::new();
        for i in 0..e_shnum {
            let sh = e_shoff + i * e_shentsize;
            let sh_type = read_u32(data, sh + 4)?;
            if sh_type != SHT_SYMTAB && sh_type != SHT_DYNSYM {
                continue;
            }
            let sh_offset = read_u32(data, sh + 16)? as usize;
            let sh_size = read_u32(data, sh + 20)? as usize;
            let sh_link = read_u32(data, sh + 24)? as usize;
            let sh_entsize = read_u32(data, sh + 36)? as usize;
            if sh_entsize < SYM_SIZE {
                return Err(format!("bad symbol entry size {sh_entsize}"));
            }

            // The linked section is the string table for this symbol table.
            if sh_link >= e_shnum {
                return Err(format!("symbol table links to missing section {sh_link}"));
            }
            let str_sh = e_shoff + sh_link * e_shentsize;
            let str_offset = read_u32(data, str_sh + 16)? as usize;
            let str_size = read_u32(data, str_sh + 20)? as usize;
            let strtab = data
                .get(str_offset..str_offset + str_size)
                .ok_or_else(|| "string table extends past end of image".to_string())?;

            let count = sh_size / sh_entsize;
            for n in 0..count {
                let sym = sh_offset + n * sh_entsize;
                let st_info = *data
                    .get(sym + 12)
                    .ok_or_else(|| "symbol table extends past end of image".to_string())?;
                if st_info & 0xf != STT_FUNC {
                    continue;
                }
                let st_value = read_u32(data, sym)?;
                if st_value == 0 {
                    continue;
                }
                let st_name = read_u32(data, sym + 4)? as usize;
                let st_size = read_u32(data, sym + 8)?;
                let Some(name) = str_lookup(strtab, st_name) else {
                    continue;
                };
                if name.is_empty() {
                    continue;
                }
                let mut name = name.to_string();
                name.truncate(NAME_MAX);
                funcs.push(FuncSym {
                    start: st_value,
                    end: st_value + st_size.max(1),
                    name,
                });
            }
        }

        funcs.sort_by_key(|f| f.start);
        Ok(Self { funcs })
    }

    /// The unique symbol whose `[start, end)` range contains `addr`.
    #[must_use]
    pub fn find(&self, addr: u32) -> Option<&FuncSym> {
        let mut lo = 0usize;
        let mut hi = self.funcs.len();
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let f = &self.funcs[mid];
            if addr < f.start {
                hi = mid;
            } else if addr >= f.end {
                lo = mid + 1;
            } else {
                return Some(f);
            }
        }
        None
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.funcs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.funcs.is_empty()
    }
}

fn read_u16(data: &[u8], offset: usize) -> Result<u16, String> {
    data.get(offset..offset + 2)
        .map(|b| u16::from_le_bytes([b[0], b[1]]))
        .ok_or_else(|| format!("truncated ELF image (read at {offset:#x})"))
}

fn read_u32(data: &[u8], offset: usize) -> Result<u32, String> {
    data.get(offset..offset + 4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or_else(|| format!("truncated ELF image (read at {offset:#x})"))
}

/// NUL-terminated string at `offset` in a string table.
fn str_lookup(strtab: &[u8], offset: usize) -> Option<&str> {
    let tail = strtab.get(offset..)?;
    let end = tail.iter().position(|&b| b == 0)?;
    core::str::from_utf8(&tail[..end]).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build a minimal ELF32 image containing one `.symtab` with the given
    /// `(value, size, name)` function symbols.
    fn make_elf(symbols: &[(u32, u32, &str)]) -> Vec<u8> {
        // Layout: ehdr (52) | shdrs (3 * 40) | strtab | symtab
        let mut strtab = vec![0u8]; // index 0 is the empty name
        let mut name_offsets = Vec::new();
        for &(_, _, name) in symbols {
            name_offsets.push(strtab.len() as u32);
            strtab.extend_from_slice(name.as_bytes());
            strtab.push(0);
        }

        let shoff = 52usize;
        let strtab_off = shoff + 3 * SHDR_SIZE;
        let symtab_off = strtab_off + strtab.len();
        let symtab_size = (symbols.len() + 1) * SYM_SIZE;

        let mut image = Vec::new();
        // e_ident
        image.extend_from_slice(&[0x7f, b'E', b'L', b'F', 1, 1, 1, 0]);
        image.extend_from_slice(&[0; 8]);
        image.extend_from_slice(&2u16.to_le_bytes()); // e_type
        image.extend_from_slice(&0xf3u16.to_le_bytes()); // e_machine: RISC-V
        image.extend_from_slice(&1u32.to_le_bytes()); // e_version
        image.extend_from_slice(&0x8000_0000u32.to_le_bytes()); // e_entry
        image.extend_from_slice(&0u32.to_le_bytes()); // e_phoff
        image.extend_from_slice(&(shoff as u32).to_le_bytes()); // e_shoff
        image.extend_from_slice(&0u32.to_le_bytes()); // e_flags
        image.extend_from_slice(&52u16.to_le_bytes()); // e_ehsize
        image.extend_from_slice(&0u16.to_le_bytes()); // e_phentsize
        image.extend_from_slice(&0u16.to_le_bytes()); // e_phnum
        image.extend_from_slice(&(SHDR_SIZE as u16).to_le_bytes()); // e_shentsize
        image.extend_from_slice(&3u16.to_le_bytes()); // e_shnum
        image.extend_from_slice(&0u16.to_le_bytes()); // e_shstrndx
        assert_eq!(image.len(), 52);

        let shdr = |sh_type: u32, offset: usize, size: usize, link: u32, entsize: u32| {
            let mut h = Vec::new();
            h.extend_from_slice(&0u32.to_le_bytes()); // sh_name
            h.extend_from_slice(&sh_type.to_le_bytes());
            h.extend_from_slice(&0u32.to_le_bytes()); // sh_flags
            h.extend_from_slice(&0u32.to_le_bytes()); // sh_addr
            h.extend_from_slice(&(offset as u32).to_le_bytes());
            h.extend_from_slice(&(size as u32).to_le_bytes());
            h.extend_from_slice(&link.to_le_bytes());
            h.extend_from_slice(&0u32.to_le_bytes()); // sh_info
            h.extend_from_slice(&0u32.to_le_bytes()); // sh_addralign
            h.extend_from_slice(&entsize.to_le_bytes());
            h
        };

        // Section 0: null. Section 1: strtab. Section 2: symtab (link = 1).
        image.extend_from_slice(&shdr(0, 0, 0, 0, 0));
        image.extend_from_slice(&shdr(3, strtab_off, strtab.len(), 0, 0));
        image.extend_from_slice(&shdr(
            SHT_SYMTAB,
            symtab_off,
            symtab_size,
            1,
            SYM_SIZE as u32,
        ));
        image.extend_from_slice(&strtab);

        // Symbol 0: null.
        image.extend_from_slice(&[0; SYM_SIZE]);
        for (i, &(value, size, _)) in symbols.iter().enumerate() {
            image.extend_from_slice(&name_offsets[i].to_le_bytes());
            image.extend_from_slice(&value.to_le_bytes());
            image.extend_from_slice(&size.to_le_bytes());
            image.push(STT_FUNC); // st_info
            image.push(0); // st_other
            image.extend_from_slice(&0u16.to_le_bytes()); // st_shndx
        }
        image
    }

    #[test]
    fn parses_function_symbols() {
        let elf = make_elf(&[
            (0x8000_0100, 0x40, "foo"),
            (0x8000_0000, 0x20, "_start"),
            (0x8000_0200, 0, "bar"),
        ]);
        let table = SymbolTable::parse(&elf).expect("parses");
        assert_eq!(table.len(), 3);

        let start = table.find(0x8000_0010).expect("found");
        assert_eq!(start.name, "_start");

        let foo = table.find(0x8000_013f).expect("found");
        assert_eq!(foo.name, "foo");
        assert_eq!(foo.end, 0x8000_0140);

        // Zero-size symbols still own their start address.
        let bar = table.find(0x8000_0200).expect("found");
        assert_eq!(bar.name, "bar");
        assert_eq!(bar.end, 0x8000_0201);
    }

    #[test]
    fn lookup_misses_between_functions() {
        let elf = make_elf(&[(0x8000_0000, 4, "a"), (0x8000_0100, 4, "b")]);
        let table = SymbolTable::parse(&elf).expect("parses");
        assert!(table.find(0x8000_0004).is_none());
        assert!(table.find(0x7fff_ffff).is_none());
        assert!(table.find(0x8000_0104).is_none());
    }

    #[test]
    fn empty_symtab_is_ok() {
        let elf = make_elf(&[]);
        let table = SymbolTable::parse(&elf).expect("parses");
        assert!(table.is_empty());
        assert!(table.find(0x8000_0000).is_none());
    }

    #[test]
    fn rejects_non_elf() {
        assert!(SymbolTable::parse(b"not an elf").is_err());
        let mut bad = make_elf(&[]);
        bad[4] = 2; // ELFCLASS64
        assert!(SymbolTable::parse(&bad).is_err());
    }

    #[test]
    fn long_names_are_truncated() {
        let long = "f".repeat(100);
        let elf = make_elf(&[(0x8000_0000, 4, &long)]);
        let table = SymbolTable::parse(&elf).expect("parses");
        assert_eq!(table.find(0x8000_0000).expect("found").name.len(), 63);
    }
}
