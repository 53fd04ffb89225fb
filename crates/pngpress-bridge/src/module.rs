//! Compiled module parsing.
//!
//! Only the parts of the binary format needed for instantiation are read:
//! the header and the import section. Every other section is skipped by its
//! declared size.

use std::sync::Arc;

use tracing::debug;

use crate::error::EngineLoadError;

const MAGIC: [u8; 4] = *b"\0asm";
const VERSION: [u8; 4] = [1, 0, 0, 0];
const IMPORT_SECTION: u8 = 2;

/// Page limits of a table or memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub min: u32,
    pub max: Option<u32>,
}

/// A memory import's declared type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryType {
    pub limits: Limits,
    pub shared: bool,
}

/// What an import expects to be bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportType {
    /// A function with the given type index.
    Function(u32),
    Table { element: u8, limits: Limits },
    Memory(MemoryType),
    Global { value: u8, mutable: bool },
}

impl ImportType {
    pub fn describe(&self) -> &'static str {
        match self {
            ImportType::Function(_) => "function",
            ImportType::Table { .. } => "table",
            ImportType::Memory(_) => "memory",
            ImportType::Global { .. } => "global",
        }
    }
}

/// One entry of the import section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Import {
    pub module: String,
    pub name: String,
    pub ty: ImportType,
}

/// A validated module blob and its import list.
///
/// The blob itself is kept behind an `Arc` so every context that loads the
/// same module shares one copy.
#[derive(Debug, Clone)]
pub struct CompiledModule {
    bytes: Arc<[u8]>,
    imports: Vec<Import>,
}

impl CompiledModule {
    /// Validate the header and read the import section.
    ///
    /// # Errors
    ///
    /// Returns `EngineLoadError::InvalidModule` for a bad header, a section
    /// that runs past the end of the blob, or a malformed import entry.
    pub fn parse(bytes: Arc<[u8]>) -> Result<Self, EngineLoadError> {
        let mut reader = Reader::new(&bytes);
        if reader.take(4)? != MAGIC {
            return Err(invalid("missing \\0asm magic"));
        }
        if reader.take(4)? != VERSION {
            return Err(invalid("unsupported binary version"));
        }

        let mut imports = None;
        while !reader.is_empty() {
            let id = reader.byte()?;
            let size = reader.u32()? as usize;
            let body = reader.take(size)?;
            if id == IMPORT_SECTION {
                if imports.is_some() {
                    return Err(invalid("duplicate import section"));
                }
                imports = Some(parse_imports(body)?);
            }
        }

        let imports = imports.unwrap_or_default();
        debug!("parsed module: {} bytes, {} imports", bytes.len(), imports.len());
        Ok(Self { bytes, imports })
    }

    pub fn imports(&self) -> &[Import] {
        &self.imports
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// The module's memory import, if it declares one.
    pub fn memory_import(&self) -> Option<(&Import, MemoryType)> {
        self.imports.iter().find_map(|i| match i.ty {
            ImportType::Memory(m) => Some((i, m)),
            _ => None,
        })
    }
}

fn invalid(msg: &str) -> EngineLoadError {
    EngineLoadError::InvalidModule(msg.to_string())
}

fn parse_imports(body: &[u8]) -> Result<Vec<Import>, EngineLoadError> {
    let mut reader = Reader::new(body);
    let count = reader.u32()?;
    let mut imports = Vec::with_capacity(count.min(1024) as usize);
    for _ in 0..count {
        let module = reader.name()?;
        let name = reader.name()?;
        let ty = match reader.byte()? {
            0 => ImportType::Function(reader.u32()?),
            1 => {
                let element = reader.byte()?;
                let (limits, _) = reader.limits()?;
                ImportType::Table { element, limits }
            }
            2 => {
                let (limits, shared) = reader.limits()?;
                ImportType::Memory(MemoryType { limits, shared })
            }
            3 => {
                let value = reader.byte()?;
                let mutable = match reader.byte()? {
                    0 => false,
                    1 => true,
                    _ => return Err(invalid("bad global mutability")),
                };
                ImportType::Global { value, mutable }
            }
            kind => return Err(EngineLoadError::InvalidModule(format!("unknown import kind {kind}"))),
        };
        imports.push(Import { module, name, ty });
    }
    if !reader.is_empty() {
        return Err(invalid("import section has trailing bytes"));
    }
    Ok(imports)
}

/// Cursor over a byte slice with LEB128 helpers.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn is_empty(&self) -> bool {
        self.pos >= self.buf.len()
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], EngineLoadError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.buf.len())
            .ok_or_else(|| invalid("unexpected end of module"))?;
        let out = &self.buf[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    fn byte(&mut self) -> Result<u8, EngineLoadError> {
        Ok(self.take(1)?[0])
    }

    /// Unsigned LEB128, at most five bytes.
    fn u32(&mut self) -> Result<u32, EngineLoadError> {
        let mut result = 0u32;
        for i in 0..5 {
            let b = self.byte()?;
            if i == 4 && b & 0xF0 != 0 {
                return Err(invalid("integer too large"));
            }
            result |= u32::from(b & 0x7F) << (7 * i);
            if b & 0x80 == 0 {
                return Ok(result);
            }
        }
        Err(invalid("integer representation too long"))
    }

    fn name(&mut self) -> Result<String, EngineLoadError> {
        let len = self.u32()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| invalid("name is not UTF-8"))
    }

    /// Limits plus the shared flag.
    fn limits(&mut self) -> Result<(Limits, bool), EngineLoadError> {
        let flags = self.byte()?;
        if flags > 3 {
            return Err(EngineLoadError::InvalidModule(format!("unsupported limits flags {flags:#x}")));
        }
        let min = self.u32()?;
        let max = if flags & 1 != 0 { Some(self.u32()?) } else { None };
        let shared = flags & 2 != 0;
        if shared && max.is_none() {
            return Err(invalid("shared memory requires a maximum"));
        }
        if max.is_some_and(|max| max < min) {
            return Err(invalid("limits maximum below minimum"));
        }
        Ok((Limits { min, max }, shared))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{engine_module, leb, module_bytes};

    #[test]
    fn test_parse_engine_module() {
        let module = CompiledModule::parse(engine_module().into()).unwrap();
        assert!(module.imports().len() >= 4);
        let (import, memory) = module.memory_import().unwrap();
        assert_eq!((import.module.as_str(), import.name.as_str()), ("env", "memory"));
        assert!(memory.shared);
        assert_eq!(memory.limits.min, 1);
    }

    #[test]
    fn test_module_without_imports() {
        let module = CompiledModule::parse(module_bytes(&[]).into()).unwrap();
        assert!(module.imports().is_empty());
        assert!(module.memory_import().is_none());
    }

    #[test]
    fn test_bad_header() {
        let mut bytes = module_bytes(&[]);
        bytes[0] = b'x';
        assert!(matches!(
            CompiledModule::parse(bytes.into()),
            Err(EngineLoadError::InvalidModule(_))
        ));

        let mut bytes = module_bytes(&[]);
        bytes[4] = 2;
        assert!(CompiledModule::parse(bytes.into()).is_err());
        assert!(CompiledModule::parse(Arc::from(&b"\0as"[..])).is_err());
    }

    #[test]
    fn test_truncated_section() {
        let mut bytes = engine_module();
        bytes.truncate(bytes.len() - 3);
        assert!(matches!(
            CompiledModule::parse(bytes.into()),
            Err(EngineLoadError::InvalidModule(_))
        ));
    }

    #[test]
    fn test_leb128() {
        for value in [0u32, 1, 127, 128, 300, 65536, u32::MAX] {
            let bytes = leb(value);
            assert_eq!(Reader::new(&bytes).u32().unwrap(), value);
        }
        // Six-byte encoding is too long.
        assert!(Reader::new(&[0x80, 0x80, 0x80, 0x80, 0x80, 0x00]).u32().is_err());
    }

    #[test]
    fn test_shared_memory_needs_maximum() {
        let mut reader = Reader::new(&[0x02, 0x01]);
        assert!(reader.limits().is_err());
        let mut reader = Reader::new(&[0x03, 0x01, 0x10]);
        assert_eq!(
            reader.limits().unwrap(),
            (Limits { min: 1, max: Some(16) }, true)
        );
    }
}
