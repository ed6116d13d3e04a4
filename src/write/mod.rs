//! Binary image construction.
//!
//! Turns the finished graph into an in-memory ECMA-335-shaped image: metadata
//! heaps and tables, encoded method bodies, field data, a CLI header and a
//! minimal PE envelope. The produced [`BinaryImage`] is an opaque byte
//! sequence handed unmodified to a downstream transcoder.
//!
//! Layout of the single `.text` section:
//!
//! ```text
//! CLI header | method bodies | field RVA data | metadata root
//! ```
//!
//! Row numbers are assigned first (types in list order, members grouped by
//! declaring type), then bodies are encoded against those rows, then the
//! section is laid out so method and field RVAs are known, and finally the
//! metadata streams are serialized.

use std::collections::HashMap;
use std::ops::Deref;

use tracing::debug;

use crate::{
    graph::{
        Constant, ExtFieldId, ExtMethodId, ExtTypeId, FieldId, FieldRef, MethodId, MethodRef,
        Module, Operand, PrimType, TypeAttributes, TypeId, TypeRef,
    },
    Result,
};

pub(crate) mod bodies;
pub(crate) mod heaps;
pub(crate) mod pe;
pub(crate) mod signatures;
pub(crate) mod tables;

use heaps::{BlobHeap, StringsHeap};
use tables::{
    AssemblyRefRow, ClassLayoutRow, ConstantRow, FieldRow, FieldRvaRow, MemberRefRow, MethodRow,
    Tables, TypeDefRow, TypeRefRow,
};

const CLI_HEADER_SIZE: u32 = 72;
const COMIMAGE_FLAGS_ILONLY: u32 = 0x0000_0001;
const TOKEN_TYPE_REF: u32 = 0x0100_0000;
const TOKEN_TYPE_DEF: u32 = 0x0200_0000;
const TOKEN_FIELD: u32 = 0x0400_0000;
const TOKEN_METHOD_DEF: u32 = 0x0600_0000;
const TOKEN_MEMBER_REF: u32 = 0x0A00_0000;
const TOKEN_STAND_ALONE_SIG: u32 = 0x1100_0000;

/// Model-only attribute bits that never reach the wire.
const TYPE_MODEL_MASK: u32 = TypeAttributes::ENUM_SEMANTICS.bits()
    | TypeAttributes::VALUE_TYPE_SEMANTICS.bits();

/// The finished minimized module image.
#[derive(Debug)]
pub struct BinaryImage {
    bytes: Vec<u8>,
}

impl BinaryImage {
    /// Image length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// True when the image holds no bytes (never produced by a build).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Consumes the image, returning its bytes.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

impl Deref for BinaryImage {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.bytes
    }
}

impl AsRef<[u8]> for BinaryImage {
    fn as_ref(&self) -> &[u8] {
        &self.bytes
    }
}

/// Row assignments for every entity a token or coded index can name.
#[derive(Default)]
pub(crate) struct RowMap {
    pub typedef_rows: HashMap<TypeId, u32>,
    pub typeref_rows: HashMap<ExtTypeId, u32>,
    /// TypeRef rows synthesized for primitives used as type operands or
    /// bases.
    pub prim_rows: HashMap<PrimType, u32>,
    pub field_rows: HashMap<FieldId, u32>,
    pub method_rows: HashMap<MethodId, u32>,
    pub ext_field_rows: HashMap<ExtFieldId, u32>,
    pub ext_method_rows: HashMap<ExtMethodId, u32>,
}

impl RowMap {
    /// TypeDefOrRef coded index for an owned type.
    pub fn typedef_coded(&self, t: TypeId) -> Result<u32> {
        let row = self
            .typedef_rows
            .get(&t)
            .ok_or_else(|| structural_error!("type {t} has no row"))?;
        Ok(row << 2)
    }

    /// TypeDefOrRef coded index for an external type.
    pub fn typeref_coded(&self, e: ExtTypeId) -> Result<u32> {
        let row = self
            .typeref_rows
            .get(&e)
            .ok_or_else(|| structural_error!("external type {e} has no row"))?;
        Ok((row << 2) | 1)
    }

    /// Metadata token for a type reference.
    pub fn type_token(&self, tr: TypeRef) -> Result<u32> {
        match tr {
            TypeRef::Definition(t) => {
                let row = self
                    .typedef_rows
                    .get(&t)
                    .ok_or_else(|| structural_error!("type {t} has no row"))?;
                Ok(TOKEN_TYPE_DEF | row)
            }
            TypeRef::External(e) => {
                let row = self
                    .typeref_rows
                    .get(&e)
                    .ok_or_else(|| structural_error!("external type {e} has no row"))?;
                Ok(TOKEN_TYPE_REF | row)
            }
            TypeRef::Primitive(p) => {
                let row = self
                    .prim_rows
                    .get(&p)
                    .ok_or_else(|| structural_error!("primitive {p:?} has no TypeRef row"))?;
                Ok(TOKEN_TYPE_REF | row)
            }
        }
    }

    /// Metadata token for a field reference.
    pub fn field_token(&self, f: FieldRef) -> Result<u32> {
        match f {
            FieldRef::Definition(id) => {
                let row = self
                    .field_rows
                    .get(&id)
                    .ok_or_else(|| structural_error!("field {id} has no row"))?;
                Ok(TOKEN_FIELD | row)
            }
            FieldRef::External(id) => {
                let row = self
                    .ext_field_rows
                    .get(&id)
                    .ok_or_else(|| structural_error!("external field {id} has no row"))?;
                Ok(TOKEN_MEMBER_REF | row)
            }
        }
    }

    /// Metadata token for a method reference.
    pub fn method_token(&self, m: MethodRef) -> Result<u32> {
        match m {
            MethodRef::Definition(id) => {
                let row = self
                    .method_rows
                    .get(&id)
                    .ok_or_else(|| structural_error!("method {id} has no row"))?;
                Ok(TOKEN_METHOD_DEF | row)
            }
            MethodRef::External(id) => {
                let row = self
                    .ext_method_rows
                    .get(&id)
                    .ok_or_else(|| structural_error!("external method {id} has no row"))?;
                Ok(TOKEN_MEMBER_REF | row)
            }
        }
    }
}

/// CLR display names for the primitive TypeRef rows.
fn primitive_name(p: PrimType) -> &'static str {
    match p {
        PrimType::Void => "Void",
        PrimType::Bool => "Boolean",
        PrimType::Char => "Char",
        PrimType::I1 => "SByte",
        PrimType::U1 => "Byte",
        PrimType::I2 => "Int16",
        PrimType::U2 => "UInt16",
        PrimType::I4 => "Int32",
        PrimType::U4 => "UInt32",
        PrimType::I8 => "Int64",
        PrimType::U8 => "UInt64",
        PrimType::R4 => "Single",
        PrimType::R8 => "Double",
        PrimType::I => "IntPtr",
        PrimType::U => "UIntPtr",
        PrimType::Object => "Object",
        PrimType::String => "String",
    }
}

/// Serializes the module into a complete image.
pub(crate) fn write_module(module: &Module) -> Result<BinaryImage> {
    let mut strings = StringsHeap::new();
    let mut blob = BlobHeap::new();
    let mut rows = RowMap::default();
    let mut tables = Tables {
        module_name: strings.add(&module.name),
        ..Tables::default()
    };

    // Assembly references, in first-use order; primitives resolve through
    // the runtime assembly, added if nothing else references it.
    let mut assembly_rows: HashMap<String, u32> = HashMap::new();
    let assembly_row = |name: &str,
                            strings: &mut StringsHeap,
                            tables: &mut Tables,
                            assembly_rows: &mut HashMap<String, u32>| {
        if let Some(&row) = assembly_rows.get(name) {
            return row;
        }
        let name_off = strings.add(name);
        tables.assembly_refs.push(AssemblyRefRow { name: name_off });
        let row = tables.assembly_refs.len() as u32;
        assembly_rows.insert(name.to_string(), row);
        row
    };

    // TypeRef rows for the external reference table.
    for (i, ext) in module.ext_types().iter().enumerate() {
        let scope = assembly_row(&ext.assembly, &mut strings, &mut tables, &mut assembly_rows);
        let name = strings.add(&ext.name);
        let namespace = strings.add(&ext.namespace);
        tables.type_refs.push(TypeRefRow {
            scope_assembly_ref: scope,
            name,
            namespace,
        });
        rows.typeref_rows
            .insert(ExtTypeId(i as u32), tables.type_refs.len() as u32);
    }

    // Owned types take their rows before member references, whose
    // signatures may point back into the module.
    for (i, &ty) in module.type_list.iter().enumerate() {
        rows.typedef_rows.insert(ty, i as u32 + 1);
    }

    // TypeRef rows for primitives named by type operands or base clauses.
    let mut needed_prims: Vec<PrimType> = Vec::new();
    let need = |p: PrimType, needed: &mut Vec<PrimType>| {
        if !needed.contains(&p) {
            needed.push(p);
        }
    };
    for &ty in &module.type_list {
        if let Some(TypeRef::Primitive(p)) = module.type_def(ty).base {
            need(p, &mut needed_prims);
        }
        for &m in &module.type_def(ty).methods {
            let Some(body) = &module.method(m).body else {
                continue;
            };
            for instr in &body.instructions {
                if instr.conv_target().is_some() {
                    continue;
                }
                if let Operand::Type(TypeRef::Primitive(p)) = instr.operand {
                    need(p, &mut needed_prims);
                }
            }
        }
    }
    for p in needed_prims {
        let scope = assembly_row("mscorlib", &mut strings, &mut tables, &mut assembly_rows);
        let name = strings.add(primitive_name(p));
        let namespace = strings.add("System");
        tables.type_refs.push(TypeRefRow {
            scope_assembly_ref: scope,
            name,
            namespace,
        });
        rows.prim_rows.insert(p, tables.type_refs.len() as u32);
    }

    // MemberRef rows for external fields and methods.
    for (i, ext) in module.ext_fields().iter().enumerate() {
        let class = rows.typeref_coded_memberref(ext.declaring)?;
        let name = strings.add(&ext.name);
        let signature = blob.add(&signatures::field_sig(module, &rows, ext.ty)?);
        tables.member_refs.push(MemberRefRow {
            class,
            name,
            signature,
        });
        rows.ext_field_rows
            .insert(ExtFieldId(i as u32), tables.member_refs.len() as u32);
    }
    for (i, ext) in module.ext_methods().iter().enumerate() {
        let class = rows.typeref_coded_memberref(ext.declaring)?;
        let name = strings.add(&ext.name);
        let signature = blob.add(&signatures::method_sig(module, &rows, &ext.signature)?);
        tables.member_refs.push(MemberRefRow {
            class,
            name,
            signature,
        });
        rows.ext_method_rows
            .insert(ExtMethodId(i as u32), tables.member_refs.len() as u32);
    }

    // Member rows, grouped by declaring type in list order.
    let mut field_row = 0u32;
    let mut method_row = 0u32;
    let mut member_lists: Vec<(u32, u32)> = Vec::with_capacity(module.type_list.len());
    for &ty in &module.type_list {
        member_lists.push((field_row + 1, method_row + 1));
        for &f in &module.type_def(ty).fields {
            field_row += 1;
            rows.field_rows.insert(f, field_row);
        }
        for &m in &module.type_def(ty).methods {
            method_row += 1;
            rows.method_rows.insert(m, method_row);
        }
    }

    // Local-variable signatures, one StandAloneSig row per distinct blob.
    let mut local_sig_tokens: HashMap<MethodId, u32> = HashMap::new();
    let mut sig_rows: HashMap<u32, u32> = HashMap::new();
    for &ty in &module.type_list {
        for &m in &module.type_def(ty).methods {
            let Some(body) = &module.method(m).body else {
                continue;
            };
            if body.locals.is_empty() {
                continue;
            }
            let offset = blob.add(&signatures::locals_sig(module, &rows, &body.locals)?);
            let row = *sig_rows.entry(offset).or_insert_with(|| {
                tables.standalone_sigs.push(offset);
                tables.standalone_sigs.len() as u32
            });
            local_sig_tokens.insert(m, TOKEN_STAND_ALONE_SIG | row);
        }
    }

    // Encode bodies and lay out the .text section.
    let text_rva = pe::text_rva();
    let mut text: Vec<u8> = vec![0; CLI_HEADER_SIZE as usize];
    let mut method_rvas: HashMap<MethodId, u32> = HashMap::new();
    for &ty in &module.type_list {
        for &m in &module.type_def(ty).methods {
            let Some(body) = &module.method(m).body else {
                continue;
            };
            let token = local_sig_tokens.get(&m).copied().unwrap_or(0);
            let encoded = bodies::encode_body(&rows, body, token)?;
            if encoded.fat {
                while text.len() % 4 != 0 {
                    text.push(0);
                }
            }
            method_rvas.insert(m, text_rva + text.len() as u32);
            text.extend_from_slice(&encoded.bytes);
        }
    }

    // Field RVA data, 8-aligned.
    for &ty in &module.type_list {
        for &f in &module.type_def(ty).fields {
            let Some(data) = &module.field(f).rva_data else {
                continue;
            };
            while text.len() % 8 != 0 {
                text.push(0);
            }
            tables.field_rvas.push(FieldRvaRow {
                rva: text_rva + text.len() as u32,
                field: rows.field_rows[&f],
            });
            text.extend_from_slice(data);
        }
    }

    // Table rows that need the rows and heaps above.
    for (i, &ty) in module.type_list.iter().enumerate() {
        let def = module.type_def(ty);
        let extends = match def.base {
            None => 0,
            Some(TypeRef::Definition(b)) => rows.typedef_coded(b)?,
            Some(TypeRef::External(e)) => rows.typeref_coded(e)?,
            Some(TypeRef::Primitive(p)) => {
                let row = rows
                    .prim_rows
                    .get(&p)
                    .ok_or_else(|| structural_error!("primitive base {p:?} has no TypeRef row"))?;
                (row << 2) | 1
            }
        };
        tables.type_defs.push(TypeDefRow {
            flags: def.flags.bits() & !TYPE_MODEL_MASK,
            name: strings.add_opt(def.name.as_deref()),
            namespace: strings.add_opt(def.namespace.as_deref()),
            extends,
            field_list: member_lists[i].0,
            method_list: member_lists[i].1,
        });

        for iface in &def.interfaces {
            let coded = match *iface {
                TypeRef::Definition(d) => rows.typedef_coded(d)?,
                TypeRef::External(e) => rows.typeref_coded(e)?,
                TypeRef::Primitive(p) => {
                    return Err(structural_error!(
                        "type {ty} implements primitive {p:?}"
                    ))
                }
            };
            tables.interface_impls.push((i as u32 + 1, coded));
        }

        if let Some(layout) = def.layout {
            tables.class_layouts.push(ClassLayoutRow {
                packing: layout.packing,
                size: layout.size,
                parent: i as u32 + 1,
            });
        }

        for &f in &def.fields {
            let field = module.field(f);
            tables.fields.push(FieldRow {
                flags: field.flags.bits(),
                name: strings.add_opt(field.name.as_deref()),
                signature: blob.add(&signatures::field_sig(module, &rows, field.ty)?),
            });
            if let Some(constant) = field.constant {
                let (kind, value): (u8, Vec<u8>) = match constant {
                    Constant::I4(v) => (0x08, v.to_le_bytes().to_vec()),
                    Constant::I8(v) => (0x0A, v.to_le_bytes().to_vec()),
                    Constant::R8(v) => (0x0D, v.to_le_bytes().to_vec()),
                };
                tables.constants.push(ConstantRow {
                    kind,
                    parent: rows.field_rows[&f] << 2,
                    value: blob.add(&value),
                });
            }
        }

        for &m in &def.methods {
            let method = module.method(m);
            tables.methods.push(MethodRow {
                rva: method_rvas.get(&m).copied().unwrap_or(0),
                flags: method.flags.bits(),
                name: strings.add_opt(method.name.as_deref()),
                signature: blob.add(&signatures::method_sig(module, &rows, &method.signature)?),
            });
        }
    }

    // Metadata root with the four streams.
    let wide_strings = strings.wide();
    let wide_blob = blob.wide();
    let table_stream = tables.serialize(wide_strings, wide_blob);
    let metadata = metadata_root(
        &table_stream,
        &strings.finish(),
        &heaps::guid_heap(),
        &blob.finish(),
    );

    while text.len() % 4 != 0 {
        text.push(0);
    }
    let metadata_rva = text_rva + text.len() as u32;
    let metadata_size = metadata.len() as u32;
    text.extend_from_slice(&metadata);

    write_cli_header(&mut text, metadata_rva, metadata_size);

    let bytes = pe::wrap(&text);
    debug!(
        image = bytes.len(),
        metadata = metadata_size,
        types = module.type_list.len(),
        "serialized module image"
    );
    Ok(BinaryImage { bytes })
}

impl RowMap {
    /// MemberRefParent coded index for an external declaring type.
    fn typeref_coded_memberref(&self, e: ExtTypeId) -> Result<u32> {
        let row = self
            .typeref_rows
            .get(&e)
            .ok_or_else(|| structural_error!("external type {e} has no row"))?;
        Ok((row << 3) | 1)
    }
}

fn write_cli_header(text: &mut [u8], metadata_rva: u32, metadata_size: u32) {
    text[0..4].copy_from_slice(&CLI_HEADER_SIZE.to_le_bytes());
    text[4..6].copy_from_slice(&2u16.to_le_bytes()); // runtime major
    text[6..8].copy_from_slice(&5u16.to_le_bytes()); // runtime minor
    text[8..12].copy_from_slice(&metadata_rva.to_le_bytes());
    text[12..16].copy_from_slice(&metadata_size.to_le_bytes());
    text[16..20].copy_from_slice(&COMIMAGE_FLAGS_ILONLY.to_le_bytes());
    // Entry point token and the remaining directories stay zero.
}

/// Assembles the "BSJB" metadata root around the four streams.
fn metadata_root(tables: &[u8], strings: &[u8], guid: &[u8], blob: &[u8]) -> Vec<u8> {
    const VERSION: &[u8] = b"v4.0.30319\0\0";
    let streams: [(&str, &[u8]); 4] = [
        ("#~", tables),
        ("#Strings", strings),
        ("#GUID", guid),
        ("#Blob", blob),
    ];

    let stream_name_len = |name: &str| (name.len() + 1).div_ceil(4) * 4;
    let header_len: usize = 16
        + VERSION.len()
        + 4
        + streams
            .iter()
            .map(|(name, _)| 8 + stream_name_len(name))
            .sum::<usize>();

    let mut out = Vec::with_capacity(header_len + streams.iter().map(|(_, d)| d.len()).sum::<usize>());
    out.extend_from_slice(&0x424A_5342u32.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(&(VERSION.len() as u32).to_le_bytes());
    out.extend_from_slice(VERSION);
    out.extend_from_slice(&0u16.to_le_bytes()); // flags
    out.extend_from_slice(&(streams.len() as u16).to_le_bytes());

    let mut offset = header_len;
    for (name, data) in streams {
        out.extend_from_slice(&(offset as u32).to_le_bytes());
        out.extend_from_slice(&(data.len() as u32).to_le_bytes());
        out.extend_from_slice(name.as_bytes());
        for _ in name.len()..stream_name_len(name) {
            out.push(0);
        }
        offset += data.len();
    }
    for (_, data) in streams {
        out.extend_from_slice(data);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{
        Body, Field, FieldAttributes, Method, MethodAttributes, MethodSignature, Opcode, TypeDef,
    };

    fn tiny_module() -> Module {
        let mut module = Module::new("mini");
        let ty = module.add_type(TypeDef::new(None, "A", TypeAttributes::PUBLIC));
        let mut m = Method::new(
            "M",
            MethodAttributes::PUBLIC | MethodAttributes::STATIC,
            MethodSignature::stat(TypeRef::Primitive(PrimType::Void), vec![]),
        );
        let mut b = Body::new();
        b.push(Opcode::Ret, Operand::None);
        b.max_stack = 0;
        m.body = Some(b);
        module.add_method(ty, m);
        module
    }

    #[test]
    fn image_has_pe_and_metadata_signatures() {
        let module = tiny_module();
        let image = write_module(&module).unwrap();
        assert_eq!(&image[..2], b"MZ");
        let bsjb = 0x424A_5342u32.to_le_bytes();
        assert!(image
            .windows(4)
            .any(|w| w == bsjb));
    }

    #[test]
    fn field_rva_data_lands_in_image() {
        let mut module = tiny_module();
        let ty = module.type_list[0];
        let mut field = Field::new(
            "blob",
            TypeRef::Primitive(PrimType::U1),
            FieldAttributes::ASSEMBLY | FieldAttributes::STATIC | FieldAttributes::HAS_FIELD_RVA,
        );
        field.rva_data = Some(vec![0xDE, 0xAD, 0xBE, 0xEF]);
        module.add_field(ty, field);

        let image = write_module(&module).unwrap();
        assert!(image
            .windows(4)
            .any(|w| w == [0xDE, 0xAD, 0xBE, 0xEF]));
    }

    #[test]
    fn second_build_of_same_graph_is_identical() {
        let module = tiny_module();
        let a = write_module(&module).unwrap();
        let b = write_module(&module).unwrap();
        assert_eq!(&*a, &*b);
    }
}
