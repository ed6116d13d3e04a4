//! The #~ tables stream (ECMA-335 II.24.2.6).
//!
//! Row data is assembled by the image builder; this module owns the physical
//! encoding: the stream header with its valid/sorted bitmasks, per-table row
//! counts, and rows with correctly sized simple, heap and coded indexes.
//!
//! Only the tables the output actually needs exist here: Module, TypeRef,
//! TypeDef, Field, MethodDef, InterfaceImpl, MemberRef, Constant,
//! ClassLayout, StandAloneSig, FieldRVA and AssemblyRef.

const TABLE_MODULE: u64 = 1 << 0x00;
const TABLE_TYPE_REF: u64 = 1 << 0x01;
const TABLE_TYPE_DEF: u64 = 1 << 0x02;
const TABLE_FIELD: u64 = 1 << 0x04;
const TABLE_METHOD_DEF: u64 = 1 << 0x06;
const TABLE_INTERFACE_IMPL: u64 = 1 << 0x09;
const TABLE_MEMBER_REF: u64 = 1 << 0x0A;
const TABLE_CONSTANT: u64 = 1 << 0x0B;
const TABLE_CLASS_LAYOUT: u64 = 1 << 0x0F;
const TABLE_STAND_ALONE_SIG: u64 = 1 << 0x11;
const TABLE_FIELD_RVA: u64 = 1 << 0x1D;
const TABLE_ASSEMBLY_REF: u64 = 1 << 0x23;

/// TypeRef row: resolution scope is always an AssemblyRef.
pub struct TypeRefRow {
    pub scope_assembly_ref: u32,
    pub name: u32,
    pub namespace: u32,
}

pub struct TypeDefRow {
    pub flags: u32,
    pub name: u32,
    pub namespace: u32,
    /// TypeDefOrRef coded index, zero for no base.
    pub extends: u32,
    pub field_list: u32,
    pub method_list: u32,
}

pub struct FieldRow {
    pub flags: u16,
    pub name: u32,
    pub signature: u32,
}

pub struct MethodRow {
    pub rva: u32,
    pub flags: u16,
    pub name: u32,
    pub signature: u32,
}

pub struct MemberRefRow {
    /// MemberRefParent coded index (always a TypeRef here).
    pub class: u32,
    pub name: u32,
    pub signature: u32,
}

pub struct ConstantRow {
    /// `ELEMENT_TYPE_*` of the value.
    pub kind: u8,
    /// HasConstant coded index (always a Field here).
    pub parent: u32,
    pub value: u32,
}

pub struct ClassLayoutRow {
    pub packing: u16,
    pub size: u32,
    pub parent: u32,
}

pub struct FieldRvaRow {
    pub rva: u32,
    pub field: u32,
}

pub struct AssemblyRefRow {
    pub name: u32,
}

/// All row data for one image, in final order.
#[derive(Default)]
pub struct Tables {
    pub module_name: u32,
    pub type_refs: Vec<TypeRefRow>,
    pub type_defs: Vec<TypeDefRow>,
    pub fields: Vec<FieldRow>,
    pub methods: Vec<MethodRow>,
    pub interface_impls: Vec<(u32, u32)>,
    pub member_refs: Vec<MemberRefRow>,
    pub constants: Vec<ConstantRow>,
    pub class_layouts: Vec<ClassLayoutRow>,
    pub standalone_sigs: Vec<u32>,
    pub field_rvas: Vec<FieldRvaRow>,
    pub assembly_refs: Vec<AssemblyRefRow>,
}

struct Sink {
    out: Vec<u8>,
}

impl Sink {
    fn u8(&mut self, v: u8) {
        self.out.push(v);
    }
    fn u16(&mut self, v: u16) {
        self.out.extend_from_slice(&v.to_le_bytes());
    }
    fn u32(&mut self, v: u32) {
        self.out.extend_from_slice(&v.to_le_bytes());
    }
    fn u64(&mut self, v: u64) {
        self.out.extend_from_slice(&v.to_le_bytes());
    }
    /// A simple, heap or coded index in its computed width.
    fn idx(&mut self, v: u32, wide: bool) {
        if wide {
            self.u32(v);
        } else {
            self.u16(v as u16);
        }
    }
}

impl Tables {
    /// Serializes the stream. `wide_strings`/`wide_blob` mirror the finished
    /// heap sizes.
    pub fn serialize(&self, wide_strings: bool, wide_blob: bool) -> Vec<u8> {
        let type_ref_count = self.type_refs.len() as u32;
        let type_def_count = self.type_defs.len() as u32;
        let field_count = self.fields.len() as u32;
        let method_count = self.methods.len() as u32;

        let wide = |count: u32| count > 0xFFFF;
        // Coded index width: wide when any participating table overflows the
        // tag-shortened 16-bit range.
        let coded_wide = |bits: u32, counts: &[u32]| {
            let limit = 1u32 << (16 - bits);
            counts.iter().any(|&c| c >= limit)
        };

        let type_def_or_ref_wide = coded_wide(2, &[type_def_count, type_ref_count]);
        let resolution_scope_wide = coded_wide(2, &[self.assembly_refs.len() as u32]);
        let member_ref_parent_wide = coded_wide(3, &[type_def_count, type_ref_count]);
        let has_constant_wide = coded_wide(2, &[field_count]);

        let mut valid = TABLE_MODULE;
        let mut counts: Vec<u32> = vec![1];
        let mut add = |mask: u64, count: u32, valid: &mut u64, counts: &mut Vec<u32>| {
            if count > 0 {
                *valid |= mask;
                counts.push(count);
            }
        };
        add(TABLE_TYPE_REF, type_ref_count, &mut valid, &mut counts);
        add(TABLE_TYPE_DEF, type_def_count, &mut valid, &mut counts);
        add(TABLE_FIELD, field_count, &mut valid, &mut counts);
        add(TABLE_METHOD_DEF, method_count, &mut valid, &mut counts);
        add(
            TABLE_INTERFACE_IMPL,
            self.interface_impls.len() as u32,
            &mut valid,
            &mut counts,
        );
        add(
            TABLE_MEMBER_REF,
            self.member_refs.len() as u32,
            &mut valid,
            &mut counts,
        );
        add(
            TABLE_CONSTANT,
            self.constants.len() as u32,
            &mut valid,
            &mut counts,
        );
        add(
            TABLE_CLASS_LAYOUT,
            self.class_layouts.len() as u32,
            &mut valid,
            &mut counts,
        );
        add(
            TABLE_STAND_ALONE_SIG,
            self.standalone_sigs.len() as u32,
            &mut valid,
            &mut counts,
        );
        add(
            TABLE_FIELD_RVA,
            self.field_rvas.len() as u32,
            &mut valid,
            &mut counts,
        );
        add(
            TABLE_ASSEMBLY_REF,
            self.assembly_refs.len() as u32,
            &mut valid,
            &mut counts,
        );

        let sorted = TABLE_INTERFACE_IMPL | TABLE_CONSTANT | TABLE_CLASS_LAYOUT | TABLE_FIELD_RVA;

        let mut heap_sizes = 0u8;
        if wide_strings {
            heap_sizes |= 0x01;
        }
        if wide_blob {
            heap_sizes |= 0x04;
        }

        let mut sink = Sink { out: Vec::new() };
        sink.u32(0); // reserved
        sink.u8(2); // major version
        sink.u8(0); // minor version
        sink.u8(heap_sizes);
        sink.u8(1); // reserved
        sink.u64(valid);
        sink.u64(sorted);
        for count in counts {
            sink.u32(count);
        }

        let s = wide_strings;
        let b = wide_blob;

        // Module: Generation, Name, Mvid, EncId, EncBaseId. The #GUID heap
        // holds one zero guid; EncId/EncBaseId are null.
        sink.u16(0);
        sink.idx(self.module_name, s);
        sink.idx(1, false);
        sink.idx(0, false);
        sink.idx(0, false);

        for row in &self.type_refs {
            sink.idx((row.scope_assembly_ref << 2) | 2, resolution_scope_wide);
            sink.idx(row.name, s);
            sink.idx(row.namespace, s);
        }

        for row in &self.type_defs {
            sink.u32(row.flags);
            sink.idx(row.name, s);
            sink.idx(row.namespace, s);
            sink.idx(row.extends, type_def_or_ref_wide);
            sink.idx(row.field_list, wide(field_count));
            sink.idx(row.method_list, wide(method_count));
        }

        for row in &self.fields {
            sink.u16(row.flags);
            sink.idx(row.name, s);
            sink.idx(row.signature, b);
        }

        for row in &self.methods {
            sink.u32(row.rva);
            sink.u16(0); // ImplFlags: IL, managed
            sink.u16(row.flags);
            sink.idx(row.name, s);
            sink.idx(row.signature, b);
            // ParamList: the Param table is empty, every row points past it.
            sink.idx(1, false);
        }

        for &(class, interface) in &self.interface_impls {
            sink.idx(class, wide(type_def_count));
            sink.idx(interface, type_def_or_ref_wide);
        }

        for row in &self.member_refs {
            sink.idx(row.class, member_ref_parent_wide);
            sink.idx(row.name, s);
            sink.idx(row.signature, b);
        }

        for row in &self.constants {
            sink.u8(row.kind);
            sink.u8(0); // padding
            sink.idx(row.parent, has_constant_wide);
            sink.idx(row.value, b);
        }

        for row in &self.class_layouts {
            sink.u16(row.packing);
            sink.u32(row.size);
            sink.idx(row.parent, wide(type_def_count));
        }

        for &sig in &self.standalone_sigs {
            sink.idx(sig, b);
        }

        for row in &self.field_rvas {
            sink.u32(row.rva);
            sink.idx(row.field, wide(field_count));
        }

        for row in &self.assembly_refs {
            // Version 0.0.0.0, no flags, no public key, no culture, no hash.
            sink.u16(0);
            sink.u16(0);
            sink.u16(0);
            sink.u16(0);
            sink.u32(0);
            sink.idx(0, b);
            sink.idx(row.name, s);
            sink.idx(0, s);
            sink.idx(0, b);
        }

        sink.out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_stream_shape() {
        let tables = Tables {
            module_name: 1,
            ..Tables::default()
        };
        let bytes = tables.serialize(false, false);

        // Header: reserved, 2.0, heap sizes, reserved, valid, sorted.
        assert_eq!(bytes[4], 2);
        assert_eq!(bytes[5], 0);
        let valid = u64::from_le_bytes(bytes[8..16].try_into().unwrap());
        assert_eq!(valid, TABLE_MODULE);
        // One row count (Module = 1) then the Module row.
        let count = u32::from_le_bytes(bytes[24..28].try_into().unwrap());
        assert_eq!(count, 1);
        assert_eq!(bytes.len(), 28 + 2 + 2 + 2 + 2 + 2);
    }

    #[test]
    fn valid_mask_tracks_populated_tables() {
        let tables = Tables {
            module_name: 1,
            type_defs: vec![TypeDefRow {
                flags: 0,
                name: 1,
                namespace: 0,
                extends: 0,
                field_list: 1,
                method_list: 1,
            }],
            assembly_refs: vec![AssemblyRefRow { name: 1 }],
            ..Tables::default()
        };
        let bytes = tables.serialize(false, false);
        let valid = u64::from_le_bytes(bytes[8..16].try_into().unwrap());
        assert_eq!(valid, TABLE_MODULE | TABLE_TYPE_DEF | TABLE_ASSEMBLY_REF);
    }
}
