//! Signature blob encoding (ECMA-335 II.23.2).
//!
//! Field, method and local-variable signatures over the graph's reference
//! unions. Primitives encode as their `ELEMENT_TYPE_*` byte; owned and
//! external types as `CLASS`/`VALUETYPE` followed by a compressed
//! TypeDefOrRef coded index resolved through the row map.

use crate::{
    graph::{MethodSignature, Module, PrimType, TypeRef},
    write::heaps::write_compressed_u32,
    write::RowMap,
    Result,
};

const ELEMENT_TYPE_VALUETYPE: u8 = 0x11;
const ELEMENT_TYPE_CLASS: u8 = 0x12;

const SIG_FIELD: u8 = 0x06;
const SIG_LOCALS: u8 = 0x07;
const SIG_HASTHIS: u8 = 0x20;

/// `ELEMENT_TYPE_*` byte for a primitive.
pub fn element_type(p: PrimType) -> u8 {
    match p {
        PrimType::Void => 0x01,
        PrimType::Bool => 0x02,
        PrimType::Char => 0x03,
        PrimType::I1 => 0x04,
        PrimType::U1 => 0x05,
        PrimType::I2 => 0x06,
        PrimType::U2 => 0x07,
        PrimType::I4 => 0x08,
        PrimType::U4 => 0x09,
        PrimType::I8 => 0x0A,
        PrimType::U8 => 0x0B,
        PrimType::R4 => 0x0C,
        PrimType::R8 => 0x0D,
        PrimType::String => 0x0E,
        PrimType::I => 0x18,
        PrimType::U => 0x19,
        PrimType::Object => 0x1C,
    }
}

fn encode_type(out: &mut Vec<u8>, module: &Module, rows: &RowMap, tr: TypeRef) -> Result<()> {
    match tr {
        TypeRef::Primitive(p) => out.push(element_type(p)),
        TypeRef::Definition(t) => {
            let kind = if module.type_def(t).is_value_type() {
                ELEMENT_TYPE_VALUETYPE
            } else {
                ELEMENT_TYPE_CLASS
            };
            out.push(kind);
            write_compressed_u32(out, rows.typedef_coded(t)?);
        }
        TypeRef::External(e) => {
            let kind = if module.ext_type(e).value_type {
                ELEMENT_TYPE_VALUETYPE
            } else {
                ELEMENT_TYPE_CLASS
            };
            out.push(kind);
            write_compressed_u32(out, rows.typeref_coded(e)?);
        }
    }
    Ok(())
}

/// Field signature blob.
pub fn field_sig(module: &Module, rows: &RowMap, ty: TypeRef) -> Result<Vec<u8>> {
    let mut out = vec![SIG_FIELD];
    encode_type(&mut out, module, rows, ty)?;
    Ok(out)
}

/// Method signature blob (`DEFAULT` calling convention, `HASTHIS` for
/// instance methods).
pub fn method_sig(module: &Module, rows: &RowMap, sig: &MethodSignature) -> Result<Vec<u8>> {
    let mut out = vec![if sig.instance { SIG_HASTHIS } else { 0x00 }];
    write_compressed_u32(&mut out, sig.params.len() as u32);
    encode_type(&mut out, module, rows, sig.ret)?;
    for &p in &sig.params {
        encode_type(&mut out, module, rows, p)?;
    }
    Ok(out)
}

/// Local-variable signature blob for a StandAloneSig row.
pub fn locals_sig(module: &Module, rows: &RowMap, locals: &[TypeRef]) -> Result<Vec<u8>> {
    let mut out = vec![SIG_LOCALS];
    write_compressed_u32(&mut out, locals.len() as u32);
    for &l in locals {
        encode_type(&mut out, module, rows, l)?;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{TypeAttributes, TypeDef};

    #[test]
    fn primitive_method_sig() {
        let module = Module::new("m");
        let rows = RowMap::default();
        let sig = MethodSignature::stat(
            TypeRef::Primitive(PrimType::I4),
            vec![TypeRef::Primitive(PrimType::I4), TypeRef::Primitive(PrimType::Bool)],
        );
        let blob = method_sig(&module, &rows, &sig).unwrap();
        assert_eq!(blob, vec![0x00, 0x02, 0x08, 0x08, 0x02]);
    }

    #[test]
    fn instance_sig_has_this() {
        let module = Module::new("m");
        let rows = RowMap::default();
        let sig = MethodSignature::instance(TypeRef::Primitive(PrimType::Void), vec![]);
        let blob = method_sig(&module, &rows, &sig).unwrap();
        assert_eq!(blob, vec![0x20, 0x00, 0x01]);
    }

    #[test]
    fn class_reference_uses_coded_index() {
        let mut module = Module::new("m");
        let t = module.add_type(TypeDef::new(None, "A", TypeAttributes::PUBLIC));
        let mut rows = RowMap::default();
        rows.typedef_rows.insert(t, 1);
        let blob = field_sig(&module, &rows, TypeRef::Definition(t)).unwrap();
        // CLASS, coded (1 << 2 | 0) = 4.
        assert_eq!(blob, vec![0x06, 0x12, 0x04]);
    }
}
