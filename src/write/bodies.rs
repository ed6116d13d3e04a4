//! Method body serialization: tiny/fat headers and instruction encoding
//! (ECMA-335 II.25.4).
//!
//! Branch operands are instruction identities until this point; encoding
//! resolves them to byte displacements with the usual short/long relaxation
//! (start every branch short, widen the ones whose displacement overflows an
//! `i8`, repeat until stable).

use std::collections::HashMap;

use crate::{
    graph::{Body, InstrId, Opcode, Operand, PrimType, TypeRef},
    write::RowMap,
    Result,
};

const TINY_FORMAT: u8 = 0x02;
const FAT_FLAGS: u16 = 0x3003; // fat format, header size 3 dwords
const FAT_INIT_LOCALS: u16 = 0x0010;

/// A fully encoded body, header included, ready for placement in the image.
pub struct EncodedBody {
    pub bytes: Vec<u8>,
    /// Fat bodies must be 4-aligned in the image.
    pub fat: bool,
}

/// Encodes one body. `local_sig_token` is the StandAloneSig token, zero when
/// the body declares no locals.
pub fn encode_body(rows: &RowMap, body: &Body, local_sig_token: u32) -> Result<EncodedBody> {
    let code = encode_instructions(rows, body)?;

    let tiny = code.len() < 64 && body.max_stack <= 8 && body.locals.is_empty();
    if tiny {
        let mut bytes = Vec::with_capacity(1 + code.len());
        bytes.push(TINY_FORMAT | ((code.len() as u8) << 2));
        bytes.extend_from_slice(&code);
        return Ok(EncodedBody { bytes, fat: false });
    }

    let mut flags = FAT_FLAGS;
    if body.init_locals {
        flags |= FAT_INIT_LOCALS;
    }
    let mut bytes = Vec::with_capacity(12 + code.len());
    bytes.extend_from_slice(&flags.to_le_bytes());
    bytes.extend_from_slice(&body.max_stack.to_le_bytes());
    bytes.extend_from_slice(&(code.len() as u32).to_le_bytes());
    bytes.extend_from_slice(&local_sig_token.to_le_bytes());
    bytes.extend_from_slice(&code);
    Ok(EncodedBody { bytes, fat: true })
}

fn encode_instructions(rows: &RowMap, body: &Body) -> Result<Vec<u8>> {
    let n = body.instructions.len();

    // Pre-encode everything that does not depend on layout; branches get a
    // size that the relaxation loop below settles.
    let mut fixed: Vec<Option<Vec<u8>>> = Vec::with_capacity(n);
    let mut long = vec![false; n];
    for instr in &body.instructions {
        if is_branch(instr.opcode) {
            fixed.push(None);
        } else {
            fixed.push(Some(encode_simple(rows, instr)?));
        }
    }

    let size = |i: usize, long: &[bool]| -> u32 {
        match &fixed[i] {
            Some(bytes) => bytes.len() as u32,
            None => {
                if long[i] {
                    5
                } else {
                    2
                }
            }
        }
    };

    let index_of: HashMap<InstrId, usize> = body
        .instructions
        .iter()
        .enumerate()
        .map(|(i, instr)| (instr.id, i))
        .collect();

    loop {
        let mut offsets = vec![0u32; n + 1];
        for i in 0..n {
            offsets[i + 1] = offsets[i] + size(i, &long);
        }

        let mut widened = false;
        for (i, instr) in body.instructions.iter().enumerate() {
            if !is_branch(instr.opcode) || long[i] {
                continue;
            }
            let target = branch_target_index(instr, &index_of, body)?;
            let disp = i64::from(offsets[target]) - i64::from(offsets[i + 1]);
            if i8::try_from(disp).is_err() {
                long[i] = true;
                widened = true;
            }
        }
        if !widened {
            break;
        }
    }

    let mut offsets = vec![0u32; n + 1];
    for i in 0..n {
        offsets[i + 1] = offsets[i] + size(i, &long);
    }

    let mut out = Vec::with_capacity(offsets[n] as usize);
    for (i, instr) in body.instructions.iter().enumerate() {
        match &fixed[i] {
            Some(bytes) => out.extend_from_slice(bytes),
            None => {
                let target = branch_target_index(instr, &index_of, body)?;
                let disp = i64::from(offsets[target]) - i64::from(offsets[i + 1]);
                if long[i] {
                    out.push(match instr.opcode {
                        Opcode::Br => 0x38,
                        Opcode::BrFalse => 0x39,
                        _ => 0x3A,
                    });
                    out.extend_from_slice(&(disp as i32).to_le_bytes());
                } else {
                    out.push(match instr.opcode {
                        Opcode::Br => 0x2B,
                        Opcode::BrFalse => 0x2C,
                        _ => 0x2D,
                    });
                    out.push(disp as i8 as u8);
                }
            }
        }
    }
    Ok(out)
}

fn is_branch(op: Opcode) -> bool {
    matches!(op, Opcode::Br | Opcode::BrTrue | Opcode::BrFalse)
}

fn branch_target_index(
    instr: &crate::graph::Instruction,
    index_of: &HashMap<InstrId, usize>,
    body: &Body,
) -> Result<usize> {
    let Operand::Target(t) = instr.operand else {
        return Err(structural_error!("branch {} has no target operand", instr.id));
    };
    index_of.get(&t).copied().ok_or_else(|| {
        structural_error!(
            "branch {} targets {t}, absent from a body of {} instructions",
            instr.id,
            body.instructions.len()
        )
    })
}

/// Encodes one non-branch instruction.
#[allow(clippy::too_many_lines)]
fn encode_simple(rows: &RowMap, instr: &crate::graph::Instruction) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(5);
    match (instr.opcode, instr.operand) {
        (Opcode::Nop, _) => out.push(0x00),
        (Opcode::Ret, _) => out.push(0x2A),
        (Opcode::Dup, _) => out.push(0x25),
        (Opcode::Pop, _) => out.push(0x26),
        (Opcode::LdNull, _) => out.push(0x14),

        (Opcode::LdcI4, Operand::Int(v)) => {
            if (-1..=8).contains(&v) {
                out.push(0x15 + (v + 1) as u8);
            } else if let Ok(b) = i8::try_from(v) {
                out.push(0x1F);
                out.push(b as u8);
            } else {
                out.push(0x20);
                out.extend_from_slice(&(v as i32).to_le_bytes());
            }
        }
        (Opcode::LdcI8, Operand::Int(v)) => {
            out.push(0x21);
            out.extend_from_slice(&v.to_le_bytes());
        }
        (Opcode::LdcR8, Operand::Float(v)) => {
            out.push(0x23);
            out.extend_from_slice(&v.to_le_bytes());
        }

        (Opcode::Ldloc, Operand::Local(idx)) => short_form(&mut out, idx, 0x06, 0x11, 0x0C),
        (Opcode::Stloc, Operand::Local(idx)) => short_form(&mut out, idx, 0x0A, 0x13, 0x0E),
        (Opcode::Ldloca, Operand::Local(idx)) => addr_form(&mut out, idx, 0x12, 0x0D),
        (Opcode::Ldarg, Operand::Arg(idx)) => short_form(&mut out, idx, 0x02, 0x0E, 0x09),
        (Opcode::Ldarga, Operand::Arg(idx)) => addr_form(&mut out, idx, 0x0F, 0x0A),
        (Opcode::Starg, Operand::Arg(idx)) => addr_form(&mut out, idx, 0x10, 0x0B),

        (Opcode::Ldfld, Operand::Field(f)) => token(&mut out, 0x7B, rows.field_token(f)?),
        (Opcode::Stfld, Operand::Field(f)) => token(&mut out, 0x7D, rows.field_token(f)?),
        (Opcode::Ldsfld, Operand::Field(f)) => token(&mut out, 0x7E, rows.field_token(f)?),
        (Opcode::Ldsflda, Operand::Field(f)) => token(&mut out, 0x7F, rows.field_token(f)?),
        (Opcode::Stsfld, Operand::Field(f)) => token(&mut out, 0x80, rows.field_token(f)?),

        (Opcode::Call, Operand::Method(m)) => token(&mut out, 0x28, rows.method_token(m)?),
        (Opcode::NewObj, Operand::Method(m)) => token(&mut out, 0x73, rows.method_token(m)?),
        (Opcode::NewArr, Operand::Type(t)) => token(&mut out, 0x8D, rows.type_token(t)?),
        (Opcode::LdToken, Operand::Field(f)) => token(&mut out, 0xD0, rows.field_token(f)?),
        (Opcode::LdToken, Operand::Type(t)) => token(&mut out, 0xD0, rows.type_token(t)?),
        (Opcode::LdToken, Operand::Method(m)) => token(&mut out, 0xD0, rows.method_token(m)?),

        (Opcode::Add, _) => out.push(0x58),
        (Opcode::Sub, _) => out.push(0x59),
        (Opcode::Mul, _) => out.push(0x5A),
        (Opcode::Div, _) => out.push(0x5B),
        (Opcode::Rem, _) => out.push(0x5D),
        (Opcode::And, _) => out.push(0x5F),
        (Opcode::Or, _) => out.push(0x60),
        (Opcode::Xor, _) => out.push(0x61),
        (Opcode::Shl, _) => out.push(0x62),
        (Opcode::Shr, _) => out.push(0x63),
        (Opcode::Neg, _) => out.push(0x65),
        (Opcode::Not, _) => out.push(0x66),

        (Opcode::Ceq, _) => out.extend_from_slice(&[0xFE, 0x01]),
        (Opcode::Cgt, _) => out.extend_from_slice(&[0xFE, 0x02]),
        (Opcode::Clt, _) => out.extend_from_slice(&[0xFE, 0x04]),

        (Opcode::Conv, Operand::Type(TypeRef::Primitive(p))) => match p {
            PrimType::I1 => out.push(0x67),
            PrimType::I2 => out.push(0x68),
            PrimType::I4 => out.push(0x69),
            PrimType::I8 => out.push(0x6A),
            PrimType::R4 => out.push(0x6B),
            PrimType::R8 => out.push(0x6C),
            PrimType::U4 => out.push(0x6D),
            PrimType::U8 => out.push(0x6E),
            PrimType::U1 | PrimType::Bool => out.push(0xD2),
            PrimType::U2 | PrimType::Char => out.push(0xD1),
            PrimType::I => out.push(0xD3),
            PrimType::U => out.push(0xE0),
            _ => {
                return Err(structural_error!(
                    "conversion {} has no encodable width",
                    instr.id
                ))
            }
        },

        _ => {
            return Err(structural_error!(
                "instruction {} ({}) has operand {:?} with no encoding",
                instr.id,
                instr.opcode,
                instr.operand
            ))
        }
    }
    Ok(out)
}

/// Short forms 0..=3, `.s` with a `u8` index, two-byte opcode with a `u16`.
fn short_form(out: &mut Vec<u8>, idx: u16, base: u8, short: u8, wide_low: u8) {
    if idx <= 3 {
        out.push(base + idx as u8);
    } else if idx <= 0xFF {
        out.push(short);
        out.push(idx as u8);
    } else {
        out.extend_from_slice(&[0xFE, wide_low]);
        out.extend_from_slice(&idx.to_le_bytes());
    }
}

/// Address-style forms: `.s` with a `u8` index or the two-byte wide opcode.
fn addr_form(out: &mut Vec<u8>, idx: u16, short: u8, wide_low: u8) {
    if idx <= 0xFF {
        out.push(short);
        out.push(idx as u8);
    } else {
        out.extend_from_slice(&[0xFE, wide_low]);
        out.extend_from_slice(&idx.to_le_bytes());
    }
}

fn token(out: &mut Vec<u8>, op: u8, tok: u32) {
    out.push(op);
    out.extend_from_slice(&tok.to_le_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(body: &Body) -> Vec<u8> {
        let rows = RowMap::default();
        encode_instructions(&rows, body).unwrap()
    }

    #[test]
    fn tiny_body_header() {
        let rows = RowMap::default();
        let mut body = Body::new();
        body.push(Opcode::LdcI4, Operand::Int(1));
        body.push(Opcode::Ret, Operand::None);
        body.max_stack = 1;

        let encoded = encode_body(&rows, &body, 0).unwrap();
        assert!(!encoded.fat);
        // ldc.i4.1 + ret = 2 code bytes.
        assert_eq!(encoded.bytes[0], 0x02 | (2 << 2));
        assert_eq!(&encoded.bytes[1..], &[0x17, 0x2A]);
    }

    #[test]
    fn fat_body_for_locals() {
        let rows = RowMap::default();
        let mut body = Body::new();
        body.push_local(TypeRef::Primitive(PrimType::I4));
        body.push(Opcode::LdcI4, Operand::Int(1));
        body.push(Opcode::Stloc, Operand::Local(0));
        body.push(Opcode::Ret, Operand::None);
        body.max_stack = 1;
        body.init_locals = true;

        let encoded = encode_body(&rows, &body, 0x1100_0001).unwrap();
        assert!(encoded.fat);
        let flags = u16::from_le_bytes([encoded.bytes[0], encoded.bytes[1]]);
        assert_eq!(flags & 0x3003, 0x3003);
        assert_ne!(flags & 0x0010, 0);
        let tok = u32::from_le_bytes(encoded.bytes[8..12].try_into().unwrap());
        assert_eq!(tok, 0x1100_0001);
    }

    #[test]
    fn short_branch_displacement() {
        let mut body = Body::new();
        let ret = body.alloc_id();
        body.push(Opcode::Br, Operand::Target(ret));
        body.push(Opcode::Nop, Operand::None);
        body.instructions.push(crate::graph::Instruction {
            id: ret,
            opcode: Opcode::Ret,
            operand: Operand::None,
        });

        let code = encode(&body);
        // br.s +1 (over the nop), nop, ret
        assert_eq!(code, vec![0x2B, 0x01, 0x00, 0x2A]);
    }

    #[test]
    fn long_branch_when_displacement_overflows() {
        let mut body = Body::new();
        let ret = body.alloc_id();
        body.push(Opcode::Br, Operand::Target(ret));
        for _ in 0..200 {
            body.push(Opcode::Nop, Operand::None);
        }
        body.instructions.push(crate::graph::Instruction {
            id: ret,
            opcode: Opcode::Ret,
            operand: Operand::None,
        });

        let code = encode(&body);
        assert_eq!(code[0], 0x38);
        let disp = i32::from_le_bytes(code[1..5].try_into().unwrap());
        assert_eq!(disp, 200);
    }

    #[test]
    fn ldc_forms() {
        let mut body = Body::new();
        body.push(Opcode::LdcI4, Operand::Int(-1));
        body.push(Opcode::LdcI4, Operand::Int(100));
        body.push(Opcode::LdcI4, Operand::Int(100_000));
        body.push(Opcode::Ret, Operand::None);

        let code = encode(&body);
        assert_eq!(code[0], 0x15);
        assert_eq!(&code[1..3], &[0x1F, 100]);
        assert_eq!(code[3], 0x20);
        assert_eq!(
            i32::from_le_bytes(code[4..8].try_into().unwrap()),
            100_000
        );
    }
}
