//! End-to-end pipeline tests over the public API.
//!
//! These build small programs, run the full pipeline, and check the output
//! graph and image rather than individual passes.

mod common;

use cilshrink::prelude::*;
use common::Eval;

/// A program with a recursive function, a helper marked for inlining, and a
/// type nothing references.
///
/// Returns the module together with the entry method, the helper and the
/// dead type.
fn sample_program(module: &mut Module) -> (MethodId, MethodId, TypeId) {
    let math = common::class(module, "Math");
    // Instance state keeps the type out of the static-type merger, so the
    // handles below stay valid through the build.
    module.add_field(
        math,
        Field::new("seed", TypeRef::Primitive(PrimType::I4), FieldAttributes::PRIVATE),
    );

    // fact(n) = n < 2 ? 1 : n * fact(n - 1)
    let fact = common::int_method(module, math, "Fact", 1, |_| {});
    {
        let mut body = Body::new();
        body.push(Opcode::Ldarg, Operand::Arg(0));
        body.push(Opcode::LdcI4, Operand::Int(2));
        body.push(Opcode::Clt, Operand::None);
        let recurse = body.alloc_id();
        // Branch over the base case; the target is pushed below.
        body.push(Opcode::BrFalse, Operand::Target(recurse));
        body.push(Opcode::LdcI4, Operand::Int(1));
        body.push(Opcode::Ret, Operand::None);
        let mut first = body.make(Opcode::Ldarg, Operand::Arg(0));
        first.id = recurse;
        body.instructions.push(first);
        body.push(Opcode::Ldarg, Operand::Arg(0));
        body.push(Opcode::LdcI4, Operand::Int(1));
        body.push(Opcode::Sub, Operand::None);
        body.push(Opcode::Call, Operand::Method(MethodRef::Definition(fact)));
        body.push(Opcode::Mul, Operand::None);
        body.push(Opcode::Ret, Operand::None);
        module.method_mut(fact).body = Some(body);
    }

    // twice(a) = a * 2, marked for inlining.
    let twice = common::int_method(module, math, "Twice", 1, |body| {
        body.push(Opcode::Ldarg, Operand::Arg(0));
        body.push(Opcode::LdcI4, Operand::Int(2));
        body.push(Opcode::Mul, Operand::None);
        body.push(Opcode::Ret, Operand::None);
    });
    module.method_mut(twice).inline_target = true;

    // main() = twice(fact(4))
    let main = common::int_method(module, math, "Main", 0, |body| {
        body.push(Opcode::LdcI4, Operand::Int(4));
        body.push(Opcode::Call, Operand::Method(MethodRef::Definition(fact)));
        body.push(Opcode::Call, Operand::Method(MethodRef::Definition(twice)));
        body.push(Opcode::Ret, Operand::None);
    });

    let dead = common::class(module, "Leftover");
    common::int_method(module, dead, "Unused", 0, |body| {
        body.push(Opcode::LdcI4, Operand::Int(9));
        body.push(Opcode::Ret, Operand::None);
    });

    (main, twice, dead)
}

#[test]
fn build_preserves_entry_point_behavior() {
    let mut module = common::module();
    let (main, twice, dead) = sample_program(&mut module);

    let before = Eval::new(&module).call(main, &[]);
    assert_eq!(before, 48);

    let mut linker = Linker::new(module);
    let image = linker
        .build(&BuildOptions {
            roots: vec![RootSpec::Method(main)],
            ..BuildOptions::default()
        })
        .unwrap();
    assert!(!image.is_empty());

    let module = linker.module();
    let after = Eval::new(module).call(main, &[]);
    assert_eq!(after, before);

    // The inlined helper and the unreferenced type are gone.
    assert!(!module.attached_methods().contains(&twice));
    assert!(!module.type_list.contains(&dead));
}

#[test]
fn image_bytes_do_not_depend_on_root_order() {
    let build = |reverse: bool| {
        let mut module = common::module();
        let math = common::class(&mut module, "Math");
        let a = common::int_method(&mut module, math, "A", 0, |body| {
            body.push(Opcode::LdcI4, Operand::Int(1));
            body.push(Opcode::Ret, Operand::None);
        });
        let b = common::int_method(&mut module, math, "B", 0, |body| {
            body.push(Opcode::LdcI4, Operand::Int(2));
            body.push(Opcode::Ret, Operand::None);
        });
        let mut roots = vec![RootSpec::Method(a), RootSpec::Method(b)];
        if reverse {
            roots.reverse();
        }
        Linker::new(module)
            .build(&BuildOptions {
                roots,
                ..BuildOptions::default()
            })
            .unwrap()
    };

    let forward = build(false);
    let backward = build(true);
    assert_eq!(&*forward, &*backward);
}

#[test]
fn disabling_removal_keeps_type_shells() {
    let mut module = common::module();
    let (main, _, dead) = sample_program(&mut module);

    let mut linker = Linker::new(module);
    linker
        .build(&BuildOptions {
            roots: vec![RootSpec::Method(main)],
            remove_other_types: false,
            rename: false,
            ..BuildOptions::default()
        })
        .unwrap();

    // The shell stays in the output, stripped of its members.
    let module = linker.module();
    assert!(module.type_list.contains(&dead));
    assert!(module.type_def(dead).methods.is_empty());
}

#[test]
fn surviving_names_are_donor_suffixes() {
    let mut module = common::module();
    let donors = module.donor_strings.clone();
    let (main, _, _) = sample_program(&mut module);

    let mut linker = Linker::new(module);
    linker
        .build(&BuildOptions {
            roots: vec![RootSpec::Method(main)],
            ..BuildOptions::default()
        })
        .unwrap();

    for &ty in &linker.module().type_list {
        let def = linker.module().type_def(ty);
        let name = def.name.as_deref().unwrap();
        assert!(
            donors.iter().any(|d| d.ends_with(name)),
            "{name:?} is not a donor suffix"
        );
        assert_eq!(def.namespace, None);
    }
}

#[test]
fn linker_builds_exactly_once() {
    let mut module = common::module();
    let (main, _, _) = sample_program(&mut module);

    let options = BuildOptions {
        roots: vec![RootSpec::Method(main)],
        ..BuildOptions::default()
    };
    let mut linker = Linker::new(module);
    linker.build(&options).unwrap();
    assert!(matches!(
        linker.build(&options),
        Err(Error::AlreadyBuilt)
    ));
}

#[test]
fn image_carries_pe_and_metadata_markers() {
    let mut module = common::module();
    let (main, _, _) = sample_program(&mut module);

    let image = Linker::new(module)
        .build(&BuildOptions {
            roots: vec![RootSpec::Method(main)],
            ..BuildOptions::default()
        })
        .unwrap();

    assert_eq!(&image[..2], b"MZ");
    let bsjb = [0x42, 0x53, 0x4A, 0x42];
    assert!(
        image.windows(4).any(|w| w == bsjb),
        "metadata root signature missing"
    );
}
