//! Behavioral tests for call-site inlining through the full pipeline.

mod common;

use cilshrink::prelude::*;
use common::Eval;

/// helper(a, b) = (a + b) * a, marked for inlining; callers pass one argument
/// twice, which exercises the materialize-versus-reemit decision.
fn program_with_helper(module: &mut Module) -> (MethodId, MethodId) {
    let ty = common::class(module, "Calc");

    let helper = common::int_method(module, ty, "Helper", 2, |body| {
        body.push(Opcode::Ldarg, Operand::Arg(0));
        body.push(Opcode::Ldarg, Operand::Arg(1));
        body.push(Opcode::Add, Operand::None);
        body.push(Opcode::Ldarg, Operand::Arg(0));
        body.push(Opcode::Mul, Operand::None);
        body.push(Opcode::Ret, Operand::None);
    });
    module.method_mut(helper).inline_target = true;

    // entry(x) = helper(x + 1, x * 3)
    let entry = common::int_method(module, ty, "Entry", 1, |body| {
        body.push(Opcode::Ldarg, Operand::Arg(0));
        body.push(Opcode::LdcI4, Operand::Int(1));
        body.push(Opcode::Add, Operand::None);
        body.push(Opcode::Ldarg, Operand::Arg(0));
        body.push(Opcode::LdcI4, Operand::Int(3));
        body.push(Opcode::Mul, Operand::None);
        body.push(Opcode::Call, Operand::Method(MethodRef::Definition(helper)));
        body.push(Opcode::Ret, Operand::None);
    });

    (entry, helper)
}

#[test]
fn inlined_call_computes_the_same_values() {
    let mut module = common::module();
    let (entry, helper) = program_with_helper(&mut module);

    let expected: Vec<i64> = (-3..8).map(|x| Eval::new(&module).call(entry, &[x])).collect();

    let mut linker = Linker::new(module);
    linker
        .build(&BuildOptions {
            roots: vec![RootSpec::Method(entry)],
            ..BuildOptions::default()
        })
        .unwrap();

    let module = linker.module();
    assert!(!module.attached_methods().contains(&helper));

    let body = module.method(entry).body.as_ref().unwrap();
    assert!(body.instructions.iter().all(|i| i.opcode != Opcode::Call));

    let actual: Vec<i64> = (-3..8).map(|x| Eval::new(module).call(entry, &[x])).collect();
    assert_eq!(actual, expected);
}

#[test]
fn multi_use_parameters_evaluate_arguments_once() {
    let mut module = common::module();
    let ty = common::class(&mut module, "Calc");
    let counter = module.add_field(
        ty,
        Field::new(
            "calls",
            TypeRef::Primitive(PrimType::I4),
            FieldAttributes::PRIVATE | FieldAttributes::STATIC,
        ),
    );

    // bump() increments a counter and returns it; square(a) = a * a.
    let bump = common::int_method(&mut module, ty, "Bump", 0, |_| {});
    {
        let mut body = Body::new();
        body.push(Opcode::Ldsfld, Operand::Field(FieldRef::Definition(counter)));
        body.push(Opcode::LdcI4, Operand::Int(1));
        body.push(Opcode::Add, Operand::None);
        body.push(Opcode::Dup, Operand::None);
        body.push(Opcode::Stsfld, Operand::Field(FieldRef::Definition(counter)));
        body.push(Opcode::Ret, Operand::None);
        module.method_mut(bump).body = Some(body);
    }

    let square = common::int_method(&mut module, ty, "Square", 1, |body| {
        body.push(Opcode::Ldarg, Operand::Arg(0));
        body.push(Opcode::Ldarg, Operand::Arg(0));
        body.push(Opcode::Mul, Operand::None);
        body.push(Opcode::Ret, Operand::None);
    });
    module.method_mut(square).inline_target = true;

    // entry() = square(bump())
    let entry = common::int_method(&mut module, ty, "Entry", 0, |body| {
        body.push(Opcode::Call, Operand::Method(MethodRef::Definition(bump)));
        body.push(Opcode::Call, Operand::Method(MethodRef::Definition(square)));
        body.push(Opcode::Ret, Operand::None);
    });

    let before = {
        let mut eval = Eval::new(&module);
        eval.set_static(counter, 0);
        eval.call(entry, &[])
    };
    assert_eq!(before, 1);

    let mut linker = Linker::new(module);
    linker
        .build(&BuildOptions {
            roots: vec![RootSpec::Method(entry)],
            ..BuildOptions::default()
        })
        .unwrap();

    // The side-effecting argument ran once: the counter ends at 1, and the
    // result is still 1 * 1.
    let mut eval = Eval::new(linker.module());
    eval.set_static(counter, 0);
    assert_eq!(eval.call(entry, &[]), before);
}

#[test]
fn stack_copied_argument_evaluates_at_the_call_site() {
    let mut module = common::module();
    let ty = common::class(&mut module, "Calc");

    // diff(a, b) = b - a
    let diff = common::int_method(&mut module, ty, "Diff", 2, |body| {
        body.push(Opcode::Ldarg, Operand::Arg(1));
        body.push(Opcode::Ldarg, Operand::Arg(0));
        body.push(Opcode::Sub, Operand::None);
        body.push(Opcode::Ret, Operand::None);
    });
    module.method_mut(diff).inline_target = true;

    // entry() = 3 - diff(7, 7), the second 7 copied with dup. A dup window
    // consumes its neighbour's value, so it must not re-run inside the
    // callee where the stack holds the outer 3.
    let entry = common::int_method(&mut module, ty, "Entry", 0, |body| {
        body.push(Opcode::LdcI4, Operand::Int(3));
        body.push(Opcode::LdcI4, Operand::Int(7));
        body.push(Opcode::Dup, Operand::None);
        body.push(Opcode::Call, Operand::Method(MethodRef::Definition(diff)));
        body.push(Opcode::Sub, Operand::None);
        body.push(Opcode::Ret, Operand::None);
    });

    let before = Eval::new(&module).call(entry, &[]);
    assert_eq!(before, 3);

    let mut linker = Linker::new(module);
    linker
        .build(&BuildOptions {
            roots: vec![RootSpec::Method(entry)],
            ..BuildOptions::default()
        })
        .unwrap();

    assert_eq!(Eval::new(linker.module()).call(entry, &[]), before);
}

#[test]
fn argument_side_effects_keep_their_order() {
    let mut module = common::module();
    let ty = common::class(&mut module, "Calc");
    let state = module.add_field(
        ty,
        Field::new(
            "s",
            TypeRef::Primitive(PrimType::I4),
            FieldAttributes::PRIVATE | FieldAttributes::STATIC,
        ),
    );

    // bump() adds 10 to the state and returns it; double() doubles it.
    let bump = common::int_method(&mut module, ty, "Bump", 0, |_| {});
    {
        let mut body = Body::new();
        body.push(Opcode::Ldsfld, Operand::Field(FieldRef::Definition(state)));
        body.push(Opcode::LdcI4, Operand::Int(10));
        body.push(Opcode::Add, Operand::None);
        body.push(Opcode::Dup, Operand::None);
        body.push(Opcode::Stsfld, Operand::Field(FieldRef::Definition(state)));
        body.push(Opcode::Ret, Operand::None);
        module.method_mut(bump).body = Some(body);
    }
    let double = common::int_method(&mut module, ty, "Double", 0, |_| {});
    {
        let mut body = Body::new();
        body.push(Opcode::Ldsfld, Operand::Field(FieldRef::Definition(state)));
        body.push(Opcode::LdcI4, Operand::Int(2));
        body.push(Opcode::Mul, Operand::None);
        body.push(Opcode::Dup, Operand::None);
        body.push(Opcode::Stsfld, Operand::Field(FieldRef::Definition(state)));
        body.push(Opcode::Ret, Operand::None);
        module.method_mut(double).body = Some(body);
    }

    // sum(x, y) = x + y + y: the second argument materializes, the first is
    // impure and used once, and must still run before the second.
    let sum = common::int_method(&mut module, ty, "Sum", 2, |body| {
        body.push(Opcode::Ldarg, Operand::Arg(0));
        body.push(Opcode::Ldarg, Operand::Arg(1));
        body.push(Opcode::Add, Operand::None);
        body.push(Opcode::Ldarg, Operand::Arg(1));
        body.push(Opcode::Add, Operand::None);
        body.push(Opcode::Ret, Operand::None);
    });
    module.method_mut(sum).inline_target = true;

    // entry() = sum(bump(), double())
    let entry = common::int_method(&mut module, ty, "Entry", 0, |body| {
        body.push(Opcode::Call, Operand::Method(MethodRef::Definition(bump)));
        body.push(Opcode::Call, Operand::Method(MethodRef::Definition(double)));
        body.push(Opcode::Call, Operand::Method(MethodRef::Definition(sum)));
        body.push(Opcode::Ret, Operand::None);
    });

    // s starts at 1: bump gives 11, double gives 22, sum = 11 + 22 + 22.
    let before = {
        let mut eval = Eval::new(&module);
        eval.set_static(state, 1);
        eval.call(entry, &[])
    };
    assert_eq!(before, 55);

    let mut linker = Linker::new(module);
    linker
        .build(&BuildOptions {
            roots: vec![RootSpec::Method(entry)],
            ..BuildOptions::default()
        })
        .unwrap();

    let mut eval = Eval::new(linker.module());
    eval.set_static(state, 1);
    assert_eq!(eval.call(entry, &[]), before);
}

#[test]
fn parameter_mutation_aborts_the_build() {
    let mut module = common::module();
    let ty = common::class(&mut module, "Calc");

    let helper = common::int_method(&mut module, ty, "Helper", 1, |body| {
        body.push(Opcode::LdcI4, Operand::Int(0));
        body.push(Opcode::Starg, Operand::Arg(0));
        body.push(Opcode::Ldarg, Operand::Arg(0));
        body.push(Opcode::Ret, Operand::None);
    });
    module.method_mut(helper).inline_target = true;

    let entry = common::int_method(&mut module, ty, "Entry", 0, |body| {
        body.push(Opcode::LdcI4, Operand::Int(7));
        body.push(Opcode::Call, Operand::Method(MethodRef::Definition(helper)));
        body.push(Opcode::Ret, Operand::None);
    });

    let err = Linker::new(module)
        .build(&BuildOptions {
            roots: vec![RootSpec::Method(entry)],
            ..BuildOptions::default()
        })
        .unwrap_err();

    assert!(matches!(
        err,
        Error::UnsupportedInline {
            reason: InlineRejection::ParameterMutation,
            ..
        }
    ));
}
