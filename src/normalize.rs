//! Type-expression normalization and the observability check.
//!
//! Rewrites each naming-stage module into its stripped form.  The rewrite is
//! structural; the value of the pass is in the checks that run along the way:
//! observed types may appear only at the top of function-argument types,
//! polymorphic type arguments must not be primitive, and an application whose
//! callee's result list contains `Any` can never terminate.

use std::collections::BTreeMap;

use id_collections::IdVec;

use crate::data::span::Span;
use crate::data::stripped_ast as strip;
use crate::data::typed_ast as typed;
use crate::data::typed_ast::{CustomGlobalId, GlobalId, TypeId};
use crate::report_error::{ErrorKind, Reporter};

/// The monomorphic function signatures of a module, collected from every def
/// before any per-definition rewriting: position, domain, and codomain.
type SigMap = BTreeMap<CustomGlobalId, (Span, Vec<typed::Type>, Vec<typed::Type>)>;

struct Context<'a> {
    sigs: SigMap,
    reporter: &'a mut Reporter,
}

pub fn normalize_program(program: typed::Program, reporter: &mut Reporter) -> strip::Program {
    strip::Program {
        modules: program
            .modules
            .into_iter()
            .map(|module| normalize_module(module, reporter))
            .collect(),
    }
}

fn normalize_module(module: typed::Module, reporter: &mut Reporter) -> strip::Module {
    let sigs = module
        .defs
        .iter()
        .map(|(id, def)| {
            let sig = &def.scheme.body;
            match &sig.kind {
                typed::TypeKind::Fun(domain, codomain) => {
                    (id, (sig.span, domain.clone(), codomain.clone()))
                }
                _ => panic!("definition signature is not a function type"),
            }
        })
        .collect();

    let mut ctx = Context { sigs, reporter };

    let decls = module
        .decls
        .into_iter()
        .map(|decl| ctx.normalize_decl(decl))
        .collect();

    let defs = IdVec::from_vec(
        module
            .defs
            .into_iter()
            .map(|(_, def)| ctx.normalize_def(def))
            .collect(),
    );

    strip::Module {
        id: module.id,
        decls,
        defs,
    }
}

impl<'a> Context<'a> {
    fn normalize_decl(&mut self, decl: typed::Decl) -> strip::Decl {
        self.check_observable(&decl.type_);
        strip::Decl {
            span: decl.span,
            visibility: decl.visibility,
            name: decl.name,
            type_: self.normalize_type(decl.type_),
        }
    }

    fn normalize_def(&mut self, def: typed::Def) -> strip::Def {
        let typed::Def {
            span,
            scheme,
            param,
            body,
        } = def;
        strip::Def {
            span,
            type_: self.normalize_type(scheme.body),
            param: self.normalize_pattern(param),
            body: self.normalize_expr(body),
        }
    }

    /// Enforce the observability rules on a type in value position: a bare
    /// observed constructor is never a value type, and an observed
    /// application may appear only as the outermost application of a
    /// function-domain element.
    fn check_observable(&mut self, ty: &typed::Type) {
        match &ty.kind {
            typed::TypeKind::Fun(domain, codomain) => {
                for dom in domain {
                    match &dom.kind {
                        typed::TypeKind::App(TypeId::Observed, args) => {
                            for arg in args {
                                self.check_observable(arg);
                            }
                        }
                        _ => self.check_observable(dom),
                    }
                }
                for cod in codomain {
                    self.check_observable(cod);
                }
            }

            typed::TypeKind::Id(TypeId::Observed) => {
                self.reporter.report(ErrorKind::ObsNotValue, ty.span);
            }

            typed::TypeKind::App(TypeId::Observed, _) => {
                self.reporter.report(ErrorKind::ObsNotAllowed, ty.span);
            }

            typed::TypeKind::App(_, args) => {
                for arg in args {
                    self.check_observable(arg);
                }
            }

            typed::TypeKind::Any
            | typed::TypeKind::Prim(_)
            | typed::TypeKind::Var(_)
            | typed::TypeKind::Id(_) => {}
        }
    }

    fn normalize_type(&mut self, ty: typed::Type) -> strip::Type {
        let kind = match ty.kind {
            typed::TypeKind::Any => strip::TypeKind::Any,
            typed::TypeKind::Prim(prim) => strip::TypeKind::Prim(prim),
            typed::TypeKind::Var(param) => strip::TypeKind::Var(param),
            typed::TypeKind::Id(id) => strip::TypeKind::Id(id),

            typed::TypeKind::App(ctor, args) => {
                let args: Vec<_> = args
                    .into_iter()
                    .map(|arg| self.normalize_type(arg))
                    .collect();

                // Instantiating user polymorphism at a primitive type is
                // rejected; the built-in constructors take primitives.
                if let TypeId::Custom(_) = ctor {
                    for arg in &args {
                        if let strip::TypeKind::Prim(_) = arg.kind {
                            self.reporter.report(ErrorKind::PolyIsNotPrim, arg.span);
                        }
                    }
                }

                strip::TypeKind::App(ctor, args)
            }

            typed::TypeKind::Fun(domain, codomain) => strip::TypeKind::Fun(
                domain
                    .into_iter()
                    .map(|dom| self.normalize_type(dom))
                    .collect(),
                codomain
                    .into_iter()
                    .map(|cod| self.normalize_type(cod))
                    .collect(),
            ),
        };

        strip::Type { span: ty.span, kind }
    }

    fn normalize_pattern(&mut self, pat: typed::Pattern) -> strip::Pattern {
        let kind = match pat.kind {
            typed::PatternKind::Any(ty) => {
                self.check_observable(&ty);
                strip::PatternKind::Any(self.normalize_type(ty))
            }
            typed::PatternKind::Var(local, ty) => {
                self.check_observable(&ty);
                strip::PatternKind::Var(local, self.normalize_type(ty))
            }
            typed::PatternKind::Tuple(items) => strip::PatternKind::Tuple(
                items
                    .into_iter()
                    .map(|item| self.normalize_pattern(item))
                    .collect(),
            ),
            typed::PatternKind::Ctor(type_id, variant, payload) => strip::PatternKind::Ctor(
                type_id,
                variant,
                payload
                    .into_iter()
                    .map(|item| self.normalize_pattern(item))
                    .collect(),
            ),
            typed::PatternKind::IntConst(n) => strip::PatternKind::IntConst(n),
        };

        strip::Pattern {
            span: pat.span,
            kind,
        }
    }

    fn normalize_expr(&mut self, expr: typed::Expr) -> strip::Expr {
        let typed::Expr { span, types, kind } = expr;

        // Result lists of applications are exempt; only the termination
        // check runs there.
        if !matches!(kind, typed::ExprKind::Apply(_, _)) {
            for ty in &types {
                self.check_observable(ty);
            }
        }

        let kind = match kind {
            typed::ExprKind::Local(local) => strip::ExprKind::Local(local),
            typed::ExprKind::Global(global) => strip::ExprKind::Global(global),
            typed::ExprKind::ByteLit(val) => strip::ExprKind::ByteLit(val),
            typed::ExprKind::IntLit(val) => strip::ExprKind::IntLit(val),
            typed::ExprKind::FloatLit(val) => strip::ExprKind::FloatLit(val),

            typed::ExprKind::Variant(variant, payload) => strip::ExprKind::Variant(
                variant,
                Box::new(self.normalize_expr(*payload)),
            ),

            typed::ExprKind::Record(fields) => strip::ExprKind::Record(
                fields
                    .into_iter()
                    .map(|(field, value)| (field, self.normalize_expr(value)))
                    .collect(),
            ),

            typed::ExprKind::With(base, updates) => strip::ExprKind::With(
                Box::new(self.normalize_expr(*base)),
                updates
                    .into_iter()
                    .map(|(field, value)| (field, self.normalize_expr(value)))
                    .collect(),
            ),

            typed::ExprKind::Field(base, field) => {
                strip::ExprKind::Field(Box::new(self.normalize_expr(*base)), field)
            }

            typed::ExprKind::Binop(op, left, right) => strip::ExprKind::Binop(
                op,
                Box::new(self.normalize_expr(*left)),
                Box::new(self.normalize_expr(*right)),
            ),

            typed::ExprKind::Unop(op, inner) => {
                strip::ExprKind::Unop(op, Box::new(self.normalize_expr(*inner)))
            }

            typed::ExprKind::Let(lhs, rhs, body) => strip::ExprKind::Let(
                self.normalize_pattern(lhs),
                Box::new(self.normalize_expr(*rhs)),
                Box::new(self.normalize_expr(*body)),
            ),

            typed::ExprKind::If(cond, then_case, else_case) => strip::ExprKind::If(
                Box::new(self.normalize_expr(*cond)),
                Box::new(self.normalize_expr(*then_case)),
                Box::new(self.normalize_expr(*else_case)),
            ),

            typed::ExprKind::Match(scrutinee, arms) => strip::ExprKind::Match(
                Box::new(self.normalize_expr(*scrutinee)),
                arms.into_iter()
                    .map(|(pat, body)| (self.normalize_pattern(pat), self.normalize_expr(body)))
                    .collect(),
            ),

            typed::ExprKind::Seq(first, second) => strip::ExprKind::Seq(
                Box::new(self.normalize_expr(*first)),
                Box::new(self.normalize_expr(*second)),
            ),

            typed::ExprKind::Obs(local) => strip::ExprKind::Obs(local),

            typed::ExprKind::Apply(callee, args) => {
                self.check_terminates(callee, span);
                strip::ExprKind::Apply(
                    callee,
                    args.into_iter()
                        .map(|arg| self.normalize_expr(arg))
                        .collect(),
                )
            }
        };

        strip::Expr {
            span,
            types: types
                .into_iter()
                .map(|ty| self.normalize_type(ty))
                .collect(),
            kind,
        }
    }

    /// The inferencer leaves `Any` where a callee's result type is
    /// unconstrainable, which in a strict call can only mean the call never
    /// returns.
    fn check_terminates(&mut self, callee: GlobalId, span: Span) {
        if let GlobalId::Custom(id) = callee {
            if let Some((_, _, codomain)) = self.sigs.get(&id) {
                if codomain
                    .iter()
                    .any(|ty| matches!(ty.kind, typed::TypeKind::Any))
                {
                    self.reporter.report(ErrorKind::InfiniteLoop, span);
                }
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::data::prim_type::PrimType;
    use crate::data::typed_ast::{CustomTypeId, ModId, TypeScheme};
    use crate::data::visibility::Visibility;

    fn ty(span_at: usize, kind: typed::TypeKind) -> typed::Type {
        typed::Type {
            span: Span::new(span_at, span_at + 1),
            kind,
        }
    }

    fn int_ty(span_at: usize) -> typed::Type {
        ty(span_at, typed::TypeKind::Prim(PrimType::Int))
    }

    fn expr(span_at: usize, types: Vec<typed::Type>, kind: typed::ExprKind) -> typed::Expr {
        typed::Expr {
            span: Span::new(span_at, span_at + 1),
            types,
            kind,
        }
    }

    fn def(sig: typed::Type, param: typed::Pattern, body: typed::Expr) -> typed::Def {
        typed::Def {
            span: sig.span,
            scheme: TypeScheme {
                num_params: 0,
                body: sig,
            },
            param,
            body,
        }
    }

    fn module_of(decls: Vec<typed::Decl>, defs: Vec<typed::Def>) -> typed::Module {
        typed::Module {
            id: ModId(0),
            decls,
            defs: IdVec::from_vec(defs),
        }
    }

    fn run(module: typed::Module) -> (strip::Module, Vec<crate::report_error::Error>) {
        let mut reporter = Reporter::new();
        let stripped = normalize_module(module, &mut reporter);
        (stripped, reporter.into_errors())
    }

    fn kinds(errors: &[crate::report_error::Error]) -> Vec<ErrorKind> {
        errors.iter().map(|error| error.kind).collect()
    }

    fn trivial_def(span_at: usize) -> typed::Def {
        let sig = ty(
            span_at,
            typed::TypeKind::Fun(vec![int_ty(span_at + 1)], vec![int_ty(span_at + 2)]),
        );
        let param = typed::Pattern {
            span: Span::new(span_at + 3, span_at + 4),
            kind: typed::PatternKind::Any(int_ty(span_at + 3)),
        };
        let body = expr(
            span_at + 5,
            vec![int_ty(span_at + 6)],
            typed::ExprKind::IntLit(0),
        );
        def(sig, param, body)
    }

    #[test]
    fn bare_observed_is_not_a_value() {
        let decl = typed::Decl {
            span: Span::new(0, 1),
            visibility: Visibility::Public,
            name: CustomGlobalId(0),
            type_: ty(2, typed::TypeKind::Id(TypeId::Observed)),
        };
        let (_, errors) = run(module_of(vec![decl], vec![trivial_def(10)]));
        assert_eq!(kinds(&errors), vec![ErrorKind::ObsNotValue]);
        assert_eq!(errors[0].span, Span::new(2, 3));
    }

    #[test]
    fn observed_allowed_only_atop_function_domains() {
        let observed_array = |span_at: usize| {
            ty(
                span_at,
                typed::TypeKind::App(
                    TypeId::Observed,
                    vec![ty(
                        span_at + 1,
                        typed::TypeKind::App(TypeId::Array, vec![int_ty(span_at + 2)]),
                    )],
                ),
            )
        };

        // In a domain: fine.
        let good = typed::Decl {
            span: Span::new(0, 1),
            visibility: Visibility::Public,
            name: CustomGlobalId(0),
            type_: ty(
                2,
                typed::TypeKind::Fun(vec![observed_array(3)], vec![int_ty(6)]),
            ),
        };
        let (_, errors) = run(module_of(vec![good], vec![trivial_def(10)]));
        assert_eq!(kinds(&errors), vec![]);

        // In a codomain: rejected.
        let bad = typed::Decl {
            span: Span::new(0, 1),
            visibility: Visibility::Public,
            name: CustomGlobalId(0),
            type_: ty(
                2,
                typed::TypeKind::Fun(vec![int_ty(3)], vec![observed_array(4)]),
            ),
        };
        let (_, errors) = run(module_of(vec![bad], vec![trivial_def(10)]));
        assert_eq!(kinds(&errors), vec![ErrorKind::ObsNotAllowed]);

        // Nested under another application: rejected.
        let nested = typed::Decl {
            span: Span::new(0, 1),
            visibility: Visibility::Public,
            name: CustomGlobalId(0),
            type_: ty(
                2,
                typed::TypeKind::App(TypeId::Custom(CustomTypeId(0)), vec![observed_array(3)]),
            ),
        };
        let (_, errors) = run(module_of(vec![nested], vec![trivial_def(10)]));
        assert_eq!(kinds(&errors), vec![ErrorKind::ObsNotAllowed]);
    }

    #[test]
    fn primitive_cannot_instantiate_custom_polymorphism() {
        let decl = typed::Decl {
            span: Span::new(0, 1),
            visibility: Visibility::Public,
            name: CustomGlobalId(0),
            type_: ty(
                2,
                typed::TypeKind::App(TypeId::Custom(CustomTypeId(0)), vec![int_ty(3)]),
            ),
        };
        let (_, errors) = run(module_of(vec![decl], vec![trivial_def(10)]));
        assert_eq!(kinds(&errors), vec![ErrorKind::PolyIsNotPrim]);
        assert_eq!(errors[0].span, Span::new(3, 4));

        // The built-in array constructor takes primitives.
        let array_decl = typed::Decl {
            span: Span::new(0, 1),
            visibility: Visibility::Public,
            name: CustomGlobalId(0),
            type_: ty(2, typed::TypeKind::App(TypeId::Array, vec![int_ty(3)])),
        };
        let (_, errors) = run(module_of(vec![array_decl], vec![trivial_def(10)]));
        assert_eq!(kinds(&errors), vec![]);
    }

    #[test]
    fn any_codomain_flags_the_call_site() {
        // def 0 diverges (codomain Any); def 1 calls it.
        let diverging = {
            let sig = ty(
                0,
                typed::TypeKind::Fun(vec![int_ty(1)], vec![ty(2, typed::TypeKind::Any)]),
            );
            let param = typed::Pattern {
                span: Span::new(3, 4),
                kind: typed::PatternKind::Any(int_ty(3)),
            };
            let body = expr(5, vec![ty(6, typed::TypeKind::Any)], typed::ExprKind::IntLit(0));
            def(sig, param, body)
        };

        let caller = {
            let sig = ty(
                10,
                typed::TypeKind::Fun(vec![int_ty(11)], vec![int_ty(12)]),
            );
            let param = typed::Pattern {
                span: Span::new(13, 14),
                kind: typed::PatternKind::Any(int_ty(13)),
            };
            let body = expr(
                15,
                vec![ty(16, typed::TypeKind::Any)],
                typed::ExprKind::Apply(
                    GlobalId::Custom(CustomGlobalId(0)),
                    vec![expr(17, vec![int_ty(18)], typed::ExprKind::IntLit(7))],
                ),
            );
            def(sig, param, body)
        };

        let (_, errors) = run(module_of(vec![], vec![diverging, caller]));
        assert_eq!(kinds(&errors), vec![ErrorKind::InfiniteLoop]);
        assert_eq!(errors[0].span, Span::new(15, 16));
    }

    #[test]
    fn normalization_is_idempotent() {
        let sig = ty(
            0,
            typed::TypeKind::Fun(
                vec![ty(
                    1,
                    typed::TypeKind::App(TypeId::Array, vec![int_ty(2)]),
                )],
                vec![int_ty(3)],
            ),
        );
        let param = typed::Pattern {
            span: Span::new(4, 5),
            kind: typed::PatternKind::Var(
                typed::LocalId(0),
                ty(4, typed::TypeKind::App(TypeId::Array, vec![int_ty(6)])),
            ),
        };
        let body = expr(
            7,
            vec![int_ty(8)],
            typed::ExprKind::Let(
                typed::Pattern {
                    span: Span::new(9, 10),
                    kind: typed::PatternKind::Var(typed::LocalId(1), int_ty(9)),
                },
                Box::new(expr(11, vec![int_ty(12)], typed::ExprKind::IntLit(4))),
                Box::new(expr(
                    13,
                    vec![int_ty(14)],
                    typed::ExprKind::Local(typed::LocalId(1)),
                )),
            ),
        );

        let module = module_of(vec![], vec![def(sig, param, body)]);

        let (once, errors) = run(module);
        assert_eq!(kinds(&errors), vec![]);

        let (twice, errors) = run(retag_module(&once));
        assert_eq!(kinds(&errors), vec![]);
        assert_eq!(format!("{:?}", once), format!("{:?}", twice));
    }

    // Re-tag a stripped module as naming-stage input so it can be fed through
    // the normalizer again.
    fn retag_module(module: &strip::Module) -> typed::Module {
        typed::Module {
            id: module.id,
            decls: module
                .decls
                .iter()
                .map(|decl| typed::Decl {
                    span: decl.span,
                    visibility: decl.visibility,
                    name: decl.name,
                    type_: retag_type(&decl.type_),
                })
                .collect(),
            defs: IdVec::from_vec(
                module
                    .defs
                    .iter()
                    .map(|(_, def)| typed::Def {
                        span: def.span,
                        scheme: TypeScheme {
                            num_params: 0,
                            body: retag_type(&def.type_),
                        },
                        param: retag_pattern(&def.param),
                        body: retag_expr(&def.body),
                    })
                    .collect(),
            ),
        }
    }

    fn retag_type(ty: &strip::Type) -> typed::Type {
        let kind = match &ty.kind {
            strip::TypeKind::Any => typed::TypeKind::Any,
            strip::TypeKind::Prim(prim) => typed::TypeKind::Prim(*prim),
            strip::TypeKind::Var(param) => typed::TypeKind::Var(*param),
            strip::TypeKind::Id(id) => typed::TypeKind::Id(*id),
            strip::TypeKind::App(ctor, args) => {
                typed::TypeKind::App(*ctor, args.iter().map(retag_type).collect())
            }
            strip::TypeKind::Fun(domain, codomain) => typed::TypeKind::Fun(
                domain.iter().map(retag_type).collect(),
                codomain.iter().map(retag_type).collect(),
            ),
        };
        typed::Type {
            span: ty.span,
            kind,
        }
    }

    fn retag_pattern(pat: &strip::Pattern) -> typed::Pattern {
        let kind = match &pat.kind {
            strip::PatternKind::Any(ty) => typed::PatternKind::Any(retag_type(ty)),
            strip::PatternKind::Var(local, ty) => typed::PatternKind::Var(*local, retag_type(ty)),
            strip::PatternKind::Tuple(items) => {
                typed::PatternKind::Tuple(items.iter().map(retag_pattern).collect())
            }
            strip::PatternKind::Ctor(type_id, variant, payload) => typed::PatternKind::Ctor(
                *type_id,
                *variant,
                payload.iter().map(retag_pattern).collect(),
            ),
            strip::PatternKind::IntConst(n) => typed::PatternKind::IntConst(*n),
        };
        typed::Pattern {
            span: pat.span,
            kind,
        }
    }

    fn retag_expr(expr: &strip::Expr) -> typed::Expr {
        let kind = match &expr.kind {
            strip::ExprKind::Local(local) => typed::ExprKind::Local(*local),
            strip::ExprKind::Global(global) => typed::ExprKind::Global(*global),
            strip::ExprKind::ByteLit(val) => typed::ExprKind::ByteLit(*val),
            strip::ExprKind::IntLit(val) => typed::ExprKind::IntLit(*val),
            strip::ExprKind::FloatLit(val) => typed::ExprKind::FloatLit(*val),
            strip::ExprKind::Variant(variant, payload) => {
                typed::ExprKind::Variant(*variant, Box::new(retag_expr(payload)))
            }
            strip::ExprKind::Record(fields) => typed::ExprKind::Record(
                fields
                    .iter()
                    .map(|(field, value)| (*field, retag_expr(value)))
                    .collect(),
            ),
            strip::ExprKind::With(base, updates) => typed::ExprKind::With(
                Box::new(retag_expr(base)),
                updates
                    .iter()
                    .map(|(field, value)| (*field, retag_expr(value)))
                    .collect(),
            ),
            strip::ExprKind::Field(base, field) => {
                typed::ExprKind::Field(Box::new(retag_expr(base)), *field)
            }
            strip::ExprKind::Binop(op, left, right) => typed::ExprKind::Binop(
                *op,
                Box::new(retag_expr(left)),
                Box::new(retag_expr(right)),
            ),
            strip::ExprKind::Unop(op, inner) => {
                typed::ExprKind::Unop(*op, Box::new(retag_expr(inner)))
            }
            strip::ExprKind::Let(lhs, rhs, body) => typed::ExprKind::Let(
                retag_pattern(lhs),
                Box::new(retag_expr(rhs)),
                Box::new(retag_expr(body)),
            ),
            strip::ExprKind::If(cond, then_case, else_case) => typed::ExprKind::If(
                Box::new(retag_expr(cond)),
                Box::new(retag_expr(then_case)),
                Box::new(retag_expr(else_case)),
            ),
            strip::ExprKind::Match(scrutinee, arms) => typed::ExprKind::Match(
                Box::new(retag_expr(scrutinee)),
                arms.iter()
                    .map(|(pat, body)| (retag_pattern(pat), retag_expr(body)))
                    .collect(),
            ),
            strip::ExprKind::Seq(first, second) => typed::ExprKind::Seq(
                Box::new(retag_expr(first)),
                Box::new(retag_expr(second)),
            ),
            strip::ExprKind::Obs(local) => typed::ExprKind::Obs(*local),
            strip::ExprKind::Apply(callee, args) => {
                typed::ExprKind::Apply(*callee, args.iter().map(retag_expr).collect())
            }
        };
        typed::Expr {
            span: expr.span,
            types: expr.types.iter().map(retag_type).collect(),
            kind,
        }
    }
}
