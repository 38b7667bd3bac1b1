//! Whole-program array bound checking.
//!
//! Each module is walked as a memoized recursive abstract interpreter: public
//! definitions are interpreted once with argument values derived from their
//! parameter types, while private definitions are expanded at each call site
//! with the caller's concrete abstract arguments.  Every array access is
//! checked against the current knowledge about its index; failures are
//! reported and interpretation continues.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};

use im_rc::{OrdMap, OrdSet, Vector};

use crate::data::intrinsics::Intrinsic;
use crate::data::span::Span;
use crate::data::stripped_ast as strip;
use crate::data::typed_ast::{CustomGlobalId, GlobalId, TypeId, Unop};
use crate::data::visibility::Visibility;
use crate::index_domain::{lift_const_at, unify_lists, AbsVal, IndexStatus, LEN_UNKNOWN};
use crate::report_error::{ErrorKind, Reporter};
use crate::symbolic::{eval, refine_false, refine_true, SymExpr, ValEnv};

/// A private whose abstract arguments keep growing (e.g. a variant wrapped
/// around itself on every recursive call) would otherwise expand forever.
const MAX_EXPANSION_DEPTH: u32 = 16;

/// Flow state threaded through interpretation.  Cheap to clone: branches of a
/// conditional start from the same state and their changes are discarded.
#[derive(Clone, Debug)]
struct BoundEnv {
    vals: ValEnv,
    /// Live array-creation records: declared length and creation sites.
    /// Consulted when a concrete constant crosses a call boundary.
    arrays: Vector<(i64, OrdSet<Span>)>,
}

impl BoundEnv {
    fn new() -> Self {
        BoundEnv {
            vals: ValEnv::new(),
            arrays: Vector::new(),
        }
    }
}

struct Context<'a> {
    privates: BTreeMap<CustomGlobalId, &'a strip::Def>,
    /// Results most recently proven per `(private, abstract args)` call
    /// shape.  An entry holding the all-`Undef` placeholder list is currently
    /// being interpreted; a recursive hit on the same key observes the
    /// placeholder instead of re-entering.
    memo: RefCell<BTreeMap<(CustomGlobalId, Vec<AbsVal>), Vec<AbsVal>>>,
    /// Per-private count of expansions on the current interpretation stack.
    depth: RefCell<BTreeMap<CustomGlobalId, u32>>,
    /// Privates already forced by a mention in value position.
    forced: RefCell<BTreeSet<CustomGlobalId>>,
    reporter: RefCell<&'a mut Reporter>,
}

pub fn check_bounds(program: &strip::Program, reporter: &mut Reporter) {
    for module in &program.modules {
        check_module(module, reporter);
    }
}

fn check_module(module: &strip::Module, reporter: &mut Reporter) {
    let private_names: BTreeSet<CustomGlobalId> = module
        .decls
        .iter()
        .filter(|decl| decl.visibility == Visibility::Private)
        .map(|decl| decl.name)
        .collect();

    let privates = module
        .defs
        .iter()
        .filter(|(id, _)| private_names.contains(id))
        .collect();

    let ctx = Context {
        privates,
        memo: RefCell::new(BTreeMap::new()),
        depth: RefCell::new(BTreeMap::new()),
        forced: RefCell::new(BTreeSet::new()),
        reporter: RefCell::new(reporter),
    };

    for (id, def) in module.defs.iter() {
        if !private_names.contains(&id) {
            ctx.def_public(def);
        }
    }
}

/// Abstract value of a function parameter, read off its declared type.
fn type_to_abstract(ty: &strip::Type) -> AbsVal {
    match &ty.kind {
        strip::TypeKind::App(TypeId::Observed, args) if args.len() == 1 => {
            type_to_abstract(&args[0])
        }
        strip::TypeKind::App(TypeId::Array, _) => {
            AbsVal::Array(OrdSet::unit(ty.span), LEN_UNKNOWN)
        }
        _ => AbsVal::Undef,
    }
}

fn num_results(def: &strip::Def) -> usize {
    match &def.type_.kind {
        strip::TypeKind::Fun(_, codomain) => codomain.len(),
        _ => panic!("definition signature is not a function type"),
    }
}

fn undef_results(expr: &strip::Expr) -> Vec<SymExpr> {
    expr.types
        .iter()
        .map(|_| SymExpr::Value(AbsVal::Undef))
        .collect()
}

fn single(mut results: Vec<SymExpr>) -> SymExpr {
    assert!(
        results.len() == 1,
        "operand did not evaluate to a single value"
    );
    results.pop().unwrap()
}

/// Bind a parameter pattern to the abstract values its types promise.
fn bind_pattern_types(vals: &mut ValEnv, pat: &strip::Pattern) {
    match &pat.kind {
        strip::PatternKind::Var(local, ty) => {
            vals.insert(*local, SymExpr::Value(type_to_abstract(ty)));
        }
        strip::PatternKind::Tuple(items) => {
            for item in items {
                bind_pattern_types(vals, item);
            }
        }
        strip::PatternKind::Ctor(_, _, payload) => {
            for item in payload {
                bind_pattern_types(vals, item);
            }
        }
        strip::PatternKind::Any(_) | strip::PatternKind::IntConst(_) => {}
    }
}

fn bind_vars_undef(vals: &mut ValEnv, pats: &[strip::Pattern]) {
    for pat in pats {
        match &pat.kind {
            strip::PatternKind::Var(local, _) => {
                vals.insert(*local, SymExpr::Value(AbsVal::Undef));
            }
            strip::PatternKind::Tuple(items) => bind_vars_undef(vals, items),
            strip::PatternKind::Ctor(_, _, payload) => bind_vars_undef(vals, payload),
            strip::PatternKind::Any(_) | strip::PatternKind::IntConst(_) => {}
        }
    }
}

/// Bind a pattern to a result list.  `scope` is the environment the results
/// were produced in; pattern bindings never shadow into their own values.
fn bind_pattern(scope: &ValEnv, vals: &mut ValEnv, pat: &strip::Pattern, results: &[SymExpr]) {
    match &pat.kind {
        strip::PatternKind::Any(_) | strip::PatternKind::IntConst(_) => {}

        strip::PatternKind::Tuple(items) if items.len() == results.len() => {
            for (item, result) in items.iter().zip(results) {
                bind_pattern_one(scope, vals, item, result);
            }
        }

        _ => {
            assert!(
                results.len() == 1,
                "pattern arity does not match its value"
            );
            bind_pattern_one(scope, vals, pat, &results[0]);
        }
    }
}

fn bind_pattern_one(scope: &ValEnv, vals: &mut ValEnv, pat: &strip::Pattern, result: &SymExpr) {
    match &pat.kind {
        strip::PatternKind::Any(_) | strip::PatternKind::IntConst(_) => {}

        strip::PatternKind::Var(local, _) => {
            vals.insert(*local, result.clone());
        }

        // A nested tuple pattern matches a single first-class tuple value,
        // which the domain does not decompose.
        strip::PatternKind::Tuple(items) => bind_vars_undef(vals, items),

        strip::PatternKind::Ctor(_, variant, payload) => match eval(scope, result) {
            AbsVal::Sum(tags) => match tags.get(variant) {
                Some(carried) if carried.len() == payload.len() => {
                    for (item, val) in payload.iter().zip(carried) {
                        bind_pattern_one(scope, vals, item, &SymExpr::Value(val.clone()));
                    }
                }
                _ => bind_vars_undef(vals, payload),
            },
            _ => bind_vars_undef(vals, payload),
        },
    }
}

impl<'a> Context<'a> {
    fn report(&self, kind: ErrorKind, span: Span) {
        self.reporter.borrow_mut().report(kind, span);
    }

    fn report_witnessed(&self, kind: ErrorKind, span: Span, witness: Span) {
        self.reporter.borrow_mut().report_witnessed(kind, span, witness);
    }

    /// Interpret a definition in isolation: each parameter starts from
    /// whatever its declared type promises.
    fn def_public(&self, def: &strip::Def) {
        let mut env = BoundEnv::new();
        bind_pattern_types(&mut env.vals, &def.param);
        self.interp(env, &def.body);
    }

    /// Expand a private at a call site, memoized on the abstract call shape.
    fn call_private(
        &self,
        id: CustomGlobalId,
        def: &strip::Def,
        args: Vec<AbsVal>,
        caller: &BoundEnv,
    ) -> Vec<AbsVal> {
        // Concrete constants are cached as the intervals they stand for
        // under the caller's live arrays, so callers with equivalent bounds
        // knowledge share results.
        let args: Vec<AbsVal> = args
            .into_iter()
            .map(|val| match val {
                AbsVal::Const(n) => lift_const_at(n, caller.arrays.iter()),
                other => other,
            })
            .collect();

        let key = (id, args.clone());
        if let Some(results) = self.memo.borrow().get(&key) {
            return results.clone();
        }

        let expected = num_results(def);

        if *self.depth.borrow().get(&id).unwrap_or(&0) >= MAX_EXPANSION_DEPTH {
            return vec![AbsVal::Undef; expected];
        }

        // Placeholders break recursion: a recursive call on the same shape
        // observes top instead of re-entering.
        self.memo
            .borrow_mut()
            .insert(key.clone(), vec![AbsVal::Undef; expected]);
        *self.depth.borrow_mut().entry(id).or_insert(0) += 1;

        let mut env = BoundEnv::new();
        let arg_results: Vec<SymExpr> = args.iter().cloned().map(SymExpr::Value).collect();
        let scope = env.vals.clone();
        bind_pattern(&scope, &mut env.vals, &def.param, &arg_results);

        let (end_env, results) = self.interp(env, &def.body);
        let result_vals: Vec<AbsVal> = results
            .iter()
            .map(|result| eval(&end_env.vals, result))
            .collect();
        assert!(
            result_vals.len() == expected,
            "definition body arity does not match its signature"
        );

        *self.depth.borrow_mut().get_mut(&id).unwrap() -= 1;
        self.memo.borrow_mut().insert(key, result_vals.clone());
        result_vals
    }

    fn interp(&self, env: BoundEnv, expr: &strip::Expr) -> (BoundEnv, Vec<SymExpr>) {
        use strip::ExprKind as E;

        match &expr.kind {
            E::Local(local) => (env, vec![SymExpr::Local(*local)]),

            E::Global(global) => {
                // A private mentioned as a value is checked in isolation,
                // once per module.
                if let GlobalId::Custom(id) = global {
                    if let Some(def) = self.privates.get(id) {
                        if self.forced.borrow_mut().insert(*id) {
                            self.def_public(def);
                        }
                    }
                }
                let results = undef_results(expr);
                (env, results)
            }

            E::IntLit(val) => (env, vec![SymExpr::Value(AbsVal::Const(*val))]),
            E::ByteLit(_) | E::FloatLit(_) => (env, vec![SymExpr::Value(AbsVal::Undef)]),

            E::Variant(variant, payload) => {
                let (env, results) = self.interp(env, payload);
                let carried: Vec<AbsVal> = results
                    .iter()
                    .map(|result| eval(&env.vals, result))
                    .collect();
                let sum = AbsVal::Sum(OrdMap::unit(*variant, carried));
                (env, vec![SymExpr::Value(sum)])
            }

            E::Record(fields) => {
                let mut env = env;
                let mut record = OrdMap::new();
                for (field, value) in fields {
                    let (next_env, results) = self.interp(env, value);
                    env = next_env;
                    let vals: Vec<AbsVal> = results
                        .iter()
                        .map(|result| eval(&env.vals, result))
                        .collect();
                    record.insert(*field, vals);
                }
                (env, vec![SymExpr::Value(AbsVal::Rec(record))])
            }

            E::With(base, updates) => {
                let (mut env, results) = self.interp(env, base);
                let mut record = match results.first().map(|result| eval(&env.vals, result)) {
                    Some(AbsVal::Rec(record)) => record,
                    _ => OrdMap::new(),
                };
                for (field, value) in updates {
                    let (next_env, results) = self.interp(env, value);
                    env = next_env;
                    let vals: Vec<AbsVal> = results
                        .iter()
                        .map(|result| eval(&env.vals, result))
                        .collect();
                    record.insert(*field, vals);
                }
                (env, vec![SymExpr::Value(AbsVal::Rec(record))])
            }

            E::Field(base, field) => {
                let (env, results) = self.interp(env, base);
                let out = match results.first().map(|result| eval(&env.vals, result)) {
                    Some(AbsVal::Rec(record)) => match record.get(field) {
                        Some(vals) => vals
                            .iter()
                            .map(|val| SymExpr::Value(val.clone()))
                            .collect(),
                        None => undef_results(expr),
                    },
                    _ => undef_results(expr),
                };
                (env, out)
            }

            E::Binop(op, left, right) => {
                let (env, left_results) = self.interp(env, left);
                let (env, right_results) = self.interp(env, right);
                let lhs = Box::new(single(left_results));
                let rhs = Box::new(single(right_results));

                use crate::data::typed_ast::Binop as B;
                let node = match op {
                    B::Add => SymExpr::Add(lhs, rhs),
                    B::Sub => SymExpr::Sub(lhs, rhs),
                    B::Mul => SymExpr::Mul(lhs, rhs),
                    B::Div => SymExpr::Div(lhs, rhs),
                    B::Lt => SymExpr::Lt(lhs, rhs),
                    B::Lte => SymExpr::Lte(lhs, rhs),
                    B::Gt => SymExpr::Gt(lhs, rhs),
                    B::Gte => SymExpr::Gte(lhs, rhs),
                    B::And => SymExpr::And(lhs, rhs),
                    B::Or => SymExpr::Or(lhs, rhs),
                };
                (env, vec![node])
            }

            E::Unop(op, inner) => {
                let (env, results) = self.interp(env, inner);
                let operand = single(results);
                let node = match op {
                    Unop::Neg => SymExpr::Sub(
                        Box::new(SymExpr::Value(AbsVal::Const(0))),
                        Box::new(operand),
                    ),
                    Unop::Not => SymExpr::Not(Box::new(operand)),
                };
                (env, vec![node])
            }

            E::Let(lhs, rhs, body) => {
                let (mut env, results) = self.interp(env, rhs);
                let scope = env.vals.clone();
                bind_pattern(&scope, &mut env.vals, lhs, &results);
                self.interp(env, body)
            }

            E::If(cond, then_case, else_case) => {
                let (env, cond_results) = self.interp(env, cond);
                let cond_sym = single(cond_results);

                let mut then_env = env.clone();
                then_env.vals = refine_true(&env.vals, &cond_sym);
                let (then_end, then_results) = self.interp(then_env, then_case);
                let then_vals: Vec<AbsVal> = then_results
                    .iter()
                    .map(|result| eval(&then_end.vals, result))
                    .collect();

                let mut else_env = env.clone();
                else_env.vals = refine_false(&env.vals, &cond_sym);
                let (else_end, else_results) = self.interp(else_env, else_case);
                let else_vals: Vec<AbsVal> = else_results
                    .iter()
                    .map(|result| eval(&else_end.vals, result))
                    .collect();

                let joined = unify_lists(&then_vals, &else_vals);
                (env, joined.into_iter().map(SymExpr::Value).collect())
            }

            E::Match(scrutinee, arms) => {
                let (env, results) = self.interp(env, scrutinee);

                let mut joined: Option<Vec<AbsVal>> = None;
                for (pat, body) in arms {
                    let mut arm_env = env.clone();
                    let scope = arm_env.vals.clone();
                    bind_pattern(&scope, &mut arm_env.vals, pat, &results);
                    let (arm_end, arm_results) = self.interp(arm_env, body);
                    let arm_vals: Vec<AbsVal> = arm_results
                        .iter()
                        .map(|result| eval(&arm_end.vals, result))
                        .collect();
                    joined = Some(match joined {
                        Some(prev) => unify_lists(&prev, &arm_vals),
                        None => arm_vals,
                    });
                }

                let out = match joined {
                    Some(vals) => vals.into_iter().map(SymExpr::Value).collect(),
                    None => undef_results(expr),
                };
                (env, out)
            }

            E::Seq(first, second) => {
                let (env, _) = self.interp(env, first);
                self.interp(env, second)
            }

            E::Obs(local) => (env, vec![SymExpr::Local(*local)]),

            E::Apply(callee, args) => self.interp_apply(env, expr, *callee, args),
        }
    }

    fn interp_apply(
        &self,
        env: BoundEnv,
        expr: &strip::Expr,
        callee: GlobalId,
        args: &[strip::Expr],
    ) -> (BoundEnv, Vec<SymExpr>) {
        match callee {
            GlobalId::Intrinsic(Intrinsic::Assert) => {
                let (env, results) = self.interp(env, &args[0]);
                let cond = single(results);
                let mut env = env;
                env.vals = refine_true(&env.vals, &cond);
                (env, undef_results(expr))
            }

            GlobalId::Intrinsic(Intrinsic::ArrayMake) => {
                let (env, _) = self.interp(env, &args[0]);
                let (mut env, size_results) = self.interp(env, &args[1]);
                let size_sym = single(size_results);

                let size = match eval(&env.vals, &size_sym) {
                    AbsVal::Const(n) => n,
                    _ => LEN_UNKNOWN,
                };
                let site = expr.span;
                env.arrays.push_back((size, OrdSet::unit(site)));

                // A variable used as the size is at most the new array's
                // length.
                if let SymExpr::Local(local) = size_sym {
                    match eval(&env.vals, &SymExpr::Local(local)) {
                        AbsVal::Int(status) => {
                            let status = IndexStatus {
                                bad: status.bad.update(site),
                                ..status
                            }
                            .normalized();
                            env.vals
                                .insert(local, SymExpr::Value(AbsVal::Int(status)));
                        }
                        AbsVal::Undef => {
                            env.vals.insert(
                                local,
                                SymExpr::Value(AbsVal::int(
                                    false,
                                    OrdSet::new(),
                                    OrdSet::unit(site),
                                )),
                            );
                        }
                        _ => {}
                    }
                }

                let made = AbsVal::Array(OrdSet::unit(site), size);
                (env, vec![SymExpr::Value(made)])
            }

            GlobalId::Intrinsic(Intrinsic::ArrayLen) => {
                let (env, results) = self.interp(env, &args[0]);
                let arr = single(results);
                let out = match eval(&env.vals, &arr) {
                    AbsVal::Array(sites, _) => AbsVal::int(true, OrdSet::new(), sites),
                    _ => AbsVal::Undef,
                };
                (env, vec![SymExpr::Value(out)])
            }

            GlobalId::Intrinsic(Intrinsic::ArrayGet) => {
                self.require_prim_elem(&args[0], expr.span);
                let (env, arr_results) = self.interp(env, &args[0]);
                let (env, idx_results) = self.interp(env, &args[1]);
                self.check_access(&env, expr.span, &single(arr_results), &single(idx_results));
                (env, undef_results(expr))
            }

            GlobalId::Intrinsic(Intrinsic::ArraySet)
            | GlobalId::Intrinsic(Intrinsic::ArraySwap) => {
                let (env, arr_results) = self.interp(env, &args[0]);
                let (env, idx_results) = self.interp(env, &args[1]);
                let (env, _) = self.interp(env, &args[2]);
                let arr = single(arr_results);
                self.check_access(&env, expr.span, &arr, &single(idx_results));
                let arr_val = eval(&env.vals, &arr);
                (
                    env,
                    vec![
                        SymExpr::Value(arr_val),
                        SymExpr::Value(AbsVal::Undef),
                    ],
                )
            }

            GlobalId::Custom(id) => {
                let mut env = env;

                if let Some(def) = self.privates.get(&id).copied() {
                    let mut arg_vals = Vec::new();
                    for arg in args {
                        let (next_env, results) = self.interp(env, arg);
                        env = next_env;
                        arg_vals.extend(
                            results.iter().map(|result| eval(&env.vals, result)),
                        );
                    }
                    let results = self.call_private(id, def, arg_vals, &env);
                    (env, results.into_iter().map(SymExpr::Value).collect())
                } else {
                    // Public and external callees are interpreted separately;
                    // their arguments are still walked for their own checks.
                    for arg in args {
                        let (next_env, _) = self.interp(env, arg);
                        env = next_env;
                    }
                    (env, undef_results(expr))
                }
            }
        }
    }

    fn require_prim_elem(&self, arr: &strip::Expr, span: Span) {
        fn elem_is_prim(ty: &strip::Type) -> bool {
            match &ty.kind {
                strip::TypeKind::App(TypeId::Observed, args) if args.len() == 1 => {
                    elem_is_prim(&args[0])
                }
                strip::TypeKind::App(TypeId::Array, args) if args.len() == 1 => {
                    matches!(args[0].kind, strip::TypeKind::Prim(_))
                }
                _ => false,
            }
        }

        if !arr.types.first().map(elem_is_prim).unwrap_or(false) {
            self.report(ErrorKind::ExpectedPrimArray, span);
        }
    }

    fn check_access(&self, env: &BoundEnv, span: Span, arr: &SymExpr, idx: &SymExpr) {
        match (eval(&env.vals, arr), eval(&env.vals, idx)) {
            (AbsVal::Array(sites, len), AbsVal::Const(k)) => {
                if k < 0 {
                    self.report(ErrorKind::BoundNeg, span);
                } else if k >= len {
                    match sites.get_min() {
                        Some(witness) => {
                            self.report_witnessed(ErrorKind::BoundUp, span, *witness)
                        }
                        None => self.report(ErrorKind::BoundUp, span),
                    }
                }
            }

            (AbsVal::Array(sites, _), AbsVal::Int(status)) => {
                if !status.nonneg {
                    self.report(ErrorKind::BoundLow, span);
                } else {
                    let missing = sites.relative_complement(status.good);
                    if let Some(witness) = missing.get_min() {
                        self.report_witnessed(ErrorKind::BoundUp, span, *witness);
                    }
                }
            }

            _ => self.report(ErrorKind::BoundLow, span),
        }
    }
}
