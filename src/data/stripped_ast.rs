//! The stripped typed AST: the normalizer's output and the bound checker's
//! input.  Same shape as the naming-stage AST, but type schemes are replaced
//! by monomorphic signatures and every type expression has passed the
//! observability check.

use id_collections::IdVec;

use crate::data::prim_type::PrimType;
use crate::data::span::Span;
use crate::data::typed_ast::{
    Binop, CustomGlobalId, CustomTypeId, FieldId, GlobalId, LocalId, ModId, TypeId, TypeParamId,
    Unop, VariantId,
};
use crate::data::visibility::Visibility;

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Type {
    pub span: Span,
    pub kind: TypeKind,
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum TypeKind {
    Any,
    Prim(PrimType),
    Var(TypeParamId),
    Id(TypeId),
    App(TypeId, Vec<Type>),
    Fun(Vec<Type>, Vec<Type>),
}

#[derive(Clone, Debug)]
pub struct Pattern {
    pub span: Span,
    pub kind: PatternKind,
}

#[derive(Clone, Debug)]
pub enum PatternKind {
    Any(Type),
    Var(LocalId, Type),
    Tuple(Vec<Pattern>),
    Ctor(CustomTypeId, VariantId, Vec<Pattern>),
    IntConst(i64),
}

#[derive(Clone, Debug)]
pub struct Expr {
    pub span: Span,
    pub types: Vec<Type>,
    pub kind: ExprKind,
}

#[derive(Clone, Debug)]
pub enum ExprKind {
    Local(LocalId),
    Global(GlobalId),
    ByteLit(u8),
    IntLit(i64),
    FloatLit(f64),
    Variant(VariantId, Box<Expr>),
    Record(Vec<(FieldId, Expr)>),
    With(Box<Expr>, Vec<(FieldId, Expr)>),
    Field(Box<Expr>, FieldId),
    Binop(Binop, Box<Expr>, Box<Expr>),
    Unop(Unop, Box<Expr>),
    Let(Pattern, Box<Expr>, Box<Expr>),
    If(Box<Expr>, Box<Expr>, Box<Expr>),
    Match(Box<Expr>, Vec<(Pattern, Expr)>),
    Seq(Box<Expr>, Box<Expr>),
    Obs(LocalId),
    Apply(GlobalId, Vec<Expr>),
}

#[derive(Clone, Debug)]
pub struct Decl {
    pub span: Span,
    pub visibility: Visibility,
    pub name: CustomGlobalId,
    pub type_: Type,
}

#[derive(Clone, Debug)]
pub struct Def {
    pub span: Span,
    /// The def's monomorphic signature; always a `Fun`.
    pub type_: Type,
    pub param: Pattern,
    pub body: Expr,
}

#[derive(Clone, Debug)]
pub struct Module {
    pub id: ModId,
    pub decls: Vec<Decl>,
    pub defs: IdVec<CustomGlobalId, Def>,
}

#[derive(Clone, Debug)]
pub struct Program {
    pub modules: Vec<Module>,
}
