//! The naming-stage typed AST: the input of the analysis core.  The producer
//! (name resolution + type inference, outside this crate) annotates every
//! expression and pattern with full types and every node with a span.

use id_collections::{id_type, IdVec};

use crate::data::intrinsics::Intrinsic;
use crate::data::prim_type::PrimType;
use crate::data::span::Span;
use crate::data::visibility::Visibility;

#[id_type]
pub struct ModId(pub usize);

#[id_type]
pub struct CustomTypeId(pub usize);

#[id_type]
pub struct CustomGlobalId(pub usize);

#[id_type]
pub struct LocalId(pub usize);

#[id_type]
pub struct VariantId(pub usize);

#[id_type]
pub struct FieldId(pub usize);

#[id_type]
pub struct TypeParamId(pub usize);

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum TypeId {
    /// The phantom constructor marking a borrowed view of a linear value.
    Observed,
    Array,
    Custom(CustomTypeId),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum GlobalId {
    Intrinsic(Intrinsic),
    Custom(CustomGlobalId),
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Type {
    pub span: Span,
    pub kind: TypeKind,
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum TypeKind {
    /// Inserted by the inferencer where a result type is unconstrainable.
    Any,
    Prim(PrimType),
    Var(TypeParamId),
    /// A bare constructor in type position, with no argument list.
    Id(TypeId),
    App(TypeId, Vec<Type>),
    /// Domain and codomain are lists: tuples are first-class and flattened.
    Fun(Vec<Type>, Vec<Type>),
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct TypeScheme {
    pub num_params: usize,
    pub body: Type,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Binop {
    Add,
    Sub,
    Mul,
    Div,
    Lt,
    Lte,
    Gt,
    Gte,
    And,
    Or,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Unop {
    Neg,
    Not,
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
    /// Result types; a list because tuples are first-class.
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
    /// A borrowed read of a linear local; the analysis treats it as the
    /// local itself.
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
    pub scheme: TypeScheme,
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
