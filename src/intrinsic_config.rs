use crate::data::intrinsics::*;
use crate::data::prim_type::PrimType;

// Names:

macro_rules! define_intrinsic_to_name {
    ($(($intrinsic : ident, $name : expr)),*) => {
        pub fn intrinsic_to_name(intr: Intrinsic) -> &'static str {
            match intr {
                $(Intrinsic::$intrinsic => $name),*
            }
        }
    };
}

macro_rules! define_name_to_intrinsic {
    ($(($intrinsic : ident, $name : expr)),*) => {
        pub fn name_to_intrinsic(name: &str) -> Option<Intrinsic> {
            match name {
                $($name => Some(Intrinsic::$intrinsic)),*,
                _ => None,
            }
        }
    }
}

macro_rules! define_intrinsic_names_const {
    ($(($intrinsic : ident, $name : expr)),*) => {
        pub const INTRINSIC_NAMES: &[(Intrinsic, &'static str)] = &[
            $((Intrinsic::$intrinsic, $name)),*
        ];
    }
}

// Watch out!  This macro expects a trailing comma, but the macros it invokes internally do not.
macro_rules! define_intrinsic_names {
    ($(($intrinsic : ident, $name : expr)),*,) => {
        define_intrinsic_to_name!($(($intrinsic, $name)),*);
        define_name_to_intrinsic!($(($intrinsic, $name)),*);
        define_intrinsic_names_const!($(($intrinsic, $name)),*);
    };
}

define_intrinsic_names![
    (Assert, "assert"),
    (ArrayMake, "amake"),
    (ArrayGet, "aget"),
    (ArraySet, "aset"),
    (ArraySwap, "aswap"),
    (ArrayLen, "alength"),
];

// Signatures:

fn bool_() -> Type {
    Type::Prim(PrimType::Bool)
}

fn int() -> Type {
    Type::Prim(PrimType::Int)
}

fn elem() -> Type {
    Type::Param(0)
}

fn array() -> Type {
    Type::Array(Box::new(elem()))
}

macro_rules! tuple {
    ($($item : expr),*) => {
        Type::Tuple(vec![$($item),*])
    };
}

fn sig(arg: Type, ret: Type) -> Signature {
    Signature { arg, ret }
}

pub fn intrinsic_sig(intr: Intrinsic) -> Signature {
    use Intrinsic::*;
    match intr {
        Assert => sig(bool_(), tuple!()),
        ArrayMake => sig(tuple!(elem(), int()), array()),
        ArrayGet => sig(tuple!(Type::Observed(Box::new(array())), int()), elem()),
        ArraySet => sig(tuple!(array(), int(), elem()), tuple!(array(), elem())),
        ArraySwap => sig(tuple!(array(), int(), elem()), tuple!(array(), elem())),
        ArrayLen => sig(Type::Observed(Box::new(array())), int()),
    }
}
