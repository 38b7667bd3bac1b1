//! The abstract value lattice for array bound checking.
//!
//! Integers are tracked relative to array-creation sites: an `Int` knows its
//! sign and, per creation site, whether it is strictly below ("good") or at
//! most ("bad") the declared length of the array created there.  `Undef` is
//! top; `Const` is the most specific.

use im_rc::{OrdMap, OrdSet};

use crate::data::span::Span;
use crate::data::typed_ast::{FieldId, VariantId};

/// Declared array length standing for "unknown".
pub const LEN_UNKNOWN: i64 = i64::MAX;

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct IndexStatus {
    /// Certifies the value is `>= 0`.
    pub nonneg: bool,
    /// Creation sites whose array length strictly exceeds the value.
    pub good: OrdSet<Span>,
    /// Creation sites whose array length is only known to be at least the
    /// value.
    pub bad: OrdSet<Span>,
}

impl IndexStatus {
    pub fn new(nonneg: bool) -> Self {
        IndexStatus {
            nonneg,
            good: OrdSet::new(),
            bad: OrdSet::new(),
        }
    }

    /// Restore the `good`/`bad` disjointness invariant after a merge.  Joins
    /// may leave a site in both sets; the strict fact wins.
    pub fn normalized(self) -> Self {
        let IndexStatus { nonneg, good, bad } = self;
        let bad = bad.relative_complement(good.clone());
        IndexStatus { nonneg, good, bad }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum AbsVal {
    /// Top: no information.
    Undef,
    Const(i64),
    /// A reference to one or more array-creation sites, with the minimum
    /// declared length across them (`LEN_UNKNOWN` if any is unknown).
    Array(OrdSet<Span>, i64),
    Int(IndexStatus),
    /// Tagged variant: the values carried by each possible tag.
    Sum(OrdMap<VariantId, Vec<AbsVal>>),
    /// Record: the values stored at each field.
    Rec(OrdMap<FieldId, Vec<AbsVal>>),
}

impl AbsVal {
    pub fn int(nonneg: bool, good: OrdSet<Span>, bad: OrdSet<Span>) -> Self {
        AbsVal::Int(IndexStatus { nonneg, good, bad })
    }
}

/// Lift an integer literal into the interval domain with no site knowledge.
pub fn lift_const(n: i64) -> AbsVal {
    AbsVal::Int(IndexStatus::new(n >= 0))
}

/// Lift an integer literal by consulting the live array-creation records, so
/// that a concrete index carries the same site facts an equivalent interval
/// would.  Used at call boundaries before keying memoization.
pub fn lift_const_at<'a>(
    n: i64,
    arrays: impl IntoIterator<Item = &'a (i64, OrdSet<Span>)>,
) -> AbsVal {
    let mut good = OrdSet::new();
    let mut bad = OrdSet::new();
    for (len, sites) in arrays {
        if n < *len {
            good = good.union(sites.clone());
        } else if n == *len {
            bad = bad.union(sites.clone());
        }
    }
    AbsVal::Int(IndexStatus {
        nonneg: n >= 0,
        good,
        bad,
    })
}

/// Least upper bound of two abstract values.
pub fn unify(left: &AbsVal, right: &AbsVal) -> AbsVal {
    use AbsVal::*;

    // Constants join as intervals.
    if let &Const(n) = left {
        return unify(&lift_const(n), right);
    }
    if let &Const(n) = right {
        return unify(left, &lift_const(n));
    }

    match (left, right) {
        (Int(a), Int(b)) => AbsVal::Int(IndexStatus {
            nonneg: a.nonneg && b.nonneg,
            good: a.good.clone().intersection(b.good.clone()),
            bad: a.bad.clone().intersection(b.bad.clone()),
        }),

        (Array(sites_a, len_a), Array(sites_b, len_b)) => Array(
            sites_a.clone().union(sites_b.clone()),
            (*len_a).min(*len_b),
        ),

        // Tags present on one side only survive unchanged.
        (Sum(a), Sum(b)) => {
            let mut joined = a.clone();
            for (tag, vals_b) in b {
                let vals = match a.get(tag) {
                    Some(vals_a) => unify_lists(vals_a, vals_b),
                    None => vals_b.clone(),
                };
                joined.insert(*tag, vals);
            }
            Sum(joined)
        }

        // Fields are joined pointwise on the common keys; a field missing on
        // either side is dropped.
        (Rec(a), Rec(b)) => {
            let mut joined = OrdMap::new();
            for (field, vals_a) in a {
                if let Some(vals_b) = b.get(field) {
                    joined.insert(*field, unify_lists(vals_a, vals_b));
                }
            }
            Rec(joined)
        }

        _ => Undef,
    }
}

/// Pointwise join of two result lists.  The lists come from the two sides of
/// the same expression, so unequal arity means the producer handed us an
/// ill-typed program.
pub fn unify_lists(left: &[AbsVal], right: &[AbsVal]) -> Vec<AbsVal> {
    assert!(
        left.len() == right.len(),
        "cannot unify result lists of different arities"
    );
    left.iter()
        .zip(right)
        .map(|(a, b)| unify(a, b))
        .collect()
}
