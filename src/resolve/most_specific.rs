//! Most-specific candidate selection.
//!
//! Given the applicable candidates for a call, picks the best one.
//! Candidates are compared formal by formal: an exact type match beats an
//! instantiation, which beats a conversion, and a param formal fed by a
//! param actual beats a non-param formal. A candidate that is at least as
//! good everywhere and strictly better somewhere wins; surviving ties are
//! broken in favor of satisfied where clauses, and anything still tied is
//! ambiguous.

use crate::context::Context;
use crate::types::QualifiedType;

use super::instantiate::FormalActualMap;
use super::sig::{SigId, WhereClauseResult};
use super::{CallInfo, MostSpecificCandidate, MostSpecificCandidates};

/// How well one actual fits one formal; higher is more specific.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
enum FormalFit {
    Converts,
    Instantiates,
    Exact,
    ExactParam,
}

fn formal_fits(ctx: &Context, sig: SigId, ci: &CallInfo) -> Vec<FormalFit> {
    let typed = ctx.sigs.typed(sig);
    let untyped = ctx.sigs.untyped(typed.untyped);
    let fa_map = FormalActualMap::build(&untyped, ci);
    let mut fits = Vec::new();
    for entry in fa_map.by_formals() {
        if entry.actual_type.is_use_default_hint() {
            continue;
        }
        let formal = typed.formal_type(entry.formal_idx);
        let actual = entry.actual_type;
        let fit = if actual.type_id() == formal.type_id() {
            if formal.is_param() && actual.is_param() {
                FormalFit::ExactParam
            } else {
                FormalFit::Exact
            }
        } else if instantiated_to(ctx, sig, entry.formal_idx) {
            FormalFit::Instantiates
        } else {
            FormalFit::Converts
        };
        fits.push(fit);
    }
    fits
}

/// Did this signature's formal get its type via instantiation?
fn instantiated_to(ctx: &Context, sig: SigId, formal_idx: usize) -> bool {
    let typed = ctx.sigs.typed(sig);
    typed.instantiated_from.is_some() && typed.formals_instantiated.bit(formal_idx)
}

/// True when `a` is at least as specific as `b` on every formal and
/// strictly more specific on at least one.
fn strictly_more_specific(a: &[FormalFit], b: &[FormalFit]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut some_better = false;
    for (fa, fb) in a.iter().zip(b.iter()) {
        if fa < fb {
            return false;
        }
        if fa > fb {
            some_better = true;
        }
    }
    some_better
}

/// Disambiguate `candidates` for `ci`. `forwarding_info`, when non-empty,
/// parallels `candidates` with the receiver type each candidate is
/// actually invoked on.
pub fn find_most_specific_candidates(
    ctx: &Context,
    candidates: &[SigId],
    forwarding_info: &[QualifiedType],
    ci: &CallInfo,
) -> MostSpecificCandidates {
    let forwarding_for = |i: usize| -> Option<QualifiedType> {
        forwarding_info.get(i).copied()
    };

    match candidates.len() {
        0 => return MostSpecificCandidates::empty(),
        1 => {
            return MostSpecificCandidates::one(MostSpecificCandidate {
                sig: candidates[0],
                forwarding_to: forwarding_for(0),
            })
        }
        _ => {}
    }

    let fits: Vec<Vec<FormalFit>> = candidates
        .iter()
        .map(|&sig| formal_fits(ctx, sig, ci))
        .collect();

    // drop every candidate some other candidate beats outright
    let mut alive: Vec<usize> = (0..candidates.len()).collect();
    alive.retain(|&i| {
        !(0..candidates.len())
            .any(|j| j != i && strictly_more_specific(&fits[j], &fits[i]))
    });

    // prefer satisfied where clauses among the survivors
    if alive.len() > 1 {
        let with_where: Vec<usize> = alive
            .iter()
            .copied()
            .filter(|&i| {
                ctx.sigs.typed(candidates[i]).where_clause_result == WhereClauseResult::True
            })
            .collect();
        if with_where.len() == 1 {
            alive = with_where;
        }
    }

    match alive.len() {
        0 => MostSpecificCandidates::ambiguous(),
        1 => MostSpecificCandidates::one(MostSpecificCandidate {
            sig: candidates[alive[0]],
            forwarding_to: forwarding_for(alive[0]),
        }),
        _ => {
            // identical signatures can reach here through multiple lookup
            // paths; they are the same candidate
            let first = candidates[alive[0]];
            if alive.iter().all(|&i| candidates[i] == first) {
                MostSpecificCandidates::one(MostSpecificCandidate {
                    sig: first,
                    forwarding_to: forwarding_for(alive[0]),
                })
            } else {
                MostSpecificCandidates::ambiguous()
            }
        }
    }
}
