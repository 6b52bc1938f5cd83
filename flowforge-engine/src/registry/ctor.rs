//! Constructor signature selection.
//!
//! A builder service declares the signatures it accepts; the registry picks
//! one for the caller's argument list before delegating. Matching is by
//! arity first, then element-wise assignability (with numeric coercion, see
//! [`ParamKind::accepts`]).

use flowforge_core::args::{CtorArg, ParamKind};

/// Select the first declared signature the argument list satisfies.
///
/// Returns the signature's index, or `None` when no declared signature has
/// the right arity and element-wise compatible kinds.
pub fn select_signature(signatures: &[Vec<ParamKind>], args: &[CtorArg]) -> Option<usize> {
    signatures
        .iter()
        .position(|signature| {
            signature.len() == args.len()
                && signature.iter().zip(args).all(|(param, arg)| param.accepts(arg))
        })
}
