//! The canonical helper names emitted code may reference. This is the
//! contract between the emitter's helper-call sequences and whatever
//! runtime registers native addresses for them — kept here, not in the
//! engine crate, so an embedder can validate its registry against this
//! list without linking the compiler.

/// Every helper name the emitter is permitted to reference. The engine
/// crate's helper registry treats any name outside this list as a
/// programmer error (not a runtime `HelperMissing`), since it would mean
/// the emitter itself drifted from the ABI.
pub const REQUIRED_HELPERS: &[&str] = &[
    "Add",
    "Sub",
    "Mul",
    "Div",
    "Mod",
    "Neg",
    "Equal",
    "NotEqual",
    "Less",
    "LessEqual",
    "Greater",
    "GreaterEqual",
    "StringConcat",
    "SA_New",
    "SA_Get",
    "SA_Set",
    "SA_Len",
    "ArrayNew",
    "ArrayGet",
    "ArraySet",
    "ArrayLen",
    "TypeCheck",
    "IsTruthy",
];
