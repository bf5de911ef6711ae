//! TL-B schema analyzer.
//!
//! Parses constructor declarations of the TL-B language (algebraic data
//! types serialized as bit/cell trees), binds variables and polarities,
//! assigns constructor tags, computes size intervals, bit-prefix sets and
//! nat-parameter admissibility, and classifies how the constructors of each
//! type are distinguished during decoding. The analyzed [`Schema`] facade
//! is what code generators consume.
//!
//! [`Schema`]: compiler::schema::Schema

pub mod cli;
pub mod compile;
pub mod compiler;
pub mod parse;
