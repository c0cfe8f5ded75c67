//! # cgov-facts — Fact/Rule Evaluator
//!
//! A small forward-chaining engine used to pre-compute contextual facts
//! ("requester qualifies for category X") before a request reaches the
//! policy runtime.
//!
//! ## Syntax
//!
//! ```text
//! # ground facts
//! employee(alice).
//! category(alice, "contractor").
//!
//! # rules: head :- literal, literal, ...
//! night_worker(X) :- employee(X), shift(X, H), H >= 22.
//! restricted(X)   :- category(X, "contractor"), not night_worker(X).
//! ```
//!
//! Variables start with an uppercase letter or `_`; `_` alone is anonymous.
//! Bare lowercase identifiers and quoted strings are string constants.
//! Negation is stratified: a predicate may not depend negatively on itself.
//!
//! Request input is visible as `input(Path, Value)` facts, one per scalar
//! leaf (and per array element), with dotted paths.
//!
//! ## Failure semantics
//!
//! A goal with no proof yields an empty binding list, never an error.
//! Errors are reserved for malformed programs and the derivation bound.

pub mod base;
pub mod config;
pub mod error;
pub mod eval;
pub mod parser;
pub mod term;

pub use base::FactBase;
pub use config::FactsConfig;
pub use error::FactError;
pub use eval::{Binding, FactEvaluator};
pub use parser::{parse_goal, parse_program, Program};
pub use term::{Atom, Clause, CmpOp, GroundAtom, Literal, Term, Value};
