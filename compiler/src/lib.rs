// normc — graph normalization compiler
//
// Library root. Passes run in the order extract → solve → insert adapters,
// looped to a fixpoint by `pipeline`, then cycle classification and lowering.

pub mod adapters;
pub mod cardinality;
pub mod catalog;
pub mod constraints;
pub mod diag;
pub mod dot;
pub mod graph;
pub mod id;
pub mod lexer;
pub mod lower;
pub mod parser;
pub mod pass;
pub mod pipeline;
pub mod type_infer;
pub mod types;
pub mod unify;
