// dlc — Dataflow Lowering Compiler
//
// Library root. The program tree (`tree`) flows through lowering
// (`context`, `factory`, the atom modules, `stream`), assembly
// (`graph`, `assemble`) and rendering through a `CodeEmitter`; `pipeline`
// runs the passes declared in `pass`.

pub mod assemble;
pub mod atom;
pub mod buffer;
pub mod context;
pub mod diag;
pub mod dot;
pub mod emitter;
pub mod error;
pub mod factory;
pub mod graph;
pub mod id;
pub mod module;
pub mod pass;
pub mod pipeline;
pub mod platform;
pub mod rate;
pub mod scope;
pub mod signal;
pub mod snippet;
pub mod stream;
pub mod tree;
