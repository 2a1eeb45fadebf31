//! Predicate compiler and the R1CS identity circuit.

pub mod compiler;
pub mod gadgets;
mod identity;

pub use compiler::{
    compile, leaf_for_code, AllowList, AssignError, Assignment, CompileError, CompiledPredicate,
    Predicate, ALLOW_LIST_DEPTH, MAX_ALLOW_LIST,
};
pub use identity::{IdentityCircuit, MembershipWitness, PrivateInputs};
