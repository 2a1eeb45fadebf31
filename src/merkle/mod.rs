pub mod hash;
pub mod tree;

pub use hash::{domain, PoseidonHasher};
pub use tree::{MerklePath, MerkleTree, TreeError};
