pub mod alias;
pub mod local;
pub mod memory;
pub mod union;

pub use alias::AliasFileSystem;
pub use local::LocalFileSystem;
pub use memory::MemoryFileSystem;
pub use union::{UnionFileSystem, UnionItem};
