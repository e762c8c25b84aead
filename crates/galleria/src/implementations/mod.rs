pub mod memory;

pub use memory::MemoryContentStore;
