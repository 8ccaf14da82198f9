pub mod atomic;

pub use atomic::{write_atomic, StagedFile};
