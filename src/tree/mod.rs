pub mod duplicate;
pub mod file_tree;
pub mod walk;

pub mod prelude {
    pub use super::duplicate::*;
    pub use super::file_tree::FileTreeEngine;
}
