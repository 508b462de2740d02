pub mod node;

pub mod prelude {
    pub use super::node::*;
}
