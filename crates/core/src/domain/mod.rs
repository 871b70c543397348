pub mod complaint;
pub mod knowledge;
pub mod order;
