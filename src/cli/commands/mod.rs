pub mod listen;
pub mod publish;
pub mod token;
