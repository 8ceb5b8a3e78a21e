pub mod element;
pub mod naming;
pub mod protocol;
pub mod session;
