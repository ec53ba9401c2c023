pub mod aes;
pub mod offline;
