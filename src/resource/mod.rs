pub mod md5;
pub mod obj;
