pub mod payload;
pub mod subscription;
