pub mod api;
pub mod db;
pub mod media;
pub mod redis;
pub mod storage;
