pub mod bucket_size;
pub mod config;
pub mod http;
pub mod key_namer;
pub mod logo_cache;
pub mod providers;
pub mod storage;
pub mod upstream;
