// Database layer module

pub mod redis;

pub use redis::RedisConnection;
