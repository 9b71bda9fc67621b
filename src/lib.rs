pub mod evm;
pub mod fuzzers;
pub mod logger;
pub mod rand_utils;
pub mod report;
