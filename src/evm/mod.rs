pub mod abi;
pub mod compiler;
pub mod config;
pub mod contract_utils;
pub mod generator;
pub mod onchain;
pub mod oracle;
pub mod oracles;
pub mod trace;
pub mod types;
