pub mod evm_fuzzer;
