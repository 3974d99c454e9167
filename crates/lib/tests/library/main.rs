mod build_tests;
mod common;
mod loader_tests;
