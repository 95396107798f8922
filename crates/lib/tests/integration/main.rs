//! Integration tests for simba-lib.

mod common;

mod environment_tests;
mod execute_tests;
mod registry_tests;
