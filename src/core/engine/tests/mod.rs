mod clone_tests;
mod harness;
