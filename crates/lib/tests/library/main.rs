mod common;
mod deps_tests;
