mod common;

#[cfg(unix)]
mod build_tests;
mod project_tests;
