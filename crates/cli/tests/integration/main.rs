//! End-to-end tests running real `/bin/sh` toolchains.

#![cfg(unix)]

mod build_tests;
mod common;
mod test_tests;
