//! A tool to buffer, spill and inspect heterogeneous row tables.
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

use spilltable_lib::container::reclaim::{ShutdownGuard, shutdown_sweep};
use spilltable_lib::{Host, run};
use std::io::Write;
use std::io::{stderr, stdout};

/// Default host that talks to the real process.
#[derive(Debug, Clone, Default)]
pub struct RealHost;

#[cfg_attr(coverage_nightly, coverage(off))]
impl Host for RealHost {
    fn output(&mut self) -> impl Write {
        stdout()
    }

    fn error(&mut self) -> impl Write {
        stderr()
    }

    fn exit(&mut self, code: i32) {
        // process::exit skips destructors, including the shutdown guard in main
        let _ = shutdown_sweep();
        std::process::exit(code);
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
fn main() -> Result<(), ohno::AppError> {
    let _guard = ShutdownGuard::new();
    run(&mut RealHost, std::env::args())
}
