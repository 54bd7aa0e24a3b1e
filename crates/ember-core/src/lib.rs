// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]

mod fps;
mod logging;
mod timer;

pub use fps::FpsCounter;
pub use logging::init_tracing;
pub use timer::ScopedTimer;
