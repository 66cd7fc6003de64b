//! Bench instruments: sessions, addressing and per-instrument command sets.
//!
//! Every instrument is reached through an [`InstrumentSession`] speaking
//! newline-terminated SCPI. The typed wrappers ([`Oscilloscope`],
//! [`FunctionGenerator`], [`PowerSupply`]) only format commands and parse
//! responses; they hold no other state.

pub mod address;
pub mod fxngen;
pub mod scope;
pub mod scpi;
pub mod session;
pub mod supply;

pub use address::ResourceAddress;
pub use fxngen::FunctionGenerator;
pub use scope::{Coupling, Marker, Oscilloscope};
pub use session::{DynIo, Identity, InstrumentIo, InstrumentSession, SessionOptions};
pub use supply::PowerSupply;

/// The instruments a procedure needs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InstrumentSet {
    pub scope: bool,
    pub fxngen: bool,
    pub supply: bool,
}

impl InstrumentSet {
    pub const fn scope_only() -> Self {
        Self {
            scope: true,
            fxngen: false,
            supply: false,
        }
    }

    pub const fn with_fxngen(mut self) -> Self {
        self.fxngen = true;
        self
    }

    pub const fn with_supply(mut self) -> Self {
        self.supply = true;
        self
    }
}
