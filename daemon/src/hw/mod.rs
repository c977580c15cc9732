//! Hosted implementations of the mux hardware seams.

pub mod clock;
pub mod mmio;

pub use clock::EmbassyClock;
pub use mmio::MmioWindow;
