//! Identifier engines.
//!
//! - [`ClockEngine`]: local, clock-driven ids in a binary ([`Layout::Binary`])
//!   or decimal ([`Layout::Decimal`]) layout.
//! - [`BreadcrumbEngine`]: ids from a counter shared through the coordinator,
//!   optionally fronted by a [`PrefetchBuffer`](crate::buffer::PrefetchBuffer).

mod breadcrumb;
mod clock;
#[cfg(test)]
mod tests;

pub use breadcrumb::*;
pub use clock::*;
