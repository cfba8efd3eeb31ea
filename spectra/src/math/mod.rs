//! Numerical building blocks shared by the reduction stages.

pub mod bspline;
pub mod filter;
pub mod poly;
pub mod statistics;

pub use bspline::BSpline;
pub use poly::Polynomial;

#[cfg(test)]
mod tests;
