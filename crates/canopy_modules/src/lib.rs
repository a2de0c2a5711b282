//! Concrete module libraries for Canopy.
//!
//! - [`standard_library`]: the harmonic oscillator pair and linear thermal time.
//! - [`test_library`]: small modules used to exercise library mixing and
//!   Euler-only integration. Its `thermal_time_linear` shares the standard
//!   module's interface on purpose.

pub mod standard;
pub mod testing;

use canopy_core::ModuleLibrary;

pub use standard::standard_library;
pub use testing::test_library;

/// Both libraries in lookup order: standard first.
pub fn all_libraries() -> Vec<ModuleLibrary> {
    vec![standard_library(), test_library()]
}
