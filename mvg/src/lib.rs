//! # `mvg`
//!
//! Batteries-included multi-view geometry for calibrated camera rigs.
//!
//! This crate gathers the multi-view geometry crates in one place. It is convenient for
//! scripts and tutorials. Production code should depend on the individual crates.
//!
//! All of the basic types are included in the root of the crate.
//!
//! ## Modules
//! * [`camera`] - camera models to convert pixels into focal plane points (and back)
//! * [`geom`] - closed-form triangulation and planar homographies
//! * [`optimize`] - iterative triangulation, registration and their cost functions

pub use mvg_core::*;

/// Camera models
pub mod camera {
    /// The pinhole camera model with Brown distortion
    #[cfg(feature = "mvg-pinhole")]
    pub use mvg_pinhole as pinhole;
}

/// Closed-form geometry
pub mod geom {
    #[cfg(feature = "mvg-geom")]
    pub use mvg_geom::*;
}

/// Iterative estimation
pub mod optimize {
    #[cfg(feature = "mvg-optimize")]
    pub use mvg_optimize::*;
}
