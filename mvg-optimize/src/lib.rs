//! Iterative triangulation and 3D/2D point registration for calibrated camera rigs.
//!
//! Every criterion is a [`ResidualFunction`], so any of them can be handed to one of the three
//! [`Backend`]s: a restarted Nelder-Mead simplex, Levenberg-Marquardt, or nonlinear conjugate
//! gradients.
//!
//! ## Registration
//!
//! [`multi_view_point_registration_3d2d`] finds the rigid transform of a 3D model that best
//! explains its observations on several calibrated cameras. The [`Criterion`] decides what
//! "best" means: pixel reprojection errors ([`Isppc`]), distances to the back-projected rays
//! ([`Osppc`]), or a joint refinement of the model points and the pose that accounts for the
//! uncertainty of both ([`Eppc`]).
//!
//! [`mono_view_point_registration_3d2d`] registers a planar model seen by one camera, starting
//! from its homography.
//!
//! ## Triangulation
//!
//! [`MultiLines`] and [`ReprojectionOptimization`] refine the closed-form solution of
//! `mvg-geom` over all views. [`reconst3d`] wraps any triangulator with the residual threshold
//! and the covariance propagation.

mod cost;
mod error;
mod registration;
mod settings;
mod solver;
mod triangulation;

pub use cost::*;
pub use error::*;
pub use registration::*;
pub use settings::*;
pub use solver::*;
pub use triangulation::*;
