//! This crate contains the closed-form geometry of a calibrated camera rig.
//!
//! ## Triangulation
//!
//! We know the pose of every camera in the world and the image of the same point on each of them.
//! Each observation back-projects to a ray from the optical center of its camera. We want the
//! point where the rays meet.
//!
//! - `p` the point we are trying to triangulate
//! - `a` the observation on camera A, on its unit focal plane
//! - `b` the observation on camera B, on its unit focal plane
//! - `O` the optical center of a camera
//! - `@` the unit focal plane
//!
//! ```text
//!                        @
//!                        @
//!               p--------b--------O
//!              /         @
//!             /          @
//!            /           @
//!           /            @
//!   @@@@@@@a@@@@@
//!         /
//!        /
//!       /
//!      O
//! ```
//!
//! [`Horaud`] and [`TwoLines`] solve this for a pair of views in closed form. The iterative
//! methods live in `mvg-optimize` and implement the same [`Triangulator`] trait.
//!
//! ## Planar homographies
//!
//! [`planar_homography_unknown_intrinsic`] estimates the homography between a planar model and
//! its image. [`planar_homography_registration`] does the same on the unit focal plane of a
//! calibrated camera and decomposes the result into a rigid pose.

mod error;
mod homography;
mod triangulation;

pub use error::*;
pub use homography::*;
pub use triangulation::*;
