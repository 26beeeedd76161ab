//! # MVG Core
//!
//! This library provides the common abstractions and types shared by the multi-view geometry crates.
//! It contains the point types handed to the triangulation and registration engines, the poses that
//! relate the world, the cameras and a registered model, and the [`CameraModel`] capability trait
//! through which every algorithm talks to a calibrated camera.
//!
//! ## Frames
//!
//! Three frames show up everywhere:
//!
//! * The *world* frame, shared by all cameras of a rig. Cameras know their pose in this frame
//!   through their extrinsic parameters ([`WorldToCamera`]).
//! * The *camera* frame of each camera, where the positive X axis is right, Y is down and Z is
//!   forwards from the optical center.
//! * The *model* frame of a rigid 3D point model. Registration solves for the [`RigidTransform`]
//!   that maps the model frame into the world frame.
//!
//! ## Image coordinates
//!
//! An observation on an image is either a raw [`PixelPoint`] or a [`FocalPlanePoint`], which has
//! already been corrected for the intrinsics (and usually the distortion) of the camera. The two
//! are distinct types so that algorithms that need one or the other say so in their signature.
//!
//! ```text
//!                 unit focal plane (z = 1)
//!                        @
//!               p--------f--------O  camera center
//!                        @
//!                        @
//! ```

mod camera;
mod keypoint;
mod line;
mod point;
mod pose;

pub use camera::*;
pub use keypoint::*;
pub use line::*;
pub use nalgebra;
pub use point::*;
pub use pose::*;
