use thiserror::Error;

/// The geometric configuration that made a closed-form triangulation ill-posed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DegeneracyKind {
    /// `beta * x2 - alpha` vanished in the Horaud depth equation.
    HoraudDenominator,
    /// The two back-projected rays are parallel.
    ParallelRays,
    /// Both optical centers coincide, so the depth is unobservable.
    ZeroBaseline,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TriangulationError {
    #[error("got {observations} observations for {cameras} cameras")]
    CountMismatch { observations: usize, cameras: usize },
    #[error("triangulation needs at least 2 cameras, got {0}")]
    NotEnoughCameras(usize),
    #[error("this method works on exactly {expected} cameras, got {actual}")]
    CameraCount { expected: usize, actual: usize },
    #[error("degenerate geometry: {0:?}")]
    Degenerate(DegeneracyKind),
    #[error("observation {0} could not be brought to the unit focal plane")]
    Unprojectable(usize),
    #[error("residual {residual} is above the accepted maximum {maximum}")]
    ErrorAboveThreshold { residual: f64, maximum: f64 },
    #[error("the point optimization failed: {0}")]
    Optimizer(String),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum HomographyError {
    #[error("need at least 4 point correspondences, got {0}")]
    NotEnoughPoints(usize),
    #[error("got {image} image points for {model} model points")]
    CountMismatch { image: usize, model: usize },
    #[error("the camera intrinsics are not calibrated")]
    UncalibratedCamera,
    #[error("image point {0} could not be brought to the unit focal plane")]
    Unprojectable(usize),
    #[error("degenerate point configuration")]
    Degenerate,
}
