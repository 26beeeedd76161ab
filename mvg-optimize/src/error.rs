use mvg_geom::HomographyError;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RegistrationError {
    #[error("registration needs at least one camera")]
    NoCameras,
    #[error("the intrinsics of camera {0} are not calibrated")]
    UncalibratedCamera(usize),
    #[error("got {observations} observation lists for {cameras} cameras")]
    CameraCountMismatch { observations: usize, cameras: usize },
    #[error("camera {camera} has {actual} observations for a model of {expected} points")]
    ShapeMismatch {
        camera: usize,
        expected: usize,
        actual: usize,
    },
    #[error("model point {point} is out of range for a model of {points} points")]
    PointOutOfRange { point: usize, points: usize },
    #[error("need at least {required} visible observations, got {actual}")]
    NotEnoughVisiblePoints { required: usize, actual: usize },
    #[error("the optimizer failed internally: {0}")]
    Optimizer(String),
    #[error("homography initialization failed: {0}")]
    Homography(#[from] HomographyError),
}
