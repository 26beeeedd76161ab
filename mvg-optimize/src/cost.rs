//! The criteria minimized by registration and iterative triangulation.
//!
//! Pose criteria take the se(3) vector of the model-to-world transform (translation first) as
//! parameters. Point criteria take stacked world coordinates.

use crate::{RegistrationError, ResidualFunction};
use itertools::izip;
use mvg_core::nalgebra::{DVector, Matrix2, Matrix3, Point2, Point3, Vector2, Vector3, Vector6};
use mvg_core::{
    CameraModel, Line3, Observation, PixelPoint, Pose, Projective, RigidTransform, ScenePoint,
    Undistortion, WorldPoint,
};

/// Square root of an information matrix `W = L Lᵀ`, returned as `Lᵀ` so that `|Lᵀ r|² = rᵀ W r`.
///
/// Falls back to the identity when the matrix is not positive definite.
fn whitening2(information: Matrix2<f64>) -> Matrix2<f64> {
    information
        .cholesky()
        .map(|c| c.l().transpose())
        .unwrap_or_else(Matrix2::identity)
}

fn whitening3(information: Matrix3<f64>) -> Matrix3<f64> {
    information
        .cholesky()
        .map(|c| c.l().transpose())
        .unwrap_or_else(Matrix3::identity)
}

fn transform_from_params(params: &DVector<f64>) -> RigidTransform {
    RigidTransform::from_se3(Vector6::from_column_slice(params.as_slice()))
}

fn point_from_params(params: &DVector<f64>, ix: usize) -> Point3<f64> {
    Point3::from(params.fixed_rows::<3>(3 * ix).into_owned())
}

/// Number of visible observations over all cameras.
pub fn visible_count(observations: &[Vec<Observation<PixelPoint>>]) -> usize {
    observations
        .iter()
        .flat_map(|list| list.iter())
        .filter(|o| o.visible)
        .count()
}

/// Checks that there is one observation list per camera and one observation per model point in
/// each list.
pub(crate) fn check_layout(
    cameras: usize,
    observations: &[Vec<Observation<PixelPoint>>],
    model: usize,
) -> Result<(), RegistrationError> {
    if observations.len() != cameras {
        return Err(RegistrationError::CameraCountMismatch {
            observations: observations.len(),
            cameras,
        });
    }
    match observations
        .iter()
        .enumerate()
        .find(|(_, list)| list.len() != model)
    {
        Some((camera, list)) => Err(RegistrationError::ShapeMismatch {
            camera,
            expected: model,
            actual: list.len(),
        }),
        None => Ok(()),
    }
}

/// One visible observation of model point `point` by camera `camera`.
#[derive(Debug, Clone, Copy)]
struct ImageTerm {
    camera: usize,
    point: usize,
    measured: Point2<f64>,
    whitening: Matrix2<f64>,
}

fn image_terms(
    observations: &[Vec<Observation<PixelPoint>>],
    anisotropic: bool,
) -> Vec<ImageTerm> {
    observations
        .iter()
        .enumerate()
        .flat_map(|(camera, list)| {
            list.iter()
                .enumerate()
                .filter(|(_, o)| o.visible)
                .map(move |(point, o)| ImageTerm {
                    camera,
                    point,
                    measured: o.point.0,
                    whitening: if anisotropic {
                        whitening2(o.information())
                    } else {
                        Matrix2::identity()
                    },
                })
        })
        .collect()
}

fn image_residual<C: CameraModel>(camera: &C, term: &ImageTerm, world: WorldPoint) -> Vector2<f64> {
    camera
        .project(world)
        .map(|p| term.whitening * (p.0 - term.measured))
        .unwrap_or_else(Vector2::zeros)
}

/// The image space projective point criterion.
///
/// Two residuals per visible observation, the difference between the projection of the
/// transformed model point and the observed pixel. Anisotropic residuals are whitened by the
/// observation covariance, so that their squared norm is `dᵀ Σ⁻¹ d`. Observations whose projection
/// fails contribute nothing.
#[derive(Debug, Clone)]
pub struct Isppc<C> {
    cameras: Vec<C>,
    model: Vec<Point3<f64>>,
    terms: Vec<ImageTerm>,
}

impl<C: CameraModel + Clone> Isppc<C> {
    /// `observations[i][j]` is the observation of `model[j]` by `cameras[i]`.
    pub fn new(
        cameras: &[C],
        observations: &[Vec<Observation<PixelPoint>>],
        model: &[Point3<f64>],
        anisotropic: bool,
    ) -> Result<Self, RegistrationError> {
        check_layout(cameras.len(), observations, model.len())?;
        Ok(Self {
            cameras: cameras.to_vec(),
            model: model.to_vec(),
            terms: image_terms(observations, anisotropic),
        })
    }
}

impl<C: CameraModel> ResidualFunction for Isppc<C> {
    fn residuals(&self, params: &DVector<f64>) -> DVector<f64> {
        let transform = transform_from_params(params);
        let world: Vec<WorldPoint> = self
            .model
            .iter()
            .map(|&p| transform.transform(WorldPoint::from_point(p)))
            .collect();
        DVector::from_iterator(
            2 * self.terms.len(),
            self.terms.iter().flat_map(|term| {
                let r = image_residual(&self.cameras[term.camera], term, world[term.point]);
                [r.x, r.y]
            }),
        )
    }
}

/// One visible observation as a unit ray in the frame of its camera.
#[derive(Debug, Clone, Copy)]
struct RayTerm {
    camera: usize,
    point: usize,
    ray: Option<Vector3<f64>>,
}

/// The object space projective point criterion.
///
/// Three residuals per visible observation, `f × (ext T M) / |f|` with `f = (x, y, 1)` the
/// observation on the unit focal plane. Its norm is the distance of the transformed model point to
/// the back-projected ray, so this criterion is expressed in world units.
#[derive(Debug, Clone)]
pub struct Osppc<C> {
    cameras: Vec<C>,
    model: Vec<Point3<f64>>,
    terms: Vec<RayTerm>,
}

impl<C: CameraModel + Clone> Osppc<C> {
    pub fn new(
        cameras: &[C],
        observations: &[Vec<Observation<PixelPoint>>],
        model: &[Point3<f64>],
    ) -> Result<Self, RegistrationError> {
        check_layout(cameras.len(), observations, model.len())?;
        let terms = izip!(0.., observations, cameras)
            .flat_map(|(camera_ix, list, camera)| {
                list.iter()
                    .enumerate()
                    .filter(|(_, o)| o.visible)
                    .map(move |(point, o)| RayTerm {
                        camera: camera_ix,
                        point,
                        ray: camera
                            .pixel_to_unit_focal_plane(o.point, Undistortion::Exact)
                            .map(|f| f.ray().normalize()),
                    })
            })
            .collect();
        Ok(Self {
            cameras: cameras.to_vec(),
            model: model.to_vec(),
            terms,
        })
    }
}

impl<C: CameraModel> ResidualFunction for Osppc<C> {
    fn residuals(&self, params: &DVector<f64>) -> DVector<f64> {
        let transform = transform_from_params(params);
        let world: Vec<WorldPoint> = self
            .model
            .iter()
            .map(|&p| transform.transform(WorldPoint::from_point(p)))
            .collect();
        DVector::from_iterator(
            3 * self.terms.len(),
            self.terms.iter().flat_map(|term| {
                let r = term.ray.map_or_else(Vector3::zeros, |ray| {
                    let camera_point = self.cameras[term.camera]
                        .extrinsic()
                        .transform(world[term.point]);
                    ray.cross(&camera_point.bearing_unnormalized())
                });
                [r.x, r.y, r.z]
            }),
        )
    }
}

/// The extended projective point criterion with the transform held fixed.
///
/// The model points themselves are the parameters. Each of them contributes three residuals for
/// its displacement from the measured model, whitened by the model covariance, and each visible
/// observation of it two whitened reprojection residuals.
///
/// The criterion is separable per point: [`Eppc::single`] keeps only the terms of one point.
#[derive(Debug, Clone)]
pub struct Eppc<C> {
    cameras: Vec<C>,
    transform: RigidTransform,
    /// Indices of the model points that are parameters.
    points: Vec<usize>,
    model: Vec<Point3<f64>>,
    model_whitening: Vec<Matrix3<f64>>,
    /// Image terms whose `point` indexes into `points`.
    terms: Vec<ImageTerm>,
}

impl<C: CameraModel + Clone> Eppc<C> {
    /// The criterion over every model point.
    pub fn new(
        cameras: &[C],
        observations: &[Vec<Observation<PixelPoint>>],
        model: &[ScenePoint],
        transform: RigidTransform,
    ) -> Result<Self, RegistrationError> {
        Self::with_points(
            cameras,
            observations,
            model,
            transform,
            (0..model.len()).collect(),
        )
    }

    /// The criterion restricted to model point `point`.
    pub fn single(
        cameras: &[C],
        observations: &[Vec<Observation<PixelPoint>>],
        model: &[ScenePoint],
        transform: RigidTransform,
        point: usize,
    ) -> Result<Self, RegistrationError> {
        if point >= model.len() {
            return Err(RegistrationError::PointOutOfRange {
                point,
                points: model.len(),
            });
        }
        Self::with_points(cameras, observations, model, transform, vec![point])
    }

    fn with_points(
        cameras: &[C],
        observations: &[Vec<Observation<PixelPoint>>],
        model: &[ScenePoint],
        transform: RigidTransform,
        points: Vec<usize>,
    ) -> Result<Self, RegistrationError> {
        check_layout(cameras.len(), observations, model.len())?;
        let terms = image_terms(observations, true)
            .into_iter()
            .filter_map(|term| {
                points
                    .iter()
                    .position(|&p| p == term.point)
                    .map(|local| ImageTerm {
                        camera: term.camera,
                        point: local,
                        measured: term.measured,
                        whitening: term.whitening,
                    })
            })
            .collect();
        Ok(Self {
            cameras: cameras.to_vec(),
            transform,
            model: points.iter().map(|&p| model[p].position).collect(),
            model_whitening: points
                .iter()
                .map(|&p| whitening3(model[p].information()))
                .collect(),
            points,
            terms,
        })
    }
}

impl<C> Eppc<C> {
    /// Indices of the model points that are parameters.
    pub fn points(&self) -> &[usize] {
        &self.points
    }

    /// The measured model points, stacked as a parameter vector.
    pub fn initial_params(&self) -> DVector<f64> {
        DVector::from_iterator(
            3 * self.model.len(),
            self.model.iter().flat_map(|p| [p.x, p.y, p.z]),
        )
    }
}

impl<C: CameraModel> Eppc<C> {
    fn model_residuals(&self, params: &DVector<f64>) -> impl Iterator<Item = f64> + '_ {
        let params = params.clone();
        self.model
            .iter()
            .zip(&self.model_whitening)
            .enumerate()
            .flat_map(move |(ix, (measured, whitening))| {
                let r = whitening * (point_from_params(&params, ix) - measured);
                [r.x, r.y, r.z]
            })
    }

    fn image_residuals(&self, params: &DVector<f64>) -> impl Iterator<Item = f64> + '_ {
        let world: Vec<WorldPoint> = (0..self.model.len())
            .map(|ix| {
                self.transform
                    .transform(WorldPoint::from_point(point_from_params(params, ix)))
            })
            .collect();
        self.terms.iter().flat_map(move |term| {
            let r = image_residual(&self.cameras[term.camera], term, world[term.point]);
            [r.x, r.y]
        })
    }

    /// The image and model parts of the cost.
    pub fn split_cost(&self, params: &DVector<f64>) -> (f64, f64) {
        let image = self.image_residuals(params).map(|r| r * r).sum();
        let model = self.model_residuals(params).map(|r| r * r).sum();
        (image, model)
    }
}

impl<C: CameraModel> ResidualFunction for Eppc<C> {
    fn residuals(&self, params: &DVector<f64>) -> DVector<f64> {
        DVector::from_iterator(
            3 * self.model.len() + 2 * self.terms.len(),
            self.model_residuals(params)
                .chain(self.image_residuals(params)),
        )
    }
}

/// Perpendicular offsets of a point to a set of lines.
#[derive(Debug, Clone)]
pub struct LineDistances {
    lines: Vec<Line3>,
}

impl LineDistances {
    pub fn new(lines: Vec<Line3>) -> Self {
        Self { lines }
    }
}

impl ResidualFunction for LineDistances {
    fn residuals(&self, params: &DVector<f64>) -> DVector<f64> {
        let point = point_from_params(params, 0);
        DVector::from_iterator(
            3 * self.lines.len(),
            self.lines.iter().flat_map(|line| {
                let r = line.offset(&point);
                [r.x, r.y, r.z]
            }),
        )
    }
}

/// Pixel reprojection residuals of one world point on several cameras, optionally whitened by
/// the observation covariances.
#[derive(Debug, Clone)]
pub struct PointReprojection<C> {
    cameras: Vec<C>,
    terms: Vec<ImageTerm>,
}

impl<C: CameraModel + Clone> PointReprojection<C> {
    /// Observation `i` was made by `cameras[i]`. Observations without a camera are ignored.
    pub fn new(cameras: &[C], observations: &[Observation<PixelPoint>], weighted: bool) -> Self {
        let terms = observations
            .iter()
            .zip(cameras)
            .enumerate()
            .map(|(camera, (o, _))| ImageTerm {
                camera,
                point: 0,
                measured: o.point.0,
                whitening: if weighted {
                    whitening2(o.information())
                } else {
                    Matrix2::identity()
                },
            })
            .collect();
        Self {
            cameras: cameras.to_vec(),
            terms,
        }
    }
}

impl<C: CameraModel> ResidualFunction for PointReprojection<C> {
    fn residuals(&self, params: &DVector<f64>) -> DVector<f64> {
        let world = WorldPoint::from_point(point_from_params(params, 0));
        DVector::from_iterator(
            2 * self.terms.len(),
            self.terms.iter().flat_map(|term| {
                let r = image_residual(&self.cameras[term.camera], term, world);
                [r.x, r.y]
            }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use mvg_core::nalgebra::{Rotation3, Vector3};
    use mvg_core::WorldToCamera;
    use mvg_pinhole::{CameraIntrinsics, PinholeCamera};

    fn camera() -> PinholeCamera {
        PinholeCamera::new(
            CameraIntrinsics::identity()
                .focal(1000.0)
                .principal_point(Point2::new(320.0, 240.0)),
        )
    }

    fn model() -> Vec<Point3<f64>> {
        vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(30.0, 0.0, 5.0),
            Point3::new(0.0, 40.0, -5.0),
            Point3::new(25.0, 35.0, 10.0),
        ]
    }

    fn transform() -> RigidTransform {
        RigidTransform::from_parts(
            Vector3::new(5.0, -10.0, 500.0),
            Rotation3::from_scaled_axis(Vector3::new(0.1, -0.2, 0.05)),
        )
    }

    fn observe(camera: &PinholeCamera, model: &[Point3<f64>]) -> Vec<Observation<PixelPoint>> {
        model
            .iter()
            .map(|&p| {
                Observation::new(
                    camera
                        .project(transform().transform(WorldPoint::from_point(p)))
                        .unwrap(),
                )
            })
            .collect()
    }

    fn se3() -> DVector<f64> {
        DVector::from_column_slice(transform().se3().as_slice())
    }

    #[test]
    fn criteria_vanish_at_the_true_pose() {
        let cameras = [camera()];
        let model = model();
        let observations = vec![observe(&cameras[0], &model)];
        let isppc = Isppc::new(&cameras, &observations, &model, false).unwrap();
        let osppc = Osppc::new(&cameras, &observations, &model).unwrap();
        assert_eq!(isppc.residuals(&se3()).len(), 8);
        assert_eq!(osppc.residuals(&se3()).len(), 12);
        assert_relative_eq!(isppc.cost(&se3()), 0.0, epsilon = 1e-12);
        assert_relative_eq!(osppc.cost(&se3()), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn hidden_observations_are_skipped() {
        let cameras = [camera()];
        let model = model();
        let mut list = observe(&cameras[0], &model);
        list[1] = list[1].visible(false);
        list[1].point = PixelPoint::new(0.0, 0.0);
        let isppc = Isppc::new(&cameras, &[list], &model, false).unwrap();
        assert_eq!(isppc.residuals(&se3()).len(), 6);
        assert_relative_eq!(isppc.cost(&se3()), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn anisotropic_residuals_are_whitened() {
        let cameras = [camera()];
        let model = model();
        let list: Vec<_> = observe(&cameras[0], &model)
            .into_iter()
            .map(|o| {
                let mut o = o.covariance(Matrix2::new(4.0, 0.0, 0.0, 0.25));
                o.point.0.x += 1.0;
                o.point.0.y += 1.0;
                o
            })
            .collect();
        let isotropic = Isppc::new(&cameras, &[list.clone()], &model, false).unwrap();
        let anisotropic = Isppc::new(&cameras, &[list], &model, true).unwrap();
        assert_relative_eq!(isotropic.cost(&se3()), 4.0 * 2.0, epsilon = 1e-9);
        assert_relative_eq!(anisotropic.cost(&se3()), 4.0 * (0.25 + 4.0), epsilon = 1e-9);
    }

    #[test]
    fn osppc_measures_distance_to_rays() {
        let cameras = [camera().with_extrinsic(WorldToCamera::from_parts(
            Vector3::new(1.0, 2.0, 3.0),
            Rotation3::identity(),
        ))];
        let model = vec![Point3::origin(); 3];
        let observations = vec![vec![Observation::new(PixelPoint::new(320.0, 240.0)); 3]];
        let osppc = Osppc::new(&cameras, &observations, &model).unwrap();
        // The optical axis passes 2.236 away from the translated origin.
        let params = DVector::from_vec(vec![0.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
        assert_relative_eq!(osppc.cost(&params), 3.0 * 5.0, epsilon = 1e-12);
    }

    #[test]
    fn eppc_splits_into_single_points() {
        let cameras = [camera()];
        let positions = model();
        let model: Vec<ScenePoint> = positions
            .iter()
            .map(|&p| ScenePoint::new(p).covariance(Matrix3::identity() * 0.25))
            .collect();
        let observations = vec![observe(&cameras[0], &positions)];
        let full = Eppc::new(&cameras, &observations, &model, transform()).unwrap();
        let mut params = full.initial_params();
        params[4] += 0.5;
        let (image, model_part) = full.split_cost(&params);
        assert_relative_eq!(model_part, 0.25 * 4.0, epsilon = 1e-12);
        assert!(image > 0.0);
        assert_relative_eq!(full.cost(&params), image + model_part, epsilon = 1e-9);

        let separate: f64 = (0..4)
            .map(|j| {
                let single = Eppc::single(&cameras, &observations, &model, transform(), j).unwrap();
                single.cost(&params.rows(3 * j, 3).into_owned())
            })
            .sum();
        assert_relative_eq!(separate, full.cost(&params), epsilon = 1e-9);
    }

    #[test]
    fn constructors_check_the_observation_layout() {
        let cameras = [camera()];
        let model = model();
        let scene: Vec<ScenePoint> = model.iter().map(|&p| ScenePoint::new(p)).collect();
        let mut long = observe(&cameras[0], &model);
        long.push(Observation::new(PixelPoint::new(0.0, 0.0)));
        let long = vec![long];
        let shape = RegistrationError::ShapeMismatch {
            camera: 0,
            expected: 4,
            actual: 5,
        };
        assert_eq!(Isppc::new(&cameras, &long, &model, false).unwrap_err(), shape);
        assert_eq!(Osppc::new(&cameras, &long, &model).unwrap_err(), shape);
        assert_eq!(Eppc::new(&cameras, &long, &scene, transform()).unwrap_err(), shape);

        let twice = vec![observe(&cameras[0], &model); 2];
        assert_eq!(
            Isppc::new(&cameras, &twice, &model, true).unwrap_err(),
            RegistrationError::CameraCountMismatch {
                observations: 2,
                cameras: 1
            }
        );
        assert_eq!(
            Eppc::single(&cameras, &twice[..1], &scene, transform(), 4).unwrap_err(),
            RegistrationError::PointOutOfRange { point: 4, points: 4 }
        );
    }

    #[test]
    fn line_distances() {
        let lines = vec![
            Line3::new(Point3::origin(), Vector3::z()).unwrap(),
            Line3::new(Point3::new(1.0, 0.0, 0.0), Vector3::y()).unwrap(),
        ];
        let cost = LineDistances::new(lines).cost(&DVector::from_vec(vec![0.0, 0.0, 2.0]));
        assert_relative_eq!(cost, 0.0 + 1.0 + 4.0);
    }
}
