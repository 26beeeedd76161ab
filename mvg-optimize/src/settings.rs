#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

/// The settings of the derivative-free backend.
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct NelderMeadSettings {
    /// The maximum number of iterations of a single simplex run
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_nelder_mead_max_iterations")
    )]
    pub max_iterations: u64,
    /// The standard deviation of the costs on the simplex under which a run stops
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_nelder_mead_sd_tolerance")
    )]
    pub sd_tolerance: f64,
    /// A new simplex is built around the best vertex as long as a run improves the cost by more
    /// than this fraction
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_nelder_mead_restart_tolerance")
    )]
    pub restart_tolerance: f64,
    /// The maximum number of simplex rebuilds
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_nelder_mead_max_restarts")
    )]
    pub max_restarts: usize,
}

impl NelderMeadSettings {
    #[must_use]
    pub fn max_iterations(self, max_iterations: u64) -> Self {
        Self {
            max_iterations,
            ..self
        }
    }

    #[must_use]
    pub fn sd_tolerance(self, sd_tolerance: f64) -> Self {
        Self {
            sd_tolerance,
            ..self
        }
    }

    #[must_use]
    pub fn restart_tolerance(self, restart_tolerance: f64) -> Self {
        Self {
            restart_tolerance,
            ..self
        }
    }

    #[must_use]
    pub fn max_restarts(self, max_restarts: usize) -> Self {
        Self {
            max_restarts,
            ..self
        }
    }
}

impl Default for NelderMeadSettings {
    fn default() -> Self {
        Self {
            max_iterations: default_nelder_mead_max_iterations(),
            sd_tolerance: default_nelder_mead_sd_tolerance(),
            restart_tolerance: default_nelder_mead_restart_tolerance(),
            max_restarts: default_nelder_mead_max_restarts(),
        }
    }
}

/// The settings of the nonlinear conjugate gradient backend (Polak-Ribière with a
/// More-Thuente line search).
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct ConjugateGradientSettings {
    /// The maximum number of iterations of a single run
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_conjugate_gradient_max_iterations")
    )]
    pub max_iterations: u64,
    /// The search direction is reset to the steepest descent every this many iterations
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_conjugate_gradient_restart_iterations")
    )]
    pub restart_iterations: u64,
    /// The search direction is reset when consecutive gradients are less orthogonal than this
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_conjugate_gradient_restart_orthogonality")
    )]
    pub restart_orthogonality: f64,
    /// The maximum number of new runs started from the best iterate of the previous one, as
    /// long as that run lowered the cost
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_conjugate_gradient_max_restarts")
    )]
    pub max_restarts: usize,
}

impl ConjugateGradientSettings {
    #[must_use]
    pub fn max_iterations(self, max_iterations: u64) -> Self {
        Self {
            max_iterations,
            ..self
        }
    }

    #[must_use]
    pub fn max_restarts(self, max_restarts: usize) -> Self {
        Self {
            max_restarts,
            ..self
        }
    }
}

impl Default for ConjugateGradientSettings {
    fn default() -> Self {
        Self {
            max_iterations: default_conjugate_gradient_max_iterations(),
            restart_iterations: default_conjugate_gradient_restart_iterations(),
            restart_orthogonality: default_conjugate_gradient_restart_orthogonality(),
            max_restarts: default_conjugate_gradient_max_restarts(),
        }
    }
}

/// The settings of the Levenberg-Marquardt backend.
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct LevenbergMarquardtSettings {
    /// Relative reduction of the cost under which the solver stops
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_levenberg_marquardt_tolerance")
    )]
    pub ftol: f64,
    /// Relative change of the parameters under which the solver stops
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_levenberg_marquardt_tolerance")
    )]
    pub xtol: f64,
    /// Orthogonality between the residuals and the Jacobian columns under which the solver stops
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_levenberg_marquardt_tolerance")
    )]
    pub gtol: f64,
    /// The solver stops after `patience * (parameters + 1)` evaluations
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_levenberg_marquardt_patience")
    )]
    pub patience: usize,
}

impl LevenbergMarquardtSettings {
    /// Sets both the cost and parameter tolerances.
    #[must_use]
    pub fn tolerance(self, tolerance: f64) -> Self {
        Self {
            ftol: tolerance,
            xtol: tolerance,
            ..self
        }
    }
}

impl Default for LevenbergMarquardtSettings {
    fn default() -> Self {
        Self {
            ftol: default_levenberg_marquardt_tolerance(),
            xtol: default_levenberg_marquardt_tolerance(),
            gtol: default_levenberg_marquardt_tolerance(),
            patience: default_levenberg_marquardt_patience(),
        }
    }
}

/// Knobs of every optimization backend.
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde-serialize", serde(default))]
#[derive(Debug, Copy, Clone, PartialEq, Default)]
pub struct OptimizerSettings {
    pub nelder_mead: NelderMeadSettings,
    pub conjugate_gradient: ConjugateGradientSettings,
    pub levenberg_marquardt: LevenbergMarquardtSettings,
}

/// The alternation of the extended projective point criterion.
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct EppcSettings {
    /// The maximum number of point refinement and pose estimation rounds
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_eppc_max_iterations")
    )]
    pub max_iterations: usize,
    /// The rounds stop once the RMS of the change of the se(3) pose parameters is under this
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_eppc_pose_tolerance")
    )]
    pub pose_tolerance: f64,
    /// The cost and parameter tolerance of the point refinement
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_eppc_point_tolerance")
    )]
    pub point_tolerance: f64,
}

impl EppcSettings {
    #[must_use]
    pub fn max_iterations(self, max_iterations: usize) -> Self {
        Self {
            max_iterations,
            ..self
        }
    }

    #[must_use]
    pub fn pose_tolerance(self, pose_tolerance: f64) -> Self {
        Self {
            pose_tolerance,
            ..self
        }
    }

    #[must_use]
    pub fn point_tolerance(self, point_tolerance: f64) -> Self {
        Self {
            point_tolerance,
            ..self
        }
    }
}

impl Default for EppcSettings {
    fn default() -> Self {
        Self {
            max_iterations: default_eppc_max_iterations(),
            pose_tolerance: default_eppc_pose_tolerance(),
            point_tolerance: default_eppc_point_tolerance(),
        }
    }
}

/// The settings of a 3D/2D registration.
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde-serialize", serde(default))]
#[derive(Debug, Copy, Clone, PartialEq, Default)]
pub struct RegistrationSettings {
    pub optimizer: OptimizerSettings,
    pub eppc: EppcSettings,
}

impl RegistrationSettings {
    #[must_use]
    pub fn optimizer(self, optimizer: OptimizerSettings) -> Self {
        Self { optimizer, ..self }
    }

    #[must_use]
    pub fn eppc(self, eppc: EppcSettings) -> Self {
        Self { eppc, ..self }
    }
}

fn default_nelder_mead_max_iterations() -> u64 {
    3000
}

fn default_nelder_mead_sd_tolerance() -> f64 {
    1e-14
}

fn default_nelder_mead_restart_tolerance() -> f64 {
    1e-6
}

fn default_nelder_mead_max_restarts() -> usize {
    8
}

fn default_conjugate_gradient_max_iterations() -> u64 {
    4000
}

fn default_conjugate_gradient_restart_iterations() -> u64 {
    10
}

fn default_conjugate_gradient_restart_orthogonality() -> f64 {
    0.1
}

fn default_conjugate_gradient_max_restarts() -> usize {
    4
}

fn default_levenberg_marquardt_tolerance() -> f64 {
    1e-12
}

fn default_levenberg_marquardt_patience() -> usize {
    100
}

fn default_eppc_max_iterations() -> usize {
    10
}

fn default_eppc_pose_tolerance() -> f64 {
    1e-4
}

fn default_eppc_point_tolerance() -> f64 {
    1e-6
}
