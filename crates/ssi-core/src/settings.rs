//! Intersection parameters and per-query sampling hints.

use serde::{Deserialize, Serialize};

use crate::error::{Result, SsiError};

/// Tunable parameters of an intersection query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IntersectionSettings {
    /// Linear tolerance: maximum distance between the two surface points of a
    /// refined intersection point.
    pub tolerance: f64,
    /// Chord tolerance of the surface meshes. `None` uses 1% of the sampled
    /// bounding-box diagonal of each surface.
    pub deflection: Option<f64>,
    /// Initial grid size along u.
    pub samples_u: usize,
    /// Initial grid size along v.
    pub samples_v: usize,
    /// Maximum number of span subdivision passes.
    pub max_refine_depth: usize,
    /// Parameter clamp applied to unbounded domain directions.
    pub unbounded_clamp: f64,
    /// Endpoint merge distance for segment chaining. `None` derives it from
    /// the tolerance and the model size.
    pub merge_tolerance: Option<f64>,
    /// Normal angle (radians) below which two surfaces count as tangent.
    pub tangent_angle: f64,
    /// Tangent zones with fewer points are discarded as rounding noise.
    pub min_tangent_zone_points: usize,
    /// Iteration cap of the point refinement.
    pub max_newton_iterations: usize,
    /// Consult the normal-offset mesh for pairs the plain mesh rejects.
    pub use_circumscribed: bool,
    /// Normal offset of the circumscribed mesh, in units of local deflection.
    pub circumscribe_factor: f64,
    /// Mesh only the cells of each surface that reach the common box of the
    /// two surfaces, at the full grid density.
    pub restrict_to_common_box: bool,
    /// Join open lines whose free ends meet, bridging small aligned gaps.
    pub join_lines: bool,
    /// Drop line points that lie on the chord of their neighbours.
    pub purge_lines: bool,
    /// Run the mesh builds and the coupling search on the rayon pool.
    pub parallel: bool,
}

impl Default for IntersectionSettings {
    fn default() -> Self {
        Self {
            tolerance: 1e-6,
            deflection: None,
            samples_u: 21,
            samples_v: 21,
            max_refine_depth: 4,
            unbounded_clamp: 100.0,
            merge_tolerance: None,
            tangent_angle: 1e-3,
            min_tangent_zone_points: 4,
            max_newton_iterations: 32,
            use_circumscribed: true,
            circumscribe_factor: 1.5,
            restrict_to_common_box: true,
            join_lines: true,
            purge_lines: true,
            parallel: true,
        }
    }
}

impl IntersectionSettings {
    /// Settings with the given tolerance and defaults elsewhere.
    pub fn with_tolerance(tolerance: f64) -> Self {
        Self {
            tolerance,
            ..Self::default()
        }
    }

    /// Parse settings from TOML; missing keys take their default values.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let settings: Self = toml::from_str(s).map_err(|e| SsiError::Config(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Validate settings.
    pub fn validate(&self) -> Result<()> {
        if !(self.tolerance.is_finite() && self.tolerance > 0.0) {
            return Err(SsiError::InvalidTolerance(self.tolerance));
        }
        if let Some(d) = self.deflection {
            if !(d.is_finite() && d > 0.0) {
                return Err(SsiError::InvalidSettings(
                    "deflection must be positive".into(),
                ));
            }
        }
        if self.samples_u < 2 || self.samples_v < 2 {
            return Err(SsiError::InvalidSettings(
                "samples_u and samples_v must be at least 2".into(),
            ));
        }
        if !(self.unbounded_clamp.is_finite() && self.unbounded_clamp > 0.0) {
            return Err(SsiError::InvalidSettings(
                "unbounded_clamp must be positive".into(),
            ));
        }
        if let Some(m) = self.merge_tolerance {
            if !(m.is_finite() && m > 0.0) {
                return Err(SsiError::InvalidSettings(
                    "merge_tolerance must be positive".into(),
                ));
            }
        }
        if !(self.tangent_angle > 0.0 && self.tangent_angle < std::f64::consts::FRAC_PI_2) {
            return Err(SsiError::InvalidSettings(
                "tangent_angle must be between 0 and pi/2".into(),
            ));
        }
        if self.max_newton_iterations == 0 {
            return Err(SsiError::InvalidSettings(
                "max_newton_iterations must be positive".into(),
            ));
        }
        if !(self.circumscribe_factor.is_finite() && self.circumscribe_factor >= 1.0) {
            return Err(SsiError::InvalidSettings(
                "circumscribe_factor must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Endpoint merge distance for a model of the given size.
    pub fn merge_distance(&self, model_size: f64) -> f64 {
        self.merge_tolerance
            .unwrap_or_else(|| (10.0 * self.tolerance).max(1e-9 * model_size))
    }
}

/// A rectangle in parameter space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParamRange {
    /// `(u_min, u_max)`.
    pub u: (f64, f64),
    /// `(v_min, v_max)`.
    pub v: (f64, f64),
}

impl ParamRange {
    /// Create a parameter rectangle.
    pub fn new(u: (f64, f64), v: (f64, f64)) -> Self {
        Self { u, v }
    }
}

/// Per-query overrides of the sampled region and grid size of each surface.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SampleHints {
    /// Parameter region to sample on surface 1.
    pub uv1: Option<ParamRange>,
    /// Parameter region to sample on surface 2.
    pub uv2: Option<ParamRange>,
    /// Grid size `(nu, nv)` for surface 1.
    pub samples1: Option<(usize, usize)>,
    /// Grid size `(nu, nv)` for surface 2.
    pub samples2: Option<(usize, usize)>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_default_settings_valid() {
        assert!(IntersectionSettings::default().validate().is_ok());
    }

    #[test]
    fn test_invalid_settings() {
        let s = IntersectionSettings::with_tolerance(-1.0);
        assert!(matches!(s.validate(), Err(SsiError::InvalidTolerance(_))));

        let s = IntersectionSettings {
            samples_u: 1,
            ..Default::default()
        };
        assert!(matches!(s.validate(), Err(SsiError::InvalidSettings(_))));

        let s = IntersectionSettings {
            circumscribe_factor: 0.5,
            ..Default::default()
        };
        assert!(s.validate().is_err());
    }

    #[test]
    fn test_from_toml() {
        let s = IntersectionSettings::from_toml_str(
            r#"
            tolerance = 1e-5
            samples_u = 33
            min_tangent_zone_points = 8
            parallel = false
            purge_lines = false
            "#,
        )
        .unwrap();
        assert_eq!(s.tolerance, 1e-5);
        assert_eq!(s.samples_u, 33);
        assert_eq!(s.samples_v, 21);
        assert_eq!(s.min_tangent_zone_points, 8);
        assert!(!s.parallel);
        assert!(!s.purge_lines);
        assert!(s.join_lines && s.restrict_to_common_box);
        assert_eq!(s.deflection, None);
    }

    #[test]
    fn test_from_toml_rejects_unknown_and_invalid() {
        assert!(matches!(
            IntersectionSettings::from_toml_str("bogus = 1"),
            Err(SsiError::Config(_))
        ));
        assert!(matches!(
            IntersectionSettings::from_toml_str("tolerance = 0.0"),
            Err(SsiError::InvalidTolerance(_))
        ));
    }

    #[test]
    fn test_merge_distance() {
        let s = IntersectionSettings::with_tolerance(1e-6);
        assert_relative_eq!(s.merge_distance(1.0), 1e-5, max_relative = 1e-12);
        assert_relative_eq!(s.merge_distance(1e6), 1e-3, max_relative = 1e-12);
        let s = IntersectionSettings {
            merge_tolerance: Some(0.5),
            ..Default::default()
        };
        assert_eq!(s.merge_distance(1.0), 0.5);
    }
}
