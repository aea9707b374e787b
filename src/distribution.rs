//! # Distributions
//!
//! Message payloads as a tagged variant over the supported families.
//!
//! A [`Gaussian`] may carry any subset of its canonical slots (mean, variance,
//! precision, information value), each valid or invalid independently. Rules
//! pick the cheapest complete combination already present on their inputs and
//! convert only when nothing matches, so messages that stay in one
//! representation across iterations never pay for conversions.

use crate::error::{FgscError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Discriminant of a [`Distribution`], used as a rule-table key component.
///
/// The derived order is what symmetric nodes sort their inbound kinds by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistributionKind {
    Delta,
    Gaussian,
    Gamma,
    InverseGamma,
    Beta,
    StudentsT,
}

impl fmt::Display for DistributionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DistributionKind::Delta => "delta",
            DistributionKind::Gaussian => "gaussian",
            DistributionKind::Gamma => "gamma",
            DistributionKind::InverseGamma => "inverse_gamma",
            DistributionKind::Beta => "beta",
            DistributionKind::StudentsT => "students_t",
        };
        f.write_str(name)
    }
}

/// Complete Gaussian parameter pairs, listed cheapest-to-use first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Parametrization {
    /// `(m, V)`
    MeanVariance,
    /// `(m, W)`
    MeanPrecision,
    /// `(xi, W)` with `xi = W m`
    Canonical,
}

const PARAMETRIZATIONS: [Parametrization; 3] = [
    Parametrization::MeanVariance,
    Parametrization::MeanPrecision,
    Parametrization::Canonical,
];

/// Univariate Gaussian with independently valid parameter slots.
///
/// At least one complete [`Parametrization`] is always valid. Values come in
/// through the constructors or through deserialization, which rejects slot
/// sets without a complete form or with slots that disagree. Conversions only
/// ever add slots.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "GaussianRepr")]
pub struct Gaussian {
    m: Option<f64>,
    v: Option<f64>,
    w: Option<f64>,
    xi: Option<f64>,
}

/// Unchecked wire form of [`Gaussian`].
#[derive(Deserialize)]
struct GaussianRepr {
    m: Option<f64>,
    v: Option<f64>,
    w: Option<f64>,
    xi: Option<f64>,
}

impl TryFrom<GaussianRepr> for Gaussian {
    type Error = FgscError;

    fn try_from(repr: GaussianRepr) -> Result<Self> {
        let g = Gaussian {
            m: repr.m,
            v: repr.v,
            w: repr.w,
            xi: repr.xi,
        };
        if !g.is_complete() {
            return Err(FgscError::improper("gaussian carries no complete parametrization"));
        }
        if !g.is_consistent() {
            return Err(FgscError::improper(format!("gaussian slots disagree: {:?}", g)));
        }
        Ok(g)
    }
}

impl Gaussian {
    pub fn from_mean_variance(m: f64, v: f64) -> Self {
        Self {
            m: Some(m),
            v: Some(v),
            w: None,
            xi: None,
        }
    }

    pub fn from_mean_precision(m: f64, w: f64) -> Self {
        Self {
            m: Some(m),
            v: None,
            w: Some(w),
            xi: None,
        }
    }

    pub fn from_canonical(xi: f64, w: f64) -> Self {
        Self {
            m: None,
            v: None,
            w: Some(w),
            xi: Some(xi),
        }
    }

    pub fn m(&self) -> Option<f64> {
        self.m
    }

    pub fn v(&self) -> Option<f64> {
        self.v
    }

    pub fn w(&self) -> Option<f64> {
        self.w
    }

    pub fn xi(&self) -> Option<f64> {
        self.xi
    }

    pub fn is_valid(&self, form: Parametrization) -> bool {
        match form {
            Parametrization::MeanVariance => self.m.is_some() && self.v.is_some(),
            Parametrization::MeanPrecision => self.m.is_some() && self.w.is_some(),
            Parametrization::Canonical => self.xi.is_some() && self.w.is_some(),
        }
    }

    /// Makes `form` valid, deriving only the slots that are missing.
    ///
    /// A no-op when `form` is already valid.
    pub fn ensure(&mut self, form: Parametrization) -> Result<()> {
        if self.is_valid(form) {
            return Ok(());
        }
        tracing::trace!("[FGSC] converting gaussian {:?} to {:?}", self, form);
        match form {
            Parametrization::MeanVariance => {
                self.fill_mean()?;
                self.fill_variance()
            }
            Parametrization::MeanPrecision => {
                self.fill_precision()?;
                self.fill_mean()
            }
            Parametrization::Canonical => {
                self.fill_precision()?;
                self.fill_xi()
            }
        }
    }

    /// Copy of `self` with `form` made valid.
    pub fn converted(mut self, form: Parametrization) -> Result<Self> {
        self.ensure(form)?;
        Ok(self)
    }

    pub fn mean(&self) -> Result<f64> {
        Ok(self.converted(Parametrization::MeanVariance)?.m.unwrap_or_default())
    }

    pub fn variance(&self) -> Result<f64> {
        Ok(self.converted(Parametrization::MeanVariance)?.v.unwrap_or_default())
    }

    /// A complete form, finite slots, non-negative variance and strictly
    /// positive precision.
    pub fn is_proper(&self) -> bool {
        let finite = [self.m, self.v, self.w, self.xi]
            .iter()
            .flatten()
            .all(|x| x.is_finite());
        self.is_complete()
            && finite
            && self.v.map_or(true, |v| v >= 0.0)
            && self.w.map_or(true, |w| w > 0.0)
    }

    /// Mean of a zero-variance Gaussian.
    pub fn point_mass(&self) -> Option<f64> {
        match (self.m, self.v) {
            (Some(m), Some(v)) if v == 0.0 => Some(m),
            _ => None,
        }
    }

    fn is_complete(&self) -> bool {
        PARAMETRIZATIONS.iter().any(|form| self.is_valid(*form))
    }

    /// Redundant slots describe the same density.
    fn is_consistent(&self) -> bool {
        let close = |a: f64, b: f64| (a - b).abs() <= 1e-9 * a.abs().max(b.abs()).max(1.0);
        let precision = match (self.v, self.w) {
            (Some(v), Some(w)) => close(v * w, 1.0),
            _ => true,
        };
        let information = match (self.m, self.v, self.w, self.xi) {
            (Some(m), _, Some(w), Some(xi)) => close(w * m, xi),
            (Some(m), Some(v), None, Some(xi)) => close(xi * v, m),
            _ => true,
        };
        precision && information
    }

    fn fill_precision(&mut self) -> Result<()> {
        if self.w.is_some() {
            return Ok(());
        }
        match self.v {
            Some(v) if v > 0.0 => {
                self.w = Some(1.0 / v);
                Ok(())
            }
            Some(_) => Err(FgscError::improper("zero variance has no precision form")),
            None => Err(FgscError::improper("gaussian carries neither variance nor precision")),
        }
    }

    fn fill_variance(&mut self) -> Result<()> {
        if self.v.is_some() {
            return Ok(());
        }
        match self.w {
            Some(w) if w > 0.0 => {
                self.v = Some(1.0 / w);
                Ok(())
            }
            Some(_) => Err(FgscError::improper("zero precision has no variance form")),
            None => Err(FgscError::improper("gaussian carries neither variance nor precision")),
        }
    }

    fn fill_mean(&mut self) -> Result<()> {
        if self.m.is_some() {
            return Ok(());
        }
        let xi = self
            .xi
            .ok_or_else(|| FgscError::improper("gaussian carries neither mean nor xi"))?;
        self.m = match (self.v, self.w) {
            (Some(v), _) => Some(xi * v),
            (None, Some(w)) if w != 0.0 => Some(xi / w),
            _ => return Err(FgscError::improper("mean undefined for zero precision")),
        };
        Ok(())
    }

    fn fill_xi(&mut self) -> Result<()> {
        if self.xi.is_some() {
            return Ok(());
        }
        match (self.m, self.w) {
            (Some(m), Some(w)) => {
                self.xi = Some(w * m);
                Ok(())
            }
            _ => Err(FgscError::improper("xi requires mean and precision")),
        }
    }
}

/// Picks the cheapest form in `order` that every input already carries.
///
/// When none matches, all inputs are converted to `order[0]` once and that form
/// is returned. Callers apply the closed form for the returned parametrization.
pub fn select_parametrization(
    inputs: &mut [Gaussian],
    order: &[Parametrization],
) -> Result<Parametrization> {
    if let Some(form) = order
        .iter()
        .copied()
        .find(|form| inputs.iter().all(|g| g.is_valid(*form)))
    {
        return Ok(form);
    }
    let forced = order
        .first()
        .copied()
        .unwrap_or(Parametrization::MeanVariance);
    for input in inputs.iter_mut() {
        input.ensure(forced)?;
    }
    Ok(forced)
}

/// Point mass at `m`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Delta {
    pub m: f64,
}

/// Shape/rate gamma.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Gamma {
    pub a: f64,
    pub b: f64,
}

/// Shape/scale inverse gamma.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InverseGamma {
    pub a: f64,
    pub b: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Beta {
    pub a: f64,
    pub b: f64,
}

/// Location `m`, precision `lambda`, degrees of freedom `nu`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StudentsT {
    pub m: f64,
    pub lambda: f64,
    pub nu: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "family", rename_all = "snake_case")]
pub enum Distribution {
    Delta(Delta),
    Gaussian(Gaussian),
    Gamma(Gamma),
    InverseGamma(InverseGamma),
    Beta(Beta),
    StudentsT(StudentsT),
}

impl Distribution {
    pub fn delta(m: f64) -> Self {
        Distribution::Delta(Delta { m })
    }

    pub fn gaussian(m: f64, v: f64) -> Self {
        Distribution::Gaussian(Gaussian::from_mean_variance(m, v))
    }

    pub fn kind(&self) -> DistributionKind {
        match self {
            Distribution::Delta(_) => DistributionKind::Delta,
            Distribution::Gaussian(_) => DistributionKind::Gaussian,
            Distribution::Gamma(_) => DistributionKind::Gamma,
            Distribution::InverseGamma(_) => DistributionKind::InverseGamma,
            Distribution::Beta(_) => DistributionKind::Beta,
            Distribution::StudentsT(_) => DistributionKind::StudentsT,
        }
    }

    pub fn is_proper(&self) -> bool {
        match self {
            Distribution::Delta(d) => d.m.is_finite(),
            Distribution::Gaussian(g) => g.is_proper(),
            Distribution::Gamma(g) => g.a > 0.0 && g.b > 0.0,
            Distribution::InverseGamma(g) => g.a > 0.0 && g.b > 0.0,
            Distribution::Beta(b) => b.a > 0.0 && b.b > 0.0,
            Distribution::StudentsT(t) => t.m.is_finite() && t.lambda > 0.0 && t.nu > 0.0,
        }
    }

    /// Expected value, where the family defines one.
    pub fn mean(&self) -> Result<f64> {
        match self {
            Distribution::Delta(d) => Ok(d.m),
            Distribution::Gaussian(g) => g.mean(),
            Distribution::Gamma(g) => Ok(g.a / g.b),
            Distribution::InverseGamma(g) if g.a > 1.0 => Ok(g.b / (g.a - 1.0)),
            Distribution::InverseGamma(_) => {
                Err(FgscError::improper("inverse gamma mean requires shape > 1"))
            }
            Distribution::Beta(b) => Ok(b.a / (b.a + b.b)),
            Distribution::StudentsT(t) if t.nu > 1.0 => Ok(t.m),
            Distribution::StudentsT(_) => {
                Err(FgscError::improper("student's t mean requires nu > 1"))
            }
        }
    }

    /// Generic widening used when no rule matches the exact kinds: a point
    /// mass becomes a zero-variance Gaussian. `None` when no wider family exists.
    pub fn widened(&self) -> Option<Distribution> {
        match self {
            Distribution::Delta(d) => Some(Distribution::gaussian(d.m, 0.0)),
            _ => None,
        }
    }

    /// Normalized pointwise product of two densities.
    ///
    /// `Ok(None)` when the pair has no closed-form product.
    pub fn product(&self, other: &Distribution) -> Result<Option<Distribution>> {
        let out = match (self, other) {
            (Distribution::Delta(x), Distribution::Delta(y)) => {
                if x.m != y.m {
                    return Err(FgscError::improper(format!(
                        "conflicting point masses {} and {}",
                        x.m, y.m
                    )));
                }
                Distribution::Delta(*x)
            }
            (Distribution::Delta(d), _) | (_, Distribution::Delta(d)) => Distribution::Delta(*d),
            (Distribution::Gaussian(x), Distribution::Gaussian(y)) => {
                Distribution::Gaussian(gaussian_product(*x, *y)?)
            }
            (Distribution::Gamma(x), Distribution::Gamma(y)) => Distribution::Gamma(Gamma {
                a: x.a + y.a - 1.0,
                b: x.b + y.b,
            }),
            (Distribution::InverseGamma(x), Distribution::InverseGamma(y)) => {
                Distribution::InverseGamma(InverseGamma {
                    a: x.a + y.a + 1.0,
                    b: x.b + y.b,
                })
            }
            (Distribution::Beta(x), Distribution::Beta(y)) => Distribution::Beta(Beta {
                a: x.a + y.a - 1.0,
                b: x.b + y.b - 1.0,
            }),
            _ => return Ok(None),
        };
        if !out.is_proper() {
            return Err(FgscError::improper(format!("product {} is not normalizable", out)));
        }
        Ok(Some(out))
    }
}

/// Gaussian product, cheapest form first: canonical sums, then the
/// mean/precision weighted form; otherwise both inputs go canonical.
///
/// A zero-variance input behaves like a point mass and is the product.
pub fn gaussian_product(x: Gaussian, y: Gaussian) -> Result<Gaussian> {
    match (x.point_mass(), y.point_mass()) {
        (Some(a), Some(b)) if a != b => {
            return Err(FgscError::improper(format!(
                "conflicting zero-variance gaussians at {} and {}",
                a, b
            )))
        }
        (Some(_), _) => return Ok(x),
        (None, Some(_)) => return Ok(y),
        (None, None) => {}
    }

    let mut inputs = [x, y];
    let form = select_parametrization(
        &mut inputs,
        &[Parametrization::Canonical, Parametrization::MeanPrecision],
    )?;
    let [x, y] = inputs;
    match form {
        Parametrization::MeanPrecision => {
            let (mx, wx) = (x.m.unwrap_or_default(), x.w.unwrap_or_default());
            let (my, wy) = (y.m.unwrap_or_default(), y.w.unwrap_or_default());
            let w = wx + wy;
            if w <= 0.0 {
                return Err(FgscError::improper("product precision is not positive"));
            }
            Ok(Gaussian::from_mean_precision((wx * mx + wy * my) / w, w))
        }
        _ => Ok(Gaussian::from_canonical(
            x.xi.unwrap_or_default() + y.xi.unwrap_or_default(),
            x.w.unwrap_or_default() + y.w.unwrap_or_default(),
        )),
    }
}

impl fmt::Display for Distribution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Distribution::Delta(d) => write!(f, "δ({})", d.m),
            Distribution::Gaussian(g) => match (g.m, g.v, g.w, g.xi) {
                (Some(m), Some(v), _, _) => write!(f, "N(m={}, V={})", m, v),
                (Some(m), None, Some(w), _) => write!(f, "N(m={}, W={})", m, w),
                (_, _, Some(w), Some(xi)) => write!(f, "N(xi={}, W={})", xi, w),
                _ => write!(f, "N(?)"),
            },
            Distribution::Gamma(g) => write!(f, "Gam(a={}, b={})", g.a, g.b),
            Distribution::InverseGamma(g) => write!(f, "Ig(a={}, b={})", g.a, g.b),
            Distribution::Beta(b) => write!(f, "Beta(a={}, b={})", b.a, b.b),
            Distribution::StudentsT(t) => {
                write!(f, "St(m={}, lambda={}, nu={})", t.m, t.lambda, t.nu)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() < 1e-12,
            "expected {}, got {}",
            expected,
            actual
        );
    }

    #[test]
    fn ensure_is_noop_when_form_already_valid() {
        let mut g = Gaussian::from_canonical(2.0, 4.0);
        let before = g;
        g.ensure(Parametrization::Canonical).expect("canonical");
        assert_eq!(g, before);
    }

    #[test]
    fn ensure_only_adds_missing_slots() {
        let mut g = Gaussian::from_mean_variance(3.0, 0.5);
        g.ensure(Parametrization::Canonical).expect("canonical");
        assert_eq!(g.m(), Some(3.0));
        assert_eq!(g.v(), Some(0.5));
        assert_close(g.w().unwrap(), 2.0);
        assert_close(g.xi().unwrap(), 6.0);
    }

    #[test]
    fn canonical_to_mean_variance() {
        let g = Gaussian::from_canonical(6.0, 2.0);
        assert_close(g.mean().unwrap(), 3.0);
        assert_close(g.variance().unwrap(), 0.5);
    }

    #[test]
    fn zero_variance_has_no_precision_form() {
        let g = Gaussian::from_mean_variance(1.0, 0.0);
        let err = g.converted(Parametrization::MeanPrecision).unwrap_err();
        assert!(matches!(err, FgscError::ImproperValue(_)));
    }

    #[test]
    fn selection_prefers_existing_form() {
        let mut inputs = [
            Gaussian::from_mean_precision(1.0, 1.0),
            Gaussian::from_mean_precision(2.0, 3.0),
        ];
        let form = select_parametrization(
            &mut inputs,
            &[Parametrization::Canonical, Parametrization::MeanPrecision],
        )
        .unwrap();
        assert_eq!(form, Parametrization::MeanPrecision);
        assert!(inputs.iter().all(|g| g.xi().is_none()));
    }

    #[test]
    fn selection_forces_single_conversion() {
        let mut inputs = [
            Gaussian::from_mean_variance(1.0, 1.0),
            Gaussian::from_canonical(1.0, 2.0),
        ];
        let form = select_parametrization(
            &mut inputs,
            &[Parametrization::Canonical, Parametrization::MeanPrecision],
        )
        .unwrap();
        assert_eq!(form, Parametrization::Canonical);
        assert!(inputs.iter().all(|g| g.is_valid(Parametrization::Canonical)));
    }

    #[test]
    fn gaussian_product_matches_precision_weighting() {
        let p = gaussian_product(
            Gaussian::from_mean_variance(0.0, 1.0),
            Gaussian::from_mean_variance(2.0, 1.0),
        )
        .unwrap();
        assert_close(p.mean().unwrap(), 1.0);
        assert_close(p.variance().unwrap(), 0.5);
    }

    #[test]
    fn delta_dominates_product() {
        let p = Distribution::gaussian(0.0, 1.0)
            .product(&Distribution::delta(4.0))
            .unwrap();
        assert_eq!(p, Some(Distribution::delta(4.0)));
    }

    #[test]
    fn conjugate_products() {
        let gam = Distribution::Gamma(Gamma { a: 2.0, b: 1.0 })
            .product(&Distribution::Gamma(Gamma { a: 3.0, b: 2.0 }))
            .unwrap();
        assert_eq!(gam, Some(Distribution::Gamma(Gamma { a: 4.0, b: 3.0 })));

        let beta = Distribution::Beta(Beta { a: 2.0, b: 2.0 })
            .product(&Distribution::Beta(Beta { a: 1.0, b: 3.0 }))
            .unwrap();
        assert_eq!(beta, Some(Distribution::Beta(Beta { a: 2.0, b: 4.0 })));
    }

    #[test]
    fn mismatched_families_have_no_product() {
        let p = Distribution::Beta(Beta { a: 1.0, b: 1.0 })
            .product(&Distribution::Gamma(Gamma { a: 1.0, b: 1.0 }))
            .unwrap();
        assert!(p.is_none());
    }

    #[test]
    fn zero_variance_input_is_the_product() {
        let point = Gaussian::from_mean_variance(2.0, 0.0);
        let p = gaussian_product(point, Gaussian::from_mean_variance(1.0, 1.0)).unwrap();
        assert_eq!(p, point);
        let p = gaussian_product(Gaussian::from_canonical(1.0, 1.0), point).unwrap();
        assert_eq!(p, point);

        let err = gaussian_product(point, Gaussian::from_mean_variance(3.0, 0.0)).unwrap_err();
        assert!(matches!(err, FgscError::ImproperValue(_)));
        assert!(gaussian_product(point, point).is_ok());
    }

    #[test]
    fn deserialization_requires_a_complete_form() {
        let empty = serde_json::from_str::<Distribution>(r#"{"family":"gaussian"}"#);
        assert!(empty.is_err());
        let half = serde_json::from_str::<Distribution>(r#"{"family":"gaussian","m":1.0}"#);
        assert!(half.is_err());

        let canonical: Distribution =
            serde_json::from_str(r#"{"family":"gaussian","xi":4.0,"w":2.0}"#).unwrap();
        assert_eq!(canonical, Distribution::Gaussian(Gaussian::from_canonical(4.0, 2.0)));
    }

    #[test]
    fn deserialization_rejects_disagreeing_slots() {
        let bad_xi = r#"{"family":"gaussian","m":1.0,"w":2.0,"xi":5.0}"#;
        assert!(serde_json::from_str::<Distribution>(bad_xi).is_err());
        let bad_w = r#"{"family":"gaussian","m":1.0,"v":2.0,"w":2.0}"#;
        assert!(serde_json::from_str::<Distribution>(bad_w).is_err());

        let full = Gaussian::from_mean_variance(3.0, 0.5)
            .converted(Parametrization::Canonical)
            .unwrap();
        let text = serde_json::to_string(&Distribution::Gaussian(full)).unwrap();
        let back: Distribution = serde_json::from_str(&text).unwrap();
        assert_eq!(back, Distribution::Gaussian(full));
    }

    #[test]
    fn empty_gaussian_is_not_proper() {
        let empty = Gaussian {
            m: None,
            v: None,
            w: None,
            xi: None,
        };
        assert!(!empty.is_proper());
        assert!(!Gaussian { m: Some(1.0), ..empty }.is_proper());
    }

    #[test]
    fn propriety() {
        assert!(!Distribution::gaussian(0.0, -1.0).is_proper());
        assert!(Distribution::gaussian(0.0, 0.0).is_proper());
        assert!(!Distribution::Gaussian(Gaussian::from_mean_precision(0.0, 0.0)).is_proper());
        assert!(!Distribution::Gamma(Gamma { a: 0.0, b: 1.0 }).is_proper());
    }
}
